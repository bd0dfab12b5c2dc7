use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Biological sex used to select the regression equations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// 1 for male, 0 for female (skeletal muscle equation term)
    pub fn indicator(&self) -> f64 {
        match self {
            Sex::Male => 1.0,
            Sex::Female => 0.0,
        }
    }
}

impl std::str::FromStr for Sex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "m" | "male" | "maschio" => Ok(Sex::Male),
            "f" | "female" | "femmina" => Ok(Sex::Female),
            _ => Err(format!("Invalid sex: {}", s)),
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sex::Male => write!(f, "M"),
            Sex::Female => write!(f, "F"),
        }
    }
}

/// Body side of a bilateral measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Right,
    Left,
}

/// One side's device reading plus the anthropometrics it is interpreted with
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawMeasurement {
    /// Resistance (Rz) in ohms
    pub resistance_ohm: f64,

    /// Reactance (Xc) in ohms
    pub reactance_ohm: f64,

    /// Height in centimeters
    pub height_cm: f64,

    /// Weight in kilograms
    pub weight_kg: f64,

    /// Age in years
    pub age_years: u32,

    pub sex: Sex,
}

impl RawMeasurement {
    pub fn new(
        resistance_ohm: f64,
        reactance_ohm: f64,
        height_cm: f64,
        weight_kg: f64,
        age_years: u32,
        sex: Sex,
    ) -> Self {
        Self {
            resistance_ohm,
            reactance_ohm,
            height_cm,
            weight_kg,
            age_years,
            sex,
        }
    }

    /// Same anthropometrics, different electrode reading (contralateral side)
    pub fn with_reading(&self, resistance_ohm: f64, reactance_ohm: f64) -> Self {
        Self {
            resistance_ohm,
            reactance_ohm,
            ..*self
        }
    }
}

/// Derived body-composition estimates for one side
///
/// Serialized names are the column/key names used by the archive, the
/// report payload and the narrative generator, so they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    #[serde(rename = "Rz")]
    pub resistance_ohm: f64,

    #[serde(rename = "Xc")]
    pub reactance_ohm: f64,

    pub weight_kg: f64,

    /// Phase angle in degrees (2 decimals)
    #[serde(rename = "PhA")]
    pub phase_angle_deg: f64,

    #[serde(rename = "BMI")]
    pub bmi: f64,

    /// Total body water in liters
    #[serde(rename = "TBW_L")]
    pub tbw_l: f64,

    #[serde(rename = "TBW_perc")]
    pub tbw_perc: f64,

    /// Extracellular water in liters
    #[serde(rename = "ECW_L")]
    pub ecw_l: f64,

    #[serde(rename = "ECW_perc")]
    pub ecw_perc: f64,

    /// Intracellular water in liters
    #[serde(rename = "ICW_L")]
    pub icw_l: f64,

    #[serde(rename = "ICW_perc")]
    pub icw_perc: f64,

    /// Fat mass in kilograms
    #[serde(rename = "FM_kg")]
    pub fm_kg: f64,

    #[serde(rename = "FM_perc")]
    pub fm_perc: f64,

    /// Fat-free mass in kilograms
    #[serde(rename = "FFM_kg")]
    pub ffm_kg: f64,

    #[serde(rename = "FFM_perc")]
    pub ffm_perc: f64,

    /// Skeletal muscle mass in kilograms
    #[serde(rename = "SMM_kg")]
    pub smm_kg: f64,

    /// Body cell mass in kilograms
    #[serde(rename = "BCM_kg")]
    pub bcm_kg: f64,

    /// Basal metabolic rate in kcal/day
    #[serde(rename = "BMR_kcal")]
    pub bmr_kcal: i64,
}

impl MetricsRecord {
    /// The all-zero record handed to callers that cannot use the typed outcome.
    /// Raw readings are still echoed.
    pub fn zeroed(resistance_ohm: f64, reactance_ohm: f64, weight_kg: f64) -> Self {
        Self {
            resistance_ohm,
            reactance_ohm,
            weight_kg,
            phase_angle_deg: 0.0,
            bmi: 0.0,
            tbw_l: 0.0,
            tbw_perc: 0.0,
            ecw_l: 0.0,
            ecw_perc: 0.0,
            icw_l: 0.0,
            icw_perc: 0.0,
            fm_kg: 0.0,
            fm_perc: 0.0,
            ffm_kg: 0.0,
            ffm_perc: 0.0,
            smm_kg: 0.0,
            bcm_kg: 0.0,
            bmr_kcal: 0,
        }
    }

    /// True when every derived field is zero
    pub fn is_zeroed(&self) -> bool {
        [
            self.phase_angle_deg,
            self.bmi,
            self.tbw_l,
            self.tbw_perc,
            self.ecw_l,
            self.ecw_perc,
            self.icw_l,
            self.icw_perc,
            self.fm_kg,
            self.fm_perc,
            self.ffm_kg,
            self.ffm_perc,
            self.smm_kg,
            self.bcm_kg,
        ]
        .iter()
        .all(|v| *v == 0.0)
            && self.bmr_kcal == 0
    }
}

/// Metrics that can be compared across visits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "PhA")]
    PhaseAngle,
    #[serde(rename = "FM_perc")]
    FatMassPercent,
    #[serde(rename = "BCM_kg")]
    BodyCellMass,
    #[serde(rename = "TBW_L")]
    TotalBodyWater,
    #[serde(rename = "FFM_kg")]
    FatFreeMass,
    #[serde(rename = "weight")]
    Weight,
}

impl Metric {
    /// Whitelist of metrics the trend analysis compares
    pub const COMPARABLE: [Metric; 6] = [
        Metric::PhaseAngle,
        Metric::FatMassPercent,
        Metric::BodyCellMass,
        Metric::TotalBodyWater,
        Metric::FatFreeMass,
        Metric::Weight,
    ];

    /// Canonical key
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::PhaseAngle => "PhA",
            Metric::FatMassPercent => "FM_perc",
            Metric::BodyCellMass => "BCM_kg",
            Metric::TotalBodyWater => "TBW_L",
            Metric::FatFreeMass => "FFM_kg",
            Metric::Weight => "weight",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::PhaseAngle => "deg",
            Metric::FatMassPercent => "%",
            Metric::BodyCellMass | Metric::FatFreeMass | Metric::Weight => "kg",
            Metric::TotalBodyWater => "L",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can supply comparable metric values by canonical name
pub trait MetricSource {
    /// Value for `metric`, or `None` when absent or unusable
    fn metric(&self, metric: Metric) -> Option<f64>;
}

impl MetricSource for MetricsRecord {
    /// A degraded (all-zero) record exposes no metrics
    fn metric(&self, metric: Metric) -> Option<f64> {
        if self.is_zeroed() {
            return None;
        }
        let value = match metric {
            Metric::PhaseAngle => self.phase_angle_deg,
            Metric::FatMassPercent => self.fm_perc,
            Metric::BodyCellMass => self.bcm_kg,
            Metric::TotalBodyWater => self.tbw_l,
            Metric::FatFreeMass => self.ffm_kg,
            Metric::Weight => self.weight_kg,
        };
        Some(value)
    }
}

/// A past visit as handed back by the persistence layer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Visit date as stored
    pub date_text: String,

    /// Parsed visit date, when the stored text is a recognised format
    pub date: Option<NaiveDate>,

    /// Metric values that parsed; unparseable fields are simply missing
    pub values: BTreeMap<Metric, f64>,
}

impl HistoryEntry {
    pub fn new(date_text: impl Into<String>, date: Option<NaiveDate>) -> Self {
        Self {
            date_text: date_text.into(),
            date,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style insert of a metric value
    pub fn with_value(mut self, metric: Metric, value: f64) -> Self {
        self.values.insert(metric, value);
        self
    }
}

impl MetricSource for HistoryEntry {
    fn metric(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied().filter(|v| v.is_finite())
    }
}
