//! Structured report inputs
//!
//! Bundles the patient profile, computed records, BIVA vectors and trend
//! result into one serializable payload for the narrative, PDF and chart
//! collaborators, and renders the KPI comparison table shown in the terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

use crate::error::Result;
use crate::metrics::{BivaVector, MetricsEngine};
use crate::models::{HistoryEntry, Metric, MetricSource, MetricsRecord, RawMeasurement, Sex, Side};
use crate::trend::TrendResult;

/// Anthropometrics and free-text context for one visit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub name: String,
    pub sex: Sex,
    pub age_years: u32,
    pub height_cm: f64,
    pub weight_kg: f64,

    /// Sport or activity level ("Sedentary", "Football", ...)
    pub activity: Option<String>,

    /// Clinician notes passed through to the narrative generator
    pub clinical_notes: Option<String>,
}

impl PatientProfile {
    /// Raw measurement for this patient with the given electrode reading
    pub fn measurement(&self, resistance_ohm: f64, reactance_ohm: f64) -> RawMeasurement {
        RawMeasurement::new(
            resistance_ohm,
            reactance_ohm,
            self.height_cm,
            self.weight_kg,
            self.age_years,
            self.sex,
        )
    }
}

/// BIVA point for one side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BivaReading {
    pub side: Side,
    pub vector: BivaVector,
}

/// Everything downstream reporting needs from one analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub generated_at: DateTime<Utc>,
    pub patient: PatientProfile,

    /// Right side (or the only side in standard mode)
    pub primary: MetricsRecord,

    /// Left side in bilateral mode
    pub contralateral: Option<MetricsRecord>,

    pub biva: Vec<BivaReading>,
    pub trend: TrendResult,
}

impl ReportPayload {
    pub fn new(
        patient: PatientProfile,
        primary: MetricsRecord,
        contralateral: Option<MetricsRecord>,
        trend: TrendResult,
    ) -> Self {
        let mut biva = Vec::new();
        let sides = [(Side::Right, Some(&primary)), (Side::Left, contralateral.as_ref())];
        for (side, record) in sides {
            if let Some(record) = record {
                let input = patient.measurement(record.resistance_ohm, record.reactance_ohm);
                if let Some(vector) = MetricsEngine::biva_vector(&input) {
                    biva.push(BivaReading { side, vector });
                }
            }
        }

        Self {
            generated_at: Utc::now(),
            patient,
            primary,
            contralateral,
            biva,
            trend,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Export the payload as pretty-printed JSON
    pub fn export_json<P: AsRef<Path>>(&self, output_path: P) -> Result<()> {
        let json_data = self.to_json()?;

        let mut file = std::fs::File::create(output_path)?;
        file.write_all(json_data.as_bytes())?;

        Ok(())
    }
}

#[derive(Tabled)]
struct KpiRow {
    #[tabled(rename = "Parameter")]
    parameter: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Previous")]
    previous: String,
    #[tabled(rename = "Change")]
    change: String,
}

struct KpiContext<'a> {
    previous: Option<&'a HistoryEntry>,
    deltas: &'a BTreeMap<Metric, f64>,
}

fn kpi_row(label: &str, value: f64, unit: &str, metric: Option<Metric>, context: &KpiContext) -> KpiRow {
    let prior = metric.and_then(|m| context.previous.and_then(|p| p.metric(m)));
    let delta = metric.and_then(|m| context.deltas.get(&m).copied());

    let previous = match prior {
        Some(before) => format!("{} {}", before, unit),
        None => "-".to_string(),
    };
    let change = match delta {
        Some(delta) => {
            let sign = if delta > 0.0 { "+" } else { "" };
            format!("{}{:.1}", sign, delta)
        }
        None => "-".to_string(),
    };

    KpiRow {
        parameter: label.to_string(),
        current: format!("{} {}", value, unit),
        previous,
        change,
    }
}

/// KPI table of the main metrics
///
/// The previous column shows the baseline visit's values; the change column
/// shows the analyzer's deltas (see [`TrendResult::deltas`]).
pub fn render_kpi_table(
    record: &MetricsRecord,
    previous: Option<&HistoryEntry>,
    deltas: &BTreeMap<Metric, f64>,
) -> String {
    let context = KpiContext { previous, deltas };
    let rows = vec![
        kpi_row("Phase angle (PhA)", record.phase_angle_deg, "deg", Some(Metric::PhaseAngle), &context),
        kpi_row("Body fat (FM%)", record.fm_perc, "%", Some(Metric::FatMassPercent), &context),
        kpi_row("Fat-free mass (FFM)", record.ffm_kg, "kg", Some(Metric::FatFreeMass), &context),
        kpi_row("Skeletal muscle (SMM)", record.smm_kg, "kg", None, &context),
        kpi_row("Body cell mass (BCM)", record.bcm_kg, "kg", Some(Metric::BodyCellMass), &context),
        kpi_row("Total body water (TBW)", record.tbw_l, "L", Some(Metric::TotalBodyWater), &context),
        kpi_row("Extracellular water (ECW)", record.ecw_l, "L", None, &context),
        kpi_row("Intracellular water (ICW)", record.icw_l, "L", None, &context),
        kpi_row("Weight", record.weight_kg, "kg", Some(Metric::Weight), &context),
        kpi_row("BMI", record.bmi, "", None, &context),
        kpi_row("BMR", record.bmr_kcal as f64, "kcal", None, &context),
    ];

    Table::new(rows).with(Style::modern()).to_string()
}
