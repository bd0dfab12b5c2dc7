//! Body-composition metrics from bioimpedance readings
//!
//! Turns one side's resistance/reactance reading plus height, weight, age and
//! sex into the full set of derived estimates: phase angle, water
//! compartments, fat and fat-free mass, skeletal muscle, body cell mass and
//! basal metabolic rate.
//!
//! The water and fat-free mass regressions take height in centimeters
//! (`H²/Rz` with H in cm). Feeding meters produces values four orders of
//! magnitude off.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{MetricsRecord, RawMeasurement, Sex};

/// Physiological safety limits applied after the regressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// ECW below this fraction of TBW is considered implausible
    pub ecw_min_fraction: f64,

    /// ECW fraction of TBW substituted when below the minimum
    pub ecw_low_reset_fraction: f64,

    /// ECW above this fraction of TBW is considered implausible
    pub ecw_max_fraction: f64,

    /// ECW fraction of TBW substituted when above the maximum
    pub ecw_high_reset_fraction: f64,

    /// FFM may not exceed this fraction of body weight
    pub ffm_max_weight_fraction: f64,
}

impl EngineConfig {
    pub const ECW_MIN_FRACTION: f64 = 0.30;
    pub const ECW_LOW_RESET_FRACTION: f64 = 0.35;
    pub const ECW_MAX_FRACTION: f64 = 0.55;
    pub const ECW_HIGH_RESET_FRACTION: f64 = 0.50;
    pub const FFM_MAX_WEIGHT_FRACTION: f64 = 0.98;
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            ecw_min_fraction: Self::ECW_MIN_FRACTION,
            ecw_low_reset_fraction: Self::ECW_LOW_RESET_FRACTION,
            ecw_max_fraction: Self::ECW_MAX_FRACTION,
            ecw_high_reset_fraction: Self::ECW_HIGH_RESET_FRACTION,
            ffm_max_weight_fraction: Self::FFM_MAX_WEIGHT_FRACTION,
        }
    }
}

/// Which input made a measurement unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegradedInput {
    Resistance,
    Height,
    Weight,
}

impl DegradedInput {
    pub fn description(&self) -> &'static str {
        match self {
            DegradedInput::Resistance => "resistance must be positive",
            DegradedInput::Height => "height must be positive",
            DegradedInput::Weight => "weight must be positive",
        }
    }
}

/// Result of a computation: a full record, or a marker that the inputs were unusable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricsOutcome {
    Valid(MetricsRecord),
    Degraded {
        reason: DegradedInput,
        /// Zeroed record echoing the raw readings
        sentinel: MetricsRecord,
    },
}

impl MetricsOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, MetricsOutcome::Valid(_))
    }

    pub fn record(&self) -> Option<&MetricsRecord> {
        match self {
            MetricsOutcome::Valid(record) => Some(record),
            MetricsOutcome::Degraded { .. } => None,
        }
    }

    /// The record, or the all-zero sentinel when inputs were degraded
    pub fn into_record(self) -> MetricsRecord {
        match self {
            MetricsOutcome::Valid(record) => record,
            MetricsOutcome::Degraded { sentinel, .. } => sentinel,
        }
    }
}

/// Resistance and reactance normalised by height, for the BIVA RXc graph
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BivaVector {
    /// R/H in ohm/m
    pub r_over_h: f64,
    /// Xc/H in ohm/m
    pub xc_over_h: f64,
}

/// Sex-specific regression outputs before clamping
struct Regression {
    tbw: f64,
    ecw: f64,
    ffm: f64,
}

/// Bioimpedance metrics engine
#[derive(Debug, Clone, Default)]
pub struct MetricsEngine {
    config: EngineConfig,
}

impl MetricsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compute metrics from scalar inputs
    pub fn compute_metrics(
        &self,
        rz: f64,
        xc: f64,
        height_cm: f64,
        weight_kg: f64,
        age: u32,
        sex: Sex,
    ) -> MetricsOutcome {
        self.compute(&RawMeasurement::new(rz, xc, height_cm, weight_kg, age, sex))
    }

    /// Compute the full metrics record for one side
    ///
    /// Never fails: a non-positive (or NaN) resistance, height or weight
    /// yields [`MetricsOutcome::Degraded`]. Other inputs, including negative
    /// reactance or implausible ages, go through the equations unchanged.
    pub fn compute(&self, input: &RawMeasurement) -> MetricsOutcome {
        let rz = input.resistance_ohm;
        let xc = input.reactance_ohm;
        let height_cm = input.height_cm;
        let weight = input.weight_kg;

        if let Some(reason) = Self::degraded_input(input) {
            warn!(
                rz,
                height_cm,
                weight_kg = weight,
                reason = reason.description(),
                "Degraded bioimpedance input, returning zeroed record"
            );
            return MetricsOutcome::Degraded {
                reason,
                sentinel: MetricsRecord::zeroed(rz, xc, weight),
            };
        }

        let height_m = height_cm / 100.0;
        let bmi = weight / (height_m * height_m);

        let pha = Self::phase_angle(rz, xc);
        let h2_rz = Self::height_squared_over_resistance(height_cm, rz);

        let Regression { tbw, ecw, ffm } = Self::regression(input.sex, h2_rz, weight, rz);

        let ecw = self.clamp_ecw(ecw, tbw);
        let icw = tbw - ecw;

        let ffm = ffm.min(weight * self.config.ffm_max_weight_fraction);
        let fm = (weight - ffm).max(0.0);

        let smm = 0.401 * h2_rz + 3.825 * input.sex.indicator() - 0.071 * input.age_years as f64
            + 5.102;

        let bcm = ffm * Self::bcm_coefficient(pha);
        let bmr = (500.0 + 22.0 * ffm).trunc() as i64;

        let percent = |value: f64| value / weight * 100.0;

        let record = MetricsRecord {
            resistance_ohm: rz,
            reactance_ohm: xc,
            weight_kg: weight,
            phase_angle_deg: round_to(pha, 2),
            bmi: round_to(bmi, 1),
            tbw_l: round_to(tbw, 1),
            tbw_perc: round_to(percent(tbw), 1),
            ecw_l: round_to(ecw, 1),
            ecw_perc: round_to(percent(ecw), 1),
            icw_l: round_to(icw, 1),
            icw_perc: round_to(percent(icw), 1),
            fm_kg: round_to(fm, 1),
            fm_perc: round_to(percent(fm), 1),
            ffm_kg: round_to(ffm, 1),
            ffm_perc: round_to(percent(ffm), 1),
            smm_kg: round_to(smm, 1),
            bcm_kg: round_to(bcm, 1),
            bmr_kcal: bmr,
        };

        debug!(
            rz,
            xc,
            sex = %input.sex,
            pha = record.phase_angle_deg,
            tbw = record.tbw_l,
            ffm = record.ffm_kg,
            "Computed body composition"
        );

        MetricsOutcome::Valid(record)
    }

    /// Compute right and left sides sharing the same anthropometrics
    pub fn compute_bilateral(
        &self,
        right: &RawMeasurement,
        left_rz: f64,
        left_xc: f64,
    ) -> (MetricsOutcome, MetricsOutcome) {
        let left = right.with_reading(left_rz, left_xc);
        (self.compute(right), self.compute(&left))
    }

    /// BIVA point: Rz and Xc divided by height in meters
    pub fn biva_vector(input: &RawMeasurement) -> Option<BivaVector> {
        if !(input.height_cm > 0.0) {
            return None;
        }
        let height_m = input.height_cm / 100.0;
        Some(BivaVector {
            r_over_h: round_to(input.resistance_ohm / height_m, 1),
            xc_over_h: round_to(input.reactance_ohm / height_m, 1),
        })
    }

    /// Phase angle in degrees, 0 when resistance is zero
    pub fn phase_angle(rz: f64, xc: f64) -> f64 {
        if rz == 0.0 {
            0.0
        } else {
            (xc / rz).atan().to_degrees()
        }
    }

    /// Impedance index H²/Rz with H in centimeters
    pub fn height_squared_over_resistance(height_cm: f64, rz: f64) -> f64 {
        height_cm.powi(2) / rz
    }

    /// Fraction of FFM that is body cell mass, scaled by phase angle around 5°
    pub fn bcm_coefficient(pha: f64) -> f64 {
        0.50 + 0.02 * (pha - 5.0)
    }

    fn degraded_input(input: &RawMeasurement) -> Option<DegradedInput> {
        let usable = |x: f64| x.is_finite() && x > 0.0;
        if !usable(input.resistance_ohm) {
            Some(DegradedInput::Resistance)
        } else if !usable(input.height_cm) {
            Some(DegradedInput::Height)
        } else if !usable(input.weight_kg) {
            Some(DegradedInput::Weight)
        } else {
            None
        }
    }

    fn regression(sex: Sex, h2_rz: f64, weight: f64, rz: f64) -> Regression {
        match sex {
            Sex::Male => Regression {
                tbw: 1.2 + 0.45 * h2_rz + 0.18 * weight,
                ecw: 0.065 * h2_rz + 0.177 * weight - 2.5,
                ffm: -10.68 + 0.65 * h2_rz + 0.26 * weight + 0.02 * rz,
            },
            Sex::Female => Regression {
                tbw: 3.75 + 0.45 * h2_rz + 0.11 * weight,
                ecw: 0.065 * h2_rz + 0.150 * weight - 1.8,
                ffm: -9.53 + 0.69 * h2_rz + 0.17 * weight + 0.02 * rz,
            },
        }
    }

    /// Keep ECW within the plausible share of TBW. Only applies when TBW > 0.
    fn clamp_ecw(&self, ecw: f64, tbw: f64) -> f64 {
        if tbw <= 0.0 {
            return ecw;
        }

        let mut ecw = ecw;
        if ecw < tbw * self.config.ecw_min_fraction {
            ecw = tbw * self.config.ecw_low_reset_fraction;
        }
        if ecw > tbw * self.config.ecw_max_fraction {
            ecw = tbw * self.config.ecw_high_reset_fraction;
        }
        ecw
    }
}

/// Round to `places` decimals using the correctly rounded decimal expansion
///
/// Matches the reference outputs digit for digit, unlike scaling by 10^n and
/// calling `round()`, which drifts on values such as 2.675.
pub fn round_to(value: f64, places: usize) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{:.*}", places, value).parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reference_male() -> RawMeasurement {
        RawMeasurement::new(500.0, 50.0, 180.0, 75.0, 30, Sex::Male)
    }

    fn valid(outcome: MetricsOutcome) -> MetricsRecord {
        match outcome {
            MetricsOutcome::Valid(record) => record,
            other => panic!("expected valid outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_reference_male_golden_vector() {
        let record = valid(MetricsEngine::new().compute(&reference_male()));

        assert_eq!(record.resistance_ohm, 500.0);
        assert_eq!(record.reactance_ohm, 50.0);
        assert_eq!(record.phase_angle_deg, 5.71);
        assert_eq!(record.bmi, 23.1);
        assert_eq!(record.tbw_l, 43.9);
        assert_eq!(record.tbw_perc, 58.5);
        assert_eq!(record.ecw_l, 15.0);
        assert_eq!(record.icw_l, 28.9);
        assert_eq!(record.ffm_kg, 60.9);
        assert_eq!(record.ffm_perc, 81.3);
        assert_eq!(record.fm_kg, 14.1);
        assert_eq!(record.fm_perc, 18.7);
        assert_eq!(record.smm_kg, 32.8);
        assert_eq!(record.bcm_kg, 31.3);
        assert_eq!(record.bmr_kcal, 1840);
    }

    #[test]
    fn test_height_is_in_centimeters() {
        assert!((MetricsEngine::height_squared_over_resistance(180.0, 500.0) - 64.8).abs() < 1e-9);

        // Meters would give ~0.00648 and a TBW of ~14.7 L for a 75 kg adult
        let record = valid(MetricsEngine::new().compute(&reference_male()));
        assert!(record.tbw_l > 40.0);
    }

    #[test]
    fn test_female_equations() {
        let input = RawMeasurement::new(600.0, 60.0, 165.0, 60.0, 40, Sex::Female);
        let record = valid(MetricsEngine::new().compute(&input));

        // H2/Rz = 27225 / 600 = 45.375
        // TBW = 3.75 + 20.41875 + 6.6 = 30.76875
        // ECW = 2.949375 + 9.0 - 1.8 = 10.149375 (33% of TBW, no clamp)
        // FFM = -9.53 + 31.30875 + 10.2 + 12.0 = 43.97875
        assert_eq!(record.tbw_l, 30.8);
        assert_eq!(record.ecw_l, 10.1);
        assert_eq!(record.icw_l, 20.6);
        assert_eq!(record.ffm_kg, 44.0);
        assert_eq!(record.fm_kg, 16.0);
        // SMM = 18.195375 + 0 - 2.84 + 5.102 = 20.457375
        assert_eq!(record.smm_kg, 20.5);
        // BMR = 500 + 967.5325 = 1467.5325
        assert_eq!(record.bmr_kcal, 1467);
    }

    #[test]
    fn test_degraded_inputs_yield_zeroed_record() {
        let engine = MetricsEngine::new();

        let cases = [
            (0.0, 50.0, 180.0, 75.0, DegradedInput::Resistance),
            (-10.0, 50.0, 180.0, 75.0, DegradedInput::Resistance),
            (500.0, 50.0, 0.0, 75.0, DegradedInput::Height),
            (500.0, 50.0, 180.0, 0.0, DegradedInput::Weight),
            (f64::NAN, 50.0, 180.0, 75.0, DegradedInput::Resistance),
        ];

        for (rz, xc, h, w, expected) in cases {
            let outcome = engine.compute_metrics(rz, xc, h, w, 30, Sex::Male);
            match &outcome {
                MetricsOutcome::Degraded { reason, .. } => assert_eq!(*reason, expected),
                other => panic!("expected degraded outcome, got {:?}", other),
            }
            assert!(!outcome.is_valid());
            assert!(outcome.record().is_none());
            assert!(outcome.into_record().is_zeroed());
        }
    }

    #[test]
    fn test_ecw_low_clamp() {
        // Very low weight pushes the ECW regression below 30% of TBW
        let input = RawMeasurement::new(500.0, 50.0, 180.0, 10.0, 30, Sex::Male);
        let record = valid(MetricsEngine::new().compute(&input));

        // TBW = 1.2 + 29.16 + 1.8 = 32.16, raw ECW = 4.212 + 1.77 - 2.5 = 3.482 → 0.35·TBW
        assert_eq!(record.tbw_l, 32.2);
        assert_eq!(record.ecw_l, 11.3);
        assert_eq!(record.icw_l, 20.9);
    }

    #[test]
    fn test_ecw_high_clamp() {
        // Tiny H2/Rz with a heavy weight pushes the ECW regression to 83% of TBW
        let input = RawMeasurement::new(900.0, 50.0, 40.0, 150.0, 30, Sex::Male);
        let record = valid(MetricsEngine::new().compute(&input));

        let h2_rz = MetricsEngine::height_squared_over_resistance(40.0, 900.0);
        let tbw = 1.2 + 0.45 * h2_rz + 0.18 * 150.0;

        assert_eq!(record.tbw_l, 29.0);
        assert_eq!(record.ecw_l, round_to(0.50 * tbw, 1));
        assert_eq!(record.ecw_l, 14.5);
        assert_eq!(record.icw_l, round_to(tbw - 0.50 * tbw, 1));
        assert!(record.ecw_l / record.tbw_l <= EngineConfig::ECW_MAX_FRACTION);
    }

    #[test]
    fn test_custom_ecw_fractions() {
        // Reference male has ECW/TBW = 0.342, above a tightened 0.33 ceiling
        let config = EngineConfig {
            ecw_min_fraction: 0.25,
            ecw_low_reset_fraction: 0.30,
            ecw_max_fraction: 0.33,
            ecw_high_reset_fraction: 0.32,
            ..EngineConfig::default()
        };
        let record = valid(MetricsEngine::with_config(config).compute(&reference_male()));

        assert_eq!(record.tbw_l, 43.9);
        assert_eq!(record.ecw_l, 14.0);
        assert_eq!(record.icw_l, 29.8);
    }

    #[test]
    fn test_ffm_ceiling() {
        // Tiny weight relative to H2/Rz: FFM regression exceeds the body weight
        let input = RawMeasurement::new(300.0, 30.0, 190.0, 30.0, 25, Sex::Male);
        let record = valid(MetricsEngine::new().compute(&input));

        assert_eq!(record.ffm_kg, 29.4);
        assert_eq!(record.fm_kg, 0.6);
        assert_eq!(record.ffm_perc, 98.0);
    }

    #[test]
    fn test_negative_reactance_propagates() {
        let input = RawMeasurement::new(500.0, -50.0, 180.0, 75.0, 30, Sex::Male);
        let record = valid(MetricsEngine::new().compute(&input));
        assert_eq!(record.phase_angle_deg, -5.71);
    }

    #[test]
    fn test_phase_angle_zero_resistance_guard() {
        assert_eq!(MetricsEngine::phase_angle(0.0, 50.0), 0.0);
        assert!((MetricsEngine::phase_angle(500.0, 50.0) - 5.710593).abs() < 1e-5);
    }

    #[test]
    fn test_custom_clamp_config() {
        let config = EngineConfig {
            ffm_max_weight_fraction: 0.5,
            ..EngineConfig::default()
        };
        let record = valid(MetricsEngine::with_config(config).compute(&reference_male()));
        assert_eq!(record.ffm_kg, 37.5);
        assert_eq!(record.fm_kg, 37.5);
    }

    #[test]
    fn test_bilateral_shares_anthropometrics() {
        let (right, left) = MetricsEngine::new().compute_bilateral(&reference_male(), 490.0, 48.0);
        let right = valid(right);
        let left = valid(left);

        assert_eq!(right.resistance_ohm, 500.0);
        assert_eq!(left.resistance_ohm, 490.0);
        assert_eq!(left.weight_kg, right.weight_kg);
    }

    #[test]
    fn test_biva_vector() {
        let vector = MetricsEngine::biva_vector(&reference_male()).unwrap();
        assert_eq!(vector.r_over_h, 277.8);
        assert_eq!(vector.xc_over_h, 27.8);

        let flat = RawMeasurement::new(500.0, 50.0, 0.0, 75.0, 30, Sex::Male);
        assert!(MetricsEngine::biva_vector(&flat).is_none());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(5.710593, 2), 5.71);
        assert_eq!(round_to(18.74666, 1), 18.7);
        assert_eq!(round_to(2.675, 2), 2.67);
        assert!(round_to(f64::NAN, 1).is_nan());
    }

    proptest! {
        #[test]
        fn test_composition_invariants(
            rz in 200.0f64..900.0,
            xc in 0.0f64..100.0,
            height in 140.0f64..210.0,
            weight in 40.0f64..150.0,
            age in 18u32..90,
            male in any::<bool>(),
        ) {
            let sex = if male { Sex::Male } else { Sex::Female };
            let input = RawMeasurement::new(rz, xc, height, weight, age, sex);
            let outcome = MetricsEngine::new().compute(&input);
            prop_assert!(outcome.is_valid());
            let record = outcome.into_record();

            // Each rounded term is within 0.05 of its true value
            prop_assert!((record.tbw_l - (record.ecw_l + record.icw_l)).abs() <= 0.1 + 1e-9);
            prop_assert!((record.fm_kg + record.ffm_kg - weight).abs() <= 0.1 + 1e-9);

            prop_assert!(record.ffm_kg <= round_to(0.98 * weight, 1) + 1e-9);
            prop_assert!(record.fm_kg >= 0.0);

            if record.tbw_l > 0.0 {
                let ratio = record.ecw_l / record.tbw_l;
                prop_assert!(ratio >= 0.30 - 0.01 && ratio <= 0.55 + 0.01, "ratio {}", ratio);
            }
        }

        #[test]
        fn test_degraded_is_independent_of_other_inputs(
            xc in -100.0f64..300.0,
            height in 0.1f64..250.0,
            weight in 0.1f64..250.0,
            age in 0u32..120,
        ) {
            let engine = MetricsEngine::new();
            prop_assert!(engine.compute_metrics(0.0, xc, height, weight, age, Sex::Male).into_record().is_zeroed());
            prop_assert!(engine.compute_metrics(500.0, xc, 0.0, weight, age, Sex::Female).into_record().is_zeroed());
            prop_assert!(engine.compute_metrics(500.0, xc, height, 0.0, age, Sex::Male).into_record().is_zeroed());
        }
    }
}
