//! Visit-over-visit comparison and bilateral asymmetry
//!
//! Compares a freshly computed [`MetricsRecord`] with the most recent archived
//! visit and, in bilateral mode, with the contralateral side. Everything here
//! is read-only over its inputs; missing or malformed history values drop the
//! affected metric and nothing else.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::metrics::round_to;
use crate::models::{HistoryEntry, Metric, MetricSource, MetricsRecord};

/// Thresholds used by the trend and asymmetry classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Relative phase-angle difference (percent of the right side) above which
    /// the lower side is flagged
    pub asymmetry_threshold_percent: f64,

    /// Absolute phase-angle difference in degrees considered an evident asymmetry
    pub evident_asymmetry_degrees: f64,

    /// Deltas smaller than this (in the metric's unit) count as stable
    pub stable_tolerance: f64,
}

impl TrendConfig {
    pub const ASYMMETRY_THRESHOLD_PERCENT: f64 = 3.0;
    pub const EVIDENT_ASYMMETRY_DEGREES: f64 = 1.0;
    pub const STABLE_TOLERANCE: f64 = 0.05;
}

impl Default for TrendConfig {
    fn default() -> Self {
        TrendConfig {
            asymmetry_threshold_percent: Self::ASYMMETRY_THRESHOLD_PERCENT,
            evident_asymmetry_degrees: Self::EVIDENT_ASYMMETRY_DEGREES,
            stable_tolerance: Self::STABLE_TOLERANCE,
        }
    }
}

/// Side flagged as deficient (the one with the lower phase angle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsymmetrySide {
    None,
    Right,
    Left,
}

/// Phase-angle comparison between right and left sides
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AsymmetryResult {
    /// Right PhA minus left PhA, in degrees
    pub diff_degrees: f64,

    /// Difference as a percentage of the right side
    pub relative_percent: f64,

    pub side_flagged: AsymmetrySide,

    /// Absolute difference exceeds the evident-asymmetry threshold
    pub evident: bool,
}

impl AsymmetryResult {
    pub fn is_asymmetric(&self) -> bool {
        self.side_flagged != AsymmetrySide::None
    }
}

/// Direction of change of a metric between two visits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Improving,
    Worsening,
    Stable,
    /// Metric has no preferred direction (body weight)
    Unrated,
}

/// Which way is better for a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    HigherIsBetter,
    LowerIsBetter,
    Neutral,
}

impl Polarity {
    pub fn of(metric: Metric) -> Self {
        match metric {
            Metric::PhaseAngle
            | Metric::BodyCellMass
            | Metric::FatFreeMass
            | Metric::TotalBodyWater => Polarity::HigherIsBetter,
            Metric::FatMassPercent => Polarity::LowerIsBetter,
            Metric::Weight => Polarity::Neutral,
        }
    }
}

/// Visit the current record was compared against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Baseline {
    /// No prior visit; reports must say so rather than show zero deltas
    NoBaseline,
    Previous {
        date_text: String,
        date: Option<NaiveDate>,
    },
}

/// Combined outcome of one analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub baseline: Baseline,
    pub deltas: BTreeMap<Metric, f64>,
    pub directions: BTreeMap<Metric, TrendDirection>,
    pub asymmetry: Option<AsymmetryResult>,
}

impl TrendResult {
    pub fn has_baseline(&self) -> bool {
        !matches!(self.baseline, Baseline::NoBaseline)
    }
}

/// Trend and asymmetry analyzer
#[derive(Debug, Clone, Default)]
pub struct TrendAnalyzer {
    config: TrendConfig,
}

impl TrendAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TrendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    /// `current - previous` for every comparable metric present on both sides
    ///
    /// Differences are exact; rounding is left to whoever displays them. A
    /// metric missing from either input is left out of the map, never
    /// reported as zero, and a degraded all-zero record contributes nothing.
    pub fn delta<C, P>(current: &C, previous: &P) -> BTreeMap<Metric, f64>
    where
        C: MetricSource + ?Sized,
        P: MetricSource + ?Sized,
    {
        let mut deltas = BTreeMap::new();

        for metric in Metric::COMPARABLE {
            match (current.metric(metric), previous.metric(metric)) {
                (Some(now), Some(before)) => {
                    deltas.insert(metric, now - before);
                }
                _ => debug!(metric = metric.as_str(), "Metric not comparable, skipping"),
            }
        }

        deltas
    }

    /// Compare right and left phase angles
    ///
    /// The relative difference is taken against the right side:
    /// `(right - left) / right * 100`. Above the threshold the left side is
    /// flagged, below its negative the right side is.
    pub fn asymmetry(&self, right: &MetricsRecord, left: &MetricsRecord) -> AsymmetryResult {
        let pha_right = right.phase_angle_deg;
        let pha_left = left.phase_angle_deg;

        let diff = pha_right - pha_left;
        let relative = if pha_right > 0.0 {
            diff / pha_right * 100.0
        } else {
            0.0
        };

        let threshold = self.config.asymmetry_threshold_percent;
        let side_flagged = if relative > threshold {
            AsymmetrySide::Left
        } else if relative < -threshold {
            AsymmetrySide::Right
        } else {
            AsymmetrySide::None
        };

        AsymmetryResult {
            diff_degrees: round_to(diff, 2),
            relative_percent: round_to(relative, 1),
            side_flagged,
            evident: diff.abs() > self.config.evident_asymmetry_degrees,
        }
    }

    /// Most recently dated visit, `None` for an empty history
    ///
    /// Entries whose date could not be parsed sort before dated ones; among
    /// equal dates the later position wins, so an input that is already
    /// date-ascending returns its last element.
    pub fn latest(history: &[HistoryEntry]) -> Option<&HistoryEntry> {
        history
            .iter()
            .enumerate()
            .max_by_key(|(position, entry)| (entry.date, *position))
            .map(|(_, entry)| entry)
    }

    /// Classify a delta according to the metric's preferred direction
    pub fn classify(&self, metric: Metric, delta: f64) -> TrendDirection {
        let polarity = Polarity::of(metric);
        if polarity == Polarity::Neutral {
            return TrendDirection::Unrated;
        }
        if delta.abs() < self.config.stable_tolerance {
            return TrendDirection::Stable;
        }

        match (polarity, delta > 0.0) {
            (Polarity::HigherIsBetter, true) | (Polarity::LowerIsBetter, false) => {
                TrendDirection::Improving
            }
            _ => TrendDirection::Worsening,
        }
    }

    /// Full analysis: baseline lookup, deltas, directions and optional asymmetry
    ///
    /// `current` is the primary (right) side; `contralateral` the left side in
    /// bilateral mode. Both should come from [`MetricsOutcome::Valid`]; a
    /// degraded sentinel yields no deltas, though it still takes part in the
    /// asymmetry comparison.
    ///
    /// [`MetricsOutcome::Valid`]: crate::metrics::MetricsOutcome::Valid
    pub fn analyze(
        &self,
        current: &MetricsRecord,
        history: &[HistoryEntry],
        contralateral: Option<&MetricsRecord>,
    ) -> TrendResult {
        let (baseline, deltas) = match Self::latest(history) {
            Some(previous) => (
                Baseline::Previous {
                    date_text: previous.date_text.clone(),
                    date: previous.date,
                },
                Self::delta(current, previous),
            ),
            None => (Baseline::NoBaseline, BTreeMap::new()),
        };

        let directions = deltas
            .iter()
            .map(|(metric, delta)| (*metric, self.classify(*metric, *delta)))
            .collect();

        let asymmetry = contralateral.map(|left| self.asymmetry(current, left));

        debug!(
            history_len = history.len(),
            compared = deltas.len(),
            bilateral = asymmetry.is_some(),
            "Trend analysis complete"
        );

        TrendResult {
            baseline,
            deltas,
            directions,
            asymmetry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record_with_pha(pha: f64) -> MetricsRecord {
        MetricsRecord {
            phase_angle_deg: pha,
            ..MetricsRecord::zeroed(500.0, 50.0, 75.0)
        }
    }

    fn visit(date: &str, day: Option<(i32, u32, u32)>) -> HistoryEntry {
        HistoryEntry::new(
            date,
            day.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
        )
    }

    #[test]
    fn test_delta_sign_convention() {
        let current = HistoryEntry::default().with_value(Metric::PhaseAngle, 6.5);
        let previous = HistoryEntry::default().with_value(Metric::PhaseAngle, 5.0);

        let deltas = TrendAnalyzer::delta(&current, &previous);
        assert_eq!(deltas.get(&Metric::PhaseAngle), Some(&1.5));
        assert_eq!(deltas.len(), 1);
    }

    #[test]
    fn test_delta_keeps_full_precision() {
        let current = HistoryEntry::default().with_value(Metric::PhaseAngle, 6.555);
        let previous = HistoryEntry::default()
            .with_value(Metric::PhaseAngle, 5.0)
            .with_value(Metric::FatMassPercent, 20.0);
        let later = HistoryEntry::default()
            .with_value(Metric::PhaseAngle, 5.004)
            .with_value(Metric::FatMassPercent, 19.999);

        let deltas = TrendAnalyzer::delta(&current, &previous);
        assert!((deltas[&Metric::PhaseAngle] - 1.555).abs() < 1e-9);

        // Sub-hundredth changes keep their sign
        let small = TrendAnalyzer::delta(&later, &previous);
        assert!(small[&Metric::PhaseAngle] > 0.0);
        assert!(small[&Metric::FatMassPercent] < 0.0);
    }

    #[test]
    fn test_delta_ignores_degraded_record() {
        let sentinel = MetricsRecord::zeroed(0.0, 50.0, 75.0);
        let previous = HistoryEntry::default()
            .with_value(Metric::PhaseAngle, 5.5)
            .with_value(Metric::Weight, 76.0);

        assert!(TrendAnalyzer::delta(&sentinel, &previous).is_empty());

        let history = vec![visit("01/06/2024", None).with_value(Metric::PhaseAngle, 5.5)];
        let result = TrendAnalyzer::new().analyze(&sentinel, &history, None);
        assert!(result.has_baseline());
        assert!(result.deltas.is_empty());
    }

    #[test]
    fn test_delta_omits_missing_metrics() {
        let current = MetricsRecord {
            phase_angle_deg: 6.0,
            tbw_l: 43.9,
            fm_perc: 18.7,
            ..MetricsRecord::zeroed(500.0, 50.0, 75.0)
        };
        let previous = HistoryEntry::default()
            .with_value(Metric::PhaseAngle, 5.8)
            .with_value(Metric::TotalBodyWater, 43.2)
            .with_value(Metric::FatMassPercent, f64::NAN);

        let deltas = TrendAnalyzer::delta(&current, &previous);

        assert!((deltas[&Metric::PhaseAngle] - 0.2).abs() < 1e-9);
        assert!((deltas[&Metric::TotalBodyWater] - 0.7).abs() < 1e-9);
        assert!(!deltas.contains_key(&Metric::FatMassPercent));
        assert!(!deltas.contains_key(&Metric::Weight));
        assert!(!deltas.contains_key(&Metric::BodyCellMass));
    }

    #[test]
    fn test_asymmetry_flags_lower_left_side() {
        let analyzer = TrendAnalyzer::new();
        let result = analyzer.asymmetry(&record_with_pha(6.0), &record_with_pha(5.5));

        assert_eq!(result.diff_degrees, 0.5);
        assert_eq!(result.relative_percent, 8.3);
        assert_eq!(result.side_flagged, AsymmetrySide::Left);
        assert!(result.is_asymmetric());
        assert!(!result.evident);
    }

    #[test]
    fn test_asymmetry_flags_lower_right_side() {
        let analyzer = TrendAnalyzer::new();
        let result = analyzer.asymmetry(&record_with_pha(5.0), &record_with_pha(6.2));

        assert_eq!(result.diff_degrees, -1.2);
        assert_eq!(result.side_flagged, AsymmetrySide::Right);
        assert!(result.evident);
    }

    #[test]
    fn test_asymmetry_within_threshold() {
        let analyzer = TrendAnalyzer::new();
        // (6.0 - 5.9) / 6.0 = 1.7%
        let result = analyzer.asymmetry(&record_with_pha(6.0), &record_with_pha(5.9));
        assert_eq!(result.side_flagged, AsymmetrySide::None);
        assert!(!result.is_asymmetric());
    }

    #[test]
    fn test_asymmetry_threshold_is_relative_not_absolute() {
        let analyzer = TrendAnalyzer::new();

        // 0.2° is 10% of a 2.0° right side
        let low = analyzer.asymmetry(&record_with_pha(2.0), &record_with_pha(1.8));
        assert_eq!(low.side_flagged, AsymmetrySide::Left);

        // 0.2° is 2% of a 10.0° right side
        let high = analyzer.asymmetry(&record_with_pha(10.0), &record_with_pha(9.8));
        assert_eq!(high.side_flagged, AsymmetrySide::None);
    }

    #[test]
    fn test_asymmetry_zero_right_side() {
        let analyzer = TrendAnalyzer::new();
        let result = analyzer.asymmetry(&record_with_pha(0.0), &record_with_pha(5.0));
        assert_eq!(result.relative_percent, 0.0);
        assert_eq!(result.side_flagged, AsymmetrySide::None);
    }

    #[test]
    fn test_asymmetry_custom_threshold() {
        let analyzer = TrendAnalyzer::with_config(TrendConfig {
            asymmetry_threshold_percent: 10.0,
            ..TrendConfig::default()
        });
        let result = analyzer.asymmetry(&record_with_pha(6.0), &record_with_pha(5.5));
        assert_eq!(result.side_flagged, AsymmetrySide::None);
    }

    #[test]
    fn test_latest_empty_history() {
        assert!(TrendAnalyzer::latest(&[]).is_none());
    }

    #[test]
    fn test_latest_picks_most_recent_date() {
        let history = vec![
            visit("01/01/2024", Some((2024, 1, 1))),
            visit("01/06/2024", Some((2024, 6, 1))),
        ];
        assert_eq!(TrendAnalyzer::latest(&history).unwrap().date_text, "01/06/2024");

        let shuffled = vec![
            visit("01/06/2024", Some((2024, 6, 1))),
            visit("01/01/2024", Some((2024, 1, 1))),
            visit("n/d", None),
        ];
        assert_eq!(TrendAnalyzer::latest(&shuffled).unwrap().date_text, "01/06/2024");
    }

    #[test]
    fn test_latest_undated_falls_back_to_position() {
        let history = vec![visit("first", None), visit("second", None)];
        assert_eq!(TrendAnalyzer::latest(&history).unwrap().date_text, "second");
    }

    #[test]
    fn test_classification_polarity() {
        let analyzer = TrendAnalyzer::new();

        assert_eq!(analyzer.classify(Metric::PhaseAngle, 0.4), TrendDirection::Improving);
        assert_eq!(analyzer.classify(Metric::PhaseAngle, -0.4), TrendDirection::Worsening);
        assert_eq!(analyzer.classify(Metric::FatMassPercent, -1.2), TrendDirection::Improving);
        assert_eq!(analyzer.classify(Metric::FatMassPercent, 1.2), TrendDirection::Worsening);
        assert_eq!(analyzer.classify(Metric::FatFreeMass, 0.01), TrendDirection::Stable);
        assert_eq!(analyzer.classify(Metric::Weight, -3.0), TrendDirection::Unrated);
    }

    #[test]
    fn test_analyze_without_history() {
        let analyzer = TrendAnalyzer::new();
        let result = analyzer.analyze(&record_with_pha(6.0), &[], None);

        assert_eq!(result.baseline, Baseline::NoBaseline);
        assert!(!result.has_baseline());
        assert!(result.deltas.is_empty());
        assert!(result.directions.is_empty());
        assert!(result.asymmetry.is_none());
    }

    #[test]
    fn test_analyze_with_history_and_contralateral() {
        let analyzer = TrendAnalyzer::new();
        let history = vec![
            visit("01/01/2024", Some((2024, 1, 1))).with_value(Metric::PhaseAngle, 5.0),
            visit("01/06/2024", Some((2024, 6, 1)))
                .with_value(Metric::PhaseAngle, 5.5)
                .with_value(Metric::Weight, 77.0),
        ];

        let result = analyzer.analyze(&record_with_pha(6.0), &history, Some(&record_with_pha(5.5)));

        assert!(result.has_baseline());
        assert_eq!(
            result.baseline,
            Baseline::Previous {
                date_text: "01/06/2024".to_string(),
                date: NaiveDate::from_ymd_opt(2024, 6, 1),
            }
        );
        assert_eq!(result.deltas.get(&Metric::PhaseAngle), Some(&0.5));
        assert_eq!(result.deltas.get(&Metric::Weight), Some(&-2.0));
        assert_eq!(result.deltas.len(), 2);
        assert_eq!(
            result.directions.get(&Metric::PhaseAngle),
            Some(&TrendDirection::Improving)
        );
        assert_eq!(result.directions.get(&Metric::Weight), Some(&TrendDirection::Unrated));
        assert_eq!(result.asymmetry.unwrap().side_flagged, AsymmetrySide::Left);
    }

    #[test]
    fn test_trend_result_serialization() {
        let analyzer = TrendAnalyzer::new();
        let history = vec![visit("01/06/2024", None).with_value(Metric::PhaseAngle, 5.0)];
        let result = analyzer.analyze(&record_with_pha(6.5), &history, None);

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"PhA\":1.5"));
        assert!(json.contains("\"kind\":\"previous\""));

        let back: TrendResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    proptest! {
        #[test]
        fn test_asymmetry_is_antisymmetric_in_flag(
            right in 1.0f64..12.0,
            left in 1.0f64..12.0,
        ) {
            let analyzer = TrendAnalyzer::new();
            let result = analyzer.asymmetry(&record_with_pha(right), &record_with_pha(left));

            match result.side_flagged {
                AsymmetrySide::Left => prop_assert!(right > left),
                AsymmetrySide::Right => prop_assert!(left > right),
                AsymmetrySide::None => {
                    prop_assert!(((right - left) / right * 100.0).abs() <= 3.0)
                }
            }
        }
    }
}
