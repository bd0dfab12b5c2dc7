//! Visit history boundary
//!
//! Archived visits come back as loosely typed rows: column names vary in case
//! and language (`PhA`, `angolo`, `FM%`, `peso`, ...) and numbers may use a
//! decimal comma or carry a `%` sign. [`HistorySchema`] resolves every column
//! to a canonical [`Metric`] through an ordered alias list, so the trend
//! analyzer only ever sees canonical names. A value that fails to parse is
//! dropped on its own; the rest of the row survives.

use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, WriterBuilder};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{HistoryError, Result};
use crate::models::{HistoryEntry, Metric, MetricsRecord};

/// Header written by [`HistoryStore::append_visit`]
pub const ARCHIVE_HEADER: [&str; 9] = ["data", "paziente", "peso", "rz", "xc", "pha", "tbw", "fm%", "ffm"];

/// Ordered column aliases for each canonical field
#[derive(Debug, Clone)]
pub struct HistorySchema {
    /// Exact (normalised) header names accepted for the visit date
    pub date_aliases: Vec<String>,

    /// Substrings identifying the patient column
    pub patient_keywords: Vec<String>,

    /// Exact (normalised) header names per metric, highest priority first
    pub metric_aliases: Vec<(Metric, Vec<String>)>,
}

impl Default for HistorySchema {
    fn default() -> Self {
        fn aliases(names: &[&str]) -> Vec<String> {
            names.iter().map(|n| n.to_string()).collect()
        }

        HistorySchema {
            date_aliases: aliases(&["data", "date", "submitted at", "visit_date"]),
            patient_keywords: aliases(&["paziente", "nome", "soggetto", "patient", "name"]),
            metric_aliases: vec![
                (Metric::PhaseAngle, aliases(&["pha", "phase", "angolo", "phase angle"])),
                (
                    Metric::FatMassPercent,
                    aliases(&["fm%", "bf%", "massa grassa %", "fat%", "fm_perc"]),
                ),
                (Metric::TotalBodyWater, aliases(&["tbw", "tbw_l", "acqua", "water"])),
                (Metric::Weight, aliases(&["peso", "weight", "kg", "weight_kg"])),
                (Metric::FatFreeMass, aliases(&["ffm", "ffm_kg", "massa magra"])),
                (Metric::BodyCellMass, aliases(&["bcm", "bcm_kg", "massa cellulare"])),
            ],
        }
    }
}

/// Column positions resolved from a header row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    pub date: Option<usize>,
    pub patient: Option<usize>,
    pub metrics: Vec<(Metric, usize)>,
}

impl HistorySchema {
    /// Lowercased, trimmed header name
    pub fn normalize_header(name: &str) -> String {
        name.trim().to_lowercase()
    }

    /// Resolve header names to canonical columns
    ///
    /// For each field the first alias (in priority order) that names an
    /// existing column wins.
    pub fn resolve<S: AsRef<str>>(&self, headers: &[S]) -> ColumnMap {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| Self::normalize_header(h.as_ref()))
            .collect();

        let find = |aliases: &[String]| {
            aliases
                .iter()
                .find_map(|alias| normalized.iter().position(|h| h == alias))
        };

        let patient = normalized.iter().position(|h| {
            self.patient_keywords
                .iter()
                .any(|keyword| h.contains(keyword.as_str()))
        });

        let metrics = self
            .metric_aliases
            .iter()
            .filter_map(|(metric, aliases)| find(aliases).map(|index| (*metric, index)))
            .collect();

        ColumnMap {
            date: find(&self.date_aliases),
            patient,
            metrics,
        }
    }

    /// Build a history entry from a row of cell values
    pub fn map_record<S: AsRef<str>>(&self, columns: &ColumnMap, cells: &[S]) -> HistoryEntry {
        let cell = |index: usize| cells.get(index).map(|c| c.as_ref()).unwrap_or("");

        let date_text = columns.date.map(cell).unwrap_or("").trim().to_string();
        let mut entry = HistoryEntry::new(date_text.clone(), parse_visit_date(&date_text));

        for (metric, index) in &columns.metrics {
            match parse_value(cell(*index)) {
                Some(value) => {
                    entry.values.insert(*metric, value);
                }
                None => debug!(
                    metric = metric.as_str(),
                    raw = cell(*index),
                    "Unparseable history value, metric dropped"
                ),
            }
        }

        entry
    }

    /// Build a history entry from key/value pairs (e.g. a spreadsheet record)
    pub fn map_fields<'a, I>(&self, fields: I) -> HistoryEntry
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let (headers, cells): (Vec<&str>, Vec<&str>) = fields.into_iter().unzip();
        let columns = self.resolve(&headers);
        self.map_record(&columns, &cells)
    }
}

/// Parse a numeric cell, accepting a decimal comma and a trailing `%`
pub fn parse_value(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', ".").replace('%', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a visit date; day-first formats are tried before ISO
pub fn parse_visit_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let date_formats = ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%d.%m.%Y"];
    for format in &date_formats {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }

    let datetime_formats = [
        "%d/%m/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    for format in &datetime_formats {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Some(datetime.date());
        }
    }

    None
}

/// CSV-backed visit history and archive
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    schema: HistorySchema,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema: HistorySchema::default(),
        }
    }

    pub fn with_schema(path: impl Into<PathBuf>, schema: HistorySchema) -> Self {
        Self {
            path: path.into(),
            schema,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All visits for `patient` (case-insensitive name match), date-ascending
    pub fn load_patient(&self, patient: &str) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Err(HistoryError::FileNotFound {
                path: self.path.clone(),
            }
            .into());
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)?;

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(HistoryError::MissingHeader {
                path: self.path.clone(),
            }
            .into());
        }

        let columns = self.schema.resolve(&headers);
        let patient_column = columns.patient.ok_or_else(|| HistoryError::MissingPatientColumn {
            path: self.path.clone(),
        })?;

        let target = patient.trim().to_lowercase();
        let mut entries = Vec::new();

        for result in reader.records() {
            let record = result?;
            let name = record.get(patient_column).unwrap_or("").trim().to_lowercase();
            if name != target {
                continue;
            }
            let cells: Vec<&str> = record.iter().collect();
            entries.push(self.schema.map_record(&columns, &cells));
        }

        // Stable: rows with equal (or missing) dates keep file order
        entries.sort_by_key(|e| e.date);

        info!(
            path = %self.path.display(),
            visits = entries.len(),
            "Loaded patient history"
        );

        Ok(entries)
    }

    /// Append one visit to the archive, writing the header if the file is new
    pub fn append_visit(&self, patient: &str, date: NaiveDate, record: &MetricsRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);

        if needs_header {
            writer.write_record(ARCHIVE_HEADER)?;
        }

        writer.write_record([
            date.format("%d/%m/%Y").to_string(),
            patient.trim().to_string(),
            record.weight_kg.to_string(),
            (record.resistance_ohm.trunc() as i64).to_string(),
            (record.reactance_ohm.trunc() as i64).to_string(),
            record.phase_angle_deg.to_string(),
            record.tbw_l.to_string(),
            record.fm_perc.to_string(),
            record.ffm_kg.to_string(),
        ])?;
        writer.flush()?;

        info!(path = %self.path.display(), patient, "Visit archived");
        Ok(())
    }
}
