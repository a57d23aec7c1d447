//! Settings for every service
//!
//! Built once in `main` and handed to components by reference. Sources, lowest
//! precedence first: compiled-in defaults, an optional JSON file, environment
//! variables (after `dotenvy` has loaded `.env`).

use crate::domain::{MetricDefinition, MetricType, ProcedureInfo, ProvinceInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the national aggregate row in the source data
pub const NATIONAL_AGGREGATE: &str = "Canada";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub source: SourceSettings,
    pub rules: RuleSettings,
    pub reference: ReferenceData,
    pub analytics: AnalyticsSettings,
    pub reports: ReportSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
        }
    }
}

/// Where the spreadsheet lives and how it is shaped
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub path: PathBuf,
    pub sheet_name: String,
    /// 0-indexed row holding the header; data starts on the next row
    pub header_row: usize,
    pub column_names: Vec<String>,
    pub province_header_label: String,
    pub indicator_header_label: String,
    pub missing_sentinels: Vec<String>,
    /// Provenance label stored on every fact. Defaults to the file name of `path`.
    pub source_file: Option<String>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("waittimespriorityproceduresincanada2024datatablesen.xlsx"),
            sheet_name: "Wait times 2008 to 2023".to_string(),
            header_row: 2,
            column_names: [
                "Reporting_Level",
                "Province_Territory",
                "Region",
                "Indicator",
                "Metric",
                "Data_Year",
                "Unit",
                "Result",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            province_header_label: "Province/territory".to_string(),
            indicator_header_label: "Indicator".to_string(),
            missing_sentinels: vec!["n/a".to_string(), "N/A".to_string(), String::new()],
            source_file: None,
        }
    }
}

impl SourceSettings {
    /// Audit label for a load read from `path`: the configured override, else
    /// the file name. `path` may differ from [`Self::path`] on a `--source` run.
    pub fn source_file_label(&self, path: &Path) -> String {
        if let Some(label) = &self.source_file {
            return label.clone();
        }
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    pub fn is_missing_sentinel(&self, text: &str) -> bool {
        let trimmed = text.trim();
        trimmed.is_empty() || self.missing_sentinels.iter().any(|s| s == trimmed)
    }
}

/// Business-rule thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    pub min_year: i32,
    pub max_year: i32,
    pub min_percentage: f64,
    pub max_percentage: f64,
    pub max_wait_days: f64,
    pub outlier_z: f64,
    pub min_completeness: f64,
    pub batch_size: usize,
    pub significance_level: f64,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            min_year: 2008,
            max_year: 2025,
            min_percentage: 0.0,
            max_percentage: 100.0,
            max_wait_days: 730.0,
            outlier_z: 3.0,
            min_completeness: 0.70,
            batch_size: 1000,
            significance_level: 0.05,
        }
    }
}

impl RuleSettings {
    pub fn year_in_range(&self, year: i32) -> bool {
        (self.min_year..=self.max_year).contains(&year)
    }

    pub fn percentage_in_range(&self, value: f64) -> bool {
        value >= self.min_percentage && value <= self.max_percentage
    }
}

/// Immutable reference tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceData {
    pub provinces: BTreeMap<String, ProvinceInfo>,
    pub procedures: BTreeMap<String, ProcedureInfo>,
    pub metrics: Vec<MetricDefinition>,
    /// Spelling variant -> canonical metric name
    pub metric_aliases: BTreeMap<String, String>,
    /// Procedure name -> target wait in days
    pub benchmark_targets: BTreeMap<String, f64>,
}

impl Default for ReferenceData {
    fn default() -> Self {
        let provinces = [
            ("Alberta", ProvinceInfo::new("AB", "Western", 4_756_408, false)),
            ("British Columbia", ProvinceInfo::new("BC", "Western", 5_399_118, false)),
            ("Manitoba", ProvinceInfo::new("MB", "Central", 1_418_129, false)),
            ("New Brunswick", ProvinceInfo::new("NB", "Atlantic", 808_718, false)),
            (
                "Newfoundland and Labrador",
                ProvinceInfo::new("NL", "Atlantic", 540_418, false),
            ),
            ("Nova Scotia", ProvinceInfo::new("NS", "Atlantic", 1_030_890, false)),
            ("Ontario", ProvinceInfo::new("ON", "Central", 15_801_768, false)),
            ("Prince Edward Island", ProvinceInfo::new("PE", "Atlantic", 173_787, false)),
            ("Quebec", ProvinceInfo::new("QC", "Central", 8_604_495, false)),
            ("Saskatchewan", ProvinceInfo::new("SK", "Western", 1_214_618, false)),
            (NATIONAL_AGGREGATE, ProvinceInfo::new("CA", "National", 39_858_480, false)),
        ]
        .into_iter()
        .map(|(name, info)| (name.to_string(), info))
        .collect();

        let procedures = [
            ("Bladder Cancer Surgery", "BLAD_SURG", "Cancer Surgery", "High"),
            ("Breast Cancer Surgery", "BRST_SURG", "Cancer Surgery", "High"),
            ("Colorectal Cancer Surgery", "CLRC_SURG", "Cancer Surgery", "High"),
            ("CABG", "CABG", "Cardiac Surgery", "High"),
            ("CT Scan", "CT_SCAN", "Diagnostic Imaging", "Medium"),
            ("Cataract Surgery", "CAT_SURG", "Ophthalmology", "Medium"),
            ("Cataract surgery", "CAT_SURG_2", "Ophthalmology", "Medium"),
            ("Hip Fracture Repair", "HIP_FRAC", "Orthopedic Surgery", "High"),
            ("Hip Replacement", "HIP_REPL", "Orthopedic Surgery", "Medium"),
            ("Knee Replacement", "KNEE_REPL", "Orthopedic Surgery", "Medium"),
            ("MRI Scan", "MRI_SCAN", "Diagnostic Imaging", "Medium"),
            ("Prostate Cancer Surgery", "PROS_SURG", "Cancer Surgery", "High"),
            ("Diagnostic CT", "DIAG_CT", "Diagnostic Imaging", "Medium"),
            ("Diagnostic MRI", "DIAG_MRI", "Diagnostic Imaging", "Medium"),
            ("Lung Cancer Surgery", "LUNG_SURG", "Cancer Surgery", "High"),
            ("Cardiac Catheterization", "CARD_CATH", "Cardiac Surgery", "High"),
        ]
        .into_iter()
        .map(|(name, code, category, priority)| {
            (name.to_string(), ProcedureInfo::new(code, category, priority))
        })
        .collect();

        let metrics = vec![
            MetricDefinition::new("PCT_50", "50th Percentile", MetricType::Percentile, "Days", Some(false)),
            MetricDefinition::new("PCT_90", "90th Percentile", MetricType::Percentile, "Days", Some(false)),
            MetricDefinition::new(
                "BENCH_MET",
                "% Meeting Benchmark",
                MetricType::BenchmarkCompliance,
                "Percentage",
                Some(true),
            ),
            MetricDefinition::new("VOLUME", "Volume", MetricType::Volume, "Number of cases", None),
        ];

        let metric_aliases = [
            ("50th Percentile", "50th Percentile"),
            ("50th percentile", "50th Percentile"),
            ("90th Percentile", "90th Percentile"),
            ("90th percentile", "90th Percentile"),
            ("% Meeting Benchmark", "% Meeting Benchmark"),
            ("% meeting benchmark", "% Meeting Benchmark"),
            ("Volume", "Volume"),
        ]
        .into_iter()
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .collect();

        let benchmark_targets = [
            ("Cataract Surgery", 182.0),
            ("Hip Replacement", 182.0),
            ("Knee Replacement", 182.0),
            ("CABG", 14.0),
            ("Breast Cancer Surgery", 28.0),
            ("Colorectal Cancer Surgery", 28.0),
            ("Lung Cancer Surgery", 28.0),
            ("Prostate Cancer Surgery", 28.0),
            ("Bladder Cancer Surgery", 28.0),
            ("CT Scan", 30.0),
            ("MRI Scan", 90.0),
            ("Radiation Therapy", 28.0),
            ("Hip Fracture Repair", 2.0),
        ]
        .into_iter()
        .map(|(name, days)| (name.to_string(), days))
        .collect();

        Self {
            provinces,
            procedures,
            metrics,
            metric_aliases,
            benchmark_targets,
        }
    }
}

impl ReferenceData {
    /// Static province metadata, or the `UNK` record for names not in the table.
    pub fn province_info(&self, name: &str) -> ProvinceInfo {
        self.provinces
            .get(name)
            .cloned()
            .unwrap_or_else(ProvinceInfo::unknown)
    }

    pub fn procedure_info(&self, name: &str) -> ProcedureInfo {
        self.procedures
            .get(name)
            .cloned()
            .unwrap_or_else(|| ProcedureInfo::generated(name))
    }

    /// Canonical label for a metric spelling; unknown labels pass through.
    pub fn canonical_metric<'a>(&'a self, label: &'a str) -> &'a str {
        self.metric_aliases
            .get(label)
            .map(String::as_str)
            .unwrap_or(label)
    }

    pub fn metric_definition(&self, name: &str) -> Option<&MetricDefinition> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Metric type by canonical name, falling back to keyword inference.
    pub fn metric_type_of(&self, name: &str) -> Option<MetricType> {
        self.metric_definition(name)
            .map(|m| m.metric_type)
            .or_else(|| MetricType::infer(name))
    }

    pub fn benchmark_target(&self, procedure: &str) -> Option<f64> {
        self.benchmark_targets.get(procedure).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    pub default_year: i32,
    pub default_start_year: i32,
    pub insight_start_year: i32,
    pub insight_end_year: i32,
    pub min_trend_points: usize,
    pub default_metric: String,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            default_year: 2023,
            default_start_year: 2008,
            insight_start_year: 2020,
            insight_end_year: 2023,
            min_trend_points: 3,
            default_metric: "50th Percentile".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub dir: PathBuf,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./reports"),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            source: SourceSettings::default(),
            rules: RuleSettings::default(),
            reference: ReferenceData::default(),
            analytics: AnalyticsSettings::default(),
            reports: ReportSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults, then `settings_file` (or `SETTINGS_FILE`), then the environment.
    pub fn load(settings_file: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var("SETTINGS_FILE").ok().map(PathBuf::from);
        let mut settings = match settings_file.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DB_URL") {
            self.database.url = url;
        }
        if let Some(n) = parse_var(&lookup, "DB_MAX_CONNECTIONS")? {
            self.database.max_connections = n;
        }
        if let Some(path) = lookup("SOURCE_FILE") {
            self.source.path = PathBuf::from(path);
        }
        if let Some(sheet) = lookup("SOURCE_SHEET") {
            self.source.sheet_name = sheet;
        }
        if let Some(row) = parse_var(&lookup, "HEADER_ROW")? {
            self.source.header_row = row;
        }
        if let Some(n) = parse_var(&lookup, "BATCH_SIZE")? {
            self.rules.batch_size = n;
        }
        if let Some(y) = parse_var(&lookup, "MIN_YEAR")? {
            self.rules.min_year = y;
        }
        if let Some(y) = parse_var(&lookup, "MAX_YEAR")? {
            self.rules.max_year = y;
        }
        if let Some(d) = parse_var(&lookup, "MAX_WAIT_DAYS")? {
            self.rules.max_wait_days = d;
        }
        if let Some(z) = parse_var(&lookup, "OUTLIER_Z")? {
            self.rules.outlier_z = z;
        }
        if let Some(c) = parse_var(&lookup, "MIN_COMPLETENESS")? {
            self.rules.min_completeness = c;
        }
        if let Some(dir) = lookup("REPORTS_DIR") {
            self.reports.dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Every configuration problem found; empty means usable.
    pub fn validate(&self) -> Vec<String> {
        self.problems(true)
    }

    fn problems(&self, needs_database: bool) -> Vec<String> {
        let mut problems = Vec::new();

        if needs_database && self.database.url.trim().is_empty() {
            problems.push("database url is not set (DB_URL)".to_string());
        }
        if self.database.max_connections == 0 {
            problems.push("database max_connections must be at least 1".to_string());
        }
        if self.rules.min_year >= self.rules.max_year {
            problems.push(format!(
                "invalid year range {}..={}",
                self.rules.min_year, self.rules.max_year
            ));
        }
        if self.rules.min_percentage >= self.rules.max_percentage {
            problems.push("invalid percentage range".to_string());
        }
        if self.source.column_names.len() != 8 {
            problems.push(format!(
                "source column list must name 8 columns, found {}",
                self.source.column_names.len()
            ));
        }
        if self.rules.batch_size == 0 {
            problems.push("batch size must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.rules.min_completeness) {
            problems.push(format!(
                "min completeness {} is outside 0..=1",
                self.rules.min_completeness
            ));
        }
        if self.rules.outlier_z <= 0.0 {
            problems.push("outlier z threshold must be positive".to_string());
        }
        if self.rules.max_wait_days <= 0.0 {
            problems.push("max wait days must be positive".to_string());
        }
        if self.reference.metrics.is_empty() {
            problems.push("metric definitions are empty".to_string());
        }

        problems
    }

    /// `validate` folded into one error; offline runs skip the database url check.
    pub fn ensure_valid(&self, needs_database: bool) -> Result<(), ConfigError> {
        let problems = self.problems(needs_database);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    // -------------------------------------------------------------------------
    // Defaults and lookups
    // -------------------------------------------------------------------------

    #[test]
    fn test_defaults_match_reference_tables() {
        let settings = Settings::default();
        assert_eq!(settings.reference.provinces.len(), 11);
        assert_eq!(settings.reference.procedures.len(), 16);
        assert_eq!(settings.reference.metrics.len(), 4);
        assert_eq!(settings.source.header_row, 2);
        assert_eq!(settings.rules.batch_size, 1000);
        assert!(settings.rules.year_in_range(2008));
        assert!(settings.rules.year_in_range(2025));
        assert!(!settings.rules.year_in_range(2030));
    }

    #[test]
    fn test_reference_tables_are_all_consulted() {
        // quality flags are derived by QualityFlag::for_result, not looked up
        let value = serde_json::to_value(ReferenceData::default()).unwrap();
        let tables: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            tables,
            vec!["benchmark_targets", "metric_aliases", "metrics", "procedures", "provinces"]
        );

        // settings files written with the old flag table still load
        let settings: Settings =
            serde_json::from_str(r#"{ "reference": { "quality_flags": { "VALID": "ok" } } }"#).unwrap();
        assert_eq!(settings.reference.provinces.len(), 11);
    }

    #[test]
    fn test_province_lookup_with_unknown_fallback() {
        let reference = ReferenceData::default();
        let ontario = reference.province_info("Ontario");
        assert_eq!(ontario.code, "ON");
        assert_eq!(ontario.population, Some(15_801_768));

        let unknown = reference.province_info("Yukon");
        assert_eq!(unknown.code, "UNK");
        assert_eq!(unknown.region, "Unknown");
        assert_eq!(unknown.population, None);
        assert!(!unknown.is_territory);
    }

    #[test]
    fn test_procedure_lookup_with_generated_fallback() {
        let reference = ReferenceData::default();
        assert_eq!(reference.procedure_info("CABG").code, "CABG");
        assert_eq!(reference.procedure_info("Cataract surgery").code, "CAT_SURG_2");

        let generated = reference.procedure_info("Radiation Therapy");
        assert_eq!(generated.code, "RADIATION_");
        assert_eq!(generated.category, "Other");
        assert_eq!(generated.priority, "Medium");
    }

    #[test]
    fn test_metric_canonicalization() {
        let reference = ReferenceData::default();
        assert_eq!(reference.canonical_metric("90th percentile"), "90th Percentile");
        assert_eq!(reference.canonical_metric("% meeting benchmark"), "% Meeting Benchmark");
        assert_eq!(reference.canonical_metric("Median"), "Median");
        assert_eq!(
            reference.metric_type_of("% Meeting Benchmark"),
            Some(MetricType::BenchmarkCompliance)
        );
        assert_eq!(reference.metric_type_of("Volume"), Some(MetricType::Volume));
    }

    #[test]
    fn test_benchmark_targets() {
        let reference = ReferenceData::default();
        assert_eq!(reference.benchmark_target("CABG"), Some(14.0));
        assert_eq!(reference.benchmark_target("Hip Fracture Repair"), Some(2.0));
        assert_eq!(reference.benchmark_target("Diagnostic CT"), None);
    }

    // -------------------------------------------------------------------------
    // Layering
    // -------------------------------------------------------------------------

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(lookup_from(&[
                ("DB_URL", "postgres://localhost/waits"),
                ("BATCH_SIZE", "250"),
                ("MIN_YEAR", "2010"),
                ("OUTLIER_Z", "2.5"),
                ("REPORTS_DIR", "/tmp/reports"),
            ]))
            .unwrap();

        assert_eq!(settings.database.url, "postgres://localhost/waits");
        assert_eq!(settings.rules.batch_size, 250);
        assert_eq!(settings.rules.min_year, 2010);
        assert_eq!(settings.rules.outlier_z, 2.5);
        assert_eq!(settings.reports.dir, PathBuf::from("/tmp/reports"));
        assert!(settings.validate().is_empty());
    }

    #[test]
    fn test_env_rejects_bad_numbers() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(lookup_from(&[("BATCH_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "BATCH_SIZE"));
    }

    #[test]
    fn test_partial_settings_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "rules": {{ "min_year": 2012, "max_year": 2020 }}, "source": {{ "sheet_name": "Data" }} }}"#
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.rules.min_year, 2012);
        assert_eq!(settings.rules.max_year, 2020);
        assert_eq!(settings.rules.max_wait_days, 730.0);
        assert_eq!(settings.source.sheet_name, "Data");
        assert_eq!(settings.source.header_row, 2);
        assert_eq!(settings.reference.procedures.len(), 16);
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    #[test]
    fn test_validate_reports_every_problem() {
        let mut settings = Settings::default();
        settings.rules.min_year = 2025;
        settings.rules.max_year = 2008;
        settings.rules.batch_size = 0;
        settings.rules.min_completeness = 1.5;
        settings.source.column_names.clear();

        let problems = settings.validate();
        assert!(problems.iter().any(|p| p.contains("DB_URL")));
        assert!(problems.iter().any(|p| p.contains("year range")));
        assert!(problems.iter().any(|p| p.contains("batch size")));
        assert!(problems.iter().any(|p| p.contains("completeness")));
        assert!(problems.iter().any(|p| p.contains("column list")));
        assert!(settings.ensure_valid(false).is_err());
    }

    #[test]
    fn test_offline_validation_skips_database() {
        let settings = Settings::default();
        assert!(settings.ensure_valid(true).is_err());
        assert!(settings.ensure_valid(false).is_ok());
    }

    #[test]
    fn test_source_file_label() {
        let mut source = SourceSettings::default();
        source.path = PathBuf::from("/data/in/waits.xlsx");
        assert_eq!(source.source_file_label(&source.path), "waits.xlsx");
        // an overriding path wins over the configured one
        assert_eq!(source.source_file_label(Path::new("/tmp/other.csv")), "other.csv");
        assert_eq!(source.source_file_label(Path::new("/")), "/");
        source.source_file = Some("cihi-2024".to_string());
        assert_eq!(source.source_file_label(Path::new("/tmp/other.csv")), "cihi-2024");
        assert!(source.is_missing_sentinel(" n/a "));
        assert!(source.is_missing_sentinel(""));
        assert!(!source.is_missing_sentinel("12"));
    }
}
