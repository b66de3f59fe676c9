use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate, NaiveTime};
use clap::ValueEnum;
use plant_series::grid::parse_period_date;
use plant_series::{ChannelCatalogue, Resolution};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One of the monthly report datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Inverters,
    Sensors,
    Meters,
    Prmte,
}

impl Dataset {
    pub const ALL: [Dataset; 4] = [Dataset::Inverters, Dataset::Sensors, Dataset::Meters, Dataset::Prmte];

    pub fn label(self) -> &'static str {
        match self {
            Dataset::Inverters => "inverters",
            Dataset::Sensors => "sensors",
            Dataset::Meters => "meters",
            Dataset::Prmte => "prmte",
        }
    }
}

/// Output format for the optional per-table side files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideFormat {
    Parquet,
    Csv,
}

/// Run configuration, read from TOML. Every field has a default matching
/// the Domeyko December 2024 run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// First day of the period, `%d-%m-%Y`.
    #[serde(default = "default_start_date")]
    pub start_date: String,
    /// Last day of the period (its midnight is the last grid point).
    #[serde(default = "default_end_date")]
    pub end_date: String,
    #[serde(default = "default_park")]
    pub park: String,
    /// Directory holding the `<YYYY>_<MM>` period folders.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub folders: FolderConfig,
    #[serde(default)]
    pub outputs: OutputConfig,
    #[serde(default)]
    pub inverters: InverterConfig,
    #[serde(default)]
    pub sensors: SensorConfig,
    #[serde(default)]
    pub meters: MeterConfig,
    #[serde(default)]
    pub prmte: PrmteConfig,
    #[serde(default)]
    pub template: Option<TemplateConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    #[serde(default = "default_raw_data")]
    pub raw_data: String,
    #[serde(default = "default_processed_data")]
    pub processed_data: String,
    #[serde(default = "default_inverters_folder")]
    pub inverters: String,
    #[serde(default = "default_sensors_folder")]
    pub sensors: String,
    #[serde(default = "default_meters_folder")]
    pub meters: String,
    #[serde(default = "default_prmte_folder")]
    pub prmte: String,
    /// File extensions picked up in every input folder.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_inverters_file")]
    pub inverters_file: String,
    #[serde(default = "default_sensors_file")]
    pub sensors_file: String,
    #[serde(default = "default_meters_file")]
    pub meters_file: String,
    #[serde(default = "default_prmte_file")]
    pub prmte_file: String,
    #[serde(default)]
    pub side_outputs: Vec<SideFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverterConfig {
    /// CSV catalogue; the built-in Domeyko inverter table when absent.
    #[serde(default)]
    pub catalogue: Option<PathBuf>,
    #[serde(default = "default_input_period")]
    pub input_period_minutes: i64,
    #[serde(default = "default_production_start")]
    pub production_start: String,
    #[serde(default = "default_production_end")]
    pub production_end: String,
    #[serde(default = "default_delimiter")]
    pub csv_delimiter: char,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    #[serde(default)]
    pub catalogue: Option<PathBuf>,
    #[serde(default = "default_input_period")]
    pub input_period_minutes: i64,
    /// Irradiance readings at or above this value are sensor faults.
    #[serde(default = "default_irradiance_threshold")]
    pub irradiance_threshold: f64,
    /// Channels whose name contains this marker get the threshold applied.
    #[serde(default = "default_irradiance_marker")]
    pub irradiance_marker: String,
    #[serde(default = "default_delimiter")]
    pub csv_delimiter: char,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    #[serde(default = "default_meters_period")]
    pub input_period_minutes: i64,
    #[serde(default)]
    pub offset_minutes: i64,
    #[serde(default = "default_delimiter")]
    pub csv_delimiter: char,
    /// Timestamp column name; the first column when absent.
    #[serde(default)]
    pub timestamp_column: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrmteConfig {
    #[serde(default = "default_meters_period")]
    pub input_period_minutes: i64,
    #[serde(default)]
    pub offset_minutes: i64,
    #[serde(default = "default_delimiter")]
    pub csv_delimiter: char,
    /// Zero-based positions of the report columns that carry no data.
    #[serde(default = "default_prmte_drop_positions")]
    pub drop_positions: Vec<usize>,
}

/// Template mode: fill sheets of an existing workbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub path: PathBuf,
    pub output: PathBuf,
    #[serde(default)]
    pub sheets: Vec<TemplateSheet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSheet {
    pub sheet: String,
    pub dataset: Dataset,
    /// Report sheet to copy, e.g. `15m` or `completeness`.
    pub table: String,
}

fn default_start_date() -> String {
    "01-12-2024".to_string()
}

fn default_end_date() -> String {
    "01-01-2025".to_string()
}

fn default_park() -> String {
    "DOM".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_raw_data() -> String {
    "01_raw_data".to_string()
}

fn default_processed_data() -> String {
    "02_processed_data".to_string()
}

fn default_inverters_folder() -> String {
    "01_inverters".to_string()
}

fn default_sensors_folder() -> String {
    "02_sensors".to_string()
}

fn default_meters_folder() -> String {
    "04_meters".to_string()
}

fn default_prmte_folder() -> String {
    "05_prmte".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["xls".to_string(), "xlsx".to_string(), "csv".to_string()]
}

fn default_inverters_file() -> String {
    "01_psn_inverters_production.xlsx".to_string()
}

fn default_sensors_file() -> String {
    "02_psn_sensors.xlsx".to_string()
}

fn default_meters_file() -> String {
    "04_psn_meters.xlsx".to_string()
}

fn default_prmte_file() -> String {
    "05_psn_prmte.xlsx".to_string()
}

fn default_input_period() -> i64 {
    1
}

fn default_meters_period() -> i64 {
    15
}

fn default_production_start() -> String {
    "06:00".to_string()
}

fn default_production_end() -> String {
    "20:00".to_string()
}

fn default_irradiance_threshold() -> f64 {
    1500.0
}

fn default_irradiance_marker() -> String {
    "[W/m2]".to_string()
}

fn default_delimiter() -> char {
    ','
}

fn default_prmte_drop_positions() -> Vec<usize> {
    vec![3, 6, 7, 8, 9, 10, 11, 12, 13]
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            raw_data: default_raw_data(),
            processed_data: default_processed_data(),
            inverters: default_inverters_folder(),
            sensors: default_sensors_folder(),
            meters: default_meters_folder(),
            prmte: default_prmte_folder(),
            extensions: default_extensions(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            inverters_file: default_inverters_file(),
            sensors_file: default_sensors_file(),
            meters_file: default_meters_file(),
            prmte_file: default_prmte_file(),
            side_outputs: Vec::new(),
        }
    }
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            catalogue: None,
            input_period_minutes: default_input_period(),
            production_start: default_production_start(),
            production_end: default_production_end(),
            csv_delimiter: default_delimiter(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            catalogue: None,
            input_period_minutes: default_input_period(),
            irradiance_threshold: default_irradiance_threshold(),
            irradiance_marker: default_irradiance_marker(),
            csv_delimiter: default_delimiter(),
        }
    }
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            input_period_minutes: default_meters_period(),
            offset_minutes: 0,
            csv_delimiter: default_delimiter(),
            timestamp_column: None,
        }
    }
}

impl Default for PrmteConfig {
    fn default() -> Self {
        Self {
            input_period_minutes: default_meters_period(),
            offset_minutes: 0,
            csv_delimiter: default_delimiter(),
            drop_positions: default_prmte_drop_positions(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            end_date: default_end_date(),
            park: default_park(),
            root: default_root(),
            folders: FolderConfig::default(),
            outputs: OutputConfig::default(),
            inverters: InverterConfig::default(),
            sensors: SensorConfig::default(),
            meters: MeterConfig::default(),
            prmte: PrmteConfig::default(),
            template: None,
        }
    }
}

/// Parses `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M"))
        .with_context(|| format!("'{value}' is not a time of day"))
}

impl ReportConfig {
    /// Reads a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ReportConfig =
            toml::from_str(&text).with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let (start, end) = self.period()?;
        if end < start {
            bail!("end date {} is before start date {}", self.end_date, self.start_date);
        }
        for (name, minutes) in [
            ("inverters", self.inverters.input_period_minutes),
            ("sensors", self.sensors.input_period_minutes),
            ("meters", self.meters.input_period_minutes),
            ("prmte", self.prmte.input_period_minutes),
        ] {
            if minutes <= 0 {
                bail!("{name}: input period must be positive, got {minutes}");
            }
        }
        self.production_window()?;
        Ok(())
    }

    pub fn period(&self) -> Result<(NaiveDate, NaiveDate)> {
        Ok((parse_period_date(&self.start_date)?, parse_period_date(&self.end_date)?))
    }

    pub fn production_window(&self) -> Result<(NaiveTime, NaiveTime)> {
        Ok((
            parse_time_of_day(&self.inverters.production_start)?,
            parse_time_of_day(&self.inverters.production_end)?,
        ))
    }

    /// `<root>/<YYYY>_<MM>` of the period start.
    pub fn period_dir(&self) -> Result<PathBuf> {
        let (start, _) = self.period()?;
        Ok(self.root.join(format!("{}_{:02}", start.year(), start.month())))
    }

    pub fn input_dir(&self, dataset: Dataset) -> Result<PathBuf> {
        let folder = match dataset {
            Dataset::Inverters => &self.folders.inverters,
            Dataset::Sensors => &self.folders.sensors,
            Dataset::Meters => &self.folders.meters,
            Dataset::Prmte => &self.folders.prmte,
        };
        Ok(self.period_dir()?.join(&self.folders.raw_data).join(folder))
    }

    pub fn processed_dir(&self) -> Result<PathBuf> {
        Ok(self.period_dir()?.join(&self.folders.processed_data))
    }

    pub fn output_path(&self, dataset: Dataset) -> Result<PathBuf> {
        let file = match dataset {
            Dataset::Inverters => &self.outputs.inverters_file,
            Dataset::Sensors => &self.outputs.sensors_file,
            Dataset::Meters => &self.outputs.meters_file,
            Dataset::Prmte => &self.outputs.prmte_file,
        };
        Ok(self.processed_dir()?.join(file))
    }

    pub fn input_period(&self, dataset: Dataset) -> Result<Resolution> {
        let minutes = match dataset {
            Dataset::Inverters => self.inverters.input_period_minutes,
            Dataset::Sensors => self.sensors.input_period_minutes,
            Dataset::Meters => self.meters.input_period_minutes,
            Dataset::Prmte => self.prmte.input_period_minutes,
        };
        Resolution::from_minutes(minutes)
            .with_context(|| format!("{}: unsupported input period of {minutes} minutes", dataset.label()))
    }

    pub fn inverter_catalogue(&self) -> Result<ChannelCatalogue> {
        match &self.inverters.catalogue {
            Some(path) => Ok(ChannelCatalogue::from_csv(path)?),
            None => Ok(ChannelCatalogue::domeyko_inverters()),
        }
    }

    pub fn sensor_catalogue(&self) -> Result<ChannelCatalogue> {
        match &self.sensors.catalogue {
            Some(path) => Ok(ChannelCatalogue::from_csv(path)?),
            None => Ok(ChannelCatalogue::domeyko_meteo()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_domeyko_run() {
        let config: ReportConfig = toml::from_str("").unwrap();
        assert_eq!(config.start_date, "01-12-2024");
        assert_eq!(config.prmte.drop_positions, vec![3, 6, 7, 8, 9, 10, 11, 12, 13]);
        assert_eq!(config.meters.input_period_minutes, 15);
        assert_eq!(
            config.output_path(Dataset::Inverters).unwrap(),
            PathBuf::from("./2024_12/02_processed_data/01_psn_inverters_production.xlsx")
        );
        assert_eq!(
            config.input_dir(Dataset::Prmte).unwrap(),
            PathBuf::from("./2024_12/01_raw_data/05_prmte")
        );
    }

    #[test]
    fn test_partial_toml_overrides() {
        let text = r#"
            start_date = "01-01-2025"
            end_date = "01-02-2025"
            root = "/data/dom"

            [inverters]
            csv_delimiter = ";"

            [sensors]
            irradiance_threshold = 1400.0

            [outputs]
            side_outputs = ["parquet", "csv"]

            [template]
            path = "template.xlsx"
            output = "filled.xlsx"
            sheets = [{ sheet = "Energia", dataset = "inverters", table = "1d" }]
        "#;
        let config: ReportConfig = toml::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.sensors.irradiance_threshold, 1400.0);
        assert_eq!(config.sensors.irradiance_marker, "[W/m2]");
        assert_eq!(config.inverters.csv_delimiter, ';');
        assert_eq!(config.sensors.csv_delimiter, ',');
        assert_eq!(config.outputs.side_outputs, vec![SideFormat::Parquet, SideFormat::Csv]);
        assert_eq!(config.period_dir().unwrap(), PathBuf::from("/data/dom/2025_01"));
        let template = config.template.unwrap();
        assert_eq!(template.sheets[0].dataset, Dataset::Inverters);
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let mut config = ReportConfig {
            end_date: "01-11-2024".to_string(),
            ..ReportConfig::default()
        };
        assert!(config.validate().is_err());

        config.end_date = default_end_date();
        config.inverters.production_start = "six".to_string();
        assert!(config.validate().is_err());

        config.inverters.production_start = "06:00".to_string();
        config.meters.input_period_minutes = 7;
        assert!(config.input_period(Dataset::Meters).is_err());
    }

    #[test]
    fn test_time_of_day_formats() {
        assert_eq!(parse_time_of_day("06:00").unwrap(), NaiveTime::from_hms_opt(6, 0, 0).unwrap());
        assert_eq!(parse_time_of_day("20:00:30").unwrap(), NaiveTime::from_hms_opt(20, 0, 30).unwrap());
    }
}
