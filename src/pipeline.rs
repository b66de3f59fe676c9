use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use plant_series::{
    clean_rows, combine_by_precedence, daily_missing_ratio, left_join_onto_grid, mask_outside_window,
    null_at_or_above, power_to_energy, resample, unknown_columns, AggRule, AggregationDirective, CanonicalGrid,
    Channel, ChannelCatalogue, Normalizer, ObservationTable, Resolution, TimestampLayout,
};
use std::path::{Path, PathBuf};

use crate::config::{Dataset, ReportConfig};
use crate::sources::{discover_files, read_raw_table, substation_name};

pub const COMPLETENESS_SHEET: &str = "completeness";

/// Sheets of one dataset report, in workbook order.
#[derive(Debug, Clone)]
pub struct DatasetReport {
    pub dataset: Dataset,
    pub sheets: Vec<(String, ObservationTable)>,
}

impl DatasetReport {
    pub fn sheet(&self, name: &str) -> Option<&ObservationTable> {
        self.sheets.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

/// Monthly processing of every dataset of one period.
pub struct MonthlyPipeline<'a> {
    config: &'a ReportConfig,
    start: NaiveDate,
    end: NaiveDate,
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({msg})")
    {
        pb.set_style(style);
    }
    pb
}

/// Adds an all-missing channel for every catalogue name the table lacks and
/// orders channels as the catalogue does. Channels outside the catalogue are dropped.
fn conform_to_catalogue(table: ObservationTable, names: &[&str], dataset: Dataset) -> Result<ObservationTable> {
    let (timestamps, mut channels) = table.into_parts();
    let mut ordered = Vec::with_capacity(names.len());
    for name in names {
        match channels.iter().position(|c| c.name == *name) {
            Some(idx) => ordered.push(channels.swap_remove(idx)),
            None => {
                warn!("{}: no data for '{name}', column left empty", dataset.label());
                ordered.push(Channel::new(*name, vec![None; timestamps.len()]));
            }
        }
    }
    Ok(ObservationTable::new(timestamps, ordered)?)
}

impl<'a> MonthlyPipeline<'a> {
    pub fn new(config: &'a ReportConfig) -> Result<Self> {
        let (start, end) = config.period()?;
        Ok(Self { config, start, end })
    }

    pub fn process(&self, dataset: Dataset) -> Result<DatasetReport> {
        info!("Processing {} for {} .. {}", dataset.label(), self.start, self.end);
        let sheets = match dataset {
            Dataset::Inverters => self.process_inverters(),
            Dataset::Sensors => self.process_sensors(),
            Dataset::Meters => self.process_meters(),
            Dataset::Prmte => self.process_prmte(),
        }
        .with_context(|| format!("Failed to process {}", dataset.label()))?;
        Ok(DatasetReport { dataset, sheets })
    }

    fn input_files(&self, dataset: Dataset) -> Result<Vec<PathBuf>> {
        let folder = self.config.input_dir(dataset)?;
        let files = discover_files(&folder, &self.config.folders.extensions)?;
        if files.is_empty() {
            bail!("no input files in {}", folder.display());
        }
        info!("Found {} {} files in {}", files.len(), dataset.label(), folder.display());
        Ok(files)
    }

    /// Loads every file with `load`, then combines them so that earlier files
    /// win where exports overlap.
    fn load_combined<F>(&self, dataset: Dataset, mut load: F) -> Result<ObservationTable>
    where
        F: FnMut(&Path) -> Result<ObservationTable>,
    {
        let files = self.input_files(dataset)?;
        let pb = progress_bar(files.len());
        let mut tables = Vec::with_capacity(files.len());
        for path in &files {
            pb.set_message(
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            );
            let table = load(path).with_context(|| format!("Failed to load {}", path.display()))?;
            debug!("{}: {} rows x {} channels", path.display(), table.height(), table.width());
            tables.push(table);
            pb.inc(1);
        }
        pb.finish_with_message(format!("Loaded {} files", files.len()));

        let combined = combine_by_precedence(&tables)?;
        Ok(clean_rows(&combined))
    }

    fn grid(&self, dataset: Dataset, offset_minutes: i64) -> Result<CanonicalGrid> {
        let step = self.config.input_period(dataset)?.minutes();
        Ok(CanonicalGrid::build(self.start, self.end, step, offset_minutes)?)
    }

    /// SCADA SDI export normalized and renamed through `catalogue`.
    fn load_scada(
        &self,
        path: &Path,
        delimiter: char,
        catalogue: &ChannelCatalogue,
        dataset: Dataset,
    ) -> Result<ObservationTable> {
        let raw = read_raw_table(path, delimiter)?;
        let table = Normalizer::scada_sdi().normalize(&raw)?;
        let unknown = unknown_columns(catalogue, &table.channel_names());
        for column in unknown {
            warn!("{}: {column} is not in the list of {}", path.display(), dataset.label());
        }
        Ok(table.rename_channels(&catalogue.rename_map()))
    }

    fn aggregate(
        &self,
        table: &ObservationTable,
        resolution: Resolution,
        directive: &AggregationDirective,
    ) -> Result<ObservationTable> {
        Ok(resample(table, resolution.minutes(), directive)?.table)
    }

    /// Fine rule to 15 minutes, power to energy, then coarse rule to 1h and 1d.
    fn catalogue_resolutions(
        &self,
        fine: &ObservationTable,
        catalogue: &ChannelCatalogue,
    ) -> Result<Vec<(String, ObservationTable)>> {
        let quarter = self.aggregate(fine, Resolution::FifteenMinutes, &catalogue.fine_directive())?;
        let quarter = power_to_energy(&quarter, &catalogue.energy_pairs(), Resolution::FifteenMinutes.hours())?;
        let coarse = catalogue.coarse_directive();
        let hourly = self.aggregate(&quarter, Resolution::Hourly, &coarse)?;
        let daily = self.aggregate(&quarter, Resolution::Daily, &coarse)?;
        Ok(vec![
            (Resolution::FifteenMinutes.label().to_string(), quarter),
            (Resolution::Hourly.label().to_string(), hourly),
            (Resolution::Daily.label().to_string(), daily),
        ])
    }

    /// Inverter power: masked outside production hours, reported as kW at
    /// 1 minute and as kWh from 15 minutes up.
    pub fn process_inverters(&self) -> Result<Vec<(String, ObservationTable)>> {
        let dataset = Dataset::Inverters;
        let catalogue = self.config.inverter_catalogue()?;
        let delimiter = self.config.inverters.csv_delimiter;
        let combined = self.load_combined(dataset, |path| self.load_scada(path, delimiter, &catalogue, dataset))?;

        let grid = self.grid(dataset, 0)?;
        let joined = left_join_onto_grid(&grid, &[combined])?;
        let joined = conform_to_catalogue(joined, &catalogue.display_names(), dataset)?;

        let (from, to) = self.config.production_window()?;
        let masked = mask_outside_window(&joined, from, to);

        let mut sheets = vec![(Resolution::OneMinute.label().to_string(), masked.clone())];
        sheets.extend(self.catalogue_resolutions(&masked, &catalogue)?);
        sheets.push((COMPLETENESS_SHEET.to_string(), daily_missing_ratio(&joined)));
        Ok(sheets)
    }

    /// Meteorological sensors: irradiance faults removed, irradiance energy
    /// in Wh/m2 from 15 minutes up, temperatures averaged. Completeness is
    /// measured before faults are removed.
    pub fn process_sensors(&self) -> Result<Vec<(String, ObservationTable)>> {
        let dataset = Dataset::Sensors;
        let catalogue = self.config.sensor_catalogue()?;
        let delimiter = self.config.sensors.csv_delimiter;
        let combined = self.load_combined(dataset, |path| self.load_scada(path, delimiter, &catalogue, dataset))?;

        let grid = self.grid(dataset, 0)?;
        let joined = left_join_onto_grid(&grid, &[combined])?;
        let joined = conform_to_catalogue(joined, &catalogue.display_names(), dataset)?;
        let mut cleaned = joined.clone();

        let marker = &self.config.sensors.irradiance_marker;
        let irradiance: Vec<String> = cleaned
            .channel_names()
            .into_iter()
            .filter(|name| name.contains(marker.as_str()))
            .map(str::to_string)
            .collect();
        for name in &irradiance {
            cleaned = null_at_or_above(&cleaned, name, self.config.sensors.irradiance_threshold)?;
        }

        let mut sheets = vec![(Resolution::OneMinute.label().to_string(), cleaned.clone())];
        sheets.extend(self.catalogue_resolutions(&cleaned, &catalogue)?);
        sheets.push((COMPLETENESS_SHEET.to_string(), daily_missing_ratio(&joined)));
        Ok(sheets)
    }

    /// Energy meters: 15-minute registers, channels prefixed by substation,
    /// summed to 1h and 1d.
    pub fn process_meters(&self) -> Result<Vec<(String, ObservationTable)>> {
        let dataset = Dataset::Meters;
        let meters = &self.config.meters;
        let combined = self.load_combined(dataset, |path| {
            let raw = read_raw_table(path, meters.csv_delimiter)?;
            let column = match &meters.timestamp_column {
                Some(column) => column.clone(),
                None => raw
                    .headers
                    .first()
                    .map(|h| h.trim().to_string())
                    .with_context(|| format!("{} has no columns", path.display()))?,
            };
            let table = Normalizer::new(TimestampLayout::free_text(column)).normalize(&raw)?;
            Ok(match substation_name(path)? {
                Some(substation) => table.prefix_channels(&substation),
                None => {
                    warn!("{}: no substation in file path, channels kept unprefixed", path.display());
                    table
                }
            })
        })?;

        let grid = self.grid(dataset, meters.offset_minutes)?;
        let joined = left_join_onto_grid(&grid, &[combined])?;
        self.summed_resolutions(joined)
    }

    /// PRMTE regulatory reports: locale numbers, bookkeeping columns dropped
    /// by position, summed to 1h and 1d.
    pub fn process_prmte(&self) -> Result<Vec<(String, ObservationTable)>> {
        let dataset = Dataset::Prmte;
        let prmte = &self.config.prmte;
        let normalizer = Normalizer::prmte().dropping_positions(&prmte.drop_positions);
        let combined = self.load_combined(dataset, |path| {
            let raw = read_raw_table(path, prmte.csv_delimiter)?;
            Ok(normalizer.normalize(&raw)?)
        })?;

        let grid = self.grid(dataset, prmte.offset_minutes)?;
        let joined = left_join_onto_grid(&grid, &[combined])?;
        self.summed_resolutions(joined)
    }

    fn summed_resolutions(&self, quarter: ObservationTable) -> Result<Vec<(String, ObservationTable)>> {
        let directive = AggregationDirective::uniform(quarter.channel_names(), AggRule::Sum);
        let hourly = self.aggregate(&quarter, Resolution::Hourly, &directive)?;
        let daily = self.aggregate(&quarter, Resolution::Daily, &directive)?;
        let completeness = daily_missing_ratio(&quarter);
        Ok(vec![
            (Resolution::FifteenMinutes.label().to_string(), quarter),
            (Resolution::Hourly.label().to_string(), hourly),
            (Resolution::Daily.label().to_string(), daily),
            (COMPLETENESS_SHEET.to_string(), completeness),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_for(root: &Path) -> ReportConfig {
        ReportConfig {
            start_date: "01-12-2024".to_string(),
            end_date: "02-12-2024".to_string(),
            root: root.to_path_buf(),
            ..ReportConfig::default()
        }
    }

    fn write_meter_csv(dir: &Path, name: &str, rows: &[(&str, &str)]) {
        std::fs::create_dir_all(dir).unwrap();
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        writeln!(file, "Fecha,Energia [kWh]").unwrap();
        for (ts, value) in rows {
            writeln!(file, "{ts},{value}").unwrap();
        }
    }

    #[test]
    fn test_meters_month_pipeline() {
        let root = tempfile::tempdir().unwrap();
        let config = config_for(root.path());
        let folder = config.input_dir(Dataset::Meters).unwrap();
        write_meter_csv(
            &folder,
            "EMELDA_1_dic.csv",
            &[("01-12-2024 00:00:00", "10"), ("01-12-2024 00:15:00", "5"), ("01-12-2024 01:00:00", "")],
        );
        write_meter_csv(&folder, "EMELDA_FT1_dic.csv", &[("01-12-2024 00:30:00", "2.5")]);

        let report = MonthlyPipeline::new(&config).unwrap().process(Dataset::Meters).unwrap();
        let quarter = report.sheet("15m").unwrap();
        assert_eq!(quarter.height(), 97);
        assert_eq!(
            quarter.channel_names(),
            vec!["EMELDA_1 Energia [kWh]", "EMELDA_FT1 Energia [kWh]"]
        );

        let hourly = report.sheet("1h").unwrap();
        assert_eq!(hourly.value(0, "EMELDA_1 Energia [kWh]"), Some(Some(15.0)));
        assert_eq!(hourly.value(0, "EMELDA_FT1 Energia [kWh]"), Some(Some(2.5)));
        assert_eq!(hourly.value(1, "EMELDA_1 Energia [kWh]"), Some(None));

        let daily = report.sheet("1d").unwrap();
        assert_eq!(daily.value(0, "EMELDA_1 Energia [kWh]"), Some(Some(15.0)));
        assert!(report.sheet(COMPLETENESS_SHEET).is_some());
    }

    #[test]
    fn test_missing_input_folder_fails_with_dataset_context() {
        let root = tempfile::tempdir().unwrap();
        let config = config_for(root.path());
        let err = MonthlyPipeline::new(&config).unwrap().process(Dataset::Prmte).unwrap_err();
        assert!(err.to_string().contains("prmte"));
    }

    #[test]
    fn test_inverters_from_csv_sdi_export() {
        let root = tempfile::tempdir().unwrap();
        let config = config_for(root.path());
        let folder = config.input_dir(Dataset::Inverters).unwrap();
        std::fs::create_dir_all(&folder).unwrap();
        let mut file = std::fs::File::create(folder.join("cabin1.csv")).unwrap();
        writeln!(file, "L,gg,mm,aaaa,hh,mm,ss,mmm,PN1_S11_AN10028,PN1_S99_AN10028").unwrap();
        // 1 kW at night is standby noise, 600 kW at noon is production
        writeln!(file, "x,1,12,2024,3,0,0,y,1,7").unwrap();
        for minute in 0..15 {
            writeln!(file, "x,1,12,2024,12,{minute},0,y,600,7").unwrap();
        }
        drop(file);

        let sheets = MonthlyPipeline::new(&config).unwrap().process_inverters().unwrap();
        let names: Vec<&str> = sheets.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["1m", "15m", "1h", "1d", "completeness"]);

        let minute = &sheets[0].1;
        assert_eq!(minute.width(), 88);
        assert_eq!(minute.channel_names()[0], "Cabin 1 inverter 1 [kW]");
        assert_eq!(minute.value(180, "Cabin 1 inverter 1 [kW]"), Some(Some(0.0)));

        let quarter = &sheets[1].1;
        assert_eq!(quarter.value(48, "Cabin 1 inverter 1 [kWh]"), Some(Some(150.0)));
        let daily = &sheets[3].1;
        assert_eq!(daily.value(0, "Cabin 1 inverter 1 [kWh]"), Some(Some(150.0)));
        assert_eq!(daily.value(0, "Cabin 2 inverter 1 [kWh]"), Some(None));
    }

    #[test]
    fn test_sensor_faults_do_not_count_as_missing() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config_for(root.path());
        config.sensors.csv_delimiter = ';';
        let folder = config.input_dir(Dataset::Sensors).unwrap();
        std::fs::create_dir_all(&folder).unwrap();
        let mut file = std::fs::File::create(folder.join("meteo.csv")).unwrap();
        writeln!(file, "L;gg;mm;aaaa;hh;mm;ss;mmm;PN1_S11_AN00001").unwrap();
        for hour in 6..=20 {
            for minute in 0..60 {
                if hour == 20 && minute > 0 {
                    break;
                }
                // 2000 W/m2 at noon is a pyranometer fault
                let value = if hour == 12 && minute == 0 { 2000 } else { 800 };
                writeln!(file, "x;1;12;2024;{hour};{minute};0;y;{value}").unwrap();
            }
        }
        drop(file);

        let sheets = MonthlyPipeline::new(&config).unwrap().process_sensors().unwrap();
        let poa = "Pyranometer POA cabin 01 [W/m2]";
        let minute = &sheets[0].1;
        assert_eq!(minute.value(720, poa), Some(None));
        assert_eq!(minute.value(721, poa), Some(Some(800.0)));

        let completeness = &sheets[4].1;
        assert_eq!(sheets[4].0, COMPLETENESS_SHEET);
        assert_eq!(completeness.value(0, poa), Some(Some(0.0)));
        assert_eq!(completeness.value(0, "Ambient temp. (WS) cabin 01 [°C]"), Some(Some(1.0)));
    }
}
