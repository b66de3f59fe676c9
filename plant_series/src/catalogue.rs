use crate::error::{EngineError, Result};
use crate::resample::{AggRule, AggregationDirective};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// One raw SCADA tag and how it is reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub tag: String,
    pub name: String,
    /// Rule for 1m -> 15m.
    pub fine_rule: AggRule,
    /// Rule for 15m -> 1h and 1d, applied to the energy channel when there is one.
    pub coarse_rule: AggRule,
    #[serde(default)]
    pub energy_name: Option<String>,
}

impl ChannelSpec {
    pub fn new(tag: impl Into<String>, name: impl Into<String>, fine_rule: AggRule, coarse_rule: AggRule) -> Self {
        Self {
            tag: tag.into(),
            name: name.into(),
            fine_rule,
            coarse_rule,
            energy_name: None,
        }
    }

    pub fn with_energy(mut self, energy_name: impl Into<String>) -> Self {
        self.energy_name = Some(energy_name.into());
        self
    }

    /// Name of the channel in coarse (1h, 1d) outputs.
    pub fn coarse_name(&self) -> &str {
        self.energy_name.as_deref().unwrap_or(&self.name)
    }
}

/// Static channel configuration of one dataset. Order is report order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelCatalogue {
    specs: Vec<ChannelSpec>,
}

impl ChannelCatalogue {
    pub fn new(specs: Vec<ChannelSpec>) -> Self {
        Self { specs }
    }

    /// Loads a `tag,name,fine_rule,coarse_rule,energy_name` CSV file.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| EngineError::Catalogue {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_reader(file).map_err(|e| match e {
            EngineError::Catalogue { reason, .. } => EngineError::Catalogue {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut specs = Vec::new();
        for record in rdr.deserialize() {
            let spec: ChannelSpec = record.map_err(|e| EngineError::Catalogue {
                path: "<reader>".to_string(),
                reason: e.to_string(),
            })?;
            specs.push(spec);
        }
        Ok(Self { specs })
    }

    /// The 88 inverters of the Domeyko park, 22 cabins of 4 inverters each.
    /// Power in kW averaged to 15 minutes, energy in kWh summed above that.
    pub fn domeyko_inverters() -> Self {
        // SCADA station code per cabin, in cabin order
        const STATIONS: [u8; 22] = [
            11, 12, 13, 14, 15, 21, 22, 23, 24, 33, 34, 41, 42, 43, 44, 45, 51, 52, 53, 54, 31, 32,
        ];
        let specs = STATIONS
            .iter()
            .enumerate()
            .flat_map(|(cabin, station)| {
                (1..=4).map(move |inverter| {
                    let label = format!("Cabin {} inverter {inverter}", cabin + 1);
                    ChannelSpec::new(
                        format!("PN1_S{station}_AN{inverter}0028"),
                        format!("{label} [kW]"),
                        AggRule::Mean,
                        AggRule::Sum,
                    )
                    .with_energy(format!("{label} [kWh]"))
                })
            })
            .collect();
        Self { specs }
    }

    /// Meteorological station and plane-of-array sensors of the Domeyko park.
    /// Irradiance is converted to Wh/m2 and summed; temperatures are averaged.
    pub fn domeyko_meteo() -> Self {
        const SENSORS: [(&str, &str); 18] = [
            ("PN1_S00_AN00005", "Pyranometer H. 01 (WS) cabin 01 [W/m2]"),
            ("PN1_S00_AN00006", "Pyranometer H. 02 (WS) cabin 01 [W/m2]"),
            ("PN1_S00_AN00007", "Pyranometer H. 03 (WS) cabin 01 [W/m2]"),
            ("PN1_S11_AN00001", "Pyranometer POA cabin 01 [W/m2]"),
            ("PN1_S14_AN00001", "Pyranometer POA cabin 04 [W/m2]"),
            ("PN1_S22_AN00001", "Pyranometer POA cabin 07 [W/m2]"),
            ("PN1_S33_AN00001", "Pyranometer POA cabin 10 [W/m2]"),
            ("PN1_S41_AN00001", "Pyranometer POA cabin 12 [W/m2]"),
            ("PN1_S44_AN00001", "Pyranometer POA cabin 15 [W/m2]"),
            ("PN1_S52_AN00001", "Pyranometer POA cabin 18 [W/m2]"),
            ("PN1_S31_AN00001", "Pyranometer POA cabin 21 [W/m2]"),
            ("PN1_S00_AN00008", "Pyranometer difuse (WS) cabin 01 [W/m2]"),
            ("PN1_S00_AN00003", "Ambient temp. (WS) cabin 01 [°C]"),
            ("PN1_S14_AN00002", "Module temp. cabin 04 [°C]"),
            ("PN1_S22_AN00002", "Module temp. cabin 07 [°C]"),
            ("PN1_S33_AN00002", "Module temp. cabin 10 [°C]"),
            ("PN1_S44_AN00002", "Module temp. cabin 15 [°C]"),
            ("PN1_S52_AN00002", "Module temp. cabin 18 [°C]"),
        ];
        let specs = SENSORS
            .iter()
            .map(|(tag, name)| {
                if name.contains("[W/m2]") {
                    ChannelSpec::new(*tag, *name, AggRule::Mean, AggRule::Sum)
                        .with_energy(name.replace("[W/m2]", "[Wh/m2]"))
                } else {
                    ChannelSpec::new(*tag, *name, AggRule::Mean, AggRule::Mean)
                }
            })
            .collect();
        Self { specs }
    }

    pub fn specs(&self) -> &[ChannelSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn rename_map(&self) -> HashMap<String, String> {
        self.specs.iter().map(|s| (s.tag.clone(), s.name.clone())).collect()
    }

    pub fn tags(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.tag.as_str()).collect()
    }

    pub fn display_names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn coarse_names(&self) -> Vec<&str> {
        self.specs.iter().map(ChannelSpec::coarse_name).collect()
    }

    /// True when `column` is a tag or a display name of the catalogue.
    pub fn knows(&self, column: &str) -> bool {
        self.specs.iter().any(|s| s.tag == column || s.name == column)
    }

    /// Directive over display names for 1m -> 15m.
    pub fn fine_directive(&self) -> AggregationDirective {
        self.specs
            .iter()
            .map(|s| (s.name.clone(), s.fine_rule.as_str()))
            .collect()
    }

    /// Directive over coarse names for 15m -> 1h and 1d.
    pub fn coarse_directive(&self) -> AggregationDirective {
        self.specs
            .iter()
            .map(|s| (s.coarse_name().to_string(), s.coarse_rule.as_str()))
            .collect()
    }

    /// `(power, energy)` display name pairs for [`crate::resample::power_to_energy`].
    pub fn energy_pairs(&self) -> Vec<(String, String)> {
        self.specs
            .iter()
            .filter_map(|s| s.energy_name.as_ref().map(|e| (s.name.clone(), e.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_domeyko_inverter_tags() {
        let catalogue = ChannelCatalogue::domeyko_inverters();
        assert_eq!(catalogue.len(), 88);
        let first = &catalogue.specs()[0];
        assert_eq!(first.tag, "PN1_S11_AN10028");
        assert_eq!(first.name, "Cabin 1 inverter 1 [kW]");
        assert_eq!(first.coarse_name(), "Cabin 1 inverter 1 [kWh]");

        let renames = catalogue.rename_map();
        assert_eq!(renames["PN1_S33_AN20028"], "Cabin 10 inverter 2 [kW]");
        assert_eq!(renames["PN1_S32_AN40028"], "Cabin 22 inverter 4 [kW]");
    }

    #[test]
    fn test_meteo_directives() {
        let catalogue = ChannelCatalogue::domeyko_meteo();
        assert_eq!(catalogue.len(), 18);
        assert_eq!(catalogue.energy_pairs().len(), 12);

        let coarse = catalogue.coarse_directive();
        let rule_of = |name: &str| {
            coarse
                .entries()
                .iter()
                .find(|(c, _)| c == name)
                .map(|(_, r)| r.clone())
        };
        assert_eq!(rule_of("Pyranometer POA cabin 01 [Wh/m2]").as_deref(), Some("sum"));
        assert_eq!(rule_of("Module temp. cabin 04 [°C]").as_deref(), Some("mean"));
        assert!(catalogue
            .fine_directive()
            .entries()
            .iter()
            .all(|(_, rule)| rule == "mean"));
    }

    #[test]
    fn test_catalogue_from_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tag,name,fine_rule,coarse_rule,energy_name").unwrap();
        writeln!(file, "T1, Meter A [kWh] ,sum,sum,").unwrap();
        writeln!(file, "T2,Power B [kW],mean,sum,Power B [kWh]").unwrap();

        let catalogue = ChannelCatalogue::from_csv(file.path()).unwrap();
        assert_eq!(catalogue.display_names(), vec!["Meter A [kWh]", "Power B [kW]"]);
        assert_eq!(catalogue.specs()[0].energy_name, None);
        assert_eq!(catalogue.coarse_names(), vec!["Meter A [kWh]", "Power B [kWh]"]);
        assert!(catalogue.knows("T2"));
        assert!(!catalogue.knows("T3"));
    }

    #[test]
    fn test_catalogue_bad_rule_is_error() {
        let data = "tag,name,fine_rule,coarse_rule,energy_name\nT1,A,median,sum,\n";
        assert!(matches!(
            ChannelCatalogue::from_reader(data.as_bytes()),
            Err(EngineError::Catalogue { .. })
        ));
        assert!(matches!(
            ChannelCatalogue::from_csv("/definitely/not/here.csv"),
            Err(EngineError::Catalogue { .. })
        ));
    }
}
