use serde::Deserialize;

use crate::nls::Nls;
use crate::talker::TalkerTable;

/// Settings shared by the command-line tools, read from a TOML file.
///
/// ```toml
/// nls = "sjis"
/// log_level = "debug"
/// talkers = ["Narrator", "Hero"]
/// ```
///
/// Every key is optional; command-line flags win over the file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    pub nls: Option<Nls>,
    pub log_level: Option<log::LevelFilter>,
    pub talkers: Option<Vec<String>>,
}

impl ToolConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn talker_table(&self) -> TalkerTable {
        match &self.talkers {
            Some(names) => TalkerTable::new(names.clone()),
            None => TalkerTable::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config() {
        let config = ToolConfig::from_toml(
            "nls = \"gbk\"\nlog_level = \"debug\"\ntalkers = [\"A\", \"B\"]\n",
        )
        .unwrap();
        assert_eq!(config.nls, Some(Nls::GBK));
        assert_eq!(config.log_level, Some(log::LevelFilter::Debug));
        assert_eq!(config.talker_table().name(1), Some("B"));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = ToolConfig::from_toml("").unwrap();
        assert_eq!(config, ToolConfig::default());
        assert_eq!(config.talker_table(), TalkerTable::default());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(ToolConfig::from_toml("encoding = \"sjis\"").is_err());
        assert!(ToolConfig::from_toml("nls = \"latin1\"").is_err());
    }
}
