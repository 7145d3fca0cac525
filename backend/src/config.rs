//! Settings file and directory layout.
//!
//! ```toml
//! directory = "${REBATE_DATA}"
//!
//! [context]
//! year = 2024
//! quarter = 1
//!
//! [filter]
//! names = []
//! tags = ["acme"]
//!
//! [testing]
//! compare = true
//! compare_all = false
//!
//! [server]
//! port = 3000
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::context::{Context, Filter, Time};
use crate::error::{ConfigError, ConfigResult};

/// Settings file read when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "rebater.toml";

static ENV_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("static pattern"));

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub directory: PathBuf,
    pub context: ContextSettings,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub testing: TestingSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSettings {
    pub year: i32,
    pub quarter: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestingSettings {
    #[serde(default)]
    pub compare: bool,
    #[serde(default)]
    pub compare_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

impl Settings {
    /// Minimal settings for a data directory and quarter.
    pub fn new(directory: impl Into<PathBuf>, time: Time) -> Self {
        Self {
            directory: directory.into(),
            context: ContextSettings { year: time.year, quarter: time.quarter },
            filter: Filter::default(),
            testing: TestingSettings::default(),
            server: ServerSettings::default(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let processed = substitute_env_vars(content);
        let settings: Settings = toml::from_str(&processed)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "directory".into(),
                message: "must not be empty".into(),
            });
        }
        if !(1..=4).contains(&self.context.quarter) {
            return Err(ConfigError::Invalid {
                field: "context.quarter".into(),
                message: format!("{} is not between 1 and 4", self.context.quarter),
            });
        }
        Ok(())
    }

    pub fn time(&self) -> ConfigResult<Time> {
        Time::new(self.context.year, self.context.quarter).ok_or_else(|| ConfigError::Invalid {
            field: "context.quarter".into(),
            message: format!("{} is not between 1 and 4", self.context.quarter),
        })
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.directory)
    }

    /// Run context for these settings.
    pub fn context(&self) -> ConfigResult<Context> {
        Ok(Context::new(self.time()?, self.filter.clone(), self.layout()))
    }
}

/// Replace `${VAR}` with the environment value. Unknown variables are left as is.
pub fn substitute_env_vars(content: &str) -> String {
    ENV_VAR
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
}

// =============================================================================
// Layout
// =============================================================================

/// Paths of every persisted collection under the data directory.
///
/// ```text
/// {root}/
/// ├── tables/{name}.csv
/// ├── sources/{group}/{year}/Q{q}/**
/// ├── rebates/{year}/Q{q}/{name}.csv
/// ├── truth/{year}/Q{q}/**/*.csv
/// ├── utility/{year}/Q{q}/{name}.csv
/// │   └── debug/{name}/{uuid}.csv
/// ├── transformers/**/*.json
/// └── upload/{year}/Q{q}/TOTAL.csv
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn quarter(base: PathBuf, time: &Time) -> PathBuf {
        base.join(time.year.to_string()).join(format!("Q{}", time.quarter))
    }

    pub fn references(&self) -> PathBuf {
        self.root.join("tables")
    }

    pub fn reference(&self, name: &str) -> PathBuf {
        self.references().join(format!("{}.csv", name))
    }

    pub fn sources(&self, group: &str, time: &Time) -> PathBuf {
        Self::quarter(self.root.join("sources").join(group), time)
    }

    pub fn rebates(&self, time: &Time) -> PathBuf {
        Self::quarter(self.root.join("rebates"), time)
    }

    pub fn rebate(&self, name: &str, time: &Time) -> PathBuf {
        self.rebates(time).join(format!("{}.csv", name))
    }

    pub fn truth(&self, time: &Time) -> PathBuf {
        Self::quarter(self.root.join("truth"), time)
    }

    pub fn utilities(&self, time: &Time) -> PathBuf {
        Self::quarter(self.root.join("utility"), time)
    }

    pub fn utility(&self, name: &str, time: &Time) -> PathBuf {
        self.utilities(time).join(format!("{}.csv", name))
    }

    pub fn debug(&self, name: &str, time: &Time) -> PathBuf {
        self.utilities(time)
            .join("debug")
            .join(name)
            .join(format!("{}.csv", uuid::Uuid::new_v4()))
    }

    pub fn transformers(&self) -> PathBuf {
        self.root.join("transformers")
    }

    pub fn output(&self, time: &Time) -> PathBuf {
        Self::quarter(self.root.join("upload"), time).join("TOTAL.csv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
directory = "/data"

[context]
year = 2024
quarter = 2

[filter]
tags = ["acme"]
"#;

    #[test]
    fn test_parse_with_defaults() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(settings.directory, PathBuf::from("/data"));
        assert_eq!(settings.time().unwrap().to_string(), "2024-Q2");
        assert_eq!(settings.filter.tags, vec!["acme"]);
        assert!(settings.filter.names.is_empty());
        assert!(!settings.testing.compare);
        assert_eq!(settings.server.port, 3000);
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("REBATER_TEST_DIR", "/from/env");
        let text = SAMPLE.replace("/data", "${REBATER_TEST_DIR}");
        let settings = Settings::from_toml_str(&text).unwrap();
        assert_eq!(settings.directory, PathBuf::from("/from/env"));

        assert_eq!(substitute_env_vars("${REBATER_SURELY_UNSET}"), "${REBATER_SURELY_UNSET}");
    }

    #[test]
    fn test_invalid_quarter() {
        let text = SAMPLE.replace("quarter = 2", "quarter = 5");
        let err = Settings::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "context.quarter"));
    }

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new("/data");
        let time = Time { year: 2024, quarter: 1 };
        assert_eq!(layout.reference("customers"), PathBuf::from("/data/tables/customers.csv"));
        assert_eq!(layout.sources("acme", &time), PathBuf::from("/data/sources/acme/2024/Q1"));
        assert_eq!(layout.rebate("acme", &time), PathBuf::from("/data/rebates/2024/Q1/acme.csv"));
        assert_eq!(layout.output(&time), PathBuf::from("/data/upload/2024/Q1/TOTAL.csv"));
        assert!(layout.debug("x", &time).starts_with("/data/utility/2024/Q1/debug/x"));
    }
}
