//! Filter configuration.
//!
//! All settings have defaults, so a configuration file is optional. When one
//! is given it is YAML; missing keys fall back to the defaults.
//!
//! # Example YAML
//!
//! ```yaml
//! float_precision: 6
//! sections: all
//! lock_timeout_ms: 5000
//! busy_timeout_ms: 100
//! pages_per_step: 256
//! ```

use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which parts of the canonical dump to emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sections {
    /// Header, DDL, rows, autoincrement counters and footer.
    #[default]
    All,
    /// Header, DDL and footer; no rows.
    SchemaOnly,
    /// Row `INSERT` statements only.
    DataOnly,
}

impl Sections {
    pub fn includes_schema(self) -> bool {
        !matches!(self, Sections::DataOnly)
    }

    pub fn includes_data(self) -> bool {
        !matches!(self, Sections::SchemaOnly)
    }
}

/// Settings shared by the clean and smudge directions.
///
/// # Examples
///
/// ```
/// # use git_sqlite_codec::FilterConfig;
/// let config = FilterConfig::default();
/// assert_eq!(config.float_precision, None);
/// assert_eq!(config.lock_timeout_ms, 5000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Round REAL values to this many fractional digits (trailing zeros trimmed).
    pub float_precision: Option<u32>,
    /// Parts of the dump to emit on clean.
    pub sections: Sections,
    /// Upper bound on how long the snapshot copy keeps retrying a locked source.
    pub lock_timeout_ms: u64,
    /// Busy handler timeout installed on every connection.
    pub busy_timeout_ms: u64,
    /// Pages copied per online-backup step.
    pub pages_per_step: i32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            float_precision: None,
            sections: Sections::All,
            lock_timeout_ms: 5000,
            busy_timeout_ms: 100,
            pages_per_step: 256,
        }
    }
}

impl FilterConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Io`](crate::FilterError::Io) if the file cannot be read, or
    /// [`Config`](crate::FilterError::Config) if parsing fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)?;
        Ok(config)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}
