// Runtime configuration: an optional TOML file, then environment overrides.
use crate::auth::AuthConfig;
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "ooh-dash.toml";
pub const DEFAULT_DATA_PATH: &str = "storage_v1_9hf29sk";
pub const MANIFEST_FILE: &str = "data-manifest.json";

/// Source column name for each canonical column.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub id: String,
    pub address: String,
    pub city: String,
    pub year: String,
    pub month: String,
    pub vendor: String,
    pub format: String,
    pub grp: String,
    pub ots: String,
    pub lat: String,
    pub lng: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            address: "Адрес в системе Admetrix".to_string(),
            city: "Город".to_string(),
            year: "Год".to_string(),
            month: "Месяц".to_string(),
            vendor: "Продавец".to_string(),
            format: "Формат поверхности_2".to_string(),
            grp: "GRP (18+) в сутки".to_string(),
            ots: "OTS (18+) тыс.чел. в сутки".to_string(),
            lat: "Широта".to_string(),
            lng: "Долгота".to_string(),
        }
    }
}

impl ColumnMapping {
    fn pairs(&self) -> [(&'static str, &str); 11] {
        [
            ("id", self.id.as_str()),
            ("address", self.address.as_str()),
            ("city", self.city.as_str()),
            ("year", self.year.as_str()),
            ("month", self.month.as_str()),
            ("vendor", self.vendor.as_str()),
            ("format", self.format.as_str()),
            ("grp", self.grp.as_str()),
            ("ots", self.ots.as_str()),
            ("lat", self.lat.as_str()),
            ("lng", self.lng.as_str()),
        ]
    }

    /// Canonical key for a source column. A column already named like a
    /// canonical key maps to itself.
    pub fn canonical(&self, source: &str) -> Option<&'static str> {
        let pairs = self.pairs();
        pairs
            .iter()
            .find(|(_, src)| *src == source)
            .or_else(|| pairs.iter().find(|(key, _)| *key == source))
            .map(|(key, _)| *key)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Origin (`https://host`) or local directory holding the data folder.
    pub data_root: String,
    /// Data folder name under `data_root`.
    pub data_path: String,
    pub debounce_ms: u64,
    pub output_dir: PathBuf,
    pub log_level: String,
    pub columns: ColumnMapping,
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: "public".to_string(),
            data_path: DEFAULT_DATA_PATH.to_string(),
            debounce_ms: 300,
            output_dir: PathBuf::from("."),
            log_level: "info".to_string(),
            columns: ColumnMapping::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    /// Read `path`, or the default file if present, then apply environment
    /// overrides. An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OOH_DATA_ROOT") {
            self.data_root = v;
        }
        if let Some(v) = lookup("OOH_DATA_PATH") {
            self.data_path = v;
        }
        if let Some(v) = lookup("OOH_DEBOUNCE_MS") {
            self.debounce_ms = v.trim().parse().map_err(|_| ConfigError::Env {
                key: "OOH_DEBOUNCE_MS",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("OOH_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ADMIN_PASSWORD") {
            self.auth.admin_password = Some(v);
        }
        if let Some(v) = lookup("GUEST_PASSWORD") {
            self.auth.guest_password = Some(v);
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
