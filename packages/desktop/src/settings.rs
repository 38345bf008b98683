use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Api {
    pub url: String,
    /// Request timeout in seconds.
    pub timeout: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Pre-issued token; skips the login call.
    pub token: Option<String>,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            url: "http://localhost:5000".into(),
            timeout: 15,
            username: None,
            password: None,
            token: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    /// Seconds between connectivity probes.
    pub interval: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { interval: 30 }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct Storage {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub api: Api,
    pub sync: SyncConfig,
    pub storage: Storage,
}

impl Settings {
    /// Defaults, then `relief.toml` if present, then `RELIEF_*` variables
    /// (`RELIEF_API_URL`, `RELIEF_SYNC_INTERVAL`, ...).
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("api.url", "http://localhost:5000")?
            .set_default("api.timeout", 15)?
            .set_default("sync.interval", 30)?
            .add_source(
                File::with_name("relief.toml")
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix("RELIEF").separator("_"))
            .build()?;

        config.try_deserialize()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("relief")))
            .unwrap_or_else(|| PathBuf::from(".relief"))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::set_var;

    #[test]
    fn test_settings() {
        set_var("RELIEF_API_URL", "https://relief.example");
        set_var("RELIEF_SYNC_INTERVAL", "5");
        set_var("RELIEF_STORAGE_DIR", "/tmp/relief-test");
        let settings = Settings::new().unwrap_or_default();
        println!("Settings = {:?}", settings);
        assert_eq!(settings.api.url, "https://relief.example");
        assert_eq!(settings.api.timeout, 15);
        assert_eq!(settings.probe_interval(), Duration::from_secs(5));
        assert_eq!(settings.data_dir(), PathBuf::from("/tmp/relief-test"));
    }

    #[test]
    fn test_default_data_dir() {
        let settings = Settings::default();
        assert!(settings.data_dir().ends_with("relief"));
        assert_eq!(settings.probe_interval(), Duration::from_secs(30));
    }
}
