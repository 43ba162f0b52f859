use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Directory for daily-rolling log files; stdout when unset
    pub log_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub grading: GradingConfig,
    pub watch: WatchConfig,
    pub certificate: CertificateConfig,
    pub outline_cache: OutlineCacheConfig,
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://database/progress.db?mode=rwc".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_dir: None,
            request_timeout_secs: 30,
            grading: GradingConfig::default(),
            watch: WatchConfig::default(),
            certificate: CertificateConfig::default(),
            outline_cache: OutlineCacheConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    /// Passing threshold (0..=100) for ordinary chapter quizzes
    pub quiz_passing_score: u8,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self { quiz_passing_score: 70 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Watched seconds accumulated between two flushes
    pub flush_interval_secs: u32,
    /// Share of the lecture duration that must be watched before completion is offered
    pub completion_ratio_percent: u8,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { flush_interval_secs: 10, completion_ratio_percent: 80 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    pub issuer_timeout_secs: u64,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self { issuer_timeout_secs: 10 }
    }
}

impl CertificateConfig {
    pub fn issuer_timeout(&self) -> Duration {
        Duration::from_secs(self.issuer_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlineCacheConfig {
    pub capacity: u64,
    pub ttl_secs: u64,
}

impl Default for OutlineCacheConfig {
    fn default() -> Self {
        Self { capacity: 256, ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Compare-and-set attempts before a write gives up with `Conflict`
    pub max_write_retries: u32,
    /// Per-record write locks untouched for this long are dropped
    pub lock_idle_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_write_retries: 5, lock_idle_secs: 600 }
    }
}

impl Config {
    /// Load from a TOML file (defaults when it does not exist), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {:?}", path))?;
                toml::from_str::<Config>(&content)
                    .with_context(|| format!("Failed to parse config {:?}", path))?
            }
            _ => Config::default(),
        };
        let _ = dotenvy::dotenv();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(url) = dotenvy::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(host) = dotenvy::var("PROGRESS_HOST") {
            self.host = host;
        }
        if let Ok(port) = dotenvy::var("PROGRESS_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("PROGRESS_PORT is not a port number: {port}"))?;
        }
        if let Ok(dir) = dotenvy::var("PROGRESS_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.grading.quiz_passing_score > 100 {
            anyhow::bail!("grading.quiz_passing_score must be within 0..=100");
        }
        if self.watch.completion_ratio_percent > 100 {
            anyhow::bail!("watch.completion_ratio_percent must be within 0..=100");
        }
        if self.store.lock_idle_secs == 0 {
            anyhow::bail!("store.lock_idle_secs must be positive");
        }
        if self.watch.flush_interval_secs == 0 {
            anyhow::bail!("watch.flush_interval_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_uses_seventy_percent_quiz_threshold() {
        let config = Config::default();
        assert_eq!(config.grading.quiz_passing_score, 70);
        assert_eq!(config.watch.flush_interval_secs, 10);
        assert_eq!(config.watch.completion_ratio_percent, 80);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            port = 9000

            [certificate]
            issuer_timeout_secs = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.certificate.issuer_timeout(), Duration::from_secs(3));
        assert_eq!(config.store.max_write_retries, 5);
        assert_eq!(config.store.lock_idle_secs, 600);
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[grading]\nquiz_passing_score = 80").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.grading.quiz_passing_score, 80);
    }

    #[test]
    fn load_rejects_out_of_range_threshold() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[grading]\nquiz_passing_score = 120").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.grading.quiz_passing_score, 70);
    }
}
