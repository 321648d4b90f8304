//! Configuration management for folio-rs.
//!
//! Loads config from YAML files in standard locations. Every section is
//! optional; anything missing takes its default.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::reader::{ChunkBudget, ReaderSettings, DEFAULT_SAMPLE_RATE};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8780,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub host: String,
    pub tts_model: String,
    pub voice: String,
    pub summary_model: String,
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            host: "https://generativelanguage.googleapis.com".into(),
            tts_model: "gemini-2.5-flash-preview-tts".into(),
            voice: "Zephyr".into(),
            summary_model: "gemini-3-flash-preview".into(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub intro_max_chars: usize,
    pub body_max_chars: usize,
    pub prefetch_depth: usize,
    pub sample_rate: u32,
    pub poll_interval_ms: u64,
    /// Per-chunk request timeout against `/api/tts`.
    pub request_timeout_secs: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            intro_max_chars: 200,
            body_max_chars: 4000,
            prefetch_depth: 2,
            sample_rate: DEFAULT_SAMPLE_RATE,
            poll_interval_ms: 50,
            request_timeout_secs: 120,
        }
    }
}

impl ReaderConfig {
    pub fn settings(&self) -> ReaderSettings {
        ReaderSettings {
            budget: ChunkBudget {
                intro_max_chars: self.intro_max_chars,
                body_max_chars: self.body_max_chars,
            },
            prefetch_depth: self.prefetch_depth,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Text sent to `/api/tts` is cut to this many characters.
    pub max_tts_chars: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_tts_chars: 40000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("folio"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub gemini: GeminiConfig,
    pub reader: ReaderConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/folio/config.yaml
    /// 3. /etc/folio/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/folio/config.yaml")),
                Some(PathBuf::from("/etc/folio/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8780);
        assert_eq!(config.gemini.voice, "Zephyr");
        assert_eq!(config.gemini.tts_model, "gemini-2.5-flash-preview-tts");
        assert_eq!(config.reader.intro_max_chars, 200);
        assert_eq!(config.reader.body_max_chars, 4000);
        assert_eq!(config.reader.prefetch_depth, 2);
        assert_eq!(config.api.max_tts_chars, 40000);
        assert!(config.storage.data_dir.ends_with("folio"));
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let config = Config::parse(
            "server:\n  port: 9000\nreader:\n  body_max_chars: 1500\n  poll_interval_ms: 20\n",
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.reader.body_max_chars, 1500);
        assert_eq!(config.reader.intro_max_chars, 200);

        let settings = config.reader.settings();
        assert_eq!(settings.budget.body_max_chars, 1500);
        assert_eq!(settings.poll_interval, Duration::from_millis(20));
    }

    #[test]
    fn test_load_explicit_path_and_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "api:\n  max_tts_chars: 10\n").unwrap();
        assert_eq!(Config::load(Some(&path)).api.max_tts_chars, 10);

        std::fs::write(&path, "api: [not, a, map]\n").unwrap();
        assert_eq!(Config::load(Some(&path)).api.max_tts_chars, 40000);

        let missing = dir.path().join("nope.yaml");
        assert_eq!(Config::load(Some(&missing)).server.port, 8780);
    }
}
