use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TriageError};

/// Environment variable holding the vector index base URL.
pub const ENV_ENDEE_HOST: &str = "ENDEE_HOST";
/// Environment variable holding the optional vector index API key.
pub const ENV_ENDEE_API_KEY: &str = "ENDEE_API_KEY";
/// Environment variable overriding the API server port.
pub const ENV_PORT: &str = "TRIAGE_PORT";

/// Top-level configuration for the triage service.
///
/// Loaded from a TOML file, then overlaid with environment variables. Each
/// section corresponds to one collaborator of the classification core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub endee: EndeeConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl TriageConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TriageConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TriageError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary key lookup.
    ///
    /// Empty values are ignored so that `ENDEE_API_KEY=` does not attach an
    /// empty Authorization header.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = lookup(ENV_ENDEE_HOST) {
            self.endee.host = host;
        }
        if let Some(key) = lookup(ENV_ENDEE_API_KEY) {
            self.endee.api_key = Some(key);
        }
        if let Some(port) = lookup(ENV_PORT) {
            match port.parse::<u16>() {
                Ok(p) => self.general.port = p,
                Err(_) => warn!(value = %port, "Ignoring invalid {}", ENV_PORT),
            }
        }
    }
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Address the API server binds to.
    pub host: String,
    /// API server port.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// External vector index connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndeeConfig {
    /// Base URL of the index service.
    pub host: String,
    /// Value sent verbatim in the `Authorization` header, if set.
    pub api_key: Option<String>,
    /// Index holding the labeled ticket vectors.
    pub index_name: String,
    /// Vector dimension of the index.
    pub dimension: usize,
    /// Distance metric: cosine, euclidean, dot.
    pub metric: String,
    /// Timeout for create/search/stats/delete calls.
    pub metadata_timeout_secs: u64,
    /// Timeout for batch inserts.
    pub insert_timeout_secs: u64,
}

impl Default for EndeeConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:8080".to_string(),
            api_key: None,
            index_name: "support_tickets".to_string(),
            dimension: 384,
            metric: "cosine".to_string(),
            metadata_timeout_secs: 10,
            insert_timeout_secs: 30,
        }
    }
}

/// One category → team assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub category: String,
    pub team: String,
}

impl RouteConfig {
    fn new(category: &str, team: &str) -> Self {
        Self {
            category: category.to_string(),
            team: team.to_string(),
        }
    }
}

/// Classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Neighbors retrieved per classification.
    pub top_k: usize,
    /// Largest `top_k` a caller may request per classification.
    pub max_top_k: usize,
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub model_dir: String,
    /// Team for categories without a route.
    pub default_team: String,
    /// Category routes in registration order.
    pub routes: Vec<RouteConfig>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_top_k: 50,
            model_dir: "./dataset/minilm_model".to_string(),
            default_team: "General Support".to_string(),
            routes: vec![
                RouteConfig::new("Authentication", "Security Team"),
                RouteConfig::new("Billing", "Billing Team"),
                RouteConfig::new("Technical", "Technical Support"),
                RouteConfig::new("Feature Request", "Product Team"),
                RouteConfig::new("General Inquiry", "Customer Support"),
            ],
        }
    }
}

/// Local persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding ticket labels keyed by vector id.
    pub metadata_db: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            metadata_db: "./data/tickets.db".to_string(),
        }
    }
}
