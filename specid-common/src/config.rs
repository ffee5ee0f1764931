//! Configuration loading and resolution
//!
//! The proxy is configured from a single TOML file. Every section is optional
//! and falls back to compiled defaults, so a missing file only produces a
//! warning. Secrets can be supplied through environment variables instead of
//! being written to disk.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "SPECID_CONFIG";

/// Classifier backends known to the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// Nature Identification API (multi-source identify)
    Nia,
    /// Pl@ntNet identification API
    #[serde(rename = "plantnet")]
    PlantNet,
    /// Regional observation platform classifier
    Regional,
}

impl ClassifierKind {
    /// All kinds, first-listed is the built-in default
    pub const ALL: [ClassifierKind; 3] =
        [ClassifierKind::Nia, ClassifierKind::PlantNet, ClassifierKind::Regional];

    /// Path segment / configuration key for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierKind::Nia => "nia",
            ClassifierKind::PlantNet => "plantnet",
            ClassifierKind::Regional => "regional",
        }
    }

    /// Parse a path segment, case-insensitively
    pub fn from_segment(segment: &str) -> Option<Self> {
        let segment = segment.trim().trim_matches('/');
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(segment))
    }
}

impl Default for ClassifierKind {
    fn default() -> Self {
        ClassifierKind::Nia
    }
}

impl std::fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub routing: RoutingConfig,
    pub classify: ClassifyConfig,
    pub images: ImagesConfig,
    pub timeouts: TimeoutsConfig,
    pub output: OutputConfig,
    pub cleaner: CleanerConfig,
    /// Species warehouse used for taxonomy enrichment (disabled when absent)
    pub warehouse: Option<WarehouseConfig>,
    pub classifiers: ClassifiersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5730".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Adapter selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Classifier used for an empty or unknown path segment
    pub default_classifier: ClassifierKind,
    /// Reject unknown path segments with 404 instead of falling back
    pub strict_routes: bool,
}

/// Suggestion filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Probability below which suggestions are discarded (0.0 to 1.0)
    pub threshold: f64,
    /// Maximum number of suggestions returned
    pub suggestions: usize,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            suggestions: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Folder holding uploaded images and remote downloads
    pub interim_folder: PathBuf,
    pub download_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    /// Remote images larger than this are refused
    pub max_download_bytes: u64,
    /// Leave downloaded images in the interim folder after classification
    pub keep_downloads: bool,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            interim_folder: default_interim_folder(),
            download_timeout_secs: 50,
            probe_timeout_secs: 10,
            max_download_bytes: 20 * 1024 * 1024,
            keep_downloads: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub upstream_secs: u64,
    pub taxonomy_secs: u64,
    pub cleaner_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            upstream_secs: 60,
            taxonomy_secs: 30,
            cleaner_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Attach the raw upstream payload unless a request says otherwise
    pub raw_default: bool,
}

/// Record Cleaner verification service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    pub enable: bool,
    /// Service URL without trailing slash
    pub url: String,
    pub username: String,
    pub password: String,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enable: false,
            url: "https://record-cleaner.brc.ac.uk".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

/// Connection to the species warehouse
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Warehouse root URL including trailing slash
    pub base_url: String,
    /// Read authorisation token
    pub auth_token: String,
    /// Nonce paired with `auth_token`
    pub nonce: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifiersConfig {
    pub nia: NiaConfig,
    pub plantnet: PlantNetConfig,
    pub regional: RegionalConfig,
}

/// How the generic classifier receives its body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// One file part per image
    #[default]
    Multipart,
    /// Form fields with images given as local paths
    UrlEncoded,
}

/// Nature Identification API; URL is `{base_url}/{version}/{service}/{token}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NiaConfig {
    pub base_url: String,
    pub version: String,
    pub service: String,
    /// Token tuning results to a region
    pub token: String,
    pub username: String,
    pub password: String,
    /// Classifier id reported in responses
    pub id: String,
    pub body_format: BodyFormat,
    pub raw_default: Option<bool>,
}

impl Default for NiaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://multi-source.identify.biodiversityanalysis.eu".to_string(),
            version: "v2".to_string(),
            service: "observation/identify/token".to_string(),
            token: String::new(),
            username: String::new(),
            password: String::new(),
            id: String::new(),
            body_format: BodyFormat::Multipart,
            raw_default: None,
        }
    }
}

/// Pl@ntNet; URL is `{base_url}/{version}/{service}/{project}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantNetConfig {
    pub base_url: String,
    pub version: String,
    pub service: String,
    /// Flora to search, e.g. "weurope", "canada" or "all"
    pub project: String,
    pub api_key: String,
    pub id: String,
    pub raw_default: Option<bool>,
}

impl Default for PlantNetConfig {
    fn default() -> Self {
        Self {
            base_url: "https://my-api.plantnet.org".to_string(),
            version: "v2".to_string(),
            service: "identify".to_string(),
            project: "all".to_string(),
            api_key: String::new(),
            id: String::new(),
            raw_default: None,
        }
    }
}

/// Regional observation classifier; URL is `{base_url}/{version}/{service}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionalConfig {
    pub base_url: String,
    pub version: String,
    pub service: String,
    /// Token endpoint, defaults to `{base_url}/token`
    pub token_url: Option<String>,
    pub username: String,
    pub password: String,
    pub client_id: Option<String>,
    pub id: String,
    pub raw_default: Option<bool>,
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from a file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
        Self::from_toml_str(&content)
    }

    /// Replace secrets with values from the environment when present
    pub fn apply_env_overrides(&mut self) {
        override_from_env("SPECID_CLEANER_PASSWORD", &mut self.cleaner.password);
        override_from_env("SPECID_NIA_PASSWORD", &mut self.classifiers.nia.password);
        override_from_env("SPECID_PLANTNET_API_KEY", &mut self.classifiers.plantnet.api_key);
        override_from_env("SPECID_REGIONAL_PASSWORD", &mut self.classifiers.regional.password);
        if let Some(warehouse) = self.warehouse.as_mut() {
            override_from_env("SPECID_WAREHOUSE_AUTH_TOKEN", &mut warehouse.auth_token);
        }
    }

    /// Reject configurations the proxy cannot operate with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.classify.threshold) {
            return Err(Error::Config(format!(
                "classify.threshold must be between 0.0 and 1.0, got {}",
                self.classify.threshold
            )));
        }
        if self.cleaner.enable {
            if self.cleaner.url.trim().is_empty() {
                return Err(Error::Config(
                    "cleaner.url is needed to use Record Cleaner checks".to_string(),
                ));
            }
            if self.cleaner.username.trim().is_empty() {
                return Err(Error::Config(
                    "cleaner.username is needed to use Record Cleaner checks".to_string(),
                ));
            }
            if self.cleaner.password.is_empty() {
                return Err(Error::Config(
                    "A password is needed to use Record Cleaner checks \
                     (cleaner.password or SPECID_CLEANER_PASSWORD)"
                        .to_string(),
                ));
            }
        }
        if let Some(warehouse) = &self.warehouse {
            if warehouse.base_url.trim().is_empty() {
                return Err(Error::Config("warehouse.base_url must not be empty".to_string()));
            }
        }
        Ok(())
    }
}

fn override_from_env(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        if !value.is_empty() {
            *target = value;
        }
    }
}

/// Resolve the configuration file path
///
/// Priority:
/// 1. Command-line argument
/// 2. `SPECID_CONFIG` environment variable
/// 3. `<config dir>/specid/specid-proxy.toml`
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    default_config_path()
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("specid").join("specid-proxy.toml"))
        .unwrap_or_else(|| PathBuf::from("specid-proxy.toml"))
}

fn default_interim_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("specid").join("interim"))
        .unwrap_or_else(|| PathBuf::from("./specid_data/interim"))
}

/// Resolve, load, override and validate in one step
pub fn load_config(cli_arg: Option<&Path>) -> Result<(PathBuf, TomlConfig)> {
    let path = resolve_config_path(cli_arg);
    let mut config = TomlConfig::load(&path)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok((path, config))
}
