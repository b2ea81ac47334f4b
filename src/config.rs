use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use libc::c_int;

use crate::error_log::ErrorLog;
use crate::libxml2::{
    XML_PARSE_BIG_LINES, XML_PARSE_HUGE, XML_PARSE_NOBLANKS, XML_PARSE_NOCDATA, XML_PARSE_NOENT,
    XML_PARSE_NONET, XML_PARSE_RECOVER,
};

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Prefix of the environment variables read by [`ConfigManager`]
pub const ENV_PREFIX: &str = "SCHEMATRON_PROXY_";

/// Main library configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub parser: ParserOptions,
    pub validation: ValidationOptions,
}

/// Options handed to the libxml2 parser
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParserOptions {
    /// Try to build a tree from broken XML
    pub recover: bool,
    /// Substitute entity references with their replacement text
    pub resolve_entities: bool,
    /// Drop whitespace-only text between elements
    pub remove_blank_text: bool,
    /// Forbid network access while loading documents and DTDs
    pub no_network: bool,
    /// Lift libxml2's hard-coded size and depth limits
    pub huge_tree: bool,
    /// Merge CDATA sections into ordinary text
    pub strip_cdata: bool,
    /// Report line numbers above 65535
    pub big_lines: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            recover: false,
            resolve_entities: false,
            remove_blank_text: false,
            no_network: true,
            huge_tree: false,
            strip_cdata: false,
            big_lines: true,
        }
    }
}

impl ParserOptions {
    /// libxml2 `xmlParserOption` flags for these options
    pub fn to_flags(&self) -> c_int {
        [
            (self.recover, XML_PARSE_RECOVER),
            (self.resolve_entities, XML_PARSE_NOENT),
            (self.remove_blank_text, XML_PARSE_NOBLANKS),
            (self.no_network, XML_PARSE_NONET),
            (self.huge_tree, XML_PARSE_HUGE),
            (self.strip_cdata, XML_PARSE_NOCDATA),
            (self.big_lines, XML_PARSE_BIG_LINES),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .fold(0, |flags, (_, flag)| flags | flag)
    }
}

/// Validation-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationOptions {
    /// Maximum number of diagnostics kept in a validator's error log
    pub max_log_entries: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            max_log_entries: ErrorLog::DEFAULT_CAPACITY,
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment
    pub async fn load_config(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path).await?,
            None => Self::find_config_file().await?.unwrap_or_default(),
        };

        config = Self::apply_environment_overrides(config)?;
        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                let config: Config = toml::from_str(&content)?;
                Ok(config)
            }
            Some("json") => {
                let config: Config = serde_json::from_str(&content)?;
                Ok(config)
            }
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    let config: Config = serde_json::from_str(&content)?;
                    Ok(config)
                }
            }
        }
    }

    /// Find a configuration file in the current directory
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "schematron-proxy.toml",
            "schematron-proxy.json",
            ".schematron-proxy.toml",
            ".schematron-proxy.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if tokio::fs::try_exists(&path).await? {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        let parser = &mut config.parser;
        let flags: [(&str, &mut bool); 7] = [
            ("RECOVER", &mut parser.recover),
            ("RESOLVE_ENTITIES", &mut parser.resolve_entities),
            ("REMOVE_BLANK_TEXT", &mut parser.remove_blank_text),
            ("NO_NETWORK", &mut parser.no_network),
            ("HUGE_TREE", &mut parser.huge_tree),
            ("STRIP_CDATA", &mut parser.strip_cdata),
            ("BIG_LINES", &mut parser.big_lines),
        ];
        for (name, field) in flags {
            if let Some(value) = Self::env_value(env, name)? {
                *field = value;
            }
        }

        if let Some(max_log_entries) = Self::env_value(env, "MAX_LOG_ENTRIES")? {
            config.validation.max_log_entries = max_log_entries;
        }

        Ok(config)
    }

    fn env_value<T: FromStr>(env: &impl EnvProvider, name: &str) -> Result<Option<T>> {
        let key = format!("{ENV_PREFIX}{name}");
        match env.get(&key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                ConfigError::Environment(format!("Invalid {} value: {}", key, raw))
            }),
        }
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.validation.max_log_entries == 0 {
            return Err(ConfigError::Validation(
                "Error log capacity must be greater than 0".to_string(),
            ));
        }

        if config.validation.max_log_entries > 1_000_000 {
            return Err(ConfigError::Validation(
                "Error log capacity cannot exceed 1000000".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Mock environment variable provider for testing
    #[derive(Default)]
    struct MockEnvProvider {
        vars: HashMap<String, String>,
    }

    impl MockEnvProvider {
        fn new() -> Self {
            Self {
                vars: HashMap::new(),
            }
        }

        fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
            self.vars.insert(key.into(), value.into());
        }
    }

    impl EnvProvider for MockEnvProvider {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).cloned()
        }
    }

    #[tokio::test]
    async fn test_default_config() {
        let config = Config::default();

        assert!(!config.parser.recover);
        assert!(!config.parser.resolve_entities);
        assert!(config.parser.no_network);
        assert!(config.parser.big_lines);
        assert_eq!(config.validation.max_log_entries, 1000);
        assert!(ConfigManager::validate_config(&config).is_ok());
    }

    #[test]
    fn test_parser_flags() {
        let options = ParserOptions::default();
        assert_eq!(options.to_flags(), XML_PARSE_NONET | XML_PARSE_BIG_LINES);

        let options = ParserOptions {
            recover: true,
            resolve_entities: true,
            remove_blank_text: true,
            no_network: false,
            huge_tree: true,
            strip_cdata: true,
            big_lines: false,
        };
        assert_eq!(
            options.to_flags(),
            XML_PARSE_RECOVER
                | XML_PARSE_NOENT
                | XML_PARSE_NOBLANKS
                | XML_PARSE_HUGE
                | XML_PARSE_NOCDATA
        );
    }

    #[tokio::test]
    async fn test_load_toml_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let toml_content = r#"
[parser]
remove_blank_text = true
huge_tree = true

[validation]
max_log_entries = 50
"#;
        fs::write(&config_path, toml_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();

        assert!(config.parser.remove_blank_text);
        assert!(config.parser.huge_tree);
        // Unset fields keep their defaults
        assert!(config.parser.no_network);
        assert_eq!(config.validation.max_log_entries, 50);
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let json_content = r#"{
  "parser": { "recover": true, "no_network": false },
  "validation": { "max_log_entries": 10 }
}"#;
        fs::write(&config_path, json_content).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();

        assert!(config.parser.recover);
        assert!(!config.parser.no_network);
        assert_eq!(config.validation.max_log_entries, 10);
    }

    #[tokio::test]
    async fn test_load_without_extension_falls_back_to_json() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config");
        fs::write(&config_path, r#"{"parser": {"strip_cdata": true}}"#).unwrap();

        let config = ConfigManager::load_from_file(&config_path).await.unwrap();
        assert!(config.parser.strip_cdata);
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "parser: {}").unwrap();

        let result = ConfigManager::load_from_file(&config_path).await;
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(ext)) if ext == "yaml"));
    }

    #[tokio::test]
    async fn test_load_config_from_explicit_path() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[validation]\nmax_log_entries = 0\n").unwrap();

        let result = ConfigManager::load_config(Some(&config_path)).await;
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let mut env = MockEnvProvider::new();
        env.set("SCHEMATRON_PROXY_RECOVER", "true");
        env.set("SCHEMATRON_PROXY_NO_NETWORK", "false");
        env.set("SCHEMATRON_PROXY_MAX_LOG_ENTRIES", "25");

        let config =
            ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap();

        assert!(config.parser.recover);
        assert!(!config.parser.no_network);
        assert!(!config.parser.huge_tree);
        assert_eq!(config.validation.max_log_entries, 25);
    }

    #[test]
    fn test_invalid_environment_value() {
        let mut env = MockEnvProvider::new();
        env.set("SCHEMATRON_PROXY_HUGE_TREE", "sometimes");

        let result = ConfigManager::apply_environment_overrides_with(&env, Config::default());
        match result {
            Err(ConfigError::Environment(message)) => {
                assert!(message.contains("SCHEMATRON_PROXY_HUGE_TREE"));
            }
            other => panic!("Expected environment error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_environment_keeps_config() {
        let env = MockEnvProvider::default();
        let config =
            ConfigManager::apply_environment_overrides_with(&env, Config::default()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.validation.max_log_entries = 2_000_000;
        assert!(ConfigManager::validate_config(&config).is_err());

        config.validation.max_log_entries = 1_000_000;
        assert!(ConfigManager::validate_config(&config).is_ok());
    }
}
