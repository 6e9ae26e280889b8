use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use courier::catalog::{ModelCatalog, ModelDeployment};
use courier::discovery::registry::ToolProviderConfig;
use courier::discovery::FallbackPolicy;
use courier::dispatcher::DEFAULT_MAX_TOOL_ROUNDS;
use courier::providers::openai::{OpenAiProviderConfig, OPENAI_HOST};
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Path of an optional TOML file layered under the environment
pub const CONFIG_PATH_VAR: &str = "COURIER_CONFIG";

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_provider_timeout")]
        timeout_secs: u64,
    },
}

impl ProviderSettings {
    pub fn into_config(self) -> OpenAiProviderConfig {
        match self {
            ProviderSettings::OpenAi {
                host,
                api_key,
                timeout_secs,
            } => OpenAiProviderConfig {
                host,
                api_key,
                timeout: Duration::from_secs(timeout_secs),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelSettings {
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub default_reasoning_effort: Option<String>,
    #[serde(default)]
    pub deployments: Vec<ModelDeployment>,
}

impl ModelSettings {
    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog::new(self.deployments.clone())
            .with_default_model(self.default_model.clone())
            .with_default_reasoning_effort(self.default_reasoning_effort.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// Template file replacing the built-in system prompt
    #[serde(default)]
    pub system_prompt: Option<PathBuf>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ArtifactSettings {
    #[serde(default = "default_artifact_root")]
    pub root: PathBuf,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            root: default_artifact_root(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub api_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToolSettings {
    #[serde(default)]
    pub fallback: FallbackPolicy,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub providers: Vec<ToolProviderConfig>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            fallback: FallbackPolicy::default(),
            connect_timeout_secs: default_connect_timeout(),
            providers: Vec::new(),
        }
    }
}

impl ToolSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub models: ModelSettings,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub artifacts: ArtifactSettings,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub tools: ToolSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let file = std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from);
        Self::load(file)
    }

    pub fn load(file: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("provider.host", default_openai_host())?
            .set_default("provider.timeout_secs", default_provider_timeout())?
            .set_default("tools.connect_timeout_secs", default_connect_timeout())?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("COURIER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("auth.api_keys"),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // "missing field `type`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    let path = match field {
                        "type" | "api_key" => format!("provider.{}", field),
                        other => other.to_string(),
                    };
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&path),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_openai_host() -> String {
    OPENAI_HOST.to_string()
}

fn default_provider_timeout() -> u64 {
    600
}

fn default_max_tool_rounds() -> usize {
    DEFAULT_MAX_TOOL_ROUNDS
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from("./artifacts")
}

fn default_connect_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("COURIER_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();
        env::set_var("COURIER_PROVIDER__TYPE", "openai");
        env::set_var("COURIER_PROVIDER__API_KEY", "test-key");

        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.chat.max_tool_rounds, DEFAULT_MAX_TOOL_ROUNDS);
        assert_eq!(settings.artifacts.root, PathBuf::from("./artifacts"));
        assert!(settings.auth.api_keys.is_empty());
        assert_eq!(settings.tools.fallback, FallbackPolicy::AnyError);
        assert_eq!(settings.tools.connect_timeout(), Duration::from_secs(30));
        assert!(settings.models.deployments.is_empty());

        let config = settings.provider.into_config();
        assert_eq!(config.host, "https://api.openai.com");
        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.timeout, Duration::from_secs(600));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_missing_api_key() {
        clean_env();
        env::set_var("COURIER_PROVIDER__TYPE", "openai");

        let err = Settings::load(None).unwrap_err();
        match err {
            ConfigError::MissingEnvVar { env_var } => {
                assert_eq!(env_var, "COURIER_PROVIDER__API_KEY")
            }
            other => panic!("expected MissingEnvVar, got {:?}", other),
        }

        clean_env();
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("COURIER_SERVER__PORT", "8080");
        env::set_var("COURIER_PROVIDER__TYPE", "openai");
        env::set_var("COURIER_PROVIDER__API_KEY", "test-key");
        env::set_var("COURIER_PROVIDER__HOST", "http://localhost:11434");
        env::set_var("COURIER_MODELS__DEFAULT_MODEL", "fast");
        env::set_var("COURIER_TOOLS__FALLBACK", "skip_on_timeout");
        env::set_var("COURIER_AUTH__API_KEYS", "k1,k2");

        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.models.catalog().default_model(), "fast");
        assert_eq!(settings.tools.fallback, FallbackPolicy::SkipOnTimeout);
        assert_eq!(settings.auth.api_keys, vec!["k1", "k2"]);
        assert_eq!(settings.provider.into_config().host, "http://localhost:11434");

        clean_env();
    }

    #[test]
    #[serial]
    fn test_toml_file_with_deployments_and_providers() {
        clean_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(
            &path,
            r#"
[provider]
type = "openai"
api_key = "file-key"

[models]
default_reasoning_effort = "high"

[[models.deployments]]
id = "fast"
model = "gpt-4o-mini"
temperature = 0.2

[[tools.providers]]
name = "search"
url = "https://search.example.com/mcp"
"#,
        )
        .unwrap();
        env::set_var("COURIER_PROVIDER__API_KEY", "env-key");

        let settings = Settings::load(Some(path)).unwrap();
        let summary = settings.models.catalog().summary();
        assert_eq!(summary.available_models.len(), 1);
        assert_eq!(summary.available_models["fast"].temperature, Some(0.2));
        assert_eq!(summary.default_reasoning_effort, "high");
        assert_eq!(summary.default_model, "gpt-4o");
        assert_eq!(settings.tools.providers[0].name, "search");
        assert_eq!(settings.provider.into_config().api_key, "env-key");

        clean_env();
    }

    #[test]
    fn test_socket_addr_conversion() {
        let server_settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        let addr = server_settings.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");

        let bad = ServerSettings {
            host: "not a host".to_string(),
            port: 3000,
        };
        assert!(bad.socket_addr().is_err());
    }
}
