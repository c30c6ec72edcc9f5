//! Configuration loading from ~/.roxy/config.toml.

use policy::Policy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable holding the API key when the config leaves it empty.
pub const API_KEY_ENV: &str = "ROXY_API_KEY";

/// Environment variable overriding the root directory.
pub const HOME_ENV: &str = "ROXY_HOME";

const ROOT_DIR: &str = ".roxy";
const CONFIG_FILE: &str = "config.toml";
const WORKSPACE_DIR: &str = "workspace";
const SESSIONS_DIR: &str = "sessions";

const DEFAULT_PROVIDER: &str = "deepseek";
const DEFAULT_MODEL: &str = "deepseek/deepseek-chat";
const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";

/// Files created in a fresh workspace.
const WORKSPACE_TEMPLATES: &[(&str, &str)] = &[
    (
        "USER.md",
        "# User Information\n\nThis file contains user-specific information and preferences.\n",
    ),
    (
        "MEMORY.md",
        "# Memory\n\nThis file stores important memories and learnings.\n",
    ),
    (
        "SOUL.md",
        "# Soul\n\nThis file represents the core identity and values.\n",
    ),
    (
        "AGENT.md",
        "# Agent Configuration\n\nThis file contains agent-specific configurations and behaviors.\n",
    ),
];

/// Locations of everything roxy keeps on disk.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$ROXY_HOME`, or `~/.roxy`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Some(root) = std::env::var_os(HOME_ENV) {
            return Ok(Self::new(root));
        }
        dirs::home_dir()
            .map(|home| Self::new(home.join(ROOT_DIR)))
            .ok_or(ConfigError::NoHome)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    pub fn default_workspace(&self) -> PathBuf {
        self.root.join(WORKSPACE_DIR)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Workspace directory. Defaults to `<root>/workspace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,

    #[serde(default)]
    pub agent: AgentConfig,

    /// Completion endpoints by name.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Capability rules for the built-in tools.
    #[serde(default)]
    pub policy: Policy,

    /// Separate policy file, used in place of `[policy]` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_file: Option<PathBuf>,
}

/// Turn loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// `provider/model`.
    pub model: String,
    pub max_iterations: usize,
    pub stream: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_iterations: runtime::DEFAULT_MAX_ITERATIONS,
            stream: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
}

/// The endpoint a chat session talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// The configuration written by `roxy onboard`.
    pub fn default_config(paths: &Paths) -> Self {
        let provider = ProviderConfig {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        };
        Self {
            workspace: Some(paths.default_workspace()),
            agent: AgentConfig::default(),
            providers: BTreeMap::from([(DEFAULT_PROVIDER.to_string(), provider)]),
            policy: Policy::default(),
            policy_file: None,
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn workspace(&self, paths: &Paths) -> PathBuf {
        self.workspace
            .clone()
            .unwrap_or_else(|| paths.default_workspace())
    }

    /// The effective tool policy.
    pub fn policy(&self) -> policy::Result<Policy> {
        match &self.policy_file {
            Some(path) => Policy::load(path),
            None => Ok(self.policy.clone()),
        }
    }

    /// Resolve `agent.model` against the provider table.
    ///
    /// `env_key` is used when the provider's `api_key` is empty.
    pub fn endpoint(&self, env_key: Option<String>) -> Result<Endpoint, ConfigError> {
        let (provider, model) = self
            .agent
            .model
            .split_once('/')
            .filter(|(p, m)| !p.is_empty() && !m.is_empty())
            .ok_or_else(|| ConfigError::MalformedModel(self.agent.model.clone()))?;

        let settings = self
            .providers
            .get(provider)
            .ok_or_else(|| ConfigError::UnknownProvider(provider.to_string()))?;

        let api_key = Some(settings.api_key.clone())
            .filter(|k| !k.trim().is_empty())
            .or(env_key.filter(|k| !k.trim().is_empty()))
            .ok_or_else(|| ConfigError::MissingApiKey(provider.to_string()))?;

        Ok(Endpoint {
            provider: provider.to_string(),
            model: model.to_string(),
            api_key,
            base_url: settings.base_url.clone(),
        })
    }
}

/// Write the default config unless one exists. Returns whether it was written.
pub fn write_default_config(paths: &Paths) -> Result<bool, ConfigError> {
    let path = paths.config_file();
    if path.exists() {
        return Ok(false);
    }
    fs::create_dir_all(paths.root())?;
    fs::write(&path, Config::default_config(paths).to_toml()?)?;
    Ok(true)
}

/// Create the workspace and its template files, keeping existing ones.
/// Returns the files that were created.
pub fn init_workspace(dir: &Path) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut created = Vec::new();
    for (name, content) in WORKSPACE_TEMPLATES {
        let path = dir.join(name);
        if !path.exists() {
            fs::write(&path, content)?;
            created.push(path);
        }
    }
    Ok(created)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("config not found at {}. Run 'roxy onboard' first", .0.display())]
    Missing(PathBuf),

    #[error("cannot locate the home directory; set {HOME_ENV}")]
    NoHome,

    #[error("agent.model must look like \"provider/model\", got {0:?}")]
    MalformedModel(String),

    #[error("provider {0:?} is not configured under [providers]")]
    UnknownProvider(String),

    #[error("no API key for provider {0:?}: set providers.{0}.api_key or {API_KEY_ENV}")]
    MissingApiKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy::{CapabilityKind, CapabilityRequest};

    const SAMPLE: &str = r#"
workspace = "/tmp/roxy-ws"

[agent]
model = "openai/gpt-4o-mini"
max_iterations = 4

[providers.openai]
api_key = "sk-test"
base_url = "https://api.openai.com/v1"

[policy.deny]
kinds = ["exec"]
"#;

    #[test]
    fn parses_full_config() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.workspace, Some(PathBuf::from("/tmp/roxy-ws")));
        assert_eq!(config.agent.max_iterations, 4);
        assert!(config.agent.stream);
        assert!(config.policy.deny.kinds.contains(&CapabilityKind::Exec));
        assert!(!config.policy().unwrap().check(&CapabilityRequest::exec("ls")).is_allowed());

        let endpoint = config.endpoint(None).unwrap();
        assert_eq!(
            endpoint,
            Endpoint {
                provider: "openai".into(),
                model: "gpt-4o-mini".into(),
                api_key: "sk-test".into(),
                base_url: "https://api.openai.com/v1".into(),
            }
        );
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.agent.model, DEFAULT_MODEL);
        assert_eq!(config.agent.max_iterations, 7);
        assert!(config.workspace.is_none());
        assert_eq!(
            config.workspace(&Paths::new("/r")),
            PathBuf::from("/r/workspace")
        );
    }

    #[test]
    fn env_key_fills_empty_api_key() {
        let config = Config::default_config(&Paths::new("/r"));
        assert!(matches!(
            config.endpoint(None),
            Err(ConfigError::MissingApiKey(p)) if p == "deepseek"
        ));

        let endpoint = config.endpoint(Some("sk-env".into())).unwrap();
        assert_eq!(endpoint.api_key, "sk-env");
        assert_eq!(endpoint.model, "deepseek-chat");
    }

    #[test]
    fn rejects_bad_model_and_unknown_provider() {
        let mut config = Config::default_config(&Paths::new("/r"));
        config.agent.model = "no-slash".into();
        assert!(matches!(
            config.endpoint(Some("k".into())),
            Err(ConfigError::MalformedModel(_))
        ));

        config.agent.model = "mystery/model".into();
        assert!(matches!(
            config.endpoint(Some("k".into())),
            Err(ConfigError::UnknownProvider(p)) if p == "mystery"
        ));
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let paths = Paths::new("/r");
        let text = Config::default_config(&paths).to_toml().unwrap();
        let parsed = Config::parse(&text).unwrap();
        assert_eq!(parsed.providers[DEFAULT_PROVIDER].base_url, DEFAULT_BASE_URL);
        assert_eq!(parsed.workspace(&paths), paths.default_workspace());
    }

    #[test]
    fn onboarding_keeps_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());

        assert!(write_default_config(&paths).unwrap());
        assert!(!write_default_config(&paths).unwrap());

        let workspace = paths.default_workspace();
        fs::create_dir_all(&workspace).unwrap();
        fs::write(workspace.join("USER.md"), "mine").unwrap();

        let created = init_workspace(&workspace).unwrap();
        assert_eq!(created.len(), 3);
        assert_eq!(fs::read_to_string(workspace.join("USER.md")).unwrap(), "mine");
        assert!(init_workspace(&workspace).unwrap().is_empty());
    }

    #[test]
    fn policy_file_replaces_inline_policy() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("policy.toml");
        fs::write(&file, "[allow]\nexec = [\"git\"]\n").unwrap();

        let mut config = Config::parse(SAMPLE).unwrap();
        config.policy_file = Some(file.clone());
        let policy = config.policy().unwrap();
        assert!(policy.check(&CapabilityRequest::exec("git log")).is_allowed());
        assert!(!policy.check(&CapabilityRequest::exec("ls")).is_allowed());

        config.policy_file = Some(dir.path().join("absent.toml"));
        assert!(matches!(config.policy(), Err(policy::Error::Io { .. })));
    }

    #[test]
    fn missing_config_points_to_onboard() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("config.toml")).unwrap_err();
        assert!(err.to_string().contains("roxy onboard"));
    }
}
