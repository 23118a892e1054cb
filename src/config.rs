//! Configuration for agentcorp.
//!
//! Process settings come from environment variables:
//! - `AGENTCORP_CONFIG` - Optional. Path to an agent definition (JSON).
//! - `AGENTCORP_VERBOSE` - Optional. `1`/`true` raises the default log level to debug.
//! - `AGENTCORP_MAX_TOOL_ROUNDS` - Optional. Cap on tool-calling rounds per turn. Defaults to `25`.
//! - `AGENTCORP_MAX_MESSAGES` - Optional. Memory ledger message cap. Defaults to `100`.
//! - `AGENTCORP_PROMPTS_DIR` - Optional. Directory of markdown prompts. Defaults to `prompts`.
//!
//! Agents are described by [`AgentConfig`] JSON files:
//!
//! ```json
//! {
//!   "name": "coder",
//!   "provider": "anthropic",
//!   "model": "claude-3-sonnet-20240229",
//!   "system_prompt": { "prompt": "programmer", "params": { "LANGUAGE": "Rust" } },
//!   "tools": ["filesys.read_file", "terminal.run_command"],
//!   "context_settings": { "workingdir": "/srv/project" }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agents::{Agent, DEFAULT_MAX_TOOL_ROUNDS};
use crate::llm::{AnthropicProvider, OpenAiProvider, Provider, ProviderKind, XaiProvider};
use crate::memory::{Memory, DEFAULT_MAX_MESSAGES};
use crate::pricing::PricingError;
use crate::prompts::{self, PromptError};
use crate::tools::ToolRegistry;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error(transparent)]
    Pricing(#[from] PricingError),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("API key not provided for provider {provider}. Set {env_var} or pass it explicitly.")]
    MissingApiKey { provider: String, env_var: String },

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid agent configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Agent definition to load at startup
    pub agent_config: Option<PathBuf>,

    /// Debug-level logging by default
    pub verbose: bool,

    pub max_tool_rounds: usize,

    pub max_messages: usize,

    /// Where `{name}.md` prompt templates live
    pub prompts_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_config: None,
            verbose: false,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            max_messages: DEFAULT_MAX_MESSAGES,
            prompts_dir: PathBuf::from("prompts"),
        }
    }
}

fn parse_count(name: &str, raw: Option<String>, default: usize) -> Result<usize, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(0) => Err(ConfigError::InvalidValue(
                name.to_string(),
                "must be at least 1".to_string(),
            )),
            Ok(n) => Ok(n),
            Err(e) => Err(ConfigError::InvalidValue(name.to_string(), e.to_string())),
        },
    }
}

fn parse_flag(name: &str, raw: Option<String>) -> Result<bool, ConfigError> {
    match raw.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "" | "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(name.to_string(), v)),
        },
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparseable numbers or flags.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            agent_config: lookup("AGENTCORP_CONFIG")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            verbose: parse_flag("AGENTCORP_VERBOSE", lookup("AGENTCORP_VERBOSE"))?,
            max_tool_rounds: parse_count(
                "AGENTCORP_MAX_TOOL_ROUNDS",
                lookup("AGENTCORP_MAX_TOOL_ROUNDS"),
                defaults.max_tool_rounds,
            )?,
            max_messages: parse_count(
                "AGENTCORP_MAX_MESSAGES",
                lookup("AGENTCORP_MAX_MESSAGES"),
                defaults.max_messages,
            )?,
            prompts_dir: lookup("AGENTCORP_PROMPTS_DIR")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.prompts_dir),
        })
    }
}

/// A system prompt given inline or as a named template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPromptSource {
    Text(String),
    Template {
        prompt: String,
        #[serde(default)]
        params: BTreeMap<String, String>,
    },
}

impl Default for SystemPromptSource {
    fn default() -> Self {
        SystemPromptSource::Text(String::new())
    }
}

impl SystemPromptSource {
    /// Produce the prompt text, loading templates from `prompts_dir`.
    pub fn resolve(&self, prompts_dir: &Path) -> Result<String, ConfigError> {
        match self {
            SystemPromptSource::Text(text) => Ok(text.clone()),
            SystemPromptSource::Template { prompt, params } => {
                let params: HashMap<String, String> =
                    params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                Ok(prompts::load_prompt(prompts_dir, prompt, &params)?.content)
            }
        }
    }
}

/// Serializable definition of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub model: String,
    pub provider: String,
    #[serde(default)]
    pub system_prompt: SystemPromptSource,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub context_settings: BTreeMap<String, String>,
}

impl AgentConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: None,
            description: None,
            model: model.into(),
            provider: provider.into(),
            system_prompt: SystemPromptSource::default(),
            tools: Vec::new(),
            context_settings: BTreeMap::new(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// Capture an agent's current definition. The system prompt is stored
    /// as its resolved text.
    pub fn from_agent(agent: &Agent) -> Self {
        Self {
            name: agent.name().map(str::to_string),
            description: agent.description().map(str::to_string),
            model: agent.provider().model().to_string(),
            provider: agent.provider().kind().as_str().to_string(),
            system_prompt: SystemPromptSource::Text(
                agent.memory().get_system_prompt().unwrap_or_default().to_string(),
            ),
            tools: agent.tools().names(),
            context_settings: agent
                .context()
                .settings()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Find the key for `kind`: explicit map first, then `{PROVIDER}_API_KEY`.
fn resolve_api_key<F>(
    provider_name: &str,
    kind: ProviderKind,
    api_keys: &HashMap<String, String>,
    env: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env_var = kind.api_key_env_var();
    api_keys
        .get(provider_name)
        .or_else(|| api_keys.get(kind.as_str()))
        .cloned()
        .or_else(|| env(&env_var))
        .filter(|key| !key.trim().is_empty())
        .ok_or(ConfigError::MissingApiKey {
            provider: provider_name.to_string(),
            env_var,
        })
}

fn build_provider(kind: ProviderKind, api_key: String, model: &str) -> Arc<dyn Provider> {
    match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(api_key, model)),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(api_key, model)),
        ProviderKind::Xai => Arc::new(XaiProvider::new(api_key, model)),
    }
}

/// Build an agent from its definition.
///
/// # Errors
/// - `UnsupportedProvider` for a provider without an adapter
/// - `MissingApiKey` when no key is passed or set in the environment
/// - `Pricing` when the model is not in the pricing table
/// - `Prompt` when a templated system prompt cannot be loaded
pub fn create_agent_from_config(
    config: &AgentConfig,
    api_keys: &HashMap<String, String>,
    registry: &ToolRegistry,
    settings: &Config,
) -> Result<Agent, ConfigError> {
    let kind = ProviderKind::parse(&config.provider)
        .ok_or_else(|| ConfigError::UnsupportedProvider(config.provider.clone()))?;
    let memory = Memory::new(kind.as_str(), &config.model)?.with_max_messages(settings.max_messages);
    let api_key = resolve_api_key(&config.provider, kind, api_keys, |var| std::env::var(var).ok())?;
    let system_prompt = config.system_prompt.resolve(&settings.prompts_dir)?;

    let provider = build_provider(kind, api_key, &config.model);
    let tools = registry.subset(&config.tools);
    let context_settings = config
        .context_settings
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut agent = Agent::with_memory(provider, memory, tools, context_settings)
        .with_system_prompt(system_prompt)
        .with_max_tool_rounds(settings.max_tool_rounds);
    if let Some(name) = &config.name {
        agent = agent.with_name(name.clone());
    }
    if let Some(description) = &config.description {
        agent = agent.with_description(description.clone());
    }

    tracing::info!(
        provider = %kind,
        model = %config.model,
        tools = agent.tools().len(),
        "Created agent {}",
        config.name.as_deref().unwrap_or("(unnamed)")
    );
    Ok(agent)
}

/// Load a JSON agent definition and build it.
pub fn load_agent_from_file(
    path: impl AsRef<Path>,
    api_keys: &HashMap<String, String>,
    registry: &ToolRegistry,
    settings: &Config,
) -> Result<Agent, ConfigError> {
    let config = AgentConfig::from_json_file(path)?;
    create_agent_from_config(&config, api_keys, registry, settings)
}

/// Write an agent's current definition to a JSON file.
pub fn save_agent_config(agent: &Agent, path: impl AsRef<Path>) -> Result<(), ConfigError> {
    AgentConfig::from_agent(agent).to_json_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn keys() -> HashMap<String, String> {
        let mut keys = HashMap::new();
        keys.insert("openai".to_string(), "sk-test".to_string());
        keys
    }

    #[test]
    fn env_defaults_and_overrides() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, Config::default());

        let config = Config::from_lookup(lookup_from(&[
            ("AGENTCORP_CONFIG", "agents/coder.json"),
            ("AGENTCORP_VERBOSE", "1"),
            ("AGENTCORP_MAX_TOOL_ROUNDS", "5"),
            ("AGENTCORP_PROMPTS_DIR", "/etc/prompts"),
        ]))
        .unwrap();
        assert_eq!(config.agent_config, Some(PathBuf::from("agents/coder.json")));
        assert!(config.verbose);
        assert_eq!(config.max_tool_rounds, 5);
        assert_eq!(config.max_messages, DEFAULT_MAX_MESSAGES);
        assert_eq!(config.prompts_dir, PathBuf::from("/etc/prompts"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[("AGENTCORP_MAX_MESSAGES", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref name, _) if name == "AGENTCORP_MAX_MESSAGES"));
        assert!(Config::from_lookup(lookup_from(&[("AGENTCORP_MAX_TOOL_ROUNDS", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("AGENTCORP_VERBOSE", "maybe")])).is_err());
    }

    #[test]
    fn agent_json_accepts_both_prompt_shapes() {
        let inline = AgentConfig::from_json_str(
            r#"{"provider": "openai", "model": "gpt-4", "system_prompt": "Be terse.", "tools": ["web_search"]}"#,
        )
        .unwrap();
        assert_eq!(inline.system_prompt, SystemPromptSource::Text("Be terse.".into()));
        assert!(inline.context_settings.is_empty());

        let templated = AgentConfig::from_json_str(
            r#"{"provider": "anthropic", "model": "claude-3-haiku",
                "system_prompt": {"prompt": "coder", "params": {"LANGUAGE": "Rust"}}}"#,
        )
        .unwrap();
        assert!(matches!(
            templated.system_prompt,
            SystemPromptSource::Template { ref prompt, ref params } if prompt == "coder" && params["LANGUAGE"] == "Rust"
        ));
        assert!(templated.tools.is_empty());

        assert!(matches!(
            AgentConfig::from_json_str(r#"{"provider": "openai"}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn api_key_resolution_order() {
        let env = lookup_from(&[("OPENAI_API_KEY", "sk-env")]);
        assert_eq!(
            resolve_api_key("openai", ProviderKind::OpenAi, &keys(), &env).unwrap(),
            "sk-test"
        );
        assert_eq!(
            resolve_api_key("OpenAI", ProviderKind::OpenAi, &HashMap::new(), &env).unwrap(),
            "sk-env"
        );
        let err = resolve_api_key("xai", ProviderKind::Xai, &HashMap::new(), &env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey { ref env_var, .. } if env_var == "XAI_API_KEY"));
    }

    #[test]
    fn create_resolves_template_tools_and_settings() {
        let prompts = tempfile::tempdir().unwrap();
        std::fs::write(
            prompts.path().join("helper.md"),
            "---\ndescription: helper\n---\nYou help with {{TOPIC}}.",
        )
        .unwrap();
        let settings = Config {
            prompts_dir: prompts.path().to_path_buf(),
            max_tool_rounds: 7,
            ..Config::default()
        };

        let mut config = AgentConfig::new("openai", "gpt-4-turbo");
        config.name = Some("helper".into());
        config.system_prompt = SystemPromptSource::Template {
            prompt: "helper".into(),
            params: BTreeMap::from([("TOPIC".to_string(), "gardening".to_string())]),
        };
        config.tools = vec!["web_search".into(), "no.such_tool".into()];
        config.context_settings.insert("workingdir".into(), "/tmp".into());

        let agent =
            create_agent_from_config(&config, &keys(), &ToolRegistry::with_builtin_tools(), &settings)
                .unwrap();
        assert_eq!(agent.name(), Some("helper"));
        assert_eq!(agent.memory().get_system_prompt(), Some("You help with gardening."));
        assert_eq!(agent.tools().names(), vec!["web_search"]);
        assert_eq!(agent.context().get_setting("workingdir"), Some("/tmp"));
        assert_eq!(agent.max_tool_rounds(), 7);
    }

    #[test]
    fn unsupported_provider_and_unknown_model() {
        let registry = ToolRegistry::new();
        let settings = Config::default();

        let err = create_agent_from_config(
            &AgentConfig::new("cohere", "command"),
            &keys(),
            &registry,
            &settings,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedProvider(ref p) if p == "cohere"));

        let err = create_agent_from_config(
            &AgentConfig::new("openai", "gpt-17"),
            &keys(),
            &registry,
            &settings,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Pricing(PricingError::UnknownModel { .. })));
    }

    #[test]
    fn save_round_trips_through_json() {
        let mut config = AgentConfig::new("openai", "gpt-3.5-turbo");
        config.name = Some("saver".into());
        config.description = Some("keeps things".into());
        config.system_prompt = SystemPromptSource::Text("Remember.".into());
        config.tools = vec!["filesys.read_file".into()];

        let agent = create_agent_from_config(
            &config,
            &keys(),
            &ToolRegistry::with_builtin_tools(),
            &Config::default(),
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saver.json");
        save_agent_config(&agent, &path).unwrap();
        assert_eq!(AgentConfig::from_json_file(&path).unwrap(), config);
    }
}
