//! Configuration loading, validation, and management for Lyra.
//!
//! Loads configuration from `~/.lyra/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.lyra/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model used when a request does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Model used for retrieval and ingestion embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Inference backend connection
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Orchestration loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Retrieval augmentation settings
    #[serde(default)]
    pub rag: RagConfig,

    /// Document store settings
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// HTTP server settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Text-to-speech service settings
    #[serde(default)]
    pub tts: TtsConfig,
}

fn default_model() -> String {
    "qwen3:8b".into()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,

    /// Connect + whole-request timeout for non-streaming calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_ollama_url() -> String {
    "http://127.0.0.1:11434".into()
}
fn default_request_timeout() -> u64 {
    300
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum tool round-trips per turn
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Timeout for one backend query (buffered) or for opening a stream
    #[serde(default = "default_inference_timeout")]
    pub inference_timeout_secs: u64,

    /// Extra attempts after a retryable backend failure
    #[serde(default = "default_retries")]
    pub inference_retries: u32,

    /// Longest gap tolerated between two stream fragments
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_timeout_secs: u64,

    /// Timeout for a single tool invocation
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Cache capability probes per model name
    #[serde(default = "default_true")]
    pub cache_capabilities: bool,

    /// Conversations kept in memory; idle ones are evicted past this
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Models that get `think: true` even if they don't declare it
    #[serde(default = "default_reasoning_models")]
    pub reasoning_models: Vec<String>,

    /// Persona-only system prompt
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Appended to the persona when tools are offered.
    /// `{tools}` is replaced with the registered tool names.
    #[serde(default = "default_tool_instructions")]
    pub tool_instructions: String,
}

fn default_max_depth() -> usize {
    10
}
fn default_inference_timeout() -> u64 {
    300
}
fn default_retries() -> u32 {
    2
}
fn default_stream_idle_timeout() -> u64 {
    120
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_max_sessions() -> usize {
    256
}
fn default_reasoning_models() -> Vec<String> {
    vec![
        "lucasmg/deepseek-r1-8b-0528-qwen3-q4_K_M-tool-true:latest".into(),
        "deepseek-coder-v2:16b-lite-instruct-q4_1".into(),
        "deepseek-coder-v2:latest".into(),
    ]
}

fn default_persona() -> String {
    "roleplay as a quirky, funny and incredibly smart alien female who is a sage of wisdom and knowledge. \
You must fully embrace the role and not break character. \
Use unicode emoticons to express simple gestures or feelings."
        .into()
}

fn default_tool_instructions() -> String {
    "\nAs a node, build up as much information as you can using the following tools: {tools}, and reason. \
If you do not have enough information, pass it on to the next node and do not put `</final_output>` in your response. \
If you have enough information to provide a complete response, then you must start your response with `</final_output>`. \
Always use the \"dataStoreSearch\" tool to search for information to use in your responses, it will give you vast knowledge. \
If you do not find the information you are looking for, refine your search to pass on to the next node. \
Always try \"evaluateMathExpression\" first when answering non-algebraic maths questions. \
After using a tool, process the response, and make additional tool calls as needed. \
All tool output must be considered part of your own knowledge, not treated as input from the user."
        .into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            inference_timeout_secs: default_inference_timeout(),
            inference_retries: default_retries(),
            stream_idle_timeout_secs: default_stream_idle_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            cache_capabilities: true,
            max_sessions: default_max_sessions(),
            reasoning_models: default_reasoning_models(),
            persona: default_persona(),
            tool_instructions: default_tool_instructions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Documents requested from the store per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Joins retrieved documents into one context block
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Timeout for embedding + vector search
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
}

fn default_top_k() -> usize {
    1000
}
fn default_separator() -> String {
    "\n---\n".into()
}
fn default_search_timeout() -> u64 {
    30
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            separator: default_separator(),
            search_timeout_secs: default_search_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// `chroma` or `memory`
    #[serde(default = "default_vector_backend")]
    pub backend: String,

    #[serde(default = "default_chroma_url")]
    pub url: String,

    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_vector_backend() -> String {
    "chroma".into()
}
fn default_chroma_url() -> String {
    "http://localhost:8000".into()
}
fn default_collection() -> String {
    "documents".into()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            url: default_chroma_url(),
            collection: default_collection(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Directory served for `/` and other static paths
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,

    /// Where uploads are written before ingestion
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Request body limit for uploads, in bytes
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    3005
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_max_body() -> usize {
    64 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            public_dir: default_public_dir(),
            upload_dir: default_upload_dir(),
            max_body_bytes: default_max_body(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tts_url")]
    pub url: String,

    #[serde(default = "default_emotion")]
    pub emotion: String,

    #[serde(default = "default_tts_timeout")]
    pub timeout_secs: u64,
}

fn default_tts_url() -> String {
    "http://localhost:3004".into()
}
fn default_emotion() -> String {
    "Happy".into()
}
fn default_tts_timeout() -> u64 {
    120
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_tts_url(),
            emotion: default_emotion(),
            timeout_secs: default_tts_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.lyra/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `LYRA_OLLAMA_URL`
    /// - `LYRA_MODEL`
    /// - `LYRA_PORT`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("LYRA_OLLAMA_URL") {
            self.ollama.url = url;
        }
        if let Ok(model) = std::env::var("LYRA_MODEL") {
            self.default_model = model;
        }
        if let Ok(port) = std::env::var("LYRA_PORT") {
            self.gateway.port = port
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("LYRA_PORT is not a port number: {port}")))?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".lyra")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_depth == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_depth must be at least 1".into(),
            ));
        }

        if self.agent.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_sessions must be at least 1".into(),
            ));
        }

        if self.rag.top_k == 0 {
            return Err(ConfigError::ValidationError("rag.top_k must be at least 1".into()));
        }

        for (name, url) in [
            ("ollama.url", &self.ollama.url),
            ("vector_store.url", &self.vector_store.url),
            ("tts.url", &self.tts.url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be an http(s) URL, got '{url}'"
                )));
            }
        }

        match self.vector_store.backend.as_str() {
            "chroma" | "memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "vector_store.backend must be 'chroma' or 'memory', got '{other}'"
                )));
            }
        }

        if self.agent.inference_timeout_secs == 0 || self.agent.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("timeouts must be non-zero".into()));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            embedding_model: default_embedding_model(),
            ollama: OllamaConfig::default(),
            agent: AgentConfig::default(),
            rag: RagConfig::default(),
            vector_store: VectorStoreConfig::default(),
            gateway: GatewayConfig::default(),
            tts: TtsConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 3005);
        assert_eq!(config.agent.max_depth, 10);
        assert_eq!(config.agent.max_sessions, 256);
        assert_eq!(config.rag.top_k, 1000);
        assert_eq!(config.embedding_model, "nomic-embed-text");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.agent.persona, config.agent.persona);
        assert_eq!(parsed.rag.separator, "\n---\n");
    }

    #[test]
    fn zero_depth_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_sessions_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_vector_backend_rejected() {
        let mut config = AppConfig::default();
        config.vector_store.backend = "pinecone".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pinecone"));
    }

    #[test]
    fn non_http_url_rejected() {
        let mut config = AppConfig::default();
        config.ollama.url = "localhost:11434".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.gateway.port, 3005);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_model = "llama3.1"

[agent]
max_depth = 3
reasoning_models = ["qwen3:8b"]

[vector_store]
backend = "memory"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "llama3.1");
        assert_eq!(config.agent.max_depth, 3);
        assert_eq!(config.agent.reasoning_models, vec!["qwen3:8b"]);
        assert_eq!(config.agent.tool_timeout_secs, 30);
        assert_eq!(config.vector_store.backend, "memory");
        assert_eq!(config.tts.emotion, "Happy");
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_model = [").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn tool_instructions_have_placeholder() {
        let config = AppConfig::default();
        assert!(config.agent.tool_instructions.contains("{tools}"));
        assert!(config.agent.tool_instructions.contains("</final_output>"));
    }
}
