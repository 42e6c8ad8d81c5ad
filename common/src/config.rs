use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

/// Application configuration, layered from an optional config file and
/// environment variables (env wins).
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub specialist: SpecialistConfig,
    pub orchestrator: OrchestratorConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub image_triage: ImageTriageConfig,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub modal: ModalConfig,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Clone, Deserialize, Debug)]
pub struct SpecialistConfig {
    #[serde(default = "default_specialist_base_url")]
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_specialist_model")]
    pub model: String,
    #[serde(default = "default_context_limit")]
    pub context_limit: u32,
    #[serde(default = "default_per_attempt_timeout_secs")]
    pub per_attempt_timeout_secs: u64,
    #[serde(default = "default_total_budget_timeout_secs")]
    pub total_budget_timeout_secs: u64,
    #[serde(default = "default_min_substantive_chars")]
    pub min_substantive_chars: usize,
}

#[derive(Clone, Deserialize, Debug)]
pub struct OrchestratorConfig {
    #[serde(default = "default_orchestrator_base_url")]
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_orchestrator_model")]
    pub model: String,
}

#[derive(Clone, Deserialize, Debug)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: u32,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RagConfig {
    #[serde(default = "default_guideline_dir")]
    pub guideline_dir: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default)]
    pub enable_eval: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            guideline_dir: default_guideline_dir(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            enable_eval: false,
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct SessionConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_max_serialized_bytes")]
    pub max_serialized_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_serialized_bytes: default_max_serialized_bytes(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_target_input_concurrency")]
    pub target_input_concurrency: usize,
    #[serde(default = "default_hard_max_input_concurrency")]
    pub hard_max_input_concurrency: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            target_input_concurrency: default_target_input_concurrency(),
            hard_max_input_concurrency: default_hard_max_input_concurrency(),
        }
    }
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct ImageTriageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct ModalConfig {
    pub max_containers: Option<u32>,
    pub max_inputs: Option<u32>,
    pub target_inputs: Option<u32>,
}

fn default_true() -> bool {
    true
}
fn default_http_port() -> u16 {
    8080
}
fn default_specialist_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_specialist_model() -> String {
    "medgemma".to_string()
}
fn default_context_limit() -> u32 {
    32_000
}
fn default_per_attempt_timeout_secs() -> u64 {
    90
}
fn default_total_budget_timeout_secs() -> u64 {
    180
}
fn default_min_substantive_chars() -> usize {
    50
}
fn default_orchestrator_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_orchestrator_model() -> String {
    "gemini-pro".to_string()
}
fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dimension() -> u32 {
    384
}
fn default_guideline_dir() -> String {
    "./guidelines".to_string()
}
fn default_cache_ttl_secs() -> u64 {
    15 * 60
}
fn default_cache_max_entries() -> usize {
    256
}
fn default_max_sessions() -> usize {
    500
}
fn default_max_serialized_bytes() -> usize {
    32 * 1024
}
fn default_target_input_concurrency() -> usize {
    4
}
fn default_hard_max_input_concurrency() -> usize {
    8
}

/// Loads `AppConfig` from `config/default.{toml,yaml,...}` (if present) then
/// overlays environment variables. Environment variables are recognized in
/// their natural upper-snake form (`MAX_SESSIONS`, `RAG_CACHE_TTL_SECONDS`,
/// ...) via `config`'s `Environment` source with a nested-key separator.
pub fn get_config() -> Result<AppConfig, AppError> {
    let raw = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .set_default("specialist.api_key", std::env::var("GEMINI_API_KEY").unwrap_or_default())?
        .set_default("orchestrator.api_key", std::env::var("GEMINI_API_KEY").unwrap_or_default())?
        .set_default("embedding.api_key", std::env::var("HF_TOKEN").unwrap_or_default())?
        .set_default(
            "session.max_sessions",
            std::env::var("MAX_SESSIONS").ok().unwrap_or_else(|| default_max_sessions().to_string()),
        )?
        .set_default(
            "rag.cache_ttl_secs",
            std::env::var("RAG_CACHE_TTL_SECONDS")
                .ok()
                .unwrap_or_else(|| default_cache_ttl_secs().to_string()),
        )?
        .set_default(
            "rag.cache_max_entries",
            std::env::var("RAG_CACHE_MAX_ENTRIES")
                .ok()
                .unwrap_or_else(|| default_cache_max_entries().to_string()),
        )?
        .set_default(
            "rag.enable_eval",
            std::env::var("ENABLE_RAG_EVAL").ok().unwrap_or_else(|| "false".to_string()),
        )?
        .set_default(
            "image_triage.enabled",
            std::env::var("DISABLE_MEDSIGLIP").map(|_| "false").unwrap_or("true").to_string(),
        )?
        .add_source(
            Environment::default()
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut app_config: AppConfig = raw.try_deserialize()?;

    if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
        app_config.allowed_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(v) = std::env::var("MODAL_MAX_CONTAINERS") {
        app_config.modal.max_containers = v.parse().ok();
    }
    if let Ok(v) = std::env::var("MODAL_MAX_INPUTS") {
        app_config.modal.max_inputs = v.parse().ok();
    }
    if let Ok(v) = std::env::var("MODAL_TARGET_INPUTS") {
        app_config.modal.target_inputs = v.parse().ok();
    }

    Ok(app_config)
}
