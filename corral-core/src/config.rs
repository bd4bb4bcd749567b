//! Gateway configuration: loading, validation and normalization.
//!
//! The rest of the crate only ever sees the normalized form produced by
//! [`GatewayConfig::load`]: variants sorted ascending by context size,
//! `connect` URLs and timeouts resolved down the server → model → variant
//! inheritance chain. Consumers never re-derive inheritance.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::engine::EngineKind;

/// Default arguments for a standalone tokenizer binary reading text from
/// stdin and printing token ids to stdout.
pub const DEFAULT_TOKENIZER_ARGS: &[&str] = &["--log-disable", "--stdin", "--ids"];

/// All the ways a configuration file can be rejected.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("server.{field} must be greater than zero")]
    NonPositiveTimeout { field: &'static str },

    #[error("no models configured")]
    NoModels,

    #[error("duplicate model name '{model}'")]
    DuplicateModel { model: String },

    #[error("model '{model}': {reason}")]
    InvalidModel { model: String, reason: String },
}

// ── Raw (wire) form ──────────────────────────────────────────────────────────

/// A listen endpoint spec: a single address, a list, or the sentinel
/// `"none"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawBindSpec {
    One(String),
    Many(Vec<String>),
}

impl RawBindSpec {
    fn resolve(self) -> Vec<String> {
        match self {
            RawBindSpec::One(addr) if addr.eq_ignore_ascii_case("none") => Vec::new(),
            RawBindSpec::One(addr) => vec![addr],
            RawBindSpec::Many(addrs) => addrs
                .into_iter()
                .filter(|a| !a.eq_ignore_ascii_case("none"))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServer {
    listen_v4: Option<RawBindSpec>,
    listen_v6: Option<RawBindSpec>,

    health_check_timeout_secs: Option<u64>,
    engine_startup_timeout_secs: Option<u64>,
    engine_idle_timeout_secs: Option<u64>,

    max_tokens_reservation: Option<u64>,
    safety_margin_abs: Option<u64>,
    safety_margin_frac: Option<f64>,

    dumps_dir: Option<PathBuf>,
    #[serde(default)]
    purge_dumps_at_start: bool,

    log_level: Option<String>,
    #[serde(default)]
    log_json: bool,
    enable_swagger: Option<bool>,
    cors_allowed_origins: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModel {
    name: String,
    engine: EngineKind,
    connect: Option<String>,
    tokenizer: Option<RawTokenizer>,
    strip_fields: Option<Vec<String>>,
    health_check_timeout_secs: Option<u64>,
    engine_startup_timeout_secs: Option<u64>,
    engine_idle_timeout_secs: Option<u64>,
    #[serde(default)]
    variants: Vec<RawVariant>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVariant {
    binary: PathBuf,
    args: Vec<String>,
    context: u64,
    connect: Option<String>,
    health_check_timeout_secs: Option<u64>,
    engine_startup_timeout_secs: Option<u64>,
    engine_idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTokenizer {
    binary: PathBuf,
    base_args: Option<Vec<String>>,
    #[serde(default)]
    extra_args: Vec<String>,
    #[serde(default)]
    extra_tokens_per_message: u64,
    #[serde(default)]
    extra_tokens: u64,
    separator: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    server: Option<RawServer>,
    #[serde(default)]
    models: Vec<RawModel>,
}

// ── Normalized form ──────────────────────────────────────────────────────────

/// Server-level settings with every default applied.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_v4: Vec<String>,
    pub listen_v6: Vec<String>,

    pub health_check_timeout: Duration,
    pub engine_startup_timeout: Duration,
    pub engine_idle_timeout: Duration,

    /// Token budget charged when a request carries no `max_tokens`.
    pub max_tokens_reservation: u64,
    /// Absolute floor of the selector safety margin.
    pub safety_margin_abs: u64,
    /// Fractional part of the selector safety margin.
    pub safety_margin_frac: f64,

    pub dumps_dir: Option<PathBuf>,
    pub purge_dumps_at_start: bool,

    pub log_level: String,
    pub log_json: bool,
    pub enable_swagger: bool,
    pub cors_allowed_origins: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_v4: vec!["127.0.0.1:7777".to_owned()],
            listen_v6: Vec::new(),
            health_check_timeout: Duration::from_secs(5),
            engine_startup_timeout: Duration::from_secs(60),
            engine_idle_timeout: Duration::from_secs(300),
            max_tokens_reservation: 1024,
            safety_margin_abs: 512,
            safety_margin_frac: 0.10,
            dumps_dir: None,
            purge_dumps_at_start: false,
            log_level: "info".to_owned(),
            log_json: false,
            enable_swagger: true,
            cors_allowed_origins: None,
        }
    }
}

/// Per-variant timeouts, fully resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub health_check: Duration,
    pub startup: Duration,
    pub idle: Duration,
}

/// Standalone tokenizer invocation for offline token estimation.
#[derive(Debug, Clone)]
pub struct TokenizerSpec {
    pub binary: PathBuf,
    pub base_args: Vec<String>,
    pub extra_args: Vec<String>,
    pub extra_tokens_per_message: u64,
    pub extra_tokens: u64,
    /// Joins chat message contents before they are written to the
    /// tokenizer's stdin.
    pub separator: String,
}

/// One concrete launch configuration of a model.
#[derive(Debug, Clone)]
pub struct Variant {
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// Maximum token window this launch configuration can serve.
    pub context: u64,
    /// Base URL of the engine's HTTP endpoint once it is up.
    pub connect: String,
    pub timeouts: Timeouts,
}

impl Variant {
    /// Structural process identity: two variants denote the same engine
    /// process when binary, argument vector and connect URL all match.
    /// Position in the variant list is irrelevant.
    pub fn same_process(&self, other: &Variant) -> bool {
        self.binary == other.binary && self.args == other.args && self.connect == other.connect
    }
}

/// A named model with its launch variants, ascending by context size.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub engine: EngineKind,
    pub tokenizer: Option<TokenizerSpec>,
    /// Request fields elided before forwarding; kept as data so the set can
    /// track engine versions without code changes.
    pub strip_fields: Vec<String>,
    pub variants: Vec<Variant>,
}

impl Model {
    /// Largest context window any variant of this model can serve.
    pub fn max_context(&self) -> u64 {
        // variants is validated non-empty
        self.variants.last().map(|v| v.context).unwrap_or(0)
    }

    pub fn context_sizes(&self) -> Vec<u64> {
        self.variants.iter().map(|v| v.context).collect()
    }
}

/// The immutable configuration tree consumed by the whole gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub server: ServerSettings,
    pub models: Vec<Model>,
}

impl GatewayConfig {
    /// Load, validate and normalize a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw)
    }

    /// Parse a configuration from an in-memory TOML string.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.name == name)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let server = normalize_server(raw.server)?;

        if raw.models.is_empty() {
            return Err(ConfigError::NoModels);
        }

        let mut models = Vec::with_capacity(raw.models.len());
        for raw_model in raw.models {
            let model = normalize_model(&server, raw_model)?;
            if models.iter().any(|m: &Model| m.name == model.name) {
                return Err(ConfigError::DuplicateModel { model: model.name });
            }
            models.push(model);
        }

        Ok(Self { server, models })
    }
}

// ── Normalization ────────────────────────────────────────────────────────────

fn normalize_server(raw: Option<RawServer>) -> Result<ServerSettings, ConfigError> {
    let defaults = ServerSettings::default();
    let Some(raw) = raw else {
        return Ok(defaults);
    };

    let health_check_timeout = positive_secs(
        raw.health_check_timeout_secs,
        defaults.health_check_timeout,
        "health_check_timeout_secs",
    )?;
    let engine_startup_timeout = positive_secs(
        raw.engine_startup_timeout_secs,
        defaults.engine_startup_timeout,
        "engine_startup_timeout_secs",
    )?;
    let engine_idle_timeout = positive_secs(
        raw.engine_idle_timeout_secs,
        defaults.engine_idle_timeout,
        "engine_idle_timeout_secs",
    )?;

    Ok(ServerSettings {
        listen_v4: raw
            .listen_v4
            .map(RawBindSpec::resolve)
            .unwrap_or(defaults.listen_v4),
        listen_v6: raw
            .listen_v6
            .map(RawBindSpec::resolve)
            .unwrap_or(defaults.listen_v6),
        health_check_timeout,
        engine_startup_timeout,
        engine_idle_timeout,
        max_tokens_reservation: raw
            .max_tokens_reservation
            .unwrap_or(defaults.max_tokens_reservation),
        safety_margin_abs: raw.safety_margin_abs.unwrap_or(defaults.safety_margin_abs),
        safety_margin_frac: raw
            .safety_margin_frac
            .unwrap_or(defaults.safety_margin_frac),
        dumps_dir: raw.dumps_dir,
        purge_dumps_at_start: raw.purge_dumps_at_start,
        log_level: raw.log_level.unwrap_or(defaults.log_level),
        log_json: raw.log_json,
        enable_swagger: raw.enable_swagger.unwrap_or(defaults.enable_swagger),
        cors_allowed_origins: raw.cors_allowed_origins,
    })
}

fn positive_secs(
    value: Option<u64>,
    default: Duration,
    field: &'static str,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::NonPositiveTimeout { field }),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

fn normalize_model(server: &ServerSettings, raw: RawModel) -> Result<Model, ConfigError> {
    let name = raw.name.trim().to_owned();
    if name.is_empty() {
        return Err(ConfigError::InvalidModel {
            model: raw.name,
            reason: "model name must not be empty".to_owned(),
        });
    }
    if raw.variants.is_empty() {
        return Err(ConfigError::InvalidModel {
            model: name,
            reason: "model has no variants".to_owned(),
        });
    }

    let model_timeouts = Timeouts {
        health_check: raw
            .health_check_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(server.health_check_timeout),
        startup: raw
            .engine_startup_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(server.engine_startup_timeout),
        idle: raw
            .engine_idle_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(server.engine_idle_timeout),
    };

    let mut variants = Vec::with_capacity(raw.variants.len());
    for (index, raw_variant) in raw.variants.into_iter().enumerate() {
        if raw_variant.context == 0 {
            return Err(ConfigError::InvalidModel {
                model: name.clone(),
                reason: format!("variant {index} has a zero context size"),
            });
        }
        let connect = raw_variant
            .connect
            .or_else(|| raw.connect.clone())
            .ok_or_else(|| ConfigError::InvalidModel {
                model: name.clone(),
                reason: format!("variant {index} has no connect URL (set it on the variant or the model)"),
            })?;

        variants.push(Variant {
            binary: raw_variant.binary,
            args: raw_variant.args,
            context: raw_variant.context,
            connect: connect.trim_end_matches('/').to_owned(),
            timeouts: Timeouts {
                health_check: raw_variant
                    .health_check_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(model_timeouts.health_check),
                startup: raw_variant
                    .engine_startup_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(model_timeouts.startup),
                idle: raw_variant
                    .engine_idle_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(model_timeouts.idle),
            },
        });
    }

    // Stable sort: among equal context sizes, declaration order wins and the
    // selector's first-match tie-break preserves author intent.
    variants.sort_by_key(|v| v.context);

    let tokenizer = raw.tokenizer.map(|t| TokenizerSpec {
        binary: t.binary,
        base_args: t.base_args.unwrap_or_else(|| {
            DEFAULT_TOKENIZER_ARGS.iter().map(|s| (*s).to_owned()).collect()
        }),
        extra_args: t.extra_args,
        extra_tokens_per_message: t.extra_tokens_per_message,
        extra_tokens: t.extra_tokens,
        separator: t.separator.unwrap_or_else(|| "\n".to_owned()),
    });

    Ok(Model {
        name,
        engine: raw.engine,
        tokenizer,
        strip_fields: raw
            .strip_fields
            .unwrap_or_else(crate::engine::llama::default_strip_fields),
        variants,
    })
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [[models]]
        name = "qwen3-30b-instruct"
        engine = "llama.cpp"
        connect = "http://127.0.0.1:8080"

        [[models.variants]]
        binary = "/opt/llama/llama-server"
        args = ["-m", "/models/qwen3-30b-q4.gguf", "-c", "20480"]
        context = 20480

        [[models.variants]]
        binary = "/opt/llama/llama-server"
        args = ["-m", "/models/qwen3-30b-q4.gguf", "-c", "81920"]
        context = 81920

        [[models.variants]]
        binary = "/opt/llama/llama-server"
        args = ["-m", "/models/qwen3-30b-q4.gguf", "-c", "40960"]
        context = 40960
    "#;

    #[test]
    fn variants_sorted_ascending_by_context() {
        let cfg = GatewayConfig::from_toml_str(MINIMAL).unwrap();
        let model = cfg.model("qwen3-30b-instruct").unwrap();
        assert_eq!(model.context_sizes(), vec![20480, 40960, 81920]);
        assert_eq!(model.max_context(), 81920);
    }

    #[test]
    fn server_defaults_applied() {
        let cfg = GatewayConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.server.health_check_timeout, Duration::from_secs(5));
        assert_eq!(cfg.server.engine_idle_timeout, Duration::from_secs(300));
        assert_eq!(cfg.server.max_tokens_reservation, 1024);
        assert_eq!(cfg.server.safety_margin_abs, 512);
        assert_eq!(cfg.server.listen_v4, vec!["127.0.0.1:7777".to_owned()]);
        assert!(cfg.server.listen_v6.is_empty());
    }

    #[test]
    fn connect_inherited_from_model() {
        let cfg = GatewayConfig::from_toml_str(MINIMAL).unwrap();
        let model = cfg.model("qwen3-30b-instruct").unwrap();
        for variant in &model.variants {
            assert_eq!(variant.connect, "http://127.0.0.1:8080");
        }
    }

    #[test]
    fn variant_connect_overrides_model() {
        let text = r#"
            [[models]]
            name = "m"
            engine = "llama.cpp"
            connect = "http://127.0.0.1:8080"

            [[models.variants]]
            binary = "/bin/engine"
            args = []
            context = 4096
            connect = "http://127.0.0.1:9090/"
        "#;
        let cfg = GatewayConfig::from_toml_str(text).unwrap();
        // trailing slash is trimmed during normalization
        assert_eq!(cfg.models[0].variants[0].connect, "http://127.0.0.1:9090");
    }

    #[test]
    fn timeouts_inherit_down_the_chain() {
        let text = r#"
            [server]
            engine_idle_timeout_secs = 120

            [[models]]
            name = "m"
            engine = "llama.cpp"
            connect = "http://127.0.0.1:8080"
            engine_startup_timeout_secs = 90

            [[models.variants]]
            binary = "/bin/engine"
            args = []
            context = 4096
            health_check_timeout_secs = 2
        "#;
        let cfg = GatewayConfig::from_toml_str(text).unwrap();
        let t = cfg.models[0].variants[0].timeouts;
        assert_eq!(t.idle, Duration::from_secs(120));
        assert_eq!(t.startup, Duration::from_secs(90));
        assert_eq!(t.health_check, Duration::from_secs(2));
    }

    #[test]
    fn listen_spec_accepts_list_and_none() {
        let text = r#"
            [server]
            listen_v4 = ["127.0.0.1:7777", "10.0.0.1:7777"]
            listen_v6 = "none"

            [[models]]
            name = "m"
            engine = "llama.cpp"
            connect = "http://127.0.0.1:8080"

            [[models.variants]]
            binary = "/bin/engine"
            args = []
            context = 4096
        "#;
        let cfg = GatewayConfig::from_toml_str(text).unwrap();
        assert_eq!(cfg.server.listen_v4.len(), 2);
        assert!(cfg.server.listen_v6.is_empty());
    }

    #[test]
    fn rejects_zero_timeout() {
        let text = r#"
            [server]
            health_check_timeout_secs = 0

            [[models]]
            name = "m"
            engine = "llama.cpp"
            connect = "http://127.0.0.1:8080"

            [[models.variants]]
            binary = "/bin/engine"
            args = []
            context = 4096
        "#;
        assert!(matches!(
            GatewayConfig::from_toml_str(text),
            Err(ConfigError::NonPositiveTimeout { .. })
        ));
    }

    #[test]
    fn rejects_model_without_variants() {
        let text = r#"
            [[models]]
            name = "m"
            engine = "llama.cpp"
            connect = "http://127.0.0.1:8080"
        "#;
        assert!(matches!(
            GatewayConfig::from_toml_str(text),
            Err(ConfigError::InvalidModel { .. })
        ));
    }

    #[test]
    fn rejects_variant_without_connect() {
        let text = r#"
            [[models]]
            name = "m"
            engine = "llama.cpp"

            [[models.variants]]
            binary = "/bin/engine"
            args = []
            context = 4096
        "#;
        assert!(matches!(
            GatewayConfig::from_toml_str(text),
            Err(ConfigError::InvalidModel { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_model_names() {
        let text = r#"
            [[models]]
            name = "m"
            engine = "llama.cpp"
            connect = "http://127.0.0.1:8080"

            [[models.variants]]
            binary = "/bin/engine"
            args = []
            context = 4096

            [[models]]
            name = "m"
            engine = "llama.cpp"
            connect = "http://127.0.0.1:8081"

            [[models.variants]]
            binary = "/bin/engine"
            args = []
            context = 4096
        "#;
        assert!(matches!(
            GatewayConfig::from_toml_str(text),
            Err(ConfigError::DuplicateModel { .. })
        ));
    }

    #[test]
    fn rejects_empty_config() {
        assert!(matches!(
            GatewayConfig::from_toml_str(""),
            Err(ConfigError::NoModels)
        ));
    }

    #[test]
    fn tokenizer_defaults() {
        let text = r#"
            [[models]]
            name = "m"
            engine = "llama.cpp"
            connect = "http://127.0.0.1:8080"

            [models.tokenizer]
            binary = "/opt/llama/llama-tokenize"
            extra_args = ["-m", "/models/qwen3-30b-q4.gguf"]
            extra_tokens_per_message = 8

            [[models.variants]]
            binary = "/bin/engine"
            args = []
            context = 4096
        "#;
        let cfg = GatewayConfig::from_toml_str(text).unwrap();
        let tok = cfg.models[0].tokenizer.as_ref().unwrap();
        assert_eq!(tok.base_args, vec!["--log-disable", "--stdin", "--ids"]);
        assert_eq!(tok.extra_tokens_per_message, 8);
        assert_eq!(tok.extra_tokens, 0);
        assert_eq!(tok.separator, "\n");
    }

    #[test]
    fn same_process_compares_structurally() {
        let cfg = GatewayConfig::from_toml_str(MINIMAL).unwrap();
        let variants = &cfg.models[0].variants;
        assert!(variants[0].same_process(&variants[0].clone()));
        // same binary and connect, different args
        assert!(!variants[0].same_process(&variants[1]));
    }
}
