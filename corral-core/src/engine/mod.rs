//! Engine integration: kinds and capabilities, the HTTP client, the child
//! process wrapper and the standalone tokenizer.

pub mod client;
pub mod llama;
pub mod process;
pub mod tokenizer;

pub use client::{EngineClient, EngineError};
pub use process::{EngineProcess, ProcessError, ProcessExit, ProcessStatus};

use serde::{Deserialize, Serialize};

/// The closed set of supported engine types.
///
/// New engines register by adding a kind here and a row in [`EngineKind::caps`];
/// the rest of the gateway dispatches through the capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineKind {
    #[serde(rename = "llama.cpp")]
    LlamaCpp,
    #[serde(rename = "llama.cpp.sideload")]
    LlamaCppSideload,
}

/// Static per-kind capabilities.
#[derive(Debug, Clone, Copy)]
pub struct EngineCaps {
    /// Inference endpoints the engine accepts.
    pub endpoints: &'static [&'static str],
    /// Primary health probe path.
    pub health_path: &'static str,
    /// Probed instead when the primary path answers 404 (older builds).
    pub health_fallback_path: &'static str,
    /// Whether a running engine can count tokens via `/tokenize`.
    pub online_tokenize: bool,
}

const LLAMA_CPP_CAPS: EngineCaps = EngineCaps {
    endpoints: &["/v1/chat/completions", "/v1/completions"],
    health_path: "/health",
    health_fallback_path: "/v1/models",
    online_tokenize: true,
};

const LLAMA_CPP_SIDELOAD_CAPS: EngineCaps = EngineCaps {
    endpoints: &["/v1/chat/completions", "/v1/completions", "/v1/embeddings"],
    health_path: "/health",
    health_fallback_path: "/v1/models",
    online_tokenize: true,
};

impl EngineKind {
    pub fn caps(self) -> &'static EngineCaps {
        match self {
            EngineKind::LlamaCpp => &LLAMA_CPP_CAPS,
            EngineKind::LlamaCppSideload => &LLAMA_CPP_SIDELOAD_CAPS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::LlamaCpp => "llama.cpp",
            EngineKind::LlamaCppSideload => "llama.cpp.sideload",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_deserializes_from_dotted_names() {
        let kind: EngineKind = serde_json::from_str("\"llama.cpp\"").unwrap();
        assert_eq!(kind, EngineKind::LlamaCpp);
        let kind: EngineKind = serde_json::from_str("\"llama.cpp.sideload\"").unwrap();
        assert_eq!(kind, EngineKind::LlamaCppSideload);
        assert!(serde_json::from_str::<EngineKind>("\"vllm\"").is_err());
    }

    #[test]
    fn sideload_kind_accepts_embeddings() {
        assert!(!EngineKind::LlamaCpp
            .caps()
            .endpoints
            .contains(&"/v1/embeddings"));
        assert!(EngineKind::LlamaCppSideload
            .caps()
            .endpoints
            .contains(&"/v1/embeddings"));
    }
}
