//! corral-core: the engine-lifecycle core of the corral gateway.
//!
//! The HTTP surface lives in `corral-server`; this crate owns everything
//! below it — the validated configuration tree, the llama.cpp engine client,
//! child-process supervision, token estimation and variant selection.

pub mod config;
pub mod engine;
pub mod request;
pub mod selector;
pub mod supervisor;

pub use config::{ConfigError, GatewayConfig, Model, ServerSettings, Timeouts, TokenizerSpec, Variant};
pub use engine::{EngineClient, EngineError, EngineKind};
pub use selector::{SelectError, Selection, Selector};
pub use supervisor::{EngineStatus, SuperviseError, Supervisor};
