//! Variant selection: estimate the token requirement of a request, then
//! pick the smallest variant whose context window covers it.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{GatewayConfig, Model, Variant};
use crate::engine::tokenizer;
use crate::request;
use crate::supervisor::Supervisor;

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("model '{model}' is not configured")]
    ModelNotFound { model: String },

    #[error(
        "request needs about {required} tokens but the largest '{model}' variant holds {max_context}"
    )]
    ContextTooLarge {
        model: String,
        required: u64,
        max_context: u64,
    },
}

/// The outcome of a selection, borrowed from the configuration tree.
#[derive(Debug)]
pub struct Selection<'a> {
    pub model: &'a Model,
    pub variant: &'a Variant,
    pub estimated: u64,
    pub required: u64,
}

/// Picks a model variant per request.
#[derive(Clone)]
pub struct Selector {
    config: Arc<GatewayConfig>,
    supervisor: Supervisor,
}

impl Selector {
    pub fn new(config: Arc<GatewayConfig>, supervisor: Supervisor) -> Self {
        Self { config, supervisor }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Choose the smallest sufficient variant of `model_name` for `body`.
    ///
    /// Estimation prefers the live engine's `/tokenize` when it already
    /// serves this model, then the model's standalone tokenizer, then a
    /// character-count heuristic. The estimate is padded with the safety
    /// margin before matching against variant context sizes; among equal
    /// context sizes the earlier-declared variant wins.
    pub async fn select<'a>(
        &'a self,
        model_name: &str,
        body: &Value,
    ) -> Result<Selection<'a>, SelectError> {
        let model = self
            .config
            .model(model_name)
            .ok_or_else(|| SelectError::ModelNotFound {
                model: model_name.to_owned(),
            })?;

        let estimated = self.estimate(model, body).await;
        let required = self.with_safety_margin(estimated);

        let variant = model
            .variants
            .iter()
            .find(|v| v.context >= required)
            .ok_or_else(|| SelectError::ContextTooLarge {
                model: model.name.clone(),
                required,
                max_context: model.max_context(),
            })?;

        debug!(
            model = %model.name,
            estimated,
            required,
            context = variant.context,
            "variant selected"
        );
        Ok(Selection {
            model,
            variant,
            estimated,
            required,
        })
    }

    async fn estimate(&self, model: &Model, body: &Value) -> u64 {
        let reservation = self.config.server.max_tokens_reservation;

        if let Some(client) = self.supervisor.client_for_model(&model.name).await {
            if client.supports_online_tokenize() {
                match client.estimate_tokens(body, reservation).await {
                    Ok(estimate) => return estimate,
                    Err(error) => {
                        warn!(model = %model.name, %error, "online token estimation failed; falling back");
                    }
                }
            }
        }

        if let Some(spec) = &model.tokenizer {
            match tokenizer::estimate(spec, body, reservation).await {
                Ok(estimate) => return estimate,
                Err(error) => {
                    warn!(model = %model.name, %error, "offline tokenizer failed; using character heuristic");
                }
            }
        } else {
            warn!(model = %model.name, "no tokenizer available; using character heuristic");
        }

        heuristic_estimate(body, reservation)
    }

    fn with_safety_margin(&self, estimated: u64) -> u64 {
        let frac = (estimated as f64 * self.config.server.safety_margin_frac).ceil() as u64;
        estimated + self.config.server.safety_margin_abs.max(frac)
    }
}

/// Crude character-count estimate: roughly four characters per token, plus
/// the completion reservation.
fn heuristic_estimate(body: &Value, max_tokens_reservation: u64) -> u64 {
    let prompt_tokens = request::content_chars(body).div_ceil(4);
    prompt_tokens + request::max_tokens(body).unwrap_or(max_tokens_reservation)
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use serde_json::json;

    const THREE_SIZES: &str = r#"
        [[models]]
        name = "qwen3-30b-instruct"
        engine = "llama.cpp"
        connect = "http://127.0.0.1:8080"

        [[models.variants]]
        binary = "/opt/llama/llama-server"
        args = ["-c", "20480"]
        context = 20480

        [[models.variants]]
        binary = "/opt/llama/llama-server"
        args = ["-c", "40960"]
        context = 40960

        [[models.variants]]
        binary = "/opt/llama/llama-server"
        args = ["-c", "81920"]
        context = 81920
    "#;

    fn selector(toml: &str) -> Selector {
        let config = Arc::new(GatewayConfig::from_toml_str(toml).unwrap());
        Selector::new(config, Supervisor::new())
    }

    fn body_with_chars(chars: usize, max_tokens: u64) -> Value {
        json!({
            "messages": [{ "role": "user", "content": "x".repeat(chars) }],
            "max_tokens": max_tokens
        })
    }

    #[tokio::test]
    async fn unknown_model_is_rejected() {
        let sel = selector(THREE_SIZES);
        let result = sel.select("nope", &json!({})).await;
        assert!(matches!(result, Err(SelectError::ModelNotFound { .. })));
    }

    #[tokio::test]
    async fn picks_smallest_sufficient_variant() {
        // 40,000 chars → 10,000 prompt tokens + 2,048 = 12,048 estimated;
        // margin max(512, 1205) → 13,253 required → the 20480 variant.
        let s = selector(THREE_SIZES);
        let selection = s
            .select("qwen3-30b-instruct", &body_with_chars(40_000, 2048))
            .await
            .unwrap();
        assert_eq!(selection.estimated, 12_048);
        assert_eq!(selection.required, 13_253);
        assert_eq!(selection.variant.context, 20_480);
    }

    #[tokio::test]
    async fn larger_requests_move_up_a_variant() {
        // 88,000 chars → 22,000 + 2,048 = 24,048; margin 2,405 → 26,453,
        // which no longer fits the 20480 variant.
        let s = selector(THREE_SIZES);
        let selection = s
            .select("qwen3-30b-instruct", &body_with_chars(88_000, 2048))
            .await
            .unwrap();
        assert_eq!(selection.variant.context, 40_960);
    }

    #[tokio::test]
    async fn absolute_margin_floor_applies_to_small_requests() {
        // 40 chars → 10 + 100 = 110 estimated; fractional margin is 11 so
        // the 512 floor wins → required 622.
        let s = selector(THREE_SIZES);
        let selection = s
            .select("qwen3-30b-instruct", &body_with_chars(40, 100))
            .await
            .unwrap();
        assert_eq!(selection.required, 110 + 512);
        assert_eq!(selection.variant.context, 20_480);
    }

    #[tokio::test]
    async fn oversized_request_reports_context_too_large() {
        // 400,000 chars → 100,000 + 2,048 → way past 81,920.
        let s = selector(THREE_SIZES);
        let result = s
            .select("qwen3-30b-instruct", &body_with_chars(400_000, 2048))
            .await;
        match result {
            Err(SelectError::ContextTooLarge {
                required,
                max_context,
                ..
            }) => {
                assert!(required > max_context);
                assert_eq!(max_context, 81_920);
            }
            other => panic!("expected ContextTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn equal_contexts_tie_break_on_declaration_order() {
        let toml = r#"
            [[models]]
            name = "m"
            engine = "llama.cpp"
            connect = "http://127.0.0.1:8080"

            [[models.variants]]
            binary = "/bin/first"
            args = []
            context = 8192

            [[models.variants]]
            binary = "/bin/second"
            args = []
            context = 8192
        "#;
        let s = selector(toml);
        let selection = s.select("m", &body_with_chars(40, 100)).await.unwrap();
        assert_eq!(
            selection.variant.binary.to_str().unwrap(),
            "/bin/first",
            "earlier-declared variant wins the tie"
        );
    }

    #[tokio::test]
    async fn reservation_used_when_max_tokens_absent() {
        let s = selector(THREE_SIZES);
        let body = json!({
            "messages": [{ "role": "user", "content": "x".repeat(400) }]
        });
        let selection = s.select("qwen3-30b-instruct", &body).await.unwrap();
        // 100 prompt tokens + 1,024 default reservation.
        assert_eq!(selection.estimated, 1_124);
    }

    #[test]
    fn heuristic_rounds_chars_up() {
        let body = json!({ "prompt": "abcde", "max_tokens": 0 });
        assert_eq!(heuristic_estimate(&body, 1024), 2);
    }
}
