//! Offline token counting through a standalone tokenizer binary.
//!
//! Used when no engine is live for the requested model: the tokenizer
//! receives the request's text on stdin and prints token ids to stdout.
//! No chat template is applied on this path, so counts are approximate;
//! `extra_tokens_per_message` compensates for template overhead.

use std::process::Stdio;

use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::TokenizerSpec;
use crate::request;

#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("failed to run tokenizer {binary}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tokenizer {binary} exited with status {status}")]
    NonZeroExit { binary: String, status: i32 },

    #[error("tokenizer produced no parsable token ids")]
    NoOutput,

    #[error("request body carries no tokenizable content")]
    NoContent,
}

/// Estimate the token requirement of `body` with the standalone tokenizer.
///
/// The result already includes the completion reservation:
/// `ids + extra_tokens_per_message × messages + extra_tokens + max_tokens`
/// (falling back to `max_tokens_reservation` when the request sets none).
pub async fn estimate(
    spec: &TokenizerSpec,
    body: &Value,
    max_tokens_reservation: u64,
) -> Result<u64, EstimationError> {
    let (text, message_count) = request::tokenizable_text(body, &spec.separator)
        .ok_or(EstimationError::NoContent)?;

    let token_count = run_tokenizer(spec, &text).await?;
    let reserve = request::max_tokens(body).unwrap_or(max_tokens_reservation);
    let estimate = token_count
        + spec.extra_tokens_per_message * message_count
        + spec.extra_tokens
        + reserve;

    debug!(
        tokens = token_count,
        messages = message_count,
        reserve,
        estimate,
        "offline token estimate"
    );
    Ok(estimate)
}

async fn run_tokenizer(spec: &TokenizerSpec, text: &str) -> Result<u64, EstimationError> {
    let binary = spec.binary.display().to_string();

    let mut child = Command::new(&spec.binary)
        .args(&spec.base_args)
        .args(&spec.extra_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| EstimationError::Spawn {
            binary: binary.clone(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // A tokenizer that exits early closes its stdin; that is its error
        // to report via exit status, not a gateway failure.
        let _ = stdin.write_all(text.as_bytes()).await;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|source| EstimationError::Spawn { binary: binary.clone(), source })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!(%binary, stderr = %stderr.trim(), "tokenizer reported errors");
        }
        return Err(EstimationError::NonZeroExit {
            binary,
            status: output.status.code().unwrap_or(-1),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let count = parse_token_ids(&stdout);
    if count == 0 && !text.is_empty() {
        return Err(EstimationError::NoOutput);
    }
    Ok(count)
}

/// Count token ids in tokenizer output.
///
/// Accepts both whitespace-delimited ids (`24048 198 271`) and the JSON
/// array form (`[24048, 198, 271]`) some builds emit.
fn parse_token_ids(stdout: &str) -> u64 {
    stdout
        .split(|c: char| c.is_whitespace() || matches!(c, '[' | ']' | ','))
        .filter(|token| !token.is_empty() && token.parse::<i64>().is_ok())
        .count() as u64
}

// ── Tests ──────────────────────────────────────────────────────────────────────
