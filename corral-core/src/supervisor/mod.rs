//! The engine supervisor: at most one live engine per gateway instance.
//!
//! All transitions (bring-up, teardown, idle expiry, crash cleanup) happen
//! under a single async mutex. Watcher tasks carry the generation number of
//! the slot they were armed for and become no-ops once it moves on, which is
//! how idle timers and crash watchers are "cancelled".


use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::{Model, Variant};
use crate::engine::{EngineClient, EngineProcess, ProcessError, ProcessExit};

/// Interval between health probes while waiting for an engine to come up.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SuperviseError {
    #[error("engine did not become healthy within {timeout_secs}s")]
    StartupTimeout { timeout_secs: u64 },

    #[error("engine exited during startup (code {code:?})")]
    ExitedDuringStartup { code: Option<i32> },

    #[error(transparent)]
    Spawn(#[from] ProcessError),

    #[error("engine transition task failed")]
    TransitionFailed,
}

/// Snapshot of the live engine for status reporting.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub model: String,
    pub context: u64,
    pub pid: u32,
    pub uptime: Duration,
}

struct RunningEngine {
    model_name: String,
    variant: Variant,
    process: Arc<EngineProcess>,
    client: Arc<EngineClient>,
    last_activity: StdMutex<Instant>,
}

impl RunningEngine {
    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .elapsed()
    }
}

struct Slot {
    current: Option<RunningEngine>,
    /// Bumped on every install and teardown; watcher tasks armed for an
    /// older generation must not act.
    generation: u64,
}

/// Serializes engine transitions and owns the single live engine.
///
/// Cheap to clone; passed to handlers as an explicit dependency.
#[derive(Clone)]
pub struct Supervisor {
    slot: Arc<Mutex<Slot>>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot {
                current: None,
                generation: 0,
            })),
        }
    }

    /// Make `variant` the unique live engine and return its client.
    ///
    /// A structurally matching, health-passing engine is reused as-is; any
    /// other state tears the old engine down and brings the new one up.
    /// The transition runs in a detached task: a caller that disconnects
    /// mid-ensure cannot abort a half-started engine.
    pub async fn ensure(
        &self,
        model: &Model,
        variant: &Variant,
    ) -> Result<Arc<EngineClient>, SuperviseError> {
        let supervisor = self.clone();
        let model = model.clone();
        let variant = variant.clone();
        let transition =
            tokio::spawn(async move { supervisor.ensure_inner(model, variant).await });
        transition
            .await
            .map_err(|_| SuperviseError::TransitionFailed)?
    }

    async fn ensure_inner(
        &self,
        model: Model,
        variant: Variant,
    ) -> Result<Arc<EngineClient>, SuperviseError> {
        let mut slot = self.slot.lock().await;

        if let Some(current) = slot.current.as_ref() {
            if current.model_name == model.name && current.variant.same_process(&variant) {
                if current
                    .client
                    .check_health(variant.timeouts.health_check)
                    .await
                {
                    debug!(model = %model.name, context = variant.context, "engine already running");
                    current.touch();
                    return Ok(Arc::clone(&current.client));
                }
                warn!(
                    model = %model.name,
                    pid = current.process.pid(),
                    "live engine failed its health re-check; replacing it"
                );
            } else {
                info!(
                    from_model = %current.model_name,
                    from_context = current.variant.context,
                    to_model = %model.name,
                    to_context = variant.context,
                    "switching engines"
                );
            }
        }

        self.teardown_locked(&mut slot).await;

        let engine = self.bring_up(&model, &variant).await?;
        slot.generation += 1;
        let generation = slot.generation;
        let client = Arc::clone(&engine.client);
        let exit_watch = engine.process.exit_watch();
        let idle = variant.timeouts.idle;
        slot.current = Some(engine);
        drop(slot);

        self.spawn_crash_watcher(generation, exit_watch);
        self.arm_idle_timer(generation, idle);

        Ok(client)
    }

    async fn bring_up(
        &self,
        model: &Model,
        variant: &Variant,
    ) -> Result<RunningEngine, SuperviseError> {
        let client = Arc::new(EngineClient::new(
            model.engine,
            variant.connect.clone(),
            model.strip_fields.clone(),
        ));
        let process = Arc::new(EngineProcess::spawn(&variant.binary, &variant.args)?);
        info!(
            model = %model.name,
            context = variant.context,
            pid = process.pid(),
            "bringing up engine"
        );

        let started = Instant::now();
        loop {
            if client.check_health(variant.timeouts.health_check).await {
                info!(
                    pid = process.pid(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "engine is healthy"
                );
                break;
            }
            if !process.is_running() {
                let code = process.exit_watch().borrow().and_then(|exit| exit.code);
                error!(pid = process.pid(), ?code, "engine exited before passing health");
                process.stop().await;
                return Err(SuperviseError::ExitedDuringStartup { code });
            }
            if started.elapsed() >= variant.timeouts.startup {
                error!(
                    pid = process.pid(),
                    timeout_secs = variant.timeouts.startup.as_secs(),
                    "engine not healthy within startup timeout; terminating"
                );
                process.stop().await;
                return Err(SuperviseError::StartupTimeout {
                    timeout_secs: variant.timeouts.startup.as_secs(),
                });
            }
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }

        Ok(RunningEngine {
            model_name: model.name.clone(),
            variant: variant.clone(),
            process,
            client,
            last_activity: StdMutex::new(Instant::now()),
        })
    }

    async fn teardown_locked(&self, slot: &mut Slot) {
        if let Some(engine) = slot.current.take() {
            slot.generation += 1;
            info!(
                model = %engine.model_name,
                pid = engine.process.pid(),
                "stopping engine"
            );
            engine.process.stop().await;
        }
    }

    fn arm_idle_timer(&self, generation: u64, idle: Duration) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut wait = idle;
            loop {
                tokio::time::sleep(wait).await;
                let mut slot = supervisor.slot.lock().await;
                if slot.generation != generation {
                    return;
                }
                let Some(current) = slot.current.as_ref() else {
                    return;
                };
                let idle_for = current.idle_for();
                if idle_for >= idle {
                    info!(
                        model = %current.model_name,
                        idle_secs = idle_for.as_secs(),
                        "idle timeout reached; stopping engine"
                    );
                    supervisor.teardown_locked(&mut slot).await;
                    return;
                }
                // Activity happened since arming; sleep out the remainder.
                wait = idle - idle_for;
            }
        });
    }

    fn spawn_crash_watcher(
        &self,
        generation: u64,
        mut exit_rx: watch::Receiver<Option<ProcessExit>>,
    ) {
        let supervisor = self.clone();
        tokio::spawn(async move {
            loop {
                let observed = *exit_rx.borrow_and_update();
                if let Some(exit) = observed {
                    if exit.requested {
                        // Ordinary teardown; nothing to clean up.
                        return;
                    }
                    let mut slot = supervisor.slot.lock().await;
                    if slot.generation != generation {
                        return;
                    }
                    if let Some(engine) = slot.current.take() {
                        slot.generation += 1;
                        error!(
                            model = %engine.model_name,
                            pid = engine.process.pid(),
                            code = ?exit.code,
                            "engine crashed; slot cleared"
                        );
                    }
                    return;
                }
                if exit_rx.changed().await.is_err() {
                    return;
                }
            }
        });
    }

    /// Record request activity on the live engine.
    pub async fn touch(&self) {
        let slot = self.slot.lock().await;
        if let Some(current) = slot.current.as_ref() {
            current.touch();
        }
    }

    /// The live engine's client, if it serves `model_name`.
    ///
    /// Used by the selector to prefer online token counting; health is not
    /// re-checked here since estimation failures fall back gracefully.
    pub async fn client_for_model(&self, model_name: &str) -> Option<Arc<EngineClient>> {
        let slot = self.slot.lock().await;
        slot.current
            .as_ref()
            .filter(|current| current.model_name == model_name)
            .map(|current| Arc::clone(&current.client))
    }

    /// Snapshot of the live engine for the health route.
    pub async fn status(&self) -> Option<EngineStatus> {
        let slot = self.slot.lock().await;
        slot.current.as_ref().map(|current| EngineStatus {
            model: current.model_name.clone(),
            context: current.variant.context,
            pid: current.process.pid(),
            uptime: current.process.uptime(),
        })
    }

    /// Tear down the live engine, if any. Idempotent.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        self.teardown_locked(&mut slot).await;
    }
}
