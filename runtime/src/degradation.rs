//! Degradation controller for the fast gate.
//!
//! Watches the health of fast gate calls and routes traffic away from the
//! gate when it misbehaves.
//!
//! # States
//!
//! - **`GATE_ACTIVE`**: requests go through the admission gate. Every admission
//!   call is sampled; when the unhealthy share of the recent window reaches the
//!   threshold, the controller trips.
//! - **`GATE_BYPASSED`**: requests go straight to the optimistic allocator. A
//!   background prober pings the gate; the controller returns to active only
//!   after probes have been healthy without interruption for the cooldown.
//!
//! A call is unhealthy when it failed, timed out, or was slower than the slow
//! call threshold. Any unhealthy probe while bypassed restarts the cooldown,
//! so the state cannot flap on a single good sample.
//!
//! # Example
//!
//! ```rust
//! use seatgate_runtime::config::DegradationConfig;
//! use seatgate_runtime::degradation::{DegradationController, GateMode};
//! use seatgate_runtime::metrics::EngineMetrics;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let config = DegradationConfig {
//!     min_samples: 2,
//!     ..DegradationConfig::default()
//! };
//! let controller = DegradationController::new(config, Arc::new(EngineMetrics::new()));
//!
//! controller.record(false, Duration::from_millis(1)).await;
//! controller.record(false, Duration::from_millis(1)).await;
//! assert_eq!(controller.mode().await, GateMode::Bypassed);
//! # }
//! ```

use crate::config::DegradationConfig;
use crate::metrics::EngineMetrics;
use crate::shutdown::ShutdownListener;
use seatgate_core::gate::FastGate;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Routing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Requests use the admission gate.
    Active,
    /// Requests use the optimistic allocator directly.
    Bypassed,
}

impl GateMode {
    /// Stable label used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "GATE_ACTIVE",
            Self::Bypassed => "GATE_BYPASSED",
        }
    }
}

impl fmt::Display for GateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct ControllerState {
    mode: GateMode,
    /// `(when, healthy)` samples inside the window, oldest first.
    samples: VecDeque<(Instant, bool)>,
    /// Start of the current uninterrupted healthy streak while bypassed.
    healthy_since: Option<Instant>,
}

impl ControllerState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while self
            .samples
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > window)
        {
            self.samples.pop_front();
        }
    }

    #[allow(clippy::cast_precision_loss)] // sample counts are small
    fn unhealthy_ratio(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let unhealthy = self.samples.iter().filter(|(_, ok)| !ok).count();
        unhealthy as f64 / self.samples.len() as f64
    }
}

/// Tracks gate health and decides routing.
#[derive(Debug)]
pub struct DegradationController {
    config: DegradationConfig,
    state: RwLock<ControllerState>,
    metrics: Arc<EngineMetrics>,
}

impl DegradationController {
    /// Create a controller in `GATE_ACTIVE`.
    #[must_use]
    pub fn new(config: DegradationConfig, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            config,
            state: RwLock::new(ControllerState {
                mode: GateMode::Active,
                samples: VecDeque::new(),
                healthy_since: None,
            }),
            metrics,
        }
    }

    /// Current routing state.
    pub async fn mode(&self) -> GateMode {
        self.state.read().await.mode
    }

    /// Record the outcome of one gate call.
    ///
    /// `ok` is whether the call returned a well-formed answer; `latency` is
    /// how long it took.
    pub async fn record(&self, ok: bool, latency: Duration) {
        let healthy = ok && latency <= self.config.slow_call_threshold;
        let now = Instant::now();
        let mut state = self.state.write().await;

        match state.mode {
            GateMode::Active => {
                state.samples.push_back((now, healthy));
                state.prune(now, self.config.window);

                let ratio = state.unhealthy_ratio();
                if state.samples.len() >= self.config.min_samples
                    && ratio >= self.config.error_rate_threshold
                {
                    tracing::warn!(
                        samples = state.samples.len(),
                        unhealthy_ratio = ratio,
                        threshold = self.config.error_rate_threshold,
                        "Fast gate transitioning GATE_ACTIVE -> GATE_BYPASSED"
                    );
                    state.mode = GateMode::Bypassed;
                    state.samples.clear();
                    state.healthy_since = None;
                    self.metrics.record_gate_transition(true);
                }
            }
            GateMode::Bypassed => {
                if !healthy {
                    if state.healthy_since.is_some() {
                        tracing::debug!("Fast gate probe unhealthy, recovery cooldown restarted");
                    }
                    state.healthy_since = None;
                    return;
                }

                let since = *state.healthy_since.get_or_insert(now);
                let healthy_for = now.duration_since(since);
                if healthy_for >= self.config.cooldown {
                    tracing::info!(
                        healthy_for = ?healthy_for,
                        "Fast gate transitioning GATE_BYPASSED -> GATE_ACTIVE"
                    );
                    state.mode = GateMode::Active;
                    state.samples.clear();
                    state.healthy_since = None;
                    self.metrics.record_gate_transition(false);
                }
            }
        }
    }

    /// Force `GATE_ACTIVE` and clear history.
    ///
    /// Useful for testing or manual intervention.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        if state.mode == GateMode::Bypassed {
            self.metrics.record_gate_transition(false);
        }
        tracing::info!("Degradation controller manually reset to GATE_ACTIVE");
        state.mode = GateMode::Active;
        state.samples.clear();
        state.healthy_since = None;
    }

    /// Ping the gate on `probe_interval` while bypassed, feeding results back
    /// into [`Self::record`]. Idle while active.
    #[must_use]
    pub fn spawn_prober(
        self: Arc<Self>,
        gate: Arc<dyn FastGate>,
        call_timeout: Duration,
        mut shutdown: ShutdownListener,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.triggered() => break,
                    _ = ticker.tick() => {
                        if self.mode().await == GateMode::Bypassed {
                            self.probe(gate.as_ref(), call_timeout).await;
                        }
                    }
                }
            }
            tracing::debug!("Gate recovery prober stopped");
        })
    }

    async fn probe(&self, gate: &dyn FastGate, call_timeout: Duration) {
        let started = Instant::now();
        let ok = match tokio::time::timeout(call_timeout, gate.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Fast gate probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(timeout = ?call_timeout, "Fast gate probe timed out");
                false
            }
        };
        self.record(ok, started.elapsed()).await;
    }
}
