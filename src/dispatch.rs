use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use thiserror::Error;

/// One controllable bulb, as resolved from config. The list order is the
/// dispatch order; nothing about a bulb is cached between rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulbTarget {
    pub name: String,
    pub addr: SocketAddr,
}

impl fmt::Display for BulbTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.addr)
    }
}

/// The only failure kinds the dispatcher distinguishes. Refused
/// connections, garbage replies and socket errors all collapse into
/// `Transport`.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("transport: {0}")]
    Transport(String),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// On/off control surface of one bulb. Implementations own the per-call
/// timeout and surface its expiry as `ClientError::Timeout`.
#[async_trait]
pub trait BulbClient: Send + Sync {
    async fn power_state(&self, target: &BulbTarget) -> Result<bool, ClientError>;
    async fn turn_on(&self, target: &BulbTarget) -> Result<(), ClientError>;
    async fn turn_off(&self, target: &BulbTarget) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Queried and flipped; `now_on` is the state just commanded.
    Toggled { now_on: bool },
    /// Query or command ran out the per-call timeout.
    Unresponsive,
    /// Transport-level failure, with the client's reason.
    Failed(String),
}

impl fmt::Display for ToggleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToggleOutcome::Toggled { now_on: true } => write!(f, "now ON"),
            ToggleOutcome::Toggled { now_on: false } => write!(f, "now OFF"),
            ToggleOutcome::Unresponsive => write!(f, "unresponsive"),
            ToggleOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToggleReport {
    pub target: BulbTarget,
    pub outcome: ToggleOutcome,
}

/// Fans one trigger out over every configured bulb.
pub struct Dispatcher<C> {
    client: C,
    bulbs: Vec<BulbTarget>,
    pacing: Duration,
}

impl<C: BulbClient> Dispatcher<C> {
    pub fn new(client: C, bulbs: Vec<BulbTarget>, pacing: Duration) -> Self {
        Dispatcher {
            client,
            bulbs,
            pacing,
        }
    }

    pub fn bulbs(&self) -> &[BulbTarget] {
        &self.bulbs
    }

    /// Runs one read-modify-write round over every bulb, in list order.
    ///
    /// Bulbs fail independently: a timeout or transport error ends that
    /// bulb's sequence and the round moves on to the next one. Every bulb is
    /// attempted exactly once per round; the next trigger is the only retry.
    pub async fn toggle_all(&self) -> Vec<ToggleReport> {
        let mut reports = Vec::with_capacity(self.bulbs.len());
        for (i, target) in self.bulbs.iter().enumerate() {
            // Some bulbs drop commands that arrive back to back.
            if i > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            let outcome = match self.toggle_one(target).await {
                Ok(now_on) => {
                    info!("{target}: turned {}", if now_on { "ON" } else { "OFF" });
                    ToggleOutcome::Toggled { now_on }
                }
                Err(ClientError::Timeout(after)) => {
                    warn!("{target}: no reply within {after:?}, moving on");
                    ToggleOutcome::Unresponsive
                }
                Err(ClientError::Transport(reason)) => {
                    warn!("{target}: {reason}");
                    ToggleOutcome::Failed(reason)
                }
            };
            reports.push(ToggleReport {
                target: target.clone(),
                outcome,
            });
        }
        reports
    }

    async fn toggle_one(&self, target: &BulbTarget) -> Result<bool, ClientError> {
        let is_on = self.client.power_state(target).await?;
        if is_on {
            self.client.turn_off(target).await?;
        } else {
            self.client.turn_on(target).await?;
        }
        Ok(!is_on)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, HashSet};
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{BulbClient, BulbTarget, ClientError};

    pub(crate) fn target(name: &str, last_octet: u8) -> BulbTarget {
        BulbTarget {
            name: name.to_string(),
            addr: SocketAddr::from(([127, 0, 0, last_octet], 38899)),
        }
    }

    /// Scripted in-memory bulbs: shared power states plus per-address
    /// failure behavior, with every client call recorded in order. Clones
    /// share the state and call log.
    #[derive(Clone, Default)]
    pub(crate) struct StubClient {
        states: Arc<Mutex<HashMap<SocketAddr, bool>>>,
        calls: Arc<Mutex<Vec<(SocketAddr, &'static str)>>>,
        query_timeouts: HashSet<SocketAddr>,
        command_timeouts: HashSet<SocketAddr>,
        broken_commands: HashSet<SocketAddr>,
    }

    impl StubClient {
        pub(crate) fn new() -> Self {
            StubClient::default()
        }

        pub(crate) fn with_state(self, target: &BulbTarget, on: bool) -> Self {
            self.states.lock().unwrap().insert(target.addr, on);
            self
        }

        pub(crate) fn timing_out(mut self, target: &BulbTarget) -> Self {
            self.query_timeouts.insert(target.addr);
            self
        }

        pub(crate) fn timing_out_on_command(mut self, target: &BulbTarget) -> Self {
            self.command_timeouts.insert(target.addr);
            self
        }

        pub(crate) fn broken_on_command(mut self, target: &BulbTarget) -> Self {
            self.broken_commands.insert(target.addr);
            self
        }

        pub(crate) fn calls(&self) -> Vec<(SocketAddr, &'static str)> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn calls_for(&self, target: &BulbTarget) -> Vec<&'static str> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(addr, _)| *addr == target.addr)
                .map(|(_, call)| *call)
                .collect()
        }

        pub(crate) fn is_on(&self, target: &BulbTarget) -> bool {
            *self.states.lock().unwrap().get(&target.addr).unwrap_or(&false)
        }

        fn record(&self, addr: SocketAddr, call: &'static str) {
            self.calls.lock().unwrap().push((addr, call));
        }

        fn set(&self, addr: SocketAddr, on: bool) -> Result<(), ClientError> {
            if self.command_timeouts.contains(&addr) {
                return Err(ClientError::Timeout(Duration::from_secs(5)));
            }
            if self.broken_commands.contains(&addr) {
                return Err(ClientError::Transport("connection refused".into()));
            }
            self.states.lock().unwrap().insert(addr, on);
            Ok(())
        }
    }

    #[async_trait]
    impl BulbClient for StubClient {
        async fn power_state(&self, target: &BulbTarget) -> Result<bool, ClientError> {
            self.record(target.addr, "query");
            if self.query_timeouts.contains(&target.addr) {
                return Err(ClientError::Timeout(Duration::from_secs(5)));
            }
            Ok(self.is_on(target))
        }

        async fn turn_on(&self, target: &BulbTarget) -> Result<(), ClientError> {
            self.record(target.addr, "on");
            self.set(target.addr, true)
        }

        async fn turn_off(&self, target: &BulbTarget) -> Result<(), ClientError> {
            self.record(target.addr, "off");
            self.set(target.addr, false)
        }
    }
}
