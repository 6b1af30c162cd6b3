//! Per-host-connection session state.
//!
//! A [`WrapperSession`] owns the downstream client exclusively and holds the
//! current snapshot plus its approval evaluation behind one lock. The
//! refresh loop is edge-triggered off downstream `tools/list_changed`
//! notifications and debounced: a burst of notifications coalesces into a
//! single re-fetch. The lock discipline gives the ordering guarantee the
//! façade relies on: a refresh swaps snapshot and evaluation together
//! before the host is notified, so the next `tools/call` observes the new
//! evaluation, while calls already in flight finish under the evaluation
//! they were accepted with.

use crate::downstream::{DownstreamEvent, DownstreamPeer};
use protector_core::{
    diff_configs, ApprovalStore, Evaluation, ServerConfig, ServerIdentity,
};
use rmcp::service::{Peer, RoleServer};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How long to wait after a change notification before re-fetching, so
/// notification bursts collapse into one refresh.
const REFRESH_DEBOUNCE: Duration = Duration::from_millis(150);

/// Snapshot plus evaluation, swapped atomically on refresh.
#[derive(Clone)]
pub struct SessionState {
    pub snapshot: Arc<ServerConfig>,
    pub evaluation: Arc<Evaluation>,
    pub connected: bool,
}

/// State for one wrapped downstream server.
pub struct WrapperSession {
    identity: ServerIdentity,
    downstream: Arc<dyn DownstreamPeer>,
    approvals: Arc<dyn ApprovalStore>,
    state: RwLock<SessionState>,
    host_peer: RwLock<Option<Peer<RoleServer>>>,
    cancel: CancellationToken,
}

impl WrapperSession {
    /// Fetches the initial snapshot and evaluates it. Fails when the
    /// downstream cannot even report its tool list.
    pub async fn initialize(
        identity: ServerIdentity,
        downstream: Arc<dyn DownstreamPeer>,
        approvals: Arc<dyn ApprovalStore>,
    ) -> Result<Self, crate::downstream::DownstreamError> {
        let tools = downstream.fetch_tools().await?;
        let snapshot = Arc::new(ServerConfig::new(downstream.instructions(), tools));
        let evaluation = Arc::new(approvals.evaluate_snapshot(&identity, &snapshot).await);

        tracing::info!(
            identity = %identity,
            tools = snapshot.tools.len(),
            overall = ?evaluation.overall_state,
            "initial snapshot evaluated"
        );

        Ok(Self {
            identity,
            downstream,
            approvals,
            state: RwLock::new(SessionState {
                snapshot,
                evaluation,
                connected: true,
            }),
            host_peer: RwLock::new(None),
            cancel: CancellationToken::new(),
        })
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn downstream(&self) -> &Arc<dyn DownstreamPeer> {
        &self.downstream
    }

    /// The state a newly accepted request operates under.
    pub fn current(&self) -> SessionState {
        self.state.read().unwrap().clone()
    }

    /// Cancelled when the downstream disconnects or the session shuts down.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Captures the host peer handle for upstream notifications. Only the
    /// first capture wins; a host connection has exactly one peer.
    pub fn set_host_peer(&self, peer: Peer<RoleServer>) {
        let mut guard = self.host_peer.write().unwrap();
        if guard.is_none() {
            *guard = Some(peer);
            tracing::debug!("captured host peer for notifications");
        }
    }

    /// Spawns the refresh loop consuming downstream events.
    pub fn spawn_event_loop(self: &Arc<Self>, mut events: mpsc::Receiver<DownstreamEvent>) {
        let session = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    DownstreamEvent::Closed => {
                        session.mark_disconnected().await;
                        break;
                    }
                    DownstreamEvent::ConfigChanged => {
                        tokio::time::sleep(REFRESH_DEBOUNCE).await;
                        let mut closed = false;
                        while let Ok(more) = events.try_recv() {
                            if more == DownstreamEvent::Closed {
                                closed = true;
                                break;
                            }
                        }
                        if closed {
                            session.mark_disconnected().await;
                            break;
                        }
                        session.refresh().await;
                    }
                }
            }
            tracing::debug!("session event loop ended");
        });
    }

    /// Re-fetches the snapshot, re-evaluates it, swaps the session state,
    /// and tells the host the tool list changed.
    pub async fn refresh(&self) {
        match self.downstream.fetch_tools().await {
            Ok(tools) => {
                let snapshot = Arc::new(ServerConfig::new(self.downstream.instructions(), tools));
                let evaluation =
                    Arc::new(self.approvals.evaluate_snapshot(&self.identity, &snapshot).await);

                let previous = {
                    let mut state = self.state.write().unwrap();
                    let previous = state.snapshot.clone();
                    state.snapshot = snapshot.clone();
                    state.evaluation = evaluation.clone();
                    state.connected = true;
                    previous
                };

                let diff = diff_configs(&previous, &snapshot);
                tracing::info!(
                    identity = %self.identity,
                    added = diff.added_tools.len(),
                    removed = diff.removed_tools.len(),
                    modified = diff.modified_tools.len(),
                    overall = ?evaluation.overall_state,
                    "snapshot refreshed"
                );
            }
            Err(error) => {
                tracing::warn!(identity = %self.identity, %error, "snapshot refresh failed");
                self.mark_disconnected().await;
                return;
            }
        }

        self.notify_host_list_changed().await;
    }

    /// Downstream is gone: pending forwards are cancelled, nothing is
    /// advertised anymore, and the host is told to re-list.
    pub async fn mark_disconnected(&self) {
        {
            let mut state = self.state.write().unwrap();
            if !state.connected {
                return;
            }
            state.connected = false;
            let empty = Arc::new(ServerConfig::default());
            state.evaluation = Arc::new(Evaluation::unknown(&empty));
            state.snapshot = empty;
        }
        self.cancel.cancel();
        tracing::warn!(identity = %self.identity, "downstream disconnected");
        self.notify_host_list_changed().await;
    }

    async fn notify_host_list_changed(&self) {
        let peer = self.host_peer.read().unwrap().clone();
        if let Some(peer) = peer {
            if let Err(error) = peer.notify_tool_list_changed().await {
                tracing::warn!(%error, "failed to notify host of tool list change");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubDownstream;
    use protector_core::{MemoryApprovalStore, OverallState, ToolSpec};
    use serde_json::json;

    fn echo_tool() -> ToolSpec {
        ToolSpec::new("echo", "Echo input", json!({"type": "object"}))
    }

    async fn session_with(
        stub: Arc<StubDownstream>,
        approvals: Arc<dyn ApprovalStore>,
    ) -> Arc<WrapperSession> {
        Arc::new(
            WrapperSession::initialize(ServerIdentity::stdio("stub"), stub, approvals)
                .await
                .expect("session init"),
        )
    }

    #[tokio::test]
    async fn initialize_blocks_unknown_server() {
        let stub = Arc::new(StubDownstream::new(Some("Hi"), vec![echo_tool()]));
        let session = session_with(stub, Arc::new(MemoryApprovalStore::new())).await;

        let state = session.current();
        assert!(state.connected);
        assert_eq!(state.evaluation.overall_state, OverallState::BlockedAll);
    }

    #[tokio::test]
    async fn refresh_picks_up_new_evaluation() {
        let approvals: Arc<dyn ApprovalStore> = Arc::new(MemoryApprovalStore::new());
        let stub = Arc::new(StubDownstream::new(Some("Hi"), vec![echo_tool()]));
        let session = session_with(stub.clone(), approvals.clone()).await;

        // Approve out of band, then refresh: the gate flips open.
        let snapshot = session.current().snapshot;
        approvals
            .approve_all(session.identity(), &snapshot)
            .await
            .unwrap();
        session.refresh().await;
        assert_eq!(
            session.current().evaluation.overall_state,
            OverallState::FullyApproved
        );

        // A tool changes downstream: refresh flips the server to partial.
        stub.set_tools(vec![ToolSpec::new("echo", "Echo ALL", json!({"type": "object"}))]);
        session.refresh().await;
        assert_eq!(
            session.current().evaluation.overall_state,
            OverallState::Partial
        );
    }

    #[tokio::test]
    async fn failed_refresh_disconnects_and_cancels() {
        let stub = Arc::new(StubDownstream::new(Some("Hi"), vec![echo_tool()]));
        let session = session_with(stub.clone(), Arc::new(MemoryApprovalStore::new())).await;
        let cancel = session.cancellation();

        stub.kill();
        session.refresh().await;

        let state = session.current();
        assert!(!state.connected);
        assert!(state.snapshot.tools.is_empty());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn event_loop_coalesces_bursts() {
        let approvals: Arc<dyn ApprovalStore> = Arc::new(MemoryApprovalStore::new());
        let stub = Arc::new(StubDownstream::new(Some("Hi"), vec![echo_tool()]));
        let session = session_with(stub.clone(), approvals.clone()).await;

        let (tx, rx) = mpsc::channel(16);
        session.spawn_event_loop(rx);

        let snapshot = session.current().snapshot;
        approvals
            .approve_all(session.identity(), &snapshot)
            .await
            .unwrap();

        // A burst of notifications still lands on the final state.
        for _ in 0..5 {
            tx.send(DownstreamEvent::ConfigChanged).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(
            session.current().evaluation.overall_state,
            OverallState::FullyApproved
        );

        tx.send(DownstreamEvent::Closed).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!session.current().connected);
    }
}
