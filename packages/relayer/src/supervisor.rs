//! Listener supervision
//!
//! Runs the listener on its own task and relaunches it after a fixed
//! back-off whenever it fails with a recoverable error. The task's join
//! handle is the completion signal; the listener is handed back on
//! completion so its cursor and nonce survive restarts.

use std::fmt;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use crate::listener::{Listener, ListenerError};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Streaming,
    Restarting,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Starting => "starting",
            SupervisorState::Streaming => "streaming",
            SupervisorState::Restarting => "restarting",
            SupervisorState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

pub struct Supervisor {
    restart_delay: Duration,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<SupervisorState>,
}

impl Supervisor {
    pub fn new(restart_delay: Duration, shutdown: watch::Receiver<bool>) -> Self {
        let (state, _) = watch::channel(SupervisorState::Starting);
        Self {
            restart_delay,
            shutdown,
            state,
        }
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SupervisorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Supervisor state change");
        }
    }

    /// Supervise `listener` until shutdown or a fatal error
    pub async fn run(self, mut listener: Listener) -> Result<Listener, ListenerError> {
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                self.transition(SupervisorState::Stopped);
                return Ok(listener);
            }

            self.transition(SupervisorState::Starting);
            let (subscribed_tx, mut subscribed_rx) = oneshot::channel();
            let mut handle = tokio::spawn(async move {
                let result = listener.run(subscribed_tx).await;
                (listener, result)
            });

            let mut awaiting_subscription = true;
            let joined = loop {
                tokio::select! {
                    subscribed = &mut subscribed_rx, if awaiting_subscription => {
                        awaiting_subscription = false;
                        if subscribed.is_ok() {
                            self.transition(SupervisorState::Streaming);
                        }
                    }
                    joined = &mut handle => break joined,
                }
            };

            let (returned, result) = match joined {
                Ok(completed) => completed,
                Err(e) => {
                    error!(error = %e, "Listener task aborted");
                    self.transition(SupervisorState::Stopped);
                    return Err(ListenerError::Task(e.to_string()));
                }
            };
            listener = returned;

            match result {
                Ok(()) => {
                    self.transition(SupervisorState::Stopped);
                    return Ok(listener);
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Listener failed fatally");
                    self.transition(SupervisorState::Stopped);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        delay_ms = self.restart_delay.as_millis() as u64,
                        "Listener failed, restarting"
                    );
                    metrics::record_error("listener", "restart");
                    metrics::record_restart();
                    self.transition(SupervisorState::Restarting);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.restart_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.transition(SupervisorState::Stopped);
                        return Ok(listener);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointError, CheckpointStore};
    use crate::source::SourceLedger;
    use crate::submitter::{GasPolicy, RetryPolicy, Submitter};
    use crate::testing::{raw_lock_event, tx_result, MockDestination, MockSource};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn listener(
        source: Arc<MockSource>,
        dir: &TempDir,
        shutdown: watch::Receiver<bool>,
    ) -> Listener {
        let store = CheckpointStore::open(dir.path()).unwrap();
        let destination = Arc::new(MockDestination::new().with_pending_nonce(0));
        let submitter = Submitter::new(
            destination,
            GasPolicy::default(),
            RetryPolicy::new(3, Duration::ZERO),
        );
        let source: Arc<dyn SourceLedger> = source;
        Listener::new(source, submitter, store, shutdown)
    }

    async fn wait_for_state(
        states: &mut watch::Receiver<SupervisorState>,
        wanted: SupervisorState,
    ) {
        while *states.borrow_and_update() != wanted {
            states.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_restarts_after_subscription_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(
            MockSource::new().with_block(12, vec![tx_result(vec![raw_lock_event(5)])]),
        );
        source.push_subscription(vec![Ok(10), Err("websocket closed".into())], true);
        source.push_subscription(vec![Ok(12)], true);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = Supervisor::new(Duration::from_millis(10), shutdown_rx.clone());
        let mut states = supervisor.subscribe();
        let task = tokio::spawn(supervisor.run(listener(source.clone(), &dir, shutdown_rx)));

        // Second session: processes 11 and 12, then waits for more blocks
        while source.fetched() != vec![11, 12] {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        wait_for_state(&mut states, SupervisorState::Streaming).await;
        shutdown_tx.send(true).unwrap();

        let listener = task.await.unwrap().unwrap();
        assert_eq!(listener.checkpoint(), Some(12));
        assert_eq!(listener.submitter().nonce(), Some(1));
        assert_eq!(source.subscribe_attempts(), 2);
        assert_eq!(*states.borrow(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_retries_failed_subscribe() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(MockSource::new());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = Supervisor::new(Duration::from_millis(5), shutdown_rx.clone());
        let task = tokio::spawn(supervisor.run(listener(source.clone(), &dir, shutdown_rx)));

        while source.subscribe_attempts() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown_tx.send(true).unwrap();

        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_aborted_task_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(MockSource::new());
        source.push_subscription(vec![Ok(10), Ok(11)], true);
        source.push_subscription(vec![], true);
        source.panic_on_block(11);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = Supervisor::new(Duration::from_millis(5), shutdown_rx.clone());
        let err = supervisor
            .run(listener(source.clone(), &dir, shutdown_rx))
            .await
            .unwrap_err();

        assert!(matches!(err, ListenerError::Task(_)));
        assert!(err.is_fatal());
        assert_eq!(source.subscribe_attempts(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_while_subscribing() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(MockSource::new());
        source.stall_subscriptions();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let supervisor = Supervisor::new(Duration::from_millis(5), shutdown_rx.clone());
        let mut states = supervisor.subscribe();
        let task = tokio::spawn(supervisor.run(listener(source.clone(), &dir, shutdown_rx)));

        while source.subscribe_attempts() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*states.borrow_and_update(), SupervisorState::Starting);
        shutdown_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .expect("supervisor ignored shutdown while subscribing")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(source.subscribe_attempts(), 1);
        assert_eq!(*states.borrow(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_checkpoint_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = CheckpointStore::open(dir.path()).unwrap();
            store.save(10).unwrap();
        }
        let source = Arc::new(
            MockSource::new().with_block(11, vec![tx_result(vec![raw_lock_event(1)])]),
        );
        source.push_subscription(vec![Ok(11)], true);

        let store = CheckpointStore::open_read_only(dir.path()).unwrap();
        let destination = Arc::new(MockDestination::new().with_pending_nonce(0));
        let submitter = Submitter::new(
            destination.clone(),
            GasPolicy::default(),
            RetryPolicy::new(3, Duration::ZERO),
        );
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = Listener::new(source.clone(), submitter, store, shutdown_rx.clone());

        let supervisor = Supervisor::new(Duration::from_millis(5), shutdown_rx);
        let states = supervisor.subscribe();
        let err = tokio::time::timeout(Duration::from_secs(3), supervisor.run(listener))
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, ListenerError::Checkpoint(CheckpointError::Database(_))));
        assert!(err.is_fatal());
        assert_eq!(source.subscribe_attempts(), 1);
        assert_eq!(source.unsubscribed(), 1);
        // The claim went out before the height failed to persist
        assert_eq!(destination.sent().len(), 1);
        assert_eq!(*states.borrow(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn test_stops_immediately_when_already_shut_down() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(MockSource::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        let supervisor = Supervisor::new(Duration::from_millis(5), shutdown_rx.clone());
        let listener = supervisor
            .run(listener(source.clone(), &dir, shutdown_rx))
            .await
            .unwrap();

        assert_eq!(listener.last_processed(), None);
        assert_eq!(source.subscribe_attempts(), 0);
    }
}
