use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{Command, QueryView};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineErrorEvent, Result};
use crate::machine::{Context, Handled, Machine, MachineEvent};
use crate::orchestrator::Orchestrator;
use crate::services::{MediaEvent, PlaybackService, RecordingService};

const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Client side of a running session.
///
/// Dispatching is fire-and-forget: outcomes are observed through snapshots and
/// the error stream.
pub struct SessionHandle {
    events: mpsc::Sender<MachineEvent>,
    snapshots: watch::Receiver<Arc<Context>>,
    errors: broadcast::Sender<EngineErrorEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    bridge: JoinHandle<Machine>,
    orchestrator: JoinHandle<()>,
}

/// Starts the session tasks on the current tokio runtime.
pub fn spawn_session<P, R>(
    machine: Machine,
    player: P,
    media: mpsc::UnboundedReceiver<MediaEvent>,
    recorder: R,
    config: EngineConfig,
) -> SessionHandle
where
    P: PlaybackService + 'static,
    R: RecordingService + 'static,
{
    let (events_tx, events_rx) = mpsc::channel(config.command_channel_capacity.max(1));
    let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());
    let (errors_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let orchestrator = Orchestrator::new(
        player,
        media,
        recorder,
        config,
        snapshot_rx.clone(),
        events_tx.clone(),
    );
    let orchestrator = tokio::spawn(orchestrator.run());
    let bridge = tokio::spawn(run_bridge(
        machine,
        events_rx,
        snapshot_tx,
        errors_tx.clone(),
        shutdown_rx,
    ));
    info!("session started");

    SessionHandle {
        events: events_tx,
        snapshots: snapshot_rx,
        errors: errors_tx,
        shutdown: Some(shutdown_tx),
        bridge,
        orchestrator,
    }
}

async fn run_bridge(
    mut machine: Machine,
    mut events: mpsc::Receiver<MachineEvent>,
    snapshots: watch::Sender<Arc<Context>>,
    errors: broadcast::Sender<EngineErrorEvent>,
    mut shutdown: oneshot::Receiver<()>,
) -> Machine {
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = &mut shutdown => break,
        };

        let name = event.name();
        match machine.handle(event) {
            Ok(Handled::Applied) => {
                snapshots.send_replace(machine.snapshot());
            }
            Ok(Handled::Ignored) => {}
            Err(error) => {
                warn!(event = name, %error, "event rejected");
                if errors.send(EngineErrorEvent::from_error(&error)).is_err() {
                    debug!("no error subscribers");
                }
            }
        }
    }
    debug!("session bridge stopped");
    machine
}

impl SessionHandle {
    /// Queues a command, waiting for queue space.
    pub async fn dispatch(&self, command: Command) -> Result<()> {
        self.events
            .send(command.into())
            .await
            .map_err(|_| EngineError::SessionClosed)
    }

    /// Queues a command without waiting; fails when the queue is full or closed.
    pub fn try_dispatch(&self, command: Command) -> Result<()> {
        self.events
            .try_send(command.into())
            .map_err(|_| EngineError::SessionClosed)
    }

    pub fn snapshot(&self) -> Arc<Context> {
        Arc::clone(&self.snapshots.borrow())
    }

    pub fn query(&self) -> QueryView {
        QueryView::new(self.snapshot())
    }

    /// New receiver of snapshots, starting from the current one.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Context>> {
        self.snapshots.clone()
    }

    pub fn errors(&self) -> broadcast::Receiver<EngineErrorEvent> {
        self.errors.subscribe()
    }

    /// Waits until a snapshot satisfies `predicate`, giving up after `timeout`.
    pub async fn wait_for(
        &self,
        timeout: Duration,
        predicate: impl FnMut(&Arc<Context>) -> bool,
    ) -> Option<Arc<Context>> {
        let mut snapshots = self.snapshots.clone();
        match tokio::time::timeout(timeout, snapshots.wait_for(predicate)).await {
            Ok(Ok(snapshot)) => Some(Arc::clone(&snapshot)),
            _ => None,
        }
    }

    /// Stops both tasks and returns the machine with its final state.
    pub async fn shutdown(mut self) -> Result<Machine> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let machine = self.bridge.await.map_err(|_| EngineError::SessionClosed)?;
        if self.orchestrator.await.is_err() {
            warn!("orchestrator task ended abnormally");
        }
        info!("session stopped");
        Ok(machine)
    }
}
