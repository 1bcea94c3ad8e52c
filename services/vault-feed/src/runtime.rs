//! Async driver for [`FeedEngine`]
//!
//! Runs the engine on its own task. Control commands are polled before
//! ticks (biased select) so a plan change is applied before any further
//! tick is decoded; ticks of the superseded subscription are then dropped
//! as stale. Each plan change is answered on its own reply channel, so the
//! caller sees the outcome of re-subscribing.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use types::errors::FeedError;
use types::ids::{AccountId, PartitionId, ResourceId};

use crate::engine::FeedEngine;
use crate::gate::InteractionHandle;
use crate::metrics::FeedMetrics;
use crate::resolver::AddressResolver;
use crate::store::StoreReader;
use crate::transport::{ApplyOutcome, BatchTransport};

const CONTROL_CHANNEL_CAPACITY: usize = 32;

type Reply = oneshot::Sender<Result<ApplyOutcome, FeedError>>;

/// Planner input changes sent to a running engine.
#[derive(Debug)]
pub enum ControlCommand {
    SetHome(PartitionId, Reply),
    SetAccount(Option<AccountId>, Reply),
    SetResources(BTreeSet<ResourceId>, Reply),
    Shutdown,
}

/// Handle to an engine running on a background task.
pub struct FeedHandle {
    control: mpsc::Sender<ControlCommand>,
    interaction: InteractionHandle,
    reader: StoreReader,
    metrics: Arc<FeedMetrics>,
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn reader(&self) -> StoreReader {
        self.reader.clone()
    }

    pub fn interaction(&self) -> InteractionHandle {
        self.interaction.clone()
    }

    pub fn metrics(&self) -> Arc<FeedMetrics> {
        self.metrics.clone()
    }

    /// Switch the home partition and wait until the engine has re-planned.
    pub async fn set_home_partition(&self, home: PartitionId) -> Result<ApplyOutcome, FeedError> {
        self.request(|reply| ControlCommand::SetHome(home, reply)).await
    }

    pub async fn set_account(&self, account: Option<AccountId>) -> Result<ApplyOutcome, FeedError> {
        self.request(|reply| ControlCommand::SetAccount(account, reply))
            .await
    }

    pub async fn set_resources(
        &self,
        resources: BTreeSet<ResourceId>,
    ) -> Result<ApplyOutcome, FeedError> {
        self.request(|reply| ControlCommand::SetResources(resources, reply))
            .await
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> ControlCommand,
    ) -> Result<ApplyOutcome, FeedError> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(command(reply))
            .await
            .map_err(|_| FeedError::Stopped)?;
        response.await.map_err(|_| FeedError::Stopped)?
    }

    /// Stop the engine and wait for its task to finish. The live
    /// subscription is cancelled on the way out.
    pub async fn shutdown(self) -> Result<(), FeedError> {
        // A closed channel means the task is already gone.
        let _ = self.control.send(ControlCommand::Shutdown).await;
        self.task.await.map_err(|_| FeedError::Stopped)
    }
}

/// Spawns engines onto the current tokio runtime.
pub struct FeedRuntime;

impl FeedRuntime {
    /// Start `engine` and drive it on a new task.
    ///
    /// Must be called from within a tokio runtime. A failed initial
    /// subscription is returned here; later failures are returned to the
    /// caller of the control method that triggered them.
    pub fn spawn<T, R>(mut engine: FeedEngine<T, R>) -> Result<FeedHandle, FeedError>
    where
        T: BatchTransport + 'static,
        R: AddressResolver + 'static,
    {
        engine.start()?;

        let (control, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let interaction = engine.interaction();
        let reader = engine.reader();
        let metrics = engine.metrics();

        let task = tokio::spawn(run(engine, control_rx));

        Ok(FeedHandle {
            control,
            interaction,
            reader,
            metrics,
            task,
        })
    }
}

async fn run<T, R>(mut engine: FeedEngine<T, R>, mut control: mpsc::Receiver<ControlCommand>)
where
    T: BatchTransport,
    R: AddressResolver,
{
    info!("Feed engine running");

    loop {
        tokio::select! {
            biased;

            command = control.recv() => match command {
                Some(ControlCommand::Shutdown) | None => break,
                Some(command) => apply(&mut engine, command),
            },
            _ = engine.next_tick() => {}
        }
    }

    engine.stop();
    info!("Feed engine stopped");
}

fn apply<T, R>(engine: &mut FeedEngine<T, R>, command: ControlCommand)
where
    T: BatchTransport,
    R: AddressResolver,
{
    let (result, reply) = match command {
        ControlCommand::SetHome(home, reply) => (engine.set_home_partition(home), reply),
        ControlCommand::SetAccount(account, reply) => (engine.set_account(account), reply),
        ControlCommand::SetResources(resources, reply) => (engine.set_resources(resources), reply),
        ControlCommand::Shutdown => return,
    };

    if let Err(e) = &result {
        warn!(error = %e, "Failed to apply plan change");
    }
    // The caller may have given up waiting.
    let _ = reply.send(result);
}
