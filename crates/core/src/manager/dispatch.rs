//! Dispatcher: turns elapsed retry delays into worker wake-ups.

use super::Shared;
use crate::queue::WorkQueue;
use crate::syncer::Syncer;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(super) async fn run_dispatcher<S: Syncer>(
    shared: Weak<Shared<S>>,
    queue: Arc<WorkQueue>,
    root: CancellationToken,
) {
    loop {
        let id = tokio::select! {
            biased;
            _ = root.cancelled() => break,
            id = queue.dequeue() => id,
        };

        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.wake_for_requeue(&id);
    }

    debug!("dispatcher stopped");
}
