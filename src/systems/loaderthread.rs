//! Background atlas loader thread.
//!
//! Spawned by [`crate::resources::loader::ThreadedExecutor`]. The thread owns
//! nothing but the shared [`AtlasSource`]; it blocks on the command channel,
//! runs each [`LoadCmd::Fetch`] to completion and sends the [`LoadOutcome`]
//! back. Outcomes are picked up on the host thread by
//! [`ResourceCache::pump`](crate::resources::resourcecache::ResourceCache::pump).
//!
//! Jobs are processed in submission order, one at a time. A source that
//! panics fails only its own job; the thread keeps serving.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};

use crate::events::loader::{LoadCmd, LoadOutcome};
use crate::systems::atlasloader::{AtlasSource, load_frame_set_isolated};

/// Loader thread body. Returns on [`LoadCmd::Shutdown`] or when every
/// command sender has been dropped.
pub fn loader_thread(
    source: Arc<dyn AtlasSource>,
    rx_cmd: Receiver<LoadCmd>,
    tx_out: Sender<LoadOutcome>,
) {
    info!(
        "atlas loader thread starting (id={:?})",
        std::thread::current().id()
    );

    while let Ok(cmd) = rx_cmd.recv() {
        match cmd {
            LoadCmd::Fetch(job) => {
                debug!(
                    "[loader] fetching '{}' for {}",
                    job.descriptor.image_locator, job.key
                );
                let result = load_frame_set_isolated(source.as_ref(), &job.descriptor);
                if tx_out.send(LoadOutcome { job, result }).is_err() {
                    // Executor dropped without a shutdown; nobody to report to.
                    break;
                }
            }
            LoadCmd::Shutdown => break,
        }
    }

    info!("atlas loader thread exiting");
}
