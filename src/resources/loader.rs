//! Load executors.
//!
//! The [`ResourceCache`](crate::resources::resourcecache::ResourceCache) never
//! decodes images itself; it submits [`LoadJob`]s to a [`LoadExecutor`] and
//! collects [`LoadOutcome`]s from it during `pump`. Results are always
//! delivered on the host thread, so cache state, handles and observers stay
//! single-threaded.
//!
//! - [`InlineExecutor`] runs queued jobs synchronously inside `drain`. Fully
//!   deterministic; used by tests and the synthetic demo.
//! - [`ThreadedExecutor`] hands jobs to a background thread over
//!   `crossbeam_channel` and drains whatever has finished.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::warn;

use crate::error::LoadError;
use crate::events::loader::{LoadCmd, LoadJob, LoadOutcome};
use crate::systems::atlasloader::{AtlasSource, load_frame_set_isolated};
use crate::systems::loaderthread::loader_thread;

/// Runs atlas loads on behalf of the cache.
pub trait LoadExecutor {
    /// Queue a job. Must not block on the load itself.
    fn submit(&mut self, job: LoadJob);

    /// Collect the outcomes that are ready now.
    fn drain(&mut self) -> Vec<LoadOutcome>;

    /// Number of submitted jobs whose outcome has not been drained yet.
    fn pending(&self) -> usize;
}

/// Executes jobs on the calling thread when drained.
pub struct InlineExecutor {
    source: Arc<dyn AtlasSource>,
    queue: VecDeque<LoadJob>,
}

impl InlineExecutor {
    pub fn new(source: Arc<dyn AtlasSource>) -> Self {
        Self {
            source,
            queue: VecDeque::new(),
        }
    }
}

impl LoadExecutor for InlineExecutor {
    fn submit(&mut self, job: LoadJob) {
        self.queue.push_back(job);
    }

    fn drain(&mut self) -> Vec<LoadOutcome> {
        self.queue
            .drain(..)
            .map(|job| {
                let result = load_frame_set_isolated(self.source.as_ref(), &job.descriptor);
                LoadOutcome { job, result }
            })
            .collect()
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Executes jobs on a dedicated loader thread.
///
/// The thread is asked to shut down and joined when the executor is dropped.
pub struct ThreadedExecutor {
    tx_cmd: Sender<LoadCmd>,
    rx_out: Receiver<LoadOutcome>,
    handle: Option<JoinHandle<()>>,
    in_flight: usize,
    // Jobs that could not reach the thread, reported on the next drain.
    stranded: Vec<LoadOutcome>,
}

impl ThreadedExecutor {
    pub fn spawn(source: Arc<dyn AtlasSource>) -> Result<Self, String> {
        let (tx_cmd, rx_cmd) = unbounded::<LoadCmd>();
        let (tx_out, rx_out) = unbounded::<LoadOutcome>();

        let handle = std::thread::Builder::new()
            .name("atlas-loader".into())
            .spawn(move || loader_thread(source, rx_cmd, tx_out))
            .map_err(|e| format!("Failed to spawn atlas loader thread: {}", e))?;

        Ok(Self {
            tx_cmd,
            rx_out,
            handle: Some(handle),
            in_flight: 0,
            stranded: Vec::new(),
        })
    }

    /// Block until every submitted job has produced an outcome.
    pub fn wait_all(&mut self) -> Vec<LoadOutcome> {
        let mut out: Vec<LoadOutcome> = self.stranded.drain(..).collect();
        while self.in_flight > 0 {
            match self.rx_out.recv() {
                Ok(outcome) => {
                    self.in_flight -= 1;
                    out.push(outcome);
                }
                Err(_) => break,
            }
        }
        out
    }
}

impl LoadExecutor for ThreadedExecutor {
    fn submit(&mut self, job: LoadJob) {
        match self.tx_cmd.send(LoadCmd::Fetch(job)) {
            Ok(()) => self.in_flight += 1,
            Err(err) => {
                let LoadCmd::Fetch(job) = err.into_inner() else {
                    return;
                };
                warn!("atlas loader thread is not running; failing {}", job.key);
                self.stranded.push(LoadOutcome {
                    job,
                    result: Err(LoadError::Unavailable("loader thread stopped".into())),
                });
            }
        }
    }

    fn drain(&mut self) -> Vec<LoadOutcome> {
        let received: Vec<LoadOutcome> = self.rx_out.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(received.len());
        let mut out: Vec<LoadOutcome> = self.stranded.drain(..).collect();
        out.extend(received);
        out
    }

    fn pending(&self) -> usize {
        self.in_flight + self.stranded.len()
    }
}

impl Drop for ThreadedExecutor {
    fn drop(&mut self) {
        let _ = self.tx_cmd.send(LoadCmd::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
