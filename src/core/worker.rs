//! Background worker that owns the sync service
//!
//! Socket calls block for up to the receive timeout, so they must not run on
//! an async executor or a UI thread. [`SyncWorker`] moves the service onto a
//! dedicated OS thread and hands out an async front end.
//!
//! # Example
//!
//! ```no_run
//! use nlfw::core::channel::ChannelConfig;
//! use nlfw::core::sync::{ConfigSyncService, TracingObserver};
//! use nlfw::core::worker::SyncWorker;
//!
//! # async fn run() -> Result<(), nlfw::core::error::SyncError> {
//! let service = ConfigSyncService::connect(ChannelConfig::default(), Box::new(TracingObserver));
//! let worker = SyncWorker::spawn(service);
//! let rules = worker.fetch().await?;
//! println!("{} rules active", rules.len());
//! # Ok(())
//! # }
//! ```

use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::core::channel::Exchange;
use crate::core::error::SyncError;
use crate::core::rule::RuleRecord;
use crate::core::sync::{ApplyOutcome, ConfigSyncService};

/// Pending requests beyond this make callers wait for queue space
const QUEUE_DEPTH: usize = 8;

enum Request {
    Fetch(oneshot::Sender<Result<Vec<RuleRecord>, SyncError>>),
    Apply(
        Vec<RuleRecord>,
        oneshot::Sender<Result<ApplyOutcome, SyncError>>,
    ),
}

/// Async handle to a service running on its own thread.
///
/// Requests are served one at a time in submission order. Dropping a reply
/// future abandons the answer but the exchange still runs to completion.
pub struct SyncWorker {
    requests: mpsc::Sender<Request>,
    thread: Option<JoinHandle<()>>,
}

impl SyncWorker {
    pub fn spawn<C>(service: ConfigSyncService<C>) -> Self
    where
        C: Exchange + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let thread = thread::Builder::new()
            .name("nlfw-sync".to_string())
            .spawn(move || serve(service, rx));

        match thread {
            Ok(handle) => Self {
                requests: tx,
                thread: Some(handle),
            },
            Err(e) => {
                // Receiver dropped with the closure; every request reports WorkerStopped
                warn!("Failed to spawn sync worker thread: {}", e);
                Self {
                    requests: tx,
                    thread: None,
                }
            }
        }
    }

    /// Fetches the kernel configuration.
    ///
    /// # Errors
    ///
    /// Same as [`ConfigSyncService::get_current_config`], plus
    /// `WorkerStopped` if the worker thread is gone.
    pub async fn fetch(&self) -> Result<Vec<RuleRecord>, SyncError> {
        let (reply, answer) = oneshot::channel();
        self.submit(Request::Fetch(reply)).await?;
        answer.await.map_err(|_| SyncError::WorkerStopped)?
    }

    /// Applies and verifies `rules`.
    ///
    /// # Errors
    ///
    /// Same as [`ConfigSyncService::apply_config`], plus
    /// `WorkerStopped` if the worker thread is gone.
    pub async fn apply(&self, rules: Vec<RuleRecord>) -> Result<ApplyOutcome, SyncError> {
        let (reply, answer) = oneshot::channel();
        self.submit(Request::Apply(rules, reply)).await?;
        answer.await.map_err(|_| SyncError::WorkerStopped)?
    }

    async fn submit(&self, request: Request) -> Result<(), SyncError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| SyncError::WorkerStopped)
    }

    /// Stops accepting requests and waits for the thread to exit.
    ///
    /// Requests already queued are still served. The service, and with it
    /// the socket, is dropped on the worker thread.
    pub fn shutdown(mut self) {
        let thread = self.thread.take();
        drop(self);
        if let Some(handle) = thread
            && handle.join().is_err()
        {
            warn!("Sync worker thread panicked");
        }
    }
}

fn serve<C: Exchange>(mut service: ConfigSyncService<C>, mut requests: mpsc::Receiver<Request>) {
    debug!("Sync worker started");
    while let Some(request) = requests.blocking_recv() {
        match request {
            Request::Fetch(reply) => {
                let _ = reply.send(service.get_current_config());
            }
            Request::Apply(rules, reply) => {
                let _ = reply.send(service.apply_config(&rules));
            }
        }
    }
    debug!("Sync worker stopped");
}
