use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;

use crate::error::{PipelineError, PipelineResult};
use crate::ingestion::{IngestionContext, IngestionObserver, IngestionSeverity, SourceHandle};
use crate::types::IngestionProgress;

use super::guard::{ActiveIngestionGuard, CancellationToken};
use super::{IngestionOptions, IngestionOutcome, run_ingestion};

/// Worker → caller messages. A run yields zero or more `Progress` messages followed by exactly one
/// terminal `Complete` or `Error`.
#[derive(Debug)]
pub enum IngestionMessage {
    Progress(IngestionProgress),
    Complete(Box<IngestionOutcome>),
    Error(PipelineError),
}

impl IngestionMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IngestionMessage::Progress(_))
    }
}

/// Caller-facing entry point: runs at most one ingestion at a time, each on its own worker thread.
pub struct IngestionClient {
    options: IngestionOptions,
    observer: Option<Arc<dyn IngestionObserver>>,
    busy: Arc<AtomicBool>,
}

impl IngestionClient {
    pub fn new(options: IngestionOptions) -> Self {
        Self {
            options,
            observer: None,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach an observer notified of every run's outcome.
    pub fn with_observer(mut self, observer: Arc<dyn IngestionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    /// Whether a submitted run has not yet delivered its terminal message.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start ingesting `source` on a worker thread.
    ///
    /// Fails with [`PipelineError::IngestionInProgress`] while a previous run is still active, and
    /// with [`PipelineError::InvalidOptions`] before anything is spawned.
    pub fn submit(&self, source: SourceHandle) -> PipelineResult<IngestionRun> {
        self.options.validate()?;
        let guard = ActiveIngestionGuard::begin(Arc::clone(&self.busy))?;

        let ctx = IngestionContext {
            source_label: source.label().to_string(),
            format: source.format(),
        };
        let (tx, rx) = mpsc::channel::<IngestionMessage>();
        let cancel = CancellationToken::new();
        let worker = Worker {
            options: self.options.clone(),
            observer: self.observer.clone(),
            cancel: cancel.clone(),
            ctx: ctx.clone(),
            tx,
            guard,
        };

        let join = thread::Builder::new()
            .name("soh-ingestion".to_string())
            .spawn(move || worker.run(source))
            .map_err(|e| PipelineError::WorkerFailed {
                message: format!("failed to spawn ingestion worker: {e}"),
            })?;

        Ok(IngestionRun {
            receiver: rx,
            cancel,
            join: Some(join),
            finished: false,
            source_label: ctx.source_label,
        })
    }
}

impl fmt::Debug for IngestionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionClient")
            .field("options", &self.options)
            .field("has_observer", &self.observer.is_some())
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// State moved onto the worker thread.
struct Worker {
    options: IngestionOptions,
    observer: Option<Arc<dyn IngestionObserver>>,
    cancel: CancellationToken,
    ctx: IngestionContext,
    tx: mpsc::Sender<IngestionMessage>,
    guard: ActiveIngestionGuard,
}

impl Worker {
    fn run(self, source: SourceHandle) {
        let Worker {
            options,
            observer,
            cancel,
            ctx,
            tx,
            guard,
        } = self;

        let progress_tx = tx.clone();
        let mut on_progress = |p: IngestionProgress| {
            // A caller that stopped listening is not an error for the worker.
            let _ = progress_tx.send(IngestionMessage::Progress(p));
        };

        let result = match run_ingestion(source, &options, &cancel, &mut on_progress) {
            Ok(_) if cancel.is_cancelled() => Err(PipelineError::Cancelled),
            other => other,
        };

        if let Some(observer) = &observer {
            match &result {
                Ok(outcome) => observer.on_success(&ctx, outcome.stats()),
                Err(err) => {
                    let severity = IngestionSeverity::for_error(err);
                    observer.on_failure(&ctx, severity, err);
                    if severity >= options.alert_at_or_above {
                        observer.on_alert(&ctx, severity, err);
                    }
                }
            }
        }

        let message = match result {
            Ok(outcome) => IngestionMessage::Complete(Box::new(outcome)),
            Err(err) => IngestionMessage::Error(err),
        };
        // Free the client before the caller can observe the terminal message.
        drop(guard);
        let _ = tx.send(message);
    }
}

/// Handle to one submitted run.
///
/// Dropping an unfinished run requests cancellation and joins the worker.
pub struct IngestionRun {
    receiver: mpsc::Receiver<IngestionMessage>,
    cancel: CancellationToken,
    join: Option<thread::JoinHandle<()>>,
    finished: bool,
    source_label: String,
}

impl IngestionRun {
    /// A handle that can cancel this run from any thread.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn source_label(&self) -> &str {
        &self.source_label
    }

    /// Block for the next message. Returns `None` after the terminal message was delivered.
    pub fn next_message(&mut self) -> Option<IngestionMessage> {
        if self.finished {
            return None;
        }
        match self.receiver.recv() {
            Ok(IngestionMessage::Progress(p)) => Some(IngestionMessage::Progress(p)),
            Ok(IngestionMessage::Complete(outcome)) => {
                self.finish();
                // Cancellation requested after the worker's last check still wins.
                if self.cancel.is_cancelled() {
                    Some(IngestionMessage::Error(PipelineError::Cancelled))
                } else {
                    Some(IngestionMessage::Complete(outcome))
                }
            }
            Ok(IngestionMessage::Error(err)) => {
                self.finish();
                Some(IngestionMessage::Error(err))
            }
            Err(mpsc::RecvError) => {
                let message = match self.finish() {
                    Some(panic) => format!("worker panicked: {panic}"),
                    None => "worker exited without a result".to_string(),
                };
                tracing::error!(source = %self.source_label, %message, "ingestion worker lost");
                Some(IngestionMessage::Error(PipelineError::WorkerFailed { message }))
            }
        }
    }

    /// Block until the run ends, discarding progress.
    pub fn wait(self) -> PipelineResult<IngestionOutcome> {
        self.wait_with_progress(|_| {})
    }

    /// Block until the run ends, passing every progress snapshot to `on_progress`.
    pub fn wait_with_progress(mut self, mut on_progress: impl FnMut(&IngestionProgress)) -> PipelineResult<IngestionOutcome> {
        while let Some(message) = self.next_message() {
            match message {
                IngestionMessage::Progress(p) => on_progress(&p),
                IngestionMessage::Complete(outcome) => return Ok(*outcome),
                IngestionMessage::Error(err) => return Err(err),
            }
        }
        Err(PipelineError::WorkerFailed {
            message: "run already finished".to_string(),
        })
    }

    /// Mark the run finished and join the worker. Returns the panic message if it panicked.
    fn finish(&mut self) -> Option<String> {
        self.finished = true;
        let join = self.join.take()?;
        join.join().err().map(|payload| panic_message(&*payload))
    }
}

impl Iterator for IngestionRun {
    type Item = IngestionMessage;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message()
    }
}

impl Drop for IngestionRun {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl fmt::Debug for IngestionRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionRun")
            .field("source_label", &self.source_label)
            .field("finished", &self.finished)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
