//! Group Scheduler - runs handlers sequentially or one worker per handler
//!
//! Every handler invocation is isolated: an error or a panic is caught at
//! this boundary, logged with the handler identifier and recorded, while the
//! remaining handlers still run and are awaited.

use crate::handler::{Handler, HandlerReport};
use crate::sync::SyncContext;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Result of one handler invocation
#[derive(Debug, Clone)]
pub struct HandlerRun {
    pub identifier: String,
    pub result: Result<HandlerReport, String>,
}

/// Results from a complete run over all handlers
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total_handlers: usize,
    pub successful_handlers: usize,
    pub failed_handlers: usize,
    pub failed_groups: usize,
    pub updated_files: usize,
    pub duration: Duration,
    pub runs: Vec<HandlerRun>,
}

/// Runs handlers and collects their reports
#[derive(Debug, Clone, Copy)]
pub struct GroupScheduler {
    concurrent: bool,
}

impl GroupScheduler {
    pub fn new(concurrent: bool) -> Self {
        Self { concurrent }
    }

    /// Run every handler once.
    ///
    /// Sequential mode keeps the given order; concurrent mode gives each
    /// handler its own worker and makes no ordering promise.
    pub async fn run(&self, handlers: Vec<Arc<dyn Handler>>, context: Arc<SyncContext>) -> RunSummary {
        let start_time = Instant::now();

        info!(
            "Running {} handlers ({})",
            handlers.len(),
            if self.concurrent { "concurrent" } else { "sequential" }
        );

        let runs = if self.concurrent && handlers.len() > 1 {
            run_concurrent(handlers, context).await
        } else {
            let mut runs = Vec::with_capacity(handlers.len());
            for handler in handlers {
                runs.push(invoke(handler, context.clone()).await);
            }
            runs
        };

        let summary = compile_summary(runs, start_time.elapsed());

        info!(
            "Run completed in {:.2}s: {} handlers succeeded, {} failed, {} files updated",
            summary.duration.as_secs_f64(),
            summary.successful_handlers,
            summary.failed_handlers,
            summary.updated_files
        );

        summary
    }
}

/// One worker slot per handler
async fn run_concurrent(handlers: Vec<Arc<dyn Handler>>, context: Arc<SyncContext>) -> Vec<HandlerRun> {
    let semaphore = Arc::new(Semaphore::new(handlers.len()));
    let mut futures = FuturesUnordered::new();

    for handler in handlers {
        let semaphore = semaphore.clone();
        let context = context.clone();
        let identifier = handler.identifier().to_string();

        let task = tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            invoke(handler, context).await
        });

        futures.push(async move { (identifier, task.await) });
    }

    let mut runs = Vec::new();
    while let Some((identifier, joined)) = futures.next().await {
        match joined {
            Ok(run) => runs.push(run),
            Err(e) => {
                error!("Worker for {} did not finish: {}", identifier, e);
                runs.push(HandlerRun {
                    identifier,
                    result: Err(e.to_string()),
                });
            }
        }
    }

    runs
}

async fn invoke(handler: Arc<dyn Handler>, context: Arc<SyncContext>) -> HandlerRun {
    let identifier = handler.identifier().to_string();
    debug!("Handling {}", identifier);

    let result = match AssertUnwindSafe(handler.handle(&context)).catch_unwind().await {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(e)) => {
            error!("Something went wrong when handling {}: {:?}", identifier, e);
            Err(format!("{:#}", e))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("Handler {} panicked: {}", identifier, message);
            Err(message)
        }
    };

    HandlerRun { identifier, result }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn compile_summary(runs: Vec<HandlerRun>, duration: Duration) -> RunSummary {
    let mut successful_handlers = 0;
    let mut failed_handlers = 0;
    let mut failed_groups = 0;
    let mut updated_files = 0;

    for run in &runs {
        match &run.result {
            Ok(report) => {
                successful_handlers += 1;
                failed_groups += report.failed_groups();
                updated_files += report.updated_files();
            }
            Err(_) => failed_handlers += 1,
        }
    }

    RunSummary {
        total_handlers: runs.len(),
        successful_handlers,
        failed_handlers,
        failed_groups,
        updated_files,
        duration,
        runs,
    }
}
