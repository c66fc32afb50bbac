use crate::dedup::DedupTracker;
use crate::detector::panic_message;
use crate::error::Error;
use crate::model::CaseDirectory;
use crate::processor::CaseProcessor;
use crate::progress::ProgressReporter;
use crate::queue::WorkQueue;
use crossbeam_channel::Receiver;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Live counters shared by all workers of a pool.
#[derive(Debug, Default)]
pub struct RunCounters {
    processed: AtomicUsize,
    persisted: AtomicUsize,
    failed: AtomicUsize,
    images: AtomicUsize,
    plates: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub processed: usize,
    pub persisted: usize,
    pub failed: usize,
    pub images: usize,
    pub plates: usize,
}

impl RunCounters {
    pub fn snapshot(&self) -> RunTotals {
        RunTotals {
            processed: self.processed.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            images: self.images.load(Ordering::Relaxed),
            plates: self.plates.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
struct WorkerContext {
    processor: CaseProcessor,
    dedup: Arc<DedupTracker>,
    jobs: Receiver<CaseDirectory>,
    reporter: Arc<dyn ProgressReporter>,
    counters: Arc<RunCounters>,
}

/// N threads draining the work queue. Workers exit once the queue is closed
/// and empty.
pub struct WorkerPool {
    context: WorkerContext,
    queue: Arc<WorkQueue>,
    handles: Vec<(usize, JoinHandle<()>)>,
    next_id: usize,
    restarts: usize,
}

impl WorkerPool {
    pub fn start(
        count: usize,
        processor: CaseProcessor,
        dedup: Arc<DedupTracker>,
        queue: Arc<WorkQueue>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Self, Error> {
        let context = WorkerContext {
            processor,
            dedup,
            jobs: queue.receiver(),
            reporter,
            counters: Arc::new(RunCounters::default()),
        };
        let mut pool = Self {
            context,
            queue,
            handles: Vec::with_capacity(count),
            next_id: 0,
            restarts: 0,
        };
        for _ in 0..count.max(1) {
            pool.spawn_worker()?;
        }
        info!("Started {} worker(s)", pool.handles.len());
        Ok(pool)
    }

    fn spawn_worker(&mut self) -> Result<(), Error> {
        let id = self.next_id;
        self.next_id += 1;
        let context = self.context.clone();
        let handle = thread::Builder::new()
            .name(format!("case-worker-{}", id))
            .spawn(move || worker_loop(id, context))?;
        self.handles.push((id, handle));
        Ok(())
    }

    pub fn counters(&self) -> Arc<RunCounters> {
        Arc::clone(&self.context.counters)
    }

    pub fn alive(&self) -> usize {
        self.handles.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Replace workers that exited while intake is still open. Fails once more
    /// than `max_restarts` replacements would be needed.
    pub fn supervise(&mut self, max_restarts: usize) -> Result<usize, Error> {
        if self.queue.is_closed() {
            return Ok(0);
        }
        let (dead, alive): (Vec<_>, Vec<_>) = self
            .handles
            .drain(..)
            .partition(|(_, handle)| handle.is_finished());
        self.handles = alive;

        let mut replaced = 0;
        for (id, handle) in dead {
            match handle.join() {
                Ok(()) => warn!("Worker {} exited unexpectedly", id),
                Err(payload) => error!("Worker {} died: {}", id, panic_message(payload)),
            }
            if self.restarts >= max_restarts {
                return Err(Error::WorkersExhausted(max_restarts));
            }
            self.restarts += 1;
            self.spawn_worker()?;
            replaced += 1;
        }
        if replaced > 0 {
            info!("Replaced {} worker(s), {} restart(s) so far", replaced, self.restarts);
        }
        Ok(replaced)
    }

    /// Wait for every worker to finish. Call after closing the queue.
    pub fn join(self) -> RunTotals {
        for (id, handle) in self.handles {
            if let Err(payload) = handle.join() {
                error!("Worker {} died: {}", id, panic_message(payload));
            }
        }
        self.context.counters.snapshot()
    }
}

fn worker_loop(id: usize, ctx: WorkerContext) {
    debug!("Worker {} started", id);
    for case in ctx.jobs.iter() {
        let label = case.identity.to_string();
        ctx.reporter.on_case_start(&label);

        let outcome = catch_unwind(AssertUnwindSafe(|| ctx.processor.process(&case)));
        ctx.counters.processed.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(outcome) => {
                let persisted = outcome.is_complete();
                if persisted {
                    ctx.dedup.mark_complete(&case.identity);
                    ctx.counters.persisted.fetch_add(1, Ordering::Relaxed);
                } else {
                    ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
                ctx.counters
                    .images
                    .fetch_add(outcome.result.images_total, Ordering::Relaxed);
                ctx.counters
                    .plates
                    .fetch_add(outcome.result.plates_found(), Ordering::Relaxed);
                ctx.reporter.on_case_complete(&outcome.result, persisted);
            }
            Err(payload) => {
                ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!("Worker {} failed on {}: {}", id, label, panic_message(payload));
            }
        }
    }
    debug!("Worker {} stopped", id);
}
