//! Worker pool with in-order delivery.
//!
//! Workers share one bounded task queue and return `(sequence, result)`
//! pairs on an unbounded result channel. The submitting thread parks early
//! results in a reorder buffer and delivers them strictly by sequence.

use std::any::Any;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;

use raypipe_math::RayDescriptor;

use super::{RayJob, ResultSink, StreamPlan, StreamStats};
use crate::error::{PipelineError, PipelineResult};
use crate::reader::{RayEvent, RayReader};

/// Queued tasks per worker.
const QUEUE_DEPTH: usize = 2;

type Task = (u64, RayDescriptor);

/// Sequence number, worker index and the result or panic message.
type Outcome<T> = (u64, usize, Result<T, String>);

/// Results that arrived ahead of their turn.
#[derive(Debug)]
struct ReorderBuffer<T> {
    parked: BTreeMap<u64, T>,
    next: u64,
}

impl<T> ReorderBuffer<T> {
    fn new() -> Self {
        Self {
            parked: BTreeMap::new(),
            next: 0,
        }
    }

    fn insert(&mut self, sequence: u64, value: T) {
        self.parked.insert(sequence, value);
    }

    /// Next result in sequence, if it has arrived.
    fn pop_ready(&mut self) -> Option<T> {
        let value = self.parked.remove(&self.next)?;
        self.next += 1;
        Some(value)
    }

    /// Number of results delivered so far.
    fn delivered(&self) -> u64 {
        self.next
    }
}

/// Submitting side of the pool.
struct Feeder<T> {
    tasks: SyncSender<Task>,
    results: Receiver<Outcome<T>>,
    reorder: ReorderBuffer<T>,
    submitted: u64,
}

impl<T> Feeder<T> {
    fn submit<S: ResultSink<T>>(&mut self, ray: RayDescriptor, sink: &mut S) -> PipelineResult<()> {
        if self.tasks.send((self.submitted, ray)).is_err() {
            // Every worker has exited; report the failure that caused it
            self.poll(sink)?;
            return Err(PipelineError::Consistency(
                "worker pool shut down unexpectedly".into(),
            ));
        }
        self.submitted += 1;
        Ok(())
    }

    fn accept<S: ResultSink<T>>(&mut self, outcome: Outcome<T>, sink: &mut S) -> PipelineResult<()> {
        let (sequence, worker, result) = outcome;
        let value = result.map_err(|reason| PipelineError::WorkerDied { worker, reason })?;
        self.reorder.insert(sequence, value);
        while let Some(value) = self.reorder.pop_ready() {
            sink.deliver(value)?;
        }
        Ok(())
    }

    /// Deliver whatever has already arrived without waiting.
    fn poll<S: ResultSink<T>>(&mut self, sink: &mut S) -> PipelineResult<()> {
        while let Ok(outcome) = self.results.try_recv() {
            self.accept(outcome, sink)?;
        }
        Ok(())
    }

    /// Wait until every submitted ray has been delivered.
    fn drain<S: ResultSink<T>>(&mut self, sink: &mut S) -> PipelineResult<()> {
        while self.reorder.delivered() < self.submitted {
            let outcome = self.results.recv().map_err(|_| {
                PipelineError::Consistency("worker pool shut down unexpectedly".into())
            })?;
            self.accept(outcome, sink)?;
        }
        Ok(())
    }

    fn feed<R, S>(
        &mut self,
        reader: &mut RayReader<R>,
        sink: &mut S,
        plan: &StreamPlan,
        drain_every: Option<u64>,
    ) -> PipelineResult<StreamStats>
    where
        R: BufRead,
        S: ResultSink<T>,
    {
        let mut stats = StreamStats::default();
        loop {
            match reader.next_event()? {
                RayEvent::Ray(ray) => {
                    self.submit(ray, sink)?;
                    stats.rays += 1;
                    self.poll(sink)?;
                    if drain_every.is_some_and(|n| n > 0 && stats.rays % n == 0) {
                        self.drain(sink)?;
                    }
                    if plan.is_complete(stats.rays) {
                        break;
                    }
                }
                RayEvent::Flush => {
                    self.drain(sink)?;
                    sink.flush()?;
                    stats.flushes += 1;
                }
                RayEvent::EndOfInput => break,
            }
        }
        self.drain(sink)?;
        Ok(stats)
    }
}

fn worker_loop<J: RayJob>(
    worker: usize,
    job: &J,
    tasks: &Mutex<Receiver<Task>>,
    results: &Sender<Outcome<J::Output>>,
) {
    loop {
        let task = match tasks.lock() {
            Ok(queue) => queue.recv(),
            Err(_) => return,
        };
        let Ok((sequence, ray)) = task else {
            return;
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| job.run(&ray)))
            .map_err(|payload| panic_message(payload.as_ref()));
        let failed = outcome.is_err();
        if results.send((sequence, worker, outcome)).is_err() || failed {
            return;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic during evaluation".to_string()
    }
}

/// Evaluate rays on `workers` scoped threads, delivering results in input
/// order.
///
/// Every `drain_every` rays, and at each flush request, submission waits
/// until all outstanding results have been delivered. A panic in a worker
/// ends the run with [`PipelineError::WorkerDied`] once the remaining
/// workers have stopped.
pub fn run_pool<R, J, S>(
    reader: &mut RayReader<R>,
    job: &J,
    sink: &mut S,
    plan: &StreamPlan,
    workers: usize,
    drain_every: Option<u64>,
) -> PipelineResult<StreamStats>
where
    R: BufRead,
    J: RayJob,
    S: ResultSink<J::Output>,
{
    let workers = workers.max(1);
    let (task_tx, task_rx) = mpsc::sync_channel::<Task>(workers * QUEUE_DEPTH);
    let (result_tx, result_rx) = mpsc::channel::<Outcome<J::Output>>();
    let task_rx = Arc::new(Mutex::new(task_rx));

    log::info!("evaluating rays on {} worker threads", workers);
    thread::scope(|scope| {
        for worker in 0..workers {
            let tasks = Arc::clone(&task_rx);
            let results = result_tx.clone();
            scope.spawn(move || worker_loop(worker, job, &tasks, &results));
        }
        drop(task_rx);
        drop(result_tx);

        let mut feeder = Feeder {
            tasks: task_tx,
            results: result_rx,
            reorder: ReorderBuffer::new(),
            submitted: 0,
        };
        let outcome = feeder.feed(reader, sink, plan, drain_every);
        // Closing the queue lets the workers exit before the scope joins them
        drop(feeder);
        outcome
    })
}
