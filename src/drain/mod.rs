//! Batch/drain scheduler: coalesces encoder writes into one flush per
//! boundary, hands framed buffers to the engine in seal order, reconciles
//! provisional ids against the engine's offset map, and cancels atomically
//! on schema change.
//!
//! One worker thread owns the engine hand-off; requests arrive over an
//! mpsc channel and drain FIFO, so seal order is the settlement order. The
//! deferred flush boundary is the worker's receive timeout: writes issued
//! while the worker sleeps coalesce into the batch it steals on wake-up.

pub mod handle;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::encode::PendingBatch;
use crate::engine::{EngineBoundary, MutationFrame};
use crate::error::UmbraError;

pub use handle::{OpHandle, Settlement};

/// Shared-flag notifier pair for explicit drain requests.
pub type DrainNotifier = Arc<(Mutex<bool>, Condvar)>;

/// A sealed batch travelling to the worker.
pub struct SealedWork {
    frame: MutationFrame,
    handles: Vec<OpHandle>,
    epoch: u64,
    done: Option<DrainNotifier>,
}

impl SealedWork {
    /// Packages a sealed frame with its settlement handles.
    pub fn new(frame: MutationFrame, handles: Vec<OpHandle>, epoch: u64) -> Self {
        Self {
            frame,
            handles,
            epoch,
            done: None,
        }
    }

    /// Attaches a notifier signalled once this batch settles.
    pub fn with_notifier(mut self, done: DrainNotifier) -> Self {
        self.done = Some(done);
        self
    }
}

enum DrainMsg {
    Flush(SealedWork),
    Barrier(DrainNotifier),
    Shutdown,
}

/// Handle to the drain worker; dropping it shuts the worker down.
pub struct DrainScheduler {
    sender: Sender<DrainMsg>,
    worker: Option<thread::JoinHandle<()>>,
}

impl DrainScheduler {
    /// Spawns the worker. `active` is the client's accumulating batch
    /// slot, stolen on timer expiry; `epoch` is the schema generation a
    /// batch must still match when it reaches the engine.
    pub fn spawn(
        engine: Arc<dyn EngineBoundary>,
        active: Arc<Mutex<Option<PendingBatch>>>,
        epoch: Arc<AtomicU64>,
        drain_interval_ms: u64,
    ) -> Self {
        let (sender, receiver): (Sender<DrainMsg>, Receiver<DrainMsg>) = mpsc::channel();
        let timeout = Duration::from_millis(if drain_interval_ms == 0 {
            50
        } else {
            drain_interval_ms
        });
        let worker = thread::spawn(move || {
            drain_loop(engine, active, epoch, receiver, timeout);
        });
        Self {
            sender,
            worker: Some(worker),
        }
    }

    /// Queues a sealed batch. Callers seal and send under the active-slot
    /// lock so the worker's timer path cannot reorder around them.
    pub fn submit(&self, work: SealedWork) {
        if self.sender.send(DrainMsg::Flush(work)).is_err() {
            tracing::warn!("drain worker gone; batch dropped");
        }
    }

    /// Queues a barrier and blocks until every previously queued batch has
    /// settled.
    pub fn barrier(&self) {
        let notifier: DrainNotifier = Arc::new((Mutex::new(false), Condvar::new()));
        if self
            .sender
            .send(DrainMsg::Barrier(Arc::clone(&notifier)))
            .is_err()
        {
            return;
        }
        wait_notifier(&notifier);
    }
}

impl Drop for DrainScheduler {
    fn drop(&mut self) {
        let _ = self.sender.send(DrainMsg::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Blocks on a drain notifier.
pub fn wait_notifier(notifier: &DrainNotifier) {
    let (lock, cvar) = &**notifier;
    let mut done = lock.lock().expect("drain notifier poisoned");
    while !*done {
        done = cvar.wait(done).expect("drain notifier poisoned");
    }
}

fn signal(notifier: &DrainNotifier) {
    let (lock, cvar) = &**notifier;
    let mut done = lock.lock().expect("drain notifier poisoned");
    *done = true;
    cvar.notify_all();
}

fn drain_loop(
    engine: Arc<dyn EngineBoundary>,
    active: Arc<Mutex<Option<PendingBatch>>>,
    epoch: Arc<AtomicU64>,
    receiver: Receiver<DrainMsg>,
    timeout: Duration,
) {
    loop {
        match receiver.recv_timeout(timeout) {
            Ok(DrainMsg::Flush(work)) => {
                process(&engine, &epoch, work);
                // Drain everything already queued before sleeping again.
                while let Ok(msg) = receiver.try_recv() {
                    match msg {
                        DrainMsg::Flush(work) => process(&engine, &epoch, work),
                        DrainMsg::Barrier(notifier) => signal(&notifier),
                        DrainMsg::Shutdown => return,
                    }
                }
            }
            Ok(DrainMsg::Barrier(notifier)) => signal(&notifier),
            Ok(DrainMsg::Shutdown) => return,
            Err(RecvTimeoutError::Timeout) => {
                if let Some(work) = steal(&active, &epoch) {
                    process(&engine, &epoch, work);
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Timer-path flush: takes the accumulating batch, if any. The queue is
/// drained before this is called, so seal order holds.
fn steal(active: &Mutex<Option<PendingBatch>>, epoch: &AtomicU64) -> Option<SealedWork> {
    let mut slot = active.lock().expect("active batch lock poisoned");
    let batch = slot.take()?;
    if batch.is_empty() {
        return None;
    }
    let batch_epoch = batch.epoch();
    if batch_epoch != epoch.load(Ordering::Acquire) {
        batch.cancel(UmbraError::SchemaChanged);
        return None;
    }
    match batch.seal() {
        Ok((frame, handles)) => Some(SealedWork::new(frame, handles, batch_epoch)),
        Err(err) => {
            tracing::warn!(%err, "sealing stolen batch failed");
            None
        }
    }
}

fn process(engine: &Arc<dyn EngineBoundary>, epoch: &AtomicU64, work: SealedWork) {
    let SealedWork {
        frame,
        handles,
        epoch: batch_epoch,
        done,
    } = work;

    // A schema change after seal but before send: nothing from this batch
    // may reach the engine.
    if batch_epoch != epoch.load(Ordering::Acquire) {
        settle_all_err(&handles, UmbraError::SchemaChanged);
        if let Some(done) = done {
            signal(&done);
        }
        return;
    }

    let ops = handles.len();
    let result = engine.apply(frame);
    match result {
        Ok(offsets) => {
            if batch_epoch != epoch.load(Ordering::Acquire) {
                // Sent before the change; callers must not assume success.
                settle_all_err(&handles, UmbraError::SchemaChanged);
            } else {
                for handle in &handles {
                    handle.settle_with_offset(offsets.get(handle.type_tag()));
                }
                tracing::debug!(ops, "batch settled");
            }
        }
        Err(err) => {
            tracing::warn!(%err, ops, "engine rejected batch");
            settle_all_err(&handles, err);
        }
    }
    if let Some(done) = done {
        signal(&done);
    }
}

fn settle_all_err(handles: &[OpHandle], err: UmbraError) {
    for handle in handles {
        handle.settle_err(err.clone());
    }
}
