//! Controller - dispatches reconciliations for tracked devices.
//!
//! Keys arrive from registry change notifications, from explicit enqueues
//! and from requeue timers. The controller guarantees:
//! - at most one in-flight reconciliation per key (re-enqueues while running
//!   mark the key dirty, and it runs once more afterwards)
//! - at most `workers` reconciliations in flight overall
//! - successful passes are requeued after the delay they ask for, failed
//!   passes after an exponential backoff

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::ObjectKey;
use crate::config::Config;
use crate::events::EventRecorder;
use crate::reconciler::{Action, ReconcileContext, ReconcileError, Reconciler};
use crate::registry::Registry;

/// Handle for enqueuing keys from outside the controller.
#[derive(Clone)]
pub struct Enqueuer {
    tx: mpsc::UnboundedSender<ObjectKey>,
}

impl Enqueuer {
    /// Returns false once the controller has stopped.
    pub fn enqueue(&self, key: ObjectKey) -> bool {
        self.tx.send(key).is_ok()
    }
}

/// Bookkeeping for keys waiting, running and scheduled.
#[derive(Default)]
struct WorkQueue {
    ready: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    /// Generation of the pending timer per key; older timers are ignored.
    scheduled: HashMap<ObjectKey, u64>,
    next_generation: u64,
}

impl WorkQueue {
    fn enqueue(&mut self, key: ObjectKey) {
        self.scheduled.remove(&key);
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.ready.push_back(key);
        }
    }

    /// Next key to start, if a worker slot is free.
    fn next(&mut self, workers: usize) -> Option<ObjectKey> {
        if self.in_flight.len() >= workers {
            return None;
        }
        let key = self.ready.pop_front()?;
        self.queued.remove(&key);
        self.in_flight.insert(key.clone());
        Some(key)
    }

    /// Marks `key` done. Returns true when it was re-enqueued meanwhile.
    fn done(&mut self, key: &ObjectKey) -> bool {
        self.in_flight.remove(key);
        self.dirty.remove(key)
    }

    fn schedule(&mut self, key: ObjectKey) -> u64 {
        self.next_generation += 1;
        self.scheduled.insert(key, self.next_generation);
        self.next_generation
    }

    fn is_current(&self, key: &ObjectKey, generation: u64) -> bool {
        self.scheduled.get(key) == Some(&generation)
    }

    fn forget(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
        self.scheduled.remove(key);
    }
}

/// Runs a [`Reconciler`] for every device in a [`Registry`].
pub struct Controller<R> {
    reconciler: Arc<R>,
    registry: Arc<dyn Registry>,
    recorder: Arc<dyn EventRecorder>,
    config: Config,
    enqueue_tx: mpsc::UnboundedSender<ObjectKey>,
    enqueue_rx: mpsc::UnboundedReceiver<ObjectKey>,
}

impl<R: Reconciler + 'static> Controller<R> {
    pub fn new(
        reconciler: Arc<R>,
        registry: Arc<dyn Registry>,
        recorder: Arc<dyn EventRecorder>,
        config: Config,
    ) -> Self {
        let (enqueue_tx, enqueue_rx) = mpsc::unbounded_channel();
        Self {
            reconciler,
            registry,
            recorder,
            config,
            enqueue_tx,
            enqueue_rx,
        }
    }

    pub fn enqueuer(&self) -> Enqueuer {
        Enqueuer {
            tx: self.enqueue_tx.clone(),
        }
    }

    async fn resync(&self, queue: &mut WorkQueue) {
        match self.registry.list_devices().await {
            Ok(devices) => {
                info!("Resync: {} devices", devices.len());
                for device in devices {
                    queue.enqueue(device.key());
                }
            }
            Err(e) => warn!("Failed to list devices: {}", e),
        }
    }

    fn spawn_timer(
        &self,
        queue: &mut WorkQueue,
        key: ObjectKey,
        delay: Duration,
        timer_tx: &mpsc::UnboundedSender<(ObjectKey, u64)>,
    ) {
        let generation = queue.schedule(key.clone());
        let timer_tx = timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer_tx.send((key, generation));
        });
    }

    fn handle_result(
        &self,
        queue: &mut WorkQueue,
        key: ObjectKey,
        result: Result<Action, ReconcileError>,
        timer_tx: &mpsc::UnboundedSender<(ObjectKey, u64)>,
    ) {
        let rerun = queue.done(&key);

        let delay = match result {
            Ok(action) => {
                queue.failures.remove(&key);
                match action.requeue_after {
                    Some(delay) => {
                        debug!("Requeue {} in {:?}", key, delay);
                        Some(delay)
                    }
                    None => {
                        queue.forget(&key);
                        None
                    }
                }
            }
            Err(e) => {
                let failures = queue.failures.entry(key.clone()).or_insert(0);
                *failures = failures.saturating_add(1);
                let delay = if e.is_configuration() {
                    self.config.backoff_max
                } else {
                    self.config.backoff(*failures)
                };
                if e.is_configuration() {
                    error!(
                        "Device {} needs operator action: {} (retrying in {:?})",
                        key, e, delay
                    );
                } else {
                    debug!(
                        "Device {} failed {} time(s), retrying in {:?}: {}",
                        key, failures, delay, e
                    );
                }
                Some(delay)
            }
        };

        if rerun {
            queue.enqueue(key);
        } else if let Some(delay) = delay {
            self.spawn_timer(queue, key, delay, timer_tx);
        }
    }

    fn start(
        &self,
        key: ObjectKey,
        cancel: &watch::Receiver<bool>,
        done_tx: &mpsc::UnboundedSender<(ObjectKey, Result<Action, ReconcileError>)>,
    ) {
        let ctx = ReconcileContext::new(Arc::clone(&self.recorder))
            .with_cancellation(cancel.clone())
            .with_deadline(Instant::now() + self.config.reconcile_timeout);
        let reconciler = Arc::clone(&self.reconciler);
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result = reconciler.reconcile(&ctx, &key).await;
            let _ = done_tx.send((key, result));
        });
    }

    /// Run until `shutdown` flips to `true`.
    ///
    /// In-flight reconciliations are cancelled on shutdown and awaited.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.registry.subscribe();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel::<(ObjectKey, u64)>();
        let mut queue = WorkQueue::default();
        let workers = self.config.workers.max(1);

        info!("Device controller started with {} workers", workers);
        self.resync(&mut queue).await;

        loop {
            while let Some(key) = queue.next(workers) {
                debug!("Reconciling {}", key);
                self.start(key, &cancel_rx, &done_tx);
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some((key, result)) = done_rx.recv() => {
                    self.handle_result(&mut queue, key, result, &timer_tx);
                }
                Some((key, generation)) = timer_rx.recv() => {
                    if queue.is_current(&key, generation) {
                        queue.enqueue(key);
                    }
                }
                Some(key) = self.enqueue_rx.recv() => {
                    queue.enqueue(key);
                }
                event = events.recv() => match event {
                    Ok(event) => queue.enqueue(event.key()),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Missed {} registry events, resyncing", n);
                        self.resync(&mut queue).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Registry event stream closed");
                        break;
                    }
                },
            }
        }

        info!(
            "Device controller stopping, cancelling {} in-flight reconciliations",
            queue.in_flight.len()
        );
        let _ = cancel_tx.send(true);
        while !queue.in_flight.is_empty() {
            match done_rx.recv().await {
                Some((key, _)) => {
                    queue.done(&key);
                }
                None => break,
            }
        }
        info!("Device controller stopped");
    }
}
