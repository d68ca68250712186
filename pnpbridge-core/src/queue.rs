//! Ingress queue, publish set and the single reconciliation worker.
//!
//! Discovery adapters enqueue from any thread. One worker task drains the
//! ingress queue into the publish set and hands the whole set to a
//! [`MessageHandler`] on every wake, so that every cycle can replay all live
//! messages.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::{BridgeError, Result};
use crate::message::PnpMessage;

/// Identifier assigned to a message when it is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

impl MessageId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The interface a bound message contributes to the registered set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct InterfaceDescriptor {
    pub component_name: String,
    pub interface_id: String,
    pub adapter_identity: String,
}

/// Processing status of an entry in the publish set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// Not yet matched and bound to a component.
    Pending,
    /// Bound to a live component; replayed on every reconciliation.
    Bound(InterfaceDescriptor),
}

/// One message held by the worker.
#[derive(Debug)]
pub struct PublishEntry {
    pub id: MessageId,
    pub message: PnpMessage,
    pub status: EntryStatus,
}

impl PublishEntry {
    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }

    pub fn interface(&self) -> Option<&InterfaceDescriptor> {
        match &self.status {
            EntryStatus::Bound(descriptor) => Some(descriptor),
            EntryStatus::Pending => None,
        }
    }
}

/// Messages owned by the worker task.
#[derive(Debug, Default)]
pub struct PublishSet {
    entries: Vec<PublishEntry>,
    drained_from: usize,
}

impl PublishSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PublishEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [PublishEntry] {
        &mut self.entries
    }

    /// Entries appended by the most recent drain.
    pub fn newly_drained(&self) -> &[PublishEntry] {
        &self.entries[self.drained_from.min(self.entries.len())..]
    }

    /// Interfaces of every bound entry, in arrival order.
    pub fn bound_interfaces(&self) -> Vec<InterfaceDescriptor> {
        self.entries
            .iter()
            .filter_map(|entry| entry.interface().cloned())
            .collect()
    }

    pub fn push(&mut self, id: MessageId, message: PnpMessage) {
        self.entries.push(PublishEntry {
            id,
            message,
            status: EntryStatus::Pending,
        });
    }

    /// Release (drop) the entry with the given id.
    pub fn release(&mut self, id: MessageId) -> Option<PnpMessage> {
        let index = self.entries.iter().position(|entry| entry.id == id)?;
        let entry = self.entries.remove(index);
        if index < self.drained_from {
            self.drained_from -= 1;
        }
        tracing::trace!(message = %entry.id, "Message released");
        Some(entry.message)
    }

    /// The entry bound to `component_name`, if any.
    pub fn bound_entry(&self, component_name: &str) -> Option<&PublishEntry> {
        self.entries.iter().find(|entry| {
            entry
                .interface()
                .is_some_and(|descriptor| descriptor.component_name == component_name)
        })
    }

    /// Release the entry bound to `component_name`, if any.
    pub fn release_bound(&mut self, component_name: &str) -> Option<PnpMessage> {
        let id = self.bound_entry(component_name)?.id;
        self.release(id)
    }

    /// Release every entry matching `predicate`; returns how many were released.
    pub fn release_where(&mut self, mut predicate: impl FnMut(&PublishEntry) -> bool) -> usize {
        let ids: Vec<MessageId> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry))
            .map(|entry| entry.id)
            .collect();
        for id in &ids {
            self.release(*id);
        }
        ids.len()
    }

    fn drain_ingress(&mut self, ingress: &mut VecDeque<(MessageId, PnpMessage)>) -> usize {
        self.drained_from = self.entries.len();
        let count = ingress.len();
        self.entries.extend(ingress.drain(..).map(|(id, message)| PublishEntry {
            id,
            message,
            status: EntryStatus::Pending,
        }));
        count
    }
}

/// What the worker should do after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Wait for the next wake.
    Idle,
    /// Run another cycle after the delay even if nothing is enqueued.
    RetryAfter(Duration),
}

/// Processes the publish set on every worker wake.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle_cycle(&self, publish: &mut PublishSet)
    -> impl Future<Output = CycleOutcome> + Send;
}

struct QueueShared {
    ingress: Mutex<VecDeque<(MessageId, PnpMessage)>>,
    wake: Notify,
    teardown: AtomicBool,
    next_id: AtomicU64,
}

impl QueueShared {
    fn ingress(&self) -> MutexGuard<'_, VecDeque<(MessageId, PnpMessage)>> {
        self.ingress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Thread-safe ingress queue plus the worker that drains it.
pub struct MessageQueue {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<PublishSet>>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(QueueShared {
                ingress: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                teardown: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker on the current Tokio runtime.
    pub fn start<H: MessageHandler>(&self, handler: Arc<H>) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::failed(format!("no Tokio runtime for queue worker: {}", e)))?;

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Err(BridgeError::invalid("queue worker already started"));
        }

        let shared = self.shared.clone();
        *worker = Some(runtime.spawn(worker_loop(shared, handler)));
        tracing::debug!("Message queue worker started");
        Ok(())
    }

    /// Append a message to the ingress queue and wake the worker.
    pub fn enqueue(&self, message: PnpMessage) -> Result<MessageId> {
        if self.shared.teardown.load(Ordering::Acquire) {
            return Err(BridgeError::failed("message queue is shutting down"));
        }

        let id = MessageId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut ingress = self.shared.ingress();
            ingress.try_reserve(1)?;
            ingress.push_back((id, message));
        }
        self.shared.wake.notify_one();

        tracing::trace!(message = %id, "Message enqueued");
        Ok(id)
    }

    /// Pop the head of the ingress queue without blocking.
    pub fn dequeue(&self) -> Option<(MessageId, PnpMessage)> {
        self.shared.ingress().pop_front()
    }

    /// Wake the worker without enqueuing anything.
    pub fn wake(&self) {
        self.shared.wake.notify_one();
    }

    pub fn ingress_len(&self) -> usize {
        self.shared.ingress().len()
    }

    pub fn is_tearing_down(&self) -> bool {
        self.shared.teardown.load(Ordering::Acquire)
    }

    /// Ask the worker to exit after its current cycle.
    pub fn request_teardown(&self) {
        self.shared.teardown.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }

    /// Stop the worker, wait for it and release every remaining message.
    ///
    /// Returns the number of messages released.
    pub async fn shutdown(&self) -> usize {
        self.request_teardown();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let mut released = match worker {
            Some(handle) => match handle.await {
                Ok(publish) => publish.len(),
                Err(e) => {
                    tracing::error!(error = %e, "Message queue worker failed");
                    0
                }
            },
            None => 0,
        };

        let mut ingress = self.shared.ingress();
        released += ingress.len();
        ingress.clear();

        tracing::debug!(released = released, "Message queue released");
        released
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn worker_loop<H: MessageHandler>(shared: Arc<QueueShared>, handler: Arc<H>) -> PublishSet {
    let mut publish = PublishSet::default();
    let mut retry: Option<Duration> = None;

    loop {
        if shared.teardown.load(Ordering::Acquire) {
            break;
        }

        if shared.ingress().is_empty() {
            match retry {
                Some(delay) => {
                    tokio::select! {
                        _ = shared.wake.notified() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => shared.wake.notified().await,
            }
        }

        if shared.teardown.load(Ordering::Acquire) {
            break;
        }

        let drained = {
            let mut ingress = shared.ingress();
            publish.drain_ingress(&mut ingress)
        };
        if drained > 0 {
            tracing::debug!(
                drained = drained,
                publish = publish.len(),
                "Drained ingress into publish set"
            );
        }

        retry = match handler.handle_cycle(&mut publish).await {
            CycleOutcome::Idle => None,
            CycleOutcome::RetryAfter(delay) => Some(delay),
        };
    }

    tracing::debug!(remaining = publish.len(), "Message queue worker exiting");
    publish
}
