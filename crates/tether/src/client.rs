//! Client bridge - runs in the UI surface.
//!
//! Owns the pending-request table and the subscriber map. Flow:
//! 1. `request` assigns the next correlation id and stores a continuation
//! 2. The Request envelope goes out on the attached link (or, with no link,
//!    a failure is synthesized after `no_host_delay`)
//! 3. The inbound loop settles the continuation whose id matches a Response
//! 4. Notifications fan out to every subscriber of their command name
//!
//! Every request settles exactly once: on its response, on the no-host
//! fallback, on its deadline, or when the link it was sent on goes away.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};

use crate::bridge::protocol::{
    CancelNotice, CorrelationId, Envelope, HostCommand, NotificationSchema,
};
use crate::bridge::transport::Endpoint;
use crate::config::BridgeConfig;
use crate::error::BridgeError;

type Outcome = Result<Value, BridgeError>;

type Callback = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

struct PendingRequest {
    command: String,
    /// Link the request went out on. `None` when no host was attached.
    link: Option<u64>,
    tx: oneshot::Sender<Outcome>,
}

struct Link {
    id: u64,
    tx: mpsc::UnboundedSender<Envelope>,
    reader: AbortHandle,
}

struct Inner {
    config: BridgeConfig,
    next_request: AtomicU64,
    next_subscriber: AtomicU64,
    next_link: AtomicU64,
    pending: DashMap<CorrelationId, PendingRequest>,
    subscribers: DashMap<String, Vec<(u64, Callback)>>,
    link: RwLock<Option<Link>>,
}

/// Handle to the bridge. Cheap to clone; all clones share one pending table.
///
/// Construct one at UI startup and hand clones to whatever needs host access.
#[derive(Clone)]
pub struct ClientBridge {
    inner: Arc<Inner>,
}

impl Default for ClientBridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl ClientBridge {
    /// Create a bridge with no host attached.
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                next_request: AtomicU64::new(1),
                next_subscriber: AtomicU64::new(1),
                next_link: AtomicU64::new(1),
                pending: DashMap::new(),
                subscribers: DashMap::new(),
                link: RwLock::new(None),
            }),
        }
    }

    /// Settings this bridge was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Attach a host link and start the inbound loop.
    ///
    /// Replaces any previous link; requests in flight on the old link fail
    /// with `TransportClosed`. When the inbound side of this link closes the
    /// bridge detaches on its own.
    pub fn attach(&self, endpoint: Endpoint) -> JoinHandle<()> {
        let (tx, mut rx) = endpoint.into_parts();
        let link_id = self.inner.next_link.fetch_add(1, Ordering::Relaxed);

        // Hold the write lock across spawn so the reader cannot observe a
        // stale link if its peer is already closed.
        let mut slot = self.inner.link.write().unwrap_or_else(PoisonError::into_inner);

        let bridge = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                bridge.handle_message(envelope);
            }
            tracing::warn!(link = link_id, "Host link closed");
            bridge.inner.drop_link(link_id);
        });

        let previous = slot.replace(Link {
            id: link_id,
            tx,
            reader: handle.abort_handle(),
        });
        drop(slot);

        if let Some(old) = previous {
            old.reader.abort();
            self.inner.fail_link(old.id);
        }
        tracing::info!(link = link_id, "Host link attached");
        handle
    }

    /// Drop the current host link, failing requests still waiting on it.
    pub fn detach(&self) {
        let taken = self
            .inner
            .link
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(link) = taken {
            link.reader.abort();
            self.inner.fail_link(link.id);
            tracing::info!(link = link.id, "Host link detached");
        }
    }

    /// Whether a host link is currently attached.
    pub fn is_attached(&self) -> bool {
        self.inner
            .link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Send `command` to the host and wait for its result.
    ///
    /// The deadline comes from [`BridgeConfig::timeout_for`]. With no host
    /// attached the call fails with `TransportUnavailable` after the
    /// configured delay.
    pub async fn request(&self, command: &str, payload: Value) -> Result<Value, BridgeError> {
        let id = CorrelationId::new(self.inner.next_request.fetch_add(1, Ordering::Relaxed));
        let (tx, mut rx) = oneshot::channel();

        match self.inner.pending.entry(id) {
            Entry::Occupied(_) => {
                tracing::error!(%id, command, "Correlation id already in flight");
                return Err(BridgeError::DuplicateRequestId(id));
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    command: command.to_string(),
                    link: None,
                    tx,
                });
            }
        }
        let mut guard = PendingGuard {
            inner: Arc::clone(&self.inner),
            id,
            armed: true,
        };

        // The entry is visible before the link is read, so a link that closes
        // after this point either fails it or fails the re-check below.
        match self.inner.current_link() {
            Some((link_id, sender)) => {
                if let Some(mut entry) = self.inner.pending.get_mut(&id) {
                    entry.link = Some(link_id);
                }
                if !self.inner.is_current(link_id) {
                    tracing::warn!(%id, command, link = link_id, "Host link replaced before sending");
                    self.inner.settle(id, Err(BridgeError::TransportClosed));
                } else {
                    tracing::debug!(%id, command, link = link_id, "Sending request");
                    if sender.send(Envelope::request(command, payload, id)).is_err() {
                        tracing::warn!(%id, command, "Host link closed while sending");
                        self.inner.settle(id, Err(BridgeError::TransportClosed));
                    }
                }
            }
            None => {
                tracing::debug!(%id, command, "No host attached, failing after delay");
                self.schedule_no_host_failure(id);
            }
        }

        let outcome = match self.inner.config.timeout_for(command) {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, &mut rx).await;
                match waited {
                    Ok(received) => received,
                    Err(_) => {
                        guard.armed = false;
                        return self.expire(id, command, limit, rx);
                    }
                }
            }
            None => (&mut rx).await,
        };
        guard.armed = false;

        // A dropped sender means the entry was discarded without settling.
        outcome.unwrap_or(Err(BridgeError::TransportClosed))
    }

    /// Typed request: payload and result are checked against the command's schema.
    pub async fn call<C: HostCommand>(&self, command: C) -> Result<C::Output, BridgeError> {
        let payload = serde_json::to_value(&command)
            .map_err(|e| BridgeError::InvalidPayload(format!("'{}' payload: {e}", C::NAME)))?;
        let value = self.request(C::NAME, payload).await?;
        serde_json::from_value(value)
            .map_err(|e| BridgeError::InvalidPayload(format!("'{}' result: {e}", C::NAME)))
    }

    /// Register `callback` for notifications named `command`.
    pub fn subscribe<F>(&self, command: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let command = command.into();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .entry(command.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        tracing::debug!(command = %command, subscriber = id, "Subscribed");

        Subscription {
            inner: Arc::downgrade(&self.inner),
            command,
            id,
        }
    }

    /// Typed subscription: payloads that fail to decode count as a failing callback.
    pub fn on<N, F>(&self, callback: F) -> Subscription
    where
        N: NotificationSchema,
        F: Fn(N) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(N::NAME, move |payload| {
            let notification: N = serde_json::from_value(payload.clone())?;
            callback(notification)
        })
    }

    /// Live subscriptions for `command`.
    pub fn subscriber_count(&self, command: &str) -> usize {
        self.inner
            .subscribers
            .get(command)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Route one inbound envelope. Never fails; unmatched input is dropped.
    pub fn handle_message(&self, envelope: Envelope) {
        match envelope {
            Envelope::Response {
                request_id,
                payload,
                error,
            } => {
                let outcome = match error {
                    Some(message) => Err(BridgeError::Remote(message)),
                    None => Ok(payload),
                };
                if !self.inner.settle(request_id, outcome) {
                    tracing::debug!(%request_id, "Dropping response with no pending request");
                }
            }
            Envelope::Notification { command, payload } => {
                self.inner.notify_subscribers(&command, &payload);
            }
            Envelope::Request {
                command,
                request_id,
                ..
            } => {
                tracing::warn!(%request_id, command = %command, "Dropping request sent to the UI side");
            }
        }
    }

    fn schedule_no_host_failure(&self, id: CorrelationId) {
        let inner = Arc::clone(&self.inner);
        let delay = inner.config.no_host_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.settle(id, Err(BridgeError::TransportUnavailable));
        });
    }

    fn expire(
        &self,
        id: CorrelationId,
        command: &str,
        limit: Duration,
        mut rx: oneshot::Receiver<Outcome>,
    ) -> Result<Value, BridgeError> {
        match self.inner.pending.remove(&id) {
            Some((_, entry)) => {
                tracing::warn!(%id, command, timeout_ms = limit.as_millis() as u64, "Request timed out");
                if self.inner.config.send_cancel_notice && entry.link.is_some() {
                    self.inner.send_cancel_notice(id);
                }
                Err(BridgeError::Timeout {
                    command: command.to_string(),
                    after: limit,
                })
            }
            // Settled between the deadline firing and the removal.
            None => rx.try_recv().unwrap_or(Err(BridgeError::TransportClosed)),
        }
    }
}

impl Inner {
    fn current_link(&self) -> Option<(u64, mpsc::UnboundedSender<Envelope>)> {
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|link| (link.id, link.tx.clone()))
    }

    fn is_current(&self, link_id: u64) -> bool {
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|link| link.id == link_id)
    }

    /// Resolve or reject a pending request. Returns false if `id` was not pending.
    fn settle(&self, id: CorrelationId, outcome: Outcome) -> bool {
        let Some((_, entry)) = self.pending.remove(&id) else {
            return false;
        };
        let failed = outcome.is_err();
        if entry.tx.send(outcome).is_err() {
            tracing::debug!(%id, command = %entry.command, "Caller stopped waiting before settlement");
        } else {
            tracing::trace!(%id, command = %entry.command, failed, "Request settled");
        }
        true
    }

    /// Clear the link slot if it still holds `link_id`, then fail its requests.
    fn drop_link(&self, link_id: u64) {
        {
            let mut slot = self.link.write().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|link| link.id == link_id) {
                *slot = None;
            }
        }
        self.fail_link(link_id);
    }

    fn fail_link(&self, link_id: u64) {
        let stranded: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|entry| entry.link == Some(link_id))
            .map(|entry| *entry.key())
            .collect();
        if !stranded.is_empty() {
            tracing::warn!(link = link_id, count = stranded.len(), "Failing requests stranded by closed link");
        }
        for id in stranded {
            self.settle(id, Err(BridgeError::TransportClosed));
        }
    }

    fn send_cancel_notice(&self, id: CorrelationId) {
        let Some((_, sender)) = self.current_link() else {
            return;
        };
        match Envelope::notify(&CancelNotice { request_id: id }) {
            Ok(envelope) => {
                if sender.send(envelope).is_err() {
                    tracing::debug!(%id, "Host link closed, cancel notice not sent");
                }
            }
            Err(e) => tracing::warn!(%id, error = %e, "Failed to encode cancel notice"),
        }
    }

    fn notify_subscribers(&self, command: &str, payload: &Value) {
        // Snapshot so callbacks may subscribe/unsubscribe without deadlocking.
        let callbacks: Vec<(u64, Callback)> = match self.subscribers.get(command) {
            Some(entry) => entry.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect(),
            None => {
                tracing::trace!(command, "Notification with no subscribers");
                return;
            }
        };

        tracing::debug!(command, subscribers = callbacks.len(), "Delivering notification");
        for (subscriber, callback) in callbacks {
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(command, subscriber, error = %e, "Subscriber failed");
                }
                Err(_) => {
                    tracing::error!(command, subscriber, "Subscriber panicked");
                }
            }
        }
    }

    fn unsubscribe(&self, command: &str, id: u64) {
        if let Entry::Occupied(mut entry) = self.subscribers.entry(command.to_string()) {
            entry.get_mut().retain(|(existing, _)| *existing != id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}

/// Removes the pending entry if the `request` future is dropped before it settles.
struct PendingGuard {
    inner: Arc<Inner>,
    id: CorrelationId,
    armed: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed && self.inner.pending.remove(&self.id).is_some() {
            tracing::debug!(id = %self.id, "Request abandoned before settlement");
        }
    }
}

/// Registration returned by [`ClientBridge::subscribe`].
///
/// Stays registered until [`Subscription::unsubscribe`] is called; dropping
/// it does not unsubscribe.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    inner: Weak<Inner>,
    command: String,
    id: u64,
}

impl Subscription {
    /// Notification name this subscription listens for.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Remove exactly this callback. The last removal for a command deletes
    /// the command's subscriber set.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(&self.command, self.id);
            tracing::debug!(command = %self.command, subscriber = self.id, "Unsubscribed");
        }
    }
}
