//! Handler registry keyed by update type.
//!
//! Every mutation goes through one mutex. Dispatch holds the lock only long
//! enough to clone the handler sequence for an update type, so handlers run
//! without the lock and a slow handler never blocks `bind`/`unbind_*`.
//!
//! Positions returned by [`HandlerRegistry::bind`] are shifted down when an
//! earlier handler of the same type is removed. A caller that keeps an index
//! across a concurrent removal may address a different handler.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{self, BoxFuture, FutureExt};
use tracing::debug;

use crate::error::RegistryError;
use crate::webhook::{Update, UpdateType};

/// Future returned by a handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Type-erased update handler.
pub type Handler = Arc<dyn Fn(Arc<Update>) -> HandlerFuture + Send + Sync>;

/// Handlers registered per update type, in insertion order.
///
/// Cloning the registry returns another handle to the same handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<UpdateType, Vec<Entry>>>,
}

struct Entry {
    /// Stable for the entry's lifetime, unlike its position
    id: u64,
    handler: Handler,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `update_type` and return its position.
    ///
    /// The closure itself is called on the request path, before Crypto Pay
    /// gets its response; only the future it returns runs in the background.
    /// Keep the closure cheap and put slow work inside the future.
    pub fn bind<F, Fut>(&self, update_type: impl Into<UpdateType>, handler: F) -> usize
    where
        F: Fn(Arc<Update>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |update: Arc<Update>| handler(update).boxed());
        self.inner.push(update_type.into(), handler)
    }

    /// Append a handler that runs for the first matching update only.
    ///
    /// On its first invocation the handler removes itself from the registry
    /// before it starts running. Deliveries that already took a snapshot
    /// containing it see it as a no-op.
    ///
    /// As with [`bind`](Self::bind), slow work belongs in the returned future.
    pub fn once<F, Fut>(&self, update_type: impl Into<UpdateType>, handler: F) -> usize
    where
        F: Fn(Arc<Update>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let update_type = update_type.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let key = update_type.clone();
        let fired = AtomicBool::new(false);

        let wrapper: Handler = Arc::new(move |update: Arc<Update>| {
            if fired.swap(true, Ordering::AcqRel) {
                return future::ready(Ok(())).boxed();
            }
            if let Some(inner) = registry.upgrade() {
                inner.remove_entry(&key, id);
            }
            handler(update).boxed()
        });

        self.inner.push_entry(
            update_type,
            Entry {
                id,
                handler: wrapper,
            },
        )
    }

    /// Append a handler for paid invoices. Shorthand for binding
    /// [`UpdateType::INVOICE_PAID`].
    pub fn on_invoice_paid<F, Fut>(&self, handler: F) -> usize
    where
        F: Fn(Arc<Update>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.bind(UpdateType::INVOICE_PAID, handler)
    }

    /// Remove the handler at `index`, shifting later handlers down by one.
    pub fn unbind_at(&self, update_type: &UpdateType, index: usize) -> Result<(), RegistryError> {
        let mut handlers = self.inner.lock();
        let len = handlers.get(update_type).map_or(0, Vec::len);
        if index >= len {
            return Err(RegistryError::IndexOutOfRange {
                update_type: update_type.clone(),
                index,
                len,
            });
        }

        if let Some(entries) = handlers.get_mut(update_type) {
            entries.remove(index);
            if entries.is_empty() {
                handlers.remove(update_type);
            }
        }

        debug!(update_type = %update_type, index = index, "webhook_handler_unbound");
        Ok(())
    }

    /// Remove every handler for `update_type`. Returns how many were removed.
    pub fn unbind_all_for(&self, update_type: &UpdateType) -> usize {
        let removed = self
            .inner
            .lock()
            .remove(update_type)
            .map_or(0, |entries| entries.len());

        debug!(update_type = %update_type, removed = removed, "webhook_handlers_unbound");
        removed
    }

    /// Remove every handler of every update type.
    pub fn unbind_all(&self) {
        self.inner.lock().clear();
        debug!("webhook_registry_cleared");
    }

    /// Copy of the handlers for `update_type` at this moment.
    ///
    /// Later registry changes do not affect the returned sequence.
    pub fn snapshot(&self, update_type: &UpdateType) -> Vec<Handler> {
        self.inner
            .lock()
            .get(update_type)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.handler)).collect())
            .unwrap_or_default()
    }

    /// Number of handlers registered for `update_type`.
    pub fn len(&self, update_type: &UpdateType) -> usize {
        self.inner.lock().get(update_type).map_or(0, Vec::len)
    }

    /// Whether no handler is registered for any update type.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().values().all(Vec::is_empty)
    }
}

impl RegistryInner {
    // The map is never left half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<UpdateType, Vec<Entry>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, update_type: UpdateType, handler: Handler) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.push_entry(update_type, Entry { id, handler })
    }

    fn push_entry(&self, update_type: UpdateType, entry: Entry) -> usize {
        let mut handlers = self.lock();
        let entries = handlers.entry(update_type.clone()).or_default();
        entries.push(entry);
        let index = entries.len() - 1;

        debug!(update_type = %update_type, index = index, "webhook_handler_bound");
        index
    }

    fn remove_entry(&self, update_type: &UpdateType, id: u64) {
        let mut handlers = self.lock();
        if let Some(entries) = handlers.get_mut(update_type) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                handlers.remove(update_type);
            }
        }

        debug!(update_type = %update_type, "webhook_once_handler_removed");
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.inner.lock();
        f.debug_map()
            .entries(handlers.iter().map(|(k, v)| (k.as_str(), v.len())))
            .finish()
    }
}
