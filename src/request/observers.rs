//! Observer registration and fan-out.
//!
//! Every event takes one closure shape, `Fn(&EventCtx)`; the context
//! exposes whatever a callback may want (uuid, status, byte counter,
//! error, response handle) through accessors. Registration returns a
//! [`Subscription`] whose drop unregisters the callback; call
//! [`Subscription::detach`] to keep it for the lifetime of the request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::Error;
use crate::request::response::Response;
use crate::request::Status;

/// Snapshot of a request handed to observers.
pub struct EventCtx {
    pub(crate) uuid: String,
    pub(crate) status: Status,
    pub(crate) bytes_read: u64,
    pub(crate) error: Option<Error>,
    pub(crate) response: Option<Arc<Response>>,
}

impl EventCtx {
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn response(&self) -> Option<Arc<Response>> {
        self.response.clone()
    }
}

type Callback = Arc<dyn Fn(&EventCtx) + Send + Sync>;

/// Callbacks registered for one event, fired in registration order.
#[derive(Default)]
pub(crate) struct ObserverSet {
    entries: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl ObserverSet {
    pub(crate) fn new() -> Arc<ObserverSet> {
        Arc::new(ObserverSet::default())
    }

    pub(crate) fn add(self: &Arc<Self>, callback: Callback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .expect("observer set poisoned")
            .push((id, callback));
        Subscription {
            set: Arc::downgrade(self),
            id,
            detached: false,
        }
    }

    fn remove(&self, id: u64) {
        self.entries
            .lock()
            .expect("observer set poisoned")
            .retain(|(entry_id, _)| *entry_id != id);
    }

    /// Invokes every callback once. The list is cloned out of the lock so
    /// callbacks may freely touch the request.
    pub(crate) fn fire(&self, ctx: &EventCtx) {
        let callbacks: Vec<Callback> = self
            .entries
            .lock()
            .expect("observer set poisoned")
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(ctx);
        }
    }
}

/// Handle of one registered observer. Dropping it unregisters the
/// callback; a dead set (request already gone) is skipped silently.
#[must_use = "dropping a subscription unregisters the observer; call detach() to keep it"]
pub struct Subscription {
    set: Weak<ObserverSet>,
    id: u64,
    detached: bool,
}

impl Subscription {
    /// Keeps the observer registered for the lifetime of the request.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}
