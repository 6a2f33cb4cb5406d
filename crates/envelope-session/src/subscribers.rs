//! Session-change observers.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use envelope_types::Credential;
use parking_lot::Mutex;

/// Handler invoked with the new credential, or `None` on sign-out/invalidation.
pub type SessionHandler = Arc<dyn Fn(Option<&Credential>) + Send + Sync>;

/// Ordered observer list.
#[derive(Default)]
pub(crate) struct SubscriberList {
    next_id: u64,
    entries: Vec<(u64, SessionHandler)>,
}

impl SubscriberList {
    pub(crate) fn add(&mut self, handler: SessionHandler) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, handler));
        id
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Handlers in registration order.
    pub(crate) fn snapshot(&self) -> Vec<SessionHandler> {
        self.entries.iter().map(|(_, h)| h.clone()).collect()
    }
}

/// Call every handler in order. A panicking handler is logged and skipped.
pub(crate) fn dispatch(handlers: &[SessionHandler], credential: Option<&Credential>) {
    for (index, handler) in handlers.iter().enumerate() {
        if catch_unwind(AssertUnwindSafe(|| handler(credential))).is_err() {
            tracing::warn!(subscriber = index, "Session change handler panicked");
        }
    }
}

/// Registration handle returned by
/// [`SessionManager::on_session_change`](crate::SessionManager::on_session_change).
///
/// Dropping the handle does not unsubscribe.
pub struct Subscription {
    id: u64,
    list: Weak<Mutex<SubscriberList>>,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: u64, list: Weak<Mutex<SubscriberList>>) -> Self {
        Self {
            id,
            list,
            active: AtomicBool::new(true),
        }
    }

    /// Remove the handler. Calling this again is a no-op.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(list) = self.list.upgrade() {
            list.lock().remove(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispatch_order_and_panic_isolation() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut list = SubscriberList::default();

        let o = order.clone();
        list.add(Arc::new(move |_| o.lock().push(1)));
        list.add(Arc::new(|_| panic!("handler failure")));
        let o = order.clone();
        list.add(Arc::new(move |_| o.lock().push(3)));

        dispatch(&list.snapshot(), None);
        assert_eq!(*order.lock(), vec![1, 3]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let list = Arc::new(Mutex::new(SubscriberList::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let first = list.lock().add(Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let c = calls.clone();
        list.lock().add(Arc::new(move |_| {
            c.fetch_add(10, Ordering::SeqCst);
        }));

        let sub = Subscription::new(first, Arc::downgrade(&list));
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(list.lock().len(), 1);

        dispatch(&list.lock().snapshot(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }
}
