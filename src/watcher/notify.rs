//! One-shot "notify me on the next update" callbacks.
//!
//! Each watcher owns an [`UpdateCallbacks`] registry. Every state update drains
//! it and hands the freshly rendered view to each callback and waiter once; a
//! consumer that wants the following update has to register again.
//!
//! Waiters are `oneshot` senders. A waiter whose receiver was dropped (an
//! expired long-poll) is pruned on the next registration, so abandoned waits
//! never accumulate on a watcher that stops updating.

use std::any::Any;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};

use pharos_types::WatcherView;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Callback invoked with the watcher's view after its next update.
pub type UpdateCallback = Box<dyn FnOnce(&WatcherView) + Send + 'static>;

/// Pending callbacks and waiters for a single watcher.
#[derive(Default)]
pub struct UpdateCallbacks {
    pending: Vec<UpdateCallback>,
    waiters: Vec<oneshot::Sender<WatcherView>>,
}

impl UpdateCallbacks {
    pub fn push(&mut self, callback: UpdateCallback) {
        self.pending.push(callback);
    }

    /// Register a channel waiter, dropping waiters nobody listens to anymore.
    pub fn push_waiter(&mut self, waiter: oneshot::Sender<WatcherView>) {
        self.waiters.retain(|tx| !tx.is_closed());
        self.waiters.push(waiter);
    }

    /// Callbacks plus waiters that still have a receiver.
    pub fn len(&self) -> usize {
        self.pending.len() + self.waiters.iter().filter(|tx| !tx.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.waiters.is_empty()
    }

    /// Take everything registered, leaving the registry empty.
    pub fn drain(&mut self) -> UpdateCallbacks {
        mem::take(self)
    }
}

impl fmt::Debug for UpdateCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateCallbacks")
            .field("pending", &self.pending.len())
            .field("waiters", &self.waiters.len())
            .finish()
    }
}

/// Deliver `view` to drained callbacks and waiters, isolating panics.
///
/// Delivery order is unspecified (currently newest first).
pub(crate) fn fire(watcher_id: &str, drained: UpdateCallbacks, view: &WatcherView) {
    let UpdateCallbacks {
        mut pending,
        waiters,
    } = drained;
    let total = pending.len() + waiters.len();
    let mut delivered = 0;

    while let Some(callback) = pending.pop() {
        match panic::catch_unwind(AssertUnwindSafe(|| callback(view))) {
            Ok(()) => delivered += 1,
            Err(payload) => {
                error!(
                    watcher = %watcher_id,
                    panic = %panic_message(payload.as_ref()),
                    "update callback panicked"
                );
            }
        }
    }

    for waiter in waiters {
        // A closed receiver means the waiter gave up.
        if waiter.send(view.clone()).is_ok() {
            delivered += 1;
        }
    }

    debug!(watcher = %watcher_id, delivered, total, "delivered update notifications");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use pharos_types::Status;

    fn sample_view() -> WatcherView {
        WatcherView {
            id: "probe".to_string(),
            name: "Probe".to_string(),
            status: Status::Ok,
            value: "unknown".to_string(),
            detail: String::new(),
            duration: "a moment".to_string(),
            last_updated_ms: None,
        }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> UpdateCallback {
        let counter = counter.clone();
        Box::new(move |_view| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn registry(callbacks: Vec<UpdateCallback>) -> UpdateCallbacks {
        let mut registry = UpdateCallbacks::default();
        for callback in callbacks {
            registry.push(callback);
        }
        registry
    }

    #[test]
    fn drain_empties_the_registry() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut callbacks = registry(vec![counting(&counter), counting(&counter)]);
        let (tx, _rx) = oneshot::channel();
        callbacks.push_waiter(tx);
        assert_eq!(callbacks.len(), 3);

        let drained = callbacks.drain();
        assert_eq!(drained.len(), 3);
        assert!(callbacks.is_empty());
    }

    #[test]
    fn fire_invokes_each_callback_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let callbacks = registry(vec![
            counting(&counter),
            counting(&counter),
            counting(&counter),
        ]);

        fire("probe", callbacks, &sample_view());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_callback_does_not_stop_delivery() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut callbacks = registry(vec![
            counting(&counter),
            Box::new(|_view| panic!("renderer blew up")),
            counting(&counter),
        ]);
        let (tx, mut rx) = oneshot::channel();
        callbacks.push_waiter(tx);

        fire("probe", callbacks, &sample_view());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(rx.try_recv().unwrap().id, "probe");
    }

    #[test]
    fn callbacks_receive_the_view() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = seen.clone();
        let callback: UpdateCallback = Box::new(move |view| {
            *sink.lock() = Some(view.id.clone());
        });
        let callbacks = registry(vec![callback]);

        fire("probe", callbacks, &sample_view());
        assert_eq!(seen.lock().as_deref(), Some("probe"));
    }

    #[test]
    fn abandoned_waiters_are_pruned() {
        let mut callbacks = UpdateCallbacks::default();
        for _ in 0..1000 {
            let (tx, rx) = oneshot::channel();
            callbacks.push_waiter(tx);
            drop(rx);
        }
        assert_eq!(callbacks.len(), 0);
        assert!(callbacks.waiters.len() <= 1);

        let (tx, _rx) = oneshot::channel();
        callbacks.push_waiter(tx);
        assert_eq!(callbacks.len(), 1);
        assert_eq!(callbacks.waiters.len(), 1);
    }

    #[test]
    fn closed_waiter_does_not_block_delivery() {
        let mut callbacks = UpdateCallbacks::default();
        let (gone, gone_rx) = oneshot::channel();
        callbacks.push_waiter(gone);
        drop(gone_rx);
        let (live, mut live_rx) = oneshot::channel();
        callbacks.push_waiter(live);

        fire("probe", callbacks, &sample_view());
        assert_eq!(live_rx.try_recv().unwrap().status, Status::Ok);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
