//! Callback gate
//!
//! Once [`CallbackGate::close`] returns, no callback is running and none will
//! start. Closing from inside a callback is allowed; it then only prevents
//! further deliveries, since the current one is already on this stack.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

thread_local! {
    /// Gates currently delivering on this thread, by address
    static DELIVERING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Default)]
pub struct CallbackGate {
    closed: AtomicBool,
    delivery: Mutex<()>,
}

impl CallbackGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` unless the gate is closed. Returns whether it ran.
    pub fn deliver<F: FnOnce()>(&self, callback: F) -> bool {
        let _guard = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }

        let _marker = DeliveryMarker::enter(self.id());
        callback();
        true
    }

    /// Refuse further deliveries and wait out one in progress on another thread
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let reentrant = DELIVERING.with(|d| d.borrow().contains(&self.id()));
        if !reentrant {
            drop(self.delivery.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn id(&self) -> usize {
        self as *const Self as usize
    }
}

/// Marks a gate as delivering on this thread for the marker's lifetime
struct DeliveryMarker(usize);

impl DeliveryMarker {
    fn enter(id: usize) -> Self {
        DELIVERING.with(|d| d.borrow_mut().push(id));
        Self(id)
    }
}

impl Drop for DeliveryMarker {
    fn drop(&mut self) {
        DELIVERING.with(|d| {
            let mut delivering = d.borrow_mut();
            if let Some(pos) = delivering.iter().rposition(|id| *id == self.0) {
                delivering.remove(pos);
            }
        });
    }
}
