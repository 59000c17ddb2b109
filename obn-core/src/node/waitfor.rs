//! The wait-for-condition free list.
//!
//! A node that sends a request to the SMN (for instance an irregular
//! future-update request) registers a predicate over incoming SMN
//! messages. The transport thread, on every SMN message, walks the list
//! under a single mutex and clears the first matching `ACTIVE` slot,
//! copying the message in and waking any thread blocked on it. The slot
//! is reused afterwards: per the design note on the wait-for list,
//! indices are explicit handles ([`WaitForHandle`]) rather than raw
//! addresses, so they survive the backing [`slab::Slab`] reallocating.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use slab::Slab;

use crate::protocol::WireMessage;

/// The status of a wait-for slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotStatus {
    Active,
    Cleared,
    /// Set when `TERM` arrives while the slot is still `ACTIVE`; per the
    /// open question on this case, all active conditions are cancelled
    /// rather than left dangling.
    Cancelled,
}

struct Slot {
    status: SlotStatus,
    predicate: Box<dyn Fn(&WireMessage) -> bool + Send>,
    data: Option<WireMessage>,
}

/// An explicit handle to a registered wait-for slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitForHandle(usize);

/// The outcome of waiting on a [`WaitForHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The predicate matched; carries the matching message.
    Cleared(WireMessage),
    /// `TERM` arrived while the condition was still active.
    Cancelled,
}

struct Inner {
    slots: Mutex<Slab<Slot>>,
    cv: Condvar,
}

/// The free list of wait-for conditions for one node.
pub struct WaitForRegistry {
    inner: Inner,
}

impl WaitForRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Inner {
                slots: Mutex::new(Slab::new()),
                cv: Condvar::new(),
            },
        }
    }

    /// Registers a new `ACTIVE` condition and returns its handle.
    pub fn register(
        &self,
        predicate: impl Fn(&WireMessage) -> bool + Send + 'static,
    ) -> WaitForHandle {
        let mut slots = self.inner.slots.lock().unwrap();
        let key = slots.insert(Slot {
            status: SlotStatus::Active,
            predicate: Box::new(predicate),
            data: None,
        });
        WaitForHandle(key)
    }

    /// Walks the list and clears the first `ACTIVE` slot whose predicate
    /// matches `msg`. Called from the transport delivery thread.
    pub fn notify(&self, msg: &WireMessage) {
        let mut slots = self.inner.slots.lock().unwrap();
        let mut matched = None;
        for (key, slot) in slots.iter_mut() {
            if slot.status == SlotStatus::Active && (slot.predicate)(msg) {
                matched = Some(key);
                break;
            }
        }
        if let Some(key) = matched {
            let slot = slots.get_mut(key).expect("key just found in iteration");
            slot.status = SlotStatus::Cleared;
            slot.data = Some(msg.clone());
            drop(slots);
            self.inner.cv.notify_all();
        }
    }

    /// Cancels every currently `ACTIVE` condition (used on `TERM`).
    pub fn cancel_all(&self) {
        let mut slots = self.inner.slots.lock().unwrap();
        for (_key, slot) in slots.iter_mut() {
            if slot.status == SlotStatus::Active {
                slot.status = SlotStatus::Cancelled;
            }
        }
        drop(slots);
        self.inner.cv.notify_all();
    }

    /// Blocks, up to `timeout`, until `handle`'s condition is cleared or
    /// cancelled. On success the slot is reset to free (available for
    /// reuse). On timeout, the condition remains `ACTIVE` for a later
    /// call to poll again with the same handle.
    pub fn wait(&self, handle: WaitForHandle, timeout: Duration) -> Option<WaitOutcome> {
        let deadline = Instant::now() + timeout;
        let mut slots = self.inner.slots.lock().unwrap();
        loop {
            match slots.get(handle.0).map(|s| s.status) {
                Some(SlotStatus::Cleared) => {
                    let data = slots
                        .get_mut(handle.0)
                        .and_then(|s| s.data.take())
                        .expect("cleared slot always carries data");
                    slots.remove(handle.0);
                    return Some(WaitOutcome::Cleared(data));
                }
                Some(SlotStatus::Cancelled) => {
                    slots.remove(handle.0);
                    return Some(WaitOutcome::Cancelled);
                }
                Some(SlotStatus::Active) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (guard, _) = self
                        .inner
                        .cv
                        .wait_timeout(slots, deadline - now)
                        .expect("wait-for mutex poisoned");
                    slots = guard;
                }
                None => return None,
            }
        }
    }
}

impl Default for WaitForRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MsgType;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn matching_message_clears_exactly_one_slot() {
        let registry = Arc::new(WaitForRegistry::new());
        let h1 = registry.register(|m| m.t == 10);
        let h2 = registry.register(|m| m.t == 10);

        let msg = WireMessage::sim_event_ack(0, 10, 0);
        registry.notify(&msg);

        let o1 = registry.wait(h1, Duration::from_millis(50));
        assert!(matches!(o1, Some(WaitOutcome::Cleared(_))));

        // The second slot is still active: notify() clears only the first match.
        let o2 = registry.wait(h2, Duration::from_millis(50));
        assert!(o2.is_none());
    }

    #[test]
    fn timeout_leaves_slot_active_for_later_poll() {
        let registry = Arc::new(WaitForRegistry::new());
        let h = registry.register(|m| m.t == 99);
        assert!(registry.wait(h, Duration::from_millis(20)).is_none());

        registry.notify(&WireMessage::sim_event_ack(0, 99, 0));
        let outcome = registry.wait(h, Duration::from_millis(50));
        assert!(matches!(outcome, Some(WaitOutcome::Cleared(_))));
    }

    #[test]
    fn term_cancels_active_conditions() {
        let registry = Arc::new(WaitForRegistry::new());
        let h = registry.register(|m| m.msgtype == MsgType::SimEventAck);
        registry.cancel_all();
        assert_eq!(registry.wait(h, Duration::from_millis(50)), Some(WaitOutcome::Cancelled));
    }

    #[test]
    fn blocked_waiter_is_woken_by_notify() {
        let registry = Arc::new(WaitForRegistry::new());
        let h = registry.register(|m| m.t == 5);
        let registry2 = registry.clone();
        let handle = thread::spawn(move || registry2.wait(h, Duration::from_secs(2)));

        thread::sleep(Duration::from_millis(20));
        registry.notify(&WireMessage::sim_event_ack(0, 5, 0));

        let outcome = handle.join().unwrap();
        assert!(matches!(outcome, Some(WaitOutcome::Cleared(_))));
    }
}
