//! Input ports: written by a transport callback thread, read by the
//! node's main thread.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::InputPortError;
use crate::port::codec::PortData;

type OnMessageHook = Mutex<Option<Box<dyn Fn() + Send + 'static>>>;

/// A non-strict input port: each incoming message overwrites the current
/// value. A mutex guards the value; a `pending` flag is set on every
/// write and cleared on every read, satisfying the invariant that
/// `pending` only ever transitions false→true on a write and true→false
/// on a read.
pub struct NonStrictInput<T: PortData> {
    inner: Arc<NonStrictInner<T>>,
}

struct NonStrictInner<T> {
    value: Mutex<T>,
    pending: AtomicBool,
    on_message: OnMessageHook,
}

impl<T: PortData> Clone for NonStrictInput<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: PortData> NonStrictInput<T> {
    /// Creates a non-strict input port with an initial value (held until
    /// the first message arrives).
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(NonStrictInner {
                value: Mutex::new(initial),
                pending: AtomicBool::new(false),
                on_message: Mutex::new(None),
            }),
        }
    }

    /// Registers the callback invoked, on the writing thread, immediately
    /// after a successful write. The node runtime uses this to enqueue a
    /// `{port_index, RCV}` port event.
    pub fn set_on_message(&self, callback: impl Fn() + Send + 'static) {
        *self.inner.on_message.lock().unwrap() = Some(Box::new(callback));
    }

    /// Whether a value has been written since the last read.
    pub fn pending(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// Returns a copy of the current value, clearing `pending`.
    pub fn get(&self) -> T {
        self.inner.pending.store(false, Ordering::SeqCst);
        self.inner.value.lock().unwrap().clone()
    }

    /// Returns a scoped accessor granting direct reference access to the
    /// current value while holding the port's lock, clearing `pending`.
    pub fn lock_and_get(&self) -> NonStrictGuard<'_, T> {
        self.inner.pending.store(false, Ordering::SeqCst);
        NonStrictGuard {
            guard: self.inner.value.lock().unwrap(),
        }
    }

    /// Decodes and stores an incoming raw message (called from the
    /// transport delivery thread).
    pub fn write_raw(&self, bytes: &[u8]) -> Result<(), InputPortError> {
        let value = T::decode(bytes)?;
        *self.inner.value.lock().unwrap() = value;
        self.inner.pending.store(true, Ordering::SeqCst);
        if let Some(cb) = self.inner.on_message.lock().unwrap().as_ref() {
            cb();
        }
        Ok(())
    }
}

impl<T: PortData + Default> Default for NonStrictInput<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// A scoped, locked accessor to a [`NonStrictInput`]'s current value.
pub struct NonStrictGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<'a, T> Deref for NonStrictGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

/// A strict input port: incoming messages enqueue into an unbounded FIFO
/// queue. No overwrite, no loss: [`StrictInput::pop`] returns `None` only
/// when the queue is empty, never because a message was dropped.
pub struct StrictInput<T: PortData> {
    inner: Arc<StrictInner<T>>,
}

struct StrictInner<T> {
    queue: Mutex<VecDeque<T>>,
    on_message: OnMessageHook,
}

impl<T: PortData> Clone for StrictInput<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: PortData> StrictInput<T> {
    /// Creates an empty strict input port.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StrictInner {
                queue: Mutex::new(VecDeque::new()),
                on_message: Mutex::new(None),
            }),
        }
    }

    /// Registers the message-received callback (see
    /// [`NonStrictInput::set_on_message`]).
    pub fn set_on_message(&self, callback: impl Fn() + Send + 'static) {
        *self.inner.on_message.lock().unwrap() = Some(Box::new(callback));
    }

    /// Pops and returns the head of the queue, or `None` if empty.
    pub fn pop(&self) -> Option<T> {
        self.inner.queue.lock().unwrap().pop_front()
    }

    /// Number of messages currently queued.
    pub fn len(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes and enqueues an incoming raw message.
    pub fn write_raw(&self, bytes: &[u8]) -> Result<(), InputPortError> {
        let value = T::decode(bytes)?;
        self.inner.queue.lock().unwrap().push_back(value);
        if let Some(cb) = self.inner.on_message.lock().unwrap().as_ref() {
            cb();
        }
        Ok(())
    }
}

impl<T: PortData> Default for StrictInput<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_strict_overwrites_and_tracks_pending() {
        let port: NonStrictInput<f64> = NonStrictInput::new(0.0);
        assert!(!port.pending());

        port.write_raw(&1.0f64.encode().unwrap()).unwrap();
        assert!(port.pending());

        port.write_raw(&2.0f64.encode().unwrap()).unwrap();
        assert!(port.pending());
        assert_eq!(port.get(), 2.0);
        assert!(!port.pending());
    }

    #[test]
    fn strict_preserves_fifo_order_without_loss() {
        let port: StrictInput<i32> = StrictInput::new();
        port.write_raw(&1i32.encode().unwrap()).unwrap();
        port.write_raw(&2i32.encode().unwrap()).unwrap();

        assert_eq!(port.pop(), Some(1));
        assert_eq!(port.pop(), Some(2));
        assert_eq!(port.pop(), None);
    }

    #[test]
    fn on_message_callback_fires_on_write() {
        use std::sync::atomic::AtomicUsize;
        let count = Arc::new(AtomicUsize::new(0));
        let port: NonStrictInput<i32> = NonStrictInput::new(0);
        let count2 = count.clone();
        port.set_on_message(move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        port.write_raw(&5i32.encode().unwrap()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
