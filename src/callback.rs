//! Callback bridge between the engine and the blocking invoker.
//!
//! The engine calls a [`CallbackSink`] when the script invokes the callback
//! passed to `verifyProof`. [`CallbackBridge`] stores the first delivery of a
//! call cycle in a [`CallbackSlot`] and wakes the invoker waiting on it.

use crate::engine::HandleId;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// What the callback delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// First argument, as a handle now owned by the slot's reader
    Result(HandleId),
    /// Callback fired without an object argument
    Missing,
}

impl Delivery {
    /// The owned handle, if any
    pub fn handle(&self) -> Option<HandleId> {
        match self {
            Delivery::Result(handle) => Some(*handle),
            Delivery::Missing => None,
        }
    }
}

/// Receiver of callback invocations.
///
/// `deliver` is handed ownership of the first argument. Whatever handle it
/// returns is refused and must be released by the engine immediately.
pub trait CallbackSink: Send + Sync {
    /// Accept or refuse one callback invocation
    fn deliver(&self, argument: Option<HandleId>) -> Option<HandleId>;
}

/// Result of offering a delivery to a [`CallbackSlot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Stored in the slot
    Accepted,
    /// The current cycle already has a value
    Duplicate(Option<HandleId>),
    /// The delivery belongs to a cycle that has ended
    Stale(Option<HandleId>),
}

impl Offer {
    /// The handle the caller must release, if any
    pub fn refused(self) -> Option<HandleId> {
        match self {
            Offer::Accepted => None,
            Offer::Duplicate(handle) | Offer::Stale(handle) => handle,
        }
    }
}

struct SlotState {
    value: Option<Delivery>,
    cycle: u64,
}

struct SlotInner {
    state: Mutex<SlotState>,
    ready: Condvar,
    deliveries: AtomicU64,
}

/// Single-assignment cell written by the callback and read by the invoker.
///
/// Every call runs in its own cycle. A delivery stamped with any cycle but
/// the current one is refused, so a callback that fires after its call has
/// ended can never fill the slot of a later call.
#[derive(Clone)]
pub struct CallbackSlot {
    inner: Arc<SlotInner>,
}

impl CallbackSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SlotInner {
                state: Mutex::new(SlotState {
                    value: None,
                    cycle: 0,
                }),
                ready: Condvar::new(),
                deliveries: AtomicU64::new(0),
            }),
        }
    }

    /// Start a new cycle. Returns its number and whatever the slot still held.
    pub fn begin_cycle(&self) -> (u64, Option<Delivery>) {
        let mut state = self.inner.state.lock();
        state.cycle += 1;
        (state.cycle, state.value.take())
    }

    /// End the current cycle; later deliveries for it are refused.
    ///
    /// Returns whatever the slot still held.
    pub fn end_cycle(&self) -> Option<Delivery> {
        self.begin_cycle().1
    }

    /// The current cycle number
    pub fn cycle(&self) -> u64 {
        self.inner.state.lock().cycle
    }

    /// Whether the callback has fired since the last clear
    pub fn is_filled(&self) -> bool {
        self.inner.state.lock().value.is_some()
    }

    /// Empty the slot, returning whatever was left in it
    pub fn clear(&self) -> Option<Delivery> {
        self.inner.state.lock().value.take()
    }

    /// Take the delivered value
    pub fn take(&self) -> Option<Delivery> {
        self.clear()
    }

    /// Total deliveries offered to this slot, accepted or not
    pub fn deliveries(&self) -> u64 {
        self.inner.deliveries.load(Ordering::Relaxed)
    }

    /// Store `delivery` for `cycle` if that cycle is current and the slot empty
    pub fn offer(&self, cycle: u64, delivery: Delivery) -> Offer {
        self.inner.deliveries.fetch_add(1, Ordering::Relaxed);
        let mut state = self.inner.state.lock();
        if state.cycle != cycle {
            return Offer::Stale(delivery.handle());
        }
        if state.value.is_some() {
            return Offer::Duplicate(delivery.handle());
        }
        state.value = Some(delivery);
        self.inner.ready.notify_all();
        Offer::Accepted
    }

    /// Block until the slot is filled or `timeout` elapses.
    ///
    /// Returns whether the slot is filled.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut state = self.inner.state.lock();
        if state.value.is_none() {
            self.inner.ready.wait_for(&mut state, timeout);
        }
        state.value.is_some()
    }
}

impl Default for CallbackSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Host function registered with the engine for one call cycle
pub struct CallbackBridge {
    slot: CallbackSlot,
    cycle: u64,
}

impl CallbackBridge {
    /// Create a bridge writing into `slot` during `cycle`
    pub fn new(slot: CallbackSlot, cycle: u64) -> Self {
        Self { slot, cycle }
    }

    /// The slot this bridge writes to
    pub fn slot(&self) -> &CallbackSlot {
        &self.slot
    }

    /// The cycle this bridge delivers for
    pub fn cycle(&self) -> u64 {
        self.cycle
    }
}

impl CallbackSink for CallbackBridge {
    fn deliver(&self, argument: Option<HandleId>) -> Option<HandleId> {
        let delivery = match argument {
            Some(handle) => Delivery::Result(handle),
            None => Delivery::Missing,
        };
        let offer = self.slot.offer(self.cycle, delivery);
        match offer {
            Offer::Accepted => {}
            Offer::Duplicate(_) => {
                warn!(cycle = self.cycle, "Callback fired again in the same cycle; releasing argument")
            }
            Offer::Stale(_) => {
                warn!(cycle = self.cycle, "Callback fired after its call ended; releasing argument")
            }
        }
        offer.refused()
    }
}
