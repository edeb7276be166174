//! Bounded item pool with an integrated FIFO
//!
//! A pool owns a fixed number of reusable items. Each item is always in
//! exactly one place:
//!
//! ```text
//!   free ──take──▶ held (Slot) ──send──▶ queued ──receive──▶ held (Slot)
//!    ▲                 │                                        │
//!    └─────release─────┴───────────────release──────────────────┘
//! ```
//!
//! `take` is the backpressure point: when every item is held or queued,
//! producers wait until a consumer releases one. Priority sends go ahead of
//! all normal items but behind earlier priority items.
//!
//! Free items are not stored: a taken slot starts from `T::default()` and a
//! released item is dropped on the spot, so nothing it owns outlives the
//! slot.
//!
//! Timeouts are supplied by the caller as a future (for example
//! `embassy_time::Timer::after`), so the pool has no clock of its own.

use core::cell::RefCell;
use core::fmt;
use core::future::{poll_fn, Future};
use core::mem;
use core::ops::{Deref, DerefMut};
use core::task::{Context, Poll};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::MultiWakerRegistration;
use heapless::Vec;

/// Tasks that can wait on one side of a pool at once
const MAX_WAITERS: usize = 4;

/// Where the items of a pool currently are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Occupancy {
    /// Available to `take`
    pub free: usize,
    /// Sent and waiting for `receive`
    pub queued: usize,
    /// Out in a [`Slot`]
    pub held: usize,
}

struct State<T, const N: usize> {
    free: usize,
    queue: Vec<T, N>,
    /// Leading entries of `queue` that were sent with priority
    priority: usize,
    takers: MultiWakerRegistration<MAX_WAITERS>,
    receivers: MultiWakerRegistration<MAX_WAITERS>,
}

impl<T, const N: usize> State<T, N> {
    fn claim(&mut self) -> bool {
        if self.free == 0 {
            return false;
        }
        self.free -= 1;
        true
    }

    fn dequeue(&mut self) -> Option<T> {
        if self.queue.is_empty() {
            return None;
        }
        self.priority = self.priority.saturating_sub(1);
        Some(self.queue.remove(0))
    }
}

/// Fixed-capacity pool of `N` items of type `T`
pub struct Pool<M: RawMutex, T: Default, const N: usize> {
    state: Mutex<M, RefCell<State<T, N>>>,
}

impl<M: RawMutex, T: Default, const N: usize> Pool<M, T, N> {
    /// Create a pool with every item free
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                free: N,
                queue: Vec::new(),
                priority: 0,
                takers: MultiWakerRegistration::new(),
                receivers: MultiWakerRegistration::new(),
            })),
        }
    }

    /// Total number of items
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Snapshot of where the items are
    pub fn occupancy(&self) -> Occupancy {
        self.state.lock(|s| {
            let s = s.borrow();
            let free = s.free;
            let queued = s.queue.len();
            Occupancy {
                free,
                queued,
                held: N - free - queued,
            }
        })
    }

    /// Take a free item without waiting
    pub fn try_take(&self) -> Option<Slot<'_, M, T, N>> {
        self.state
            .lock(|s| s.borrow_mut().claim())
            .then(|| Slot::new(self, T::default()))
    }

    /// Take a free item, waiting until one is released
    pub async fn take(&self) -> Slot<'_, M, T, N> {
        poll_fn(move |cx| self.poll_take(cx)).await
    }

    /// Take a free item, giving up when `timeout` completes first
    pub async fn take_within<F>(&self, timeout: F) -> Option<Slot<'_, M, T, N>>
    where
        F: Future<Output = ()>,
    {
        match select(self.take(), timeout).await {
            Either::First(slot) => Some(slot),
            Either::Second(()) => None,
        }
    }

    /// Receive the oldest queued item without waiting
    pub fn try_receive(&self) -> Option<Slot<'_, M, T, N>> {
        self.state
            .lock(|s| s.borrow_mut().dequeue())
            .map(|item| Slot::new(self, item))
    }

    /// Receive the oldest queued item, waiting until one is sent
    pub async fn receive(&self) -> Slot<'_, M, T, N> {
        poll_fn(move |cx| self.poll_receive(cx)).await
    }

    /// Receive a queued item, giving up when `timeout` completes first
    pub async fn receive_within<F>(&self, timeout: F) -> Option<Slot<'_, M, T, N>>
    where
        F: Future<Output = ()>,
    {
        match select(self.receive(), timeout).await {
            Either::First(slot) => Some(slot),
            Either::Second(()) => None,
        }
    }

    fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Slot<'_, M, T, N>> {
        let claimed = self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let claimed = s.claim();
            if !claimed {
                s.takers.register(cx.waker());
            }
            claimed
        });

        if claimed {
            Poll::Ready(Slot::new(self, T::default()))
        } else {
            Poll::Pending
        }
    }

    fn poll_receive(&self, cx: &mut Context<'_>) -> Poll<Slot<'_, M, T, N>> {
        let item = self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let item = s.dequeue();
            if item.is_none() {
                s.receivers.register(cx.waker());
            }
            item
        });

        match item {
            Some(item) => Poll::Ready(Slot::new(self, item)),
            None => Poll::Pending,
        }
    }

    fn enqueue(&self, item: T, priority: bool) {
        self.state.lock(|s| {
            let s = &mut *s.borrow_mut();
            let at = if priority { s.priority } else { s.queue.len() };
            // Only N items exist, so the queue always has room
            if s.queue.insert(at, item).is_ok() && priority {
                s.priority += 1;
            }
            s.receivers.wake();
        });
    }

    fn release(&self) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            s.free = (s.free + 1).min(N);
            s.takers.wake();
        });
    }
}

impl<M: RawMutex, T: Default, const N: usize> Default for Pool<M, T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, T: Default, const N: usize> fmt::Debug for Pool<M, T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &N)
            .field("occupancy", &self.occupancy())
            .finish()
    }
}

/// An item checked out of a [`Pool`]
///
/// Dropping a slot drops the item and returns its place to the pool. `send` hands it to
/// the pool's FIFO instead. Either way the item goes back exactly once.
pub struct Slot<'p, M: RawMutex, T: Default, const N: usize> {
    pool: &'p Pool<M, T, N>,
    item: T,
    owned: bool,
}

impl<'p, M: RawMutex, T: Default, const N: usize> Slot<'p, M, T, N> {
    fn new(pool: &'p Pool<M, T, N>, item: T) -> Self {
        Self {
            pool,
            item,
            owned: true,
        }
    }

    /// Append the item to the tail of the FIFO
    pub fn send(mut self) {
        let item = self.surrender();
        self.pool.enqueue(item, false);
    }

    /// Queue the item ahead of all normally sent items
    pub fn send_priority(mut self) {
        let item = self.surrender();
        self.pool.enqueue(item, true);
    }

    /// Drop the item and free its place
    pub fn release(self) {
        drop(self);
    }

    fn surrender(&mut self) -> T {
        self.owned = false;
        mem::take(&mut self.item)
    }
}

impl<M: RawMutex, T: Default, const N: usize> Deref for Slot<'_, M, T, N> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<M: RawMutex, T: Default, const N: usize> DerefMut for Slot<'_, M, T, N> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}

impl<M: RawMutex, T: Default, const N: usize> Drop for Slot<'_, M, T, N> {
    fn drop(&mut self) {
        if self.owned {
            // The old contents go before the place is visible as free
            drop(self.surrender());
            self.pool.release();
        }
    }
}

impl<M: RawMutex, T: Default + fmt::Debug, const N: usize> fmt::Debug for Slot<'_, M, T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&self.item).finish()
    }
}
