//! Two-slot producer/consumer handshake
//!
//! A [`DoubleBuffer`] owns two aligned slots, A and B, each guarded by one
//! atomic state word. Ownership of a slot's bytes follows its state:
//!
//! | state        | owner    | next transition                        |
//! |--------------|----------|----------------------------------------|
//! | `Empty`      | producer | `Filled(n)`, `Done` or `Aborted`       |
//! | `Filled(n)`  | consumer | `Empty` or `Aborted`                   |
//! | `Done`       | nobody   | terminal                               |
//! | `Aborted`    | nobody   | terminal                               |
//!
//! Both sides walk the slots in the order A, B, A, B, ... A state is
//! published with a `Release` store and observed with an `Acquire` load, which
//! is the only synchronisation of the payload bytes.
//!
//! The producer ends after publishing a short chunk (`n < capacity`), or by
//! calling [`Producer::finish`] after a full one. The consumer ends after
//! draining a short chunk, or on observing `Done`. A side that fails publishes
//! `Aborted` on the slot it owns, which is always the next slot its partner
//! waits on.

use crate::buffer::AlignedBuffer;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;
use twinbuf_types::{Alignment, BufferSize, Error, Result, WaitStrategy};

const EMPTY: usize = usize::MAX;
const DONE: usize = usize::MAX - 1;
const ABORTED: usize = usize::MAX - 2;

/// Polls of the state word before [`WaitStrategy::Yield`] starts yielding
const SPINS_BEFORE_YIELD: u32 = 128;

/// Decoded value of a slot's state word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Writable by the producer
    Empty,
    /// Holds `n` valid bytes for the consumer
    Filled(usize),
    /// The producer has nothing more to send
    Done,
    /// One side failed; the session is over
    Aborted,
}

impl SlotState {
    fn encode(self) -> usize {
        match self {
            Self::Empty => EMPTY,
            Self::Filled(n) => n,
            Self::Done => DONE,
            Self::Aborted => ABORTED,
        }
    }

    fn decode(word: usize) -> Self {
        match word {
            EMPTY => Self::Empty,
            DONE => Self::Done,
            ABORTED => Self::Aborted,
            n => Self::Filled(n),
        }
    }
}

/// What a side should do after one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// A full chunk moved; keep going
    Continue,
    /// This side has reached the end of the stream
    Finished,
    /// The partner published `Aborted`; stop without an error of our own
    PartnerFailed,
}

struct Slot {
    state: AtomicUsize,
    data: UnsafeCell<AlignedBuffer>,
}

impl Slot {
    fn load(&self) -> SlotState {
        SlotState::decode(self.state.load(Ordering::Acquire))
    }

    fn publish(&self, state: SlotState) {
        self.state.store(state.encode(), Ordering::Release);
    }
}

/// The two slots shared by one producer and one consumer
pub struct DoubleBuffer {
    slots: [Slot; 2],
    capacity: usize,
    wait: WaitStrategy,
}

// SAFETY: the bytes of a slot are only touched by the side that owns it
// according to its state word, and ownership moves with Release/Acquire pairs.
unsafe impl Sync for DoubleBuffer {}

impl DoubleBuffer {
    /// Allocate both slots, `capacity` bytes each, both `Empty`
    pub fn new(capacity: BufferSize, alignment: Alignment) -> Result<Self> {
        let slot = || -> Result<Slot> {
            Ok(Slot {
                state: AtomicUsize::new(EMPTY),
                data: UnsafeCell::new(AlignedBuffer::new(capacity, alignment)?),
            })
        };
        Ok(Self {
            slots: [slot()?, slot()?],
            capacity: capacity.get(),
            wait: WaitStrategy::default(),
        })
    }

    /// Choose how both sides wait for a state change
    pub fn with_wait_strategy(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    /// Capacity of each slot in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current state of slot `index` (0 = A, 1 = B)
    pub fn state(&self, index: usize) -> SlotState {
        self.slots[index & 1].load()
    }

    /// Create the producer and consumer handles, both positioned on slot A
    pub fn split(&self) -> (Producer<'_>, Consumer<'_>) {
        (
            Producer {
                shared: self,
                current: 0,
                stopped: None,
            },
            Consumer {
                shared: self,
                current: 0,
                stopped: None,
                bytes: 0,
                chunks: 0,
            },
        )
    }

    fn wait_until(&self, index: usize, ready: impl Fn(SlotState) -> bool) -> SlotState {
        let slot = &self.slots[index];
        let mut polls = 0u32;
        loop {
            let state = slot.load();
            if ready(state) {
                return state;
            }
            match self.wait {
                WaitStrategy::Spin => std::hint::spin_loop(),
                WaitStrategy::Yield if polls < SPINS_BEFORE_YIELD => {
                    polls += 1;
                    std::hint::spin_loop();
                }
                WaitStrategy::Yield => std::thread::yield_now(),
            }
        }
    }
}

impl std::fmt::Debug for DoubleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleBuffer")
            .field("capacity", &self.capacity)
            .field("a", &self.state(0))
            .field("b", &self.state(1))
            .field("wait", &self.wait)
            .finish()
    }
}

/// Publishes `Aborted` on a slot if dropped during a panic
struct AbortOnUnwind<'a>(&'a Slot);

impl Drop for AbortOnUnwind<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.publish(SlotState::Aborted);
        }
    }
}

/// Filling side of a [`DoubleBuffer`]
pub struct Producer<'a> {
    shared: &'a DoubleBuffer,
    current: usize,
    stopped: Option<Flow>,
}

impl Producer<'_> {
    /// Wait for the current slot, let `fill` write into it, then hand it over.
    ///
    /// `fill` receives the whole slot and returns how many bytes it wrote. A
    /// count below capacity publishes the final chunk and ends the producer.
    /// If `fill` fails, the slot is marked `Aborted` and the error returned.
    pub fn fill<F>(&mut self, fill: F) -> Result<Flow>
    where
        F: FnOnce(&mut [u8]) -> Result<usize>,
    {
        if let Some(flow) = self.stopped {
            return Ok(flow);
        }

        let shared = self.shared;
        let capacity = shared.capacity;
        let index = self.current;
        let state = shared.wait_until(index, |s| matches!(s, SlotState::Empty | SlotState::Aborted));
        if state == SlotState::Aborted {
            return Ok(self.stop(Flow::PartnerFailed));
        }

        let slot = &shared.slots[index];
        let guard = AbortOnUnwind(slot);
        // SAFETY: the slot is Empty, so the producer has exclusive access
        // until it publishes a new state below.
        let buf = unsafe { (*slot.data.get()).as_mut_slice() };
        let filled = fill(buf).and_then(|n| {
            if n > capacity {
                Err(Error::config(format!(
                    "Chunk of {} bytes exceeds slot capacity {}",
                    n, capacity
                )))
            } else {
                Ok(n)
            }
        });
        drop(guard);

        match filled {
            Ok(n) => {
                slot.publish(SlotState::Filled(n));
                trace!("Producer published {} bytes in slot {}", n, index);
                self.current ^= 1;
                if n < capacity {
                    Ok(self.stop(Flow::Finished))
                } else {
                    Ok(Flow::Continue)
                }
            }
            Err(error) => {
                slot.publish(SlotState::Aborted);
                self.stop(Flow::PartnerFailed);
                Err(error)
            }
        }
    }

    /// End the stream after a full final chunk.
    ///
    /// Waits for the next slot to be released and publishes `Done` there.
    /// Calling it again, or after a short chunk, does nothing.
    pub fn finish(&mut self) -> Flow {
        if let Some(flow) = self.stopped {
            return flow;
        }

        let index = self.current;
        let state = self
            .shared
            .wait_until(index, |s| matches!(s, SlotState::Empty | SlotState::Aborted));
        if state == SlotState::Aborted {
            return self.stop(Flow::PartnerFailed);
        }
        self.shared.slots[index].publish(SlotState::Done);
        trace!("Producer published Done in slot {}", index);
        self.stop(Flow::Finished)
    }

    /// Whether the producer has stopped
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_some()
    }

    fn stop(&mut self, flow: Flow) -> Flow {
        self.stopped = Some(flow);
        flow
    }
}

/// Draining side of a [`DoubleBuffer`]
pub struct Consumer<'a> {
    shared: &'a DoubleBuffer,
    current: usize,
    stopped: Option<Flow>,
    bytes: u64,
    chunks: u64,
}

impl Consumer<'_> {
    /// Wait for the current slot to be filled, pass its bytes to `drain`, then
    /// release it.
    ///
    /// `Done` and `Aborted` end the consumer without touching the buffer. A
    /// short chunk is drained and then ends the consumer. Once stopped, every
    /// further call returns the same terminal flow.
    pub fn drain<F>(&mut self, drain: F) -> Result<Flow>
    where
        F: FnOnce(&[u8]) -> Result<()>,
    {
        if let Some(flow) = self.stopped {
            return Ok(flow);
        }

        let shared = self.shared;
        let index = self.current;
        let state = shared.wait_until(index, |s| s != SlotState::Empty);
        let n = match state {
            SlotState::Filled(n) => n,
            SlotState::Done => return Ok(self.stop(Flow::Finished)),
            SlotState::Aborted => return Ok(self.stop(Flow::PartnerFailed)),
            SlotState::Empty => unreachable!("wait_until never returns Empty here"),
        };

        let slot = &shared.slots[index];
        let guard = AbortOnUnwind(slot);
        // SAFETY: the slot is Filled, so the consumer has exclusive access
        // until it publishes Empty below.
        let buf = unsafe { &(*slot.data.get()).as_slice()[..n] };
        let drained = drain(buf);
        drop(guard);

        match drained {
            Ok(()) => {
                slot.publish(SlotState::Empty);
                self.bytes += n as u64;
                self.chunks += 1;
                self.current ^= 1;
                if n < shared.capacity {
                    Ok(self.stop(Flow::Finished))
                } else {
                    Ok(Flow::Continue)
                }
            }
            Err(error) => {
                slot.publish(SlotState::Aborted);
                self.stop(Flow::PartnerFailed);
                Err(error)
            }
        }
    }

    /// Bytes drained so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Chunks drained so far
    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Whether the consumer has stopped
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_some()
    }

    fn stop(&mut self, flow: Flow) -> Flow {
        self.stopped = Some(flow);
        flow
    }
}
