// VoltWatch — Sample Acquisition Engine
//
// Timer-paced conversions land in one of two fixed buffers ("ping-pong").
// When the active buffer is full the transfer side runs the completion
// handler, which flips to the other buffer and flags the full one READY. The
// acquisition loop polls for a READY buffer, locks it, drains it and releases
// it. Nothing on the consumer side ever blocks.
//
// Buffer lifecycle: Filling → Ready → Locked → Free → Filling. Exactly one
// buffer is Filling at any time, and a Locked buffer is never refilled.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use core::cell::Cell;
use critical_section::Mutex;

use crate::config::AcquisitionConfig;
use crate::error::AcquisitionError;

/// State of one ping-pong buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Target of the running transfer.
    Filling,
    /// Full and waiting for the consumer.
    Ready,
    /// Held by the consumer.
    Locked,
    /// Released; next in line to be filled.
    Free,
}

#[derive(Debug, Clone, Copy)]
struct SwapState {
    states: [BufferState; 2],
    filling: usize,
}

/// The two buffers plus the flags shared with the completion handler.
///
/// Samples are written only into the Filling buffer and read only from the
/// Locked buffer; every state transition happens inside a critical section.
pub struct PingPong {
    buffers: [Box<[UnsafeCell<u16>]>; 2],
    len: usize,
    cursor: AtomicUsize,
    swap: Mutex<Cell<SwapState>>,
    completed: AtomicU32,
    overflows: AtomicU32,
}

// SAFETY: the writer only touches `buffers[filling]`, the reader only touches
// the buffer it locked, and `filling` never points at a Locked buffer. The
// flags that decide this live behind a critical section.
unsafe impl Sync for PingPong {}

impl PingPong {
    pub fn new(len: usize) -> Self {
        let alloc = || (0..len).map(|_| UnsafeCell::new(0u16)).collect::<Box<[_]>>();
        Self {
            buffers: [alloc(), alloc()],
            len,
            cursor: AtomicUsize::new(0),
            swap: Mutex::new(Cell::new(SwapState {
                states: [BufferState::Filling, BufferState::Free],
                filling: 0,
            })),
            completed: AtomicU32::new(0),
            overflows: AtomicU32::new(0),
        }
    }

    /// Samples per buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store one converted sample at the current write position of the
    /// Filling buffer. Runs the completion handler when the buffer fills.
    ///
    /// Transfer side only: one writer at a time (the conversion ISR, a DMA
    /// emulation or a simulation thread).
    pub fn push(&self, sample: u16) {
        if self.len == 0 {
            return;
        }
        let filling = critical_section::with(|cs| self.swap.borrow(cs).get().filling);
        let pos = self.cursor.load(Ordering::Relaxed);
        // SAFETY: `filling` is never Locked, so no reader holds this buffer.
        unsafe { *self.buffers[filling][pos].get() = sample };

        if pos + 1 == self.len {
            self.cursor.store(0, Ordering::Relaxed);
            self.on_transfer_complete();
        } else {
            self.cursor.store(pos + 1, Ordering::Relaxed);
        }
    }

    /// Store a burst of samples, as a block transfer would.
    pub fn push_slice(&self, samples: &[u16]) {
        for &s in samples {
            self.push(s);
        }
    }

    /// Completion handler: count, flag, flip. Interrupt context, so minimal.
    ///
    /// Reusing a buffer the consumer has not drained is an overflow: the stale
    /// data is dropped and counted. A Locked buffer is never reused; in that
    /// case the buffer that just filled is dropped and refilled instead.
    pub fn on_transfer_complete(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        critical_section::with(|cs| {
            let cell = self.swap.borrow(cs);
            let mut st = cell.get();
            let full = st.filling;
            let next = 1 - full;

            match st.states[next] {
                BufferState::Free | BufferState::Filling => {
                    st.states[full] = BufferState::Ready;
                    st.states[next] = BufferState::Filling;
                    st.filling = next;
                }
                BufferState::Ready => {
                    self.overflows.fetch_add(1, Ordering::Relaxed);
                    st.states[full] = BufferState::Ready;
                    st.states[next] = BufferState::Filling;
                    st.filling = next;
                }
                BufferState::Locked => {
                    self.overflows.fetch_add(1, Ordering::Relaxed);
                    st.states[full] = BufferState::Filling;
                }
            }
            cell.set(st);
        });
    }

    pub fn is_ready(&self) -> bool {
        critical_section::with(|cs| {
            let st = self.swap.borrow(cs).get();
            st.states.contains(&BufferState::Ready)
        })
    }

    pub fn states(&self) -> [BufferState; 2] {
        critical_section::with(|cs| self.swap.borrow(cs).get().states)
    }

    fn try_lock_ready(&self) -> Option<usize> {
        critical_section::with(|cs| {
            let cell = self.swap.borrow(cs);
            let mut st = cell.get();
            if st.states.contains(&BufferState::Locked) {
                return None;
            }
            let idx = st.states.iter().position(|s| *s == BufferState::Ready)?;
            st.states[idx] = BufferState::Locked;
            cell.set(st);
            Some(idx)
        })
    }

    fn unlock(&self, idx: usize) {
        critical_section::with(|cs| {
            let cell = self.swap.borrow(cs);
            let mut st = cell.get();
            if st.states[idx] == BufferState::Locked {
                st.states[idx] = BufferState::Free;
                cell.set(st);
            }
        });
    }

    fn view(&self, idx: usize) -> &[u16] {
        let cells: &[UnsafeCell<u16>] = &self.buffers[idx];
        // SAFETY: called only for a Locked buffer, which the writer skips.
        // `UnsafeCell<u16>` has the same layout as `u16`.
        unsafe { core::slice::from_raw_parts(cells.as_ptr() as *const u16, cells.len()) }
    }

    /// Buffers completed since the last reset.
    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Buffers lost because the consumer fell behind.
    pub fn overflows(&self) -> u32 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Back to the power-on state. Only valid while the transfer is stopped.
    fn reset(&self) {
        self.cursor.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.overflows.store(0, Ordering::Relaxed);
        critical_section::with(|cs| {
            self.swap.borrow(cs).set(SwapState {
                states: [BufferState::Filling, BufferState::Free],
                filling: 0,
            })
        });
    }
}

/// Timer + converter peripheral driving a [`PingPong`].
///
/// `claim` takes exclusive ownership of the peripheral and programs the
/// periodic trigger so that every conversion is pushed into `exchange`.
pub trait Converter {
    fn claim(
        &mut self,
        config: &AcquisitionConfig,
        exchange: Arc<PingPong>,
    ) -> Result<(), AcquisitionError>;

    fn start(&mut self) -> Result<(), AcquisitionError>;

    fn stop(&mut self);
}

/// Consumer-side handle to the acquisition pipeline.
pub struct AcquisitionEngine<C: Converter> {
    converter: C,
    config: AcquisitionConfig,
    exchange: Arc<PingPong>,
    initialized: bool,
    running: bool,
}

impl<C: Converter> AcquisitionEngine<C> {
    pub fn new(converter: C, config: AcquisitionConfig) -> Self {
        Self {
            converter,
            exchange: Arc::new(PingPong::new(config.buffer_len)),
            config,
            initialized: false,
            running: false,
        }
    }

    /// Claim the converter and program the trigger. Failure is fatal and is
    /// returned as-is; nothing is retried.
    pub fn init(&mut self) -> Result<(), AcquisitionError> {
        if self.initialized {
            return Ok(());
        }
        self.converter
            .claim(&self.config, Arc::clone(&self.exchange))
            .map_err(|e| {
                log::error!("Acquisition init failed: {}", e);
                e
            })?;
        self.initialized = true;
        log::info!(
            "Acquisition initialised ({} Hz, {} samples/buffer, channel {})",
            self.config.sample_rate_hz,
            self.config.buffer_len,
            self.config.channel
        );
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), AcquisitionError> {
        if !self.initialized {
            return Err(AcquisitionError::NotInitialized);
        }
        if self.running {
            return Ok(());
        }
        self.exchange.reset();
        self.converter.start()?;
        self.running = true;
        log::info!("Acquisition started");
        Ok(())
    }

    /// Halt triggering. Idempotent.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.converter.stop();
        self.running = false;
        log::info!("Acquisition stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_ready(&self) -> bool {
        self.exchange.is_ready()
    }

    /// Lock the oldest READY buffer for reading. `None` if nothing is ready.
    /// The returned guard must be released (or dropped) before the next call.
    pub fn acquire_ready(&mut self) -> Option<ReadyBuffer<'_>> {
        let idx = self.exchange.try_lock_ready()?;
        Some(ReadyBuffer {
            exchange: &*self.exchange,
            idx,
            released: false,
        })
    }

    pub fn buffer_count(&self) -> u32 {
        self.exchange.completed()
    }

    pub fn overflow_count(&self) -> u32 {
        self.exchange.overflows()
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Transfer-side handle, for converters and simulations.
    pub fn exchange(&self) -> Arc<PingPong> {
        Arc::clone(&self.exchange)
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }
}

impl<C: Converter> Drop for AcquisitionEngine<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A locked buffer. Releasing it makes the slot available to the transfer.
pub struct ReadyBuffer<'a> {
    exchange: &'a PingPong,
    idx: usize,
    released: bool,
}

impl ReadyBuffer<'_> {
    pub fn samples(&self) -> &[u16] {
        self.exchange.view(self.idx)
    }

    pub fn len(&self) -> usize {
        self.exchange.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchange.is_empty()
    }

    /// Which ping-pong slot this is (0 or 1).
    pub fn index(&self) -> usize {
        self.idx
    }

    /// Hand the buffer back. The flag update runs with interrupts masked so it
    /// cannot interleave with the completion handler.
    pub fn release(mut self) {
        self.exchange.unlock(self.idx);
        self.released = true;
    }
}

impl Drop for ReadyBuffer<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.exchange.unlock(self.idx);
        }
    }
}
