//! Driver contract for a USB-PD sink stack.
//!
//! This crate defines the boundary between the protocol core and a concrete
//! Type-C Port Controller (TCPC) driver. Every call into the driver is
//! request/poll rather than blocking: a caller issues a `req_*` and later
//! polls the matching `is_*_done`/`try_*_result`, or inspects a shared
//! atomic cell such as [`TransmitStatus`]. This keeps the protocol core free
//! of `async`/await and lets it run from a single cooperative task while the
//! driver itself may run register I/O from interrupt context.
#![no_std]
#![warn(missing_docs)]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

/// The two possible polarities of a Type-C plug, or none while unattached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// No orientation has been selected yet.
    None,
    /// CC1 carries the control channel.
    Cc1,
    /// CC2 carries the control channel.
    Cc2,
}

/// A CC line's advertised current level, read via the 5-level TCPC comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CcLevel {
    /// No pull-up/pull-down detected, or an open line.
    None,
    /// Rp indicating default USB current (500 mA/900 mA region).
    Rp500mA,
    /// Rp indicating 1.5 A, also used as the "SinkTxNG" gate value.
    Rp1500mA,
    /// Rp indicating 3.0 A, also used as the "SinkTxOK" gate value.
    Rp3000mA,
}

impl CcLevel {
    /// The partner has asserted `SinkTxOK`: the sink may start an AMS.
    pub fn is_sink_tx_ok(self) -> bool {
        matches!(self, Self::Rp3000mA)
    }

    /// The partner has asserted `SinkTxNG`: the sink must hold off.
    pub fn is_sink_tx_ng(self) -> bool {
        matches!(self, Self::Rp1500mA)
    }
}

/// BIST (Built-In Self Test) mode requested of the PHY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BistMode {
    /// Leave BIST mode.
    Off,
    /// Continuous carrier emission, used for compliance testing.
    Carrier,
    /// Repeating test-data pattern. Exits only via Hard Reset.
    TestData,
}

/// The lifecycle of a single transmit attempt, shared between task and driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TransmitState {
    /// No transmission outstanding.
    Unset = 0,
    /// Accepted by the driver, not yet on the wire.
    Enqueued = 1,
    /// On the wire, awaiting GoodCRC or a timeout.
    Sending = 2,
    /// Completed successfully (GoodCRC observed, or hardware reported success).
    Succeeded = 3,
    /// Completed unsuccessfully.
    Failed = 4,
}

impl TransmitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Enqueued,
            2 => Self::Sending,
            3 => Self::Succeeded,
            4 => Self::Failed,
            _ => Self::Unset,
        }
    }
}

/// Shared atomic cell carrying the TCPC transmit status (`tcpc_tx_status`).
///
/// Written by the driver from interrupt context, read by the task. Plain
/// `AtomicU8` is sufficient: there is a single writer and a single reader,
/// and every value is a complete, self-describing state.
#[derive(Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransmitStatus(AtomicU8);

impl TransmitStatus {
    /// Create a new cell in the `Unset` state.
    pub const fn new() -> Self {
        Self(AtomicU8::new(TransmitState::Unset as u8))
    }

    /// Load the current state.
    pub fn get(&self) -> TransmitState {
        TransmitState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store a new state.
    pub fn set(&self, state: TransmitState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// True if the cell holds a terminal value (`Succeeded` or `Failed`).
    pub fn is_terminal(&self) -> bool {
        matches!(self.get(), TransmitState::Succeeded | TransmitState::Failed)
    }
}

/// Fixed hardware capabilities reported once by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HwFeatures {
    /// The PHY automatically replies GoodCRC to inbound packets.
    pub has_auto_good_crc_rx: bool,
    /// The PHY automatically checks for a GoodCRC reply to our transmissions.
    pub has_auto_good_crc_check: bool,
    /// The PHY automatically retries a failed transmission in hardware.
    pub has_auto_retry: bool,
}

/// A single-slot producer/consumer synchronizer that lets a producer "leap
/// over" unfinished consumer work.
///
/// `enquire` always overwrites any pending, not-yet-started request. The
/// consumer's `get_job` moves `Enquired -> Working` and hands back the
/// parameter; `mark_finished` moves `Working -> Idle`, but only if no newer
/// request landed while the job was in flight, in which case the state
/// stays `Enquired` and the newer parameter is delivered on the next
/// `get_job`. This is the single mechanism used to cross the task/ISR
/// boundary for every driver request (`req_*`) in [`Tcpc`].
#[derive(Debug)]
pub struct LeapSync<T = ()> {
    state: AtomicU8,
    storage: UnsafeCell<T>,
}

const LEAP_IDLE: u8 = 0;
const LEAP_ENQUIRED: u8 = 1;
const LEAP_WORKING: u8 = 2;

// SAFETY: `storage` is written only by the single producer before the state
// transitions to `Enquired`, and read only by the single consumer after it
// observes `Working` (established via the state's Acquire/Release pairing).
unsafe impl<T: Send> Sync for LeapSync<T> {}

impl<T: Default> Default for LeapSync<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> LeapSync<T> {
    /// Create a new, idle cell holding `initial`.
    pub const fn new(initial: T) -> Self {
        Self {
            state: AtomicU8::new(LEAP_IDLE),
            storage: UnsafeCell::new(initial),
        }
    }

    /// True if no request is pending or in progress.
    pub fn is_idle(&self) -> bool {
        self.state.load(Ordering::Acquire) == LEAP_IDLE
    }

    /// True if a request has been accepted by the consumer and is running.
    pub fn is_working(&self) -> bool {
        self.state.load(Ordering::Acquire) == LEAP_WORKING
    }

    /// Producer: request work with `params`, overwriting any unstarted request.
    pub fn enquire(&self, params: T) {
        // Two-phase publication: drop to Idle first so a concurrent
        // `get_job` never observes a half-written parameter under
        // `Enquired`.
        self.state.store(LEAP_IDLE, Ordering::Release);
        // SAFETY: state is Idle, so the consumer will not read `storage`
        // until the following store makes it Enquired again.
        unsafe { *self.storage.get() = params };
        self.state.store(LEAP_ENQUIRED, Ordering::Release);
    }

    /// Producer/consumer: force the cell back to idle, discarding any job.
    pub fn reset(&self) {
        self.state.store(LEAP_IDLE, Ordering::Release);
    }

    /// Consumer: accept a pending request, returning its parameter.
    pub fn get_job(&self) -> Option<T>
    where
        T: Copy,
    {
        self.state
            .compare_exchange(LEAP_ENQUIRED, LEAP_WORKING, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        // SAFETY: we just won the CAS into Working; the producer will not
        // touch `storage` again until it re-enquires, which first resets to
        // Idle and thus cannot race this read.
        let params = unsafe { *self.storage.get() };
        if self.state.load(Ordering::Acquire) != LEAP_WORKING {
            // Producer raced us back to Idle/Enquired before we read; the
            // caller must not act on stale data.
            return None;
        }
        Some(params)
    }

    /// Consumer: mark the current job done, returning to idle unless the
    /// producer already enqueued a newer request.
    pub fn mark_finished(&self) {
        let _ = self
            .state
            .compare_exchange(LEAP_WORKING, LEAP_IDLE, Ordering::AcqRel, Ordering::Acquire);
    }
}

impl LeapSync<()> {
    /// Producer: request work with no parameter.
    pub fn enquire_unit(&self) {
        self.state.store(LEAP_ENQUIRED, Ordering::Release);
    }

    /// Consumer: accept a pending no-parameter request.
    pub fn get_job_unit(&self) -> bool {
        self.state
            .compare_exchange(LEAP_ENQUIRED, LEAP_WORKING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Errors reported by a driver implementation across the `Tcpc` boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// The requested operation is not supported by this PHY.
    Unsupported,
    /// A request was issued while a previous one of the same kind was still outstanding.
    Busy,
}

/// The abstract, request/poll driver contract a physical-layer chip driver
/// (FUSB302 family or equivalent) must implement.
///
/// Every `req_*` method enqueues work (typically by calling `enquire` on an
/// internal [`LeapSync`]); the matching `is_*_done`/`try_*_result` polls for
/// completion. None of these methods may block.
pub trait Tcpc {
    /// Request a full dual-line CC level scan.
    fn req_scan_cc(&self);
    /// Poll for the result of a previously requested CC scan.
    fn try_scan_cc_result(&self) -> Option<(CcLevel, CcLevel)>;

    /// Request a fast sample of the polarity-selected CC line only.
    fn req_active_cc(&self);
    /// Poll for the result of a previously requested active-CC sample.
    fn try_active_cc_result(&self) -> Option<CcLevel>;

    /// Cheap, synchronous VBUS-present gate (may be CC-derived on some PHYs).
    fn is_vbus_ok(&self) -> bool;

    /// Request the PHY select `polarity` for TX/RX.
    fn req_set_polarity(&self, polarity: Polarity);
    /// True once a previously requested polarity change has taken effect.
    fn is_set_polarity_done(&self) -> bool;

    /// Request the receive path be enabled or disabled.
    ///
    /// Disabling MUST flush the RX FIFO; enabling MUST flush the TX FIFO.
    fn req_rx_enable(&self, enable: bool);
    /// True once a previously requested RX-enable change has taken effect.
    fn is_rx_enable_done(&self) -> bool;

    /// Drain at least one pending chunk into `buf`, returning the number of
    /// bytes written, or `None` if nothing was pending.
    fn fetch_rx_data(&self, buf: &mut [u8; 28]) -> Option<usize>;

    /// Request transmission of `len` bytes from `buf`. Completion and
    /// success/failure are reported via the shared [`TransmitStatus`].
    fn req_transmit(&self, buf: &[u8; 28], len: usize);

    /// Request a BIST mode change.
    fn req_set_bist(&self, mode: BistMode);
    /// True once a previously requested BIST mode change has taken effect.
    fn is_set_bist_done(&self) -> bool;

    /// Request a Hard Reset be sent on the wire. "Done" means the command
    /// was accepted by the PHY; completion is reported via
    /// [`TransmitStatus`].
    fn req_hr_send(&self);
    /// True once the Hard Reset command has been accepted by the PHY.
    fn is_hr_send_done(&self) -> bool;

    /// The fixed hardware capabilities of this PHY.
    fn get_hw_features(&self) -> HwFeatures;

    /// A monotonic millisecond timestamp.
    fn now_ms(&self) -> u32;

    /// True if this driver supports re-arming a hardware timer via [`Self::rearm`].
    fn is_rearm_supported(&self) -> bool {
        false
    }

    /// Schedule the next tick callback `delay_ms` from now. No-op on drivers
    /// that do not support re-arming.
    fn rearm(&self, _delay_ms: u32) {}
}
