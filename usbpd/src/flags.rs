//! Fixed-width bags of named boolean flags with atomic test/set/clear.
//!
//! The wire-format layer already reaches for `proc_bitfield::bitfield!` to
//! turn a `u32` into named bit accessors (see
//! `protocol_layer::message::header::Header`); flag sets reuse the same
//! idea over an [`AtomicU32`], since every flag set in this stack
//! (`pe_flags`, `dpm_requests`, the PRL per-FSM flag sets) is written from
//! the task and, for a handful of driver-observed flags, from interrupt
//! context.

use core::sync::atomic::{AtomicU32, Ordering};

/// A bag of up to 32 named boolean flags, each addressed by its bit index.
#[derive(Debug, Default)]
pub struct FlagSet(AtomicU32);

impl FlagSet {
    /// A flag set with every flag clear.
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Test a single flag.
    pub fn test(&self, bit: u32) -> bool {
        self.0.load(Ordering::Acquire) & (1 << bit) != 0
    }

    /// Set a single flag.
    pub fn set(&self, bit: u32) {
        self.0.fetch_or(1 << bit, Ordering::AcqRel);
    }

    /// Clear a single flag.
    pub fn clear(&self, bit: u32) {
        self.0.fetch_and(!(1 << bit), Ordering::AcqRel);
    }

    /// Atomically test a flag and clear it, returning the prior value.
    pub fn test_and_clear(&self, bit: u32) -> bool {
        let prior = self.0.fetch_and(!(1 << bit), Ordering::AcqRel);
        prior & (1 << bit) != 0
    }

    /// Clear every flag in this set.
    pub fn clear_all(&self) {
        self.0.store(0, Ordering::Release);
    }

    /// True if no flag is set.
    pub fn is_empty(&self) -> bool {
        self.0.load(Ordering::Acquire) == 0
    }
}

/// Declares a named, `#[repr(u32)]`-indexed flag enum plus ergonomic
/// `Port`-field-style wrapper methods over a [`FlagSet`].
///
/// Each flag set in the data model (§3 of the specification this stack
/// implements) becomes one such enum, so call sites read
/// `port.pe_flags.test(PeFlag::HasExplicitContract)` instead of a bare bit
/// index.
macro_rules! flag_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        $vis enum $name {
            $($variant),+
        }

        impl $name {
            const fn bit(self) -> u32 {
                self as u32
            }
        }
    };
}

pub(crate) use flag_enum;

impl FlagSet {
    /// Test a flag identified by a [`flag_enum!`] variant.
    pub fn test_flag<F: Into<u32>>(&self, flag: F) -> bool {
        self.test(flag.into())
    }

    /// Set a flag identified by a [`flag_enum!`] variant.
    pub fn set_flag<F: Into<u32>>(&self, flag: F) {
        self.set(flag.into())
    }

    /// Clear a flag identified by a [`flag_enum!`] variant.
    pub fn clear_flag<F: Into<u32>>(&self, flag: F) {
        self.clear(flag.into())
    }

    /// Test-and-clear a flag identified by a [`flag_enum!`] variant.
    pub fn test_and_clear_flag<F: Into<u32>>(&self, flag: F) -> bool {
        self.test_and_clear(flag.into())
    }
}

flag_enum! {
    /// Flags owned by the Policy Engine (`port.pe_flags`).
    pub enum PeFlag {
        TxComplete,
        MsgDiscarded,
        MsgReceived,
        ForwardPrlError,
        ProtocolError,
        HasExplicitContract,
        InEprMode,
        AmsActive,
        AmsFirstMsgSent,
        EprAutoEnterDisabled,
        HandshakeReported,
        WaitDpmTransitToDefault,
        PrlHardResetPending,
        HrByCapsTimeout,
        DoSoftResetOnUnsupported,
        CanSendSoftReset,
        TransmitRequestSucceeded,
    }
}
impl From<PeFlag> for u32 {
    fn from(flag: PeFlag) -> Self {
        flag.bit()
    }
}

flag_enum! {
    /// Requests raised by the DPM towards the Policy Engine (`port.dpm_requests`).
    pub enum DpmRequest {
        NewPowerLevel,
        EprModeEntry,
    }
}
impl From<DpmRequest> for u32 {
    fn from(flag: DpmRequest) -> Self {
        flag.bit()
    }
}

flag_enum! {
    /// Flags owned by the Tx sub-FSM.
    pub enum TxFlag {
        StartOfAmsDetected,
        TxChunkEnqueued,
        TxCompleted,
        TxError,
    }
}
impl From<TxFlag> for u32 {
    fn from(flag: TxFlag) -> Self {
        flag.bit()
    }
}

flag_enum! {
    /// Flags owned by the RCH sub-FSM.
    pub enum RchFlag {
        RxEnqueued,
    }
}
impl From<RchFlag> for u32 {
    fn from(flag: RchFlag) -> Self {
        flag.bit()
    }
}

flag_enum! {
    /// Flags owned by the TCH sub-FSM.
    pub enum TchFlag {
        MsgFromPeEnqueued,
        ChunkFromRx,
    }
}
impl From<TchFlag> for u32 {
    fn from(flag: TchFlag) -> Self {
        flag.bit()
    }
}

flag_enum! {
    /// Flags owned by the HR sub-FSM.
    pub enum HrFlag {
        HardResetFromPartner,
        HardResetFromPe,
        PeHardResetComplete,
    }
}
impl From<HrFlag> for u32 {
    fn from(flag: HrFlag) -> Self {
        flag.bit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_test_clear_round_trip() {
        let flags = FlagSet::new();
        assert!(!flags.test_flag(PeFlag::HasExplicitContract));
        flags.set_flag(PeFlag::HasExplicitContract);
        assert!(flags.test_flag(PeFlag::HasExplicitContract));
        flags.clear_flag(PeFlag::HasExplicitContract);
        assert!(!flags.test_flag(PeFlag::HasExplicitContract));
    }

    #[test]
    fn test_and_clear_is_atomic_snapshot() {
        let flags = FlagSet::new();
        flags.set_flag(TxFlag::TxCompleted);
        assert!(flags.test_and_clear_flag(TxFlag::TxCompleted));
        assert!(!flags.test_flag(TxFlag::TxCompleted));
        assert!(!flags.test_and_clear_flag(TxFlag::TxCompleted));
    }

    #[test]
    fn clear_all_wipes_every_flag() {
        let flags = FlagSet::new();
        flags.set_flag(PeFlag::AmsActive);
        flags.set_flag(PeFlag::InEprMode);
        flags.clear_all();
        assert!(flags.is_empty());
    }
}
