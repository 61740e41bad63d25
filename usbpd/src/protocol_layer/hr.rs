//! HR (Hard Reset) sub-FSM: drives the PHY through a Hard Reset, whether
//! requested by the Policy Engine or detected from the partner.
//!
//! Grounded on the reference's `hard_reset()` retry loop, adapted to the
//! flag-set handshake the rest of this stack uses instead of an owned
//! `&mut` reference into the PE.
//!
//! `HrFlag::HardResetFromPartner` is set by the driver directly (a Hard
//! Reset is a PHY-level ordered set, not a PD message Rx ever sees).

use usbpd_traits::Tcpc;

use crate::config::{TimerId, T_HARD_RESET_COMPLETE_MS};
use crate::flags::HrFlag;
use crate::port::Port;

use super::Event;

/// The HR sub-FSM. `Idle` means no Hard Reset is in progress.
pub enum Hr {
    /// No Hard Reset in progress.
    Idle,
    /// Requesting the PHY send the Hard Reset ordered set.
    SendingToPhy,
    /// Waiting out `tHardResetComplete` after the PHY accepted the request.
    WaitForPhyComplete,
    /// PHY-side sequencing done; waiting for the PE to finish its own teardown.
    WaitForPe,
}

impl Default for Hr {
    fn default() -> Self {
        Self::new()
    }
}

impl Hr {
    /// Construct HR at `Idle`.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Called by the PE to start a Hard Reset it decided to send.
    pub fn request_from_pe(port: &mut Port) {
        port.hr_flags.set_flag(HrFlag::HardResetFromPe);
    }

    /// Called by the PE once its own `PE_SNK_Transition_to_default` teardown is done.
    pub fn pe_complete(port: &mut Port) {
        port.hr_flags.set_flag(HrFlag::PeHardResetComplete);
    }

    /// Run one pass of the Hard Reset sequencer.
    pub fn tick<T: Tcpc>(&mut self, port: &mut Port, tcpc: &T) -> Option<Event> {
        match self {
            Self::Idle => {
                if port.hr_flags.test_and_clear_flag(HrFlag::HardResetFromPartner) {
                    *self = Self::WaitForPe;
                    return Some(Event::HardResetFromPartner);
                }
                if port.hr_flags.test_and_clear_flag(HrFlag::HardResetFromPe) {
                    port.prl_counters.tx_message_id.reset();
                    port.prl_counters.tx_retry.reset();
                    *self = Self::SendingToPhy;
                }
                None
            }
            Self::SendingToPhy => {
                tcpc.req_hr_send();
                if tcpc.is_hr_send_done() {
                    port.timers.start(TimerId::HardResetComplete as usize, T_HARD_RESET_COMPLETE_MS);
                    *self = Self::WaitForPhyComplete;
                }
                None
            }
            Self::WaitForPhyComplete => {
                if port.timers.is_expired(TimerId::HardResetComplete as usize) {
                    *self = Self::WaitForPe;
                    return Some(Event::HardResetSent);
                }
                None
            }
            Self::WaitForPe => {
                if port.hr_flags.test_and_clear_flag(HrFlag::PeHardResetComplete) {
                    *self = Self::Idle;
                }
                None
            }
        }
    }
}
