//! Type-C attach detector: debounces VBUS and CC activity into a stable
//! sink-attach decision and picks the plug polarity.
//!
//! Grounded on the request/poll shape of [`usbpd_traits::Tcpc`]'s CC-scan
//! methods, restructured from the reference's `Driver::wait_for_vbus`
//! `async fn` sketch into an explicit polling state machine.

use usbpd_traits::{CcLevel, Polarity, Tcpc};

use crate::config::{TimerId, TC_CC_POLL_MS, TC_VBUS_DEBOUNCE_MS};
use crate::port::Port;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Detached,
    WaitForVbusDebounce,
    ScanningCc,
    SinkAttached,
}

/// A debounced Type-C attach transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttachEvent {
    /// The sink is newly attached, with the given plug polarity.
    Attached(Polarity),
    /// The sink has detached.
    Detached,
}

/// The Type-C attach detector FSM (`DETACHED`/`DETECTING`/`SINK_ATTACHED`).
pub struct Tc {
    state: State,
}

impl Default for Tc {
    fn default() -> Self {
        Self::new()
    }
}

impl Tc {
    /// Construct Tc in `Detached`.
    pub fn new() -> Self {
        Self { state: State::Detached }
    }

    /// Run one pass of attach detection.
    pub fn tick<T: Tcpc>(&mut self, port: &mut Port, tcpc: &T) -> Option<AttachEvent> {
        match self.state {
            State::Detached => {
                if tcpc.is_vbus_ok() {
                    port.timers.start(TimerId::TcVbusDebounce as usize, TC_VBUS_DEBOUNCE_MS);
                    self.state = State::WaitForVbusDebounce;
                }
                None
            }
            State::WaitForVbusDebounce => {
                if !tcpc.is_vbus_ok() {
                    port.timers.stop(TimerId::TcVbusDebounce as usize);
                    self.state = State::Detached;
                    return None;
                }
                if port.timers.is_expired(TimerId::TcVbusDebounce as usize) {
                    tcpc.req_scan_cc();
                    port.timers.start(TimerId::TcCcPoll as usize, TC_CC_POLL_MS);
                    self.state = State::ScanningCc;
                }
                None
            }
            State::ScanningCc => {
                if !tcpc.is_vbus_ok() {
                    self.state = State::Detached;
                    return None;
                }
                let Some((cc1, cc2)) = tcpc.try_scan_cc_result() else {
                    return None;
                };
                let polarity = match (cc1, cc2) {
                    (CcLevel::None, CcLevel::None) => None,
                    (cc1, cc2) if (cc1 as u8) >= (cc2 as u8) => Some(Polarity::Cc1),
                    _ => Some(Polarity::Cc2),
                };
                match polarity {
                    Some(polarity) => {
                        tcpc.req_set_polarity(polarity);
                        port.attached = true;
                        self.state = State::SinkAttached;
                        Some(AttachEvent::Attached(polarity))
                    }
                    None => {
                        if port.timers.is_expired(TimerId::TcCcPoll as usize) {
                            tcpc.req_scan_cc();
                            port.timers.start(TimerId::TcCcPoll as usize, TC_CC_POLL_MS);
                        }
                        None
                    }
                }
            }
            State::SinkAttached => {
                if !tcpc.is_vbus_ok() {
                    port.attached = false;
                    self.state = State::Detached;
                    return Some(AttachEvent::Detached);
                }
                None
            }
        }
    }
}
