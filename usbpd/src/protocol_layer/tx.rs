//! Tx sub-FSM: turns one staged chunk (`port.tx_chunk[..tx_chunk_len]`) into
//! a transmit request, rides the retry counter, and reports completion.
//!
//! Grounded on the retry/GoodCRC bookkeeping in the reference's
//! `ProtocolLayer::transmit`/`wait_for_good_crc`, restructured as an
//! explicit poll loop instead of an `async` function.

use usbpd_traits::{Tcpc, TransmitState};

use crate::config::{TimerId, N_RETRY_COUNT, N_RETRY_COUNT_REV20, T_SENDER_RESPONSE_MS};
use crate::flags::TxFlag;
use crate::log::{trace, warn};
use crate::port::Port;

use super::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitForMessageRequest,
    ConstructMessage,
    WaitForPhyResponse,
    CheckRetryCounter,
}

/// The Tx sub-FSM (`PHY_Layer_Reset` through `Message_Sent`/`Transmission_Error`).
pub struct Tx {
    state: State,
}

impl Default for Tx {
    fn default() -> Self {
        Self::new()
    }
}

impl Tx {
    /// Construct Tx at `Wait_for_Message_Request`.
    pub fn new() -> Self {
        Self {
            state: State::WaitForMessageRequest,
        }
    }

    fn retry_ceiling(port: &Port) -> u8 {
        if port.revision >= 0b01 {
            N_RETRY_COUNT
        } else {
            N_RETRY_COUNT_REV20
        }
    }

    /// Hand off a message already staged in `port.tx_chunk[..port.tx_chunk_len]`.
    /// Used both by the PE (direct control/data messages) and by RCH/TCH
    /// (chunk requests and outgoing chunks).
    pub(super) fn submit(&mut self, port: &mut Port) {
        port.prl_counters.tx_retry.reset();
        port.tx_flags.set_flag(TxFlag::TxChunkEnqueued);
    }

    /// True while a message is in flight or queued; callers must not
    /// overwrite `tx_chunk` until this returns `false`.
    pub fn is_busy(&self) -> bool {
        self.state != State::WaitForMessageRequest
    }

    /// Run one pass of the transmit pipeline.
    pub fn tick<T: Tcpc>(&mut self, port: &mut Port, tcpc: &T) -> Option<Event> {
        match self.state {
            State::WaitForMessageRequest => {
                if port.tx_flags.test_and_clear_flag(TxFlag::TxChunkEnqueued) {
                    self.state = State::ConstructMessage;
                }
                None
            }
            State::ConstructMessage => {
                port.tcpc_tx_status.set(TransmitState::Unset);
                tcpc.req_transmit(&port.tx_chunk, port.tx_chunk_len);
                port.timers.start(TimerId::SenderResponse as usize, T_SENDER_RESPONSE_MS);
                self.state = State::WaitForPhyResponse;
                None
            }
            State::WaitForPhyResponse => {
                match port.tcpc_tx_status.get() {
                    TransmitState::Succeeded => {
                        port.timers.stop(TimerId::SenderResponse as usize);
                        let _ = port.prl_counters.tx_message_id.increment();
                        port.prl_counters.tx_retry.reset();
                        self.state = State::WaitForMessageRequest;
                        trace!("tx: message sent");
                        Some(Event::MessageSent)
                    }
                    TransmitState::Failed => {
                        self.state = State::CheckRetryCounter;
                        None
                    }
                    _ => {
                        if port.timers.is_expired(TimerId::SenderResponse as usize) {
                            self.state = State::CheckRetryCounter;
                        }
                        None
                    }
                }
            }
            State::CheckRetryCounter => {
                let retry = port.prl_counters.tx_retry.value();
                if retry < Self::retry_ceiling(port) {
                    port.prl_counters.tx_retry.set(retry + 1);
                    self.state = State::ConstructMessage;
                    None
                } else {
                    warn!("tx: retry ceiling reached, discarding message");
                    port.prl_counters.tx_retry.reset();
                    self.state = State::WaitForMessageRequest;
                    Some(Event::Discarded)
                }
            }
        }
    }
}
