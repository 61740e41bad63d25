//! The shared state every FSM reads and writes: flag sets, counters, message
//! buffers and the timer pack.

use heapless::Vec;
use usbpd_traits::TransmitStatus;

use crate::config::{MAX_EXTENDED_MSG_LEN, MAX_PDO_OBJECTS, MAX_SUPPORTED_REVISION, MAX_UNCHUNKED_MSG_LEN};
use crate::counters::{Counter, CounterType};
use crate::flags::FlagSet;
use crate::protocol_layer::message::pdo::SourceCapabilities;
use crate::protocol_layer::message::request::PowerSource;
use crate::protocol_layer::message::PdoState;
use crate::timers::TimerPack;

/// Error codes a chunked-message sub-FSM (RCH/TCH) can post to the Policy Engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum PrlError {
    RchBadSequence,
    RchSendFail,
    RchSequenceDiscarded,
    RchSequenceTimeout,
    TchEnqueueDiscarded,
    TchBadSequence,
    TchSendFail,
    TchDiscarded,
    TchSequenceTimeout,
}

/// Counters owned by the Protocol Layer.
#[derive(Debug)]
pub struct PrlCounters {
    /// `tx_msg_id_counter`: 0..=7 cyclic, advanced on `Message_Sent`/`Transmission_Error`.
    pub tx_message_id: Counter,
    /// `rx_msg_id_stored`: the last accepted inbound message id, for duplicate filtering.
    pub rx_message_id_stored: Option<u8>,
    /// Transmit retry attempts for the message currently in flight.
    pub tx_retry: Counter,
    /// RCH's expected next chunk number.
    pub rch_expected_chunk: u8,
    /// TCH's next chunk number to send.
    pub tch_next_chunk: u8,
}

impl Default for PrlCounters {
    fn default() -> Self {
        Self {
            tx_message_id: Counter::new(CounterType::MessageId),
            rx_message_id_stored: None,
            tx_retry: Counter::new(CounterType::Retry),
            rch_expected_chunk: 0,
            tch_next_chunk: 0,
        }
    }
}

/// Shared state owned by the task and referenced (not owned) by every FSM.
///
/// Mirrors the reference implementation's global `Port` struct: rather than
/// threading a dozen parameters through every FSM method, each sub-FSM takes
/// `&mut Port` (or, for driver-observed fields, reads through a shared
/// atomic) and mutates the fields it owns by convention.
pub struct Port {
    /// Set once the TC FSM has a debounced sink attach.
    pub attached: bool,
    /// Flags owned by the Policy Engine.
    pub pe_flags: FlagSet,
    /// Requests raised by the DPM towards the Policy Engine.
    pub dpm_requests: FlagSet,
    /// Flags owned by the Tx sub-FSM.
    pub tx_flags: FlagSet,
    /// Flags owned by the RCH sub-FSM.
    pub rch_flags: FlagSet,
    /// Flags owned by the TCH sub-FSM.
    pub tch_flags: FlagSet,
    /// Flags owned by the HR sub-FSM.
    pub hr_flags: FlagSet,
    /// The shared timer pack.
    pub timers: TimerPack,
    /// Protocol-layer counters (message ids, retries, chunk numbers).
    pub prl_counters: PrlCounters,
    /// The most recently validated source capabilities list.
    pub source_caps: Option<SourceCapabilities>,
    /// The RDO most recently sent in a `Request`/`EPR_Request`.
    pub last_rdo: Option<PowerSource>,
    /// The RDO of the currently explicit contract, if any.
    pub contracted_rdo: Option<PowerSource>,
    /// Negotiated PD specification revision, upper-bounded by [`MAX_SUPPORTED_REVISION`].
    pub revision: u8,
    /// Number of consecutive Hard Resets sent without reaching a contract.
    pub hard_reset_counter: u8,
    /// Reassembly/fragmentation buffer for received extended messages.
    pub rx_emsg: Vec<u8, MAX_EXTENDED_MSG_LEN>,
    /// Fragmentation buffer for outgoing extended messages awaiting TCH.
    pub tx_emsg: Vec<u8, MAX_EXTENDED_MSG_LEN>,
    /// Single-packet receive staging buffer.
    pub rx_chunk: [u8; MAX_UNCHUNKED_MSG_LEN],
    /// Single-packet transmit staging buffer.
    pub tx_chunk: [u8; MAX_UNCHUNKED_MSG_LEN],
    /// Length of the data currently staged in `tx_chunk`.
    pub tx_chunk_len: usize,
    /// The last error a chunked sub-FSM reported to the PE.
    pub last_prl_error: Option<PrlError>,
    /// Shared atomic transmit status, written by the driver.
    pub tcpc_tx_status: TransmitStatus,
}

impl Default for Port {
    fn default() -> Self {
        Self::new()
    }
}

impl Port {
    /// Create a freshly initialised port: no contract, all flags clear,
    /// revision at its maximum-supported default.
    pub fn new() -> Self {
        Self {
            attached: false,
            pe_flags: FlagSet::new(),
            dpm_requests: FlagSet::new(),
            tx_flags: FlagSet::new(),
            rch_flags: FlagSet::new(),
            tch_flags: FlagSet::new(),
            hr_flags: FlagSet::new(),
            timers: TimerPack::new(),
            prl_counters: PrlCounters::default(),
            source_caps: None,
            last_rdo: None,
            contracted_rdo: None,
            revision: MAX_SUPPORTED_REVISION,
            hard_reset_counter: 0,
            rx_emsg: Vec::new(),
            tx_emsg: Vec::new(),
            rx_chunk: [0; MAX_UNCHUNKED_MSG_LEN],
            tx_chunk: [0; MAX_UNCHUNKED_MSG_LEN],
            tx_chunk_len: 0,
            last_prl_error: None,
            tcpc_tx_status: TransmitStatus::new(),
        }
    }

    /// Tear the port back to its just-attached state: clears every flag set,
    /// the contract, and PRL counters, but keeps the timer pack's clock and
    /// the hard-reset counter (the PE manages that ceiling itself).
    ///
    /// Mirrors `PE_SNK_Transition_to_default`'s "clear all PE flags and DPM
    /// requests" step plus the PRL's `Layer_Reset_for_Receive`.
    pub fn reset_to_default(&mut self) {
        self.pe_flags.clear_all();
        self.dpm_requests.clear_all();
        self.tx_flags.clear_all();
        self.rch_flags.clear_all();
        self.tch_flags.clear_all();
        self.prl_counters = PrlCounters::default();
        self.source_caps = None;
        self.last_rdo = None;
        self.contracted_rdo = None;
        self.revision = MAX_SUPPORTED_REVISION;
        self.rx_emsg.clear();
        self.tx_emsg.clear();
        self.last_prl_error = None;
    }

    /// True once a `Request`/`EPR_Request` has been accepted by the partner.
    pub fn has_explicit_contract(&self) -> bool {
        self.pe_flags.test_flag(crate::flags::PeFlag::HasExplicitContract)
    }

    /// The 1-based object position currently under contract, or `0` for "no contract".
    pub fn contracted_object_position(&self) -> u8 {
        self.contracted_rdo.map(|rdo| rdo.object_position()).unwrap_or(0)
    }
}

impl crate::protocol_layer::message::PdoState for Port {
    fn pdo_at_object_position(&self, position: u8) -> Option<crate::protocol_layer::message::pdo::Kind> {
        self.source_caps.as_ref().pdo_at_object_position(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::PeFlag;

    #[test]
    fn reset_to_default_clears_contract_and_flags() {
        let mut port = Port::new();
        port.pe_flags.set_flag(PeFlag::HasExplicitContract);
        port.hard_reset_counter = 1;
        port.reset_to_default();
        assert!(!port.has_explicit_contract());
        assert_eq!(port.hard_reset_counter, 1, "HR counter is managed by the PE, not by a layer reset");
    }

    #[test]
    fn contracted_object_position_is_zero_without_a_contract() {
        let port = Port::new();
        assert_eq!(port.contracted_object_position(), 0);
    }
}
