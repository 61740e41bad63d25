//! Compile-time configuration: container limits, retry counts, timer ids and
//! timer deadlines, collected in one place the way the reference's
//! `pd_conf.h` gathers its `#define`s.

/// Maximum number of PDOs the sink will retain from a `Source_Capabilities`
/// or `EPR_Source_Capabilities` message.
pub const MAX_PDO_OBJECTS: usize = 11;
/// Maximum number of PDOs retained while operating in SPR mode.
pub const MAX_PDO_OBJECTS_SPR: usize = 7;
/// Maximum size of a reassembled/outgoing extended message, in bytes.
pub const MAX_EXTENDED_MSG_LEN: usize = 260;
/// Maximum payload bytes carried by a single extended-message chunk.
pub const MAX_EXTENDED_MSG_CHUNK_LEN: usize = 26;
/// Maximum number of chunks a single extended message may be split into.
pub const MAX_CHUNKS_PER_MSG: usize = 10;
/// Maximum size of a single unchunked PD packet payload, in bytes.
pub const MAX_UNCHUNKED_MSG_LEN: usize = 28;
/// The highest specification revision this stack will negotiate.
pub const MAX_SUPPORTED_REVISION: u8 = 0b10; // Revision 3.x

/// Hard-reset retry ceiling before giving up and entering `Src_Disabled`.
pub const N_HARD_RESET_COUNT: u8 = 2;
/// Transmit retry ceiling under spec revision >= 3.0.
pub const N_RETRY_COUNT: u8 = 2;
/// Transmit retry ceiling under spec revision 2.0.
pub const N_RETRY_COUNT_REV20: u8 = 3;

/// Identifiers for every virtual timer the stack schedules. Backed by a flat
/// array in [`crate::timers::TimerPack`]; the enum exists purely so call
/// sites name timers instead of indexing with bare integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(usize)]
pub enum TimerId {
    /// Type-C VBUS debounce before starting CC polling.
    TcVbusDebounce = 0,
    /// Type-C CC polling interval while detecting.
    TcCcPoll = 1,
    /// Sink waits this long for the first `Source_Capabilities`.
    TypeCSinkWaitCap = 2,
    /// Generic PE response timeout after sending a message.
    SenderResponse = 3,
    /// Sink waits this long before re-issuing a Select_Capability.
    SinkRequest = 4,
    /// Periodic PPS keep-alive request interval.
    PpsRequest = 5,
    /// Power-supply transition time, SPR contract.
    PsTransitionSpr = 6,
    /// Power-supply transition time, EPR contract (shares the slot with SPR).
    PsTransitionEpr = 6,
    /// EPR keep-alive interval while in an EPR contract.
    SinkEprKeepAlive = 7,
    /// Timeout waiting for an EPR mode entry acknowledgement.
    EnterEpr = 8,
    /// Duration of a BIST carrier-mode test.
    BistCarrierMode = 9,
    /// Timeout waiting for the PHY to report Hard Reset completion.
    HardResetComplete = 10,
    /// RCH: timeout waiting for the next requested chunk from the partner.
    ChunkSenderResponse = 11,
    /// TCH: timeout waiting for the partner to request the next chunk.
    ChunkSenderRequest = 12,
}

/// Total number of distinct timer slots (`TcVbusDebounce` through
/// `ChunkSenderRequest`, with `PsTransitionSpr`/`PsTransitionEpr` sharing a
/// slot since they can never be active simultaneously).
pub const TIMER_COUNT: usize = 13;

/// `tTypeCSinkWaitCap`, milliseconds.
pub const T_TYPEC_SINK_WAIT_CAP_MS: u32 = 465;
/// `tSenderResponse`, milliseconds.
pub const T_SENDER_RESPONSE_MS: u32 = 30;
/// `tSinkRequest`, milliseconds.
pub const T_SINK_REQUEST_MS: u32 = 100;
/// `tPPSRequest`, milliseconds.
pub const T_PPS_REQUEST_MS: u32 = 5000;
/// `tPSTransition_SPR`, milliseconds.
pub const T_PS_TRANSITION_SPR_MS: u32 = 500;
/// `tPSTransition_EPR`, milliseconds.
pub const T_PS_TRANSITION_EPR_MS: u32 = 925;
/// `tSinkEPRKeepAlive`, milliseconds.
pub const T_SINK_EPR_KEEP_ALIVE_MS: u32 = 375;
/// `tEnterEPR`, milliseconds.
pub const T_ENTER_EPR_MS: u32 = 500;
/// `tBISTCarrierMode`, milliseconds.
pub const T_BIST_CARRIER_MODE_MS: u32 = 300;
/// `tHardResetComplete`, milliseconds.
pub const T_HARD_RESET_COMPLETE_MS: u32 = 5;
/// `tChunkSenderResponse`, milliseconds.
pub const T_CHUNK_SENDER_RESPONSE_MS: u32 = 27;
/// `tChunkSenderRequest`, milliseconds.
pub const T_CHUNK_SENDER_REQUEST_MS: u32 = 27;
/// `tActiveCcPollingDebounce`, milliseconds.
pub const T_ACTIVE_CC_POLLING_DEBOUNCE_MS: u32 = 20;
/// `TC_VBUS_DEBOUNCE`, milliseconds.
pub const TC_VBUS_DEBOUNCE_MS: u32 = 100;
/// `TC_CC_POLL`, milliseconds.
pub const TC_CC_POLL_MS: u32 = 20;
