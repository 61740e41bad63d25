//! RCH (Receive Chunk) sub-FSM: reassembles an inbound chunked extended
//! message, requesting each next chunk until `data_size` bytes are collected.
//!
//! Grounded on the reassembly half of the reference's
//! `receive_message_inner` (the `extended_rx_buffer`/`extended_rx_expected`
//! block), split out into its own explicit poll loop.

use crate::config::{TimerId, T_CHUNK_SENDER_RESPONSE_MS};
use crate::log::warn;
use crate::port::{Port, PrlError};
use crate::protocol_layer::message::header::{ExtendedHeader, ExtendedMessageType, Header, MessageType};
use crate::protocol_layer::message::pdo::SourceCapabilities;
use crate::protocol_layer::message::{Data, Message};

use super::tx::Tx;
use super::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitForChunk,
    RequestNextChunk,
    WaitForNextChunk,
}

/// The RCH sub-FSM.
pub struct Rch {
    state: State,
    source_header: Option<Header>,
}

impl Default for Rch {
    fn default() -> Self {
        Self::new()
    }
}

impl Rch {
    /// Construct RCH at `Rch_Wait_For_Message_From_Protocol_Layer` equivalent idle state.
    pub fn new() -> Self {
        Self {
            state: State::WaitForChunk,
            source_header: None,
        }
    }

    /// Called by Rx for every inbound data chunk (`request_chunk == false`).
    /// Returns the fully reassembled message once the last chunk lands.
    pub fn on_chunk_received(&mut self, port: &mut Port, header: Header, eh: ExtendedHeader, payload: &[u8]) -> Option<Message> {
        if eh.chunk_number() != port.prl_counters.rch_expected_chunk {
            warn!("rch: expected chunk {}, got {}", port.prl_counters.rch_expected_chunk, eh.chunk_number());
            port.last_prl_error = Some(PrlError::RchBadSequence);
            self.reset_assembly(port);
            return None;
        }

        if eh.chunk_number() == 0 {
            port.rx_emsg.clear();
            self.source_header = Some(header);
        }

        let _ = port.rx_emsg.extend_from_slice(payload);
        port.prl_counters.rch_expected_chunk = port.prl_counters.rch_expected_chunk.wrapping_add(1);

        let data_size = eh.data_size() as usize;
        if port.rx_emsg.len() >= data_size {
            port.rx_emsg.truncate(data_size);
            port.timers.stop(TimerId::ChunkSenderResponse as usize);
            self.state = State::WaitForChunk;
            port.prl_counters.rch_expected_chunk = 0;
            return Some(self.reassemble(port, header, eh));
        }

        self.state = State::RequestNextChunk;
        port.timers.start(TimerId::ChunkSenderResponse as usize, T_CHUNK_SENDER_RESPONSE_MS);
        None
    }

    fn reassemble(&mut self, port: &Port, header: Header, eh: ExtendedHeader) -> Message {
        let data = match header.message_type() {
            MessageType::Extended(ExtendedMessageType::EprSourceCapabilities) => {
                let num_objects = port.rx_emsg.len() / 4;
                Some(Data::SourceCapabilities(SourceCapabilities::parse(&port.rx_emsg, num_objects)))
            }
            _ => Some(Data::Unknown),
        };
        Message {
            header,
            extended_header: Some(eh),
            data,
        }
    }

    fn reset_assembly(&mut self, port: &mut Port) {
        port.rx_emsg.clear();
        port.prl_counters.rch_expected_chunk = 0;
        self.source_header = None;
        self.state = State::WaitForChunk;
    }

    /// Run one pass: if a chunk request is outstanding, stage and hand it to Tx.
    pub fn tick(&mut self, port: &mut Port, tx: &mut Tx) -> Option<Event> {
        match self.state {
            State::RequestNextChunk => {
                let Some(header) = self.source_header else {
                    self.state = State::WaitForChunk;
                    return None;
                };
                let request_header = Header::new(header, port.prl_counters.tx_message_id.value(), header.message_type(), 1, true);
                let request = ExtendedHeader(0)
                    .with_chunked(true)
                    .with_request_chunk(true)
                    .with_chunk_number(port.prl_counters.rch_expected_chunk);

                let mut len = request_header.to_bytes(&mut port.tx_chunk);
                len += request.to_bytes(&mut port.tx_chunk[len..]);
                port.tx_chunk_len = len;
                tx.submit(port);
                self.state = State::WaitForNextChunk;
                None
            }
            State::WaitForNextChunk => {
                if port.timers.is_expired(TimerId::ChunkSenderResponse as usize) {
                    port.last_prl_error = Some(PrlError::RchSequenceTimeout);
                    self.reset_assembly(port);
                    return Some(Event::Error(PrlError::RchSequenceTimeout));
                }
                None
            }
            State::WaitForChunk => None,
        }
    }
}
