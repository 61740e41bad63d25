//! TCH (Transmit Chunk) sub-FSM: splits one PE-originated extended message
//! into wire chunks and feeds them out as the partner requests them.
//!
//! Grounded on the fragmentation half of the reference's chunked-extended
//! transmit path (`transmit_chunk_request`), restructured as an explicit
//! poll loop driven by chunk-request notifications from Rx.

use crate::config::{TimerId, MAX_EXTENDED_MSG_CHUNK_LEN, MAX_EXTENDED_MSG_LEN, T_CHUNK_SENDER_REQUEST_MS};
use crate::port::{Port, PrlError};
use crate::protocol_layer::message::header::{ExtendedHeader, Header};
use crate::protocol_layer::message::Message;

use super::rch::Rch;
use super::tx::Tx;
use super::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    ChunkQueued,
    WaitForNextRequest,
}

/// The TCH sub-FSM.
pub struct Tch {
    state: State,
    header_template: Option<Header>,
    total_len: usize,
    next_chunk: u8,
    pending_request: Option<u8>,
}

impl Default for Tch {
    fn default() -> Self {
        Self::new()
    }
}

impl Tch {
    /// Construct TCH idle, with nothing to send.
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            header_template: None,
            total_len: 0,
            next_chunk: 0,
            pending_request: None,
        }
    }

    /// Stage a PE-originated extended message for chunked transmission and
    /// send its first chunk immediately.
    pub fn enqueue_from_pe(&mut self, port: &mut Port, tx: &mut Tx, message: Message) {
        let mut scratch = [0u8; MAX_EXTENDED_MSG_LEN + 4];
        let written = message.to_bytes(&mut scratch);
        port.tx_emsg.clear();
        let _ = port.tx_emsg.extend_from_slice(&scratch[4..written]);

        self.header_template = Some(message.header);
        self.total_len = port.tx_emsg.len();
        self.next_chunk = 0;
        self.pending_request = None;
        self.send_chunk(port, tx);
        self.state = State::ChunkQueued;
    }

    /// Called by Rx when the partner requests the next chunk.
    pub fn on_chunk_requested(&mut self, port: &mut Port, chunk_number: u8) {
        if self.state != State::WaitForNextRequest {
            port.last_prl_error = Some(PrlError::TchEnqueueDiscarded);
            return;
        }
        self.pending_request = Some(chunk_number);
    }

    fn send_chunk(&mut self, port: &mut Port, tx: &mut Tx) {
        let Some(header_template) = self.header_template else {
            return;
        };
        let start = self.next_chunk as usize * MAX_EXTENDED_MSG_CHUNK_LEN;
        let end = (start + MAX_EXTENDED_MSG_CHUNK_LEN).min(self.total_len);

        let chunk_header = Header::new(header_template, port.prl_counters.tx_message_id.value(), header_template.message_type(), 1, true);
        let ext_header = ExtendedHeader(0)
            .with_chunked(true)
            .with_request_chunk(false)
            .with_chunk_number(self.next_chunk)
            .with_data_size(self.total_len as u16);

        let mut len = chunk_header.to_bytes(&mut port.tx_chunk);
        len += ext_header.to_bytes(&mut port.tx_chunk[len..]);
        let payload_len = end - start;
        port.tx_chunk[len..len + payload_len].copy_from_slice(&port.tx_emsg[start..end]);
        len += payload_len;
        port.tx_chunk_len = len;
        tx.submit(port);
    }

    fn reset(&mut self, port: &mut Port) {
        port.tx_emsg.clear();
        self.header_template = None;
        self.total_len = 0;
        self.next_chunk = 0;
        self.pending_request = None;
        self.state = State::Idle;
    }

    /// Run one pass of the split-transmit pipeline.
    pub fn tick(&mut self, port: &mut Port, tx: &mut Tx, _rch: &mut Rch) -> Option<Event> {
        match self.state {
            State::Idle => None,
            State::ChunkQueued => {
                if tx.is_busy() {
                    return None;
                }
                self.next_chunk = self.next_chunk.wrapping_add(1);
                if (self.next_chunk as usize) * MAX_EXTENDED_MSG_CHUNK_LEN >= self.total_len {
                    self.reset(port);
                    Some(Event::MessageSent)
                } else {
                    self.state = State::WaitForNextRequest;
                    port.timers.start(TimerId::ChunkSenderRequest as usize, T_CHUNK_SENDER_REQUEST_MS);
                    None
                }
            }
            State::WaitForNextRequest => {
                if let Some(chunk) = self.pending_request.take() {
                    if chunk != self.next_chunk {
                        port.last_prl_error = Some(PrlError::TchBadSequence);
                        self.reset(port);
                        return Some(Event::Error(PrlError::TchBadSequence));
                    }
                    port.timers.stop(TimerId::ChunkSenderRequest as usize);
                    self.send_chunk(port, tx);
                    self.state = State::ChunkQueued;
                    return None;
                }
                if port.timers.is_expired(TimerId::ChunkSenderRequest as usize) {
                    port.last_prl_error = Some(PrlError::TchSequenceTimeout);
                    self.reset(port);
                    return Some(Event::Error(PrlError::TchSequenceTimeout));
                }
                None
            }
        }
    }
}
