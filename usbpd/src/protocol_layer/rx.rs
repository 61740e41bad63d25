//! Rx sub-FSM: drains the driver's receive FIFO, filters duplicate message
//! ids, and routes chunked extended messages into RCH/TCH.
//!
//! Grounded on the reference's `receive_message_inner`/`handle_rx_ack`
//! duplicate-detection logic, adapted to a fixed-size PHY chunk instead of
//! an `async` receive.

use usbpd_traits::Tcpc;

use crate::config::MAX_EXTENDED_MSG_CHUNK_LEN;
use crate::log::warn;
use crate::port::Port;
use crate::protocol_layer::message::header::{ControlMessageType, MessageType};
use crate::protocol_layer::message::Message;

use super::rch::Rch;
use super::tch::Tch;
use super::tx::Tx;
use super::Event;

/// The Rx sub-FSM. A single state machine is enough here: every inbound
/// chunk is handled to completion within one `tick`.
pub struct Rx {
    _private: (),
}

impl Default for Rx {
    fn default() -> Self {
        Self::new()
    }
}

impl Rx {
    /// Construct Rx at `Wait_for_PHY_Message`.
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Drain at most one inbound chunk and act on it.
    pub fn tick<T: Tcpc>(&mut self, port: &mut Port, tcpc: &T, rch: &mut Rch, tch: &mut Tch, tx: &mut Tx) -> Option<Event> {
        let mut buf = [0u8; 28];
        let len = tcpc.fetch_rx_data(&mut buf)?;
        port.rx_chunk[..len].copy_from_slice(&buf[..len]);

        let message = match Message::from_bytes_with_state(&port.rx_chunk[..len], port) {
            Ok(message) => message,
            Err(err) => {
                warn!("rx: dropping unparsable message: {:?}", err);
                return None;
            }
        };

        if message.header.message_type() == MessageType::Control(ControlMessageType::GoodCrc) {
            // A software-checked GoodCRC would be consumed by Tx here; this
            // stack targets PHYs with `has_auto_good_crc_check`.
            return None;
        }

        if message.header.message_type() == MessageType::Control(ControlMessageType::SoftReset) {
            port.prl_counters.rx_message_id_stored = None;
            port.prl_counters.rch_expected_chunk = 0;
            port.prl_counters.tch_next_chunk = 0;
            return Some(Event::SoftResetFromPartner);
        }

        if !tcpc.get_hw_features().has_auto_good_crc_rx {
            Self::reply_good_crc(port, tx, message.header.message_id());
        }

        let message_id = message.header.message_id();
        if port.prl_counters.rx_message_id_stored == Some(message_id) {
            return None;
        }
        port.prl_counters.rx_message_id_stored = Some(message_id);

        let Some(extended_header) = message.extended_header else {
            return Some(Event::MessageReceived(message));
        };

        if extended_header.request_chunk() {
            tch.on_chunk_requested(port, extended_header.chunk_number());
            return None;
        }

        if extended_header.chunked() {
            let payload_len = (len.saturating_sub(4)).min(MAX_EXTENDED_MSG_CHUNK_LEN);
            let mut chunk_payload = [0u8; MAX_EXTENDED_MSG_CHUNK_LEN];
            chunk_payload[..payload_len].copy_from_slice(&port.rx_chunk[4..4 + payload_len]);
            return rch
                .on_chunk_received(port, message.header, extended_header, &chunk_payload[..payload_len])
                .map(Event::MessageReceived);
        }

        Some(Event::MessageReceived(message))
    }

    fn reply_good_crc(port: &mut Port, tx: &mut Tx, partner_message_id: u8) {
        use crate::protocol_layer::message::header::{Header, SpecificationRevision};
        use crate::{DataRole, PowerRole};

        let revision = SpecificationRevision::try_from(port.revision).unwrap_or(SpecificationRevision::R2_0);
        let template = Header::new_template(DataRole::Ufp, PowerRole::Sink, revision);
        let header = Header::new_control(template, partner_message_id, ControlMessageType::GoodCrc);
        let len = header.to_bytes(&mut port.tx_chunk);
        port.tx_chunk_len = len;
        tx.submit(port);
    }
}
