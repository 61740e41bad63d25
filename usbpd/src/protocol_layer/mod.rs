//! The Protocol Layer: five small, co-operating state machines sitting
//! between the Policy Engine and the TCPC driver.
//!
//! Message construction, retries, chunking and Hard Reset sequencing all
//! live here; the Policy Engine only ever sees `Event`s posted by [`Prl`]
//! and queues outbound [`message::Message`]s through [`Prl::enqueue`].

pub mod hr;
pub mod message;
pub mod rch;
pub mod rx;
pub mod tch;
pub mod tx;

use heapless::Vec;
use usbpd_traits::Tcpc;

use crate::config::MAX_UNCHUNKED_MSG_LEN;
use crate::log::trace;
use crate::port::{Port, PrlError};
use message::Message;

/// A notification the Protocol Layer posts up to the Policy Engine.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// A new, non-duplicate message was fully received and reassembled.
    MessageReceived(Message),
    /// The previously enqueued message was transmitted and acknowledged.
    MessageSent,
    /// The partner sent `Soft_Reset`; the layer has already reset itself.
    SoftResetFromPartner,
    /// The partner initiated a Hard Reset at the PHY.
    HardResetFromPartner,
    /// A Hard Reset requested by the PE has been sent on the wire.
    HardResetSent,
    /// A message in flight was discarded by a higher-priority event.
    Discarded,
    /// A chunked sub-FSM hit an error condition.
    Error(PrlError),
}

/// The five Protocol Layer sub-FSMs, wired to a shared [`Port`].
pub struct Prl {
    rx: rx::Rx,
    tx: tx::Tx,
    rch: rch::Rch,
    tch: tch::Tch,
    hr: hr::Hr,
}

impl Default for Prl {
    fn default() -> Self {
        Self::new()
    }
}

impl Prl {
    /// Construct every sub-FSM in its initial state.
    pub fn new() -> Self {
        Self {
            rx: rx::Rx::new(),
            tx: tx::Tx::new(),
            rch: rch::Rch::new(),
            tch: tch::Tch::new(),
            hr: hr::Hr::new(),
        }
    }

    /// Tear every sub-FSM back to its initial state (`Layer_Reset_for_Receive`).
    pub fn reset(&mut self) {
        self.rx = rx::Rx::new();
        self.tx = tx::Tx::new();
        self.rch = rch::Rch::new();
        self.tch = tch::Tch::new();
    }

    /// Queue `message` for transmission. Control and single-packet data
    /// messages go straight to Tx; extended messages are split by TCH.
    pub fn enqueue(&mut self, port: &mut Port, message: Message) {
        if matches!(message.header.message_type(), message::header::MessageType::Extended(_)) {
            self.tch.enqueue_from_pe(port, &mut self.tx, message);
        } else {
            let (buf, len) = to_chunk_buffer(&message);
            port.tx_chunk[..len].copy_from_slice(&buf[..len]);
            port.tx_chunk_len = len;
            self.tx.submit(port);
        }
    }

    /// Ask HR to start a PE-initiated Hard Reset.
    pub fn request_hard_reset(&mut self, port: &mut Port) {
        hr::Hr::request_from_pe(port);
    }

    /// Tell HR that the PE has finished its own Hard Reset teardown.
    pub fn pe_hard_reset_complete(&mut self, port: &mut Port) {
        hr::Hr::pe_complete(port);
    }

    /// True while a Hard Reset is in progress; the PE must not run its
    /// ordinary dispatch while this holds.
    pub fn hard_reset_in_progress(&self) -> bool {
        !matches!(self.hr, hr::Hr::Idle)
    }

    /// Run one task pass across all five sub-FSMs in the fixed order
    /// mandated by the concurrency model (see the PRL tick-ordering design
    /// note), collecting every [`Event`] raised for the Policy Engine.
    pub fn tick<T: Tcpc>(&mut self, port: &mut Port, tcpc: &T) -> Vec<Event, 8> {
        let mut events = Vec::new();

        let was_active = !matches!(self.hr, hr::Hr::Idle);
        if let Some(event) = self.hr.tick(port, tcpc) {
            let _ = events.push(event);
        }
        let is_active = !matches!(self.hr, hr::Hr::Idle);
        if was_active && !is_active {
            self.reset();
        }
        if was_active || is_active {
            // A Hard Reset is in progress (or just finished this pass): hold
            // off the ordinary dispatch below until HR settles at `Idle`.
            return events;
        }

        if port.tcpc_tx_status.get() == usbpd_traits::TransmitState::Succeeded {
            Self::push(&mut events, self.tx.tick(port, tcpc));
        }
        Self::push(&mut events, self.rx.tick(port, tcpc, &mut self.rch, &mut self.tch, &mut self.tx));
        Self::push(&mut events, self.rch.tick(port, &mut self.tx));
        Self::push(&mut events, self.tch.tick(port, &mut self.tx, &mut self.rch));
        Self::push(&mut events, self.tx.tick(port, tcpc));
        Self::push(&mut events, self.tch.tick(port, &mut self.tx, &mut self.rch));
        Self::push(&mut events, self.tch.tick(port, &mut self.tx, &mut self.rch));
        Self::push(&mut events, self.rch.tick(port, &mut self.tx));

        for event in &events {
            trace!("prl event: {:?}", event);
        }

        events
    }

    fn push(events: &mut Vec<Event, 8>, event: Option<Event>) {
        if let Some(event) = event {
            let _ = events.push(event);
        }
    }
}

/// Serialize `message` into a fixed-size chunk buffer, returning the number
/// of bytes written. Shared by Tx (single-packet) and TCH (chunk framing).
pub(crate) fn to_chunk_buffer(message: &Message) -> ([u8; MAX_UNCHUNKED_MSG_LEN], usize) {
    let mut buf = [0u8; MAX_UNCHUNKED_MSG_LEN];
    let len = message.to_bytes(&mut buf);
    (buf, len)
}
