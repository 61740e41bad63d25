//! Wire-format message types: header, PDOs, RDOs and the top-level
//! [`Message`]/[`Data`] envelope.

#[allow(missing_docs)]
pub mod header;

#[allow(missing_docs)]
pub mod pdo;

#[allow(missing_docs)]
pub mod request;

/// The CGS (centimeter-gram-second) unit system used by the protocol layer.
/// Defined with `uom` and expressed as `u32` values for milliamps,
/// millivolts and milliwatts.
pub mod units {
    ISQ!(
        uom::si,
        u32,
        (millimeter, kilogram, second, milliampere, kelvin, mole, candela)
    );
}

pub(super) mod _50milliamperes_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_current;

        @_50milliamperes: 0.05; "_50mA", "_50milliamps", "_50milliamps";
    }
}

pub(super) mod _50millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_50millivolts: 0.05; "_50mV", "_50millivolts", "_50millivolts";
    }
}

pub(super) mod _20millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_20millivolts: 0.02; "_20mV", "_20millivolts", "_20millivolts";
    }
}

pub(super) mod _250milliwatts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::power;

        @_250milliwatts: 0.25; "_250mW", "_250milliwatts", "_250milliwatts";
    }
}

pub use _20millivolts_mod::_20millivolts;
pub use _50milliamperes_mod::_50milliamperes;
pub use _50millivolts_mod::_50millivolts;
pub use _250milliwatts_mod::_250milliwatts;

use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec as HVec;
use proc_bitfield::bitfield;

use crate::config::MAX_PDO_OBJECTS_SPR;
use header::{DataMessageType, ExtendedHeader, Header, MessageType};
use pdo::SourceCapabilities;

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// The `EPR_Mode` data object (USB-PD 3.2 section 6.4.10): one action
    /// byte plus, for `Enter`, the sink's requested operational PDP in watts.
    struct EprModeObject(pub u32): Debug, FromStorage, IntoStorage {
        action_raw: u8 @ 24..=31,
        pdp_watts: u8 @ 16..=23,
    }
}

/// The action carried by an `EPR_Mode` data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EprModeAction {
    /// Sink requests EPR mode entry, with its operational PDP in watts.
    Enter(u8),
    /// Source acknowledges the entry request; `EnterSucceeded` follows.
    EnterAcknowledged,
    /// Source confirms EPR mode is now active.
    EnterSucceeded,
    /// Source refused entry.
    EnterFailed,
    /// Either side requests/confirms EPR mode exit.
    Exit,
    /// An action byte this stack does not negotiate.
    Unknown(u8),
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// The BIST Data Object (BDO, USB-PD 3.2 section 6.4.3): one mode nibble
    /// in the top bits, the rest reserved.
    struct BistDataObject(pub u32): Debug, FromStorage, IntoStorage {
        mode_raw: u8 @ 28..=31,
    }
}

/// The mode carried by a `BIST` data message's sole data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BistDataMode {
    /// BIST Carrier Mode 2: continuous carrier emission for tBISTCarrierMode.
    CarrierMode2,
    /// BIST Test Data: repeating pattern, left only by a Hard Reset.
    TestData,
    /// A BIST mode this stack does not drive.
    Unknown(u8),
}

impl BistDataMode {
    fn from_object(object: BistDataObject) -> Self {
        match object.mode_raw() {
            0b0101 => Self::CarrierMode2,
            0b0111 => Self::TestData,
            other => Self::Unknown(other),
        }
    }
}

/// The Revision Message Data Object (RMDO, USB-PD 3.2 section 6.4.9), sent
/// in reply to `Get_Revision`.
bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    struct RevisionMessageDataObject(pub u32): Debug, FromStorage, IntoStorage {
        revision_major: u8 @ 28..=31,
        revision_minor: u8 @ 24..=27,
        version_major: u8 @ 20..=23,
        version_minor: u8 @ 16..=19,
    }
}

/// The negotiated revision/version this sink reports back via `Give_Revision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RevisionData {
    /// Specification revision major number (e.g. `3` for revision 3.x).
    pub revision_major: u8,
    /// Specification revision minor number.
    pub revision_minor: u8,
}

impl RevisionData {
    fn to_object(self) -> RevisionMessageDataObject {
        RevisionMessageDataObject(0)
            .with_revision_major(self.revision_major)
            .with_revision_minor(self.revision_minor)
            .with_version_major(1)
            .with_version_minor(1)
    }
}

impl EprModeAction {
    fn to_object(self) -> EprModeObject {
        let (action, pdp) = match self {
            Self::Enter(watts) => (1, watts),
            Self::EnterAcknowledged => (2, 0),
            Self::EnterSucceeded => (3, 0),
            Self::EnterFailed => (4, 0),
            Self::Exit => (5, 0),
            Self::Unknown(action) => (action, 0),
        };
        EprModeObject(0).with_action_raw(action).with_pdp_watts(pdp)
    }

    fn from_object(object: EprModeObject) -> Self {
        match object.action_raw() {
            1 => Self::Enter(object.pdp_watts()),
            2 => Self::EnterAcknowledged,
            3 => Self::EnterSucceeded,
            4 => Self::EnterFailed,
            5 => Self::Exit,
            other => Self::Unknown(other),
        }
    }
}

/// Tells a message parser which PDO a Request message's object position refers to.
///
/// Needed to pick the matching RDO variant when parsing a `Request`/`EPR_Request`:
/// the wire format carries only an object position, not the PDO kind.
pub trait PdoState {
    /// The PDO kind last advertised at `position` (1-based), if any.
    fn pdo_at_object_position(&self, position: u8) -> Option<pdo::Kind>;
}

impl PdoState for () {
    fn pdo_at_object_position(&self, _position: u8) -> Option<pdo::Kind> {
        None
    }
}

/// Data that data messages can carry.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Data {
    /// Source capability data (`Source_Capabilities`/`EPR_Source_Capabilities`).
    SourceCapabilities(SourceCapabilities),
    /// A power request towards one of the source's advertised PDOs.
    PowerSourceRequest(request::PowerSource),
    /// An `EPR_Mode` entry/exit handshake message.
    EprMode(EprModeAction),
    /// This sink's own advertised capabilities, sent in reply to `Get_Sink_Cap`.
    SinkCapabilities(HVec<u32, MAX_PDO_OBJECTS_SPR>),
    /// The mode carried by an inbound `BIST` data message.
    Bist(BistDataMode),
    /// The RMDO this sink sends in reply to `Get_Revision`.
    Revision(RevisionData),
    /// A data message this stack does not negotiate (e.g. vendor-defined).
    Unknown,
}

impl Data {
    /// Serialize message data to a slice, returning the number of written bytes.
    fn to_bytes(&self, payload: &mut [u8]) -> usize {
        match self {
            Self::Unknown | Self::SourceCapabilities(_) | Self::Bist(_) => 0,
            Self::PowerSourceRequest(request::PowerSource::FixedSupply(rdo)) => {
                LittleEndian::write_u32(payload, rdo.0);
                4
            }
            Self::PowerSourceRequest(request::PowerSource::Pps(rdo)) => {
                LittleEndian::write_u32(payload, rdo.0);
                4
            }
            Self::PowerSourceRequest(request::PowerSource::SprAvs(rdo)) => {
                LittleEndian::write_u32(payload, rdo.0);
                4
            }
            Self::PowerSourceRequest(request::PowerSource::EprAvs(rdo)) => {
                LittleEndian::write_u32(payload, rdo.0);
                4
            }
            Self::PowerSourceRequest(request::PowerSource::Unknown(rdo)) => {
                LittleEndian::write_u32(payload, rdo.0);
                4
            }
            Self::EprMode(action) => {
                LittleEndian::write_u32(payload, action.to_object().0);
                4
            }
            Self::SinkCapabilities(pdos) => {
                for (index, pdo) in pdos.iter().enumerate() {
                    LittleEndian::write_u32(&mut payload[index * 4..index * 4 + 4], *pdo);
                }
                pdos.len() * 4
            }
            Self::Revision(revision) => {
                LittleEndian::write_u32(payload, revision.to_object().0);
                4
            }
        }
    }
}

/// A USB PD message: a header plus whatever data/extended payload it carries.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// The extended-message header, present only for `Extended` messages.
    pub extended_header: Option<ExtendedHeader>,
    /// Optional payload data (for data and extended messages).
    pub data: Option<Data>,
}

impl Message {
    /// Create a new header-only (control) message.
    pub fn new(header: Header) -> Self {
        Self {
            header,
            extended_header: None,
            data: None,
        }
    }

    /// Create a new data message carrying `data`.
    pub fn new_with_data(header: Header, data: Data) -> Self {
        Self {
            header,
            extended_header: None,
            data: Some(data),
        }
    }

    /// Serialize a message to a slice, returning the number of written bytes.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> usize {
        let mut size = self.header.to_bytes(buffer);

        if let Some(extended_header) = self.extended_header {
            size += extended_header.to_bytes(&mut buffer[size..]);
        }
        if let Some(data) = self.data.as_ref() {
            size += data.to_bytes(&mut buffer[size..]);
        }

        size
    }

    /// Parse a message from its wire bytes, resolving `Request` object
    /// positions against `state`'s last-seen source capabilities.
    pub fn from_bytes_with_state<P: PdoState>(data: &[u8], state: &P) -> Result<Self, ParseError> {
        if data.len() < 2 {
            return Err(ParseError::InvalidLength {
                expected: 2,
                found: data.len(),
            });
        }
        let header = Header::from_bytes(&data[..2])?;
        let mut message = Self::new(header);
        let payload = &data[2..];

        match header.message_type() {
            MessageType::Control(_) => {}
            MessageType::Data(DataMessageType::SourceCapabilities) => {
                message.data = Some(Data::SourceCapabilities(SourceCapabilities::parse(payload, header.num_objects())));
            }
            MessageType::Data(DataMessageType::SinkCapabilities) => {
                let mut pdos = HVec::new();
                for chunk in payload.chunks_exact(4).take(MAX_PDO_OBJECTS_SPR) {
                    let _ = pdos.push(LittleEndian::read_u32(chunk));
                }
                message.data = Some(Data::SinkCapabilities(pdos));
            }
            MessageType::Data(DataMessageType::Request) | MessageType::Data(DataMessageType::EprRequest) => {
                message.data = Some(Self::parse_request(payload, state)?);
            }
            MessageType::Data(DataMessageType::EprMode) => {
                if payload.len() < 4 {
                    return Err(ParseError::InvalidLength {
                        expected: 4,
                        found: payload.len(),
                    });
                }
                let object = EprModeObject(LittleEndian::read_u32(&payload[..4]));
                message.data = Some(Data::EprMode(EprModeAction::from_object(object)));
            }
            MessageType::Data(DataMessageType::Bist) => {
                if payload.len() < 4 {
                    return Err(ParseError::InvalidLength {
                        expected: 4,
                        found: payload.len(),
                    });
                }
                let object = BistDataObject(LittleEndian::read_u32(&payload[..4]));
                message.data = Some(Data::Bist(BistDataMode::from_object(object)));
            }
            MessageType::Data(_) => {
                message.data = Some(Data::Unknown);
            }
            MessageType::Extended(_kind) => {
                if payload.len() < 2 {
                    return Err(ParseError::InvalidLength {
                        expected: 2,
                        found: payload.len(),
                    });
                }
                message.extended_header = Some(ExtendedHeader::from_bytes(&payload[..2]));
                message.data = Some(Data::Unknown);
            }
        }

        Ok(message)
    }

    fn parse_request<P: PdoState>(payload: &[u8], state: &P) -> Result<Data, ParseError> {
        if payload.len() < 4 {
            return Err(ParseError::InvalidLength {
                expected: 4,
                found: payload.len(),
            });
        }
        let raw = request::RawDataObject(LittleEndian::read_u32(&payload[..4]));
        let source = match state.pdo_at_object_position(raw.object_position()) {
            Some(pdo::Kind::FixedSupply) => request::PowerSource::FixedSupply(request::FixedSupply(raw.0)),
            Some(pdo::Kind::Pps) => request::PowerSource::Pps(request::Pps(raw.0)),
            Some(pdo::Kind::SprAvs) => request::PowerSource::SprAvs(request::SprAvs(raw.0)),
            Some(pdo::Kind::EprAvs) => request::PowerSource::EprAvs(request::EprAvs(raw.0)),
            None => request::PowerSource::Unknown(raw),
        };
        Ok(Data::PowerSourceRequest(source))
    }

    /// Parse a message from a slice of bytes, with no PDO-state context.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        Self::from_bytes_with_state(data, &())
    }
}

/// Errors that can occur during message/header parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum ParseError {
    /// The input buffer has an invalid length.
    InvalidLength {
        /// The expected length.
        expected: usize,
        /// The actual length found.
        found: usize,
    },
    /// The specification revision field was invalid.
    InvalidSpecificationRevision(u8),
    /// An unknown or reserved message type was encountered.
    InvalidMessageType(u8),
    /// A PDO carried an unrecognised type/subtype combination.
    InvalidPdoKind(u8),
    /// An extended header's `data_size` exceeded what this stack can reassemble.
    InvalidExtendedHeader(u16),
}

#[cfg(test)]
mod tests {
    use uom::si::electric_current::milliampere;
    use uom::si::electric_potential::millivolt;

    use super::units;

    #[test]
    fn custom_units_convert_against_stock_si_units() {
        let current = units::ElectricCurrent::new::<milliampere>(150);
        let potential = units::ElectricPotential::new::<millivolt>(9000);

        assert_eq!(current.get::<milliampere>(), 150);
        assert_eq!(potential.get::<super::_20millivolts>(), 450);
    }

    #[test]
    fn round_trips_fixed_supply_request() {
        use super::header::{ControlMessageType, DataMessageType, Header, SpecificationRevision};
        use super::request::{FixedSupply, PowerSource};
        use super::{Data, Message, PdoState};
        use crate::{DataRole, PowerRole};

        struct AllFixed;
        impl PdoState for AllFixed {
            fn pdo_at_object_position(&self, _position: u8) -> Option<super::pdo::Kind> {
                Some(super::pdo::Kind::FixedSupply)
            }
        }

        let template = Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R3_X);
        let header = super::header::Header::new_data(template, 1, DataMessageType::Request, 1);
        let rdo = FixedSupply(0).with_object_position(2).with_raw_operating_current(60);
        let message = Message::new_with_data(header, Data::PowerSourceRequest(PowerSource::FixedSupply(rdo)));

        let mut buf = [0u8; 6];
        let written = message.to_bytes(&mut buf);
        assert_eq!(written, 6);

        let parsed = Message::from_bytes_with_state(&buf[..written], &AllFixed).unwrap();
        match parsed.data {
            Some(Data::PowerSourceRequest(PowerSource::FixedSupply(parsed_rdo))) => {
                assert_eq!(parsed_rdo.object_position(), 2);
            }
            _ => panic!("expected a fixed-supply power request"),
        }
        let _ = ControlMessageType::Accept;
    }
}
