//! The 16-bit PD message header and 16-bit extended-message header, and the
//! message-type enumerations carried in their low bits.

use byteorder::{ByteOrder, LittleEndian};
use proc_bitfield::bitfield;

use crate::protocol_layer::message::ParseError;
use crate::{DataRole, PowerRole};

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    /// The header every PD message starts with. See USB-PD 3.2 section 6.2.1.1.
    pub struct Header(pub u16): Debug, FromStorage, IntoStorage {
        /// Zero for a Control or Data Message, one for an Extended Message.
        pub extended: bool @ 15,
        /// Number of 32-bit data objects following the header.
        pub num_objects: u8 [get usize] @ 12..=14,
        /// Rolling counter maintained by the message's originator.
        pub message_id: u8 @ 9..=11,
        /// The port's present power role.
        pub port_power_role: bool [get PowerRole, set PowerRole] @ 8,
        /// The negotiated specification revision.
        pub spec_revision_raw: u8 @ 6..=7,
        /// The port's data role.
        pub port_data_role: bool [get DataRole, set DataRole] @ 5,
        /// The raw message-type discriminant; interpretation depends on
        /// `extended`/`num_objects`, see [`Header::message_type`].
        pub message_type_raw: u8 @ 0..=4,
    }
}

impl Header {
    /// Build a header template carrying the port's fixed role fields,
    /// reused across every message the sink sends.
    pub fn new_template(port_data_role: DataRole, port_power_role: PowerRole, spec_revision: SpecificationRevision) -> Self {
        Self(0)
            .with_port_data_role(port_data_role)
            .with_port_power_role(port_power_role)
            .with_spec_revision_raw(spec_revision.into())
    }

    /// Stamp `template` with a concrete message type, object count and message id.
    pub fn new(template: Self, message_id: u8, message_type: MessageType, num_objects: u8, extended: bool) -> Self {
        template
            .with_message_id(message_id & 0b111)
            .with_message_type_raw(match message_type {
                MessageType::Control(kind) => kind as u8,
                MessageType::Data(kind) => kind as u8,
                MessageType::Extended(kind) => kind as u8,
            })
            .with_num_objects(num_objects)
            .with_extended(extended)
    }

    /// A zero-object control message header.
    pub fn new_control(template: Self, message_id: u8, message_type: ControlMessageType) -> Self {
        Self::new(template, message_id, MessageType::Control(message_type), 0, false)
    }

    /// A data message header carrying `num_objects` 32-bit data objects.
    pub fn new_data(template: Self, message_id: u8, message_type: DataMessageType, num_objects: u8) -> Self {
        Self::new(template, message_id, MessageType::Data(message_type), num_objects, false)
    }

    /// An extended message header; `num_objects` counts the 32-bit words of
    /// the extended-header-plus-payload that follow.
    pub fn new_extended(template: Self, message_id: u8, message_type: ExtendedMessageType, num_objects: u8) -> Self {
        Self::new(template, message_id, MessageType::Extended(message_type), num_objects, true)
    }

    /// Parse a header from its 2-byte little-endian wire representation.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() != 2 {
            return Err(ParseError::InvalidLength {
                expected: 2,
                found: buf.len(),
            });
        }
        let header = Header(LittleEndian::read_u16(buf));
        SpecificationRevision::try_from(header.spec_revision_raw())?;
        Ok(header)
    }

    /// Serialize to `buf`, returning the number of bytes written (always 2).
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u16(buf, self.0);
        2
    }

    /// The negotiated specification revision carried by this header.
    pub fn spec_revision(&self) -> SpecificationRevision {
        SpecificationRevision::try_from(self.spec_revision_raw()).unwrap_or(SpecificationRevision::R2_0)
    }

    /// Classify the raw type discriminant into a [`MessageType`].
    pub fn message_type(&self) -> MessageType {
        if self.extended() {
            MessageType::Extended(self.message_type_raw().into())
        } else if self.num_objects() == 0 {
            MessageType::Control(self.message_type_raw().into())
        } else {
            MessageType::Data(self.message_type_raw().into())
        }
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// The second header of an extended message, immediately following [`Header`].
    pub struct ExtendedHeader(pub u16): Debug, FromStorage, IntoStorage {
        /// Set when this header describes a chunk of a larger message.
        pub chunked: bool @ 15,
        /// The zero-based index of this chunk.
        pub chunk_number: u8 @ 11..=14,
        /// Set when this message requests the next chunk rather than carrying data.
        pub request_chunk: bool @ 10,
        /// Total size in bytes of the fully reassembled extended message.
        pub data_size: u16 @ 0..=8,
    }
}

impl ExtendedHeader {
    /// Parse from a 2-byte little-endian slice.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self(LittleEndian::read_u16(buf))
    }

    /// Serialize to `buf`, returning the number of bytes written (always 2).
    pub fn to_bytes(self, buf: &mut [u8]) -> usize {
        LittleEndian::write_u16(buf, self.0);
        2
    }
}

/// Specification revisions a header's `spec_revision` field can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(non_camel_case_types)]
pub enum SpecificationRevision {
    /// Revision 1.0 (deprecated).
    R1_0,
    /// Revision 2.0.
    R2_0,
    /// Revision 3.x.
    R3_X,
}

impl TryFrom<u8> for SpecificationRevision {
    type Error = ParseError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0b00 => Ok(Self::R1_0),
            0b01 => Ok(Self::R2_0),
            0b10 => Ok(Self::R3_X),
            _ => Err(ParseError::InvalidSpecificationRevision(value)),
        }
    }
}

impl From<SpecificationRevision> for u8 {
    fn from(value: SpecificationRevision) -> Self {
        match value {
            SpecificationRevision::R1_0 => 0b00,
            SpecificationRevision::R2_0 => 0b01,
            SpecificationRevision::R3_X => 0b10,
        }
    }
}

impl SpecificationRevision {
    /// True if this revision is 2.0 (affects retry ceilings and BIST/Reject
    /// vs. Not_Supported behaviour).
    pub fn is_rev2(self) -> bool {
        matches!(self, Self::R2_0)
    }
}

/// The classified type of message a header encodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageType {
    /// A control message (section 6.3).
    Control(ControlMessageType),
    /// A data message (section 6.4).
    Data(DataMessageType),
    /// An extended message (section 6.5).
    Extended(ExtendedMessageType),
}

/// Control message type discriminants (section 6.3).
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlMessageType {
    GoodCrc = 0b0_0001,
    GotoMin = 0b0_0010,
    Accept = 0b0_0011,
    Reject = 0b0_0100,
    Ping = 0b0_0101,
    PsRdy = 0b0_0110,
    GetSourceCap = 0b0_0111,
    GetSinkCap = 0b0_1000,
    DrSwap = 0b0_1001,
    PrSwap = 0b0_1010,
    VconnSwap = 0b0_1011,
    Wait = 0b0_1100,
    SoftReset = 0b0_1101,
    DataReset = 0b0_1110,
    DataResetComplete = 0b0_1111,
    NotSupported = 0b1_0000,
    GetSourceCapExtended = 0b1_0001,
    GetStatus = 0b1_0010,
    FrSwap = 0b1_0011,
    GetPpsStatus = 0b1_0100,
    GetCountryCodes = 0b1_0101,
    GetSinkCapExtended = 0b1_0110,
    GetSourceInfo = 0b1_0111,
    GetRevision = 0b1_1000,
    Reserved,
}

impl From<u8> for ControlMessageType {
    fn from(value: u8) -> Self {
        match value {
            0b0_0001 => Self::GoodCrc,
            0b0_0010 => Self::GotoMin,
            0b0_0011 => Self::Accept,
            0b0_0100 => Self::Reject,
            0b0_0101 => Self::Ping,
            0b0_0110 => Self::PsRdy,
            0b0_0111 => Self::GetSourceCap,
            0b0_1000 => Self::GetSinkCap,
            0b0_1001 => Self::DrSwap,
            0b0_1010 => Self::PrSwap,
            0b0_1011 => Self::VconnSwap,
            0b0_1100 => Self::Wait,
            0b0_1101 => Self::SoftReset,
            0b0_1110 => Self::DataReset,
            0b0_1111 => Self::DataResetComplete,
            0b1_0000 => Self::NotSupported,
            0b1_0001 => Self::GetSourceCapExtended,
            0b1_0010 => Self::GetStatus,
            0b1_0011 => Self::FrSwap,
            0b1_0100 => Self::GetPpsStatus,
            0b1_0101 => Self::GetCountryCodes,
            0b1_0110 => Self::GetSinkCapExtended,
            0b1_0111 => Self::GetSourceInfo,
            0b1_1000 => Self::GetRevision,
            _ => Self::Reserved,
        }
    }
}

/// Data message type discriminants (section 6.4).
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataMessageType {
    SourceCapabilities = 0b0_0001,
    Request = 0b0_0010,
    Bist = 0b0_0011,
    SinkCapabilities = 0b0_0100,
    BatteryStatus = 0b0_0101,
    Alert = 0b0_0110,
    GetCountryInfo = 0b0_0111,
    EnterUsb = 0b0_1000,
    EprRequest = 0b0_1001,
    EprMode = 0b0_1010,
    SourceInfo = 0b0_1011,
    Revision = 0b0_1100,
    VendorDefined = 0b0_1111,
    Reserved,
}

impl From<u8> for DataMessageType {
    fn from(value: u8) -> Self {
        match value {
            0b0_0001 => Self::SourceCapabilities,
            0b0_0010 => Self::Request,
            0b0_0011 => Self::Bist,
            0b0_0100 => Self::SinkCapabilities,
            0b0_0101 => Self::BatteryStatus,
            0b0_0110 => Self::Alert,
            0b0_0111 => Self::GetCountryInfo,
            0b0_1000 => Self::EnterUsb,
            0b0_1001 => Self::EprRequest,
            0b0_1010 => Self::EprMode,
            0b0_1011 => Self::SourceInfo,
            0b0_1100 => Self::Revision,
            0b0_1111 => Self::VendorDefined,
            _ => Self::Reserved,
        }
    }
}

/// Extended message type discriminants (section 6.5).
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExtendedMessageType {
    SourceCapabilitiesExtended = 0b0_0001,
    Status = 0b0_0010,
    GetBatteryCap = 0b0_0011,
    GetBatteryStatus = 0b0_0100,
    BatteryCapabilities = 0b0_0101,
    GetManufacturerInfo = 0b0_0110,
    ManufacturerInfo = 0b0_0111,
    SecurityRequest = 0b0_1000,
    SecurityResponse = 0b0_1001,
    FirmwareUpdateRequest = 0b0_1010,
    FirmwareUpdateResponse = 0b0_1011,
    PpsStatus = 0b0_1100,
    CountryInfo = 0b0_1101,
    CountryCodes = 0b0_1110,
    SinkCapabilitiesExtended = 0b0_1111,
    ExtendedControl = 0b1_0000,
    EprSourceCapabilities = 0b1_0001,
    EprSinkCapabilities = 0b1_0010,
    VendorDefinedExtended = 0b1_1110,
    Reserved,
}

impl From<u8> for ExtendedMessageType {
    fn from(value: u8) -> Self {
        match value {
            0b0_0001 => Self::SourceCapabilitiesExtended,
            0b0_0010 => Self::Status,
            0b0_0011 => Self::GetBatteryCap,
            0b0_0100 => Self::GetBatteryStatus,
            0b0_0101 => Self::BatteryCapabilities,
            0b0_0110 => Self::GetManufacturerInfo,
            0b0_0111 => Self::ManufacturerInfo,
            0b0_1000 => Self::SecurityRequest,
            0b0_1001 => Self::SecurityResponse,
            0b0_1010 => Self::FirmwareUpdateRequest,
            0b0_1011 => Self::FirmwareUpdateResponse,
            0b0_1100 => Self::PpsStatus,
            0b0_1101 => Self::CountryInfo,
            0b0_1110 => Self::CountryCodes,
            0b0_1111 => Self::SinkCapabilitiesExtended,
            0b1_0000 => Self::ExtendedControl,
            0b1_0001 => Self::EprSourceCapabilities,
            0b1_0010 => Self::EprSinkCapabilities,
            0b1_1110 => Self::VendorDefinedExtended,
            _ => Self::Reserved,
        }
    }
}

/// Extended-control message data block values (carried as the sole 32-bit
/// data object of an `ExtendedControl` extended message).
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExtendedControlType {
    EprKeepAlive = 0,
    EprKeepAliveAck = 1,
    Reserved,
}

impl From<u16> for ExtendedControlType {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::EprKeepAlive,
            1 => Self::EprKeepAliveAck,
            _ => Self::Reserved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_control_header() {
        let template = Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R3_X);
        let header = Header::new_control(template, 3, ControlMessageType::Accept);
        let mut buf = [0u8; 2];
        header.to_bytes(&mut buf);
        let parsed = Header::from_bytes(&buf).unwrap();
        assert_eq!(parsed.message_id(), 3);
        assert_eq!(parsed.message_type(), MessageType::Control(ControlMessageType::Accept));
    }

    #[test]
    fn rejects_reserved_spec_revision() {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, 0b11 << 6);
        assert!(matches!(
            Header::from_bytes(&buf),
            Err(ParseError::InvalidSpecificationRevision(0b11))
        ));
    }
}
