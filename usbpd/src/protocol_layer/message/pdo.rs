//! Power Data Objects (PDOs), as advertised by a source in
//! `Source_Capabilities`/`EPR_Source_Capabilities`.
//!
//! Only the variants this stack negotiates are modelled: Fixed supplies and
//! the three augmented (APDO) subtypes. Battery and non-augmented Variable
//! supplies are out of scope and are folded into [`PowerDataObject::Unknown`].

use heapless::Vec;
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;
use uom::si::electric_potential::decivolt;
use uom::si::power::watt;

use crate::config::MAX_PDO_OBJECTS;
use crate::protocol_layer::message::units::{ElectricCurrent, ElectricPotential, Power};
use crate::protocol_layer::message::{_50millivolts, PdoState};

/// The shape of a PDO entry, used to pick the matching RDO variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Kind {
    /// A Fixed Supply PDO (section 6.4.1.2.1).
    FixedSupply,
    /// An SPR Programmable Power Supply APDO.
    Pps,
    /// An SPR Adjustable Voltage Supply APDO.
    SprAvs,
    /// An EPR Adjustable Voltage Supply APDO.
    EprAvs,
}

/// A single parsed PDO.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerDataObject {
    /// A Fixed Supply PDO.
    FixedSupply(FixedSupply),
    /// One of the augmented (APDO) subtypes.
    Augmented(Augmented),
    /// A PDO kind this stack does not negotiate (Battery, plain Variable Supply).
    Unknown(RawPowerDataObject),
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// The common two top bits every PDO carries, read before dispatching to a variant.
    pub struct RawPowerDataObject(pub u32): Debug, FromStorage, IntoStorage {
        pub kind: u8 @ 30..=31,
    }
}

/// The PDO-type discriminant carried in bits 31:30.
pub const PDO_TYPE_FIXED: u8 = 0b00;
/// The PDO-type discriminant carried in bits 31:30.
pub const PDO_TYPE_AUGMENTED: u8 = 0b11;

/// The APDO-subtype discriminant carried in bits 29:28 of an Augmented PDO.
pub const APDO_SUBTYPE_SPR_PPS: u8 = 0b00;
/// The APDO-subtype discriminant carried in bits 29:28 of an Augmented PDO.
pub const APDO_SUBTYPE_EPR_AVS: u8 = 0b01;
/// The APDO-subtype discriminant carried in bits 29:28 of an Augmented PDO.
pub const APDO_SUBTYPE_SPR_AVS: u8 = 0b10;

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct FixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        pub kind: u8 @ 30..=31,
        pub dual_role_power: bool @ 29,
        pub usb_suspend_supported: bool @ 28,
        pub unconstrained_power: bool @ 27,
        pub usb_communications_capable: bool @ 26,
        pub dual_role_data: bool @ 25,
        pub unchunked_extended_messages_supported: bool @ 24,
        /// Set when the source supports negotiating an EPR contract.
        pub epr_mode_capable: bool @ 23,
        /// Peak current, as an enum index; see USB-PD 3.2 table 6.9.
        pub peak_current: u8 @ 20..=21,
        /// Voltage, in 50 mV units.
        pub raw_voltage: u16 @ 10..=19,
        /// Maximum current, in 10 mA units.
        pub raw_max_current: u16 @ 0..=9,
    }
}

impl Default for FixedSupply {
    fn default() -> Self {
        Self(0).with_kind(PDO_TYPE_FIXED)
    }
}

impl FixedSupply {
    /// The advertised voltage.
    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_voltage().into())
    }

    /// The advertised maximum current.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }
}

/// One of the three augmented (APDO) variants this stack negotiates.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Augmented {
    /// SPR Programmable Power Supply.
    Spr(SprProgrammablePowerSupply),
    /// SPR Adjustable Voltage Supply.
    SprAvs(SprAdjustableVoltageSupply),
    /// EPR Adjustable Voltage Supply.
    Epr(EprAdjustableVoltageSupply),
    /// An APDO subtype this stack does not negotiate.
    Unknown(u32),
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct AugmentedRaw(pub u32): Debug, FromStorage, IntoStorage {
        pub kind: u8 @ 30..=31,
        pub supply: u8 @ 28..=29,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct SprProgrammablePowerSupply(pub u32): Debug, FromStorage, IntoStorage {
        pub kind: u8 @ 30..=31,
        pub supply: u8 @ 28..=29,
        pub pps_power_limited: bool @ 27,
        /// Maximum voltage, in 100 mV units.
        pub raw_max_voltage: u8 @ 17..=24,
        /// Minimum voltage, in 100 mV units.
        pub raw_min_voltage: u8 @ 8..=15,
        /// Maximum current, in 50 mA units.
        pub raw_max_current: u8 @ 0..=6,
    }
}

impl Default for SprProgrammablePowerSupply {
    fn default() -> Self {
        Self(0).with_kind(PDO_TYPE_AUGMENTED).with_supply(APDO_SUBTYPE_SPR_PPS)
    }
}

impl SprProgrammablePowerSupply {
    /// The advertised maximum voltage.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<decivolt>(self.raw_max_voltage().into())
    }

    /// The advertised minimum voltage.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<decivolt>(self.raw_min_voltage().into())
    }

    /// The advertised maximum current.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<crate::protocol_layer::message::_50milliamperes>(self.raw_max_current().into())
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// SPR Adjustable Voltage Supply: an augmented PDO advertising current
    /// limits at the two fixed SPR reference voltages rather than a voltage range.
    pub struct SprAdjustableVoltageSupply(pub u32): Debug, FromStorage, IntoStorage {
        pub kind: u8 @ 30..=31,
        pub supply: u8 @ 28..=29,
        /// Maximum current at 20 V, in 10 mA units.
        pub raw_max_current_20v: u16 @ 10..=19,
        /// Maximum current at 15 V, in 10 mA units.
        pub raw_max_current_15v: u16 @ 0..=9,
    }
}

impl Default for SprAdjustableVoltageSupply {
    fn default() -> Self {
        Self(0).with_kind(PDO_TYPE_AUGMENTED).with_supply(APDO_SUBTYPE_SPR_AVS)
    }
}

impl SprAdjustableVoltageSupply {
    /// Maximum current available at 15 V.
    pub fn max_current_15v(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current_15v().into())
    }

    /// Maximum current available at 20 V.
    pub fn max_current_20v(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current_20v().into())
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct EprAdjustableVoltageSupply(pub u32): Debug, FromStorage, IntoStorage {
        pub kind: u8 @ 30..=31,
        pub supply: u8 @ 28..=29,
        pub peak_current: u8 @ 26..=27,
        /// Maximum voltage, in 100 mV units.
        pub raw_max_voltage: u16 @ 17..=25,
        /// Minimum voltage, in 100 mV units.
        pub raw_min_voltage: u8 @ 8..=15,
        /// PD Power, in 1 W units.
        pub raw_pd_power: u8 @ 0..=7,
    }
}

impl Default for EprAdjustableVoltageSupply {
    fn default() -> Self {
        Self(0).with_kind(PDO_TYPE_AUGMENTED).with_supply(APDO_SUBTYPE_EPR_AVS)
    }
}

impl EprAdjustableVoltageSupply {
    /// The advertised maximum voltage.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<decivolt>(self.raw_max_voltage().into())
    }

    /// The advertised minimum voltage.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<decivolt>(self.raw_min_voltage().into())
    }

    /// The advertised PD Power.
    pub fn pd_power(&self) -> Power {
        Power::new::<watt>(self.raw_pd_power().into())
    }
}

impl PowerDataObject {
    /// Parse a single 32-bit PDO by inspecting its type/subtype discriminant bits.
    pub fn from_raw(raw: u32) -> Self {
        let header = RawPowerDataObject(raw);
        match header.kind() {
            PDO_TYPE_FIXED => Self::FixedSupply(FixedSupply(raw)),
            PDO_TYPE_AUGMENTED => match AugmentedRaw(raw).supply() {
                APDO_SUBTYPE_SPR_PPS => Self::Augmented(Augmented::Spr(SprProgrammablePowerSupply(raw))),
                APDO_SUBTYPE_EPR_AVS => Self::Augmented(Augmented::Epr(EprAdjustableVoltageSupply(raw))),
                APDO_SUBTYPE_SPR_AVS => Self::Augmented(Augmented::SprAvs(SprAdjustableVoltageSupply(raw))),
                _ => Self::Augmented(Augmented::Unknown(raw)),
            },
            _ => Self::Unknown(header),
        }
    }

    /// Classify this PDO's kind, for RDO-variant selection.
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Self::FixedSupply(_) => Some(Kind::FixedSupply),
            Self::Augmented(Augmented::Spr(_)) => Some(Kind::Pps),
            Self::Augmented(Augmented::SprAvs(_)) => Some(Kind::SprAvs),
            Self::Augmented(Augmented::Epr(_)) => Some(Kind::EprAvs),
            Self::Augmented(Augmented::Unknown(_)) | Self::Unknown(_) => None,
        }
    }
}

/// A parsed, bounds-checked list of up to [`MAX_PDO_OBJECTS`] source PDOs.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SourceCapabilities(pub(crate) Vec<PowerDataObject, MAX_PDO_OBJECTS>);

impl SourceCapabilities {
    /// Parse `payload` (one 4-byte PDO per object) into a PDO list.
    pub fn parse(payload: &[u8], num_objects: usize) -> Self {
        let mut pdos = Vec::new();
        for chunk in payload.chunks_exact(4).take(num_objects.min(MAX_PDO_OBJECTS)) {
            let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            // Capacity is bounded by `take(..MAX_PDO_OBJECTS)` above.
            let _ = pdos.push(PowerDataObject::from_raw(raw));
        }
        Self(pdos)
    }

    /// The mandatory first entry, vSafe5V Fixed Supply.
    pub fn vsafe_5v(&self) -> Option<&FixedSupply> {
        self.0.first().and_then(|pdo| match pdo {
            PowerDataObject::FixedSupply(fixed) => Some(fixed),
            _ => None,
        })
    }

    /// True if the source advertises EPR capability on its vSafe5V entry.
    pub fn epr_mode_capable(&self) -> bool {
        self.vsafe_5v().map(FixedSupply::epr_mode_capable).unwrap_or_default()
    }

    /// The parsed PDO list, in wire order (1-based object position = index + 1).
    pub fn pdos(&self) -> &[PowerDataObject] {
        &self.0
    }

    /// Drop every PDO beyond `len`, used when capping an SPR capability
    /// advertisement to its maximum negotiable object count.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

impl PdoState for SourceCapabilities {
    fn pdo_at_object_position(&self, position: u8) -> Option<Kind> {
        self.pdos().get(position.saturating_sub(1) as usize).and_then(PowerDataObject::kind)
    }
}

impl PdoState for Option<&SourceCapabilities> {
    fn pdo_at_object_position(&self, position: u8) -> Option<Kind> {
        self.and_then(|caps| caps.pdo_at_object_position(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_then_pps() {
        let vsafe5v = FixedSupply::default().with_raw_voltage(100).with_raw_max_current(300);
        let pps = SprProgrammablePowerSupply::default()
            .with_raw_min_voltage(33)
            .with_raw_max_voltage(110)
            .with_raw_max_current(60);

        let mut payload = [0u8; 8];
        payload[0..4].copy_from_slice(&vsafe5v.0.to_le_bytes());
        payload[4..8].copy_from_slice(&pps.0.to_le_bytes());

        let caps = SourceCapabilities::parse(&payload, 2);
        assert_eq!(caps.pdo_at_object_position(1), Some(Kind::FixedSupply));
        assert_eq!(caps.pdo_at_object_position(2), Some(Kind::Pps));
    }
}
