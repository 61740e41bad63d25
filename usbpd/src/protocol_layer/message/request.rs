//! Request Data Objects (RDOs): the sink's response to a source's PDO list.

use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;

use crate::protocol_layer::message::pdo::{self, Augmented};
use crate::protocol_layer::message::units::{ElectricCurrent, ElectricPotential};
use crate::protocol_layer::message::{_20millivolts, _50milliamperes};

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// The object-position field common to every RDO variant.
    pub struct RawDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// 1-based index into the source's PDO list. 0 and values above 14 are reserved.
        pub object_position: u8 @ 28..=31,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct FixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        pub object_position: u8 @ 28..=31,
        pub giveback_flag: bool @ 27,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
        pub epr_mode_capable: bool @ 22,
        /// Operating current, in 10 mA units.
        pub raw_operating_current: u16 @ 10..=19,
        /// Maximum operating current, in 10 mA units.
        pub raw_max_operating_current: u16 @ 0..=9,
    }
}

impl FixedSupply {
    /// The requested operating current.
    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_operating_current().into())
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Pps(pub u32): Debug, FromStorage, IntoStorage {
        pub object_position: u8 @ 28..=31,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
        pub epr_mode_capable: bool @ 22,
        /// Output voltage, in 20 mV units.
        pub raw_output_voltage: u16 @ 9..=20,
        /// Operating current, in 50 mA units.
        pub raw_operating_current: u16 @ 0..=6,
    }
}

impl Pps {
    /// The requested output voltage.
    pub fn output_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_20millivolts>(self.raw_output_voltage().into())
    }

    /// The requested operating current.
    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<_50milliamperes>(self.raw_operating_current().into())
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// Request towards an SPR Adjustable Voltage Supply APDO.
    pub struct SprAvs(pub u32): Debug, FromStorage, IntoStorage {
        pub object_position: u8 @ 28..=31,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
        pub epr_mode_capable: bool @ 22,
        /// Output voltage, in 20 mV units.
        pub raw_output_voltage: u16 @ 9..=20,
        /// Operating current, in 50 mA units.
        pub raw_operating_current: u16 @ 0..=6,
    }
}

bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    /// Request towards an EPR Adjustable Voltage Supply APDO.
    pub struct EprAvs(pub u32): Debug, FromStorage, IntoStorage {
        pub object_position: u8 @ 28..=31,
        pub capability_mismatch: bool @ 26,
        pub usb_communications_capable: bool @ 25,
        pub no_usb_suspend: bool @ 24,
        pub unchunked_extended_messages_supported: bool @ 23,
        pub epr_mode_capable: bool @ 22,
        /// Output voltage, in 20 mV units.
        pub raw_output_voltage: u16 @ 9..=20,
        /// Operating current, in 50 mA units.
        pub raw_operating_current: u16 @ 0..=6,
    }
}

/// A sink's power request towards a single selected PDO.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerSource {
    /// A Fixed Supply request.
    FixedSupply(FixedSupply),
    /// An SPR PPS request.
    Pps(Pps),
    /// An SPR AVS request.
    SprAvs(SprAvs),
    /// An EPR AVS request.
    EprAvs(EprAvs),
    /// A request built for an unrecognised PDO kind.
    Unknown(RawDataObject),
}

/// Errors building a power request against the advertised source capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The requested voltage is not offered by any PDO.
    VoltageMismatch,
}

/// A target voltage for a fixed-supply request.
#[derive(Debug, Clone, Copy)]
pub enum VoltageRequest {
    /// The mandatory 5 V baseline.
    Safe5V,
    /// The highest fixed voltage the source advertises.
    Highest,
    /// A specific fixed voltage.
    Specific(ElectricPotential),
}

/// A target current for a request.
#[derive(Debug, Clone, Copy)]
pub enum CurrentRequest {
    /// The PDO's advertised maximum.
    Highest,
    /// A specific current.
    Specific(ElectricCurrent),
}

impl PowerSource {
    /// The 1-based position this request targets.
    pub fn object_position(&self) -> u8 {
        match self {
            Self::FixedSupply(r) => r.object_position(),
            Self::Pps(r) => r.object_position(),
            Self::SprAvs(r) => r.object_position(),
            Self::EprAvs(r) => r.object_position(),
            Self::Unknown(r) => r.object_position(),
        }
    }

    fn find_fixed(
        source_capabilities: &pdo::SourceCapabilities,
        voltage_request: VoltageRequest,
    ) -> Option<(usize, &pdo::FixedSupply)> {
        match voltage_request {
            VoltageRequest::Safe5V => source_capabilities.vsafe_5v().map(|fixed| (0, fixed)),
            VoltageRequest::Highest => source_capabilities
                .pdos()
                .iter()
                .enumerate()
                .filter_map(|(index, pdo)| match pdo {
                    pdo::PowerDataObject::FixedSupply(fixed) => Some((index, fixed)),
                    _ => None,
                })
                .max_by_key(|(_, fixed)| fixed.raw_voltage()),
            VoltageRequest::Specific(voltage) => source_capabilities.pdos().iter().enumerate().find_map(|(index, pdo)| {
                match pdo {
                    pdo::PowerDataObject::FixedSupply(fixed) if fixed.voltage() == voltage => Some((index, fixed)),
                    _ => None,
                }
            }),
        }
    }

    fn find_pps(
        source_capabilities: &pdo::SourceCapabilities,
        voltage: ElectricPotential,
    ) -> Option<(usize, pdo::SprProgrammablePowerSupply)> {
        source_capabilities.pdos().iter().enumerate().find_map(|(index, pdo)| match pdo {
            pdo::PowerDataObject::Augmented(Augmented::Spr(spr))
                if spr.min_voltage() <= voltage && spr.max_voltage() >= voltage =>
            {
                Some((index, *spr))
            }
            _ => None,
        })
    }

    /// Build a request for a Fixed Supply PDO, choosing among `voltage_request`/`current_request`.
    pub fn new_fixed(
        current_request: CurrentRequest,
        voltage_request: VoltageRequest,
        source_capabilities: &pdo::SourceCapabilities,
    ) -> Result<Self, Error> {
        let (index, supply) = Self::find_fixed(source_capabilities, voltage_request).ok_or(Error::VoltageMismatch)?;

        let (current, mismatch) = match current_request {
            CurrentRequest::Highest => (supply.max_current(), false),
            CurrentRequest::Specific(requested) => (requested, requested > supply.max_current()),
        };
        let raw_current = (current.get::<centiampere>() as u16).min(0x3ff);
        let object_position = (index + 1) as u8;

        Ok(Self::FixedSupply(
            FixedSupply(0)
                .with_object_position(object_position)
                .with_raw_operating_current(raw_current)
                .with_raw_max_operating_current(raw_current)
                .with_capability_mismatch(mismatch)
                .with_no_usb_suspend(true)
                .with_usb_communications_capable(true),
        ))
    }

    /// Build a request against an SPR PPS PDO at a specific output voltage.
    pub fn new_pps(
        current_request: CurrentRequest,
        voltage: ElectricPotential,
        source_capabilities: &pdo::SourceCapabilities,
    ) -> Result<Self, Error> {
        let (index, supply) = Self::find_pps(source_capabilities, voltage).ok_or(Error::VoltageMismatch)?;

        let (current, mismatch) = match current_request {
            CurrentRequest::Highest => (supply.max_current(), false),
            CurrentRequest::Specific(requested) => (requested, requested > supply.max_current()),
        };
        let raw_current = (current.get::<_50milliamperes>() as u16).min(0x7f);
        let raw_voltage = voltage.get::<_20millivolts>() as u16;
        let object_position = (index + 1) as u8;

        Ok(Self::Pps(
            Pps(0)
                .with_object_position(object_position)
                .with_raw_output_voltage(raw_voltage)
                .with_raw_operating_current(raw_current)
                .with_capability_mismatch(mismatch)
                .with_no_usb_suspend(true)
                .with_usb_communications_capable(true),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_with(pdos: &[u32]) -> pdo::SourceCapabilities {
        let mut payload = heapless::Vec::<u8, 64>::new();
        for raw in pdos {
            let _ = payload.extend_from_slice(&raw.to_le_bytes());
        }
        pdo::SourceCapabilities::parse(&payload, pdos.len())
    }

    #[test]
    fn fixed_request_targets_highest_voltage() {
        let vsafe5v = pdo::FixedSupply::default().with_raw_voltage(100).with_raw_max_current(300);
        let nine_v = pdo::FixedSupply::default().with_raw_voltage(180).with_raw_max_current(300);
        let twenty_v = pdo::FixedSupply::default().with_raw_voltage(400).with_raw_max_current(300);
        let caps = caps_with(&[vsafe5v.0, nine_v.0, twenty_v.0]);

        let request = PowerSource::new_fixed(CurrentRequest::Highest, VoltageRequest::Highest, &caps).unwrap();
        assert_eq!(request.object_position(), 3);
    }

    #[test]
    fn pps_request_matches_s2_scenario() {
        let vsafe5v = pdo::FixedSupply::default().with_raw_voltage(100).with_raw_max_current(300);
        let nine_v = pdo::FixedSupply::default().with_raw_voltage(180).with_raw_max_current(300);
        let pps_11v = pdo::SprProgrammablePowerSupply::default()
            .with_raw_min_voltage(33)
            .with_raw_max_voltage(110)
            .with_raw_max_current(60);
        let pps_21v = pdo::SprProgrammablePowerSupply::default()
            .with_raw_min_voltage(33)
            .with_raw_max_voltage(210)
            .with_raw_max_current(100);
        let caps = caps_with(&[vsafe5v.0, nine_v.0, pps_11v.0, pps_21v.0]);

        let voltage = ElectricPotential::new::<uom::si::electric_potential::millivolt>(9000);
        let current = ElectricCurrent::new::<uom::si::electric_current::milliampere>(2000);
        let request = PowerSource::new_pps(CurrentRequest::Specific(current), voltage, &caps).unwrap();

        let pps = match request {
            PowerSource::Pps(pps) => pps,
            _ => panic!("expected Pps request"),
        };
        assert_eq!(request.object_position(), 4);
        assert_eq!(pps.raw_output_voltage(), 450);
        assert_eq!(pps.raw_operating_current(), 40);
    }
}
