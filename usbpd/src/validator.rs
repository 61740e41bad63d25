//! Structural validation of a parsed `Source_Capabilities`/
//! `EPR_Source_Capabilities` list, run once before the Policy Engine is
//! allowed to act on it.
//!
//! Grounded on the reference's PDO-parsing guards (each `FixedSupply`/`Pps`
//! constructor already rejects malformed bit patterns at the type level);
//! this module adds the cross-object structural rules the wire format alone
//! cannot express.

use crate::config::{MAX_PDO_OBJECTS, MAX_PDO_OBJECTS_SPR};
use crate::protocol_layer::message::pdo::{Augmented, PowerDataObject, SourceCapabilities};

/// Why a `Source_Capabilities` list was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum ValidationError {
    Empty,
    TooManyObjects,
    FirstObjectNotVsafe5v,
    SprObjectOutsideSprRange(u8),
    EprObjectOutsideEprRange(u8),
    MultipleSprAvs,
    MultipleEprAvs,
    FixedVoltagesNotAscending,
    PpsMaxVoltageDecreasing,
}

/// `vSafe5V`'s raw 50 mV field value (5000 mV / 50 mV).
const VSAFE_5V_RAW: u16 = 100;

/// Check every structural rule on a freshly parsed PDO list.
///
/// SPR objects (`FixedSupply`, `Pps`, `SprAvs`) must occupy positions
/// `1..=MAX_PDO_OBJECTS_SPR`; EPR-only objects (`EprAvs`) must occupy the
/// remaining positions. Fixed Supply voltages strictly increase; PPS
/// maximum voltages never decrease; at most one `SprAvs` and one `EprAvs`
/// may be present.
pub fn validate(caps: &SourceCapabilities) -> Result<(), ValidationError> {
    let pdos = caps.pdos();

    if pdos.is_empty() {
        return Err(ValidationError::Empty);
    }
    if pdos.len() > MAX_PDO_OBJECTS {
        return Err(ValidationError::TooManyObjects);
    }
    if caps.vsafe_5v().map(|fixed| fixed.raw_voltage()) != Some(VSAFE_5V_RAW) {
        return Err(ValidationError::FirstObjectNotVsafe5v);
    }

    let mut spr_avs_count = 0u8;
    let mut epr_avs_count = 0u8;
    let mut last_fixed_voltage = None;
    let mut last_pps_max_voltage = None;

    for (index, pdo) in pdos.iter().enumerate() {
        let position = (index + 1) as u8;
        let in_spr_range = (position as usize) <= MAX_PDO_OBJECTS_SPR;

        match pdo {
            PowerDataObject::FixedSupply(fixed) => {
                if !in_spr_range {
                    return Err(ValidationError::SprObjectOutsideSprRange(position));
                }
                let voltage = fixed.raw_voltage();
                if last_fixed_voltage.is_some_and(|previous| voltage <= previous) {
                    return Err(ValidationError::FixedVoltagesNotAscending);
                }
                last_fixed_voltage = Some(voltage);
            }
            PowerDataObject::Augmented(Augmented::Spr(pps)) => {
                if !in_spr_range {
                    return Err(ValidationError::SprObjectOutsideSprRange(position));
                }
                let max_voltage = pps.raw_max_voltage();
                if last_pps_max_voltage.is_some_and(|previous| max_voltage < previous) {
                    return Err(ValidationError::PpsMaxVoltageDecreasing);
                }
                last_pps_max_voltage = Some(max_voltage);
            }
            PowerDataObject::Augmented(Augmented::SprAvs(_)) => {
                if !in_spr_range {
                    return Err(ValidationError::SprObjectOutsideSprRange(position));
                }
                spr_avs_count += 1;
                if spr_avs_count > 1 {
                    return Err(ValidationError::MultipleSprAvs);
                }
            }
            PowerDataObject::Augmented(Augmented::Epr(_)) => {
                if in_spr_range {
                    return Err(ValidationError::EprObjectOutsideEprRange(position));
                }
                epr_avs_count += 1;
                if epr_avs_count > 1 {
                    return Err(ValidationError::MultipleEprAvs);
                }
            }
            PowerDataObject::Augmented(Augmented::Unknown(_)) | PowerDataObject::Unknown(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_layer::message::pdo::{EprAdjustableVoltageSupply, FixedSupply};

    fn caps_from(pdos: &[u32]) -> SourceCapabilities {
        let mut payload = heapless::Vec::<u8, 64>::new();
        for pdo in pdos {
            let _ = payload.extend_from_slice(&pdo.to_le_bytes());
        }
        SourceCapabilities::parse(&payload, pdos.len())
    }

    #[test]
    fn rejects_epr_avs_inside_spr_range() {
        let vsafe5v = FixedSupply::default().with_raw_voltage(100).with_raw_max_current(300);
        let fixed_9v = FixedSupply::default().with_raw_voltage(180).with_raw_max_current(300);
        let epr_avs = EprAdjustableVoltageSupply::default().with_raw_max_voltage(480).with_raw_min_voltage(50);
        let caps = caps_from(&[vsafe5v.0, fixed_9v.0, epr_avs.0]);
        assert_eq!(validate(&caps), Err(ValidationError::EprObjectOutsideEprRange(3)));
    }

    #[test]
    fn rejects_descending_fixed_voltages() {
        let vsafe5v = FixedSupply::default().with_raw_voltage(100).with_raw_max_current(300);
        let lower = FixedSupply::default().with_raw_voltage(90).with_raw_max_current(300);
        let caps = caps_from(&[vsafe5v.0, lower.0]);
        assert_eq!(validate(&caps), Err(ValidationError::FixedVoltagesNotAscending));
    }

    #[test]
    fn rejects_missing_vsafe_5v() {
        let fixed_9v = FixedSupply::default().with_raw_voltage(180).with_raw_max_current(300);
        let caps = caps_from(&[fixed_9v.0]);
        assert_eq!(validate(&caps), Err(ValidationError::FirstObjectNotVsafe5v));
    }

    #[test]
    fn accepts_epr_avs_in_epr_range() {
        let mut pdos = [FixedSupply::default().with_raw_voltage(100).with_raw_max_current(300).0; 8];
        for (index, voltage) in [100u16, 180, 260, 340, 420, 500, 580].into_iter().enumerate() {
            pdos[index] = FixedSupply::default().with_raw_voltage(voltage).with_raw_max_current(300).0;
        }
        pdos[7] = EprAdjustableVoltageSupply::default().with_raw_max_voltage(480).with_raw_min_voltage(50).0;
        let caps = caps_from(&pdos);
        assert_eq!(validate(&caps), Ok(()));
    }
}
