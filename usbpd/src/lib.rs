#![no_std]
#![warn(missing_docs)]

//! A synchronous, non-async USB-PD 3.2 sink-side protocol stack.
//!
//! A [`task::PdStack`] ties a [`tc::Tc`] attach detector, a
//! [`protocol_layer::Prl`] (five small co-operating sub-FSMs), a
//! [`sink::policy_engine::PolicyEngine`] and an application-supplied
//! [`sink::device_policy_manager::DevicePolicyManager`] to a concrete
//! [`usbpd_traits::Tcpc`] driver, polling all of them forward from one task
//! loop with no executor and no heap.

pub mod config;
pub mod counters;
pub mod flags;
mod log;
pub mod port;
pub mod protocol_layer;
pub mod sink;
pub mod spsc;
pub mod task;
pub mod tc;
pub mod timers;
pub mod validator;

#[cfg(any(test, feature = "fake"))]
pub mod testing;

#[macro_use]
extern crate uom;

pub use protocol_layer::message::units;

/// A port's present power role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerRole {
    /// Sourcing power onto VBUS.
    Source,
    /// Sinking power from VBUS. The only role this stack ever advertises.
    Sink,
}

impl From<bool> for PowerRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Sink,
            true => Self::Source,
        }
    }
}

impl From<PowerRole> for bool {
    fn from(role: PowerRole) -> bool {
        match role {
            PowerRole::Sink => false,
            PowerRole::Source => true,
        }
    }
}

/// A port's present USB data role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRole {
    /// Upstream-facing port: this stack's only advertised role.
    Ufp,
    /// Downstream-facing port.
    Dfp,
}

impl From<bool> for DataRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Ufp,
            true => Self::Dfp,
        }
    }
}

impl From<DataRole> for bool {
    fn from(role: DataRole) -> bool {
        match role {
            DataRole::Ufp => false,
            DataRole::Dfp => true,
        }
    }
}
