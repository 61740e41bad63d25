//! The Device Policy Manager (DPM) contract: the one seam an application
//! fills in to decide *which* power to ask for and to learn what the Policy
//! Engine is doing.
//!
//! Grounded on the reference's `sink::device_policy_manager::DevicePolicyManager`
//! trait, whose five `async fn`s (`inform`, `request`, `transition_power`,
//! `hard_reset`, `get_event`) cover exactly the same five seams. This stack
//! has no executor, so each becomes a synchronous, non-blocking method the
//! task calls once per pass: callbacks that must return immediately
//! (`inform`, `transition_power`), one that returns a value synchronously
//! (`select_request`), and one the PE polls for edge-triggered completion
//! (`wait_dpm_transit_to_default`) or for a pending outbound request
//! (`poll_event`).
use crate::protocol_layer::message::pdo::SourceCapabilities;
use crate::protocol_layer::message::request::{CurrentRequest, PowerSource, VoltageRequest};
use crate::units;

/// A request the DPM raises towards the Policy Engine, polled once per
/// `Ready` pass via [`DevicePolicyManager::poll_event`].
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// Ask the source to resend its SPR `Source_Capabilities`.
    RequestSprSourceCapabilities,
    /// Ask the source to resend its `EPR_Source_Capabilities`.
    RequestEprSourceCapabilities,
    /// Request EPR mode entry, advertising this sink's operational PDP.
    EnterEprMode(units::Power),
    /// Request EPR mode exit.
    ExitEprMode,
    /// Request a different PDO than the one currently contracted.
    RequestPower(PowerSource),
}

/// Notifications a message the Policy Engine posts up to the application.
///
/// Every outbound notification a sink-side PE can raise over the course of a
/// negotiation, corresponding to `MsgToDpm_*` in the reference's
/// terminology, collapsed into one enum instead of one method call per kind.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Notification {
    /// The PE has (re)started; any held contract is gone.
    Startup,
    /// A Hard Reset is in progress; power is about to return to vSafe5V.
    TransitToDefault,
    /// A validated `Source_Capabilities`/`EPR_Source_Capabilities` list arrived.
    SrcCapsReceived,
    /// The source accepted or rejected a `Request`; `bool` is acceptance.
    SelectCapDone(bool),
    /// The source reported it cannot supply any power (`Src_Disabled`).
    SrcDisabled,
    /// An `Alert` message's 32-bit ADO.
    Alert(u32),
    /// EPR mode entry failed; the `u32` is the source's response action code.
    EprEntryFailed(u32),
    /// An explicit contract is in effect and the port is ready to draw power.
    SnkReady,
    /// The PS transition to the newly accepted power has completed.
    HandshakeDone,
    /// A `NEW_POWER_LEVEL` request the DPM raised was accepted.
    NewPowerLevelAccepted,
    /// A `NEW_POWER_LEVEL` request the DPM raised was rejected.
    NewPowerLevelRejected,
}

/// The seam an application implements to steer sink-side power negotiation.
///
/// Every method has a default that keeps the stack running unattended at
/// the mandatory vSafe5V baseline, mirroring the reference trait's
/// `request` default (5 V at the highest advertised current).
pub trait DevicePolicyManager {
    /// Called once a `Source_Capabilities` list has passed validation.
    fn inform(&mut self, _source_capabilities: &SourceCapabilities) {}

    /// Choose which PDO to request. Defaults to vSafe5V at the PDO's max current.
    fn select_request(&mut self, source_capabilities: &SourceCapabilities) -> PowerSource {
        PowerSource::new_fixed(CurrentRequest::Highest, VoltageRequest::Safe5V, source_capabilities)
            .unwrap_or(PowerSource::FixedSupply(Default::default()))
    }

    /// Called once the accepted request's power transition has completed.
    fn transition_power(&mut self, _accepted: &PowerSource) {}

    /// Called when a Hard Reset drives the port back to its default state.
    /// Returning `true` tells the PE the local hardware has already settled
    /// back to vSafe5V and `Startup` may proceed immediately.
    fn hard_reset(&mut self) -> bool {
        true
    }

    /// The sink's own advertised capabilities, sent in reply to `Get_Sink_Cap`/`EPR_Get_Sink_Cap`.
    fn sink_capabilities(&self) -> &[u32] {
        &[]
    }

    /// Poll for a pending outbound request. Called once per `Ready` pass
    /// when the PE is otherwise idle.
    fn poll_event(&mut self, _source_capabilities: &SourceCapabilities) -> Option<Event> {
        None
    }

    /// Receive a Policy Engine notification.
    fn notify(&mut self, _notification: Notification) {}
}

/// A [`DevicePolicyManager`] that accepts whatever the source offers at its
/// mandatory vSafe5V baseline and never raises a request of its own.
///
/// Useful for tests and for devices with no policy beyond "stay powered".
#[derive(Debug, Default)]
pub struct DefaultDpm;

impl DevicePolicyManager for DefaultDpm {}
