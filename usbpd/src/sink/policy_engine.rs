//! The sink Policy Engine: negotiates an explicit power contract and keeps
//! it alive, driving the Protocol Layer and consulting the
//! [`DevicePolicyManager`] for every decision that is the application's to
//! make.
//!
//! Grounded on the reference's `sink::policy_engine::Sink<DRIVER, TIMER,
//! DPM>`, whose `update_state`/`run_step` drives an `async` state machine one
//! `await` point at a time. This stack has no executor: every state that
//! would `await` a PRL round-trip here sends once (guarded by a `sent` flag
//! folded into the state's payload) and then waits across ticks for the
//! matching [`Event`], a timer expiry, or both — the same state, revisited
//! every tick until it can advance. The reference's free-standing
//! `CheckRequestProgress`/`ForwardErrors` interceptors are folded inline:
//! every `*_response`-shaped state checks `Event::Discarded`/`Event::Error`
//! before its own expected message, in the same stable order the
//! interceptors would have run.
use usbpd_traits::{BistMode, Tcpc};
use uom::si::power::watt;

use crate::config::{
    TimerId, MAX_PDO_OBJECTS_SPR, MAX_SUPPORTED_REVISION, T_BIST_CARRIER_MODE_MS, T_ENTER_EPR_MS, T_PPS_REQUEST_MS,
    T_PS_TRANSITION_EPR_MS, T_PS_TRANSITION_SPR_MS, T_SENDER_RESPONSE_MS, T_SINK_EPR_KEEP_ALIVE_MS, T_SINK_REQUEST_MS,
    T_TYPEC_SINK_WAIT_CAP_MS,
};
use crate::flags::{DpmRequest, PeFlag};
use crate::log::warn;
use crate::port::{Port, PrlError};
use crate::protocol_layer::message::header::{
    ControlMessageType, DataMessageType, ExtendedMessageType, Header, MessageType, SpecificationRevision,
};
use crate::protocol_layer::message::pdo::{Augmented, PowerDataObject, SourceCapabilities};
use crate::protocol_layer::message::request::PowerSource;
use crate::protocol_layer::message::{BistDataMode, Data, EprModeAction, Message, RevisionData};
use crate::protocol_layer::{Event, Prl};
use crate::sink::device_policy_manager::{DevicePolicyManager, Event as DpmEvent, Notification};
use crate::{config::N_HARD_RESET_COUNT, validator, DataRole, PowerRole};

/// Whether the port is presently negotiating in SPR or EPR mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Spr,
    Epr,
}

/// Sink states. Every state that sends a message and then waits folds a
/// `sent`/already-armed flag into its payload so re-entering it mid-wait is
/// idempotent.
#[derive(Debug, Clone)]
enum State {
    Startup,
    Discovery,
    WaitForCapabilities,
    EvaluateCapabilities(SourceCapabilities),
    SelectCapability { power_source: PowerSource, sent: bool },
    TransitionSink { power_source: PowerSource },
    Ready { power_source: PowerSource, after_wait: bool },
    GiveSinkCap { power_source: PowerSource, sent: bool },
    GetSourceCap { power_source: PowerSource, sent: bool },
    SendNotSupported { power_source: PowerSource, sent: bool },
    SendSoftReset { sent: bool },
    SoftReset { sent: bool },
    HardReset,
    WaitHardResetSent,
    TransitionToDefault,
    EprModeEntry { power_source: PowerSource, pdp_watts: u8, sent: bool },
    EprEntryWaitForResponse { power_source: PowerSource },
    EprSendExit { power_source: PowerSource, sent: bool },
    EprKeepAlive { power_source: PowerSource, sent: bool },
    EprExitReceived { power_source: PowerSource },
    SrcDisabled,
    GiveRevision { power_source: PowerSource, sent: bool },
    BistActivate { power_source: PowerSource, mode: BistDataMode, sent: bool },
    BistCarrierMode { power_source: PowerSource, sent: bool },
    BistTestData { power_source: PowerSource },
    SendReject { power_source: PowerSource, sent: bool },
}

/// The sink Policy Engine.
pub struct PolicyEngine<DPM> {
    device_policy_manager: DPM,
    state: State,
    mode: Mode,
}

impl<DPM: DevicePolicyManager> PolicyEngine<DPM> {
    /// Construct a Policy Engine starting at `PE_SNK_Startup`.
    pub fn new(device_policy_manager: DPM) -> Self {
        Self {
            device_policy_manager,
            state: State::Startup,
            mode: Mode::Spr,
        }
    }

    /// Access the wrapped Device Policy Manager, for notifications the task
    /// loop delivers on the Policy Engine's behalf (cable attach/detach).
    pub fn device_policy_manager_mut(&mut self) -> &mut DPM {
        &mut self.device_policy_manager
    }

    /// Run one Policy Engine pass: feed it the Protocol Layer events raised
    /// this tick, then let it advance as far as it can without waiting on a
    /// fresh tick (transient states chain synchronously; event/timer-driven
    /// states consume the current events at most once).
    pub fn tick<T: Tcpc>(&mut self, port: &mut Port, tcpc: &T, prl: &mut Prl, events: &[Event]) {
        loop {
            if !self.step(port, tcpc, prl, events) {
                break;
            }
        }
    }

    fn step<T: Tcpc>(&mut self, port: &mut Port, tcpc: &T, prl: &mut Prl, events: &[Event]) -> bool {
        match self.state.clone() {
            State::Startup => {
                port.reset_to_default();
                prl.reset();
                self.mode = Mode::Spr;
                self.device_policy_manager.notify(Notification::Startup);
                self.state = State::Discovery;
                true
            }
            State::Discovery => {
                port.timers
                    .start(TimerId::TypeCSinkWaitCap as usize, T_TYPEC_SINK_WAIT_CAP_MS);
                self.state = State::WaitForCapabilities;
                true
            }
            State::WaitForCapabilities => {
                if let Some((header, capabilities)) = find_source_capabilities(events, self.mode) {
                    port.timers.stop(TimerId::TypeCSinkWaitCap as usize);
                    let capabilities = self.accept_capabilities(port, header, capabilities);
                    self.state = State::EvaluateCapabilities(capabilities);
                    return true;
                }
                if port.timers.is_expired(TimerId::TypeCSinkWaitCap as usize) {
                    port.pe_flags.set_flag(PeFlag::HrByCapsTimeout);
                    self.state = State::HardReset;
                    return true;
                }
                false
            }
            State::EvaluateCapabilities(capabilities) => {
                if let Err(error) = validator::validate(&capabilities) {
                    warn!("pe: rejecting Source_Capabilities: {:?}", error);
                    self.state = State::SendNotSupported {
                        power_source: port.last_rdo.unwrap_or(PowerSource::FixedSupply(Default::default())),
                        sent: false,
                    };
                    return true;
                }

                port.source_caps = Some(capabilities.clone());
                port.hard_reset_counter = 0;
                self.device_policy_manager.inform(&capabilities);

                let power_source = self.device_policy_manager.select_request(&capabilities);
                self.state = State::SelectCapability {
                    power_source,
                    sent: false,
                };
                true
            }
            State::SelectCapability { power_source, sent } => {
                if !sent {
                    self.send_request(port, prl, power_source);
                    port.timers.start(TimerId::SenderResponse as usize, T_SENDER_RESPONSE_MS);
                    self.state = State::SelectCapability { power_source, sent: true };
                    return false;
                }

                if events.iter().any(|e| matches!(e, Event::Discarded)) {
                    self.state = State::SendSoftReset { sent: false };
                    return true;
                }
                if let Some(control) = find_control(events, &[ControlMessageType::Accept, ControlMessageType::Wait, ControlMessageType::Reject])
                {
                    port.timers.stop(TimerId::SenderResponse as usize);
                    match control {
                        ControlMessageType::Accept => {
                            port.pe_flags.set_flag(PeFlag::HasExplicitContract);
                            port.last_rdo = Some(power_source);
                            port.contracted_rdo = Some(power_source);
                            self.device_policy_manager.notify(Notification::SelectCapDone(true));
                            self.state = State::TransitionSink { power_source };
                        }
                        ControlMessageType::Wait => {
                            self.device_policy_manager.notify(Notification::SelectCapDone(false));
                            port.timers.start(TimerId::SinkRequest as usize, T_SINK_REQUEST_MS);
                            self.state = if port.has_explicit_contract() {
                                State::Ready {
                                    power_source,
                                    after_wait: true,
                                }
                            } else {
                                State::WaitForCapabilities
                            };
                        }
                        ControlMessageType::Reject => {
                            self.device_policy_manager.notify(Notification::SelectCapDone(false));
                            self.state = if port.has_explicit_contract() {
                                State::Ready {
                                    power_source,
                                    after_wait: false,
                                }
                            } else {
                                State::WaitForCapabilities
                            };
                        }
                        _ => unreachable!(),
                    }
                    return true;
                }
                if port.timers.is_expired(TimerId::SenderResponse as usize) {
                    self.state = State::HardReset;
                    return true;
                }
                false
            }
            State::TransitionSink { power_source } => {
                let timer = match self.mode {
                    Mode::Spr => (TimerId::PsTransitionSpr, T_PS_TRANSITION_SPR_MS),
                    Mode::Epr => (TimerId::PsTransitionEpr, T_PS_TRANSITION_EPR_MS),
                };
                port.timers.start(timer.0 as usize, timer.1);

                if find_control(events, &[ControlMessageType::PsRdy]).is_some() {
                    port.timers.stop(timer.0 as usize);
                    self.device_policy_manager.transition_power(&power_source);
                    if !port.pe_flags.test_and_clear_flag(PeFlag::HandshakeReported) {
                        self.device_policy_manager.notify(Notification::HandshakeDone);
                    }
                    self.device_policy_manager.notify(Notification::SnkReady);
                    self.state = State::Ready {
                        power_source,
                        after_wait: false,
                    };
                    return true;
                }
                if port.timers.is_expired(timer.0 as usize) || events.iter().any(|e| matches!(e, Event::Discarded)) {
                    self.state = State::HardReset;
                    return true;
                }
                false
            }
            State::Ready { power_source, after_wait } => {
                self.enter_ready(port, power_source, after_wait);

                if let Some(message) = find_received(events) {
                    self.dispatch_ready(port, power_source, message);
                    return true;
                }

                if let Some(error) = find_error(events) {
                    warn!("pe: PRL error in Ready: {:?}", error);
                    let ams_interrupted = port.pe_flags.test_flag(PeFlag::AmsActive)
                        && port.has_explicit_contract()
                        && !port.pe_flags.test_flag(PeFlag::AmsFirstMsgSent);
                    port.pe_flags.clear_flag(PeFlag::AmsActive);
                    if ams_interrupted {
                        port.pe_flags.set_flag(PeFlag::DoSoftResetOnUnsupported);
                        return false;
                    }
                    self.state = State::SendSoftReset { sent: false };
                    return true;
                }
                port.pe_flags.clear_flag(PeFlag::AmsActive);

                if let Some(pdp_watts) = self.pending_epr_auto_entry(port) {
                    self.state = State::EprModeEntry {
                        power_source,
                        pdp_watts,
                        sent: false,
                    };
                    return true;
                }

                if after_wait && port.timers.is_expired(TimerId::SinkRequest as usize) {
                    self.state = State::SelectCapability {
                        power_source,
                        sent: false,
                    };
                    return true;
                }
                if self.mode == Mode::Epr && port.timers.is_expired(TimerId::SinkEprKeepAlive as usize) {
                    self.state = State::EprKeepAlive {
                        power_source,
                        sent: false,
                    };
                    return true;
                }
                if matches!(power_source, PowerSource::Pps(_)) && port.timers.is_expired(TimerId::PpsRequest as usize) {
                    self.state = State::SelectCapability {
                        power_source,
                        sent: false,
                    };
                    return true;
                }

                if let Some(dpm_event) = self.device_policy_manager.poll_event(port.source_caps.as_ref().unwrap()) {
                    self.handle_dpm_event(port, power_source, dpm_event);
                    return true;
                }

                false
            }
            State::GiveSinkCap { power_source, sent } => {
                if !sent {
                    let mut pdos = heapless::Vec::new();
                    for pdo in self.device_policy_manager.sink_capabilities() {
                        let _ = pdos.push(*pdo);
                    }
                    let num_objects = pdos.len().max(1) as u8;
                    let header = self.header(port, DataMessageType::SinkCapabilities, num_objects);
                    prl.enqueue(port, Message::new_with_data(header, Data::SinkCapabilities(pdos)));
                    self.state = State::GiveSinkCap { power_source, sent: true };
                    return false;
                }
                port.pe_flags.set_flag(PeFlag::AmsFirstMsgSent);
                if events.iter().any(|e| matches!(e, Event::MessageSent | Event::Discarded)) {
                    self.state = State::Ready {
                        power_source,
                        after_wait: false,
                    };
                    return true;
                }
                false
            }
            State::GetSourceCap { power_source, sent } => {
                if !sent {
                    let header = self.header(port, MessageType::Control(ControlMessageType::GetSourceCap), 0);
                    prl.enqueue(port, Message::new(header));
                    port.timers.start(TimerId::SenderResponse as usize, T_SENDER_RESPONSE_MS);
                    self.state = State::GetSourceCap { power_source, sent: true };
                    return false;
                }
                if let Some((header, capabilities)) = find_source_capabilities(events, self.mode) {
                    port.timers.stop(TimerId::SenderResponse as usize);
                    let capabilities = self.accept_capabilities(port, header, capabilities);
                    self.state = State::EvaluateCapabilities(capabilities);
                    return true;
                }
                if port.timers.is_expired(TimerId::SenderResponse as usize) {
                    self.state = State::Ready {
                        power_source,
                        after_wait: false,
                    };
                    return true;
                }
                false
            }
            State::SendNotSupported { power_source, sent } => {
                if !sent {
                    if port.pe_flags.test_and_clear_flag(PeFlag::DoSoftResetOnUnsupported) {
                        self.state = State::SendSoftReset { sent: false };
                        return true;
                    }
                    let reply = if port.revision <= u8::from(SpecificationRevision::R2_0) {
                        ControlMessageType::Reject
                    } else {
                        ControlMessageType::NotSupported
                    };
                    let header = self.header(port, MessageType::Control(reply), 0);
                    prl.enqueue(port, Message::new(header));
                    self.state = State::SendNotSupported { power_source, sent: true };
                    return false;
                }
                port.pe_flags.set_flag(PeFlag::AmsFirstMsgSent);
                if events.iter().any(|e| matches!(e, Event::MessageSent | Event::Discarded)) {
                    self.state = State::Ready {
                        power_source,
                        after_wait: false,
                    };
                    return true;
                }
                false
            }
            State::GiveRevision { power_source, sent } => {
                if !sent {
                    let header = self.header(port, DataMessageType::Revision, 1);
                    prl.enqueue(
                        port,
                        Message::new_with_data(
                            header,
                            Data::Revision(RevisionData {
                                revision_major: 3,
                                revision_minor: 2,
                            }),
                        ),
                    );
                    self.state = State::GiveRevision { power_source, sent: true };
                    return false;
                }
                port.pe_flags.set_flag(PeFlag::AmsFirstMsgSent);
                if events.iter().any(|e| matches!(e, Event::MessageSent | Event::Discarded)) {
                    self.state = State::Ready {
                        power_source,
                        after_wait: false,
                    };
                    return true;
                }
                false
            }
            State::SendReject { power_source, sent } => {
                if !sent {
                    let header = self.header(port, MessageType::Control(ControlMessageType::Reject), 0);
                    prl.enqueue(port, Message::new(header));
                    self.state = State::SendReject { power_source, sent: true };
                    return false;
                }
                port.pe_flags.set_flag(PeFlag::AmsFirstMsgSent);
                if events.iter().any(|e| matches!(e, Event::MessageSent | Event::Discarded)) {
                    self.state = State::Ready {
                        power_source,
                        after_wait: false,
                    };
                    return true;
                }
                false
            }
            State::BistActivate { power_source, mode, sent } => {
                if !sent {
                    let tcpc_mode = match mode {
                        BistDataMode::CarrierMode2 => BistMode::Carrier,
                        BistDataMode::TestData => BistMode::TestData,
                        BistDataMode::Unknown(_) => {
                            self.state = State::Ready {
                                power_source,
                                after_wait: false,
                            };
                            return true;
                        }
                    };
                    tcpc.req_set_bist(tcpc_mode);
                    self.state = State::BistActivate { power_source, mode, sent: true };
                    return false;
                }
                if !tcpc.is_set_bist_done() {
                    return false;
                }
                self.state = match mode {
                    BistDataMode::CarrierMode2 => State::BistCarrierMode { power_source, sent: false },
                    _ => State::BistTestData { power_source },
                };
                true
            }
            State::BistCarrierMode { power_source, sent } => {
                if !sent {
                    port.timers
                        .start(TimerId::BistCarrierMode as usize, T_BIST_CARRIER_MODE_MS);
                    self.state = State::BistCarrierMode { power_source, sent: true };
                    return false;
                }
                if port.timers.is_expired(TimerId::BistCarrierMode as usize) {
                    tcpc.req_set_bist(BistMode::Off);
                    let _ = power_source;
                    self.state = State::TransitionToDefault;
                    return true;
                }
                false
            }
            State::BistTestData { power_source } => {
                // Only a Hard Reset from the partner can leave BIST Test Data mode.
                let _ = power_source;
                if events.iter().any(|e| matches!(e, Event::HardResetFromPartner)) {
                    self.state = State::TransitionToDefault;
                    return true;
                }
                false
            }
            State::SendSoftReset { sent } => {
                if !sent {
                    prl.reset();
                    let header = self.header(port, MessageType::Control(ControlMessageType::SoftReset), 0);
                    prl.enqueue(port, Message::new(header));
                    port.timers.start(TimerId::SenderResponse as usize, T_SENDER_RESPONSE_MS);
                    self.state = State::SendSoftReset { sent: true };
                    return false;
                }
                if find_control(events, &[ControlMessageType::Accept]).is_some() {
                    self.state = State::WaitForCapabilities;
                    return true;
                }
                if port.timers.is_expired(TimerId::SenderResponse as usize) || events.iter().any(|e| matches!(e, Event::Discarded)) {
                    self.state = State::HardReset;
                    return true;
                }
                false
            }
            State::SoftReset { sent } => {
                if !sent {
                    let header = self.header(port, MessageType::Control(ControlMessageType::Accept), 0);
                    prl.enqueue(port, Message::new(header));
                    self.state = State::SoftReset { sent: true };
                    return false;
                }
                if events.iter().any(|e| matches!(e, Event::MessageSent)) {
                    prl.reset();
                    self.state = State::WaitForCapabilities;
                    return true;
                }
                false
            }
            State::HardReset => {
                if port.pe_flags.test_flag(PeFlag::HrByCapsTimeout) && port.hard_reset_counter > N_HARD_RESET_COUNT {
                    self.state = State::SrcDisabled;
                    return true;
                }
                port.hard_reset_counter += 1;
                prl.request_hard_reset(port);
                self.state = State::WaitHardResetSent;
                true
            }
            State::WaitHardResetSent => {
                if events.iter().any(|e| matches!(e, Event::HardResetSent)) {
                    self.state = State::TransitionToDefault;
                    return true;
                }
                false
            }
            State::TransitionToDefault => {
                let released = self.device_policy_manager.hard_reset();
                self.device_policy_manager.notify(Notification::TransitToDefault);
                port.pe_flags.clear_all();
                port.dpm_requests.clear_all();
                self.mode = Mode::Spr;
                if released {
                    prl.pe_hard_reset_complete(port);
                    self.state = State::Startup;
                    return true;
                }
                false
            }
            State::EprModeEntry {
                power_source,
                pdp_watts,
                sent,
            } => {
                if !sent {
                    let header = self.header(port, DataMessageType::EprMode, 1);
                    prl.enqueue(
                        port,
                        Message::new_with_data(header, Data::EprMode(EprModeAction::Enter(pdp_watts))),
                    );
                    port.timers.start(TimerId::EnterEpr as usize, T_ENTER_EPR_MS);
                    self.state = State::EprModeEntry {
                        power_source,
                        pdp_watts,
                        sent: true,
                    };
                    return false;
                }
                if let Some(action) = find_epr_mode(events) {
                    match action {
                        EprModeAction::EnterAcknowledged => {
                            self.state = State::EprEntryWaitForResponse { power_source };
                        }
                        EprModeAction::EnterSucceeded => {
                            port.timers.stop(TimerId::EnterEpr as usize);
                            self.mode = Mode::Epr;
                            port.pe_flags.set_flag(PeFlag::InEprMode);
                            self.state = State::WaitForCapabilities;
                        }
                        _ => {
                            port.timers.stop(TimerId::EnterEpr as usize);
                            port.dpm_requests.clear_flag(DpmRequest::EprModeEntry);
                            port.pe_flags.set_flag(PeFlag::EprAutoEnterDisabled);
                            self.device_policy_manager.notify(Notification::EprEntryFailed(0));
                            self.device_policy_manager.notify(Notification::HandshakeDone);
                            self.state = State::Ready {
                                power_source,
                                after_wait: false,
                            };
                        }
                    }
                    return true;
                }
                if port.timers.is_expired(TimerId::EnterEpr as usize) {
                    self.state = State::SendSoftReset { sent: false };
                    return true;
                }
                false
            }
            State::EprEntryWaitForResponse { power_source } => {
                if let Some(action) = find_epr_mode(events) {
                    port.timers.stop(TimerId::EnterEpr as usize);
                    if action == EprModeAction::EnterSucceeded {
                        self.mode = Mode::Epr;
                        port.pe_flags.set_flag(PeFlag::InEprMode);
                        self.state = State::WaitForCapabilities;
                    } else {
                        self.device_policy_manager.notify(Notification::EprEntryFailed(0));
                        self.state = State::Ready {
                            power_source,
                            after_wait: false,
                        };
                    }
                    return true;
                }
                if port.timers.is_expired(TimerId::EnterEpr as usize) {
                    self.state = State::SendSoftReset { sent: false };
                    return true;
                }
                false
            }
            State::EprSendExit { power_source, sent } => {
                if !sent {
                    let header = self.header(port, DataMessageType::EprMode, 1);
                    prl.enqueue(port, Message::new_with_data(header, Data::EprMode(EprModeAction::Exit)));
                    self.state = State::EprSendExit { power_source, sent: true };
                    return false;
                }
                if events.iter().any(|e| matches!(e, Event::MessageSent | Event::Discarded)) {
                    self.state = State::EprExitReceived { power_source };
                    return true;
                }
                false
            }
            State::EprKeepAlive { power_source, sent } => {
                if !sent {
                    let header = self.header(
                        port,
                        MessageType::Extended(ExtendedMessageType::ExtendedControl),
                        1,
                    );
                    let mut message = Message::new(header);
                    message.extended_header = Some(
                        crate::protocol_layer::message::header::ExtendedHeader(0)
                            .with_chunked(false)
                            .with_data_size(2),
                    );
                    message.data = Some(Data::Unknown);
                    prl.enqueue(port, message);
                    port.timers
                        .start(TimerId::SinkEprKeepAlive as usize, T_SINK_EPR_KEEP_ALIVE_MS);
                    self.state = State::EprKeepAlive { power_source, sent: true };
                    return false;
                }
                if events.iter().any(|e| matches!(e, Event::MessageSent)) || events.iter().any(|e| matches!(e, Event::Discarded)) {
                    self.state = State::Ready {
                        power_source,
                        after_wait: false,
                    };
                    return true;
                }
                if events.iter().any(|e| matches!(e, Event::Error(_))) {
                    self.state = State::SendSoftReset { sent: false };
                    return true;
                }
                false
            }
            State::EprExitReceived { power_source } => {
                port.pe_flags.clear_flag(PeFlag::InEprMode);
                port.dpm_requests.clear_flag(DpmRequest::EprModeEntry);
                self.mode = Mode::Spr;
                let _ = power_source;
                self.state = State::WaitForCapabilities;
                true
            }
            State::SrcDisabled => {
                self.device_policy_manager.notify(Notification::SrcDisabled);
                if events.iter().any(|e| matches!(e, Event::HardResetFromPartner)) {
                    self.state = State::TransitionToDefault;
                    return true;
                }
                false
            }
        }
    }

    fn enter_ready(&mut self, port: &mut Port, power_source: PowerSource, after_wait: bool) {
        port.pe_flags.set_flag(PeFlag::HasExplicitContract);
        if after_wait && port.timers.is_disabled(TimerId::SinkRequest as usize) {
            port.timers.start(TimerId::SinkRequest as usize, T_SINK_REQUEST_MS);
        }
        if self.mode == Mode::Epr && port.timers.is_disabled(TimerId::SinkEprKeepAlive as usize) {
            port.timers
                .start(TimerId::SinkEprKeepAlive as usize, T_SINK_EPR_KEEP_ALIVE_MS);
        }
        if matches!(power_source, PowerSource::Pps(_)) && port.timers.is_disabled(TimerId::PpsRequest as usize) {
            port.timers.start(TimerId::PpsRequest as usize, T_PPS_REQUEST_MS);
        }

        if self.mode == Mode::Spr
            && !port.pe_flags.test_flag(PeFlag::EprAutoEnterDisabled)
            && !port.dpm_requests.test_flag(DpmRequest::EprModeEntry)
            && port.source_caps.as_ref().map(SourceCapabilities::epr_mode_capable).unwrap_or(false)
        {
            port.dpm_requests.set_flag(DpmRequest::EprModeEntry);
        }
    }

    /// Consume a pending PE-volunteered `EPR_MODE_ENTRY` request, provided the
    /// Device Policy Manager has configured an EPR AVS sink PDO to request
    /// power from.
    fn pending_epr_auto_entry(&self, port: &mut Port) -> Option<u8> {
        if !port.dpm_requests.test_and_clear_flag(DpmRequest::EprModeEntry) {
            return None;
        }
        let pdp_watts = self.desired_epr_pdp_watts();
        (pdp_watts > 0).then_some(pdp_watts)
    }

    fn dispatch_ready(&mut self, port: &mut Port, power_source: PowerSource, message: &Message) {
        port.pe_flags.set_flag(PeFlag::AmsActive);
        port.pe_flags.clear_flag(PeFlag::AmsFirstMsgSent);
        match message.header.message_type() {
            MessageType::Data(DataMessageType::SourceCapabilities) => {
                if self.mode == Mode::Epr {
                    self.state = State::HardReset;
                } else {
                    let Some(Data::SourceCapabilities(caps)) = &message.data else {
                        unreachable!()
                    };
                    let caps = self.accept_capabilities(port, message.header, caps.clone());
                    self.state = State::EvaluateCapabilities(caps);
                }
            }
            MessageType::Extended(ExtendedMessageType::EprSourceCapabilities) => {
                let Some(Data::SourceCapabilities(caps)) = &message.data else {
                    self.state = State::Ready {
                        power_source,
                        after_wait: false,
                    };
                    return;
                };
                let caps = self.accept_capabilities(port, message.header, caps.clone());
                self.state = State::EvaluateCapabilities(caps);
            }
            MessageType::Data(DataMessageType::EprMode) => {
                if let Some(Data::EprMode(EprModeAction::Exit)) = message.data {
                    self.state = State::EprExitReceived { power_source };
                } else {
                    self.state = State::Ready {
                        power_source,
                        after_wait: false,
                    };
                }
            }
            MessageType::Data(DataMessageType::Alert) => {
                self.device_policy_manager.notify(Notification::Alert(0));
                self.state = State::Ready {
                    power_source,
                    after_wait: false,
                };
            }
            MessageType::Control(ControlMessageType::GetSinkCap) => {
                self.state = State::GiveSinkCap {
                    power_source,
                    sent: false,
                };
            }
            MessageType::Control(ControlMessageType::GoodCrc)
            | MessageType::Control(ControlMessageType::Ping)
            | MessageType::Control(ControlMessageType::NotSupported) => {
                self.state = State::Ready {
                    power_source,
                    after_wait: false,
                };
            }
            MessageType::Extended(ExtendedMessageType::ExtendedControl) => {
                self.state = State::Ready {
                    power_source,
                    after_wait: false,
                };
            }
            MessageType::Control(ControlMessageType::GetRevision) => {
                self.state = State::GiveRevision {
                    power_source,
                    sent: false,
                };
            }
            MessageType::Data(DataMessageType::Bist) => {
                let accepted = port.has_explicit_contract() && power_source.object_position() == 1;
                match (&message.data, accepted) {
                    (Some(Data::Bist(mode)), true) => {
                        self.state = State::BistActivate {
                            power_source,
                            mode: *mode,
                            sent: false,
                        };
                    }
                    _ => {
                        self.state = State::Ready {
                            power_source,
                            after_wait: false,
                        };
                    }
                }
            }
            MessageType::Data(DataMessageType::VendorDefined) => {
                self.state = if port.revision <= u8::from(SpecificationRevision::R2_0) {
                    State::Ready {
                        power_source,
                        after_wait: false,
                    }
                } else {
                    State::SendReject {
                        power_source,
                        sent: false,
                    }
                };
            }
            _ => {
                self.state = State::SendNotSupported {
                    power_source,
                    sent: false,
                };
            }
        }
    }

    fn handle_dpm_event(&mut self, port: &mut Port, power_source: PowerSource, event: DpmEvent) {
        match event {
            DpmEvent::RequestSprSourceCapabilities => {
                self.state = State::GetSourceCap {
                    power_source,
                    sent: false,
                };
            }
            DpmEvent::RequestEprSourceCapabilities => {
                self.state = State::GetSourceCap {
                    power_source,
                    sent: false,
                };
            }
            DpmEvent::EnterEprMode(watts) => {
                self.state = State::EprModeEntry {
                    power_source,
                    pdp_watts: watts.get::<uom::si::power::watt>() as u8,
                    sent: false,
                };
            }
            DpmEvent::ExitEprMode => {
                self.state = State::EprSendExit { power_source, sent: false };
            }
            DpmEvent::RequestPower(new_power_source) => {
                self.state = State::SelectCapability {
                    power_source: new_power_source,
                    sent: false,
                };
            }
        }
    }

    /// Negotiate the operating revision down to the partner's and, outside
    /// EPR mode, cap the advertisement to the objects an SPR contract can
    /// reference.
    fn accept_capabilities(&self, port: &mut Port, header: Header, mut capabilities: SourceCapabilities) -> SourceCapabilities {
        port.revision = u8::from(header.spec_revision()).min(MAX_SUPPORTED_REVISION);
        if self.mode == Mode::Spr {
            capabilities.truncate(MAX_PDO_OBJECTS_SPR);
        }
        capabilities
    }

    /// The PDP, in watts, the Device Policy Manager has configured for EPR
    /// operation, read from its own EPR AVS sink PDO. Zero if it has none.
    fn desired_epr_pdp_watts(&self) -> u8 {
        self.device_policy_manager
            .sink_capabilities()
            .iter()
            .find_map(|&raw| match PowerDataObject::from_raw(raw) {
                PowerDataObject::Augmented(Augmented::Epr(avs)) => Some(avs.pd_power().get::<watt>() as u8),
                _ => None,
            })
            .unwrap_or(0)
    }

    fn send_request(&mut self, port: &mut Port, prl: &mut Prl, power_source: PowerSource) {
        let num_objects = 1;
        let message_kind = match power_source {
            PowerSource::EprAvs(_) => DataMessageType::EprRequest,
            _ => DataMessageType::Request,
        };
        let header = self.header(port, message_kind, num_objects);
        prl.enqueue(port, Message::new_with_data(header, Data::PowerSourceRequest(power_source)));
    }

    fn header<K: Into<HeaderKind>>(&self, port: &Port, kind: K, num_objects: u8) -> Header {
        let revision = SpecificationRevision::try_from(port.revision).unwrap_or(SpecificationRevision::R2_0);
        let template = Header::new_template(DataRole::Ufp, PowerRole::Sink, revision);
        let id = port.prl_counters.tx_message_id.value();
        match kind.into() {
            HeaderKind::Control(control) => Header::new_control(template, id, control),
            HeaderKind::Data(data) => Header::new_data(template, id, data, num_objects),
            HeaderKind::Extended(extended) => Header::new_extended(template, id, extended, num_objects),
        }
    }
}

enum HeaderKind {
    Control(ControlMessageType),
    Data(DataMessageType),
    Extended(ExtendedMessageType),
}

impl From<ControlMessageType> for HeaderKind {
    fn from(value: ControlMessageType) -> Self {
        Self::Control(value)
    }
}
impl From<DataMessageType> for HeaderKind {
    fn from(value: DataMessageType) -> Self {
        Self::Data(value)
    }
}
impl From<ExtendedMessageType> for HeaderKind {
    fn from(value: ExtendedMessageType) -> Self {
        Self::Extended(value)
    }
}
impl From<MessageType> for HeaderKind {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Control(kind) => Self::Control(kind),
            MessageType::Data(kind) => Self::Data(kind),
            MessageType::Extended(kind) => Self::Extended(kind),
        }
    }
}

fn find_received(events: &[Event]) -> Option<&Message> {
    events.iter().find_map(|event| match event {
        Event::MessageReceived(message) => Some(message),
        _ => None,
    })
}

fn find_control(events: &[Event], wanted: &[ControlMessageType]) -> Option<ControlMessageType> {
    find_received(events).and_then(|message| match message.header.message_type() {
        MessageType::Control(kind) if wanted.contains(&kind) => Some(kind),
        _ => None,
    })
}

fn find_source_capabilities(events: &[Event], mode: Mode) -> Option<(Header, SourceCapabilities)> {
    let message = find_received(events)?;
    match (mode, message.header.message_type(), &message.data) {
        (Mode::Spr, MessageType::Data(DataMessageType::SourceCapabilities), Some(Data::SourceCapabilities(caps))) => {
            Some((message.header, caps.clone()))
        }
        (Mode::Epr, MessageType::Extended(ExtendedMessageType::EprSourceCapabilities), Some(Data::SourceCapabilities(caps))) => {
            Some((message.header, caps.clone()))
        }
        _ => None,
    }
}

fn find_epr_mode(events: &[Event]) -> Option<EprModeAction> {
    find_received(events).and_then(|message| match &message.data {
        Some(Data::EprMode(action)) => Some(*action),
        _ => None,
    })
}

fn find_error(events: &[Event]) -> Option<PrlError> {
    events.iter().find_map(|event| match event {
        Event::Error(error) => Some(*error),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::device_policy_manager::DefaultDpm;
    use crate::testing::FakeTcpc;

    fn caps_payload(pdos: &[u32]) -> heapless::Vec<u8, 64> {
        let mut payload = heapless::Vec::new();
        for pdo in pdos {
            let _ = payload.extend_from_slice(&pdo.to_le_bytes());
        }
        payload
    }

    #[test]
    fn starts_at_wait_for_capabilities_after_first_tick() {
        let mut port = Port::new();
        let tcpc = FakeTcpc::new();
        let mut prl = Prl::new();
        let mut pe = PolicyEngine::new(DefaultDpm);

        pe.tick(&mut port, &tcpc, &mut prl, &[]);
        assert!(matches!(pe.state, State::WaitForCapabilities));
    }

    #[test]
    fn hard_resets_after_wait_for_capabilities_timeout() {
        let mut port = Port::new();
        let tcpc = FakeTcpc::new();
        let mut prl = Prl::new();
        let mut pe = PolicyEngine::new(DefaultDpm);

        pe.tick(&mut port, &tcpc, &mut prl, &[]);
        port.timers.set_time(1000);
        pe.tick(&mut port, &tcpc, &mut prl, &[]);
        assert!(matches!(pe.state, State::WaitHardResetSent));
        assert_eq!(port.hard_reset_counter, 1);
    }

    #[test]
    fn evaluates_capabilities_once_received() {
        use crate::protocol_layer::message::pdo::FixedSupply;

        let mut port = Port::new();
        let tcpc = FakeTcpc::new();
        let mut prl = Prl::new();
        let mut pe = PolicyEngine::new(DefaultDpm);
        pe.tick(&mut port, &tcpc, &mut prl, &[]);

        let vsafe5v = FixedSupply::default().with_raw_voltage(100).with_raw_max_current(300);
        let payload = caps_payload(&[vsafe5v.0]);
        let caps = SourceCapabilities::parse(&payload, 1);
        let header = Header::new_data(
            Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R3_X),
            0,
            DataMessageType::SourceCapabilities,
            1,
        );
        let message = Message::new_with_data(header, Data::SourceCapabilities(caps));

        pe.tick(&mut port, &tcpc, &mut prl, &[Event::MessageReceived(message)]);
        assert!(matches!(pe.state, State::SelectCapability { sent: true, .. }));
        assert!(port.source_caps.is_some());
    }

    fn vsafe5v_message(revision: SpecificationRevision, extra_pdos: &[u32]) -> Message {
        use crate::protocol_layer::message::pdo::FixedSupply;

        let vsafe5v = FixedSupply::default().with_raw_voltage(100).with_raw_max_current(300);
        let mut raw = heapless::Vec::<u32, 16>::new();
        let _ = raw.push(vsafe5v.0);
        for pdo in extra_pdos {
            let _ = raw.push(*pdo);
        }
        let payload = caps_payload(&raw);
        let caps = SourceCapabilities::parse(&payload, raw.len());
        let header = Header::new_data(
            Header::new_template(DataRole::Ufp, PowerRole::Sink, revision),
            0,
            DataMessageType::SourceCapabilities,
            raw.len() as u8,
        );
        Message::new_with_data(header, Data::SourceCapabilities(caps))
    }

    /// A `Ready` port with an accepted SPR contract on the vSafe5V PDO,
    /// matching what every new responder state requires to run.
    fn ready_port_with_contract() -> Port {
        use crate::protocol_layer::message::pdo::FixedSupply as FixedSupplyPdo;

        let mut port = Port::new();
        port.pe_flags.set_flag(PeFlag::HasExplicitContract);
        let vsafe5v = FixedSupplyPdo::default().with_raw_voltage(100).with_raw_max_current(300);
        let payload = caps_payload(&[vsafe5v.0]);
        port.source_caps = Some(SourceCapabilities::parse(&payload, 1));
        port
    }

    fn vsafe5v_power_source() -> PowerSource {
        use crate::protocol_layer::message::request::FixedSupply as FixedSupplyRdo;
        PowerSource::FixedSupply(FixedSupplyRdo(0).with_object_position(1))
    }

    #[test]
    fn negotiates_revision_down_to_a_rev2_partner() {
        let mut port = Port::new();
        let tcpc = FakeTcpc::new();
        let mut prl = Prl::new();
        let mut pe = PolicyEngine::new(DefaultDpm);
        pe.tick(&mut port, &tcpc, &mut prl, &[]);

        let message = vsafe5v_message(SpecificationRevision::R2_0, &[]);
        pe.tick(&mut port, &tcpc, &mut prl, &[Event::MessageReceived(message)]);

        assert_eq!(port.revision, u8::from(SpecificationRevision::R2_0));
    }

    #[test]
    fn truncates_source_capabilities_to_seven_objects_outside_epr() {
        let mut port = Port::new();
        let tcpc = FakeTcpc::new();
        let mut prl = Prl::new();
        let mut pe = PolicyEngine::new(DefaultDpm);
        pe.tick(&mut port, &tcpc, &mut prl, &[]);

        use crate::protocol_layer::message::pdo::FixedSupply;
        let mut extra: heapless::Vec<u32, 8> = heapless::Vec::new();
        for step in 1u16..8u16 {
            let _ = extra.push(FixedSupply::default().with_raw_voltage(100 + step * 20).0);
        }
        let message = vsafe5v_message(SpecificationRevision::R3_X, &extra);
        pe.tick(&mut port, &tcpc, &mut prl, &[Event::MessageReceived(message)]);

        assert_eq!(port.source_caps.as_ref().unwrap().pdos().len(), MAX_PDO_OBJECTS_SPR);
    }

    #[test]
    fn replies_to_get_revision_with_give_revision() {
        let mut port = ready_port_with_contract();
        let tcpc = FakeTcpc::new();
        let mut prl = Prl::new();
        let mut pe = PolicyEngine::new(DefaultDpm);
        let power_source = vsafe5v_power_source();
        pe.state = State::Ready {
            power_source,
            after_wait: false,
        };

        let header = Header::new_control(
            Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R3_X),
            0,
            ControlMessageType::GetRevision,
        );
        let message = Message::new(header);
        pe.tick(&mut port, &tcpc, &mut prl, &[Event::MessageReceived(message)]);

        assert!(matches!(pe.state, State::GiveRevision { sent: true, .. }));
    }

    #[test]
    fn bist_carrier_mode_drives_the_tcpc_and_hard_resets_after_timeout() {
        let mut port = ready_port_with_contract();
        let tcpc = FakeTcpc::new();
        let mut prl = Prl::new();
        let mut pe = PolicyEngine::new(DefaultDpm);
        let power_source = vsafe5v_power_source();
        pe.state = State::Ready {
            power_source,
            after_wait: false,
        };

        let header = Header::new_data(
            Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R3_X),
            0,
            DataMessageType::Bist,
            1,
        );
        let message = Message::new_with_data(header, Data::Bist(BistDataMode::CarrierMode2));
        pe.tick(&mut port, &tcpc, &mut prl, &[Event::MessageReceived(message)]);
        assert!(matches!(pe.state, State::BistActivate { sent: true, .. }));

        // `FakeTcpc::req_set_bist` applies instantly, so the next pass sees it done.
        pe.tick(&mut port, &tcpc, &mut prl, &[]);
        assert!(matches!(pe.state, State::BistCarrierMode { sent: true, .. }));

        port.timers.set_time(10_000);
        pe.tick(&mut port, &tcpc, &mut prl, &[]);
        // `TransitionToDefault` cascades straight through `Startup`/`Discovery`
        // to `WaitForCapabilities`, same as any other hard reset path.
        assert!(matches!(pe.state, State::WaitForCapabilities));
    }

    #[test]
    fn rejects_vendor_defined_messages_above_rev2() {
        let mut port = ready_port_with_contract();
        port.revision = u8::from(SpecificationRevision::R3_X);
        let tcpc = FakeTcpc::new();
        let mut prl = Prl::new();
        let mut pe = PolicyEngine::new(DefaultDpm);
        let power_source = vsafe5v_power_source();
        pe.state = State::Ready {
            power_source,
            after_wait: false,
        };

        let header = Header::new_data(
            Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R3_X),
            0,
            DataMessageType::VendorDefined,
            1,
        );
        let message = Message::new_with_data(header, Data::Unknown);
        pe.tick(&mut port, &tcpc, &mut prl, &[Event::MessageReceived(message)]);

        assert!(matches!(pe.state, State::SendReject { sent: true, .. }));
    }

    #[test]
    fn ignores_vendor_defined_messages_under_rev2() {
        let mut port = ready_port_with_contract();
        port.revision = u8::from(SpecificationRevision::R2_0);
        let tcpc = FakeTcpc::new();
        let mut prl = Prl::new();
        let mut pe = PolicyEngine::new(DefaultDpm);
        let power_source = vsafe5v_power_source();
        pe.state = State::Ready {
            power_source,
            after_wait: false,
        };

        let header = Header::new_data(
            Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R2_0),
            0,
            DataMessageType::VendorDefined,
            1,
        );
        let message = Message::new_with_data(header, Data::Unknown);
        pe.tick(&mut port, &tcpc, &mut prl, &[Event::MessageReceived(message)]);

        assert!(matches!(pe.state, State::Ready { .. }));
    }

    #[test]
    fn an_interrupted_ams_requests_a_soft_reset_from_ready_instead_of_hard_resetting() {
        let mut port = ready_port_with_contract();
        let tcpc = FakeTcpc::new();
        let mut prl = Prl::new();
        let mut pe = PolicyEngine::new(DefaultDpm);
        let power_source = vsafe5v_power_source();
        pe.state = State::Ready {
            power_source,
            after_wait: false,
        };
        port.pe_flags.set_flag(PeFlag::AmsActive);

        pe.tick(&mut port, &tcpc, &mut prl, &[Event::Error(PrlError::TchSendFail)]);

        assert!(matches!(pe.state, State::Ready { .. }));
        assert!(port.pe_flags.test_flag(PeFlag::DoSoftResetOnUnsupported));
    }

    /// A Device Policy Manager with a configured EPR AVS sink PDO, for
    /// exercising the PE's own EPR auto-upgrade path.
    struct EprCapableDpm {
        pdos: [u32; 1],
    }

    impl DevicePolicyManager for EprCapableDpm {
        fn sink_capabilities(&self) -> &[u32] {
            &self.pdos
        }
    }

    #[test]
    fn enter_ready_volunteers_epr_mode_entry_for_an_epr_capable_source() {
        use crate::protocol_layer::message::pdo::{EprAdjustableVoltageSupply, FixedSupply};

        let mut port = Port::new();
        let vsafe5v = FixedSupply::default()
            .with_raw_voltage(100)
            .with_raw_max_current(300)
            .with_epr_mode_capable(true);
        let payload = caps_payload(&[vsafe5v.0]);
        port.source_caps = Some(SourceCapabilities::parse(&payload, 1));

        let tcpc = FakeTcpc::new();
        let mut prl = Prl::new();
        let sink_pdo = EprAdjustableVoltageSupply::default().with_raw_pd_power(30);
        let mut pe = PolicyEngine::new(EprCapableDpm { pdos: [sink_pdo.0] });
        let power_source = vsafe5v_power_source();
        pe.state = State::Ready {
            power_source,
            after_wait: false,
        };

        pe.tick(&mut port, &tcpc, &mut prl, &[]);

        assert!(matches!(pe.state, State::EprModeEntry { pdp_watts: 30, .. }));
    }
}
