//! The task loop: one cooperative entry point that drives attach detection,
//! the Protocol Layer and the Policy Engine forward from whatever woke it.
//!
//! Grounded on the reference's `Sink::run` loop, restructured from an
//! `async fn` that `.await`s each sub-layer in turn into an explicit
//! re-entrant `poll`: there is no executor to suspend into, so a single pass
//! drives every component once and loops only while a wakeup was requested
//! from inside that same pass (e.g. a DPM callback reacting to a
//! notification by raising a new request).

use usbpd_traits::Tcpc;

use crate::port::Port;
use crate::protocol_layer::Prl;
use crate::sink::device_policy_manager::{DevicePolicyManager, Notification};
use crate::sink::policy_engine::PolicyEngine;
use crate::tc::{AttachEvent, Tc};
use crate::timers::NO_EXPIRE;

/// Ties a [`Tc`] attach detector, a [`Prl`], a [`PolicyEngine`] and an
/// application-supplied [`DevicePolicyManager`] to a concrete [`Tcpc`]
/// driver, polling all of them forward from one task loop with no executor
/// and no heap.
pub struct PdStack<T: Tcpc, DPM: DevicePolicyManager> {
    tcpc: T,
    port: Port,
    tc: Tc,
    prl: Prl,
    pe: PolicyEngine<DPM>,
    running: bool,
    wakeup_pending: bool,
}

impl<T: Tcpc, DPM: DevicePolicyManager> PdStack<T, DPM> {
    /// Wire a driver and a Device Policy Manager into a fresh stack, with
    /// the Type-C detector in `Detached` and the Policy Engine in `Startup`.
    pub fn new(tcpc: T, device_policy_manager: DPM) -> Self {
        Self {
            tcpc,
            port: Port::new(),
            tc: Tc::new(),
            prl: Prl::new(),
            pe: PolicyEngine::new(device_policy_manager),
            running: false,
            wakeup_pending: false,
        }
    }

    /// The shared port state, for diagnostics or test assertions.
    pub fn port(&self) -> &Port {
        &self.port
    }

    /// Drive one task pass at timestamp `now_ms`: advance the shared clock,
    /// clean up expired timers, then run TC, the Protocol Layer and the
    /// Policy Engine in that fixed order.
    ///
    /// Call this once per `EVENT_WAKEUP`/`EVENT_TIMER` the driver raises.
    /// If this pass is already in progress (reached re-entrantly from a DPM
    /// callback invoked by one of the components below), the call is
    /// deferred: a flag is set so the in-progress pass repeats once more
    /// before returning, instead of recursing.
    pub fn poll(&mut self, now_ms: u32) {
        if self.running {
            self.wakeup_pending = true;
            return;
        }

        self.running = true;
        self.port.timers.set_time(now_ms);
        loop {
            self.wakeup_pending = false;
            self.port.timers.cleanup();

            if let Some(event) = self.tc.tick(&mut self.port, &self.tcpc) {
                let notification = match event {
                    AttachEvent::Attached(_) => Notification::CableAttached,
                    AttachEvent::Detached => Notification::CableDetached,
                };
                self.pe.device_policy_manager_mut().notify(notification);
            }

            let events = self.prl.tick(&mut self.port, &self.tcpc);
            self.pe.tick(&mut self.port, &self.tcpc, &mut self.prl, &events);

            if self.tcpc.is_rearm_supported() {
                match self.port.timers.get_next_expiration() {
                    NO_EXPIRE => {}
                    0 => self.wakeup_pending = true,
                    delay_ms => self.tcpc.rearm(delay_ms as u32),
                }
            }

            if !self.wakeup_pending {
                break;
            }
        }
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::device_policy_manager::DefaultDpm;
    use crate::testing::FakeTcpc;

    #[test]
    fn starts_detached_and_waits_on_capabilities_after_attach() {
        let tcpc = FakeTcpc::new();
        tcpc.set_vbus_ok(true);
        let mut stack = PdStack::new(tcpc, DefaultDpm);

        // VBUS debounce, then CC scan must complete before attach.
        for now in [0u32, 100, 120] {
            stack.poll(now);
        }
        assert!(!stack.port().attached);
    }

    #[test]
    fn a_reentrant_poll_is_deferred_not_recursed() {
        let tcpc = FakeTcpc::new();
        let mut stack = PdStack::new(tcpc, DefaultDpm);
        stack.running = true;
        stack.poll(0);
        assert!(stack.wakeup_pending, "a poll while already running must defer, not recurse");
        stack.running = false;
        stack.wakeup_pending = false;
    }
}
