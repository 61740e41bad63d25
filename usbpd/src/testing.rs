//! Fakes for exercising the stack without real hardware.
//!
//! Grounded on the [`usbpd_traits::Tcpc`] request/poll contract: every
//! `req_*`/`is_*_done` pair is satisfied synchronously here, since there is
//! no interrupt boundary to cross in a test. [`FakeTcpc`] does not drive
//! `Port::tcpc_tx_status` itself (a real driver writes that from interrupt
//! context against the instance the task handed it); tests that need a
//! transmission to complete set it directly.
//!
//! [`FakeDpm`] plays the role of the teacher's `DummySinkDevice`: a
//! [`DevicePolicyManager`] with a scripted `select_request` answer and a
//! queue of outbound [`Event`]s, recording every [`Notification`] it
//! receives for a test to assert against afterwards.

use core::cell::{Cell, RefCell};

use heapless::{Deque, Vec};
use usbpd_traits::{BistMode, CcLevel, HwFeatures, Polarity, Tcpc};

use crate::protocol_layer::message::pdo::SourceCapabilities;
use crate::protocol_layer::message::request::{CurrentRequest, PowerSource, VoltageRequest};
use crate::sink::device_policy_manager::{DevicePolicyManager, Event, Notification};

/// Maximum number of queued inbound packets / captured outbound packets.
const FAKE_QUEUE_DEPTH: usize = 8;

/// An in-memory [`Tcpc`] double. Queue inbound packets with
/// [`FakeTcpc::push_rx`]; inspect outbound ones via [`FakeTcpc::take_tx`].
pub struct FakeTcpc {
    now: Cell<u32>,
    vbus_ok: Cell<bool>,
    cc_scan_result: Cell<Option<(CcLevel, CcLevel)>>,
    active_cc_result: Cell<Option<CcLevel>>,
    polarity_done: Cell<bool>,
    rx_enable_done: Cell<bool>,
    bist_done: Cell<bool>,
    hr_send_done: Cell<bool>,
    rx_queue: RefCell<Deque<([u8; 28], usize), FAKE_QUEUE_DEPTH>>,
    tx_log: RefCell<Vec<([u8; 28], usize), FAKE_QUEUE_DEPTH>>,
    hw_features: HwFeatures,
}

impl Default for FakeTcpc {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTcpc {
    /// A fake PHY with VBUS present and every poll-able request settling
    /// immediately, ready for a test to drive one tick at a time.
    pub fn new() -> Self {
        Self {
            now: Cell::new(0),
            vbus_ok: Cell::new(true),
            cc_scan_result: Cell::new(None),
            active_cc_result: Cell::new(None),
            polarity_done: Cell::new(false),
            rx_enable_done: Cell::new(false),
            bist_done: Cell::new(false),
            hr_send_done: Cell::new(false),
            rx_queue: RefCell::new(Deque::new()),
            tx_log: RefCell::new(Vec::new()),
            hw_features: HwFeatures {
                has_auto_good_crc_rx: true,
                has_auto_good_crc_check: true,
                has_auto_retry: false,
            },
        }
    }

    /// Advance the fake PHY's monotonic clock.
    pub fn set_time(&self, now: u32) {
        self.now.set(now);
    }

    /// Control the cheap synchronous VBUS gate.
    pub fn set_vbus_ok(&self, ok: bool) {
        self.vbus_ok.set(ok);
    }

    /// Stage an inbound packet for the next `fetch_rx_data` call.
    pub fn push_rx(&self, data: &[u8]) {
        let mut buf = [0u8; 28];
        buf[..data.len()].copy_from_slice(data);
        let _ = self.rx_queue.borrow_mut().push_back((buf, data.len()));
    }

    /// Drain every packet handed to [`Tcpc::req_transmit`] since the last call.
    pub fn take_tx(&self) -> Vec<([u8; 28], usize), FAKE_QUEUE_DEPTH> {
        core::mem::take(&mut *self.tx_log.borrow_mut())
    }
}

impl Tcpc for FakeTcpc {
    fn req_scan_cc(&self) {}

    fn try_scan_cc_result(&self) -> Option<(CcLevel, CcLevel)> {
        self.cc_scan_result.take()
    }

    fn req_active_cc(&self) {}

    fn try_active_cc_result(&self) -> Option<CcLevel> {
        self.active_cc_result.take()
    }

    fn is_vbus_ok(&self) -> bool {
        self.vbus_ok.get()
    }

    fn req_set_polarity(&self, _polarity: Polarity) {
        self.polarity_done.set(true);
    }

    fn is_set_polarity_done(&self) -> bool {
        self.polarity_done.take()
    }

    fn req_rx_enable(&self, _enable: bool) {
        self.rx_enable_done.set(true);
    }

    fn is_rx_enable_done(&self) -> bool {
        self.rx_enable_done.take()
    }

    fn fetch_rx_data(&self, buf: &mut [u8; 28]) -> Option<usize> {
        let (data, len) = self.rx_queue.borrow_mut().pop_front()?;
        *buf = data;
        Some(len)
    }

    fn req_transmit(&self, buf: &[u8; 28], len: usize) {
        let _ = self.tx_log.borrow_mut().push((*buf, len));
    }

    fn req_set_bist(&self, _mode: BistMode) {
        self.bist_done.set(true);
    }

    fn is_set_bist_done(&self) -> bool {
        self.bist_done.take()
    }

    fn req_hr_send(&self) {
        self.hr_send_done.set(true);
    }

    fn is_hr_send_done(&self) -> bool {
        self.hr_send_done.take()
    }

    fn get_hw_features(&self) -> HwFeatures {
        self.hw_features
    }

    fn now_ms(&self) -> u32 {
        self.now.get()
    }
}

/// Maximum number of scripted outbound events / recorded notifications.
const FAKE_DPM_LOG_DEPTH: usize = 8;

/// A [`DevicePolicyManager`] whose answers are scripted by the test, with
/// every [`Notification`] it receives recorded for later inspection.
///
/// Defaults to the mandatory vSafe5V baseline and never raises a request of
/// its own, matching [`crate::sink::device_policy_manager::DefaultDpm`];
/// call [`FakeDpm::queue_event`] / [`FakeDpm::set_sink_capabilities`] to
/// script a more interesting scenario.
pub struct FakeDpm {
    sink_capabilities: Vec<u32, 11>,
    events: RefCell<Deque<Event, FAKE_DPM_LOG_DEPTH>>,
    notifications: RefCell<Vec<Notification, FAKE_DPM_LOG_DEPTH>>,
}

impl Default for FakeDpm {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDpm {
    pub fn new() -> Self {
        Self {
            sink_capabilities: Vec::new(),
            events: RefCell::new(Deque::new()),
            notifications: RefCell::new(Vec::new()),
        }
    }

    /// Queue an [`Event`] to be returned from the next [`DevicePolicyManager::poll_event`] call.
    pub fn queue_event(&self, event: Event) {
        let _ = self.events.borrow_mut().push_back(event);
    }

    /// Script the PDO list [`DevicePolicyManager::sink_capabilities`] reports.
    pub fn set_sink_capabilities(&mut self, pdos: &[u32]) {
        self.sink_capabilities.clear();
        for pdo in pdos {
            let _ = self.sink_capabilities.push(*pdo);
        }
    }

    /// Every [`Notification`] received so far, oldest first.
    pub fn notifications(&self) -> Vec<Notification, FAKE_DPM_LOG_DEPTH> {
        self.notifications.borrow().clone()
    }
}

impl DevicePolicyManager for FakeDpm {
    fn select_request(&mut self, source_capabilities: &SourceCapabilities) -> PowerSource {
        PowerSource::new_fixed(CurrentRequest::Highest, VoltageRequest::Safe5V, source_capabilities)
            .unwrap_or(PowerSource::FixedSupply(Default::default()))
    }

    fn sink_capabilities(&self) -> &[u32] {
        &self.sink_capabilities
    }

    fn poll_event(&mut self, _source_capabilities: &SourceCapabilities) -> Option<Event> {
        self.events.borrow_mut().pop_front()
    }

    fn notify(&mut self, notification: Notification) {
        let _ = self.notifications.borrow_mut().push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_rx_data_returns_queued_packets_in_order() {
        let tcpc = FakeTcpc::new();
        tcpc.push_rx(&[1, 2, 3]);
        tcpc.push_rx(&[4, 5]);

        let mut buf = [0u8; 28];
        assert_eq!(tcpc.fetch_rx_data(&mut buf), Some(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(tcpc.fetch_rx_data(&mut buf), Some(2));
        assert_eq!(tcpc.fetch_rx_data(&mut buf), None);
    }

    #[test]
    fn req_transmit_is_captured_for_inspection() {
        let tcpc = FakeTcpc::new();
        let mut buf = [0u8; 28];
        buf[0] = 0xAA;
        tcpc.req_transmit(&buf, 6);

        let sent = tcpc.take_tx();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, 6);
        assert_eq!(sent[0].0[0], 0xAA);
        assert!(tcpc.take_tx().is_empty());
    }

    fn empty_caps() -> SourceCapabilities {
        SourceCapabilities::parse(&[], 0)
    }

    #[test]
    fn fake_dpm_replays_queued_events_in_order() {
        let mut dpm = FakeDpm::new();
        dpm.queue_event(Event::RequestSprSourceCapabilities);
        dpm.queue_event(Event::ExitEprMode);

        let caps = empty_caps();
        assert!(matches!(dpm.poll_event(&caps), Some(Event::RequestSprSourceCapabilities)));
        assert!(matches!(dpm.poll_event(&caps), Some(Event::ExitEprMode)));
        assert!(dpm.poll_event(&caps).is_none());
    }

    #[test]
    fn fake_dpm_records_notifications() {
        let mut dpm = FakeDpm::new();
        dpm.notify(Notification::Startup);
        dpm.notify(Notification::SnkReady);

        let log = dpm.notifications();
        assert_eq!(log.len(), 2);
        assert!(matches!(log[0], Notification::Startup));
        assert!(matches!(log[1], Notification::SnkReady));
    }

    #[test]
    fn fake_dpm_reports_scripted_sink_capabilities() {
        let mut dpm = FakeDpm::new();
        dpm.set_sink_capabilities(&[0x0001_912C]);
        assert_eq!(dpm.sink_capabilities(), &[0x0001_912C]);
    }
}
