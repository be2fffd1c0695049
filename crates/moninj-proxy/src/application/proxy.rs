//! The proxy bridge: one device link in, any number of subscribers out.
//!
//! [`MonInjProxy`] owns the canonical state tree (through the change-tracked
//! notifier) and is the only place that mutates it.  Infrastructure tasks
//! (device link reader, upstream subscriber) never touch the tree directly;
//! they emit [`ProxyEvent`]s that the binary's single event loop feeds into
//! [`MonInjProxy::handle_event`], so every mutation runs to completion before
//! the next is applied and diff order equals event order.
//!
//! Forwarding RPCs go the other way: they drop the command into the
//! [`DeviceHandle`], which is a silent no-op while no device link is
//! established.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use moninj_core::{ConnectionSide, DeviceCommand, DeviceEvent, Notifier, SyncOp, WakeHandle};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the infrastructure reports into the event loop.
#[derive(Debug)]
pub enum ProxyEvent {
    /// Device link handshake completed; commands can flow.
    DeviceUp,
    /// The device link died unexpectedly (EOF or read error).  Deliberate
    /// teardown by the reconnector does not produce this event.
    DeviceGone,
    /// One decoded device→host frame.
    Device(DeviceEvent),
    /// Upstream subscription delivered its configuration snapshot.
    UpstreamUp,
    /// The upstream subscription died unexpectedly.
    UpstreamGone,
    /// The configuration tree changed; carries the freshly extracted device
    /// host (`None` when the tree no longer names one).
    ConfigChanged { device_host: Option<String> },
}

/// Write-side slot for the active device link.
///
/// The device link adapter installs its command sender after a successful
/// handshake and clears it on teardown.  Forwarding calls made while the slot
/// is empty are dropped without error.
#[derive(Default)]
pub struct DeviceHandle {
    tx: Mutex<Option<mpsc::UnboundedSender<DeviceCommand>>>,
}

impl DeviceHandle {
    pub fn install(&self, tx: mpsc::UnboundedSender<DeviceCommand>) {
        *lock(&self.tx) = Some(tx);
    }

    pub fn clear(&self) {
        lock(&self.tx).take();
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.tx).is_some()
    }

    /// Forwards `cmd` to the link writer, or drops it silently when no link
    /// is established.  A closed writer clears the slot.
    pub fn send(&self, cmd: DeviceCommand) {
        let mut guard = lock(&self.tx);
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(cmd).is_err() {
                    debug!("device link writer gone, clearing handle");
                    *guard = None;
                }
            }
            None => debug!(?cmd, "device link down, dropping command"),
        }
    }
}

/// Coarse health classification returned by the `healthy` RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    /// Names of the links currently down; empty when healthy.
    pub degraded: Vec<&'static str>,
}

/// The authoritative bridge between the device link and the published tree.
pub struct MonInjProxy {
    notifier: Mutex<Notifier>,
    device: std::sync::Arc<DeviceHandle>,
    device_host: Mutex<Option<String>>,
}

impl MonInjProxy {
    pub fn new(device: std::sync::Arc<DeviceHandle>) -> Self {
        Self {
            notifier: Mutex::new(Notifier::new()),
            device,
            device_host: Mutex::new(None),
        }
    }

    // ── Event loop input ──────────────────────────────────────────────────────

    /// Applies one infrastructure event to the canonical tree.
    ///
    /// `device_wake` and `upstream_wake` signal the respective reconnectors;
    /// they are parameters rather than fields so the event loop stays the
    /// single owner of reconnection policy.
    pub fn handle_event(
        &self,
        event: ProxyEvent,
        device_wake: &WakeHandle,
        upstream_wake: &WakeHandle,
    ) {
        match event {
            ProxyEvent::DeviceUp => {
                lock(&self.notifier).set_connection(ConnectionSide::DeviceLink, true);
            }
            ProxyEvent::DeviceGone => {
                self.device.clear();
                lock(&self.notifier).set_connection(ConnectionSide::DeviceLink, false);
                device_wake.wake();
            }
            ProxyEvent::Device(DeviceEvent::Monitor { channel, probe, value }) => {
                lock(&self.notifier).set_monitor(channel, probe, value);
            }
            ProxyEvent::Device(DeviceEvent::InjectionStatus { channel, overrd, value }) => {
                lock(&self.notifier).set_injection_status(channel, overrd, value);
            }
            ProxyEvent::UpstreamUp => {
                lock(&self.notifier).set_connection(ConnectionSide::Upstream, true);
            }
            ProxyEvent::UpstreamGone => {
                lock(&self.notifier).set_connection(ConnectionSide::Upstream, false);
                upstream_wake.wake();
            }
            ProxyEvent::ConfigChanged { device_host } => {
                let mut current = lock(&self.device_host);
                if *current != device_host {
                    info!(host = ?device_host, "device endpoint changed, reconnecting");
                    *current = device_host;
                    drop(current);
                    device_wake.wake();
                }
            }
        }
    }

    /// Current device host, as last extracted from the configuration tree.
    pub fn device_host(&self) -> Option<String> {
        lock(&self.device_host).clone()
    }

    // ── Subscriber surface (used by the publisher) ────────────────────────────

    /// Attaches a sync subscriber; the receiver yields `init` then diffs.
    pub fn attach_subscriber(&self) -> (Uuid, mpsc::UnboundedReceiver<SyncOp>) {
        lock(&self.notifier).attach()
    }

    pub fn detach_subscriber(&self, id: Uuid) {
        lock(&self.notifier).detach(id);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.notifier).subscriber_count()
    }

    // ── Forwarding RPCs (used by the RPC server) ──────────────────────────────

    pub fn monitor_probe(&self, enable: bool, channel: u32, probe: u8) {
        self.device.send(DeviceCommand::MonitorProbe { enable, channel, probe });
    }

    pub fn monitor_injection(&self, enable: bool, channel: u32, overrd: u8) {
        self.device.send(DeviceCommand::MonitorInjection { enable, channel, overrd });
    }

    pub fn inject(&self, channel: u32, overrd: u8, value: i8) {
        self.device.send(DeviceCommand::Inject { channel, overrd, value });
    }

    pub fn get_injection_status(&self, channel: u32, overrd: u8) {
        self.device.send(DeviceCommand::GetInjectionStatus { channel, overrd });
    }

    /// Non-blocking health classification over the two link flags.
    pub fn healthy(&self) -> HealthReport {
        let connection = lock(&self.notifier).tree().connection;
        let mut degraded = Vec::new();
        if !connection.device_link {
            degraded.push(ConnectionSide::DeviceLink.key());
        }
        if !connection.upstream {
            degraded.push(ConnectionSide::Upstream.key());
        }
        HealthReport { healthy: degraded.is_empty(), degraded }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn proxy_with_wakes() -> (MonInjProxy, WakeRx, WakeRx) {
        let proxy = MonInjProxy::new(Arc::new(DeviceHandle::default()));
        (proxy, WakeRx::new(), WakeRx::new())
    }

    struct WakeRx {
        handle: WakeHandle,
        rx: tokio::sync::mpsc::Receiver<()>,
    }

    impl WakeRx {
        fn new() -> Self {
            let (handle, rx) = WakeHandle::pair();
            Self { handle, rx }
        }

        fn signalled(&mut self) -> bool {
            self.rx.try_recv().is_ok()
        }
    }

    #[test]
    fn test_device_event_updates_monitor_region() {
        let (proxy, mut dev, mut up) = proxy_with_wakes();
        let (_, mut sub) = proxy.attach_subscriber();
        sub.try_recv().expect("init");

        proxy.handle_event(
            ProxyEvent::Device(DeviceEvent::Monitor { channel: 5, probe: 0, value: 1 }),
            &dev.handle,
            &up.handle,
        );

        match sub.try_recv().expect("setitem") {
            SyncOp::SetItem { path, key, value } => {
                assert_eq!(path, vec![serde_json::json!("monitor"), serde_json::json!(5)]);
                assert_eq!(key, serde_json::json!(0));
                assert_eq!(value, serde_json::json!(1));
            }
            other => panic!("unexpected op {other:?}"),
        }
        assert!(!dev.signalled());
        assert!(!up.signalled());
    }

    #[test]
    fn test_device_gone_clears_handle_and_wakes_reconnector() {
        let device = Arc::new(DeviceHandle::default());
        let proxy = MonInjProxy::new(Arc::clone(&device));
        let (mut dev, mut up) = (WakeRx::new(), WakeRx::new());

        let (tx, _rx) = mpsc::unbounded_channel();
        device.install(tx);
        assert!(device.is_attached());

        proxy.handle_event(ProxyEvent::DeviceGone, &dev.handle, &up.handle);

        assert!(!device.is_attached());
        assert!(dev.signalled());
        assert!(!up.signalled());
        assert!(!proxy.healthy().healthy);
    }

    #[test]
    fn test_config_change_wakes_only_when_host_differs() {
        let (proxy, mut dev, up) = proxy_with_wakes();

        let ev = || ProxyEvent::ConfigChanged { device_host: Some("kasli-1".to_owned()) };
        proxy.handle_event(ev(), &dev.handle, &up.handle);
        assert!(dev.signalled());
        assert_eq!(proxy.device_host().as_deref(), Some("kasli-1"));

        proxy.handle_event(ev(), &dev.handle, &up.handle);
        assert!(!dev.signalled(), "identical host must not trigger a reconnect");

        proxy.handle_event(
            ProxyEvent::ConfigChanged { device_host: None },
            &dev.handle,
            &up.handle,
        );
        assert!(dev.signalled());
        assert_eq!(proxy.device_host(), None);
    }

    #[test]
    fn test_forwarding_without_device_link_is_silent_noop() {
        let (proxy, _dev, _up) = proxy_with_wakes();

        // No link installed: must return immediately without error.
        proxy.monitor_probe(true, 5, 0);
        proxy.inject(5, 0, -1);
    }

    #[test]
    fn test_forwarding_reaches_installed_link_in_order() {
        let device = Arc::new(DeviceHandle::default());
        let proxy = MonInjProxy::new(Arc::clone(&device));
        let (tx, mut rx) = mpsc::unbounded_channel();
        device.install(tx);

        proxy.monitor_probe(true, 3, 0);
        proxy.monitor_injection(true, 3, 1);
        proxy.get_injection_status(3, 0);

        assert_eq!(
            rx.try_recv().expect("first"),
            DeviceCommand::MonitorProbe { enable: true, channel: 3, probe: 0 }
        );
        assert_eq!(
            rx.try_recv().expect("second"),
            DeviceCommand::MonitorInjection { enable: true, channel: 3, overrd: 1 }
        );
        assert_eq!(
            rx.try_recv().expect("third"),
            DeviceCommand::GetInjectionStatus { channel: 3, overrd: 0 }
        );
    }

    #[test]
    fn test_healthy_lists_degraded_links() {
        let (proxy, dev, up) = proxy_with_wakes();
        assert_eq!(proxy.healthy().degraded, vec!["device_link", "upstream"]);

        proxy.handle_event(ProxyEvent::DeviceUp, &dev.handle, &up.handle);
        proxy.handle_event(ProxyEvent::UpstreamUp, &dev.handle, &up.handle);
        let report = proxy.healthy();
        assert!(report.healthy);
        assert!(report.degraded.is_empty());

        proxy.handle_event(ProxyEvent::UpstreamGone, &dev.handle, &up.handle);
        assert_eq!(proxy.healthy().degraded, vec!["upstream"]);
    }
}
