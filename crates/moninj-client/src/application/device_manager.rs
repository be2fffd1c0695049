//! The client device manager.
//!
//! Consumes two operation streams — the upstream configuration tree and the
//! proxy's canonical state tree — from the binary's single event loop, and
//! keeps three things in lock-step with them:
//!
//! 1. the set of typed display objects (one per channel descriptor),
//! 2. the per-channel subscriptions on the proxy (enable/disable RPC
//!    sequences, order and pairing preserved),
//! 3. the proxy endpoint used by the proxy-link reconnector.
//!
//! Subscription calls go through the [`RpcSlot`] and are skipped while the
//! proxy link is down; local bookkeeping proceeds regardless, and every live
//! subscription is re-armed when the link comes back
//! ([`ClientEvent::ProxyConnected`]).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use moninj_core::protocol::messages::{synth, ttl};
use moninj_core::{
    reconcile, ChannelDescriptor, ChannelKind, ChannelUid, DeviceCommand, JsonMirror,
    MirrorUpdate, StateMirror, SyncOp, WakeHandle,
};

use crate::infrastructure::display::{
    DisplayBridge, DisplayField, DisplayHandle, DisplayKind, DisplaySpec, DisplayValue,
};
use crate::infrastructure::proxy_link::EndpointSlot;
use crate::infrastructure::rpc_client::RpcSlot;

/// Everything the infrastructure reports into the client event loop.
#[derive(Debug)]
pub enum ClientEvent {
    /// One operation from the upstream configuration stream.
    ConfigOp(SyncOp),
    /// The upstream subscription died unexpectedly.
    UpstreamGone,
    /// One operation from the proxy state stream.
    ProxyOp(SyncOp),
    /// Pubsub and RPC links to the proxy are both established; the snapshot
    /// is already queued ahead of this event as a `ProxyOp`.
    ProxyConnected,
    /// The proxy link died unexpectedly.
    ProxyGone,
}

/// Which typed field a `(channel, probe)` monitor reading feeds.
#[derive(Debug, Clone, Copy)]
enum ProbeTarget {
    DdsFrequency,
    DacValue,
    SynthRegister,
    SynthDataHigh,
    SynthDataLow,
}

struct Widget {
    handle: DisplayHandle,
    descriptor: ChannelDescriptor,
}

pub struct DeviceManager<B: DisplayBridge> {
    bridge: B,
    rpc: Arc<RpcSlot>,
    endpoint: Arc<EndpointSlot>,

    config: JsonMirror,
    mirror: StateMirror,
    descriptors: HashSet<ChannelDescriptor>,

    widgets: HashMap<ChannelUid, Widget>,
    // Routing indexes, maintained alongside `widgets`.
    ttl_channels: HashMap<u32, ChannelUid>,
    probe_targets: HashMap<(u32, u8), (ChannelUid, ProbeTarget)>,
    synth_buses: HashMap<u32, ChannelUid>,

    sysclk: f64,
}

impl<B: DisplayBridge> DeviceManager<B> {
    pub fn new(bridge: B, rpc: Arc<RpcSlot>, endpoint: Arc<EndpointSlot>) -> Self {
        Self {
            bridge,
            rpc,
            endpoint,
            config: JsonMirror::new(),
            mirror: StateMirror::new(),
            descriptors: HashSet::new(),
            widgets: HashMap::new(),
            ttl_channels: HashMap::new(),
            probe_targets: HashMap::new(),
            synth_buses: HashMap::new(),
            sysclk: 0.0,
        }
    }

    /// Applies one event.  Runs to completion before the loop schedules the
    /// next, so descriptor diffs and display updates never interleave.
    pub fn handle_event(
        &mut self,
        event: ClientEvent,
        upstream_wake: &WakeHandle,
        proxy_wake: &WakeHandle,
    ) {
        match event {
            ClientEvent::ConfigOp(op) => {
                if self.config.apply(op) {
                    self.apply_config(proxy_wake);
                }
            }
            ClientEvent::UpstreamGone => {
                warn!("lost upstream configuration subscription");
                upstream_wake.wake();
            }
            ClientEvent::ProxyOp(op) => match self.mirror.apply(op) {
                Some(MirrorUpdate::Reinitialized) => {
                    for update in self.mirror.replay() {
                        self.dispatch(update, proxy_wake);
                    }
                }
                Some(update) => self.dispatch(update, proxy_wake),
                None => {}
            },
            ClientEvent::ProxyConnected => {
                info!("connected to moninj proxy, re-arming subscriptions");
                for widget in self.widgets.values() {
                    Self::set_monitoring(&self.rpc, true, &widget.descriptor.kind);
                    self.bridge.update(
                        widget.handle,
                        DisplayField::Enabled,
                        DisplayValue::Bool(true),
                    );
                }
            }
            ClientEvent::ProxyGone => {
                warn!("lost connection to moninj proxy");
                self.rpc.clear();
                for widget in self.widgets.values() {
                    self.bridge.update(
                        widget.handle,
                        DisplayField::Enabled,
                        DisplayValue::Bool(false),
                    );
                }
                proxy_wake.wake();
            }
        }
    }

    // ── Configuration reconciliation ──────────────────────────────────────────

    fn apply_config(&mut self, proxy_wake: &WakeHandle) {
        let outcome = reconcile(self.config.tree());
        self.sysclk = outcome.sysclk.unwrap_or(0.0);

        if self.endpoint.replace(outcome.proxy) {
            info!("proxy endpoint changed, reconnecting");
            proxy_wake.wake();
        }

        let removed: Vec<ChannelDescriptor> =
            self.descriptors.difference(&outcome.descriptors).cloned().collect();
        let added: Vec<ChannelDescriptor> =
            outcome.descriptors.difference(&self.descriptors).cloned().collect();
        debug!(
            removed = removed.len(),
            added = added.len(),
            kept = self.descriptors.len() - removed.len(),
            "reconciled configuration"
        );

        for descriptor in removed {
            self.remove_channel(&descriptor);
        }
        for descriptor in added {
            self.add_channel(descriptor);
        }
        self.descriptors = outcome.descriptors;
    }

    fn add_channel(&mut self, descriptor: ChannelDescriptor) {
        let kind = match descriptor.kind {
            ChannelKind::Ttl { .. } => DisplayKind::Ttl,
            ChannelKind::Dds { .. } => DisplayKind::Dds,
            ChannelKind::Dac { .. } => DisplayKind::Dac,
            ChannelKind::Synth { .. } => DisplayKind::Synth,
        };
        let handle = self.bridge.create(
            kind,
            DisplaySpec {
                title: descriptor.uid.to_string(),
                comment: descriptor.comment.clone(),
            },
        );

        let uid = descriptor.uid.clone();
        match descriptor.kind {
            ChannelKind::Ttl { channel, .. } => {
                self.ttl_channels.insert(channel, uid.clone());
            }
            ChannelKind::Dds { bus_channel, channel } => {
                self.probe_targets
                    .insert((bus_channel, channel as u8), (uid.clone(), ProbeTarget::DdsFrequency));
            }
            ChannelKind::Dac { spi_channel, channel } => {
                self.probe_targets
                    .insert((spi_channel, channel as u8), (uid.clone(), ProbeTarget::DacValue));
            }
            ChannelKind::Synth { spi_channel, channel, .. } => {
                let base = channel as u8;
                self.probe_targets.insert(
                    (spi_channel, base + synth::PROBE_REG_OFFSET),
                    (uid.clone(), ProbeTarget::SynthRegister),
                );
                self.probe_targets.insert(
                    (spi_channel, base + synth::PROBE_DATA_HIGH_OFFSET),
                    (uid.clone(), ProbeTarget::SynthDataHigh),
                );
                self.probe_targets.insert(
                    (spi_channel, base + synth::PROBE_DATA_LOW_OFFSET),
                    (uid.clone(), ProbeTarget::SynthDataLow),
                );
                if channel == 0 {
                    self.synth_buses.insert(spi_channel, uid.clone());
                }
            }
        }

        Self::set_monitoring(&self.rpc, true, &descriptor.kind);
        self.widgets.insert(uid, Widget { handle, descriptor });
    }

    fn remove_channel(&mut self, descriptor: &ChannelDescriptor) {
        // Disable before discarding, mirroring the enable on add.
        Self::set_monitoring(&self.rpc, false, &descriptor.kind);

        match descriptor.kind {
            ChannelKind::Ttl { channel, .. } => {
                self.ttl_channels.remove(&channel);
            }
            ChannelKind::Dds { bus_channel, channel } => {
                self.probe_targets.remove(&(bus_channel, channel as u8));
            }
            ChannelKind::Dac { spi_channel, channel } => {
                self.probe_targets.remove(&(spi_channel, channel as u8));
            }
            ChannelKind::Synth { spi_channel, channel, .. } => {
                let base = channel as u8;
                self.probe_targets.remove(&(spi_channel, base + synth::PROBE_REG_OFFSET));
                self.probe_targets.remove(&(spi_channel, base + synth::PROBE_DATA_HIGH_OFFSET));
                self.probe_targets.remove(&(spi_channel, base + synth::PROBE_DATA_LOW_OFFSET));
                if channel == 0 {
                    self.synth_buses.remove(&spi_channel);
                }
            }
        }

        if let Some(widget) = self.widgets.remove(&descriptor.uid) {
            self.bridge.destroy(widget.handle);
        }
    }

    /// Issues one kind's enable or disable sequence.
    ///
    /// Calls are dropped by the slot while the link is down; the sequence
    /// order on the wire equals the call order here.
    fn set_monitoring(rpc: &RpcSlot, enable: bool, kind: &ChannelKind) {
        match *kind {
            ChannelKind::Ttl { channel, .. } => {
                rpc.send(DeviceCommand::MonitorProbe { enable, channel, probe: ttl::PROBE_LEVEL });
                rpc.send(DeviceCommand::MonitorProbe {
                    enable,
                    channel,
                    probe: ttl::PROBE_OUTPUT_ENABLE,
                });
                rpc.send(DeviceCommand::MonitorInjection {
                    enable,
                    channel,
                    overrd: ttl::OVERRIDE_ENABLE,
                });
                rpc.send(DeviceCommand::MonitorInjection {
                    enable,
                    channel,
                    overrd: ttl::OVERRIDE_LEVEL,
                });
                if enable {
                    rpc.send(DeviceCommand::GetInjectionStatus {
                        channel,
                        overrd: ttl::OVERRIDE_ENABLE,
                    });
                }
            }
            ChannelKind::Dds { bus_channel, channel } => {
                rpc.send(DeviceCommand::MonitorProbe {
                    enable,
                    channel: bus_channel,
                    probe: channel as u8,
                });
            }
            ChannelKind::Dac { spi_channel, channel } => {
                rpc.send(DeviceCommand::MonitorProbe {
                    enable,
                    channel: spi_channel,
                    probe: channel as u8,
                });
            }
            ChannelKind::Synth { spi_channel, channel, .. } => {
                let base = channel as u8;
                for offset in [
                    synth::PROBE_REG_OFFSET,
                    synth::PROBE_DATA_HIGH_OFFSET,
                    synth::PROBE_DATA_LOW_OFFSET,
                ] {
                    rpc.send(DeviceCommand::MonitorProbe {
                        enable,
                        channel: spi_channel,
                        probe: base + offset,
                    });
                }
                // Injection slots live on channel 0 of the physical device.
                if channel == 0 {
                    for overrd in synth::OVERRIDE_SLOTS {
                        rpc.send(DeviceCommand::MonitorInjection {
                            enable,
                            channel: spi_channel,
                            overrd,
                        });
                    }
                    if enable {
                        rpc.send(DeviceCommand::GetInjectionStatus {
                            channel: spi_channel,
                            overrd: synth::OVERRIDE_SLOTS[0],
                        });
                    }
                }
            }
        }
    }

    // ── State dispatch ────────────────────────────────────────────────────────

    fn dispatch(&mut self, update: MirrorUpdate, proxy_wake: &WakeHandle) {
        match update {
            MirrorUpdate::Reinitialized => {} // expanded by the caller
            MirrorUpdate::Monitor { channel, probe, value } => {
                if let Some(uid) = self.ttl_channels.get(&channel).cloned() {
                    match probe {
                        ttl::PROBE_LEVEL => {
                            self.update_widget(&uid, DisplayField::Level, bool_value(value));
                        }
                        ttl::PROBE_OUTPUT_ENABLE => {
                            self.update_widget(&uid, DisplayField::OutputEnable, bool_value(value));
                        }
                        _ => {}
                    }
                }
                if let Some((uid, target)) = self.probe_targets.get(&(channel, probe)).cloned() {
                    let (field, value) = match target {
                        ProbeTarget::DdsFrequency => (
                            DisplayField::Frequency,
                            DisplayValue::Float(value as f64 * self.sysclk / (1u64 << 32) as f64),
                        ),
                        ProbeTarget::DacValue => (DisplayField::Value, DisplayValue::Int(value)),
                        ProbeTarget::SynthRegister => {
                            (DisplayField::Register, DisplayValue::Int(value))
                        }
                        ProbeTarget::SynthDataHigh => {
                            (DisplayField::DataHigh, DisplayValue::Int(value))
                        }
                        ProbeTarget::SynthDataLow => {
                            (DisplayField::DataLow, DisplayValue::Int(value))
                        }
                    };
                    self.update_widget(&uid, field, value);
                }
            }
            MirrorUpdate::InjectionStatus { channel, overrd, value } => {
                if let Some(uid) = self.ttl_channels.get(&channel).cloned() {
                    match overrd {
                        ttl::OVERRIDE_ENABLE => {
                            self.update_widget(&uid, DisplayField::Override, bool_value(value.into()));
                        }
                        ttl::OVERRIDE_LEVEL => {
                            self.update_widget(
                                &uid,
                                DisplayField::OverrideLevel,
                                bool_value(value.into()),
                            );
                        }
                        _ => {}
                    }
                }
                if let Some(uid) = self.synth_buses.get(&channel).cloned() {
                    match overrd {
                        0 => self.update_widget(&uid, DisplayField::Override, bool_value(value.into())),
                        1 => self.update_widget(
                            &uid,
                            DisplayField::OverrideLevel,
                            bool_value(value.into()),
                        ),
                        _ => {}
                    }
                }
            }
            MirrorUpdate::Connectivity { side, up } => {
                if !up {
                    // The proxy lost one of its own links; reconnecting
                    // re-syncs our snapshot once it recovers.
                    warn!(side = ?side, "proxy reports a link down");
                    proxy_wake.wake();
                }
            }
        }
    }

    fn update_widget(&mut self, uid: &ChannelUid, field: DisplayField, value: DisplayValue) {
        if let Some(widget) = self.widgets.get(uid) {
            self.bridge.update(widget.handle, field, value);
        }
    }
}

fn bool_value(value: i64) -> DisplayValue {
    DisplayValue::Bool(value != 0)
}

/// The client event loop: applies events one at a time until every producer
/// is gone.
pub async fn run<B: DisplayBridge>(
    mut manager: DeviceManager<B>,
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    upstream_wake: WakeHandle,
    proxy_wake: WakeHandle,
) {
    while let Some(event) = events.recv().await {
        manager.handle_event(event, &upstream_wake, &proxy_wake);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::display::{ChannelDisplayBridge, DisplayCommand};
    use serde_json::json;

    struct Fixture {
        manager: DeviceManager<ChannelDisplayBridge>,
        displays: mpsc::UnboundedReceiver<DisplayCommand>,
        rpc_calls: mpsc::UnboundedReceiver<DeviceCommand>,
        endpoint: Arc<EndpointSlot>,
        upstream: WakeProbe,
        proxy: WakeProbe,
    }

    struct WakeProbe {
        handle: WakeHandle,
        rx: mpsc::Receiver<()>,
    }

    impl WakeProbe {
        fn new() -> Self {
            let (handle, rx) = WakeHandle::pair();
            Self { handle, rx }
        }

        fn signalled(&mut self) -> bool {
            self.rx.try_recv().is_ok()
        }
    }

    fn fixture() -> Fixture {
        let (bridge, displays) = ChannelDisplayBridge::new();
        let rpc = Arc::new(RpcSlot::default());
        let (tx, rpc_calls) = mpsc::unbounded_channel();
        rpc.install(tx);
        let endpoint = Arc::new(EndpointSlot::default());
        Fixture {
            manager: DeviceManager::new(bridge, rpc, Arc::clone(&endpoint)),
            displays,
            rpc_calls,
            endpoint,
            upstream: WakeProbe::new(),
            proxy: WakeProbe::new(),
        }
    }

    impl Fixture {
        fn config(&mut self, tree: serde_json::Value) {
            let op = SyncOp::Init { value: tree };
            self.manager.handle_event(
                ClientEvent::ConfigOp(op),
                &self.upstream.handle,
                &self.proxy.handle,
            );
        }

        fn proxy_op(&mut self, op: SyncOp) {
            self.manager.handle_event(
                ClientEvent::ProxyOp(op),
                &self.upstream.handle,
                &self.proxy.handle,
            );
        }

        fn drain_rpc(&mut self) -> Vec<DeviceCommand> {
            let mut calls = Vec::new();
            while let Ok(call) = self.rpc_calls.try_recv() {
                calls.push(call);
            }
            calls
        }

        fn drain_displays(&mut self) -> Vec<DisplayCommand> {
            let mut commands = Vec::new();
            while let Ok(command) = self.displays.try_recv() {
                commands.push(command);
            }
            commands
        }
    }

    fn ttl_config(channel: u32) -> serde_json::Value {
        json!({
            "ttl0": {"type": "local", "driver": "ttl_out",
                     "arguments": {"channel": channel}}
        })
    }

    #[test]
    fn test_ttl_enable_sequence_order_and_pairing() {
        let mut fx = fixture();
        fx.config(ttl_config(3));

        assert_eq!(
            fx.drain_rpc(),
            vec![
                DeviceCommand::MonitorProbe { enable: true, channel: 3, probe: 0 },
                DeviceCommand::MonitorProbe { enable: true, channel: 3, probe: 1 },
                DeviceCommand::MonitorInjection { enable: true, channel: 3, overrd: 0 },
                DeviceCommand::MonitorInjection { enable: true, channel: 3, overrd: 1 },
                DeviceCommand::GetInjectionStatus { channel: 3, overrd: 0 },
            ]
        );
        let displays = fx.drain_displays();
        assert!(matches!(
            displays[0],
            DisplayCommand::Create { kind: DisplayKind::Ttl, .. }
        ));
    }

    #[test]
    fn test_removed_channel_disables_without_status_query() {
        let mut fx = fixture();
        fx.config(ttl_config(3));
        fx.drain_rpc();
        fx.drain_displays();

        fx.config(json!({}));

        assert_eq!(
            fx.drain_rpc(),
            vec![
                DeviceCommand::MonitorProbe { enable: false, channel: 3, probe: 0 },
                DeviceCommand::MonitorProbe { enable: false, channel: 3, probe: 1 },
                DeviceCommand::MonitorInjection { enable: false, channel: 3, overrd: 0 },
                DeviceCommand::MonitorInjection { enable: false, channel: 3, overrd: 1 },
            ],
            "disable must not query injection status"
        );
        assert!(matches!(fx.drain_displays().as_slice(), [DisplayCommand::Destroy { .. }]));
    }

    #[test]
    fn test_unchanged_config_causes_no_churn() {
        let mut fx = fixture();
        fx.config(ttl_config(3));
        fx.drain_rpc();
        fx.drain_displays();

        // Re-applying an identical snapshot re-reconciles to the same set.
        fx.config(ttl_config(3));
        assert!(fx.drain_rpc().is_empty());
        assert!(fx.drain_displays().is_empty());
    }

    #[test]
    fn test_synth_sequence_monitors_injection_only_on_channel_zero() {
        let mut fx = fixture();
        fx.config(json!({
            "synth0": {"type": "local", "driver": "synth_a",
                       "arguments": {"cpld_device": "cpld0", "switch_device": "sw0",
                                      "chip_select": 4, "pll_n": 32}},
            "cpld0": {"type": "local", "driver": "cpld",
                      "arguments": {"ref_clock": 125e6, "spi_device": "spi0"}},
            "spi0": {"type": "local", "driver": "spi", "arguments": {"channel": 9}},
            "sw0": {"type": "local", "driver": "ttl_sw", "arguments": {"channel": 20}}
        }));

        assert_eq!(
            fx.drain_rpc(),
            vec![
                DeviceCommand::MonitorProbe { enable: true, channel: 9, probe: 0 },
                DeviceCommand::MonitorProbe { enable: true, channel: 9, probe: 4 },
                DeviceCommand::MonitorProbe { enable: true, channel: 9, probe: 8 },
                DeviceCommand::MonitorInjection { enable: true, channel: 9, overrd: 0 },
                DeviceCommand::MonitorInjection { enable: true, channel: 9, overrd: 1 },
                DeviceCommand::MonitorInjection { enable: true, channel: 9, overrd: 2 },
                DeviceCommand::GetInjectionStatus { channel: 9, overrd: 0 },
            ]
        );
    }

    #[test]
    fn test_synth_nonzero_channel_skips_injection_slots() {
        let mut fx = fixture();
        fx.config(json!({
            "synth1": {"type": "local", "driver": "synth_b",
                       "arguments": {"cpld_device": "cpld0", "switch_device": "sw0",
                                      "chip_select": 6, "pll_n": 32}},
            "cpld0": {"type": "local", "driver": "cpld",
                      "arguments": {"ref_clock": 125e6, "spi_device": "spi0"}},
            "spi0": {"type": "local", "driver": "spi", "arguments": {"channel": 9}},
            "sw0": {"type": "local", "driver": "ttl_sw", "arguments": {"channel": 20}}
        }));

        // chip_select 6 → channel 2: probes 2, 6, 10 and nothing else.
        assert_eq!(
            fx.drain_rpc(),
            vec![
                DeviceCommand::MonitorProbe { enable: true, channel: 9, probe: 2 },
                DeviceCommand::MonitorProbe { enable: true, channel: 9, probe: 6 },
                DeviceCommand::MonitorProbe { enable: true, channel: 9, probe: 10 },
            ]
        );
    }

    #[test]
    fn test_rpc_skipped_while_disconnected_then_rearmed_on_connect() {
        let mut fx = fixture();
        fx.manager.rpc.clear();

        fx.config(ttl_config(3));
        // Bookkeeping proceeded: the widget exists even though no call went
        // out.
        assert!(fx.drain_rpc().is_empty());
        assert!(matches!(fx.drain_displays().as_slice(), [DisplayCommand::Create { .. }]));

        // Link comes back: subscriptions are re-armed.
        let (tx, rpc_calls) = mpsc::unbounded_channel();
        fx.manager.rpc.install(tx);
        fx.rpc_calls = rpc_calls;
        fx.manager.handle_event(
            ClientEvent::ProxyConnected,
            &fx.upstream.handle,
            &fx.proxy.handle,
        );

        let calls = fx.drain_rpc();
        assert_eq!(calls.len(), 5);
        assert_eq!(
            calls[0],
            DeviceCommand::MonitorProbe { enable: true, channel: 3, probe: 0 }
        );
        assert!(matches!(
            fx.drain_displays().as_slice(),
            [DisplayCommand::Update { field: DisplayField::Enabled, .. }]
        ));
    }

    #[test]
    fn test_monitor_updates_route_to_typed_fields() {
        let mut fx = fixture();
        fx.config(json!({
            "ttl0": {"type": "local", "driver": "ttl_out", "arguments": {"channel": 3}},
            "dds0": {"type": "local", "driver": "dds",
                     "arguments": {"bus_channel": 27, "channel": 1, "sysclk": 4294967296.0}}
        }));
        fx.drain_rpc();
        fx.drain_displays();

        fx.proxy_op(SyncOp::SetItem {
            path: vec![json!("monitor"), json!(3)],
            key: json!(0),
            value: json!(1),
        });
        fx.proxy_op(SyncOp::SetItem {
            path: vec![json!("monitor"), json!(27)],
            key: json!(1),
            value: json!(1000),
        });

        let updates = fx.drain_displays();
        assert_eq!(updates.len(), 2);
        assert!(matches!(
            updates[0],
            DisplayCommand::Update {
                field: DisplayField::Level,
                value: DisplayValue::Bool(true),
                ..
            }
        ));
        // sysclk chosen so value * sysclk / 2^32 == value.
        assert!(matches!(
            updates[1],
            DisplayCommand::Update {
                field: DisplayField::Frequency,
                value: DisplayValue::Float(f),
                ..
            } if (f - 1000.0).abs() < 1e-9
        ));
    }

    #[test]
    fn test_injection_status_routes_to_override_fields() {
        let mut fx = fixture();
        fx.config(ttl_config(3));
        fx.drain_rpc();
        fx.drain_displays();

        fx.proxy_op(SyncOp::SetItem {
            path: vec![json!("injection_status"), json!(3)],
            key: json!(0),
            value: json!(1),
        });

        assert!(matches!(
            fx.drain_displays().as_slice(),
            [DisplayCommand::Update {
                field: DisplayField::Override,
                value: DisplayValue::Bool(true),
                ..
            }]
        ));
    }

    #[test]
    fn test_endpoint_change_wakes_proxy_reconnector() {
        let mut fx = fixture();
        fx.config(json!({
            "moninj": {"type": "controller", "host": "proxy.lab",
                       "pubsub_port": 2383, "rpc_port": 2384}
        }));

        assert!(fx.proxy.signalled());
        assert_eq!(fx.endpoint.get().expect("endpoint").host, "proxy.lab");

        // Same endpoint again: no reconnect.
        fx.config(json!({
            "moninj": {"type": "controller", "host": "proxy.lab",
                       "pubsub_port": 2383, "rpc_port": 2384}
        }));
        assert!(!fx.proxy.signalled());
    }

    #[test]
    fn test_proxy_side_disconnect_flag_wakes_reconnector() {
        let mut fx = fixture();
        fx.proxy_op(SyncOp::SetItem {
            path: vec![json!("connection")],
            key: json!("device_link"),
            value: json!(false),
        });
        assert!(fx.proxy.signalled());
    }

    #[test]
    fn test_upstream_gone_wakes_upstream_reconnector() {
        let mut fx = fixture();
        fx.manager.handle_event(
            ClientEvent::UpstreamGone,
            &fx.upstream.handle,
            &fx.proxy.handle,
        );
        assert!(fx.upstream.signalled());
    }

    #[test]
    fn test_bridge_sees_create_then_destroy_for_a_channel_lifetime() {
        use crate::infrastructure::display::MockDisplayBridge;

        let mut bridge = MockDisplayBridge::new();
        bridge
            .expect_create()
            .withf(|kind, spec| *kind == DisplayKind::Ttl && spec.title == "ttl0")
            .times(1)
            .return_const(7u64);
        bridge.expect_destroy().withf(|&handle| handle == 7).times(1).return_const(());

        let rpc = Arc::new(RpcSlot::default());
        let endpoint = Arc::new(EndpointSlot::default());
        let mut manager = DeviceManager::new(bridge, rpc, endpoint);
        let (upstream, _urx) = WakeHandle::pair();
        let (proxy, _prx) = WakeHandle::pair();

        manager.handle_event(
            ClientEvent::ConfigOp(SyncOp::Init { value: ttl_config(0) }),
            &upstream,
            &proxy,
        );
        manager.handle_event(
            ClientEvent::ConfigOp(SyncOp::Init { value: json!({}) }),
            &upstream,
            &proxy,
        );
    }

    #[test]
    fn test_snapshot_reinit_replays_into_displays() {
        let mut fx = fixture();
        fx.config(ttl_config(3));
        fx.drain_rpc();
        fx.drain_displays();

        fx.proxy_op(SyncOp::Init {
            value: json!({
                "monitor": {"3": {"0": 1, "1": 1}},
                "injection_status": {"3": {"0": 0}},
                "connection": {"device_link": true, "upstream": true}
            }),
        });

        let updates = fx.drain_displays();
        // level, output-enable, override — one update per snapshot leaf.
        assert_eq!(updates.len(), 3);
    }
}
