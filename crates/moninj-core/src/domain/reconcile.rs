//! Pure reconciliation of a configuration tree into a channel descriptor set.
//!
//! The configuration tree is a JSON object mapping entry keys to entry
//! objects.  An entry is considered only when it declares a recognized local
//! device driver; everything else (controllers, alias strings, unrelated
//! devices) is passed over.  A malformed entry is skipped with a warning —
//! never allowed to abort reconciliation of the remaining entries.
//!
//! Entry schema:
//! ```json
//! {
//!   "type": "local" | "controller",
//!   "driver": "ttl" | "ttl_out" | "dds" | "dac" | "synth_a" | "synth_b",
//!   "comment": "optional free text",
//!   "arguments": { ... driver-specific ... }
//! }
//! ```
//! An entry whose value is a bare string is an alias naming another entry;
//! aliases occur in SPI device references and are followed transparently.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::warn;

use crate::domain::descriptor::{
    ChannelDescriptor, ChannelKind, ChannelUid, ProxyEndpoint, SynthVariant,
};

/// Number of outputs synthesized per DAC device entry.
const DAC_CHANNELS: u32 = 32;

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// The full descriptor set derived from the tree.
    pub descriptors: HashSet<ChannelDescriptor>,
    /// Proxy endpoint, when a `moninj` controller entry is present.
    pub proxy: Option<ProxyEndpoint>,
    /// Global DDS system clock, when any `dds` entry declares one.
    ///
    /// When several entries declare conflicting values the one from the
    /// lexicographically last entry key wins; iteration order is
    /// deterministic so the outcome is reproducible.
    pub sysclk: Option<f64>,
}

/// Maps a configuration tree to the set of channel descriptors it describes.
///
/// Pure: no side effects beyond `warn` logs for skipped entries.  Missing or
/// malformed keys abort only the entry being derived.
pub fn reconcile(config: &Value) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    let Some(entries) = config.as_object() else {
        return outcome;
    };

    // serde_json map iteration preserves insertion order by default; sort
    // keys so "last writer wins" cases stay deterministic across peers.
    let mut keys: Vec<&String> = entries.keys().collect();
    keys.sort();

    for key in keys {
        let entry = &entries[key.as_str()];
        let Some(entry_obj) = entry.as_object() else {
            continue; // alias strings and other non-object entries
        };
        if let Err(missing) = reconcile_entry(key, entry_obj, entries, &mut outcome) {
            warn!(entry = %key, field = missing, "skipping malformed configuration entry");
        }
    }
    outcome
}

/// Extracts the device controller host from the configuration tree, for the
/// proxy's own device-link endpoint.
pub fn device_host(config: &Value) -> Option<String> {
    config
        .get("core")?
        .get("arguments")?
        .get("host")?
        .as_str()
        .map(str::to_owned)
}

/// Derives descriptors (or endpoint/clock globals) from one entry.
///
/// Returns `Err(field_name)` naming the first missing or ill-typed field, so
/// the caller can log a useful skip message.
fn reconcile_entry(
    key: &str,
    entry: &Map<String, Value>,
    tree: &Map<String, Value>,
    outcome: &mut ReconcileOutcome,
) -> Result<(), &'static str> {
    match entry.get("type").and_then(Value::as_str) {
        Some("controller") if key == "moninj" => {
            outcome.proxy = Some(ProxyEndpoint {
                host: entry.get("host").and_then(Value::as_str).ok_or("host")?.to_owned(),
                pubsub_port: get_u64(entry, "pubsub_port")? as u16,
                rpc_port: get_u64(entry, "rpc_port")? as u16,
            });
            return Ok(());
        }
        Some("local") => {}
        _ => return Ok(()),
    }

    let driver = entry.get("driver").and_then(Value::as_str).unwrap_or_default();
    let comment = entry.get("comment").and_then(Value::as_str).map(str::to_owned);
    let args = entry.get("arguments").and_then(Value::as_object).ok_or("arguments")?;

    match driver {
        "ttl" | "ttl_out" => {
            outcome.descriptors.insert(ChannelDescriptor {
                uid: ChannelUid::Key(key.to_owned()),
                comment,
                kind: ChannelKind::Ttl {
                    channel: get_u64(args, "channel")? as u32,
                    is_output: driver == "ttl_out",
                },
            });
        }
        "dds" => {
            outcome.sysclk = Some(get_f64(args, "sysclk")?);
            outcome.descriptors.insert(ChannelDescriptor {
                uid: ChannelUid::Key(key.to_owned()),
                comment,
                kind: ChannelKind::Dds {
                    bus_channel: get_u64(args, "bus_channel")? as u32,
                    channel: get_u64(args, "channel")? as u32,
                },
            });
        }
        "dac" => {
            let spi_channel = resolve_spi_channel(args, "spi_device", tree)?;
            for channel in 0..DAC_CHANNELS {
                outcome.descriptors.insert(ChannelDescriptor {
                    uid: ChannelUid::Indexed(key.to_owned(), channel),
                    comment: comment.clone(),
                    kind: ChannelKind::Dac { spi_channel, channel },
                });
            }
        }
        "synth_a" | "synth_b" => {
            let cpld_key = args.get("cpld_device").and_then(Value::as_str).ok_or("cpld_device")?;
            let cpld = resolve_alias(tree, cpld_key).ok_or("cpld_device")?;
            let cpld_args =
                cpld.get("arguments").and_then(Value::as_object).ok_or("cpld arguments")?;
            let ref_clock = get_f64(cpld_args, "ref_clock")?;
            let spi_channel = resolve_spi_channel(cpld_args, "spi_device", tree)?;

            let switch_key =
                args.get("switch_device").and_then(Value::as_str).ok_or("switch_device")?;
            let switch = resolve_alias(tree, switch_key).ok_or("switch_device")?;
            let switch_channel = switch
                .get("arguments")
                .and_then(|a| a.get("channel"))
                .and_then(Value::as_u64)
                .ok_or("switch channel")? as u32;

            let chip_select = get_u64(args, "chip_select")?;
            let channel = chip_select.checked_sub(4).ok_or("chip_select")? as u32;

            outcome.descriptors.insert(ChannelDescriptor {
                uid: ChannelUid::Key(key.to_owned()),
                comment,
                kind: ChannelKind::Synth {
                    spi_channel,
                    channel,
                    switch_channel,
                    ref_clock,
                    pll_multiplier: get_u64(args, "pll_n")? as u32,
                    variant: if driver == "synth_a" { SynthVariant::A } else { SynthVariant::B },
                },
            });
        }
        _ => {} // not a monitorable device
    }
    Ok(())
}

/// Follows `args[field]` through zero or more levels of string aliasing to a
/// concrete entry, then reads its SPI channel number.
fn resolve_spi_channel(
    args: &Map<String, Value>,
    field: &'static str,
    tree: &Map<String, Value>,
) -> Result<u32, &'static str> {
    let name = args.get(field).and_then(Value::as_str).ok_or(field)?;
    let device = resolve_alias(tree, name).ok_or(field)?;
    device
        .get("arguments")
        .and_then(|a| a.get("channel"))
        .and_then(Value::as_u64)
        .map(|c| c as u32)
        .ok_or("spi channel")
}

/// Resolves an entry name through string aliases until an object entry is
/// reached.  Returns `None` on a dangling name or an alias cycle.
fn resolve_alias<'a>(tree: &'a Map<String, Value>, name: &str) -> Option<&'a Map<String, Value>> {
    let mut name = name.to_owned();
    // An alias chain longer than the tree must contain a cycle.
    for _ in 0..=tree.len() {
        match tree.get(&name)? {
            Value::String(next) => name = next.clone(),
            Value::Object(entry) => return Some(entry),
            _ => return None,
        }
    }
    None
}

fn get_u64(map: &Map<String, Value>, field: &'static str) -> Result<u64, &'static str> {
    map.get(field).and_then(Value::as_u64).ok_or(field)
}

fn get_f64(map: &Map<String, Value>, field: &'static str) -> Result<f64, &'static str> {
    map.get(field).and_then(Value::as_f64).ok_or(field)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ttl_entry_yields_one_descriptor() {
        let config = json!({
            "ttl3": {"type": "local", "driver": "ttl_out", "arguments": {"channel": 3}}
        });
        let outcome = reconcile(&config);
        assert_eq!(outcome.descriptors.len(), 1);
        let desc = outcome.descriptors.iter().next().unwrap();
        assert_eq!(desc.uid, ChannelUid::Key("ttl3".to_owned()));
        assert_eq!(desc.comment, None);
        assert_eq!(desc.kind, ChannelKind::Ttl { channel: 3, is_output: true });
    }

    #[test]
    fn test_input_ttl_is_not_output() {
        let config = json!({
            "ttl_in": {"type": "local", "driver": "ttl", "arguments": {"channel": 9}}
        });
        let outcome = reconcile(&config);
        let desc = outcome.descriptors.iter().next().unwrap();
        assert_eq!(desc.kind, ChannelKind::Ttl { channel: 9, is_output: false });
    }

    #[test]
    fn test_dds_entry_extracts_global_sysclk() {
        let config = json!({
            "dds0": {"type": "local", "driver": "dds",
                     "arguments": {"bus_channel": 27, "channel": 0, "sysclk": 3e9}}
        });
        let outcome = reconcile(&config);
        assert_eq!(outcome.sysclk, Some(3e9));
        let desc = outcome.descriptors.iter().next().unwrap();
        assert_eq!(desc.kind, ChannelKind::Dds { bus_channel: 27, channel: 0 });
    }

    #[test]
    fn test_conflicting_sysclk_is_deterministic_last_key_wins() {
        let config = json!({
            "dds_b": {"type": "local", "driver": "dds",
                      "arguments": {"bus_channel": 1, "channel": 1, "sysclk": 2e9}},
            "dds_a": {"type": "local", "driver": "dds",
                      "arguments": {"bus_channel": 1, "channel": 0, "sysclk": 1e9}}
        });
        // Keys are processed sorted, so "dds_b" is processed after "dds_a".
        assert_eq!(reconcile(&config).sysclk, Some(2e9));
    }

    #[test]
    fn test_dac_entry_synthesizes_32_sub_channels_through_alias_chain() {
        let config = json!({
            "zotino0": {"type": "local", "driver": "dac",
                        "arguments": {"spi_device": "spi_alias"}},
            "spi_alias": "spi_alias2",
            "spi_alias2": "spi0",
            "spi0": {"type": "local", "driver": "spi", "arguments": {"channel": 7}}
        });
        let outcome = reconcile(&config);
        assert_eq!(outcome.descriptors.len(), 32);
        for sub in 0..32u32 {
            let expected = ChannelDescriptor {
                uid: ChannelUid::Indexed("zotino0".to_owned(), sub),
                comment: None,
                kind: ChannelKind::Dac { spi_channel: 7, channel: sub },
            };
            assert!(outcome.descriptors.contains(&expected), "missing sub-channel {sub}");
        }
    }

    #[test]
    fn test_unresolved_alias_skips_only_the_offending_entry() {
        let config = json!({
            "zotino0": {"type": "local", "driver": "dac",
                        "arguments": {"spi_device": "nowhere"}},
            "ttl0": {"type": "local", "driver": "ttl_out", "arguments": {"channel": 0}}
        });
        let outcome = reconcile(&config);
        assert_eq!(outcome.descriptors.len(), 1, "the TTL entry must survive");
    }

    #[test]
    fn test_alias_cycle_does_not_hang() {
        let config = json!({
            "zotino0": {"type": "local", "driver": "dac", "arguments": {"spi_device": "a"}},
            "a": "b",
            "b": "a"
        });
        assert!(reconcile(&config).descriptors.is_empty());
    }

    #[test]
    fn test_synth_entry_resolves_cpld_and_switch() {
        let config = json!({
            "urukul_ch0": {"type": "local", "driver": "synth_a",
                           "comment": "cooling beam",
                           "arguments": {"cpld_device": "urukul_cpld", "switch_device": "ttl8",
                                         "chip_select": 4, "pll_n": 32}},
            "urukul_cpld": {"type": "local", "driver": "cpld",
                            "arguments": {"ref_clock": 125e6, "spi_device": "spi1"}},
            "spi1": {"type": "local", "driver": "spi", "arguments": {"channel": 12}},
            "ttl8": {"type": "local", "driver": "ttl_out", "arguments": {"channel": 8}}
        });
        let outcome = reconcile(&config);
        // the switch TTL itself is also a descriptor
        assert_eq!(outcome.descriptors.len(), 2);
        let synth = outcome
            .descriptors
            .iter()
            .find(|d| matches!(d.kind, ChannelKind::Synth { .. }))
            .expect("synth descriptor");
        assert_eq!(synth.comment.as_deref(), Some("cooling beam"));
        assert_eq!(
            synth.kind,
            ChannelKind::Synth {
                spi_channel: 12,
                channel: 0,
                switch_channel: 8,
                ref_clock: 125e6,
                pll_multiplier: 32,
                variant: SynthVariant::A,
            }
        );
    }

    #[test]
    fn test_moninj_controller_entry_yields_proxy_endpoint() {
        let config = json!({
            "moninj": {"type": "controller", "host": "lab-proxy",
                       "pubsub_port": 2383, "rpc_port": 2384}
        });
        let outcome = reconcile(&config);
        assert_eq!(
            outcome.proxy,
            Some(ProxyEndpoint {
                host: "lab-proxy".to_owned(),
                pubsub_port: 2383,
                rpc_port: 2384
            })
        );
        assert!(outcome.descriptors.is_empty());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let config = json!({
            "ttl0": {"type": "local", "driver": "ttl_out", "arguments": {"channel": 0}},
            "zotino0": {"type": "local", "driver": "dac", "arguments": {"spi_device": "spi0"}},
            "spi0": {"type": "local", "driver": "spi", "arguments": {"channel": 2}}
        });
        assert_eq!(reconcile(&config).descriptors, reconcile(&config).descriptors);
    }

    #[test]
    fn test_set_diff_roles_are_antisymmetric() {
        let c1 = json!({
            "ttl0": {"type": "local", "driver": "ttl_out", "arguments": {"channel": 0}},
            "ttl1": {"type": "local", "driver": "ttl_out", "arguments": {"channel": 1}}
        });
        let c2 = json!({
            "ttl1": {"type": "local", "driver": "ttl_out", "arguments": {"channel": 1}},
            "ttl2": {"type": "local", "driver": "ttl_out", "arguments": {"channel": 2}}
        });
        let d1 = reconcile(&c1).descriptors;
        let d2 = reconcile(&c2).descriptors;

        let added: HashSet<_> = d2.difference(&d1).cloned().collect();
        let removed: HashSet<_> = d1.difference(&d2).cloned().collect();
        assert!(added.is_disjoint(&removed));
        // Reversing the direction swaps the roles exactly.
        let added_rev: HashSet<_> = d1.difference(&d2).cloned().collect();
        assert_eq!(added_rev, removed);
    }

    #[test]
    fn test_device_host_extraction() {
        let config = json!({
            "core": {"type": "local", "driver": "core", "arguments": {"host": "10.0.0.52"}}
        });
        assert_eq!(device_host(&config), Some("10.0.0.52".to_owned()));
        assert_eq!(device_host(&json!({})), None);
    }
}
