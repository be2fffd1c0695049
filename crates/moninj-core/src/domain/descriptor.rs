//! Immutable channel descriptors.
//!
//! A descriptor fully describes one logical channel for reconciliation
//! purposes.  Descriptors are value objects: compared structurally, hashed
//! for set membership, and never mutated after construction.  The kind set
//! is closed; every dispatch over it is an exhaustive `match`, so there is
//! no reachable "unknown kind" state at runtime.

use serde::{Deserialize, Serialize};

/// Unique identity of a logical channel.
///
/// Channels synthesized in bulk (the 32 outputs of a DAC device) get a
/// composite identity of their parent configuration key plus a sub-index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelUid {
    /// A plain configuration key.
    Key(String),
    /// `(parent_key, sub_index)` for bulk-synthesized channels.
    Indexed(String, u32),
}

impl ChannelUid {
    /// The configuration key this channel derives from.
    pub fn parent_key(&self) -> &str {
        match self {
            ChannelUid::Key(k) => k,
            ChannelUid::Indexed(k, _) => k,
        }
    }
}

impl std::fmt::Display for ChannelUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelUid::Key(k) => write!(f, "{k}"),
            ChannelUid::Indexed(k, i) => write!(f, "{k}[{i}]"),
        }
    }
}

/// The two multi-register synthesizer variants, distinguished by their
/// configuration type tag.  The variant changes register decoding on the
/// display side, not the subscription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SynthVariant {
    A,
    B,
}

/// The closed set of channel kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// A digital I/O line.
    Ttl { channel: u32, is_output: bool },
    /// A bus-addressed direct digital synthesizer.
    Dds { bus_channel: u32, channel: u32 },
    /// One output of an SPI-multiplexed DAC device.
    Dac { spi_channel: u32, channel: u32 },
    /// One channel of a multi-register synthesizer.
    Synth {
        spi_channel: u32,
        channel: u32,
        switch_channel: u32,
        ref_clock: f64,
        pll_multiplier: u32,
        variant: SynthVariant,
    },
}

// `ref_clock` is compared bitwise; NaN never appears (it comes from a JSON
// number), so reflexivity holds and Eq/Hash are sound.
impl Eq for ChannelKind {}

impl std::hash::Hash for ChannelKind {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            ChannelKind::Ttl { channel, is_output } => {
                channel.hash(state);
                is_output.hash(state);
            }
            ChannelKind::Dds { bus_channel, channel } => {
                bus_channel.hash(state);
                channel.hash(state);
            }
            ChannelKind::Dac { spi_channel, channel } => {
                spi_channel.hash(state);
                channel.hash(state);
            }
            ChannelKind::Synth {
                spi_channel,
                channel,
                switch_channel,
                ref_clock,
                pll_multiplier,
                variant,
            } => {
                spi_channel.hash(state);
                channel.hash(state);
                switch_channel.hash(state);
                ref_clock.to_bits().hash(state);
                pll_multiplier.hash(state);
                variant.hash(state);
            }
        }
    }
}

/// Immutable value object fully describing one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub uid: ChannelUid,
    pub comment: Option<String>,
    pub kind: ChannelKind,
}

/// Where observers reach the proxy, extracted from the configuration tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub host: String,
    pub pubsub_port: u16,
    pub rpc_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ttl(key: &str, channel: u32) -> ChannelDescriptor {
        ChannelDescriptor {
            uid: ChannelUid::Key(key.to_owned()),
            comment: None,
            kind: ChannelKind::Ttl { channel, is_output: true },
        }
    }

    #[test]
    fn test_descriptors_compare_by_value() {
        assert_eq!(ttl("ttl0", 3), ttl("ttl0", 3));
        assert_ne!(ttl("ttl0", 3), ttl("ttl0", 4));
    }

    #[test]
    fn test_set_membership_is_structural() {
        let mut set = HashSet::new();
        set.insert(ttl("ttl0", 3));
        assert!(set.contains(&ttl("ttl0", 3)));
        assert!(!set.contains(&ttl("ttl1", 3)));
    }

    #[test]
    fn test_synth_hash_distinguishes_ref_clock() {
        let base = ChannelKind::Synth {
            spi_channel: 1,
            channel: 0,
            switch_channel: 8,
            ref_clock: 125e6,
            pll_multiplier: 32,
            variant: SynthVariant::A,
        };
        let other = ChannelKind::Synth {
            spi_channel: 1,
            channel: 0,
            switch_channel: 8,
            ref_clock: 100e6,
            pll_multiplier: 32,
            variant: SynthVariant::A,
        };
        let mut set = HashSet::new();
        set.insert(base.clone());
        assert!(set.contains(&base));
        assert!(!set.contains(&other));
    }

    #[test]
    fn test_indexed_uid_display_and_parent() {
        let uid = ChannelUid::Indexed("zotino0".to_owned(), 7);
        assert_eq!(uid.to_string(), "zotino0[7]");
        assert_eq!(uid.parent_key(), "zotino0");
    }
}
