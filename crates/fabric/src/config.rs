//! Configuration for the scheduling fabric and its storage components.
//!
//! This module defines the configuration structures used to parameterize the
//! fabric. It provides:
//! 1. **Defaults:** Baseline constants for storage geometry and policies.
//! 2. **Structures:** Per-component config for the banked store, associative
//!    store, and reservation station.
//!
//! Configuration is supplied via JSON/TOML deserialization or built in code
//! with `Default::default()` and struct update syntax.

use serde::Deserialize;

/// Default configuration constants.
///
/// These values define the baseline component geometry when not explicitly
/// overridden in a deserialized configuration.
mod defaults {
    /// Number of cells in a banked store.
    pub const BANK_ELEMS: usize = 16;

    /// Number of slots in an associative store.
    pub const CAM_ENTRIES: usize = 8;

    /// Number of reservation-station entries.
    pub const RS_ENTRIES: usize = 4;

    /// Low-order address bits ignored when comparing two memory accesses.
    ///
    /// Two resolved addresses are considered aliases when they agree above
    /// this many bits. The default matches word-aligned accesses; narrower
    /// sub-word conflict detection is a policy change, not a code change.
    pub const RS_ALIGNMENT_BITS: u32 = 2;

    /// Width of an operand tag in the reservation station, in bits.
    ///
    /// Tag 0 is reserved to mean "operand already resolved".
    pub const RS_TAG_BITS: u32 = 6;

    /// Width of a reorder-buffer index in the reservation station, in bits.
    ///
    /// Relative age between two entries is decided by wrap-aware subtraction
    /// at this width against an externally supplied base index.
    pub const RS_ROB_BITS: u32 = 8;

    /// Width of the reservation station's value/address datapath, in bits.
    pub const RS_VAL_BITS: u32 = 32;
}

/// Configuration of a banked store (one read port, one write port).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Number of cells.
    pub elem_count: usize,
    /// Write granularity in bits. `None` writes the whole cell at once;
    /// `Some(g)` splits the cell into independently-maskable `g`-bit chunks
    /// and adds a `mask` field to the write method.
    pub granularity: Option<u32>,
    /// Hazard policy for a write aimed at an in-flight read's address.
    ///
    /// `true` (default): the write is deferred one cycle so the read observes
    /// pre-write data, preserving program order between same-address read and
    /// write. `false`: no reordering protection; a same-cycle read may observe
    /// the write. The unsafe setting trades correctness under aliasing for
    /// write throughput.
    pub safe_writes: bool,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            elem_count: defaults::BANK_ELEMS,
            granularity: None,
            safe_writes: true,
        }
    }
}

/// Configuration of an associative (content-addressed) store.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CamConfig {
    /// Number of key/value slots.
    pub entries: usize,
}

impl Default for CamConfig {
    fn default() -> Self {
        Self {
            entries: defaults::CAM_ENTRIES,
        }
    }
}

/// Configuration of the reservation-station dependency tracker.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Number of station entries.
    pub entries: usize,
    /// Low-order address bits discarded before comparing two accesses.
    pub alignment_bits: u32,
    /// Operand tag width in bits (tag 0 means "resolved").
    pub tag_bits: u32,
    /// Reorder-buffer index width in bits.
    pub rob_bits: u32,
    /// Value/address datapath width in bits.
    pub val_bits: u32,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            entries: defaults::RS_ENTRIES,
            alignment_bits: defaults::RS_ALIGNMENT_BITS,
            tag_bits: defaults::RS_TAG_BITS,
            rob_bits: defaults::RS_ROB_BITS,
            val_bits: defaults::RS_VAL_BITS,
        }
    }
}

/// Top-level configuration bundling every component section.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Banked store section.
    pub bank: BankConfig,
    /// Associative store section.
    pub cam: CamConfig,
    /// Reservation station section.
    pub station: StationConfig,
}

/// Returns the number of bits needed to address `count` items.
///
/// `bits_for(1)` is 1 so even a single-entry structure has an index field.
pub fn bits_for(count: usize) -> u32 {
    let bits = usize::BITS - count.saturating_sub(1).leading_zeros();
    bits.max(1)
}
