//! Transactional method-scheduling fabric for cycle-accurate hardware models.
//!
//! This crate lets independently-written components declare *atomic guarded
//! methods* and *transactions* that call them, and schedules them so that in
//! every clock cycle each method fires at most once and all granted actions
//! are mutually conflict-free. It provides:
//! 1. **Core:** The method/transaction call protocol, build-time call-graph
//!    and conflict analysis, and the per-cycle conflict-resolution scheduler.
//! 2. **Arbiters:** Priority and rotating-window arbitration primitives the
//!    scheduler and storage components are built on.
//! 3. **Storage:** An associative (content-addressed) store and a banked
//!    store with split reads and hazard policies, exercising the scheduler's
//!    mutual-exclusion and hazard rules.
//! 4. **Station:** A reservation-station dependency tracker gating issue on
//!    address-overlap conflicts, as a concrete out-of-order consumer.
//! 5. **Stats:** Per-cycle observability hooks and counters that never
//!    influence scheduling.
//!
//! Everything is resolved within a single clock cycle: readiness, requests,
//! and the schedule are computed combinationally, granted bodies run, and
//! staged state commits at the clock edge.

/// Priority and ring arbitration primitives.
pub mod arbiter;
/// Shared types: bit vectors and the error taxonomy.
pub mod common;
/// Component configuration structures and defaults.
pub mod config;
/// The scheduling core: layouts, declarations, wiring, and the circuit.
pub mod core;
/// Storage components (banked store, associative store).
pub mod mem;
/// Reservation-station dependency tracker.
pub mod station;
/// Scheduling statistics and observer hooks.
pub mod stats;

/// Circuit construction entry point; freeze declarations with `build()`.
pub use crate::core::CircuitBuilder;
/// A built circuit; evaluate clock cycles with `cycle()`.
pub use crate::core::Circuit;
/// Shared error taxonomy.
pub use crate::common::{BuildError, FatalError};
