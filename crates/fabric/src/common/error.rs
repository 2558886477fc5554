//! Error taxonomy for the scheduling fabric.
//!
//! Two failure families exist, and nothing else is an error:
//! 1. **Configuration errors** (`BuildError`): wrong wiring detected while the
//!    circuit is being built. Always fatal; construction aborts.
//! 2. **Invariant violations** (`FatalError`): the per-cycle evaluation observed
//!    something the scheduler is supposed to make impossible. Not recoverable.
//!
//! Capacity exhaustion and lookup misses are deliberately *not* here: a full
//! store surfaces as a not-ready method (the caller retries next cycle) and a
//! missed associative lookup returns a `not_found` flag.

use thiserror::Error;

/// A configuration error detected while building a circuit.
///
/// These abort construction; a circuit that builds successfully can only fail
/// afterwards through [`FatalError`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// The static call graph contains a cycle through the named method.
    #[error("call graph contains a cycle through method `{0}`")]
    CyclicCallGraph(String),

    /// Two conflicting actions are always requesting, always ready, and share
    /// the same priority, so no schedule between them is well defined.
    #[error("ambiguous schedule: `{a}` and `{b}` conflict with equal priority and are both always ready")]
    AmbiguousPriority {
        /// First action of the ambiguous pair.
        a: String,
        /// Second action of the ambiguous pair.
        b: String,
    },

    /// A method with an argument validator is called from a site that declares
    /// no argument probe, so the validator cannot gate readiness.
    #[error("method `{method}` has an argument validator but call site in `{caller}` declares no probe")]
    ValidatorWithoutProbe {
        /// The validated method.
        method: String,
        /// The caller whose site lacks a probe.
        caller: String,
    },

    /// A layout field is wider than the 64-bit value carrier.
    #[error("field `{field}` of layout `{layout}` is {width} bits wide (maximum 64)")]
    FieldTooWide {
        /// Owning layout name.
        layout: String,
        /// Offending field name.
        field: String,
        /// Declared width.
        width: u32,
    },

    /// Two fields of one layout share a name.
    #[error("layout `{layout}` declares field `{field}` twice")]
    DuplicateField {
        /// Owning layout name.
        layout: String,
        /// Duplicated field name.
        field: String,
    },

    /// A packed layout exceeds the 64 bits a storage cell can hold.
    #[error("layout `{layout}` packs to {width} bits, exceeding the 64-bit cell limit")]
    LayoutTooWide {
        /// Offending layout name.
        layout: String,
        /// Packed width.
        width: usize,
    },

    /// A storage component was configured with zero capacity.
    #[error("component `{0}` configured with zero entries")]
    ZeroCapacity(String),

    /// A write granularity that does not evenly divide the data width.
    #[error("granularity {granularity} does not divide data width {width}")]
    BadGranularity {
        /// Configured chunk size in bits.
        granularity: u32,
        /// Packed data width in bits.
        width: usize,
    },
}

/// An internal-consistency failure observed while evaluating a cycle.
///
/// Any of these means the schedule the fabric computed was violated during
/// execution; the circuit is broken and the result of further cycles is
/// meaningless.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FatalError {
    /// A method's body was invoked twice within one cycle.
    #[error("method `{0}` fired twice in one cycle")]
    DoubleFire(String),

    /// A method was called although its readiness predicate was false.
    #[error("method `{0}` called while not ready")]
    NotReady(String),

    /// A method's argument validator rejected the arguments it was actually
    /// called with, after readiness had been granted on the probed arguments.
    #[error("method `{0}` called with arguments its validator rejects")]
    ValidatorRejected(String),

    /// A body called a method that its declaration never listed as a call site.
    #[error("`{caller}` called method `{method}` without declaring the call site")]
    UndeclaredCall {
        /// The offending caller.
        caller: String,
        /// The method that was called.
        method: String,
    },

    /// A method was called with a packet of the wrong layout.
    #[error("method `{0}` called with arguments of a different layout")]
    ArgLayoutMismatch(String),
}
