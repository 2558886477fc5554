//! The scheduling core: data shapes, declarations, wiring analysis, per-cycle
//! arbitration, and the call protocol.

/// Circuit builder, per-cycle evaluation engine, and call context.
pub mod circuit;
/// Method and transaction declarations and their handles.
pub mod decl;
/// Build-time call-graph and conflict analysis.
pub(crate) mod graph;
/// Named bit-field layouts and packet values.
pub mod layout;
/// Pure per-cycle schedule computation.
pub mod schedule;

pub use circuit::{CallCtx, Circuit, CircuitBuilder, Clocked};
pub use decl::{ActionRef, MethodDecl, MethodId, Ready, Request, TxDecl, TxId};
pub use layout::{Layout, LayoutRef, Packet};
