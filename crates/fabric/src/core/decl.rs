//! Declarations of methods and transactions.
//!
//! A *method* is a guarded atomic action other actions may call: a readiness
//! predicate, input/output layouts, an optional argument validator, and a
//! body. A *transaction* is a top-level atomic action: a request predicate,
//! a priority, and a body consisting of calls to registered methods. Both
//! declare their call sites statically; the wiring is frozen when the
//! circuit is built.

use crate::common::FatalError;
use crate::core::circuit::CallCtx;
use crate::core::layout::{Layout, LayoutRef, Packet};

/// Handle to a registered method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MethodId(pub(crate) usize);

impl MethodId {
    /// Index of this method in registration order; indexes cycle reports
    /// and statistics.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to a registered transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxId(pub(crate) usize);

impl TxId {
    /// Index of this transaction in registration order; indexes cycle
    /// reports and statistics.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Either kind of schedulable action, for conflict declarations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionRef {
    /// A method.
    Method(MethodId),
    /// A transaction.
    Tx(TxId),
}

impl From<MethodId> for ActionRef {
    fn from(id: MethodId) -> Self {
        Self::Method(id)
    }
}

impl From<TxId> for ActionRef {
    fn from(id: TxId) -> Self {
        Self::Tx(id)
    }
}

/// A method's readiness declaration.
///
/// The `Always` variant is declared explicitly (rather than as a constant
/// closure) so the builder can decide the ambiguous-schedule check: two
/// conflicting always-ready, always-requesting actions of equal priority
/// have no well-defined schedule and are rejected at build time.
pub enum Ready {
    /// The method can always execute.
    Always,
    /// The method can execute this cycle iff the predicate holds.
    When(Box<dyn Fn() -> bool>),
}

impl Ready {
    pub(crate) fn eval(&self) -> bool {
        match self {
            Self::Always => true,
            Self::When(f) => f(),
        }
    }

    pub(crate) fn is_always(&self) -> bool {
        matches!(self, Self::Always)
    }
}

/// A transaction's request declaration. See [`Ready`] for the `Always` split.
pub enum Request {
    /// The transaction requests to run every cycle.
    Always,
    /// The transaction requests to run iff the predicate holds.
    When(Box<dyn Fn() -> bool>),
}

impl Request {
    pub(crate) fn eval(&self) -> bool {
        match self {
            Self::Always => true,
            Self::When(f) => f(),
        }
    }

    pub(crate) fn is_always(&self) -> bool {
        matches!(self, Self::Always)
    }
}

/// A method body: runs exactly when the method fires, receives the selected
/// caller's arguments, and returns the output packet within the same cycle.
pub type MethodBody = Box<dyn FnMut(&mut CallCtx<'_>, &Packet) -> Result<Packet, FatalError>>;

/// A transaction body: runs exactly when the transaction is granted.
pub type TxBody = Box<dyn FnMut(&mut CallCtx<'_>) -> Result<(), FatalError>>;

/// Predicate over a caller's intended arguments, gating readiness per call.
pub type Validator = Box<dyn Fn(&Packet) -> bool>;

/// Supplies a call site's intended arguments combinationally, before bodies
/// run, so the callee's validator can gate readiness.
pub type Probe = Box<dyn Fn() -> Packet>;

/// A static call site: callee plus an optional argument probe.
pub struct CallSite {
    /// The called method.
    pub method: MethodId,
    /// Intended-argument probe, required when the callee has a validator.
    pub probe: Option<Probe>,
}

/// Declaration of a method, consumed by the circuit builder.
pub struct MethodDecl {
    pub(crate) name: String,
    pub(crate) input: LayoutRef,
    pub(crate) output: LayoutRef,
    pub(crate) ready: Ready,
    pub(crate) validator: Option<Validator>,
    pub(crate) calls: Vec<CallSite>,
    pub(crate) conflicts: Vec<ActionRef>,
    pub(crate) body: MethodBody,
}

impl MethodDecl {
    /// Creates an always-ready method declaration with the given shapes and body.
    pub fn new(name: &str, input: &LayoutRef, output: &LayoutRef, body: MethodBody) -> Self {
        Self {
            name: name.to_string(),
            input: LayoutRef::clone(input),
            output: LayoutRef::clone(output),
            ready: Ready::Always,
            validator: None,
            calls: Vec::new(),
            conflicts: Vec::new(),
            body,
        }
    }

    /// Creates a method taking and returning nothing.
    pub fn unit(name: &str, body: MethodBody) -> Self {
        let empty = Layout::empty();
        Self::new(name, &empty, &empty, body)
    }

    /// Sets the readiness declaration.
    pub fn ready(mut self, ready: Ready) -> Self {
        self.ready = ready;
        self
    }

    /// Sets the argument validator. Every call site targeting this method
    /// must then declare an argument probe.
    pub fn validate(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Declares that this method's body may call `method`.
    pub fn calls(mut self, method: MethodId) -> Self {
        self.calls.push(CallSite {
            method,
            probe: None,
        });
        self
    }

    /// Declares a call site with an intended-argument probe.
    pub fn calls_with(mut self, method: MethodId, probe: Probe) -> Self {
        self.calls.push(CallSite {
            method,
            probe: Some(probe),
        });
        self
    }

    /// Declares an explicit conflict with another action.
    pub fn conflicts_with(mut self, other: impl Into<ActionRef>) -> Self {
        self.conflicts.push(other.into());
        self
    }
}

/// Declaration of a transaction, consumed by the circuit builder.
pub struct TxDecl {
    pub(crate) name: String,
    pub(crate) request: Request,
    pub(crate) priority: u32,
    pub(crate) calls: Vec<CallSite>,
    pub(crate) conflicts: Vec<ActionRef>,
    pub(crate) body: TxBody,
}

impl TxDecl {
    /// Creates an always-requesting, priority-0 transaction declaration.
    pub fn new(name: &str, body: TxBody) -> Self {
        Self {
            name: name.to_string(),
            request: Request::Always,
            priority: 0,
            calls: Vec::new(),
            conflicts: Vec::new(),
            body,
        }
    }

    /// Sets the request declaration.
    pub fn request(mut self, request: Request) -> Self {
        self.request = request;
        self
    }

    /// Sets the static priority (higher wins against conflicting requesters).
    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Declares that this transaction's body may call `method`.
    pub fn calls(mut self, method: MethodId) -> Self {
        self.calls.push(CallSite {
            method,
            probe: None,
        });
        self
    }

    /// Declares a call site with an intended-argument probe.
    pub fn calls_with(mut self, method: MethodId, probe: Probe) -> Self {
        self.calls.push(CallSite {
            method,
            probe: Some(probe),
        });
        self
    }

    /// Declares an explicit conflict with another action.
    pub fn conflicts_with(mut self, other: impl Into<ActionRef>) -> Self {
        self.conflicts.push(other.into());
        self
    }
}
