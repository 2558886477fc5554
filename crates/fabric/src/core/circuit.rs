//! Circuit construction and per-cycle evaluation.
//!
//! A circuit is the frozen registry of methods, transactions, conflict
//! wiring, and clocked state. Each call to [`Circuit::cycle`] evaluates one
//! clock cycle in three phases:
//! 1. **Arbitration:** readiness, request, and validator signals are gathered
//!    over the static call graph and the schedule is computed.
//! 2. **Execution:** granted transaction bodies run; method calls flow through
//!    a [`CallCtx`] that enforces the single-fire and readiness invariants and
//!    wires argument/result packets between caller and callee.
//! 3. **Commit:** staged state updates are applied atomically at the clock
//!    edge via each component's [`Clocked`] hook.
//!
//! State mutated by a body is therefore never visible to readiness predicates
//! or other bodies until the next cycle, which is what makes the granted set's
//! conflict-freedom sufficient for atomicity.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::common::{BitVec, BuildError, FatalError};
use crate::core::decl::{
    ActionRef, CallSite, MethodBody, MethodDecl, MethodId, Ready, Request, TxBody, TxDecl, TxId,
    Validator,
};
use crate::core::graph::{self, AnalyzeInput, Wiring};
use crate::core::layout::{LayoutRef, Packet};
use crate::core::schedule::{self, SchedNode};
use crate::stats::{CycleReport, Observer};

/// Commit hook for double-buffered component state.
///
/// Bodies stage updates during phase 2; the circuit calls `commit` on every
/// registered component at the clock edge to apply them atomically.
pub trait Clocked {
    /// Applies all staged updates and clears the staging area.
    fn commit(&mut self);
}

struct MethodSlot {
    input: LayoutRef,
    output: LayoutRef,
    ready: Ready,
    validator: Option<Validator>,
    calls: Vec<CallSite>,
    body: Option<MethodBody>,
}

struct TxSlot {
    request: Request,
    priority: u32,
    calls: Vec<CallSite>,
    body: Option<TxBody>,
}

/// Collects declarations and freezes them into a [`Circuit`].
///
/// Handles (`MethodId`, `TxId`) are only obtainable from this builder, so all
/// call-graph and conflict wiring refers to already-registered actions.
#[derive(Default)]
pub struct CircuitBuilder {
    methods: Vec<MethodSlot>,
    method_names: Vec<String>,
    txs: Vec<TxSlot>,
    tx_names: Vec<String>,
    explicit_conflicts: Vec<(ActionRef, ActionRef)>,
    clocked: Vec<Rc<RefCell<dyn Clocked>>>,
}

impl CircuitBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method and returns its handle.
    pub fn add_method(&mut self, decl: MethodDecl) -> MethodId {
        let id = MethodId(self.methods.len());
        self.method_names.push(decl.name);
        for c in &decl.conflicts {
            self.explicit_conflicts.push((ActionRef::Method(id), *c));
        }
        self.methods.push(MethodSlot {
            input: decl.input,
            output: decl.output,
            ready: decl.ready,
            validator: decl.validator,
            calls: decl.calls,
            body: Some(decl.body),
        });
        id
    }

    /// Registers a transaction and returns its handle.
    pub fn add_transaction(&mut self, decl: TxDecl) -> TxId {
        let id = TxId(self.txs.len());
        self.tx_names.push(decl.name);
        for c in &decl.conflicts {
            self.explicit_conflicts.push((ActionRef::Tx(id), *c));
        }
        self.txs.push(TxSlot {
            request: decl.request,
            priority: decl.priority,
            calls: decl.calls,
            body: Some(decl.body),
        });
        id
    }

    /// Declares an explicit conflict between two registered actions.
    pub fn add_conflict(&mut self, a: impl Into<ActionRef>, b: impl Into<ActionRef>) {
        self.explicit_conflicts.push((a.into(), b.into()));
    }

    /// Registers a component's clocked state for the commit pass.
    pub fn add_clocked(&mut self, clocked: Rc<RefCell<dyn Clocked>>) {
        self.clocked.push(clocked);
    }

    /// Runs all configuration checks and freezes the wiring.
    pub fn build(self) -> Result<Circuit, BuildError> {
        // A validated method is only callable from sites that can present
        // the intended arguments during arbitration.
        let site_check = |caller: &str, sites: &[CallSite]| -> Result<(), BuildError> {
            for site in sites {
                if self.methods[site.method.0].validator.is_some() && site.probe.is_none() {
                    return Err(BuildError::ValidatorWithoutProbe {
                        method: self.method_names[site.method.0].clone(),
                        caller: caller.to_string(),
                    });
                }
            }
            Ok(())
        };
        for (m, slot) in self.methods.iter().enumerate() {
            site_check(&self.method_names[m], &slot.calls)?;
        }
        for (t, slot) in self.txs.iter().enumerate() {
            site_check(&self.tx_names[t], &slot.calls)?;
        }

        let method_calls: Vec<Vec<usize>> = self
            .methods
            .iter()
            .map(|s| s.calls.iter().map(|c| c.method.0).collect())
            .collect();
        let tx_calls: Vec<Vec<usize>> = self
            .txs
            .iter()
            .map(|s| s.calls.iter().map(|c| c.method.0).collect())
            .collect();
        let priorities: Vec<u32> = self.txs.iter().map(|s| s.priority).collect();
        let tx_always: Vec<bool> = self.txs.iter().map(|s| s.request.is_always()).collect();
        let method_always: Vec<bool> = self
            .methods
            .iter()
            .map(|s| s.ready.is_always() && s.validator.is_none())
            .collect();

        let wiring = graph::analyze(&AnalyzeInput {
            method_names: &self.method_names,
            tx_names: &self.tx_names,
            method_calls: &method_calls,
            tx_calls: &tx_calls,
            explicit: &self.explicit_conflicts,
            priorities: &priorities,
            tx_always: &tx_always,
            method_always: &method_always,
        })?;

        Ok(Circuit {
            methods: self.methods,
            method_names: self.method_names,
            txs: self.txs,
            tx_names: self.tx_names,
            wiring,
            clocked: self.clocked,
            observers: Vec::new(),
            cycle_count: 0,
        })
    }
}

/// A built circuit: frozen wiring plus the per-cycle evaluation engine.
pub struct Circuit {
    methods: Vec<MethodSlot>,
    method_names: Vec<String>,
    txs: Vec<TxSlot>,
    tx_names: Vec<String>,
    wiring: Wiring,
    clocked: Vec<Rc<RefCell<dyn Clocked>>>,
    observers: Vec<Box<dyn Observer>>,
    cycle_count: u64,
}

impl Circuit {
    /// Number of registered methods.
    #[inline]
    pub fn n_methods(&self) -> usize {
        self.methods.len()
    }

    /// Number of registered transactions.
    #[inline]
    pub fn n_transactions(&self) -> usize {
        self.txs.len()
    }

    /// Name of a registered method.
    pub fn method_name(&self, id: MethodId) -> &str {
        &self.method_names[id.0]
    }

    /// Name of a registered transaction.
    pub fn transaction_name(&self, id: TxId) -> &str {
        &self.tx_names[id.0]
    }

    /// Attaches a per-cycle observer. Observers never influence scheduling.
    pub fn attach_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Evaluates one clock cycle and commits state at its end.
    pub fn cycle(&mut self) -> Result<CycleReport, FatalError> {
        let n_tx = self.txs.len();
        let n_methods = self.methods.len();

        // Phase 1: readiness over the call DAG, then arbitration.
        let mut memo: Vec<Option<bool>> = vec![None; n_methods];
        for m in 0..n_methods {
            let _ = self.method_ready(m, &mut memo);
        }
        let ready = BitVec::from_fn(n_methods, |m| memo[m] == Some(true));

        let requested = BitVec::from_fn(n_tx, |t| self.txs[t].request.eval());
        let runnable = BitVec::from_fn(n_tx, |t| {
            requested.get(t) && self.txs[t].calls.iter().all(|s| self.site_ok(s, &mut memo))
        });

        let nodes: Vec<SchedNode> = (0..n_tx)
            .map(|t| SchedNode {
                requesting: runnable.get(t),
                priority: self.txs[t].priority,
            })
            .collect();
        let sched = schedule::compute(&nodes, &self.wiring.tx_conflicts, &self.wiring.components);

        // Phase 2: granted bodies, highest priority first.
        let mut fired = BitVec::zeros(n_methods);
        for t in self.wiring.tx_order.clone() {
            if !sched.granted.get(t) {
                continue;
            }
            trace!(tx = %self.tx_names[t], cycle = self.cycle_count, "transaction granted");
            let Some(mut body) = self.txs[t].body.take() else {
                continue;
            };
            let mut ctx = CallCtx {
                methods: &mut self.methods,
                method_names: &self.method_names,
                tx_names: &self.tx_names,
                wiring: &self.wiring,
                ready: &ready,
                fired: &mut fired,
                frames: vec![ActionRef::Tx(TxId(t))],
            };
            let result = body(&mut ctx);
            self.txs[t].body = Some(body);
            result?;
        }

        let report = CycleReport {
            cycle: self.cycle_count,
            requested,
            runnable,
            granted: sched.granted,
            fired,
        };
        for observer in &mut self.observers {
            observer.on_cycle(&report);
        }

        // Phase 3: the clock edge.
        for clocked in &self.clocked {
            clocked.borrow_mut().commit();
        }
        self.cycle_count += 1;
        Ok(report)
    }

    /// Evaluates `n` consecutive cycles.
    pub fn run(&mut self, n: u64) -> Result<(), FatalError> {
        for _ in 0..n {
            let _ = self.cycle()?;
        }
        Ok(())
    }

    /// Effective readiness of a method: its own predicate, and every one of
    /// its call sites ready (transitively) with validators accepting the
    /// probed arguments.
    fn method_ready(&self, m: usize, memo: &mut Vec<Option<bool>>) -> bool {
        if let Some(v) = memo[m] {
            return v;
        }
        let mut ok = self.methods[m].ready.eval();
        if ok {
            // Indexed loop: `site_ok` recurses with the shared memo table.
            for i in 0..self.methods[m].calls.len() {
                let callee = self.methods[m].calls[i].method.0;
                if !self.method_ready(callee, memo) || !self.site_validates(m, i) {
                    ok = false;
                    break;
                }
            }
        }
        memo[m] = Some(ok);
        ok
    }

    fn site_ok(&self, site: &CallSite, memo: &mut Vec<Option<bool>>) -> bool {
        if !self.method_ready(site.method.0, memo) {
            return false;
        }
        match (&self.methods[site.method.0].validator, &site.probe) {
            (Some(validator), Some(probe)) => validator(&probe()),
            _ => true,
        }
    }

    fn site_validates(&self, caller: usize, site_idx: usize) -> bool {
        let site = &self.methods[caller].calls[site_idx];
        match (&self.methods[site.method.0].validator, &site.probe) {
            (Some(validator), Some(probe)) => validator(&probe()),
            _ => true,
        }
    }
}

/// Call context handed to granted bodies during phase 2.
///
/// All method invocation goes through [`CallCtx::call`], which enforces the
/// declared call graph, the single-fire rule, and readiness, then dispatches
/// the callee's body with the caller's argument packet.
pub struct CallCtx<'a> {
    methods: &'a mut Vec<MethodSlot>,
    method_names: &'a [String],
    tx_names: &'a [String],
    wiring: &'a Wiring,
    ready: &'a BitVec,
    fired: &'a mut BitVec,
    frames: Vec<ActionRef>,
}

impl CallCtx<'_> {
    /// Calls a method with the given arguments, returning its output packet.
    ///
    /// The call must have been declared as a call site of the current caller;
    /// the method must be ready and must not have fired this cycle.
    pub fn call(&mut self, method: MethodId, args: &Packet) -> Result<Packet, FatalError> {
        let m = method.0;
        let caller = self.frames[self.frames.len() - 1];

        let declared = match caller {
            ActionRef::Tx(t) => self.wiring.tx_calls[t.0].get(m),
            ActionRef::Method(c) => self.wiring.method_calls[c.0].get(m),
        };
        if !declared {
            return Err(FatalError::UndeclaredCall {
                caller: self.frame_name(caller),
                method: self.method_names[m].clone(),
            });
        }
        if self.fired.get(m) {
            return Err(FatalError::DoubleFire(self.method_names[m].clone()));
        }
        if !self.ready.get(m) {
            return Err(FatalError::NotReady(self.method_names[m].clone()));
        }
        if **args.layout() != *self.methods[m].input {
            return Err(FatalError::ArgLayoutMismatch(self.method_names[m].clone()));
        }
        if let Some(validator) = &self.methods[m].validator {
            if !validator(args) {
                return Err(FatalError::ValidatorRejected(self.method_names[m].clone()));
            }
        }

        self.fired.set(m, true);
        let Some(mut body) = self.methods[m].body.take() else {
            // The single-fire check above makes re-entry unreachable.
            return Err(FatalError::DoubleFire(self.method_names[m].clone()));
        };
        self.frames.push(ActionRef::Method(method));
        let result = body(self, args);
        let _ = self.frames.pop();
        self.methods[m].body = Some(body);
        let out = result?;

        if **out.layout() != *self.methods[m].output {
            return Err(FatalError::ArgLayoutMismatch(self.method_names[m].clone()));
        }
        Ok(out)
    }

    /// Input layout of a registered method, for building argument packets.
    pub fn input_layout(&self, method: MethodId) -> LayoutRef {
        LayoutRef::clone(&self.methods[method.0].input)
    }

    fn frame_name(&self, frame: ActionRef) -> String {
        match frame {
            ActionRef::Tx(t) => self.tx_names[t.0].clone(),
            ActionRef::Method(m) => self.method_names[m.0].clone(),
        }
    }
}
