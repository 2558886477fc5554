//! Static call-graph and conflict analysis.
//!
//! All wiring is resolved once, when the circuit is built:
//! 1. **Cycle detection:** a method reachable from itself is a configuration
//!    error, not a runtime fault.
//! 2. **Closure:** the transitive set of methods each transaction can reach.
//! 3. **Conflict lifting:** the symmetric conflict relation over transactions,
//!    derived from shared callees, explicit declarations, and transitivity
//!    through the call graph.
//! 4. **Partitioning:** connected components of the lifted relation, walked
//!    the same way per cycle so arbitration stays local to each component.

use crate::common::{BitVec, BuildError};
use crate::core::decl::ActionRef;

/// Frozen wiring produced by [`analyze`], consumed by the circuit each cycle.
pub(crate) struct Wiring {
    /// Direct call sets per transaction, over methods.
    pub tx_calls: Vec<BitVec>,
    /// Direct call sets per method, over methods.
    pub method_calls: Vec<BitVec>,
    /// Transitive method closure per transaction.
    pub tx_closure: Vec<BitVec>,
    /// Symmetric conflict relation over transactions (no self edges).
    pub tx_conflicts: Vec<BitVec>,
    /// Connected components of the conflict relation, each sorted by index.
    pub components: Vec<Vec<usize>>,
    /// Body execution order: descending priority, then ascending index.
    pub tx_order: Vec<usize>,
}

/// Everything [`analyze`] needs about the declarations, without their bodies.
pub(crate) struct AnalyzeInput<'a> {
    /// Method names, for diagnostics.
    pub method_names: &'a [String],
    /// Transaction names, for diagnostics.
    pub tx_names: &'a [String],
    /// Direct callees per method.
    pub method_calls: &'a [Vec<usize>],
    /// Direct callees per transaction.
    pub tx_calls: &'a [Vec<usize>],
    /// Explicitly declared conflict pairs, in either order.
    pub explicit: &'a [(ActionRef, ActionRef)],
    /// Transaction priorities.
    pub priorities: &'a [u32],
    /// Whether each transaction requests unconditionally.
    pub tx_always: &'a [bool],
    /// Whether each method is unconditionally ready (no predicate, no validator).
    pub method_always: &'a [bool],
}

/// Runs the full build-time analysis.
pub(crate) fn analyze(input: &AnalyzeInput<'_>) -> Result<Wiring, BuildError> {
    let n_methods = input.method_names.len();
    let n_tx = input.tx_names.len();

    check_acyclic(input.method_names, input.method_calls)?;

    let method_calls: Vec<BitVec> = input
        .method_calls
        .iter()
        .map(|calls| callee_bits(n_methods, calls))
        .collect();
    let tx_calls: Vec<BitVec> = input
        .tx_calls
        .iter()
        .map(|calls| callee_bits(n_methods, calls))
        .collect();

    // Transitive closure per method, callee-first so each method's closure
    // is final before its callers use it. The DFS above proved the graph is
    // acyclic, so a simple fixpoint-free post-order pass suffices.
    let method_closure = method_closures(n_methods, input.method_calls);
    let tx_closure: Vec<BitVec> = (0..n_tx)
        .map(|t| {
            let mut closure = tx_calls[t].clone();
            for m in &input.tx_calls[t] {
                closure.or_with(&method_closure[*m]);
            }
            closure
        })
        .collect();

    let tx_conflicts = lift_conflicts(n_tx, &tx_closure, input.explicit);

    check_unambiguous(input, &tx_closure, &tx_conflicts)?;

    let components = connected_components(&tx_conflicts);

    let mut tx_order: Vec<usize> = (0..n_tx).collect();
    tx_order.sort_by(|a, b| {
        input.priorities[*b]
            .cmp(&input.priorities[*a])
            .then(a.cmp(b))
    });

    Ok(Wiring {
        tx_calls,
        method_calls,
        tx_closure,
        tx_conflicts,
        components,
        tx_order,
    })
}

fn callee_bits(n_methods: usize, calls: &[usize]) -> BitVec {
    let mut bits = BitVec::zeros(n_methods);
    for m in calls {
        bits.set(*m, true);
    }
    bits
}

/// Rejects call graphs in which a method can reach itself.
fn check_acyclic(names: &[String], calls: &[Vec<usize>]) -> Result<(), BuildError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    fn visit(
        m: usize,
        names: &[String],
        calls: &[Vec<usize>],
        colors: &mut [Color],
    ) -> Result<(), BuildError> {
        colors[m] = Color::Grey;
        for next in &calls[m] {
            match colors[*next] {
                Color::Grey => return Err(BuildError::CyclicCallGraph(names[*next].clone())),
                Color::White => visit(*next, names, calls, colors)?,
                Color::Black => {}
            }
        }
        colors[m] = Color::Black;
        Ok(())
    }

    let mut colors = vec![Color::White; names.len()];
    for m in 0..names.len() {
        if colors[m] == Color::White {
            visit(m, names, calls, &mut colors)?;
        }
    }
    Ok(())
}

/// Transitive callee sets per method (callee included, method itself included).
fn method_closures(n_methods: usize, calls: &[Vec<usize>]) -> Vec<BitVec> {
    fn fill(m: usize, calls: &[Vec<usize>], closures: &mut Vec<BitVec>, done: &mut [bool]) {
        if done[m] {
            return;
        }
        done[m] = true;
        for next in calls[m].clone() {
            fill(next, calls, closures, done);
            let sub = closures[next].clone();
            closures[m].or_with(&sub);
        }
        closures[m].set(m, true);
    }

    let mut closures: Vec<BitVec> = (0..n_methods).map(|_| BitVec::zeros(n_methods)).collect();
    let mut done = vec![false; n_methods];
    for m in 0..n_methods {
        fill(m, calls, &mut closures, &mut done);
    }
    closures
}

/// Lifts the conflict relation to transaction level.
///
/// Two distinct transactions conflict when their method closures intersect
/// (both could fire a shared method) or when an explicit conflict pair links
/// anything in their scopes, where a transaction's scope is itself plus its
/// method closure. Explicit conflicts thereby propagate through the call
/// graph without further work.
fn lift_conflicts(
    n_tx: usize,
    tx_closure: &[BitVec],
    explicit: &[(ActionRef, ActionRef)],
) -> Vec<BitVec> {
    let mut conflicts: Vec<BitVec> = (0..n_tx).map(|_| BitVec::zeros(n_tx)).collect();

    let in_scope = |t: usize, a: ActionRef| match a {
        ActionRef::Tx(tx) => tx.0 == t,
        ActionRef::Method(m) => tx_closure[t].get(m.0),
    };

    for t1 in 0..n_tx {
        for t2 in (t1 + 1)..n_tx {
            let shared = tx_closure[t1].intersects(&tx_closure[t2]);
            let declared = explicit.iter().any(|(a, b)| {
                (in_scope(t1, *a) && in_scope(t2, *b)) || (in_scope(t1, *b) && in_scope(t2, *a))
            });
            if shared || declared {
                conflicts[t1].set(t2, true);
                conflicts[t2].set(t1, true);
            }
        }
    }
    conflicts
}

/// Rejects conflicting pairs whose schedule would be ambiguous: both always
/// requesting, both gated only by always-ready methods, equal priority.
fn check_unambiguous(
    input: &AnalyzeInput<'_>,
    tx_closure: &[BitVec],
    tx_conflicts: &[BitVec],
) -> Result<(), BuildError> {
    let always_runnable = |t: usize| {
        input.tx_always[t] && tx_closure[t].iter_ones().all(|m| input.method_always[m])
    };

    for t1 in 0..tx_conflicts.len() {
        for t2 in tx_conflicts[t1].iter_ones().filter(|t2| *t2 > t1) {
            if input.priorities[t1] == input.priorities[t2]
                && always_runnable(t1)
                && always_runnable(t2)
            {
                return Err(BuildError::AmbiguousPriority {
                    a: input.tx_names[t1].clone(),
                    b: input.tx_names[t2].clone(),
                });
            }
        }
    }
    Ok(())
}

/// Connected components of the conflict relation, by iterative stack walk.
fn connected_components(conflicts: &[BitVec]) -> Vec<Vec<usize>> {
    let n = conflicts.len();
    let mut visited = vec![false; n];
    let mut components = Vec::new();

    for start in 0..n {
        if visited[start] {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![start];
        while let Some(t) = stack.pop() {
            if visited[t] {
                continue;
            }
            visited[t] = true;
            component.push(t);
            stack.extend(conflicts[t].iter_ones());
        }
        component.sort_unstable();
        components.push(component);
    }
    components
}
