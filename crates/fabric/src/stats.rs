//! Scheduling statistics and observability hooks.
//!
//! External telemetry attaches to the circuit through the [`Observer`] trait
//! and receives one [`CycleReport`] per evaluated cycle, after arbitration
//! and body execution but before the clock edge. Observers cannot influence
//! scheduling. This module provides:
//! 1. **Reports:** the per-cycle request/runnable/granted/fired snapshot.
//! 2. **Counters:** [`SchedStats`], an observer accumulating per-transaction
//!    and per-method activity.
//! 3. **Export:** a serializable snapshot with derived rates, plus JSON output.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use crate::common::BitVec;

/// What happened in one evaluated cycle.
#[derive(Clone, Debug)]
pub struct CycleReport {
    /// Index of the evaluated cycle, starting at 0.
    pub cycle: u64,
    /// Transactions whose request predicate held.
    pub requested: BitVec,
    /// Requesting transactions whose full call tree was ready.
    pub runnable: BitVec,
    /// Transactions granted by arbitration.
    pub granted: BitVec,
    /// Methods that fired.
    pub fired: BitVec,
}

/// Per-cycle telemetry hook. Attached observers see every cycle exactly once.
pub trait Observer {
    /// Called once per evaluated cycle.
    fn on_cycle(&mut self, report: &CycleReport);
}

/// Shared-handle observers, so callers can keep reading the stats they attach.
impl<T: Observer> Observer for Rc<RefCell<T>> {
    fn on_cycle(&mut self, report: &CycleReport) {
        self.borrow_mut().on_cycle(report);
    }
}

/// Counter-accumulating observer over a whole run.
pub struct SchedStats {
    cycles: u64,
    tx_requests: Vec<u64>,
    tx_runnable: Vec<u64>,
    tx_grants: Vec<u64>,
    method_fires: Vec<u64>,
}

impl SchedStats {
    /// Creates zeroed counters for a circuit with the given action counts.
    pub fn new(n_transactions: usize, n_methods: usize) -> Self {
        Self {
            cycles: 0,
            tx_requests: vec![0; n_transactions],
            tx_runnable: vec![0; n_transactions],
            tx_grants: vec![0; n_transactions],
            method_fires: vec![0; n_methods],
        }
    }

    /// Number of cycles observed.
    #[inline]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Cycles in which the given transaction requested.
    #[inline]
    pub fn requests(&self, tx: usize) -> u64 {
        self.tx_requests[tx]
    }

    /// Cycles in which the given transaction was granted.
    #[inline]
    pub fn grants(&self, tx: usize) -> u64 {
        self.tx_grants[tx]
    }

    /// Cycles in which the given method fired.
    #[inline]
    pub fn fires(&self, method: usize) -> u64 {
        self.method_fires[method]
    }

    /// Produces a serializable snapshot with derived rates.
    pub fn snapshot(&self) -> StatsSnapshot {
        let per_tx = self
            .tx_grants
            .iter()
            .zip(&self.tx_requests)
            .zip(&self.tx_runnable)
            .map(|((grants, requests), runnable)| TxStats {
                requests: *requests,
                runnable: *runnable,
                grants: *grants,
                grant_rate: if *requests == 0 {
                    0.0
                } else {
                    *grants as f64 / *requests as f64
                },
            })
            .collect();
        StatsSnapshot {
            cycles: self.cycles,
            transactions: per_tx,
            method_fires: self.method_fires.clone(),
        }
    }

    /// Serializes the snapshot to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}

impl Observer for SchedStats {
    fn on_cycle(&mut self, report: &CycleReport) {
        self.cycles += 1;
        for t in report.requested.iter_ones() {
            self.tx_requests[t] += 1;
        }
        for t in report.runnable.iter_ones() {
            self.tx_runnable[t] += 1;
        }
        for t in report.granted.iter_ones() {
            self.tx_grants[t] += 1;
        }
        for m in report.fired.iter_ones() {
            self.method_fires[m] += 1;
        }
    }
}

/// Point-in-time view of [`SchedStats`], suitable for export.
#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    /// Cycles observed.
    pub cycles: u64,
    /// Per-transaction activity, indexed by transaction id.
    pub transactions: Vec<TxStats>,
    /// Fire counts per method, indexed by method id.
    pub method_fires: Vec<u64>,
}

/// Activity of a single transaction over the observed run.
#[derive(Clone, Debug, Serialize)]
pub struct TxStats {
    /// Cycles in which the request predicate held.
    pub requests: u64,
    /// Cycles in which the transaction was runnable.
    pub runnable: u64,
    /// Cycles in which the transaction was granted.
    pub grants: u64,
    /// Grants per request; 0 when never requested.
    pub grant_rate: f64,
}
