//! Reservation-station dependency tracker for memory operations.
//!
//! Entries enter through `select` (reserve a slot) and `insert` (fill it).
//! On insertion the station computes, against every resident entry, whether
//! the two accesses might conflict: they do when either address is still
//! unresolved, or when the resolved addresses are equal after discarding the
//! configured alignment bits. The comparison is deliberately conservative —
//! false positives only delay issue, a false negative would reorder aliasing
//! accesses. An entry may issue through `take` once its operands are
//! resolved and every entry it depends on has left the station.
//!
//! Fence-class entries additionally close the station: `select` stays
//! not-ready from the cycle the fence is observed until the fence itself is
//! taken. The same-cycle half of that guarantee comes from a declared
//! `select`/`insert` conflict, the rest from a sticky flag.
//!
//! Relative age between entries is decided by wrap-aware subtraction against
//! a monotonically-advancing base index, fetched every cycle from an
//! externally registered provider method.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::arbiter::PriorityArbiter;
use crate::common::{BitVec, BuildError, FatalError};
use crate::config::{StationConfig, bits_for};
use crate::core::circuit::{CircuitBuilder, Clocked};
use crate::core::decl::{MethodDecl, MethodId, Ready, TxDecl};
use crate::core::layout::{Layout, LayoutRef, Packet, width_mask};

/// Wrap-aware age comparison: is `a` older than `b`, given the current base
/// index of the surrounding reorder buffer?
///
/// Indices advance monotonically and wrap at `rob_bits`, so the distance from
/// the base index orders any two live entries.
pub fn is_older(a: u64, b: u64, start: u64, rob_bits: u32) -> bool {
    let mask = width_mask(rob_bits);
    (a.wrapping_sub(start) & mask) < (b.wrapping_sub(start) & mask)
}

#[derive(Clone)]
struct Slot {
    full: bool,
    reserved: bool,
    rob_id: u64,
    base_tag: u64,
    base_val: u64,
    offset: u64,
    src_tag: u64,
    src_val: u64,
    fence: bool,
    depends: BitVec,
}

impl Slot {
    fn empty(entries: usize) -> Self {
        Self {
            full: false,
            reserved: false,
            rob_id: 0,
            base_tag: 0,
            base_val: 0,
            offset: 0,
            src_tag: 0,
            src_val: 0,
            fence: false,
            depends: BitVec::zeros(entries),
        }
    }

    /// Resolved address, if the base operand is available and the entry full.
    fn address(&self, val_mask: u64) -> Option<u64> {
        (self.full && self.base_tag == 0)
            .then(|| self.base_val.wrapping_add(self.offset) & val_mask)
    }
}

struct StationState {
    slots: Vec<Slot>,
    fence_pending: bool,
    /// Base index latched from the provider; combinational within the cycle.
    rob_start: u64,
    alignment_bits: u32,
    rob_bits: u32,
    val_mask: u64,
    select_arbiter: PriorityArbiter,
    take_arbiter: PriorityArbiter,
    staged_reserve: Option<usize>,
    staged_insert: Option<(usize, Slot)>,
    staged_updates: Vec<(u64, u64)>,
    staged_take: Option<usize>,
    staged_fence_set: bool,
    staged_fence_clear: bool,
}

impl StationState {
    fn issue_ready(&self) -> BitVec {
        BitVec::from_fn(self.slots.len(), |i| {
            let s = &self.slots[i];
            s.full && s.base_tag == 0 && s.src_tag == 0 && s.depends.none()
        })
    }

    /// Conservative may-alias test between a resident entry and a candidate.
    fn conflicts_with(&self, resident: &Slot, addr: Option<u64>) -> bool {
        match (resident.address(self.val_mask), addr) {
            (Some(a), Some(b)) => (a >> self.alignment_bits) == (b >> self.alignment_bits),
            // Either side unresolved: assume the worst.
            _ => true,
        }
    }
}

impl Clocked for StationState {
    fn commit(&mut self) {
        if let Some(slot) = self.staged_reserve.take() {
            self.slots[slot].reserved = true;
        }
        if let Some((slot, entry)) = self.staged_insert.take() {
            self.slots[slot] = entry;
        }
        for (tag, value) in self.staged_updates.drain(..) {
            // Tag 0 marks an already-resolved operand and never matches.
            if tag == 0 {
                continue;
            }
            for slot in &mut self.slots {
                if !slot.full {
                    continue;
                }
                if slot.base_tag == tag {
                    slot.base_val = value;
                    slot.base_tag = 0;
                }
                if slot.src_tag == tag {
                    slot.src_val = value;
                    slot.src_tag = 0;
                }
            }
        }
        if let Some(slot) = self.staged_take.take() {
            let entries = self.slots.len();
            self.slots[slot] = Slot::empty(entries);
            for s in &mut self.slots {
                s.depends.set(slot, false);
            }
        }
        if self.staged_fence_clear {
            self.fence_pending = false;
            self.staged_fence_clear = false;
        }
        if self.staged_fence_set {
            self.fence_pending = true;
            self.staged_fence_set = false;
        }
    }
}

/// Handle to an attached reservation station and its registered methods.
pub struct Station {
    /// Reserves a free slot; not ready while full or a fence is pending.
    pub select: MethodId,
    /// Fills a reserved slot and computes its dependency vector.
    pub insert: MethodId,
    /// Resolves pending operands of resident entries by tag.
    pub update: MethodId,
    /// Issues the lowest-indexed entry whose dependencies have cleared.
    pub take: MethodId,
    insert_in: LayoutRef,
    update_in: LayoutRef,
    take_out: LayoutRef,
    state: Rc<RefCell<StationState>>,
}

impl Station {
    /// Attaches a reservation station to the circuit.
    ///
    /// `indices` must be a registered method whose output carries a `start`
    /// field: the station polls it every cycle through an internal
    /// transaction to obtain the age base index.
    pub fn attach(
        cb: &mut CircuitBuilder,
        name: &str,
        cfg: &StationConfig,
        indices: MethodId,
    ) -> Result<Self, BuildError> {
        if cfg.entries == 0 {
            return Err(BuildError::ZeroCapacity(name.to_string()));
        }
        let entries = cfg.entries;
        let idx_bits = bits_for(entries);

        let empty = Layout::empty();
        let select_out = Layout::new(&format!("{name}.select_out"), &[("rs_entry_id", idx_bits)])?;
        let insert_in = Layout::new(
            &format!("{name}.insert_in"),
            &[
                ("rs_entry_id", idx_bits),
                ("rob_id", cfg.rob_bits),
                ("base_tag", cfg.tag_bits),
                ("base_val", cfg.val_bits),
                ("offset", cfg.val_bits),
                ("src_tag", cfg.tag_bits),
                ("src_val", cfg.val_bits),
                ("fence", 1),
            ],
        )?;
        let update_in = Layout::new(
            &format!("{name}.update_in"),
            &[("tag", cfg.tag_bits), ("value", cfg.val_bits)],
        )?;
        let take_out = Layout::new(
            &format!("{name}.take_out"),
            &[
                ("rs_entry_id", idx_bits),
                ("rob_id", cfg.rob_bits),
                ("addr", cfg.val_bits),
                ("src_val", cfg.val_bits),
                ("fence", 1),
            ],
        )?;

        let state = Rc::new(RefCell::new(StationState {
            slots: vec![Slot::empty(entries); entries],
            fence_pending: false,
            rob_start: 0,
            alignment_bits: cfg.alignment_bits,
            rob_bits: cfg.rob_bits,
            val_mask: width_mask(cfg.val_bits),
            select_arbiter: PriorityArbiter::new(entries),
            take_arbiter: PriorityArbiter::new(entries),
            staged_reserve: None,
            staged_insert: None,
            staged_updates: Vec::new(),
            staged_take: None,
            staged_fence_set: false,
            staged_fence_clear: false,
        }));

        let sel_state = Rc::clone(&state);
        let sel_ready = Rc::clone(&state);
        let sel_name = format!("{name}.select");
        let sel_err = sel_name.clone();
        let sel_out = LayoutRef::clone(&select_out);
        let select = cb.add_method(
            MethodDecl::new(
                &sel_name,
                &empty,
                &select_out,
                Box::new(move |_ctx, _args| {
                    let mut st = sel_state.borrow_mut();
                    let free = BitVec::from_fn(st.slots.len(), |i| !st.slots[i].reserved);
                    let slot = st
                        .select_arbiter
                        .select_one(&free)
                        .ok_or_else(|| FatalError::NotReady(sel_err.clone()))?;
                    st.staged_reserve = Some(slot);
                    Ok(Packet::with(&sel_out, &[("rs_entry_id", slot as u64)]))
                }),
            )
            .ready(Ready::When(Box::new(move || {
                let st = sel_ready.borrow();
                !st.fence_pending && st.slots.iter().any(|s| !s.reserved)
            }))),
        );

        let ins_state = Rc::clone(&state);
        let ins_name = format!("{name}.insert");
        let ins_log = ins_name.clone();
        let insert = cb.add_method(MethodDecl::new(
            &ins_name,
            &insert_in,
            &empty,
            Box::new(move |_ctx, args| {
                let mut st = ins_state.borrow_mut();
                let slot = args.get("rs_entry_id") as usize % st.slots.len();
                let rob_id = args.get("rob_id");
                let base_tag = args.get("base_tag");
                let fence = args.get("fence") == 1;

                let mut entry = Slot::empty(st.slots.len());
                entry.full = true;
                entry.reserved = true;
                entry.rob_id = rob_id;
                entry.base_tag = base_tag;
                entry.base_val = args.get("base_val");
                entry.offset = args.get("offset");
                entry.src_tag = args.get("src_tag");
                entry.src_val = args.get("src_val");
                entry.fence = fence;

                // Dependency vector against everything already resident and
                // older: unresolved addresses conflict with everything.
                let addr = entry.address(st.val_mask);
                entry.depends = BitVec::from_fn(st.slots.len(), |i| {
                    let resident = &st.slots[i];
                    resident.full
                        && is_older(resident.rob_id, rob_id, st.rob_start, st.rob_bits)
                        && st.conflicts_with(resident, addr)
                });

                if fence {
                    debug!(station = %ins_log, rob_id, "fence observed, closing selection");
                    st.staged_fence_set = true;
                }
                st.staged_insert = Some((slot, entry));
                Ok(Packet::zero(&Layout::empty()))
            }),
        ));

        let upd_state = Rc::clone(&state);
        let update = cb.add_method(MethodDecl::new(
            &format!("{name}.update"),
            &update_in,
            &empty,
            Box::new(move |_ctx, args| {
                upd_state
                    .borrow_mut()
                    .staged_updates
                    .push((args.get("tag"), args.get("value")));
                Ok(Packet::zero(&Layout::empty()))
            }),
        ));

        let take_state = Rc::clone(&state);
        let take_ready = Rc::clone(&state);
        let take_name = format!("{name}.take");
        let take_err = take_name.clone();
        let take_out_body = LayoutRef::clone(&take_out);
        let take = cb.add_method(
            MethodDecl::new(
                &take_name,
                &empty,
                &take_out,
                Box::new(move |_ctx, _args| {
                    let mut st = take_state.borrow_mut();
                    let ready = st.issue_ready();
                    let slot = st
                        .take_arbiter
                        .select_one(&ready)
                        .ok_or_else(|| FatalError::NotReady(take_err.clone()))?;
                    let entry = st.slots[slot].clone();
                    if entry.fence {
                        st.staged_fence_clear = true;
                    }
                    st.staged_take = Some(slot);
                    let addr = entry.base_val.wrapping_add(entry.offset) & st.val_mask;
                    Ok(Packet::with(
                        &take_out_body,
                        &[
                            ("rs_entry_id", slot as u64),
                            ("rob_id", entry.rob_id),
                            ("addr", addr),
                            ("src_val", entry.src_val),
                            ("fence", entry.fence as u64),
                        ],
                    ))
                }),
            )
            .ready(Ready::When(Box::new(move || {
                take_ready.borrow().issue_ready().any()
            }))),
        );

        // A fence arriving through `insert` must not race a same-cycle
        // `select`; the scheduler's mutual exclusion provides the
        // combinational half of the fence hold.
        cb.add_conflict(select, insert);

        // The age base index is fetched combinationally at the start of every
        // cycle, before any granted body can observe it.
        let poll_state = Rc::clone(&state);
        let _poll = cb.add_transaction(
            TxDecl::new(
                &format!("{name}.poll_indices"),
                Box::new(move |ctx| {
                    let args = Packet::zero(&ctx.input_layout(indices));
                    let out = ctx.call(indices, &args)?;
                    poll_state.borrow_mut().rob_start = out.get("start");
                    Ok(())
                }),
            )
            .priority(u32::MAX)
            .calls(indices),
        );

        cb.add_clocked(state.clone());

        Ok(Self {
            select,
            insert,
            update,
            take,
            insert_in,
            update_in,
            take_out,
            state,
        })
    }

    /// Builds an `insert` argument packet. A tag of 0 marks the operand as
    /// already resolved.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_args(
        &self,
        slot: u64,
        rob_id: u64,
        base_tag: u64,
        base_val: u64,
        offset: u64,
        src_tag: u64,
        src_val: u64,
        fence: bool,
    ) -> Packet {
        Packet::with(
            &self.insert_in,
            &[
                ("rs_entry_id", slot),
                ("rob_id", rob_id),
                ("base_tag", base_tag),
                ("base_val", base_val),
                ("offset", offset),
                ("src_tag", src_tag),
                ("src_val", src_val),
                ("fence", fence as u64),
            ],
        )
    }

    /// Builds an `update` argument packet.
    pub fn update_args(&self, tag: u64, value: u64) -> Packet {
        Packet::with(&self.update_in, &[("tag", tag), ("value", value)])
    }

    /// The `take` output layout.
    pub fn take_out_layout(&self) -> &LayoutRef {
        &self.take_out
    }

    /// Committed dependency vector of a slot.
    pub fn depends_of(&self, slot: usize) -> BitVec {
        self.state.borrow().slots[slot].depends.clone()
    }

    /// Whether a slot currently holds a full entry (committed state).
    pub fn is_full_entry(&self, slot: usize) -> bool {
        self.state.borrow().slots[slot].full
    }

    /// Whether a slot is reserved (committed state).
    pub fn is_reserved(&self, slot: usize) -> bool {
        self.state.borrow().slots[slot].reserved
    }

    /// Whether the sticky fence flag currently holds (committed state).
    pub fn fence_pending(&self) -> bool {
        self.state.borrow().fence_pending
    }

    /// The base index latched from the provider this cycle.
    pub fn rob_start(&self) -> u64 {
        self.state.borrow().rob_start
    }
}
