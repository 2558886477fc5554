//! Associative (content-addressed) store.
//!
//! A bounded array of `(key, value)` slots searched by content. Two arbiters
//! drive it: a free-slot arbiter over the inverted valid mask chooses where
//! `push` inserts, and a match arbiter chooses which slot `pop` returns when
//! several hold the requested key. Both operations stage their slot updates
//! and commit at the clock edge, so a `pop` in the same cycle as a `push`
//! always observes pre-push contents.

use std::cell::RefCell;
use std::rc::Rc;

use crate::arbiter::PriorityArbiter;
use crate::common::{BitVec, BuildError, FatalError};
use crate::config::CamConfig;
use crate::core::circuit::{CircuitBuilder, Clocked};
use crate::core::decl::{MethodDecl, MethodId, Ready};
use crate::core::layout::{Layout, LayoutRef, Packet};

struct CamState {
    valids: BitVec,
    keys: Vec<u64>,
    data: Vec<u64>,
    free_arbiter: PriorityArbiter,
    match_arbiter: PriorityArbiter,
    staged_push: Option<(usize, u64, u64)>,
    staged_pop: Option<usize>,
}

impl Clocked for CamState {
    fn commit(&mut self) {
        // Push targets a free slot and pop clears a valid one, so the two
        // staged updates can never collide on a slot.
        if let Some((slot, key, data)) = self.staged_push.take() {
            self.valids.set(slot, true);
            self.keys[slot] = key;
            self.data[slot] = data;
        }
        if let Some(slot) = self.staged_pop.take() {
            self.valids.set(slot, false);
        }
    }
}

/// Handle to an attached associative store and its registered methods.
///
/// `push(key, data)` is ready iff a slot is free; `pop(key)` always runs and
/// reports misses through a `not_found` flag. If several slots hold the same
/// key, `pop` removes the lowest-indexed match; which duplicate that is, is a
/// property of the priority order, not of insertion history.
pub struct AssocStore {
    /// The insertion method: input `(key, data)`, no output.
    pub push: MethodId,
    /// The lookup-and-remove method: input `(key)`, output `(data, not_found)`.
    pub pop: MethodId,
    key_layout: LayoutRef,
    data_layout: LayoutRef,
    push_in: LayoutRef,
    pop_in: LayoutRef,
    pop_out: LayoutRef,
    state: Rc<RefCell<CamState>>,
}

impl AssocStore {
    /// Attaches an associative store to the circuit.
    ///
    /// Key and value layouts must each pack into 64 bits.
    pub fn attach(
        cb: &mut CircuitBuilder,
        name: &str,
        key_layout: &LayoutRef,
        data_layout: &LayoutRef,
        cfg: &CamConfig,
    ) -> Result<Self, BuildError> {
        let entries = cfg.entries;
        if entries == 0 {
            return Err(BuildError::ZeroCapacity(name.to_string()));
        }
        for layout in [key_layout, data_layout] {
            if layout.width() > 64 {
                return Err(BuildError::LayoutTooWide {
                    layout: layout.name().to_string(),
                    width: layout.width(),
                });
            }
        }
        let key_bits = key_layout.width().max(1) as u32;
        let data_bits = data_layout.width().max(1) as u32;

        let push_in = Layout::new(
            &format!("{name}.push_in"),
            &[("key", key_bits), ("data", data_bits)],
        )?;
        let pop_in = Layout::new(&format!("{name}.pop_in"), &[("key", key_bits)])?;
        let pop_out = Layout::new(
            &format!("{name}.pop_out"),
            &[("data", data_bits), ("not_found", 1)],
        )?;

        let state = Rc::new(RefCell::new(CamState {
            valids: BitVec::zeros(entries),
            keys: vec![0; entries],
            data: vec![0; entries],
            free_arbiter: PriorityArbiter::new(entries),
            match_arbiter: PriorityArbiter::new(entries),
            staged_push: None,
            staged_pop: None,
        }));

        let push_state = Rc::clone(&state);
        let ready_state = Rc::clone(&state);
        let push_name = format!("{name}.push");
        let push_err = push_name.clone();
        let empty = Layout::empty();
        let push = cb.add_method(
            MethodDecl::new(
                &push_name,
                &push_in,
                &empty,
                Box::new(move |_ctx, args| {
                    let mut st = push_state.borrow_mut();
                    let free = st.valids.inverted();
                    let slot = st
                        .free_arbiter
                        .select_one(&free)
                        .ok_or_else(|| FatalError::NotReady(push_err.clone()))?;
                    st.staged_push = Some((slot, args.get("key"), args.get("data")));
                    Ok(Packet::zero(&Layout::empty()))
                }),
            )
            .ready(Ready::When(Box::new(move || {
                !ready_state.borrow().valids.all()
            }))),
        );

        let pop_state = Rc::clone(&state);
        let pop_out_body = LayoutRef::clone(&pop_out);
        let pop = cb.add_method(MethodDecl::new(
            &format!("{name}.pop"),
            &pop_in,
            &pop_out,
            Box::new(move |_ctx, args| {
                let mut st = pop_state.borrow_mut();
                let key = args.get("key");
                let matches =
                    BitVec::from_fn(st.valids.width(), |i| st.valids.get(i) && st.keys[i] == key);
                let out = match st.match_arbiter.select_one(&matches) {
                    Some(slot) => {
                        st.staged_pop = Some(slot);
                        Packet::with(&pop_out_body, &[("data", st.data[slot]), ("not_found", 0)])
                    }
                    None => Packet::with(&pop_out_body, &[("not_found", 1)]),
                };
                Ok(out)
            }),
        ));

        cb.add_clocked(state.clone());

        Ok(Self {
            push,
            pop,
            key_layout: LayoutRef::clone(key_layout),
            data_layout: LayoutRef::clone(data_layout),
            push_in,
            pop_in,
            pop_out,
            state,
        })
    }

    /// Builds a `push` argument packet from key and value packets.
    pub fn push_args(&self, key: &Packet, data: &Packet) -> Packet {
        Packet::with(
            &self.push_in,
            &[("key", key.pack()), ("data", data.pack())],
        )
    }

    /// Builds a `pop` argument packet from a key packet.
    pub fn pop_args(&self, key: &Packet) -> Packet {
        Packet::with(&self.pop_in, &[("key", key.pack())])
    }

    /// Unpacks a `pop` output's data field into the value layout.
    pub fn unpack_data(&self, out: &Packet) -> Packet {
        Packet::unpack(&self.data_layout, out.get("data"))
    }

    /// The key layout this store was attached with.
    pub fn key_layout(&self) -> &LayoutRef {
        &self.key_layout
    }

    /// The `pop` output layout (`data`, `not_found`).
    pub fn pop_out_layout(&self) -> &LayoutRef {
        &self.pop_out
    }

    /// Number of currently valid slots (committed state).
    pub fn occupancy(&self) -> usize {
        self.state.borrow().valids.count_ones()
    }

    /// True when every slot is valid.
    pub fn is_full(&self) -> bool {
        self.state.borrow().valids.all()
    }
}
