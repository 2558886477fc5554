//! Banked store: one read port, one write port, synchronous cells.
//!
//! Reads are split across cycles: `read_req` captures an address, and the
//! value read from it becomes available to `read_resp` from the next cycle
//! on. Writes land at the clock edge, with optional sub-word granularity.
//!
//! Two hazard policies govern a write aimed at the address of a same-cycle
//! read request. Under the default *safe* policy the write is deferred one
//! cycle so the read observes pre-write data, and the bank holds `read_req`
//! and `write` not-ready while the deferred write drains. With
//! `safe_writes = false` the write is never deferred and a same-cycle read
//! of the same address observes the new data: a documented throughput
//! optimisation for callers that never alias addresses across the two ports.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::common::{BuildError, FatalError};
use crate::config::{BankConfig, bits_for};
use crate::core::circuit::{CircuitBuilder, Clocked};
use crate::core::decl::{MethodDecl, MethodId, Ready};
use crate::core::layout::{Layout, LayoutRef, Packet, width_mask};

struct WriteCmd {
    addr: usize,
    data: u64,
    mask: u64,
}

struct BankState {
    name: String,
    cells: Vec<u64>,
    granularity: Option<u32>,
    mask_chunks: u32,
    safe_writes: bool,
    /// Captured response, held until `read_resp` consumes it.
    resp: Option<u64>,
    /// Write deferred by the safe policy, applied at the next edge.
    write_pending: Option<WriteCmd>,
    staged_read: Option<usize>,
    staged_resp_taken: bool,
    staged_write: Option<WriteCmd>,
}

impl BankState {
    fn apply(&mut self, cmd: &WriteCmd) {
        match self.granularity {
            None => self.cells[cmd.addr] = cmd.data,
            Some(g) => {
                let mut cell = self.cells[cmd.addr];
                for chunk in 0..self.mask_chunks {
                    if (cmd.mask >> chunk) & 1 == 1 {
                        let shift = chunk * g;
                        let lane = width_mask(g) << shift;
                        cell = (cell & !lane) | (cmd.data & lane);
                    }
                }
                self.cells[cmd.addr] = cell;
            }
        }
    }
}

impl Clocked for BankState {
    fn commit(&mut self) {
        if let Some(cmd) = self.write_pending.take() {
            self.apply(&cmd);
        }
        if self.staged_resp_taken {
            self.resp = None;
            self.staged_resp_taken = false;
        }
        if let Some(cmd) = self.staged_write.take() {
            if self.safe_writes && self.staged_read == Some(cmd.addr) {
                trace!(bank = %self.name, addr = cmd.addr, "write deferred behind in-flight read");
                self.write_pending = Some(cmd);
            } else {
                // Applied before the read capture below, so with unsafe
                // writes a same-address read observes the new data.
                self.apply(&cmd);
            }
        }
        if let Some(addr) = self.staged_read.take() {
            self.resp = Some(self.cells[addr]);
        }
    }
}

/// Handle to an attached banked store and its registered methods.
pub struct MemBank {
    /// Captures a read address; ready while no write is deferred.
    pub read_req: MethodId,
    /// Returns the captured read's data; ready once a response is held.
    pub read_resp: MethodId,
    /// Writes a cell (optionally masked); ready while no write is deferred.
    pub write: MethodId,
    data_layout: LayoutRef,
    read_req_in: LayoutRef,
    write_in: LayoutRef,
    mask_bits: Option<u32>,
    state: Rc<RefCell<BankState>>,
}

impl MemBank {
    /// Attaches a banked store to the circuit.
    ///
    /// The data layout must pack into 64 bits; a configured granularity must
    /// divide the packed width evenly.
    pub fn attach(
        cb: &mut CircuitBuilder,
        name: &str,
        data_layout: &LayoutRef,
        cfg: &BankConfig,
    ) -> Result<Self, BuildError> {
        if cfg.elem_count == 0 {
            return Err(BuildError::ZeroCapacity(name.to_string()));
        }
        let width = data_layout.width();
        if width > 64 || width == 0 {
            return Err(BuildError::LayoutTooWide {
                layout: data_layout.name().to_string(),
                width,
            });
        }
        let mask_bits = match cfg.granularity {
            None => None,
            Some(g) => {
                if g == 0 || width % g as usize != 0 {
                    return Err(BuildError::BadGranularity {
                        granularity: g,
                        width,
                    });
                }
                Some((width / g as usize) as u32)
            }
        };

        let addr_bits = bits_for(cfg.elem_count);
        let read_req_in = Layout::new(&format!("{name}.read_req_in"), &[("addr", addr_bits)])?;
        let mut write_fields = vec![("addr", addr_bits), ("data", width as u32)];
        if let Some(bits) = mask_bits {
            write_fields.push(("mask", bits));
        }
        let write_in = Layout::new(&format!("{name}.write_in"), &write_fields)?;

        let state = Rc::new(RefCell::new(BankState {
            name: name.to_string(),
            cells: vec![0; cfg.elem_count],
            granularity: cfg.granularity,
            mask_chunks: mask_bits.unwrap_or(0),
            safe_writes: cfg.safe_writes,
            resp: None,
            write_pending: None,
            staged_read: None,
            staged_resp_taken: false,
            staged_write: None,
        }));

        let elem_count = cfg.elem_count;
        let empty = Layout::empty();

        let req_state = Rc::clone(&state);
        let req_ready = Rc::clone(&state);
        let read_req = cb.add_method(
            MethodDecl::new(
                &format!("{name}.read_req"),
                &read_req_in,
                &empty,
                Box::new(move |_ctx, args| {
                    // Addresses wrap at the capacity, as a hardware address
                    // field truncates.
                    let addr = args.get("addr") as usize % elem_count;
                    req_state.borrow_mut().staged_read = Some(addr);
                    Ok(Packet::zero(&Layout::empty()))
                }),
            )
            .ready(Ready::When(Box::new(move || {
                req_ready.borrow().write_pending.is_none()
            }))),
        );

        let resp_state = Rc::clone(&state);
        let resp_ready = Rc::clone(&state);
        let resp_name = format!("{name}.read_resp");
        let resp_err = resp_name.clone();
        let resp_out = LayoutRef::clone(data_layout);
        let read_resp = cb.add_method(
            MethodDecl::new(
                &resp_name,
                &empty,
                data_layout,
                Box::new(move |_ctx, _args| {
                    let mut st = resp_state.borrow_mut();
                    let bits = st.resp.ok_or_else(|| FatalError::NotReady(resp_err.clone()))?;
                    st.staged_resp_taken = true;
                    Ok(Packet::unpack(&resp_out, bits))
                }),
            )
            .ready(Ready::When(Box::new(move || {
                resp_ready.borrow().resp.is_some()
            }))),
        );

        let write_state = Rc::clone(&state);
        let write_ready = Rc::clone(&state);
        let has_mask = mask_bits.is_some();
        let write = cb.add_method(
            MethodDecl::new(
                &format!("{name}.write"),
                &write_in,
                &empty,
                Box::new(move |_ctx, args| {
                    let addr = args.get("addr") as usize % elem_count;
                    let mask = if has_mask { args.get("mask") } else { u64::MAX };
                    write_state.borrow_mut().staged_write = Some(WriteCmd {
                        addr,
                        data: args.get("data"),
                        mask,
                    });
                    Ok(Packet::zero(&Layout::empty()))
                }),
            )
            .ready(Ready::When(Box::new(move || {
                write_ready.borrow().write_pending.is_none()
            }))),
        );

        cb.add_clocked(state.clone());

        Ok(Self {
            read_req,
            read_resp,
            write,
            data_layout: LayoutRef::clone(data_layout),
            read_req_in,
            write_in,
            mask_bits,
            state,
        })
    }

    /// Builds a `read_req` argument packet.
    pub fn read_req_args(&self, addr: u64) -> Packet {
        Packet::with(&self.read_req_in, &[("addr", addr)])
    }

    /// Builds a `write` argument packet; `mask` is ignored unless the bank
    /// was attached with a granularity.
    pub fn write_args(&self, addr: u64, data: &Packet, mask: u64) -> Packet {
        let mut p = Packet::with(&self.write_in, &[("addr", addr), ("data", data.pack())]);
        if self.mask_bits.is_some() {
            p.set("mask", mask);
        }
        p
    }

    /// The data layout this bank was attached with.
    pub fn data_layout(&self) -> &LayoutRef {
        &self.data_layout
    }

    /// True while a deferred write is draining (committed state).
    pub fn write_pending(&self) -> bool {
        self.state.borrow().write_pending.is_some()
    }
}
