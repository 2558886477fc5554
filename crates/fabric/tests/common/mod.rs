//! Shared test infrastructure for circuit-level tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use txfab_core::CircuitBuilder;
use txfab_core::core::decl::{MethodDecl, MethodId, Request, TxDecl, TxId};
use txfab_core::core::layout::{Layout, LayoutRef, Packet};

/// A one-shot driver around a method: stage arguments, request for one grant,
/// capture the result.
///
/// The driver transaction requests while `fire`d and clears its own request
/// once granted, so a stimulus that loses arbitration simply retries on the
/// following cycles — the retry semantics callers of a not-granted action get.
pub struct Port {
    /// The driver transaction's handle.
    pub tx: TxId,
    req: Rc<Cell<bool>>,
    args: Rc<RefCell<Option<Packet>>>,
    out: Rc<RefCell<Option<Packet>>>,
}

impl Port {
    /// Stages arguments and raises the request line.
    pub fn fire(&self, args: Packet) {
        *self.args.borrow_mut() = Some(args);
        self.req.set(true);
    }

    /// Whether the request is still pending (not yet granted).
    pub fn pending(&self) -> bool {
        self.req.get()
    }

    /// Takes the captured result of the last grant, if any.
    pub fn result(&self) -> Option<Packet> {
        self.out.borrow_mut().take()
    }
}

/// Attaches a driver transaction for `method` with the given priority.
pub fn driver(cb: &mut CircuitBuilder, name: &str, method: MethodId, priority: u32) -> Port {
    let req = Rc::new(Cell::new(false));
    let args = Rc::new(RefCell::new(None::<Packet>));
    let out = Rc::new(RefCell::new(None::<Packet>));

    let body_req = Rc::clone(&req);
    let body_args = Rc::clone(&args);
    let body_out = Rc::clone(&out);
    let req_line = Rc::clone(&req);
    let args_line = Rc::clone(&args);

    let tx = cb.add_transaction(
        TxDecl::new(
            name,
            Box::new(move |ctx| {
                let staged = body_args.borrow().clone();
                let Some(staged) = staged else {
                    return Ok(());
                };
                let result = ctx.call(method, &staged)?;
                *body_out.borrow_mut() = Some(result);
                body_req.set(false);
                Ok(())
            }),
        )
        .request(Request::When(Box::new(move || {
            req_line.get() && args_line.borrow().is_some()
        })))
        .priority(priority)
        .calls(method),
    );

    Port { tx, req, args, out }
}

/// A reorder-buffer stub exposing the oldest-instruction index as a method.
pub struct RobStub {
    /// The registered provider method; output carries a `start` field.
    pub get_indices: MethodId,
    /// Externally settable base index.
    pub start: Rc<Cell<u64>>,
}

/// Attaches an always-ready index provider to the circuit.
pub fn rob_stub(cb: &mut CircuitBuilder, rob_bits: u32) -> RobStub {
    let start = Rc::new(Cell::new(0));
    let out_layout = Layout::new("rob.indices_out", &[("start", rob_bits)]).unwrap();
    let body_start = Rc::clone(&start);
    let body_out = LayoutRef::clone(&out_layout);
    let get_indices = cb.add_method(MethodDecl::new(
        "rob.get_indices",
        &Layout::empty(),
        &out_layout,
        Box::new(move |_ctx, _args| {
            Ok(Packet::with(&body_out, &[("start", body_start.get())]))
        }),
    ));
    RobStub { get_indices, start }
}

/// Installs the tracing subscriber once, honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
