// Callback — The observation contract between a parser and its consumer
//
// A parser drives exactly one graph through a callback, in strict order:
//
//   begin_graph → operation* → end_graph
//
// `is_atomic` may be queried any number of times in between. It decides
// whether a compound operation is reported as a single opaque operation or
// expanded into the operations of its body.

use crate::error::Result;
use crate::graph::{Dictionary, Prototype, Shape, Value};

/// The parser's built-in notion of which operations are atomic.
pub trait AtomicPolicy {
    fn is_atomic(&self, proto: &Prototype, args: &Dictionary<Value>) -> bool;
}

/// Receives parse events.
pub trait Callback {
    /// The graph declaration, before any operation.
    fn begin_graph(&mut self, proto: &Prototype) -> Result<()>;

    /// One resolved operation. `args` maps every parameter and result name of
    /// `proto` to its value; `shapes` holds every tensor defined so far.
    fn operation(
        &mut self,
        proto: &Prototype,
        args: &Dictionary<Value>,
        shapes: &Dictionary<Shape>,
    ) -> Result<()>;

    /// The graph declaration again, with the final shape of every tensor.
    fn end_graph(&mut self, proto: &Prototype, shapes: &Dictionary<Shape>) -> Result<()>;

    /// Whether `proto` should stay opaque. Defaults to the parser's policy.
    fn is_atomic(
        &self,
        proto: &Prototype,
        args: &Dictionary<Value>,
        defaults: &dyn AtomicPolicy,
    ) -> bool {
        defaults.is_atomic(proto, args)
    }
}
