// Printer — Callback sink that renders the canonical text of a graph
//
//   graph G( a, b ) -> ( c )
//   {
//   	t1 = conv(a, b, 0.0, border = 'constant', ...)
//   	c = relu(t1)
//   }
//
// Besides rendering, the sink records the declared shape of every `variable`
// so the sidecar files can be verified after parsing.

use std::io::Write;

use crate::atomics::AtomicOverrides;
use crate::callback::{AtomicPolicy, Callback};
use crate::error::Result;
use crate::graph::{Dictionary, Prototype, Shape, Value};

/// `graph <name>( <params> ) -> ( <results> )`
pub fn render_graph_header(proto: &Prototype) -> String {
    let params: Vec<&str> = proto.params.iter().map(|p| p.name.as_str()).collect();
    let results: Vec<&str> = proto.results.iter().map(|r| r.name.as_str()).collect();
    format!(
        "graph {}( {} ) -> ( {} )",
        proto.name,
        params.join(", "),
        results.join(", ")
    )
}

/// One operation line, without the leading tab.
///
/// Tensor-typed parameters are rendered by value, all others as
/// `name = value`.
pub fn render_operation(proto: &Prototype, args: &Dictionary<Value>) -> String {
    let render = |name: &str| args.get(name).map_or_else(|| "?".to_string(), Value::to_string);

    let results: Vec<String> = proto.results.iter().map(|r| render(&r.name)).collect();
    let params: Vec<String> = proto
        .params
        .iter()
        .map(|p| {
            if p.ty.is_tensor() {
                render(&p.name)
            } else {
                format!("{} = {}", p.name, render(&p.name))
            }
        })
        .collect();

    format!("{} = {}({})", results.join(", "), proto.name, params.join(", "))
}

/// The key a `variable` operation's data is stored under: its label when
/// present, else the name of its result tensor.
fn variable_key(args: &Dictionary<Value>) -> Option<(String, String)> {
    let tensor = args.get("output")?.as_identifier()?.to_string();
    let key = match args.get("label").and_then(Value::as_str) {
        Some(label) if !label.is_empty() => label.to_string(),
        _ => tensor.clone(),
    };
    Some((key, tensor))
}

/// Streams the canonical rendering to `out` and collects variable shapes.
pub struct PrintCallback<W: Write> {
    out: W,
    overrides: AtomicOverrides,
    /// Storage key → tensor name.
    variables: Dictionary<String>,
    variable_shapes: Dictionary<Shape>,
}

impl<W: Write> PrintCallback<W> {
    pub fn new(out: W, overrides: AtomicOverrides) -> Self {
        Self {
            out,
            overrides,
            variables: Dictionary::new(),
            variable_shapes: Dictionary::new(),
        }
    }

    /// Declared variable shapes keyed by storage key.
    pub fn variable_shapes(&self) -> &Dictionary<Shape> {
        &self.variable_shapes
    }

    pub fn into_variable_shapes(self) -> Dictionary<Shape> {
        self.variable_shapes
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Callback for PrintCallback<W> {
    fn begin_graph(&mut self, proto: &Prototype) -> Result<()> {
        writeln!(self.out, "{}", render_graph_header(proto))?;
        writeln!(self.out, "{{")?;
        Ok(())
    }

    fn operation(
        &mut self,
        proto: &Prototype,
        args: &Dictionary<Value>,
        shapes: &Dictionary<Shape>,
    ) -> Result<()> {
        writeln!(self.out, "\t{}", render_operation(proto, args))?;

        if proto.name == "variable" {
            if let Some((key, tensor)) = variable_key(args) {
                if let Some(shape) = shapes.get(&tensor) {
                    self.variable_shapes.insert(key.clone(), shape.clone());
                }
                self.variables.insert(key, tensor);
            }
        }
        Ok(())
    }

    fn end_graph(&mut self, _proto: &Prototype, shapes: &Dictionary<Shape>) -> Result<()> {
        for (key, tensor) in &self.variables {
            if let Some(shape) = shapes.get(tensor) {
                self.variable_shapes.insert(key.clone(), shape.clone());
            }
        }
        writeln!(self.out, "}}")?;
        self.out.flush()?;
        Ok(())
    }

    fn is_atomic(
        &self,
        proto: &Prototype,
        args: &Dictionary<Value>,
        defaults: &dyn AtomicPolicy,
    ) -> bool {
        self.overrides.resolve(proto, args, defaults)
    }
}
