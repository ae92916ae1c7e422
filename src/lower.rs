// Lowering — Evaluates a Document and drives the callback protocol
//
// The lowering pass walks the graph body in order and turns every assignment
// into operations reported through `Callback::operation`. It:
//
//   1. Binds invocation arguments to fragment prototypes
//   2. Folds attribute expressions (arithmetic, comprehensions, builtins)
//   3. Turns operators on tensors into invocations (`a + b` → `add(a, b)`)
//   4. Expands compound fragments the callback does not consider atomic
//   5. Infers and records the shape of every tensor it defines
//   6. Checks graph inputs come from `external` and outputs are defined
//
// NAMING: graph-level tensors keep their source names. Every intermediate
// tensor gets a generated name `tN` that never clashes with an identifier
// used in the graph.
//
// PROVENANCE: an error raised while expanding a fragment gets the position of
// the invocation that triggered the expansion appended to its origin chain,
// once per enclosing expansion.
//
// SILENT EXPANSION: an atomic compound fragment has no shape rule of its own,
// so its result shapes come from expanding its body with callbacks muted and
// throwing the intermediate tensors away.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::ast::{Assignment, BinOp, Builtin, Document, Expr, GraphDef, UnaryOp};
use crate::callback::Callback;
use crate::error::{Error, Result};
use crate::graph::{Dictionary, Fragment, Primitive, Prototype, Shape, Value};
use crate::shapes::{self, ResultShape};
use crate::stdlib::Library;
use crate::token::Span;
use crate::validate::{bind_arguments, check_argument_order, check_lhs, lhs_names, CallArgs};

/// Maximum nesting of fragment expansions.
pub const MAX_EXPANSION_DEPTH: usize = 64;

/// Which grammar variant is being lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Invocations only; fragments are never expanded.
    Flat,
    /// Fragments and operator expressions; compound fragments may expand.
    Compositional,
}

/// Lower a parsed document, reporting the graph to `callback`.
pub fn lower(
    doc: &Document,
    library: &Library,
    mode: Mode,
    callback: &mut dyn Callback,
) -> Result<()> {
    let mut ctx = Lowering::new(&doc.graph, library, mode, callback);
    ctx.lower_graph(&doc.graph)
}

// Lowering context

type Scope = HashMap<String, Value>;

/// Where the results of an evaluation should land.
#[derive(Debug, Clone)]
enum Target {
    /// Anywhere; intermediate tensors get generated names.
    Fresh,
    /// A specific tensor name.
    Name(String),
    Array(Vec<Target>),
    Tuple(Vec<Target>),
}

struct Lowering<'a> {
    library: &'a Library,
    mode: Mode,
    callback: &'a mut dyn Callback,
    shapes: Dictionary<Shape>,
    /// Identifiers used anywhere in the graph; generated names avoid them.
    reserved: HashSet<String>,
    counter: usize,
    inputs: HashSet<String>,
    externals: HashSet<String>,
    depth: usize,
    /// Non-zero while inside a silent expansion.
    silent: usize,
}

impl<'a> Lowering<'a> {
    fn new(
        graph: &GraphDef,
        library: &'a Library,
        mode: Mode,
        callback: &'a mut dyn Callback,
    ) -> Self {
        let mut reserved: HashSet<String> = graph
            .params
            .iter()
            .chain(&graph.results)
            .map(|(name, _)| name.clone())
            .collect();
        for assignment in &graph.body {
            let mut names = Vec::new();
            assignment.lhs.collect_identifiers(&mut names);
            assignment.rhs.collect_identifiers(&mut names);
            reserved.extend(names.into_iter().map(str::to_string));
        }

        Self {
            library,
            mode,
            callback,
            shapes: Dictionary::new(),
            reserved,
            counter: 0,
            inputs: graph.params.iter().map(|(name, _)| name.clone()).collect(),
            externals: HashSet::new(),
            depth: 0,
            silent: 0,
        }
    }

    // graph

    fn lower_graph(&mut self, graph: &GraphDef) -> Result<()> {
        let mut declared = HashSet::new();
        for (name, span) in graph.params.iter().chain(&graph.results) {
            if !declared.insert(name.as_str()) {
                return Err(Error::semantic(
                    format!("'{name}' is declared more than once in graph '{}'", graph.name),
                    *span,
                ));
            }
        }

        let params: Vec<String> = graph.params.iter().map(|(n, _)| n.clone()).collect();
        let results: Vec<String> = graph.results.iter().map(|(n, _)| n.clone()).collect();
        let proto = Prototype::graph(&graph.name, &params, &results);
        self.callback.begin_graph(&proto)?;

        let mut scope = Scope::new();
        for assignment in &graph.body {
            check_lhs(&assignment.lhs)?;
            for (name, span) in lhs_names(&assignment.lhs) {
                if scope.contains_key(name) {
                    return Err(Error::semantic(
                        format!("identifier '{name}' is already defined"),
                        span,
                    ));
                }
            }
            let target = graph_target(&assignment.lhs);
            let value = self.eval(&assignment.rhs, &scope, target)?;
            bind(&assignment.lhs, value, &mut scope)?;
        }

        for (name, span) in &graph.params {
            if !self.externals.contains(name) {
                return Err(Error::semantic(
                    format!("graph input '{name}' is not defined by 'external'"),
                    *span,
                ));
            }
        }
        for (name, span) in &graph.results {
            if !scope.contains_key(name) {
                return Err(Error::semantic(
                    format!("graph output '{name}' is not defined"),
                    *span,
                ));
            }
        }

        self.callback.end_graph(&proto, &self.shapes)
    }

    // Expressions

    fn eval(&mut self, expr: &Expr, scope: &Scope, target: Target) -> Result<Value> {
        match expr {
            Expr::Integer(n, span) => self.realize(Value::Integer(*n), target, *span),
            Expr::Scalar(x, span) => self.realize(Value::Scalar(*x), target, *span),
            Expr::Logical(b, span) => self.realize(Value::Logical(*b), target, *span),
            Expr::Str(s, span) => self.realize(Value::String(s.clone()), target, *span),

            Expr::Identifier(name, span) => {
                let value = scope.get(name).cloned().ok_or_else(|| {
                    Error::semantic(format!("undefined identifier '{name}'"), *span)
                })?;
                self.realize(value, target, *span)
            }

            Expr::Array(items, span) | Expr::Tuple(items, span) => {
                let is_array = matches!(expr, Expr::Array(..));
                let targets = match target {
                    Target::Array(targets) | Target::Tuple(targets)
                        if targets.len() == items.len() =>
                    {
                        targets
                    }
                    other => {
                        let values = self.eval_all(items, scope)?;
                        let value = if is_array {
                            Value::Array(values)
                        } else {
                            Value::Tuple(values)
                        };
                        return self.realize(value, other, *span);
                    }
                };
                let values = items
                    .iter()
                    .zip(targets)
                    .map(|(item, t)| self.eval(item, scope, t))
                    .collect::<Result<Vec<_>>>()?;
                Ok(if is_array {
                    Value::Array(values)
                } else {
                    Value::Tuple(values)
                })
            }

            Expr::Unary { op, operand, span } => {
                let value = self.eval(operand, scope, Target::Fresh)?;
                if value.is_tensor() {
                    return self.call_operator(op.fragment_name(), vec![value], *span, target);
                }
                let folded = fold_unary(*op, value, *span)?;
                self.realize(folded, target, *span)
            }

            Expr::Binary {
                left,
                op,
                right,
                span,
            } => {
                let lhs = self.eval(left, scope, Target::Fresh)?;
                let rhs = self.eval(right, scope, Target::Fresh)?;
                if lhs.is_tensor() || rhs.is_tensor() {
                    let Some(name) = op.fragment_name() else {
                        return Err(Error::semantic(
                            format!("operator '{}' cannot be applied to tensors", op.symbol()),
                            *span,
                        ));
                    };
                    return self.call_operator(name, vec![lhs, rhs], *span, target);
                }
                let folded = fold_binary(*op, lhs, rhs, *span)?;
                self.realize(folded, target, *span)
            }

            Expr::Select {
                cond,
                then_branch,
                else_branch,
                span,
            } => match self.eval(cond, scope, Target::Fresh)? {
                Value::Logical(true) => self.eval(then_branch, scope, target),
                Value::Logical(false) => self.eval(else_branch, scope, target),
                c if c.is_tensor() => {
                    let a = self.eval(then_branch, scope, Target::Fresh)?;
                    let b = self.eval(else_branch, scope, Target::Fresh)?;
                    self.call_operator("select", vec![c, a, b], *span, target)
                }
                other => Err(Error::semantic(
                    format!("condition must be logical, found {other}"),
                    cond.span(),
                )),
            },

            Expr::Comprehension {
                iterators,
                condition,
                body,
                span,
            } => {
                let items = self.eval_comprehension(iterators, condition.as_deref(), body, scope, *span)?;
                self.realize(Value::Array(items), target, *span)
            }

            Expr::Subscript {
                object,
                index,
                span,
            } => {
                let object = self.eval(object, scope, Target::Fresh)?;
                let index = self.eval(index, scope, Target::Fresh)?;
                let item = subscript(&object, &index, *span)?;
                self.realize(item, target, *span)
            }

            Expr::Slice {
                object,
                start,
                end,
                span,
            } => {
                let object = self.eval(object, scope, Target::Fresh)?;
                let start = match start {
                    Some(e) => Some(self.eval(e, scope, Target::Fresh)?),
                    None => None,
                };
                let end = match end {
                    Some(e) => Some(self.eval(e, scope, Target::Fresh)?),
                    None => None,
                };
                let sliced = slice(&object, start.as_ref(), end.as_ref(), *span)?;
                self.realize(sliced, target, *span)
            }

            Expr::Builtin { func, arg, span } => {
                let value = self.eval(arg, scope, Target::Fresh)?;
                let result = self.builtin(*func, value, *span)?;
                self.realize(result, target, *span)
            }

            Expr::Invocation {
                name,
                type_arg,
                args,
                span,
            } => {
                check_argument_order(args)?;
                let library = self.library;
                let fragment = library.get(name).ok_or_else(|| {
                    Error::semantic(format!("undefined operation '{name}'"), *span)
                })?;

                let mut call = CallArgs {
                    positional: Vec::new(),
                    named: Vec::new(),
                };
                for arg in args {
                    let value = self.eval(&arg.value, scope, Target::Fresh)?;
                    match &arg.name {
                        Some(key) => call.named.push((key.clone(), value, arg.span)),
                        None => call.positional.push((value, arg.span)),
                    }
                }
                self.invoke(fragment, *type_arg, call, *span, target)
            }
        }
    }

    fn eval_all(&mut self, items: &[Expr], scope: &Scope) -> Result<Vec<Value>> {
        items
            .iter()
            .map(|item| self.eval(item, scope, Target::Fresh))
            .collect()
    }

    fn eval_comprehension(
        &mut self,
        iterators: &[(String, Expr)],
        condition: Option<&Expr>,
        body: &Expr,
        scope: &Scope,
        span: Span,
    ) -> Result<Vec<Value>> {
        let mut sequences = Vec::with_capacity(iterators.len());
        for (name, iterable) in iterators {
            match self.eval(iterable, scope, Target::Fresh)? {
                Value::Array(items) => sequences.push((name, items)),
                other => {
                    return Err(Error::semantic(
                        format!("cannot iterate over {}", other.kind_name()),
                        iterable.span(),
                    ));
                }
            }
        }

        let len = sequences.first().map_or(0, |(_, items)| items.len());
        if sequences.iter().any(|(_, items)| items.len() != len) {
            return Err(Error::semantic(
                "iterated arrays must have the same length",
                span,
            ));
        }

        let mut results = Vec::new();
        for i in 0..len {
            let mut inner = scope.clone();
            for (name, items) in &sequences {
                inner.insert((*name).clone(), items[i].clone());
            }
            if let Some(cond) = condition {
                match self.eval(cond, &inner, Target::Fresh)? {
                    Value::Logical(true) => {}
                    Value::Logical(false) => continue,
                    other => {
                        return Err(Error::semantic(
                            format!("condition must be logical, found {other}"),
                            cond.span(),
                        ));
                    }
                }
            }
            results.push(self.eval(body, &inner, Target::Fresh)?);
        }
        Ok(results)
    }

    fn builtin(&self, func: Builtin, value: Value, span: Span) -> Result<Value> {
        let invalid = |value: &Value| {
            Error::semantic(
                format!("'{}' cannot be applied to {}", func.name(), value.kind_name()),
                span,
            )
        };

        match func {
            Builtin::ShapeOf => match &value {
                Value::Identifier(name) => {
                    let shape = self.shapes.get(name).ok_or_else(|| {
                        Error::shape(format!("shape of tensor '{name}' is unknown"), span)
                    })?;
                    shape
                        .iter()
                        .map(|&d| {
                            i64::try_from(d).map(Value::Integer).map_err(|_| {
                                Error::shape(format!("extent {d} of tensor '{name}' is too large"), span)
                            })
                        })
                        .collect::<Result<Vec<_>>>()
                        .map(Value::Array)
                }
                Value::Integer(_) | Value::Scalar(_) | Value::Logical(_) => {
                    Ok(Value::Array(Vec::new()))
                }
                other => Err(invalid(other)),
            },
            Builtin::LengthOf => match &value {
                Value::Array(items) => Ok(Value::Integer(items.len() as i64)),
                Value::String(s) => Ok(Value::Integer(s.chars().count() as i64)),
                other => Err(invalid(other)),
            },
            Builtin::RangeOf => {
                let len = match &value {
                    Value::Array(items) => items.len(),
                    Value::String(s) => s.chars().count(),
                    other => return Err(invalid(other)),
                };
                Ok(Value::Array((0..len as i64).map(Value::Integer).collect()))
            }
            Builtin::ToInteger => match &value {
                Value::Integer(n) => Ok(Value::Integer(*n)),
                Value::Scalar(x) => Ok(Value::Integer(*x as i64)),
                Value::Logical(b) => Ok(Value::Integer(i64::from(*b))),
                Value::String(s) => s.trim().parse().map(Value::Integer).map_err(|_| {
                    Error::semantic(format!("cannot convert '{s}' to integer"), span)
                }),
                other => Err(invalid(other)),
            },
            Builtin::ToScalar => match &value {
                Value::Integer(n) => Ok(Value::Scalar(*n as f64)),
                Value::Scalar(x) => Ok(Value::Scalar(*x)),
                Value::Logical(b) => Ok(Value::Scalar(if *b { 1.0 } else { 0.0 })),
                Value::String(s) => s.trim().parse().map(Value::Scalar).map_err(|_| {
                    Error::semantic(format!("cannot convert '{s}' to scalar"), span)
                }),
                other => Err(invalid(other)),
            },
            Builtin::ToLogical => match &value {
                Value::Integer(n) => Ok(Value::Logical(*n != 0)),
                Value::Scalar(x) => Ok(Value::Logical(*x != 0.0)),
                Value::Logical(b) => Ok(Value::Logical(*b)),
                Value::String(s) => match s.as_str() {
                    "true" => Ok(Value::Logical(true)),
                    "false" => Ok(Value::Logical(false)),
                    _ => Err(Error::semantic(
                        format!("cannot convert '{s}' to logical"),
                        span,
                    )),
                },
                other => Err(invalid(other)),
            },
            Builtin::ToString => match &value {
                Value::String(s) => Ok(Value::String(s.clone())),
                Value::Integer(_) | Value::Scalar(_) | Value::Logical(_) => {
                    Ok(Value::String(value.to_string()))
                }
                other => Err(invalid(other)),
            },
        }
    }

    // Invocations

    /// Invoke the stdlib fragment behind an operator.
    fn call_operator(
        &mut self,
        name: &str,
        args: Vec<Value>,
        span: Span,
        target: Target,
    ) -> Result<Value> {
        let library = self.library;
        let fragment = library.get(name).ok_or_else(|| {
            Error::semantic(format!("undefined operation '{name}'"), span)
        })?;
        let call = CallArgs {
            positional: args.into_iter().map(|v| (v, span)).collect(),
            named: Vec::new(),
        };
        self.invoke(fragment, None, call, span, target)
    }

    fn invoke(
        &mut self,
        fragment: &'a Fragment,
        type_arg: Option<Primitive>,
        call: CallArgs,
        span: Span,
        target: Target,
    ) -> Result<Value> {
        let proto = &fragment.proto;
        if type_arg.is_some() && proto.generic.is_none() {
            return Err(Error::semantic(
                format!("operation '{}' is not generic", proto.name),
                span,
            ));
        }
        let generic = type_arg.or(proto.generic.flatten());
        let args = bind_arguments(proto, call, generic, span)?;

        if let Some(body) = &fragment.body {
            let expand = self.silent > 0
                || (self.mode == Mode::Compositional
                    && !self.callback.is_atomic(proto, &args, &self.library.policy));
            if expand {
                if self.silent == 0 {
                    debug!("expanding '{}' invoked at {span}", proto.name);
                }
                return self.expand(fragment, body, args, span, target);
            }
            if self.silent == 0 {
                debug!("keeping '{}' invoked at {span} atomic", proto.name);
            }
        }

        self.emit_atomic(fragment, args, span, target)
    }

    /// Evaluate a fragment body in a fresh scope holding its arguments.
    fn expand(
        &mut self,
        fragment: &'a Fragment,
        body: &'a [Assignment],
        args: Dictionary<Value>,
        span: Span,
        target: Target,
    ) -> Result<Value> {
        if self.depth >= MAX_EXPANSION_DEPTH {
            return Err(Error::semantic(
                format!(
                    "expansion of '{}' exceeds the maximum depth of {MAX_EXPANSION_DEPTH}",
                    fragment.proto.name
                ),
                span,
            ));
        }

        self.depth += 1;
        let outcome = self.expand_body(fragment, body, args, span, target);
        self.depth -= 1;
        outcome.map_err(|err| err.evaluated_from(span))
    }

    fn expand_body(
        &mut self,
        fragment: &'a Fragment,
        body: &'a [Assignment],
        args: Dictionary<Value>,
        span: Span,
        target: Target,
    ) -> Result<Value> {
        let proto = &fragment.proto;
        let targets = split_target(proto, target, span)?;
        let results: HashMap<&str, Target> = proto
            .results
            .iter()
            .map(|r| r.name.as_str())
            .zip(targets)
            .collect();

        let mut scope: Scope = args.into_iter().collect();
        for assignment in body {
            let target = fragment_target(&assignment.lhs, &results);
            let value = self.eval(&assignment.rhs, &scope, target)?;
            bind(&assignment.lhs, value, &mut scope)?;
        }

        let values = proto
            .results
            .iter()
            .map(|r| {
                scope.get(&r.name).cloned().ok_or_else(|| {
                    Error::semantic(
                        format!("result '{}' of '{}' is never assigned", r.name, proto.name),
                        span,
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(pack(values))
    }

    /// Report an operation as-is, defining its result tensors.
    fn emit_atomic(
        &mut self,
        fragment: &'a Fragment,
        mut args: Dictionary<Value>,
        span: Span,
        target: Target,
    ) -> Result<Value> {
        let proto = &fragment.proto;
        let result_shapes = self.result_shapes(fragment, &args, span)?;
        let targets = split_target(proto, target, span)?;

        let mut values = Vec::with_capacity(proto.results.len());
        for ((result, shape), target) in proto.results.iter().zip(result_shapes).zip(targets) {
            let value = self.define_result(&proto.name, shape, target, span)?;
            args.insert(result.name.clone(), value.clone());
            values.push(value);
        }

        if self.silent == 0 {
            if proto.name == "external" && self.depth == 0 {
                for id in values.iter().flat_map(Value::identifiers) {
                    if !self.inputs.contains(id) {
                        return Err(Error::semantic(
                            format!("tensor '{id}' is defined by 'external' but is not a graph input"),
                            span,
                        ));
                    }
                    self.externals.insert(id.to_string());
                }
            }
            trace!("operation '{}' at {span}", proto.name);
            self.callback.operation(proto, &args, &self.shapes)?;
        }
        Ok(pack(values))
    }

    fn result_shapes(
        &mut self,
        fragment: &'a Fragment,
        args: &Dictionary<Value>,
        span: Span,
    ) -> Result<Vec<ResultShape>> {
        let proto = &fragment.proto;
        let rule = shapes::infer(&proto.name, args, &self.shapes)
            .map_err(|err| Error::shape(err.to_string(), span))?;
        if let Some(inferred) = rule {
            return Ok(inferred);
        }

        if let Some(body) = &fragment.body {
            return self.silent_shapes(fragment, body, args.clone(), span);
        }

        // Body-less fragment without a rule: results follow the first tensor argument.
        let first = proto
            .params
            .iter()
            .filter(|p| p.ty.is_tensor())
            .find_map(|p| args.get(&p.name));
        let shape = match first {
            Some(Value::Identifier(id)) => self.shapes.get(id).cloned().ok_or_else(|| {
                Error::shape(format!("shape of tensor '{id}' is unknown"), span)
            })?,
            Some(Value::Integer(_) | Value::Scalar(_) | Value::Logical(_)) => Vec::new(),
            _ => {
                return Err(Error::shape(
                    format!("cannot infer result shapes of '{}'", proto.name),
                    span,
                ));
            }
        };
        Ok(vec![ResultShape::Single(shape); proto.results.len()])
    }

    fn silent_shapes(
        &mut self,
        fragment: &'a Fragment,
        body: &'a [Assignment],
        args: Dictionary<Value>,
        span: Span,
    ) -> Result<Vec<ResultShape>> {
        trace!("inferring shapes of '{}' by silent expansion", fragment.proto.name);
        let saved_shapes = self.shapes.clone();
        let saved_counter = self.counter;

        self.silent += 1;
        let outcome = self.expand(fragment, body, args, span, Target::Fresh);
        self.silent -= 1;

        let expanded = std::mem::replace(&mut self.shapes, saved_shapes);
        self.counter = saved_counter;
        let value = outcome?;

        let values = if fragment.proto.results.len() == 1 {
            vec![value]
        } else {
            match value {
                Value::Tuple(items) => items,
                other => vec![other],
            }
        };
        values
            .iter()
            .map(|v| result_shape_of(v, &expanded, span))
            .collect()
    }

    /// Define the tensor(s) of one result according to `target`.
    fn define_result(
        &mut self,
        op: &str,
        shape: ResultShape,
        target: Target,
        span: Span,
    ) -> Result<Value> {
        match (shape, target) {
            (ResultShape::Single(shape), Target::Fresh) => {
                let name = self.fresh_name();
                self.define(name, shape, span)
            }
            (ResultShape::Single(shape), Target::Name(name)) => self.define(name, shape, span),
            (ResultShape::Single(_), _) => Err(Error::semantic(
                format!("result of '{op}' is a single tensor and cannot be unpacked"),
                span,
            )),
            (ResultShape::Multiple(shapes), Target::Fresh) => {
                let values = shapes
                    .into_iter()
                    .map(|shape| {
                        let name = self.fresh_name();
                        self.define(name, shape, span)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(values))
            }
            (ResultShape::Multiple(shapes), Target::Array(targets) | Target::Tuple(targets))
                if targets.len() == shapes.len() =>
            {
                let values = shapes
                    .into_iter()
                    .zip(targets)
                    .map(|(shape, t)| self.define_result(op, ResultShape::Single(shape), t, span))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(values))
            }
            (ResultShape::Multiple(shapes), _) => Err(Error::semantic(
                format!(
                    "result of '{op}' is an array of {} tensors and must be assigned to as many identifiers",
                    shapes.len()
                ),
                span,
            )),
        }
    }

    fn define(&mut self, name: String, shape: Shape, span: Span) -> Result<Value> {
        if self.shapes.contains_key(&name) {
            return Err(Error::semantic(
                format!("tensor '{name}' is already defined"),
                span,
            ));
        }
        self.shapes.insert(name.clone(), shape);
        Ok(Value::Identifier(name))
    }

    fn fresh_name(&mut self) -> String {
        loop {
            self.counter += 1;
            let name = format!("t{}", self.counter);
            if !self.reserved.contains(&name) && !self.shapes.contains_key(&name) {
                return name;
            }
        }
    }

    /// Make `value` live where `target` says, copying tensors or
    /// materializing literals as constants where needed.
    fn realize(&mut self, value: Value, target: Target, span: Span) -> Result<Value> {
        match target {
            Target::Fresh => Ok(value),
            Target::Name(name) => match value {
                Value::Identifier(id) if id == name => Ok(Value::Identifier(id)),
                Value::Identifier(_) => {
                    self.call_operator("copy", vec![value], span, Target::Name(name))
                }
                Value::Integer(_) | Value::Scalar(_) | Value::Logical(_) => {
                    self.materialize_constant(value, name, span)
                }
                other => Err(Error::semantic(
                    format!("cannot assign {} value {other} to tensor '{name}'", other.kind_name()),
                    span,
                )),
            },
            Target::Array(targets) | Target::Tuple(targets) => match value {
                Value::Array(items) | Value::Tuple(items) if items.len() == targets.len() => {
                    let values = items
                        .into_iter()
                        .zip(targets)
                        .map(|(item, t)| self.realize(item, t, span))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Value::Array(values))
                }
                other => Err(Error::semantic(
                    format!(
                        "cannot unpack {} into {} identifiers",
                        other.kind_name(),
                        targets.len()
                    ),
                    span,
                )),
            },
        }
    }

    fn materialize_constant(&mut self, value: Value, name: String, span: Span) -> Result<Value> {
        let prim = match value {
            Value::Integer(_) => Primitive::Integer,
            Value::Logical(_) => Primitive::Logical,
            _ => Primitive::Scalar,
        };
        let library = self.library;
        let fragment = library.get("constant").ok_or_else(|| {
            Error::semantic("undefined operation 'constant'", span)
        })?;
        let call = CallArgs {
            positional: Vec::new(),
            named: vec![
                ("shape".to_string(), Value::Array(Vec::new()), span),
                ("value".to_string(), Value::Array(vec![value]), span),
            ],
        };
        self.invoke(fragment, Some(prim), call, span, Target::Name(name))
    }
}

// Helpers

fn graph_target(lhs: &Expr) -> Target {
    match lhs {
        Expr::Identifier(name, _) => Target::Name(name.clone()),
        Expr::Array(items, _) => Target::Array(items.iter().map(graph_target).collect()),
        Expr::Tuple(items, _) => Target::Tuple(items.iter().map(graph_target).collect()),
        _ => Target::Fresh,
    }
}

/// Inside a fragment, only result names have a fixed destination.
fn fragment_target(lhs: &Expr, results: &HashMap<&str, Target>) -> Target {
    match lhs {
        Expr::Identifier(name, _) => results
            .get(name.as_str())
            .cloned()
            .unwrap_or(Target::Fresh),
        Expr::Array(items, _) => {
            Target::Array(items.iter().map(|e| fragment_target(e, results)).collect())
        }
        Expr::Tuple(items, _) => {
            Target::Tuple(items.iter().map(|e| fragment_target(e, results)).collect())
        }
        _ => Target::Fresh,
    }
}

/// One target per declared result.
fn split_target(proto: &Prototype, target: Target, span: Span) -> Result<Vec<Target>> {
    let count = proto.results.len();
    if count == 1 {
        return Ok(vec![target]);
    }
    match target {
        Target::Fresh => Ok(vec![Target::Fresh; count]),
        Target::Tuple(items) if items.len() == count => Ok(items),
        _ => Err(Error::semantic(
            format!(
                "'{}' returns {count} results and must be assigned to a tuple of {count}",
                proto.name
            ),
            span,
        )),
    }
}

fn pack(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Tuple(values)
    }
}

/// Bind the names on the left-hand side to the parts of `value`.
fn bind(lhs: &Expr, value: Value, scope: &mut Scope) -> Result<()> {
    match lhs {
        Expr::Identifier(name, _) => {
            scope.insert(name.clone(), value);
            Ok(())
        }
        Expr::Array(items, span) | Expr::Tuple(items, span) => match value {
            Value::Array(values) | Value::Tuple(values) if values.len() == items.len() => {
                for (item, value) in items.iter().zip(values) {
                    bind(item, value, scope)?;
                }
                Ok(())
            }
            other => Err(Error::semantic(
                format!("cannot unpack {} into {} identifiers", other.kind_name(), items.len()),
                *span,
            )),
        },
        other => Err(Error::syntax("invalid assignment target", other.span())),
    }
}

fn result_shape_of(value: &Value, shapes: &Dictionary<Shape>, span: Span) -> Result<ResultShape> {
    let single = |v: &Value| -> Result<Shape> {
        match v {
            Value::Identifier(id) => shapes.get(id).cloned().ok_or_else(|| {
                Error::shape(format!("shape of tensor '{id}' is unknown"), span)
            }),
            Value::Integer(_) | Value::Scalar(_) | Value::Logical(_) => Ok(Vec::new()),
            other => Err(Error::shape(
                format!("result {other} is not a tensor"),
                span,
            )),
        }
    };
    match value {
        Value::Array(items) => Ok(ResultShape::Multiple(
            items.iter().map(single).collect::<Result<_>>()?,
        )),
        other => Ok(ResultShape::Single(single(other)?)),
    }
}

// Constant folding

fn fold_unary(op: UnaryOp, value: Value, span: Span) -> Result<Value> {
    match (op, value) {
        (UnaryOp::Neg, Value::Integer(n)) => n.checked_neg().map(Value::Integer).ok_or_else(|| {
            Error::semantic("integer overflow in constant expression", span)
        }),
        (UnaryOp::Neg, Value::Scalar(x)) => Ok(Value::Scalar(-x)),
        (UnaryOp::Not, Value::Logical(b)) => Ok(Value::Logical(!b)),
        (op, value) => Err(Error::semantic(
            format!(
                "operator '{}' cannot be applied to {}",
                op.symbol(),
                value.kind_name()
            ),
            span,
        )),
    }
}

fn fold_binary(op: BinOp, lhs: Value, rhs: Value, span: Span) -> Result<Value> {
    use Value::*;

    let mismatch = |lhs: &Value, rhs: &Value| {
        Error::semantic(
            format!(
                "operator '{}' cannot be applied to {} and {}",
                op.symbol(),
                lhs.kind_name(),
                rhs.kind_name()
            ),
            span,
        )
    };
    let overflow = || Error::semantic("integer overflow in constant expression", span);

    match (op, &lhs, &rhs) {
        (BinOp::Add, Integer(a), Integer(b)) => a.checked_add(*b).map(Integer).ok_or_else(overflow),
        (BinOp::Sub, Integer(a), Integer(b)) => a.checked_sub(*b).map(Integer).ok_or_else(overflow),
        (BinOp::Mul, Integer(a), Integer(b)) => a.checked_mul(*b).map(Integer).ok_or_else(overflow),
        (BinOp::Div, Integer(_), Integer(0)) => {
            Err(Error::semantic("division by zero in constant expression", span))
        }
        (BinOp::Div, Integer(a), Integer(b)) => a.checked_div(*b).map(Integer).ok_or_else(overflow),
        (BinOp::Pow, Integer(a), Integer(b)) => u32::try_from(*b)
            .ok()
            .and_then(|e| a.checked_pow(e))
            .map(Integer)
            .ok_or_else(overflow),

        (BinOp::Add, Scalar(a), Scalar(b)) => Ok(Scalar(a + b)),
        (BinOp::Sub, Scalar(a), Scalar(b)) => Ok(Scalar(a - b)),
        (BinOp::Mul, Scalar(a), Scalar(b)) => Ok(Scalar(a * b)),
        (BinOp::Div, Scalar(a), Scalar(b)) => Ok(Scalar(a / b)),
        (BinOp::Pow, Scalar(a), Scalar(b)) => Ok(Scalar(a.powf(*b))),

        (BinOp::Add, String(a), String(b)) => Ok(String(format!("{a}{b}"))),
        (BinOp::Add, Array(a), Array(b)) => Ok(Array(a.iter().chain(b).cloned().collect())),
        (BinOp::Mul, Array(a), Integer(n)) if *n >= 0 => {
            Ok(Array((0..*n).flat_map(|_| a.iter().cloned()).collect()))
        }

        (BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge, _, _) => {
            let ordering = match (&lhs, &rhs) {
                (Integer(a), Integer(b)) => a.partial_cmp(b),
                (Scalar(a), Scalar(b)) => a.partial_cmp(b),
                (String(a), String(b)) => a.partial_cmp(b),
                _ => return Err(mismatch(&lhs, &rhs)),
            };
            let Some(ordering) = ordering else {
                return Ok(Logical(false));
            };
            Ok(Logical(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Le => ordering.is_le(),
                _ => ordering.is_ge(),
            }))
        }
        (BinOp::Eq | BinOp::Ne, _, _) => {
            if std::mem::discriminant(&lhs) != std::mem::discriminant(&rhs) {
                return Err(mismatch(&lhs, &rhs));
            }
            Ok(Logical((lhs == rhs) == (op == BinOp::Eq)))
        }

        (BinOp::And, Logical(a), Logical(b)) => Ok(Logical(*a && *b)),
        (BinOp::Or, Logical(a), Logical(b)) => Ok(Logical(*a || *b)),

        (BinOp::In, _, Array(items)) => Ok(Logical(items.contains(&lhs))),

        _ => Err(mismatch(&lhs, &rhs)),
    }
}

fn index_of(index: &Value, len: usize, span: Span) -> Result<usize> {
    match index {
        Value::Integer(i) => usize::try_from(*i)
            .ok()
            .filter(|&i| i < len)
            .ok_or_else(|| {
                Error::semantic(format!("index {i} is out of range for length {len}"), span)
            }),
        other => Err(Error::semantic(
            format!("index must be an integer, found {}", other.kind_name()),
            span,
        )),
    }
}

fn subscript(object: &Value, index: &Value, span: Span) -> Result<Value> {
    match object {
        Value::Array(items) | Value::Tuple(items) => {
            Ok(items[index_of(index, items.len(), span)?].clone())
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = index_of(index, chars.len(), span)?;
            Ok(Value::String(chars[i].to_string()))
        }
        other => Err(Error::semantic(
            format!("cannot subscript {}", other.kind_name()),
            span,
        )),
    }
}

fn slice(object: &Value, start: Option<&Value>, end: Option<&Value>, span: Span) -> Result<Value> {
    let bounds = |len: usize| -> Result<(usize, usize)> {
        let bound = |value: Option<&Value>, default: usize| -> Result<usize> {
            match value {
                None => Ok(default),
                Some(Value::Integer(i)) => usize::try_from(*i)
                    .ok()
                    .filter(|&i| i <= len)
                    .ok_or_else(|| {
                        Error::semantic(
                            format!("slice bound {i} is out of range for length {len}"),
                            span,
                        )
                    }),
                Some(other) => Err(Error::semantic(
                    format!("slice bound must be an integer, found {}", other.kind_name()),
                    span,
                )),
            }
        };
        let start = bound(start, 0)?;
        Ok((start, bound(end, len)?.max(start)))
    };

    match object {
        Value::Array(items) => {
            let (start, end) = bounds(items.len())?;
            Ok(Value::Array(items[start..end].to_vec()))
        }
        Value::String(s) => {
            let (start, end) = bounds(s.chars().count())?;
            Ok(Value::String(s.chars().skip(start).take(end - start).collect()))
        }
        other => Err(Error::semantic(
            format!("cannot slice {}", other.kind_name()),
            span,
        )),
    }
}
