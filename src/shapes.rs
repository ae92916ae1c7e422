// Shape Inference — Result shapes of primitive operations
//
// The lowering pass calls `infer` for every atomic invocation. It receives the
// bound arguments and the shapes of all tensors defined so far, and returns
// one entry per declared result of the operation.
//
// RULES:
//   - external/variable/constant: the `shape` attribute, every extent positive
//   - Unary element-wise: shape preserved
//   - Binary element-wise/select: broadcast (left-aligned, missing trailing
//     dimensions are singletons)
//   - matmul: [.., M, K] × [.., K, N] → [.., M, N], with optional transposes
//   - conv: [N, C, ..] with filter [O, C/groups, ..] → [N, O, ..]
//   - max_pool/avg_pool: windowed over every dimension
//   - *_reduce: reduced axes kept with extent 1
//   - reshape: `0` copies an extent, `-1` is inferred, over an axis range
//   - transpose/squeeze/unsqueeze/concat/split/pad: the usual layout rules
//
// Literal arguments passed for tensor parameters have rank 0.

use thiserror::Error;

use crate::graph::{Dictionary, Shape, Value};

/// The shape of one declared result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultShape {
    Single(Shape),
    /// A tensor-array result such as `split`'s.
    Multiple(Vec<Shape>),
}

/// Why a result shape could not be computed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ShapeError(pub String);

impl ShapeError {
    pub fn new(message: impl Into<String>) -> Self {
        ShapeError(message.into())
    }
}

type ShapeResult<T> = std::result::Result<T, ShapeError>;

fn fail<T>(message: impl Into<String>) -> ShapeResult<T> {
    Err(ShapeError::new(message))
}

/// Product of the extents, or an error when it does not fit in `usize`.
fn checked_volume(shape: &[usize]) -> ShapeResult<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| ShapeError::new(format!("volume of shape {shape:?} is too large")))
}

fn checked_sum(terms: &[usize]) -> ShapeResult<usize> {
    terms
        .iter()
        .try_fold(0usize, |acc, &d| acc.checked_add(d))
        .ok_or_else(|| ShapeError::new(format!("sum of extents {terms:?} is too large")))
}

// Public API

/// Infer result shapes for the primitive `op`.
///
/// Returns `Ok(None)` when `op` has no built-in rule.
pub fn infer(
    op: &str,
    args: &Dictionary<Value>,
    shapes: &Dictionary<Shape>,
) -> ShapeResult<Option<Vec<ResultShape>>> {
    let ctx = Args { op, args, shapes };
    let single = |shape: ShapeResult<Shape>| shape.map(|s| Some(vec![ResultShape::Single(s)]));

    match op {
        "external" | "variable" => single(ctx.declared_shape()),
        "constant" => single(ctx.constant_shape()),

        //  Unary element-wise: shape preserved
        "copy" | "neg" | "rcp" | "exp" | "log" | "log2" | "sin" | "cos" | "abs" | "sign"
        | "floor" | "ceil" | "round" | "sqrt" | "rsqrt" | "sigmoid" | "tanh" | "not" => {
            single(ctx.tensor("x"))
        }

        //  Binary element-wise: broadcast
        "add" | "sub" | "mul" | "div" | "pow" | "min" | "max" | "lt" | "gt" | "le" | "ge"
        | "eq" | "ne" | "and" | "or" => single(broadcast(&ctx.tensor("x")?, &ctx.tensor("y")?)),

        "select" => {
            let shape = broadcast(&ctx.tensor("condition")?, &ctx.tensor("true_value")?)?;
            single(broadcast(&shape, &ctx.tensor("false_value")?))
        }

        "matmul" => single(ctx.matmul()),
        "conv" => single(ctx.conv()),
        "max_pool" | "avg_pool" => single(ctx.pool()),
        "sum_reduce" | "mean_reduce" | "max_reduce" | "min_reduce" => single(ctx.reduce()),
        "reshape" => single(ctx.reshape()),
        "transpose" => single(ctx.transpose()),
        "squeeze" => single(ctx.squeeze()),
        "unsqueeze" => single(ctx.unsqueeze()),
        "concat" => single(ctx.concat()),
        "split" => ctx.split().map(|parts| Some(vec![ResultShape::Multiple(parts)])),
        "pad" => single(ctx.pad()),

        _ => Ok(None),
    }
}

/// Broadcast two shapes, aligning dimensions from the left.
pub fn broadcast(a: &[usize], b: &[usize]) -> ShapeResult<Shape> {
    let rank = a.len().max(b.len());
    (0..rank)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(1);
            let y = b.get(i).copied().unwrap_or(1);
            match (x, y) {
                _ if x == y => Ok(x),
                (1, _) => Ok(y),
                (_, 1) => Ok(x),
                _ => fail(format!("incompatible shapes {a:?} and {b:?} for broadcasting")),
            }
        })
        .collect()
}

// Argument access

struct Args<'a> {
    op: &'a str,
    args: &'a Dictionary<Value>,
    shapes: &'a Dictionary<Shape>,
}

impl Args<'_> {
    fn value(&self, name: &str) -> ShapeResult<&Value> {
        self.args
            .get(name)
            .ok_or_else(|| ShapeError::new(format!("'{}' has no argument '{name}'", self.op)))
    }

    fn shape_of(&self, value: &Value) -> ShapeResult<Shape> {
        match value {
            Value::Identifier(id) => self
                .shapes
                .get(id)
                .cloned()
                .ok_or_else(|| ShapeError::new(format!("shape of tensor '{id}' is unknown"))),
            Value::Integer(_) | Value::Scalar(_) | Value::Logical(_) => Ok(Vec::new()),
            other => fail(format!(
                "argument of '{}' must be a tensor, found {other}",
                self.op
            )),
        }
    }

    /// Shape of a tensor-valued argument.
    fn tensor(&self, name: &str) -> ShapeResult<Shape> {
        self.shape_of(self.value(name)?)
    }

    fn integer(&self, name: &str) -> ShapeResult<i64> {
        self.value(name)?
            .as_integer()
            .ok_or_else(|| ShapeError::new(format!("'{name}' must be an integer")))
    }

    fn logical(&self, name: &str) -> ShapeResult<bool> {
        self.value(name)?
            .as_logical()
            .ok_or_else(|| ShapeError::new(format!("'{name}' must be a logical")))
    }

    fn integers(&self, name: &str) -> ShapeResult<Vec<i64>> {
        self.value(name)?
            .as_integers()
            .ok_or_else(|| ShapeError::new(format!("'{name}' must be an integer array")))
    }

    /// Axis indices, each checked against `rank`.
    fn axes(&self, name: &str, rank: usize) -> ShapeResult<Vec<usize>> {
        self.integers(name)?
            .into_iter()
            .map(|axis| {
                usize::try_from(axis)
                    .ok()
                    .filter(|&a| a < rank)
                    .ok_or_else(|| ShapeError::new(format!("axis {axis} is out of range for rank {rank}")))
            })
            .collect()
    }

    /// `(integer, integer)[]` padding pairs.
    fn padding(&self, name: &str) -> ShapeResult<Vec<(usize, usize)>> {
        let items = match self.value(name)? {
            Value::Array(items) => items,
            _ => return fail(format!("'{name}' must be an array of integer pairs")),
        };
        items
            .iter()
            .map(|item| match item.as_items() {
                Some([Value::Integer(lo), Value::Integer(hi)]) if *lo >= 0 && *hi >= 0 => {
                    Ok((*lo as usize, *hi as usize))
                }
                _ => fail(format!("invalid padding entry {item} in '{}'", self.op)),
            })
            .collect()
    }

    /// Positive per-dimension factors such as stride and dilation.
    /// An empty array means all ones.
    fn factors(&self, name: &str, count: usize) -> ShapeResult<Vec<usize>> {
        let values = self.integers(name)?;
        if values.is_empty() {
            return Ok(vec![1; count]);
        }
        if values.len() != count {
            return fail(format!(
                "'{name}' of '{}' must have {count} entries, found {}",
                self.op,
                values.len()
            ));
        }
        values
            .into_iter()
            .map(|v| {
                if v > 0 {
                    Ok(v as usize)
                } else {
                    fail(format!("'{name}' entries must be positive, found {v}"))
                }
            })
            .collect()
    }

    // Rules

    fn declared_shape(&self) -> ShapeResult<Shape> {
        let dims = self.integers("shape")?;
        dims.iter()
            .map(|&d| {
                if d > 0 {
                    Ok(d as usize)
                } else {
                    fail(format!("shape {dims:?} of '{}' must have positive extents", self.op))
                }
            })
            .collect()
    }

    fn constant_shape(&self) -> ShapeResult<Shape> {
        let shape = self.declared_shape()?;
        let volume = checked_volume(&shape)?;
        let count = match self.value("value")? {
            Value::Array(items) => items.len(),
            _ => 1,
        };
        if count != 1 && count != volume {
            return fail(format!(
                "constant value has {count} items but shape {shape:?} has volume {volume}"
            ));
        }
        Ok(shape)
    }

    fn matmul(&self) -> ShapeResult<Shape> {
        let a = self.tensor("A")?;
        let b = self.tensor("B")?;
        if a.len() < 2 || a.len() != b.len() {
            return fail(format!(
                "matmul operands must have equal rank of at least 2, found {a:?} and {b:?}"
            ));
        }
        let r = a.len();
        let (m, ka) = if self.logical("transposeA")? {
            (a[r - 1], a[r - 2])
        } else {
            (a[r - 2], a[r - 1])
        };
        let (kb, n) = if self.logical("transposeB")? {
            (b[r - 1], b[r - 2])
        } else {
            (b[r - 2], b[r - 1])
        };
        if ka != kb {
            return fail(format!(
                "inner dimensions of matmul do not match ({ka} vs {kb})"
            ));
        }
        let mut out = broadcast(&a[..r - 2], &b[..r - 2])?;
        out.push(m);
        out.push(n);
        Ok(out)
    }

    fn conv(&self) -> ShapeResult<Shape> {
        let input = self.tensor("input")?;
        let filter = self.tensor("filter")?;
        if input.len() < 3 || input.len() != filter.len() {
            return fail(format!(
                "conv input {input:?} and filter {filter:?} must have equal rank of at least 3"
            ));
        }
        let channels = input[1];
        let groups = match self.integer("groups")? {
            0 => channels,
            g if g > 0 => g as usize,
            g => return fail(format!("groups must be non-negative, found {g}")),
        };
        if filter[1].checked_mul(groups) != Some(channels) {
            return fail(format!(
                "filter {filter:?} does not match {channels} input channels in {groups} groups"
            ));
        }
        if filter[0] % groups != 0 {
            return fail(format!(
                "filter count {} is not divisible by {groups} groups",
                filter[0]
            ));
        }

        let bias = self.tensor("bias")?;
        if !bias.is_empty() && bias != [1, filter[0]] {
            return fail(format!(
                "bias shape {bias:?} must be [1, {}]",
                filter[0]
            ));
        }

        let spatial = input.len() - 2;
        let padding = self.padding("padding")?;
        let stride = self.factors("stride", spatial)?;
        let dilation = self.factors("dilation", spatial)?;
        let extents = windowed(
            &input[2..],
            &filter[2..],
            &padding,
            &stride,
            &dilation,
        )?;

        let mut out = vec![input[0], filter[0]];
        out.extend(extents);
        Ok(out)
    }

    fn pool(&self) -> ShapeResult<Shape> {
        let input = self.tensor("input")?;
        let size = self.integers("size")?;
        if size.len() != input.len() || size.iter().any(|&s| s <= 0) {
            return fail(format!(
                "pooling size {size:?} must have a positive entry per dimension of {input:?}"
            ));
        }
        let size: Vec<usize> = size.into_iter().map(|s| s as usize).collect();
        let padding = self.padding("padding")?;
        let stride = self.factors("stride", input.len())?;
        let dilation = self.factors("dilation", input.len())?;
        windowed(&input, &size, &padding, &stride, &dilation)
    }

    fn reduce(&self) -> ShapeResult<Shape> {
        let mut shape = self.tensor("input")?;
        for axis in self.axes("axes", shape.len())? {
            shape[axis] = 1;
        }
        Ok(shape)
    }

    fn reshape(&self) -> ShapeResult<Shape> {
        let input = self.tensor("input")?;
        let target = self.integers("shape")?;
        let start = usize::try_from(self.integer("axis_start")?)
            .ok()
            .filter(|&s| s <= input.len())
            .ok_or_else(|| ShapeError::new("axis_start is out of range"))?;
        let count = match self.integer("axis_count")? {
            -1 => input.len() - start,
            c => match usize::try_from(c) {
                Ok(count) if count <= input.len() - start => count,
                _ => return fail(format!("axis_count {c} is out of range")),
            },
        };

        let replaced = &input[start..start + count];
        let mut dims = Vec::with_capacity(target.len());
        let mut inferred = None;
        for (i, &d) in target.iter().enumerate() {
            match d {
                0 => match replaced.get(i) {
                    Some(&extent) => dims.push(extent),
                    None => return fail(format!("reshape cannot copy extent {i}")),
                },
                -1 if inferred.is_none() => {
                    inferred = Some(i);
                    dims.push(1);
                }
                -1 => return fail("reshape shape may contain at most one -1"),
                d if d > 0 => dims.push(d as usize),
                d => return fail(format!("invalid reshape extent {d}")),
            }
        }

        let volume = checked_volume(replaced)?;
        let partial = checked_volume(&dims)?;
        if let Some(i) = inferred {
            if partial == 0 || volume % partial != 0 {
                return fail(format!(
                    "cannot reshape {replaced:?} into {target:?}"
                ));
            }
            dims[i] = volume / partial;
        } else if partial != volume {
            return fail(format!(
                "cannot reshape {replaced:?} into {target:?}: volumes differ"
            ));
        }

        let mut out = input[..start].to_vec();
        out.extend(dims);
        out.extend_from_slice(&input[start + count..]);
        Ok(out)
    }

    fn transpose(&self) -> ShapeResult<Shape> {
        let input = self.tensor("input")?;
        let axes = self.axes("axes", input.len())?;
        let mut sorted = axes.clone();
        sorted.sort_unstable();
        if sorted.iter().enumerate().any(|(i, &a)| i != a) {
            return fail(format!("transpose axes {axes:?} are not a permutation"));
        }
        let mut out: Shape = axes.iter().map(|&a| input[a]).collect();
        out.extend_from_slice(&input[axes.len()..]);
        Ok(out)
    }

    fn squeeze(&self) -> ShapeResult<Shape> {
        let input = self.tensor("input")?;
        let axes = self.axes("axes", input.len())?;
        if let Some(&axis) = axes.iter().find(|&&a| input[a] != 1) {
            return fail(format!(
                "cannot squeeze axis {axis} of extent {}",
                input[axis]
            ));
        }
        Ok(input
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, &d)| d)
            .collect())
    }

    fn unsqueeze(&self) -> ShapeResult<Shape> {
        let mut out = self.tensor("input")?;
        let mut axes = self.axes("axes", out.len() + self.integers("axes")?.len())?;
        axes.sort_unstable();
        for axis in axes {
            if axis > out.len() {
                return fail(format!("unsqueeze axis {axis} is out of range"));
            }
            out.insert(axis, 1);
        }
        Ok(out)
    }

    fn concat(&self) -> ShapeResult<Shape> {
        let values = match self.value("values")? {
            Value::Array(items) if !items.is_empty() => items,
            _ => return fail("concat requires a non-empty array of tensors"),
        };
        let shapes = values
            .iter()
            .map(|v| self.shape_of(v))
            .collect::<ShapeResult<Vec<_>>>()?;
        let first = &shapes[0];
        let axis = self.axes_single("axis", first.len())?;

        let mut out = first.clone();
        for shape in &shapes[1..] {
            let compatible = shape.len() == first.len()
                && shape
                    .iter()
                    .zip(first)
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return fail(format!(
                    "cannot concatenate {first:?} and {shape:?} along axis {axis}"
                ));
            }
            out[axis] = checked_sum(&[out[axis], shape[axis]])?;
        }
        Ok(out)
    }

    fn split(&self) -> ShapeResult<Vec<Shape>> {
        let input = self.tensor("value")?;
        let axis = self.axes_single("axis", input.len())?;
        let ratios = self.integers("ratios")?;
        let parts: Vec<usize> = ratios
            .iter()
            .filter_map(|&r| usize::try_from(r).ok().filter(|&r| r > 0))
            .collect();
        if parts.is_empty() || parts.len() != ratios.len() {
            return fail(format!("split ratios {ratios:?} must be positive"));
        }
        let total = checked_sum(&parts)?;
        let extent = input[axis];
        if extent % total != 0 {
            return fail(format!(
                "extent {extent} is not divisible by the sum of ratios {ratios:?}"
            ));
        }
        let unit = extent / total;
        Ok(parts
            .iter()
            .map(|&r| {
                let mut part = input.clone();
                part[axis] = unit * r;
                part
            })
            .collect())
    }

    fn pad(&self) -> ShapeResult<Shape> {
        let input = self.tensor("input")?;
        let padding = self.padding("padding")?;
        if padding.len() != input.len() {
            return fail(format!(
                "padding must have {} entries, found {}",
                input.len(),
                padding.len()
            ));
        }
        input
            .iter()
            .zip(&padding)
            .map(|(&d, &(lo, hi))| checked_sum(&[d, lo, hi]))
            .collect()
    }

    fn axes_single(&self, name: &str, rank: usize) -> ShapeResult<usize> {
        let axis = self.integer(name)?;
        usize::try_from(axis)
            .ok()
            .filter(|&a| a < rank)
            .ok_or_else(|| ShapeError::new(format!("axis {axis} is out of range for rank {rank}")))
    }
}

/// Output extents of a sliding window. Empty `padding` means same-style
/// padding, where only the stride shrinks the output.
fn windowed(
    input: &[usize],
    kernel: &[usize],
    padding: &[(usize, usize)],
    stride: &[usize],
    dilation: &[usize],
) -> ShapeResult<Shape> {
    if padding.is_empty() {
        return Ok(input
            .iter()
            .zip(stride)
            .map(|(&i, &s)| i.div_ceil(s))
            .collect());
    }
    if padding.len() != input.len() {
        return fail(format!(
            "padding must have {} entries, found {}",
            input.len(),
            padding.len()
        ));
    }
    (0..input.len())
        .map(|i| {
            let (lo, hi) = padding[i];
            let padded = checked_sum(&[input[i], lo, hi])?;
            let window = kernel[i]
                .saturating_sub(1)
                .checked_mul(dilation[i])
                .and_then(|w| w.checked_add(1))
                .ok_or_else(|| ShapeError::new(format!("window of extent {} is too large", kernel[i])))?;
            if window > padded {
                return fail(format!(
                    "window of extent {window} exceeds padded input extent {padded}"
                ));
            }
            Ok((padded - window) / stride[i] + 1)
        })
        .collect()
}
