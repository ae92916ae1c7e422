// Standard library — Predefined fragments available to every document
//
// The library is written in NNEF itself and parsed on construction:
//
//   1. Primitives  — body-less declarations with built-in shape rules
//   2. Compounds   — fragments with bodies (relu, softmax, linear, ...)
//   3. Layers      — optional higher-level fragments that declare their own
//                    variables (enabled with `--layers`)
//
// Primitives and compounds together are the "standard" operations: the
// default atomic policy keeps them opaque. Layers are not standard, so they
// are expanded unless an override says otherwise.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::ast::FragmentDef;
use crate::callback::AtomicPolicy;
use crate::error::{Error, Result};
use crate::graph::{Dictionary, Fragment, Prototype, Value};
use crate::parser::parse_fragments;
use crate::validate::build_fragment;

pub const PRIMITIVES: &str = r#"
fragment external<? = scalar>( shape: integer[] ) -> ( output: tensor<?> );
fragment variable<? = scalar>( shape: integer[], label: string ) -> ( output: tensor<?> );
fragment constant<? = scalar>( shape: integer[], value: ?[] ) -> ( output: tensor<?> );
fragment copy<?>( x: tensor<?> ) -> ( y: tensor<?> );

fragment neg( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment rcp( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment exp( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment log( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment log2( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment sin( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment cos( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment abs( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment sign( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment floor( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment ceil( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment round( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment sqrt( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment rsqrt( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment sigmoid( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment tanh( x: tensor<scalar> ) -> ( y: tensor<scalar> );
fragment not( x: tensor<logical> ) -> ( y: tensor<logical> );

fragment add( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<scalar> );
fragment sub( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<scalar> );
fragment mul( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<scalar> );
fragment div( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<scalar> );
fragment pow( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<scalar> );
fragment min( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<scalar> );
fragment max( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<scalar> );
fragment lt( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<logical> );
fragment gt( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<logical> );
fragment le( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<logical> );
fragment ge( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<logical> );
fragment eq( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<logical> );
fragment ne( x: tensor<scalar>, y: tensor<scalar> ) -> ( z: tensor<logical> );
fragment and( x: tensor<logical>, y: tensor<logical> ) -> ( z: tensor<logical> );
fragment or( x: tensor<logical>, y: tensor<logical> ) -> ( z: tensor<logical> );

fragment select<?>( condition: tensor<logical>, true_value: tensor<?>, false_value: tensor<?> )
    -> ( output: tensor<?> );

fragment matmul( A: tensor<scalar>, B: tensor<scalar>, transposeA: logical = false, transposeB: logical = false )
    -> ( C: tensor<scalar> );

fragment conv(
    input: tensor<scalar>,
    filter: tensor<scalar>,
    bias: tensor<scalar> = 0.0,
    border: string = 'constant',
    padding: (integer, integer)[] = [],
    stride: integer[] = [],
    dilation: integer[] = [],
    groups: integer = 1 )
    -> ( output: tensor<scalar> );

fragment max_pool(
    input: tensor<scalar>,
    size: integer[],
    border: string = 'constant',
    padding: (integer, integer)[] = [],
    stride: integer[] = [],
    dilation: integer[] = [] )
    -> ( output: tensor<scalar> );

fragment avg_pool(
    input: tensor<scalar>,
    size: integer[],
    border: string = 'constant',
    padding: (integer, integer)[] = [],
    stride: integer[] = [],
    dilation: integer[] = [] )
    -> ( output: tensor<scalar> );

fragment sum_reduce( input: tensor<scalar>, axes: integer[], normalize: logical = false ) -> ( output: tensor<scalar> );
fragment mean_reduce( input: tensor<scalar>, axes: integer[] ) -> ( output: tensor<scalar> );
fragment max_reduce( input: tensor<scalar>, axes: integer[] ) -> ( output: tensor<scalar> );
fragment min_reduce( input: tensor<scalar>, axes: integer[] ) -> ( output: tensor<scalar> );

fragment reshape<?>( input: tensor<?>, shape: integer[], axis_start: integer = 0, axis_count: integer = -1 )
    -> ( output: tensor<?> );
fragment transpose<?>( input: tensor<?>, axes: integer[] ) -> ( output: tensor<?> );
fragment squeeze<?>( input: tensor<?>, axes: integer[] ) -> ( output: tensor<?> );
fragment unsqueeze<?>( input: tensor<?>, axes: integer[] ) -> ( output: tensor<?> );
fragment concat<?>( values: tensor<?>[], axis: integer ) -> ( value: tensor<?> );
fragment split<?>( value: tensor<?>, axis: integer, ratios: integer[] ) -> ( values: tensor<?>[] );
fragment pad( input: tensor<scalar>, padding: (integer, integer)[], border: string = 'constant', value: scalar = 0.0 )
    -> ( output: tensor<scalar> );
"#;

pub const COMPOUNDS: &str = r#"
fragment relu( x: tensor<scalar> ) -> ( y: tensor<scalar> )
{
    y = max(x, 0.0);
}

fragment leaky_relu( x: tensor<scalar>, alpha: scalar ) -> ( y: tensor<scalar> )
{
    y = select(x < 0.0, alpha * x, x);
}

fragment elu( x: tensor<scalar>, alpha: scalar = 1.0 ) -> ( y: tensor<scalar> )
{
    y = select(x < 0.0, alpha * (exp(x) - 1.0), x);
}

fragment softplus( x: tensor<scalar> ) -> ( y: tensor<scalar> )
{
    y = log(exp(x) + 1.0);
}

fragment sqr( x: tensor<scalar> ) -> ( y: tensor<scalar> )
{
    y = x ^ 2.0;
}

fragment rsqr( x: tensor<scalar> ) -> ( y: tensor<scalar> )
{
    y = x ^ -2.0;
}

fragment clamp( x: tensor<scalar>, a: tensor<scalar>, b: tensor<scalar> ) -> ( y: tensor<scalar> )
{
    y = max(min(x, b), a);
}

fragment linear( input: tensor<scalar>, filter: tensor<scalar>, bias: tensor<scalar> = 0.0 )
    -> ( output: tensor<scalar> )
{
    output = matmul(input, filter, transposeB = true) + bias;
}

fragment softmax( x: tensor<scalar>, axes: integer[] = [1] ) -> ( y: tensor<scalar> )
{
    e = exp(x);
    y = e / sum_reduce(e, axes = axes);
}

fragment batch_normalization(
    input: tensor<scalar>,
    mean: tensor<scalar>,
    variance: tensor<scalar>,
    offset: tensor<scalar>,
    scale: tensor<scalar>,
    epsilon: scalar )
    -> ( output: tensor<scalar> )
{
    output = offset + scale * (input - mean) / sqrt(variance + epsilon);
}
"#;

pub const LAYERS: &str = r#"
fragment linear_layer( input: tensor<scalar>, channels: integer, use_bias: logical = true, scope: string )
    -> ( output: tensor<scalar> )
{
    filter = variable(shape = [channels, shape_of(input)[1]], label = scope + '/filter');
    bias = if use_bias then variable(shape = [1, channels], label = scope + '/bias') else 0.0;
    output = linear(input, filter, bias);
}

fragment conv_layer(
    input: tensor<scalar>,
    channels: integer,
    size: integer[],
    border: string = 'constant',
    padding: (integer, integer)[] = [],
    stride: integer[] = [],
    dilation: integer[] = [],
    groups: integer = 1,
    use_bias: logical = true,
    scope: string )
    -> ( output: tensor<scalar> )
{
    planes = if groups == 0 then 1 else shape_of(input)[1] / groups;
    filter = variable(shape = [channels, planes] + size, label = scope + '/filter');
    bias = if use_bias then variable(shape = [1, channels], label = scope + '/bias') else 0.0;
    output = conv(input, filter, bias, border = border, padding = padding,
                  stride = stride, dilation = dilation, groups = groups);
}

fragment batch_normalization_layer(
    input: tensor<scalar>,
    center: logical = true,
    scale: logical = true,
    epsilon: scalar,
    scope: string )
    -> ( output: tensor<scalar> )
{
    shape = [1, shape_of(input)[1]];
    gamma = if scale then variable(shape = shape, label = scope + '/gamma') else 1.0;
    beta = if center then variable(shape = shape, label = scope + '/beta') else 0.0;
    mean = variable(shape = shape, label = scope + '/mean');
    variance = variable(shape = shape, label = scope + '/variance');
    output = batch_normalization(input, mean, variance, beta, gamma, epsilon);
}

fragment max_pool_layer(
    input: tensor<scalar>,
    size: integer[],
    border: string = 'ignore',
    padding: (integer, integer)[] = [],
    stride: integer[] = [],
    dilation: integer[] = [] )
    -> ( output: tensor<scalar> )
{
    output = max_pool(input, size = size, border = border, padding = padding,
                      stride = stride, dilation = dilation);
}
"#;

/// Default atomic policy: an operation is atomic when it is standard.
#[derive(Debug, Clone, Default)]
pub struct StandardOps {
    names: HashSet<String>,
}

impl StandardOps {
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

impl AtomicPolicy for StandardOps {
    fn is_atomic(&self, proto: &Prototype, _args: &Dictionary<Value>) -> bool {
        self.contains(&proto.name)
    }
}

/// All fragments visible to a document, plus the default atomic policy.
#[derive(Debug, Clone)]
pub struct Library {
    pub fragments: HashMap<String, Fragment>,
    pub policy: StandardOps,
}

impl Library {
    /// The standard fragments, and the layer fragments when `layers` is set.
    pub fn load(layers: bool) -> Result<Self> {
        let mut library = Library {
            fragments: HashMap::new(),
            policy: StandardOps::default(),
        };
        for source in [PRIMITIVES, COMPOUNDS] {
            for def in parse_fragments(source)? {
                library.policy.names.insert(def.name.clone());
                library.define(&def)?;
            }
        }
        if layers {
            for def in parse_fragments(LAYERS)? {
                library.define(&def)?;
            }
        }
        debug!(
            "loaded {} fragments ({} standard, layers {})",
            library.fragments.len(),
            library.policy.names.len(),
            if layers { "on" } else { "off" }
        );
        Ok(library)
    }

    /// Add a fragment. Names are unique across the library and the document.
    pub fn define(&mut self, def: &FragmentDef) -> Result<()> {
        if self.fragments.contains_key(&def.name) {
            return Err(Error::semantic(
                format!("fragment '{}' is already defined", def.name),
                def.span,
            ));
        }
        let fragment = build_fragment(def)?;
        self.fragments.insert(def.name.clone(), fragment);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Fragment> {
        self.fragments.get(name)
    }
}
