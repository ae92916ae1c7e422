// Frontend — The two interchangeable parser variants
//
//   FlatParser  invocations only, nothing is ever expanded
//   CompParser  fragment definitions and operator expressions, expanded on
//               demand according to `Callback::is_atomic`
//
// Both read the whole input, parse it, and lower it through the callback.

use std::io::Read;

use log::debug;

use crate::callback::Callback;
use crate::error::Result;
use crate::lower::{lower, Mode};
use crate::stdlib::Library;
use crate::validate::check_flat;

/// A parser that drives one graph through a callback.
pub trait Parser {
    fn parse(&mut self, input: &mut dyn Read, callback: &mut dyn Callback) -> Result<()>;
}

fn read_source(input: &mut dyn Read) -> Result<String> {
    let mut source = String::new();
    input.read_to_string(&mut source)?;
    Ok(source)
}

/// Parser for the flat grammar.
#[derive(Debug, Clone)]
pub struct FlatParser {
    library: Library,
}

impl FlatParser {
    pub fn new() -> Result<Self> {
        debug!("using the flat parser");
        Ok(Self {
            library: Library::load(false)?,
        })
    }
}

impl Parser for FlatParser {
    fn parse(&mut self, input: &mut dyn Read, callback: &mut dyn Callback) -> Result<()> {
        let source = read_source(input)?;
        let doc = crate::parser::parse(&source)?;
        check_flat(&doc)?;
        lower(&doc, &self.library, Mode::Flat, callback)
    }
}

/// Parser for the compositional grammar, optionally with the layer fragments.
#[derive(Debug, Clone)]
pub struct CompParser {
    library: Library,
}

impl CompParser {
    pub fn new(layers: bool) -> Result<Self> {
        debug!(
            "using the compositional parser ({})",
            if layers { "with layers" } else { "without layers" }
        );
        Ok(Self {
            library: Library::load(layers)?,
        })
    }
}

impl Parser for CompParser {
    fn parse(&mut self, input: &mut dyn Read, callback: &mut dyn Callback) -> Result<()> {
        let source = read_source(input)?;
        let doc = crate::parser::parse(&source)?;

        // Document fragments are visible to this parse only.
        let mut library = self.library.clone();
        for def in &doc.fragments {
            library.define(def)?;
        }
        debug!("document defines {} fragments", doc.fragments.len());

        lower(&doc, &library, Mode::Compositional, callback)
    }
}
