//! Integration seams for symbol resolution and sample export
//!
//! The acquisition core does not parse debug info or write files itself;
//! hosts plug in a [`SymbolSource`] (typically backed by an ELF reader) and
//! optionally a [`SampleSink`] that receives every accepted sample row.

use crate::types::VariableType;

/// Address and type of a resolved symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub address: u64,
    pub size: usize,
    pub var_type: VariableType,
}

/// Looks up variables by name in the target's symbol table
pub trait SymbolSource: Send {
    fn resolve(&self, name: &str) -> Option<ResolvedSymbol>;
}

/// Receives sample rows as they are accepted into the plots.
///
/// Called from the acquisition thread while no locks are held; slow sinks
/// delay sampling, so implementations should buffer.
pub trait SampleSink: Send {
    fn record(&mut self, timestamp: f64, values: &[(&str, f64)]);
}

/// Static symbol table, convenient for tests and demos
#[derive(Debug, Clone, Default)]
pub struct StaticSymbols {
    entries: Vec<(String, ResolvedSymbol)>,
}

impl StaticSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, symbol: ResolvedSymbol) -> Self {
        self.entries.push((name.into(), symbol));
        self
    }
}

impl SymbolSource for StaticSymbols {
    fn resolve(&self, name: &str) -> Option<ResolvedSymbol> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, s)| s)
    }
}
