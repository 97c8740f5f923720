//! Plots, series, and the registries behind them
//!
//! A [`Plot`] owns a shared time axis and a set of named [`Series`], one
//! per watched variable. Series are keyed by variable name; the
//! [`PlotRegistry`] cascades variable renames and removals into every
//! plot. Acquisition threads append under the registry mutex and readers
//! take snapshots, so no sample data is shared mutably across threads.

use std::collections::BTreeMap;

use crate::buffer::ScrollingBuffer;
use crate::error::{ProbeScopeError, Result};
use crate::symbols::SymbolSource;
use crate::types::{DisplayFormat, Variable};

/// Default history length per series
pub const DEFAULT_MAX_POINTS: usize = 10_000;

/// One variable's value history within a plot
pub struct Series {
    pub var_name: String,
    pub address: u64,
    pub visible: bool,
    pub format: DisplayFormat,
    pub buffer: ScrollingBuffer<f64>,
}

impl Series {
    pub fn new(var_name: impl Into<String>, address: u64, max_points: usize) -> Self {
        Self {
            var_name: var_name.into(),
            address,
            visible: true,
            format: DisplayFormat::Dec,
            buffer: ScrollingBuffer::new(max_points),
        }
    }
}

/// Point-in-time copy of a plot's data, safe to hand to a renderer
#[derive(Debug, Clone, Default)]
pub struct PlotSnapshot {
    pub name: String,
    pub time: Vec<f64>,
    pub series: Vec<(String, Vec<f64>)>,
}

/// A named plot: shared time axis plus its series
pub struct Plot {
    pub name: String,
    time: ScrollingBuffer<f64>,
    series: BTreeMap<String, Series>,
    max_points: usize,
}

impl Plot {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_max_points(name, DEFAULT_MAX_POINTS)
    }

    pub fn with_max_points(name: impl Into<String>, max_points: usize) -> Self {
        Self {
            name: name.into(),
            time: ScrollingBuffer::new(max_points),
            series: BTreeMap::new(),
            max_points,
        }
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn series_names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn series(&self, var_name: &str) -> Option<&Series> {
        self.series.get(var_name)
    }

    pub fn series_mut(&mut self, var_name: &str) -> Option<&mut Series> {
        self.series.get_mut(var_name)
    }

    /// Add a series for a variable. Existing history is cleared so the time
    /// axis and every series stay the same length.
    pub fn add_series(&mut self, var_name: impl Into<String>, address: u64) {
        let var_name = var_name.into();
        if self.series.contains_key(&var_name) {
            return;
        }
        self.series
            .insert(var_name.clone(), Series::new(var_name, address, self.max_points));
        self.erase();
    }

    pub fn remove_series(&mut self, var_name: &str) -> bool {
        self.series.remove(var_name).is_some()
    }

    /// Append one sample row. Series without a value in `values` repeat
    /// their last point so all buffers stay aligned with the time axis.
    pub fn add_sample(&mut self, timestamp: f64, values: &[(&str, f64)]) {
        self.time.add_point(timestamp);
        for (name, series) in self.series.iter_mut() {
            let value = values
                .iter()
                .find(|(n, _)| n == name)
                .map(|&(_, v)| v)
                .or_else(|| series.buffer.back())
                .unwrap_or(0.0);
            series.buffer.add_point(value);
        }
    }

    /// Clear all history, keeping capacity and series set.
    /// Safe to call repeatedly and while acquisition is running.
    pub fn erase(&mut self) {
        self.time.erase();
        for series in self.series.values_mut() {
            series.buffer.erase();
        }
    }

    /// Resize the history of the time axis and every series together
    pub fn set_max_points(&mut self, max_points: usize) {
        self.max_points = max_points;
        self.time.set_max_size(max_points);
        for series in self.series.values_mut() {
            series.buffer.set_max_size(max_points);
        }
    }

    /// Copy of the visible data, oldest first
    pub fn snapshot(&self) -> PlotSnapshot {
        PlotSnapshot {
            name: self.name.clone(),
            time: self.time.copy_data(),
            series: self
                .series
                .values()
                .filter(|s| s.visible)
                .map(|s| (s.var_name.clone(), s.buffer.copy_data()))
                .collect(),
        }
    }
}

/// All plots, keyed by name
#[derive(Default)]
pub struct PlotRegistry {
    plots: BTreeMap<String, Plot>,
}

impl PlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plot(&mut self, plot: Plot) {
        self.plots.insert(plot.name.clone(), plot);
    }

    pub fn remove_plot(&mut self, name: &str) -> bool {
        self.plots.remove(name).is_some()
    }

    pub fn plot(&self, name: &str) -> Option<&Plot> {
        self.plots.get(name)
    }

    pub fn plot_mut(&mut self, name: &str) -> Option<&mut Plot> {
        self.plots.get_mut(name)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Plot> {
        self.plots.values_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plot> {
        self.plots.values()
    }

    /// Drop the variable's series from every plot
    pub fn remove_series_for_variable(&mut self, var_name: &str) {
        for plot in self.plots.values_mut() {
            plot.remove_series(var_name);
        }
    }

    /// Re-key the variable's series in every plot
    pub fn rename_series_for_variable(&mut self, old_name: &str, new_name: &str) {
        for plot in self.plots.values_mut() {
            if let Some(mut series) = plot.series.remove(old_name) {
                series.var_name = new_name.to_string();
                plot.series.insert(new_name.to_string(), series);
            }
        }
    }

    pub fn erase_all(&mut self) {
        for plot in self.plots.values_mut() {
            plot.erase();
        }
    }

    pub fn set_max_points_all(&mut self, max_points: usize) {
        for plot in self.plots.values_mut() {
            plot.set_max_points(max_points);
        }
    }
}

/// Watched variables, keyed by name
#[derive(Default)]
pub struct VariableRegistry {
    vars: BTreeMap<String, Variable>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn insert(&mut self, var: Variable) {
        self.vars.insert(var.name.clone(), var);
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.vars.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        self.vars.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.values()
    }

    /// Variables that take part in acquisition
    pub fn enabled(&self) -> impl Iterator<Item = &Variable> {
        self.vars.values().filter(|v| v.enabled)
    }

    /// Re-key a variable. Fails if the new name is already taken.
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        if self.vars.contains_key(new_name) {
            return Err(ProbeScopeError::Variable(format!(
                "variable '{new_name}' already exists"
            )));
        }
        let mut var = self.vars.remove(old_name).ok_or_else(|| {
            ProbeScopeError::Variable(format!("variable '{old_name}' not found"))
        })?;
        var.name = new_name.to_string();
        self.vars.insert(new_name.to_string(), var);
        Ok(())
    }

    /// Re-resolve every variable's address against a fresh symbol table,
    /// marking the ones the table no longer contains
    pub fn refresh_from(&mut self, symbols: &dyn SymbolSource) {
        for var in self.vars.values_mut() {
            match symbols.resolve(&var.name) {
                Some(symbol) => {
                    var.address = symbol.address;
                    var.var_type = symbol.var_type;
                    var.is_found = true;
                }
                None => {
                    var.is_found = false;
                    tracing::warn!("variable '{}' not found in symbol table", var.name);
                }
            }
        }
    }
}
