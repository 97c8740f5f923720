//! Project configuration
//!
//! One TOML file holds everything a session needs: probe selection,
//! sampling and trace parameters, the trigger, and the watched variables.
//! Values are clamped into safe ranges on load so a hand-edited file
//! cannot ask for a zero sample period or an unbounded history.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProbeScopeError, Result, ResultExt};
use crate::probe::{ProbeSettings, TraceConfig};
use crate::trace::TRACE_CHANNELS;
use crate::types::{Variable, VariableType};

/// Sampling frequency bounds in Hz
pub const MIN_SAMPLE_FREQUENCY_HZ: u32 = 1;
pub const MAX_SAMPLE_FREQUENCY_HZ: u32 = 1_000_000;

/// Per-series history bounds
pub const MIN_MAX_POINTS: usize = 100;
pub const MAX_MAX_POINTS: usize = 20_000;

/// Memory sampling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    pub probe: ProbeSettings,
    /// Target sample rate; actual rate is bounded by probe latency
    pub sample_frequency_hz: u32,
    /// History length per series
    pub max_points: usize,
    /// Most points a renderer should be handed at once; never exceeds
    /// `max_points`
    pub max_viewport_points: usize,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            probe: ProbeSettings::default(),
            sample_frequency_hz: 100,
            max_points: 10_000,
            max_viewport_points: 2_000,
        }
    }
}

impl AcquisitionSettings {
    pub fn clamp(&mut self) {
        self.sample_frequency_hz = self
            .sample_frequency_hz
            .clamp(MIN_SAMPLE_FREQUENCY_HZ, MAX_SAMPLE_FREQUENCY_HZ);
        self.max_points = self.max_points.clamp(MIN_MAX_POINTS, MAX_MAX_POINTS);
        self.max_viewport_points = self.max_viewport_points.min(self.max_points).max(1);
    }

    pub fn sample_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.sample_frequency_hz.max(1)))
    }
}

/// How a stimulus channel's raw words are turned into plot points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceChannelKind {
    /// Reinterpret the raw word as this type
    Analog(VariableType),
    /// Logic level: 0xAA marks high, anything else low
    Digital,
}

impl Default for TraceChannelKind {
    fn default() -> Self {
        TraceChannelKind::Analog(VariableType::U32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TraceChannelConfig {
    pub enabled: bool,
    pub kind: TraceChannelKind,
}

/// Trigger: arm capture until a channel crosses a level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub enabled: bool,
    /// Stimulus channel the trigger watches
    pub channel: usize,
    pub level: f64,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: 0,
            level: 0.0,
        }
    }
}

impl TriggerSettings {
    /// Whether `value` on `channel` fires the trigger
    pub fn fires(&self, channel: usize, value: f64) -> bool {
        self.enabled && channel == self.channel && value > self.level
    }
}

/// SWO trace session parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    pub config: TraceConfig,
    pub channels: Vec<TraceChannelConfig>,
    pub trigger: TriggerSettings,
    /// History length per channel series
    pub max_points: usize,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            config: TraceConfig::default(),
            channels: vec![TraceChannelConfig::default(); TRACE_CHANNELS],
            trigger: TriggerSettings::default(),
            max_points: 10_000,
        }
    }
}

impl TraceSettings {
    pub fn clamp(&mut self) {
        self.channels.resize(TRACE_CHANNELS, TraceChannelConfig::default());
        self.max_points = self.max_points.clamp(MIN_MAX_POINTS, MAX_MAX_POINTS);
        if self.trigger.channel >= TRACE_CHANNELS {
            self.trigger.channel = 0;
            self.trigger.enabled = false;
        }
    }

    /// Bitmask of enabled stimulus channels
    pub fn channel_mask(&self) -> u32 {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.enabled)
            .fold(0, |mask, (i, _)| mask | 1 << i)
    }
}

/// Everything one saved project holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    /// ELF the symbol table is read from
    pub binary_path: Option<PathBuf>,
    pub acquisition: AcquisitionSettings,
    pub trace: TraceSettings,
    pub variables: Vec<Variable>,
}

impl ProjectConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load from a TOML file, clamping out-of-range values
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(ProbeScopeError::from)
            .with_context(|| format!("failed to read project file {path:?}"))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| ProbeScopeError::Serialization(e.to_string()))
            .with_context(|| format!("failed to parse project file {path:?}"))?;
        config.acquisition.clamp();
        config.trace.clamp();
        Ok(config)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Save as TOML, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(ProbeScopeError::from)
                .context("failed to create project directory")?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProbeScopeError::Serialization(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(ProbeScopeError::from)
            .with_context(|| format!("failed to write project file {path:?}"))
    }
}
