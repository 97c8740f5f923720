//! # ProbeScope: live variable plotting over SWD and SWO
//!
//! An acquisition core for watching variables on a running embedded
//! target. Two independent data paths feed the same plot model:
//!
//! - **Sampling**: poll variable addresses over SWD at a configured rate
//! - **Tracing**: decode the ITM/SWO stream into timestamped channel
//!   samples
//!
//! Each path is driven by a controller that owns its probe on a worker
//! thread; hosts request state changes and read back plot snapshots, so no
//! probe I/O ever happens on the caller's thread.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::{Arc, Mutex};
//! use probescope::{
//!     acquisition::{ControllerEvent, SamplerController},
//!     config::AcquisitionSettings,
//!     plot::{Plot, PlotRegistry, VariableRegistry},
//!     probe::{HardwareProbe, ProbeFamily},
//!     types::{Variable, VariableType},
//! };
//!
//! let mut vars = VariableRegistry::new();
//! vars.insert(Variable::new("motor_current", 0x2000_0040, VariableType::F32));
//!
//! let mut plots = PlotRegistry::new();
//! let mut plot = Plot::new("main");
//! plot.add_series("motor_current", 0x2000_0040);
//! plots.add_plot(plot);
//!
//! let (events_tx, events_rx) = crossbeam_channel::bounded(256);
//! let controller = SamplerController::spawn(
//!     Box::new(HardwareProbe::new(ProbeFamily::StLink)),
//!     AcquisitionSettings::default(),
//!     Arc::new(Mutex::new(vars)),
//!     Arc::new(Mutex::new(plots)),
//!     events_tx,
//!     None,
//! );
//! controller.request_run();
//! ```

pub mod acquisition;
pub mod buffer;
pub mod config;
pub mod error;
pub mod plot;
pub mod probe;
pub mod symbols;
pub mod trace;
pub mod types;

// Re-export commonly used types
pub use acquisition::{AcqState, ControllerEvent, SamplerController, TraceController};
pub use config::{AcquisitionSettings, ProjectConfig, TraceSettings, TriggerSettings};
pub use error::{ProbeScopeError, Result};
pub use plot::{Plot, PlotRegistry, VariableRegistry};
pub use probe::{DebugProbe, TraceProbe};
pub use types::{Variable, VariableType};
