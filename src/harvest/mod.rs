//! Incremental harvesting: decide per listing whether to extract, and run
//! several indices side by side.

pub mod controller;
pub mod probe;
pub mod runner;

pub use controller::{CatchUpController, ControllerSettings, RunCounters};
pub use probe::{HttpTitleProbe, TitleProbe};
pub use runner::{is_store_failure, Harvester};
