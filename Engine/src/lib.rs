//! edgeprobe - branch-edge coverage and execution signatures for binary-only targets
//!
//! A dynamic-instrumentation host reports loaded sections and executed branches;
//! the engine keeps an AFL-style edge histogram and, at process exit, writes a
//! `<edges>\t<signature>` line identifying the path the run took.
//! Provides a C ABI so the host plugin can link it as a static library.

pub mod address_filter;
pub mod branch;
pub mod config;
pub mod coverage;
pub mod diagnostics;
pub mod engine;
pub mod ffi;
pub mod observer;
pub mod report;
pub mod signature;
pub mod tracker;

pub use address_filter::{AddressSpaceFilter, CodeRegion, Section};
pub use branch::{BranchEvent, BranchKind, BranchTarget};
pub use config::{EngineConfig, SharedMapSource};
pub use coverage::{CoverageMap, EdgeId, MAP_SIZE};
pub use engine::{Engine, EngineBuilder, EngineState};
pub use report::Report;
pub use signature::{Signature, SignatureComputer};
pub use tracker::{EdgeTracker, RunRecord};
