//! Geometric nonlinearity by repeated linear analysis.
//!
//! `flamb` couples a SOFiSTiK CADINP model (.dat), its binary result
//! database (.cdb) and the batch solver in a fixed-point loop: every pass
//! moves the model nodes to their reference position plus the displacement
//! of the previous run and solves again, until the largest ux stops
//! changing by more than `epsilon`.
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//! use flamb::{IterationEngine, Loads, RunConfig, SpsInvoker};
//! # use flamb::{FlambError, RawRecord, ResultStore, Selector};
//! # struct MyStore;
//! # impl ResultStore for MyStore {
//! #     fn open(&mut self, _: &Path) -> Result<i32, FlambError> { Ok(1) }
//! #     fn next_record(&mut self, _: Selector) -> Option<RawRecord> { None }
//! #     fn close(&mut self) -> i32 { 0 }
//! # }
//!
//! let config = RunConfig::new(PathBuf::from("frame.dat"), Loads { v: 100.0, h: 20.0 }, 1e-3)
//!     .with_sofistik_path(PathBuf::from("C:/SOFiSTiK/2024"));
//! let invoker = SpsInvoker::new(config.solver_path()?);
//! let mut engine = IterationEngine::new(config, MyStore, invoker)?;
//! let report = engine.run_until_converged()?;
//! println!("converged after {} iterations", report.iterations);
//! # Ok::<(), FlambError>(())
//! ```

pub mod blocks;
pub mod cdb;
pub mod config;
pub mod datatypes;
pub mod engine;
pub mod error;
pub mod model;
pub mod observer;
pub mod results;
pub mod solver;

pub use cdb::CdbStore;
pub use config::{RunConfig, Settings};
pub use datatypes::{
    DisplacementMap, DisplacementSample, Loads, NodeCoordinate, NodeId, PositionMap, RawRecord,
    Selector,
};
pub use engine::{EngineStatus, IterationEngine, IterationRecord, IterationState, RunReport, StepOutcome};
pub use error::FlambError;
pub use model::{ModelDocument, PatchOutcome};
pub use observer::{IterationEvent, IterationObserver, ProgressObserver, SlogObserver};
pub use results::{ResultStore, StoreReport, StoreSession};
pub use solver::{SolverInvoker, SolverRun, SpsInvoker};
