use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::Vector3;

use crate::{
    blocks::{
        ANALYSIS_BLOCK, ANALYSIS_MARKER, HORIZONTAL_LOAD_MARKER, LOAD_BLOCK, LOAD_MODULE_MARKER,
        VERTICAL_LOAD_MARKER,
    },
    config::RunConfig,
    datatypes::{DisplacementMap, Loads, PositionMap},
    error::FlambError,
    model::{ModelDocument, PatchOutcome},
    observer::{IterationEvent, IterationObserver, Observers},
    results::{accumulate_displacements, position_map, read_displacements, read_positions, ResultStore},
    solver::SolverInvoker,
};

/// Lifecycle of one run
#[derive(Debug, Clone, PartialEq)]
pub enum EngineStatus {
    Uninitialized,
    Initialized,
    Iterating,
    Converged,
    /// Terminal failure with its human-readable reason
    Failed(String),
}

/// Everything the loop carries from one pass to the next
#[derive(Debug, Clone, PartialEq)]
pub struct IterationState {
    pub loads: Loads,
    pub epsilon: f64,
    /// Reference (undeformed) positions, fixed for the whole run
    pub positions: PositionMap,
    /// Displacement field of the last successful read
    pub displacements: DisplacementMap,
    /// Largest ux of the last read
    pub previous_max_ux: f64,
    pub converged: bool,
    /// Completed steps
    pub iteration: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    Continue { delta: f64 },
    Converged { delta: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationRecord {
    pub iteration: u64,
    pub max_ux: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub status: EngineStatus,
    pub iterations: u64,
    pub history: Vec<IterationRecord>,
}

/// Largest signed ux over all nodes; zero for an empty field
pub fn max_ux(displacements: &DisplacementMap) -> f64 {
    displacements
        .values()
        .map(|u| u.x)
        .fold(None, |acc: Option<f64>, ux| Some(acc.map_or(ux, |m| m.max(ux))))
        .unwrap_or(0.0)
}

/// Drives the model, the solver and the result database through the
/// fixed-point loop
///
/// Each step reads the displacements of the last solver run, moves every
/// node to `reference + displacement`, re-solves, and compares the largest
/// ux against the previous read.
pub struct IterationEngine<S: ResultStore, I: SolverInvoker> {
    config: RunConfig,
    store: S,
    invoker: I,
    observers: Observers,
    cancel: Option<Arc<AtomicBool>>,
    status: EngineStatus,
    state: Option<IterationState>,
    document: Option<ModelDocument>,
    history: Vec<IterationRecord>,
}

impl<S: ResultStore, I: SolverInvoker> IterationEngine<S, I> {
    /// Validates the inputs; the model is not touched until
    /// [`IterationEngine::initialize`]
    pub fn new(config: RunConfig, store: S, invoker: I) -> Result<Self, FlambError> {
        config.validate()?;
        Ok(IterationEngine {
            config,
            store,
            invoker,
            observers: Observers::default(),
            cancel: None,
            status: EngineStatus::Uninitialized,
            state: None,
            document: None,
            history: Vec::new(),
        })
    }

    pub fn add_observer<O: IterationObserver + 'static>(&mut self, observer: O) -> &mut Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Token checked between steps; setting it fails the run before the
    /// next step starts
    pub fn set_cancellation(&mut self, token: Arc<AtomicBool>) -> &mut Self {
        self.cancel = Some(token);
        self
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn state(&self) -> Option<&IterationState> {
        self.state.as_ref()
    }

    pub fn document(&self) -> Option<&ModelDocument> {
        self.document.as_ref()
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            status: self.status.clone(),
            iterations: self.state.as_ref().map_or(0, |s| s.iteration),
            history: self.history.clone(),
        }
    }

    /// Prepares the model, reads the reference geometry and runs the solver
    /// once
    ///
    /// May be repeated on the same model without duplicating the inserted
    /// blocks.
    pub fn initialize(&mut self) -> Result<(), FlambError> {
        match self.status {
            EngineStatus::Uninitialized | EngineStatus::Initialized => {}
            ref other => {
                return Err(FlambError::Input(format!(
                    "Cannot initialize an engine in state {other:?}"
                )))
            }
        }

        match self.try_initialize() {
            Ok(()) => {
                self.status = EngineStatus::Initialized;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn try_initialize(&mut self) -> Result<(), FlambError> {
        let mut document = ModelDocument::load(&self.config.model_path)?;
        self.observers.emit(IterationEvent::ModelLoaded {
            path: self.config.model_path.clone(),
            lines: document.lines().len(),
        });

        // Load cases
        let outcome = match document.replace_module(LOAD_MODULE_MARKER, LOAD_BLOCK) {
            PatchOutcome::Missed => document.append_block(LOAD_BLOCK),
            applied => applied,
        };
        self.report_patch("load module", outcome);

        // Linear analysis and graphical output
        if !document.contains(ANALYSIS_MARKER) {
            let outcome = document.append_block(ANALYSIS_BLOCK);
            self.report_patch("analysis block", outcome);
        }

        let loads = self.config.loads;
        let outcome = document.set_first_number_after(VERTICAL_LOAD_MARKER, loads.v);
        self.report_patch(VERTICAL_LOAD_MARKER, outcome);
        let outcome = document.set_first_number_after(HORIZONTAL_LOAD_MARKER, loads.h);
        self.report_patch(HORIZONTAL_LOAD_MARKER, outcome);

        document.save()?;
        self.observers.emit(IterationEvent::ModelSaved {
            path: self.config.model_path.clone(),
        });
        self.document = Some(document);

        // Reference geometry
        let (raw_positions, report) = read_positions(&mut self.store, &self.config.store_path)?;
        self.observers.emit(IterationEvent::StoreRead {
            what: "node positions",
            report,
        });

        let positions = position_map(&raw_positions);
        if positions.is_empty() {
            return Err(FlambError::Store(format!(
                "No node positions found in {} (open status {})",
                self.config.store_path.display(),
                report.open_status
            )));
        }

        let displacements: DisplacementMap =
            positions.keys().map(|id| (*id, Vector3::zeros())).collect();

        self.state = Some(IterationState {
            loads,
            epsilon: self.config.epsilon,
            positions,
            displacements,
            previous_max_ux: 0.0,
            converged: false,
            iteration: 0,
        });
        self.history.clear();

        self.run_solver(0)
    }

    /// One pass of the loop
    pub fn step(&mut self) -> Result<StepOutcome, FlambError> {
        match self.status {
            EngineStatus::Initialized | EngineStatus::Iterating => {}
            ref other => {
                return Err(FlambError::Input(format!(
                    "Cannot step an engine in state {other:?}"
                )))
            }
        }

        if self.cancel.as_ref().map_or(false, |c| c.load(Ordering::SeqCst)) {
            return Err(self.fail(FlambError::Cancelled(
                "run cancelled between steps".to_owned(),
            )));
        }

        let completed = self.state.as_ref().map_or(0, |s| s.iteration);
        if let Some(cap) = self.config.max_iterations {
            if completed >= cap {
                return Err(self.fail(FlambError::Solver(format!(
                    "iteration cap of {cap} reached without convergence"
                ))));
            }
        }

        self.status = EngineStatus::Iterating;
        match self.try_step() {
            Ok(outcome) => Ok(outcome),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn try_step(&mut self) -> Result<StepOutcome, FlambError> {
        let (samples, report) = read_displacements(&mut self.store, &self.config.store_path)?;
        self.observers.emit(IterationEvent::StoreRead {
            what: "displacement pairs",
            report,
        });

        let (state, document) = match (self.state.as_mut(), self.document.as_mut()) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                return Err(FlambError::Input(
                    "Engine stepped before initialization".to_owned(),
                ))
            }
        };

        let previous_max_ux = max_ux(&state.displacements);
        state.displacements = accumulate_displacements(&samples);
        let iteration = state.iteration + 1;

        let mut patched = 0;
        let mut missed = 0;
        for (node, reference) in state.positions.iter() {
            let displacement = state
                .displacements
                .get(node)
                .copied()
                .unwrap_or_else(Vector3::zeros);
            let position = reference + displacement;

            match document.set_node_coordinate(*node, position.x, position.y, position.z) {
                PatchOutcome::Applied { .. } => patched += 1,
                PatchOutcome::Missed => {
                    missed += 1;
                    self.observers.emit(IterationEvent::PatchMissed {
                        target: format!("node {node}"),
                    });
                }
            }
        }
        self.observers.emit(IterationEvent::NodesPatched {
            iteration,
            patched,
            missed,
        });

        document.save()?;
        self.observers.emit(IterationEvent::ModelSaved {
            path: self.config.model_path.clone(),
        });

        self.run_solver(iteration)?;

        let state = match self.state.as_mut() {
            Some(s) => s,
            None => {
                return Err(FlambError::Input(
                    "Iteration state lost during step".to_owned(),
                ))
            }
        };

        let current_max_ux = max_ux(&state.displacements);
        let delta = (current_max_ux - previous_max_ux).abs();
        state.previous_max_ux = current_max_ux;
        state.iteration = iteration;

        self.history.push(IterationRecord {
            iteration,
            max_ux: current_max_ux,
            delta,
        });
        self.observers.emit(IterationEvent::Metric {
            iteration,
            max_ux: current_max_ux,
            previous_max_ux,
            delta,
        });

        if delta < state.epsilon {
            state.converged = true;
            self.status = EngineStatus::Converged;
            self.observers
                .emit(IterationEvent::Converged { iteration, delta });
            return Ok(StepOutcome::Converged { delta });
        }

        Ok(StepOutcome::Continue { delta })
    }

    /// Initializes if needed, then steps until convergence or failure
    pub fn run_until_converged(&mut self) -> Result<RunReport, FlambError> {
        if self.status == EngineStatus::Uninitialized {
            self.initialize()?;
        }

        loop {
            if let StepOutcome::Converged { .. } = self.step()? {
                break;
            }
        }

        Ok(self.report())
    }

    fn run_solver(&mut self, iteration: u64) -> Result<(), FlambError> {
        let model_path: &Path = &self.config.model_path;
        self.observers.emit(IterationEvent::SolverStarted {
            iteration,
            solver: self.invoker.name(),
        });

        let start = std::time::Instant::now();
        let run = self.invoker.run(model_path)?;

        self.observers.emit(IterationEvent::SolverFinished {
            iteration,
            exit_code: run.exit_code,
            elapsed: start.elapsed(),
        });

        if !run.success() {
            return Err(FlambError::Solver(format!(
                "Calculation failed with exit code {}: {}",
                run.exit_code.map_or("none".to_owned(), |c| c.to_string()),
                run.diagnostics()
            )));
        }
        Ok(())
    }

    fn report_patch(&mut self, target: &str, outcome: PatchOutcome) {
        let event = match outcome {
            PatchOutcome::Applied { line } => IterationEvent::ModelPatched {
                target: target.to_owned(),
                line,
            },
            PatchOutcome::Missed => IterationEvent::PatchMissed {
                target: target.to_owned(),
            },
        };
        self.observers.emit(event);
    }

    fn fail(&mut self, err: FlambError) -> FlambError {
        self.status = EngineStatus::Failed(err.to_string());
        self.observers.emit(IterationEvent::Failed {
            reason: err.to_string(),
        });
        err
    }
}
