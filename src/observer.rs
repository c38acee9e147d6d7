use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use slog::{error, info, o, warn, Drain, Logger};

use crate::results::StoreReport;

/// Notable occurrences during a run, one per message of the progress log
#[derive(Debug, Clone, PartialEq)]
pub enum IterationEvent {
    ModelLoaded {
        path: PathBuf,
        lines: usize,
    },
    /// A model mutation was applied at `line`
    ModelPatched {
        target: String,
        line: usize,
    },
    /// A marker or node was not found; the mutation was skipped
    PatchMissed {
        target: String,
    },
    /// Node geometry rewritten for one iteration
    NodesPatched {
        iteration: u64,
        patched: usize,
        missed: usize,
    },
    ModelSaved {
        path: PathBuf,
    },
    StoreRead {
        what: &'static str,
        report: StoreReport,
    },
    SolverStarted {
        iteration: u64,
        solver: String,
    },
    SolverFinished {
        iteration: u64,
        exit_code: Option<i32>,
        elapsed: Duration,
    },
    Metric {
        iteration: u64,
        max_ux: f64,
        previous_max_ux: f64,
        delta: f64,
    },
    Converged {
        iteration: u64,
        delta: f64,
    },
    Failed {
        reason: String,
    },
}

impl Display for IterationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationEvent::ModelLoaded { path, lines } => {
                write!(f, "loaded {} ({} lines)", path.display(), lines)
            }
            IterationEvent::ModelPatched { target, line } => {
                write!(f, "patched {target} at line {line}")
            }
            IterationEvent::PatchMissed { target } => {
                write!(f, "no modification made, {target} not found")
            }
            IterationEvent::NodesPatched {
                iteration,
                patched,
                missed,
            } => write!(
                f,
                "iteration {iteration}: updated {patched} node coordinates ({missed} not in model)"
            ),
            IterationEvent::ModelSaved { path } => write!(f, "wrote {}", path.display()),
            IterationEvent::StoreRead { what, report } => write!(
                f,
                "read {} {} (open status {}, close status {})",
                report.records, what, report.open_status, report.close_status
            ),
            IterationEvent::SolverStarted { iteration, solver } => {
                write!(f, "iteration {iteration}: running {solver}")
            }
            IterationEvent::SolverFinished {
                iteration,
                exit_code,
                elapsed,
            } => write!(
                f,
                "iteration {iteration}: solver exited with {} after {:.3} seconds",
                exit_code.map_or("signal".to_owned(), |c| c.to_string()),
                elapsed.as_secs_f32()
            ),
            IterationEvent::Metric {
                iteration,
                max_ux,
                delta,
                ..
            } => write!(f, "iteration {iteration}: max ux {max_ux}, delta {delta}"),
            IterationEvent::Converged { iteration, delta } => {
                write!(f, "convergence achieved after {iteration} iterations (delta {delta})")
            }
            IterationEvent::Failed { reason } => write!(f, "run failed: {reason}"),
        }
    }
}

/// Receives every event of a run
///
/// Observers travel with the engine, so they must be `Send` for the run to
/// move onto a worker thread.
pub trait IterationObserver: Send {
    fn observe(&mut self, event: &IterationEvent);
}

impl<F> IterationObserver for F
where
    F: FnMut(&IterationEvent) + Send,
{
    fn observe(&mut self, event: &IterationEvent) {
        self(event)
    }
}

/// Fan-out over the attached observers
#[derive(Default)]
pub struct Observers {
    observers: Vec<Box<dyn IterationObserver>>,
}

impl Observers {
    pub fn push(&mut self, observer: Box<dyn IterationObserver>) {
        self.observers.push(observer);
    }

    pub fn emit(&mut self, event: IterationEvent) {
        for observer in self.observers.iter_mut() {
            observer.observe(&event);
        }
    }
}

/// Writes events to a slog logger
pub struct SlogObserver {
    logger: Logger,
}

impl SlogObserver {
    pub fn new(logger: Logger) -> SlogObserver {
        SlogObserver { logger }
    }
}

/// Root logger writing to the terminal through an async drain
pub fn term_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

impl IterationObserver for SlogObserver {
    fn observe(&mut self, event: &IterationEvent) {
        let log = &self.logger;
        match event {
            IterationEvent::PatchMissed { .. } => warn!(log, "{}", event),
            IterationEvent::StoreRead { what, report } => {
                if !report.ready {
                    warn!(log, "result store not ready"; "what" => *what, "status" => report.open_status);
                }
                if report.unpaired != (0, 0) {
                    warn!(log, "displacement selectors out of step, unpaired records dropped";
                        "primary" => report.unpaired.0, "secondary" => report.unpaired.1);
                }
                if report.close_status != 0 {
                    warn!(log, "result store not closed cleanly"; "what" => *what, "status" => report.close_status);
                }
                info!(log, "{}", event; "records" => report.records, "close_status" => report.close_status);
            }
            IterationEvent::Metric {
                iteration,
                max_ux,
                previous_max_ux,
                delta,
            } => info!(log, "convergence metric";
                "iteration" => *iteration,
                "max_ux" => *max_ux,
                "previous_max_ux" => *previous_max_ux,
                "delta" => *delta),
            IterationEvent::SolverFinished {
                exit_code: Some(0), ..
            } => info!(log, "{}", event),
            IterationEvent::SolverFinished { .. } | IterationEvent::Failed { .. } => {
                error!(log, "{}", event)
            }
            _ => info!(log, "{}", event),
        }
    }
}

/// Spinner showing the current iteration and delta
pub struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    pub fn new() -> ProgressObserver {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        ProgressObserver { bar }
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        ProgressObserver::new()
    }
}

impl IterationObserver for ProgressObserver {
    fn observe(&mut self, event: &IterationEvent) {
        match event {
            IterationEvent::SolverStarted { .. } | IterationEvent::Metric { .. } => {
                self.bar.set_message(event.to_string())
            }
            IterationEvent::Converged { .. } => self.bar.finish_with_message(event.to_string()),
            IterationEvent::Failed { .. } => self.bar.abandon_with_message(event.to_string()),
            _ => {}
        }
    }
}
