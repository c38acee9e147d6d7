use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flamb::{
    EngineStatus, FlambError, IterationEngine, IterationEvent, Loads, RawRecord, ResultStore,
    RunConfig, Selector, SolverInvoker, SolverRun, StepOutcome,
};
use nalgebra::Vector3;
use tempfile::TempDir;

const FRAME: &str = "\
+PROG SOFIMSHA urs:1
HEAD Frame geometry
SYST 3D GDIR NEGZ
NODE 1 X 0.0 Y 0.0 Z 0.0 FIX PP
NODE 2 X 1.0 Y 0.0 Z 0.0
END
";

/// Stands in for the solver and its result database: every solver run
/// advances to the next scripted displacement round
#[derive(Default)]
struct Bench {
    positions: Vec<RawRecord>,
    rounds: Vec<(Vec<RawRecord>, Vec<RawRecord>)>,
    fail_on_run: Option<usize>,
    /// Ignore `rounds` and report ux = 0.5 * runs, which never converges
    ramp: bool,
    runs: usize,
    opens: usize,
    closes: usize,
    cursors: HashMap<Selector, VecDeque<RawRecord>>,
    /// Model file contents seen by each solver run
    models: Vec<String>,
}

struct BenchStore(Arc<Mutex<Bench>>);
struct BenchSolver(Arc<Mutex<Bench>>);

impl ResultStore for BenchStore {
    fn open(&mut self, _path: &Path) -> Result<i32, FlambError> {
        let mut bench = self.0.lock().unwrap();
        bench.opens += 1;

        let mut cursors: HashMap<Selector, VecDeque<RawRecord>> = HashMap::new();
        cursors.insert(
            Selector::NODE_POSITIONS,
            bench.positions.iter().copied().collect(),
        );
        if bench.ramp && bench.runs > 0 {
            let (primary, secondary) = ux_round(0.5 * bench.runs as f64);
            cursors.insert(Selector::DISPLACEMENT_PRIMARY, primary.into());
            cursors.insert(Selector::DISPLACEMENT_SECONDARY, secondary.into());
        } else if bench.runs > 0 && !bench.rounds.is_empty() {
            let round = (bench.runs - 1).min(bench.rounds.len() - 1);
            let (primary, secondary) = bench.rounds[round].clone();
            cursors.insert(Selector::DISPLACEMENT_PRIMARY, primary.into());
            cursors.insert(Selector::DISPLACEMENT_SECONDARY, secondary.into());
        }
        bench.cursors = cursors;

        Ok(1)
    }

    fn next_record(&mut self, selector: Selector) -> Option<RawRecord> {
        self.0.lock().unwrap().cursors.get_mut(&selector)?.pop_front()
    }

    fn close(&mut self) -> i32 {
        self.0.lock().unwrap().closes += 1;
        0
    }
}

impl SolverInvoker for BenchSolver {
    fn run(&mut self, model_path: &Path) -> Result<SolverRun, FlambError> {
        let mut bench = self.0.lock().unwrap();
        assert_eq!(bench.opens, bench.closes, "result store open during solver run");

        bench.runs += 1;
        bench
            .models
            .push(std::fs::read_to_string(model_path).unwrap());

        if bench.fail_on_run == Some(bench.runs) {
            return Ok(SolverRun {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "+++++ ERROR in ASE: singular stiffness".to_owned(),
            });
        }

        Ok(SolverRun {
            exit_code: Some(0),
            stdout: "calculation done".to_owned(),
            stderr: String::new(),
        })
    }

    fn name(&self) -> String {
        "bench".to_owned()
    }
}

fn node(id: i32, x: f64, y: f64, z: f64) -> RawRecord {
    RawRecord::new(id, x, y, z)
}

/// One displacement round where only ux of node 1 is non-zero
fn ux_round(ux: f64) -> (Vec<RawRecord>, Vec<RawRecord>) {
    (vec![node(1, ux, 0.0, 0.0)], vec![node(1, 0.0, 0.0, 0.0)])
}

fn frame_bench() -> Bench {
    Bench {
        positions: vec![node(1, 0.0, 0.0, 0.0), node(2, 1.0, 0.0, 0.0)],
        ..Default::default()
    }
}

fn setup(
    bench: Bench,
    epsilon: f64,
) -> (
    TempDir,
    PathBuf,
    Arc<Mutex<Bench>>,
    IterationEngine<BenchStore, BenchSolver>,
) {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("frame.dat");
    std::fs::write(&model, FRAME).unwrap();

    let bench = Arc::new(Mutex::new(bench));
    let config = RunConfig::new(model.clone(), Loads { v: 100.0, h: 20.0 }, epsilon);
    let engine = IterationEngine::new(
        config,
        BenchStore(Arc::clone(&bench)),
        BenchSolver(Arc::clone(&bench)),
    )
    .unwrap();

    (dir, model, bench, engine)
}

fn count_lines(text: &str, prefix: &str) -> usize {
    text.lines().filter(|l| l.starts_with(prefix)).count()
}

fn assert_close(actual: Vector3<f64>, expected: Vector3<f64>) {
    assert!(
        (actual - expected).norm() < 1e-12,
        "expected {expected:?}, got {actual:?}"
    );
}

#[test]
fn initialize_inserts_load_and_analysis_blocks_once() {
    let (_dir, model, bench, mut engine) = setup(frame_bench(), 0.001);

    engine.initialize().unwrap();
    assert_eq!(*engine.status(), EngineStatus::Initialized);
    assert_eq!(bench.lock().unwrap().runs, 1);

    let document = engine.document().unwrap();
    assert_eq!(
        document.extract_first_number_after("NODE NO 1002 TYPE PG P1"),
        Some(100.0)
    );
    assert_eq!(
        document.extract_first_number_after("NODE NO 1002 TYPE PX P1"),
        Some(20.0)
    );

    let text = std::fs::read_to_string(&model).unwrap();
    assert_eq!(count_lines(&text, "PROG SOFILOAD urs:3"), 1);
    assert_eq!(count_lines(&text, "+PROG ASE"), 1);
    assert!(text.contains("NODE NO 1002 TYPE PG P1 100.0"));
    assert!(text.contains("NODE NO 1002 TYPE PX P1 20.0"));

    // re-initializing the same model
    engine.initialize().unwrap();
    let again = IterationEngine::new(
        engine.config().clone(),
        BenchStore(Arc::clone(&bench)),
        BenchSolver(Arc::clone(&bench)),
    );
    again.unwrap().initialize().unwrap();

    let text = std::fs::read_to_string(&model).unwrap();
    assert_eq!(count_lines(&text, "PROG SOFILOAD urs:3"), 1);
    assert_eq!(count_lines(&text, "PROG SOFILOAD urs:4"), 1);
    assert_eq!(count_lines(&text, "+PROG ASE"), 1);
    assert_eq!(count_lines(&text, "+PROG WING"), 1);
    assert!(text.starts_with("+PROG SOFIMSHA urs:1\n"));
}

#[test]
fn step_moves_nodes_to_reference_plus_displacement() {
    let mut bench = frame_bench();
    bench.rounds = vec![(
        vec![node(1, 0.01, 0.0, 0.0), node(2, 0.015, 0.0, 0.0)],
        vec![node(1, 0.0, 0.0, 0.0), node(2, 0.005, 0.0, 0.0)],
    )];
    let (_dir, _model, bench, mut engine) = setup(bench, 1e-9);

    engine.initialize().unwrap();
    let outcome = engine.step().unwrap();
    assert!(matches!(outcome, StepOutcome::Continue { .. }));

    let document = engine.document().unwrap();
    assert_close(
        document.node_coordinate(1).unwrap(),
        Vector3::new(0.01, 0.0, 0.0),
    );
    assert_close(
        document.node_coordinate(2).unwrap(),
        Vector3::new(1.02, 0.0, 0.0),
    );

    // the patched geometry was on disk before the second solver run
    let bench = bench.lock().unwrap();
    assert_eq!(bench.runs, 2);
    assert!(bench.models[1].contains("NODE 1 X 0.01 Y 0.0 Z 0.0"));
    assert!(!bench.models[0].contains("NODE 1 X 0.01"));
}

#[test]
fn solver_failure_stops_the_loop() {
    let mut bench = frame_bench();
    bench.rounds = vec![ux_round(0.5), ux_round(0.25)];
    bench.fail_on_run = Some(2);
    let (_dir, _model, bench, mut engine) = setup(bench, 0.001);

    engine.initialize().unwrap();
    let err = engine.step().unwrap_err();

    assert!(matches!(err, FlambError::Solver(_)));
    assert!(err.to_string().contains("singular stiffness"));
    assert!(matches!(engine.status(), EngineStatus::Failed(_)));

    // last successful read kept for diagnostics
    let state = engine.state().unwrap();
    assert_close(state.displacements[&1], Vector3::new(0.5, 0.0, 0.0));

    // no further solver runs once failed
    assert!(engine.step().is_err());
    assert!(engine.run_until_converged().is_err());
    assert_eq!(bench.lock().unwrap().runs, 2);
}

#[test]
fn converges_when_delta_drops_below_epsilon() {
    let series = [0.5, 0.1, 0.02, 0.0015, 0.0008];
    let mut bench = frame_bench();
    bench.rounds = series.iter().map(|ux| ux_round(*ux)).collect();
    let (_dir, _model, bench, mut engine) = setup(bench, 0.001);

    let report = engine.run_until_converged().unwrap();

    assert_eq!(report.status, EngineStatus::Converged);
    assert_eq!(report.iterations, 5);
    assert_eq!(bench.lock().unwrap().runs, 6);

    let deltas: Vec<f64> = report.history.iter().map(|r| r.delta).collect();
    assert_eq!(deltas.len(), 5);
    assert!(deltas.windows(2).all(|w| w[1] < w[0]), "{deltas:?}");
    assert!(deltas[..4].iter().all(|d| *d >= 0.001));
    assert!((deltas[4] - 0.0007).abs() < 1e-12);

    let state = engine.state().unwrap();
    assert!(state.converged);
    assert!((state.previous_max_ux - 0.0008).abs() < 1e-15);
}

#[test]
fn sentinel_nodes_are_ignored_and_duplicates_summed() {
    let bench = Bench {
        positions: vec![
            node(0, 9.0, 9.0, 9.0),
            node(1, 0.0, 0.0, 0.0),
            node(2, 1.0, 0.0, 0.0),
            node(2, 5.0, 5.0, 5.0),
        ],
        rounds: vec![(
            vec![
                node(2, 0.25, 0.0, 0.0),
                node(0, 7.0, 7.0, 7.0),
                node(2, 0.125, 0.5, 0.0),
            ],
            vec![
                node(0, 0.0, 0.0, 0.0),
                node(0, 1.0, 1.0, 1.0),
                node(0, 0.0, 0.0, 0.25),
            ],
        )],
        ..Default::default()
    };
    let (_dir, _model, _bench, mut engine) = setup(bench, 1e-9);

    engine.initialize().unwrap();
    let state = engine.state().unwrap();
    assert_eq!(state.positions.len(), 2);
    assert_eq!(state.positions[&2], Vector3::new(1.0, 0.0, 0.0));
    assert_eq!(state.displacements[&1], Vector3::zeros());

    engine.step().unwrap();
    let state = engine.state().unwrap();
    assert!(!state.displacements.contains_key(&0));
    assert_eq!(state.displacements[&2], Vector3::new(0.375, 0.5, 0.25));
    assert!(!state.displacements.contains_key(&1));

    // node 1 had no displacement and stays at its reference position
    let document = engine.document().unwrap();
    assert_close(document.node_coordinate(1).unwrap(), Vector3::zeros());
    assert_close(
        document.node_coordinate(2).unwrap(),
        Vector3::new(1.375, 0.5, 0.25),
    );
}

#[test]
fn empty_reference_geometry_is_fatal() {
    let (_dir, _model, bench, mut engine) = setup(Bench::default(), 0.001);

    let err = engine.initialize().unwrap_err();

    assert!(matches!(err, FlambError::Store(_)));
    assert!(matches!(engine.status(), EngineStatus::Failed(_)));
    let bench = bench.lock().unwrap();
    assert_eq!(bench.runs, 0);
    assert_eq!(bench.opens, bench.closes);
}

#[test]
fn iteration_cap_fails_the_run() {
    let mut bench = frame_bench();
    bench.rounds = vec![ux_round(0.5), ux_round(1.0), ux_round(1.5)];
    let (_dir, model, bench, _) = setup(bench, 0.001);

    let config = RunConfig::new(model, Loads { v: 1.0, h: 1.0 }, 0.001).with_max_iterations(2);
    let mut engine = IterationEngine::new(
        config,
        BenchStore(Arc::clone(&bench)),
        BenchSolver(Arc::clone(&bench)),
    )
    .unwrap();

    let err = engine.run_until_converged().unwrap_err();

    assert!(err.to_string().contains("iteration cap"));
    assert_eq!(engine.history().len(), 2);
    assert_eq!(bench.lock().unwrap().runs, 3);
}

#[test]
fn cancellation_is_checked_between_steps() {
    let mut bench = frame_bench();
    bench.rounds = vec![ux_round(0.5), ux_round(1.0)];
    let (_dir, _model, bench, mut engine) = setup(bench, 0.001);

    let token = Arc::new(AtomicBool::new(false));
    engine.set_cancellation(Arc::clone(&token));

    engine.initialize().unwrap();
    engine.step().unwrap();
    token.store(true, Ordering::SeqCst);

    let err = engine.step().unwrap_err();
    assert!(matches!(err, FlambError::Cancelled(_)));
    assert_eq!(bench.lock().unwrap().runs, 2);
}

#[test]
fn worker_thread_run_stops_on_cancellation() {
    let bench = Bench {
        ramp: true,
        ..frame_bench()
    };
    let (_dir, _model, bench, mut engine) = setup(bench, 0.001);

    let token = Arc::new(AtomicBool::new(false));
    engine.set_cancellation(Arc::clone(&token));

    let worker = std::thread::spawn(move || {
        let result = engine.run_until_converged();
        (result, engine)
    });

    let deadline = Instant::now() + Duration::from_secs(30);
    while bench.lock().unwrap().runs < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    token.store(true, Ordering::SeqCst);

    let (result, engine) = worker.join().unwrap();
    assert!(matches!(result, Err(FlambError::Cancelled(_))));
    assert!(matches!(engine.status(), EngineStatus::Failed(_)));
    assert!(engine.history().len() >= 2);
    assert!(engine
        .history()
        .iter()
        .all(|r| (r.delta - 0.5).abs() < 1e-12));
}

#[test]
fn observers_hear_patches_misses_and_metrics() {
    let mut bench = frame_bench();
    bench.positions.push(node(3, 2.0, 0.0, 0.0));
    bench.rounds = vec![ux_round(0.5), ux_round(0.5)];
    let (_dir, _model, _bench, mut engine) = setup(bench, 0.001);

    let events: Arc<Mutex<Vec<IterationEvent>>> = Arc::default();
    let sink = Arc::clone(&events);
    engine.add_observer(move |e: &IterationEvent| sink.lock().unwrap().push(e.clone()));

    engine.run_until_converged().unwrap();

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        IterationEvent::ModelPatched { target, .. } if target == "analysis block"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        IterationEvent::PatchMissed { target } if target == "node 3"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        IterationEvent::NodesPatched { patched: 2, missed: 1, .. }
    )));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, IterationEvent::Metric { .. }))
            .count(),
        2
    );
    assert!(matches!(
        events.last(),
        Some(IterationEvent::Converged { iteration: 2, .. })
    ));
}

#[test]
fn missing_model_is_rejected_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let bench = Arc::new(Mutex::new(Bench::default()));
    let config = RunConfig::new(
        dir.path().join("absent.dat"),
        Loads { v: 100.0, h: 20.0 },
        0.001,
    );

    let result = IterationEngine::new(
        config,
        BenchStore(Arc::clone(&bench)),
        BenchSolver(Arc::clone(&bench)),
    );

    assert!(matches!(result, Err(FlambError::Input(_))));
    assert_eq!(bench.lock().unwrap().opens, 0);
}
