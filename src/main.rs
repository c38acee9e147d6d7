use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use slog::{error, info, Logger};

use flamb::{
    config::DEFAULT_SETTINGS_FILE, observer::term_logger, CdbStore, EngineStatus, FlambError,
    IterationEngine, Loads, ProgressObserver, RunConfig, RunReport, Settings, SlogObserver,
    SpsInvoker,
};

#[derive(Parser)]
#[command(
    name = "flamb",
    version,
    about = "Large-displacement iteration on SOFiSTiK models by repeated linear analysis"
)]
struct Cli {
    /// Settings file holding the SOFiSTiK installation path
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Iterate a model until the largest ux converges
    Run(RunArgs),
    /// Store the SOFiSTiK installation directory in the settings file
    Configure {
        #[arg(long)]
        sofistik: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// The .dat model to iterate (modified in place)
    #[arg(long)]
    model: PathBuf,
    /// Result database; defaults to the model path with a .cdb extension
    #[arg(long)]
    store: Option<PathBuf>,
    /// SOFiSTiK installation directory, overrides the settings file
    #[arg(long)]
    sofistik: Option<PathBuf>,
    /// Vertical load magnitude V
    #[arg(long, allow_negative_numbers = true)]
    vertical: f64,
    /// Horizontal load magnitude H
    #[arg(long, allow_negative_numbers = true)]
    horizontal: f64,
    /// Convergence threshold on the change of the largest ux
    #[arg(long)]
    epsilon: f64,
    /// Give up after this many iterations
    #[arg(long)]
    max_iterations: Option<u64>,
    /// Show a spinner with the current iteration
    #[arg(long)]
    progress: bool,
}

fn configure(settings_file: &Path, sofistik: PathBuf, log: &Logger) -> Result<(), FlambError> {
    if !sofistik.is_dir() {
        return Err(FlambError::Input(format!(
            "{} is not a directory",
            sofistik.display()
        )));
    }

    let mut settings = Settings::load(settings_file)?;
    settings.sofistik_path = Some(sofistik);
    settings.save(settings_file)?;

    info!(log, "SOFiSTiK path updated"; "settings" => %settings_file.display());
    Ok(())
}

fn build_config(settings_file: &Path, args: &RunArgs) -> Result<RunConfig, FlambError> {
    let settings = Settings::load(settings_file)?;

    let loads = Loads {
        v: args.vertical,
        h: args.horizontal,
    };
    let mut config = RunConfig::new(args.model.clone(), loads, args.epsilon);

    if let Some(store) = &args.store {
        config = config.with_store_path(store.clone());
    }
    if let Some(sofistik) = &args.sofistik {
        config = config.with_sofistik_path(sofistik.clone());
    }
    if let Some(max_iterations) = args.max_iterations {
        config = config.with_max_iterations(max_iterations);
    }

    Ok(config.with_settings(&settings))
}

fn run(config: RunConfig, progress: bool, log: &Logger) -> Result<RunReport, FlambError> {
    config.validate()?;
    let invoker = SpsInvoker::new(config.solver_path()?);
    let store = CdbStore::load(&config.cdb_library_path()?)?;

    let mut engine = IterationEngine::new(config, store, invoker)?;
    engine.add_observer(SlogObserver::new(log.clone()));
    if progress {
        engine.add_observer(ProgressObserver::new());
    }

    engine.run_until_converged()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log = term_logger();

    let result = match cli.command {
        Command::Configure { sofistik } => configure(&cli.config, sofistik, &log),
        Command::Run(args) => build_config(&cli.config, &args)
            .and_then(|config| run(config, args.progress, &log))
            .map(|report| {
                if report.status == EngineStatus::Converged {
                    info!(log, "Process completed successfully";
                        "iterations" => report.iterations);
                }
                for record in &report.history {
                    info!(log, "history";
                        "iteration" => record.iteration,
                        "max_ux" => record.max_ux,
                        "delta" => record.delta);
                }
            }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(log, "{}", err);
            ExitCode::FAILURE
        }
    }
}
