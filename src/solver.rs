use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::FlambError;

/// Keeps the solver from opening a console window on Windows
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Outcome of one batch solver run
#[derive(Debug, Clone, PartialEq)]
pub struct SolverRun {
    /// Process exit code; `None` if the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SolverRun {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Captured diagnostic output, stderr preferred
    pub fn diagnostics(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

/// Runs the external solver on a model file and blocks until it exits
pub trait SolverInvoker {
    /// Solves `model_path`
    ///
    /// A non-zero exit is reported through [`SolverRun::exit_code`]; `Err`
    /// means the process could not be run at all.
    fn run(&mut self, model_path: &Path) -> Result<SolverRun, FlambError>;

    /// Name used in log messages
    fn name(&self) -> String;
}

/// Invokes the SOFiSTiK batch runner (`sps.exe <model>`)
#[derive(Debug, Clone)]
pub struct SpsInvoker {
    executable: PathBuf,
}

impl SpsInvoker {
    pub fn new(executable: PathBuf) -> SpsInvoker {
        SpsInvoker { executable }
    }
}

impl SolverInvoker for SpsInvoker {
    fn run(&mut self, model_path: &Path) -> Result<SolverRun, FlambError> {
        let mut command = Command::new(&self.executable);
        command
            .arg(model_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let output = match command.output() {
            Ok(out) => out,
            Err(err) => {
                return Err(FlambError::Solver(format!(
                    "Failed to start {}: {err}",
                    self.executable.display()
                )))
            }
        };

        Ok(SolverRun {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn name(&self) -> String {
        self.executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable.display().to_string())
    }
}
