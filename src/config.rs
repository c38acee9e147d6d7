use std::path::{Path, PathBuf};

use json::JsonValue;

use crate::{cdb::CDB_LIBRARY_NAME, datatypes::Loads, error::FlambError};

/// SOFiSTiK batch runner inside the installation directory
pub const DEFAULT_SOLVER_EXECUTABLE: &str = "sps.exe";

/// Persisted tool settings
pub const DEFAULT_SETTINGS_FILE: &str = "flamb.json";

/// Everything one iteration run needs
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// The .dat model, patched in place
    pub model_path: PathBuf,
    /// The .cdb result database written by the solver
    pub store_path: PathBuf,
    /// SOFiSTiK installation directory
    pub sofistik_path: Option<PathBuf>,
    pub solver_executable: String,
    /// CDB library; defaults to the one inside the installation directory
    pub cdb_library: Option<PathBuf>,
    pub loads: Loads,
    /// Convergence threshold on the change of the largest ux
    pub epsilon: f64,
    /// Optional safety cap; `None` iterates until convergence
    pub max_iterations: Option<u64>,
}

impl RunConfig {
    /// The result database defaults to the model path with a `.cdb`
    /// extension, which is where the solver writes it
    pub fn new(model_path: PathBuf, loads: Loads, epsilon: f64) -> RunConfig {
        let store_path = model_path.with_extension("cdb");
        RunConfig {
            model_path,
            store_path,
            sofistik_path: None,
            solver_executable: DEFAULT_SOLVER_EXECUTABLE.to_owned(),
            cdb_library: None,
            loads,
            epsilon,
            max_iterations: None,
        }
    }

    pub fn with_store_path(mut self, store_path: PathBuf) -> RunConfig {
        self.store_path = store_path;
        self
    }

    pub fn with_sofistik_path(mut self, sofistik_path: PathBuf) -> RunConfig {
        self.sofistik_path = Some(sofistik_path);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> RunConfig {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Fills in what the caller left open from persisted settings
    ///
    /// An installation directory or library already set on the config wins
    /// over the stored one; a stored solver executable replaces the default.
    pub fn with_settings(mut self, settings: &Settings) -> RunConfig {
        if self.sofistik_path.is_none() {
            self.sofistik_path = settings.sofistik_path.clone();
        }
        if self.cdb_library.is_none() {
            self.cdb_library = settings.cdb_library.clone();
        }
        if let Some(executable) = &settings.solver_executable {
            self.solver_executable = executable.clone();
        }
        self
    }

    /// Checks the inputs that must hold before the model is touched
    pub fn validate(&self) -> Result<(), FlambError> {
        if !self.model_path.is_file() {
            return Err(FlambError::Input(format!(
                "Invalid .dat file path {}",
                self.model_path.display()
            )));
        }
        if !self.loads.v.is_finite() || !self.loads.h.is_finite() {
            return Err(FlambError::Input(
                "H and V must be finite numbers".to_owned(),
            ));
        }
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(FlambError::Input(format!(
                "epsilon must be a positive number, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }

    /// Full path of the solver executable, checked for existence
    pub fn solver_path(&self) -> Result<PathBuf, FlambError> {
        let installation = match &self.sofistik_path {
            Some(p) => p,
            None => {
                return Err(FlambError::Input(
                    "SOFiSTiK path is not set, run `flamb configure --sofistik <dir>`".to_owned(),
                ))
            }
        };

        let executable = installation.join(&self.solver_executable);
        if !executable.is_file() {
            return Err(FlambError::Input(format!(
                "{} not found at {}",
                self.solver_executable,
                executable.display()
            )));
        }
        Ok(executable)
    }

    /// Path of the CDB library to load at runtime
    pub fn cdb_library_path(&self) -> Result<PathBuf, FlambError> {
        if let Some(library) = &self.cdb_library {
            return Ok(library.clone());
        }
        match &self.sofistik_path {
            Some(installation) => {
                Ok(installation.join(libloading::library_filename(CDB_LIBRARY_NAME)))
            }
            None => Err(FlambError::Input(
                "SOFiSTiK path is not set, run `flamb configure --sofistik <dir>`".to_owned(),
            )),
        }
    }
}

/// Settings kept between runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub sofistik_path: Option<PathBuf>,
    pub solver_executable: Option<String>,
    pub cdb_library: Option<PathBuf>,
}

impl Settings {
    /// Loads settings from a json file; a missing file yields defaults
    ///
    /// # Arguments
    /// * `path` - The path to the settings file
    pub fn load(path: &Path) -> Result<Settings, FlambError> {
        if !path.exists() {
            return Ok(Settings::default());
        }

        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) => {
                return Err(FlambError::Input(format!(
                    "Unable to open settings file {}: {err}",
                    path.display()
                )))
            }
        };

        Settings::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Settings, FlambError> {
        let settings_json = match json::parse(contents) {
            Ok(j) => j,
            Err(err) => {
                return Err(FlambError::Input(format!(
                    "Error in settings json: {err}"
                )))
            }
        };

        if !settings_json.is_object() {
            return Err(FlambError::Input(
                "Settings json must be an object".to_owned(),
            ));
        }

        Ok(Settings {
            sofistik_path: settings_json["sofistik_path"].as_str().map(PathBuf::from),
            solver_executable: settings_json["solver_executable"]
                .as_str()
                .map(|s| s.to_owned()),
            cdb_library: settings_json["cdb_library"].as_str().map(PathBuf::from),
        })
    }

    pub fn to_json(&self) -> JsonValue {
        let mut settings_json = JsonValue::new_object();
        if let Some(path) = &self.sofistik_path {
            settings_json["sofistik_path"] = path.to_string_lossy().into_owned().into();
        }
        if let Some(executable) = &self.solver_executable {
            settings_json["solver_executable"] = executable.clone().into();
        }
        if let Some(library) = &self.cdb_library {
            settings_json["cdb_library"] = library.to_string_lossy().into_owned().into();
        }
        settings_json
    }

    pub fn save(&self, path: &Path) -> Result<(), FlambError> {
        if let Err(err) = std::fs::write(path, self.to_json().pretty(4)) {
            return Err(FlambError::Input(format!(
                "Unable to write settings file {}: {err}",
                path.display()
            )));
        }
        Ok(())
    }
}
