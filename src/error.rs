use std::fmt::Display;

#[derive(Debug, Clone, PartialEq)]
pub enum FlambError {
    Input(String),
    Model(String),
    Store(String),
    Solver(String),
    Cancelled(String),
}

impl FlambError {
    /// The human-readable reason without the error kind prefix
    pub fn reason(&self) -> &str {
        match self {
            FlambError::Input(v)
            | FlambError::Model(v)
            | FlambError::Store(v)
            | FlambError::Solver(v)
            | FlambError::Cancelled(v) => v,
        }
    }
}

impl Display for FlambError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (err_name, value) = match self {
            FlambError::Input(v) => ("Input", v),
            FlambError::Model(v) => ("Model", v),
            FlambError::Store(v) => ("Result store", v),
            FlambError::Solver(v) => ("Solver", v),
            FlambError::Cancelled(v) => ("Cancelled", v),
        };

        write!(f, "{} error: {}", err_name, value)
    }
}

impl std::error::Error for FlambError {}
