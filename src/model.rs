use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use nalgebra::Vector3;
use regex::Regex;

use crate::{datatypes::NodeId, error::FlambError};

/// Token that opens every module block, optionally prefixed by `+` or `-`
pub const MODULE_START: &str = "PROG ";

const NUMBER: &str = r"[-+]?\d*\.?\d+(?:[eE][-+]?\d+)?";

lazy_static! {
    /// Number separated from the marker by at least one blank
    static ref NUMBER_AFTER_BLANK: Regex = Regex::new(&format!(r"^\s+({NUMBER})")).unwrap();
    /// `NODE <id> X <x> Y <y> Z <z> ...`
    static ref NODE_GEOMETRY: Regex = Regex::new(
        r"(?i)^\s*NODE\s+(\d+)\s+X\s+(\S+)\s+Y\s+(\S+)\s+Z\s+(\S+)"
    )
    .unwrap();
}

/// Result of a surgical model mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The mutation was applied; `line` is the 1-based number of the first
    /// line touched
    Applied { line: usize },
    /// Nothing in the document matched; the document is unchanged
    Missed,
}

/// Formats a real the way it is written back into the model: shortest
/// representation that round-trips, always with a decimal point for
/// integral values (`100.0`, `0.01`, `1.02`).
pub fn format_number(value: f64) -> String {
    format!("{:?}", value)
}

/// Strips blanks and the optional `+`/`-` execution flag from a line
fn module_line(line: &str) -> &str {
    let trimmed = line.trim_start();
    trimmed.strip_prefix(&['+', '-'][..]).unwrap_or(trimmed)
}

fn is_module_start(line: &str) -> bool {
    module_line(line).starts_with(MODULE_START)
}

/// A line-oriented analysis input document held in memory
///
/// All mutation is surgical: a patch rewrites single tokens or whole module
/// spans and leaves every other line untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDocument {
    path: Option<PathBuf>,
    lines: Vec<String>,
    trailing_newline: bool,
}

impl ModelDocument {
    /// Parses a document from text
    pub fn from_text(text: &str) -> ModelDocument {
        let mut lines: Vec<String> = text.split('\n').map(|l| l.to_owned()).collect();

        let trailing_newline = text.ends_with('\n');
        if trailing_newline {
            lines.pop();
        }

        ModelDocument {
            path: None,
            lines,
            trailing_newline,
        }
    }

    /// Reads a model file from disk
    ///
    /// # Arguments
    /// * `path` - The path to the .dat file
    pub fn load(path: &Path) -> Result<ModelDocument, FlambError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) => {
                return Err(FlambError::Input(format!(
                    "Unable to open model file {}: {err}",
                    path.display()
                )))
            }
        };

        let mut document = ModelDocument::from_text(&contents);
        document.path = Some(path.to_path_buf());
        Ok(document)
    }

    /// Writes the document back to the file it was loaded from
    pub fn save(&self) -> Result<(), FlambError> {
        match &self.path {
            Some(path) => self.save_to(path),
            None => Err(FlambError::Model(
                "Document has no backing file to save to".to_owned(),
            )),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), FlambError> {
        if let Err(err) = std::fs::write(path, self.to_text()) {
            return Err(FlambError::Model(format!(
                "Unable to write model file {}: {err}",
                path.display()
            )));
        }
        Ok(())
    }

    pub fn to_text(&self) -> String {
        let mut text = self.lines.join("\n");
        if self.trailing_newline {
            text.push('\n');
        }
        text
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// True iff any line contains `marker`
    pub fn contains(&self, marker: &str) -> bool {
        self.lines.iter().any(|line| line.contains(marker))
    }

    /// Reads the number following `marker` on the first line that contains it
    ///
    /// Returns `None` if the marker is absent, or if the first line holding
    /// it has no number after the marker.
    pub fn extract_first_number_after(&self, marker: &str) -> Option<f64> {
        let line = self.lines.iter().find(|line| line.contains(marker))?;
        let start = line.find(marker)? + marker.len();

        NUMBER_AFTER_BLANK
            .captures(&line[start..])
            .and_then(|c| c[1].parse().ok())
    }

    /// Rewrites the number following `marker` on the first line carrying
    /// both, keeping the rest of that line verbatim
    ///
    /// The number must be separated from the marker by whitespace, so
    /// `P1` never matches inside `P10`.
    pub fn set_first_number_after(&mut self, marker: &str, value: f64) -> PatchOutcome {
        for (i, line) in self.lines.iter_mut().enumerate() {
            let start = match line.find(marker) {
                Some(pos) => pos + marker.len(),
                None => continue,
            };

            let range = match NUMBER_AFTER_BLANK.captures(&line[start..]).and_then(|c| c.get(1)) {
                Some(m) => (start + m.start())..(start + m.end()),
                None => continue,
            };

            line.replace_range(range, &format_number(value));
            return PatchOutcome::Applied { line: i + 1 };
        }

        PatchOutcome::Missed
    }

    /// Coordinates on the geometry line of `node_id`, if present and numeric
    pub fn node_coordinate(&self, node_id: NodeId) -> Option<Vector3<f64>> {
        self.lines.iter().find_map(|line| {
            let caps = NODE_GEOMETRY.captures(line)?;
            if caps[1].parse::<NodeId>().ok()? != node_id {
                return None;
            }
            Some(Vector3::new(
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
                caps[4].parse().ok()?,
            ))
        })
    }

    /// Rewrites the X, Y and Z fields of every `NODE <node_id> X .. Y .. Z ..`
    /// line, preserving whatever follows the Z value
    pub fn set_node_coordinate(&mut self, node_id: NodeId, x: f64, y: f64, z: f64) -> PatchOutcome {
        let values = [format_number(x), format_number(y), format_number(z)];
        let mut first: Option<usize> = None;

        for (i, line) in self.lines.iter_mut().enumerate() {
            let ranges = match NODE_GEOMETRY.captures(line) {
                Some(caps) if caps[1].parse::<NodeId>().ok() == Some(node_id) => {
                    [caps.get(2), caps.get(3), caps.get(4)].map(|m| m.map(|m| m.range()))
                }
                _ => continue,
            };

            // replace right to left so earlier ranges stay valid
            for (range, value) in ranges.into_iter().zip(values.iter()).rev() {
                if let Some(range) = range {
                    line.replace_range(range, value);
                }
            }

            first.get_or_insert(i + 1);
        }

        match first {
            Some(line) => PatchOutcome::Applied { line },
            None => PatchOutcome::Missed,
        }
    }

    /// Appends `block` at the end of the document, starting on its own line
    ///
    /// Callers check [`ModelDocument::contains`] first when the block must
    /// only appear once.
    pub fn append_block(&mut self, block: &str) -> PatchOutcome {
        if self.lines.last().map_or(false, |l| !l.trim().is_empty()) {
            self.lines.push(String::new());
        }

        let line = self.lines.len() + 1;
        self.lines
            .extend(block.trim_start_matches('\n').lines().map(|l| l.to_owned()));
        self.trailing_newline = true;

        PatchOutcome::Applied { line }
    }

    /// Replaces the load-definition module (every span opened by a line
    /// starting with `module_marker`, up to the next module header) by
    /// `new_block`, inserted once where the first span stood
    pub fn replace_module(&mut self, module_marker: &str, new_block: &str) -> PatchOutcome {
        let mut output: Vec<String> = Vec::with_capacity(self.lines.len());
        let mut inserted_at: Option<usize> = None;
        let mut lines = self.lines.iter().peekable();

        while let Some(line) = lines.next() {
            if !module_line(line).starts_with(module_marker) {
                output.push(line.clone());
                continue;
            }

            if inserted_at.is_none() {
                inserted_at = Some(output.len() + 1);
                output.extend(new_block.lines().map(|l| l.to_owned()));
            }

            // drop the body of this span
            while lines.next_if(|l| !is_module_start(l)).is_some() {}
        }

        match inserted_at {
            Some(line) => {
                self.lines = output;
                PatchOutcome::Applied { line }
            }
            None => PatchOutcome::Missed,
        }
    }
}
