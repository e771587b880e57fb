// SPDX-License-Identifier: Apache-2.0

//! External policy engine driver.
//!
//! The engine binary (`opa`) is invoked as a child process per evaluation:
//! the compiled policy, the shared utility library and an optional external
//! data file are passed as `--data` documents, the input JSON arrives on
//! standard input, and the package under test is the query. Standard error
//! carries the policy's `print(..)` output and becomes the human-readable
//! message of the decision.

pub mod meta;

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use miette::Diagnostic;
use serde::Serialize;

use gatecheck_common::diagnostic::{DiagnosticMessage, DiagnosticMessages};
use gatecheck_common::error::{format_errors, GatecheckError};

/// An error that can occur while driving the policy engine.
#[derive(thiserror::Error, Debug, Serialize, Diagnostic, Clone)]
#[must_use]
#[non_exhaustive]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Error {
    /// The engine binary is not installed or not on PATH.
    #[error("`{executable}` command is required to evaluate policies: {error}")]
    #[diagnostic(
        url("https://www.openpolicyagent.org/docs/latest/#running-opa"),
        help("Install the engine binary or pass its location explicitly.")
    )]
    EngineNotFound {
        /// The executable that could not be run.
        executable: String,
        /// The spawn failure.
        error: String,
    },

    /// The engine exited with a non-zero status.
    #[error("Failed to evaluate policy: {stderr}")]
    EngineError {
        /// The engine's exit code, if any.
        code: Option<i32>,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The engine's output did not have the expected shape.
    #[error("Unexpected engine output: {error}")]
    InvalidOutput {
        /// What was wrong with the output.
        error: String,
    },

    /// A compiled policy file could not be read.
    #[error("Failed to read policy file '{path}': {error}")]
    PolicyRead {
        /// The file that caused the error.
        path: String,
        /// The error that occurred.
        error: String,
    },

    /// A container for multiple errors.
    #[error("{}", format_errors(.0))]
    #[diagnostic()]
    CompoundError(Vec<Error>),
}

impl GatecheckError<Error> for Error {
    fn compound(errors: Vec<Error>) -> Error {
        Self::CompoundError(
            errors
                .into_iter()
                .flat_map(|e| match e {
                    Self::CompoundError(errors) => errors,
                    e => vec![e],
                })
                .collect(),
        )
    }
}

impl From<Error> for DiagnosticMessages {
    fn from(error: Error) -> Self {
        DiagnosticMessages::new(match error {
            Error::CompoundError(errors) => errors
                .into_iter()
                .flat_map(|e| {
                    let diag_msgs: DiagnosticMessages = e.into();
                    diag_msgs.into_inner()
                })
                .collect(),
            _ => vec![DiagnosticMessage::new(error)],
        })
    }
}

/// The decision returned by one engine invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    /// The value of the evaluated package: a map from rule names (including
    /// the action rule) to their values.
    pub value: serde_json::Value,
    /// The policy's message output (the engine's standard error).
    pub message: String,
}

/// A driver for the external policy engine binary.
#[derive(Debug, Clone)]
pub struct OpaEngine {
    executable: String,
}

impl Default for OpaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OpaEngine {
    /// Creates a driver for the `opa` binary on PATH.
    #[must_use]
    pub fn new() -> Self {
        Self {
            executable: "opa".to_owned(),
        }
    }

    /// Creates a driver for a specific engine executable.
    #[must_use]
    pub fn with_executable(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Checks that the engine binary can be executed.
    pub fn validate_installation(&self) -> Result<(), Error> {
        let output = Command::new(&self.executable)
            .arg("version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| Error::EngineNotFound {
                executable: self.executable.clone(),
                error: e.to_string(),
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::EngineNotFound {
                executable: self.executable.clone(),
                error: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    /// Evaluates one compiled policy against one input document.
    ///
    /// `package` is the compiled policy's package name; the query is
    /// `data.<package>`, so the returned value maps every rule of the
    /// package (including the action rule) to its result.
    pub fn eval_policy(
        &self,
        utility_library: &Path,
        policy: &Path,
        external_data: Option<&Path>,
        package: &str,
        input_json: &str,
    ) -> Result<EngineOutput, Error> {
        let mut command = Command::new(&self.executable);
        _ = command
            .arg("eval")
            .arg("--data")
            .arg(utility_library)
            .arg("--data")
            .arg(policy);
        if let Some(external_data) = external_data {
            _ = command.arg("--data").arg(external_data);
        }
        _ = command
            .arg("--stdin-input")
            .arg(format!("data.{package}"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| Error::EngineNotFound {
            executable: self.executable.clone(),
            error: e.to_string(),
        })?;
        {
            let mut stdin = child.stdin.take().ok_or_else(|| Error::InvalidOutput {
                error: "engine stdin is not piped".to_owned(),
            })?;
            stdin
                .write_all(input_json.as_bytes())
                .map_err(|e| Error::InvalidOutput {
                    error: format!("failed to write engine input: {e}"),
                })?;
        }
        let output = child.wait_with_output().map_err(|e| Error::InvalidOutput {
            error: format!("failed to collect engine output: {e}"),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(Error::EngineError {
                code: output.status.code(),
                stdout,
                stderr,
            });
        }

        let value = extract_result_value(&stdout)?;
        Ok(EngineOutput {
            value,
            message: stderr,
        })
    }
}

/// Walks `result[0].expressions[0].value` out of the engine's JSON output.
fn extract_result_value(stdout: &str) -> Result<serde_json::Value, Error> {
    let parsed: serde_json::Value =
        serde_json::from_str(stdout).map_err(|e| Error::InvalidOutput {
            error: format!("engine output is not JSON: {e}"),
        })?;
    let results = parsed
        .get("result")
        .and_then(serde_json::Value::as_array)
        .filter(|results| !results.is_empty())
        .ok_or_else(|| Error::InvalidOutput {
            error: format!("`result` field is missing or empty; raw output: {stdout}"),
        })?;
    let expressions = results[0]
        .get("expressions")
        .and_then(serde_json::Value::as_array)
        .filter(|expressions| !expressions.is_empty())
        .ok_or_else(|| Error::InvalidOutput {
            error: format!("`expressions` field is missing or empty; raw output: {stdout}"),
        })?;
    Ok(expressions[0]
        .get("value")
        .cloned()
        .unwrap_or(serde_json::Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_result_value() {
        let stdout = r#"{
            "result": [
                {
                    "expressions": [
                        {
                            "value": {"deny": true, "check_0_1": true},
                            "text": "data.check"
                        }
                    ]
                }
            ]
        }"#;
        let value = extract_result_value(stdout).expect("extract");
        assert_eq!(value["deny"], serde_json::Value::Bool(true));
    }

    #[test]
    fn test_extract_rejects_empty_results() {
        assert!(extract_result_value(r#"{"result": []}"#).is_err());
        assert!(extract_result_value(r#"{}"#).is_err());
        assert!(extract_result_value("not json").is_err());
    }

    #[test]
    fn test_missing_engine_binary() {
        let engine = OpaEngine::with_executable("definitely-not-a-real-engine-binary");
        let result = engine.validate_installation();
        assert!(matches!(result, Err(Error::EngineNotFound { .. })));
    }
}
