// SPDX-License-Identifier: Apache-2.0

//! Evaluation orchestration: policy selection, input building, the
//! evaluation loop, and the result model with its renderers.

pub mod config;
pub mod evaluator;
pub mod input;
pub mod jobdata;
pub mod lines;
pub mod result;

use miette::Diagnostic;
use serde::Serialize;

use gatecheck_common::diagnostic::{DiagnosticMessage, DiagnosticMessages};
use gatecheck_common::error::{format_errors, GatecheckError};

/// An error that can occur while selecting policies or evaluating inputs.
#[derive(thiserror::Error, Debug, Serialize, Diagnostic, Clone)]
#[must_use]
#[non_exhaustive]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Error {
    /// The config file is malformed; the run aborts.
    #[error("Config error: {error}")]
    ConfigError {
        /// What is wrong with the config.
        error: String,
    },

    /// A source artifact could not be read or parsed.
    #[error("Failed to scan '{path}': {error}")]
    ScanError {
        /// The artifact that caused the error.
        path: String,
        /// The error that occurred.
        error: String,
    },

    /// A policy input could not be built or serialized.
    #[error("Invalid input, error: {error}")]
    InputError {
        /// The error that occurred.
        error: String,
    },

    /// The evaluation run cannot proceed.
    #[error("Evaluation error: {error}")]
    EvalError {
        /// The error that occurred.
        error: String,
    },

    /// A policy installation failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Compiler(#[from] gatecheck_compiler::Error),

    /// An engine driver failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] gatecheck_engine::Error),

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
