// SPDX-License-Identifier: Apache-2.0

//! Policybook-to-Rego compilation: the expression transpiler, the policy
//! document composer and the policy source installer.

pub mod expr;
pub mod install;
pub mod policy;
pub mod templates;

use miette::Diagnostic;
use serde::Serialize;

use gatecheck_common::diagnostic::{DiagnosticMessage, DiagnosticMessages};
use gatecheck_common::error::{format_errors, GatecheckError};

/// An error that can occur while compiling or installing policies.
#[derive(thiserror::Error, Debug, Serialize, Diagnostic, Clone)]
#[must_use]
#[non_exhaustive]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Error {
    /// An invalid policybook.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Policybook(#[from] gatecheck_policybook::Error),

    /// An AST shape the transpiler cannot lower.
    #[error("Failed to transpile condition: {error}")]
    TranspileError {
        /// The transpilation failure.
        error: String,
    },

    /// An unsupported policy input path.
    #[error("Invalid policy path '{path}'")]
    #[diagnostic(help("The specified path is neither a file nor a directory."))]
    InvalidPolicyPath {
        /// The path that caused the error.
        path: String,
    },

    /// A source kind outside `path` / `galaxy`.
    #[error("`{kind}` is not a supported policy source type")]
    InvalidSourceKind {
        /// The rejected source kind.
        kind: String,
    },

    /// A compiled document could not be written.
    #[error("Failed to write '{path}': {error}")]
    WriteError {
        /// The path that could not be written.
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
