// SPDX-License-Identifier: Apache-2.0

//! Policybook front end: condition parsing, the typed expression AST, the
//! policybook loader and the AST JSON emitter.

pub mod ast;
pub mod condition;
pub mod json;
pub mod policybook;

use miette::Diagnostic;
use serde::Serialize;

use gatecheck_common::diagnostic::{DiagnosticMessage, DiagnosticMessages};
use gatecheck_common::error::{format_errors, GatecheckError};

/// An error that can occur while loading or parsing a policybook.
#[derive(thiserror::Error, Debug, Serialize, Diagnostic, Clone)]
#[must_use]
#[non_exhaustive]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Error {
    /// A condition string failed to parse.
    #[error("Failed to parse condition `{condition}`: {error}")]
    #[diagnostic(help(
        "Conditions are expressions over `input`, declared variables and literals."
    ))]
    ParseError {
        /// The condition string that failed to parse.
        condition: String,
        /// The parse failure.
        error: String,
    },

    /// The left-hand side of a `<<` assignment is malformed.
    #[error("Invalid assignment target `{expression}`")]
    #[diagnostic(help(
        "Assignment targets take the form `events.<var>` or `facts.<var>`."
    ))]
    InvalidAssignment {
        /// The offending assignment target.
        expression: String,
    },

    /// An operator outside the `select(..)` whitelist.
    #[error("Operator `{operator}` is not supported by select")]
    SelectOperatorError {
        /// The rejected operator.
        operator: String,
    },

    /// An operator outside the `selectattr(..)` whitelist.
    #[error("Operator `{operator}` is not supported by selectattr")]
    SelectAttrOperatorError {
        /// The rejected operator.
        operator: String,
    },

    /// A policybook does not satisfy the structural schema.
    #[error("Schema error: {error}")]
    SchemaError {
        /// What is wrong with the document.
        error: String,
    },

    /// An action kind outside the closed set.
    #[error("Unsupported action `{action}`; supported actions are allow, deny, info, warn, ignore")]
    UnsupportedAction {
        /// The rejected action kind.
        action: String,
    },

    /// A policybook file could not be read or parsed as YAML.
    #[error("Invalid policybook file '{file}', error: {error}")]
    #[diagnostic(help("Check the policybook file for YAML syntax errors."))]
    InvalidPolicybook {
        /// The file that caused the error.
        file: String,
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
