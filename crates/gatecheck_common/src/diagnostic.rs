// SPDX-License-Identifier: Apache-2.0

//! A generic diagnostic message

use crate::Logger;
use miette::{Diagnostic, LabeledSpan, Report, Severity};
use serde::Serialize;
use std::error::Error;

/// An extension to the [`miette::Diagnostic`] struct that adds an ansi message
/// representation of the diagnostic message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MietteDiagnosticExt {
    /// Displayed diagnostic message
    pub message: String,
    /// Displayed diagnostic message with ansi color codes
    pub ansi_message: String,
    /// Unique diagnostic code to look up more information
    /// about this Diagnostic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// [`Diagnostic`] severity. Defaults to [`Severity::Error`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Additional help text related to this Diagnostic
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    /// URL to visit for a more detailed explanation/help about this
    /// [`Diagnostic`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Labels to apply to this `Diagnostic`'s [`Diagnostic::source_code`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<LabeledSpan>>,
}

/// A generic and serializable representation of a diagnostic message
#[derive(Debug, serde::Serialize, Clone)]
pub struct DiagnosticMessage {
    /// The error
    pub(crate) error: serde_json::Value,
    /// The diagnostic message
    pub(crate) diagnostic: MietteDiagnosticExt,
}

/// A list of diagnostic messages
#[derive(Debug, serde::Serialize, Clone, Default)]
#[serde(transparent)]
pub struct DiagnosticMessages(Vec<DiagnosticMessage>);

impl From<DiagnosticMessage> for DiagnosticMessages {
    fn from(value: DiagnosticMessage) -> Self {
        Self(vec![value])
    }
}

impl DiagnosticMessage {
    /// Creates a new diagnostic message from an error
    pub fn new<M: Error + Diagnostic + Serialize + Send + Sync + 'static>(error: M) -> Self {
        let json_error = serde_json::to_value(&error).expect("Failed to serialize error");
        let message = error.to_string();
        let code = error.code().map(|error_code| error_code.to_string());
        let severity = error.severity();
        let help = error.help().map(|help| help.to_string());
        let url = error.url().map(|url| url.to_string());
        let labels = error.labels().map(|labels| labels.collect());
        let ansi_message = format!("{:?}", Report::new(error));

        let diagnostic = MietteDiagnosticExt {
            message,
            ansi_message,
            code,
            severity,
            help,
            url,
            labels,
        };
        Self {
            error: json_error,
            diagnostic,
        }
    }

    /// Returns the rendered message of the diagnostic.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.diagnostic.message
    }

    /// Returns true if the diagnostic message is a warning
    #[must_use]
    pub fn is_warning(&self) -> bool {
        self.diagnostic.severity == Some(Severity::Warning)
    }
}

impl DiagnosticMessages {
    /// Creates a new list of diagnostic messages
    #[must_use]
    pub fn new(diag_msgs: Vec<DiagnosticMessage>) -> Self {
        Self(diag_msgs)
    }

    /// Creates an empty list of diagnostic messages
    #[must_use]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Extends the current `DiagnosticMessages` with the provided
    /// `DiagnosticMessages`.
    pub fn extend(&mut self, diag_msgs: DiagnosticMessages) {
        self.0.extend(diag_msgs.0);
    }

    /// Logs all the diagnostic messages
    pub fn log(&self, logger: &impl Logger) {
        self.0
            .iter()
            .for_each(|msg| logger.error(&msg.diagnostic.message));
    }

    /// Returns the number of diagnostic messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the diagnostic messages
    #[must_use]
    pub fn into_inner(self) -> Vec<DiagnosticMessage> {
        self.0
    }

    /// Creates a new list of diagnostic messages for a list of errors
    pub fn from_errors<M: Error + Diagnostic + Serialize + Send + Sync + 'static>(
        errors: Vec<M>,
    ) -> Self {
        Self(errors.into_iter().map(DiagnosticMessage::new).collect())
    }

    /// Creates a new list of diagnostic messages from a single error
    pub fn from_error<M: Error + Diagnostic + Serialize + Send + Sync + 'static>(error: M) -> Self {
        Self(vec![DiagnosticMessage::new(error)])
    }

    /// Returns true if at least one diagnostic message has an error severity.
    #[must_use]
    pub fn has_error(&self) -> bool {
        let non_error_count = self
            .0
            .iter()
            .filter(|message| {
                message.diagnostic.severity == Some(Severity::Warning)
                    || message.diagnostic.severity == Some(Severity::Advice)
            })
            .count();
        self.0.len() - non_error_count > 0
    }

    /// Returns true if there are no diagnostic messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An extension trait for `Result` that captures the diagnostic messages
pub trait ResultExt<T, E> {
    /// Captures the diagnostic messages into the provided `DiagnosticMessages`
    /// or returns the value if there are no diagnostic messages.
    fn capture_diag_msgs_into(self, diags: &mut DiagnosticMessages) -> Option<T>;
}

impl<T, E> ResultExt<T, E> for Result<T, E>
where
    E: Into<DiagnosticMessages>,
{
    fn capture_diag_msgs_into(self, diags: &mut DiagnosticMessages) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(diag_msgs) => {
                diags.extend(diag_msgs.into());
                None
            }
        }
    }
}
