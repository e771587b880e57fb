// SPDX-License-Identifier: Apache-2.0

//! Error plumbing shared by every gatecheck crate.

use std::error::Error;

/// A trait implemented by every error type of the workspace that can fold a
/// list of errors into a single compound error.
pub trait GatecheckError<E> {
    /// Creates a compound error from a list of errors.
    ///
    /// Note: implementations flatten nested compound errors.
    #[must_use]
    fn compound(errors: Vec<E>) -> E;
}

/// Handles a list of errors and returns a compound error if the list is not
/// empty or `Ok(())` if the list is empty.
pub fn handle_errors<E: GatecheckError<E>>(errors: Vec<E>) -> Result<(), E> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(E::compound(errors))
    }
}

/// Formats a list of errors into a single string, one error per line.
pub fn format_errors<E: Error>(errors: &[E]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<String>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(thiserror::Error, Debug)]
    enum TestError {
        #[error("boom: {0}")]
        Boom(String),
        #[error("{}", format_errors(.0))]
        Compound(Vec<TestError>),
    }

    impl GatecheckError<TestError> for TestError {
        fn compound(errors: Vec<TestError>) -> TestError {
            TestError::Compound(
                errors
                    .into_iter()
                    .flat_map(|e| match e {
                        TestError::Compound(errs) => errs,
                        e => vec![e],
                    })
                    .collect(),
            )
        }
    }

    #[test]
    fn test_handle_errors_empty() {
        let result: Result<(), TestError> = handle_errors(vec![]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_handle_errors_flattens() {
        let nested = TestError::compound(vec![
            TestError::Boom("a".to_owned()),
            TestError::Compound(vec![TestError::Boom("b".to_owned())]),
        ]);
        if let TestError::Compound(errors) = nested {
            assert_eq!(errors.len(), 2);
        } else {
            panic!("Expected a compound error");
        }
    }

    #[test]
    fn test_format_errors() {
        let errors = vec![
            TestError::Boom("a".to_owned()),
            TestError::Boom("b".to_owned()),
        ];
        assert_eq!(format_errors(&errors), "boom: a\n\nboom: b");
    }
}
