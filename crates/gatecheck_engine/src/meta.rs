// SPDX-License-Identifier: Apache-2.0

//! Compiled-policy file introspection.
//!
//! Compiled documents carry their dispatch metadata as plain top-level
//! assignments (`__target__`, `__tags__`, `__target_module__`), so the
//! evaluator can select and route policies without evaluating them.

use std::fs;
use std::path::Path;

use crate::Error;

/// Metadata extracted from a compiled policy file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyMetadata {
    /// The package name from the `package` line.
    pub package: String,
    /// The `__target__` pattern, if declared.
    pub target: Option<String>,
    /// The `__target_module__` pattern, if declared.
    pub target_module: Option<String>,
    /// The `__tags__` list, if declared.
    pub tags: Option<Vec<String>>,
}

impl PolicyMetadata {
    /// Reads the metadata assignments from a compiled policy file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<PolicyMetadata, Error> {
        let path_str = path.as_ref().display().to_string();
        let content = fs::read_to_string(path).map_err(|e| Error::PolicyRead {
            path: path_str,
            error: e.to_string(),
        })?;
        Ok(Self::from_string(&content))
    }

    /// Reads the metadata assignments from compiled policy text.
    #[must_use]
    pub fn from_string(content: &str) -> PolicyMetadata {
        let mut meta = PolicyMetadata::default();
        for line in content.lines() {
            let line = line.trim();
            if let Some(package) = line.strip_prefix("package ") {
                if meta.package.is_empty() {
                    meta.package = package.trim().to_owned();
                }
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            match key {
                "__target__" => {
                    meta.target = Some(unquote(value).to_owned());
                }
                "__target_module__" => {
                    meta.target_module = Some(unquote(value).to_owned());
                }
                "__tags__" => {
                    meta.tags = serde_json::from_str(value).ok();
                }
                _ => {}
            }
        }
        meta
    }
}

fn unquote(value: &str) -> &str {
    value
        .trim_matches('"')
        .trim_matches('\'')
}
