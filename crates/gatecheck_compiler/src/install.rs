// SPDX-License-Identifier: Apache-2.0

//! Policy source installation: resolves source specifications into an
//! installation root and drives the transpiler over discovered policybooks.

use std::fs;
use std::path::{Path, PathBuf};

use gatecheck_common::Logger;

use crate::policy::PolicyTranspiler;
use crate::templates::{UTILITY_LIBRARY, UTILITY_LIBRARY_FILE};
use crate::Error;

/// The kind of a policy source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A local policybook directory.
    Path,
    /// A remote collection name. Remote collections are not policy sources
    /// in the current design, so installation is skipped.
    Galaxy,
}

impl SourceKind {
    /// Parses an explicit `type=` value from the config file.
    pub fn parse(kind: &str) -> Result<Self, Error> {
        match kind {
            "path" => Ok(SourceKind::Path),
            "galaxy" => Ok(SourceKind::Galaxy),
            other => Err(Error::InvalidSourceKind {
                kind: other.to_owned(),
            }),
        }
    }

    /// Infers the kind from a location when `type=` is omitted: a path-like
    /// location that is not a tarball is `path`, everything else `galaxy`.
    #[must_use]
    pub fn infer(location: &str) -> Self {
        if location.contains('/') && !location.ends_with(".tar.gz") {
            SourceKind::Path
        } else {
            SourceKind::Galaxy
        }
    }
}

/// A policy source specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// The source name; compiled policies install under
    /// `<install_root>/<name>`.
    pub name: String,
    /// The location: a local directory for `path` sources, a collection
    /// name for `galaxy` sources.
    pub location: String,
    /// The source kind.
    pub kind: SourceKind,
}

impl Source {
    /// Installs the source: compiles its policybooks under
    /// `<install_root>/<name>` and materializes the shared utility library.
    ///
    /// Returns the installation directory, or `None` when nothing was
    /// installed (a `galaxy` source, or an already-populated destination
    /// without `force`).
    pub fn install(
        &self,
        install_root: &Path,
        force: bool,
        logger: &impl Logger,
    ) -> Result<Option<PathBuf>, Error> {
        let target_dir = install_root.join(&self.name);
        let already_populated = fs::read_dir(&target_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if already_populated && !force {
            logger.trace(&format!(
                "Policies `{}` are already installed in `{}`",
                self.name,
                target_dir.display()
            ));
            return Ok(None);
        }

        match self.kind {
            SourceKind::Galaxy => {
                // Galaxy sources are parsed but never installed.
                logger.trace(&format!(
                    "Skipping installation of galaxy source `{}`",
                    self.name
                ));
                Ok(None)
            }
            SourceKind::Path => {
                logger.trace(&format!(
                    "Installing policies `{}` to `{}`",
                    self.name,
                    target_dir.display()
                ));
                let transpiler = PolicyTranspiler::new();
                _ = transpiler.run(Path::new(&self.location), &target_dir, logger)?;
                _ = write_utility_library(install_root)?;
                Ok(Some(target_dir))
            }
        }
    }
}

/// Writes the shared utility library (`gatecheck.rego`) at the install root.
pub fn write_utility_library(install_root: &Path) -> Result<PathBuf, Error> {
    fs::create_dir_all(install_root).map_err(|e| Error::WriteError {
        path: install_root.display().to_string(),
        error: e.to_string(),
    })?;
    let path = install_root.join(UTILITY_LIBRARY_FILE);
    fs::write(&path, UTILITY_LIBRARY).map_err(|e| Error::WriteError {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatecheck_common::in_memory;

    const POLICYBOOK: &str = r#"
- name: Become policy
  hosts: all
  policies:
    - name: become check
      target: task
      condition: input.become == true
      action:
        deny:
          msg: become is not allowed
"#;

    #[test]
    fn test_source_kind_inference() {
        assert_eq!(SourceKind::infer("examples/policies"), SourceKind::Path);
        assert_eq!(SourceKind::infer("./local"), SourceKind::Path);
        assert_eq!(SourceKind::infer("community.general"), SourceKind::Galaxy);
        assert_eq!(
            SourceKind::infer("dist/policies.tar.gz"),
            SourceKind::Galaxy
        );
    }

    #[test]
    fn test_path_install_and_idempotence() {
        let workdir = tempfile::tempdir().expect("tempdir");
        let src = workdir.path().join("src/policies");
        fs::create_dir_all(&src).expect("create dirs");
        fs::write(src.join("book.yml"), POLICYBOOK).expect("write");

        let install_root = workdir.path().join("installed");
        let source = Source {
            name: "org".to_owned(),
            location: workdir.path().join("src").display().to_string(),
            kind: SourceKind::Path,
        };
        let logger = in_memory::Logger::new(1);

        let installed = source
            .install(&install_root, false, &logger)
            .expect("install");
        let target = installed.expect("installed path");
        assert!(target.join("policies/become_check.rego").is_file());
        assert!(install_root.join(UTILITY_LIBRARY_FILE).is_file());

        // The destination is populated now, so a non-forced reinstall skips.
        let second = source
            .install(&install_root, false, &logger)
            .expect("install");
        assert!(second.is_none());

        // A forced reinstall runs again.
        let third = source
            .install(&install_root, true, &logger)
            .expect("install");
        assert!(third.is_some());
    }

    #[test]
    fn test_galaxy_install_is_skipped() {
        let workdir = tempfile::tempdir().expect("tempdir");
        let source = Source {
            name: "community".to_owned(),
            location: "community.general".to_owned(),
            kind: SourceKind::Galaxy,
        };
        let logger = in_memory::Logger::new(0);
        let installed = source
            .install(workdir.path(), false, &logger)
            .expect("install");
        assert!(installed.is_none());
    }
}
