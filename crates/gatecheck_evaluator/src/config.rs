// SPDX-License-Identifier: Apache-2.0

//! Config file parsing and policy selection.
//!
//! The config file is line oriented with two sections:
//!
//! ```text
//! [policy]
//! default enabled
//! org tag=security enabled
//!
//! [source]
//! org = examples/org_policies
//! community = community.general type=galaxy
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use gatecheck_compiler::install::{Source, SourceKind};
use gatecheck_engine::meta::PolicyMetadata;

use crate::Error;

const SECTION_RE: &str = r"^\[([a-zA-Z0-9._\-]+)\]$";
const POLICY_PATTERN_RE: &str = r"^[ ]*([^ #]*)[ ]+(tag[ ]?=[ ]?[^ ]+)?[ ]*(enabled|disabled)[ ]*$";
const SOURCE_PATTERN_RE: &str = r"^[ ]*([^ #=]+?)[ ]*=[ ]*([^ ]+)([ ]+type[ ]?=[ ]?[^ ]+)?[ ]*$";

/// A policy enable/disable pattern from the `[policy]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyPattern {
    /// The source-name glob (`default` is an alias for `*`).
    pub name: String,
    /// Tag filter: when set, the pattern only applies to policies sharing
    /// at least one of these tags.
    pub tags: Option<Vec<String>>,
    /// Whether matching policies are enabled.
    pub enabled: bool,
}

impl PolicyPattern {
    /// Parses one `[policy]` line; returns `None` for lines that do not
    /// carry an enable/disable setting.
    #[must_use]
    pub fn load(line: &str) -> Option<PolicyPattern> {
        let re = Regex::new(POLICY_PATTERN_RE).expect("a valid regex literal");
        let captures = re.captures(line)?;
        let mut name = captures.get(1)?.as_str().to_owned();
        if name.is_empty() {
            return None;
        }
        if name == "default" {
            name = "*".to_owned();
        }
        let tags = captures.get(2).map(|tags_raw| {
            tags_raw
                .as_str()
                .replace(' ', "")
                .split('=')
                .next_back()
                .unwrap_or_default()
                .split(',')
                .map(str::to_owned)
                .collect()
        });
        let enabled = captures.get(3)?.as_str() == "enabled";
        Some(PolicyPattern {
            name,
            tags,
            enabled,
        })
    }

    /// Decides whether this pattern applies to a compiled policy file and,
    /// if so, whether it enables it.
    ///
    /// Returns `None` when the pattern is unrelated to the policy: the name
    /// does not match, or the pattern carries a tag filter and the policy
    /// has no tags at all. A tagged policy that shares no tag with the
    /// filter is governed by the pattern but not selected by it.
    #[must_use]
    pub fn check_enabled(&self, filepath: &Path, policy_root_dir: &Path) -> Option<bool> {
        let relative = filepath.strip_prefix(policy_root_dir).unwrap_or(filepath);
        let source_name = relative
            .components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .unwrap_or_default();
        if !match_str_expression(&self.name, &source_name) {
            return None;
        }
        if let Some(pattern_tags) = &self.tags {
            let policy_tags = PolicyMetadata::from_file(filepath).ok()?.tags?;
            let shared = pattern_tags
                .iter()
                .any(|tag| policy_tags.iter().any(|policy_tag| policy_tag == tag));
            if !shared {
                return Some(false);
            }
        }
        Some(self.enabled)
    }
}

/// Matches a glob-ish pattern against a text: an empty pattern or `*`
/// matches everything, `*` inside a pattern matches any run of characters,
/// and a literal pattern requires equality.
#[must_use]
pub fn match_str_expression(pattern: &str, text: &str) -> bool {
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    if pattern.contains('*') {
        let regex_pattern = format!("^{}", pattern.replace('*', ".*"));
        return Regex::new(&regex_pattern)
            .map(|re| re.is_match(text))
            .unwrap_or(false);
    }
    pattern == text
}

/// The `[policy]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyConfig {
    /// The patterns, in config order.
    pub patterns: Vec<PolicyPattern>,
}

impl PolicyConfig {
    fn from_lines(lines: &[String]) -> PolicyConfig {
        let patterns = lines
            .iter()
            .filter(|line| line.contains("enabled") || line.contains("disabled"))
            .filter_map(|line| PolicyPattern::load(line))
            .collect();
        PolicyConfig { patterns }
    }
}

/// The `[source]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceConfig {
    /// The sources, in config order.
    pub sources: Vec<Source>,
}

impl SourceConfig {
    fn from_lines(lines: &[String]) -> Result<SourceConfig, Error> {
        let re = Regex::new(SOURCE_PATTERN_RE).expect("a valid regex literal");
        let mut sources = Vec::new();
        for line in lines {
            let Some(captures) = re.captures(line) else {
                continue;
            };
            let name = captures[1].to_owned();
            let location = captures[2].to_owned();
            let kind = match captures.get(3) {
                Some(kind_raw) => {
                    let kind = kind_raw
                        .as_str()
                        .replace(' ', "")
                        .split('=')
                        .next_back()
                        .unwrap_or_default()
                        .to_owned();
                    SourceKind::parse(&kind).map_err(|e| Error::ConfigError {
                        error: e.to_string(),
                    })?
                }
                None => SourceKind::infer(&location),
            };
            sources.push(Source {
                name,
                location,
                kind,
            });
        }
        Ok(SourceConfig { sources })
    }
}

/// The parsed config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// The `[policy]` section.
    pub policy: PolicyConfig,
    /// The `[source]` section.
    pub source: SourceConfig,
}

impl Config {
    /// Loads and parses a config file. An unknown section name is fatal.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let content = fs::read_to_string(&path).map_err(|e| Error::ConfigError {
            error: format!(
                "failed to read config file `{}`: {e}",
                path.as_ref().display()
            ),
        })?;
        Self::from_string(&content)
    }

    /// Parses config file text. An unknown section name is fatal.
    pub fn from_string(content: &str) -> Result<Config, Error> {
        let section_re = Regex::new(SECTION_RE).expect("a valid regex literal");
        let mut sections: Vec<(String, Vec<String>)> = Vec::new();
        for raw_line in content.lines() {
            let line = raw_line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            if let Some(captures) = section_re.captures(line) {
                sections.push((captures[1].to_owned(), Vec::new()));
            } else if let Some((_, lines)) = sections.last_mut() {
                lines.push(line.to_owned());
            } else {
                return Err(Error::ConfigError {
                    error: format!("config line `{line}` appears before any section"),
                });
            }
        }

        let mut config = Config::default();
        for (section, lines) in sections {
            match section.as_str() {
                "policy" => config.policy = PolicyConfig::from_lines(&lines),
                "source" => config.source = SourceConfig::from_lines(&lines)?,
                other => {
                    return Err(Error::ConfigError {
                        error: format!("`{other}` is an unknown field name in a config file"),
                    });
                }
            }
        }
        Ok(config)
    }
}

/// Finds compiled policy files under the installation root and applies the
/// enable patterns: patterns are evaluated from shortest name to longest, so
/// longer (more specific) patterns override shorter ones; a policy is
/// enabled iff the last matching pattern says `enabled`.
#[must_use]
pub fn list_enabled_policies(root_dir: &Path, patterns: &[PolicyPattern]) -> Vec<PathBuf> {
    let mut found = find_compiled_policies(root_dir);
    found.sort();

    let mut sorted_patterns: Vec<&PolicyPattern> = patterns.iter().collect();
    sorted_patterns.sort_by_key(|pattern| pattern.name.len());

    let mut enabled_policies = Vec::new();
    for policy_path in found {
        let mut enabled = None;
        for pattern in &sorted_patterns {
            if let Some(value) = pattern.check_enabled(&policy_path, root_dir) {
                enabled = Some(value);
            }
        }
        if enabled == Some(true) {
            enabled_policies.push(policy_path);
        }
    }
    enabled_policies
}

fn find_compiled_policies(root_dir: &Path) -> Vec<PathBuf> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in ["**/policies/*.rego", "**/extensions/policy/*/*.rego"] {
        if let Ok(glob) = globset::Glob::new(pattern) {
            _ = builder.add(glob);
        }
    }
    let Ok(globs) = builder.build() else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for entry in walkdir::WalkDir::new(root_dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root_dir).unwrap_or(entry.path());
        if globs.is_match(relative) {
            found.push(entry.path().to_path_buf());
        }
    }
    found
}
