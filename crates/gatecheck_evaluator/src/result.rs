// SPDX-License-Identifier: Apache-2.0

//! Evaluation result model and rendering.
//!
//! Decisions aggregate into a `FileResult → PolicyResult → TargetResult`
//! tree; the formatter renders the tree in plaintext, JSON, event-stream or
//! REST form.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::lines::CodeBlock;
use crate::Error;

/// The action kind behind a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// A `deny` rule fired.
    Deny,
    /// An `allow` rule fired.
    Allow,
    /// An `info` rule fired.
    Info,
    /// A `warn` rule fired.
    Warn,
    /// An `ignore` rule fired.
    Ignore,
}

impl ActionType {
    /// Derives the action type from a decision value (the evaluated
    /// package's rule map).
    #[must_use]
    pub fn from_decision(value: &Value) -> Option<ActionType> {
        for (key, action) in [
            ("deny", ActionType::Deny),
            ("allow", ActionType::Allow),
            ("info", ActionType::Info),
            ("warn", ActionType::Warn),
            ("ignore", ActionType::Ignore),
        ] {
            if value.get(key).is_some() {
                return Some(action);
            }
        }
        None
    }

    /// The lowercase name of the action type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Deny => "deny",
            ActionType::Allow => "allow",
            ActionType::Info => "info",
            ActionType::Warn => "warn",
            ActionType::Ignore => "ignore",
        }
    }
}

/// Derives the validation ternary from a decision value: `Some(true)` when
/// the input validated, `Some(false)` when it did not, `None` when the
/// policy did not apply to this input kind.
#[must_use]
pub fn validation_from_decision(value: &Value) -> Option<bool> {
    let truthy = |key: &str| value.get(key).and_then(Value::as_bool).unwrap_or(false);
    let violation = if value.get("deny").is_some() {
        truthy("deny")
    } else if value.get("allow").is_some() {
        !truthy("allow")
    } else if value.get("warn").is_some() {
        truthy("warn")
    } else if value.get("info").is_some() {
        truthy("info")
    } else if value.get("ignore").is_some() {
        !truthy("ignore")
    } else {
        false
    };
    Some(!violation)
}

/// The outcome of evaluating one policy against one target entity.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TargetResult {
    /// The focal entity's name.
    pub name: Option<String>,
    /// The focal entity's line block, when attributable.
    pub lines: Option<CodeBlock>,
    /// The validation ternary (`None` = not applicable).
    pub validated: Option<bool>,
    /// The action type behind the decision.
    pub action_type: Option<ActionType>,
    /// The policy's message output.
    pub message: Option<String>,
}

/// The outcomes of one policy across the targets of one file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PolicyResult {
    /// The policy (package) name.
    pub policy_name: String,
    /// The policy's declared target type.
    pub target_type: String,
    /// True when any target is not validated with a blocking action.
    pub violation: bool,
    /// The per-target outcomes.
    pub targets: Vec<TargetResult>,
}

impl PolicyResult {
    fn add_target_result(&mut self, target: TargetResult) {
        if target.validated == Some(false)
            && matches!(
                target.action_type,
                Some(ActionType::Deny) | Some(ActionType::Allow)
            )
        {
            self.violation = true;
        }
        self.targets.push(target);
    }
}

/// The outcomes of every policy for one source file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FileResult {
    /// The source file path (or another stable identifier).
    pub path: String,
    /// True when any policy result is violated.
    pub violation: bool,
    /// The per-policy outcomes.
    pub policies: Vec<PolicyResult>,
    /// Extra metadata attached by the input kind (events carry their
    /// payload here).
    pub metadata: Map<String, Value>,
}

/// Aggregate counts over a whole run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EvaluationSummary {
    /// Policy counts and names.
    pub policies: SummaryPolicies,
    /// File counts and names.
    pub files: SummaryFiles,
}

/// Policy-level summary counts.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SummaryPolicies {
    /// Total distinct policies evaluated.
    pub total: usize,
    /// Distinct policies with at least one violation.
    pub violation_detected: usize,
    /// The distinct policy names.
    pub list: Vec<String>,
}

/// File-level summary counts.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SummaryFiles {
    /// Total files evaluated.
    pub total: usize,
    /// Files with no violation.
    pub validated: usize,
    /// Files with at least one violation.
    pub not_validated: usize,
    /// The file paths.
    pub list: Vec<String>,
}

/// The aggregated outcome of one evaluation run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct EvaluationResult {
    /// Aggregate counts.
    pub summary: EvaluationSummary,
    /// Per-file outcomes, in evaluation order.
    pub files: Vec<FileResult>,
}

impl EvaluationResult {
    /// Records one `(input, policy)` decision.
    #[allow(clippy::too_many_arguments)]
    pub fn add_single_result(
        &mut self,
        decision: Option<&Value>,
        policy_name: &str,
        target_type: &str,
        object_name: Option<String>,
        filepath: &str,
        lines: Option<CodeBlock>,
        message: Option<String>,
        metadata: Map<String, Value>,
    ) {
        let (validated, action_type) = match decision {
            Some(value) => (
                validation_from_decision(value),
                ActionType::from_decision(value),
            ),
            // The policy did not apply to this input kind.
            None => (None, None),
        };

        let file_index = match self.files.iter().position(|f| f.path == filepath) {
            Some(index) => index,
            None => {
                self.files.push(FileResult {
                    path: filepath.to_owned(),
                    violation: false,
                    policies: Vec::new(),
                    metadata,
                });
                self.files.len() - 1
            }
        };
        let file_result = &mut self.files[file_index];

        let policy_index = match file_result
            .policies
            .iter()
            .position(|p| p.policy_name == policy_name)
        {
            Some(index) => index,
            None => {
                file_result.policies.push(PolicyResult {
                    policy_name: policy_name.to_owned(),
                    target_type: target_type.to_owned(),
                    violation: false,
                    targets: Vec::new(),
                });
                file_result.policies.len() - 1
            }
        };
        let policy_result = &mut file_result.policies[policy_index];

        if decision.is_some() {
            policy_result.add_target_result(TargetResult {
                name: object_name,
                lines,
                validated,
                action_type,
                message,
            });
        }
        file_result.violation = file_result.policies.iter().any(|p| p.violation);

        self.summary = EvaluationSummary::from_files(&self.files);
    }

    /// True when any file carries a violation.
    #[must_use]
    pub fn has_violation(&self) -> bool {
        self.files.iter().any(|f| f.violation)
    }
}

impl EvaluationSummary {
    /// Recomputes the summary from the per-file results.
    #[must_use]
    pub fn from_files(files: &[FileResult]) -> EvaluationSummary {
        let mut policy_names: Vec<String> = Vec::new();
        let mut violation_policy_names: Vec<String> = Vec::new();
        let mut file_names: Vec<String> = Vec::new();
        let mut violation_files = 0;
        for file in files {
            for policy in &file.policies {
                if !policy_names.contains(&policy.policy_name) {
                    policy_names.push(policy.policy_name.clone());
                }
                if policy.violation && !violation_policy_names.contains(&policy.policy_name) {
                    violation_policy_names.push(policy.policy_name.clone());
                }
            }
            if file.violation {
                violation_files += 1;
            }
            if !file_names.contains(&file.path) {
                file_names.push(file.path.clone());
            }
        }
        EvaluationSummary {
            policies: SummaryPolicies {
                total: policy_names.len(),
                violation_detected: violation_policy_names.len(),
                list: policy_names,
            },
            files: SummaryFiles {
                total: files.len(),
                validated: files.len() - violation_files,
                not_validated: violation_files,
                list: file_names,
            },
        }
    }
}

/// Output formats of the evaluation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable plaintext.
    Plain,
    /// The whole result tree as JSON.
    Json,
    /// One-line digest for event-stream adapters.
    EventStream,
    /// One-line digest for REST adapters.
    Rest,
}

impl Format {
    /// Parses a format name.
    pub fn parse(name: &str) -> Result<Format, Error> {
        match name {
            "plain" => Ok(Format::Plain),
            "json" => Ok(Format::Json),
            "event_stream" => Ok(Format::EventStream),
            "rest" => Ok(Format::Rest),
            other => Err(Error::ConfigError {
                error: format!(
                    "`{other}` is not a supported format; use plain, json, event_stream or rest"
                ),
            }),
        }
    }
}

const HEADER_WIDTH: usize = 90;
const MAX_MESSAGE_LENGTH: usize = 120;

fn truncate_message(message: &str) -> String {
    let message = message.trim();
    if message.chars().count() > MAX_MESSAGE_LENGTH {
        let truncated: String = message.chars().take(MAX_MESSAGE_LENGTH).collect();
        format!("{truncated}...")
    } else {
        message.to_owned()
    }
}

/// Renders evaluation results.
#[derive(Debug, Clone)]
pub struct ResultFormatter {
    /// The selected format.
    pub format: Format,
    /// Whether to emit ANSI colors.
    pub isatty: bool,
    /// Strip this prefix from displayed file paths.
    pub base_dir: Option<String>,
}

impl ResultFormatter {
    /// Creates a formatter.
    #[must_use]
    pub fn new(format: Format, isatty: bool, base_dir: Option<String>) -> Self {
        Self {
            format,
            isatty,
            base_dir,
        }
    }

    /// Renders the result in the selected format.
    #[must_use]
    pub fn render(&self, result: &EvaluationResult) -> String {
        match self.format {
            Format::Plain => self.render_plain(result),
            Format::Json => serde_json::to_string(result).unwrap_or_else(|_| "{}".to_owned()),
            Format::EventStream => self.render_event_stream(result),
            Format::Rest => self.render_rest(result),
        }
    }

    fn color(&self, code: &str, text: &str) -> String {
        if self.isatty {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_owned()
        }
    }

    fn shorten_filepath(&self, filepath: &str) -> String {
        if let Some(base_dir) = &self.base_dir {
            let prefix = if base_dir.ends_with('/') {
                base_dir.clone()
            } else {
                format!("{base_dir}/")
            };
            if let Some(stripped) = filepath.strip_prefix(&prefix) {
                return stripped.to_owned();
            }
        }
        filepath.to_owned()
    }

    fn render_plain(&self, result: &EvaluationResult) -> String {
        let mut out = String::new();
        let mut headers: Vec<String> = Vec::new();
        let mut violation_count = 0usize;
        let mut warning_count = 0usize;
        let mut info_count = 0usize;

        for file in &result.files {
            for policy in &file.policies {
                for target in &policy.targets {
                    if target.validated != Some(false) {
                        continue;
                    }
                    let type_up = policy.target_type.to_uppercase();
                    let name = target.name.clone().unwrap_or_default();
                    let filepath = self.shorten_filepath(&file.path);
                    let lines = target
                        .lines
                        .map(|block| block.to_string())
                        .unwrap_or_default();
                    let message = truncate_message(&target.message.clone().unwrap_or_default());

                    let (flag, flag_color) = match target.action_type {
                        Some(ActionType::Deny) | Some(ActionType::Allow) => {
                            violation_count += 1;
                            ("Not Validated", "91")
                        }
                        Some(ActionType::Warn) => {
                            warning_count += 1;
                            ("Warning", "93")
                        }
                        Some(ActionType::Info) => {
                            info_count += 1;
                            ("Info", "92")
                        }
                        _ => continue,
                    };

                    let file_info = self.color("93", &format!("{filepath} {lines}"));
                    let mut header = format!("{type_up} [{name}] {file_info} ");
                    while header.len() < HEADER_WIDTH {
                        header.push('*');
                    }
                    if !headers.contains(&header) {
                        out.push_str(&header);
                        out.push('\n');
                        headers.push(header);
                    }

                    out.push_str(&format!(
                        "... {} {}\n    {}\n\n",
                        policy.policy_name,
                        self.color(flag_color, flag),
                        self.color("90", &message),
                    ));
                }
            }
        }

        out.push_str(&"-".repeat(HEADER_WIDTH));
        out.push('\n');
        out.push_str("SUMMARY\n");
        let files = &result.summary.files;
        out.push_str(&format!(
            "... {}: {}, {}: {}, {}: {}\n\n",
            self.color("92", "Total files"),
            files.total,
            self.color("96", "Validated"),
            files.validated,
            self.color("91", "Not Validated"),
            files.not_validated,
        ));

        if violation_count > 0 {
            out.push_str(&self.color(
                "91",
                &format!("Violations are detected! in {violation_count} target(s)"),
            ));
            out.push('\n');
        }
        if warning_count > 0 {
            out.push_str(&self.color(
                "93",
                &format!("Warning messages on {warning_count} target(s)"),
            ));
            out.push('\n');
        }
        if info_count > 0 {
            out.push_str(&self.color("92", &format!("Info messages on {info_count} target(s)")));
            out.push('\n');
        }
        if violation_count == 0 && warning_count == 0 && info_count == 0 {
            out.push_str(&self.color("96", "No violations are detected"));
            out.push('\n');
        }
        out
    }

    fn render_event_stream(&self, result: &EvaluationResult) -> String {
        let Some(file) = result.files.first() else {
            return String::new();
        };
        let Some(policy) = file.policies.first() else {
            return String::new();
        };
        let Some(target) = policy.targets.first() else {
            return String::new();
        };

        let uuid = &file.path;
        let short_uuid = if uuid.len() > 8 {
            format!("{}...{}", &uuid[..4], &uuid[uuid.len() - 4..])
        } else {
            uuid.clone()
        };
        let event_name = target.name.clone().unwrap_or_default();
        let file_info = self.color(
            "93",
            &self.shorten_filepath(
                file.metadata
                    .get("task_path")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
            ),
        );
        let verdict = if file.violation {
            self.color("91", "Violation")
        } else {
            self.color("96", "Pass")
        };
        let mut message = String::new();
        if policy.violation {
            message = truncate_message(&target.message.clone().unwrap_or_default());
            if !message.is_empty() {
                message = format!("\n    {}", self.color("90", &message));
            }
        }
        format!("Event [{event_name} {short_uuid}] {file_info} {verdict} {message}")
    }

    fn render_rest(&self, result: &EvaluationResult) -> String {
        let Some(file) = result.files.first() else {
            return String::new();
        };
        let found = file
            .policies
            .iter()
            .rev()
            .find(|policy| !policy.targets.is_empty())
            .and_then(|policy| policy.targets.first().map(|target| (policy, target)));
        let Some((policy, target)) = found else {
            return String::new();
        };

        let verdict = if file.violation {
            self.color("91", "Violation")
        } else {
            self.color("96", "Pass")
        };
        let mut message = String::new();
        if policy.violation {
            message = self.color("90", &truncate_message(&target.message.clone().unwrap_or_default()));
        }
        format!("REST [{}] {verdict} {message}", policy.policy_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(
        result: &mut EvaluationResult,
        decision: Option<Value>,
        policy: &str,
        file: &str,
        message: Option<&str>,
    ) {
        result.add_single_result(
            decision.as_ref(),
            policy,
            "task",
            Some("a task".to_owned()),
            file,
            None,
            message.map(str::to_owned),
            Map::new(),
        );
    }

    #[test]
    fn test_validation_ternary() {
        assert_eq!(
            validation_from_decision(&json!({ "deny": true })),
            Some(false)
        );
        assert_eq!(
            validation_from_decision(&json!({ "deny": false })),
            Some(true)
        );
        assert_eq!(
            validation_from_decision(&json!({ "allow": true })),
            Some(true)
        );
        assert_eq!(
            validation_from_decision(&json!({ "allow": false })),
            Some(false)
        );
        assert_eq!(
            validation_from_decision(&json!({ "warn": true })),
            Some(false)
        );
        assert_eq!(
            validation_from_decision(&json!({ "ignore": false })),
            Some(false)
        );
    }

    #[test]
    fn test_action_type_derivation() {
        assert_eq!(
            ActionType::from_decision(&json!({ "deny": true, "x_0_1": true })),
            Some(ActionType::Deny)
        );
        assert_eq!(
            ActionType::from_decision(&json!({ "warn": false })),
            Some(ActionType::Warn)
        );
        assert_eq!(ActionType::from_decision(&json!({ "x_0_1": true })), None);
    }

    #[test]
    fn test_violation_propagation() {
        let mut result = EvaluationResult::default();
        record(
            &mut result,
            Some(json!({ "deny": true })),
            "check_packages",
            "site.yml",
            Some("nginx is not allowed"),
        );
        record(
            &mut result,
            Some(json!({ "deny": false })),
            "check_become",
            "site.yml",
            None,
        );

        assert!(result.has_violation());
        assert_eq!(result.files.len(), 1);
        let file = &result.files[0];
        assert!(file.violation);
        assert_eq!(file.policies.len(), 2);
        assert!(file.policies[0].violation);
        assert!(!file.policies[1].violation);
        assert_eq!(result.summary.policies.total, 2);
        assert_eq!(result.summary.policies.violation_detected, 1);
        assert_eq!(result.summary.files.not_validated, 1);
    }

    #[test]
    fn test_warn_is_not_a_violation() {
        let mut result = EvaluationResult::default();
        record(
            &mut result,
            Some(json!({ "warn": true })),
            "warn_become",
            "site.yml",
            Some("become used"),
        );
        assert!(!result.has_violation());
        assert_eq!(result.files[0].policies[0].targets[0].validated, Some(false));
    }

    #[test]
    fn test_not_applicable_records_no_target() {
        let mut result = EvaluationResult::default();
        record(&mut result, None, "check_packages", "site.yml", None);
        assert!(!result.has_violation());
        assert!(result.files[0].policies[0].targets.is_empty());
    }

    #[test]
    fn test_plain_rendering() {
        let mut result = EvaluationResult::default();
        record(
            &mut result,
            Some(json!({ "deny": true })),
            "check_packages",
            "site.yml",
            Some("The package nginx is not allowed"),
        );
        let formatter = ResultFormatter::new(Format::Plain, false, None);
        let rendered = formatter.render(&result);
        assert!(rendered.contains("TASK [a task]"));
        assert!(rendered.contains("check_packages Not Validated"));
        assert!(rendered.contains("The package nginx is not allowed"));
        assert!(rendered.contains("SUMMARY"));
        assert!(rendered.contains("Violations are detected!"));
        // No ANSI codes without a TTY.
        assert!(!rendered.contains('\x1b'));
    }

    #[test]
    fn test_json_rendering_round_trips() {
        let mut result = EvaluationResult::default();
        record(
            &mut result,
            Some(json!({ "deny": true })),
            "check_packages",
            "site.yml",
            None,
        );
        let formatter = ResultFormatter::new(Format::Json, false, None);
        let parsed: Value = serde_json::from_str(&formatter.render(&result)).expect("json");
        assert_eq!(parsed["files"][0]["path"], json!("site.yml"));
        assert_eq!(parsed["summary"]["files"]["total"], json!(1));
        assert_eq!(
            parsed["files"][0]["policies"][0]["targets"][0]["action_type"],
            json!("deny")
        );
    }

    #[test]
    fn test_no_violation_summary_line() {
        let mut result = EvaluationResult::default();
        record(
            &mut result,
            Some(json!({ "deny": false })),
            "check_packages",
            "site.yml",
            None,
        );
        let formatter = ResultFormatter::new(Format::Plain, false, None);
        assert!(formatter
            .render(&result)
            .contains("No violations are detected"));
    }
}
