// SPDX-License-Identifier: Apache-2.0

//! Policy-level transpilation: composes one compiled document per policy and
//! writes it to the installation layout.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use gatecheck_common::Logger;
use gatecheck_policybook::ast::Condition;
use gatecheck_policybook::condition::VariableMap;
use gatecheck_policybook::policybook::{Action, PolicySet, Policybook};

use crate::expr::{ExpressionTranspiler, RegoFunc};
use crate::templates::{substitute, UtilRule, ACTION_FUNC};
use crate::Error;

/// The fixed import list of every compiled document.
const IMPORT_STATEMENTS: [&str; 3] = [
    "import future.keywords.if",
    "import future.keywords.in",
    "import data.gatecheck.resolve_var",
];

/// One compiled policy document.
#[derive(Debug, Clone, Default)]
pub struct RegoPolicy {
    /// The package name (a valid target-language identifier).
    pub package: String,
    /// The import lines.
    pub import_statements: Vec<String>,
    /// The `__target__` metadata value.
    pub target: String,
    /// The `__tags__` metadata value.
    pub tags: Vec<String>,
    /// Variable declarations from the enclosing policy set.
    pub vars_declaration: VariableMap,
    /// The name of the root condition helper.
    pub root_condition: String,
    /// The condition helper rules, in emission order.
    pub condition_funcs: Vec<RegoFunc>,
    /// The utility rules required by the condition helpers.
    pub util_funcs: Vec<UtilRule>,
    /// The terminal action rule.
    pub action_func: String,
}

impl RegoPolicy {
    /// Renders the compiled document.
    #[must_use]
    pub fn to_rego(&self) -> String {
        let mut content = Vec::new();
        content.push(format!("package {}", self.package));
        content.push(String::new());
        content.extend(self.import_statements.iter().cloned());
        content.push(String::new());
        content.push(format!("__target__ = \"{}\"", self.target));
        if !self.tags.is_empty() {
            let tags_str = serde_json::to_string(&self.tags).expect("tags are serializable");
            content.push(format!("__tags__ = {tags_str}"));
        }
        for (name, value) in &self.vars_declaration {
            let value_str = serde_json::to_string(value).expect("vars are serializable");
            content.push(format!("{name} = {value_str}"));
        }

        let mut document = content.join("\n");
        document.push('\n');
        for util in &self.util_funcs {
            document.push_str(util.body());
        }
        for func in &self.condition_funcs {
            document.push_str(&func.body);
        }
        document.push_str(&self.action_func);
        document
    }
}

/// Transforms policybooks into compiled policy documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyTranspiler {
    expr: ExpressionTranspiler,
}

impl PolicyTranspiler {
    /// Creates a new policy transpiler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            expr: ExpressionTranspiler::new(),
        }
    }

    /// Compiles a policybook file or a directory of policybook files into
    /// `outdir`.
    ///
    /// A malformed policybook is logged and skipped; the remaining files
    /// continue compiling. Returns the written files.
    pub fn run(
        &self,
        input: &Path,
        outdir: &Path,
        logger: &impl Logger,
    ) -> Result<Vec<PathBuf>, Error> {
        if input.is_file() {
            return self.compile_file(input, &outdir.join("policies"));
        }
        if !input.is_dir() {
            return Err(Error::InvalidPolicyPath {
                path: input.display().to_string(),
            });
        }

        let mut written = Vec::new();
        for policybook_path in discover_policybooks(input) {
            let policy_outdir = outdir.join(phase_subdir(&policybook_path));
            match self.compile_file(&policybook_path, &policy_outdir) {
                Ok(mut files) => written.append(&mut files),
                Err(error) => {
                    logger.warn(&format!(
                        "Failed to transpile `{}`: {error}",
                        policybook_path.display()
                    ));
                }
            }
        }
        Ok(written)
    }

    /// Compiles one policybook file, writing one `<package>.rego` per policy
    /// into `outdir`.
    pub fn compile_file(&self, path: &Path, outdir: &Path) -> Result<Vec<PathBuf>, Error> {
        let policybook = Policybook::from_file(path)?;
        let mut policies = Vec::new();
        for policy_set in &policybook.policy_sets {
            policies.extend(self.policyset_to_rego(policy_set)?);
        }

        fs::create_dir_all(outdir).map_err(|e| Error::WriteError {
            path: outdir.display().to_string(),
            error: e.to_string(),
        })?;
        let mut written = Vec::new();
        for policy in policies {
            let out_path = outdir.join(format!("{}.rego", policy.package));
            fs::write(&out_path, policy.to_rego()).map_err(|e| Error::WriteError {
                path: out_path.display().to_string(),
                error: e.to_string(),
            })?;
            written.push(out_path);
        }
        Ok(written)
    }

    /// Compiles every policy of a policy set into its document model.
    pub fn policyset_to_rego(&self, policy_set: &PolicySet) -> Result<Vec<RegoPolicy>, Error> {
        let mut policies = Vec::new();
        for policy in &policy_set.policies {
            let package = clean_package_name(&policy.name);
            let (root_condition, condition_funcs) =
                self.condition_to_rules(&policy.condition, &package)?;

            let mut util_funcs: Vec<UtilRule> = condition_funcs
                .iter()
                .flat_map(|func| func.utils.iter().copied())
                .collect();
            util_funcs.sort_unstable();
            util_funcs.dedup();

            let action = policy.actions.first().ok_or_else(|| Error::TranspileError {
                error: format!("policy `{}` has no action", policy.name),
            })?;
            let action_func = action_to_rule(action, &root_condition);

            policies.push(RegoPolicy {
                package,
                import_statements: IMPORT_STATEMENTS.iter().map(|s| (*s).to_owned()).collect(),
                target: policy.target.clone(),
                tags: policy.tags.clone(),
                vars_declaration: policy_set.vars.clone(),
                root_condition,
                condition_funcs,
                util_funcs,
                action_func,
            });
        }
        Ok(policies)
    }

    fn condition_to_rules(
        &self,
        condition: &Condition,
        policy_name: &str,
    ) -> Result<(String, Vec<RegoFunc>), Error> {
        self.expr.trace_condition(condition, policy_name)
    }
}

/// Builds the terminal action rule: the root condition helper plus the
/// `print(..)` rendering of the action message.
fn action_to_rule(action: &Action, root_condition: &str) -> String {
    let msg = action.msg().unwrap_or_default();
    let steps = format!("{root_condition}\n    {}", make_rego_print(msg));
    substitute(
        ACTION_FUNC,
        &[("func_name", action.kind.as_str()), ("steps", &steps)],
    )
}

/// Rewrites a `msg` template into a `print(..)` expression: each
/// `{{ expr }}` placeholder becomes a `%v` fed by the expression.
pub(crate) fn make_rego_print(msg: &str) -> String {
    let placeholder = Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").expect("a valid regex literal");
    let exprs: Vec<String> = placeholder
        .captures_iter(msg)
        .map(|captures| captures[1].trim().to_owned())
        .collect();
    if exprs.is_empty() {
        return format!("print(\"{msg}\")");
    }
    let text = placeholder.replace_all(msg, "%v").replace('"', "'");
    format!("print(sprintf(\"{text}\", [{}]))", exprs.join(", "))
}

/// Derives a valid package name from a policy name: spaces, hyphens, `?`,
/// `(` and `)` become `_`.
#[must_use]
pub fn clean_package_name(name: &str) -> String {
    name.replace([' ', '-', '?', '(', ')'], "_")
}

/// The installation subdirectory for a policybook file: `policies` unless
/// the path names a run phase.
fn phase_subdir(path: &Path) -> &'static str {
    let path_str = path.to_string_lossy();
    if path_str.contains("/post_run") {
        "extensions/policy/post_run"
    } else if path_str.contains("/pre_run") {
        "extensions/policy/pre_run"
    } else {
        "policies"
    }
}

/// Finds policybook files under a source directory.
///
/// Looks under `policies/` and `extensions/policy/` trees first; when the
/// directory itself is a policy directory, sweeps it entirely. The result is
/// sorted so compilation order is stable.
fn discover_policybooks(dir: &Path) -> Vec<PathBuf> {
    let primary = ["**/policies/**/*.y*ml", "**/extensions/policy/**/*.y*ml"];
    let mut found = glob_files(dir, &primary);
    if found.is_empty() {
        let is_policy_dir = dir.components().any(|component| {
            matches!(
                component.as_os_str().to_str(),
                Some("policies" | "policy")
            )
        });
        if is_policy_dir {
            found = glob_files(dir, &["**/*.y*ml"]);
        }
    }
    found.sort();
    found
}

fn glob_files(dir: &Path, patterns: &[&str]) -> Vec<PathBuf> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = globset::Glob::new(pattern) {
            _ = builder.add(glob);
        }
    }
    let Ok(globs) = builder.build() else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for entry in walkdir::WalkDir::new(dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        if globs.is_match(relative) {
            found.push(entry.path().to_path_buf());
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatecheck_common::in_memory;

    const POLICYBOOK: &str = r#"
- name: Package policy
  hosts: localhost
  vars:
    allowed_packages:
      - mysql
  policies:
    - name: Check for banned packages
      target: task
      condition: input["ansible.builtin.package"].name not in allowed_packages
      actions:
        - deny:
            msg: The package {{ input["ansible.builtin.package"].name }} is not allowed
      tags:
        - compliance
"#;

    fn compile(yaml: &str) -> Vec<RegoPolicy> {
        let policybook = Policybook::from_string(yaml, "<test>").expect("load");
        let transpiler = PolicyTranspiler::new();
        policybook
            .policy_sets
            .iter()
            .flat_map(|ps| transpiler.policyset_to_rego(ps).expect("transpile"))
            .collect()
    }

    #[test]
    fn test_compiled_document_layout() {
        let policies = compile(POLICYBOOK);
        assert_eq!(policies.len(), 1);
        let document = policies[0].to_rego();

        assert!(document.starts_with("package Check_for_banned_packages\n"));
        let package_pos = document.find("package ").expect("package");
        let import_pos = document.find("import future.keywords.if").expect("imports");
        let target_pos = document.find("__target__ = \"task\"").expect("target");
        let tags_pos = document.find("__tags__ = [\"compliance\"]").expect("tags");
        let vars_pos = document.find("allowed_packages = [\"mysql\"]").expect("vars");
        let util_pos = document.find("to_list(val) = output if").expect("utils");
        let cond_pos = document
            .find("Check_for_banned_packages_0_1 = true if")
            .expect("root condition");
        let action_pos = document.find("deny = true if").expect("action");
        assert!(package_pos < import_pos);
        assert!(import_pos < target_pos);
        assert!(target_pos < tags_pos);
        assert!(tags_pos < vars_pos);
        assert!(vars_pos < util_pos);
        assert!(util_pos < cond_pos);
        assert!(cond_pos < action_pos);

        // The action rule references the root helper and prints the message.
        assert!(document.contains(
            "deny = true if {\n    Check_for_banned_packages_0_1\n    print(sprintf("
        ));
        assert!(document.ends_with("} else = false\n"));
    }

    #[test]
    fn test_helper_names_are_unique_and_referenced() {
        let yaml = r#"
- name: Multi
  hosts: all
  policies:
    - name: multi check
      target: task
      condition:
        any:
          - input.become == true and input.become_user not in ["root", "admin"]
          - input.name is defined
      action:
        warn:
          msg: suspicious
"#;
        let policies = compile(yaml);
        let policy = &policies[0];
        let mut names: Vec<&str> = policy
            .condition_funcs
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total, "helper names must be unique");

        // Every helper is referenced by another helper or by the action rule.
        let document = policy.to_rego();
        for name in names {
            let references = document.matches(name).count();
            assert!(references >= 2, "helper `{name}` is never referenced");
        }
    }

    #[test]
    fn test_package_name_cleaning() {
        assert_eq!(
            clean_package_name("Is variable present (x)?"),
            "Is_variable_present__x__"
        );
        assert_eq!(clean_package_name("check-become"), "check_become");
    }

    #[test]
    fn test_make_rego_print() {
        assert_eq!(
            make_rego_print("nothing to interpolate"),
            "print(\"nothing to interpolate\")"
        );
        assert_eq!(
            make_rego_print("The package {{ input.name }} is not allowed"),
            "print(sprintf(\"The package %v is not allowed\", [input.name]))"
        );
        assert_eq!(
            make_rego_print("{{ input.a }} and {{ input.b }}"),
            "print(sprintf(\"%v and %v\", [input.a, input.b]))"
        );
        // Double quotes inside interpolated messages become single quotes.
        assert_eq!(
            make_rego_print("bad \"value\" {{ input.a }}"),
            "print(sprintf(\"bad 'value' %v\", [input.a]))"
        );
    }

    #[test]
    fn test_become_user_scenario() {
        let yaml = r#"
- name: Become policy
  hosts: all
  policies:
    - name: check become user
      target: task
      condition: input.become == true and input.become_user not in ["root", "admin"]
      action:
        warn:
          msg: become_user {{ input.become_user }} is suspicious
"#;
        let document = compile(yaml)[0].to_rego();
        assert!(document.contains("check_become_user_2_1 = true if {\n    input.become\n}"));
        assert!(document.contains(
            "check_become_user_2_2 = true if {\n    lhs_list = to_list(input.become_user)\n    check_item_not_in_list(lhs_list, [\"root\", \"admin\"])\n}"
        ));
        assert!(document.contains(
            "check_become_user_1_1 = true if {\n    check_become_user_2_1\n    check_become_user_2_2\n}"
        ));
        assert!(document.contains(
            "warn = true if {\n    check_become_user_0_1\n    print(sprintf(\"become_user %v is suspicious\", [input.become_user]))\n} else = false"
        ));
    }

    #[test]
    fn test_has_key_and_select_scenarios() {
        let yaml = r#"
- name: Misc policy
  hosts: all
  policies:
    - name: friends check
      target: task
      condition: input.friends has key "fred"
      action:
        allow:
          msg: fred is known
    - name: ids check
      target: task
      condition: input.ids is select(">=", 10)
      action:
        deny:
          msg: large id found
    - name: url check
      target: task
      condition: input.url is match("https://example.com/.*", ignorecase=true)
      action:
        deny:
          msg: bad url
"#;
        let policies = compile(yaml);
        assert_eq!(policies.len(), 3);

        let friends = policies[0].to_rego();
        assert!(friends.contains(
            "input_keys := [key | input.friends[key]; key == \"fred\"]\n    count(input_keys) > 0"
        ));
        assert!(friends.contains("allow = true if {"));

        let ids = policies[1].to_rego();
        assert!(ids.contains(
            "array := [item | item := input.ids[_]; item >= 10]\n    count(array) > 0"
        ));
        assert!(ids.contains("deny = true if {"));

        let url = policies[2].to_rego();
        assert!(url.contains(
            "startswith(lower(input.url), lower(\"https://example.com/.*\"))"
        ));
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let first: Vec<String> = compile(POLICYBOOK).iter().map(RegoPolicy::to_rego).collect();
        let second: Vec<String> = compile(POLICYBOOK).iter().map(RegoPolicy::to_rego).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_run_skips_malformed_policybooks() {
        let workdir = tempfile::tempdir().expect("tempdir");
        let src = workdir.path().join("src/policies");
        fs::create_dir_all(&src).expect("create dirs");
        fs::write(src.join("good.yml"), POLICYBOOK).expect("write");
        fs::write(src.join("bad.yml"), "{ not a policybook ]").expect("write");

        let outdir = workdir.path().join("out");
        let logger = in_memory::Logger::new(0);
        let transpiler = PolicyTranspiler::new();
        let written = transpiler.run(&workdir.path().join("src"), &outdir, &logger);
        let written = written.expect("run");
        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("policies/Check_for_banned_packages.rego"));
        assert_eq!(logger.warn_count(), 1);
    }

    #[test]
    fn test_run_phase_subdirectories() {
        let workdir = tempfile::tempdir().expect("tempdir");
        let src = workdir.path().join("src/extensions/policy/post_run");
        fs::create_dir_all(&src).expect("create dirs");
        fs::write(src.join("book.yml"), POLICYBOOK).expect("write");

        let outdir = workdir.path().join("out");
        let logger = in_memory::Logger::new(0);
        let written = PolicyTranspiler::new()
            .run(&workdir.path().join("src"), &outdir, &logger)
            .expect("run");
        assert_eq!(written.len(), 1);
        assert!(written[0]
            .to_string_lossy()
            .contains("extensions/policy/post_run/"));
    }
}
