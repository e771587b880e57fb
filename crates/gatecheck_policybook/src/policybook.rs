// SPDX-License-Identifier: Apache-2.0

//! Policybook loading: structural YAML parsing and validation of the
//! `PolicySet → Policy → Condition/Action` model.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::ast::{Condition, ConditionWhen};
use crate::condition::{parse_condition, VariableMap};
use crate::Error;

/// The closed set of action kinds.
pub const VALID_ACTIONS: [&str; 5] = ["allow", "deny", "info", "warn", "ignore"];

/// The kind of an action, determining how a policy's truth value is
/// interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// The condition describes allowed content; falsity is a violation.
    Allow,
    /// The condition describes denied content; truth is a violation.
    Deny,
    /// Informational only.
    Info,
    /// A warning, not a violation.
    Warn,
    /// Evaluated but ignored.
    Ignore,
}

impl ActionKind {
    /// Parses an action kind; anything outside the closed set is an
    /// [`Error::UnsupportedAction`].
    pub fn parse(kind: &str) -> Result<Self, Error> {
        match kind {
            "allow" => Ok(ActionKind::Allow),
            "deny" => Ok(ActionKind::Deny),
            "info" => Ok(ActionKind::Info),
            "warn" => Ok(ActionKind::Warn),
            "ignore" => Ok(ActionKind::Ignore),
            _ => Err(Error::UnsupportedAction {
                action: kind.to_owned(),
            }),
        }
    }

    /// The lowercase name of the action kind, which is also the name of the
    /// compiled action rule.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Allow => "allow",
            ActionKind::Deny => "deny",
            ActionKind::Info => "info",
            ActionKind::Warn => "warn",
            ActionKind::Ignore => "ignore",
        }
    }
}

/// An action of a policy: a kind plus keyword arguments (notably `msg`).
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// The action kind.
    pub kind: ActionKind,
    /// The action keyword arguments.
    pub args: serde_json::Map<String, Value>,
}

impl Action {
    /// Returns the `msg` argument, if any.
    #[must_use]
    pub fn msg(&self) -> Option<&str> {
        self.args.get("msg").and_then(Value::as_str)
    }
}

/// A single policy of a policy set.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// The policy name, unique within its policy set.
    pub name: String,
    /// The kind of input the policy evaluates (`task`, `play`, ...).
    pub target: String,
    /// The parsed condition tree.
    pub condition: Condition,
    /// The ordered action list (never empty).
    pub actions: Vec<Action>,
    /// Whether the policy is enabled.
    pub enabled: bool,
    /// The policy tags.
    pub tags: Vec<String>,
}

/// A named, host-scoped group of policies.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySet {
    /// The policy set name, unique within its document.
    pub name: String,
    /// The hosts the policy set applies to.
    pub hosts: Vec<String>,
    /// The variables visible to condition parsing and compiled output.
    pub vars: VariableMap,
    /// The enabled policies, in document order.
    pub policies: Vec<Policy>,
    /// Whether multiple matching policies may fire for one input.
    pub match_multiple_policies: bool,
}

/// A parsed policybook document: a list of policy sets.
#[derive(Debug, Clone, PartialEq)]
pub struct Policybook {
    /// The policy sets, in document order.
    pub policy_sets: Vec<PolicySet>,
}

#[derive(Deserialize)]
struct PolicySetSpec {
    name: Option<String>,
    hosts: Option<serde_yaml::Value>,
    #[serde(default)]
    vars: Option<serde_yaml::Value>,
    #[serde(default)]
    policies: Vec<PolicySpec>,
    #[serde(default)]
    match_multiple_policies: bool,
}

#[derive(Deserialize)]
struct PolicySpec {
    name: Option<String>,
    target: Option<String>,
    condition: Option<serde_yaml::Value>,
    actions: Option<Vec<serde_yaml::Value>>,
    action: Option<serde_yaml::Value>,
    enabled: Option<bool>,
    tags: Option<Vec<String>>,
}

impl Policybook {
    /// Loads and validates a policybook file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Policybook, Error> {
        let provenance = path.as_ref().display().to_string();
        let content = fs::read_to_string(path).map_err(|e| Error::InvalidPolicybook {
            file: provenance.clone(),
            error: e.to_string(),
        })?;
        Self::from_string(&content, &provenance)
    }

    /// Parses and validates a policybook from its YAML text.
    pub fn from_string(content: &str, provenance: &str) -> Result<Policybook, Error> {
        let specs: Vec<PolicySetSpec> =
            serde_yaml::from_str(content).map_err(|e| Error::InvalidPolicybook {
                file: provenance.to_owned(),
                error: e.to_string(),
            })?;

        let mut policy_sets = Vec::new();
        let mut seen_names: Vec<String> = Vec::new();
        for spec in specs {
            let policy_set = parse_policy_set(spec)?;
            if seen_names.contains(&policy_set.name) {
                return Err(Error::SchemaError {
                    error: format!(
                        "policy set `{}` is defined multiple times",
                        policy_set.name
                    ),
                });
            }
            seen_names.push(policy_set.name.clone());
            policy_sets.push(policy_set);
        }
        Ok(Policybook { policy_sets })
    }
}

fn parse_policy_set(spec: PolicySetSpec) -> Result<PolicySet, Error> {
    let name = spec
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::SchemaError {
            error: "policy set name is missing or empty".to_owned(),
        })?
        .to_owned();

    let hosts = parse_hosts(spec.hosts)?;
    let vars = parse_vars(spec.vars)?;
    let policies = parse_policies(spec.policies, &vars)?;

    Ok(PolicySet {
        name,
        hosts,
        vars,
        policies,
        match_multiple_policies: spec.match_multiple_policies,
    })
}

fn parse_hosts(hosts: Option<serde_yaml::Value>) -> Result<Vec<String>, Error> {
    match hosts {
        Some(serde_yaml::Value::String(host)) => Ok(vec![host]),
        Some(serde_yaml::Value::Sequence(items)) => items
            .into_iter()
            .map(|item| match item {
                serde_yaml::Value::String(host) => Ok(host),
                other => Err(Error::SchemaError {
                    error: format!("unsupported hosts entry `{other:?}`"),
                }),
            })
            .collect(),
        Some(other) => Err(Error::SchemaError {
            error: format!("unsupported hosts value `{other:?}`"),
        }),
        None => Err(Error::SchemaError {
            error: "policy set hosts are missing".to_owned(),
        }),
    }
}

fn parse_vars(vars: Option<serde_yaml::Value>) -> Result<VariableMap, Error> {
    let Some(vars) = vars else {
        return Ok(VariableMap::new());
    };
    let value = serde_json::to_value(vars).map_err(|e| Error::SchemaError {
        error: format!("vars are not JSON-representable: {e}"),
    })?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(VariableMap::new()),
        other => Err(Error::SchemaError {
            error: format!("vars should be defined by a map, found `{other}`"),
        }),
    }
}

fn parse_policies(specs: Vec<PolicySpec>, vars: &VariableMap) -> Result<Vec<Policy>, Error> {
    let mut policies = Vec::new();
    let mut seen_names: Vec<String> = Vec::new();
    for spec in specs {
        let policy = parse_policy(spec, vars)?;
        if seen_names.contains(&policy.name) {
            return Err(Error::SchemaError {
                error: format!("policy `{}` is defined multiple times", policy.name),
            });
        }
        seen_names.push(policy.name.clone());
        // Disabled policies are validated but dropped from the loaded set.
        if policy.enabled {
            policies.push(policy);
        }
    }
    Ok(policies)
}

fn parse_policy(spec: PolicySpec, vars: &VariableMap) -> Result<Policy, Error> {
    let name = spec
        .name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::SchemaError {
            error: "policy name is missing or empty".to_owned(),
        })?;

    let target = spec
        .target
        .filter(|target| !target.is_empty())
        .ok_or_else(|| Error::SchemaError {
            error: format!("policy `{name}` has no target"),
        })?;

    let condition = parse_condition_spec(spec.condition, vars, &name)?;
    let actions = parse_actions(spec.actions, spec.action, &name)?;

    Ok(Policy {
        name,
        target,
        condition,
        actions,
        enabled: spec.enabled.unwrap_or(true),
        tags: spec.tags.unwrap_or_default(),
    })
}

fn parse_condition_spec(
    condition: Option<serde_yaml::Value>,
    vars: &VariableMap,
    policy_name: &str,
) -> Result<Condition, Error> {
    match condition {
        Some(serde_yaml::Value::String(condition)) => Ok(Condition {
            when: ConditionWhen::All,
            exprs: vec![parse_condition(&condition, vars)?],
        }),
        Some(serde_yaml::Value::Bool(value)) => Ok(Condition {
            when: ConditionWhen::All,
            exprs: vec![parse_condition(if value { "true" } else { "false" }, vars)?],
        }),
        Some(serde_yaml::Value::Mapping(map)) => {
            if map.len() != 1 {
                return Err(Error::SchemaError {
                    error: format!(
                        "policy `{policy_name}` condition should have one of any, all, not_all"
                    ),
                });
            }
            let (key, value) = map.into_iter().next().expect("one entry");
            let when = match key.as_str() {
                Some("all") => ConditionWhen::All,
                Some("any") => ConditionWhen::Any,
                Some("not_all") => ConditionWhen::NotAll,
                _ => {
                    return Err(Error::SchemaError {
                        error: format!(
                            "policy `{policy_name}` condition should have one of any, all, \
                             not_all"
                        ),
                    });
                }
            };
            let serde_yaml::Value::Sequence(items) = value else {
                return Err(Error::SchemaError {
                    error: format!(
                        "policy `{policy_name}` {} conditions should be a list",
                        key.as_str().unwrap_or_default()
                    ),
                });
            };
            let mut exprs = Vec::new();
            for item in items {
                let text = match item {
                    serde_yaml::Value::String(text) => text,
                    serde_yaml::Value::Bool(value) => {
                        if value { "true" } else { "false" }.to_owned()
                    }
                    other => {
                        return Err(Error::SchemaError {
                            error: format!("unsupported condition entry `{other:?}`"),
                        });
                    }
                };
                exprs.push(parse_condition(&text, vars)?);
            }
            Ok(Condition { when, exprs })
        }
        Some(other) => Err(Error::SchemaError {
            error: format!("unsupported condition `{other:?}`"),
        }),
        None => Err(Error::SchemaError {
            error: format!("policy `{policy_name}` has no condition"),
        }),
    }
}

fn parse_actions(
    actions: Option<Vec<serde_yaml::Value>>,
    action: Option<serde_yaml::Value>,
    policy_name: &str,
) -> Result<Vec<Action>, Error> {
    let specs = match (actions, action) {
        (Some(actions), _) => actions,
        (None, Some(action)) => vec![action],
        (None, None) => Vec::new(),
    };

    let mut parsed = Vec::new();
    for spec in specs {
        parsed.push(parse_action(spec)?);
    }
    if parsed.is_empty() {
        return Err(Error::SchemaError {
            error: format!("policy `{policy_name}` has no action"),
        });
    }
    Ok(parsed)
}

fn parse_action(spec: serde_yaml::Value) -> Result<Action, Error> {
    let serde_yaml::Value::Mapping(map) = spec else {
        return Err(Error::SchemaError {
            error: "an action should be a single-key map".to_owned(),
        });
    };
    if map.len() != 1 {
        return Err(Error::SchemaError {
            error: "an action should be a single-key map".to_owned(),
        });
    }
    let (key, value) = map.into_iter().next().expect("one entry");
    let kind_name = key.as_str().ok_or_else(|| Error::SchemaError {
        error: "action kind should be a string".to_owned(),
    })?;
    let kind = ActionKind::parse(kind_name)?;

    let args = match value {
        serde_yaml::Value::Null => serde_json::Map::new(),
        other => {
            let value = serde_json::to_value(other).map_err(|e| Error::SchemaError {
                error: format!("action arguments are not JSON-representable: {e}"),
            })?;
            match value {
                Value::Object(map) => map,
                other => {
                    return Err(Error::SchemaError {
                        error: format!("action arguments should be a map, found `{other}`"),
                    });
                }
            }
        }
    };

    Ok(Action { kind, args })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    const POLICYBOOK: &str = r#"
- name: Package policy
  hosts: localhost
  vars:
    allowed_packages:
      - mysql
      - nginx
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

    #[test]
    fn test_load_policybook() {
        let policybook = Policybook::from_string(POLICYBOOK, "<test>").expect("load");
        assert_eq!(policybook.policy_sets.len(), 1);
        let policy_set = &policybook.policy_sets[0];
        assert_eq!(policy_set.name, "Package policy");
        assert_eq!(policy_set.hosts, vec!["localhost".to_owned()]);
        assert!(policy_set.vars.contains_key("allowed_packages"));
        assert_eq!(policy_set.policies.len(), 1);

        let policy = &policy_set.policies[0];
        assert_eq!(policy.name, "Check for banned packages");
        assert_eq!(policy.target, "task");
        assert_eq!(policy.tags, vec!["compliance".to_owned()]);
        assert_eq!(policy.condition.when, ConditionWhen::All);
        assert_eq!(policy.condition.exprs.len(), 1);
        assert!(matches!(policy.condition.exprs[0], Expr::ItemNotInList(_)));
        assert_eq!(policy.actions[0].kind, ActionKind::Deny);
        assert!(policy.actions[0].msg().expect("msg").contains("{{"));
    }

    #[test]
    fn test_multi_condition_quantifier() {
        let yaml = r#"
- name: Become policy
  hosts: all
  policies:
    - name: become check
      target: task
      condition:
        any:
          - input.become == true
          - input.become_user is defined
      action:
        warn:
          msg: become used
"#;
        let policybook = Policybook::from_string(yaml, "<test>").expect("load");
        let policy = &policybook.policy_sets[0].policies[0];
        assert_eq!(policy.condition.when, ConditionWhen::Any);
        assert_eq!(policy.condition.exprs.len(), 2);
    }

    #[test]
    fn test_boolean_condition() {
        let yaml = r#"
- name: Always
  hosts: all
  policies:
    - name: always fire
      target: project
      condition: true
      action:
        info:
          msg: checked
"#;
        let policybook = Policybook::from_string(yaml, "<test>").expect("load");
        let policy = &policybook.policy_sets[0].policies[0];
        assert_eq!(policy.condition.exprs, vec![Expr::Boolean(true)]);
    }

    #[test]
    fn test_disabled_policies_are_dropped() {
        let yaml = r#"
- name: Mixed
  hosts: all
  policies:
    - name: active
      target: task
      condition: input.become == true
      action:
        deny:
          msg: no become
    - name: inactive
      target: task
      condition: input.become == true
      enabled: false
      action:
        deny:
          msg: no become
"#;
        let policybook = Policybook::from_string(yaml, "<test>").expect("load");
        let names: Vec<&str> = policybook.policy_sets[0]
            .policies
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["active"]);
    }

    #[test]
    fn test_duplicate_policy_names() {
        let yaml = r#"
- name: Duplicates
  hosts: all
  policies:
    - name: same
      target: task
      condition: input.become == true
      action:
        deny:
          msg: a
    - name: same
      target: task
      condition: input.become == false
      action:
        deny:
          msg: b
"#;
        let err = Policybook::from_string(yaml, "<test>").expect_err("must fail");
        assert!(matches!(err, Error::SchemaError { .. }));
    }

    #[test]
    fn test_missing_target() {
        let yaml = r#"
- name: No target
  hosts: all
  policies:
    - name: oops
      condition: input.become == true
      action:
        deny:
          msg: a
"#;
        let err = Policybook::from_string(yaml, "<test>").expect_err("must fail");
        assert!(matches!(err, Error::SchemaError { .. }));
    }

    #[test]
    fn test_unsupported_action() {
        let yaml = r#"
- name: Bad action
  hosts: all
  policies:
    - name: oops
      target: task
      condition: input.become == true
      action:
        explode:
          msg: a
"#;
        let err = Policybook::from_string(yaml, "<test>").expect_err("must fail");
        assert!(matches!(err, Error::UnsupportedAction { .. }));
    }

    #[test]
    fn test_missing_action() {
        let yaml = r#"
- name: No action
  hosts: all
  policies:
    - name: oops
      target: task
      condition: input.become == true
"#;
        let err = Policybook::from_string(yaml, "<test>").expect_err("must fail");
        assert!(matches!(err, Error::SchemaError { .. }));
    }

    #[test]
    fn test_condition_with_undeclared_variable() {
        let yaml = r#"
- name: Unknown root
  hosts: all
  policies:
    - name: oops
      target: task
      condition: foo.bar == 1
      action:
        deny:
          msg: a
"#;
        let err = Policybook::from_string(yaml, "<test>").expect_err("must fail");
        assert!(matches!(err, Error::ParseError { .. }));
    }
}
