// SPDX-License-Identifier: Apache-2.0

//! AST JSON emitter.
//!
//! Normalizes parsed policybooks into the stable, language-neutral JSON
//! shapes consumed by the transpiler and by external tooling. Every node is
//! a single-key tagged object, except list operands which are emitted as
//! bare arrays.

use serde_json::{json, Map, Value};

use crate::ast::{Condition, Expr, KeywordValue, SearchType, SelectAttrType, SelectType};
use crate::policybook::{Action, Policy, PolicySet};

/// Emits the JSON form of an expression node.
#[must_use]
pub fn expr_to_value(expr: &Expr) -> Value {
    match expr {
        Expr::Boolean(value) => json!({ "Boolean": value }),
        Expr::Integer(value) => json!({ "Integer": value }),
        Expr::Float(value) => json!({ "Float": value }),
        Expr::String(value) => json!({ "String": value }),
        Expr::Null => json!({ "NullType": null }),
        Expr::Input(path) => json!({ "Input": path }),
        Expr::Variable(path) => json!({ "Variable": path }),
        Expr::List(items) => Value::Array(items.iter().map(expr_to_value).collect()),

        Expr::Equals(op) => binary("EqualsExpression", &op.lhs, &op.rhs),
        Expr::NotEquals(op) => binary("NotEqualsExpression", &op.lhs, &op.rhs),
        Expr::GreaterThan(op) => binary("GreaterThanExpression", &op.lhs, &op.rhs),
        Expr::LessThan(op) => binary("LessThanExpression", &op.lhs, &op.rhs),
        Expr::GreaterThanOrEqualTo(op) => {
            binary("GreaterThanOrEqualToExpression", &op.lhs, &op.rhs)
        }
        Expr::LessThanOrEqualTo(op) => binary("LessThanOrEqualToExpression", &op.lhs, &op.rhs),
        Expr::ItemInList(op) => binary("ItemInListExpression", &op.lhs, &op.rhs),
        Expr::ItemNotInList(op) => binary("ItemNotInListExpression", &op.lhs, &op.rhs),
        Expr::ListContainsItem(op) => binary("ListContainsItemExpression", &op.lhs, &op.rhs),
        Expr::ListNotContainsItem(op) => {
            binary("ListNotContainsItemExpression", &op.lhs, &op.rhs)
        }
        Expr::KeyInDict(op) => binary("KeyInDictExpression", &op.lhs, &op.rhs),
        Expr::KeyNotInDict(op) => binary("KeyNotInDictExpression", &op.lhs, &op.rhs),
        Expr::And(op) => binary("AndExpression", &op.lhs, &op.rhs),
        Expr::Or(op) => binary("OrExpression", &op.lhs, &op.rhs),

        Expr::Negate(inner) => json!({ "NegateExpression": expr_to_value(inner) }),
        Expr::IsDefined(inner) => json!({ "IsDefinedExpression": expr_to_value(inner) }),
        Expr::IsNotDefined(inner) => json!({ "IsNotDefinedExpression": expr_to_value(inner) }),

        Expr::SearchMatches { lhs, search } => tagged_rhs(
            "SearchMatchesExpression",
            lhs,
            json!({ "SearchType": search_to_value(search) }),
        ),
        Expr::SearchNotMatches { lhs, search } => tagged_rhs(
            "SearchNotMatchesExpression",
            lhs,
            json!({ "SearchType": search_to_value(search) }),
        ),
        Expr::Select { lhs, select } => {
            tagged_rhs("SelectExpression", lhs, select_to_value(select))
        }
        Expr::SelectNot { lhs, select } => {
            tagged_rhs("SelectNotExpression", lhs, select_to_value(select))
        }
        Expr::SelectAttr { lhs, selectattr } => {
            tagged_rhs("SelectAttrExpression", lhs, selectattr_to_value(selectattr))
        }
        Expr::SelectAttrNot { lhs, selectattr } => tagged_rhs(
            "SelectAttrNotExpression",
            lhs,
            selectattr_to_value(selectattr),
        ),
    }
}

fn binary(tag: &str, lhs: &Expr, rhs: &Expr) -> Value {
    tagged_rhs(tag, lhs, expr_to_value(rhs))
}

fn tagged_rhs(tag: &str, lhs: &Expr, rhs: Value) -> Value {
    let mut body = Map::new();
    _ = body.insert("lhs".to_owned(), expr_to_value(lhs));
    _ = body.insert("rhs".to_owned(), rhs);
    let mut node = Map::new();
    _ = node.insert(tag.to_owned(), Value::Object(body));
    Value::Object(node)
}

fn search_to_value(search: &SearchType) -> Value {
    let mut data = Map::new();
    _ = data.insert("kind".to_owned(), json!({ "String": search.kind }));
    _ = data.insert("pattern".to_owned(), expr_to_value(&search.pattern));
    if !search.options.is_empty() {
        _ = data.insert(
            "options".to_owned(),
            Value::Array(search.options.iter().map(keyword_to_value).collect()),
        );
    }
    Value::Object(data)
}

fn keyword_to_value(option: &KeywordValue) -> Value {
    json!({
        "name": { "String": option.name },
        "value": expr_to_value(&option.value),
    })
}

fn select_to_value(select: &SelectType) -> Value {
    json!({
        "operator": { "String": select.operator },
        "value": expr_to_value(&select.value),
    })
}

fn selectattr_to_value(selectattr: &SelectAttrType) -> Value {
    json!({
        "key": { "String": selectattr.key },
        "operator": { "String": selectattr.operator },
        "value": expr_to_value(&selectattr.value),
    })
}

/// Emits the JSON form of a policy's root condition.
#[must_use]
pub fn condition_to_value(condition: &Condition) -> Value {
    let exprs: Vec<Value> = condition.exprs.iter().map(expr_to_value).collect();
    let mut node = Map::new();
    _ = node.insert(condition.when.tag().to_owned(), Value::Array(exprs));
    Value::Object(node)
}

/// Emits the JSON form of an action.
#[must_use]
pub fn action_to_value(action: &Action) -> Value {
    json!({
        "Action": {
            "action": action.kind.as_str(),
            "action_args": Value::Object(action.args.clone()),
        }
    })
}

/// Emits the JSON form of a policy.
#[must_use]
pub fn policy_to_value(policy: &Policy) -> Value {
    json!({
        "Policy": {
            "name": policy.name,
            "target": policy.target,
            "condition": condition_to_value(&policy.condition),
            "actions": policy.actions.iter().map(action_to_value).collect::<Vec<Value>>(),
            "enabled": policy.enabled,
            "tags": policy.tags,
        }
    })
}

/// Emits the JSON form of a policy set.
#[must_use]
pub fn policyset_to_value(policyset: &PolicySet) -> Value {
    json!({
        "PolicySet": {
            "name": policyset.name,
            "hosts": policyset.hosts,
            "policies": policyset.policies.iter().map(policy_to_value).collect::<Vec<Value>>(),
            "vars": Value::Object(policyset.vars.clone()),
        }
    })
}

/// Emits the JSON form of every policy set of a policybook document.
#[must_use]
pub fn policysets_to_value(policysets: &[PolicySet]) -> Value {
    Value::Array(policysets.iter().map(policyset_to_value).collect())
}
