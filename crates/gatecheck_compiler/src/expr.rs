// SPDX-License-Identifier: Apache-2.0

//! Expression-to-Rego transpilation.
//!
//! A closed dispatcher over the AST node kinds. Every handler emits zero or
//! more helper rules into the output buffer, declares the utility rules the
//! emitted bodies depend on, and returns the name of the root helper it
//! produced.

use std::collections::BTreeMap;

use gatecheck_policybook::ast::{
    Condition, ConditionWhen, Expr, SearchType, SelectAttrType, SelectType,
};
use gatecheck_policybook::condition::COMPARISON_OPERATORS;

use crate::templates::{
    substitute, UtilRule, IF_FUNC, ITEM_IN_LIST_CONDITION, ITEM_NOT_IN_LIST_CONDITION,
    KEY_IN_DICT_CONDITION, KEY_NOT_IN_DICT_CONDITION, SELECTATTR_COMPARE_CONDITION,
    SELECTATTR_MEMBER_CONDITION, SELECT_COMPARE_CONDITION, SELECT_MEMBER_CONDITION,
};
use crate::Error;

/// A single emitted Rego rule (one or more blocks sharing one name).
#[derive(Debug, Clone, PartialEq)]
pub struct RegoFunc {
    /// The rule name.
    pub name: String,
    /// The rule body, ready to append to the compiled document.
    pub body: String,
    /// The utility rules the body depends on.
    pub utils: Vec<UtilRule>,
}

/// The expression transpiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionTranspiler;

impl ExpressionTranspiler {
    /// Creates a new expression transpiler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Compiles a policy's root condition into helper rules.
    ///
    /// Returns the name of the root helper (the one the action rule must
    /// reference) and every emitted helper, in emission order. Helper names
    /// take the form `<policy>_<depth>_<ordinal>` and are unique within one
    /// compiled document.
    pub fn trace_condition(
        &self,
        condition: &Condition,
        policy_name: &str,
    ) -> Result<(String, Vec<RegoFunc>), Error> {
        let mut counter = BTreeMap::new();
        let mut funcs = Vec::new();
        let root_name = match condition.when {
            ConditionWhen::All => self.trace_all(
                &condition.exprs,
                policy_name,
                0,
                &mut counter,
                &mut funcs,
            )?,
            ConditionWhen::Any => self.trace_any(
                &condition.exprs,
                policy_name,
                0,
                &mut counter,
                &mut funcs,
            )?,
            ConditionWhen::NotAll => self.trace_not_all(
                &condition.exprs,
                policy_name,
                0,
                &mut counter,
                &mut funcs,
            )?,
        };
        Ok((root_name, funcs))
    }

    fn alloc_name(
        policy_name: &str,
        depth: usize,
        counter: &mut BTreeMap<usize, usize>,
    ) -> String {
        let ordinal = counter.entry(depth).or_insert(0);
        *ordinal += 1;
        format!("{policy_name}_{depth}_{ordinal}")
    }

    fn trace_all(
        &self,
        exprs: &[Expr],
        policy_name: &str,
        depth: usize,
        counter: &mut BTreeMap<usize, usize>,
        funcs: &mut Vec<RegoFunc>,
    ) -> Result<String, Error> {
        let name = Self::alloc_name(policy_name, depth, counter);
        let mut children = Vec::new();
        for expr in exprs {
            children.push(self.trace_expr(expr, policy_name, depth + 1, counter, funcs)?);
        }
        funcs.push(RegoFunc {
            name: name.clone(),
            body: make_if(&name, &children.join("\n    ")),
            utils: Vec::new(),
        });
        Ok(name)
    }

    fn trace_any(
        &self,
        exprs: &[Expr],
        policy_name: &str,
        depth: usize,
        counter: &mut BTreeMap<usize, usize>,
        funcs: &mut Vec<RegoFunc>,
    ) -> Result<String, Error> {
        let name = Self::alloc_name(policy_name, depth, counter);
        let mut children = Vec::new();
        for expr in exprs {
            children.push(self.trace_expr(expr, policy_name, depth, counter, funcs)?);
        }
        let body: String = children
            .iter()
            .map(|child| make_if(&name, child))
            .collect();
        funcs.push(RegoFunc {
            name: name.clone(),
            body,
            utils: Vec::new(),
        });
        Ok(name)
    }

    fn trace_not_all(
        &self,
        exprs: &[Expr],
        policy_name: &str,
        depth: usize,
        counter: &mut BTreeMap<usize, usize>,
        funcs: &mut Vec<RegoFunc>,
    ) -> Result<String, Error> {
        let name = Self::alloc_name(policy_name, depth, counter);
        let mut children = Vec::new();
        for expr in exprs {
            children.push(self.trace_expr(expr, policy_name, depth, counter, funcs)?);
        }
        let body: String = children
            .iter()
            .map(|child| make_if(&name, &format!("not {child}")))
            .collect();
        funcs.push(RegoFunc {
            name: name.clone(),
            body,
            utils: Vec::new(),
        });
        Ok(name)
    }

    fn trace_expr(
        &self,
        expr: &Expr,
        policy_name: &str,
        depth: usize,
        counter: &mut BTreeMap<usize, usize>,
        funcs: &mut Vec<RegoFunc>,
    ) -> Result<String, Error> {
        match expr {
            Expr::And(op) => {
                let name = Self::alloc_name(policy_name, depth, counter);
                let lhs = self.trace_expr(&op.lhs, policy_name, depth + 1, counter, funcs)?;
                let rhs = self.trace_expr(&op.rhs, policy_name, depth + 1, counter, funcs)?;
                funcs.push(RegoFunc {
                    name: name.clone(),
                    body: make_if(&name, &format!("{lhs}\n    {rhs}")),
                    utils: Vec::new(),
                });
                Ok(name)
            }
            Expr::Or(op) => {
                let name = Self::alloc_name(policy_name, depth, counter);
                let lhs = self.trace_expr(&op.lhs, policy_name, depth, counter, funcs)?;
                let rhs = self.trace_expr(&op.rhs, policy_name, depth, counter, funcs)?;
                let body = format!("{}{}", make_if(&name, &lhs), make_if(&name, &rhs));
                funcs.push(RegoFunc {
                    name: name.clone(),
                    body,
                    utils: Vec::new(),
                });
                Ok(name)
            }
            Expr::Negate(inner) if !inner.is_leaf() => {
                let name = Self::alloc_name(policy_name, depth, counter);
                let child = self.trace_expr(inner, policy_name, depth + 1, counter, funcs)?;
                funcs.push(RegoFunc {
                    name: name.clone(),
                    body: make_if(&name, &format!("not {child}")),
                    utils: Vec::new(),
                });
                Ok(name)
            }
            _ => {
                let name = Self::alloc_name(policy_name, depth, counter);
                let (steps, utils) = operator_body(expr)?;
                funcs.push(RegoFunc {
                    name: name.clone(),
                    body: make_if(&name, &steps),
                    utils,
                });
                Ok(name)
            }
        }
    }
}

/// Wraps condition steps into a named helper rule.
pub(crate) fn make_if(name: &str, steps: &str) -> String {
    substitute(IF_FUNC, &[("func_name", name), ("steps", steps)])
}

/// Produces the rule-body steps and utility dependencies for one operator
/// node.
pub(crate) fn operator_body(expr: &Expr) -> Result<(String, Vec<UtilRule>), Error> {
    let steps = match expr {
        // Bare references and literals assert their own truth.
        Expr::Boolean(_) | Expr::Input(_) | Expr::Variable(_) => {
            return Ok((render_operand(expr)?, Vec::new()));
        }

        Expr::Equals(op) => {
            let lhs = render_operand(&op.lhs)?;
            match op.rhs {
                Expr::Boolean(true) => lhs,
                Expr::Boolean(false) => format!("not {lhs}"),
                _ => format!("{lhs} == {}", render_operand(&op.rhs)?),
            }
        }
        Expr::NotEquals(op) => {
            let lhs = render_operand(&op.lhs)?;
            match op.rhs {
                Expr::Boolean(true) => format!("not {lhs}"),
                Expr::Boolean(false) => lhs,
                _ => format!("{lhs} != {}", render_operand(&op.rhs)?),
            }
        }
        Expr::GreaterThan(op) => {
            format!(
                "{} > {}",
                render_operand(&op.lhs)?,
                render_operand(&op.rhs)?
            )
        }
        Expr::LessThan(op) => {
            format!(
                "{} < {}",
                render_operand(&op.lhs)?,
                render_operand(&op.rhs)?
            )
        }
        Expr::GreaterThanOrEqualTo(op) => {
            format!(
                "{} >= {}",
                render_operand(&op.lhs)?,
                render_operand(&op.rhs)?
            )
        }
        Expr::LessThanOrEqualTo(op) => {
            format!(
                "{} <= {}",
                render_operand(&op.lhs)?,
                render_operand(&op.rhs)?
            )
        }

        Expr::ItemInList(op) => {
            let steps = substitute(
                ITEM_IN_LIST_CONDITION,
                &[
                    ("lhs", &render_operand(&op.lhs)?),
                    ("rhs", &render_operand(&op.rhs)?),
                ],
            );
            return Ok((steps, vec![UtilRule::ToList, UtilRule::ItemInList]));
        }
        Expr::ItemNotInList(op) => {
            let steps = substitute(
                ITEM_NOT_IN_LIST_CONDITION,
                &[
                    ("lhs", &render_operand(&op.lhs)?),
                    ("rhs", &render_operand(&op.rhs)?),
                ],
            );
            return Ok((steps, vec![UtilRule::ToList, UtilRule::ItemNotInList]));
        }
        // `contains` is membership with the operand roles swapped.
        Expr::ListContainsItem(op) => {
            let steps = substitute(
                ITEM_IN_LIST_CONDITION,
                &[
                    ("lhs", &render_operand(&op.rhs)?),
                    ("rhs", &render_operand(&op.lhs)?),
                ],
            );
            return Ok((steps, vec![UtilRule::ToList, UtilRule::ItemInList]));
        }
        Expr::ListNotContainsItem(op) => {
            let steps = substitute(
                ITEM_NOT_IN_LIST_CONDITION,
                &[
                    ("lhs", &render_operand(&op.rhs)?),
                    ("rhs", &render_operand(&op.lhs)?),
                ],
            );
            return Ok((steps, vec![UtilRule::ToList, UtilRule::ItemNotInList]));
        }

        Expr::KeyInDict(op) => substitute(
            KEY_IN_DICT_CONDITION,
            &[
                ("lhs", &render_operand(&op.lhs)?),
                ("rhs", &render_operand(&op.rhs)?),
            ],
        ),
        Expr::KeyNotInDict(op) => substitute(
            KEY_NOT_IN_DICT_CONDITION,
            &[
                ("lhs", &render_operand(&op.lhs)?),
                ("rhs", &render_operand(&op.rhs)?),
            ],
        ),

        Expr::IsDefined(inner) => {
            let value = render_operand(inner)?;
            match parent_path(&value) {
                Some(parent) => format!("{parent}\n    {value}"),
                None => value,
            }
        }
        Expr::IsNotDefined(inner) => {
            let value = render_operand(inner)?;
            match parent_path(&value) {
                Some(parent) => format!("{parent}\n    not {value}"),
                None => format!("not {value}"),
            }
        }

        Expr::Negate(inner) => format!("not {}", render_operand(inner)?),

        Expr::SearchMatches { lhs, search } => search_steps(lhs, search, false)?,
        Expr::SearchNotMatches { lhs, search } => search_steps(lhs, search, true)?,

        Expr::Select { lhs, select } => return select_steps(lhs, select, false),
        Expr::SelectNot { lhs, select } => return select_steps(lhs, select, true),
        Expr::SelectAttr { lhs, selectattr } => return selectattr_steps(lhs, selectattr, false),
        Expr::SelectAttrNot { lhs, selectattr } => {
            return selectattr_steps(lhs, selectattr, true)
        }

        Expr::Integer(_) | Expr::Float(_) | Expr::String(_) | Expr::Null | Expr::List(_) => {
            return Err(Error::TranspileError {
                error: format!("a bare literal is not a valid condition: {expr:?}"),
            });
        }
        Expr::And(_) | Expr::Or(_) => {
            return Err(Error::TranspileError {
                error: "boolean compositions must be traced into helper rules".to_owned(),
            });
        }
    };
    Ok((steps, Vec::new()))
}

/// Renders an operand expression into target-language text.
pub(crate) fn render_operand(expr: &Expr) -> Result<String, Error> {
    match expr {
        Expr::Boolean(value) => Ok(if *value { "true" } else { "false" }.to_owned()),
        Expr::Integer(value) => Ok(value.to_string()),
        Expr::Float(value) => Ok(value.to_string()),
        Expr::String(value) => Ok(format!("\"{value}\"")),
        Expr::Null => Ok("null".to_owned()),
        Expr::Input(path) | Expr::Variable(path) => Ok(path.clone()),
        Expr::List(items) => {
            let rendered: Result<Vec<String>, Error> = items.iter().map(render_operand).collect();
            Ok(format!("[{}]", rendered?.join(", ")))
        }
        _ => Err(Error::TranspileError {
            error: format!("expression is not a valid operand: {expr:?}"),
        }),
    }
}

/// Returns the container prefix of a dotted path, ignoring dots inside
/// bracketed keys (`input["a.b"].c` → `input["a.b"]`).
fn parent_path(path: &str) -> Option<String> {
    let mut quote: Option<char> = None;
    let mut last_dot = None;
    for (i, c) in path.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '.' => last_dot = Some(i),
                _ => {}
            },
        }
    }
    last_dot.map(|i| path[..i].to_owned())
}

fn search_steps(lhs: &Expr, search: &SearchType, negated: bool) -> Result<String, Error> {
    let lhs = render_operand(lhs)?;
    let pattern = render_operand(&search.pattern)?;
    let ignorecase = search.ignorecase();

    let wrap = |value: &str| {
        if ignorecase {
            format!("lower({value})")
        } else {
            value.to_owned()
        }
    };

    match search.kind.as_str() {
        "search" => {
            let expr = format!("contains({}, {})", wrap(&lhs), wrap(&pattern));
            Ok(if negated { format!("not {expr}") } else { expr })
        }
        "match" => {
            let expr = format!("startswith({}, {})", wrap(&lhs), wrap(&pattern));
            Ok(if negated { format!("not {expr}") } else { expr })
        }
        "regex" => {
            let find = format!("regex.find_n({}, {}, 1)", wrap(&pattern), wrap(&lhs));
            Ok(if negated {
                format!("{find} == []")
            } else {
                format!("{find} != []")
            })
        }
        other => Err(Error::TranspileError {
            error: format!("unknown search kind `{other}`"),
        }),
    }
}

fn select_steps(
    lhs: &Expr,
    select: &SelectType,
    negated: bool,
) -> Result<(String, Vec<UtilRule>), Error> {
    let lhs = render_operand(lhs)?;
    let value = render_operand(&select.value)?;
    if COMPARISON_OPERATORS.contains(&select.operator.as_str()) {
        let steps = substitute(
            SELECT_COMPARE_CONDITION,
            &[
                ("lhs", &lhs),
                ("operator", &select.operator),
                ("value", &value),
                ("count_check", if negated { "== 0" } else { "> 0" }),
            ],
        );
        Ok((steps, Vec::new()))
    } else {
        let (check_func, util) = if negated {
            ("check_item_not_in_list", UtilRule::ItemNotInList)
        } else {
            ("check_item_in_list", UtilRule::ItemInList)
        };
        let steps = substitute(
            SELECT_MEMBER_CONDITION,
            &[
                ("value", &value),
                ("check_func", check_func),
                ("lhs", &lhs),
            ],
        );
        Ok((steps, vec![UtilRule::ToList, util]))
    }
}

fn selectattr_steps(
    lhs: &Expr,
    selectattr: &SelectAttrType,
    negated: bool,
) -> Result<(String, Vec<UtilRule>), Error> {
    let lhs = render_operand(lhs)?;
    let value = render_operand(&selectattr.value)?;
    let key_path = render_key_path(&selectattr.key);
    if COMPARISON_OPERATORS.contains(&selectattr.operator.as_str()) {
        let steps = substitute(
            SELECTATTR_COMPARE_CONDITION,
            &[
                ("lhs", &lhs),
                ("key_path", &key_path),
                ("operator", &selectattr.operator),
                ("value", &value),
                ("count_check", if negated { "== 0" } else { "> 0" }),
            ],
        );
        Ok((steps, Vec::new()))
    } else {
        let (check_func, util) = if negated {
            ("check_item_key_not_in_list", UtilRule::ItemKeyNotInList)
        } else {
            ("check_item_key_in_list", UtilRule::ItemKeyInList)
        };
        let steps = substitute(
            SELECTATTR_MEMBER_CONDITION,
            &[
                ("value", &value),
                ("check_func", check_func),
                ("lhs", &lhs),
                ("key_path", &key_path),
            ],
        );
        Ok((steps, vec![UtilRule::ToList, util]))
    }
}

/// Renders a dotted attribute key into an `object.get` path list:
/// `person.age` → `["person", "age"]`.
fn render_key_path(key: &str) -> String {
    let segments: Vec<String> = key
        .split('.')
        .map(|segment| format!("\"{segment}\""))
        .collect();
    format!("[{}]", segments.join(", "))
}
