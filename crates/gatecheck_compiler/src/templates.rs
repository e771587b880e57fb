// SPDX-License-Identifier: Apache-2.0

//! Rego snippet templates and the utility-rule library.
//!
//! Templates are immutable string constants; per-call substitution builds
//! fresh strings via [`substitute`].

/// A condition helper rule.
pub(crate) const IF_FUNC: &str = "
${func_name} = true if {
    ${steps}
}
";

/// The terminal action rule.
pub(crate) const ACTION_FUNC: &str = "
${func_name} = true if {
    ${steps}
} else = false
";

pub(crate) const ITEM_IN_LIST_CONDITION: &str = "lhs_list = to_list(${lhs})
    check_item_in_list(lhs_list, ${rhs})";

pub(crate) const ITEM_NOT_IN_LIST_CONDITION: &str = "lhs_list = to_list(${lhs})
    check_item_not_in_list(lhs_list, ${rhs})";

pub(crate) const KEY_IN_DICT_CONDITION: &str = "${lhs}
    input_keys := [key | ${lhs}[key]; key == ${rhs}]
    count(input_keys) > 0";

pub(crate) const KEY_NOT_IN_DICT_CONDITION: &str = "${lhs}
    input_keys := [key | ${lhs}[key]; key == ${rhs}]
    count(input_keys) == 0";

pub(crate) const SELECT_COMPARE_CONDITION: &str =
    "array := [item | item := ${lhs}[_]; item ${operator} ${value}]
    count(array) ${count_check}";

pub(crate) const SELECT_MEMBER_CONDITION: &str = "rhs_list = to_list(${value})
    ${check_func}(${lhs}, rhs_list)";

pub(crate) const SELECTATTR_COMPARE_CONDITION: &str =
    "array := [item | item := ${lhs}[_]; object.get(item, ${key_path}, \"none\") ${operator} ${value}]
    count(array) ${count_check}";

pub(crate) const SELECTATTR_MEMBER_CONDITION: &str = "rhs_list = to_list(${value})
    ${check_func}(${lhs}, rhs_list, ${key_path})";

/// Substitutes `${key}` placeholders in a template.
pub(crate) fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut result = template.to_owned();
    for (key, value) in values {
        result = result.replace(&format!("${{{key}}}"), value);
    }
    result
}

/// A utility rule that compiled condition bodies may depend on.
///
/// The enum order is the emission order inside a compiled document, so
/// recompilation is byte-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UtilRule {
    /// `to_list(val)`: wraps scalars into singleton arrays.
    ToList,
    /// `check_item_in_list(lhs_list, rhs_list)`
    ItemInList,
    /// `check_item_not_in_list(lhs_list, rhs_list)`
    ItemNotInList,
    /// `check_item_key_in_list(lhs_list, rhs_list, key_path)`
    ItemKeyInList,
    /// `check_item_key_not_in_list(lhs_list, rhs_list, key_path)`
    ItemKeyNotInList,
}

impl UtilRule {
    /// The rule body emitted into the compiled document.
    #[must_use]
    pub fn body(&self) -> &'static str {
        match self {
            UtilRule::ToList => {
                "
to_list(val) = output if {
    is_array(val)
    output = val
}

to_list(val) = output if {
    not is_array(val)
    output = [val]
}
"
            }
            UtilRule::ItemInList => {
                "
check_item_in_list(lhs_list, rhs_list) = true if {
    array := [item | item := lhs_list[_]; item in rhs_list]
    count(array) > 0
} else = false
"
            }
            UtilRule::ItemNotInList => {
                "
check_item_not_in_list(lhs_list, rhs_list) = true if {
    array := [item | item := lhs_list[_]; not item in rhs_list]
    count(array) > 0
} else = false
"
            }
            UtilRule::ItemKeyInList => {
                "
check_item_key_in_list(lhs_list, rhs_list, key_path) = true if {
    array := [item | item := lhs_list[_]; object.get(item, key_path, \"none\") in rhs_list]
    count(array) > 0
} else = false
"
            }
            UtilRule::ItemKeyNotInList => {
                "
check_item_key_not_in_list(lhs_list, rhs_list, key_path) = true if {
    array := [item | item := lhs_list[_]; not object.get(item, key_path, \"none\") in rhs_list]
    count(array) > 0
} else = false
"
            }
        }
    }
}

/// The shared utility library evaluated alongside every compiled policy.
/// Installed once per root as `gatecheck.rego`.
pub const UTILITY_LIBRARY: &str = r#"package gatecheck

import future.keywords.if
import future.keywords.in

resolve_var(expr, variables) = resolved if {
    is_string(expr)
    startswith(expr, "{{")
    endswith(expr, "}}")
    name := trim_space(trim_suffix(trim_prefix(expr, "{{"), "}}"))
    resolved := variables[name]
}

resolve_var(expr, variables) = expr if {
    not is_string(expr)
}

resolve_var(expr, variables) = expr if {
    is_string(expr)
    not startswith(expr, "{{")
}
"#;

/// The file name of the installed utility library.
pub const UTILITY_LIBRARY_FILE: &str = "gatecheck.rego";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute() {
        assert_eq!(
            substitute(IF_FUNC, &[("func_name", "test"), ("steps", "input.become")]),
            "\ntest = true if {\n    input.become\n}\n"
        );
    }

    #[test]
    fn test_util_rule_order_is_stable() {
        let mut rules = vec![UtilRule::ItemNotInList, UtilRule::ToList];
        rules.sort();
        assert_eq!(rules, vec![UtilRule::ToList, UtilRule::ItemNotInList]);
    }
}
