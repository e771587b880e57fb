// SPDX-License-Identifier: Apache-2.0

//! Condition parsing: a mini-expression language over `input` references,
//! declared variables and literals.

mod lexer;
mod parser;

use crate::ast::Expr;
use crate::Error;

/// The variable map of the enclosing policy set, used to resolve bare
/// identifier roots while parsing.
pub type VariableMap = serde_json::Map<String, serde_json::Value>;

/// Operators accepted by `select(..)`.
pub const VALID_SELECT_OPERATORS: [&str; 9] = [
    "==", "!=", ">", ">=", "<", "<=", "regex", "search", "match",
];

/// Operators accepted by `selectattr(..)`.
pub const VALID_SELECT_ATTR_OPERATORS: [&str; 15] = [
    "==",
    "!=",
    ">",
    ">=",
    "<",
    "<=",
    "regex",
    "search",
    "match",
    "in",
    "not in",
    "contains",
    "not contains",
    "has key",
    "lacks key",
];

/// Comparison operators that compile to a list-comprehension filter in
/// `select`/`selectattr` predicates. Every other whitelisted operator takes
/// the membership form.
pub const COMPARISON_OPERATORS: [&str; 6] = ["==", "!=", ">", ">=", "<", "<="];

/// Parses a condition string into an expression tree.
///
/// `vars` lists the variables declared by the enclosing policy set; a bare
/// identifier path must be rooted in `input` or one of them.
pub fn parse_condition(condition: &str, vars: &VariableMap) -> Result<Expr, Error> {
    parser::Parser::new(condition, vars)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    fn no_vars() -> VariableMap {
        VariableMap::new()
    }

    fn vars(names: &[&str]) -> VariableMap {
        names
            .iter()
            .map(|name| ((*name).to_owned(), serde_json::Value::from("val")))
            .collect()
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            parse_condition("42", &no_vars()).expect("parse"),
            Expr::Integer(42)
        );
        assert_eq!(
            parse_condition("3.1415", &no_vars()).expect("parse"),
            Expr::Float(3.1415)
        );
        assert_eq!(
            parse_condition("'Hello'", &no_vars()).expect("parse"),
            Expr::String("Hello".to_owned())
        );
        assert_eq!(
            parse_condition("True", &no_vars()).expect("parse"),
            Expr::Boolean(true)
        );
        assert_eq!(
            parse_condition("false", &no_vars()).expect("parse"),
            Expr::Boolean(false)
        );
        assert_eq!(
            parse_condition("null", &no_vars()).expect("parse"),
            Expr::Null
        );
    }

    #[test]
    fn test_identifier_roots() {
        assert_eq!(
            parse_condition("input.data", &no_vars()).expect("parse"),
            Expr::Input("input.data".to_owned())
        );
        assert_eq!(
            parse_condition("var1", &vars(&["var1"])).expect("parse"),
            Expr::Variable("var1".to_owned())
        );
        // An undeclared root with a path is a parse error.
        assert!(parse_condition("foo.bar", &no_vars()).is_err());
        // A bare undeclared word is a plain string.
        assert_eq!(
            parse_condition("foo", &no_vars()).expect("parse"),
            Expr::String("foo".to_owned())
        );
    }

    #[test]
    fn test_path_spelling_is_preserved() {
        for path in [
            "input['i']",
            "input.range[\"pi\"]",
            "input.range['pi'].value",
            "input.range[0]",
            "input.range[-1]",
            "input.range[\"x\"][1][2].a[\"b\"]",
        ] {
            assert_eq!(
                parse_condition(path, &no_vars()).expect("parse"),
                Expr::Input(path.to_owned()),
                "path `{path}`"
            );
        }
    }

    #[test]
    fn test_precedence_and_parentheses() {
        let expr = parse_condition(
            "(input.i is not defined) and (input.i is defined) or (input.i == 1)",
            &no_vars(),
        )
        .expect("parse");
        let Expr::Or(or) = expr else {
            panic!("expected Or at the root");
        };
        assert!(matches!(or.lhs, Expr::And(_)));
        assert!(matches!(or.rhs, Expr::Equals(_)));
    }

    #[test]
    fn test_negation() {
        assert_eq!(
            parse_condition("not input.enabled", &no_vars()).expect("parse"),
            Expr::Negate(Box::new(Expr::Input("input.enabled".to_owned())))
        );
        let expr = parse_condition("not (input.i < 1)", &no_vars()).expect("parse");
        assert!(matches!(expr, Expr::Negate(inner) if matches!(*inner, Expr::LessThan(_))));
    }

    #[test]
    fn test_membership_keywords_are_caseless() {
        let lower = parse_condition("input.i not in [1, 2]", &no_vars()).expect("parse");
        let upper = parse_condition("input.i NOT IN [1, 2]", &no_vars()).expect("parse");
        assert_eq!(lower, upper);
        assert!(matches!(lower, Expr::ItemNotInList(_)));
    }

    #[test]
    fn test_nested_list() {
        let expr = parse_condition(
            "input['ansible.builtin.package'].name in [['A1', 'A2'], 'B', 'C']",
            &no_vars(),
        )
        .expect("parse");
        let Expr::ItemInList(op) = expr else {
            panic!("expected ItemInList");
        };
        let Expr::List(items) = op.rhs else {
            panic!("expected a list rhs");
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Expr::List(_)));
    }

    #[test]
    fn test_has_key_binds_tighter_than_and() {
        let expr = parse_condition(
            "input.become == true and input lacks key become_user",
            &no_vars(),
        )
        .expect("parse");
        let Expr::And(op) = expr else {
            panic!("expected And at the root");
        };
        assert!(matches!(op.lhs, Expr::Equals(_)));
        assert!(matches!(op.rhs, Expr::KeyNotInDict(_)));
    }

    #[test]
    fn test_search_options() {
        let expr = parse_condition(
            "input.url is match(\"https://example.com/.*\", ignorecase=true)",
            &no_vars(),
        )
        .expect("parse");
        let Expr::SearchMatches { lhs, search } = expr else {
            panic!("expected SearchMatches");
        };
        assert_eq!(*lhs, Expr::Input("input.url".to_owned()));
        assert_eq!(search.kind, "match");
        assert_eq!(*search.pattern, Expr::String("https://example.com/.*".to_owned()));
        assert!(search.ignorecase());
    }

    #[test]
    fn test_select_and_selectattr() {
        let expr =
            parse_condition("input.ids is select(\">=\", 10)", &no_vars()).expect("parse");
        let Expr::Select { select, .. } = expr else {
            panic!("expected Select");
        };
        assert_eq!(select.operator, ">=");
        assert_eq!(*select.value, Expr::Integer(10));

        let expr = parse_condition(
            "input.persons is not selectattr('person.age', '>', minimum_age)",
            &vars(&["minimum_age"]),
        )
        .expect("parse");
        let Expr::SelectAttrNot { selectattr, .. } = expr else {
            panic!("expected SelectAttrNot");
        };
        assert_eq!(selectattr.key, "person.age");
        assert_eq!(selectattr.operator, ">");
        assert_eq!(*selectattr.value, Expr::Variable("minimum_age".to_owned()));
    }

    #[test]
    fn test_select_operator_whitelist() {
        let err = parse_condition("input.persons is not select(\"in\", ['fred'])", &no_vars())
            .expect_err("must fail");
        assert!(matches!(err, Error::SelectOperatorError { .. }));

        let err = parse_condition(
            "input.persons is not selectattr(\"name\", \"cmp\", \"fred\")",
            &no_vars(),
        )
        .expect_err("must fail");
        assert!(matches!(err, Error::SelectAttrOperatorError { .. }));
    }

    #[test]
    fn test_assignment_is_rejected() {
        let err = parse_condition("foo << input.x", &no_vars()).expect_err("must fail");
        assert!(matches!(err, Error::InvalidAssignment { .. }));

        // A well-formed assignment target still cannot be compiled.
        let err = parse_condition("events.var1 << input.x", &no_vars()).expect_err("must fail");
        assert!(matches!(err, Error::ParseError { .. }));
    }

    #[test]
    fn test_whitespace_does_not_change_the_tree() {
        let compact = parse_condition("input.i in [1,2,3]", &no_vars()).expect("parse");
        let spaced = parse_condition("input.i   in  [ 1 , 2 , 3 ]", &no_vars()).expect("parse");
        assert_eq!(compact, spaced);
    }

    #[test]
    fn test_deeply_parenthesized() {
        let expr =
            parse_condition("(((input.range.i is not defined)))", &no_vars()).expect("parse");
        assert_eq!(
            expr,
            Expr::IsNotDefined(Box::new(Expr::Input("input.range.i".to_owned())))
        );
    }

    #[test]
    fn test_chained_and() {
        let expr = parse_condition(
            "(input.a is defined) and (input.b is defined) and (input.c == 1)",
            &no_vars(),
        )
        .expect("parse");
        // Left associative: ((a and b) and c)
        let Expr::And(outer) = expr else {
            panic!("expected And");
        };
        assert!(matches!(outer.lhs, Expr::And(_)));
        assert!(matches!(outer.rhs, Expr::Equals(_)));
    }
}
