// SPDX-License-Identifier: Apache-2.0

//! Typed expression tree produced by the condition parser.
//!
//! The tree is a closed sum type with one variant per node kind of the
//! language-neutral AST. The JSON shapes exchanged with the transpiler are
//! produced by the [`crate::json`] emitter; this module is the canonical
//! in-memory representation.

/// A keyword argument attached to a string-search specification,
/// e.g. `ignorecase=true`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordValue {
    /// The option name.
    pub name: String,
    /// The option value.
    pub value: Expr,
}

/// A string-search specification: `search(..)`, `match(..)` or `regex(..)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchType {
    /// One of `search`, `match`, `regex`.
    pub kind: String,
    /// The pattern operand (a string literal or a reference).
    pub pattern: Box<Expr>,
    /// Optional keyword arguments such as `ignorecase`.
    pub options: Vec<KeywordValue>,
}

impl SearchType {
    /// Returns true when an `ignorecase=true` option is present.
    #[must_use]
    pub fn ignorecase(&self) -> bool {
        self.options
            .iter()
            .any(|opt| opt.name == "ignorecase" && matches!(opt.value, Expr::Boolean(true)))
    }
}

/// An iterable predicate specification: `select(operator, value)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectType {
    /// The predicate operator (validated against the select whitelist).
    pub operator: String,
    /// The comparison value.
    pub value: Box<Expr>,
}

/// An iterable predicate specification keyed on a nested attribute:
/// `selectattr(key, operator, value)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectAttrType {
    /// The dotted attribute path inside each item.
    pub key: String,
    /// The predicate operator (validated against the selectattr whitelist).
    pub operator: String,
    /// The comparison value.
    pub value: Box<Expr>,
}

/// The two operands of a binary operator node.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    /// Left-hand side operand.
    pub lhs: Expr,
    /// Right-hand side operand.
    pub rhs: Expr,
}

impl BinaryExpr {
    /// Boxes a new binary node from its two operands.
    #[must_use]
    pub fn new(lhs: Expr, rhs: Expr) -> Box<Self> {
        Box::new(Self { lhs, rhs })
    }
}

/// An expression node.
///
/// Leaf variants carry literal values or qualified references; composite
/// variants mirror the operator set of the condition language one-to-one.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A boolean literal.
    Boolean(bool),
    /// An integer literal.
    Integer(i64),
    /// A float literal.
    Float(f64),
    /// A string literal (or bare word).
    String(String),
    /// The `null` literal.
    Null,
    /// A qualified path rooted in `input`, e.g. `input.become_user` or
    /// `input["ansible.builtin.package"].name`. The path text preserves the
    /// source spelling, including quote characters.
    Input(String),
    /// A reference to a variable declared in the enclosing policy set. The
    /// text is the full source spelling (the root is the variable name).
    Variable(String),
    /// A list literal; elements may nest.
    List(Vec<Expr>),

    /// `lhs == rhs`
    Equals(Box<BinaryExpr>),
    /// `lhs != rhs`
    NotEquals(Box<BinaryExpr>),
    /// `lhs > rhs`
    GreaterThan(Box<BinaryExpr>),
    /// `lhs < rhs`
    LessThan(Box<BinaryExpr>),
    /// `lhs >= rhs`
    GreaterThanOrEqualTo(Box<BinaryExpr>),
    /// `lhs <= rhs`
    LessThanOrEqualTo(Box<BinaryExpr>),
    /// `lhs in rhs`
    ItemInList(Box<BinaryExpr>),
    /// `lhs not in rhs`
    ItemNotInList(Box<BinaryExpr>),
    /// `lhs contains rhs`
    ListContainsItem(Box<BinaryExpr>),
    /// `lhs not contains rhs`
    ListNotContainsItem(Box<BinaryExpr>),
    /// `lhs has key rhs`
    KeyInDict(Box<BinaryExpr>),
    /// `lhs lacks key rhs`
    KeyNotInDict(Box<BinaryExpr>),
    /// `lhs and rhs`
    And(Box<BinaryExpr>),
    /// `lhs or rhs`
    Or(Box<BinaryExpr>),

    /// `not expr`
    Negate(Box<Expr>),
    /// `expr is defined`
    IsDefined(Box<Expr>),
    /// `expr is not defined`
    IsNotDefined(Box<Expr>),

    /// `lhs is search(..)` / `is match(..)` / `is regex(..)`
    SearchMatches {
        /// The searched value.
        lhs: Box<Expr>,
        /// The search specification.
        search: SearchType,
    },
    /// `lhs is not search(..)` / `is not match(..)` / `is not regex(..)`
    SearchNotMatches {
        /// The searched value.
        lhs: Box<Expr>,
        /// The search specification.
        search: SearchType,
    },
    /// `lhs is select(op, value)`
    Select {
        /// The iterable under test.
        lhs: Box<Expr>,
        /// The predicate specification.
        select: SelectType,
    },
    /// `lhs is not select(op, value)`
    SelectNot {
        /// The iterable under test.
        lhs: Box<Expr>,
        /// The predicate specification.
        select: SelectType,
    },
    /// `lhs is selectattr(key, op, value)`
    SelectAttr {
        /// The iterable under test.
        lhs: Box<Expr>,
        /// The predicate specification.
        selectattr: SelectAttrType,
    },
    /// `lhs is not selectattr(key, op, value)`
    SelectAttrNot {
        /// The iterable under test.
        lhs: Box<Expr>,
        /// The predicate specification.
        selectattr: SelectAttrType,
    },
}

impl Expr {
    /// Returns true for leaf nodes (literals, references, lists).
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Expr::Boolean(_)
                | Expr::Integer(_)
                | Expr::Float(_)
                | Expr::String(_)
                | Expr::Null
                | Expr::Input(_)
                | Expr::Variable(_)
                | Expr::List(_)
        )
    }
}

/// The quantifier wrapping the sub-conditions of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionWhen {
    /// Every sub-condition must hold.
    All,
    /// At least one sub-condition must hold.
    Any,
    /// At least one sub-condition must not hold.
    NotAll,
}

impl ConditionWhen {
    /// The JSON tag used for this quantifier.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            ConditionWhen::All => "AllCondition",
            ConditionWhen::Any => "AnyCondition",
            ConditionWhen::NotAll => "NotAllCondition",
        }
    }
}

/// The root condition of a policy: a quantifier over parsed sub-conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// The quantifier.
    pub when: ConditionWhen,
    /// The sub-conditions, in declaration order.
    pub exprs: Vec<Expr>,
}
