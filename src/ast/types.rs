//! SQL AST types for specquery.
//!
//! Query plans are lowered into this representation before the optimizer and
//! the SQL compiler see them. The AST only covers what plan lowering emits:
//! - Read-only SELECT statements with joins, filters, ordering and windows
//! - Derived tables and `IN (subquery)` restrictions for two-phase paging
//! - Positional parameters for every user supplied value

/// A SELECT query with the clauses plan lowering can produce.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    pub distinct: bool,
    pub projections: Vec<SelectItem>,
    pub from: Vec<TableRef>,
    pub joins: Vec<Join>,
    pub filter: Option<Expression>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

/// A single item in the SELECT projection list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// An expression, optionally aliased: `expr AS alias`.
    Expression {
        expr: Expression,
        alias: Option<String>,
    },
}

/// Table reference in FROM or JOIN position.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// Simple table: `table AS alias`
    Table { name: String, alias: Option<String> },
    /// Derived table: `(SELECT ...) AS alias`
    Subquery {
        query: Box<SelectQuery>,
        alias: String,
    },
}

/// JOIN clause representation.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: TableRef,
    pub condition: Option<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

/// Core expression type. Recursive to support arbitrary nesting.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column reference: `table.column` or just `column`.
    Column { table: Option<String>, name: String },
    /// Literal value.
    Literal(Literal),
    /// Parameter placeholder: `$1`, `$2`, etc.
    Parameter(usize),
    /// Binary operation: `left op right`.
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    /// Aggregate function call: `COUNT(DISTINCT x)`.
    Aggregate {
        name: String,
        args: Vec<Expression>,
        distinct: bool,
    },
    /// expr IN (SELECT ...).
    InSubquery {
        expr: Box<Expression>,
        subquery: Box<SelectQuery>,
        negated: bool,
    },
    /// expr BETWEEN low AND high.
    Between {
        expr: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    /// Nested expression (parenthesized).
    Nested(Box<Expression>),
}

impl Expression {
    /// Qualified column reference.
    pub fn column(table: impl Into<String>, name: impl Into<String>) -> Self {
        Expression::Column {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    pub fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Self {
        Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn eq(self, other: Expression) -> Self {
        Expression::binary(self, BinaryOperator::Eq, other)
    }

    pub fn and(self, other: Expression) -> Self {
        Expression::binary(self, BinaryOperator::And, other)
    }
}

/// Literal values in SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Boolean(bool),
    Integer(i64),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // Logical
    And,
    Or,
    // String
    Like,
}

/// ORDER BY expression.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expression,
    pub asc: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_select_query() {
        let q = SelectQuery::default();
        assert!(!q.distinct);
        assert!(q.projections.is_empty());
        assert!(q.from.is_empty());
        assert!(q.filter.is_none());
        assert!(q.limit.is_none());
    }

    #[test]
    fn test_column_helper_is_qualified() {
        let col = Expression::column("cust_user", "id");
        assert_eq!(
            col,
            Expression::Column {
                table: Some("cust_user".into()),
                name: "id".into(),
            }
        );
    }

    #[test]
    fn test_and_builds_binary_op() {
        let expr = Expression::column("a", "x")
            .eq(Expression::Parameter(1))
            .and(Expression::Literal(Literal::Boolean(true)));
        match expr {
            Expression::BinaryOp { op, .. } => assert_eq!(op, BinaryOperator::And),
            other => panic!("expected AND, got {:?}", other),
        }
    }

    #[test]
    fn test_subquery_table_clone() {
        let inner = SelectQuery {
            distinct: true,
            projections: vec![SelectItem::Expression {
                expr: Expression::column("cust_user", "id"),
                alias: None,
            }],
            from: vec![TableRef::Table {
                name: "cust_user".into(),
                alias: None,
            }],
            ..Default::default()
        };
        let table = TableRef::Subquery {
            query: Box::new(inner),
            alias: "page".into(),
        };
        assert_eq!(table.clone(), table);
    }
}
