/// AST optimization and analysis.
///
/// Lowering is deliberately naive: it wraps every OR group in parentheses and
/// represents an omitted predicate as a literal `TRUE`. Passes clean that up
/// before compilation. Each pass takes a query, returns a possibly modified
/// query, and preserves semantics. Passes can be composed and ordered.
use anyhow::Result;

use super::types::*;

/// A single optimization or transformation pass over a query AST.
///
/// Passes should be pure functions: given the same input, they produce
/// the same output. This makes them composable and testable.
pub trait OptimizationPass: Send + Sync {
    /// Unique name identifying this pass.
    fn name(&self) -> &str;

    /// Optional description of what this pass does.
    fn description(&self) -> &str {
        ""
    }

    /// Transform a query, returning the optimized version.
    /// Returns the query unchanged if no optimization applies.
    fn transform(&self, query: SelectQuery) -> Result<SelectQuery>;
}

/// Manages and executes a pipeline of optimization passes.
#[derive(Default)]
pub struct Optimizer {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an optimizer with the default set of passes.
    pub fn with_defaults() -> Self {
        let mut opt = Self::new();
        opt.add_pass(Box::new(FoldConstantTruth));
        opt.add_pass(Box::new(RemoveRedundantNesting));
        opt
    }

    /// Add an optimization pass to the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    /// Run all optimization passes on a query in order.
    pub fn optimize(&self, query: SelectQuery) -> Result<SelectQuery> {
        let mut current = query;
        for pass in &self.passes {
            current = pass.transform(current)?;
            tracing::trace!(pass = pass.name(), "optimization pass applied");
        }
        Ok(current)
    }

    /// List registered pass names.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }
}

/// Applies `f` to the filter of `select` and of every nested subquery.
fn map_filters(mut select: SelectQuery, f: &dyn Fn(Expression) -> Expression) -> SelectQuery {
    select.filter = select.filter.map(|e| map_subqueries(f(e), f));
    select.from = select
        .from
        .into_iter()
        .map(|t| match t {
            TableRef::Subquery { query, alias } => TableRef::Subquery {
                query: Box::new(map_filters(*query, f)),
                alias,
            },
            other => other,
        })
        .collect();
    select
}

fn map_subqueries(expr: Expression, f: &dyn Fn(Expression) -> Expression) -> Expression {
    match expr {
        Expression::InSubquery {
            expr,
            subquery,
            negated,
        } => Expression::InSubquery {
            expr,
            subquery: Box::new(map_filters(*subquery, f)),
            negated,
        },
        Expression::BinaryOp { left, op, right } => Expression::BinaryOp {
            left: Box::new(map_subqueries(*left, f)),
            op,
            right: Box::new(map_subqueries(*right, f)),
        },
        Expression::Nested(inner) => Expression::Nested(Box::new(map_subqueries(*inner, f))),
        other => other,
    }
}

/// Built-in pass: removes unnecessary nested/parenthesized expressions.
///
/// Transforms `((x))` → `(x)` and `(col)` → `col`.
struct RemoveRedundantNesting;

impl OptimizationPass for RemoveRedundantNesting {
    fn name(&self) -> &str {
        "remove_redundant_nesting"
    }

    fn description(&self) -> &str {
        "Removes unnecessary parenthesized expressions"
    }

    fn transform(&self, query: SelectQuery) -> Result<SelectQuery> {
        Ok(map_filters(query, &simplify_nesting))
    }
}

fn simplify_nesting(expr: Expression) -> Expression {
    match expr {
        Expression::Nested(inner) => match *inner {
            Expression::Nested(_) => simplify_nesting(*inner),
            Expression::Column { .. } | Expression::Literal(_) | Expression::Parameter(_) => {
                *inner
            }
            // Keep nesting for complex expressions (may be needed for precedence)
            other => Expression::Nested(Box::new(simplify_nesting(other))),
        },
        Expression::BinaryOp { left, op, right } => Expression::BinaryOp {
            left: Box::new(simplify_nesting(*left)),
            op,
            right: Box::new(simplify_nesting(*right)),
        },
        other => other,
    }
}

/// Built-in pass: folds `TRUE` out of conjunctions and drops `WHERE TRUE`.
struct FoldConstantTruth;

impl OptimizationPass for FoldConstantTruth {
    fn name(&self) -> &str {
        "fold_constant_truth"
    }

    fn description(&self) -> &str {
        "Removes TRUE operands from AND chains and empty WHERE clauses"
    }

    fn transform(&self, query: SelectQuery) -> Result<SelectQuery> {
        let mut folded = map_filters(query, &fold_truth);
        if matches!(folded.filter, Some(Expression::Literal(Literal::Boolean(true)))) {
            folded.filter = None;
        }
        Ok(folded)
    }
}

fn is_true(expr: &Expression) -> bool {
    matches!(expr, Expression::Literal(Literal::Boolean(true)))
}

fn fold_truth(expr: Expression) -> Expression {
    match expr {
        Expression::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let left = fold_truth(*left);
            let right = fold_truth(*right);
            if is_true(&left) {
                right
            } else if is_true(&right) {
                left
            } else {
                left.and(right)
            }
        }
        Expression::BinaryOp {
            left,
            op: BinaryOperator::Or,
            right,
        } => {
            let left = fold_truth(*left);
            let right = fold_truth(*right);
            if is_true(&left) || is_true(&right) {
                Expression::Literal(Literal::Boolean(true))
            } else {
                Expression::binary(left, BinaryOperator::Or, right)
            }
        }
        Expression::Nested(inner) => match fold_truth(*inner) {
            lit @ Expression::Literal(_) => lit,
            other => Expression::Nested(Box::new(other)),
        },
        other => other,
    }
}

/// Analyze a query and return metadata about its structure.
pub fn analyze_query(query: &SelectQuery) -> QueryAnalysis {
    let mut analysis = QueryAnalysis::default();
    analyze_select(query, &mut analysis, 0);
    analysis
}

fn analyze_select(s: &SelectQuery, analysis: &mut QueryAnalysis, depth: usize) {
    if depth == 0 {
        analysis.column_count = s.projections.len();
        analysis.selects_wildcard = s.projections.is_empty();
        analysis.has_limit = s.limit.is_some();
        analysis.has_order_by = !s.order_by.is_empty();
    }
    if s.distinct {
        analysis.has_distinct = true;
    }
    analysis.join_count += s.joins.len();
    for join in &s.joins {
        match join.join_type {
            JoinType::Inner => analysis.inner_joins += 1,
            JoinType::Left => analysis.left_joins += 1,
        }
    }
    for table in &s.from {
        if let TableRef::Subquery { query, .. } = table {
            analysis.has_subqueries = true;
            analyze_select(query, analysis, depth + 1);
        }
    }
    for SelectItem::Expression { expr, .. } in &s.projections {
        check_expr_features(expr, analysis, depth);
    }
    if let Some(ref filter) = s.filter {
        check_expr_features(filter, analysis, depth);
    }
}

fn check_expr_features(expr: &Expression, analysis: &mut QueryAnalysis, depth: usize) {
    match expr {
        Expression::InSubquery { subquery, .. } => {
            analysis.has_subqueries = true;
            analyze_select(subquery, analysis, depth + 1);
        }
        Expression::Aggregate { args, .. } => {
            analysis.has_aggregation = true;
            for arg in args {
                check_expr_features(arg, analysis, depth);
            }
        }
        Expression::Parameter(_) => analysis.parameter_count += 1,
        Expression::BinaryOp { left, right, .. } => {
            check_expr_features(left, analysis, depth);
            check_expr_features(right, analysis, depth);
        }
        Expression::Between { expr, low, high, .. } => {
            check_expr_features(expr, analysis, depth);
            check_expr_features(low, analysis, depth);
            check_expr_features(high, analysis, depth);
        }
        Expression::Nested(expr) => check_expr_features(expr, analysis, depth),
        _ => {}
    }
}

/// Structural metadata about a query.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct QueryAnalysis {
    /// Top-level projection width.
    pub column_count: usize,
    pub selects_wildcard: bool,
    pub has_distinct: bool,
    /// Joins across the statement, subqueries included.
    pub join_count: usize,
    pub inner_joins: usize,
    pub left_joins: usize,
    pub has_aggregation: bool,
    pub has_subqueries: bool,
    pub has_order_by: bool,
    /// Top-level LIMIT present.
    pub has_limit: bool,
    pub parameter_count: usize,
}
