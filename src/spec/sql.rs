//! Plan lowering to PostgreSQL.
//!
//! Plans become `ast::SelectQuery` values, pass through the optimizer and are
//! compiled to text. Filter values never appear inline: every one is bound as
//! a positional `$n` parameter.

use anyhow::Result;

use super::error::SpecError;
use super::join::{JoinKind, JoinPath};
use super::page::{BoundedQuery, Direction, OrderTerm, Window};
use super::plan::{CountQuery, IdentifierQuery, PagedPlan, SelectPlan};
use super::predicate::{Comparator, Condition, Operand, PredicateNode};
use crate::ast::{
    compile, format_sql, BinaryOperator, Expression, Join, JoinType, Literal, Optimizer,
    OrderByExpr, SelectItem, SelectQuery, TableRef,
};
use crate::db::CellValue;

const PAGE_ALIAS: &str = "page";

/// A statement ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<CellValue>,
    /// Output column labels in order.
    pub labels: Vec<String>,
    pub ast: SelectQuery,
}

impl CompiledQuery {
    pub fn pretty(&self) -> String {
        format_sql(&self.ast)
    }
}

/// Page statement and count statement for identifier-subquery paging.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedStatements {
    pub page: CompiledQuery,
    pub count: CompiledQuery,
}

#[derive(Default)]
struct Binder {
    params: Vec<CellValue>,
}

impl Binder {
    fn bind(&mut self, value: CellValue) -> Expression {
        self.params.push(value);
        Expression::Parameter(self.params.len())
    }
}

fn join_type(kind: JoinKind) -> JoinType {
    match kind {
        JoinKind::Inner => JoinType::Inner,
        JoinKind::Left => JoinType::Left,
    }
}

fn table(name: &str, alias: &str) -> TableRef {
    TableRef::Table {
        name: name.to_string(),
        alias: Some(alias.to_string()),
    }
}

/// Each many-to-many step becomes two joins: link table, then target.
fn lower_joins(path: &JoinPath) -> (Vec<TableRef>, Vec<Join>) {
    let from = vec![table(&path.root.table, &path.root.alias)];
    let mut joins = Vec::with_capacity(path.steps.len() * 2);
    for step in &path.steps {
        let kind = join_type(step.kind);
        joins.push(Join {
            join_type: kind,
            table: table(&step.join_table, &step.link_alias),
            condition: Some(
                Expression::column(&step.parent_alias, &step.parent_id)
                    .eq(Expression::column(&step.link_alias, &step.source_column)),
            ),
        });
        joins.push(Join {
            join_type: kind,
            table: table(&step.table, &step.alias),
            condition: Some(
                Expression::column(&step.alias, &step.target_id)
                    .eq(Expression::column(&step.link_alias, &step.target_column)),
            ),
        });
    }
    (from, joins)
}

fn root_id(path: &JoinPath) -> Expression {
    Expression::column(&path.root.alias, &path.root.id_column)
}

fn lower_condition(
    condition: &Condition,
    joins: &JoinPath,
    binder: &mut Binder,
) -> Result<Expression, SpecError> {
    let alias = joins
        .alias_of(&condition.field.relations)
        .ok_or_else(|| SpecError::UndeclaredJoin {
            path: condition.field.path.clone(),
            relation: condition.field.relations.to_string(),
        })?;
    let column = Expression::column(alias, &condition.field.descriptor.column);

    Ok(match &condition.operand {
        Operand::Pattern(pattern) => Expression::binary(
            column,
            BinaryOperator::Like,
            binder.bind(CellValue::text(pattern.as_str())),
        ),
        Operand::Range { low, high } => Expression::Between {
            expr: Box::new(column),
            low: Box::new(binder.bind(low.clone())),
            high: Box::new(binder.bind(high.clone())),
            negated: false,
        },
        Operand::Value(value) => {
            let op = match condition.comparator {
                Comparator::NotEq => BinaryOperator::NotEq,
                Comparator::Lt => BinaryOperator::Lt,
                Comparator::LtEq => BinaryOperator::LtEq,
                Comparator::Gt => BinaryOperator::Gt,
                Comparator::GtEq => BinaryOperator::GtEq,
                _ => BinaryOperator::Eq,
            };
            Expression::binary(column, op, binder.bind(value.clone()))
        }
    })
}

fn lower_predicate(
    node: &PredicateNode,
    joins: &JoinPath,
    binder: &mut Binder,
) -> Result<Expression, SpecError> {
    match node {
        PredicateNode::Always => Ok(Expression::Literal(Literal::Boolean(true))),
        PredicateNode::Condition(condition) => lower_condition(condition, joins, binder),
        PredicateNode::And(children) => {
            let mut lowered: Option<Expression> = None;
            for child in children {
                let expr = lower_predicate(child, joins, binder)?;
                lowered = Some(match lowered {
                    Some(acc) => acc.and(expr),
                    None => expr,
                });
            }
            Ok(lowered.unwrap_or(Expression::Literal(Literal::Boolean(true))))
        }
        PredicateNode::Or(children) => {
            let mut lowered: Option<Expression> = None;
            for child in children {
                let expr = lower_predicate(child, joins, binder)?;
                lowered = Some(match lowered {
                    Some(acc) => Expression::binary(acc, BinaryOperator::Or, expr),
                    None => expr,
                });
            }
            Ok(Expression::Nested(Box::new(
                lowered.unwrap_or(Expression::Literal(Literal::Boolean(false))),
            )))
        }
    }
}

fn lower_order(order: &[OrderTerm]) -> Vec<OrderByExpr> {
    order
        .iter()
        .map(|term| OrderByExpr {
            expr: Expression::column(&term.alias, &term.field.descriptor.column),
            asc: Some(term.direction == Direction::Asc),
        })
        .collect()
}

fn apply_window(select: &mut SelectQuery, window: Option<Window>) {
    if let Some(window) = window {
        select.limit = Some(Expression::Literal(Literal::Integer(window.limit as i64)));
        if window.offset > 0 {
            select.offset = Some(Expression::Literal(Literal::Integer(window.offset as i64)));
        }
    }
}

/// `SELECT DISTINCT root.id ...`, wrapped in a derived table when it carries
/// sort columns and a window, so the `IN` list stays single-column.
fn lower_identifiers(ids: &IdentifierQuery, binder: &mut Binder) -> Result<SelectQuery, SpecError> {
    let (from, joins) = lower_joins(&ids.joins);
    let filter = lower_predicate(&ids.predicate, &ids.joins, binder)?;
    let mut inner = SelectQuery {
        distinct: true,
        projections: vec![SelectItem::Expression {
            expr: root_id(&ids.joins),
            alias: Some("id".to_string()),
        }],
        from,
        joins,
        filter: Some(filter),
        ..Default::default()
    };
    if ids.window.is_none() {
        return Ok(inner);
    }

    let id_column = &ids.joins.root.id_column;
    for (n, term) in ids
        .order
        .iter()
        .filter(|t| !(t.alias == ids.joins.root.alias && &t.field.descriptor.column == id_column))
        .enumerate()
    {
        inner.projections.push(SelectItem::Expression {
            expr: Expression::column(&term.alias, &term.field.descriptor.column),
            alias: Some(format!("sort_{}", n + 1)),
        });
    }
    inner.order_by = lower_order(&ids.order);
    apply_window(&mut inner, ids.window);

    Ok(SelectQuery {
        projections: vec![SelectItem::Expression {
            expr: Expression::column(PAGE_ALIAS, "id"),
            alias: None,
        }],
        from: vec![TableRef::Subquery {
            query: Box::new(inner),
            alias: PAGE_ALIAS.to_string(),
        }],
        ..Default::default()
    })
}

fn lower_select(plan: &SelectPlan, binder: &mut Binder) -> Result<SelectQuery, SpecError> {
    let (from, joins) = lower_joins(&plan.joins);
    let projections = plan
        .columns
        .columns
        .iter()
        .map(|c| SelectItem::Expression {
            expr: Expression::column(&c.alias, &c.field.descriptor.column),
            alias: (c.label != c.field.descriptor.column).then(|| c.label.clone()),
        })
        .collect();

    let mut filter = lower_predicate(&plan.predicate, &plan.joins, binder)?;
    if let Some(ids) = &plan.restriction {
        filter = filter.and(Expression::InSubquery {
            expr: Box::new(root_id(&plan.joins)),
            subquery: Box::new(lower_identifiers(ids, binder)?),
            negated: false,
        });
    }

    let mut select = SelectQuery {
        projections,
        from,
        joins,
        filter: Some(filter),
        order_by: lower_order(&plan.order),
        ..Default::default()
    };
    apply_window(&mut select, plan.window);
    Ok(select)
}

fn finish(ast: SelectQuery, binder: Binder, labels: Vec<String>) -> Result<CompiledQuery> {
    let ast = Optimizer::with_defaults().optimize(ast)?;
    let sql = compile(&ast);
    tracing::debug!(sql = %sql, params = binder.params.len(), "plan compiled");
    Ok(CompiledQuery {
        sql,
        params: binder.params,
        labels,
        ast,
    })
}

pub fn compile_select(plan: &SelectPlan) -> Result<CompiledQuery> {
    let mut binder = Binder::default();
    let ast = lower_select(plan, &mut binder)?;
    finish(ast, binder, plan.columns.labels())
}

pub fn compile_bounded(query: &BoundedQuery) -> Result<CompiledQuery> {
    compile_select(&query.plan)
}

pub fn compile_count(query: &CountQuery) -> Result<CompiledQuery> {
    let mut binder = Binder::default();
    let (from, joins) = lower_joins(&query.joins);
    let filter = lower_predicate(&query.predicate, &query.joins, &mut binder)?;
    let ast = SelectQuery {
        projections: vec![SelectItem::Expression {
            expr: Expression::Aggregate {
                name: "COUNT".to_string(),
                args: vec![root_id(&query.joins)],
                distinct: true,
            },
            alias: Some("total".to_string()),
        }],
        from,
        joins,
        filter: Some(filter),
        ..Default::default()
    };
    finish(ast, binder, vec!["total".to_string()])
}

pub fn compile_paged(plan: &PagedPlan) -> Result<PagedStatements> {
    Ok(PagedStatements {
        page: compile_select(&plan.expansion)?,
        count: compile_count(&plan.count)?,
    })
}
