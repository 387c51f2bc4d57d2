/// SQL pretty-printer.
///
/// Emits the same statement as the compiler, one clause per line, with
/// derived tables and `IN (subquery)` restrictions indented beneath the
/// clause that owns them. Used for the annotated query reports.
use super::compiler::{
    binary_operator, compile_expr, compile_order_by, compile_select_item, compile_table_ref,
    join_keyword, quote_ident,
};
use super::types::*;

const INDENT: &str = "    ";

/// Format a SELECT AST into pretty-printed PostgreSQL SQL.
pub fn format_sql(select: &SelectQuery) -> String {
    format_select(select, 0)
}

fn indent(level: usize) -> String {
    INDENT.repeat(level)
}

fn format_select(select: &SelectQuery, depth: usize) -> String {
    let prefix = indent(depth);
    let mut parts: Vec<String> = Vec::new();

    let mut select_clause = format!("{}SELECT", prefix);
    if select.distinct {
        select_clause.push_str(" DISTINCT");
    }
    match select.projections.len() {
        0 => select_clause.push_str(" *"),
        1 => select_clause.push_str(&format!(" {}", compile_select_item(&select.projections[0]))),
        n => {
            for (i, item) in select.projections.iter().enumerate() {
                let comma = if i < n - 1 { "," } else { "" };
                select_clause.push_str(&format!(
                    "\n{}{}{}{}",
                    prefix,
                    INDENT,
                    compile_select_item(item),
                    comma
                ));
            }
        }
    }
    parts.push(select_clause);

    if !select.from.is_empty() {
        let tables: Vec<String> = select
            .from
            .iter()
            .map(|t| format_table_ref(t, depth))
            .collect();
        parts.push(format!("{}FROM {}", prefix, tables.join(", ")));
    }

    for join in &select.joins {
        let condition = match &join.condition {
            Some(expr) => format!(" ON {}", compile_expr(expr)),
            None => String::new(),
        };
        parts.push(format!(
            "{}{} {}{}",
            prefix,
            join_keyword(join.join_type),
            format_table_ref(&join.table, depth),
            condition
        ));
    }

    if let Some(ref filter) = select.filter {
        parts.push(format!("{}WHERE {}", prefix, format_expr(filter, depth)));
    }

    if !select.order_by.is_empty() {
        let orders: Vec<String> = select.order_by.iter().map(compile_order_by).collect();
        parts.push(format!("{}ORDER BY {}", prefix, orders.join(", ")));
    }

    if let Some(ref limit) = select.limit {
        parts.push(format!("{}LIMIT {}", prefix, compile_expr(limit)));
    }

    if let Some(ref offset) = select.offset {
        parts.push(format!("{}OFFSET {}", prefix, compile_expr(offset)));
    }

    parts.join("\n")
}

fn format_table_ref(table: &TableRef, depth: usize) -> String {
    match table {
        TableRef::Subquery { query, alias } => format!(
            "(\n{}\n{}) AS {}",
            format_select(query, depth + 1),
            indent(depth),
            quote_ident(alias)
        ),
        other => compile_table_ref(other),
    }
}

fn format_expr(expr: &Expression, depth: usize) -> String {
    match expr {
        Expression::InSubquery {
            expr,
            subquery,
            negated,
        } => {
            let not_str = if *negated { "NOT " } else { "" };
            format!(
                "{} {}IN (\n{}\n{})",
                compile_expr(expr),
                not_str,
                format_select(subquery, depth + 1),
                indent(depth)
            )
        }
        Expression::BinaryOp { left, op, right } => format!(
            "{} {} {}",
            format_expr(left, depth),
            binary_operator(*op),
            format_expr(right, depth)
        ),
        Expression::Nested(inner) => format!("({})", format_expr(inner, depth)),
        other => compile_expr(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str) -> SelectItem {
        SelectItem::Expression {
            expr: Expression::column("cust_user", name),
            alias: None,
        }
    }

    #[test]
    fn test_format_puts_clauses_on_lines() {
        let q = SelectQuery {
            projections: vec![column("id"), column("username")],
            from: vec![TableRef::Table {
                name: "cust_user".into(),
                alias: None,
            }],
            filter: Some(Expression::binary(
                Expression::column("cust_user", "username"),
                BinaryOperator::Like,
                Expression::Parameter(1),
            )),
            limit: Some(Expression::Literal(Literal::Integer(10))),
            ..Default::default()
        };
        let formatted = format_sql(&q);
        let lines: Vec<&str> = formatted.lines().collect();
        assert_eq!(lines[0], "SELECT");
        assert_eq!(lines[1], "    cust_user.id,");
        assert_eq!(lines[2], "    cust_user.username");
        assert_eq!(lines[3], "FROM cust_user");
        assert_eq!(lines[4], "WHERE cust_user.username LIKE $1");
        assert_eq!(lines[5], "LIMIT 10");
    }

    #[test]
    fn test_format_single_projection_inline() {
        let q = SelectQuery {
            projections: vec![column("id")],
            from: vec![TableRef::Table {
                name: "cust_user".into(),
                alias: None,
            }],
            ..Default::default()
        };
        assert_eq!(format_sql(&q), "SELECT cust_user.id\nFROM cust_user");
    }

    #[test]
    fn test_format_indents_subquery() {
        let inner = SelectQuery {
            projections: vec![column("id")],
            from: vec![TableRef::Table {
                name: "cust_user".into(),
                alias: None,
            }],
            ..Default::default()
        };
        let q = SelectQuery {
            projections: vec![column("username")],
            from: vec![TableRef::Table {
                name: "cust_user".into(),
                alias: None,
            }],
            filter: Some(Expression::InSubquery {
                expr: Box::new(Expression::column("cust_user", "id")),
                subquery: Box::new(inner),
                negated: false,
            }),
            ..Default::default()
        };
        let formatted = format_sql(&q);
        assert!(formatted.contains("WHERE cust_user.id IN (\n    SELECT cust_user.id\n    FROM cust_user\n)"));
    }
}
