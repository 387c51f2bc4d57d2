/// AST → SQL compiler.
///
/// Converts the lowered AST into a single-line PostgreSQL statement. Values
/// never appear inline except for window bounds; filter values are emitted
/// as `$n` placeholders and travel separately as bind parameters.
use super::types::*;

/// Compile a SELECT AST into a PostgreSQL SQL string.
pub fn compile(select: &SelectQuery) -> String {
    let mut parts = Vec::new();

    // SELECT [DISTINCT]
    let mut select_clause = String::from("SELECT ");
    if select.distinct {
        select_clause.push_str("DISTINCT ");
    }

    if select.projections.is_empty() {
        select_clause.push('*');
    } else {
        let items: Vec<String> = select.projections.iter().map(compile_select_item).collect();
        select_clause.push_str(&items.join(", "));
    }
    parts.push(select_clause);

    // FROM
    if !select.from.is_empty() {
        let tables: Vec<String> = select.from.iter().map(compile_table_ref).collect();
        parts.push(format!("FROM {}", tables.join(", ")));
    }

    // JOINs
    for join in &select.joins {
        parts.push(compile_join(join));
    }

    // WHERE
    if let Some(ref filter) = select.filter {
        parts.push(format!("WHERE {}", compile_expr(filter)));
    }

    // ORDER BY
    if !select.order_by.is_empty() {
        let orders: Vec<String> = select.order_by.iter().map(compile_order_by).collect();
        parts.push(format!("ORDER BY {}", orders.join(", ")));
    }

    // LIMIT
    if let Some(ref limit) = select.limit {
        parts.push(format!("LIMIT {}", compile_expr(limit)));
    }

    // OFFSET
    if let Some(ref offset) = select.offset {
        parts.push(format!("OFFSET {}", compile_expr(offset)));
    }

    parts.join(" ")
}

pub(crate) fn compile_select_item(item: &SelectItem) -> String {
    let SelectItem::Expression { expr, alias } = item;
    let expr_str = compile_expr(expr);
    match alias {
        Some(a) => format!("{} AS {}", expr_str, quote_ident(a)),
        None => expr_str,
    }
}

pub(crate) fn compile_table_ref(table: &TableRef) -> String {
    match table {
        TableRef::Table { name, alias } => match alias {
            Some(a) if a != name => format!("{} AS {}", quote_ident(name), quote_ident(a)),
            _ => quote_ident(name),
        },
        TableRef::Subquery { query, alias } => {
            format!("({}) AS {}", compile(query), quote_ident(alias))
        }
    }
}

pub(crate) fn join_keyword(join_type: JoinType) -> &'static str {
    match join_type {
        JoinType::Inner => "JOIN",
        JoinType::Left => "LEFT JOIN",
    }
}

fn compile_join(join: &Join) -> String {
    let table_str = compile_table_ref(&join.table);
    let condition_str = match &join.condition {
        Some(expr) => format!(" ON {}", compile_expr(expr)),
        None => String::new(),
    };
    format!("{} {}{}", join_keyword(join.join_type), table_str, condition_str)
}

pub(crate) fn binary_operator(op: BinaryOperator) -> &'static str {
    match op {
        BinaryOperator::Eq => "=",
        BinaryOperator::NotEq => "<>",
        BinaryOperator::Lt => "<",
        BinaryOperator::LtEq => "<=",
        BinaryOperator::Gt => ">",
        BinaryOperator::GtEq => ">=",
        BinaryOperator::And => "AND",
        BinaryOperator::Or => "OR",
        BinaryOperator::Like => "LIKE",
    }
}

pub(crate) fn compile_expr(expr: &Expression) -> String {
    match expr {
        Expression::Column { table, name } => match table {
            Some(t) => format!("{}.{}", quote_ident(t), quote_ident(name)),
            None => quote_ident(name),
        },
        Expression::Literal(lit) => compile_literal(lit),
        Expression::Parameter(idx) => format!("${}", idx),
        Expression::BinaryOp { left, op, right } => {
            format!(
                "{} {} {}",
                compile_expr(left),
                binary_operator(*op),
                compile_expr(right)
            )
        }
        Expression::Aggregate {
            name,
            args,
            distinct,
        } => {
            let distinct_str = if *distinct { "DISTINCT " } else { "" };
            let args_str: Vec<String> = args.iter().map(compile_expr).collect();
            format!("{}({}{})", name, distinct_str, args_str.join(", "))
        }
        Expression::InSubquery {
            expr,
            subquery,
            negated,
        } => {
            let not_str = if *negated { "NOT " } else { "" };
            format!(
                "{} {}IN ({})",
                compile_expr(expr),
                not_str,
                compile(subquery)
            )
        }
        Expression::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let not_str = if *negated { "NOT " } else { "" };
            format!(
                "{} {}BETWEEN {} AND {}",
                compile_expr(expr),
                not_str,
                compile_expr(low),
                compile_expr(high)
            )
        }
        Expression::Nested(expr) => format!("({})", compile_expr(expr)),
    }
}

fn compile_literal(lit: &Literal) -> String {
    match lit {
        Literal::Boolean(true) => "TRUE".to_string(),
        Literal::Boolean(false) => "FALSE".to_string(),
        Literal::Integer(i) => i.to_string(),
    }
}

pub(crate) fn compile_order_by(order: &OrderByExpr) -> String {
    let mut s = compile_expr(&order.expr);
    match order.asc {
        Some(true) => s.push_str(" ASC"),
        Some(false) => s.push_str(" DESC"),
        None => {}
    }
    s
}

/// PostgreSQL reserved words, which cannot appear as bare identifiers.
const RESERVED: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "binary", "both", "case", "cast", "check", "collate", "collation",
    "column", "concurrently", "constraint", "create", "cross", "current_catalog",
    "current_date", "current_role", "current_schema", "current_time", "current_timestamp",
    "current_user", "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant", "group",
    "having", "ilike", "in", "initially", "inner", "intersect", "into", "is", "isnull", "join",
    "lateral", "leading", "left", "like", "limit", "localtime", "localtimestamp", "natural",
    "not", "notnull", "null", "offset", "on", "only", "or", "order", "outer", "overlaps",
    "placing", "primary", "references", "returning", "right", "select", "session_user",
    "similar", "some", "symmetric", "system_user", "table", "tablesample", "then", "to",
    "trailing", "true", "union", "unique", "user", "using", "variadic", "verbose", "when",
    "where", "window", "with",
];

/// Quote an identifier unless it is a plain lower-case name. Schema files may
/// name tables `user` or `Order`, and output labels are dotted field paths.
pub(crate) fn quote_ident(ident: &str) -> String {
    let plain = !ident.is_empty()
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !ident.starts_with(|c: char| c.is_ascii_digit())
        && !RESERVED.contains(&ident);
    if plain {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}
