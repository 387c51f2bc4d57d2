use serde::Serialize;

use crate::ast::{analyze_query, QueryAnalysis};
use crate::catalog::{QueryVariant, Strategy, VariantRequest};
use crate::spec::{CompiledQuery, Schema, SpecError};

/// Where a variant's page window is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PagingLocation {
    Unpaged,
    /// LIMIT/OFFSET on a single-row-per-user statement.
    Database,
    /// LIMIT/OFFSET on the distinct identifier subquery.
    IdentifierSubquery,
    /// Refused at build time.
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementReport {
    pub label: String,
    pub sql: String,
    #[serde(skip)]
    pub pretty: String,
    pub params: usize,
    pub columns: usize,
    pub joins: usize,
    pub inner_joins: usize,
    pub left_joins: usize,
    pub distinct: bool,
    pub subqueries: bool,
}

impl StatementReport {
    fn new(label: &str, query: &CompiledQuery) -> (Self, QueryAnalysis) {
        let analysis = analyze_query(&query.ast);
        let report = Self {
            label: label.to_string(),
            sql: query.sql.clone(),
            pretty: query.pretty(),
            params: query.params.len(),
            columns: analysis.column_count,
            joins: analysis.join_count,
            inner_joins: analysis.inner_joins,
            left_joins: analysis.left_joins,
            distinct: analysis.has_distinct,
            subqueries: analysis.has_subqueries,
        };
        (report, analysis)
    }
}

/// The SQL a variant generates, annotated with its performance shape.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub variant: String,
    pub route: String,
    pub optimized: bool,
    pub strategy: Strategy,
    pub paging: PagingLocation,
    pub statements: Vec<StatementReport>,
    pub notes: Vec<String>,
    pub error: Option<String>,
}

pub fn report(variant: &QueryVariant, schema: &Schema, request: &VariantRequest) -> QueryReport {
    let mut report = QueryReport {
        variant: variant.name.clone(),
        route: variant.route.clone(),
        optimized: variant.optimized,
        strategy: variant.strategy,
        paging: PagingLocation::Unpaged,
        statements: Vec::new(),
        notes: Vec::new(),
        error: None,
    };

    let plan = match variant.plan(schema, request) {
        Ok(plan) => plan,
        Err(err) => {
            if let Some(SpecError::UnsafePagination { relation }) = err.downcast_ref::<SpecError>() {
                report.paging = PagingLocation::Rejected;
                report.notes.push(format!(
                    "windowing rows flattened across `{}` would split users across pages",
                    relation
                ));
            }
            report.error = Some(err.to_string());
            return report;
        }
    };

    let root_fields = schema.root().fields.len();
    for (label, query) in &plan.statements {
        let (statement, analysis) = StatementReport::new(label, query);
        if label == "count" {
            report.notes.push("total counted with COUNT(DISTINCT id)".to_string());
        } else {
            if !variant.optimized && statement.columns >= root_fields {
                report.notes.push(format!(
                    "selects all {} columns of `{}`",
                    statement.columns,
                    schema.root().table
                ));
            }
            if statement.left_joins > 0 && !analysis.has_subqueries {
                report
                    .notes
                    .push("one row per related child, regrouped by id".to_string());
            }
            if analysis.has_subqueries {
                report
                    .notes
                    .push("related filters run in an identifier subquery".to_string());
            }
            report.paging = match variant.strategy {
                Strategy::Bounded => PagingLocation::Database,
                Strategy::GroupedPage => PagingLocation::IdentifierSubquery,
                Strategy::List | Strategy::Grouped => PagingLocation::Unpaged,
            };
        }
        report.statements.push(statement);
    }
    if report.paging == PagingLocation::IdentifierSubquery {
        report
            .notes
            .push("page window applies to distinct user ids, related rows re-expanded for that page only".to_string());
    }
    report
}

/// Human-readable report.
pub fn render(report: &QueryReport, pretty: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} ({})\n", report.variant, report.route));
    out.push_str(&format!(
        "  strategy: {:?}, paging: {:?}, optimized: {}\n",
        report.strategy, report.paging, report.optimized
    ));
    for statement in &report.statements {
        out.push_str(&format!(
            "\n-- {} ({} columns, {} joins: {} inner, {} left, {} params)\n",
            statement.label,
            statement.columns,
            statement.joins,
            statement.inner_joins,
            statement.left_joins,
            statement.params
        ));
        if pretty {
            out.push_str(&statement.pretty);
        } else {
            out.push_str(&statement.sql);
        }
        out.push('\n');
    }
    if let Some(error) = &report.error {
        out.push_str(&format!("\nerror: {}\n", error));
    }
    for note in &report.notes {
        out.push_str(&format!("  * {}\n", note));
    }
    out
}

pub fn format_duration_ms(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{:.2}ms", ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::find_variant;
    use crate::service::RoleSearch;

    fn roles() -> VariantRequest {
        VariantRequest {
            roles: RoleSearch {
                role: Some("first".into()),
                permission: Some("first".into()),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_naive_variant_flagged() {
        let schema = Schema::user_role_permission();
        let report = report(&find_variant("sfa").unwrap(), &schema, &VariantRequest::default());
        assert_eq!(report.paging, PagingLocation::Unpaged);
        assert_eq!(report.statements[0].columns, 7);
        assert!(report.notes.iter().any(|n| n.contains("all 7 columns")));
    }

    #[test]
    fn test_rejected_variant() {
        let schema = Schema::user_role_permission();
        let report = report(&find_variant("fbrapp").unwrap(), &schema, &roles());
        assert_eq!(report.paging, PagingLocation::Rejected);
        assert!(report.statements.is_empty());
        assert!(report.error.is_some());
    }

    #[test]
    fn test_two_phase_variant() {
        let schema = Schema::user_role_permission();
        let report = report(&find_variant("fbrapo").unwrap(), &schema, &roles());
        assert_eq!(report.paging, PagingLocation::IdentifierSubquery);
        assert_eq!(report.statements.len(), 2);
        assert!(report.statements[0].subqueries);
        assert_eq!(report.statements[1].label, "count");
        let text = render(&report, false);
        assert!(text.contains("role-permission-optimized (/fbrapo)"));
        assert!(text.contains("COUNT(DISTINCT"));
    }

    #[test]
    fn test_report_serializes() {
        let schema = Schema::user_role_permission();
        let report = report(&find_variant("ssqo").unwrap(), &schema, &VariantRequest::default());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["paging"], "database");
        assert_eq!(json["strategy"], "bounded");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(12.345), "12.35ms");
        assert_eq!(format_duration_ms(1500.0), "1.50s");
    }
}
