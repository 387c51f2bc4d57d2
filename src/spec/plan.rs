//! Query plans and the `QuerySpec` builder.
//!
//! A plan is a plain value: joins, columns, predicate, optional identifier
//! restriction, ordering and window. Storage engines execute plans; the
//! `sql` module lowers them to PostgreSQL.

use super::error::SpecError;
use super::join::{JoinPath, JoinPlanner};
use super::page::{BoundedQuery, OrderTerm, PageDescriptor, Paginator, Window};
use super::predicate::{Criterion, PredicateBuilder, PredicateNode};
use super::projection::{ColumnSet, ProjectionEngine, ProjectionShape};
use super::schema::Schema;

/// Selects the distinct root identifiers matching a predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierQuery {
    pub joins: JoinPath,
    pub predicate: PredicateNode,
    pub order: Vec<OrderTerm>,
    pub window: Option<Window>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectPlan {
    pub joins: JoinPath,
    pub columns: ColumnSet,
    pub predicate: PredicateNode,
    /// Keep only roots whose identifier the subquery returns.
    pub restriction: Option<IdentifierQuery>,
    pub order: Vec<OrderTerm>,
    pub window: Option<Window>,
}

/// `COUNT(DISTINCT root.id)` over a predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct CountQuery {
    pub joins: JoinPath,
    pub predicate: PredicateNode,
}

/// Identifier-subquery paging: the re-expansion plan plus its total count.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedPlan {
    pub expansion: SelectPlan,
    pub count: CountQuery,
    pub page: PageDescriptor,
}

/// AND two predicates, dropping `Always` and flattening nested ANDs.
pub fn combine(left: PredicateNode, right: PredicateNode) -> PredicateNode {
    match (left, right) {
        (PredicateNode::Always, other) | (other, PredicateNode::Always) => other,
        (PredicateNode::And(mut a), PredicateNode::And(b)) => {
            a.extend(b);
            PredicateNode::And(a)
        }
        (PredicateNode::And(mut a), other) => {
            a.push(other);
            PredicateNode::And(a)
        }
        (other, PredicateNode::And(mut b)) => {
            b.insert(0, other);
            PredicateNode::And(b)
        }
        (a, b) => PredicateNode::And(vec![a, b]),
    }
}

/// Request builder tying predicate, joins, projection and paging together.
#[derive(Debug, Clone)]
pub struct QuerySpec<'a> {
    schema: &'a Schema,
    criteria: Vec<Criterion>,
    fields: Vec<String>,
    page: Option<PageDescriptor>,
}

impl<'a> QuerySpec<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            criteria: Vec::new(),
            fields: Vec::new(),
            page: None,
        }
    }

    pub fn filter(mut self, criteria: impl IntoIterator<Item = Criterion>) -> Self {
        self.criteria.extend(criteria);
        self
    }

    /// Output fields. Leaving this empty selects every root field.
    pub fn project<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.fields = fields.iter().map(|f| f.as_ref().to_string()).collect();
        self
    }

    pub fn page(mut self, page: PageDescriptor) -> Self {
        self.page = Some(page);
        self
    }

    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    pub fn shape(&self) -> Result<ProjectionShape, SpecError> {
        if self.fields.is_empty() {
            Ok(ProjectionShape::entity(self.schema))
        } else {
            ProjectionShape::new(self.schema, &self.fields)
        }
    }

    pub fn predicate(&self) -> Result<PredicateNode, SpecError> {
        PredicateBuilder::new(self.schema).build(&self.criteria)
    }

    /// Unbounded plan.
    ///
    /// A flat projection joins its predicate paths directly, so rows of
    /// related children that fail the predicate are excluded. A root-only
    /// projection filters on related rows through an identifier restriction
    /// instead, keeping one row per root.
    pub fn select(&self) -> Result<SelectPlan, SpecError> {
        let predicate = self.predicate()?;
        let shape = self.shape()?;
        let planner = JoinPlanner::new(self.schema);
        let crosses_relations = predicate.conditions().iter().any(|c| !c.field.is_root());

        let plan = if !shape.is_flat() && crosses_relations {
            let joins = planner.plan(&PredicateNode::Always, &shape)?;
            let columns = ProjectionEngine::project(&shape, &joins)?;
            let restriction = IdentifierQuery {
                joins: planner.plan_existence(&predicate)?,
                predicate,
                order: Vec::new(),
                window: None,
            };
            SelectPlan {
                joins,
                columns,
                predicate: PredicateNode::Always,
                restriction: Some(restriction),
                order: Vec::new(),
                window: None,
            }
        } else {
            let joins = planner.plan(&predicate, &shape)?;
            let columns = ProjectionEngine::project(&shape, &joins)?;
            SelectPlan {
                joins,
                columns,
                predicate,
                restriction: None,
                order: Vec::new(),
                window: None,
            }
        };
        tracing::debug!(
            joins = plan.joins.steps.len(),
            columns = plan.columns.len(),
            restricted = plan.restriction.is_some(),
            "select plan assembled"
        );
        Ok(plan)
    }

    fn requested_page(&self) -> Result<&PageDescriptor, SpecError> {
        self.page
            .as_ref()
            .ok_or_else(|| SpecError::InvalidPage("no page was requested".into()))
    }

    /// Plan windowed in the database. Fails for flat projections.
    pub fn bounded(&self) -> Result<BoundedQuery, SpecError> {
        let page = self.requested_page()?;
        Paginator::new(self.schema).paginate(self.select()?, page)
    }

    /// Identifier-subquery paging, safe for any projection.
    pub fn paged(&self) -> Result<PagedPlan, SpecError> {
        let page = self.requested_page()?;
        Paginator::new(self.schema).paginate_by_identifiers(self.select()?, page)
    }

    /// Distinct root count for the predicate.
    pub fn count(&self) -> Result<CountQuery, SpecError> {
        let predicate = self.predicate()?;
        let joins = JoinPlanner::new(self.schema).plan_existence(&predicate)?;
        Ok(CountQuery { joins, predicate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::join::JoinKind;
    use crate::spec::predicate::FilterCriterion;

    #[test]
    fn test_default_projection_is_entity() {
        let schema = Schema::user_role_permission();
        let plan = QuerySpec::new(&schema).select().unwrap();
        assert_eq!(plan.columns.len(), 7);
        assert!(plan.joins.steps.is_empty());
        assert!(plan.predicate.is_always());
    }

    #[test]
    fn test_flat_projection_joins_predicate_paths() {
        let schema = Schema::user_role_permission();
        let plan = QuerySpec::new(&schema)
            .filter(vec![FilterCriterion::contains("roles.name", "adm").into()])
            .project(&["username", "roles.name"])
            .select()
            .unwrap();
        assert!(plan.restriction.is_none());
        assert_eq!(plan.joins.steps.len(), 1);
        assert_eq!(plan.joins.steps[0].kind, JoinKind::Left);
        assert!(plan.columns.is_flat());
    }

    #[test]
    fn test_root_projection_uses_restriction() {
        let schema = Schema::user_role_permission();
        let plan = QuerySpec::new(&schema)
            .filter(vec![FilterCriterion::contains("roles.name", "adm").into()])
            .project(&["id", "username"])
            .select()
            .unwrap();
        assert!(plan.joins.steps.is_empty());
        assert!(plan.predicate.is_always());
        let restriction = plan.restriction.unwrap();
        assert_eq!(restriction.joins.steps[0].kind, JoinKind::Inner);
        assert!(restriction.window.is_none());
    }

    #[test]
    fn test_bounded_requires_page() {
        let schema = Schema::user_role_permission();
        let err = QuerySpec::new(&schema).bounded().unwrap_err();
        assert!(matches!(err, SpecError::InvalidPage(_)));
    }

    #[test]
    fn test_count_uses_existence_joins() {
        let schema = Schema::user_role_permission();
        let count = QuerySpec::new(&schema)
            .filter(vec![FilterCriterion::contains("roles.permissions.name", "x").into()])
            .count()
            .unwrap();
        assert_eq!(count.joins.steps.len(), 2);
        assert!(count.joins.steps.iter().all(|s| s.kind == JoinKind::Inner));
    }

    #[test]
    fn test_combine() {
        let schema = Schema::user_role_permission();
        let a = QuerySpec::new(&schema)
            .filter(vec![FilterCriterion::contains("username", "a").into()])
            .predicate()
            .unwrap();
        assert_eq!(combine(PredicateNode::Always, a.clone()), a);
        assert_eq!(combine(a.clone(), PredicateNode::Always), a);
        match combine(a.clone(), PredicateNode::And(vec![a.clone(), a.clone()])) {
            PredicateNode::And(children) => assert_eq!(children.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }
}
