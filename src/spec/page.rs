//! Pagination and sort adapter.
//!
//! Windows are applied in the database only when every output row stands for
//! exactly one root entity. A flat result that crosses a collection relation
//! is either rejected or paged in two phases: pick the page's distinct root
//! identifiers first, then re-expand the joined attributes for those only.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::SpecError;
use super::join::JoinPlanner;
use super::plan::{combine, CountQuery, IdentifierQuery, PagedPlan, SelectPlan};
use super::schema::{FieldPath, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Asc => write!(f, "ASC"),
            Direction::Desc => write!(f, "DESC"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            other => Err(format!("unknown sort direction `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Desc,
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    /// `field` or `field:asc|desc`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, direction) = match s.split_once(':') {
            Some((field, dir)) => (field, dir.parse()?),
            None => (s, Direction::Asc),
        };
        if field.trim().is_empty() {
            return Err("sort key needs a field".to_string());
        }
        Ok(Self {
            field: field.trim().to_string(),
            direction,
        })
    }
}

/// Zero-based page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDescriptor {
    pub page: u32,
    pub size: u32,
    pub sort: Vec<SortKey>,
}

impl PageDescriptor {
    pub fn new(page: u32, size: u32) -> Self {
        Self {
            page,
            size,
            sort: Vec::new(),
        }
    }

    pub fn sorted_by(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.size)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub field: FieldPath,
    pub alias: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

/// A select plan whose window is applied by the database.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedQuery {
    pub plan: SelectPlan,
    pub page: PageDescriptor,
}

pub struct Paginator<'a> {
    schema: &'a Schema,
}

impl<'a> Paginator<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Order and window a single-row-per-entity plan.
    pub fn paginate(
        &self,
        mut plan: SelectPlan,
        page: &PageDescriptor,
    ) -> Result<BoundedQuery, SpecError> {
        if let Some(relation) = &plan.columns.flat_through {
            tracing::warn!(relation = %relation, "refusing to window a flat result");
            return Err(SpecError::UnsafePagination {
                relation: relation.to_string(),
            });
        }
        let alias = plan.joins.root.alias.clone();
        plan.order = self.order_terms(page, &alias)?;
        plan.window = Some(window(page)?);
        tracing::debug!(page = page.page, size = page.size, "bounded query");
        Ok(BoundedQuery {
            plan,
            page: page.clone(),
        })
    }

    /// Two-phase paging: identifier subquery, re-expansion and distinct count.
    pub fn paginate_by_identifiers(
        &self,
        plan: SelectPlan,
        page: &PageDescriptor,
    ) -> Result<PagedPlan, SpecError> {
        let window = window(page)?;
        let predicate = combine(
            plan.predicate,
            plan.restriction.map(|r| r.predicate).unwrap_or_default(),
        );
        let existence = JoinPlanner::new(self.schema).plan_existence(&predicate)?;
        let order = self.order_terms(page, &existence.root.alias)?;

        let identifiers = IdentifierQuery {
            joins: existence.clone(),
            predicate: predicate.clone(),
            order: order.clone(),
            window: Some(window),
        };
        let projected: Vec<_> = plan
            .columns
            .columns
            .iter()
            .filter(|c| !c.field.is_root())
            .map(|c| c.field.relations.clone())
            .collect();
        let expansion = SelectPlan {
            joins: plan.joins.relaxed_to(&projected),
            columns: plan.columns,
            predicate: Default::default(),
            restriction: Some(identifiers),
            order,
            window: None,
        };
        tracing::debug!(
            page = page.page,
            size = page.size,
            existence_joins = existence.steps.len(),
            "two-phase paged plan"
        );
        Ok(PagedPlan {
            expansion,
            count: CountQuery {
                joins: existence,
                predicate,
            },
            page: page.clone(),
        })
    }

    /// Resolve sort keys against the root entity and append the root id as a
    /// final ascending tie-breaker unless it is already a key.
    pub fn order_terms(
        &self,
        page: &PageDescriptor,
        root_alias: &str,
    ) -> Result<Vec<OrderTerm>, SpecError> {
        let mut terms: Vec<OrderTerm> = Vec::with_capacity(page.sort.len() + 1);
        for key in &page.sort {
            let field = self.schema.resolve(&key.field)?;
            if let Some(relation) = field.collection() {
                return Err(SpecError::CollectionSortKey {
                    path: field.path,
                    relation: relation.to_string(),
                });
            }
            if terms.iter().any(|t| t.field.path == field.path) {
                continue;
            }
            terms.push(OrderTerm {
                field,
                alias: root_alias.to_string(),
                direction: key.direction,
            });
        }
        let id = self.schema.root_id();
        if !terms
            .iter()
            .any(|t| t.field.descriptor.column == id.descriptor.column)
        {
            terms.push(OrderTerm {
                field: id,
                alias: root_alias.to_string(),
                direction: Direction::Asc,
            });
        }
        Ok(terms)
    }
}

fn window(page: &PageDescriptor) -> Result<Window, SpecError> {
    if page.size == 0 {
        return Err(SpecError::InvalidPage("page size must be at least 1".into()));
    }
    Ok(Window {
        offset: page.offset(),
        limit: page.limit(),
    })
}

/// One page of results with totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub number: u32,
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, page: &PageDescriptor, total_elements: u64) -> Self {
        let size = u64::from(page.size.max(1));
        Self {
            content,
            number: page.page,
            size: page.size,
            total_elements,
            total_pages: total_elements.div_ceil(size),
        }
    }

    pub fn is_last(&self) -> bool {
        u64::from(self.number) + 1 >= self.total_pages
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
            total_pages: self.total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::plan::QuerySpec;
    use crate::spec::predicate::FilterCriterion;
    use crate::spec::schema::RelationPath;

    #[test]
    fn test_paginate_bounds_single_row_query() {
        let schema = Schema::user_role_permission();
        let plan = QuerySpec::new(&schema)
            .filter(vec![FilterCriterion::contains("username", "a").into()])
            .project(&["id", "username"])
            .select()
            .unwrap();
        let page = PageDescriptor::new(2, 5).sorted_by(vec![SortKey::desc("updated_at")]);
        let bounded = Paginator::new(&schema).paginate(plan, &page).unwrap();
        assert_eq!(bounded.plan.window, Some(Window { offset: 10, limit: 5 }));
        let order: Vec<(&str, Direction)> = bounded
            .plan
            .order
            .iter()
            .map(|t| (t.field.path.as_str(), t.direction))
            .collect();
        assert_eq!(order, vec![("updated_at", Direction::Desc), ("id", Direction::Asc)]);
    }

    #[test]
    fn test_paginate_rejects_flat_query() {
        let schema = Schema::user_role_permission();
        let plan = QuerySpec::new(&schema)
            .project(&["id", "roles.name"])
            .select()
            .unwrap();
        let err = Paginator::new(&schema)
            .paginate(plan, &PageDescriptor::new(0, 5))
            .unwrap_err();
        assert_eq!(
            err,
            SpecError::UnsafePagination {
                relation: "roles".into()
            }
        );
    }

    #[test]
    fn test_zero_size_rejected() {
        let schema = Schema::user_role_permission();
        let plan = QuerySpec::new(&schema).select().unwrap();
        let err = Paginator::new(&schema)
            .paginate(plan, &PageDescriptor::new(0, 0))
            .unwrap_err();
        assert!(matches!(err, SpecError::InvalidPage(_)));
    }

    #[test]
    fn test_collection_sort_key_rejected() {
        let schema = Schema::user_role_permission();
        let plan = QuerySpec::new(&schema).select().unwrap();
        let page = PageDescriptor::new(0, 5).sorted_by(vec![SortKey::asc("roles.name")]);
        let err = Paginator::new(&schema).paginate(plan, &page).unwrap_err();
        assert!(matches!(err, SpecError::CollectionSortKey { .. }));
    }

    #[test]
    fn test_id_key_not_duplicated() {
        let schema = Schema::user_role_permission();
        let page = PageDescriptor::new(0, 10)
            .sorted_by(vec![SortKey::desc("updated_at"), SortKey::desc("id")]);
        let terms = Paginator::new(&schema).order_terms(&page, "cust_user").unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[1].direction, Direction::Desc);
    }

    #[test]
    fn test_two_phase_plan() {
        let schema = Schema::user_role_permission();
        let plan = QuerySpec::new(&schema)
            .filter(vec![
                FilterCriterion::contains("roles.name", "first").into(),
                FilterCriterion::contains("roles.permissions.name", "first").into(),
            ])
            .project(&["id", "username", "roles.name", "roles.path"])
            .select()
            .unwrap();
        let paged = Paginator::new(&schema)
            .paginate_by_identifiers(plan, &PageDescriptor::new(0, 5))
            .unwrap();

        let expansion = &paged.expansion;
        assert!(expansion.predicate.is_always());
        assert!(expansion.window.is_none());
        assert_eq!(expansion.joins.steps.len(), 1);
        assert_eq!(expansion.joins.steps[0].path, RelationPath::new(["roles"]));

        let ids = expansion.restriction.as_ref().unwrap();
        assert_eq!(ids.window, Some(Window { offset: 0, limit: 5 }));
        assert_eq!(ids.joins.steps.len(), 2);
        assert!(ids
            .joins
            .steps
            .iter()
            .all(|s| s.kind == crate::spec::join::JoinKind::Inner));
        assert_eq!(paged.count.predicate.conditions().len(), 2);
    }

    #[test]
    fn test_page_envelope() {
        let page = Page::new(vec![1, 2], &PageDescriptor::new(1, 2), 5);
        assert_eq!(page.total_pages, 3);
        assert!(!page.is_last());
        let json = serde_json::to_value(page.map(|n| n * 10)).unwrap();
        assert_eq!(json["content"], serde_json::json!([10, 20]));
        assert_eq!(json["totalElements"], 5);
        assert_eq!(json["totalPages"], 3);
        assert_eq!(json["number"], 1);
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!("updated_at:desc".parse::<SortKey>().unwrap(), SortKey::desc("updated_at"));
        assert_eq!("id".parse::<SortKey>().unwrap(), SortKey::asc("id"));
        assert!("id:sideways".parse::<SortKey>().is_err());
        assert!(":asc".parse::<SortKey>().is_err());
    }
}
