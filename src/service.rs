//! Query service over a storage engine.
//!
//! Runs `QuerySpec` requests end to end: plan, execute, count and regroup.

use anyhow::Result;

use crate::db::{FlatRecord, QueryResult, StorageEngine};
use crate::spec::{
    Aggregator, Criterion, FilterCriterion, GroupedRecord, JoinRequirement, Page, QuerySpec,
    Schema,
};

/// Optional user attribute filters. Blank values are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserSearch {
    pub username: Option<String>,
    pub email: Option<String>,
}

impl UserSearch {
    pub fn criteria(&self) -> Vec<Criterion> {
        let mut criteria = Vec::new();
        if let Some(username) = &self.username {
            criteria.push(FilterCriterion::contains("username", username).into());
        }
        if let Some(email) = &self.email {
            criteria.push(FilterCriterion::contains("email", email).into());
        }
        criteria
    }
}

/// Optional role and permission name filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleSearch {
    pub role: Option<String>,
    pub permission: Option<String>,
}

impl RoleSearch {
    pub fn criteria(&self, requirement: JoinRequirement) -> Vec<Criterion> {
        let with = |mut c: FilterCriterion| {
            c.requirement = requirement;
            Criterion::from(c)
        };
        let mut criteria = Vec::new();
        if let Some(role) = &self.role {
            criteria.push(with(FilterCriterion::contains("roles.name", role)));
        }
        if let Some(permission) = &self.permission {
            criteria.push(with(FilterCriterion::contains(
                "roles.permissions.name",
                permission,
            )));
        }
        criteria
    }
}

pub struct UserQueryService<E> {
    schema: Schema,
    engine: E,
}

impl<E: StorageEngine> UserQueryService<E> {
    pub fn new(schema: Schema, engine: E) -> Self {
        Self { schema, engine }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// A fresh request against this service's schema.
    pub fn spec(&self) -> QuerySpec<'_> {
        QuerySpec::new(&self.schema)
    }

    /// Every matching row, unpaged.
    pub async fn list(&self, spec: &QuerySpec<'_>) -> Result<QueryResult> {
        let plan = spec.select()?;
        self.engine.fetch(&plan).await
    }

    /// One database-windowed page. Fails before touching the engine when
    /// the projection is flat.
    pub async fn page(&self, spec: &QuerySpec<'_>) -> Result<Page<FlatRecord>> {
        let bounded = spec.bounded()?;
        let count = spec.count()?;
        let (result, total) = tokio::try_join!(
            self.engine.fetch(&bounded.plan),
            self.engine.count(&count)
        )?;
        Ok(Page::new(result.records(), &bounded.page, total))
    }

    /// Every matching row, regrouped per root entity.
    pub async fn grouped(
        &self,
        spec: &QuerySpec<'_>,
        aggregator: &Aggregator,
    ) -> Result<Vec<GroupedRecord>> {
        let result = self.list(spec).await?;
        Ok(aggregator.aggregate_result(&result)?)
    }

    /// Two-phase page: identifiers first, then the joined attributes of
    /// those roots only, regrouped.
    pub async fn grouped_page(
        &self,
        spec: &QuerySpec<'_>,
        aggregator: &Aggregator,
    ) -> Result<Page<GroupedRecord>> {
        let paged = spec.paged()?;
        let (result, total) = tokio::try_join!(
            self.engine.fetch(&paged.expansion),
            self.engine.count(&paged.count)
        )?;
        let grouped = aggregator.regroup(aggregator.aggregate_result(&result)?);
        tracing::info!(
            page = paged.page.page,
            records = grouped.len(),
            total,
            "grouped page fetched"
        );
        Ok(Page::new(grouped, &paged.page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CellValue, Dataset, MemoryEngine};
    use crate::spec::{GroupShape, PageDescriptor, SortKey, SpecError};

    fn dataset() -> Dataset {
        let mut ds = Dataset::new();
        for (id, name) in [(1, "first_user"), (2, "second_user"), (3, "third")] {
            ds.insert_values(
                "cust_user",
                [
                    ("id", CellValue::Int64(id)),
                    ("username", CellValue::text(name)),
                    ("email", CellValue::text(format!("{}@example.com", name))),
                    ("updated_at", CellValue::Int64(10 - id)),
                ],
            );
        }
        for (id, name) in [(10, "first"), (11, "second")] {
            ds.insert_values(
                "cust_role",
                [
                    ("id", CellValue::Int64(id)),
                    ("name", CellValue::text(name)),
                    ("path", CellValue::text(format!("/{}", name))),
                ],
            );
        }
        ds.insert_values(
            "cust_permission",
            [("id", CellValue::Int64(100)), ("name", CellValue::text("first"))],
        );
        for (user, role) in [(1, 10), (1, 11), (2, 10), (3, 11)] {
            ds.insert_values(
                "cust_user_role",
                [
                    ("user_id", CellValue::Int64(user)),
                    ("role_id", CellValue::Int64(role)),
                ],
            );
        }
        ds.insert_values(
            "cust_role_permission",
            [
                ("cust_role_id", CellValue::Int64(10)),
                ("cust_permission_id", CellValue::Int64(100)),
            ],
        );
        ds
    }

    fn service() -> UserQueryService<MemoryEngine> {
        UserQueryService::new(Schema::user_role_permission(), MemoryEngine::new(dataset()))
    }

    #[test]
    fn test_search_criteria_skip_missing() {
        let search = UserSearch {
            username: Some("a".into()),
            email: None,
        };
        assert_eq!(search.criteria().len(), 1);
        let roles = RoleSearch {
            role: Some("x".into()),
            permission: Some("y".into()),
        };
        match &roles.criteria(JoinRequirement::Required)[1] {
            Criterion::Filter(f) => {
                assert_eq!(f.field, "roles.permissions.name");
                assert_eq!(f.requirement, JoinRequirement::Required);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_page_of_root_fields() {
        let service = service();
        let search = UserSearch {
            username: Some("user".into()),
            email: Some("example".into()),
        };
        let spec = service
            .spec()
            .filter(search.criteria())
            .project(&["id", "username", "email"])
            .page(PageDescriptor::new(0, 10).sorted_by(vec![
                SortKey::desc("updated_at"),
                SortKey::desc("id"),
            ]));
        let page = service.page(&spec).await.unwrap();
        assert_eq!(page.total_elements, 2);
        assert_eq!(page.content.len(), 2);
        assert_eq!(page.content[0].get("username"), Some(&CellValue::text("first_user")));
    }

    #[tokio::test]
    async fn test_flat_page_is_rejected() {
        let service = service();
        let spec = service
            .spec()
            .project(&["id", "roles.name"])
            .page(PageDescriptor::new(0, 5));
        let err = service.page(&spec).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SpecError>(),
            Some(SpecError::UnsafePagination { .. })
        ));
    }

    #[tokio::test]
    async fn test_grouped_page() {
        let service = service();
        let roles = RoleSearch {
            role: Some("first".into()),
            permission: Some("first".into()),
        };
        let spec = service
            .spec()
            .filter(roles.criteria(JoinRequirement::Optional))
            .project(&["id", "username", "roles.name", "roles.path"])
            .page(PageDescriptor::new(0, 5));
        let aggregator = Aggregator::new(
            GroupShape::new("id")
                .set("roles.name", "roleNames")
                .set("roles.path", "rolePaths"),
        );
        let page = service.grouped_page(&spec, &aggregator).await.unwrap();
        assert_eq!(page.total_elements, 2);
        assert_eq!(page.content.len(), 2);
        // User 1 comes back with every role, not only the matching one.
        assert_eq!(
            page.content[0].collection("roleNames"),
            Some(&[CellValue::text("first"), CellValue::text("second")][..])
        );
        assert_eq!(page.content[1].collection("rolePaths").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_grouped_unpaged() {
        let service = service();
        let spec = service.spec().project(&["id", "roles.name"]);
        let aggregator = Aggregator::new(GroupShape::new("id").set("roles.name", "roles"));
        let grouped = service.grouped(&spec, &aggregator).await.unwrap();
        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped[0].collection("roles").unwrap().len(), 2);
    }
}
