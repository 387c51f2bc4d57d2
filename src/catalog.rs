//! Named query variants.
//!
//! Each variant pairs a request shape (filters, projection, sort, paging)
//! with the strategy used to run it, so a naive and an optimized form of the
//! same question sit side by side and can be compared by their SQL.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::db::{FlatRecord, QueryResult, StorageEngine};
use crate::service::{RoleSearch, UserQueryService, UserSearch};
use crate::spec::{
    compile_bounded, compile_count, compile_paged, compile_select, Aggregator, CompiledQuery,
    GroupShape, GroupedRecord, JoinRequirement, Page, PageDescriptor, QuerySpec, Schema, SortKey,
};

/// How a variant is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Every matching row, no paging.
    List,
    /// Database-windowed page plus a count.
    Bounded,
    /// Every matching row, regrouped per user.
    Grouped,
    /// Identifier-subquery page, re-expanded and regrouped.
    GroupedPage,
}

/// Which request filters a variant applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    None,
    Users,
    Roles(JoinRequirement),
}

#[derive(Debug, Clone)]
pub struct QueryVariant {
    pub name: String,
    pub route: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Selects only the columns the caller uses.
    pub optimized: bool,
    /// Empty means every root field.
    pub fields: Vec<String>,
    pub filter: FilterKind,
    pub strategy: Strategy,
    pub sort: Vec<SortKey>,
    pub default_size: u32,
    pub group: Option<GroupShape>,
}

/// Caller-supplied filters and paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantRequest {
    pub users: UserSearch,
    pub roles: RoleSearch,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

/// SQL a variant sends, in execution order.
#[derive(Debug, Clone)]
pub struct VariantPlan {
    pub statements: Vec<(String, CompiledQuery)>,
}

#[derive(Debug, Clone)]
pub enum VariantOutput {
    Rows(QueryResult),
    Page(Page<FlatRecord>),
    Grouped(Vec<GroupedRecord>),
    GroupedPage(Page<GroupedRecord>),
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn user_roles_shape() -> GroupShape {
    GroupShape::new("id")
        .set("roles.name", "roleNames")
        .set("roles.path", "rolePaths")
}

impl QueryVariant {
    fn new(name: &str, route: &str, description: &str, strategy: Strategy) -> Self {
        Self {
            name: name.to_string(),
            route: route.to_string(),
            description: description.to_string(),
            tags: Vec::new(),
            optimized: false,
            fields: Vec::new(),
            filter: FilterKind::None,
            strategy,
            sort: Vec::new(),
            default_size: 10,
            group: None,
        }
    }

    fn tagged(mut self, tags: &[&str]) -> Self {
        self.tags = strings(tags);
        self
    }

    fn optimized(mut self) -> Self {
        self.optimized = true;
        self
    }

    fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = strings(fields);
        self
    }

    fn filtered(mut self, filter: FilterKind) -> Self {
        self.filter = filter;
        self
    }

    fn sorted(mut self, sort: Vec<SortKey>, default_size: u32) -> Self {
        self.sort = sort;
        self.default_size = default_size;
        self
    }

    fn grouped(mut self, shape: GroupShape) -> Self {
        self.group = Some(shape);
        self
    }

    pub fn is_paged(&self) -> bool {
        matches!(self.strategy, Strategy::Bounded | Strategy::GroupedPage)
    }

    pub fn page(&self, request: &VariantRequest) -> PageDescriptor {
        PageDescriptor::new(
            request.page.unwrap_or(0),
            request.size.unwrap_or(self.default_size),
        )
        .sorted_by(self.sort.clone())
    }

    /// Build the request spec for `schema`.
    pub fn spec<'a>(&self, schema: &'a Schema, request: &VariantRequest) -> QuerySpec<'a> {
        let criteria = match self.filter {
            FilterKind::None => Vec::new(),
            FilterKind::Users => request.users.criteria(),
            FilterKind::Roles(requirement) => request.roles.criteria(requirement),
        };
        let spec = QuerySpec::new(schema).filter(criteria).project(self.fields.as_slice());
        if self.is_paged() {
            spec.page(self.page(request))
        } else {
            spec
        }
    }

    fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.group.clone().unwrap_or_else(|| GroupShape::new("id")))
    }

    /// Compile without executing.
    pub fn plan(&self, schema: &Schema, request: &VariantRequest) -> Result<VariantPlan> {
        let spec = self.spec(schema, request);
        let statements = match self.strategy {
            Strategy::List | Strategy::Grouped => {
                vec![("select".to_string(), compile_select(&spec.select()?)?)]
            }
            Strategy::Bounded => vec![
                ("page".to_string(), compile_bounded(&spec.bounded()?)?),
                ("count".to_string(), compile_count(&spec.count()?)?),
            ],
            Strategy::GroupedPage => {
                let paged = compile_paged(&spec.paged()?)?;
                vec![
                    ("page".to_string(), paged.page),
                    ("count".to_string(), paged.count),
                ]
            }
        };
        Ok(VariantPlan { statements })
    }

    pub async fn run<E: StorageEngine>(
        &self,
        service: &UserQueryService<E>,
        request: &VariantRequest,
    ) -> Result<VariantOutput> {
        let spec = self.spec(service.schema(), request);
        tracing::info!(variant = %self.name, strategy = ?self.strategy, "running variant");
        let output = match self.strategy {
            Strategy::List => VariantOutput::Rows(service.list(&spec).await?),
            Strategy::Bounded => VariantOutput::Page(service.page(&spec).await?),
            Strategy::Grouped => {
                VariantOutput::Grouped(service.grouped(&spec, &self.aggregator()).await?)
            }
            Strategy::GroupedPage => {
                VariantOutput::GroupedPage(service.grouped_page(&spec, &self.aggregator()).await?)
            }
        };
        Ok(output)
    }
}

/// Look a variant up by name or route, e.g. `cq` or `/cq`.
pub fn find_variant(key: &str) -> Result<QueryVariant> {
    let route = format!("/{}", key.trim_start_matches('/'));
    match built_in_variants()
        .into_iter()
        .find(|v| v.name == key || v.route == route)
    {
        Some(variant) => Ok(variant),
        None => bail!("Unknown query variant `{}`. Run `specquery list`.", key),
    }
}

pub fn built_in_variants() -> Vec<QueryVariant> {
    let by_update = || vec![SortKey::desc("updated_at"), SortKey::desc("id")];
    let user_info = [
        "id",
        "username",
        "password",
        "created_at",
        "updated_at",
        "roles.name",
        "roles.path",
    ];

    vec![
        QueryVariant::new(
            "simple-find-all",
            "/sfa",
            "All users as full entities. Every column is selected and trimmed afterwards",
            Strategy::List,
        )
        .tagged(&["naive"]),
        QueryVariant::new(
            "simple-find-all-optimized",
            "/sfao",
            "All users projected onto the columns the caller reads",
            Strategy::List,
        )
        .tagged(&["projection"])
        .optimized()
        .fields(&["id", "username", "password", "email", "created_at", "updated_at"]),
        QueryVariant::new(
            "complex-query",
            "/cq",
            "Users filtered by role and permission name, flat projection regrouped per user",
            Strategy::Grouped,
        )
        .tagged(&["projection", "join", "aggregation"])
        .optimized()
        .fields(&["id", "username", "email", "roles.name", "roles.path"])
        .filtered(FilterKind::Roles(JoinRequirement::Optional))
        .grouped(user_roles_shape()),
        QueryVariant::new(
            "simple-spec-query",
            "/ssq",
            "Username/email filter, full entity columns, paged by last update",
            Strategy::Bounded,
        )
        .tagged(&["naive", "paging"])
        .filtered(FilterKind::Users)
        .sorted(by_update(), 10),
        QueryVariant::new(
            "simple-spec-query-optimized",
            "/ssqo",
            "Username/email filter paged by last update, only id, username and email",
            Strategy::Bounded,
        )
        .tagged(&["projection", "paging"])
        .optimized()
        .fields(&["id", "username", "email"])
        .filtered(FilterKind::Users)
        .sorted(by_update(), 10),
        QueryVariant::new(
            "role-permission-entity-page",
            "/fbrap",
            "Users with a matching role and permission over LEFT joins, paged by id with their role names and paths",
            Strategy::GroupedPage,
        )
        .tagged(&["paging", "join", "aggregation"])
        .fields(&user_info)
        .filtered(FilterKind::Roles(JoinRequirement::Optional))
        .sorted(Vec::new(), 5)
        .grouped(user_roles_shape()),
        QueryVariant::new(
            "role-permission-projection",
            "/fbrapp",
            "Paged flat projection across roles. Rejected: a window over flat rows splits users",
            Strategy::Bounded,
        )
        .tagged(&["projection", "paging", "unsafe"])
        .fields(&user_info)
        .filtered(FilterKind::Roles(JoinRequirement::Required))
        .sorted(Vec::new(), 5),
        QueryVariant::new(
            "role-permission-optimized",
            "/fbrapo",
            "Two-phase page: distinct user ids first, then their roles, regrouped with a distinct count",
            Strategy::GroupedPage,
        )
        .tagged(&["projection", "paging", "aggregation"])
        .optimized()
        .fields(&user_info)
        .filtered(FilterKind::Roles(JoinRequirement::Required))
        .sorted(Vec::new(), 5)
        .grouped(user_roles_shape()),
    ]
}
