/// Query specifications over a relational entity graph.
///
/// A request flows through these stages:
///
/// ```text
/// criteria ──► PredicateBuilder ──► JoinPlanner ──► ProjectionEngine
///                                                        │
///               Aggregator ◄── storage engine ◄── Paginator / QuerySpec
/// ```
///
/// Every field path is resolved against the `Schema` registry while the
/// plan is built, so a bad path fails the request before any SQL exists.
pub mod aggregate;
pub mod error;
pub mod join;
pub mod page;
pub mod plan;
pub mod predicate;
pub mod projection;
pub mod schema;
pub mod sql;

pub use aggregate::{Aggregator, CollectionKind, GroupShape, GroupedRecord};
pub use error::SpecError;
pub use join::{JoinKind, JoinPath, JoinPlanner, JoinStep};
pub use page::{BoundedQuery, Direction, Page, PageDescriptor, Paginator, SortKey, Window};
pub use plan::{CountQuery, IdentifierQuery, PagedPlan, QuerySpec, SelectPlan};
pub use predicate::{
    Comparator, Criterion, FilterCriterion, FilterValue, JoinRequirement, PredicateBuilder,
    PredicateNode,
};
pub use projection::{ColumnSet, ProjectionEngine, ProjectionShape};
pub use schema::{FieldPath, FieldType, RelationPath, Schema};
pub use sql::{compile_bounded, compile_count, compile_paged, compile_select, CompiledQuery};
