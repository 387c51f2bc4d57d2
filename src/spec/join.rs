//! Join planner.
//!
//! Collects every relation prefix referenced by a predicate and a projection
//! and turns them into an ordered, duplicate-free list of join steps. Joins
//! are only ever planned here, up front; nothing downstream adds one.

use std::collections::HashMap;
use std::fmt;

use super::error::SpecError;
use super::predicate::{JoinRequirement, PredicateNode};
use super::projection::ProjectionShape;
use super::schema::{RelationPath, Schema};

/// Join type of a step. `Inner` outranks `Left` when a path is needed both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JoinKind {
    Left,
    Inner,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinKind::Left => write!(f, "LEFT"),
            JoinKind::Inner => write!(f, "INNER"),
        }
    }
}

impl From<JoinRequirement> for JoinKind {
    fn from(requirement: JoinRequirement) -> Self {
        match requirement {
            JoinRequirement::Optional => JoinKind::Left,
            JoinRequirement::Required => JoinKind::Inner,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RootRef {
    pub entity: String,
    pub table: String,
    pub alias: String,
    pub id_column: String,
}

/// One relation traversal: the link table followed by the target table.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStep {
    pub path: RelationPath,
    pub kind: JoinKind,
    pub alias: String,
    pub link_alias: String,
    pub parent_alias: String,
    pub parent_id: String,
    pub table: String,
    pub target_id: String,
    pub join_table: String,
    pub source_column: String,
    pub target_column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinPath {
    pub root: RootRef,
    /// Parent steps always precede their children.
    pub steps: Vec<JoinStep>,
}

impl JoinPath {
    pub fn step(&self, path: &RelationPath) -> Option<&JoinStep> {
        self.steps.iter().find(|s| &s.path == path)
    }

    pub fn contains(&self, path: &RelationPath) -> bool {
        path.is_root() || self.step(path).is_some()
    }

    /// Table alias holding the columns of `path`.
    pub fn alias_of(&self, path: &RelationPath) -> Option<&str> {
        if path.is_root() {
            Some(&self.root.alias)
        } else {
            self.step(path).map(|s| s.alias.as_str())
        }
    }

    /// Steps needed to reach `paths`, all relaxed to LEFT joins.
    pub fn relaxed_to(&self, paths: &[RelationPath]) -> JoinPath {
        let steps = self
            .steps
            .iter()
            .filter(|s| paths.iter().any(|p| p.starts_with(&s.path)))
            .map(|s| JoinStep {
                kind: JoinKind::Left,
                ..s.clone()
            })
            .collect();
        JoinPath {
            root: self.root.clone(),
            steps,
        }
    }
}

pub struct JoinPlanner<'a> {
    schema: &'a Schema,
}

impl<'a> JoinPlanner<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Plan joins for a flat query: predicate paths join as their criteria
    /// demand, projection paths join LEFT.
    pub fn plan(
        &self,
        predicate: &PredicateNode,
        projection: &ProjectionShape,
    ) -> Result<JoinPath, SpecError> {
        let mut wanted = Wanted::default();
        for condition in predicate.conditions() {
            wanted.add(&condition.field.relations, condition.requirement.into());
        }
        for field in projection.fields() {
            wanted.add(&field.relations, JoinKind::Left);
        }
        let path = self.build(wanted)?;
        tracing::debug!(steps = path.steps.len(), "join path planned");
        Ok(path)
    }

    /// Plan joins for an existence check: every relation a matching row must
    /// have is INNER. Paths only reachable under an OR stay LEFT.
    pub fn plan_existence(&self, predicate: &PredicateNode) -> Result<JoinPath, SpecError> {
        let mandatory = predicate.mandatory_conditions();
        let mut wanted = Wanted::default();
        for condition in predicate.conditions() {
            let kind = if mandatory.iter().any(|m| std::ptr::eq(*m, condition)) {
                JoinKind::Inner
            } else {
                condition.requirement.into()
            };
            wanted.add(&condition.field.relations, kind);
        }
        self.build(wanted)
    }

    fn build(&self, mut wanted: Wanted) -> Result<JoinPath, SpecError> {
        wanted.propagate_inner();

        let root = self.schema.root();
        let root_ref = RootRef {
            entity: root.name.clone(),
            table: root.table.clone(),
            alias: root.table.clone(),
            id_column: root.id_column().to_string(),
        };

        let mut aliases: HashMap<String, String> = HashMap::new();
        aliases.insert(root_ref.alias.clone(), RelationPath::root().to_string());

        let mut steps: Vec<JoinStep> = Vec::with_capacity(wanted.paths.len());
        for (path, kind) in wanted.paths {
            let hops = self.schema.hops(&path)?;
            let hop = match hops.last() {
                Some(hop) => *hop,
                None => continue,
            };
            let (parent_alias, parent_id) = match path.parent() {
                Some(parent) if !parent.is_root() => {
                    let parent_step = steps.iter().find(|s| s.path == parent).ok_or_else(|| {
                        SpecError::Schema(format!("parent of `{}` was not planned", path))
                    })?;
                    (parent_step.alias.clone(), parent_step.target_id.clone())
                }
                _ => (root_ref.alias.clone(), root_ref.id_column.clone()),
            };

            let alias = path.segments().join("_");
            let link_alias = format!("{}_link", alias);
            for candidate in [&alias, &link_alias] {
                if let Some(first) = aliases.get(candidate) {
                    return Err(SpecError::AmbiguousJoin {
                        alias: candidate.clone(),
                        first: first.clone(),
                        second: path.to_string(),
                    });
                }
                aliases.insert(candidate.clone(), path.to_string());
            }

            steps.push(JoinStep {
                path,
                kind,
                alias,
                link_alias,
                parent_alias,
                parent_id,
                table: hop.target.table.clone(),
                target_id: hop.target.id_column().to_string(),
                join_table: hop.relation.join_table.clone(),
                source_column: hop.relation.source_column.clone(),
                target_column: hop.relation.target_column.clone(),
            });
        }

        Ok(JoinPath {
            root: root_ref,
            steps,
        })
    }
}

/// Relation paths in first-appearance order with their strongest join kind.
#[derive(Default)]
struct Wanted {
    paths: Vec<(RelationPath, JoinKind)>,
}

impl Wanted {
    fn add(&mut self, relations: &RelationPath, kind: JoinKind) {
        for prefix in relations.prefixes() {
            match self.paths.iter_mut().find(|(p, _)| *p == prefix) {
                Some((_, existing)) => *existing = (*existing).max(kind),
                None => self.paths.push((prefix, kind)),
            }
        }
    }

    /// A parent of an INNER step must itself be INNER.
    fn propagate_inner(&mut self) {
        let inner: Vec<RelationPath> = self
            .paths
            .iter()
            .filter(|(_, k)| *k == JoinKind::Inner)
            .map(|(p, _)| p.clone())
            .collect();
        for (path, kind) in &mut self.paths {
            if inner.iter().any(|i| i.starts_with(path)) {
                *kind = JoinKind::Inner;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::predicate::{Criterion, FilterCriterion, PredicateBuilder};
    use crate::spec::schema::{EntityDef, FieldDef, FieldType, RelationDef};

    fn predicate(schema: &Schema, criteria: Vec<Criterion>) -> PredicateNode {
        PredicateBuilder::new(schema).build(&criteria).unwrap()
    }

    #[test]
    fn test_no_relations_no_steps() {
        let schema = Schema::user_role_permission();
        let shape = ProjectionShape::new(&schema, &["id", "username"]).unwrap();
        let path = JoinPlanner::new(&schema)
            .plan(&PredicateNode::Always, &shape)
            .unwrap();
        assert!(path.steps.is_empty());
        assert_eq!(path.root.alias, "cust_user");
        assert_eq!(path.alias_of(&RelationPath::root()), Some("cust_user"));
    }

    #[test]
    fn test_paths_are_deduplicated() {
        let schema = Schema::user_role_permission();
        let pred = predicate(
            &schema,
            vec![
                FilterCriterion::contains("roles.name", "adm").into(),
                FilterCriterion::contains("roles.permissions.name", "read").into(),
            ],
        );
        let shape = ProjectionShape::new(&schema, &["username", "roles.name", "roles.path"]).unwrap();
        let path = JoinPlanner::new(&schema).plan(&pred, &shape).unwrap();

        let names: Vec<String> = path.steps.iter().map(|s| s.path.to_string()).collect();
        assert_eq!(names, vec!["roles", "roles.permissions"]);
        assert!(path.steps.iter().all(|s| s.kind == JoinKind::Left));

        let permissions = &path.steps[1];
        assert_eq!(permissions.alias, "roles_permissions");
        assert_eq!(permissions.link_alias, "roles_permissions_link");
        assert_eq!(permissions.parent_alias, "roles");
        assert_eq!(permissions.join_table, "cust_role_permission");
        assert_eq!(permissions.source_column, "cust_role_id");
        assert_eq!(permissions.target_column, "cust_permission_id");
    }

    #[test]
    fn test_inner_wins_and_propagates_to_parent() {
        let schema = Schema::user_role_permission();
        let pred = predicate(
            &schema,
            vec![FilterCriterion::contains("roles.permissions.name", "read")
                .required()
                .into()],
        );
        let shape = ProjectionShape::new(&schema, &["roles.name"]).unwrap();
        let path = JoinPlanner::new(&schema).plan(&pred, &shape).unwrap();
        assert_eq!(path.steps.len(), 2);
        assert!(path.steps.iter().all(|s| s.kind == JoinKind::Inner));
    }

    #[test]
    fn test_existence_plan_is_inner_outside_or() {
        let schema = Schema::user_role_permission();
        let pred = predicate(
            &schema,
            vec![
                FilterCriterion::contains("roles.name", "adm").into(),
                Criterion::Any(vec![
                    FilterCriterion::contains("username", "a").into(),
                    FilterCriterion::contains("roles.permissions.path", "/x").into(),
                ]),
            ],
        );
        let path = JoinPlanner::new(&schema).plan_existence(&pred).unwrap();
        let kinds: Vec<(String, JoinKind)> = path
            .steps
            .iter()
            .map(|s| (s.path.to_string(), s.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("roles".to_string(), JoinKind::Inner),
                ("roles.permissions".to_string(), JoinKind::Left),
            ]
        );
    }

    #[test]
    fn test_relaxed_to_keeps_projection_steps() {
        let schema = Schema::user_role_permission();
        let pred = predicate(
            &schema,
            vec![FilterCriterion::contains("roles.permissions.name", "r").required().into()],
        );
        let shape = ProjectionShape::new(&schema, &["roles.name"]).unwrap();
        let path = JoinPlanner::new(&schema).plan(&pred, &shape).unwrap();
        let relaxed = path.relaxed_to(&[RelationPath::new(["roles"])]);
        assert_eq!(relaxed.steps.len(), 1);
        assert_eq!(relaxed.steps[0].kind, JoinKind::Left);
    }

    #[test]
    fn test_alias_collision_is_ambiguous() {
        let id = || FieldDef::new("id", FieldType::Id);
        let entities = vec![
            EntityDef {
                name: "X".into(),
                table: "x".into(),
                id: "id".into(),
                fields: vec![id()],
                relations: vec![
                    RelationDef::many_to_many("a", "Y", "x_y", "x_id", "y_id"),
                    RelationDef::many_to_many("a_b", "Z", "x_z", "x_id", "z_id"),
                ],
            },
            EntityDef {
                name: "Y".into(),
                table: "y".into(),
                id: "id".into(),
                fields: vec![id()],
                relations: vec![RelationDef::many_to_many("b", "Z", "y_z", "y_id", "z_id")],
            },
            EntityDef {
                name: "Z".into(),
                table: "z".into(),
                id: "id".into(),
                fields: vec![id(), FieldDef::new("name", FieldType::Text)],
                relations: vec![],
            },
        ];
        let schema = Schema::new("X", entities).unwrap();
        let shape = ProjectionShape::new(&schema, &["a.b.name", "a_b.name"]).unwrap();
        let err = JoinPlanner::new(&schema)
            .plan(&PredicateNode::Always, &shape)
            .unwrap_err();
        match err {
            SpecError::AmbiguousJoin { alias, first, second } => {
                assert_eq!(alias, "a_b");
                assert_eq!(first, "a.b");
                assert_eq!(second, "a_b");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
