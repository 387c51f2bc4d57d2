//! Schema registry.
//!
//! Maps symbolic field paths such as `roles.permissions.name` to typed
//! column descriptors. Every path used by a filter, projection or sort key is
//! resolved here when the query is built, so a typo fails the request
//! instead of producing SQL that the database rejects later.
//!
//! Relations are many-to-many edge sets stored in a link table. The edge
//! lifetime is independent of both endpoints.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::SpecError;

/// Storage type of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Process-assigned identity, stored as BIGINT.
    Id,
    Text,
    /// Stored as BIGINT.
    Integer,
    Timestamp,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Id => write!(f, "id"),
            FieldType::Text => write!(f, "text"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Timestamp => write!(f, "timestamp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Column name, defaults to the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldDef {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            column: None,
            field_type,
        }
    }

    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

/// A many-to-many relation from the owning entity to `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    pub target: String,
    /// Link table holding the edge set.
    pub join_table: String,
    /// Link column referencing the owning entity's id.
    pub source_column: String,
    /// Link column referencing the target entity's id.
    pub target_column: String,
}

impl RelationDef {
    pub fn many_to_many(
        name: &str,
        target: &str,
        join_table: &str,
        source_column: &str,
        target_column: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            join_table: join_table.to_string(),
            source_column: source_column.to_string(),
            target_column: target_column.to_string(),
        }
    }
}

fn default_id() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    /// Name of the identity field.
    #[serde(default = "default_id")]
    pub id: String,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl EntityDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Column holding the identity. Validated to exist when the schema is built.
    pub fn id_column(&self) -> &str {
        self.field(&self.id)
            .map(|f| f.column_name())
            .unwrap_or(&self.id)
    }
}

/// Sequence of relation names walked from the root entity. Empty means root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationPath(Vec<String>);

impl RelationPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn parent(&self) -> Option<RelationPath> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Non-empty prefixes, shortest first. `a.b.c` yields `a`, `a.b`, `a.b.c`.
    pub fn prefixes(&self) -> impl Iterator<Item = RelationPath> + '_ {
        (1..=self.0.len()).map(move |n| Self(self.0[..n].to_vec()))
    }

    pub fn starts_with(&self, other: &RelationPath) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl fmt::Display for RelationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0.join("."))
        }
    }
}

/// Typed description of the column a field path ends at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDescriptor {
    pub entity: String,
    pub field: String,
    pub column: String,
    pub field_type: FieldType,
}

/// A field path that has been checked against the schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    /// Path as written, e.g. `roles.name`.
    pub path: String,
    pub relations: RelationPath,
    pub descriptor: ColumnDescriptor,
}

impl FieldPath {
    /// Every relation is to-many, so any non-root path yields one row per
    /// related child. Returns the first relation crossed.
    pub fn collection(&self) -> Option<RelationPath> {
        self.relations.prefixes().next()
    }

    pub fn is_root(&self) -> bool {
        self.relations.is_root()
    }
}

/// One hop in a resolved relation path.
#[derive(Debug, Clone, Copy)]
pub struct RelationHop<'a> {
    pub source: &'a EntityDef,
    pub relation: &'a RelationDef,
    pub target: &'a EntityDef,
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    root: String,
    entities: Vec<EntityDef>,
}

/// Registry of entities reachable from a root entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    entities: Vec<EntityDef>,
    root: usize,
}

impl Schema {
    /// Build a registry, validating names, identities and relation targets.
    pub fn new(root: &str, entities: Vec<EntityDef>) -> Result<Self, SpecError> {
        let mut names = HashSet::new();
        for entity in &entities {
            if !names.insert(entity.name.as_str()) {
                return Err(SpecError::Schema(format!(
                    "entity `{}` is declared twice",
                    entity.name
                )));
            }
            let mut members = HashSet::new();
            for name in entity
                .fields
                .iter()
                .map(|f| &f.name)
                .chain(entity.relations.iter().map(|r| &r.name))
            {
                if name.is_empty() || name.contains('.') {
                    return Err(SpecError::Schema(format!(
                        "`{}` is not a valid member name on `{}`",
                        name, entity.name
                    )));
                }
                if !members.insert(name.as_str()) {
                    return Err(SpecError::Schema(format!(
                        "`{}.{}` is declared twice",
                        entity.name, name
                    )));
                }
            }
            if entity.field(&entity.id).is_none() {
                return Err(SpecError::Schema(format!(
                    "identity field `{}` missing on `{}`",
                    entity.id, entity.name
                )));
            }
        }
        for entity in &entities {
            for relation in &entity.relations {
                if !names.contains(relation.target.as_str()) {
                    return Err(SpecError::Schema(format!(
                        "relation `{}.{}` targets unknown entity `{}`",
                        entity.name, relation.name, relation.target
                    )));
                }
            }
        }
        let root = entities
            .iter()
            .position(|e| e.name == root)
            .ok_or_else(|| SpecError::Schema(format!("root entity `{}` is not declared", root)))?;
        Ok(Self { entities, root })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SpecError> {
        let file: SchemaFile =
            toml::from_str(content).map_err(|e| SpecError::Schema(e.to_string()))?;
        Self::new(&file.root, file.entities)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?)
    }

    /// Users, roles and permissions joined through two link tables.
    pub fn user_role_permission() -> Self {
        fn audited(extra: &[(&str, FieldType)]) -> Vec<FieldDef> {
            let mut fields = vec![FieldDef::new("id", FieldType::Id)];
            fields.extend(extra.iter().map(|(n, t)| FieldDef::new(n, *t)));
            fields.push(FieldDef::new("created_by", FieldType::Text));
            fields.push(FieldDef::new("created_at", FieldType::Timestamp));
            fields.push(FieldDef::new("updated_at", FieldType::Timestamp));
            fields
        }

        let user = EntityDef {
            name: "User".into(),
            table: "cust_user".into(),
            id: default_id(),
            fields: audited(&[
                ("username", FieldType::Text),
                ("email", FieldType::Text),
                ("password", FieldType::Text),
            ]),
            relations: vec![RelationDef::many_to_many(
                "roles",
                "Role",
                "cust_user_role",
                "user_id",
                "role_id",
            )],
        };
        let role = EntityDef {
            name: "Role".into(),
            table: "cust_role".into(),
            id: default_id(),
            fields: audited(&[("name", FieldType::Text), ("path", FieldType::Text)]),
            relations: vec![
                RelationDef::many_to_many(
                    "permissions",
                    "Permission",
                    "cust_role_permission",
                    "cust_role_id",
                    "cust_permission_id",
                ),
                RelationDef::many_to_many("users", "User", "cust_user_role", "role_id", "user_id"),
            ],
        };
        let permission = EntityDef {
            name: "Permission".into(),
            table: "cust_permission".into(),
            id: default_id(),
            fields: audited(&[("name", FieldType::Text), ("path", FieldType::Text)]),
            relations: vec![RelationDef::many_to_many(
                "roles",
                "Role",
                "cust_role_permission",
                "cust_permission_id",
                "cust_role_id",
            )],
        };

        Self {
            entities: vec![user, role, permission],
            root: 0,
        }
    }

    pub fn root(&self) -> &EntityDef {
        &self.entities[self.root]
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn entities(&self) -> &[EntityDef] {
        &self.entities
    }

    /// Field path of the root identity.
    pub fn root_id(&self) -> FieldPath {
        let root = self.root();
        let column = root.id_column().to_string();
        FieldPath {
            path: root.id.clone(),
            relations: RelationPath::root(),
            descriptor: ColumnDescriptor {
                entity: root.name.clone(),
                field: root.id.clone(),
                column,
                field_type: FieldType::Id,
            },
        }
    }

    /// Walk `relations` from the root and return every hop.
    pub fn hops(&self, relations: &RelationPath) -> Result<Vec<RelationHop<'_>>, SpecError> {
        let mut current = self.root();
        let mut hops = Vec::with_capacity(relations.depth());
        for segment in relations.segments() {
            let relation = current.relation(segment).ok_or_else(|| {
                SpecError::invalid_path(
                    &relations.to_string(),
                    format!("no relation `{}` on `{}`", segment, current.name),
                )
            })?;
            let target = self.entity(&relation.target).ok_or_else(|| {
                SpecError::Schema(format!("unknown entity `{}`", relation.target))
            })?;
            hops.push(RelationHop {
                source: current,
                relation,
                target,
            });
            current = target;
        }
        Ok(hops)
    }

    /// Resolve a dotted field path against the registry.
    pub fn resolve(&self, path: &str) -> Result<FieldPath, SpecError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(SpecError::invalid_path(path, "empty path"));
        }
        let segments: Vec<&str> = trimmed.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(SpecError::invalid_path(path, "empty path segment"));
        }
        let (field_name, relation_names) = match segments.split_last() {
            Some(split) => split,
            None => return Err(SpecError::invalid_path(path, "empty path")),
        };

        let relations = RelationPath::new(relation_names.iter().copied());
        let hops = self
            .hops(&relations)
            .map_err(|e| match e {
                SpecError::InvalidFieldPath { reason, .. } => SpecError::invalid_path(path, reason),
                other => other,
            })?;
        let entity = hops.last().map(|h| h.target).unwrap_or_else(|| self.root());
        let field = entity.field(field_name).ok_or_else(|| {
            SpecError::invalid_path(
                path,
                format!("no field `{}` on `{}`", field_name, entity.name),
            )
        })?;

        Ok(FieldPath {
            path: trimmed.to_string(),
            relations,
            descriptor: ColumnDescriptor {
                entity: entity.name.clone(),
                field: field.name.clone(),
                column: field.column_name().to_string(),
                field_type: field.field_type,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_root_field() {
        let schema = Schema::user_role_permission();
        let path = schema.resolve("username").unwrap();
        assert!(path.is_root());
        assert_eq!(path.descriptor.entity, "User");
        assert_eq!(path.descriptor.column, "username");
        assert_eq!(path.descriptor.field_type, FieldType::Text);
        assert!(path.collection().is_none());
    }

    #[test]
    fn test_resolve_nested_relation() {
        let schema = Schema::user_role_permission();
        let path = schema.resolve("roles.permissions.name").unwrap();
        assert_eq!(path.relations, RelationPath::new(["roles", "permissions"]));
        assert_eq!(path.descriptor.entity, "Permission");
        assert_eq!(path.collection(), Some(RelationPath::new(["roles"])));
    }

    #[test]
    fn test_resolve_unknown_field() {
        let schema = Schema::user_role_permission();
        let err = schema.resolve("roles.colour").unwrap_err();
        match err {
            SpecError::InvalidFieldPath { path, reason } => {
                assert_eq!(path, "roles.colour");
                assert!(reason.contains("no field `colour` on `Role`"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_resolve_unknown_relation() {
        let schema = Schema::user_role_permission();
        let err = schema.resolve("groups.name").unwrap_err();
        assert!(matches!(err, SpecError::InvalidFieldPath { .. }));
        assert!(err.to_string().contains("no relation `groups` on `User`"));
    }

    #[test]
    fn test_resolve_rejects_empty_segments() {
        let schema = Schema::user_role_permission();
        assert!(schema.resolve("").is_err());
        assert!(schema.resolve("roles..name").is_err());
        assert!(schema.resolve(".name").is_err());
    }

    #[test]
    fn test_relation_path_prefixes() {
        let path = RelationPath::new(["a", "b", "c"]);
        let prefixes: Vec<String> = path.prefixes().map(|p| p.to_string()).collect();
        assert_eq!(prefixes, vec!["a", "a.b", "a.b.c"]);
        assert_eq!(path.parent(), Some(RelationPath::new(["a", "b"])));
        assert_eq!(RelationPath::root().parent(), None);
        assert_eq!(RelationPath::root().to_string(), "<root>");
    }

    #[test]
    fn test_schema_from_toml() {
        let schema = Schema::from_toml_str(
            r#"
            root = "Author"

            [[entities]]
            name = "Author"
            table = "authors"
            fields = [
                { name = "id", type = "id" },
                { name = "display_name", column = "name", type = "text" },
            ]
            relations = [
                { name = "books", target = "Book", join_table = "author_book", source_column = "author_id", target_column = "book_id" },
            ]

            [[entities]]
            name = "Book"
            table = "books"
            id = "isbn"
            fields = [
                { name = "isbn", type = "id" },
                { name = "pages", type = "integer" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(schema.root().table, "authors");
        let name = schema.resolve("display_name").unwrap();
        assert_eq!(name.descriptor.column, "name");
        let pages = schema.resolve("books.pages").unwrap();
        assert_eq!(pages.descriptor.field_type, FieldType::Integer);
        assert_eq!(schema.entity("Book").unwrap().id_column(), "isbn");
    }

    #[test]
    fn test_schema_rejects_unknown_target() {
        let entity = EntityDef {
            name: "A".into(),
            table: "a".into(),
            id: "id".into(),
            fields: vec![FieldDef::new("id", FieldType::Id)],
            relations: vec![RelationDef::many_to_many("bs", "B", "a_b", "a_id", "b_id")],
        };
        let err = Schema::new("A", vec![entity]).unwrap_err();
        assert!(matches!(err, SpecError::Schema(_)));
    }

    #[test]
    fn test_schema_rejects_missing_identity() {
        let entity = EntityDef {
            name: "A".into(),
            table: "a".into(),
            id: "id".into(),
            fields: vec![FieldDef::new("name", FieldType::Text)],
            relations: vec![],
        };
        assert!(Schema::new("A", vec![entity]).is_err());
    }

    #[test]
    fn test_builtin_schema_is_valid() {
        let builtin = Schema::user_role_permission();
        let rebuilt = Schema::new("User", builtin.entities().to_vec()).unwrap();
        assert_eq!(rebuilt, builtin);
        assert_eq!(builtin.root_id().descriptor.column, "id");
    }
}
