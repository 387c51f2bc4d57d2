//! Projection engine.
//!
//! A projection shape is the exact list of field paths a caller wants back.
//! The engine turns it into the column set of a query against a planned join
//! path and never widens it.

use super::error::SpecError;
use super::join::JoinPath;
use super::schema::{FieldPath, RelationPath, Schema};

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionShape {
    fields: Vec<FieldPath>,
}

impl ProjectionShape {
    /// Resolve `paths` in order. Repeated paths are kept once.
    pub fn new<S: AsRef<str>>(schema: &Schema, paths: &[S]) -> Result<Self, SpecError> {
        let mut fields: Vec<FieldPath> = Vec::with_capacity(paths.len());
        for path in paths {
            let field = schema.resolve(path.as_ref())?;
            if !fields.iter().any(|f| f.path == field.path) {
                fields.push(field);
            }
        }
        if fields.is_empty() {
            return Err(SpecError::EmptyProjection);
        }
        Ok(Self { fields })
    }

    /// Every scalar field of the root entity, i.e. a full-entity fetch.
    pub fn entity(schema: &Schema) -> Self {
        let root = schema.root();
        let fields = root
            .fields
            .iter()
            .filter_map(|f| schema.resolve(&f.name).ok())
            .collect();
        Self { fields }
    }

    /// Only the root identifier.
    pub fn identity(schema: &Schema) -> Self {
        Self {
            fields: vec![schema.root_id()],
        }
    }

    pub fn fields(&self) -> &[FieldPath] {
        &self.fields
    }

    pub fn labels(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.path.as_str()).collect()
    }

    /// Distinct relation paths the shape reaches into.
    pub fn relation_paths(&self) -> Vec<RelationPath> {
        let mut paths: Vec<RelationPath> = Vec::new();
        for field in &self.fields {
            if !field.is_root() && !paths.contains(&field.relations) {
                paths.push(field.relations.clone());
            }
        }
        paths
    }

    pub fn is_flat(&self) -> bool {
        self.fields.iter().any(|f| !f.is_root())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedColumn {
    /// Output label, the field path as requested.
    pub label: String,
    /// Table alias the column is read from.
    pub alias: String,
    pub field: FieldPath,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSet {
    pub columns: Vec<ProjectedColumn>,
    /// First collection relation the projection crosses. When set the result
    /// has one row per related child and must be aggregated.
    pub flat_through: Option<RelationPath>,
}

impl ColumnSet {
    pub fn is_flat(&self) -> bool {
        self.flat_through.is_some()
    }

    pub fn labels(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.label.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

pub struct ProjectionEngine;

impl ProjectionEngine {
    pub fn project(shape: &ProjectionShape, joins: &JoinPath) -> Result<ColumnSet, SpecError> {
        let mut columns = Vec::with_capacity(shape.fields().len());
        let mut flat_through = None;
        for field in shape.fields() {
            let alias = joins
                .alias_of(&field.relations)
                .ok_or_else(|| SpecError::UndeclaredJoin {
                    path: field.path.clone(),
                    relation: field.relations.to_string(),
                })?;
            if flat_through.is_none() {
                flat_through = field.collection();
            }
            columns.push(ProjectedColumn {
                label: field.path.clone(),
                alias: alias.to_string(),
                field: field.clone(),
            });
        }
        tracing::debug!(
            columns = columns.len(),
            flat = flat_through.is_some(),
            "projection resolved"
        );
        Ok(ColumnSet {
            columns,
            flat_through,
        })
    }
}
