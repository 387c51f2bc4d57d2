//! In-process storage engine.
//!
//! Interprets the same plans the SQL lowering compiles, over rows held in
//! memory: one table per entity and one per link table. Join, predicate and
//! ordering semantics follow PostgreSQL, including NULL handling.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::engine::StorageEngine;
use super::query::{CellValue, QueryResult};
use crate::spec::join::{JoinKind, JoinPath};
use crate::spec::page::{Direction, OrderTerm, Window};
use crate::spec::plan::{CountQuery, IdentifierQuery, SelectPlan};
use crate::spec::predicate::PredicateNode;
use crate::spec::schema::{FieldPath, RelationPath};

pub type DataRow = BTreeMap<String, CellValue>;

/// Tables by name. Entity tables and link tables share the same shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    tables: BTreeMap<String, Vec<DataRow>>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse dataset")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset {}", path.display()))?;
        Self::from_json_str(&content)
    }

    pub fn insert(&mut self, table: &str, row: DataRow) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Insert a row built from `(column, value)` pairs.
    pub fn insert_values<I, K>(&mut self, table: &str, values: I)
    where
        I: IntoIterator<Item = (K, CellValue)>,
        K: Into<String>,
    {
        let row = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.insert(table, row);
    }

    pub fn rows(&self, table: &str) -> &[DataRow] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

/// One joined row: the root row plus one optional row per join step.
#[derive(Debug, Clone)]
struct Binding<'d> {
    root: &'d DataRow,
    steps: Vec<Option<&'d DataRow>>,
}

impl<'d> Binding<'d> {
    fn row_for(&self, joins: &JoinPath, relations: &RelationPath) -> Option<&'d DataRow> {
        if relations.is_root() {
            return Some(self.root);
        }
        let index = joins.steps.iter().position(|s| &s.path == relations)?;
        self.steps.get(index).copied().flatten()
    }

    /// `None` when the relation has no joined row, so any comparison fails.
    fn value(&self, joins: &JoinPath, field: &FieldPath) -> Option<CellValue> {
        self.row_for(joins, &field.relations).map(|row| {
            row.get(&field.descriptor.column)
                .cloned()
                .unwrap_or(CellValue::Null)
        })
    }

    fn root_id(&self, joins: &JoinPath) -> CellValue {
        self.root
            .get(&joins.root.id_column)
            .cloned()
            .unwrap_or(CellValue::Null)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    dataset: Dataset,
}

impl MemoryEngine {
    pub fn new(dataset: Dataset) -> Self {
        Self { dataset }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn expand<'d>(&'d self, joins: &JoinPath) -> Vec<Binding<'d>> {
        let mut bindings: Vec<Binding<'d>> = self
            .dataset
            .rows(&joins.root.table)
            .iter()
            .map(|root| Binding {
                root,
                steps: Vec::with_capacity(joins.steps.len()),
            })
            .collect();

        for step in &joins.steps {
            let parent_index = match step.path.parent() {
                Some(parent) if !parent.is_root() => joins.steps.iter().position(|s| s.path == parent),
                _ => None,
            };
            let links = self.dataset.rows(&step.join_table);
            let targets = self.dataset.rows(&step.table);

            let mut next = Vec::with_capacity(bindings.len());
            for binding in bindings {
                let parent = match parent_index {
                    Some(i) => binding.steps.get(i).copied().flatten(),
                    None => Some(binding.root),
                };
                let mut children: Vec<&'d DataRow> = Vec::new();
                if let Some(parent_id) = parent.and_then(|p| p.get(&step.parent_id)) {
                    for link in links {
                        if parent_id.is_null() || link.get(&step.source_column) != Some(parent_id) {
                            continue;
                        }
                        if let Some(target_id) = link.get(&step.target_column) {
                            children.extend(
                                targets
                                    .iter()
                                    .filter(|t| t.get(&step.target_id) == Some(target_id)),
                            );
                        }
                    }
                }

                if children.is_empty() {
                    if step.kind == JoinKind::Left {
                        let mut kept = binding;
                        kept.steps.push(None);
                        next.push(kept);
                    }
                    continue;
                }
                for child in children {
                    let mut extended = binding.clone();
                    extended.steps.push(Some(child));
                    next.push(extended);
                }
            }
            bindings = next;
        }
        bindings
    }

    fn filter<'d>(
        &'d self,
        joins: &JoinPath,
        predicate: &PredicateNode,
        bindings: Vec<Binding<'d>>,
    ) -> Vec<Binding<'d>> {
        if predicate.is_always() {
            return bindings;
        }
        bindings
            .into_iter()
            .filter(|b| predicate.evaluate(&|field: &FieldPath| b.value(joins, field)))
            .collect()
    }

    /// Distinct root identifiers, ordered and windowed like the SQL
    /// `SELECT DISTINCT .. ORDER BY .. LIMIT .. OFFSET`.
    fn identifiers(&self, query: &IdentifierQuery) -> Vec<CellValue> {
        let bindings = self.filter(&query.joins, &query.predicate, self.expand(&query.joins));
        let mut seen = HashSet::new();
        let mut roots: Vec<&DataRow> = Vec::new();
        let mut ids: Vec<CellValue> = Vec::new();
        for binding in bindings {
            let id = binding.root_id(&query.joins);
            if seen.insert(id.clone()) {
                roots.push(binding.root);
                ids.push(id);
            }
        }

        let mut keyed: Vec<(CellValue, &DataRow)> = ids.into_iter().zip(roots).collect();
        if !query.order.is_empty() {
            keyed.sort_by(|(_, a), (_, b)| compare_rows(&query.order, a, b));
        }
        apply_window(keyed, query.window)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }
}

fn compare_rows(order: &[OrderTerm], a: &DataRow, b: &DataRow) -> Ordering {
    for term in order {
        let column = &term.field.descriptor.column;
        let left = a.get(column).unwrap_or(&CellValue::Null);
        let right = b.get(column).unwrap_or(&CellValue::Null);
        let ord = match term.direction {
            Direction::Asc => left.total_cmp(right),
            Direction::Desc => right.total_cmp(left),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn apply_window<T>(items: Vec<T>, window: Option<Window>) -> Vec<T> {
    match window {
        Some(w) => items
            .into_iter()
            .skip(usize::try_from(w.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(w.limit).unwrap_or(usize::MAX))
            .collect(),
        None => items,
    }
}

impl StorageEngine for MemoryEngine {
    async fn fetch(&self, plan: &SelectPlan) -> Result<QueryResult> {
        let start = Instant::now();
        let mut bindings = self.filter(&plan.joins, &plan.predicate, self.expand(&plan.joins));

        if let Some(restriction) = &plan.restriction {
            let allowed: HashSet<CellValue> = self.identifiers(restriction).into_iter().collect();
            bindings.retain(|b| allowed.contains(&b.root_id(&plan.joins)));
        }
        if !plan.order.is_empty() {
            bindings.sort_by(|a, b| compare_rows(&plan.order, a.root, b.root));
        }
        let bindings = apply_window(bindings, plan.window);

        let rows: Vec<Vec<CellValue>> = bindings
            .iter()
            .map(|b| {
                plan.columns
                    .columns
                    .iter()
                    .map(|c| b.value(&plan.joins, &c.field).unwrap_or(CellValue::Null))
                    .collect()
            })
            .collect();
        let result = QueryResult::new(plan.columns.labels(), rows, start.elapsed());
        tracing::debug!(rows = result.row_count, "memory fetch complete");
        Ok(result)
    }

    async fn count(&self, query: &CountQuery) -> Result<u64> {
        let bindings = self.filter(&query.joins, &query.predicate, self.expand(&query.joins));
        let distinct: HashSet<CellValue> = bindings
            .iter()
            .map(|b| b.root_id(&query.joins))
            .filter(|id| !id.is_null())
            .collect();
        Ok(distinct.len() as u64)
    }
}
