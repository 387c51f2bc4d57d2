//! Result aggregator.
//!
//! Collapses flat rows (one per joined child) back into one record per root,
//! gathering child columns into collections.

use std::collections::HashMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::error::SpecError;
use crate::db::{CellValue, FlatRecord, QueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// Deduplicated, first-seen order.
    Set,
    /// Every value, duplicates kept.
    List,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionField {
    /// Column label in the flat rows.
    pub source: String,
    /// Name in the grouped record.
    pub name: String,
    pub kind: CollectionKind,
}

/// Grouping key plus the columns to collect.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupShape {
    pub key: String,
    pub collections: Vec<CollectionField>,
}

impl GroupShape {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            collections: Vec::new(),
        }
    }

    pub fn set(self, source: &str, name: &str) -> Self {
        self.collect(source, name, CollectionKind::Set)
    }

    pub fn list(self, source: &str, name: &str) -> Self {
        self.collect(source, name, CollectionKind::List)
    }

    fn collect(mut self, source: &str, name: &str, kind: CollectionKind) -> Self {
        self.collections.push(CollectionField {
            source: source.to_string(),
            name: name.to_string(),
            kind,
        });
        self
    }

    fn is_collected(&self, column: &str) -> bool {
        self.collections.iter().any(|c| c.source == column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupedRecord {
    pub key: CellValue,
    /// Scalar columns, taken from the group's first row.
    pub fields: Vec<(String, CellValue)>,
    pub collections: Vec<(String, Vec<CellValue>)>,
}

impl GroupedRecord {
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn collection(&self, name: &str) -> Option<&[CellValue]> {
        self.collections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}

impl Serialize for GroupedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + self.collections.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        for (name, values) in &self.collections {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

fn push_value(target: &mut Vec<CellValue>, value: &CellValue, kind: CollectionKind) {
    if value.is_null() {
        return;
    }
    if kind == CollectionKind::Set && target.contains(value) {
        return;
    }
    target.push(value.clone());
}

pub struct Aggregator {
    shape: GroupShape,
}

impl Aggregator {
    pub fn new(shape: GroupShape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> &GroupShape {
        &self.shape
    }

    pub fn aggregate_result(&self, result: &QueryResult) -> Result<Vec<GroupedRecord>, SpecError> {
        for column in std::iter::once(&self.shape.key)
            .chain(self.shape.collections.iter().map(|c| &c.source))
        {
            if result.column_index(column).is_none() {
                return Err(SpecError::MissingColumn(column.clone()));
            }
        }
        self.aggregate(&result.records())
    }

    /// Group rows by key in first-appearance order.
    pub fn aggregate(&self, rows: &[FlatRecord]) -> Result<Vec<GroupedRecord>, SpecError> {
        let mut groups: Vec<GroupedRecord> = Vec::new();
        let mut index_of: HashMap<CellValue, usize> = HashMap::new();
        for row in rows {
            let key = row
                .get(&self.shape.key)
                .ok_or_else(|| SpecError::MissingColumn(self.shape.key.clone()))?;

            let index = match index_of.get(key).copied() {
                Some(index) => index,
                None => {
                    groups.push(GroupedRecord {
                        key: key.clone(),
                        fields: row
                            .fields
                            .iter()
                            .filter(|(name, _)| !self.shape.is_collected(name))
                            .cloned()
                            .collect(),
                        collections: self
                            .shape
                            .collections
                            .iter()
                            .map(|c| (c.name.clone(), Vec::new()))
                            .collect(),
                    });
                    index_of.insert(key.clone(), groups.len() - 1);
                    groups.len() - 1
                }
            };

            let group = &mut groups[index];
            for (field, (_, values)) in self.shape.collections.iter().zip(group.collections.iter_mut()) {
                let value = row
                    .get(&field.source)
                    .ok_or_else(|| SpecError::MissingColumn(field.source.clone()))?;
                push_value(values, value, field.kind);
            }
        }
        tracing::debug!(rows = rows.len(), groups = groups.len(), "rows aggregated");
        Ok(groups)
    }

    /// Merge records sharing a key. Already grouped input comes back unchanged.
    pub fn regroup(&self, records: Vec<GroupedRecord>) -> Vec<GroupedRecord> {
        let mut merged: Vec<GroupedRecord> = Vec::with_capacity(records.len());
        let mut index_of: HashMap<CellValue, usize> = HashMap::with_capacity(records.len());
        for record in records {
            match index_of.get(&record.key).copied() {
                Some(index) => {
                    let existing = &mut merged[index];
                    for (name, values) in record.collections {
                        let kind = self
                            .shape
                            .collections
                            .iter()
                            .find(|c| c.name == name)
                            .map(|c| c.kind)
                            .unwrap_or(CollectionKind::List);
                        match existing.collections.iter_mut().find(|(n, _)| *n == name) {
                            Some((_, target)) => {
                                for value in &values {
                                    push_value(target, value, kind);
                                }
                            }
                            None => existing.collections.push((name, values)),
                        }
                    }
                }
                None => {
                    index_of.insert(record.key.clone(), merged.len());
                    merged.push(record);
                }
            }
        }
        merged
    }
}
