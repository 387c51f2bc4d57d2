//! Predicate builder.
//!
//! Turns optional filter criteria into a boolean expression tree over
//! resolved field paths. A criterion whose value is blank is dropped from the
//! tree entirely, so an empty search box never turns into "match nothing".

use std::fmt;

use chrono::{DateTime, Utc};

use super::error::SpecError;
use super::schema::{FieldPath, FieldType, Schema};
use crate::db::CellValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Eq,
    NotEq,
    Contains,
    StartsWith,
    EndsWith,
    Lt,
    LtEq,
    Gt,
    GtEq,
    /// Inclusive range; either bound may be absent.
    Between,
}

impl Comparator {
    pub fn is_pattern(self) -> bool {
        matches!(
            self,
            Comparator::Contains | Comparator::StartsWith | Comparator::EndsWith
        )
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Comparator::Eq => "eq",
            Comparator::NotEq => "not_eq",
            Comparator::Contains => "contains",
            Comparator::StartsWith => "starts_with",
            Comparator::EndsWith => "ends_with",
            Comparator::Lt => "lt",
            Comparator::LtEq => "lt_eq",
            Comparator::Gt => "gt",
            Comparator::GtEq => "gt_eq",
            Comparator::Between => "between",
        };
        write!(f, "{}", name)
    }
}

/// How a criterion constrains the relations it crosses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JoinRequirement {
    /// Rows without a related match may still flow through the join.
    #[default]
    Optional,
    /// The root must have at least one related row.
    Required,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(CellValue),
    Range {
        low: Option<CellValue>,
        high: Option<CellValue>,
    },
}

fn is_blank(value: &CellValue) -> bool {
    match value {
        CellValue::Null => true,
        CellValue::Text(s) => s.trim().is_empty(),
        _ => false,
    }
}

impl FilterValue {
    /// Blank values carry no constraint.
    pub fn is_blank(&self) -> bool {
        match self {
            FilterValue::Scalar(v) => is_blank(v),
            FilterValue::Range { low, high } => {
                low.as_ref().map_or(true, is_blank) && high.as_ref().map_or(true, is_blank)
            }
        }
    }
}

impl From<CellValue> for FilterValue {
    fn from(value: CellValue) -> Self {
        FilterValue::Scalar(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Scalar(value.into())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Scalar(value.into())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Scalar(value.into())
    }
}

/// A `(field path, comparator, value)` triple as supplied by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCriterion {
    pub field: String,
    pub comparator: Comparator,
    pub value: FilterValue,
    pub requirement: JoinRequirement,
}

impl FilterCriterion {
    pub fn new(field: &str, comparator: Comparator, value: impl Into<FilterValue>) -> Self {
        Self {
            field: field.to_string(),
            comparator,
            value: value.into(),
            requirement: JoinRequirement::Optional,
        }
    }

    pub fn equals(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::new(field, Comparator::Eq, value)
    }

    pub fn contains(field: &str, text: &str) -> Self {
        Self::new(field, Comparator::Contains, text)
    }

    pub fn between(field: &str, low: Option<CellValue>, high: Option<CellValue>) -> Self {
        Self::new(field, Comparator::Between, FilterValue::Range { low, high })
    }

    /// Demand at least one related row for the relations this path crosses.
    pub fn required(mut self) -> Self {
        self.requirement = JoinRequirement::Required;
        self
    }
}

/// Criteria as a tree: single filters, AND groups and OR groups.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Filter(FilterCriterion),
    All(Vec<Criterion>),
    Any(Vec<Criterion>),
}

impl From<FilterCriterion> for Criterion {
    fn from(filter: FilterCriterion) -> Self {
        Criterion::Filter(filter)
    }
}

/// Right-hand side of a condition after type checking.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(CellValue),
    /// Escaped LIKE pattern with wildcards in place.
    Pattern(String),
    Range { low: CellValue, high: CellValue },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: FieldPath,
    pub comparator: Comparator,
    pub operand: Operand,
    pub requirement: JoinRequirement,
}

impl Condition {
    /// SQL comparison semantics: anything compared with NULL is false.
    pub fn evaluate(&self, cell: &CellValue) -> bool {
        if cell.is_null() {
            return false;
        }
        match &self.operand {
            Operand::Pattern(pattern) => cell.as_str().is_some_and(|s| like_match(pattern, s)),
            Operand::Range { low, high } => {
                cell.total_cmp(low).is_ge() && cell.total_cmp(high).is_le()
            }
            Operand::Value(value) => {
                let ord = cell.total_cmp(value);
                match self.comparator {
                    Comparator::NotEq => ord.is_ne(),
                    Comparator::Lt => ord.is_lt(),
                    Comparator::LtEq => ord.is_le(),
                    Comparator::Gt => ord.is_gt(),
                    Comparator::GtEq => ord.is_ge(),
                    _ => ord.is_eq(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum PredicateNode {
    /// No constraint.
    #[default]
    Always,
    Condition(Condition),
    And(Vec<PredicateNode>),
    Or(Vec<PredicateNode>),
}

impl PredicateNode {
    pub fn is_always(&self) -> bool {
        matches!(self, PredicateNode::Always)
    }

    /// Every condition in the tree, depth first.
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect(&mut out, false);
        out
    }

    /// Conditions that every matching row must satisfy, i.e. those not
    /// nested beneath an OR.
    pub fn mandatory_conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect(&mut out, true);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Condition>, mandatory_only: bool) {
        match self {
            PredicateNode::Always => {}
            PredicateNode::Condition(c) => out.push(c),
            PredicateNode::And(children) => {
                for child in children {
                    child.collect(out, mandatory_only);
                }
            }
            PredicateNode::Or(children) => {
                if mandatory_only && children.len() > 1 {
                    return;
                }
                for child in children {
                    child.collect(out, mandatory_only);
                }
            }
        }
    }

    /// Evaluate against a row. `value_of` yields the cell for a field path,
    /// `None` when the path's relation has no joined row.
    pub fn evaluate<F>(&self, value_of: &F) -> bool
    where
        F: Fn(&FieldPath) -> Option<CellValue>,
    {
        match self {
            PredicateNode::Always => true,
            PredicateNode::Condition(c) => value_of(&c.field)
                .map(|cell| c.evaluate(&cell))
                .unwrap_or(false),
            PredicateNode::And(children) => children.iter().all(|c| c.evaluate(value_of)),
            PredicateNode::Or(children) => children.iter().any(|c| c.evaluate(value_of)),
        }
    }
}

/// Escape LIKE metacharacters so user text matches literally.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

enum LikeToken {
    AnyRun,
    AnyOne,
    Literal(char),
}

/// Case-sensitive LIKE matching with backslash escapes.
pub fn like_match(pattern: &str, text: &str) -> bool {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        tokens.push(match ch {
            '%' => LikeToken::AnyRun,
            '_' => LikeToken::AnyOne,
            '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
            other => LikeToken::Literal(other),
        });
    }
    let text: Vec<char> = text.chars().collect();

    // matched[j]: pattern prefix consumed so far matches text[..j]
    let mut matched = vec![false; text.len() + 1];
    matched[0] = true;
    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            LikeToken::AnyRun => {
                let mut reachable = false;
                for j in 0..=text.len() {
                    reachable |= matched[j];
                    next[j] = reachable;
                }
            }
            LikeToken::AnyOne => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1];
                }
            }
            LikeToken::Literal(c) => {
                for j in 1..=text.len() {
                    next[j] = matched[j - 1] && text[j - 1] == *c;
                }
            }
        }
        matched = next;
    }
    matched[text.len()]
}

pub struct PredicateBuilder<'a> {
    schema: &'a Schema,
}

impl<'a> PredicateBuilder<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Build the predicate tree. Top-level criteria are AND-ed together.
    pub fn build(&self, criteria: &[Criterion]) -> Result<PredicateNode, SpecError> {
        let node = self.group(criteria, false)?;
        tracing::debug!(
            criteria = criteria.len(),
            conditions = node.conditions().len(),
            "predicate built"
        );
        Ok(node)
    }

    fn group(&self, criteria: &[Criterion], any: bool) -> Result<PredicateNode, SpecError> {
        let mut children = Vec::with_capacity(criteria.len());
        for criterion in criteria {
            let node = match criterion {
                Criterion::Filter(filter) => self.condition(filter)?,
                Criterion::All(inner) => self.group(inner, false)?,
                Criterion::Any(inner) => self.group(inner, true)?,
            };
            if !node.is_always() {
                children.push(node);
            }
        }
        Ok(match children.len() {
            0 => PredicateNode::Always,
            1 => children.remove(0),
            _ if any => PredicateNode::Or(children),
            _ => PredicateNode::And(children),
        })
    }

    fn condition(&self, filter: &FilterCriterion) -> Result<PredicateNode, SpecError> {
        // The path is checked even when the value is blank.
        let field = self.schema.resolve(&filter.field)?;
        if filter.value.is_blank() {
            tracing::trace!(field = %filter.field, "blank criterion omitted");
            return Ok(PredicateNode::Always);
        }

        let field_type = field.descriptor.field_type;
        let incompatible = |reason: &str| SpecError::IncompatibleValue {
            path: field.path.clone(),
            field_type: field_type.to_string(),
            comparator: filter.comparator.to_string(),
            reason: reason.to_string(),
        };

        let (comparator, operand) = match (&filter.value, filter.comparator) {
            (FilterValue::Range { .. }, c) if c != Comparator::Between => {
                return Err(incompatible("a range needs the between comparator"));
            }
            (FilterValue::Scalar(_), Comparator::Between) => {
                return Err(incompatible("between needs a range value"));
            }
            (FilterValue::Range { low, high }, _) => {
                if field_type == FieldType::Text {
                    return Err(incompatible("ranges apply to numeric and timestamp fields"));
                }
                let low = match low.as_ref().filter(|v| !is_blank(v)) {
                    Some(v) => Some(coerce(v, field_type).map_err(|r| incompatible(&r))?),
                    None => None,
                };
                let high = match high.as_ref().filter(|v| !is_blank(v)) {
                    Some(v) => Some(coerce(v, field_type).map_err(|r| incompatible(&r))?),
                    None => None,
                };
                match (low, high) {
                    (Some(low), Some(high)) => (Comparator::Between, Operand::Range { low, high }),
                    (Some(low), None) => (Comparator::GtEq, Operand::Value(low)),
                    (None, Some(high)) => (Comparator::LtEq, Operand::Value(high)),
                    (None, None) => return Ok(PredicateNode::Always),
                }
            }
            (FilterValue::Scalar(value), c) if c.is_pattern() => {
                if field_type != FieldType::Text {
                    return Err(incompatible("pattern comparators apply to text fields"));
                }
                let text = value
                    .as_str()
                    .ok_or_else(|| incompatible("pattern value must be text"))?;
                let escaped = escape_like(text);
                let pattern = match c {
                    Comparator::StartsWith => format!("{}%", escaped),
                    Comparator::EndsWith => format!("%{}", escaped),
                    _ => format!("%{}%", escaped),
                };
                (c, Operand::Pattern(pattern))
            }
            (FilterValue::Scalar(value), c) => (
                c,
                Operand::Value(coerce(value, field_type).map_err(|r| incompatible(&r))?),
            ),
        };

        Ok(PredicateNode::Condition(Condition {
            field,
            comparator,
            operand,
            requirement: filter.requirement,
        }))
    }
}

/// Convert a caller value to the field's storage type.
fn coerce(value: &CellValue, field_type: FieldType) -> Result<CellValue, String> {
    match (field_type, value) {
        (FieldType::Text, CellValue::Text(_)) => Ok(value.clone()),
        (FieldType::Id | FieldType::Integer, CellValue::Int64(_)) => Ok(value.clone()),
        (FieldType::Id | FieldType::Integer, CellValue::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(CellValue::Int64)
            .map_err(|_| format!("`{}` is not an integer", s)),
        (FieldType::Timestamp, CellValue::TimestampTz(_)) => Ok(value.clone()),
        (FieldType::Timestamp, CellValue::Text(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| CellValue::TimestampTz(dt.with_timezone(&Utc)))
            .map_err(|_| format!("`{}` is not an RFC 3339 timestamp", s)),
        (_, other) => Err(format!("value `{}` does not fit", other.display())),
    }
}
