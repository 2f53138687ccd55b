//! The filter algebra used by `IndexStore` to select candidates across all
//! three physical stores, and the on-the-wire `$op`-keyed DSL it decodes from.
//!
//! `Filter` is a tagged, recursive algebraic data type (§9: "Dynamic typing in
//! filters"); backend translators are a pattern-match over it, never a
//! dynamically-typed query builder.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl FilterValue {
    fn to_sql_literal(&self) -> String {
        match self {
            Self::Str(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn to_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// `Filter = Leaf{field, op, value} | And[Filter] | Or[Filter]`.
#[derive(Debug, Clone)]
pub enum Filter {
    Compare {
        field: String,
        op: CompareOp,
        value: FilterValue,
    },
    In {
        field: String,
        values: Vec<FilterValue>,
    },
    NotIn {
        field: String,
        values: Vec<FilterValue>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: FilterValue) -> Self {
        Self::Compare {
            field: field.into(),
            op: CompareOp::Eq,
            value,
        }
    }

    /// Translate to the backend's native predicate string (used both for the
    /// Lance `only_if` predicate and as a SQL `WHERE` clause against
    /// `metadata.db`). Both stores speak SQL-ish boolean expressions so a
    /// single translation serves both, keeping the two stores consistent.
    pub fn to_sql(&self) -> String {
        match self {
            Self::Compare { field, op, value } => {
                format!("{} {} {}", quote_field(field), op.to_sql(), value.to_sql_literal())
            }
            Self::In { field, values } => {
                let list = values
                    .iter()
                    .map(FilterValue::to_sql_literal)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} IN ({})", quote_field(field), list)
            }
            Self::NotIn { field, values } => {
                let list = values
                    .iter()
                    .map(FilterValue::to_sql_literal)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} NOT IN ({})", quote_field(field), list)
            }
            Self::And(children) => combine(children, "AND"),
            Self::Or(children) => combine(children, "OR"),
        }
    }

    /// Evaluate this filter against a resolved metadata row, used as the
    /// read-time safety net and by the filter-soundness property test (§8.9).
    pub fn matches(&self, row: &std::collections::HashMap<String, String>) -> bool {
        match self {
            Self::Compare { field, op, value } => match row.get(field) {
                Some(actual) => compare_str(actual, *op, value),
                None => false,
            },
            Self::In { field, values } => match row.get(field) {
                Some(actual) => values.iter().any(|v| v.to_string() == *actual),
                None => false,
            },
            Self::NotIn { field, values } => match row.get(field) {
                Some(actual) => !values.iter().any(|v| v.to_string() == *actual),
                None => true,
            },
            Self::And(children) => children.iter().all(|c| c.matches(row)),
            Self::Or(children) => children.iter().any(|c| c.matches(row)),
        }
    }
}

fn compare_str(actual: &str, op: CompareOp, expected: &FilterValue) -> bool {
    // Numeric comparisons fall back to string comparison when the row's value
    // doesn't parse, so a misformatted column fails closed (excluded) rather
    // than panicking.
    match expected {
        FilterValue::Str(s) => match op {
            CompareOp::Eq => actual == s,
            CompareOp::Ne => actual != s,
            _ => actual.cmp(s.as_str()) == cmp_for(op),
        },
        FilterValue::Bool(b) => {
            let actual_bool = actual.parse::<bool>().unwrap_or(false);
            match op {
                CompareOp::Eq => actual_bool == *b,
                CompareOp::Ne => actual_bool != *b,
                _ => false,
            }
        }
        FilterValue::Int(i) => match actual.parse::<i64>() {
            Ok(a) => numeric_cmp(a as f64, op, *i as f64),
            Err(_) => false,
        },
        FilterValue::Float(x) => match actual.parse::<f64>() {
            Ok(a) => numeric_cmp(a, op, *x),
            Err(_) => false,
        },
    }
}

fn cmp_for(op: CompareOp) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match op {
        CompareOp::Gt => Ordering::Greater,
        CompareOp::Lt => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn numeric_cmp(a: f64, op: CompareOp, b: f64) -> bool {
    match op {
        CompareOp::Eq => (a - b).abs() < f64::EPSILON,
        CompareOp::Ne => (a - b).abs() >= f64::EPSILON,
        CompareOp::Gt => a > b,
        CompareOp::Gte => a >= b,
        CompareOp::Lt => a < b,
        CompareOp::Lte => a <= b,
    }
}

fn quote_field(field: &str) -> String {
    // Standard columns and metadata attributes alike are plain identifiers;
    // double-quote so SQLite/Lance treat reserved words and metadata keys
    // with punctuation as identifiers rather than keywords.
    format!("\"{}\"", field.replace('"', ""))
}

fn combine(children: &[Filter], joiner: &str) -> String {
    if children.is_empty() {
        return "1 = 1".to_string();
    }
    let parts: Vec<String> = children.iter().map(|c| format!("({})", c.to_sql())).collect();
    parts.join(&format!(" {joiner} "))
}

// ── Wire DSL ────────────────────────────────────────────────────────────────
//
// `{field: {$op: value}}` leaves, combined by an outer `AND`/`OR` list, or a
// single map taken as an implicit AND of its leaves (§6).

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireFilter {
    Combinator {
        #[serde(rename = "AND", default, skip_serializing_if = "Option::is_none")]
        and: Option<Vec<WireFilter>>,
        #[serde(rename = "OR", default, skip_serializing_if = "Option::is_none")]
        or: Option<Vec<WireFilter>>,
    },
    Leaf(std::collections::HashMap<String, Value>),
}

#[derive(Debug, thiserror::Error)]
pub enum FilterParseError {
    #[error("unknown filter operator: {0}")]
    UnknownOperator(String),
    #[error("filter leaf for field {0:?} had no recognised $op")]
    EmptyLeaf(String),
    #[error("unsupported filter value type for field {0:?}")]
    UnsupportedValue(String),
}

pub fn parse_wire_filter(wire: &WireFilter) -> Result<Filter, FilterParseError> {
    match wire {
        WireFilter::Combinator { and: Some(items), .. } => {
            let parsed = items.iter().map(parse_wire_filter).collect::<Result<_, _>>()?;
            Ok(Filter::And(parsed))
        }
        WireFilter::Combinator { or: Some(items), .. } => {
            let parsed = items.iter().map(parse_wire_filter).collect::<Result<_, _>>()?;
            Ok(Filter::Or(parsed))
        }
        WireFilter::Combinator { .. } => Ok(Filter::And(Vec::new())),
        WireFilter::Leaf(map) => {
            let mut leaves = Vec::with_capacity(map.len());
            for (field, ops) in map {
                leaves.push(parse_leaf(field, ops)?);
            }
            Ok(if leaves.len() == 1 {
                leaves.into_iter().next().unwrap()
            } else {
                Filter::And(leaves)
            })
        }
    }
}

fn parse_leaf(field: &str, ops: &Value) -> Result<Filter, FilterParseError> {
    let obj = match ops.as_object() {
        Some(o) => o,
        None => return Err(FilterParseError::EmptyLeaf(field.to_string())),
    };
    let (op, value) = obj
        .iter()
        .next()
        .ok_or_else(|| FilterParseError::EmptyLeaf(field.to_string()))?;

    match op.as_str() {
        "$eq" => Ok(Filter::eq(field, to_filter_value(value, field)?)),
        "$ne" => Ok(Filter::Compare {
            field: field.to_string(),
            op: CompareOp::Ne,
            value: to_filter_value(value, field)?,
        }),
        "$gt" => Ok(Filter::Compare {
            field: field.to_string(),
            op: CompareOp::Gt,
            value: to_filter_value(value, field)?,
        }),
        "$gte" => Ok(Filter::Compare {
            field: field.to_string(),
            op: CompareOp::Gte,
            value: to_filter_value(value, field)?,
        }),
        "$lt" => Ok(Filter::Compare {
            field: field.to_string(),
            op: CompareOp::Lt,
            value: to_filter_value(value, field)?,
        }),
        "$lte" => Ok(Filter::Compare {
            field: field.to_string(),
            op: CompareOp::Lte,
            value: to_filter_value(value, field)?,
        }),
        "$in" => Ok(Filter::In {
            field: field.to_string(),
            values: to_filter_values(value, field)?,
        }),
        "$nin" => Ok(Filter::NotIn {
            field: field.to_string(),
            values: to_filter_values(value, field)?,
        }),
        other => Err(FilterParseError::UnknownOperator(other.to_string())),
    }
}

fn to_filter_value(value: &Value, field: &str) -> Result<FilterValue, FilterParseError> {
    match value {
        Value::String(s) => Ok(FilterValue::Str(s.clone())),
        Value::Bool(b) => Ok(FilterValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(FilterValue::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(FilterValue::Float(f))
            } else {
                Err(FilterParseError::UnsupportedValue(field.to_string()))
            }
        }
        _ => Err(FilterParseError::UnsupportedValue(field.to_string())),
    }
}

fn to_filter_values(value: &Value, field: &str) -> Result<Vec<FilterValue>, FilterParseError> {
    let arr = value
        .as_array()
        .ok_or_else(|| FilterParseError::UnsupportedValue(field.to_string()))?;
    arr.iter().map(|v| to_filter_value(v, field)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_or_translate_to_sql() {
        let f = Filter::And(vec![
            Filter::eq("sensitivity", FilterValue::Str("public".into())),
            Filter::Or(vec![
                Filter::eq("project", FilterValue::Str("alpha".into())),
                Filter::eq("project", FilterValue::Str("beta".into())),
            ]),
        ]);
        let sql = f.to_sql();
        assert!(sql.contains("AND"));
        assert!(sql.contains("OR"));
    }

    #[test]
    fn matches_respects_conjunction() {
        let f = Filter::And(vec![
            Filter::eq("project", FilterValue::Str("alpha".into())),
            Filter::Compare {
                field: "file_size".into(),
                op: CompareOp::Gt,
                value: FilterValue::Int(100),
            },
        ]);
        let mut row = std::collections::HashMap::new();
        row.insert("project".to_string(), "alpha".to_string());
        row.insert("file_size".to_string(), "500".to_string());
        assert!(f.matches(&row));
        row.insert("file_size".to_string(), "10".to_string());
        assert!(!f.matches(&row));
    }

    #[test]
    fn parses_wire_dsl_implicit_and() {
        let json = serde_json::json!({
            "sensitivity": {"$eq": "public"},
            "file_size": {"$gte": 100}
        });
        let wire: WireFilter = serde_json::from_value(json).unwrap();
        let filter = parse_wire_filter(&wire).unwrap();
        matches!(filter, Filter::And(_));
    }

    #[test]
    fn parses_wire_dsl_outer_or() {
        let json = serde_json::json!({
            "OR": [
                {"project": {"$eq": "alpha"}},
                {"project": {"$eq": "beta"}}
            ]
        });
        let wire: WireFilter = serde_json::from_value(json).unwrap();
        let filter = parse_wire_filter(&wire).unwrap();
        matches!(filter, Filter::Or(_));
    }
}
