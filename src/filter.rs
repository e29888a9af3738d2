//! Structured filter predicates over document fields.
//!
//! A [`Filter`] is a boolean tree of field conditions. Fields name either a
//! document attribute (`id`, `index`) or a metadata key. A condition on a
//! field the document does not have never matches.
//!
//! Filters can be written in a JSON syntax:
//!
//! ```text
//! {
//!     "type": "article",
//!     "rating": {"$gte": 3},
//!     "$or": {
//!         "genre": ["economy", "politics"],
//!         "publisher": {"$eq": "nytimes"}
//!     }
//! }
//! ```
//!
//! Keys are either logical operators (`$and`, `$or`, `$not`) or field
//! names. Sibling keys are combined with AND. A field mapped to a scalar
//! means `$eq`, a field mapped to a list means `$in`, and a field mapped to
//! an object lists comparison operators (`$eq`, `$ne`, `$in`, `$nin`, `$gt`,
//! `$gte`, `$lt`, `$lte`). Logical operators take an object of clauses or a
//! list of such objects.

use std::{cmp::Ordering, str::FromStr};

use serde_json::{Map, Value};

use crate::{
    document::{Document, MetaValue},
    error::{Error, Result},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(MetaValue),
    Ne(MetaValue),
    In(Vec<MetaValue>),
    NotIn(Vec<MetaValue>),
    Gt(MetaValue),
    Gte(MetaValue),
    Lt(MetaValue),
    Lte(MetaValue),
}

impl Condition {
    fn holds(&self, value: &MetaValue) -> bool {
        let ord = |bound: &MetaValue| value.compare(bound);
        match self {
            Condition::Eq(v) => value.loosely_eq(v),
            Condition::Ne(v) => !value.loosely_eq(v),
            Condition::In(vs) => vs.iter().any(|v| value.loosely_eq(v)),
            Condition::NotIn(vs) => !vs.iter().any(|v| value.loosely_eq(v)),
            Condition::Gt(v) => ord(v) == Some(Ordering::Greater),
            Condition::Gte(v) => {
                matches!(ord(v), Some(Ordering::Greater | Ordering::Equal))
            }
            Condition::Lt(v) => ord(v) == Some(Ordering::Less),
            Condition::Lte(v) => {
                matches!(ord(v), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Field { field: String, condition: Condition },
}

impl Filter {
    pub fn field(field: impl Into<String>, condition: Condition) -> Self {
        Filter::Field {
            field: field.into(),
            condition,
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Self::field(field, Condition::Eq(value.into()))
    }

    pub fn ne(field: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Self::field(field, Condition::Ne(value.into()))
    }

    pub fn is_in<V: Into<MetaValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::field(
            field,
            Condition::In(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn gt(field: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Self::field(field, Condition::Gt(value.into()))
    }

    pub fn gte(field: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Self::field(field, Condition::Gte(value.into()))
    }

    pub fn lt(field: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Self::field(field, Condition::Lt(value.into()))
    }

    pub fn lte(field: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Self::field(field, Condition::Lte(value.into()))
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut clauses) => {
                clauses.push(other);
                Filter::And(clauses)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut clauses) => {
                clauses.push(other);
                Filter::Or(clauses)
            }
            first => Filter::Or(vec![first, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Evaluate the predicate against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
            Filter::Not(inner) => !inner.matches(doc),
            Filter::Field { field, condition } => doc
                .field(field)
                .is_some_and(|value| condition.holds(&value)),
        }
    }

    /// The index name this filter pins results to, if a top-level
    /// conjunct is `index == <name>`.
    pub fn index_scope(&self) -> Option<&str> {
        match self {
            Filter::Field {
                field,
                condition: Condition::Eq(MetaValue::String(name)),
            } if field == "index" => Some(name),
            Filter::And(clauses) => clauses.iter().find_map(Self::index_scope),
            _ => None,
        }
    }

    /// Parse the JSON filter syntax described in the module docs.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            Error::InvalidFilter("filter must be a JSON object".into())
        })?;
        Ok(conjunction(parse_clauses(object)?))
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)
            .map_err(|e| Error::InvalidFilter(e.to_string()))?;
        Self::from_json(&value)
    }
}

fn conjunction(mut clauses: Vec<Filter>) -> Filter {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        Filter::And(clauses)
    }
}

fn parse_clauses(object: &Map<String, Value>) -> Result<Vec<Filter>> {
    let mut clauses = Vec::with_capacity(object.len());
    for (key, value) in object {
        let clause = match key.as_str() {
            "$and" => Filter::And(parse_logical(value)?),
            "$or" => Filter::Or(parse_logical(value)?),
            "$not" => {
                Filter::Not(Box::new(conjunction(parse_logical(value)?)))
            }
            op if op.starts_with('$') => {
                return Err(Error::InvalidFilter(format!(
                    "unknown logical operator '{op}'"
                )));
            }
            field => parse_field(field, value)?,
        };
        clauses.push(clause);
    }
    Ok(clauses)
}

/// Operands of a logical operator: one object whose clauses become the
/// operands, or a list of objects each of which becomes one operand.
fn parse_logical(value: &Value) -> Result<Vec<Filter>> {
    match value {
        Value::Object(object) => parse_clauses(object),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                let object = item.as_object().ok_or_else(|| {
                    Error::InvalidFilter(
                        "logical operator lists must contain objects".into(),
                    )
                })?;
                Ok(conjunction(parse_clauses(object)?))
            })
            .collect(),
        _ => Err(Error::InvalidFilter(
            "logical operator expects an object or a list".into(),
        )),
    }
}

fn parse_field(field: &str, value: &Value) -> Result<Filter> {
    match value {
        Value::Object(ops) => {
            let mut clauses = Vec::with_capacity(ops.len());
            for (op, operand) in ops {
                let condition = match op.as_str() {
                    "$eq" => Condition::Eq(scalar(operand)?),
                    "$ne" => Condition::Ne(scalar(operand)?),
                    "$in" => Condition::In(list(operand)?),
                    "$nin" => Condition::NotIn(list(operand)?),
                    "$gt" => Condition::Gt(scalar(operand)?),
                    "$gte" => Condition::Gte(scalar(operand)?),
                    "$lt" => Condition::Lt(scalar(operand)?),
                    "$lte" => Condition::Lte(scalar(operand)?),
                    other => {
                        return Err(Error::InvalidFilter(format!(
                            "unknown comparison operator '{other}' on '{field}'"
                        )));
                    }
                };
                clauses.push(Filter::field(field, condition));
            }
            if clauses.is_empty() {
                return Err(Error::InvalidFilter(format!(
                    "no comparison given for '{field}'"
                )));
            }
            Ok(conjunction(clauses))
        }
        Value::Array(_) => Ok(Filter::field(field, Condition::In(list(value)?))),
        scalar_value => Ok(Filter::field(
            field,
            Condition::Eq(scalar(scalar_value)?),
        )),
    }
}

fn scalar(value: &Value) -> Result<MetaValue> {
    match value {
        Value::Array(_) | Value::Object(_) => Err(Error::InvalidFilter(
            format!("expected a scalar, got {value}"),
        )),
        _ => serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidFilter(e.to_string())),
    }
}

fn list(value: &Value) -> Result<Vec<MetaValue>> {
    match value {
        Value::Array(items) => items.iter().map(scalar).collect(),
        _ => Err(Error::InvalidFilter(format!(
            "expected a list, got {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn article() -> Document {
        Document::with_id("a1", "text")
            .in_index("news")
            .with_meta("type", "article")
            .with_meta("rating", 4)
            .with_meta("genre", "economy")
            .with_meta("date", "2019-06-01")
    }

    #[test]
    fn field_conditions() {
        let doc = article();
        assert!(Filter::eq("type", "article").matches(&doc));
        assert!(!Filter::eq("type", "blog").matches(&doc));
        assert!(Filter::ne("type", "blog").matches(&doc));
        assert!(Filter::gte("rating", 4).matches(&doc));
        assert!(Filter::gt("rating", 3.5).matches(&doc));
        assert!(!Filter::lt("rating", 4).matches(&doc));
        assert!(Filter::is_in("genre", ["economy", "politics"]).matches(&doc));
        assert!(Filter::eq("index", "news").matches(&doc));
        assert!(Filter::eq("id", "a1").matches(&doc));
    }

    #[test]
    fn unknown_field_never_matches() {
        let doc = article();
        assert!(!Filter::eq("author", "x").matches(&doc));
        assert!(!Filter::ne("author", "x").matches(&doc));
        assert!(Filter::eq("author", "x").not().matches(&doc));
    }

    #[test]
    fn mismatched_tags_do_not_match() {
        let doc = article();
        assert!(!Filter::eq("rating", "4").matches(&doc));
        assert!(!Filter::gt("type", 1).matches(&doc));
    }

    #[test]
    fn parses_implicit_operators() {
        let filter = Filter::from_json(&json!({
            "type": "article",
            "date": {"$gte": "2015-01-01", "$lt": "2021-01-01"},
            "rating": {"$gte": 3},
            "$or": {
                "genre": ["economy", "politics"],
                "publisher": "nytimes"
            }
        }))
        .unwrap();
        assert!(filter.matches(&article()));

        let blog = article().with_meta("type", "blog");
        assert!(!filter.matches(&blog));
    }

    #[test]
    fn parses_list_of_logical_groups() {
        let filter: Filter = r#"{
            "$or": [
                {"$and": {"type": "News Paper", "date": {"$lt": "2019-01-01"}}},
                {"$and": {"type": "article", "date": {"$gte": "2019-01-01"}}}
            ]
        }"#
        .parse()
        .unwrap();
        assert!(filter.matches(&article()));
        let old = article().with_meta("date", "2018-01-01");
        assert!(!filter.matches(&old));
    }

    #[test]
    fn parses_not() {
        let filter =
            Filter::from_json(&json!({"$not": {"genre": {"$in": ["economy"]}}}))
                .unwrap();
        assert!(!filter.matches(&article()));
    }

    #[test]
    fn rejects_malformed_filters() {
        assert!(Filter::from_json(&json!(["a"])).is_err());
        assert!(Filter::from_json(&json!({"$xor": {}})).is_err());
        assert!(Filter::from_json(&json!({"a": {"$like": "x"}})).is_err());
        assert!(Filter::from_json(&json!({"a": {"$in": "x"}})).is_err());
        assert!(Filter::from_json(&json!({"a": {}})).is_err());
        assert!("not json".parse::<Filter>().is_err());
    }

    #[test]
    fn index_scope_from_conjunction() {
        let filter = Filter::eq("rating", 3).and(Filter::eq("index", "A"));
        assert_eq!(filter.index_scope(), Some("A"));
        let either = Filter::eq("index", "A").or(Filter::eq("index", "B"));
        assert_eq!(either.index_scope(), None);
        let parsed = Filter::from_json(&json!({"index": "A"})).unwrap();
        assert_eq!(parsed.index_scope(), Some("A"));
    }
}
