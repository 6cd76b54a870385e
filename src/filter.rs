use serde_json::Value;
use std::cmp::Ordering;
use std::time::SystemTime;

use crate::envelope::epoch_millis;

/// Comparison applied by a [`Filter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Field equals the value
    Eq,
    /// Field is greater than or equal to the value
    Gte,
    /// Field is strictly less than the value
    Lt,
}

/// Predicate over one field of the serialized entity
///
/// Fields are addressed by their serialized name; a dotted path reaches into nested
/// objects when no top-level field has the full name.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Serialized field name or dotted path
    pub field: String,
    /// Comparison
    pub op: Operator,
    /// Operand
    pub value: Value,
}

impl Filter {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Eq, value)
    }

    /// `field >= value`
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Gte, value)
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Operator::Lt, value)
    }

    /// `field >= time`, for fields holding epoch milliseconds
    pub fn gte_time(field: impl Into<String>, time: SystemTime) -> Self {
        Self::gte(field, epoch_millis(time))
    }

    /// `field < time`, for fields holding epoch milliseconds
    pub fn lt_time(field: impl Into<String>, time: SystemTime) -> Self {
        Self::lt(field, epoch_millis(time))
    }

    fn new(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluate against a serialized entity; a missing field never matches
    pub fn matches(&self, document: &Value) -> bool {
        let Some(actual) = lookup(document, &self.field) else {
            return false;
        };

        match self.op {
            Operator::Eq => {
                compare_values(actual, &self.value) == Some(Ordering::Equal)
                    || actual == &self.value
            }
            Operator::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
        }
    }
}

/// Conjunction of predicates; the empty list matches everything
///
/// ```
/// use dynamo_repository::{Filter, Filters};
/// use serde_json::json;
///
/// let filters = Filters::new()
///     .and(Filter::eq("status", "open"))
///     .and(Filter::gte("priority", 2));
///
/// assert!(filters.matches(&json!({"status": "open", "priority": 3})));
/// assert!(!filters.matches(&json!({"status": "open", "priority": 1})));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(Vec<Filter>);

impl Filters {
    /// Empty conjunction
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a predicate
    pub fn and(mut self, filter: Filter) -> Self {
        self.0.push(filter);
        self
    }

    /// Whether every predicate holds
    pub fn matches(&self, document: &Value) -> bool {
        self.0.iter().all(|filter| filter.matches(document))
    }

    /// The predicates in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.0.iter()
    }

    /// Number of predicates
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no predicates
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Filter> for Filters {
    fn from(filter: Filter) -> Self {
        Self(vec![filter])
    }
}

impl FromIterator<Filter> for Filters {
    fn from_iter<I: IntoIterator<Item = Filter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn lookup<'a>(document: &'a Value, field: &str) -> Option<&'a Value> {
    if let Some(value) = document.get(field) {
        return Some(value);
    }
    if !field.contains('.') {
        return None;
    }
    field
        .split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

/// Order two scalar JSON values of the same kind
///
/// Numbers compare numerically, strings lexicographically, booleans false before
/// true. Any other pairing is unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Some(a.cmp(&b));
            }
            if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
                return Some(a.cmp(&b));
            }
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_eq_is_numeric_for_numbers() {
        let document = json!({"count": 1, "ratio": 1.0, "tags": ["a"]});
        assert!(Filter::eq("count", 1.0).matches(&document));
        assert!(Filter::eq("ratio", 1).matches(&document));
        assert!(Filter::eq("tags", json!(["a"])).matches(&document));
        assert!(!Filter::eq("count", "1").matches(&document));
    }

    #[test]
    fn test_range_operators() {
        let document = json!({"score": 10, "name": "m"});
        assert!(Filter::gte("score", 10).matches(&document));
        assert!(!Filter::gte("score", 11).matches(&document));
        assert!(Filter::lt("score", 11).matches(&document));
        assert!(!Filter::lt("score", 10).matches(&document));
        assert!(Filter::lt("name", "n").matches(&document));
    }

    #[test]
    fn test_mixed_types_do_not_match_ranges() {
        let document = json!({"score": "10", "flag": null});
        assert!(!Filter::gte("score", 1).matches(&document));
        assert!(!Filter::lt("score", 100).matches(&document));
        assert!(!Filter::lt("flag", 1).matches(&document));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let document = json!({"score": 10});
        assert!(!Filter::eq("other", json!(null)).matches(&document));
        assert!(!Filter::lt("other", 1).matches(&document));
    }

    #[test]
    fn test_dotted_path() {
        let document = json!({"owner": {"name": "ada"}, "a.b": 1});
        assert!(Filter::eq("owner.name", "ada").matches(&document));
        assert!(Filter::eq("a.b", 1).matches(&document));
        assert!(!Filter::eq("owner.age", 1).matches(&document));
    }

    #[test]
    fn test_time_bounds() {
        let document = json!({"createdAt": 5_000});
        let at = |seconds| UNIX_EPOCH + Duration::from_secs(seconds);
        assert!(Filter::gte_time("createdAt", at(5)).matches(&document));
        assert!(Filter::lt_time("createdAt", at(6)).matches(&document));
        assert!(!Filter::lt_time("createdAt", at(5)).matches(&document));
    }

    #[test]
    fn test_conjunction() {
        let document = json!({"score": 10, "name": "m"});
        assert!(Filters::new().matches(&document));

        let filters: Filters = [Filter::gte("score", 5), Filter::lt("score", 20)]
            .into_iter()
            .collect();
        assert_eq!(filters.len(), 2);
        assert!(filters.matches(&document));
        assert!(!filters.and(Filter::eq("name", "x")).matches(&document));
    }

    #[test]
    fn test_large_unsigned_numbers() {
        assert_eq!(
            compare_values(&json!(u64::MAX), &json!(u64::MAX - 1)),
            Some(Ordering::Greater)
        );
    }
}
