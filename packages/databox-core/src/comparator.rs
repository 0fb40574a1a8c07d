use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

type CompareFn = dyn Fn(&Value, &Value) -> Ordering + Send + Sync;

/// Ordering installed on key arrays. Compares the raw values of two entries.
#[derive(Clone)]
pub struct Comparator(Arc<CompareFn>);

impl Comparator {
    pub fn new(f: impl Fn(&Value, &Value) -> Ordering + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Orders entries by one field: numbers numerically, strings
    /// lexicographically, missing fields first.
    pub fn by_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(move |a, b| compare_json(a.get(&field), b.get(&field)))
    }

    /// Same as [`Comparator::by_field`] with the order reversed.
    pub fn by_field_desc(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(move |a, b| compare_json(b.get(&field), a.get(&field)))
    }

    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        (self.0)(a, b)
    }

    /// Whether both handles share the same function instance.
    pub fn same(&self, other: &Comparator) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// First position whose entry does not sort before `new`, or the end.
    pub fn insert_position(&self, new: &Value, existing: &[Value]) -> usize {
        existing
            .iter()
            .position(|current| self.compare(new, current) != Ordering::Greater)
            .unwrap_or(existing.len())
    }
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Comparator(..)")
    }
}

fn rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        _ => rank(a).cmp(&rank(b)),
    }
}
