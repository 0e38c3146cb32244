//! The dynamic value type shared by decoded field maps and transform
//! context entries.

/// A decoded field value, or a value stashed in a transform's context.
///
/// One tagged union serves both roles (spec §9): the only concrete context
/// value the reference pipeline needs is an XTEA key, which fits `List` of
/// four `U64`s just as well as a dedicated variant would.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(FieldMap),
}

impl Value {
    /// Best-effort conversion to `i64`, used by the encoder when writing
    /// integer fields from values that may have arrived as a different
    /// numeric variant (e.g. parsed from a replay log as `U64`).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            Value::U64(v) => Some(*v as i64),
            Value::F64(v) => Some(*v as i64),
            Value::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::I64(v) => Some(*v as u64),
            Value::U64(v) => Some(*v),
            Value::F64(v) => Some(*v as u64),
            Value::Bool(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            Value::I64(v) => Some(*v as f64),
            Value::U64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }
}

/// An insertion-ordered `name -> Value` map.
///
/// Plain `Vec<(String, Value)>` rather than a map crate: schema order must
/// be preserved exactly for the formatter and for round-trip equality, and
/// packets rarely carry more than a few dozen fields, so linear lookup over
/// an owned, dependency-free container is the right trade-off.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldMap(Vec<(String, Value)>);

impl FieldMap {
    pub fn new() -> Self {
        FieldMap(Vec::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Overwrite an existing field's value, or append it if not present.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a FieldMap {
    type Item = &'a (String, Value);
    type IntoIter = std::slice::Iter<'a, (String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for FieldMap {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        FieldMap(iter.into_iter().collect())
    }
}
