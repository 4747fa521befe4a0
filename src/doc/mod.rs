use serde_json::{Map, Value};
use thiserror::Error;

/// Error produced by typed field access on a [`Document`].
///
/// "Field absent" and "field present with the wrong type" are distinct
/// cases: the first is frequently a normal condition (optional satellite
/// layers), the second is a malformed record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("missing field `{field}`")]
    Missing { field: String },

    #[error("field `{field}` has wrong type (expected {expected})")]
    WrongType {
        field: String,
        expected: &'static str,
    },
}

impl FieldError {
    fn missing(field: &str) -> Self {
        Self::Missing {
            field: field.to_string(),
        }
    }

    fn wrong_type(field: &str, expected: &'static str) -> Self {
        Self::WrongType {
            field: field.to_string(),
            expected,
        }
    }
}

/// One nested, dynamically-shaped source record.
///
/// Immutable after construction; the import core never mutates a
/// document, only reads typed views of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Map<String, Value>,
}

impl Document {
    /// Wraps a parsed JSON value. The root must be an object.
    pub fn from_value(root: Value) -> Result<Self, FieldError> {
        match root {
            Value::Object(root) => Ok(Self { root }),
            _ => Err(FieldError::wrong_type("<root>", "object")),
        }
    }

    /// Typed view of the document's top-level fields.
    pub fn node(&self) -> Node<'_> {
        Node { obj: &self.root }
    }

    /// The raw `event_id` field, used in log context before resolution.
    pub fn raw_event_id(&self) -> Option<&str> {
        self.node().raw("event_id").and_then(Value::as_str)
    }
}

/// Borrowed, typed view over one JSON object inside a document.
///
/// Two accessor families: `*_field` treats absence as an error (for
/// fields a row requires), `opt_*` maps absence to `None` while still
/// reporting type mismatches (for optional satellite data).
#[derive(Debug, Clone, Copy)]
pub struct Node<'a> {
    obj: &'a Map<String, Value>,
}

impl<'a> Node<'a> {
    /// Views an array element (or other raw value) as a node.
    pub fn from_value(value: &'a Value, field: &str) -> Result<Self, FieldError> {
        match value.as_object() {
            Some(obj) => Ok(Self { obj }),
            None => Err(FieldError::wrong_type(field, "object")),
        }
    }

    /// Raw access without type interpretation.
    pub fn raw(&self, field: &str) -> Option<&'a Value> {
        self.obj.get(field)
    }

    fn require(&self, field: &str) -> Result<&'a Value, FieldError> {
        self.raw(field).ok_or_else(|| FieldError::missing(field))
    }

    pub fn str_field(&self, field: &str) -> Result<&'a str, FieldError> {
        self.require(field)?
            .as_str()
            .ok_or_else(|| FieldError::wrong_type(field, "string"))
    }

    pub fn u64_field(&self, field: &str) -> Result<u64, FieldError> {
        self.require(field)?
            .as_u64()
            .ok_or_else(|| FieldError::wrong_type(field, "u64"))
    }

    pub fn u32_field(&self, field: &str) -> Result<u32, FieldError> {
        let v = self
            .require(field)?
            .as_u64()
            .ok_or_else(|| FieldError::wrong_type(field, "u32"))?;
        u32::try_from(v).map_err(|_| FieldError::wrong_type(field, "u32"))
    }

    pub fn i32_field(&self, field: &str) -> Result<i32, FieldError> {
        let v = self
            .require(field)?
            .as_i64()
            .ok_or_else(|| FieldError::wrong_type(field, "i32"))?;
        i32::try_from(v).map_err(|_| FieldError::wrong_type(field, "i32"))
    }

    pub fn f64_field(&self, field: &str) -> Result<f64, FieldError> {
        self.require(field)?
            .as_f64()
            .ok_or_else(|| FieldError::wrong_type(field, "f64"))
    }

    pub fn bool_field(&self, field: &str) -> Result<bool, FieldError> {
        self.require(field)?
            .as_bool()
            .ok_or_else(|| FieldError::wrong_type(field, "bool"))
    }

    pub fn array_field(&self, field: &str) -> Result<&'a [Value], FieldError> {
        self.require(field)?
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| FieldError::wrong_type(field, "array"))
    }

    pub fn object_field(&self, field: &str) -> Result<Node<'a>, FieldError> {
        let v = self.require(field)?;
        Node::from_value(v, field)
    }

    // --- Optional accessors: missing -> None, wrong type -> Err ---

    pub fn opt_str(&self, field: &str) -> Result<Option<&'a str>, FieldError> {
        match self.raw(field) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| FieldError::wrong_type(field, "string")),
        }
    }

    pub fn opt_u64(&self, field: &str) -> Result<Option<u64>, FieldError> {
        match self.raw(field) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| FieldError::wrong_type(field, "u64")),
        }
    }

    pub fn opt_u32(&self, field: &str) -> Result<Option<u32>, FieldError> {
        match self.raw(field) {
            None => Ok(None),
            Some(v) => {
                let v = v
                    .as_u64()
                    .ok_or_else(|| FieldError::wrong_type(field, "u32"))?;
                u32::try_from(v)
                    .map(Some)
                    .map_err(|_| FieldError::wrong_type(field, "u32"))
            }
        }
    }

    pub fn opt_i32(&self, field: &str) -> Result<Option<i32>, FieldError> {
        match self.raw(field) {
            None => Ok(None),
            Some(v) => {
                let v = v
                    .as_i64()
                    .ok_or_else(|| FieldError::wrong_type(field, "i32"))?;
                i32::try_from(v)
                    .map(Some)
                    .map_err(|_| FieldError::wrong_type(field, "i32"))
            }
        }
    }

    pub fn opt_f64(&self, field: &str) -> Result<Option<f64>, FieldError> {
        match self.raw(field) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| FieldError::wrong_type(field, "f64")),
        }
    }

    pub fn opt_bool(&self, field: &str) -> Result<Option<bool>, FieldError> {
        match self.raw(field) {
            None => Ok(None),
            Some(v) => v
                .as_bool()
                .map(Some)
                .ok_or_else(|| FieldError::wrong_type(field, "bool")),
        }
    }

    pub fn opt_array(&self, field: &str) -> Result<Option<&'a [Value]>, FieldError> {
        match self.raw(field) {
            None => Ok(None),
            Some(v) => v
                .as_array()
                .map(|a| Some(a.as_slice()))
                .ok_or_else(|| FieldError::wrong_type(field, "array")),
        }
    }

    pub fn opt_object(&self, field: &str) -> Result<Option<Node<'a>>, FieldError> {
        match self.raw(field) {
            None => Ok(None),
            Some(v) => Node::from_value(v, field).map(Some),
        }
    }

    /// Walks a nested object path. Any missing step yields `None`; a
    /// present non-object step is a type error.
    pub fn opt_node_at(&self, path: &[&str]) -> Result<Option<Node<'a>>, FieldError> {
        let mut cur = *self;
        for step in path {
            match cur.opt_object(step)? {
                Some(next) => cur = next,
                None => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    /// Iterates over the object's entries in document order.
    pub fn entries(&self) -> impl Iterator<Item = (&'a str, &'a Value)> {
        self.obj.iter().map(|(k, v)| (k.as_str(), v))
    }
}
