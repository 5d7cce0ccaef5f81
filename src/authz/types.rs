use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// A typed node identity in the relation graph: "type:id" on the wire,
/// e.g. "document:d1".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Object {
    pub object_type: String,
    pub id: String,
}

impl Object {
    pub fn new(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            id: id.into(),
        }
    }

    /// Parses "type:id", splitting on the first `:`. Both halves must be
    /// non-empty.
    pub fn parse(s: &str) -> Option<Self> {
        let (t, id) = s.split_once(':')?;
        if t.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self {
            object_type: t.to_string(),
            id: id.to_string(),
        })
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.id)
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Object {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Object::parse(&s).ok_or_else(|| {
            de::Error::custom(format!("invalid object format `{s}` (expected `type:id`)"))
        })
    }
}

/// An object filter as accepted by the filtered permission check:
/// "type" alone or a full "type:id".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFilter {
    pub object_type: String,
    pub id: Option<String>,
}

impl ObjectFilter {
    pub fn parse(s: &str) -> Option<Self> {
        let (t, id) = match s.split_once(':') {
            Some((t, id)) => (t, if id.is_empty() { None } else { Some(id) }),
            None => (s, None),
        };
        if t.is_empty() {
            return None;
        }
        Some(Self {
            object_type: t.to_string(),
            id: id.map(str::to_string),
        })
    }

    /// The full object when the filter carries an id.
    pub fn object(&self) -> Option<Object> {
        self.id
            .as_ref()
            .map(|id| Object::new(self.object_type.clone(), id.clone()))
    }
}

impl fmt::Display for ObjectFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.object_type, id),
            None => write!(f, "{}", self.object_type),
        }
    }
}

/// A directed labeled edge: `subject` holds `relation` on `resource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub resource: Object,
    pub subject: Object,
    pub relation: String,
}

/// Parameters for enumerating relationship paths through the graph.
#[derive(Debug, Clone)]
pub struct TraversalRequest {
    /// Starting node.
    pub start_on: Object,

    /// true: follow the stored direction (resource → subject);
    /// false: traverse against it (subject → resource).
    pub forward: bool,

    /// Node types at which branch expansion stops. Doubles as the endpoint
    /// filter when `stop_on` is unset.
    pub stop_on_types: Vec<String>,

    /// Exact endpoint; only paths reaching this node are returned.
    pub stop_on: Option<Object>,
}

/// All discovered paths for one (resource, subject) pair. Each inner
/// sequence is one concrete walk; edges keep their stored orientation
/// regardless of traversal direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalResponseItem {
    pub resource: Object,
    pub subject: Object,
    pub paths: Vec<Vec<Relationship>>,
}

/// Outcome of evaluating a single permission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionEval {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matching_paths: Vec<Vec<Relationship>>,
}

/// Every permission of the resource's type evaluated for one
/// (resource, subject) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionCheckItem {
    pub resource: Object,
    pub subject: Object,
    #[serde(rename = "permissions")]
    pub permission_evals: BTreeMap<String, PermissionEval>,
}
