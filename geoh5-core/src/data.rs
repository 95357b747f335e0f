use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::EntityId;
use crate::types::{PrimitiveType, ReferenceMap};

/// 数据挂接到对象上的粒度。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Association {
    Object,
    Vertex,
    Cell,
}

impl Association {
    pub fn as_str(self) -> &'static str {
        match self {
            Association::Object => "OBJECT",
            Association::Vertex => "VERTEX",
            Association::Cell => "CELL",
        }
    }
}

impl fmt::Display for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum DataValues {
    Float(#[serde(with = "crate::float_codec::values")] Vec<f64>),
    Integer(Vec<i32>),
    Text(Vec<String>),
    Boolean(Vec<bool>),
    Referenced(Vec<u32>),
}

impl DataValues {
    pub fn len(&self) -> usize {
        match self {
            DataValues::Float(values) => values.len(),
            DataValues::Integer(values) => values.len(),
            DataValues::Text(values) => values.len(),
            DataValues::Boolean(values) => values.len(),
            DataValues::Referenced(values) => values.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn primitive(&self) -> PrimitiveType {
        match self {
            DataValues::Float(_) => PrimitiveType::Float,
            DataValues::Integer(_) => PrimitiveType::Integer,
            DataValues::Text(_) => PrimitiveType::Text,
            DataValues::Boolean(_) => PrimitiveType::Boolean,
            DataValues::Referenced(_) => PrimitiveType::Referenced,
        }
    }

    pub fn as_float(&self) -> Option<&[f64]> {
        match self {
            DataValues::Float(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_referenced(&self) -> Option<&[u32]> {
        match self {
            DataValues::Referenced(values) => Some(values),
            _ => None,
        }
    }
}

/// 挂接在对象上的一组数据值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub id: EntityId,
    pub name: String,
    pub parent: EntityId,
    pub association: Association,
    pub type_id: EntityId,
    pub values: DataValues,
}

/// `add_data` 的单项输入。
#[derive(Debug, Clone)]
pub struct DataSpec {
    pub name: String,
    pub values: DataValues,
    pub association: Option<Association>,
    pub value_map: Option<ReferenceMap>,
    pub entity_type: Option<EntityId>,
}

impl DataSpec {
    pub fn new(name: impl Into<String>, values: DataValues) -> Self {
        Self {
            name: name.into(),
            values,
            association: None,
            value_map: None,
            entity_type: None,
        }
    }

    pub fn with_association(mut self, association: Association) -> Self {
        self.association = Some(association);
        self
    }

    pub fn with_value_map(mut self, value_map: ReferenceMap) -> Self {
        self.value_map = Some(value_map);
        self
    }

    /// 复用已有数据类型，而不是为该数据新建类型。
    pub fn with_entity_type(mut self, type_id: EntityId) -> Self {
        self.entity_type = Some(type_id);
        self
    }
}
