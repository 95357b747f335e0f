//! 数据类型描述与参考值映射表。
//!
//! `DataType` 由工作区集中持有，多个 `Data` 通过 ID 共享同一个类型；
//! 分类数据的 `ReferenceMap` 只允许追加，不允许改写已有编码。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ModelError, ModelResult};
use crate::id::EntityId;

pub const UNKNOWN_CODE: u32 = 0;
pub const UNKNOWN_LABEL: &str = "Unknown";

/// 整数编码到标签的映射，编码 0 固定为 "Unknown"。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceMap {
    entries: BTreeMap<u32, String>,
}

impl ReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按输入顺序从 1 开始分配编码。
    pub fn assign<I, S>(labels: I) -> ModelResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut map = Self::new();
        map.extend(labels)?;
        Ok(map)
    }

    /// 由显式 (编码, 标签) 对构建映射；缺失的 0 号编码会自动补齐。
    pub fn from_pairs<I, S>(pairs: I) -> ModelResult<Self>
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        let mut map = Self::new();
        for (code, label) in pairs {
            map.insert(code, label)?;
        }
        map.ensure_unknown();
        Ok(map)
    }

    /// 追加标签并返回每个标签对应的编码。已存在的标签保持原编码。
    ///
    /// 先在副本上完成全部校验与分配，成功后一次性替换，读者不会看到半更新的映射。
    pub fn extend<I, S>(&mut self, labels: I) -> ModelResult<Vec<u32>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut staged = self.clone();
        staged.ensure_unknown();
        let mut codes = Vec::new();
        for label in labels {
            let label = label.as_ref();
            if label.trim().is_empty() {
                return Err(ModelError::InvalidValue(
                    "value map labels cannot be empty".to_string(),
                ));
            }
            // 0 号编码保留，不能通过追加分配
            if label == UNKNOWN_LABEL {
                return Err(ModelError::ReferenceConflict {
                    code: UNKNOWN_CODE,
                    label: label.to_string(),
                });
            }
            if let Some(code) = staged.code_of(label) {
                codes.push(code);
                continue;
            }
            let next = staged.next_code();
            staged.entries.insert(next, label.to_string());
            codes.push(next);
        }
        *self = staged;
        Ok(codes)
    }

    /// 插入显式编码。编码已绑定其他标签、或标签已绑定其他编码时拒绝。
    pub fn insert(&mut self, code: u32, label: impl Into<String>) -> ModelResult<()> {
        let label = label.into();
        if code == UNKNOWN_CODE && label != UNKNOWN_LABEL {
            return Err(ModelError::ReferenceConflict { code, label });
        }
        match self.entries.get(&code) {
            Some(existing) if *existing == label => return Ok(()),
            Some(_) => return Err(ModelError::ReferenceConflict { code, label }),
            None => {}
        }
        if self.code_of(&label).is_some() {
            return Err(ModelError::ReferenceConflict { code, label });
        }
        self.entries.insert(code, label);
        Ok(())
    }

    #[inline]
    pub fn get(&self, code: u32) -> Option<&str> {
        self.entries.get(&code).map(String::as_str)
    }

    #[inline]
    pub fn contains(&self, code: u32) -> bool {
        self.entries.contains_key(&code)
    }

    pub fn code_of(&self, label: &str) -> Option<u32> {
        self.entries
            .iter()
            .find_map(|(code, existing)| (existing == label).then_some(*code))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries
            .iter()
            .map(|(code, label)| (*code, label.as_str()))
    }

    pub(crate) fn ensure_unknown(&mut self) {
        self.entries
            .entry(UNKNOWN_CODE)
            .or_insert_with(|| UNKNOWN_LABEL.to_string());
    }

    fn next_code(&self) -> u32 {
        self.entries
            .keys()
            .next_back()
            .map_or(1, |last| last + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    Float,
    Integer,
    Text,
    Boolean,
    Referenced,
}

impl PrimitiveType {
    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveType::Float => "float",
            PrimitiveType::Integer => "integer",
            PrimitiveType::Text => "text",
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Referenced => "referenced",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 共享的数据类型描述。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataType {
    pub id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub primitive: PrimitiveType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value_map: Option<ReferenceMap>,
}

impl DataType {
    pub fn new(name: impl Into<String>, primitive: PrimitiveType) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            description: None,
            primitive,
            value_map: (primitive == PrimitiveType::Referenced).then(ReferenceMap::new),
        }
    }

    pub fn referenced(name: impl Into<String>, value_map: ReferenceMap) -> Self {
        let mut data_type = Self::new(name, PrimitiveType::Referenced);
        data_type.value_map = Some(value_map);
        data_type
    }

    #[inline]
    pub fn value_map(&self) -> Option<&ReferenceMap> {
        self.value_map.as_ref()
    }

    /// 向参考映射追加标签，非分类类型返回 `TypeMismatch`。
    pub fn extend_value_map<I, S>(&mut self, labels: I) -> ModelResult<Vec<u32>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self.value_map.as_mut() {
            Some(map) => map.extend(labels),
            None => Err(ModelError::TypeMismatch {
                type_id: self.id,
                expected: PrimitiveType::Referenced.to_string(),
                found: self.primitive.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_reserves_zero_for_unknown() {
        let map = ReferenceMap::assign(["AB_100", "AB_200"]).expect("assign labels");
        let entries: Vec<_> = map.iter().collect();
        assert_eq!(
            entries,
            vec![(0, "Unknown"), (1, "AB_100"), (2, "AB_200")]
        );
    }

    #[test]
    fn extend_keeps_existing_codes_and_appends() {
        let mut map = ReferenceMap::assign(["AB_100", "AB_200"]).unwrap();
        let codes = map.extend(["AB_100", "AB_300"]).expect("extend labels");
        assert_eq!(codes, vec![1, 3]);
        assert_eq!(map.get(1), Some("AB_100"));
        assert_eq!(map.get(2), Some("AB_200"));
        assert_eq!(map.get(3), Some("AB_300"));
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn failed_extend_leaves_map_untouched() {
        let mut map = ReferenceMap::assign(["A"]).unwrap();
        let before = map.clone();
        let err = map.extend(["B", " "]).unwrap_err();
        assert!(matches!(err, ModelError::InvalidValue(_)));
        assert_eq!(map, before);
    }

    #[test]
    fn reserved_label_cannot_be_assigned() {
        let err = ReferenceMap::assign(["Unknown", "A"]).unwrap_err();
        assert!(matches!(err, ModelError::ReferenceConflict { code: 0, .. }));

        let mut map = ReferenceMap::assign(["A"]).unwrap();
        let before = map.clone();
        assert!(map.extend(["B", UNKNOWN_LABEL]).is_err());
        assert_eq!(map, before);
    }

    #[test]
    fn insert_rejects_relabel_and_duplicate_label() {
        let mut map = ReferenceMap::assign(["A", "B"]).unwrap();
        assert!(map.insert(1, "A").is_ok());
        assert!(matches!(
            map.insert(1, "Z"),
            Err(ModelError::ReferenceConflict { code: 1, .. })
        ));
        assert!(matches!(
            map.insert(7, "B"),
            Err(ModelError::ReferenceConflict { code: 7, .. })
        ));
        assert!(matches!(
            map.insert(0, "Nothing"),
            Err(ModelError::ReferenceConflict { code: 0, .. })
        ));
        map.insert(10, "J").unwrap();
        assert_eq!(map.extend(["K"]).unwrap(), vec![11]);
    }

    #[test]
    fn from_pairs_adds_unknown_entry() {
        let map = ReferenceMap::from_pairs([(1, "Granite"), (4, "Basalt")]).unwrap();
        assert_eq!(map.get(0), Some(UNKNOWN_LABEL));
        assert_eq!(map.code_of("Basalt"), Some(4));
    }

    #[test]
    fn non_referenced_type_cannot_grow_map() {
        let mut float = DataType::new("TMI", PrimitiveType::Float);
        assert!(float.value_map().is_none());
        assert!(matches!(
            float.extend_value_map(["x"]),
            Err(ModelError::TypeMismatch { .. })
        ));

        let mut lith = DataType::new("Lithology", PrimitiveType::Referenced);
        assert_eq!(lith.extend_value_map(["Sand"]).unwrap(), vec![1]);
        assert_eq!(lith.value_map().unwrap().get(0), Some(UNKNOWN_LABEL));
    }

    #[test]
    fn value_map_serializes_as_object() {
        let map = ReferenceMap::assign(["A"]).unwrap();
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json, serde_json::json!({"0": "Unknown", "1": "A"}));
        let back: ReferenceMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }
}
