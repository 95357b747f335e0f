//! 浮点数组的持久化编码。
//!
//! JSON 没有 NaN 与无穷大，`serde_json` 会把它们写成 `null`。NaN 在测井与属性数据中
//! 表示无值，因此这里把非有限值写成字符串 `"NaN"`、`"inf"`、`"-inf"`，读取时还原。

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

const NAN: &str = "NaN";
const POS_INF: &str = "inf";
const NEG_INF: &str = "-inf";

struct Encoded(f64);

impl Serialize for Encoded {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self.0;
        if value.is_finite() {
            serializer.serialize_f64(value)
        } else if value.is_nan() {
            serializer.serialize_str(NAN)
        } else if value > 0.0 {
            serializer.serialize_str(POS_INF)
        } else {
            serializer.serialize_str(NEG_INF)
        }
    }
}

struct Decoded(f64);

impl<'de> Deserialize<'de> for Decoded {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DecodedVisitor)
    }
}

struct DecodedVisitor;

impl<'de> Visitor<'de> for DecodedVisitor {
    type Value = Decoded;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number or one of \"NaN\", \"inf\", \"-inf\"")
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Decoded, E> {
        Ok(Decoded(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Decoded, E> {
        Ok(Decoded(value as f64))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Decoded, E> {
        Ok(Decoded(value as f64))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Decoded, E> {
        match value {
            NAN => Ok(Decoded(f64::NAN)),
            POS_INF => Ok(Decoded(f64::INFINITY)),
            NEG_INF => Ok(Decoded(f64::NEG_INFINITY)),
            other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
        }
    }
}

/// `Vec<f64>` 字段使用：`#[serde(with = "crate::float_codec::values")]`。
pub(crate) mod values {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|value| Encoded(*value)))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<f64>, D::Error> {
        let decoded = Vec::<Decoded>::deserialize(deserializer)?;
        Ok(decoded.into_iter().map(|Decoded(value)| value).collect())
    }
}

struct EncodedColumn<'a>(&'a [Option<f64>]);

impl Serialize for EncodedColumn<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|value| value.map(Encoded)))
    }
}

struct DecodedColumn(Vec<Option<f64>>);

impl<'de> Deserialize<'de> for DecodedColumn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let decoded = Vec::<Option<Decoded>>::deserialize(deserializer)?;
        Ok(DecodedColumn(
            decoded
                .into_iter()
                .map(|value| value.map(|Decoded(value)| value))
                .collect(),
        ))
    }
}

/// 测井列表（列名 -> `Vec<Option<f64>>`）使用；`null` 仍表示该行没有样本。
pub(crate) mod columns {
    use std::collections::BTreeMap;

    use super::*;

    pub(crate) fn serialize<S: Serializer>(
        columns: &BTreeMap<String, Vec<Option<f64>>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            columns
                .iter()
                .map(|(name, values)| (name, EncodedColumn(values))),
        )
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<Option<f64>>>, D::Error> {
        let decoded = BTreeMap::<String, DecodedColumn>::deserialize(deserializer)?;
        Ok(decoded
            .into_iter()
            .map(|(name, DecodedColumn(values))| (name, values))
            .collect())
    }
}
