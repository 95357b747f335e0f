pub mod data;
pub mod drillhole;
pub mod electrode;
mod float_codec;
pub mod object;
pub mod types;
pub mod workspace;

pub mod geometry {
    use glam::DVec3;
    use serde::{Deserialize, Serialize};

    /// 三维点，内部以 `glam::DVec3` 表示，坐标单位与工作区一致。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point3(pub DVec3);

    impl Point3 {
        #[inline]
        pub fn new(x: f64, y: f64, z: f64) -> Self {
            Self(DVec3::new(x, y, z))
        }

        #[inline]
        pub fn from_vec(vec: DVec3) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn z(self) -> f64 {
            self.0.z
        }

        #[inline]
        pub fn as_vec3(self) -> DVec3 {
            self.0
        }

        #[inline]
        pub fn is_finite(self) -> bool {
            self.0.is_finite()
        }

        /// 绕竖直轴旋转，角度以度为单位、逆时针为正。
        pub fn rotate_about_z(self, degrees: f64) -> Self {
            let (sin, cos) = degrees.to_radians().sin_cos();
            Self(DVec3::new(
                cos * self.0.x - sin * self.0.y,
                sin * self.0.x + cos * self.0.y,
                self.0.z,
            ))
        }
    }

    impl From<DVec3> for Point3 {
        fn from(value: DVec3) -> Self {
            Self::from_vec(value)
        }
    }

    impl From<[f64; 3]> for Point3 {
        fn from(value: [f64; 3]) -> Self {
            Self::new(value[0], value[1], value[2])
        }
    }

    /// 三维轴对齐包围盒。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Bounds3D {
        min: Point3,
        max: Point3,
    }

    impl Bounds3D {
        pub fn empty() -> Self {
            Self {
                min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
                max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x()
        }

        #[inline]
        pub fn min(&self) -> Point3 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point3 {
            self.max
        }

        pub fn include_point(&mut self, point: Point3) {
            self.min = Point3(self.min.0.min(point.0));
            self.max = Point3(self.max.0.max(point.0));
        }

        pub fn center(&self) -> Point3 {
            Point3((self.min.0 + self.max.0) * 0.5)
        }
    }
}

pub mod id {
    use std::fmt;

    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// 工作区内实体（组、对象、数据、类型）的唯一标识。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EntityId(Uuid);

    impl EntityId {
        /// 生成新的随机 v4 标识。
        #[inline]
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }

        #[inline]
        pub fn from_uuid(uuid: Uuid) -> Self {
            Self(uuid)
        }

        #[inline]
        pub fn get(self) -> Uuid {
            self.0
        }
    }

    impl Default for EntityId {
        fn default() -> Self {
            Self::new()
        }
    }

    impl fmt::Display for EntityId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::Display::fmt(&self.0, f)
        }
    }

    impl std::str::FromStr for EntityId {
        type Err = uuid::Error;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Uuid::parse_str(s).map(Self)
        }
    }
}

pub mod errors {
    use thiserror::Error;

    use crate::id::EntityId;

    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum ModelError {
        #[error("shape mismatch for {context}: expected {expected}, got {actual}")]
        ShapeMismatch {
            context: String,
            expected: usize,
            actual: usize,
        },
        #[error("reference code {0} is not present in the value map")]
        UnknownReference(u32),
        #[error("cannot infer association: {len} values match both vertex and cell counts")]
        AmbiguousAssociation { len: usize },
        #[error("column `{column}` already holds a value at depth {depth}")]
        ColumnConflict { column: String, depth: f64 },
        #[error(
            "interval [{from}, {to}] overlaps existing interval [{existing_from}, {existing_to}]"
        )]
        OverlappingInterval {
            from: f64,
            to: f64,
            existing_from: f64,
            existing_to: f64,
        },
        #[error("setting parent of {entity} to {parent} would create a cycle")]
        CyclicParent { entity: EntityId, parent: EntityId },
        #[error("object {object} references partner {partner} which does not link back")]
        DanglingLink { object: EntityId, partner: EntityId },
        #[error("entity {0} not found")]
        EntityNotFound(String),
        #[error("entity {entity} cannot be placed under {parent}")]
        InvalidParent { entity: EntityId, parent: EntityId },
        #[error("the root group cannot be moved or removed")]
        RootImmutable,
        #[error("value map conflict: code {code} / label `{label}`")]
        ReferenceConflict { code: u32, label: String },
        #[error("data `{name}` has association {found}, property group expects {expected}")]
        AssociationMismatch {
            name: String,
            expected: String,
            found: String,
        },
        #[error("data type {type_id} holds {expected} values, got {found}")]
        TypeMismatch {
            type_id: EntityId,
            expected: String,
            found: String,
        },
        #[error("object {object} is a {found}, expected {expected}")]
        KindMismatch {
            object: EntityId,
            expected: String,
            found: String,
        },
        #[error("source electrodes {0} carry no ab_cell_id data")]
        MissingSourceIds(EntityId),
        #[error("invalid value: {0}")]
        InvalidValue(String),
    }

    pub type ModelResult<T> = Result<T, ModelError>;
}
