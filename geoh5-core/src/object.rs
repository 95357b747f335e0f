use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::Association;
use crate::drillhole::Drillhole;
use crate::errors::{ModelError, ModelResult};
use crate::geometry::{Bounds3D, Point3};
use crate::id::EntityId;

/// 扁平存储的单元索引，每个单元固定引用 `arity` 个顶点。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellArray {
    arity: usize,
    indices: Vec<u32>,
}

impl CellArray {
    pub fn empty(arity: usize) -> Self {
        Self {
            arity,
            indices: Vec::new(),
        }
    }

    pub fn from_rows<const N: usize>(rows: &[[u32; N]]) -> Self {
        Self {
            arity: N,
            indices: rows.iter().flatten().copied().collect(),
        }
    }

    pub fn from_flat(arity: usize, indices: Vec<u32>) -> ModelResult<Self> {
        if arity < 2 {
            return Err(ModelError::InvalidValue(format!(
                "cells must reference at least 2 vertices, got arity {arity}"
            )));
        }
        if indices.len() % arity != 0 {
            return Err(ModelError::ShapeMismatch {
                context: format!("flat cell array of arity {arity}"),
                expected: indices.len() - indices.len() % arity,
                actual: indices.len(),
            });
        }
        Ok(Self { arity, indices })
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }

    #[inline]
    pub fn len(&self) -> usize {
        if self.arity == 0 {
            0
        } else {
            self.indices.len() / self.arity
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&[u32]> {
        let start = index.checked_mul(self.arity)?;
        self.indices.get(start..start + self.arity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u32]> {
        self.indices.chunks_exact(self.arity.max(1))
    }

    #[inline]
    pub fn as_flat(&self) -> &[u32] {
        &self.indices
    }

    /// 检查所有索引都落在 `[0, n_vertices)` 内。
    pub fn validate(&self, n_vertices: usize) -> ModelResult<()> {
        if let Some(bad) = self
            .indices
            .iter()
            .find(|index| **index as usize >= n_vertices)
        {
            return Err(ModelError::ShapeMismatch {
                context: format!("cell vertex index {bad}"),
                expected: n_vertices,
                actual: *bad as usize + 1,
            });
        }
        Ok(())
    }

    /// 按 part 编号把相邻且同属一段的顶点连成线段。
    pub fn segments_from_parts(parts: &[u32]) -> Self {
        let mut indices = Vec::with_capacity(parts.len().saturating_sub(1) * 2);
        for (index, pair) in parts.windows(2).enumerate() {
            if pair[0] == pair[1] {
                indices.push(index as u32);
                indices.push(index as u32 + 1);
            }
        }
        Self { arity: 2, indices }
    }

    pub fn consecutive_segments(n_vertices: usize) -> Self {
        Self::segments_from_parts(&vec![0; n_vertices])
    }
}

/// 规则二维网格，单元隐式定义，没有显式顶点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid2D {
    pub origin: Point3,
    pub u_count: u32,
    pub v_count: u32,
    pub u_cell_size: f64,
    pub v_cell_size: f64,
    #[serde(default)]
    pub rotation: f64,
}

impl Grid2D {
    pub fn new(
        origin: Point3,
        counts: [u32; 2],
        cell_sizes: [f64; 2],
        rotation: f64,
    ) -> ModelResult<Self> {
        if counts.contains(&0) {
            return Err(ModelError::InvalidValue(
                "grid counts must be positive".to_string(),
            ));
        }
        if cell_sizes.iter().any(|size| !(*size > 0.0 && size.is_finite())) {
            return Err(ModelError::InvalidValue(
                "grid cell sizes must be positive".to_string(),
            ));
        }
        Ok(Self {
            origin,
            u_count: counts[0],
            v_count: counts[1],
            u_cell_size: cell_sizes[0],
            v_cell_size: cell_sizes[1],
            rotation,
        })
    }

    #[inline]
    pub fn n_cells(&self) -> usize {
        self.u_count as usize * self.v_count as usize
    }

    /// 单元中心，u 方向变化最快。
    pub fn centroids(&self) -> Vec<Point3> {
        let mut centroids = Vec::with_capacity(self.n_cells());
        for j in 0..self.v_count {
            for i in 0..self.u_count {
                let local = Point3::new(
                    (f64::from(i) + 0.5) * self.u_cell_size,
                    (f64::from(j) + 0.5) * self.v_cell_size,
                    0.0,
                );
                let rotated = local.rotate_about_z(self.rotation);
                centroids.push(Point3(rotated.0 + self.origin.0));
            }
        }
        centroids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OctreeCell {
    pub i: u32,
    pub j: u32,
    pub k: u32,
    pub size: u32,
}

/// 八叉树网格：基础单元数量沿各轴均为 2 的幂。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Octree {
    pub origin: Point3,
    #[serde(default)]
    pub rotation: f64,
    pub counts: [u32; 3],
    pub cell_sizes: [f64; 3],
    pub cells: Vec<OctreeCell>,
}

impl Octree {
    /// 创建八叉树并细分到基础层级。
    pub fn new(origin: Point3, counts: [u32; 3], cell_sizes: [f64; 3]) -> ModelResult<Self> {
        if counts.iter().any(|count| !count.is_power_of_two()) {
            return Err(ModelError::InvalidValue(format!(
                "octree counts must be powers of two, got {counts:?}"
            )));
        }
        if cell_sizes.iter().any(|size| !(*size > 0.0 && size.is_finite())) {
            return Err(ModelError::InvalidValue(
                "octree cell sizes must be positive".to_string(),
            ));
        }
        let mut octree = Self {
            origin,
            rotation: 0.0,
            counts,
            cell_sizes,
            cells: Vec::new(),
        };
        octree.base_refine();
        Ok(octree)
    }

    /// 以最短轴为准，生成尺寸为 `2^min_level` 的基础单元（k 最外层，i 最内层）。
    pub fn base_refine(&mut self) {
        let min_level = self
            .counts
            .iter()
            .map(|count| count.trailing_zeros())
            .min()
            .unwrap_or(0);
        let step = 1u32 << min_level;
        let [u_count, v_count, w_count] = self.counts;
        self.cells.clear();
        for k in (0..w_count).step_by(step as usize) {
            for j in (0..v_count).step_by(step as usize) {
                for i in (0..u_count).step_by(step as usize) {
                    self.cells.push(OctreeCell { i, j, k, size: step });
                }
            }
        }
    }

    #[inline]
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn centroids(&self) -> Vec<Point3> {
        self.cells
            .iter()
            .map(|cell| {
                let half = f64::from(cell.size) / 2.0;
                let local = Point3::new(
                    (f64::from(cell.i) + half) * self.cell_sizes[0],
                    (f64::from(cell.j) + half) * self.cell_sizes[1],
                    (f64::from(cell.k) + half) * self.cell_sizes[2],
                );
                Point3(local.rotate_about_z(self.rotation).0 + self.origin.0)
            })
            .collect()
    }
}

/// 对象种类。行为差异主要体现在数据形状上，因此用带标签的枚举表达。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectKind {
    Points,
    Curve,
    Surface,
    Grid2D(Grid2D),
    Octree(Octree),
    Drillhole(Drillhole),
    CurrentElectrode,
    PotentialElectrode,
}

impl ObjectKind {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Points => "points",
            ObjectKind::Curve => "curve",
            ObjectKind::Surface => "surface",
            ObjectKind::Grid2D(_) => "grid2d",
            ObjectKind::Octree(_) => "octree",
            ObjectKind::Drillhole(_) => "drillhole",
            ObjectKind::CurrentElectrode => "current_electrode",
            ObjectKind::PotentialElectrode => "potential_electrode",
        }
    }

    #[inline]
    pub fn is_curve_like(&self) -> bool {
        matches!(
            self,
            ObjectKind::Curve | ObjectKind::CurrentElectrode | ObjectKind::PotentialElectrode
        )
    }

    #[inline]
    fn takes_vertices(&self) -> bool {
        matches!(self, ObjectKind::Points | ObjectKind::Surface) || self.is_curve_like()
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 电流 / 电位电极之间的互相引用，同一份记录写入两端对象。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectrodeLink {
    pub current_electrodes: EntityId,
    pub potential_electrodes: EntityId,
}

impl ElectrodeLink {
    /// 返回链接中除 `object` 以外的另一端。
    pub fn partner_of(&self, object: EntityId) -> Option<EntityId> {
        if self.current_electrodes == object {
            Some(self.potential_electrodes)
        } else if self.potential_electrodes == object {
            Some(self.current_electrodes)
        } else {
            None
        }
    }
}

/// 共享同一父对象与同一关联方式的数据集合。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyGroup {
    pub id: EntityId,
    pub name: String,
    pub association: Association,
    pub properties: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntity {
    pub id: EntityId,
    pub name: String,
    pub parent: EntityId,
    pub kind: ObjectKind,
    vertices: Vec<Point3>,
    cells: CellArray,
    #[serde(default)]
    pub children: Vec<EntityId>,
    #[serde(default)]
    pub property_groups: Vec<PropertyGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ElectrodeLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ab_cell_id: Option<EntityId>,
}

impl ObjectEntity {
    #[inline]
    pub fn vertices(&self) -> &[Point3] {
        &self.vertices
    }

    #[inline]
    pub fn cells(&self) -> &CellArray {
        &self.cells
    }

    #[inline]
    pub fn n_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn n_cells(&self) -> usize {
        match &self.kind {
            ObjectKind::Grid2D(grid) => grid.n_cells(),
            ObjectKind::Octree(octree) => octree.n_cells(),
            _ => self.cells.len(),
        }
    }

    /// 指定关联方式下数据数组应有的长度。
    pub fn expected_len(&self, association: Association) -> usize {
        match association {
            Association::Object => 1,
            Association::Vertex => self.n_vertices(),
            Association::Cell => self.n_cells(),
        }
    }

    pub fn property_group(&self, name: &str) -> Option<&PropertyGroup> {
        self.property_groups.iter().find(|group| group.name == name)
    }

    pub fn drillhole(&self) -> Option<&Drillhole> {
        match &self.kind {
            ObjectKind::Drillhole(drillhole) => Some(drillhole),
            _ => None,
        }
    }

    pub fn drillhole_mut(&mut self) -> Option<&mut Drillhole> {
        match &mut self.kind {
            ObjectKind::Drillhole(drillhole) => Some(drillhole),
            _ => None,
        }
    }

    /// 对象范围；网格类使用单元中心，钻孔使用孔口。
    pub fn extent(&self) -> Option<Bounds3D> {
        let mut bounds = Bounds3D::empty();
        match &self.kind {
            ObjectKind::Grid2D(grid) => grid
                .centroids()
                .into_iter()
                .for_each(|point| bounds.include_point(point)),
            ObjectKind::Octree(octree) => octree
                .centroids()
                .into_iter()
                .for_each(|point| bounds.include_point(point)),
            ObjectKind::Drillhole(drillhole) => bounds.include_point(drillhole.collar),
            _ => self
                .vertices
                .iter()
                .for_each(|point| bounds.include_point(*point)),
        }
        if bounds.is_empty() { None } else { Some(bounds) }
    }

    pub(crate) fn require_kind(
        &self,
        expected: &'static str,
        accept: impl Fn(&ObjectKind) -> bool,
    ) -> ModelResult<()> {
        if accept(&self.kind) {
            Ok(())
        } else {
            Err(ModelError::KindMismatch {
                object: self.id,
                expected: expected.to_string(),
                found: self.kind.name().to_string(),
            })
        }
    }
}

/// `create_object` 的输入，描述对象种类、顶点与（可选）单元或分段。
#[derive(Debug, Clone)]
pub struct ObjectSpec {
    pub name: String,
    pub kind: ObjectKind,
    pub vertices: Vec<Point3>,
    pub cells: Option<CellArray>,
    pub parts: Option<Vec<u32>>,
    pub parent: Option<EntityId>,
}

impl ObjectSpec {
    pub fn new(name: impl Into<String>, kind: ObjectKind, vertices: Vec<Point3>) -> Self {
        Self {
            name: name.into(),
            kind,
            vertices,
            cells: None,
            parts: None,
            parent: None,
        }
    }

    pub fn points(name: impl Into<String>, vertices: Vec<Point3>) -> Self {
        Self::new(name, ObjectKind::Points, vertices)
    }

    pub fn curve(name: impl Into<String>, vertices: Vec<Point3>) -> Self {
        Self::new(name, ObjectKind::Curve, vertices)
    }

    pub fn surface(name: impl Into<String>, vertices: Vec<Point3>, triangles: &[[u32; 3]]) -> Self {
        Self::new(name, ObjectKind::Surface, vertices).with_cells(CellArray::from_rows(triangles))
    }

    pub fn grid2d(name: impl Into<String>, grid: Grid2D) -> Self {
        Self::new(name, ObjectKind::Grid2D(grid), Vec::new())
    }

    pub fn octree(name: impl Into<String>, octree: Octree) -> Self {
        Self::new(name, ObjectKind::Octree(octree), Vec::new())
    }

    pub fn drillhole(name: impl Into<String>, collar: Point3) -> Self {
        Self::new(name, ObjectKind::Drillhole(Drillhole::new(collar)), Vec::new())
    }

    pub fn current_electrodes(name: impl Into<String>, vertices: Vec<Point3>) -> Self {
        Self::new(name, ObjectKind::CurrentElectrode, vertices)
    }

    pub fn potential_electrodes(name: impl Into<String>, vertices: Vec<Point3>) -> Self {
        Self::new(name, ObjectKind::PotentialElectrode, vertices)
    }

    pub fn with_cells(mut self, cells: CellArray) -> Self {
        self.cells = Some(cells);
        self
    }

    pub fn with_parts(mut self, parts: Vec<u32>) -> Self {
        self.parts = Some(parts);
        self
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// 校验几何并生成对象实体；父节点由调用方解析。
    pub(crate) fn build(self, parent: EntityId) -> ModelResult<ObjectEntity> {
        let ObjectSpec {
            name,
            kind,
            vertices,
            cells,
            parts,
            parent: _,
        } = self;

        if let Some(bad) = vertices.iter().find(|vertex| !vertex.is_finite()) {
            return Err(ModelError::InvalidValue(format!(
                "vertex {bad:?} is not finite"
            )));
        }
        if !kind.takes_vertices() && !vertices.is_empty() {
            return Err(ModelError::InvalidValue(format!(
                "{kind} objects do not store explicit vertices"
            )));
        }

        let cells = match &kind {
            ObjectKind::Points => {
                if cells.as_ref().is_some_and(|cells| !cells.is_empty()) || parts.is_some() {
                    return Err(ModelError::InvalidValue(
                        "points objects do not take cells".to_string(),
                    ));
                }
                CellArray::empty(1)
            }
            kind if kind.is_curve_like() => match (cells, parts) {
                (Some(cells), _) => {
                    if cells.arity() != 2 {
                        return Err(ModelError::ShapeMismatch {
                            context: "curve cell arity".to_string(),
                            expected: 2,
                            actual: cells.arity(),
                        });
                    }
                    cells
                }
                (None, Some(parts)) => {
                    if parts.len() != vertices.len() {
                        return Err(ModelError::ShapeMismatch {
                            context: "curve parts".to_string(),
                            expected: vertices.len(),
                            actual: parts.len(),
                        });
                    }
                    CellArray::segments_from_parts(&parts)
                }
                (None, None) => CellArray::consecutive_segments(vertices.len()),
            },
            ObjectKind::Surface => {
                let cells = cells.ok_or_else(|| {
                    ModelError::InvalidValue("surface objects require triangle cells".to_string())
                })?;
                if cells.arity() != 3 {
                    return Err(ModelError::ShapeMismatch {
                        context: "surface cell arity".to_string(),
                        expected: 3,
                        actual: cells.arity(),
                    });
                }
                cells
            }
            _ => {
                if cells.is_some() || parts.is_some() {
                    return Err(ModelError::InvalidValue(format!(
                        "{kind} objects define their cells implicitly"
                    )));
                }
                CellArray::empty(1)
            }
        };
        cells.validate(vertices.len())?;

        Ok(ObjectEntity {
            id: EntityId::new(),
            name,
            parent,
            kind,
            vertices,
            cells,
            children: Vec::new(),
            property_groups: Vec::new(),
            metadata: None,
            ab_cell_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_vertices(n: usize) -> Vec<Point3> {
        (0..n).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect()
    }

    #[test]
    fn curve_defaults_to_consecutive_segments() {
        let object = ObjectSpec::curve("line", line_vertices(4))
            .build(EntityId::new())
            .expect("build curve");
        assert_eq!(object.n_cells(), 3);
        assert_eq!(object.cells().row(2), Some(&[2, 3][..]));
    }

    #[test]
    fn curve_parts_split_segments() {
        let object = ObjectSpec::curve("lines", line_vertices(5))
            .with_parts(vec![0, 0, 0, 1, 1])
            .build(EntityId::new())
            .unwrap();
        let rows: Vec<&[u32]> = object.cells().iter().collect();
        assert_eq!(rows, vec![&[0, 1][..], &[1, 2][..], &[3, 4][..]]);
    }

    #[test]
    fn curve_parts_length_must_match_vertices() {
        let err = ObjectSpec::curve("lines", line_vertices(3))
            .with_parts(vec![0, 0])
            .build(EntityId::new())
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::ShapeMismatch {
                expected: 3,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn out_of_range_cell_index_is_rejected() {
        let err = ObjectSpec::surface("tri", line_vertices(3), &[[0, 1, 3]])
            .build(EntityId::new())
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { expected: 3, .. }));
    }

    #[test]
    fn surface_requires_triangles() {
        let err = ObjectSpec::new("surf", ObjectKind::Surface, line_vertices(3))
            .with_cells(CellArray::from_rows(&[[0u32, 1]]))
            .build(EntityId::new())
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn flat_cells_must_divide_by_arity() {
        assert!(CellArray::from_flat(3, vec![0, 1, 2, 3]).is_err());
        let cells = CellArray::from_flat(3, vec![0, 1, 2, 2, 1, 0]).unwrap();
        assert_eq!(cells.len(), 2);
    }

    #[test]
    fn octree_base_refine_uses_shortest_axis() {
        let octree = Octree::new(Point3::new(0.0, 0.0, 0.0), [8, 4, 2], [1.0, 1.0, 1.0])
            .expect("valid octree");
        assert_eq!(octree.n_cells(), 8);
        assert!(octree.cells.iter().all(|cell| cell.size == 2));
        assert_eq!(octree.cells[0], OctreeCell { i: 0, j: 0, k: 0, size: 2 });
        assert_eq!(octree.cells[1], OctreeCell { i: 2, j: 0, k: 0, size: 2 });
        assert_eq!(octree.cells[4], OctreeCell { i: 0, j: 2, k: 0, size: 2 });

        let centroids = octree.centroids();
        assert_eq!(centroids[0], Point3::new(1.0, 1.0, 1.0));
        assert_eq!(centroids[7], Point3::new(7.0, 3.0, 1.0));
    }

    #[test]
    fn octree_rejects_non_power_of_two() {
        assert!(Octree::new(Point3::new(0.0, 0.0, 0.0), [6, 4, 2], [1.0; 3]).is_err());
    }

    #[test]
    fn grid_centroids_follow_rotation() {
        let grid = Grid2D::new(Point3::new(10.0, 0.0, 5.0), [2, 1], [2.0, 2.0], 90.0).unwrap();
        assert_eq!(grid.n_cells(), 2);
        let centroids = grid.centroids();
        assert!((centroids[0].x() - 9.0).abs() < 1e-9);
        assert!((centroids[0].y() - 1.0).abs() < 1e-9);
        assert!((centroids[1].x() - 9.0).abs() < 1e-9);
        assert!((centroids[1].y() - 3.0).abs() < 1e-9);
        assert_eq!(centroids[1].z(), 5.0);
    }

    #[test]
    fn implicit_objects_refuse_vertices() {
        let grid = Grid2D::new(Point3::new(0.0, 0.0, 0.0), [1, 1], [1.0, 1.0], 0.0).unwrap();
        let err = ObjectSpec::new("grid", ObjectKind::Grid2D(grid), line_vertices(2))
            .build(EntityId::new())
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidValue(_)));
    }
}
