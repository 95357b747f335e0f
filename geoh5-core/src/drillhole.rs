//! 钻孔深度索引与测井数据合并。
//!
//! 点测井按 `collocation_distance` 把新深度并入最近的已有深度点；
//! 区间测井只合并两端都在 `tolerance` 内的区间，部分重叠视为错误。
//! 合并在副本上完成，失败时原数据保持不变。

use std::collections::BTreeMap;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::errors::{ModelError, ModelResult};
use crate::geometry::Point3;

pub const DEFAULT_COLLOCATION_DISTANCE: f64 = 1e-2;
pub const DEFAULT_INTERVAL_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeOptions {
    pub collocation_distance: f64,
    pub interval_tolerance: f64,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            collocation_distance: DEFAULT_COLLOCATION_DISTANCE,
            interval_tolerance: DEFAULT_INTERVAL_TOLERANCE,
        }
    }
}

/// 一次合并的统计：并入已有行的数量与新增行的数量。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeReport {
    pub merged: usize,
    pub inserted: usize,
}

/// 测斜记录。方位角自北顺时针，倾角向下为负，单位均为度。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub depth: f64,
    pub azimuth: f64,
    pub dip: f64,
}

impl Survey {
    pub fn new(depth: f64, azimuth: f64, dip: f64) -> Self {
        Self { depth, azimuth, dip }
    }

    fn direction(&self) -> DVec3 {
        let (sin_az, cos_az) = self.azimuth.to_radians().sin_cos();
        let (sin_dip, cos_dip) = self.dip.to_radians().sin_cos();
        DVec3::new(sin_az * cos_dip, cos_az * cos_dip, sin_dip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub from: f64,
    pub to: f64,
}

impl Interval {
    #[inline]
    fn overlaps(&self, from: f64, to: f64) -> bool {
        self.from < to && from < self.to
    }

    #[inline]
    fn matches(&self, from: f64, to: f64, tolerance: f64) -> bool {
        (self.from - from).abs() <= tolerance && (self.to - to).abs() <= tolerance
    }
}

type Column = Vec<Option<f64>>;

/// 合并后各行的来源：原有行或新插入的行。
#[derive(Debug, Clone, Copy)]
enum RowSource {
    Existing(usize),
    Fresh(usize),
}

fn merge_order<T>(
    existing: &[T],
    fresh: &[T],
    key: impl Fn(&T) -> f64,
) -> Vec<RowSource> {
    let mut order = Vec::with_capacity(existing.len() + fresh.len());
    let (mut i, mut j) = (0, 0);
    while i < existing.len() || j < fresh.len() {
        let take_existing = match (existing.get(i), fresh.get(j)) {
            (Some(old), Some(new)) => key(old) <= key(new),
            (Some(_), None) => true,
            _ => false,
        };
        if take_existing {
            order.push(RowSource::Existing(i));
            i += 1;
        } else {
            order.push(RowSource::Fresh(j));
            j += 1;
        }
    }
    order
}

fn remap_column(column: &[Option<f64>], order: &[RowSource]) -> Column {
    order
        .iter()
        .map(|source| match source {
            RowSource::Existing(row) => column[*row],
            RowSource::Fresh(_) => None,
        })
        .collect()
}

fn fill_target(
    existing: Column,
    fresh_values: &[f64],
    order: &[RowSource],
) -> Column {
    order
        .iter()
        .map(|source| match source {
            RowSource::Existing(row) => existing[*row],
            RowSource::Fresh(index) => Some(fresh_values[*index]),
        })
        .collect()
}

fn check_column_name(column: &str) -> ModelResult<()> {
    if column.trim().is_empty() {
        return Err(ModelError::InvalidValue(
            "log column name cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn check_tolerance(name: &str, value: f64) -> ModelResult<()> {
    if !(value >= 0.0 && value.is_finite()) {
        return Err(ModelError::InvalidValue(format!(
            "{name} must be a finite non-negative number, got {value}"
        )));
    }
    Ok(())
}

fn check_columns(columns: &BTreeMap<String, Column>, rows: usize) -> ModelResult<()> {
    for (name, values) in columns {
        check_column_name(name)?;
        if values.len() != rows {
            return Err(ModelError::ShapeMismatch {
                expected: rows,
                actual: values.len(),
                context: format!("log column `{name}`"),
            });
        }
    }
    Ok(())
}

fn check_survey(survey: &Survey) -> ModelResult<()> {
    if !(survey.depth >= 0.0 && survey.depth.is_finite())
        || !survey.azimuth.is_finite()
        || !(-90.0..=90.0).contains(&survey.dip)
    {
        return Err(ModelError::InvalidValue(format!(
            "survey {survey:?} is out of range"
        )));
    }
    Ok(())
}

/// 点测井：按深度排序的深度点，每行可带多个命名列。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointLog {
    depths: Vec<f64>,
    #[serde(with = "crate::float_codec::columns")]
    columns: BTreeMap<String, Column>,
}

impl PointLog {
    #[inline]
    pub fn depths(&self) -> &[f64] {
        &self.depths
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.depths.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// 检查读入的索引：深度有限且不减，每列长度与深度点数一致。
    pub fn validate(&self) -> ModelResult<()> {
        if let Some(depth) = self.depths.iter().find(|depth| !depth.is_finite()) {
            return Err(ModelError::InvalidValue(format!(
                "log depth {depth} is not finite"
            )));
        }
        if let Some(pair) = self.depths.windows(2).find(|pair| pair[1] < pair[0]) {
            return Err(ModelError::InvalidValue(format!(
                "log depths out of order: {} after {}",
                pair[1], pair[0]
            )));
        }
        check_columns(&self.columns, self.depths.len())
    }

    /// 最近的已有深度点及其距离；等距时取较浅者。
    pub fn nearest(&self, depth: f64) -> Option<(usize, f64)> {
        let index = self.depths.partition_point(|existing| *existing < depth);
        let below = index
            .checked_sub(1)
            .map(|row| (row, (depth - self.depths[row]).abs()));
        let above = self
            .depths
            .get(index)
            .map(|existing| (index, (existing - depth).abs()));
        match (below, above) {
            (Some(b), Some(a)) => Some(if a.1 < b.1 { a } else { b }),
            (b, a) => b.or(a),
        }
    }

    /// 合并 (深度, 值) 样本到 `column` 列。
    pub fn insert(
        &mut self,
        column: &str,
        samples: &[(f64, f64)],
        collocation_distance: f64,
    ) -> ModelResult<MergeReport> {
        check_column_name(column)?;
        check_tolerance("collocation_distance", collocation_distance)?;
        if let Some((depth, _)) = samples.iter().find(|(depth, _)| !depth.is_finite()) {
            return Err(ModelError::InvalidValue(format!(
                "log depth {depth} is not finite"
            )));
        }

        let mut target = self
            .columns
            .get(column)
            .cloned()
            .unwrap_or_else(|| vec![None; self.depths.len()]);
        let mut claimed = vec![false; self.depths.len()];
        let mut fresh: Vec<(f64, f64)> = Vec::new();
        let mut merged = 0;

        for &(depth, value) in samples {
            match self.nearest(depth) {
                Some((row, distance)) if distance <= collocation_distance => {
                    if claimed[row] || target[row].is_some() {
                        return Err(ModelError::ColumnConflict {
                            column: column.to_string(),
                            depth: self.depths[row],
                        });
                    }
                    claimed[row] = true;
                    target[row] = Some(value);
                    merged += 1;
                }
                _ => fresh.push((depth, value)),
            }
        }

        fresh.sort_by(|a, b| a.0.total_cmp(&b.0));
        if let Some(pair) = fresh
            .windows(2)
            .find(|pair| pair[1].0 - pair[0].0 <= collocation_distance)
        {
            return Err(ModelError::ColumnConflict {
                column: column.to_string(),
                depth: pair[0].0,
            });
        }

        let fresh_depths: Vec<f64> = fresh.iter().map(|(depth, _)| *depth).collect();
        let fresh_values: Vec<f64> = fresh.iter().map(|(_, value)| *value).collect();
        let order = merge_order(&self.depths, &fresh_depths, |depth| *depth);

        let depths = order
            .iter()
            .map(|source| match source {
                RowSource::Existing(row) => self.depths[*row],
                RowSource::Fresh(index) => fresh_depths[*index],
            })
            .collect();
        let mut columns: BTreeMap<String, Column> = self
            .columns
            .iter()
            .filter(|(name, _)| name.as_str() != column)
            .map(|(name, values)| (name.clone(), remap_column(values, &order)))
            .collect();
        columns.insert(
            column.to_string(),
            fill_target(target, &fresh_values, &order),
        );

        self.depths = depths;
        self.columns = columns;
        Ok(MergeReport {
            merged,
            inserted: fresh.len(),
        })
    }
}

/// 区间测井：互不重叠、按起始深度排序的区间。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntervalLog {
    intervals: Vec<Interval>,
    #[serde(with = "crate::float_codec::columns")]
    columns: BTreeMap<String, Column>,
}

impl IntervalLog {
    #[inline]
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn validate(&self) -> ModelResult<()> {
        if let Some(bad) = self.intervals.iter().find(|interval| {
            !(interval.from.is_finite() && interval.to.is_finite()) || interval.from >= interval.to
        }) {
            return Err(ModelError::InvalidValue(format!(
                "interval [{}, {}] must be finite with from < to",
                bad.from, bad.to
            )));
        }
        if let Some(pair) = self.intervals.windows(2).find(|pair| pair[1].from < pair[0].to) {
            return Err(ModelError::OverlappingInterval {
                from: pair[1].from,
                to: pair[1].to,
                existing_from: pair[0].from,
                existing_to: pair[0].to,
            });
        }
        check_columns(&self.columns, self.intervals.len())
    }

    /// 合并 (from, to, 值) 到 `column` 列。
    pub fn insert(
        &mut self,
        column: &str,
        rows: &[(f64, f64, f64)],
        tolerance: f64,
    ) -> ModelResult<MergeReport> {
        check_column_name(column)?;
        check_tolerance("tolerance", tolerance)?;

        let mut target = self
            .columns
            .get(column)
            .cloned()
            .unwrap_or_else(|| vec![None; self.intervals.len()]);
        let mut claimed = vec![false; self.intervals.len()];
        let mut fresh: Vec<(Interval, f64)> = Vec::new();
        let mut merged = 0;

        for &(from, to, value) in rows {
            if !(from.is_finite() && to.is_finite()) || from >= to {
                return Err(ModelError::InvalidValue(format!(
                    "interval [{from}, {to}] must be finite with from < to"
                )));
            }

            // 区间互不重叠，因此 `to` 同样有序
            let start = self
                .intervals
                .partition_point(|existing| existing.to < from - tolerance);
            let mut matched = None;
            let mut overlap = None;
            for (offset, existing) in self.intervals[start..].iter().enumerate() {
                if existing.from > to + tolerance {
                    break;
                }
                if existing.matches(from, to, tolerance) {
                    matched = Some(start + offset);
                    break;
                }
                if overlap.is_none() && existing.overlaps(from, to) {
                    overlap = Some(*existing);
                }
            }

            match (matched, overlap) {
                (Some(row), _) => {
                    if claimed[row] || target[row].is_some() {
                        return Err(ModelError::ColumnConflict {
                            column: column.to_string(),
                            depth: self.intervals[row].from,
                        });
                    }
                    claimed[row] = true;
                    target[row] = Some(value);
                    merged += 1;
                }
                (None, Some(existing)) => {
                    return Err(ModelError::OverlappingInterval {
                        from,
                        to,
                        existing_from: existing.from,
                        existing_to: existing.to,
                    });
                }
                (None, None) => fresh.push((Interval { from, to }, value)),
            }
        }

        fresh.sort_by(|a, b| a.0.from.total_cmp(&b.0.from));
        if let Some(pair) = fresh
            .windows(2)
            .find(|pair| pair[0].0.overlaps(pair[1].0.from, pair[1].0.to))
        {
            return Err(ModelError::OverlappingInterval {
                from: pair[1].0.from,
                to: pair[1].0.to,
                existing_from: pair[0].0.from,
                existing_to: pair[0].0.to,
            });
        }

        let fresh_intervals: Vec<Interval> = fresh.iter().map(|(interval, _)| *interval).collect();
        let fresh_values: Vec<f64> = fresh.iter().map(|(_, value)| *value).collect();
        let order = merge_order(&self.intervals, &fresh_intervals, |interval| interval.from);

        let intervals = order
            .iter()
            .map(|source| match source {
                RowSource::Existing(row) => self.intervals[*row],
                RowSource::Fresh(index) => fresh_intervals[*index],
            })
            .collect();
        let mut columns: BTreeMap<String, Column> = self
            .columns
            .iter()
            .filter(|(name, _)| name.as_str() != column)
            .map(|(name, values)| (name.clone(), remap_column(values, &order)))
            .collect();
        columns.insert(
            column.to_string(),
            fill_target(target, &fresh_values, &order),
        );

        self.intervals = intervals;
        self.columns = columns;
        Ok(MergeReport {
            merged,
            inserted: fresh_intervals.len(),
        })
    }
}

/// 钻孔对象的专有数据：孔口、测斜以及两类测井索引。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drillhole {
    pub collar: Point3,
    #[serde(default)]
    surveys: Vec<Survey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    point_log: Option<PointLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    interval_log: Option<IntervalLog>,
}

impl Drillhole {
    pub fn new(collar: Point3) -> Self {
        Self {
            collar,
            surveys: Vec::new(),
            point_log: None,
            interval_log: None,
        }
    }

    #[inline]
    pub fn surveys(&self) -> &[Survey] {
        &self.surveys
    }

    #[inline]
    pub fn point_log(&self) -> Option<&PointLog> {
        self.point_log.as_ref()
    }

    #[inline]
    pub fn interval_log(&self) -> Option<&IntervalLog> {
        self.interval_log.as_ref()
    }

    /// 添加测斜记录；同一深度的旧记录会被替换，输入中重复的深度以最后一条为准。
    pub fn add_surveys(&mut self, surveys: &[Survey]) -> ModelResult<()> {
        surveys.iter().try_for_each(check_survey)?;

        let mut incoming = surveys.to_vec();
        incoming.sort_by(|a, b| a.depth.total_cmp(&b.depth));
        let mut deduped: Vec<Survey> = Vec::with_capacity(incoming.len());
        for survey in incoming {
            match deduped.last_mut() {
                Some(last) if last.depth == survey.depth => *last = survey,
                _ => deduped.push(survey),
            }
        }

        let mut staged = self.surveys.clone();
        let mut fresh = Vec::new();
        for survey in deduped {
            match staged.binary_search_by(|existing| existing.depth.total_cmp(&survey.depth)) {
                Ok(row) => staged[row] = survey,
                Err(_) => fresh.push(survey),
            }
        }
        let order = merge_order(&staged, &fresh, |survey| survey.depth);
        self.surveys = order
            .iter()
            .map(|source| match source {
                RowSource::Existing(row) => staged[*row],
                RowSource::Fresh(index) => fresh[*index],
            })
            .collect();
        Ok(())
    }

    /// 检查读入的钻孔：测斜有序且在范围内，两类测井索引自洽。
    pub fn validate(&self) -> ModelResult<()> {
        self.surveys.iter().try_for_each(check_survey)?;
        if let Some(pair) = self.surveys.windows(2).find(|pair| pair[1].depth <= pair[0].depth) {
            return Err(ModelError::InvalidValue(format!(
                "survey depths out of order: {} after {}",
                pair[1].depth, pair[0].depth
            )));
        }
        if let Some(log) = &self.point_log {
            log.validate()?;
        }
        if let Some(log) = &self.interval_log {
            log.validate()?;
        }
        Ok(())
    }

    /// 首次写入时创建点测井索引。
    pub fn add_point_log(
        &mut self,
        column: &str,
        samples: &[(f64, f64)],
        collocation_distance: f64,
    ) -> ModelResult<MergeReport> {
        let mut log = self.point_log.clone().unwrap_or_default();
        let report = log.insert(column, samples, collocation_distance)?;
        self.point_log = Some(log);
        Ok(report)
    }

    pub fn add_interval_log(
        &mut self,
        column: &str,
        rows: &[(f64, f64, f64)],
        tolerance: f64,
    ) -> ModelResult<MergeReport> {
        let mut log = self.interval_log.clone().unwrap_or_default();
        let report = log.insert(column, rows, tolerance)?;
        self.interval_log = Some(log);
        Ok(report)
    }

    /// 测斜与测井中出现的最大深度。
    pub fn end_of_hole(&self) -> f64 {
        let surveys = self.surveys.iter().map(|survey| survey.depth);
        let points = self
            .point_log
            .iter()
            .flat_map(|log| log.depths().iter().copied());
        let intervals = self
            .interval_log
            .iter()
            .flat_map(|log| log.intervals().iter().map(|interval| interval.to));
        surveys
            .chain(points)
            .chain(intervals)
            .fold(0.0, f64::max)
    }

    /// 沿测斜轨迹（分段直线）计算给定深度处的坐标；没有测斜时视为垂直向下。
    pub fn location_at(&self, depth: f64) -> Point3 {
        let vertical = Survey::new(0.0, 0.0, -90.0);
        let mut position = self.collar.as_vec3();
        let mut current_depth = 0.0;
        let mut current = self.surveys.first().copied().unwrap_or(vertical);
        for next in self.surveys.iter().skip(1) {
            if next.depth >= depth {
                break;
            }
            position += current.direction() * (next.depth - current_depth);
            current_depth = next.depth;
            current = *next;
        }
        position += current.direction() * (depth - current_depth);
        Point3::from_vec(position)
    }
}
