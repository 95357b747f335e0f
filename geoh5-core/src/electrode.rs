//! 电流 / 电位电极的互相引用与 `ab_cell_id` 编码。
//!
//! 电流电极（源）的每个单元分配一个唯一编码，电位电极（接收）的每个单元记录其对应的源编码；
//! 两份 `ab_cell_id` 数据共享同一个参考类型。

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::data::{Association, DataSpec, DataValues};
use crate::errors::{ModelError, ModelResult};
use crate::id::EntityId;
use crate::object::{ElectrodeLink, ObjectKind};
use crate::workspace::Workspace;

pub const AB_CELL_ID: &str = "ab_cell_id";

impl Workspace {
    /// 建立源与接收电极的双向链接。对同一对重复调用不产生变化。
    ///
    /// 任一端已有的链接若是单向的，返回 `DanglingLink` 且不做任何修改；
    /// 链接到新对象时，原伙伴的链接会被清除。
    pub fn link(&mut self, source: EntityId, receiver: EntityId) -> ModelResult<()> {
        self.object_ref(source)?
            .require_kind("current_electrode", |kind| {
                matches!(kind, ObjectKind::CurrentElectrode)
            })?;
        self.object_ref(receiver)?
            .require_kind("potential_electrode", |kind| {
                matches!(kind, ObjectKind::PotentialElectrode)
            })?;
        let source_partner = self.checked_partner(source)?;
        let receiver_partner = self.checked_partner(receiver)?;

        if source_partner == Some(receiver) && receiver_partner == Some(source) {
            return Ok(());
        }

        if let Some(old_receiver) = source_partner {
            self.clear_link(old_receiver)?;
            self.drop_receiver_ids(old_receiver)?;
        }
        if let Some(old_source) = receiver_partner {
            self.clear_link(old_source)?;
            self.drop_receiver_ids(receiver)?;
        }

        let link = ElectrodeLink {
            current_electrodes: source,
            potential_electrodes: receiver,
        };
        self.object_entry(source)?.metadata = Some(link);
        self.object_entry(receiver)?.metadata = Some(link);
        self.modified = true;
        info!(%source, %receiver, "链接电极");
        Ok(())
    }

    /// 清除对象及其伙伴上的链接。单向链接同样会被清理。
    pub fn unlink(&mut self, object: EntityId) -> ModelResult<()> {
        let Some(link) = self.object_ref(object)?.metadata else {
            return Ok(());
        };
        if let Some(partner) = link.partner_of(object) {
            if self
                .objects
                .get(&partner)
                .is_some_and(|partner| partner.metadata == Some(link))
            {
                self.clear_link(partner)?;
            } else {
                warn!(%object, %partner, "清理单向电极链接");
            }
        }
        self.clear_link(object)?;
        self.drop_receiver_ids(link.potential_electrodes)?;
        self.modified = true;
        Ok(())
    }

    /// 当前链接的另一端。
    pub fn linked_partner(&self, object: EntityId) -> Option<EntityId> {
        self.objects
            .get(&object)
            .and_then(|entity| entity.metadata)
            .and_then(|link| link.partner_of(object))
    }

    /// 为源电极的每个单元分配编码，返回 `ab_cell_id` 数据的 ID。
    ///
    /// 缺省标签为 `"1".."n"`。已有编码时在原映射上追加，接收端已记录的编码保持有效。
    pub fn assign_source_ids(
        &mut self,
        source: EntityId,
        labels: Option<&[String]>,
    ) -> ModelResult<EntityId> {
        let object = self.object_ref(source)?;
        object.require_kind("current_electrode", |kind| {
            matches!(kind, ObjectKind::CurrentElectrode)
        })?;
        let n_cells = object.n_cells();
        let existing = object.ab_cell_id;
        let labels: Vec<String> = match labels {
            Some(labels) => labels.to_vec(),
            None => (1..=n_cells).map(|code| code.to_string()).collect(),
        };
        if labels.len() != n_cells {
            return Err(ModelError::ShapeMismatch {
                context: format!("source ids for `{}`", object.name),
                expected: n_cells,
                actual: labels.len(),
            });
        }

        match existing {
            Some(data_id) => {
                let type_id = self
                    .data
                    .get(&data_id)
                    .map(|data| data.type_id)
                    .ok_or_else(|| ModelError::EntityNotFound(format!("data {data_id}")))?;
                let mut staged = self
                    .types
                    .get(&type_id)
                    .cloned()
                    .ok_or_else(|| ModelError::EntityNotFound(format!("data type {type_id}")))?;
                let codes = staged.extend_value_map(&labels)?;
                require_unique(&codes)?;
                self.types.insert(type_id, staged);
                if let Some(data) = self.data.get_mut(&data_id) {
                    data.values = DataValues::Referenced(codes);
                }
                self.modified = true;
                debug!(%source, cells = n_cells, "更新源电极编码");
                Ok(data_id)
            }
            None => {
                let mut map = crate::types::ReferenceMap::new();
                let codes = map.extend(&labels)?;
                require_unique(&codes)?;
                let spec = DataSpec::new(AB_CELL_ID, DataValues::Referenced(codes))
                    .with_association(Association::Cell)
                    .with_value_map(map);
                let data_id = self
                    .add_data(source, vec![spec])?
                    .first()
                    .copied()
                    .ok_or_else(|| ModelError::InvalidValue("no source ids written".to_string()))?;
                self.object_entry(source)?.ab_cell_id = Some(data_id);
                debug!(%source, cells = n_cells, "分配源电极编码");
                Ok(data_id)
            }
        }
    }

    /// 写入接收电极每个单元对应的源编码。全部校验通过后才写入，已有数据被替换。
    pub fn assign_ids(&mut self, receiver: EntityId, ids: &[u32]) -> ModelResult<EntityId> {
        let object = self.object_ref(receiver)?;
        object.require_kind("potential_electrode", |kind| {
            matches!(kind, ObjectKind::PotentialElectrode)
        })?;
        let n_cells = object.n_cells();
        let existing = object.ab_cell_id;
        let source = self
            .checked_partner(receiver)?
            .ok_or(ModelError::MissingSourceIds(receiver))?;
        let source_data = self
            .object_ref(source)?
            .ab_cell_id
            .and_then(|id| self.data.get(&id))
            .ok_or(ModelError::MissingSourceIds(source))?;
        let type_id = source_data.type_id;
        let map = self
            .types
            .get(&type_id)
            .and_then(|data_type| data_type.value_map())
            .ok_or(ModelError::MissingSourceIds(source))?;

        if ids.len() != n_cells {
            return Err(ModelError::ShapeMismatch {
                context: format!("{AB_CELL_ID} on receiver {receiver}"),
                expected: n_cells,
                actual: ids.len(),
            });
        }
        if let Some(unknown) = ids.iter().find(|id| !map.contains(**id)) {
            return Err(ModelError::UnknownReference(*unknown));
        }

        let data_id = match existing.filter(|id| self.data.contains_key(id)) {
            Some(data_id) => {
                let previous = self.data.get_mut(&data_id).map(|data| {
                    data.values = DataValues::Referenced(ids.to_vec());
                    std::mem::replace(&mut data.type_id, type_id)
                });
                if let Some(previous) = previous.filter(|previous| *previous != type_id) {
                    self.prune_types([previous]);
                }
                self.modified = true;
                data_id
            }
            None => {
                let spec = DataSpec::new(AB_CELL_ID, DataValues::Referenced(ids.to_vec()))
                    .with_association(Association::Cell)
                    .with_entity_type(type_id);
                let data_id = self
                    .add_data(receiver, vec![spec])?
                    .first()
                    .copied()
                    .ok_or_else(|| ModelError::InvalidValue("no receiver ids written".to_string()))?;
                self.object_entry(receiver)?.ab_cell_id = Some(data_id);
                data_id
            }
        };
        info!(%receiver, %source, cells = n_cells, "写入接收电极编码");
        Ok(data_id)
    }

    /// 记录为指定源编码的接收单元下标。
    pub fn receiver_cells_for(&self, receiver: EntityId, source_id: u32) -> ModelResult<Vec<usize>> {
        let object = self.object_ref(receiver)?;
        let codes = object
            .ab_cell_id
            .and_then(|id| self.data.get(&id))
            .and_then(|data| data.values.as_referenced())
            .ok_or(ModelError::MissingSourceIds(receiver))?;
        Ok(codes
            .iter()
            .enumerate()
            .filter_map(|(cell, code)| (*code == source_id).then_some(cell))
            .collect())
    }

    /// 源电极上编码对应的单元下标。
    pub fn source_cell_for(&self, source: EntityId, source_id: u32) -> ModelResult<Option<usize>> {
        let object = self.object_ref(source)?;
        let codes = object
            .ab_cell_id
            .and_then(|id| self.data.get(&id))
            .and_then(|data| data.values.as_referenced())
            .ok_or(ModelError::MissingSourceIds(source))?;
        Ok(codes.iter().position(|code| *code == source_id))
    }

    /// 读取对象当前的伙伴并确认链接是双向的。
    fn checked_partner(&self, object: EntityId) -> ModelResult<Option<EntityId>> {
        let Some(link) = self.object_ref(object)?.metadata else {
            return Ok(None);
        };
        let partner = link.partner_of(object).ok_or(ModelError::DanglingLink {
            object,
            partner: link.current_electrodes,
        })?;
        match self.objects.get(&partner) {
            Some(entity) if entity.metadata == Some(link) => Ok(Some(partner)),
            _ => Err(ModelError::DanglingLink { object, partner }),
        }
    }

    fn clear_link(&mut self, object: EntityId) -> ModelResult<()> {
        self.object_entry(object)?.metadata = None;
        Ok(())
    }

    /// 接收端失去源后，其编码不再有意义。
    fn drop_receiver_ids(&mut self, receiver: EntityId) -> ModelResult<()> {
        let stale = self
            .objects
            .get(&receiver)
            .filter(|object| matches!(object.kind, ObjectKind::PotentialElectrode))
            .and_then(|object| object.ab_cell_id);
        if let Some(data_id) = stale {
            if self.data.contains_key(&data_id) {
                self.remove_entity(data_id)?;
            }
            self.object_entry(receiver)?.ab_cell_id = None;
        }
        Ok(())
    }
}

fn require_unique(codes: &[u32]) -> ModelResult<()> {
    let mut seen = HashSet::with_capacity(codes.len());
    match codes.iter().find(|code| !seen.insert(**code)) {
        Some(code) => Err(ModelError::InvalidValue(format!(
            "source id {code} assigned to more than one cell"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point3;
    use crate::object::ObjectSpec;

    fn line(n: usize, offset: f64) -> Vec<Point3> {
        (0..n)
            .map(|i| Point3::new(i as f64 * 20.0, offset, 0.0))
            .collect()
    }

    /// 两个 AB 偶极子，三个 MN 偶极子。
    fn electrode_pair(ws: &mut Workspace) -> (EntityId, EntityId) {
        let source = ws
            .create_object(
                ObjectSpec::current_electrodes("Currents", line(4, 0.0))
                    .with_parts(vec![0, 0, 1, 1]),
            )
            .unwrap();
        let receiver = ws
            .create_object(
                ObjectSpec::potential_electrodes("Potentials", line(6, 10.0))
                    .with_parts(vec![0, 0, 1, 1, 2, 2]),
            )
            .unwrap();
        (source, receiver)
    }

    #[test]
    fn reassigned_receiver_ids_release_their_old_type() {
        let mut ws = Workspace::new();
        let (source, receiver) = electrode_pair(&mut ws);
        ws.link(source, receiver).unwrap();
        ws.assign_source_ids(source, None).unwrap();

        let stale_map = crate::types::ReferenceMap::assign(["x", "y"]).unwrap();
        let stale = ws
            .add_data(
                receiver,
                vec![DataSpec::new("old_ids", DataValues::Referenced(vec![1, 2, 1]))
                    .with_association(Association::Cell)
                    .with_value_map(stale_map)],
            )
            .unwrap()[0];
        let stale_type = ws.data(stale).unwrap().type_id;
        ws.object_entry(receiver).unwrap().ab_cell_id = Some(stale);
        let types_before = ws.data_types().count();

        let data_id = ws.assign_ids(receiver, &[2, 1, 2]).unwrap();
        assert_eq!(data_id, stale);
        let source_type = ws.data(ws.object(source).unwrap().ab_cell_id.unwrap()).unwrap().type_id;
        assert_eq!(ws.data(data_id).unwrap().type_id, source_type);
        assert!(ws.data_type(stale_type).is_none());
        assert_eq!(ws.data_types().count(), types_before - 1);
    }

    #[test]
    fn reserved_label_is_not_a_source_id() {
        let mut ws = Workspace::new();
        let (source, receiver) = electrode_pair(&mut ws);
        ws.link(source, receiver).unwrap();
        let labels = vec!["Unknown".to_string(), "AB_200".to_string()];
        let err = ws.assign_source_ids(source, Some(&labels)).unwrap_err();
        assert!(matches!(err, ModelError::ReferenceConflict { code: 0, .. }));
        assert!(ws.object(source).unwrap().ab_cell_id.is_none());
    }

    #[test]
    fn link_writes_both_sides_and_is_idempotent() {
        let mut ws = Workspace::new();
        let (source, receiver) = electrode_pair(&mut ws);
        ws.link(source, receiver).expect("link");
        let first = ws.object(source).unwrap().metadata;
        ws.link(source, receiver).expect("relink");
        assert_eq!(ws.object(source).unwrap().metadata, first);
        assert_eq!(ws.object(receiver).unwrap().metadata, first);
        assert_eq!(ws.linked_partner(receiver), Some(source));
    }

    #[test]
    fn link_requires_electrode_kinds() {
        let mut ws = Workspace::new();
        let (source, receiver) = electrode_pair(&mut ws);
        let err = ws.link(receiver, source).unwrap_err();
        assert!(matches!(err, ModelError::KindMismatch { .. }));
    }

    #[test]
    fn relinking_clears_previous_partner() {
        let mut ws = Workspace::new();
        let (source, receiver) = electrode_pair(&mut ws);
        let other = ws
            .create_object(ObjectSpec::potential_electrodes("Other", line(2, 5.0)))
            .unwrap();
        ws.link(source, receiver).unwrap();
        ws.assign_source_ids(source, None).unwrap();
        ws.assign_ids(receiver, &[1, 1, 2]).unwrap();

        ws.link(source, other).unwrap();
        assert_eq!(ws.object(receiver).unwrap().metadata, None);
        assert!(ws.object(receiver).unwrap().ab_cell_id.is_none());
        assert!(ws.data_by_name(receiver, AB_CELL_ID).is_none());
        assert_eq!(ws.linked_partner(source), Some(other));
    }

    #[test]
    fn one_sided_link_is_reported_before_changes() {
        let mut ws = Workspace::new();
        let (source, receiver) = electrode_pair(&mut ws);
        ws.link(source, receiver).unwrap();
        ws.object_entry(receiver).unwrap().metadata = None;

        let other = ws
            .create_object(ObjectSpec::potential_electrodes("Other", line(2, 5.0)))
            .unwrap();
        let err = ws.link(source, other).unwrap_err();
        assert_eq!(
            err,
            ModelError::DanglingLink {
                object: source,
                partner: receiver
            }
        );
        assert!(ws.object(other).unwrap().metadata.is_none());

        ws.unlink(source).expect("repair");
        assert!(ws.object(source).unwrap().metadata.is_none());
        ws.link(source, other).expect("link after repair");
    }

    #[test]
    fn assign_ids_shares_source_type() {
        let mut ws = Workspace::new();
        let (source, receiver) = electrode_pair(&mut ws);
        ws.link(source, receiver).unwrap();
        let labels = vec!["AB_100".to_string(), "AB_200".to_string()];
        let source_data = ws.assign_source_ids(source, Some(&labels)).unwrap();
        let receiver_data = ws.assign_ids(receiver, &[1, 1, 2]).unwrap();

        let source_type = ws.data(source_data).unwrap().type_id;
        assert_ne!(source_data, receiver_data);
        assert_eq!(ws.data(receiver_data).unwrap().type_id, source_type);
        let map = ws.data_type(source_type).unwrap().value_map().unwrap();
        assert_eq!(map.get(2), Some("AB_200"));

        assert_eq!(ws.receiver_cells_for(receiver, 1).unwrap(), vec![0, 1]);
        assert_eq!(ws.source_cell_for(source, 2).unwrap(), Some(1));

        let replaced = ws.assign_ids(receiver, &[2, 2, 0]).unwrap();
        assert_eq!(replaced, receiver_data);
        assert_eq!(ws.receiver_cells_for(receiver, 2).unwrap(), vec![0, 1]);
    }

    #[test]
    fn unknown_id_leaves_receiver_untouched() {
        let mut ws = Workspace::new();
        let (source, receiver) = electrode_pair(&mut ws);
        ws.link(source, receiver).unwrap();
        ws.assign_source_ids(source, None).unwrap();
        let data = ws.assign_ids(receiver, &[1, 2, 2]).unwrap();

        let err = ws.assign_ids(receiver, &[1, 7, 2]).unwrap_err();
        assert_eq!(err, ModelError::UnknownReference(7));
        assert_eq!(
            ws.data(data).unwrap().values,
            DataValues::Referenced(vec![1, 2, 2])
        );

        let err = ws.assign_ids(receiver, &[1, 2]).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn assign_ids_requires_linked_source_with_ids() {
        let mut ws = Workspace::new();
        let (source, receiver) = electrode_pair(&mut ws);
        assert_eq!(
            ws.assign_ids(receiver, &[1, 1, 1]).unwrap_err(),
            ModelError::MissingSourceIds(receiver)
        );
        ws.link(source, receiver).unwrap();
        assert_eq!(
            ws.assign_ids(receiver, &[1, 1, 1]).unwrap_err(),
            ModelError::MissingSourceIds(source)
        );
    }

    #[test]
    fn source_ids_extend_existing_map() {
        let mut ws = Workspace::new();
        let (source, _) = electrode_pair(&mut ws);
        let data = ws.assign_source_ids(source, None).unwrap();
        let labels = vec!["2".to_string(), "9".to_string()];
        let again = ws.assign_source_ids(source, Some(&labels)).unwrap();
        assert_eq!(data, again);
        assert_eq!(
            ws.data(data).unwrap().values,
            DataValues::Referenced(vec![2, 3])
        );

        let duplicate = vec!["x".to_string(), "x".to_string()];
        assert!(matches!(
            ws.assign_source_ids(source, Some(&duplicate)),
            Err(ModelError::InvalidValue(_))
        ));
        let type_id = ws.data(data).unwrap().type_id;
        assert_eq!(ws.data_type(type_id).unwrap().value_map().unwrap().len(), 4);
    }

    #[test]
    fn removing_source_keeps_shared_type_for_receiver() {
        let mut ws = Workspace::new();
        let (source, receiver) = electrode_pair(&mut ws);
        ws.link(source, receiver).unwrap();
        ws.assign_source_ids(source, None).unwrap();
        let data = ws.assign_ids(receiver, &[1, 2, 2]).unwrap();
        let type_id = ws.data(data).unwrap().type_id;

        ws.remove_entity(source).unwrap();
        assert!(ws.object(receiver).unwrap().metadata.is_none());
        assert!(ws.data_type(type_id).is_some());
    }
}
