//! 工作区实体图：以 ID 为键的实体仓库，父子关系只保存 ID。

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data::{Association, Data, DataSpec, DataValues};
use crate::drillhole::{MergeOptions, MergeReport, Survey};
use crate::errors::{ModelError, ModelResult};
use crate::id::EntityId;
use crate::object::{ObjectEntity, ObjectSpec, PropertyGroup};
use crate::types::{DataType, PrimitiveType, ReferenceMap};

pub const ROOT_NAME: &str = "Workspace";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Root,
    Container,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: EntityId,
    pub name: String,
    pub parent: Option<EntityId>,
    pub kind: GroupKind,
    #[serde(default)]
    pub children: Vec<EntityId>,
}

/// 持久化层读写的单个实体记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum EntityRecord {
    Group(Group),
    Object(ObjectEntity),
    Data(Data),
}

impl EntityRecord {
    pub fn id(&self) -> EntityId {
        match self {
            EntityRecord::Group(group) => group.id,
            EntityRecord::Object(object) => object.id,
            EntityRecord::Data(data) => data.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EntityRecord::Group(group) => &group.name,
            EntityRecord::Object(object) => &object.name,
            EntityRecord::Data(data) => &data.name,
        }
    }

    pub fn parent(&self) -> Option<EntityId> {
        match self {
            EntityRecord::Group(group) => group.parent,
            EntityRecord::Object(object) => Some(object.parent),
            EntityRecord::Data(data) => Some(data.parent),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Group(&'a Group),
    Object(&'a ObjectEntity),
    Data(&'a Data),
}

impl EntityRef<'_> {
    pub fn name(&self) -> &str {
        match self {
            EntityRef::Group(group) => &group.name,
            EntityRef::Object(object) => &object.name,
            EntityRef::Data(data) => &data.name,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            EntityRef::Group(_) => "group",
            EntityRef::Object(object) => object.kind.name(),
            EntityRef::Data(_) => "data",
        }
    }
}

/// 内存中的工作区。所有修改立即生效，持久化由上层显式 `finalize`。
#[derive(Debug, Clone)]
pub struct Workspace {
    pub(crate) root: EntityId,
    pub(crate) groups: HashMap<EntityId, Group>,
    pub(crate) objects: HashMap<EntityId, ObjectEntity>,
    pub(crate) data: HashMap<EntityId, Data>,
    pub(crate) types: HashMap<EntityId, DataType>,
    pub(crate) modified: bool,
}

impl Workspace {
    pub fn new() -> Self {
        let root = Group {
            id: EntityId::new(),
            name: ROOT_NAME.to_string(),
            parent: None,
            kind: GroupKind::Root,
            children: Vec::new(),
        };
        let root_id = root.id;
        Self {
            root: root_id,
            groups: HashMap::from([(root_id, root)]),
            objects: HashMap::new(),
            data: HashMap::new(),
            types: HashMap::new(),
            modified: false,
        }
    }

    #[inline]
    pub fn root(&self) -> EntityId {
        self.root
    }

    /// 自上次保存以来是否有结构修改。
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    #[inline]
    pub fn mark_saved(&mut self) {
        self.modified = false;
    }

    pub fn group(&self, id: EntityId) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn object(&self, id: EntityId) -> Option<&ObjectEntity> {
        self.objects.get(&id)
    }

    pub fn data(&self, id: EntityId) -> Option<&Data> {
        self.data.get(&id)
    }

    pub fn data_type(&self, id: EntityId) -> Option<&DataType> {
        self.types.get(&id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectEntity> {
        self.objects.values()
    }

    pub fn all_data(&self) -> impl Iterator<Item = &Data> {
        self.data.values()
    }

    pub fn data_types(&self) -> impl Iterator<Item = &DataType> {
        self.types.values()
    }

    pub fn entity(&self, id: EntityId) -> Option<EntityRef<'_>> {
        if let Some(group) = self.groups.get(&id) {
            return Some(EntityRef::Group(group));
        }
        if let Some(object) = self.objects.get(&id) {
            return Some(EntityRef::Object(object));
        }
        self.data.get(&id).map(EntityRef::Data)
    }

    /// 按名称查找实体（组、对象与数据），结果按遍历顺序排列。
    pub fn get_entity(&self, name: &str) -> Vec<EntityId> {
        self.walk()
            .into_iter()
            .filter(|id| self.entity(*id).is_some_and(|entity| entity.name() == name))
            .collect()
    }

    pub fn children(&self, id: EntityId) -> &[EntityId] {
        if let Some(group) = self.groups.get(&id) {
            &group.children
        } else if let Some(object) = self.objects.get(&id) {
            &object.children
        } else {
            &[]
        }
    }

    pub fn find_group(&self, name: &str) -> Option<&Group> {
        self.get_entity(name).into_iter().find_map(|id| self.groups.get(&id))
    }

    pub fn find_object(&self, name: &str) -> Option<&ObjectEntity> {
        self.get_entity(name).into_iter().find_map(|id| self.objects.get(&id))
    }

    pub fn find_data(&self, name: &str) -> Vec<&Data> {
        self.get_entity(name)
            .into_iter()
            .filter_map(|id| self.data.get(&id))
            .collect()
    }

    pub fn data_by_name(&self, object: EntityId, name: &str) -> Option<&Data> {
        self.children(object)
            .iter()
            .filter_map(|id| self.data.get(id))
            .find(|data| data.name == name)
    }

    pub(crate) fn object_ref(&self, id: EntityId) -> ModelResult<&ObjectEntity> {
        self.objects
            .get(&id)
            .ok_or_else(|| ModelError::EntityNotFound(format!("object {id}")))
    }

    pub(crate) fn object_entry(&mut self, id: EntityId) -> ModelResult<&mut ObjectEntity> {
        self.objects
            .get_mut(&id)
            .ok_or_else(|| ModelError::EntityNotFound(format!("object {id}")))
    }

    fn require_group(&self, id: EntityId) -> ModelResult<&Group> {
        self.groups
            .get(&id)
            .ok_or_else(|| ModelError::EntityNotFound(format!("group {id}")))
    }

    /// 深度优先遍历，根节点在前，子节点保持插入顺序。
    pub fn walk(&self) -> Vec<EntityId> {
        let mut order = Vec::with_capacity(self.groups.len() + self.objects.len() + self.data.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        order
    }

    pub fn create_group(
        &mut self,
        name: impl Into<String>,
        parent: Option<EntityId>,
    ) -> ModelResult<EntityId> {
        let parent = parent.unwrap_or(self.root);
        self.require_group(parent)?;
        let group = Group {
            id: EntityId::new(),
            name: name.into(),
            parent: Some(parent),
            kind: GroupKind::Container,
            children: Vec::new(),
        };
        let id = group.id;
        debug!(%id, name = %group.name, %parent, "创建容器组");
        self.groups.insert(id, group);
        if let Some(parent_group) = self.groups.get_mut(&parent) {
            parent_group.children.push(id);
        }
        self.modified = true;
        Ok(id)
    }

    /// 校验几何后创建对象，父节点缺省为根组。
    pub fn create_object(&mut self, spec: ObjectSpec) -> ModelResult<EntityId> {
        let parent = spec.parent.unwrap_or(self.root);
        self.require_group(parent)?;
        let object = spec.build(parent)?;
        let id = object.id;
        info!(
            %id,
            name = %object.name,
            kind = object.kind.name(),
            vertices = object.n_vertices(),
            cells = object.n_cells(),
            "创建对象"
        );
        self.objects.insert(id, object);
        if let Some(parent_group) = self.groups.get_mut(&parent) {
            parent_group.children.push(id);
        }
        self.modified = true;
        Ok(id)
    }

    /// 注册一个可被多个数据共享的类型。
    pub fn add_data_type(&mut self, data_type: DataType) -> EntityId {
        let id = data_type.id;
        self.types.insert(id, data_type);
        self.modified = true;
        id
    }

    /// 在共享类型的参考映射上追加标签，所有引用该类型的数据立即可见。
    pub fn extend_value_map<I, S>(&mut self, type_id: EntityId, labels: I) -> ModelResult<Vec<u32>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let data_type = self
            .types
            .get_mut(&type_id)
            .ok_or_else(|| ModelError::EntityNotFound(format!("data type {type_id}")))?;
        let codes = data_type.extend_value_map(labels)?;
        self.modified = true;
        Ok(codes)
    }

    /// 为对象添加数据。全部条目校验通过后才写入。
    pub fn add_data(
        &mut self,
        object_id: EntityId,
        specs: Vec<DataSpec>,
    ) -> ModelResult<Vec<EntityId>> {
        let staged = self.stage_data(object_id, specs)?;
        self.commit_data(object_id, staged)
    }

    /// 添加数据并放入指定属性组；分组校验在写入前完成，失败时工作区不变。
    pub fn add_data_in_group(
        &mut self,
        object_id: EntityId,
        specs: Vec<DataSpec>,
        group_name: &str,
    ) -> ModelResult<Vec<EntityId>> {
        let staged = self.stage_data(object_id, specs)?;
        let members: Vec<(&str, Association)> = staged
            .data
            .iter()
            .map(|data| (data.name.as_str(), data.association))
            .collect();
        group_association(self.object_ref(object_id)?, group_name, &members)?;
        let ids = self.commit_data(object_id, staged)?;
        self.add_ids_to_group(object_id, &ids, group_name)?;
        Ok(ids)
    }

    fn stage_data(&self, object_id: EntityId, specs: Vec<DataSpec>) -> ModelResult<StagedData> {
        let object = self.object_ref(object_id)?;
        let mut new_types = Vec::new();
        let mut new_data = Vec::with_capacity(specs.len());

        for spec in specs {
            if spec.values.is_empty() {
                return Err(ModelError::InvalidValue(format!(
                    "data `{}` has no values",
                    spec.name
                )));
            }
            let association = resolve_association(object, spec.association, spec.values.len())?;
            let type_id = match (spec.entity_type, spec.value_map) {
                (Some(_), Some(_)) => {
                    return Err(ModelError::InvalidValue(format!(
                        "data `{}` cannot take both a shared type and a value map",
                        spec.name
                    )));
                }
                (Some(type_id), None) => {
                    let data_type = self
                        .types
                        .get(&type_id)
                        .ok_or_else(|| ModelError::EntityNotFound(format!("data type {type_id}")))?;
                    check_values_against_type(data_type, &spec.values)?;
                    type_id
                }
                (None, Some(mut value_map)) => {
                    value_map.ensure_unknown();
                    let data_type = DataType::referenced(spec.name.clone(), value_map);
                    check_values_against_type(&data_type, &spec.values)?;
                    let id = data_type.id;
                    new_types.push(data_type);
                    id
                }
                (None, None) => {
                    let mut data_type = DataType::new(spec.name.clone(), spec.values.primitive());
                    if data_type.primitive == PrimitiveType::Referenced {
                        let mut map = ReferenceMap::new();
                        map.ensure_unknown();
                        data_type = DataType::referenced(spec.name.clone(), map);
                    }
                    check_values_against_type(&data_type, &spec.values)?;
                    let id = data_type.id;
                    new_types.push(data_type);
                    id
                }
            };
            new_data.push(Data {
                id: EntityId::new(),
                name: spec.name,
                parent: object_id,
                association,
                type_id,
                values: spec.values,
            });
        }

        Ok(StagedData {
            types: new_types,
            data: new_data,
        })
    }

    fn commit_data(&mut self, object_id: EntityId, staged: StagedData) -> ModelResult<Vec<EntityId>> {
        let StagedData {
            types: new_types,
            data: new_data,
        } = staged;
        let ids: Vec<EntityId> = new_data.iter().map(|data| data.id).collect();
        for data_type in new_types {
            self.types.insert(data_type.id, data_type);
        }
        for data in new_data {
            debug!(id = %data.id, name = %data.name, association = %data.association, "添加数据");
            self.data.insert(data.id, data);
        }
        self.object_entry(object_id)?.children.extend(ids.iter().copied());
        self.modified = true;
        Ok(ids)
    }

    /// 按名称把对象上的数据加入属性组，属性组不存在时创建。
    pub fn add_data_to_group(
        &mut self,
        object_id: EntityId,
        data_names: &[&str],
        group_name: &str,
    ) -> ModelResult<EntityId> {
        let object = self.object_ref(object_id)?;
        let mut ids = Vec::with_capacity(data_names.len());
        for name in data_names {
            let data = self.data_by_name(object_id, name).ok_or_else(|| {
                ModelError::EntityNotFound(format!("data `{name}` on `{}`", object.name))
            })?;
            ids.push(data.id);
        }
        self.add_ids_to_group(object_id, &ids, group_name)
    }

    fn add_ids_to_group(
        &mut self,
        object_id: EntityId,
        ids: &[EntityId],
        group_name: &str,
    ) -> ModelResult<EntityId> {
        let object = self.object_ref(object_id)?;
        let members: Vec<&Data> = ids
            .iter()
            .map(|id| {
                self.data
                    .get(id)
                    .filter(|data| data.parent == object_id)
                    .ok_or_else(|| ModelError::EntityNotFound(format!("data {id} on object {object_id}")))
            })
            .collect::<ModelResult<_>>()?;

        let members: Vec<(&str, Association)> = members
            .iter()
            .map(|data| (data.name.as_str(), data.association))
            .collect();
        let association = group_association(object, group_name, &members)?;

        let object = self.object_entry(object_id)?;
        let index = match object
            .property_groups
            .iter()
            .position(|group| group.name == group_name)
        {
            Some(index) => index,
            None => {
                object.property_groups.push(PropertyGroup {
                    id: EntityId::new(),
                    name: group_name.to_string(),
                    association,
                    properties: Vec::new(),
                });
                object.property_groups.len() - 1
            }
        };
        let group = &mut object.property_groups[index];
        for id in ids {
            if !group.properties.contains(id) {
                group.properties.push(*id);
            }
        }
        let group_id = group.id;
        self.modified = true;
        Ok(group_id)
    }

    pub fn rename(&mut self, id: EntityId, name: impl Into<String>) -> ModelResult<()> {
        let name = name.into();
        if let Some(group) = self.groups.get_mut(&id) {
            group.name = name;
        } else if let Some(object) = self.objects.get_mut(&id) {
            object.name = name;
        } else if let Some(data) = self.data.get_mut(&id) {
            data.name = name;
        } else {
            return Err(ModelError::EntityNotFound(id.to_string()));
        }
        self.modified = true;
        Ok(())
    }

    /// 修改组或对象的父节点。组之间不允许成环；数据不可移动。
    pub fn set_parent(&mut self, id: EntityId, new_parent: EntityId) -> ModelResult<()> {
        if id == self.root {
            return Err(ModelError::RootImmutable);
        }
        if !self.groups.contains_key(&new_parent) {
            return Err(if self.entity(new_parent).is_some() {
                ModelError::InvalidParent {
                    entity: id,
                    parent: new_parent,
                }
            } else {
                ModelError::EntityNotFound(new_parent.to_string())
            });
        }

        let old_parent = if let Some(group) = self.groups.get(&id) {
            let mut cursor = Some(new_parent);
            while let Some(current) = cursor {
                if current == id {
                    return Err(ModelError::CyclicParent {
                        entity: id,
                        parent: new_parent,
                    });
                }
                cursor = self.groups.get(&current).and_then(|group| group.parent);
            }
            group.parent
        } else if let Some(object) = self.objects.get(&id) {
            Some(object.parent)
        } else if self.data.contains_key(&id) {
            return Err(ModelError::InvalidParent {
                entity: id,
                parent: new_parent,
            });
        } else {
            return Err(ModelError::EntityNotFound(id.to_string()));
        };

        if old_parent == Some(new_parent) {
            return Ok(());
        }
        if let Some(old) = old_parent.and_then(|old| self.groups.get_mut(&old)) {
            old.children.retain(|child| *child != id);
        }
        if let Some(group) = self.groups.get_mut(&id) {
            group.parent = Some(new_parent);
        } else if let Some(object) = self.objects.get_mut(&id) {
            object.parent = new_parent;
        }
        if let Some(parent) = self.groups.get_mut(&new_parent) {
            parent.children.push(id);
        }
        self.modified = true;
        Ok(())
    }

    /// 删除实体及其全部后代，同时清理属性组成员、电极链接与不再被引用的类型。
    pub fn remove_entity(&mut self, id: EntityId) -> ModelResult<()> {
        if id == self.root {
            return Err(ModelError::RootImmutable);
        }
        let parent = self
            .entity(id)
            .ok_or_else(|| ModelError::EntityNotFound(id.to_string()))
            .map(|entity| match entity {
                EntityRef::Group(group) => group.parent,
                EntityRef::Object(object) => Some(object.parent),
                EntityRef::Data(data) => Some(data.parent),
            })?;

        let mut doomed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            doomed.push(current);
            stack.extend(self.children(current).iter().copied());
        }
        let doomed_set: HashSet<EntityId> = doomed.iter().copied().collect();

        let mut released_types = HashSet::new();
        for entity in &doomed {
            if let Some(data) = self.data.remove(entity) {
                released_types.insert(data.type_id);
                if let Some(owner) = self.objects.get_mut(&data.parent) {
                    owner.children.retain(|child| *child != data.id);
                    for group in &mut owner.property_groups {
                        group.properties.retain(|member| *member != data.id);
                    }
                    if owner.ab_cell_id == Some(data.id) {
                        owner.ab_cell_id = None;
                    }
                }
            } else if let Some(object) = self.objects.remove(entity) {
                if let Some(partner) = object
                    .metadata
                    .and_then(|link| link.partner_of(object.id))
                    .filter(|partner| !doomed_set.contains(partner))
                {
                    if let Some(partner_object) = self.objects.get_mut(&partner) {
                        if partner_object.metadata == object.metadata {
                            partner_object.metadata = None;
                        }
                    }
                }
            } else {
                self.groups.remove(entity);
            }
        }

        if let Some(parent) = parent {
            if let Some(group) = self.groups.get_mut(&parent) {
                group.children.retain(|child| *child != id);
            }
            if let Some(object) = self.objects.get_mut(&parent) {
                object.children.retain(|child| *child != id);
            }
        }

        self.prune_types(released_types);

        info!(%id, removed = doomed.len(), "删除实体");
        self.modified = true;
        Ok(())
    }

    /// 删除候选类型中已没有任何数据引用的那些。
    pub(crate) fn prune_types(&mut self, candidates: impl IntoIterator<Item = EntityId>) {
        let still_used: HashSet<EntityId> = self.data.values().map(|data| data.type_id).collect();
        for type_id in candidates {
            if !still_used.contains(&type_id) && self.types.remove(&type_id).is_some() {
                debug!(%type_id, "移除未引用的数据类型");
            }
        }
    }

    pub fn add_surveys(&mut self, drillhole: EntityId, surveys: &[Survey]) -> ModelResult<()> {
        let hole = self.drillhole_entry(drillhole)?;
        hole.add_surveys(surveys)?;
        self.modified = true;
        Ok(())
    }

    /// 向钻孔点测井合并一列数据。
    pub fn add_point_log(
        &mut self,
        drillhole: EntityId,
        column: &str,
        samples: &[(f64, f64)],
        options: &MergeOptions,
    ) -> ModelResult<MergeReport> {
        let hole = self.drillhole_entry(drillhole)?;
        let report = hole.add_point_log(column, samples, options.collocation_distance)?;
        debug!(%drillhole, column, merged = report.merged, inserted = report.inserted, "合并点测井");
        self.modified = true;
        Ok(report)
    }

    /// 向钻孔区间测井合并一列数据。
    pub fn add_interval_log(
        &mut self,
        drillhole: EntityId,
        column: &str,
        rows: &[(f64, f64, f64)],
        options: &MergeOptions,
    ) -> ModelResult<MergeReport> {
        let hole = self.drillhole_entry(drillhole)?;
        let report = hole.add_interval_log(column, rows, options.interval_tolerance)?;
        debug!(%drillhole, column, merged = report.merged, inserted = report.inserted, "合并区间测井");
        self.modified = true;
        Ok(report)
    }

    fn drillhole_entry(&mut self, id: EntityId) -> ModelResult<&mut crate::drillhole::Drillhole> {
        let object = self.object_entry(id)?;
        object.require_kind("drillhole", |kind| {
            matches!(kind, crate::object::ObjectKind::Drillhole(_))
        })?;
        object
            .drillhole_mut()
            .ok_or_else(|| ModelError::EntityNotFound(format!("drillhole {id}")))
    }

    /// 按遍历顺序导出实体记录与类型，供持久化层写出。
    pub fn records(&self) -> (Vec<EntityRecord>, Vec<DataType>) {
        let records = self
            .walk()
            .into_iter()
            .filter_map(|id| {
                if let Some(group) = self.groups.get(&id) {
                    Some(EntityRecord::Group(group.clone()))
                } else if let Some(object) = self.objects.get(&id) {
                    Some(EntityRecord::Object(object.clone()))
                } else {
                    self.data.get(&id).cloned().map(EntityRecord::Data)
                }
            })
            .collect();
        let mut types: Vec<DataType> = self.types.values().cloned().collect();
        types.sort_by_key(|data_type| data_type.id);
        (records, types)
    }

    /// 由持久化记录重建工作区，并校验全部结构不变量。
    ///
    /// 子节点列表按记录顺序由父链接重建。
    pub fn from_records(records: Vec<EntityRecord>, types: Vec<DataType>) -> ModelResult<Self> {
        let mut root = None;
        let mut groups = HashMap::new();
        let mut objects = HashMap::new();
        let mut data = HashMap::new();
        let mut order = Vec::with_capacity(records.len());
        let mut seen = HashSet::with_capacity(records.len());

        for record in records {
            let id = record.id();
            if !seen.insert(id) {
                return Err(ModelError::InvalidValue(format!("duplicate entity {id}")));
            }
            order.push(id);
            match record {
                EntityRecord::Group(mut group) => {
                    if group.kind == GroupKind::Root || group.parent.is_none() {
                        if group.kind != GroupKind::Root || group.parent.is_some() || root.is_some() {
                            return Err(ModelError::InvalidValue(
                                "workspace must hold exactly one parentless root group".to_string(),
                            ));
                        }
                        root = Some(id);
                    }
                    group.children.clear();
                    groups.insert(id, group);
                }
                EntityRecord::Object(mut object) => {
                    object.children.clear();
                    objects.insert(id, object);
                }
                EntityRecord::Data(record) => {
                    data.insert(id, record);
                }
            }
        }
        let root = root.ok_or_else(|| ModelError::InvalidValue("missing root group".to_string()))?;
        let types: HashMap<EntityId, DataType> =
            types.into_iter().map(|data_type| (data_type.id, data_type)).collect();

        for id in &order {
            if let Some(group) = groups.get(id) {
                if let Some(parent) = group.parent {
                    let parent_group = groups.get_mut(&parent).ok_or(ModelError::InvalidParent {
                        entity: *id,
                        parent,
                    })?;
                    parent_group.children.push(*id);
                }
            } else if let Some(object) = objects.get(id) {
                let parent = object.parent;
                let parent_group = groups.get_mut(&parent).ok_or(ModelError::InvalidParent {
                    entity: *id,
                    parent,
                })?;
                parent_group.children.push(*id);
            } else if let Some(record) = data.get(id) {
                let parent = record.parent;
                let owner = objects.get_mut(&parent).ok_or(ModelError::InvalidParent {
                    entity: *id,
                    parent,
                })?;
                owner.children.push(*id);
            }
        }

        for group in groups.values() {
            let mut cursor = group.parent;
            let mut steps = 0;
            while let Some(parent) = cursor {
                steps += 1;
                if steps > groups.len() {
                    return Err(ModelError::CyclicParent {
                        entity: group.id,
                        parent,
                    });
                }
                cursor = groups.get(&parent).and_then(|group| group.parent);
            }
        }

        let workspace = Self {
            root,
            groups,
            objects,
            data,
            types,
            modified: false,
        };
        workspace.validate()?;
        Ok(workspace)
    }

    fn validate(&self) -> ModelResult<()> {
        for object in self.objects.values() {
            object.cells().validate(object.n_vertices())?;
            if let Some(hole) = object.drillhole() {
                hole.validate()?;
            }
            if let Some(ab_id) = object.ab_cell_id {
                let data = self
                    .data
                    .get(&ab_id)
                    .filter(|data| data.parent == object.id)
                    .ok_or_else(|| {
                        ModelError::EntityNotFound(format!("ab_cell_id {ab_id} on `{}`", object.name))
                    })?;
                if data.association != Association::Cell {
                    return Err(ModelError::AssociationMismatch {
                        name: data.name.clone(),
                        expected: Association::Cell.to_string(),
                        found: data.association.to_string(),
                    });
                }
                if data.values.as_referenced().is_none() {
                    return Err(ModelError::TypeMismatch {
                        type_id: data.type_id,
                        expected: PrimitiveType::Referenced.to_string(),
                        found: data.values.primitive().to_string(),
                    });
                }
            }
            if let Some(link) = object.metadata {
                let partner = link.partner_of(object.id).ok_or(ModelError::DanglingLink {
                    object: object.id,
                    partner: link.current_electrodes,
                })?;
                if self.objects.get(&partner).and_then(|p| p.metadata) != Some(link) {
                    return Err(ModelError::DanglingLink {
                        object: object.id,
                        partner,
                    });
                }
            }
            for group in &object.property_groups {
                for member in &group.properties {
                    let data = self
                        .data
                        .get(member)
                        .filter(|data| data.parent == object.id)
                        .ok_or_else(|| ModelError::EntityNotFound(format!("property {member}")))?;
                    if data.association != group.association {
                        return Err(ModelError::AssociationMismatch {
                            name: data.name.clone(),
                            expected: group.association.to_string(),
                            found: data.association.to_string(),
                        });
                    }
                }
            }
        }
        for data in self.data.values() {
            let owner = self.object_ref(data.parent)?;
            let expected = owner.expected_len(data.association);
            if data.values.len() != expected {
                return Err(ModelError::ShapeMismatch {
                    context: format!("{} data `{}`", data.association, data.name),
                    expected,
                    actual: data.values.len(),
                });
            }
            let data_type = self
                .types
                .get(&data.type_id)
                .ok_or_else(|| ModelError::EntityNotFound(format!("data type {}", data.type_id)))?;
            check_values_against_type(data_type, &data.values)?;
        }
        Ok(())
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

/// 已校验、尚未写入的数据与新类型。
struct StagedData {
    types: Vec<DataType>,
    data: Vec<Data>,
}

/// 属性组的关联方式：已有组取组的设置，新组取第一个成员的；成员必须一致。
fn group_association(
    object: &ObjectEntity,
    group_name: &str,
    members: &[(&str, Association)],
) -> ModelResult<Association> {
    let association = match object.property_group(group_name) {
        Some(group) => group.association,
        None => match members.first() {
            Some((_, association)) => *association,
            None => {
                return Err(ModelError::InvalidValue(
                    "property group needs at least one member".to_string(),
                ));
            }
        },
    };
    if let Some((name, found)) = members.iter().find(|(_, found)| *found != association) {
        return Err(ModelError::AssociationMismatch {
            name: name.to_string(),
            expected: association.to_string(),
            found: found.to_string(),
        });
    }
    Ok(association)
}

/// 显式关联方式校验长度；缺省时按顶点数 / 单元数 / 标量推断。
fn resolve_association(
    object: &ObjectEntity,
    explicit: Option<Association>,
    len: usize,
) -> ModelResult<Association> {
    if let Some(association) = explicit {
        let expected = object.expected_len(association);
        if expected != len {
            return Err(ModelError::ShapeMismatch {
                context: format!("{association} data on `{}`", object.name),
                expected,
                actual: len,
            });
        }
        return Ok(association);
    }
    match (len == object.n_vertices(), len == object.n_cells()) {
        (true, true) => Err(ModelError::AmbiguousAssociation { len }),
        (true, false) => Ok(Association::Vertex),
        (false, true) => Ok(Association::Cell),
        (false, false) if len == 1 => Ok(Association::Object),
        (false, false) => Err(ModelError::ShapeMismatch {
            context: format!(
                "data on `{}` ({} vertices, {} cells)",
                object.name,
                object.n_vertices(),
                object.n_cells()
            ),
            expected: object.n_vertices(),
            actual: len,
        }),
    }
}

fn check_values_against_type(data_type: &DataType, values: &DataValues) -> ModelResult<()> {
    if data_type.primitive != values.primitive() {
        return Err(ModelError::TypeMismatch {
            type_id: data_type.id,
            expected: data_type.primitive.to_string(),
            found: values.primitive().to_string(),
        });
    }
    if let (Some(codes), Some(map)) = (values.as_referenced(), data_type.value_map()) {
        if let Some(code) = codes.iter().find(|code| !map.contains(**code)) {
            return Err(ModelError::UnknownReference(*code));
        }
    }
    Ok(())
}
