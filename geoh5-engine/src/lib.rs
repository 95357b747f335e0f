pub mod command;

pub mod errors {
    use geoh5_core::errors::ModelError;
    use geoh5_io::IoError;
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error(transparent)]
        Model(#[from] ModelError),
        #[error(transparent)]
        Io(#[from] IoError),
    }
}

pub mod session {
    use std::fmt::Write as _;
    use std::path::{Path, PathBuf};

    use geoh5_core::data::{DataSpec, DataValues};
    use geoh5_core::drillhole::{MergeOptions, MergeReport, Survey};
    use geoh5_core::geometry::Point3;
    use geoh5_core::id::EntityId;
    use geoh5_core::object::ObjectSpec;
    use geoh5_core::workspace::{EntityRef, Workspace};
    use geoh5_io::{JsonFacade, StoreOptions, WorkspaceLoader, WorkspaceSaver};
    use tracing::{debug, info};

    use crate::errors::EngineError;

    #[derive(Debug, Clone, Copy, Default)]
    pub struct SessionOptions {
        pub merge: MergeOptions,
        pub store: StoreOptions,
    }

    /// 一个打开的工作区：内存中的实体图、目标文件以及合并参数。
    ///
    /// 修改只在调用 `finalize` 时落盘。
    #[derive(Debug)]
    pub struct Session {
        workspace: Workspace,
        path: PathBuf,
        options: SessionOptions,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct DemoEntities {
        pub container: EntityId,
        pub surface: EntityId,
        pub curve: EntityId,
        pub currents: EntityId,
        pub potentials: EntityId,
        pub drillhole: EntityId,
    }

    impl Session {
        /// 打开已有工作区文件；文件不存在时从空工作区开始。
        pub fn open(path: impl AsRef<Path>, options: SessionOptions) -> Result<Self, EngineError> {
            let path = path.as_ref().to_path_buf();
            let workspace = if path.exists() {
                JsonFacade::with_options(options.store).load(&path)?
            } else {
                debug!(?path, "新建工作区");
                Workspace::new()
            };
            Ok(Self {
                workspace,
                path,
                options,
            })
        }

        #[inline]
        pub fn workspace(&self) -> &Workspace {
            &self.workspace
        }

        #[inline]
        pub fn workspace_mut(&mut self) -> &mut Workspace {
            &mut self.workspace
        }

        #[inline]
        pub fn path(&self) -> &Path {
            &self.path
        }

        #[inline]
        pub fn merge_options(&self) -> MergeOptions {
            self.options.merge
        }

        /// 按会话的合并容差写入点测井。
        pub fn add_point_log(
            &mut self,
            drillhole: EntityId,
            column: &str,
            samples: &[(f64, f64)],
        ) -> Result<MergeReport, EngineError> {
            let options = self.options.merge;
            Ok(self
                .workspace
                .add_point_log(drillhole, column, samples, &options)?)
        }

        pub fn add_interval_log(
            &mut self,
            drillhole: EntityId,
            column: &str,
            rows: &[(f64, f64, f64)],
        ) -> Result<MergeReport, EngineError> {
            let options = self.options.merge;
            Ok(self
                .workspace
                .add_interval_log(drillhole, column, rows, &options)?)
        }

        /// 将工作区写回目标文件。写入失败会原样返回。
        pub fn finalize(&mut self) -> Result<(), EngineError> {
            JsonFacade::with_options(self.options.store).save(&self.workspace, &self.path)?;
            self.workspace.mark_saved();
            info!(path = ?self.path, "工作区已保存");
            Ok(())
        }

        /// 以缩进树形式列出全部实体。
        pub fn summary(&self) -> String {
            let ws = &self.workspace;
            let mut out = String::new();
            let _ = writeln!(
                out,
                "groups: {}, objects: {}, data: {}, types: {}",
                ws.groups().count(),
                ws.objects().count(),
                ws.all_data().count(),
                ws.data_types().count()
            );
            let mut stack = vec![(ws.root(), 0usize)];
            while let Some((id, depth)) = stack.pop() {
                let Some(entity) = ws.entity(id) else {
                    continue;
                };
                let detail = match entity {
                    EntityRef::Group(group) => format!("{} children", group.children.len()),
                    EntityRef::Object(object) => format!(
                        "{} vertices, {} cells",
                        object.n_vertices(),
                        object.n_cells()
                    ),
                    EntityRef::Data(data) => {
                        format!("{} x{}", data.association, data.values.len())
                    }
                };
                let _ = writeln!(
                    out,
                    "{:indent$}{} `{}` [{}] ({})",
                    "",
                    entity.kind_name(),
                    entity.name(),
                    id,
                    detail,
                    indent = depth * 2
                );
                stack.extend(ws.children(id).iter().rev().map(|child| (*child, depth + 1)));
            }
            out
        }

        /// 填充一组示例实体：容器组、带单元数据的曲面、带属性组的曲线、
        /// 已链接的电极对以及带测井的钻孔。
        pub fn populate_demo(&mut self) -> Result<DemoEntities, EngineError> {
            let options = self.options.merge;
            let ws = &mut self.workspace;
            let container = ws.create_group("Tutorial", None)?;

            let vertices: Vec<Point3> = (0..3i32)
                .flat_map(|j| {
                    (0..3i32).map(move |i| {
                        Point3::new(f64::from(i) * 10.0, f64::from(j) * 10.0, f64::from(i + j))
                    })
                })
                .collect();
            let mut triangles = Vec::new();
            for j in 0..2u32 {
                for i in 0..2u32 {
                    let a = j * 3 + i;
                    triangles.push([a, a + 1, a + 4]);
                    triangles.push([a, a + 4, a + 3]);
                }
            }
            let surface = ws.create_object(
                ObjectSpec::surface("Topography", vertices, &triangles).with_parent(container),
            )?;
            ws.add_data(
                surface,
                vec![
                    DataSpec::new(
                        "elevation",
                        DataValues::Float((0..9i32).map(|k| f64::from(k / 3 + k % 3)).collect()),
                    ),
                    DataSpec::new("facet_id", DataValues::Integer((0..8).collect())),
                ],
            )?;

            let line: Vec<Point3> = (0..6i32)
                .map(|i| Point3::new(f64::from(i) * 25.0, 5.0, 0.0))
                .collect();
            let curve = ws.create_object(
                ObjectSpec::curve("Flight lines", line)
                    .with_parts(vec![0, 0, 0, 1, 1, 1])
                    .with_parent(container),
            )?;
            ws.add_data_in_group(
                curve,
                vec![
                    DataSpec::new("Period1", DataValues::Float(vec![1.0, 1.5, 2.0, 2.5, 3.0, 3.5])),
                    DataSpec::new("Period2", DataValues::Float(vec![0.5, 0.75, 1.0, 1.25, 1.5, 1.75])),
                ],
                "Periods",
            )?;

            let currents = ws.create_object(
                ObjectSpec::current_electrodes(
                    "Currents",
                    (0..4i32).map(|i| Point3::new(f64::from(i) * 20.0, 0.0, 0.0)).collect(),
                )
                .with_parts(vec![0, 0, 1, 1])
                .with_parent(container),
            )?;
            let potentials = ws.create_object(
                ObjectSpec::potential_electrodes(
                    "Potentials",
                    (0..6i32).map(|i| Point3::new(f64::from(i) * 10.0, 10.0, 0.0)).collect(),
                )
                .with_parts(vec![0, 0, 1, 1, 2, 2])
                .with_parent(container),
            )?;
            ws.link(currents, potentials)?;
            ws.assign_source_ids(currents, None)?;
            ws.assign_ids(potentials, &[1, 1, 2])?;

            let drillhole = ws.create_object(
                ObjectSpec::drillhole("DH-01", Point3::new(50.0, 50.0, 10.0)).with_parent(container),
            )?;
            ws.add_surveys(
                drillhole,
                &[Survey::new(0.0, 0.0, -90.0), Survey::new(50.0, 10.0, -85.0)],
            )?;
            ws.add_point_log(drillhole, "au_ppm", &[(5.0, 0.12), (15.0, 1.8), (42.5, 0.4)], &options)?;
            ws.add_interval_log(
                drillhole,
                "lithology",
                &[(0.0, 12.0, 1.0), (12.0, 30.5, 2.0), (30.5, 60.0, 3.0)],
                &options,
            )?;

            let ids = DemoEntities {
                container,
                surface,
                curve,
                currents,
                potentials,
                drillhole,
            };
            debug!(
                surface = %ids.surface,
                curve = %ids.curve,
                drillhole = %ids.drillhole,
                "已创建演示实体"
            );
            Ok(ids)
        }
    }

    #[cfg(test)]
    mod tests {
        use geoh5_core::electrode::AB_CELL_ID;
        use geoh5_io::IoError;

        use super::*;

        #[test]
        fn demo_population_creates_entities() {
            let dir = tempfile::tempdir().unwrap();
            let mut session =
                Session::open(dir.path().join("demo.geoh5rs"), SessionOptions::default()).unwrap();
            let ids = session.populate_demo().expect("populate demo");
            let ws = session.workspace();
            assert_eq!(ws.objects().count(), 5);
            assert_eq!(ws.object(ids.surface).unwrap().n_cells(), 8);
            assert_eq!(ws.children(ids.container).len(), 5);
            assert_eq!(ws.linked_partner(ids.potentials), Some(ids.currents));
            assert!(ws.data_by_name(ids.potentials, AB_CELL_ID).is_some());
            let hole = ws.object(ids.drillhole).unwrap().drillhole().unwrap();
            assert_eq!(hole.end_of_hole(), 60.0);
        }

        #[test]
        fn finalize_then_reopen_restores_workspace() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("demo.geoh5rs");
            let mut session = Session::open(&path, SessionOptions::default()).unwrap();
            let ids = session.populate_demo().unwrap();
            assert!(session.workspace().is_modified());
            session.finalize().expect("finalize");
            assert!(!session.workspace().is_modified());

            let reopened = Session::open(&path, SessionOptions::default()).unwrap();
            assert_eq!(reopened.workspace().walk(), session.workspace().walk());
            assert_eq!(
                reopened.workspace().object(ids.curve),
                session.workspace().object(ids.curve)
            );
            let summary = reopened.summary();
            assert!(summary.starts_with("groups: 2, objects: 5"));
            assert!(summary.contains("drillhole `DH-01`"));
        }

        #[test]
        fn finalize_reports_write_failures() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("missing").join("demo.geoh5rs");
            let mut session = Session::open(&path, SessionOptions::default()).unwrap();
            let err = session.finalize().unwrap_err();
            assert!(matches!(err, EngineError::Io(IoError::WriteError { .. })));
        }

        #[test]
        fn session_merge_options_apply_to_logs() {
            let dir = tempfile::tempdir().unwrap();
            let options = SessionOptions {
                merge: MergeOptions {
                    collocation_distance: 0.5,
                    ..MergeOptions::default()
                },
                ..SessionOptions::default()
            };
            let mut session = Session::open(dir.path().join("dh.geoh5rs"), options).unwrap();
            let hole = session
                .workspace_mut()
                .create_object(ObjectSpec::drillhole("DH", Point3::new(0.0, 0.0, 0.0)))
                .unwrap();
            session
                .add_point_log(hole, "a", &[(10.0, 1.0)])
                .unwrap();
            let report = session.add_point_log(hole, "b", &[(10.4, 2.0)]).unwrap();
            assert_eq!(report.merged, 1);
            assert_eq!(report.inserted, 0);
        }
    }
}
