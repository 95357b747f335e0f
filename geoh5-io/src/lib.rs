use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use geoh5_core::errors::ModelError;
use geoh5_core::id::EntityId;
use geoh5_core::types::DataType;
use geoh5_core::workspace::{EntityRecord, Workspace};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

pub const MAGIC: &str = "GEOH5RS";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid workspace file: {0}")]
    InvalidFormat(String),
    #[error("checksum mismatch in {path:?}: header {expected}, body {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid workspace structure: {0}")]
    InvalidWorkspace(#[from] ModelError),
}

pub trait WorkspaceLoader {
    fn load(&self, path: &Path) -> Result<Workspace, IoError>;
}

pub trait WorkspaceSaver {
    fn save(&self, workspace: &Workspace, path: &Path) -> Result<(), IoError>;
}

/// 文件正文：实体按遍历顺序排列，类型按 ID 排序。
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreBody {
    entities: Vec<EntityRecord>,
    #[serde(default)]
    types: Vec<DataType>,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub verify_checksum: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            verify_checksum: true,
        }
    }
}

/// 单文件实体仓库。
///
/// 修改只作用于内存，`flush` 时整体写入同目录下的临时文件再重命名覆盖目标。
#[derive(Debug)]
pub struct Geoh5Store {
    path: PathBuf,
    entities: Vec<EntityRecord>,
    index: HashMap<EntityId, usize>,
    types: BTreeMap<EntityId, DataType>,
    dirty: bool,
}

impl Geoh5Store {
    /// 打开已有文件（校验摘要），文件不存在时得到空仓库。
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        Self::open_with(path, StoreOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            debug!(?path, "工作区文件不存在，创建空仓库");
            return Ok(Self::create(path));
        }

        let text = fs::read_to_string(&path).map_err(|source| IoError::ReadError {
            path: path.clone(),
            source,
        })?;
        let body = decode(&path, &text, options.verify_checksum)?;
        let index = body
            .entities
            .iter()
            .enumerate()
            .map(|(position, record)| (record.id(), position))
            .collect();
        let types = body
            .types
            .into_iter()
            .map(|data_type| (data_type.id, data_type))
            .collect();
        info!(?path, entities = body.entities.len(), "打开工作区文件");
        Ok(Self {
            path,
            entities: body.entities,
            index,
            types,
            dirty: false,
        })
    }

    /// 不读取磁盘，直接得到指向 `path` 的空仓库。
    pub fn create(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entities: Vec::new(),
            index: HashMap::new(),
            types: BTreeMap::new(),
            dirty: false,
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn read_entity(&self, id: EntityId) -> Option<&EntityRecord> {
        self.index.get(&id).and_then(|position| self.entities.get(*position))
    }

    pub fn read_type(&self, id: EntityId) -> Option<&DataType> {
        self.types.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.iter()
    }

    /// 写入或替换实体记录，新记录追加在末尾。
    pub fn write_entity(&mut self, record: EntityRecord) {
        let id = record.id();
        match self.index.get(&id) {
            Some(position) => self.entities[*position] = record,
            None => {
                self.index.insert(id, self.entities.len());
                self.entities.push(record);
            }
        }
        self.dirty = true;
    }

    pub fn write_type(&mut self, data_type: DataType) {
        self.types.insert(data_type.id, data_type);
        self.dirty = true;
    }

    /// 用工作区的当前状态整体替换仓库内容，已删除的实体随之消失。
    pub fn replace_with(&mut self, workspace: &Workspace) {
        let (records, types) = workspace.records();
        self.entities.clear();
        self.index.clear();
        self.types.clear();
        for record in records {
            self.write_entity(record);
        }
        for data_type in types {
            self.write_type(data_type);
        }
        self.dirty = true;
    }

    /// 由仓库内容重建工作区；空仓库得到只有根组的新工作区。
    pub fn to_workspace(&self) -> Result<Workspace, IoError> {
        if self.entities.is_empty() {
            return Ok(Workspace::new());
        }
        let workspace = Workspace::from_records(
            self.entities.clone(),
            self.types.values().cloned().collect(),
        )?;
        Ok(workspace)
    }

    pub fn flush(&mut self) -> Result<(), IoError> {
        let body = StoreBody {
            entities: self.entities.clone(),
            types: self.types.values().cloned().collect(),
        };
        let text = encode(&body)?;

        let tmp = temp_path(&self.path);
        fs::write(&tmp, text.as_bytes()).map_err(|source| IoError::WriteError {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| IoError::WriteError {
            path: self.path.clone(),
            source,
        })?;
        self.dirty = false;
        info!(path = ?self.path, entities = self.entities.len(), bytes = text.len(), "写出工作区文件");
        Ok(())
    }
}

/// 以 JSON 正文读写工作区的门面。
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFacade {
    options: StoreOptions,
}

impl JsonFacade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: StoreOptions) -> Self {
        Self { options }
    }
}

impl WorkspaceLoader for JsonFacade {
    fn load(&self, path: &Path) -> Result<Workspace, IoError> {
        if !path.exists() {
            return Err(IoError::ReadError {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such workspace"),
            });
        }
        Geoh5Store::open_with(path, self.options)?.to_workspace()
    }
}

impl WorkspaceSaver for JsonFacade {
    fn save(&self, workspace: &Workspace, path: &Path) -> Result<(), IoError> {
        let mut store = Geoh5Store::create(path);
        store.replace_with(workspace);
        store.flush()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn digest(body: &str) -> String {
    let hash: [u8; 32] = Sha256::digest(body.as_bytes()).into();
    hash.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn encode(body: &StoreBody) -> Result<String, IoError> {
    let json = serde_json::to_string_pretty(body)?;
    Ok(format!(
        "{MAGIC} {FORMAT_VERSION}\nsha256:{}\n{json}",
        digest(&json)
    ))
}

fn decode(path: &Path, text: &str, verify_checksum: bool) -> Result<StoreBody, IoError> {
    let (magic_line, rest) = text
        .split_once('\n')
        .ok_or_else(|| IoError::InvalidFormat("missing header".to_string()))?;
    let (checksum_line, json) = rest
        .split_once('\n')
        .ok_or_else(|| IoError::InvalidFormat("missing checksum line".to_string()))?;

    let version = magic_line
        .strip_prefix(MAGIC)
        .map(str::trim)
        .ok_or_else(|| IoError::InvalidFormat(format!("unexpected magic `{magic_line}`")))?;
    match version.parse::<u32>() {
        Ok(FORMAT_VERSION) => {}
        _ => {
            return Err(IoError::InvalidFormat(format!(
                "unsupported format version `{version}`"
            )));
        }
    }

    let expected = checksum_line
        .strip_prefix("sha256:")
        .ok_or_else(|| IoError::InvalidFormat("checksum line must start with sha256:".to_string()))?;
    if verify_checksum {
        let actual = digest(json);
        if actual != expected {
            return Err(IoError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: expected.to_string(),
                actual,
            });
        }
    }
    Ok(serde_json::from_str(json)?)
}
