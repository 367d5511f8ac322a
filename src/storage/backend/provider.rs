use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    DirectBackend, FileId, IsamEngine, OpenRequest, SearchFlags, SearchMode, StatItems,
    StorageBackend, TableStat,
};
use crate::error::{DbError, EngineStatus, Result};
use crate::schema::TableSpec;
use crate::types::RowId;

/// On-disk dictionary layout: a list of `[[tables]]`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dictionary {
    /// Table descriptions.
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

/// Structured provider backed by a schema dictionary.
///
/// Table names resolve to a spec and a physical file under the data path;
/// record traffic goes through a private [`DirectBackend`] over the same
/// engine type, so outcomes match the direct path call for call.
pub struct DictProvider {
    data_path: PathBuf,
    dict: RwLock<HashMap<String, TableSpec>>,
    direct: DirectBackend,
}

impl DictProvider {
    /// Creates a provider with an empty dictionary.
    pub fn new(engine: Arc<IsamEngine>, data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            dict: RwLock::new(HashMap::new()),
            direct: DirectBackend::new(engine),
        }
    }

    /// Directory physical files are placed under.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Adds (or replaces) a table, creating its file when missing. Returns
    /// the physical file name.
    pub fn register(&self, mut spec: TableSpec) -> Result<String> {
        spec.build()?;
        let leaf = spec
            .file_name
            .clone()
            .unwrap_or_else(|| format!("{}.btr", spec.name.to_lowercase()));
        let path = self.data_path.join(leaf).display().to_string();
        if !self.direct.engine().btr_exists(&path) {
            self.direct.create_file(&path, &spec)?;
        }
        spec.file_name = Some(path.clone());
        debug!(table = %spec.name, path = %path, "dict.register");
        self.dict.write().insert(spec.name.clone(), spec);
        Ok(path)
    }

    /// Registers every table of a TOML dictionary.
    pub fn load_dictionary(&self, text: &str) -> Result<usize> {
        let dict: Dictionary =
            toml::from_str(text).map_err(|err| DbError::Config(err.to_string()))?;
        let count = dict.tables.len();
        for spec in dict.tables {
            self.register(spec)?;
        }
        info!(tables = count, "dict.load");
        Ok(count)
    }

    /// Reads and registers a TOML dictionary file.
    pub fn load_dictionary_file(&self, path: &Path) -> Result<usize> {
        let text = fs::read_to_string(path)?;
        self.load_dictionary(&text)
    }

    /// Registered table names, sorted.
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dict.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl StorageBackend for DictProvider {
    fn kind(&self) -> &'static str {
        "dictionary"
    }

    fn load_table_spec(&self, table: &str, file: Option<&str>) -> Result<TableSpec> {
        let mut spec = self
            .dict
            .read()
            .get(table)
            .cloned()
            .ok_or(DbError::engine(EngineStatus::FILE_NOT_FOUND, "load_table_spec"))?;
        if let Some(file) = file {
            spec.file_name = Some(file.to_string());
        }
        Ok(spec)
    }

    fn create_temp_file(&self, name_hint: &str, spec: &TableSpec) -> Result<String> {
        let path = self
            .data_path
            .join(format!("~{name_hint}{}.tmp", self.direct.next_temp_seq()))
            .display()
            .to_string();
        self.direct.engine().btr_create(&path, spec, true)?;
        debug!(path = %path, "dict.temp.create");
        Ok(path)
    }

    fn remove_file(&self, file_name: &str) -> Result<()> {
        self.direct.remove_file(file_name)
    }

    fn open(&self, req: &OpenRequest<'_>) -> Result<FileId> {
        self.direct.open(req)
    }

    fn close(&self, file: FileId) -> Result<()> {
        self.direct.close(file)
    }

    fn insert_rec(&self, file: FileId, rec: &mut [u8]) -> Result<RowId> {
        self.direct.insert_rec(file, rec)
    }

    fn update_rec(&self, file: FileId, rec: &[u8], keep_currency: bool) -> Result<()> {
        self.direct.update_rec(file, rec, keep_currency)
    }

    fn delete_rec(&self, file: FileId) -> Result<()> {
        self.direct.delete_rec(file)
    }

    fn search(
        &self,
        file: FileId,
        idx: usize,
        key: &mut [u8],
        mode: SearchMode,
        flags: SearchFlags,
        rec: &mut [u8],
    ) -> Result<RowId> {
        self.direct.search(file, idx, key, mode, flags, rec)
    }

    fn get_direct(
        &self,
        file: FileId,
        idx: usize,
        pos: RowId,
        key: &mut [u8],
        flags: SearchFlags,
        rec: &mut [u8],
    ) -> Result<()> {
        self.direct.get_direct(file, idx, pos, key, flags, rec)
    }

    fn get_position(&self, file: FileId) -> Result<RowId> {
        self.direct.get_position(file)
    }

    fn delete_from(
        &self,
        file: FileId,
        use_tx: bool,
        predicate: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<usize> {
        self.direct.delete_from(file, use_tx, predicate)
    }

    fn file_stat(&self, file: FileId, items: StatItems) -> Result<TableStat> {
        self.direct.file_stat(file, items)
    }

    fn unlock(&self, file: FileId) -> Result<()> {
        self.direct.unlock(file)
    }

    fn begin_transaction(&self) -> Result<()> {
        self.direct.begin_transaction()
    }

    fn commit_transaction(&self) -> Result<()> {
        self.direct.commit_transaction()
    }

    fn abort_transaction(&self) -> Result<()> {
        self.direct.abort_transaction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;

    const DICT: &str = r#"
[[tables]]
name = "Goods"
[[tables.fields]]
name = "id"
kind = "int"
size = 4
[[tables.indexes]]
segments = ["id"]

[[tables]]
name = "memo"
file_name = "memo.dat"
[[tables.fields]]
name = "text"
kind = "clob"
size = 32
"#;

    #[test]
    fn dictionary_resolves_file_names() {
        let provider = DictProvider::new(Arc::new(IsamEngine::new()), "/data");
        assert_eq!(provider.load_dictionary(DICT).unwrap(), 2);
        assert_eq!(provider.tables(), vec!["Goods".to_string(), "memo".to_string()]);
        let goods = provider.load_table_spec("Goods", None).unwrap();
        assert_eq!(goods.file_name.as_deref(), Some("/data/goods.btr"));
        let memo = provider.load_table_spec("memo", None).unwrap();
        assert_eq!(memo.fields[0].kind, FieldKind::Clob);
        let raw = provider.load_table_spec("memo", Some("other.dat")).unwrap();
        assert_eq!(raw.file_name.as_deref(), Some("other.dat"));
    }

    #[test]
    fn unknown_table_reports_file_not_found() {
        let provider = DictProvider::new(Arc::new(IsamEngine::new()), "/data");
        let err = provider.load_table_spec("nope", None).unwrap_err();
        assert_eq!(err.status(), Some(EngineStatus::FILE_NOT_FOUND));
    }

    #[test]
    fn temp_files_are_distinct_and_flagged() {
        let provider = DictProvider::new(Arc::new(IsamEngine::new()), "/data");
        let spec = TableSpec::new("t").field("v", FieldKind::Int, 4);
        let a = provider.create_temp_file("t", &spec).unwrap();
        let b = provider.create_temp_file("t", &spec).unwrap();
        assert_ne!(a, b);
        let file = provider
            .open(&OpenRequest {
                table_name: "t",
                file_name: &a,
                mode: Default::default(),
                guard: &[],
            })
            .unwrap();
        let stat = provider.file_stat(file, StatItems::FLAGS).unwrap();
        assert_eq!(stat.flags & crate::storage::backend::FILE_FLAG_TEMPORARY, 1);
    }
}
