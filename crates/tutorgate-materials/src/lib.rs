use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tutorgate_core::Material;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub materials: Vec<Material>,
}

#[derive(Debug, Error)]
pub enum MaterialStoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Source of the study materials uploaded for a class.
#[async_trait]
pub trait MaterialStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// All materials of the class; an unknown class has none.
    async fn materials_for_class(&self, code: &str) -> Result<Vec<Material>, MaterialStoreError>;
}

pub fn normalize_class_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn index_classes(records: impl IntoIterator<Item = ClassRecord>) -> HashMap<String, ClassRecord> {
    records
        .into_iter()
        .map(|mut record| {
            record.code = normalize_class_code(&record.code);
            (record.code.clone(), record)
        })
        .filter(|(code, _)| !code.is_empty())
        .collect()
}

fn validated(mut record: ClassRecord) -> Result<ClassRecord, MaterialStoreError> {
    record.code = normalize_class_code(&record.code);
    if record.code.is_empty() {
        return Err(MaterialStoreError::InvalidInput(
            "class code is empty".to_string(),
        ));
    }
    Ok(record)
}

#[derive(Debug, Default)]
pub struct InMemoryMaterialStore {
    classes: RwLock<HashMap<String, ClassRecord>>,
}

impl InMemoryMaterialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classes(records: impl IntoIterator<Item = ClassRecord>) -> Self {
        Self {
            classes: RwLock::new(index_classes(records)),
        }
    }

    pub fn put_class(&self, record: ClassRecord) -> Result<(), MaterialStoreError> {
        let record = validated(record)?;
        self.classes.write().insert(record.code.clone(), record);
        Ok(())
    }
}

#[async_trait]
impl MaterialStore for InMemoryMaterialStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn materials_for_class(&self, code: &str) -> Result<Vec<Material>, MaterialStoreError> {
        let code = normalize_class_code(code);
        Ok(self
            .classes
            .read()
            .get(&code)
            .map(|record| record.materials.clone())
            .unwrap_or_default())
    }
}

/// Class records kept as one JSON array on disk, loaded once at open.
pub struct JsonFileMaterialStore {
    path: PathBuf,
    classes: RwLock<HashMap<String, ClassRecord>>,
}

impl JsonFileMaterialStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MaterialStoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        if !path.exists() {
            fs::write(&path, b"[]")?;
        }

        let bytes = fs::read(&path)?;
        let records: Vec<ClassRecord> = serde_json::from_slice(&bytes)?;
        Ok(Self {
            path,
            classes: RwLock::new(index_classes(records)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }

    /// Inserts or replaces a class. The file is rewritten first; the
    /// in-memory index only changes once the new file is in place.
    pub fn put_class(&self, record: ClassRecord) -> Result<(), MaterialStoreError> {
        let record = validated(record)?;
        let mut classes = self.classes.write();

        let bytes = {
            let mut records: Vec<&ClassRecord> = classes
                .values()
                .filter(|existing| existing.code != record.code)
                .chain(std::iter::once(&record))
                .collect();
            records.sort_by(|a, b| a.code.cmp(&b.code));
            serde_json::to_vec_pretty(&records)?
        };
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, bytes)?;
        fs::rename(&staging, &self.path)?;

        classes.insert(record.code.clone(), record);
        Ok(())
    }
}

#[async_trait]
impl MaterialStore for JsonFileMaterialStore {
    fn name(&self) -> &'static str {
        "json-file"
    }

    async fn materials_for_class(&self, code: &str) -> Result<Vec<Material>, MaterialStoreError> {
        let code = normalize_class_code(code);
        Ok(self
            .classes
            .read()
            .get(&code)
            .map(|record| record.materials.clone())
            .unwrap_or_default())
    }
}
