//! Transformer definition files as store items.

use std::path::{Path, PathBuf};

use super::{parse_definition, AdvancedTransformer, TransformerDefinition};
use crate::error::{StoreError, StoreResult};
use crate::store::StoreItem;

/// A definition file, kept with its compiled form.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformerFile {
    path: PathBuf,
    definition: TransformerDefinition,
    transformer: AdvancedTransformer,
}

impl TransformerFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn definition(&self) -> &TransformerDefinition {
        &self.definition
    }

    pub fn transformer(&self) -> &AdvancedTransformer {
        &self.transformer
    }
}

impl StoreItem for TransformerFile {
    /// Files are identified by path; name clashes are checked when ordering.
    fn hash(&self) -> String {
        self.path.display().to_string()
    }

    fn deserialize(path: &Path, bytes: &[u8]) -> StoreResult<Self> {
        let invalid = |message: String| StoreError::Invalid { path: path.display().to_string(), message };

        let text = std::str::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
        let definition = parse_definition(text).map_err(|e| invalid(e.to_string()))?;
        let transformer = definition.compile().map_err(|e| invalid(e.to_string()))?;

        Ok(Self { path: path.to_path_buf(), definition, transformer })
    }

    fn serialize(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.definition)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileBackedStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_reports_invalid_files() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        std::fs::write(&good, r#"{"type":"advanced","name":"a","properties":[]}"#).unwrap();
        std::fs::write(&bad, r#"{"type":"advanced","properties":[]}"#).unwrap();

        let mut store: FileBackedStore<TransformerFile> = FileBackedStore::new();
        let failures = store.load(vec![good.clone(), bad.clone()]).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.iter().next().unwrap().transformer().name, "a");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, bad);
        assert!(matches!(failures[0].error, StoreError::Invalid { .. }));
    }
}
