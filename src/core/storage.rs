use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// Read a JSON document; a missing or unparsable file reads as `None`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring unparsable {}: {}", path.display(), e);
            None
        }
    }
}

/// Write a JSON document through a temp file and rename, creating parents.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip_and_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state.json");

        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1u32);
        save_json(&path, &value).unwrap();
        let loaded: Option<BTreeMap<String, u32>> = load_json(&path);
        assert_eq!(loaded, Some(value));

        std::fs::write(&path, "{not json").unwrap();
        let corrupt: Option<BTreeMap<String, u32>> = load_json(&path);
        assert!(corrupt.is_none());
        assert!(load_json::<BTreeMap<String, u32>>(&dir.path().join("missing.json")).is_none());
    }
}
