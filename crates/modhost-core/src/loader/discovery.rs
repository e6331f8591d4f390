//! Module artifact discovery: `<root>/<id>/<id>.toml`.

use std::path::{Path, PathBuf};

use tracing::debug;

use modhost_protocols::{ModuleError, ModuleManifest};

/// A module directory found under the modules root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModule {
    pub id: String,
    pub dir: PathBuf,
}

impl DiscoveredModule {
    pub fn manifest_path(&self) -> PathBuf {
        manifest_path(&self.dir, &self.id)
    }
}

pub fn manifest_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.toml", id))
}

/// Enumerate module directories, sorted by id. Hidden directories are skipped.
/// A missing root yields nothing.
pub async fn scan(root: &Path) -> Result<Vec<DiscoveredModule>, ModuleError> {
    if !tokio::fs::try_exists(root).await.unwrap_or(false) {
        debug!("Modules root {} does not exist", root.display());
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let Some(id) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if id.starts_with('.') {
            continue;
        }
        found.push(DiscoveredModule {
            id,
            dir: entry.path(),
        });
    }

    found.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(found)
}

/// Read and check a module manifest.
pub async fn read_manifest(dir: &Path, id: &str) -> Result<ModuleManifest, ModuleError> {
    let path = manifest_path(dir, id);
    let invalid = |reason: String| ModuleError::InvalidManifest {
        path: path.display().to_string(),
        reason,
    };

    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    let manifest: ModuleManifest = toml::from_str(&raw).map_err(|e| invalid(e.to_string()))?;

    if manifest.id != id {
        return Err(invalid(format!(
            "manifest id '{}' does not match directory '{}'",
            manifest.id, id
        )));
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_module(root: &Path, id: &str, body: &str) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{}.toml", id)), body).unwrap();
    }

    #[tokio::test]
    async fn test_scan_sorted_and_skips_hidden() {
        let tmp = tempfile::tempdir().unwrap();
        write_module(tmp.path(), "zeta", "id = \"zeta\"");
        write_module(tmp.path(), "alpha", "id = \"alpha\"");
        std::fs::create_dir_all(tmp.path().join(".cache")).unwrap();
        std::fs::write(tmp.path().join("README.md"), "not a module").unwrap();

        let found = scan(tmp.path()).await.unwrap();
        let ids: Vec<_> = found.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert!(found[0].manifest_path().ends_with("alpha/alpha.toml"));
    }

    #[tokio::test]
    async fn test_scan_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(scan(&tmp.path().join("nope")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        write_module(tmp.path(), "echo", "id = \"echo\"\nname = \"Echo\"\nversion = \"1.2.0\"");

        let manifest = read_manifest(&tmp.path().join("echo"), "echo").await.unwrap();
        assert_eq!(manifest.name, "Echo");
        assert_eq!(manifest.version.to_string(), "1.2.0");
    }

    #[tokio::test]
    async fn test_read_manifest_errors() {
        let tmp = tempfile::tempdir().unwrap();
        write_module(tmp.path(), "wrong", "id = \"other\"");
        write_module(tmp.path(), "broken", "id = ");
        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();

        for id in ["wrong", "broken", "empty"] {
            let err = read_manifest(&tmp.path().join(id), id).await.unwrap_err();
            assert!(matches!(err, ModuleError::InvalidManifest { .. }), "{}", id);
        }
    }
}
