use crate::domain::ports::ConfigStore;
use crate::utils::error::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn path_of(&self, path: &str) -> PathBuf {
        Path::new(&self.base_path).join(path)
    }
}

impl ConfigStore for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path_of(path)).await?)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.path_of(path);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(full_path, data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());

        storage
            .write_file("generated/.env", b"POSTGRES_PORT=5432\n")
            .await
            .unwrap();

        let written = std::fs::read_to_string(temp_dir.path().join("generated/.env")).unwrap();
        assert_eq!(written, "POSTGRES_PORT=5432\n");

        let read_back = storage.read_file("generated/.env").await.unwrap();
        assert_eq!(read_back, b"POSTGRES_PORT=5432\n");
    }

    #[tokio::test]
    async fn test_read_missing_file_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = LocalStorage::new(temp_dir.path())
            .read_file(".env.ports")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::utils::error::StackError::IoError(ref e) if e.kind() == std::io::ErrorKind::NotFound
        ));
    }
}
