//! Project file storage: chapter texts, global summary, character state.
//!
//! All writes are whole-file atomic overwrites (write to a temp file in
//! the same directory, then rename) so a concurrent reader never observes
//! a half-written file. Reads of missing files return the empty string;
//! a fresh project starts with empty summary and character state.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Per-project file layout rooted at a project directory.
#[derive(Debug, Clone)]
pub struct ProjectStorage {
    root: PathBuf,
}

impl ProjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chapter_path(&self, chapter: u32) -> PathBuf {
        self.root
            .join("chapters")
            .join(format!("chapter_{chapter}.txt"))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join("global_summary.txt")
    }

    pub fn character_state_path(&self) -> PathBuf {
        self.root.join("character_state.txt")
    }

    /// Directory whose existence signals an initialized vector store.
    pub fn vectorstore_dir(&self) -> PathBuf {
        self.root.join("vectorstore")
    }

    pub async fn read_chapter(&self, chapter: u32) -> Result<String> {
        read_or_empty(&self.chapter_path(chapter)).await
    }

    pub async fn read_summary(&self) -> Result<String> {
        read_or_empty(&self.summary_path()).await
    }

    pub async fn read_character_state(&self) -> Result<String> {
        read_or_empty(&self.character_state_path()).await
    }

    pub async fn write_chapter(&self, chapter: u32, text: &str) -> Result<()> {
        write_atomic(&self.chapter_path(chapter), text).await
    }

    pub async fn write_summary(&self, text: &str) -> Result<()> {
        write_atomic(&self.summary_path(), text).await
    }

    pub async fn write_character_state(&self, text: &str) -> Result<()> {
        write_atomic(&self.character_state_path(), text).await
    }
}

async fn read_or_empty(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Whole-file overwrite via temp file + rename in the same directory.
async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("no parent directory for {}", path.display()))?;
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, content)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ProjectStorage::new(dir.path());
        assert_eq!(storage.read_chapter(3).await.unwrap(), "");
        assert_eq!(storage.read_summary().await.unwrap(), "");
        assert_eq!(storage.read_character_state().await.unwrap(), "");
    }

    #[tokio::test]
    async fn writes_round_trip_and_overwrite_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ProjectStorage::new(dir.path());

        storage.write_chapter(1, "draft one").await.unwrap();
        assert_eq!(storage.read_chapter(1).await.unwrap(), "draft one");

        storage.write_chapter(1, "x").await.unwrap();
        assert_eq!(storage.read_chapter(1).await.unwrap(), "x");

        storage.write_summary("the story so far").await.unwrap();
        assert_eq!(
            storage.read_summary().await.unwrap(),
            "the story so far"
        );
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ProjectStorage::new(dir.path());
        storage.write_summary("content").await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
