use crate::error::AppError;
use crate::tools::walk::{self, FileEntry, SearchMatch};
use crate::utils::path_utils::absolute_path;
use regex::{NoExpand, RegexBuilder};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// Workspace file operations requested by the UI. Walks run on the blocking pool.
#[derive(Debug, Default)]
pub struct FilesystemManager;

async fn run_blocking<T, F>(f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

impl FilesystemManager {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self))]
    pub async fn read_directory(&self, path: &str) -> Result<Vec<FileEntry>, AppError> {
        let root = absolute_path(path)?;
        let tree = run_blocking(move || walk::read_tree(&root)).await?;
        debug!(entries = tree.len(), "Directory read");
        Ok(tree)
    }

    #[instrument(skip(self))]
    pub async fn list_files_flat(&self, path: &str) -> Result<Vec<String>, AppError> {
        let root = absolute_path(path)?;
        let files = run_blocking(move || walk::list_files_flat(&root)).await?;
        debug!(files = files.len(), "Flat listing built");
        Ok(files)
    }

    #[instrument(skip(self))]
    pub async fn search_in_files(&self, root: &str, query: &str, case_sensitive: bool) -> Result<Vec<SearchMatch>, AppError> {
        let root = absolute_path(root)?;
        let query = query.to_string();
        let matches = run_blocking(move || walk::search(&root, &query, case_sensitive)).await?;
        debug!(matches = matches.len(), "Search finished");
        Ok(matches)
    }

    #[instrument(skip(self))]
    pub async fn read_file(&self, path: &str) -> Result<String, AppError> {
        let path = absolute_path(path)?;
        let bytes = fs::read(&path).await?;
        String::from_utf8(bytes)
            .map_err(|_| AppError::InvalidInputArgument(format!("File is not valid UTF-8 text: {}", path.display())))
    }

    #[instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), AppError> {
        let path = absolute_path(path)?;
        let mut file = fs::File::create(&path).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Creates an empty file with its parents. An existing file is left untouched.
    #[instrument(skip(self))]
    pub async fn create_file(&self, path: &str) -> Result<(), AppError> {
        let path = absolute_path(path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn create_folder(&self, path: &str) -> Result<(), AppError> {
        let path = absolute_path(path)?;
        fs::create_dir_all(&path).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn rename_entry(&self, old_path: &str, new_path: &str) -> Result<(), AppError> {
        let source = absolute_path(old_path)?;
        let destination = absolute_path(new_path)?;
        if fs::symlink_metadata(&destination).await.is_ok() {
            return Err(AppError::AlreadyExists(destination.display().to_string()));
        }
        fs::rename(&source, &destination).await?;
        info!(from = %source.display(), to = %destination.display(), "Entry renamed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_entry(&self, path: &str) -> Result<(), AppError> {
        let path = absolute_path(path)?;
        let meta = fs::symlink_metadata(&path).await?;
        if meta.is_dir() {
            fs::remove_dir_all(&path).await?;
        } else {
            fs::remove_file(&path).await?;
        }
        info!(path = %path.display(), "Entry deleted");
        Ok(())
    }

    /// Replaces every literal occurrence of `search` and returns how many there were.
    #[instrument(skip(self, replace))]
    pub async fn replace_in_file(
        &self,
        path: &str,
        search: &str,
        replace: &str,
        case_sensitive: bool,
    ) -> Result<usize, AppError> {
        if search.is_empty() {
            return Err(AppError::EditError("Search text must not be empty".to_string()));
        }
        let path: PathBuf = absolute_path(path)?;
        let content = self.read_file(&path.to_string_lossy()).await?;

        let pattern = RegexBuilder::new(&regex::escape(search))
            .case_insensitive(!case_sensitive)
            .build()?;
        let count = pattern.find_iter(&content).count();
        if count > 0 {
            let updated = pattern.replace_all(&content, NoExpand(replace));
            fs::write(&path, updated.as_bytes()).await?;
            info!(path = %path.display(), count, "Replacements written");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn p(path: &std::path::Path) -> String {
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let file = p(&dir.path().join("notes.md"));
        let manager = FilesystemManager::new();
        let content = "# Title\r\nünïcödé line\n\ttabbed\n";
        manager.write_file(&file, content).await.unwrap();
        assert_eq!(manager.read_file(&file).await.unwrap(), content);
    }

    #[tokio::test]
    async fn create_file_keeps_existing_content() {
        let dir = tempdir().unwrap();
        let file = p(&dir.path().join("a/b/c.txt"));
        let manager = FilesystemManager::new();
        manager.create_file(&file).await.unwrap();
        manager.write_file(&file, "keep").await.unwrap();
        manager.create_file(&file).await.unwrap();
        assert_eq!(manager.read_file(&file).await.unwrap(), "keep");

        let folder = p(&dir.path().join("x/y"));
        manager.create_folder(&folder).await.unwrap();
        manager.create_folder(&folder).await.unwrap();
    }

    #[tokio::test]
    async fn rename_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let manager = FilesystemManager::new();
        let a = p(&dir.path().join("a.txt"));
        let b = p(&dir.path().join("b.txt"));
        let c = p(&dir.path().join("c.txt"));
        manager.write_file(&a, "a").await.unwrap();
        manager.write_file(&b, "b").await.unwrap();

        assert!(matches!(manager.rename_entry(&a, &b).await, Err(AppError::AlreadyExists(_))));
        manager.rename_entry(&a, &c).await.unwrap();
        assert_eq!(manager.read_file(&c).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn delete_removes_trees() {
        let dir = tempdir().unwrap();
        let manager = FilesystemManager::new();
        let nested = dir.path().join("tree/sub/file.txt");
        manager.create_file(&p(&nested)).await.unwrap();
        manager.delete_entry(&p(&dir.path().join("tree"))).await.unwrap();
        assert!(!dir.path().join("tree").exists());
        assert!(manager.delete_entry(&p(&dir.path().join("tree"))).await.is_err());
    }

    #[tokio::test]
    async fn replace_counts_literal_matches() {
        let dir = tempdir().unwrap();
        let manager = FilesystemManager::new();
        let file = p(&dir.path().join("r.txt"));
        manager.write_file(&file, "a.b A.B a.b axb").await.unwrap();

        assert_eq!(manager.replace_in_file(&file, "a.b", "$1", true).await.unwrap(), 2);
        assert_eq!(manager.read_file(&file).await.unwrap(), "$1 A.B $1 axb");

        assert_eq!(manager.replace_in_file(&file, "a.b", "z", false).await.unwrap(), 1);
        assert_eq!(manager.read_file(&file).await.unwrap(), "$1 z $1 axb");

        assert_eq!(manager.replace_in_file(&file, "nothing", "z", false).await.unwrap(), 0);
        assert!(manager.replace_in_file(&file, "", "z", false).await.is_err());
    }

    #[tokio::test]
    async fn read_directory_fails_for_missing_root() {
        let dir = tempdir().unwrap();
        let manager = FilesystemManager::new();
        assert!(manager.read_directory(&p(&dir.path().join("nope"))).await.is_err());
        assert!(manager.read_directory(&p(dir.path())).await.unwrap().is_empty());
    }
}
