//! Removal of undecodable dataset images

use super::is_image_file;
use crate::error::{PipelineError, Result};
use crate::preprocessing::open_image;
use std::path::{Path, PathBuf};

/// Recursively list image files under `root`, sorted by path
///
/// A missing root yields an empty list.
///
/// # Errors
/// Directory traversal failure below an existing root.
pub fn find_image_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.map_err(|e| PipelineError::Io(e.into()))?;
        if entry.file_type().is_file() && is_image_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Delete every image under `root` that fails to decode, returning how many were removed
///
/// Running it again on a cleaned tree removes nothing.
///
/// # Errors
/// Traversal failure, or an unreadable file that cannot be deleted.
pub fn remove_unreadable(root: &Path) -> Result<usize> {
    let mut removed = 0;

    for path in find_image_files(root)? {
        if let Err(e) = open_image(&path) {
            tracing::debug!("Removing unreadable image {}: {}", path.display(), e);
            std::fs::remove_file(&path)
                .map_err(|err| PipelineError::file_io_error("remove unreadable image", &path, &err))?;
            removed += 1;
        }
    }

    tracing::info!("Removed {} unreadable images from {}", removed, root.display());
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_png;
    use tempfile::TempDir;

    #[test]
    fn test_find_image_files_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("b").join("2.png"), 4, 4);
        write_png(&dir.path().join("a").join("1.png"), 4, 4);
        std::fs::write(dir.path().join("a").join("readme.txt"), "x").unwrap();

        let files = find_image_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a").join("1.png"), dir.path().join("b").join("2.png")]
        );

        assert!(find_image_files(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_remove_unreadable_counts_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let bird = dir.path().join("bird");
        let forest = dir.path().join("forest");

        // M = 3 readable, N = 2 unreadable
        write_png(&bird.join("ok1.png"), 8, 8);
        write_png(&bird.join("ok2.jpg"), 8, 8);
        write_png(&forest.join("ok3.png"), 8, 8);
        std::fs::write(bird.join("broken.jpg"), b"\xff\xd8 truncated").unwrap();
        std::fs::write(forest.join("empty.png"), b"").unwrap();
        std::fs::write(forest.join("notes.txt"), b"ignored").unwrap();

        assert_eq!(remove_unreadable(dir.path()).unwrap(), 2);
        assert_eq!(find_image_files(dir.path()).unwrap().len(), 3);
        assert!(forest.join("notes.txt").exists());

        assert_eq!(remove_unreadable(dir.path()).unwrap(), 0);
        assert_eq!(find_image_files(dir.path()).unwrap().len(), 3);
    }
}
