//! Native staging of raw project data.

use super::Stager;
use crate::error::Result;
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Copies every file of the source tree into the destination, keeping the
/// relative layout. Hidden entries are skipped; existing files are
/// overwritten.
#[derive(Debug, Clone, Default)]
pub struct DirectoryStager;

impl DirectoryStager {
    pub fn new() -> Self {
        Self
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

impl Stager for DirectoryStager {
    fn stage(&self, source: &Path, dest: &Path) -> Result<()> {
        info!("Staging {} into {}", source.display(), dest.display());

        let mut copied = 0usize;
        let walker = WalkDir::new(source).into_iter().filter_entry(|e| !is_hidden(e));

        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            let rel_path = entry.path().strip_prefix(source).unwrap_or(entry.path());
            let target = dest.join(rel_path);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else if entry.file_type().is_file() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
                copied += 1;
            }
        }

        debug!("Staged {} files", copied);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stage_copies_tree() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("240101/TrackMate Images")).unwrap();
        fs::write(source.path().join("240101/All Recordings.csv"), "a\n1\n").unwrap();
        fs::write(source.path().join("240101/TrackMate Images/r.jpg"), "img").unwrap();
        fs::write(source.path().join(".DS_Store"), "x").unwrap();

        DirectoryStager::new()
            .stage(source.path(), dest.path())
            .unwrap();

        assert_eq!(
            fs::read_to_string(dest.path().join("240101/All Recordings.csv")).unwrap(),
            "a\n1\n"
        );
        assert!(dest.path().join("240101/TrackMate Images/r.jpg").exists());
        assert!(!dest.path().join(".DS_Store").exists());
    }

    #[test]
    fn test_stage_missing_source_fails() {
        let dest = TempDir::new().unwrap();
        let result = DirectoryStager::new().stage(&dest.path().join("absent"), dest.path());
        assert!(result.is_err());
    }
}
