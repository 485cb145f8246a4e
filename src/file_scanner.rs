use log::{debug, info, warn};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, FilterEntry, WalkDir};

use crate::format_registry;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan root does not exist: {0}")]
    RootNotFound(PathBuf),
    #[error("Scan root is not a directory: {0}")]
    NotADirectory(PathBuf),
}

type DirectoryFilter = Box<dyn FnMut(&DirEntry) -> bool + Send>;

/// Lazy walk over one root. Yields recognized image files that are not in the
/// exclusion set. Each call to [`scan`] performs a fresh walk.
pub struct Scan {
    walker: FilterEntry<walkdir::IntoIter, DirectoryFilter>,
    already_known: HashSet<String>,
    root: PathBuf,
    found: usize,
}

/// Walks `root` recursively. Symlinked directories are followed, but a directory whose
/// real path was already visited during this walk is not entered again.
pub fn scan(root: &Path, already_known: HashSet<String>) -> Result<Scan, ScanError> {
    let metadata =
        fs::metadata(root).map_err(|_| ScanError::RootNotFound(root.to_path_buf()))?;
    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    info!("Scanning directory: {}", root.display());

    let mut visited: HashSet<PathBuf> = HashSet::new();
    let filter: DirectoryFilter = Box::new(move |entry: &DirEntry| {
        if !entry.file_type().is_dir() {
            return true;
        }
        match fs::canonicalize(entry.path()) {
            Ok(real) => {
                let first_visit = visited.insert(real);
                if !first_visit {
                    debug!("Skipping already visited directory: {}", entry.path().display());
                }
                first_visit
            }
            Err(e) => {
                warn!("Cannot resolve directory {}: {}", entry.path().display(), e);
                false
            }
        }
    });

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(filter);

    Ok(Scan {
        walker,
        already_known,
        root: root.to_path_buf(),
        found: 0,
    })
}

impl Iterator for Scan {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let entry = match self.walker.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    warn!("Error while scanning {}: {}", self.root.display(), e);
                    continue;
                }
                None => {
                    info!(
                        "Found {} new photo files under {}",
                        self.found,
                        self.root.display()
                    );
                    return None;
                }
            };

            if !entry.file_type().is_file() || !format_registry::is_recognized(entry.path()) {
                continue;
            }

            let location = entry.path().to_string_lossy();
            if self.already_known.contains(location.as_ref()) {
                continue;
            }

            self.found += 1;
            return Some(entry.into_path());
        }
    }
}
