//! Source detection and item listing for a unit's input directory
//!
//! Raw files take precedence over prepared files when both are present.
//! Listings are sorted by file name because every peer must derive the same
//! order before partitioning.

use crate::error::{PipelineError, PipelineResult};
use crate::model::{Item, SourceKind, WorkUnit};
use glob::Pattern;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File extensions that identify each source kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePatterns {
    pub raw_extension: String,
    pub prepared_extension: String,
}

impl Default for SourcePatterns {
    fn default() -> Self {
        Self {
            raw_extension: ".raw".to_string(),
            prepared_extension: ".fil".to_string(),
        }
    }
}

/// Files of one kind found in an input directory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    /// Usable items, sorted by name
    pub items: Vec<Item>,
    /// Matching files whose names cannot become item names
    pub unusable: Vec<PathBuf>,
}

/// A directory entry that ends with the kind's extension
enum Candidate {
    Usable(PathBuf),
    Unusable(PathBuf),
}

impl SourcePatterns {
    fn extension(&self, kind: SourceKind) -> Option<&str> {
        match kind {
            SourceKind::Raw => Some(&self.raw_extension),
            SourceKind::Prepared => Some(&self.prepared_extension),
            SourceKind::None => None,
        }
    }

    /// Decide which kind of input `dir` holds
    ///
    /// A file with an unusable name still counts as present.
    pub fn detect(&self, dir: &Path) -> PipelineResult<SourceKind> {
        for kind in [SourceKind::Raw, SourceKind::Prepared] {
            if self.matching(dir, kind)?.next().transpose()?.is_some() {
                return Ok(kind);
            }
        }
        Ok(SourceKind::None)
    }

    /// List every file of `kind` in `dir`, sorted by name
    pub fn list(&self, dir: &Path, kind: SourceKind) -> PipelineResult<Listing> {
        let mut paths = Vec::new();
        let mut unusable = Vec::new();
        for candidate in self.matching(dir, kind)? {
            match candidate? {
                Candidate::Usable(path) => paths.push(path),
                Candidate::Unusable(path) => unusable.push(path),
            }
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        unusable.sort();

        let items = paths
            .iter()
            .enumerate()
            .filter_map(|(position, path)| Item::from_path(path, position))
            .collect();
        Ok(Listing { items, unusable })
    }

    /// Detect and list `unit`'s input off the async runtime
    pub async fn survey(&self, unit: &WorkUnit) -> PipelineResult<(SourceKind, Listing)> {
        let patterns = self.clone();
        let dir = unit.input_dir.clone();
        tokio::task::spawn_blocking(move || -> PipelineResult<(SourceKind, Listing)> {
            let kind = patterns.detect(&dir)?;
            let listing = match kind {
                SourceKind::None => Listing::default(),
                kind => patterns.list(&dir, kind)?,
            };
            Ok((kind, listing))
        })
        .await
        .map_err(|e| PipelineError::WorkerPanicked {
            unit: unit.id.clone(),
            details: e.to_string(),
        })?
    }

    /// Lazy walk of the regular files in `dir` ending with the kind's extension
    ///
    /// A missing directory yields nothing; any other read error is surfaced.
    fn matching<'a>(
        &self,
        dir: &'a Path,
        kind: SourceKind,
    ) -> PipelineResult<Box<dyn Iterator<Item = PipelineResult<Candidate>> + 'a>> {
        let Some(extension) = self.extension(kind) else {
            return Ok(Box::new(std::iter::empty()));
        };
        let pattern = Pattern::new(&format!("*{}", Pattern::escape(extension))).map_err(|e| {
            PipelineError::config(format!("bad source extension {}: {}", extension, e))
        })?;

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Box::new(std::iter::empty())),
            Err(e) => return Err(PipelineError::io("Failed to read input directory", dir, e)),
        };

        Ok(Box::new(entries.filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    return Some(Err(PipelineError::io(
                        "Failed to read input directory entry",
                        dir,
                        e,
                    )))
                }
            };
            let path = entry.path();
            let name = entry.file_name();
            let candidate = match name.to_str() {
                Some(name) if pattern.matches(name) => Candidate::Usable(path),
                Some(_) => return None,
                None if pattern.matches(&name.to_string_lossy()) => Candidate::Unusable(path),
                None => return None,
            };
            let is_file = match &candidate {
                Candidate::Usable(path) | Candidate::Unusable(path) => path.is_file(),
            };
            is_file.then_some(Ok(candidate))
        })))
    }
}
