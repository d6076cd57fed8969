//! Builds a manifest from a class-per-directory image tree.
//!
//! ```text
//! root/
//!   cat/001.jpg
//!   cat/002.jpg
//!   dog/001.png
//! ```
//!
//! Each immediate subdirectory of the root is a category. Category indices
//! are assigned in lexicographic order of directory name (0, 1, 2, ...), and
//! rows are emitted in lexicographic order of relative path, so the same tree
//! always produces the same manifest.

use std::collections::BTreeSet;
use std::path::Path;

use walkdir::WalkDir;

use super::{CategoryIndex, ManifestEntry};
use crate::error::SeerError;

/// File extensions accepted as images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Walks `root` and returns manifest rows plus the category index.
pub fn index_image_tree(root: &Path) -> Result<(Vec<ManifestEntry>, CategoryIndex), SeerError> {
    if !root.is_dir() {
        return Err(SeerError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("image root {} is not a directory", root.display()),
        )));
    }

    let mut files: Vec<(String, String)> = Vec::new();

    for entry in WalkDir::new(root).min_depth(2).follow_links(true) {
        let entry = entry.map_err(|e| {
            SeerError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory loop while indexing")),
            )
        })?;
        if !entry.file_type().is_file() || !has_image_extension(entry.path()) {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let mut components = relative.components();
        let category = match components.next() {
            Some(c) => c.as_os_str().to_string_lossy().into_owned(),
            None => continue,
        };

        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative_path, category));
    }

    let categories: BTreeSet<&str> = files.iter().map(|(_, c)| c.as_str()).collect();
    let index = CategoryIndex::from_names(categories.iter().copied()).map_err(|message| {
        SeerError::ManifestInvalid {
            path: root.to_path_buf(),
            message,
        }
    })?;

    files.sort();
    let entries = files
        .into_iter()
        .map(|(path, category)| {
            let label_index = index.index(&category).unwrap_or_default();
            ManifestEntry::new(path, category, label_index)
        })
        .collect();

    Ok((entries, index))
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
