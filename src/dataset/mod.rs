//! On-disk dataset: building, sanitizing and splitting
//!
//! The layout is `root/<label>/<image>`; an image's class is the name of
//! the directory that contains it.

pub mod builder;
pub mod sanitize;
pub mod split;

pub use builder::{ClassReport, DatasetBuilder, DatasetReport};
pub use sanitize::{find_image_files, remove_unreadable};
pub use split::{DataItem, DataSplit};

use std::path::Path;

/// File extensions treated as images when scanning a dataset
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff"];

/// Check if a path has one of [`IMAGE_EXTENSIONS`] (case-insensitive)
#[must_use]
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}
