#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

pub const CATEGORIES: [&str; 2] = ["cat", "dog"];

pub fn write_png(path: &Path, width: u32, height: u32, shade: u8) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    RgbImage::from_pixel(width, height, Rgb([shade, shade / 2, 255 - shade]))
        .save(path)
        .expect("write png file");
}

pub fn write_corrupt(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(path, b"definitely not an image").expect("write corrupt file");
}

pub fn write_manifest(path: &Path, rows: &[(String, &str, i64)]) {
    let text: String = rows
        .iter()
        .map(|(file, name, index)| format!("{},{},{}\n", file, name, index))
        .collect();
    fs::write(path, text).expect("write manifest");
}

/// Writes `count` small PNGs alternating between two categories under
/// `root/images` and a manifest listing them in order.
///
/// Returns `(manifest_path, image_root)`.
pub fn build_dataset(root: &Path, count: usize) -> (PathBuf, PathBuf) {
    let image_root = root.join("images");
    let mut rows = Vec::with_capacity(count);
    for i in 0..count {
        let label = i % CATEGORIES.len();
        let name = CATEGORIES[label];
        let file = format!("{}/{:03}.png", name, i);
        write_png(&image_root.join(&file), 12, 9, (i * 13 % 256) as u8);
        rows.push((file, name, label as i64));
    }

    let manifest = root.join("manifest.csv");
    write_manifest(&manifest, &rows);
    (manifest, image_root)
}

/// Expected labels of a dataset built by [`build_dataset`], in manifest order.
pub fn expected_labels(count: usize) -> Vec<i64> {
    (0..count).map(|i| (i % CATEGORIES.len()) as i64).collect()
}
