use crate::ingest::types::MediaKind;
use glob::Pattern;
use std::path::Path;

/// Suffix for in-progress archive writes. Files carrying it are never
/// scanned and never exposed as catalog entries.
pub const TEMP_SUFFIX: &str = ".tmp";

const OS_SENTINELS: &[&str] = &["thumbs.db", "desktop.ini", "icon\r", ".ds_store"];

const SIDECAR_EXTENSIONS: &[&str] = &["xmp", "aae", "thm", "srt", "vtt", "json"];
const RAW_EXTENSIONS: &[&str] = &[
    "cr2", "cr3", "nef", "arw", "dng", "orf", "rw2", "raf", "pef", "srw",
];
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "png", "gif", "tiff", "heic", "heif", "webp", "bmp", "jp2", "avif",
];
const VIDEO_EXTENSIONS: &[&str] = &[
    "mov", "mp4", "m4v", "avi", "mkv", "mts", "m2ts", "3gp", "webm", "mpg",
];
/// Clips that pair with a still of the same name (live photos).
const MOTION_EXTENSIONS: &[&str] = &["mov", "mp4"];

/// Lowercase, dot-less extension with common aliases folded together.
pub fn normalize_extension(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpeg" | "jpe" => "jpg".to_string(),
        "tif" => "tiff".to_string(),
        "mpeg" => "mpg".to_string(),
        _ => ext,
    }
}

pub fn classify(extension: &str) -> MediaKind {
    if SIDECAR_EXTENSIONS.contains(&extension) {
        MediaKind::Sidecar
    } else if RAW_EXTENSIONS.contains(&extension) {
        MediaKind::Raw
    } else if IMAGE_EXTENSIONS.contains(&extension) {
        MediaKind::Image
    } else if VIDEO_EXTENSIONS.contains(&extension) {
        MediaKind::Video
    } else {
        MediaKind::Other
    }
}

pub fn is_motion_clip(extension: &str) -> bool {
    MOTION_EXTENSIONS.contains(&extension)
}

/// Grouping key: parent directory plus the lowercase file name with its
/// extension removed. A sidecar named after the full media name
/// (`IMG_1.JPG.xmp`) loses the inner media extension too, so it lands on
/// the same key as `IMG_1.JPG`.
pub fn base_key(path: &Path) -> String {
    let parent = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if let Some((inner_stem, inner_ext)) = stem.rsplit_once('.') {
        let inner = normalize_extension(Path::new(&format!("x.{}", inner_ext)));
        if !inner_stem.is_empty() && classify(&inner) != MediaKind::Other {
            stem = inner_stem.to_string();
        }
    }
    format!("{}/{}", parent, stem)
}

/// Dot-files, OS sentinel files, our own temp files, and anything matching
/// a configured ignore glob.
pub fn is_excluded(path: &Path, ignore_patterns: &[Pattern]) -> bool {
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => return false,
    };
    if name.starts_with('.') || name.ends_with(TEMP_SUFFIX) {
        return true;
    }
    if OS_SENTINELS.contains(&name.to_lowercase().as_str()) {
        return true;
    }
    ignore_patterns
        .iter()
        .any(|pattern| pattern.matches_path(path))
}
