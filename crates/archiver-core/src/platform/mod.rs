//! Filesystem capabilities that differ per OS: volume identity, reflink
//! clones and directory fsync.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "windows")]
pub mod windows;

use std::io;
use std::path::Path;

/// Nearest existing ancestor, for destinations that are not created yet.
fn existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

/// Whether two paths live on the same volume, so a hard link between them
/// can succeed.
#[cfg(unix)]
pub fn same_volume(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let device = |p: &Path| {
        existing_ancestor(p)
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.dev())
    };
    match (device(a), device(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(target_os = "windows")]
pub fn same_volume(a: &Path, b: &Path) -> bool {
    let drive = |p: &Path| existing_ancestor(p).and_then(windows::get_drive_letter);
    match (drive(a), drive(b)) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(&y),
        _ => false,
    }
}

#[cfg(not(any(unix, target_os = "windows")))]
pub fn same_volume(_a: &Path, _b: &Path) -> bool {
    false
}

/// Copy-on-write clone of `src` into a new file at `dst`.
#[cfg(target_os = "linux")]
pub fn clone_file(src: &Path, dst: &Path) -> io::Result<()> {
    linux::ficlone(src, dst)
}

#[cfg(not(target_os = "linux"))]
pub fn clone_file(_src: &Path, _dst: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "copy-on-write clone not available on this platform",
    ))
}

/// Flush a directory entry so a completed rename survives a power loss.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
