use super::media::is_motion_clip;
use crate::ingest::types::{FileRole, MediaKind, ScannedFile};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

pub type SidecarMap = BTreeMap<String, BTreeSet<PathBuf>>;
pub type PairMap = BTreeMap<PathBuf, BTreeSet<PathBuf>>;

/// Assign roles and build the sidecar and pair maps.
///
/// Roles are recomputed from scratch on every call and the maps are sets,
/// so grouping the same files twice yields identical output.
pub fn group_files(files: &mut [ScannedFile], window_ms: i64) -> (SidecarMap, PairMap) {
    let mut sidecars = SidecarMap::new();
    let mut by_key: BTreeMap<String, Vec<usize>> = BTreeMap::new();

    for (index, file) in files.iter_mut().enumerate() {
        if file.kind == MediaKind::Sidecar {
            file.role = FileRole::Sidecar;
            sidecars
                .entry(file.base_key.clone())
                .or_default()
                .insert(file.path.clone());
        } else {
            file.role = FileRole::Primary;
            by_key.entry(file.base_key.clone()).or_default().push(index);
        }
    }

    let mut pairs = PairMap::new();
    for members in by_key.values().filter(|m| m.len() > 1) {
        // raw files claim their previews before stills claim motion clips
        let mut primaries: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&i| files[i].kind == MediaKind::Raw)
            .collect();
        primaries.extend(
            members
                .iter()
                .copied()
                .filter(|&i| files[i].kind == MediaKind::Image),
        );

        for primary in primaries {
            if files[primary].role != FileRole::Primary {
                continue;
            }
            for &candidate in members {
                if candidate == primary
                    || files[candidate].role != FileRole::Primary
                    || pairs.contains_key(&files[candidate].path)
                {
                    continue;
                }
                let close_in_time =
                    (files[primary].modified_ms - files[candidate].modified_ms).abs() <= window_ms;
                if close_in_time && is_partner(&files[primary], &files[candidate]) {
                    files[candidate].role = FileRole::PairedOriginal;
                    pairs
                        .entry(files[primary].path.clone())
                        .or_default()
                        .insert(files[candidate].path.clone());
                }
            }
        }
    }

    (sidecars, pairs)
}

fn is_partner(primary: &ScannedFile, candidate: &ScannedFile) -> bool {
    match primary.kind {
        MediaKind::Raw => candidate.kind == MediaKind::Image,
        MediaKind::Image => {
            candidate.kind == MediaKind::Video && is_motion_clip(&candidate.extension)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::media::{base_key, classify, normalize_extension};
    use std::path::Path;

    fn file(path: &str, modified_ms: i64) -> ScannedFile {
        let path = Path::new(path);
        let extension = normalize_extension(path);
        ScannedFile {
            path: path.to_path_buf(),
            size: 10,
            modified_ms,
            kind: classify(&extension),
            extension,
            role: FileRole::Primary,
            base_key: base_key(path),
        }
    }

    #[test]
    fn test_raw_and_preview_pair() {
        let mut files = vec![file("/m/IMG_1.CR2", 1_000), file("/m/IMG_1.JPG", 1_500)];
        let (sidecars, pairs) = group_files(&mut files, 3_000);
        assert!(sidecars.is_empty());
        assert_eq!(files[0].role, FileRole::Primary);
        assert_eq!(files[1].role, FileRole::PairedOriginal);
        assert!(pairs[&PathBuf::from("/m/IMG_1.CR2")].contains(&PathBuf::from("/m/IMG_1.JPG")));
    }

    #[test]
    fn test_pair_requires_proximate_capture_time() {
        let mut files = vec![file("/m/IMG_1.CR2", 0), file("/m/IMG_1.JPG", 60_000)];
        let (_, pairs) = group_files(&mut files, 3_000);
        assert!(pairs.is_empty());
        assert_eq!(files[1].role, FileRole::Primary);
    }

    #[test]
    fn test_live_photo_and_sidecar() {
        let mut files = vec![
            file("/m/IMG_2.HEIC", 5_000),
            file("/m/IMG_2.MOV", 5_200),
            file("/m/IMG_2.HEIC.xmp", 9_999_999),
        ];
        let (sidecars, pairs) = group_files(&mut files, 3_000);
        assert_eq!(files[1].role, FileRole::PairedOriginal);
        assert_eq!(files[2].role, FileRole::Sidecar);
        assert_eq!(sidecars.len(), 1);
        assert_eq!(sidecars["/m/img_2"].len(), 1);
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_regrouping_is_idempotent() {
        let mut files = vec![
            file("/m/A.NEF", 0),
            file("/m/A.JPG", 0),
            file("/m/A.xmp", 0),
        ];
        let first = group_files(&mut files, 3_000);
        let second = group_files(&mut files, 3_000);
        assert_eq!(first, second);
        assert_eq!(second.0["/m/a"].len(), 1, "sidecar must not be counted twice");
        assert_eq!(second.1[&PathBuf::from("/m/A.NEF")].len(), 1);
    }
}
