//! Copy-plan helpers for multi-drive export layouts.
//!
//! Inputs spread across physical devices are grouped by their top-level
//! root; each group lands under its own `<drive_label>/` subdirectory of
//! the output root, preserving the relative structure below the group's
//! common directory.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// One group of inputs sharing a physical root.
#[derive(Debug, Clone, PartialEq)]
pub struct RootGroup {
    /// Deepest directory common to every file in the group.
    pub root: PathBuf,
    /// Subdirectory name used under the output root.
    pub label: String,
    pub files: Vec<PathBuf>,
}

/// Group absolute paths by drive and compute each group's common root.
pub fn compute_common_roots(paths: &[PathBuf]) -> Vec<RootGroup> {
    let mut by_drive: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for path in paths {
        by_drive.entry(drive_key(path)).or_default().push(path.clone());
    }

    by_drive
        .into_iter()
        .map(|(key, files)| {
            let root = common_ancestor(&files);
            let label = root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| sanitize_label(&key));
            RootGroup { root, label, files }
        })
        .collect()
}

/// Destination for one file: `<output>/<label>/<relative-to-group-root>`.
pub fn compute_dest_path(file: &Path, group: &RootGroup, output_root: &Path) -> PathBuf {
    let relative = file.strip_prefix(&group.root).unwrap_or(file);
    output_root.join(&group.label).join(relative)
}

/// Identify the physical drive of a path: the Windows prefix when present,
/// otherwise the mount-point component (two levels under /mnt, /media and
/// /run/media, one level elsewhere).
fn drive_key(path: &Path) -> String {
    let mut components = path.components();

    match components.next() {
        Some(Component::Prefix(prefix)) => {
            return prefix.as_os_str().to_string_lossy().to_string();
        }
        Some(Component::RootDir) => {}
        Some(other) => return other.as_os_str().to_string_lossy().to_string(),
        None => return String::from("/"),
    }

    let first = match components.next() {
        Some(c) => c.as_os_str().to_string_lossy().to_string(),
        None => return String::from("/"),
    };

    match first.as_str() {
        "mnt" | "media" | "Volumes" => match components.next() {
            Some(c) => format!("/{}/{}", first, c.as_os_str().to_string_lossy()),
            None => format!("/{first}"),
        },
        "run" => {
            // /run/media/<user>/<volume>
            let mut tail = vec![first];
            for c in components.take(3) {
                tail.push(c.as_os_str().to_string_lossy().to_string());
            }
            format!("/{}", tail.join("/"))
        }
        _ => format!("/{first}"),
    }
}

/// Component-wise longest common directory of a non-empty set of paths.
fn common_ancestor(paths: &[PathBuf]) -> PathBuf {
    let mut iter = paths.iter();
    let first = match iter.next() {
        Some(p) => p.parent().unwrap_or(p).to_path_buf(),
        None => return PathBuf::new(),
    };

    iter.fold(first, |acc, path| {
        let dir = path.parent().unwrap_or(path);
        let mut common = PathBuf::new();
        for (a, b) in acc.components().zip(dir.components()) {
            if a == b {
                common.push(a.as_os_str());
            } else {
                break;
            }
        }
        common
    })
}

fn sanitize_label(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    cleaned.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_drives_two_groups() {
        let paths = vec![
            PathBuf::from("/mnt/driveA/photos/2024/a.jpg"),
            PathBuf::from("/mnt/driveA/photos/2024/b.jpg"),
            PathBuf::from("/mnt/driveB/backup/c.jpg"),
        ];

        let groups = compute_common_roots(&paths);
        assert_eq!(groups.len(), 2);

        let group_a = groups.iter().find(|g| g.files.len() == 2).unwrap();
        assert_eq!(group_a.root, PathBuf::from("/mnt/driveA/photos/2024"));
        assert_eq!(group_a.label, "2024");

        let group_b = groups.iter().find(|g| g.files.len() == 1).unwrap();
        assert_eq!(group_b.root, PathBuf::from("/mnt/driveB/backup"));
    }

    #[test]
    fn test_dest_paths_distinct_per_drive() {
        let paths = vec![
            PathBuf::from("/mnt/driveA/photos/a.jpg"),
            PathBuf::from("/mnt/driveB/photos/a.jpg"),
        ];
        let groups = compute_common_roots(&paths);
        let output = PathBuf::from("/export");

        let dests: Vec<PathBuf> = groups
            .iter()
            .map(|g| compute_dest_path(&g.files[0], g, &output))
            .collect();

        assert_ne!(dests[0], dests[1]);
        for dest in &dests {
            assert!(dest.starts_with("/export"));
            assert!(dest.ends_with("a.jpg"));
        }
    }

    #[test]
    fn test_single_group_preserves_structure() {
        let paths = vec![
            PathBuf::from("/home/user/photos/2024/estate/a.jpg"),
            PathBuf::from("/home/user/photos/2024/inverno/b.jpg"),
        ];
        let groups = compute_common_roots(&paths);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].root, PathBuf::from("/home/user/photos/2024"));

        let dest = compute_dest_path(&paths[0], &groups[0], Path::new("/out"));
        assert_eq!(dest, PathBuf::from("/out/2024/estate/a.jpg"));
    }

    #[test]
    fn test_drive_key_variants() {
        assert_eq!(drive_key(Path::new("/mnt/usb1/x.jpg")), "/mnt/usb1");
        assert_eq!(drive_key(Path::new("/media/disk/x.jpg")), "/media/disk");
        assert_eq!(drive_key(Path::new("/home/user/x.jpg")), "/home");
        assert_eq!(
            drive_key(Path::new("/run/media/user/SD/x.jpg")),
            "/run/media/user/SD"
        );
    }
}
