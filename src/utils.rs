// Copyright (c) 2026 MCU-Debug Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Absolute form of `path` as the debugger expects it in `exec-file` replies.
/// Symlinks are kept as given.
pub fn absolute_path(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().unwrap_or_default().join(path)
    };
    let normal = normalize(&absolute);

    // dunce drops the \\?\ prefix on Windows.
    let simplified = dunce::simplified(&normal);

    // GDB accepts forward slashes on every host
    let final_path = simplified.to_string_lossy().replace('\\', "/");

    // C:/ not c:/
    let mut chars = final_path.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if cfg!(windows) => {
            format!("{}{}", drive.to_ascii_uppercase(), &final_path[1..])
        }
        _ => final_path,
    }
}

/// Collapses `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dots_are_collapsed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.elf");
        std::fs::write(&file, b"").unwrap();

        let dotted = dir.path().join(".").join("sub").join("..").join("app.elf");
        let resolved = absolute_path(&dotted);
        assert!(resolved.ends_with("/app.elf"));
        assert!(!resolved.contains("/./"));
        assert!(!resolved.contains(".."));
        assert!(!resolved.contains('\\'));
    }

    #[test]
    fn relative_missing_file_is_made_absolute() {
        let resolved = absolute_path(Path::new("does-not-exist.elf"));
        assert!(Path::new(&resolved).is_absolute());
        assert!(resolved.ends_with("does-not-exist.elf"));
    }

    #[test]
    fn parent_of_root_is_root() {
        assert_eq!(normalize(Path::new("/../a/./b")), PathBuf::from("/a/b"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real.elf");
        std::fs::write(&target, b"").unwrap();
        let link = dir.path().join("link.elf");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let resolved = absolute_path(&link);
        assert!(resolved.ends_with("/link.elf"));
        assert_eq!(resolved, link.to_string_lossy());
    }
}
