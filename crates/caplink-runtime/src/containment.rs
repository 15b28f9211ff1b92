//! Path containment for storage roots.
//!
//! Paths are checked in two passes: a purely lexical one that never touches the
//! filesystem, then a symlink pass over whatever part of the path already exists.

use std::path::{Component, Path, PathBuf};

/// Lexically resolve `relative` under `root`.
///
/// `..` is honoured as long as it never climbs above `root`. Absolute paths,
/// drive prefixes and paths that name the root itself are rejected.
pub fn resolve_lexical(root: &Path, relative: &str) -> Result<PathBuf, String> {
    let requested = Path::new(relative);
    if requested.is_absolute() {
        return Err("absolute paths are not allowed".into());
    }

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in requested.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err("prefix or root components are not allowed".into());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err("'..' climbs above the storage root".into());
                }
                resolved.pop();
                depth -= 1;
            }
            Component::Normal(segment) => {
                resolved.push(segment);
                depth += 1;
            }
        }
    }

    if depth == 0 {
        return Err("path does not name an object under the root".into());
    }
    Ok(resolved)
}

/// Reject `candidate` if any existing component between `root` and it is a
/// symlink, or if its nearest existing ancestor resolves outside `root`.
///
/// `candidate` must come from [`resolve_lexical`] with the same `root`.
pub async fn check_symlinks(root: &Path, candidate: &Path) -> Result<(), String> {
    let canonical_root = match tokio::fs::canonicalize(root).await {
        Ok(path) => path,
        // Nothing exists under a missing root, so nothing can be a link.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(format!("cannot resolve storage root: {e}")),
    };

    let relative = candidate
        .strip_prefix(root)
        .map_err(|_| "path is not under the storage root".to_string())?;

    let mut current = root.to_path_buf();
    let mut nearest_existing = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match tokio::fs::symlink_metadata(&current).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(format!(
                    "'{}' is a symbolic link",
                    current.strip_prefix(root).unwrap_or(&current).display()
                ));
            }
            Ok(_) => nearest_existing = current.clone(),
            Err(_) => break,
        }
    }

    let canonical = tokio::fs::canonicalize(&nearest_existing)
        .await
        .map_err(|e| format!("cannot resolve '{}': {e}", nearest_existing.display()))?;
    if !canonical.starts_with(&canonical_root) {
        return Err("path resolves outside the storage root".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_relative_path() {
        let root = Path::new("/srv/blobs");
        assert_eq!(
            resolve_lexical(root, "a/b.txt").unwrap(),
            Path::new("/srv/blobs/a/b.txt")
        );
    }

    #[test]
    fn parent_inside_root_is_allowed() {
        let root = Path::new("/srv/blobs");
        assert_eq!(
            resolve_lexical(root, "a/../b.txt").unwrap(),
            Path::new("/srv/blobs/b.txt")
        );
    }

    #[test]
    fn traversal_above_root_is_rejected() {
        let root = Path::new("/srv/blobs");
        assert!(resolve_lexical(root, "../etc/passwd").is_err());
        assert!(resolve_lexical(root, "a/../../etc/passwd").is_err());
    }

    #[test]
    fn absolute_and_empty_paths_are_rejected() {
        let root = Path::new("/srv/blobs");
        assert!(resolve_lexical(root, "/etc/passwd").is_err());
        assert!(resolve_lexical(root, "").is_err());
        assert!(resolve_lexical(root, "./").is_err());
        assert!(resolve_lexical(root, "a/..").is_err());
    }

    #[tokio::test]
    async fn missing_root_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("not-yet");
        let candidate = resolve_lexical(&root, "x/y").unwrap();
        assert!(check_symlinks(&root, &candidate).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_directory_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let candidate = resolve_lexical(&root, "link/secret.txt").unwrap();
        let err = check_symlinks(&root, &candidate).await.unwrap_err();
        assert!(err.contains("symbolic link"), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_root_itself_is_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let real = tmp.path().join("real");
        std::fs::create_dir_all(real.join("dir")).unwrap();
        let root = tmp.path().join("alias");
        std::os::unix::fs::symlink(&real, &root).unwrap();

        let candidate = resolve_lexical(&root, "dir/file").unwrap();
        assert!(check_symlinks(&root, &candidate).await.is_ok());
    }
}
