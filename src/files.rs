use std::io;
use std::path::{Component, Path, PathBuf};

/// Resolves a stored image name inside the upload directory. Names that
/// would escape it are rejected.
pub fn image_path(upload_dir: &Path, image: &str) -> Option<PathBuf> {
    let relative = Path::new(image);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if image.is_empty() || !safe {
        return None;
    }
    Some(upload_dir.join(relative))
}

/// Removes a reading's image. A file that is already gone counts as removed.
pub async fn remove_image(upload_dir: &Path, image: &str) -> io::Result<()> {
    let path = image_path(upload_dir, image).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to delete '{}' outside the upload directory", image),
        )
    })?;

    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_path_stays_inside_upload_dir() {
        let dir = Path::new("/srv/uploads");
        assert_eq!(
            image_path(dir, "images/a.jpg"),
            Some(PathBuf::from("/srv/uploads/images/a.jpg"))
        );
        assert_eq!(image_path(dir, "../etc/passwd"), None);
        assert_eq!(image_path(dir, "/etc/passwd"), None);
        assert_eq!(image_path(dir, ""), None);
    }

    #[tokio::test]
    async fn test_remove_image_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"jpeg").unwrap();

        remove_image(dir.path(), "a.jpg").await.unwrap();
        assert!(!dir.path().join("a.jpg").exists());
        remove_image(dir.path(), "a.jpg").await.unwrap();
    }
}
