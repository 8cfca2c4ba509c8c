use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use vigil_core::{SnapshotError, SnapshotStore};

/// Writes snapshots as JPEG files into one directory.
pub struct JpegSnapshotStore {
    dir: PathBuf,
}

impl JpegSnapshotStore {
    pub fn open(dir: &Path) -> Result<Self, SnapshotError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SnapshotStore for JpegSnapshotStore {
    fn save(&self, key: &str, image: &RgbImage) -> Result<PathBuf, SnapshotError> {
        let path = self.dir.join(sanitize(key));
        image.save_with_format(&path, ImageFormat::Jpeg)?;
        tracing::debug!(path = %path.display(), "snapshot saved");
        Ok(path)
    }
}

/// Keys come from identity names; keep them to a single path component.
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("alice_1_2_3.jpg"), "alice_1_2_3.jpg");
        assert_eq!(sanitize("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize("Mary Jane_0_0_1.jpg"), "Mary_Jane_0_0_1.jpg");
    }

    #[test]
    fn test_save_writes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let store = JpegSnapshotStore::open(&dir.path().join("snapshots")).unwrap();
        let image = RgbImage::from_pixel(8, 8, image::Rgb([200, 10, 10]));

        let path = store.save("Unknown_1_2_3.jpg", &image).unwrap();
        assert_eq!(path, store.dir().join("Unknown_1_2_3.jpg"));

        let back = image::open(&path).unwrap();
        assert_eq!((back.width(), back.height()), (8, 8));
    }

    #[test]
    fn test_save_stays_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = JpegSnapshotStore::open(dir.path()).unwrap();
        let path = store.save("a/b.jpg", &RgbImage::new(2, 2)).unwrap();
        assert_eq!(path.parent(), Some(dir.path()));
    }
}
