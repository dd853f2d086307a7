//! On-disk stock pools. The files themselves are the state.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::{
    error::{Error, Result},
    utility::is_image_file,
    warn,
};

#[derive(Debug, Clone)]
pub struct StockDir {
    dir: PathBuf,
}

impl StockDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Finished images only; `.part` files and strays are ignored. A missing
    /// directory reads as empty.
    pub fn list(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| is_image_file(p))
            .collect();
        files.sort();
        files
    }

    pub fn count(&self) -> usize {
        self.list().len()
    }

    /// Deletes every image in the pool and returns how many went.
    pub fn clear(&self) -> usize {
        let mut removed = 0;
        for path in self.list() {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove {}: {e}", path.display()),
            }
        }
        removed
    }

    /// Deletes a consumed stock file, but only when it really lives in this pool.
    pub fn remove_consumed(&self, path: &Path) -> Result<()> {
        if !self.contains(path) {
            return Err(Error::PathOutsideStock(path.to_path_buf()));
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            // another process archived it first
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, path: &Path) -> bool {
        let Ok(root) = self.dir.canonicalize() else {
            return false;
        };
        let parent = match path.parent().map(Path::canonicalize) {
            Some(Ok(parent)) => parent,
            _ => return false,
        };
        parent == root
    }
}

/// Removes `.part` leftovers from the given directories. Returns the count.
pub fn cleanup_partial_files(dirs: &[&Path]) -> usize {
    let mut removed = 0;
    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
            let is_part = path.extension().is_some_and(|ext| ext == "part");
            // stale partials may vanish under a concurrent cleanup; that is fine
            if is_part && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_finished_images() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.jpg", "b.PNG", "c.webp.part", "notes.txt", "d.jpeg"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let stock = StockDir::new(dir.path());
        assert_eq!(stock.count(), 3);
        assert_eq!(StockDir::new(dir.path().join("missing")).count(), 0);
    }

    #[test]
    fn clear_empties_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            fs::write(dir.path().join(format!("{i}.jpg")), b"x").unwrap();
        }
        let stock = StockDir::new(dir.path());
        assert_eq!(stock.clear(), 4);
        assert_eq!(stock.count(), 0);
    }

    #[test]
    fn refuses_to_remove_outside_files() {
        let root = tempfile::tempdir().unwrap();
        let pool = root.path().join("stock");
        fs::create_dir(&pool).unwrap();
        let outside = root.path().join("keep.jpg");
        fs::write(&outside, b"x").unwrap();
        let inside = pool.join("gone.jpg");
        fs::write(&inside, b"x").unwrap();

        let stock = StockDir::new(&pool);
        assert!(matches!(
            stock.remove_consumed(&outside),
            Err(Error::PathOutsideStock(_))
        ));
        assert!(outside.exists());
        stock.remove_consumed(&inside).unwrap();
        assert!(!inside.exists());
    }

    #[test]
    fn partial_cleanup_spares_finished_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jpg.part"), b"x").unwrap();
        fs::write(dir.path().join("b.jpg"), b"x").unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(cleanup_partial_files(&[dir.path(), missing.as_path()]), 1);
        assert!(dir.path().join("b.jpg").exists());
    }
}
