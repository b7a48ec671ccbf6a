use std::path::{Path, PathBuf};

/// Path helpers for `<cache-root>/...` (§4.3 "On-disk layout"), centralized
/// so no call site hand-joins a path differently from another.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_cache_dir(&self) -> PathBuf {
        self.root.join("meta_cache")
    }

    pub fn meta_indexes_dir(&self) -> PathBuf {
        self.meta_cache_dir().join("meta_indexes")
    }

    pub fn index_path(&self, filename: &str) -> PathBuf {
        self.meta_indexes_dir().join(format!("{filename}.meta.json"))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.meta_cache_dir().join("overall_meta.json")
    }

    pub fn cache_info_path(&self) -> PathBuf {
        self.meta_cache_dir().join("cache_info.json")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn body_path(&self, filename: &str) -> PathBuf {
        self.sessions_dir().join(filename)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("cache_lock")
    }
}

pub fn ensure_dirs(layout: &Layout) -> std::io::Result<()> {
    std::fs::create_dir_all(layout.meta_indexes_dir())?;
    std::fs::create_dir_all(layout.sessions_dir())?;
    Ok(())
}
