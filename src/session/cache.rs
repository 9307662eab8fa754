//! Last logged-in user

use std::io;
use std::path::{Path, PathBuf};

use super::resources;

const LAST_USER_KEY: &str = "LAST_USER";

/// Cache file remembering who logged in last
#[derive(Debug, Clone)]
pub struct LastUserCache {
    path: PathBuf,
}

impl LastUserCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<String> {
        resources::read_value(&self.path, LAST_USER_KEY).filter(|name| !name.is_empty())
    }

    pub fn store(&self, name: &str) -> io::Result<()> {
        resources::write_value(&self.path, LAST_USER_KEY, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = LastUserCache::new(dir.path().join("gould/last-user"));

        assert_eq!(cache.load(), None);
        cache.store("alice").unwrap();
        cache.store("bob").unwrap();
        assert_eq!(cache.load().as_deref(), Some("bob"));
        assert_eq!(
            std::fs::read_to_string(cache.path()).unwrap(),
            "LAST_USER=\"bob\"\n"
        );
    }
}
