//! Per-article view and like counters.
//!
//! Visitors are identified by a SHA-256 fingerprint of their address, user
//! agent and the article slug, so a visitor counts once per article. The
//! whole ledger lives in `<data_dir>/engagement.json` and is rewritten on
//! every change.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum EngagementError {
    #[error("engagement store I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engagement store is corrupt: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Who is viewing or liking. Missing headers become `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visitor {
    pub ip: String,
    pub user_agent: String,
}

impl Visitor {
    pub fn new(ip: Option<&str>, user_agent: Option<&str>) -> Self {
        let or_unknown = |v: Option<&str>| {
            v.map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("unknown")
                .to_string()
        };
        Self {
            ip: or_unknown(ip),
            user_agent: or_unknown(user_agent),
        }
    }

    pub fn view_fingerprint(&self, slug: &str) -> String {
        fingerprint(&format!("{}-{}-{slug}", self.ip, self.user_agent))
    }

    pub fn like_fingerprint(&self, slug: &str) -> String {
        fingerprint(&format!("{}-{}-{slug}-like", self.ip, self.user_agent))
    }
}

/// Lowercase hex SHA-256 of `input`.
pub fn fingerprint(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeStatus {
    pub likes: usize,
    pub has_liked: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Ledger {
    #[serde(default)]
    views: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    likes: BTreeMap<String, BTreeSet<String>>,
}

impl Ledger {
    fn like_status(&self, slug: &str, fingerprint: &str) -> LikeStatus {
        let set = self.likes.get(slug);
        LikeStatus {
            likes: set.map_or(0, BTreeSet::len),
            has_liked: set.is_some_and(|s| s.contains(fingerprint)),
        }
    }
}

pub struct EngagementStore {
    path: PathBuf,
    ledger: Mutex<Ledger>,
}

impl EngagementStore {
    /// Open (or start) the ledger under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, EngagementError> {
        let path = data_dir.join("engagement.json");
        let ledger = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ledger::default(),
            Err(source) => return Err(EngagementError::Io { path, source }),
        };
        info!(
            "Engagement store at {} ({} articles viewed)",
            path.display(),
            ledger.views.len()
        );
        Ok(Self {
            path,
            ledger: Mutex::new(ledger),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save(&self, ledger: &Ledger) -> Result<(), EngagementError> {
        let io_err = |source| EngagementError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(ledger)?).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    /// Apply `change` to a copy of the ledger and keep the copy only once it
    /// is on disk. `change` returns whether anything changed.
    fn commit<T>(
        &self,
        change: impl FnOnce(&mut Ledger) -> bool,
        read: impl FnOnce(&Ledger) -> T,
    ) -> Result<T, EngagementError> {
        let mut ledger = self.lock();
        let mut next = ledger.clone();
        if change(&mut next) {
            self.save(&next)?;
            *ledger = next;
        }
        Ok(read(&ledger))
    }

    /// Count a view (once per visitor) and return the article's total.
    pub fn record_view(&self, slug: &str, visitor: &Visitor) -> Result<usize, EngagementError> {
        let fp = visitor.view_fingerprint(slug);
        self.commit(
            |ledger| ledger.views.entry(slug.to_string()).or_default().insert(fp),
            |ledger| ledger.views.get(slug).map_or(0, BTreeSet::len),
        )
    }

    /// Like an article. Liking twice is a no-op.
    pub fn like(&self, slug: &str, visitor: &Visitor) -> Result<LikeStatus, EngagementError> {
        let fp = visitor.like_fingerprint(slug);
        self.commit(
            |ledger| ledger.likes.entry(slug.to_string()).or_default().insert(fp.clone()),
            |ledger| ledger.like_status(slug, &fp),
        )
    }

    /// Remove this visitor's like, if any.
    pub fn unlike(&self, slug: &str, visitor: &Visitor) -> Result<LikeStatus, EngagementError> {
        let fp = visitor.like_fingerprint(slug);
        self.commit(
            |ledger| {
                let removed = ledger.likes.get_mut(slug).is_some_and(|s| s.remove(&fp));
                if ledger.likes.get(slug).is_some_and(BTreeSet::is_empty) {
                    ledger.likes.remove(slug);
                }
                removed
            },
            |ledger| ledger.like_status(slug, &fp),
        )
    }

    pub fn likes(&self, slug: &str, visitor: &Visitor) -> LikeStatus {
        self.lock().like_status(slug, &visitor.like_fingerprint(slug))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Visitor {
        Visitor::new(Some("10.0.0.1"), Some("Firefox"))
    }

    fn bob() -> Visitor {
        Visitor::new(Some("10.0.0.2"), Some("Chrome"))
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = alice().view_fingerprint("hello-world");
        assert_eq!(fp, fingerprint("10.0.0.1-Firefox-hello-world"));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(
            alice().like_fingerprint("hello-world"),
            fingerprint("10.0.0.1-Firefox-hello-world-like")
        );
        assert_eq!(
            fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_missing_headers_are_unknown() {
        let v = Visitor::new(None, Some("  "));
        assert_eq!(v.ip, "unknown");
        assert_eq!(v.user_agent, "unknown");
    }

    #[test]
    fn test_views_count_each_visitor_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = EngagementStore::open(dir.path()).unwrap();

        assert_eq!(store.record_view("post", &alice()).unwrap(), 1);
        assert_eq!(store.record_view("post", &alice()).unwrap(), 1);
        assert_eq!(store.record_view("post", &bob()).unwrap(), 2);
        assert_eq!(store.record_view("other", &alice()).unwrap(), 1);
    }

    #[test]
    fn test_like_unlike_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = EngagementStore::open(dir.path()).unwrap();

        let none = LikeStatus {
            likes: 0,
            has_liked: false,
        };
        assert_eq!(store.likes("post", &alice()), none);

        let liked = store.like("post", &alice()).unwrap();
        assert_eq!(liked, LikeStatus { likes: 1, has_liked: true });
        assert_eq!(store.like("post", &alice()).unwrap(), liked);

        let status = store.like("post", &bob()).unwrap();
        assert_eq!(status.likes, 2);

        let status = store.unlike("post", &alice()).unwrap();
        assert_eq!(status, LikeStatus { likes: 1, has_liked: false });
        // Unliking again is harmless.
        assert_eq!(store.unlike("post", &alice()).unwrap(), status);
        assert!(store.likes("post", &bob()).has_liked);
    }

    #[test]
    fn test_ledger_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = EngagementStore::open(dir.path()).unwrap();
            store.record_view("post", &alice()).unwrap();
            store.like("post", &bob()).unwrap();
        }
        let store = EngagementStore::open(dir.path()).unwrap();
        assert_eq!(store.record_view("post", &alice()).unwrap(), 1);
        assert_eq!(store.likes("post", &bob()), LikeStatus { likes: 1, has_liked: true });
    }

    #[test]
    fn test_failed_save_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = EngagementStore::open(dir.path()).unwrap();
        // The temp file cannot be written while a directory sits in its place.
        let blocker = dir.path().join("engagement.json.tmp");
        fs::create_dir(&blocker).unwrap();

        assert!(store.record_view("post", &alice()).is_err());
        assert!(store.record_view("post", &alice()).is_err());
        assert!(store.like("post", &alice()).is_err());
        assert_eq!(store.likes("post", &alice()), LikeStatus { likes: 0, has_liked: false });
        assert!(!dir.path().join("engagement.json").exists());

        fs::remove_dir(&blocker).unwrap();
        assert_eq!(store.record_view("post", &alice()).unwrap(), 1);
        assert!(store.like("post", &alice()).unwrap().has_liked);

        // Unlike that cannot be saved keeps the like.
        fs::create_dir(&blocker).unwrap();
        assert!(store.unlike("post", &alice()).is_err());
        assert!(store.likes("post", &alice()).has_liked);
    }

    #[test]
    fn test_corrupt_ledger_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("engagement.json"), "{not json").unwrap();
        assert!(matches!(
            EngagementStore::open(dir.path()),
            Err(EngagementError::Encode(_))
        ));
    }
}
