//! Referral links with sequential ID codes.
//!
//! Records are stored as JSONL in `<data_dir>/referrals.jsonl`, one record
//! per line in creation order. The ID code is assigned once at creation from
//! the most recently created record and never touched again.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::idcode::{next_code, CodeError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("referral not found: {0}")]
    NotFound(String),

    #[error("invalid referral: {0}")]
    Invalid(String),

    #[error(transparent)]
    Code(#[from] CodeError),

    #[error("referral store I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("referral store is corrupt at line {line}: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode referral: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub id_code: String,
    pub name: String,
    /// The partner's own referral code, if the program uses one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a referral.
#[derive(Debug, Clone, Deserialize)]
pub struct NewReferral {
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    pub link: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferralPatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
}

pub trait ReferralRepository: Send + Sync {
    /// The most recently created referral, by `created_at`.
    fn latest(&self) -> Result<Option<Referral>, StoreError>;
    fn get(&self, id_code: &str) -> Result<Option<Referral>, StoreError>;
    fn list(&self) -> Result<Vec<Referral>, StoreError>;
    fn insert(&self, referral: &Referral) -> Result<(), StoreError>;
    fn update(&self, referral: &Referral) -> Result<(), StoreError>;
}

/// JSONL-file backed repository.
pub struct JsonlReferralRepository {
    path: PathBuf,
    // Serializes read-modify-write of the file.
    file_lock: Mutex<()>,
}

impl JsonlReferralRepository {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("referrals.jsonl"),
            file_lock: Mutex::new(()),
        }
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn load(&self) -> Result<Vec<Referral>, StoreError> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };

        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| self.io_err(e))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            // A torn line may be the latest record; skipping it would reissue its code.
            let record = serde_json::from_str::<Referral>(line).map_err(|source| {
                warn!("Corrupt referral line {} in {}: {source}", number + 1, self.path.display());
                StoreError::Corrupt {
                    line: number + 1,
                    source,
                }
            })?;
            records.push(record);
        }
        Ok(records)
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        Ok(())
    }

    fn rewrite(&self, records: &[Referral]) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, out).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.file_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ReferralRepository for JsonlReferralRepository {
    fn latest(&self) -> Result<Option<Referral>, StoreError> {
        let _guard = self.lock();
        let records = self.load()?;
        // max_by_key keeps the last of equal timestamps, i.e. the later line.
        Ok(records.into_iter().max_by_key(|r| r.created_at))
    }

    fn get(&self, id_code: &str) -> Result<Option<Referral>, StoreError> {
        let _guard = self.lock();
        Ok(self.load()?.into_iter().find(|r| r.id_code == id_code))
    }

    fn list(&self) -> Result<Vec<Referral>, StoreError> {
        let _guard = self.lock();
        self.load()
    }

    fn insert(&self, referral: &Referral) -> Result<(), StoreError> {
        let _guard = self.lock();
        self.ensure_dir()?;
        let line = serde_json::to_string(referral)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        writeln!(file, "{line}").map_err(|e| self.io_err(e))?;
        debug!("Appended referral {} to {}", referral.id_code, self.path.display());
        Ok(())
    }

    fn update(&self, referral: &Referral) -> Result<(), StoreError> {
        let _guard = self.lock();
        let mut records = self.load()?;
        let slot = records
            .iter_mut()
            .find(|r| r.id_code == referral.id_code)
            .ok_or_else(|| StoreError::NotFound(referral.id_code.clone()))?;
        *slot = referral.clone();
        self.rewrite(&records)
    }
}

/// Creates and edits referrals, owning ID code assignment.
pub struct ReferralService<R> {
    repo: R,
    // Held across latest() + insert() so two creations never read the same
    // previous code.
    create_lock: AsyncMutex<()>,
}

impl<R: ReferralRepository> ReferralService<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            create_lock: AsyncMutex::new(()),
        }
    }

    pub async fn create(&self, new: NewReferral) -> Result<Referral, StoreError> {
        let name = required(new.name, "name")?;
        let link = required(new.link, "link")?;

        let _guard = self.create_lock.lock().await;
        let latest = self.repo.latest()?;
        let id_code = next_code(latest.as_ref().map(|r| r.id_code.as_str()))?;

        let now = Utc::now();
        // Keep created_at strictly increasing so latest() is unambiguous.
        let created_at = match &latest {
            Some(prev) if prev.created_at >= now => prev.created_at + chrono::Duration::microseconds(1),
            _ => now,
        };

        let referral = Referral {
            id_code,
            name,
            code: non_blank(new.code),
            link,
            description: non_blank(new.description),
            created_at,
            updated_at: created_at,
        };
        self.repo.insert(&referral)?;
        info!("Created referral {} ({})", referral.id_code, referral.name);
        Ok(referral)
    }

    /// Apply an edit. The ID code and creation time are preserved.
    pub fn update(&self, id_code: &str, patch: ReferralPatch) -> Result<Referral, StoreError> {
        let mut referral = self
            .repo
            .get(id_code)?
            .ok_or_else(|| StoreError::NotFound(id_code.to_string()))?;

        if let Some(name) = patch.name {
            referral.name = required(name, "name")?;
        }
        if let Some(link) = patch.link {
            referral.link = required(link, "link")?;
        }
        if patch.code.is_some() {
            referral.code = non_blank(patch.code);
        }
        if patch.description.is_some() {
            referral.description = non_blank(patch.description);
        }
        referral.updated_at = Utc::now();

        self.repo.update(&referral)?;
        info!("Updated referral {}", referral.id_code);
        Ok(referral)
    }

    pub fn get(&self, id_code: &str) -> Result<Referral, StoreError> {
        self.repo
            .get(id_code)?
            .ok_or_else(|| StoreError::NotFound(id_code.to_string()))
    }

    /// All referrals, newest first.
    pub fn list(&self) -> Result<Vec<Referral>, StoreError> {
        let mut records = self.repo.list()?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

fn required(value: String, field: &str) -> Result<String, StoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Invalid(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
