//! Pre-submission validation of ticket attachments.
//!
//! Candidates are checked in a fixed order: duplicate, too large, unsupported
//! type, then the per-ticket file limit. The limit is evaluated once per
//! [`AttachmentStagingBuffer::add`] call against the count staged before the
//! call, and accepted candidates keep their input order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use mime_guess::MimeGuess;

/// Largest accepted file, in bytes (10 MiB).
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Most files a ticket can carry.
pub const MAX_FILES: usize = 3;

/// Accepted MIME types.
pub const ACCEPTED_TYPES: &[&str] = &["image/jpeg", "image/png", "application/pdf"];

/// Identity of a candidate file: name, size and modification time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentKey {
    pub name: String,
    pub byte_size: u64,
    pub last_modified: i64,
}

impl std::fmt::Display for AttachmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}__{}__{}", self.name, self.byte_size, self.last_modified)
    }
}

/// Where the attachment's bytes live.
#[derive(Debug, Clone)]
pub enum AttachmentSource {
    Path(PathBuf),
    Memory(Arc<[u8]>),
}

/// A file offered for upload.
#[derive(Debug, Clone)]
pub struct StagedAttachment {
    pub name: String,
    pub byte_size: u64,
    pub mime_type: String,
    /// Modification time, milliseconds since the Unix epoch.
    pub last_modified: i64,
    pub source: AttachmentSource,
}

impl StagedAttachment {
    /// Attachment held in memory.
    #[must_use]
    pub fn from_bytes(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        last_modified: i64,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        Self {
            name: name.into(),
            byte_size: bytes.len() as u64,
            mime_type: mime_type.into(),
            last_modified,
            source: AttachmentSource::Memory(bytes),
        }
    }

    /// Attachment backed by a file on disk.
    ///
    /// Size and modification time come from the file's metadata; the MIME
    /// type is inferred from the extension and left empty when unknown, which
    /// validation then rejects.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the file's metadata cannot be read.
    pub fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)?;
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .and_then(|since| i64::try_from(since.as_millis()).ok())
            .unwrap_or_default();
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        Ok(Self {
            name,
            byte_size: metadata.len(),
            mime_type: mime_from_extension(&path).unwrap_or_default(),
            last_modified,
            source: AttachmentSource::Path(path),
        })
    }

    #[must_use]
    pub fn key(&self) -> AttachmentKey {
        AttachmentKey {
            name: self.name.clone(),
            byte_size: self.byte_size,
            last_modified: self.last_modified,
        }
    }

    /// Load the attachment's bytes for upload.
    ///
    /// # Errors
    ///
    /// Returns the IO error if a file-backed attachment cannot be read.
    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        match &self.source {
            AttachmentSource::Path(path) => tokio::fs::read(path).await,
            AttachmentSource::Memory(bytes) => Ok(bytes.to_vec()),
        }
    }
}

/// Why a candidate was not staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    Duplicate,
    TooLarge,
    UnsupportedType,
    LimitReached,
}

/// A candidate that was not staged.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub attachment: StagedAttachment,
    pub reason: RejectionReason,
    /// Free slots when the call started; used by the limit message.
    pub capacity: usize,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = &self.attachment.name;
        match self.reason {
            RejectionReason::Duplicate => write!(f, "{name} already added"),
            RejectionReason::TooLarge => write!(f, "{name} is too large. Max is 10MB."),
            RejectionReason::UnsupportedType => {
                write!(f, "{name} is not allowed. Use JPG, PNG, or PDF.")
            }
            RejectionReason::LimitReached => f.write_str(&limit_message(self.capacity)),
        }
    }
}

fn limit_message(capacity: usize) -> String {
    match capacity {
        0 => format!("Limit is {MAX_FILES} files"),
        1 => "Only 1 more file allowed".to_string(),
        n => format!("Only {n} more files allowed"),
    }
}

/// Result of one [`AttachmentStagingBuffer::add`] call.
#[derive(Debug, Clone, Default)]
pub struct StagingOutcome {
    pub accepted: Vec<StagedAttachment>,
    pub rejected: Vec<Rejection>,
}

impl StagingOutcome {
    /// One user-facing message per rejection, limit messages collapsed.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        let mut limit_reported = false;
        for rejection in &self.rejected {
            if rejection.reason == RejectionReason::LimitReached {
                if limit_reported {
                    continue;
                }
                limit_reported = true;
            }
            messages.push(rejection.to_string());
        }
        messages
    }
}

/// Decide which `candidates` can join `staged`, without modifying anything.
#[must_use]
pub fn plan(
    staged: &[StagedAttachment],
    candidates: impl IntoIterator<Item = StagedAttachment>,
) -> StagingOutcome {
    let capacity = MAX_FILES.saturating_sub(staged.len());
    let mut seen: HashSet<AttachmentKey> = staged.iter().map(StagedAttachment::key).collect();
    let mut outcome = StagingOutcome::default();

    for candidate in candidates {
        let reason = if !seen.insert(candidate.key()) {
            Some(RejectionReason::Duplicate)
        } else if candidate.byte_size > MAX_FILE_SIZE {
            Some(RejectionReason::TooLarge)
        } else if !ACCEPTED_TYPES.contains(&candidate.mime_type.as_str()) {
            Some(RejectionReason::UnsupportedType)
        } else if outcome.accepted.len() >= capacity {
            Some(RejectionReason::LimitReached)
        } else {
            None
        };

        match reason {
            Some(reason) => outcome.rejected.push(Rejection {
                attachment: candidate,
                reason,
                capacity,
            }),
            None => outcome.accepted.push(candidate),
        }
    }

    outcome
}

/// Files staged for the next ticket.
///
/// Never holds more than [`MAX_FILES`] members, never two with the same
/// [`AttachmentKey`], and every member passes the size and type checks.
#[derive(Debug, Clone, Default)]
pub struct AttachmentStagingBuffer {
    staged: Vec<StagedAttachment>,
}

impl AttachmentStagingBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `candidates` and stage the accepted ones.
    pub fn add(
        &mut self,
        candidates: impl IntoIterator<Item = StagedAttachment>,
    ) -> StagingOutcome {
        let outcome = plan(&self.staged, candidates);
        self.staged.extend(outcome.accepted.iter().cloned());
        outcome
    }

    /// Unstage the attachment with `key`.
    pub fn remove(&mut self, key: &AttachmentKey) -> Option<StagedAttachment> {
        let index = self.staged.iter().position(|a| &a.key() == key)?;
        Some(self.staged.remove(index))
    }

    pub fn clear(&mut self) {
        self.staged.clear();
    }

    #[must_use]
    pub fn staged(&self) -> &[StagedAttachment] {
        &self.staged
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    #[must_use]
    pub fn remaining_slots(&self) -> usize {
        MAX_FILES.saturating_sub(self.staged.len())
    }

    /// Copy of the staged set for a submission; the buffer is kept until the
    /// submission succeeds.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StagedAttachment> {
        self.staged.clone()
    }
}

/// Human-readable size with two decimals: `0 B`, `1.50 KB`, `10.00 MB`.
#[must_use]
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    #[allow(clippy::cast_precision_loss)] // File sizes stay well inside f64 precision
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{value:.2} {}", UNITS.get(unit).copied().unwrap_or("GB"))
}

/// MIME type guessed from a path's extension.
#[must_use]
pub fn mime_from_extension(path: &Path) -> Option<String> {
    MimeGuess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
}
