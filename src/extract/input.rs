//! Input resolution: a user-supplied path (or byte buffer) to a validated
//! [`RawDocument`].
//!
//! We validate the PDF magic bytes (`%PDF`) before handing anything to
//! pdfium so callers get a meaningful error rather than a parser crash,
//! and fingerprint the head of the file so downstream caching and the
//! rate limiter's failed-file bookkeeping have a stable identifier even
//! when the same document arrives under different names.

use crate::error::InvoiceError;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Bytes hashed for the content fingerprint. The head of a PDF (header,
/// first objects) is enough to discriminate real-world documents and keeps
/// hashing constant-time for large scans.
const FINGERPRINT_PREFIX_LEN: usize = 8192;

/// An invoice file read into memory. Immutable once constructed.
#[derive(Debug)]
pub struct RawDocument {
    path: PathBuf,
    bytes: Vec<u8>,
    fingerprint: String,
    /// Keeps a temp file alive for byte-buffer inputs until the document
    /// is dropped.
    _temp: Option<NamedTempFile>,
}

impl RawDocument {
    /// Read and validate a PDF from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, InvoiceError> {
        let path = path.as_ref().to_path_buf();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(InvoiceError::FileNotFound { path });
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(InvoiceError::PermissionDenied { path });
            }
            Err(e) => {
                return Err(InvoiceError::Internal(format!(
                    "failed to read '{}': {e}",
                    path.display()
                )));
            }
        };
        Self::validate(path, bytes)
    }

    /// Wrap an in-memory PDF, writing it to a managed temp file so pdfium
    /// (which needs a filesystem path) can open it. The temp file is
    /// removed when the document is dropped.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InvoiceError> {
        let mut temp = NamedTempFile::new()
            .map_err(|e| InvoiceError::Internal(format!("tempfile: {e}")))?;
        temp.write_all(bytes)
            .map_err(|e| InvoiceError::Internal(format!("tempfile write: {e}")))?;
        let path = temp.path().to_path_buf();
        let mut doc = Self::validate(path, bytes.to_vec())?;
        doc._temp = Some(temp);
        Ok(doc)
    }

    fn validate(path: PathBuf, bytes: Vec<u8>) -> Result<Self, InvoiceError> {
        if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
            let mut magic = [0u8; 4];
            let n = bytes.len().min(4);
            magic[..n].copy_from_slice(&bytes[..n]);
            return Err(InvoiceError::NotAPdf { path, magic });
        }

        let fingerprint = fingerprint(&bytes);
        debug!(path = %path.display(), %fingerprint, size = bytes.len(), "document loaded");

        Ok(Self {
            path,
            bytes,
            fingerprint,
            _temp: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Opaque content fingerprint, stable across reads of the same file.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Identifier used for throttling bookkeeping and log lines: the path
    /// as given by the caller.
    pub fn id(&self) -> String {
        self.path.display().to_string()
    }
}

fn fingerprint(bytes: &[u8]) -> String {
    let head = &bytes[..bytes.len().min(FINGERPRINT_PREFIX_LEN)];
    let mut hasher = Sha256::new();
    hasher.update(head);
    hasher.update((bytes.len() as u64).to_le_bytes());
    hex::encode(hasher.finalize())
}
