// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Request envelope and blob descriptor policy (§4.E). Grounded on
// `tateyama::api::server::request` (original_source) for the
// session/payload/blob-list shape, with the access-policy table resolved
// the way `wire.h`'s companion status-provider validates paths: existence,
// regular-file, and read-access checks performed eagerly rather than
// deferred to the blob's first read.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{BlobErrorKind, IpcError, Result};

/// A blob reference attached to a request, naming a server-local file the
/// service is allowed to stream back without copying it through the wire.
#[derive(Debug, Clone)]
pub struct BlobDescriptor {
    pub channel_name: String,
    pub path: PathBuf,
    pub temporary: bool,
}

/// Checks a blob descriptor against the access-policy table (§4.E):
/// `not_allowed` when privileged (temporary-file) blobs are disabled by
/// configuration, `not_found`/`not_accessible`/`not_regular_file` from the
/// filesystem state of `descriptor.path`.
pub fn validate_blob(descriptor: &BlobDescriptor, allow_privileged: bool) -> Result<()> {
    if descriptor.temporary && !allow_privileged {
        return Err(IpcError::BlobPolicyViolation {
            kind: BlobErrorKind::NotAllowed,
            path: descriptor.path.display().to_string(),
        });
    }
    // `symlink_metadata` (not `metadata`) so a symlink is caught here even
    // when it resolves to a regular file (§4.E: "Not a regular file or is a
    // symlink" -> not_regular_file).
    let meta = std::fs::symlink_metadata(&descriptor.path).map_err(|_| {
        IpcError::BlobPolicyViolation {
            kind: BlobErrorKind::NotFound,
            path: descriptor.path.display().to_string(),
        }
    })?;
    if meta.file_type().is_symlink() || !meta.is_file() {
        return Err(IpcError::BlobPolicyViolation {
            kind: BlobErrorKind::NotRegularFile,
            path: descriptor.path.display().to_string(),
        });
    }
    std::fs::File::open(&descriptor.path).map_err(|_| IpcError::BlobPolicyViolation {
        kind: BlobErrorKind::NotAccessible,
        path: descriptor.path.display().to_string(),
    })?;
    Ok(())
}

/// One decoded client request (§4.E, §6.2's framework-header + service-body
/// envelope already stripped by `protocol::envelope`).
pub struct Request {
    session_id: u64,
    service_id: u64,
    /// Slot index this request's reply is addressed to on the response wire.
    index: u16,
    service_body: Vec<u8>,
    blobs: Vec<BlobDescriptor>,
    /// First blob-policy violation found among `blobs`, if any (§4.H:
    /// "if `req.blob_error` != ok, immediately writes a diagnostic and
    /// returns failure").
    blob_error: Option<(BlobErrorKind, String)>,
    cancelled: Arc<AtomicBool>,
}

impl Request {
    /// Construct a request and eagerly vet its blob descriptors against
    /// the access-policy table (§4.E), recording the first violation.
    pub fn new(
        session_id: u64,
        service_id: u64,
        index: u16,
        service_body: Vec<u8>,
        blobs: Vec<BlobDescriptor>,
        allow_blob_privileged: bool,
    ) -> Self {
        let blob_error = blobs
            .iter()
            .find_map(|b| match validate_blob(b, allow_blob_privileged) {
                Ok(()) => None,
                Err(IpcError::BlobPolicyViolation { kind, path }) => Some((kind, path)),
                Err(_) => None,
            });
        Self {
            session_id,
            service_id,
            index,
            service_body,
            blobs,
            blob_error,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn service_id(&self) -> u64 {
        self.service_id
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn payload(&self) -> &[u8] {
        &self.service_body
    }

    pub fn blobs(&self) -> &[BlobDescriptor] {
        &self.blobs
    }

    pub fn blob_error(&self) -> Option<&(BlobErrorKind, String)> {
        self.blob_error.as_ref()
    }

    pub fn find_blob(&self, channel_name: &str) -> Option<&BlobDescriptor> {
        self.blobs.iter().find(|b| b.channel_name == channel_name)
    }

    /// Shared cancellation flag, set by [`crate::response::Response::cancel`].
    pub(crate) fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Service code polls this periodically during long-running work.
    pub fn check_cancel(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Acquire) {
            Err(IpcError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_privileged_blob_when_disabled() {
        let desc = BlobDescriptor {
            channel_name: "out".into(),
            path: PathBuf::from("/tmp/does-not-matter"),
            temporary: true,
        };
        let err = validate_blob(&desc, false).unwrap_err();
        assert!(matches!(
            err,
            IpcError::BlobPolicyViolation { kind: BlobErrorKind::NotAllowed, .. }
        ));
    }

    #[test]
    fn rejects_missing_file() {
        let desc = BlobDescriptor {
            channel_name: "out".into(),
            path: PathBuf::from("/nonexistent/path/for/sure"),
            temporary: false,
        };
        let err = validate_blob(&desc, true).unwrap_err();
        assert!(matches!(
            err,
            IpcError::BlobPolicyViolation { kind: BlobErrorKind::NotFound, .. }
        ));
    }

    #[test]
    #[cfg(unix)]
    fn rejects_symlink_even_to_a_regular_file() {
        let dir = std::env::temp_dir().join(format!("ipc-blob-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let target = dir.join("real_file");
        let link = dir.join("link_to_real_file");
        std::fs::write(&target, b"hello").unwrap();
        let _ = std::fs::remove_file(&link);
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let desc = BlobDescriptor {
            channel_name: "out".into(),
            path: link.clone(),
            temporary: false,
        };
        let err = validate_blob(&desc, true).unwrap_err();
        assert!(matches!(
            err,
            IpcError::BlobPolicyViolation { kind: BlobErrorKind::NotRegularFile, .. }
        ));

        let _ = std::fs::remove_file(&link);
        let _ = std::fs::remove_file(&target);
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn check_cancel_reflects_token() {
        let req = Request::new(1, 100, 0, vec![], vec![], true);
        assert!(req.check_cancel().is_ok());
        req.cancel_token().store(true, Ordering::Release);
        assert!(matches!(req.check_cancel(), Err(IpcError::Cancelled)));
    }

    #[test]
    fn blob_error_surfaces_first_violation() {
        let desc = BlobDescriptor {
            channel_name: "out".into(),
            path: PathBuf::from("/nonexistent/path/for/sure"),
            temporary: false,
        };
        let req = Request::new(1, 100, 0, vec![], vec![desc], true);
        let (kind, _) = req.blob_error().expect("blob error recorded");
        assert_eq!(*kind, BlobErrorKind::NotFound);
    }

    #[test]
    fn blob_error_absent_without_blobs() {
        let req = Request::new(1, 100, 0, vec![], vec![], true);
        assert!(req.blob_error().is_none());
    }
}
