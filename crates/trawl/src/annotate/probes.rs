//! Per-file probes: owner lookup and content digests.

use super::result::ContentDigest;
use crate::error::{Result, TrawlError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Read buffer for hashing (4 MiB)
const DIGEST_BUFFER_SIZE: usize = 4 * 1024 * 1024;

pub const DIGEST_ALGORITHM: &str = "sha256";

/// Resolves the owning principal of a file.
pub trait OwnerResolver: Send + Sync {
    fn resolve_owner(&self, physical: &Path) -> Result<String>;
}

/// Owner lookup through the operating system's user database.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsOwnerResolver;

#[cfg(unix)]
impl OwnerResolver for OsOwnerResolver {
    fn resolve_owner(&self, physical: &Path) -> Result<String> {
        use std::os::unix::fs::MetadataExt;

        let uid = std::fs::symlink_metadata(physical)?.uid();
        user_name(uid).ok_or_else(|| TrawlError::Probe {
            path: physical.display().to_string(),
            message: format!("no user entry for uid {}", uid),
        })
    }
}

#[cfg(not(unix))]
impl OwnerResolver for OsOwnerResolver {
    fn resolve_owner(&self, physical: &Path) -> Result<String> {
        Err(TrawlError::Probe {
            path: physical.display().to_string(),
            message: "owner lookup is not supported on this platform".to_string(),
        })
    }
}

#[cfg(unix)]
fn user_name(uid: u32) -> Option<String> {
    let mut buf = vec![0 as libc::c_char; 4096];
    // SAFETY: passwd is plain data; getpwuid_r fills it and points its
    // strings into `buf`, which outlives every read below.
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut found: *mut libc::passwd = std::ptr::null_mut();
    let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut found) };
    if rc != 0 || found.is_null() || pwd.pw_name.is_null() {
        return None;
    }
    let name = unsafe { std::ffi::CStr::from_ptr(pwd.pw_name) };
    Some(name.to_string_lossy().into_owned())
}

/// Whether and how file contents are digested.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestPolicy {
    pub enabled: bool,
}

impl DigestPolicy {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// `Ok(None)` means "not computed": hashing is disabled.
    pub fn digest(&self, physical: &Path) -> Result<Option<ContentDigest>> {
        if !self.enabled {
            return Ok(None);
        }
        digest_file(physical).map(Some)
    }
}

/// SHA-256 of a whole file, streamed.
pub fn digest_file(physical: &Path) -> Result<ContentDigest> {
    let file = File::open(physical).map_err(|e| TrawlError::Probe {
        path: physical.display().to_string(),
        message: format!("open for hashing: {}", e),
    })?;
    let mut reader = BufReader::with_capacity(DIGEST_BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(ContentDigest {
        algorithm: DIGEST_ALGORITHM.to_string(),
        value: hasher.finalize().to_vec(),
    })
}
