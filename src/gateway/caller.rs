// Keyward — Caller identification
//
// Identifies the process on the other end of the control socket from its
// peer credentials and a SHA-256 of `/proc/<pid>/exe`. The result is the
// audit actor for every request on that connection.

use std::fs;
use std::io;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

/// Actor used when the peer cannot be resolved.
pub const UNKNOWN_CALLER: &str = "uds-client";

#[derive(Debug, Clone)]
pub struct CallerInfo {
    pub pid: u32,
    pub uid: u32,
    pub exe_path: PathBuf,
    /// Hex SHA-256 of the caller's executable.
    pub exe_hash: String,
}

impl CallerInfo {
    pub fn from_pid(pid: u32, uid: u32) -> io::Result<Self> {
        let exe_path = fs::read_link(format!("/proc/{}/exe", pid))?;
        let exe_hash = hex::encode(Sha256::digest(fs::read(&exe_path)?));

        Ok(Self {
            pid,
            uid,
            exe_path,
            exe_hash,
        })
    }

    /// Resolve the peer of a connected socket. `None` off Linux or when
    /// `/proc` is unreadable.
    pub fn from_stream(stream: &tokio::net::UnixStream) -> Option<Self> {
        #[cfg(target_os = "linux")]
        {
            let cred = stream.peer_cred().ok()?;
            let pid = u32::try_from(cred.pid()?).ok()?;
            Self::from_pid(pid, cred.uid()).ok()
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = stream;
            None
        }
    }

    pub fn actor_string(&self) -> String {
        let exe = self
            .exe_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.exe_path.display().to_string());
        format!("uid:{} {}@{}", self.uid, exe, &self.exe_hash[..16])
    }
}

impl std::fmt::Display for CallerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PID {} uid {} ({}) [{}…]",
            self.pid,
            self.uid,
            self.exe_path.display(),
            &self.exe_hash[..16]
        )
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
