// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Container-ID resolution for unix-socket clients via `SO_PEERCRED`.
//!
//! On Linux, a unix-domain client does not send a `Datadog-Container-ID`
//! header the way a TCP client would, so the receiver instead reads the
//! peer's pid off the socket and looks up its cgroup membership, caching
//! the result for a minute since resolving it requires a filesystem read.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const CACHE_TTL: Duration = Duration::from_secs(60);

const UUID_SOURCE: &str = r"[0-9a-f]{8}[-_][0-9a-f]{4}[-_][0-9a-f]{4}[-_][0-9a-f]{4}[-_][0-9a-f]{12}";
const CONTAINER_SOURCE: &str = r"[0-9a-f]{64}";
const TASK_SOURCE: &str = r"[0-9a-f]{32}-\d+";

lazy_static! {
    static ref LINE_REGEX: Regex = Regex::new(r"^\d+:[^:]*:(.+)$").unwrap();
    static ref CONTAINER_REGEX: Regex =
        Regex::new(&format!(r"({UUID_SOURCE}|{CONTAINER_SOURCE}|{TASK_SOURCE})(?:.scope)? *$"))
            .unwrap();
}

fn parse_line(line: &str) -> Option<&str> {
    LINE_REGEX
        .captures(line)
        .and_then(|captures| CONTAINER_REGEX.captures(captures.get(1).unwrap().as_str()))
        .map(|captures| captures.get(1).unwrap().as_str())
}

/// Reads `/proc/<pid>/cgroup` and extracts the container id, if any.
#[cfg(target_os = "linux")]
fn container_id_for_pid(pid: i32) -> Option<String> {
    use std::io::BufRead;
    let path = format!("/proc/{pid}/cgroup");
    let file = std::fs::File::open(path).ok()?;
    let reader = std::io::BufReader::new(file);
    for line in reader.lines() {
        let line = line.ok()?;
        if let Some(id) = parse_line(&line) {
            return Some(id.to_string());
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn container_id_for_pid(_pid: i32) -> Option<String> {
    None
}

/// Peer credentials captured at unix-socket connection establishment.
#[derive(Debug, Clone, Copy)]
pub struct PeerCred {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// Stashed on a request's extensions by the unix-socket accept loop so handlers can resolve a
/// container id without threading the raw socket through.
#[derive(Debug, Clone, Copy)]
pub struct PeerPid(pub i32);

#[cfg(target_os = "linux")]
pub fn peer_credentials(stream: &tokio::net::UnixStream) -> std::io::Result<PeerCred> {
    use std::os::fd::AsRawFd;
    let ucred = nix::sys::socket::getsockopt(
        &std::os::fd::BorrowedFd::borrow_raw(stream.as_raw_fd()),
        nix::sys::socket::sockopt::PeerCredentials,
    )
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(PeerCred {
        pid: ucred.pid(),
        uid: ucred.uid(),
        gid: ucred.gid(),
    })
}

#[cfg(not(target_os = "linux"))]
pub fn peer_credentials(_stream: &tokio::net::UnixStream) -> std::io::Result<PeerCred> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "SO_PEERCRED is only resolved on Linux",
    ))
}

/// A TTL cache from pid to resolved container id, generationally cleared
/// once per TTL rather than per-entry (cheaper: one clear of the whole map).
pub struct ContainerIdCache {
    entries: Mutex<HashMap<i32, String>>,
    last_clear: Mutex<Instant>,
}

impl Default for ContainerIdCache {
    fn default() -> Self {
        ContainerIdCache {
            entries: Mutex::new(HashMap::new()),
            last_clear: Mutex::new(Instant::now()),
        }
    }
}

impl ContainerIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the container id for a unix-socket peer: header value if one
    /// was already provided, else `SO_PEERCRED` + cgroup lookup (Linux only),
    /// cached for a minute.
    pub fn resolve(&self, pid: i32) -> Option<String> {
        self.maybe_clear();
        {
            let entries = self.entries.lock().unwrap();
            if let Some(id) = entries.get(&pid) {
                return Some(id.clone());
            }
        }
        let resolved = container_id_for_pid(pid)?;
        self.entries.lock().unwrap().insert(pid, resolved.clone());
        Some(resolved)
    }

    fn maybe_clear(&self) {
        let mut last_clear = self.last_clear.lock().unwrap();
        if last_clear.elapsed() >= CACHE_TTL {
            self.entries.lock().unwrap().clear();
            *last_clear = Instant::now();
        }
    }
}
