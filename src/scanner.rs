use crate::sockets::{self, InodePorts};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Token that marks a process as one of ours.
pub const PROGRAM_NAME: &str = "hserve";

pub const DEFAULT_PROC_ROOT: &str = "/proc";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub pid: u32,
    pub cmdline: Vec<String>,
    pub socket_inodes: Vec<u64>,
}

/// One managed process and every port it is listening on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInstance {
    pub pid: u32,
    pub ports: Vec<u16>,
}

/// Source of kernel process and socket state.
pub trait Introspect {
    fn listening_sockets(&self) -> InodePorts;

    /// Processes whose command line identifies them as `program`, with the
    /// socket inodes behind their open descriptors.
    fn candidates(&self, program: &str) -> Vec<Candidate>;
}

/// A process is ours when any command-line token contains `program`.
pub fn is_managed(cmdline: &[String], program: &str) -> bool {
    cmdline.iter().any(|token| token.contains(program))
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Every (pid, port) pair where a managed process holds a listening socket,
/// sorted and deduplicated.
pub fn discover<I: Introspect + ?Sized>(introspect: &I, program: &str) -> Vec<(u32, u16)> {
    let inode_ports = introspect.listening_sockets();
    if inode_ports.is_empty() {
        return Vec::new();
    }

    let mut pairs = BTreeSet::new();
    for candidate in introspect.candidates(program) {
        for inode in &candidate.socket_inodes {
            if let Some(&port) = inode_ports.get(inode) {
                pairs.insert((candidate.pid, port));
            }
        }
    }
    pairs.into_iter().collect()
}

pub fn filter_port(pairs: Vec<(u32, u16)>, port: Option<u16>) -> Vec<(u32, u16)> {
    match port {
        Some(wanted) => pairs.into_iter().filter(|&(_, p)| p == wanted).collect(),
        None => pairs,
    }
}

pub fn group_instances(pairs: &[(u32, u16)]) -> Vec<ServerInstance> {
    let mut grouped: BTreeMap<u32, BTreeSet<u16>> = BTreeMap::new();
    for &(pid, port) in pairs {
        grouped.entry(pid).or_default().insert(port);
    }
    grouped
        .into_iter()
        .map(|(pid, ports)| ServerInstance {
            pid,
            ports: ports.into_iter().collect(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// procfs provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from(DEFAULT_PROC_ROOT))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    fn read_candidate(&self, dir: &Path, pid: u32, program: &str) -> io::Result<Option<Candidate>> {
        let raw = fs::read(dir.join("cmdline"))?;
        let cmdline = split_cmdline(&raw);
        if !is_managed(&cmdline, program) {
            return Ok(None);
        }

        let mut socket_inodes = Vec::new();
        for entry in fs::read_dir(dir.join("fd"))? {
            let Ok(entry) = entry else { continue };
            // The descriptor may already be closed.
            let Ok(target) = fs::read_link(entry.path()) else {
                continue;
            };
            if let Some(inode) = parse_socket_link(&target.to_string_lossy()) {
                socket_inodes.push(inode);
            }
        }

        Ok(Some(Candidate {
            pid,
            cmdline,
            socket_inodes,
        }))
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Introspect for ProcFs {
    fn listening_sockets(&self) -> InodePorts {
        sockets::read_listening_sockets(&self.root)
    }

    fn candidates(&self, program: &str) -> Vec<Candidate> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(root = %self.root.display(), "cannot list processes: {e}");
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            match self.read_candidate(&entry.path(), pid, program) {
                Ok(Some(candidate)) => found.push(candidate),
                Ok(None) => {}
                Err(e) => tracing::trace!(pid, "skipping process: {e}"),
            }
        }
        found
    }
}

fn split_cmdline(raw: &[u8]) -> Vec<String> {
    raw.split(|&b| b == 0)
        .filter(|token| !token.is_empty())
        .map(|token| String::from_utf8_lossy(token).into_owned())
        .collect()
}

/// `socket:[12345]` → `12345`.
pub fn parse_socket_link(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}
