use std::collections::HashMap;
use std::io;
use std::path::Path;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Kernel tables consulted, relative to the procfs root.
pub const SOCKET_TABLES: [&str; 2] = ["net/tcp", "net/tcp6"];

/// `st` column value for TCP_LISTEN.
pub const LISTEN_STATE: &str = "0A";

const LOCAL_ADDRESS_COLUMN: usize = 1;
const STATE_COLUMN: usize = 3;
const INODE_COLUMN: usize = 9;
const MIN_COLUMNS: usize = 10;

/// Socket inode → local port, listening sockets only.
pub type InodePorts = HashMap<u64, u16>;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse one `/proc/net/tcp`-style table. The header row and any row that is
/// short, malformed, or not in the LISTEN state are skipped.
pub fn parse_socket_table(content: &str) -> InodePorts {
    let mut map = HashMap::new();
    for line in content.lines().skip(1) {
        if let Some((inode, port)) = parse_row(line) {
            map.insert(inode, port);
        }
    }
    map
}

fn parse_row(line: &str) -> Option<(u64, u16)> {
    let columns: Vec<&str> = line.split_whitespace().collect();
    if columns.len() < MIN_COLUMNS {
        return None;
    }
    if columns[STATE_COLUMN] != LISTEN_STATE {
        return None;
    }
    let (_addr, port_hex) = columns[LOCAL_ADDRESS_COLUMN].rsplit_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;
    let inode = columns[INODE_COLUMN].parse().ok()?;
    Some((inode, port))
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read and merge every table under `proc_root`. A table that is missing or
/// unreadable contributes nothing.
pub fn read_listening_sockets(proc_root: &Path) -> InodePorts {
    let mut merged = HashMap::new();
    for table in SOCKET_TABLES {
        let path = proc_root.join(table);
        match std::fs::read_to_string(&path) {
            Ok(content) => merged.extend(parse_socket_table(&content)),
            Err(e) if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ) =>
            {
                tracing::trace!(path = %path.display(), "socket table unavailable: {e}");
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), "failed to read socket table: {e}");
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode";

    fn table(rows: &[&str]) -> String {
        let mut s = String::from(HEADER);
        for row in rows {
            s.push('\n');
            s.push_str(row);
        }
        s
    }

    #[test]
    fn test_listening_rows_only() {
        let content = table(&[
            "   0: 00000000:1F40 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 111 1 0000000000000000 100 0 0 10 0",
            "   1: 0100007F:1F40 0100007F:9C4E 01 00000000:00000000 00:00000000 00000000  1000        0 222 1 0000000000000000 20 4 30 10 -1",
        ]);
        let map = parse_socket_table(&content);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&111), Some(&8000));
        assert_eq!(map.get(&222), None);
    }

    #[test]
    fn test_ipv6_local_address() {
        let content = table(&[
            "   0: 00000000000000000000000000000000:2328 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 333 1 0000000000000000 100 0 0 10 0",
        ]);
        assert_eq!(parse_socket_table(&content).get(&333), Some(&9000));
    }

    #[test]
    fn test_short_and_malformed_rows_skipped() {
        let content = table(&[
            "   0: 00000000:1F40 00000000:0000 0A",
            "   1: 00000000:ZZZZ 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 444 1",
            "   2: 00000000:1F41 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 notanum 1",
            "   3: 000000001F42 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 555 1",
            "   4: 00000000:1F43 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 666 1",
        ]);
        let map = parse_socket_table(&content);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&666), Some(&0x1F43));
    }

    #[test]
    fn test_header_only_is_empty() {
        assert!(parse_socket_table(HEADER).is_empty());
        assert!(parse_socket_table("").is_empty());
    }

    #[test]
    fn test_missing_tables_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_listening_sockets(dir.path()).is_empty());
    }

    #[test]
    fn test_tables_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("net")).unwrap();
        std::fs::write(
            dir.path().join("net/tcp"),
            table(&["   0: 00000000:1F40 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 111 1"]),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("net/tcp6"),
            table(&["   0: 00000000000000000000000000000000:1F41 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 112 1"]),
        )
        .unwrap();

        let map = read_listening_sockets(dir.path());
        assert_eq!(map.get(&111), Some(&8000));
        assert_eq!(map.get(&112), Some(&8001));
    }
}
