// Linux procfs parsers: /proc/diskstats, /proc/net/tcp{,6}, /proc/mounts.
// Parsers are pure; readers return io errors so callers can tell a dead channel from an empty one.

use std::io;

pub(crate) const DISKSTATS_PATH: &str = "/proc/diskstats";
pub(crate) const MOUNTS_PATH: &str = "/proc/mounts";
const TCP_TABLES: [&str; 2] = ["/proc/net/tcp", "/proc/net/tcp6"];

const TCP_ESTABLISHED: u8 = 0x01;
const TCP_LISTEN: u8 = 0x0A;

/// Aggregate over whole disks (the "_Total" instance).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DiskTotals {
    pub reads: u64,
    pub writes: u64,
    pub in_flight: u64,
}

/// Sum completed reads/writes and in-flight I/Os across whole disks.
/// Partitions, loop, ram and device-mapper entries are skipped so nothing is counted twice.
pub(crate) fn parse_diskstats(content: &str) -> DiskTotals {
    let mut totals = DiskTotals::default();
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 12 || !is_whole_disk(parts[2]) {
            continue;
        }
        let field = |i: usize| parts[i].parse::<u64>().unwrap_or(0);
        totals.reads = totals.reads.saturating_add(field(3));
        totals.writes = totals.writes.saturating_add(field(7));
        totals.in_flight = totals.in_flight.saturating_add(field(11));
    }
    totals
}

fn is_whole_disk(name: &str) -> bool {
    const VIRTUAL: [&str; 6] = ["loop", "ram", "zram", "dm-", "md", "sr"];
    if VIRTUAL.iter().any(|p| name.starts_with(p)) {
        return false;
    }
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        // nvme0n1p2 / mmcblk0p1 are partitions
        return match name.rsplit_once('p') {
            Some((head, tail)) => {
                !(head.ends_with(|c: char| c.is_ascii_digit())
                    && !tail.is_empty()
                    && tail.chars().all(|c| c.is_ascii_digit()))
            }
            None => true,
        };
    }
    !name.ends_with(|c: char| c.is_ascii_digit())
}

pub(crate) fn read_disk_totals() -> io::Result<DiskTotals> {
    let content = std::fs::read_to_string(DISKSTATS_PATH)?;
    Ok(parse_diskstats(&content))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TcpCounts {
    pub established: u64,
    /// Every socket except listeners.
    pub total: u64,
}

/// Count sockets in a /proc/net/tcp table, optionally only those bound to `local_port`.
pub(crate) fn parse_tcp_table(content: &str, local_port: Option<u16>) -> TcpCounts {
    let mut counts = TcpCounts::default();
    for line in content.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let (Some(_sl), Some(local), Some(_remote), Some(state)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let Ok(state) = u8::from_str_radix(state, 16) else {
            continue;
        };
        if state == TCP_LISTEN {
            continue;
        }
        if let Some(port) = local_port {
            let parsed = local
                .rsplit_once(':')
                .and_then(|(_, p)| u16::from_str_radix(p, 16).ok());
            if parsed != Some(port) {
                continue;
            }
        }
        counts.total += 1;
        if state == TCP_ESTABLISHED {
            counts.established += 1;
        }
    }
    counts
}

/// Sum over the IPv4 and IPv6 tables. Fails only when neither table can be read.
pub(crate) fn read_tcp_counts(local_port: Option<u16>) -> io::Result<TcpCounts> {
    let mut counts = TcpCounts::default();
    let mut last_err = None;
    let mut any_read = false;
    for path in TCP_TABLES {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                any_read = true;
                let c = parse_tcp_table(&content, local_port);
                counts.established += c.established;
                counts.total += c.total;
            }
            Err(e) => last_err = Some(e),
        }
    }
    match (any_read, last_err) {
        (false, Some(e)) => Err(e),
        _ => Ok(counts),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MountEntry {
    pub source: String,
    pub target: String,
    pub fstype: String,
}

pub(crate) fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            Some(MountEntry {
                source: unescape_mount_field(fields.next()?),
                target: unescape_mount_field(fields.next()?),
                fstype: fields.next()?.to_string(),
            })
        })
        .collect()
}

/// /proc/mounts escapes space, tab, newline and backslash as \ooo.
fn unescape_mount_field(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let v = u32::from(bytes[i + 1] - b'0') * 64
                + u32::from(bytes[i + 2] - b'0') * 8
                + u32::from(bytes[i + 3] - b'0');
            out.push(v as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub(crate) fn read_mounts() -> io::Result<Vec<MountEntry>> {
    let content = std::fs::read_to_string(MOUNTS_PATH)?;
    Ok(parse_mounts(&content))
}

/// Host behind a network mount source: `//host/share` (CIFS) or `host:/export` (NFS).
pub(crate) fn share_host(source: &str) -> Option<String> {
    if let Some(rest) = source.strip_prefix("//") {
        let host = rest.split('/').next()?;
        return (!host.is_empty()).then(|| host.to_string());
    }
    if source.starts_with('/') {
        return None;
    }
    let (host, path) = source.split_once(':')?;
    (!host.is_empty() && path.starts_with('/')).then(|| host.to_string())
}
