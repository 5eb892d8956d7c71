// One-shot ICMP echo via the system ping tool.

use crate::host::linux;
use std::net::IpAddr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct LatencyProbe {
    timeout: Duration,
}

impl LatencyProbe {
    /// `timeout` bounds the whole echo including process start; keep it sub-second.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Round-trip time in ms, or None on any failure (unreachable, timeout, unparsable output).
    #[instrument(skip(self), fields(probe = "latency", operation = "ping"))]
    pub async fn ping(&self, target: &str) -> Option<f64> {
        let mut cmd = Command::new("ping");
        cmd.args(ping_args(target, self.timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "ping spawn failed");
                return None;
            }
            Err(_) => {
                tracing::debug!(timeout_ms = self.timeout.as_millis() as u64, "ping timed out");
                return None;
            }
        };
        if !output.status.success() {
            return None;
        }
        parse_round_trip_ms(&String::from_utf8_lossy(&output.stdout))
    }
}

fn ping_args(target: &str, timeout: Duration) -> Vec<String> {
    if cfg!(windows) {
        vec![
            "-n".into(),
            "1".into(),
            "-w".into(),
            timeout.as_millis().max(1).to_string(),
            target.into(),
        ]
    } else {
        // -W takes whole seconds on most ping builds; the outer timeout enforces the real bound
        vec![
            "-c".into(),
            "1".into(),
            "-W".into(),
            timeout.as_secs().max(1).to_string(),
            target.into(),
        ]
    }
}

/// Extract the number after `time=` or `time<` (e.g. "time=0.431 ms", "time<1ms").
pub fn parse_round_trip_ms(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let idx = line.find("time=").or_else(|| line.find("time<"))?;
        let rest = &line[idx + 5..];
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        rest[..end].parse::<f64>().ok()
    })
}

pub fn is_loopback_target(target: &str) -> bool {
    target.eq_ignore_ascii_case("localhost")
        || target
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

/// Replace a loopback target with the host behind the network mount at `mount_point`.
/// Falls back to the configured target when no mapping exists.
pub fn resolve_target(configured: &str, mount_point: &Path) -> String {
    if !is_loopback_target(configured) {
        return configured.to_string();
    }
    match linux::read_mounts() {
        Ok(mounts) => discover_share_host(&mounts, mount_point).unwrap_or_else(|| {
            tracing::debug!(target = %configured, "no share mapping found, keeping loopback target");
            configured.to_string()
        }),
        Err(_) => configured.to_string(),
    }
}

fn discover_share_host(mounts: &[linux::MountEntry], mount_point: &Path) -> Option<String> {
    let by_target = mounts
        .iter()
        .filter(|m| Path::new(&m.target) == mount_point)
        .find_map(|m| linux::share_host(&m.source));
    by_target.or_else(|| {
        mounts
            .iter()
            .filter(|m| matches!(m.fstype.as_str(), "cifs" | "smb3" | "nfs" | "nfs4"))
            .find_map(|m| linux::share_host(&m.source))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_ping_output() {
        let out = "PING nas01 (10.0.0.5) 56(84) bytes of data.\n\
                   64 bytes from 10.0.0.5: icmp_seq=1 ttl=64 time=0.431 ms\n\
                   \n--- nas01 ping statistics ---\n";
        assert_eq!(parse_round_trip_ms(out), Some(0.431));
    }

    #[test]
    fn parses_windows_ping_output() {
        assert_eq!(
            parse_round_trip_ms("Reply from 10.0.0.5: bytes=32 time=12ms TTL=128"),
            Some(12.0)
        );
        assert_eq!(
            parse_round_trip_ms("Reply from 10.0.0.5: bytes=32 time<1ms TTL=128"),
            Some(1.0)
        );
    }

    #[test]
    fn parse_miss_is_none() {
        assert_eq!(parse_round_trip_ms("Request timed out."), None);
        assert_eq!(parse_round_trip_ms(""), None);
    }

    #[test]
    fn loopback_detection() {
        assert!(is_loopback_target("127.0.0.1"));
        assert!(is_loopback_target("::1"));
        assert!(is_loopback_target("LOCALHOST"));
        assert!(!is_loopback_target("10.0.0.5"));
        assert!(!is_loopback_target("nas01"));
    }

    #[test]
    fn discovers_host_behind_mount() {
        let mounts = linux::parse_mounts(
            "/dev/sda1 / ext4 rw 0 0\n//nas01/division /mnt/nas cifs rw 0 0\n",
        );
        assert_eq!(
            discover_share_host(&mounts, Path::new("/mnt/nas")).as_deref(),
            Some("nas01")
        );
    }

    #[test]
    fn discovery_falls_back_to_any_network_mount() {
        let mounts = linux::parse_mounts("10.0.0.9:/export /srv/data nfs4 rw 0 0\n");
        assert_eq!(
            discover_share_host(&mounts, Path::new("/mnt/nas")).as_deref(),
            Some("10.0.0.9")
        );
    }

    #[test]
    fn non_loopback_target_is_kept() {
        assert_eq!(resolve_target("nas01", Path::new("/mnt/nas")), "nas01");
    }

    #[tokio::test]
    async fn unreachable_target_is_none() {
        let probe = LatencyProbe::new(Duration::from_millis(300));
        // TEST-NET-1, never routed
        assert_eq!(probe.ping("192.0.2.1").await, None);
    }
}
