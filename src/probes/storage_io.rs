// Timed file I/O against the mounted volume: throughput (MB/s) and IOPS.
//
// Artifacts on the volume:
//   .nasmon-read-probe.bin     fixed name, shared by every probe, replaced atomically via rename
//   .nasmon-probe-<uuid>.tmp   one per write measurement, removed on every exit path (ScratchFile)
//
// Probes only run against a root that is a mount target. A bare mount-point directory left
// behind by a dropped share would otherwise be measured as the local disk.

use crate::host;
use crate::models::{Iops, Throughput, WriteTest, round2};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::instrument;

/// Every file the probes leave on the volume starts with this.
pub const ARTIFACT_PREFIX: &str = ".nasmon-";
const READ_ARTIFACT: &str = ".nasmon-read-probe.bin";
const SCRATCH_PREFIX: &str = ".nasmon-probe-";
const CHUNK_BYTES: usize = 1024 * 1024;
const WRITE_TEST_BYTES: usize = 4096;
const BYTES_PER_MB: f64 = 1_048_576.0;

/// Read/write IOPS measured at most once per aggregation pass.
/// Create one per pass and hand it to every `measure_iops` call in that pass.
#[derive(Debug, Default)]
pub struct IopsPass {
    read: OnceCell<Option<f64>>,
    write: OnceCell<Option<f64>>,
}

impl IopsPass {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What one stat of the volume root found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeState {
    /// The root is a directory that answered within the deadline.
    pub present: bool,
    /// The root is a mount target. Assumed when the mount table cannot be read.
    pub mounted: bool,
    /// Probes may run: present, and mounted unless the mount check is disabled.
    pub reachable: bool,
}

#[derive(Debug, Clone)]
pub struct StorageIoProbe {
    root: PathBuf,
    throughput_bytes: usize,
    iops_operations: u32,
    iops_block_size: usize,
    io_timeout: Duration,
    reach_timeout: Duration,
    require_mount: bool,
}

impl StorageIoProbe {
    pub fn new(
        root: PathBuf,
        throughput_bytes: usize,
        iops_operations: u32,
        iops_block_size: usize,
        io_timeout: Duration,
        reach_timeout: Duration,
    ) -> Self {
        Self {
            root,
            throughput_bytes,
            iops_operations,
            iops_block_size,
            io_timeout,
            reach_timeout,
            require_mount: true,
        }
    }

    /// Treat any directory as the volume, mounted or not (local shares, tests).
    pub fn allow_unmounted(mut self) -> Self {
        self.require_mount = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stat of the volume root plus a mount table lookup, under a short deadline. No data I/O.
    #[instrument(skip(self), fields(probe = "storage_io", operation = "volume_state"))]
    pub async fn volume_state(&self) -> VolumeState {
        let root = self.root.clone();
        let check = tokio::task::spawn_blocking(move || {
            let present = std::fs::metadata(&root).map(|m| m.is_dir()).unwrap_or(false);
            let mounted = present
                && host::is_mount_target(&root).unwrap_or_else(|e| {
                    tracing::debug!(error = %e, "mount table unreadable, assuming mounted");
                    true
                });
            (present, mounted)
        });
        let (present, mounted) = match tokio::time::timeout(self.reach_timeout, check).await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "volume check task failed");
                (false, false)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.reach_timeout.as_millis() as u64,
                    "volume check timed out"
                );
                (false, false)
            }
        };
        VolumeState {
            present,
            mounted,
            reachable: present && (mounted || !self.require_mount),
        }
    }

    pub async fn is_reachable(&self) -> bool {
        self.volume_state().await.reachable
    }

    #[instrument(skip(self), fields(probe = "storage_io", operation = "measure_throughput"))]
    pub async fn measure_throughput(&self) -> Throughput {
        if !self.is_reachable().await {
            return Throughput::default();
        }
        let (root, bytes) = (self.root.clone(), self.throughput_bytes);
        let write_mbps = self
            .run_blocking("write throughput", move || write_throughput(&root, bytes))
            .await;
        let (root, bytes) = (self.root.clone(), self.throughput_bytes);
        let read_mbps = self
            .run_blocking("read throughput", move || read_throughput(&root, bytes))
            .await;
        Throughput {
            read_mbps,
            write_mbps,
        }
    }

    /// Both directions come from `pass`; the first call in a pass measures, later calls reuse.
    #[instrument(skip(self, pass), fields(probe = "storage_io", operation = "measure_iops"))]
    pub async fn measure_iops(&self, pass: &IopsPass) -> Iops {
        let read_iops = *pass
            .read
            .get_or_init(|| async move {
                if !self.is_reachable().await {
                    return None;
                }
                let root = self.root.clone();
                let (ops, block) = (self.iops_operations, self.iops_block_size);
                let artifact_bytes = self.throughput_bytes.max(block);
                self.run_blocking("read iops", move || {
                    read_iops(&root, ops, block, artifact_bytes)
                })
                .await
            })
            .await;
        let write_iops = *pass
            .write
            .get_or_init(|| async move {
                if !self.is_reachable().await {
                    return None;
                }
                let root = self.root.clone();
                let (ops, block) = (self.iops_operations, self.iops_block_size);
                self.run_blocking("write iops", move || write_iops(&root, ops, block))
                    .await
            })
            .await;
        Iops {
            read_iops,
            write_iops,
        }
    }

    /// Write, sync, read back and delete a small file.
    #[instrument(skip(self), fields(probe = "storage_io", operation = "test_write"))]
    pub async fn test_write(&self) -> WriteTest {
        if !self.is_reachable().await {
            return WriteTest {
                writable: false,
                duration_ms: None,
                error: Some(format!("{} is not reachable", self.root.display())),
            };
        }
        let root = self.root.clone();
        let task = tokio::task::spawn_blocking(move || write_roundtrip(&root));
        match tokio::time::timeout(self.io_timeout, task).await {
            Ok(Ok(Ok(ms))) => WriteTest {
                writable: true,
                duration_ms: Some(round2(ms)),
                error: None,
            },
            Ok(Ok(Err(e))) => WriteTest {
                writable: false,
                duration_ms: None,
                error: Some(e.to_string()),
            },
            Ok(Err(e)) => WriteTest {
                writable: false,
                duration_ms: None,
                error: Some(format!("write test task: {}", e)),
            },
            Err(_) => WriteTest {
                writable: false,
                duration_ms: None,
                error: Some("write test timed out".into()),
            },
        }
    }

    async fn run_blocking<F>(&self, operation: &'static str, f: F) -> Option<f64>
    where
        F: FnOnce() -> io::Result<f64> + Send + 'static,
    {
        match tokio::time::timeout(self.io_timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(Ok(v))) => Some(round2(v)),
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, operation, "storage probe failed");
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, operation, "storage probe task failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = self.io_timeout.as_millis() as u64,
                    "storage probe timed out"
                );
                None
            }
        }
    }
}

/// Uniquely named file on the volume, removed on drop unless persisted.
struct ScratchFile {
    path: PathBuf,
    armed: bool,
}

impl ScratchFile {
    fn unique(root: &Path) -> Self {
        let name = format!("{}{}.tmp", SCRATCH_PREFIX, uuid::Uuid::new_v4().simple());
        Self {
            path: root.join(name),
            armed: true,
        }
    }

    /// Atomically move into place; the guard no longer owns the file.
    fn persist(mut self, dest: &Path) -> io::Result<()> {
        std::fs::rename(&self.path, dest)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to remove probe artifact");
        }
    }
}

fn pattern_block(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn write_bytes(file: &mut File, bytes: usize) -> io::Result<()> {
    let chunk = pattern_block(CHUNK_BYTES.min(bytes.max(1)));
    let mut remaining = bytes;
    while remaining > 0 {
        let n = remaining.min(chunk.len());
        file.write_all(&chunk[..n])?;
        remaining -= n;
    }
    Ok(())
}

fn per_second(count: f64, elapsed: Duration) -> f64 {
    count / elapsed.as_secs_f64().max(1e-6)
}

fn write_throughput(root: &Path, bytes: usize) -> io::Result<f64> {
    let scratch = ScratchFile::unique(root);
    let start = Instant::now();
    let mut file = File::create(&scratch.path)?;
    write_bytes(&mut file, bytes)?;
    // Include the flush to the volume, not just the page cache
    file.sync_all()?;
    let elapsed = start.elapsed();
    Ok(per_second(bytes as f64 / BYTES_PER_MB, elapsed))
}

/// Path of the shared read artifact, created (or regrown) when smaller than `bytes`.
fn ensure_read_artifact(root: &Path, bytes: usize) -> io::Result<PathBuf> {
    let path = root.join(READ_ARTIFACT);
    if let Ok(meta) = std::fs::metadata(&path)
        && meta.len() >= bytes as u64
    {
        return Ok(path);
    }
    let scratch = ScratchFile::unique(root);
    let mut file = File::create(&scratch.path)?;
    write_bytes(&mut file, bytes)?;
    file.sync_all()?;
    drop(file);
    scratch.persist(&path)?;
    Ok(path)
}

fn read_throughput(root: &Path, bytes: usize) -> io::Result<f64> {
    let path = ensure_read_artifact(root, bytes)?;
    let mut buf = vec![0u8; CHUNK_BYTES];
    let mut file = File::open(&path)?;
    drop_cached_pages(&file)?;
    let start = Instant::now();
    let mut total = 0usize;
    while total < bytes {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        total += n;
    }
    let elapsed = start.elapsed();
    Ok(per_second(total as f64 / BYTES_PER_MB, elapsed))
}

fn write_iops(root: &Path, ops: u32, block: usize) -> io::Result<f64> {
    let scratch = ScratchFile::unique(root);
    let data = pattern_block(block);
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&scratch.path)?;
    let start = Instant::now();
    for _ in 0..ops {
        file.write_all(&data)?;
        file.sync_data()?;
    }
    let elapsed = start.elapsed();
    Ok(per_second(f64::from(ops), elapsed))
}

fn read_iops(root: &Path, ops: u32, block: usize, artifact_bytes: usize) -> io::Result<f64> {
    let path = ensure_read_artifact(root, artifact_bytes)?;
    let slots = (std::fs::metadata(&path)?.len() / block as u64).max(1);
    let mut buf = vec![0u8; block];
    let mut file = File::open(&path)?;
    drop_cached_pages(&file)?;
    advise(&file, Advice::Random)?;
    let start = Instant::now();
    for i in 0..u64::from(ops) {
        // Stride by a prime so consecutive reads do not hit adjacent blocks
        let offset = (i * 7919 % slots) * block as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
    }
    let elapsed = start.elapsed();
    Ok(per_second(f64::from(ops), elapsed))
}

#[derive(Debug, Clone, Copy)]
enum Advice {
    DontNeed,
    Random,
}

/// Evict the file's clean pages from the local cache so timed reads go to the volume.
/// The artifact is synced when created, so every page is clean by the time this runs.
fn drop_cached_pages(file: &File) -> io::Result<()> {
    advise(file, Advice::DontNeed)
}

#[cfg(target_os = "linux")]
fn advise(file: &File, advice: Advice) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let advice = match advice {
        Advice::DontNeed => libc::POSIX_FADV_DONTNEED,
        Advice::Random => libc::POSIX_FADV_RANDOM,
    };
    // SAFETY: the descriptor belongs to `file`, which outlives the call
    let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, advice) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn advise(_file: &File, advice: Advice) -> io::Result<()> {
    tracing::debug!(?advice, "page cache advice unsupported on this platform");
    Ok(())
}

/// Milliseconds for a small write + sync + read-back.
fn write_roundtrip(root: &Path) -> io::Result<f64> {
    let scratch = ScratchFile::unique(root);
    let data = pattern_block(WRITE_TEST_BYTES);
    let start = Instant::now();
    {
        let mut file = File::create(&scratch.path)?;
        file.write_all(&data)?;
        file.sync_all()?;
    }
    let back = std::fs::read(&scratch.path)?;
    if back != data {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "read-back did not match written data",
        ));
    }
    Ok(start.elapsed().as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(root: &Path) -> StorageIoProbe {
        StorageIoProbe::new(
            root.to_path_buf(),
            256 * 1024,
            16,
            4096,
            Duration::from_secs(10),
            Duration::from_secs(2),
        )
        .allow_unmounted()
    }

    fn scratch_files(root: &Path) -> Vec<String> {
        std::fs::read_dir(root)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(SCRATCH_PREFIX))
            .collect()
    }

    #[tokio::test]
    async fn throughput_measures_and_cleans_up() {
        let dir = tempfile::TempDir::new().unwrap();
        let p = probe(dir.path());
        let t = p.measure_throughput().await;
        assert!(t.write_mbps.is_some_and(|v| v >= 0.0));
        assert!(t.read_mbps.is_some_and(|v| v >= 0.0));
        assert!(scratch_files(dir.path()).is_empty());
        assert!(dir.path().join(READ_ARTIFACT).exists());
    }

    #[tokio::test]
    async fn read_artifact_is_reused() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = ensure_read_artifact(dir.path(), 8192).unwrap();
        let first = std::fs::metadata(&path).unwrap().modified().unwrap();
        let again = ensure_read_artifact(dir.path(), 4096).unwrap();
        assert_eq!(path, again);
        assert_eq!(std::fs::metadata(&again).unwrap().modified().unwrap(), first);
    }

    #[tokio::test]
    async fn iops_cached_within_a_pass() {
        let dir = tempfile::TempDir::new().unwrap();
        let p = probe(dir.path());
        let pass = IopsPass::new();
        let first = p.measure_iops(&pass).await;
        let second = p.measure_iops(&pass).await;
        assert!(first.read_iops.is_some());
        assert!(first.write_iops.is_some());
        assert_eq!(first, second);
        assert!(scratch_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn unreachable_volume_short_circuits() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("not-mounted");
        let p = probe(&missing);
        assert!(!p.is_reachable().await);
        assert_eq!(p.measure_throughput().await, Throughput::default());
        assert_eq!(p.measure_iops(&IopsPass::new()).await, Iops::default());
        let w = p.test_write().await;
        assert!(!w.writable);
        assert!(w.error.is_some());
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn plain_directory_is_not_probed_when_mount_required() {
        if !Path::new(host::linux::MOUNTS_PATH).exists() {
            return;
        }
        let dir = tempfile::TempDir::new().unwrap();
        let p = StorageIoProbe::new(
            dir.path().to_path_buf(),
            64 * 1024,
            4,
            4096,
            Duration::from_secs(5),
            Duration::from_secs(2),
        );
        let state = p.volume_state().await;
        assert!(state.present);
        assert!(!state.mounted);
        assert!(!state.reachable);
        assert_eq!(p.measure_throughput().await, Throughput::default());
        assert_eq!(p.measure_iops(&IopsPass::new()).await, Iops::default());
        assert!(!p.test_write().await.writable);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let relaxed = p.allow_unmounted().volume_state().await;
        assert!(relaxed.reachable);
    }

    #[test]
    fn read_artifact_survives_cache_eviction() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = ensure_read_artifact(dir.path(), 8192).unwrap();
        let file = File::open(&path).unwrap();
        drop_cached_pages(&file).unwrap();
        advise(&file, Advice::Random).unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), pattern_block(8192));
        assert!(read_throughput(dir.path(), 8192).unwrap() > 0.0);
        assert!(read_iops(dir.path(), 4, 4096, 8192).unwrap() > 0.0);
    }

    #[tokio::test]
    async fn write_test_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let w = probe(dir.path()).test_write().await;
        assert!(w.writable, "{:?}", w.error);
        assert!(w.duration_ms.is_some());
        assert!(scratch_files(dir.path()).is_empty());
    }

    #[test]
    fn failed_write_still_removes_scratch() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = {
            let scratch = ScratchFile::unique(dir.path());
            std::fs::write(&scratch.path, b"partial").unwrap();
            scratch.path.clone()
        };
        assert!(!path.exists());
    }
}
