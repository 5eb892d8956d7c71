// Direct measurements of the remote volume (timed I/O, echo, capacity).

mod capacity;
mod latency;
mod storage_io;

pub use capacity::CapacityProbe;
pub use latency::{LatencyProbe, is_loopback_target, parse_round_trip_ms, resolve_target};
pub use storage_io::{ARTIFACT_PREFIX, IopsPass, StorageIoProbe, VolumeState};
