// Domain models: counter snapshots, derived rates, persisted rows, NAS reports

mod nas;
mod record;
mod snapshot;

pub use nas::{
    BackupSummary, CRITICAL_USAGE_PERCENT, Capacity, CapacityStatus, ConnectionTest, Iops,
    NasHealth, NasMetric, NasStats, Throughput, WARNING_USAGE_PERCENT, WriteTest,
};
pub(crate) use nas::round2;
pub use record::{HostVitals, MetricRecord};
pub use snapshot::{DeltaMetric, Snapshot};
