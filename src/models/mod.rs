// Domain models: interface records, bucket rows, granularities.

mod bucket;
mod interface;

pub use bucket::{BucketRecord, Granularity, TimePolicy};
pub use interface::InterfaceRecord;
