pub mod registry;

pub use registry::CollectorMetrics;
