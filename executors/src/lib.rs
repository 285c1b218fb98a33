pub mod eoa;
pub mod metrics;
