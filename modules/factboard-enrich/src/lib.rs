pub mod pipeline;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use pipeline::runner::Pipeline;
pub use pipeline::stats::RunStats;
