pub mod cpu;
pub mod fmax;
pub mod latch;
pub mod queue;
pub mod runner;
pub mod stats;

pub use fmax::{FetchMaxFn, MemOrder, Variant};
pub use latch::Latch;
pub use queue::SlottedQueue;
pub use runner::{Config, Report, RunError, StressConfig};
pub use stats::Stats;

/// Inner timed batch size. Each recorded sample is the mean over this
/// many back-to-back calls.
pub const INNER_ITERS: usize = 10_000;

/// Untimed batch run before each timed one to warm caches and the PRNG.
pub const WARMUP_ITERS: usize = 1_000;
