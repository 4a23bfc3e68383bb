// Measurement harness: calibrated sampling, the lock-step fetch-max
// benchmark, and the queue saturation stress run.
//
// Workers are OS threads pinned one-per-CPU. All rendezvous before timed
// regions is busy-spin or latch based on purpose; parking a thread in the
// scheduler right before a timed region would skew exactly the numbers this
// harness exists to produce.

use std::fmt;
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use clap::ValueEnum;
use crossbeam::utils::CachePadded;
use log::info;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::cpu::pin_to_cpu;
use crate::fmax::{MemOrder, Variant};
use crate::latch::Latch;
use crate::queue::SlottedQueue;
use crate::stats::Stats;
use crate::{INNER_ITERS, WARMUP_ITERS};

/// Round-robin depth of the holder pipeline; each round uses the next
/// holder so the orchestrator can reset the previous one in parallel.
const HOLDER_COUNT: usize = 256;

/// Holders live on their own page so runs do not share cache lines or
/// TLB entries with neighbouring state.
const HOLDER_ALIGN: usize = 0x1000;

/// Give up calibration after this many attempts.
pub const CALIBRATION_ATTEMPTS: usize = 100;

/// Baseline estimate is `mean - SIGMA_MULTIPLIER * stdev`, clamped at zero.
const SIGMA_MULTIPLIER: f64 = 5.0;

/// Candidate values drawn by every worker.
const VALUE_RANGE: (i64, i64) = (0, 2_000_000_000);

/// Validated run configuration, produced by the CLI layer.
#[derive(Debug, Clone)]
pub struct Config {
   pub variant: Variant,
   pub order: MemOrder,
   /// Logical CPU ids to run on, one worker each.
   pub cpus: Vec<usize>,
   pub iters: u64,
   pub seed: u64,
   /// Calibration succeeds once the batch stdev (ns) drops below this.
   pub max_sigma: f64,
}

/// Queue stress configuration.
#[derive(Debug, Clone)]
pub struct StressConfig {
   pub variant: Variant,
   pub cpus: Vec<usize>,
   pub size: SizeClass,
}

/// Queue sizes selected to fit into the L2/L3 cache of a modern
/// server-type CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SizeClass {
   Small,
   Medium,
   Large,
   Xlarge,
}

impl SizeClass {
   pub fn slots(self) -> usize {
      match self {
         SizeClass::Small => 1 << 12,  // 4'096 entries
         SizeClass::Medium => 1 << 15, // 32'768 entries
         SizeClass::Large => 1 << 18,  // 262'144 entries
         SizeClass::Xlarge => 1 << 21, // 2'097'152 entries
      }
   }
}

/// Aggregated result of one run; `starved` counts workers that produced no
/// usable samples (stress run only).
#[derive(Debug, Clone, Copy)]
pub struct Report {
   pub cores: usize,
   pub mean: f64,
   pub stdev: f64,
   pub starved: usize,
}

#[derive(Debug)]
pub enum RunError {
   /// A thread could not be pinned to its CPU. The whole run is discarded
   /// rather than reporting silently skewed numbers.
   Pin,
   /// The timing loop never got quiet enough to subtract a baseline.
   Calibration { best_sigma: f64, max_sigma: f64 },
}

impl fmt::Display for RunError {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         RunError::Pin => write!(f, "unable to pin a thread to its CPU"),
         RunError::Calibration {
            best_sigma,
            max_sigma,
         } => write!(
            f,
            "calibration did not converge: best sigma {best_sigma} vs required {max_sigma}"
         ),
      }
   }
}

impl std::error::Error for RunError {}

/// Time `op(dist.sample(rng))` over `batch` back-to-back calls and return
/// mean nanoseconds per call. Every return value goes through `black_box`
/// so the loop body cannot be optimized out; this has no semantic effect.
pub fn sample<F>(batch: usize, rng: &mut SmallRng, dist: &Uniform<i64>, mut op: F) -> f64
where
   F: FnMut(i64) -> i64,
{
   let start = Instant::now();
   for _ in 0..batch {
      black_box(op(dist.sample(rng)));
   }
   start.elapsed().as_nanos() as f64 / batch as f64
}

/// Measure the intrinsic cost of the timing loop itself (clock reads, PRNG,
/// loop overhead) so it can be subtracted from real samples.
///
/// Repeats until the stdev across batches falls under `max_sigma`, then
/// reports a conservative lower bound. Fails after a fixed attempt budget
/// instead of spinning forever on a noisy host.
pub fn calibrate(seed: u64, iters: u64, max_sigma: f64) -> Result<f64, RunError> {
   calibrate_with(seed, iters, max_sigma, |n| n)
}

pub fn calibrate_with<F>(seed: u64, iters: u64, max_sigma: f64, mut op: F) -> Result<f64, RunError>
where
   F: FnMut(i64) -> i64,
{
   let batches = (iters as usize / INNER_ITERS) + 1;
   let dist = Uniform::new_inclusive(VALUE_RANGE.0, VALUE_RANGE.1);
   let mut best_sigma = f64::INFINITY;

   for attempt in 1..=CALIBRATION_ATTEMPTS {
      let mut rng = SmallRng::seed_from_u64(seed);
      sample(WARMUP_ITERS, &mut rng, &dist, &mut op);

      let mut stats = Stats::new();
      for _ in 0..batches {
         stats.push(sample(INNER_ITERS, &mut rng, &dist, &mut op));
      }

      if stats.stdev() < max_sigma {
         let cost = (stats.mean() - SIGMA_MULTIPLIER * stats.stdev()).max(0.0);
         info!(
            "Calibration: {:.4} ns ({:.4} sigma, attempt {attempt})",
            cost,
            stats.stdev()
         );
         return Ok(cost);
      }
      best_sigma = best_sigma.min(stats.stdev());
   }

   Err(RunError::Calibration {
      best_sigma,
      max_sigma,
   })
}

/// One benchmark round's shared state: the fetch-max target plus the two
/// latches of the round protocol. Page-aligned so consecutive rounds hit
/// different pages.
///
/// The latch pair is the point: `arrive` lets every worker start the timed
/// region simultaneously, `done` lets the orchestrator wait for all of them
/// before resetting. A single counter cannot express both without racing on
/// reuse. Latches are one-shot, so reset swaps in fresh ones; the `Arc`
/// slots take the place of the placement-new reconstruction a C++ version
/// would use.
#[repr(align(4096))]
pub struct MaxHolder {
   max: AtomicI64,
   arrive: Mutex<Arc<Latch>>,
   done: Mutex<Arc<Latch>>,
}

const _: () = assert!(std::mem::size_of::<MaxHolder>() == HOLDER_ALIGN);

impl MaxHolder {
   fn new(parties: usize) -> Self {
      Self {
         max: AtomicI64::new(0),
         arrive: Mutex::new(Arc::new(Latch::new(parties))),
         done: Mutex::new(Arc::new(Latch::new(parties))),
      }
   }

   #[inline]
   fn max(&self) -> &AtomicI64 {
      &self.max
   }

   /// Valid only after the previous round's `wait` has returned for all
   /// parties; concurrent reuse without reset is undefined.
   fn reset(&self, parties: usize) {
      self.max.store(0, Ordering::SeqCst);
      *self.arrive.lock().unwrap() = Arc::new(Latch::new(parties));
      *self.done.lock().unwrap() = Arc::new(Latch::new(parties));
   }

   fn arrive_and_wait(&self) {
      let latch = self.arrive.lock().unwrap().clone();
      latch.arrive_and_wait(1);
   }

   fn count_down(&self) {
      let latch = self.done.lock().unwrap().clone();
      latch.count_down(1);
   }

   fn wait(&self) {
      let latch = self.done.lock().unwrap().clone();
      latch.wait();
   }
}

/// Run the fetch-max contention benchmark.
///
/// Every configured CPU gets a pinned worker; all of them hammer the same
/// page-aligned target in lock-step rounds, and the per-round batch means
/// are collected after join. Samples from CPU 0 are dropped from the final
/// aggregation: that CPU also runs the orchestrator and the rest of the
/// system, and its timings are systematically noisier.
pub fn run(config: &Config) -> Result<Report, RunError> {
   let fetch_max = config.variant.select();
   let order = config.order;
   let parties = config.cpus.len();
   let rounds = (1 + (config.iters - 1) / INNER_ITERS as u64) as usize;

   let holders: Vec<MaxHolder> = (0..HOLDER_COUNT).map(|_| MaxHolder::new(parties)).collect();
   let error = CachePadded::new(AtomicBool::new(false));

   let mut results: Vec<(usize, Vec<f64>)> = Vec::with_capacity(parties);

   thread::scope(|s| {
      let mut handles = Vec::with_capacity(parties);
      for &cpu in &config.cpus {
         let holders = &holders;
         let error = &error;
         let seed = config.seed;
         let handle = s.spawn(move || {
            let mut samples = vec![0.0f64; rounds];
            let mut rng = SmallRng::seed_from_u64(seed + cpu as u64);
            let dist = Uniform::new_inclusive(VALUE_RANGE.0, VALUE_RANGE.1);

            if !pin_to_cpu(cpu) {
               error.store(true, Ordering::SeqCst);
            }

            let mut h = 0;
            for slot in samples.iter_mut() {
               let target = holders[h].max();
               sample(WARMUP_ITERS, &mut rng, &dist, |n| fetch_max(target, n, order));

               holders[h].arrive_and_wait();
               // checked at every round boundary, never assumed instant
               if !error.load(Ordering::SeqCst) {
                  *slot = sample(INNER_ITERS, &mut rng, &dist, |n| {
                     fetch_max(target, n, order)
                  });
               }
               holders[h].count_down();

               h = (h + 1) % HOLDER_COUNT;
            }
            samples
         });
         handles.push((cpu, handle));
      }

      // Reset each holder as its round drains so it is fresh by the time
      // the workers wrap back around to it.
      let mut h = 0;
      for _ in 0..rounds {
         holders[h].wait();
         holders[h].reset(parties);
         h = (h + 1) % HOLDER_COUNT;
      }

      for (cpu, handle) in handles {
         results.push((cpu, handle.join().expect("benchmark worker panicked")));
      }
   });

   if error.load(Ordering::SeqCst) {
      return Err(RunError::Pin);
   }

   // The orchestrator measures the baseline next, so it needs a quiet core
   // too; CPU 1 is the first one assumed isolated.
   if !pin_to_cpu(1) {
      return Err(RunError::Pin);
   }
   let baseline = calibrate(config.seed, config.iters, config.max_sigma)?;

   let mut stats = Stats::new();
   for (cpu, samples) in &results {
      if *cpu == 0 {
         // CPU 0 carries the orchestration and ancillary load; its samples
         // are excluded by design.
         continue;
      }
      for &s in samples {
         stats.push(s - baseline);
      }
   }

   Ok(Report {
      cores: parties,
      mean: stats.mean(),
      stdev: stats.stdev(),
      starved: 0,
   })
}

/// Dummy element sized so a slot (optional item + tag) fills one cache
/// line: 48 payload bytes + 8 for the `Option` discriminant + an 8-byte
/// tag.
#[derive(Debug, Default, Clone, Copy)]
pub struct Payload {
   _load: [u64; 6],
}

/// Saturate a bounded queue from every configured CPU at once and report
/// nanoseconds per successful enqueue.
///
/// This bypasses the statistics pipeline deliberately: the interesting
/// number is the raw fill rate under full contention, and the terminal
/// condition is the queue reporting full, which is expected, not an error.
pub fn run_stress(config: &StressConfig) -> Result<Report, RunError> {
   let fetch_max = config.variant.select();
   let capacity = config.size.slots();
   let queue = SlottedQueue::<Payload>::new(capacity, fetch_max);
   let parties = config.cpus.len();

   let error = CachePadded::new(AtomicBool::new(false));
   let started = CachePadded::new(AtomicUsize::new(0));
   let starter = CachePadded::new(AtomicBool::new(false));

   let mut rates: Vec<f64> = Vec::with_capacity(parties);

   thread::scope(|s| {
      let mut handles = Vec::with_capacity(parties);
      for &cpu in &config.cpus {
         let queue = &queue;
         let error = &error;
         let started = &started;
         let starter = &starter;
         handles.push(s.spawn(move || -> f64 {
            if !pin_to_cpu(cpu) {
               error.store(true, Ordering::SeqCst);
               started.fetch_add(1, Ordering::SeqCst);
               return 0.0;
            }
            started.fetch_add(1, Ordering::SeqCst);

            // spin so all producers enter the fill loop together
            while !starter.load(Ordering::Acquire) {
               std::hint::spin_loop();
            }

            let cap = capacity as i64;
            let mut count = 0u64;
            let start = Instant::now();
            while queue.push(Payload::default(), |i| i < cap).is_ok() {
               count += 1;
            }
            if count == 0 {
               return 0.0;
            }
            start.elapsed().as_nanos() as f64 / count as f64
         }));
      }

      while started.load(Ordering::SeqCst) < parties {
         std::hint::spin_loop();
      }
      starter.store(true, Ordering::Release);

      for handle in handles {
         rates.push(handle.join().expect("stress worker panicked"));
      }
   });

   if error.load(Ordering::SeqCst) {
      return Err(RunError::Pin);
   }

   let mut stats = Stats::new();
   let mut starved = 0;
   for &rate in &rates {
      if rate == 0.0 {
         // lost every claim race before the queue filled
         starved += 1;
         continue;
      }
      stats.push(rate);
   }

   Ok(Report {
      cores: parties,
      mean: stats.mean(),
      stdev: stats.stdev(),
      starved,
   })
}
