// In-process criterion benchmarks for the fetch-max family and the slotted
// queue. The pinned, calibrated numbers come from the `fmax-bench` binary;
// these exist for quick relative comparisons during development.

use std::sync::atomic::AtomicI64;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use fmax_bench::fmax::{fetch_max_smart, fetch_max_strong, fetch_max_weak, FetchMaxFn, MemOrder};
use fmax_bench::SlottedQueue;

const SEED: u64 = 42;

fn bench_variant(c: &mut Criterion, name: &str, fmax: FetchMaxFn, order: MemOrder) {
   c.bench_function(&format!("fetch_max {name} ({order})"), |b| {
      let target = AtomicI64::new(i64::MIN);
      let mut rng = SmallRng::seed_from_u64(SEED);
      b.iter(|| {
         let v = rng.gen_range(0..2_000_000_000i64);
         black_box(fmax(&target, v, order))
      })
   });
}

fn bench_fetch_max(c: &mut Criterion) {
   for order in [MemOrder::Relaxed, MemOrder::Release, MemOrder::SeqCst] {
      bench_variant(c, "strong", fetch_max_strong, order);
      bench_variant(c, "weak", fetch_max_weak, order);
      bench_variant(c, "smart", fetch_max_smart, order);
      #[cfg(target_arch = "aarch64")]
      {
         use fmax_bench::fmax::{fetch_max_faster, fetch_max_hardware};
         bench_variant(c, "hardware", fetch_max_hardware, order);
         bench_variant(c, "faster", fetch_max_faster, order);
      }
   }
}

fn bench_queue_fill_drain(c: &mut Criterion) {
   const CAP: usize = 1024;

   c.bench_function("queue fill+drain (single thread)", |b| {
      let q = SlottedQueue::new(CAP, fetch_max_strong);
      b.iter(|| {
         // the drain below empties the ring, so later cycles claim slots
         // in later generations; the predicate must not cap the index
         for v in 0..CAP {
            q.push(v, |_| true).unwrap();
         }
         for _ in 0..CAP {
            black_box(q.pop());
         }
      })
   });
}

fn custom_criterion() -> Criterion {
   Criterion::default()
      .warm_up_time(Duration::from_secs(2))
      .measurement_time(Duration::from_secs(5))
      .sample_size(100)
}

criterion_group! {
   name = benches;
   config = custom_criterion();
   targets =
      bench_fetch_max,
      bench_queue_fill_drain
}
criterion_main!(benches);
