// fmax_bench/tests/unit_test.rs

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use fmax_bench::fmax::{fetch_max_smart, fetch_max_strong, fetch_max_weak, FetchMaxFn, MemOrder};
use fmax_bench::runner::calibrate_with;
use fmax_bench::{Latch, SlottedQueue, Stats};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Every variant compiled on this architecture, by name.
fn all_variants() -> Vec<(&'static str, FetchMaxFn)> {
   #[allow(unused_mut)]
   let mut variants: Vec<(&'static str, FetchMaxFn)> = vec![
      ("strong", fetch_max_strong),
      ("weak", fetch_max_weak),
      ("smart", fetch_max_smart),
   ];
   #[cfg(target_arch = "aarch64")]
   {
      use fmax_bench::fmax::{fetch_max_faster, fetch_max_hardware};
      variants.push(("hardware", fetch_max_hardware));
      variants.push(("faster", fetch_max_faster));
   }
   variants
}

#[test]
fn test_fetch_max_returns_prior_value_and_raises() {
   for (name, fmax) in all_variants() {
      let target = AtomicI64::new(i64::MIN);

      let prev = fmax(&target, 10, MemOrder::SeqCst);
      assert_eq!(prev, i64::MIN, "{name}: first call must observe the minimum");
      assert_eq!(target.load(Ordering::SeqCst), 10, "{name}");

      // losing candidate must not lower the stored value
      let prev = fmax(&target, 3, MemOrder::SeqCst);
      assert_eq!(prev, 10, "{name}: no-op path must report the current max");
      assert_eq!(target.load(Ordering::SeqCst), 10, "{name}");

      let prev = fmax(&target, 42, MemOrder::Release);
      assert_eq!(prev, 10, "{name}");
      assert_eq!(target.load(Ordering::SeqCst), 42, "{name}");
   }
}

#[test]
fn test_fetch_max_no_op_path_under_release_orderings() {
   // The no-op contract differs by variant but the observable value must
   // not: weak skips its store, smart adds a dummy write, both still
   // report the dominating value.
   for order in [MemOrder::Relaxed, MemOrder::Release, MemOrder::AcqRel, MemOrder::SeqCst] {
      for (name, fmax) in all_variants() {
         let target = AtomicI64::new(100);
         assert_eq!(fmax(&target, 7, order), 100, "{name} @ {order}");
         assert_eq!(target.load(Ordering::SeqCst), 100, "{name} @ {order}");
      }
   }
}

#[test]
fn test_mem_order_mapping_never_releases_on_loads() {
   assert_eq!(MemOrder::Release.read(), Ordering::Relaxed);
   assert_eq!(MemOrder::AcqRel.read(), Ordering::Acquire);
   assert_eq!(MemOrder::Consume.read(), Ordering::Acquire);
   assert_eq!(MemOrder::SeqCst.read(), Ordering::SeqCst);

   assert_eq!(MemOrder::Consume.rmw(), Ordering::Acquire);
   assert_eq!(MemOrder::Release.rmw(), Ordering::Release);

   assert!(MemOrder::Release.wants_release());
   assert!(MemOrder::AcqRel.wants_release());
   assert!(MemOrder::SeqCst.wants_release());
   assert!(!MemOrder::Acquire.wants_release());
   assert!(!MemOrder::Relaxed.wants_release());
}

#[test]
fn test_fetch_max_concurrent_never_loses_a_maximum() {
   const THREADS: usize = 4;
   const CALLS: usize = 10_000;

   for (name, fmax) in all_variants() {
      for order in [MemOrder::Relaxed, MemOrder::Release, MemOrder::SeqCst] {
         let target = AtomicI64::new(i64::MIN);
         let mut expected = i64::MIN;

         thread::scope(|s| {
            let mut handles = Vec::new();
            for t in 0..THREADS {
               let target = &target;
               handles.push(s.spawn(move || {
                  let mut rng = SmallRng::seed_from_u64(0xF00D + t as u64);
                  let mut local_max = i64::MIN;
                  for _ in 0..CALLS {
                     let v = rng.gen_range(0..2_000_000_000i64);
                     local_max = local_max.max(v);
                     fmax(target, v, order);
                  }
                  local_max
               }));
            }
            for handle in handles {
               expected = expected.max(handle.join().unwrap());
            }
         });

         assert_eq!(
            target.load(Ordering::SeqCst),
            expected,
            "{name} @ {order}: final value must equal the max of all inputs"
         );
      }
   }
}

#[test]
fn test_queue_single_thread_roundtrip() {
   let q = SlottedQueue::new(4, fetch_max_strong);
   assert_eq!(q.capacity(), 4);
   assert_eq!(q.back(), -1);

   let cap = q.capacity() as i64;
   for v in 0..4 {
      q.push(v, |i| i < cap).expect("queue has room");
   }
   assert_eq!(q.back(), 3);

   let mut drained: Vec<i32> = (0..4).map(|_| q.pop()).collect();
   drained.sort_unstable();
   assert_eq!(drained, vec![0, 1, 2, 3]);
   assert!(q.is_quiescent());
}

#[test]
fn test_queue_full_push_fails_without_torn_slots() {
   let q = SlottedQueue::new(4, fetch_max_strong);
   let cap = q.capacity() as i64;
   for v in 0..4 {
      q.push(v, |i| i < cap).unwrap();
   }

   // predicate vetoes every candidate past the first generation
   match q.push(99, |i| i < cap) {
      Err(item) => assert_eq!(item, 99, "rejected item is handed back"),
      Ok(()) => panic!("push into a full queue must fail"),
   }
   assert!(q.is_quiescent(), "failed push must leave no slot mid-write");
   assert_eq!(q.back(), 3, "failed push must not advance the cursor");
}

#[test]
fn test_queue_four_producers_two_items_each() {
   // end-to-end example: capacity-8 queue, 4 producers, 2 items each
   let q = Arc::new(SlottedQueue::new(8, fetch_max_strong));
   let mut handles = Vec::new();

   for id in 0..4usize {
      let q = q.clone();
      handles.push(thread::spawn(move || {
         let cap = q.capacity() as i64;
         for _ in 0..2 {
            q.push(id, |i| i < cap).expect("8 slots fit 8 items");
         }
      }));
   }
   for handle in handles {
      handle.join().unwrap();
   }

   let mut ids: Vec<usize> = (0..8).map(|_| q.pop()).collect();
   ids.sort_unstable();
   assert_eq!(ids, vec![0, 0, 1, 1, 2, 2, 3, 3]);
   assert!(q.is_quiescent(), "no slot may stay mid-write or mid-read");
   assert!(q.try_pop().is_none());
}

#[test]
fn test_queue_cursor_never_regresses() {
   const PRODUCERS: usize = 4;
   const PER_PRODUCER: usize = 100;

   let q = Arc::new(SlottedQueue::new(1024, fetch_max_weak));
   let done = Arc::new(AtomicUsize::new(0));

   let monitor = {
      let q = q.clone();
      let done = done.clone();
      thread::spawn(move || {
         let mut last = q.back();
         while done.load(Ordering::Acquire) < PRODUCERS {
            let back = q.back();
            assert!(back >= last, "cursor regressed: {back} < {last}");
            last = back;
         }
      })
   };

   let mut handles = Vec::new();
   for id in 0..PRODUCERS {
      let q = q.clone();
      let done = done.clone();
      handles.push(thread::spawn(move || {
         let cap = q.capacity() as i64;
         for n in 0..PER_PRODUCER {
            q.push(id * PER_PRODUCER + n, |i| i < cap).unwrap();
         }
         done.fetch_add(1, Ordering::Release);
      }));
   }
   for handle in handles {
      handle.join().unwrap();
   }
   monitor.join().unwrap();

   let mut drained = Vec::new();
   while let Some(v) = q.try_pop() {
      drained.push(v);
   }
   assert_eq!(drained.len(), PRODUCERS * PER_PRODUCER, "no loss, no duplication");
   drained.sort_unstable();
   drained.dedup();
   assert_eq!(drained.len(), PRODUCERS * PER_PRODUCER);
}

#[test]
fn test_queue_concurrent_producers_and_consumer() {
   const PRODUCERS: usize = 4;
   const PER_PRODUCER: usize = 250;
   const TOTAL: usize = PRODUCERS * PER_PRODUCER;

   let q = Arc::new(SlottedQueue::new(1024, fetch_max_smart));

   let consumer = {
      let q = q.clone();
      thread::spawn(move || {
         let mut seen = Vec::with_capacity(TOTAL);
         for _ in 0..TOTAL {
            seen.push(q.pop());
         }
         seen
      })
   };

   let mut handles = Vec::new();
   for id in 0..PRODUCERS {
      let q = q.clone();
      handles.push(thread::spawn(move || {
         let cap = q.capacity() as i64;
         for n in 0..PER_PRODUCER {
            q.push(id * 1000 + n, |i| i < cap).unwrap();
         }
      }));
   }
   for handle in handles {
      handle.join().unwrap();
   }

   let mut seen = consumer.join().unwrap();
   seen.sort_unstable();
   let mut expected: Vec<usize> = (0..PRODUCERS)
      .flat_map(|id| (0..PER_PRODUCER).map(move |n| id * 1000 + n))
      .collect();
   expected.sort_unstable();
   assert_eq!(seen, expected, "exactly the enqueued items, each once");
   assert!(q.is_quiescent());
}

#[test]
fn test_latch_arrive_and_wait_releases_all_together() {
   const N: usize = 4;
   let latch = Arc::new(Latch::new(N));
   let arrived = Arc::new(AtomicUsize::new(0));

   let mut handles = Vec::new();
   for _ in 0..N {
      let latch = latch.clone();
      let arrived = arrived.clone();
      handles.push(thread::spawn(move || {
         arrived.fetch_add(1, Ordering::SeqCst);
         latch.arrive_and_wait(1);
         // nobody gets past the latch before everyone has arrived
         assert_eq!(arrived.load(Ordering::SeqCst), N);
      }));
   }
   for handle in handles {
      handle.join().unwrap();
   }
   assert!(latch.try_wait());
}

#[test]
fn test_latch_count_down_releases_waiters() {
   const N: usize = 3;
   let latch = Arc::new(Latch::new(N));
   assert!(!latch.try_wait());

   let mut handles = Vec::new();
   for _ in 0..N {
      let latch = latch.clone();
      handles.push(thread::spawn(move || latch.count_down(1)));
   }

   latch.wait(); // must return only after all N decrements
   assert!(latch.try_wait());
   for handle in handles {
      handle.join().unwrap();
   }
}

#[test]
fn test_latch_fresh_instance_reuses_correctly() {
   // one-shot by design; a new round gets a new latch, possibly with a
   // different expected count
   for parties in [1usize, 2, 4] {
      let latch = Arc::new(Latch::new(parties));
      let mut handles = Vec::new();
      for _ in 0..parties {
         let latch = latch.clone();
         handles.push(thread::spawn(move || latch.arrive_and_wait(1)));
      }
      for handle in handles {
         handle.join().unwrap();
      }
      assert!(latch.try_wait());
   }
}

#[test]
fn test_stats_welford_known_values() {
   let mut s = Stats::new();
   assert!(s.is_empty());
   assert_eq!(s.mean(), 0.0);
   assert_eq!(s.stdev(), 0.0);

   for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
      s.push(x);
   }
   assert_eq!(s.len(), 8);
   assert!((s.mean() - 5.0).abs() < 1e-12);
   // sample variance: 32 / 7
   assert!((s.variance() - 32.0 / 7.0).abs() < 1e-12);
   assert!((s.stdev() - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
}

#[test]
fn test_stats_single_sample_has_zero_stdev() {
   let mut s = Stats::new();
   s.push(3.5);
   assert_eq!(s.mean(), 3.5);
   assert_eq!(s.stdev(), 0.0);
}

#[test]
fn test_stress_payload_slot_fits_one_cache_line() {
   use fmax_bench::runner::Payload;

   // Option<Payload> has no niche, so the discriminant costs a full word;
   // the payload is sized so item + tag still land on 64 bytes exactly
   let slot = std::mem::size_of::<Option<Payload>>() + std::mem::size_of::<AtomicI64>();
   assert_eq!(slot, 64, "stress slot must fill one cache line");
}

#[test]
fn test_calibration_converges_for_identity_op() {
   // identity op has near-zero intrinsic variance; a generous sigma bound
   // must converge immediately and report a non-negative baseline
   let baseline = calibrate_with(42, 20_000, 1e9, |n| n).expect("calibration must converge");
   assert!(baseline >= 0.0);
   assert!(baseline.is_finite());
}
