// Bounded MPMC slotted queue driven by atomic fetch-max.
//
// Producers race to claim monotonically increasing slot indices; the shared
// `back` cursor is a high-water mark advanced only through fetch-max, so it
// never regresses no matter how claims interleave. Slot tags carry both the
// lifecycle state and the generation (wrap count), which is what makes the
// fixed ring safe to index without a free-list.
//
// Tag values for slot index i with gen = i / capacity:
//    -1            empty
//    gen * 2 + 1   write in progress
//    gen * 2       ready
//    -2            read in progress
//
// At most one producer can hold a slot odd-tagged and at most one consumer
// can hold it at -2; both transitions go through a CAS on the tag.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, Ordering};

use log::debug;

use crate::fmax::{FetchMaxFn, MemOrder};

const EMPTY: i64 = -1;
const READING: i64 = -2;

struct Slot<T> {
   item: UnsafeCell<Option<T>>,
   tag: AtomicI64,
}

pub struct SlottedQueue<T: Send> {
   slots: Box<[Slot<T>]>,
   back: AtomicI64, // highest index any producer has published
   fetch_max: FetchMaxFn,
}

unsafe impl<T: Send> Sync for SlottedQueue<T> {}
unsafe impl<T: Send> Send for SlottedQueue<T> {}

impl<T: Send> SlottedQueue<T> {
   /// Build a queue with `capacity` slots, publishing its cursor through
   /// `fetch_max`. Touches a sampled subset of slots so the backing pages
   /// are committed and in the TLB before any timed work runs.
   pub fn new(capacity: usize, fetch_max: FetchMaxFn) -> Self {
      assert!(capacity > 0, "capacity must be non-zero");

      let slots = (0..capacity)
         .map(|_| Slot {
            item: UnsafeCell::new(None),
            tag: AtomicI64::new(EMPTY),
         })
         .collect::<Vec<_>>()
         .into_boxed_slice();

      let queue = Self {
         slots,
         back: AtomicI64::new(-1),
         fetch_max,
      };

      let mut check = 1i64;
      for i in (0..capacity).step_by(16) {
         check = check.wrapping_mul(queue.slots[i].tag.load(Ordering::Relaxed));
      }
      debug!("page-in check: {check}");

      queue
   }

   #[inline]
   pub fn capacity(&self) -> usize {
      self.slots.len()
   }

   /// Current high-water cursor; -1 until the first publish.
   #[inline]
   pub fn back(&self) -> i64 {
      self.back.load(Ordering::Acquire)
   }

   /// Claim a slot at or past the cursor, move `item` in, and publish.
   ///
   /// Candidate indices are offered to `keep_trying` before each claim
   /// attempt; returning false fails the push and hands the item back with
   /// no other side effects. Bounded runs pass `|i| i < capacity as i64`,
   /// stress runs that rely on slot reuse pass `|_| true` and never fail.
   pub fn push<F>(&self, item: T, keep_trying: F) -> Result<(), T>
   where
      F: Fn(i64) -> bool,
   {
      let cap = self.slots.len() as i64;
      let mut i = self.back.load(Ordering::Acquire);
      loop {
         i += 1;
         if !keep_trying(i) {
            return Err(item);
         }

         let gen = i / cap;
         let slot = &self.slots[(i % cap) as usize];
         // two-step write: odd tag while the item is being moved in
         if slot
            .tag
            .compare_exchange(EMPTY, gen * 2 + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
         {
            unsafe { *slot.item.get() = Some(item) };
            // even tag marks the slot ready; the item store above must be
            // visible before the tag flips
            slot.tag.store(gen * 2, Ordering::SeqCst);
            break;
         }
      }

      (self.fetch_max)(&self.back, i, MemOrder::Release);
      Ok(())
   }

   /// One scan over `0..=back`, taking the first ready slot found.
   ///
   /// Correct for a single logical consumer at a time; offers no FIFO
   /// fairness across slots within a pass.
   pub fn try_pop(&self) -> Option<T> {
      let cap = self.slots.len() as i64;
      let range = self.back.load(Ordering::Acquire);
      for i in 0..=range {
         let gen = i / cap;
         let slot = &self.slots[(i % cap) as usize];
         // two-step read: -2 while the item is being moved out
         if slot
            .tag
            .compare_exchange(gen * 2, READING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
         {
            let item = unsafe { (*slot.item.get()).take() };
            slot.tag.store(EMPTY, Ordering::Release);
            return Some(item.expect("ready slot held no item"));
         }
      }
      None
   }

   /// Scan until an element turns up, restarting from slot zero whenever a
   /// pass comes up empty. Deliberately a busy spin: blocking here would
   /// reintroduce the scheduler latency the benchmark exists to exclude.
   pub fn pop(&self) -> T {
      loop {
         if let Some(item) = self.try_pop() {
            return item;
         }
         std::hint::spin_loop();
      }
   }

   /// True when no slot is mid-write or mid-read. Used by tests to assert
   /// nothing was left torn after producers and consumers are done.
   pub fn is_quiescent(&self) -> bool {
      self.slots.iter().all(|slot| {
         let tag = slot.tag.load(Ordering::SeqCst);
         tag == EMPTY || (tag >= 0 && tag % 2 == 0)
      })
   }
}
