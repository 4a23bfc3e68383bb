// Atomic fetch-max strategies (P0493-style), with varying no-op semantics.
//
// All variants atomically raise a shared `AtomicI64` to the maximum of its
// current value and a candidate, returning the value observed before the
// update. They differ only in how aggressively they avoid a wasted store on
// the "candidate did not win" path, and what that avoidance costs in
// memory-ordering precision.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use clap::ValueEnum;

/// Caller-requested memory ordering, including `consume` which the Rust
/// memory model folds into `acquire` (as every compiler does in practice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MemOrder {
   Relaxed,
   Consume,
   Acquire,
   Release,
   AcqRel,
   SeqCst,
}

impl MemOrder {
   /// Ordering for pure loads and compare-exchange failure, which cannot
   /// carry release semantics.
   #[inline]
   pub fn read(self) -> Ordering {
      match self {
         MemOrder::Relaxed | MemOrder::Release => Ordering::Relaxed,
         MemOrder::Consume | MemOrder::Acquire | MemOrder::AcqRel => Ordering::Acquire,
         MemOrder::SeqCst => Ordering::SeqCst,
      }
   }

   /// Ordering for read-modify-write operations.
   #[inline]
   pub fn rmw(self) -> Ordering {
      match self {
         MemOrder::Relaxed => Ordering::Relaxed,
         MemOrder::Consume | MemOrder::Acquire => Ordering::Acquire,
         MemOrder::Release => Ordering::Release,
         MemOrder::AcqRel => Ordering::AcqRel,
         MemOrder::SeqCst => Ordering::SeqCst,
      }
   }

   /// True when the caller asked for release semantics on the write side.
   #[inline]
   pub fn wants_release(self) -> bool {
      matches!(self, MemOrder::Release | MemOrder::AcqRel | MemOrder::SeqCst)
   }
}

impl fmt::Display for MemOrder {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let name = match self {
         MemOrder::Relaxed => "relaxed",
         MemOrder::Consume => "consume",
         MemOrder::Acquire => "acquire",
         MemOrder::Release => "release",
         MemOrder::AcqRel => "acq_rel",
         MemOrder::SeqCst => "seq_cst",
      };
      f.write_str(name)
   }
}

/// Uniform call contract shared by all variants. Selected once at
/// configuration time and held as a plain function value, so the hot timing
/// loop sees a direct call rather than a trait object.
pub type FetchMaxFn = fn(&AtomicI64, i64, MemOrder) -> i64;

/// Selectable fetch-max implementations.
///
/// `Hardware` and `Faster` exist only on aarch64, where LSE provides a real
/// atomic max instruction; elsewhere they are absent from the set rather
/// than a runtime-unreachable path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Variant {
   Strong,
   Weak,
   Smart,
   #[cfg(target_arch = "aarch64")]
   Hardware,
   #[cfg(target_arch = "aarch64")]
   Faster,
}

impl fmt::Display for Variant {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let name = match self {
         Variant::Strong => "strong",
         Variant::Weak => "weak",
         Variant::Smart => "smart",
         #[cfg(target_arch = "aarch64")]
         Variant::Hardware => "hardware",
         #[cfg(target_arch = "aarch64")]
         Variant::Faster => "faster",
      };
      f.write_str(name)
   }
}

impl Variant {
   pub fn select(self) -> FetchMaxFn {
      match self {
         Variant::Strong => fetch_max_strong,
         Variant::Weak => fetch_max_weak,
         Variant::Smart => fetch_max_smart,
         #[cfg(target_arch = "aarch64")]
         Variant::Hardware => fetch_max_hardware,
         #[cfg(target_arch = "aarch64")]
         Variant::Faster => fetch_max_faster,
      }
   }
}

/// Retries a CAS proposing `max(current, candidate)` until it succeeds, so
/// every call performs a store even when the candidate loses. Maximum
/// ordering fidelity, maximum coherence traffic.
#[inline]
pub fn fetch_max_strong(target: &AtomicI64, value: i64, order: MemOrder) -> i64 {
   let mut cur = target.load(order.read());
   loop {
      match target.compare_exchange_weak(cur, cur.max(value), order.rmw(), order.read()) {
         Ok(prev) => return prev,
         Err(seen) => cur = seen,
      }
   }
}

/// Retries a CAS proposing the candidate itself and bails out as soon as the
/// observed value already dominates it. The no-op path performs no store at
/// all, even under release orderings; callers that need the release must use
/// `smart` or `strong`.
#[inline]
pub fn fetch_max_weak(target: &AtomicI64, value: i64, order: MemOrder) -> i64 {
   let mut cur = target.load(order.read());
   while cur < value {
      match target.compare_exchange_weak(cur, value, order.rmw(), order.read()) {
         Ok(prev) => return prev,
         Err(seen) => cur = seen,
      }
   }
   cur
}

/// Like `weak`, but when the no-op path is taken under a release-type
/// ordering, issues a zero-valued `fetch_add` so the call still publishes.
/// One extra atomic op on the ordering-sensitive path only.
#[inline]
pub fn fetch_max_smart(target: &AtomicI64, value: i64, order: MemOrder) -> i64 {
   let mut cur = target.load(order.read());
   while cur < value {
      match target.compare_exchange_weak(cur, value, order.rmw(), order.read()) {
         Ok(prev) => return prev,
         Err(seen) => cur = seen,
      }
   }

   // dummy write standing in for the store the early exit skipped
   if order.wants_release() {
      target.fetch_add(0, order.rmw());
   }
   cur
}

/// Single hardware atomic max (LSE `ldsmax` on aarch64).
#[cfg(target_arch = "aarch64")]
#[inline]
pub fn fetch_max_hardware(target: &AtomicI64, value: i64, order: MemOrder) -> i64 {
   target.fetch_max(value, order.rmw())
}

/// Load-and-compare fast path that skips the hardware op entirely when the
/// candidate cannot win. No store on the no-op path, like `weak`.
#[cfg(target_arch = "aarch64")]
#[inline]
pub fn fetch_max_faster(target: &AtomicI64, value: i64, order: MemOrder) -> i64 {
   let cur = target.load(order.read());
   if cur >= value {
      return cur;
   }
   fetch_max_hardware(target, value, order)
}
