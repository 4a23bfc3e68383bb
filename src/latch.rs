// Countdown latch with std::latch semantics (mutex + condvar).
//
// One-shot: the counter only ever goes down, and a drained latch stays
// drained. Rounds that need a fresh rendezvous construct a new `Latch`; see
// `runner::MaxHolder` for the reusable-slot pattern built on top.

use std::sync::{Condvar, Mutex};

#[derive(Debug)]
pub struct Latch {
   count: Mutex<usize>,
   cond: Condvar,
}

impl Latch {
   pub fn new(expected: usize) -> Self {
      Self {
         count: Mutex::new(expected),
         cond: Condvar::new(),
      }
   }

   /// Decrement the counter by `n`, waking all waiters when it reaches zero.
   /// Never blocks.
   pub fn count_down(&self, n: usize) {
      let mut count = self.count.lock().unwrap();
      *count = count.saturating_sub(n);
      if *count == 0 {
         self.cond.notify_all();
      }
   }

   /// True once the counter has reached zero.
   pub fn try_wait(&self) -> bool {
      *self.count.lock().unwrap() == 0
   }

   /// Block until the counter reaches zero.
   pub fn wait(&self) {
      let count = self.count.lock().unwrap();
      let _unused = self
         .cond
         .wait_while(count, |c| *c > 0)
         .unwrap();
   }

   /// Decrement by `n` and block until the counter reaches zero.
   pub fn arrive_and_wait(&self, n: usize) {
      let mut count = self.count.lock().unwrap();
      *count = count.saturating_sub(n);
      if *count == 0 {
         self.cond.notify_all();
         return;
      }
      let _unused = self
         .cond
         .wait_while(count, |c| *c > 0)
         .unwrap();
   }
}
