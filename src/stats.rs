// Online mean/variance accumulator (Welford 1962).
//
// Numerically stable one-pass form; samples are pushed as they are produced
// and never retained.

#[derive(Debug, Default, Clone)]
pub struct Stats {
   n: u64,
   mean: f64,
   m2: f64, // sum of squared deviations from the running mean
}

impl Stats {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn push(&mut self, x: f64) {
      self.n += 1;
      let delta = x - self.mean;
      self.mean += delta / self.n as f64;
      self.m2 += delta * (x - self.mean);
   }

   #[inline]
   pub fn len(&self) -> u64 {
      self.n
   }

   #[inline]
   pub fn is_empty(&self) -> bool {
      self.n == 0
   }

   /// Mean of all pushed samples, 0.0 when none were pushed.
   pub fn mean(&self) -> f64 {
      if self.n > 0 {
         self.mean
      } else {
         0.0
      }
   }

   /// Sample variance (n - 1 denominator), 0.0 for fewer than two samples.
   pub fn variance(&self) -> f64 {
      if self.n > 1 {
         self.m2 / (self.n - 1) as f64
      } else {
         0.0
      }
   }

   pub fn stdev(&self) -> f64 {
      self.variance().sqrt()
   }
}
