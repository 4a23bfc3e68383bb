// CPU detection and thread pinning.

use log::warn;
use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;

/// Number of logical CPUs currently online.
pub fn count_cpus() -> usize {
   let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
   if n < 1 {
      1
   } else {
      n as usize
   }
}

/// Pin the calling thread to logical CPU `cpu`. Returns false on failure;
/// callers treat that as fatal for the measurement, not as a soft fallback.
pub fn pin_to_cpu(cpu: usize) -> bool {
   let mut set = CpuSet::new();
   if set.set(cpu).is_err() {
      warn!("CPU id out of range: {cpu}");
      return false;
   }
   // Pid 0 targets the calling thread.
   if sched_setaffinity(Pid::from_raw(0), &set).is_err() {
      warn!("Unable to pin CPU: {cpu}");
      return false;
   }
   true
}
