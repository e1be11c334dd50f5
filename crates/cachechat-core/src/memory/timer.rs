#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::{_mm_clflush, _mm_lfence, _mm_mfence, _rdtsc};
use thiserror::Error;

/// Errors that can occur while constructing a [`CacheTimer`].
#[derive(Debug, Error)]
pub enum TimerError {
    /// The platform has no serializing timestamp counter or cache flush instruction.
    #[error("no cycle-accurate cache timer available on this platform")]
    Unsupported,
}

/// The platform boundary for everything that touches timing hardware.
///
/// Channels and sessions read the clock, time loads and flush lines only
/// through this trait, so their decision logic can run against a
/// deterministic clock and memory model.
pub trait CacheTimer {
    /// Current timestamp in cycles, serialized against surrounding loads.
    fn now(&self) -> u64;

    /// Loads `addr` once and returns the latency of that load in cycles.
    ///
    /// # Safety
    ///
    /// `addr` must be valid for reads.
    unsafe fn time_access(&self, addr: *const u8) -> u64;

    /// Loads `addr` without timing it.
    ///
    /// # Safety
    ///
    /// `addr` must be valid for reads.
    unsafe fn access(&self, addr: *const u8);

    /// Evicts the cache line containing `addr` from the whole cache hierarchy.
    ///
    /// # Safety
    ///
    /// `addr` must be valid for reads.
    unsafe fn flush(&self, addr: *const u8);
}

/// Busy-waits until `timer` reaches `deadline`.
///
/// No system call is made, so the calling thread keeps its core.
pub fn wait_until<T: CacheTimer + ?Sized>(timer: &T, deadline: u64) {
    while timer.now() < deadline {
        std::hint::spin_loop();
    }
}

/// Timestamp counter based timer for x86_64.
#[derive(Debug, Default, Clone, Copy)]
pub struct TscTimer;

#[cfg(target_arch = "x86_64")]
impl CacheTimer for TscTimer {
    fn now(&self) -> u64 {
        unsafe {
            _mm_lfence();
            let t = _rdtsc();
            _mm_lfence();
            t
        }
    }

    unsafe fn time_access(&self, addr: *const u8) -> u64 {
        unsafe {
            _mm_lfence();
            let start = _rdtsc();
            _mm_lfence();
            std::ptr::read_volatile(addr);
            _mm_lfence();
            let end = _rdtsc();
            end.wrapping_sub(start)
        }
    }

    unsafe fn access(&self, addr: *const u8) {
        unsafe { std::ptr::read_volatile(addr) };
    }

    unsafe fn flush(&self, addr: *const u8) {
        unsafe {
            _mm_clflush(addr);
            _mm_mfence();
        }
    }
}

/// Constructs the cycle-accurate timer for the running platform.
///
/// # Errors
///
/// Returns [`TimerError::Unsupported`] on anything but x86_64 with SSE2.
pub fn construct_cache_timer() -> Result<Box<dyn CacheTimer>, TimerError> {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("sse2") {
            return Ok(Box::new(TscTimer));
        }
    }
    Err(TimerError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct StepClock(Cell<u64>);

    impl CacheTimer for StepClock {
        fn now(&self) -> u64 {
            let t = self.0.get();
            self.0.set(t + 10);
            t
        }
        unsafe fn time_access(&self, _addr: *const u8) -> u64 {
            0
        }
        unsafe fn access(&self, _addr: *const u8) {}
        unsafe fn flush(&self, _addr: *const u8) {}
    }

    #[test]
    fn test_wait_until_returns_at_deadline() {
        let clock = StepClock(Cell::new(0));
        wait_until(&clock, 95);
        assert_eq!(clock.0.get(), 110);
        wait_until(&clock, 50);
        assert_eq!(clock.0.get(), 120);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    #[ignore = "depends on the cache hierarchy of the host"]
    fn test_tsc_cached_faster_than_flushed() -> anyhow::Result<()> {
        let timer = construct_cache_timer()?;
        let buf = vec![0u8; 4096];
        let addr = buf.as_ptr();
        let mut hit = 0;
        let mut miss = 0;
        for _ in 0..1000 {
            unsafe {
                timer.access(addr);
                hit += timer.time_access(addr);
                timer.flush(addr);
                miss += timer.time_access(addr);
            }
        }
        assert!(hit < miss, "hit {} >= miss {}", hit, miss);
        Ok(())
    }
}
