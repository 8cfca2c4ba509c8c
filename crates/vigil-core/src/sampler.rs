//! Frame sampling: which frames get a full detection cycle, and which
//! full cycles get the low-light enhancement pass first.

/// Deterministic sampling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSampler {
    /// Frames skipped between two full cycles.
    pub skip_interval: u64,
    /// Enhance every Nth full cycle; 0 disables enhancement.
    pub enhance_every: u64,
}

impl FrameSampler {
    pub fn new(skip_interval: u64, enhance_every: u64) -> Self {
        Self {
            skip_interval,
            enhance_every,
        }
    }

    /// Whether frame `frame_index` (1-based) runs a full cycle.
    ///
    /// Every `(skip_interval + 1)`-th frame is processed; the rest reuse the cache.
    /// A period that does not fit in `u64` is never reached.
    pub fn should_process_fully(&self, frame_index: u64) -> bool {
        match self.skip_interval.checked_add(1) {
            Some(period) => frame_index % period == 0,
            None => false,
        }
    }

    /// Whether full cycle `cycle_index` (1-based) is enhanced before encoding.
    pub fn should_enhance(&self, cycle_index: u64) -> bool {
        self.enhance_every > 0 && cycle_index % self.enhance_every == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_interval_two() {
        let s = FrameSampler::new(2, 10);
        let full: Vec<u64> = (1..=6).filter(|&i| s.should_process_fully(i)).collect();
        assert_eq!(full, vec![3, 6]);
    }

    #[test]
    fn test_skip_interval_zero_processes_every_frame() {
        let s = FrameSampler::new(0, 10);
        assert!((1..=20).all(|i| s.should_process_fully(i)));
    }

    #[test]
    fn test_max_skip_interval_never_processes() {
        let s = FrameSampler::new(u64::MAX, 10);
        assert!(!s.should_process_fully(1));
        assert!(!s.should_process_fully(u64::MAX));
    }

    #[test]
    fn test_enhance_cadence_counts_cycles() {
        let s = FrameSampler::new(2, 4);
        let enhanced: Vec<u64> = (1..=12).filter(|&c| s.should_enhance(c)).collect();
        assert_eq!(enhanced, vec![4, 8, 12]);
    }

    #[test]
    fn test_enhance_disabled() {
        let s = FrameSampler::new(2, 0);
        assert!(!(1..=50).any(|c| s.should_enhance(c)));
    }
}
