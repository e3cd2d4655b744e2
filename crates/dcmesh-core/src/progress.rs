//! Coarse per-case progress accounting.
//!
//! `overall = index / total * 100 + 100 / total * fraction`, where each stage
//! reports the fraction of a case it completes. Values never go backwards.

/// Fraction of a case done after conversion.
pub const CONVERTED: f64 = 1.0 / 3.0;
/// Small bump once the converted volume carries its canonical name.
pub const RENAMED: f64 = 1.33 / 3.0;
pub const SEGMENTED: f64 = 2.0 / 3.0;
pub const MESHED: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_cases: usize,
    last: u8,
}

impl ProgressTracker {
    pub fn new(total_cases: usize) -> Self {
        Self {
            total_cases: total_cases.max(1),
            last: 0,
        }
    }

    /// Returns the percent to emit, or `None` when it would not advance.
    pub fn advance(&mut self, case_index: usize, fraction: f64) -> Option<u8> {
        let total = self.total_cases as f64;
        let fraction = fraction.clamp(0.0, 1.0);
        let overall = (case_index as f64 / total) * 100.0 + (100.0 / total) * fraction;
        // guard against 99.99999 on the last stage of the last case
        let percent = (overall + 1e-9).floor().clamp(0.0, 100.0) as u8;
        if percent > self.last {
            self.last = percent;
            Some(percent)
        } else {
            None
        }
    }

    /// Forces the run to 100, if it is not already there.
    pub fn complete(&mut self) -> Option<u8> {
        if self.last < 100 {
            self.last = 100;
            Some(100)
        } else {
            None
        }
    }

    pub fn current(&self) -> u8 {
        self.last
    }
}
