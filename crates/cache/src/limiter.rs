//! Fixed-window arithmetic for action limits.
//!
//! Windows are aligned to multiples of the period, so every process agrees
//! on window boundaries without coordination:
//!
//! ```text
//!   period = 60
//!   now    = 125        window [120, 180)      window_end = 180
//! ```

/// End of the window containing `now`, exclusive.
///
/// `period` must be non-zero.
#[inline]
pub fn window_end(now: u64, period: u64) -> u64 {
    (now / period) * period + period
}

/// Seconds until the window containing `now` closes. Always at least 1.
#[inline]
pub fn window_remaining(now: u64, period: u64) -> u64 {
    window_end(now, period) - now
}
