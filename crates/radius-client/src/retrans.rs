//! Retransmission schedule
//!
//! RFC 2865 Section 9 cadence: the first wait is the initial interval, each
//! subsequent wait roughly doubles, every wait is pulled down by a
//! pseudo-random jitter, and the per-try ceiling, aggregate duration budget,
//! and try count budget each end the schedule for the current server.

use crate::config::ServerSettings;
use std::sync::OnceLock;
use std::time::Instant;

/// Per-server retransmission knobs, snapshotted out of [`ServerSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransPolicy {
    /// Initial interval, ms
    pub init: u64,
    /// Per-try ceiling, ms (0 = unbounded)
    pub max: u64,
    /// Aggregate budget, ms (0 = unbounded)
    pub duration_max: u64,
    /// Try budget (0 = unbounded)
    pub count_max: usize,
}

impl From<&ServerSettings> for RetransPolicy {
    fn from(s: &ServerSettings) -> Self {
        RetransPolicy {
            init: s.retrans_time_init,
            max: s.retrans_time_max,
            duration_max: s.retrans_duration_max,
            count_max: s.retrans_count_max,
        }
    }
}

/// Live schedule state for one query against one server.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetransState {
    /// Timeouts observed against the current server
    pub count: usize,
    /// Next interval, ms
    pub time: u64,
    /// Accumulated wait, ms
    pub duration: u64,
}

impl RetransState {
    /// Fresh schedule for a (possibly new) server: jittered initial
    /// interval, counters reset.
    pub fn start(policy: &RetransPolicy) -> Self {
        let mut time = jittered(policy.init);
        if policy.max != 0 && time > policy.max {
            time = jittered(policy.max);
        }
        RetransState {
            count: 0,
            time,
            duration: 0,
        }
    }

    /// Account for one timer expiry and compute the next interval.
    ///
    /// `None` means the budget for this server is spent: the try count or
    /// aggregate duration is exhausted, or the clamped remainder is too
    /// short for a meaningful retry.
    pub fn on_timeout(&mut self, policy: &RetransPolicy) -> Option<u64> {
        self.count += 1;
        self.duration += self.time;

        if policy.count_max != 0 && self.count >= policy.count_max {
            return None;
        }
        if policy.duration_max != 0 && self.duration >= policy.duration_max {
            return None;
        }

        let mut next = apply_jitter(2 * self.time, self.time);
        if policy.max != 0 && next > policy.max {
            next = jittered(policy.max);
        }
        if policy.duration_max != 0 && self.duration + next >= policy.duration_max {
            next = policy.duration_max - self.duration;
            if next < policy.init {
                return None;
            }
        }

        self.time = next;
        Some(next)
    }
}

/// Signed pseudo-random factor with magnitude at most `input`.
///
/// A monotonic timestamp and the input are each CRC-32 hashed, XORed, and
/// folded byte-wise into a single byte `b`. The low seven bits (bumped past
/// zero) divide the input to form the magnitude; the top bit flips the sign.
pub fn rnd_factor(input: u64) -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let ts = EPOCH
        .get_or_init(Instant::now)
        .elapsed()
        .as_nanos() as u64;

    let h = crc32fast::hash(&ts.to_le_bytes()) ^ crc32fast::hash(&input.to_le_bytes());
    let b = h.to_le_bytes().iter().fold(0u8, |acc, x| acc ^ x);

    let mut k = b & 0x7f;
    if k == 0 {
        k += 1; // Prevent division by zero.
    }

    let magnitude = (input / u64::from(k)) as i64;
    if b & 0x80 != 0 { -magnitude } else { magnitude }
}

/// `nominal - rnd_factor(jitter_input)`, saturated at zero.
fn apply_jitter(nominal: u64, jitter_input: u64) -> u64 {
    let jittered = nominal as i64 - rnd_factor(jitter_input);
    jittered.max(0) as u64
}

/// `input - rnd_factor(input)`.
fn jittered(input: u64) -> u64 {
    apply_jitter(input, input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(init: u64, max: u64, duration_max: u64, count_max: usize) -> RetransPolicy {
        RetransPolicy {
            init,
            max,
            duration_max,
            count_max,
        }
    }

    #[test]
    fn test_rnd_factor_bounded() {
        for input in [1u64, 100, 1000, 60_000, u32::MAX as u64] {
            for _ in 0..64 {
                let f = rnd_factor(input);
                assert!(
                    f.unsigned_abs() <= input,
                    "factor {f} exceeds input {input}"
                );
            }
        }
    }

    #[test]
    fn test_rnd_factor_zero_input() {
        for _ in 0..16 {
            assert_eq!(rnd_factor(0), 0);
        }
    }

    #[test]
    fn test_rnd_factor_both_signs() {
        // Statistical contract only: both signs show up over enough draws.
        let mut pos = 0usize;
        let mut neg = 0usize;
        for _ in 0..512 {
            let f = rnd_factor(1_000_000);
            if f > 0 {
                pos += 1;
            } else if f < 0 {
                neg += 1;
            }
            std::hint::black_box(f);
        }
        assert!(pos > 0, "no positive factors in 512 draws");
        assert!(neg > 0, "no negative factors in 512 draws");
    }

    #[test]
    fn test_start_within_bounds() {
        let p = policy(1000, 0, 0, 0);
        for _ in 0..64 {
            let s = RetransState::start(&p);
            assert!(s.time <= 2000, "initial interval {} above 2x init", s.time);
            assert_eq!(s.count, 0);
            assert_eq!(s.duration, 0);
        }
    }

    #[test]
    fn test_schedule_roughly_doubles() {
        let p = policy(100, 0, 0, 0);
        let mut s = RetransState {
            count: 0,
            time: 100,
            duration: 0,
        };
        let next = s.on_timeout(&p).unwrap();
        // 2*prev with jitter of magnitude at most prev.
        assert!((100..=300).contains(&next), "next interval {next}");
        assert_eq!(s.count, 1);
        assert_eq!(s.duration, 100);
    }

    #[test]
    fn test_ceiling_applies() {
        let p = policy(100, 150, 0, 0);
        let mut s = RetransState {
            count: 0,
            time: 140,
            duration: 0,
        };
        let next = s.on_timeout(&p).unwrap();
        assert!(next <= 300, "ceiling with jitter exceeded: {next}");
    }

    #[test]
    fn test_count_budget() {
        let p = policy(100, 0, 0, 3);
        let mut s = RetransState {
            count: 0,
            time: 100,
            duration: 0,
        };
        assert!(s.on_timeout(&p).is_some());
        assert!(s.on_timeout(&p).is_some());
        assert!(s.on_timeout(&p).is_none());
        assert_eq!(s.count, 3);
    }

    #[test]
    fn test_duration_budget() {
        let p = policy(100, 0, 250, 0);
        let mut s = RetransState {
            count: 0,
            time: 200,
            duration: 100,
        };
        // duration reaches 300 >= 250 at accounting time.
        assert!(s.on_timeout(&p).is_none());
    }

    #[test]
    fn test_duration_clamp_too_small_gives_up() {
        let p = policy(100, 0, 260, 0);
        let mut s = RetransState {
            count: 0,
            time: 200,
            duration: 0,
        };
        // After accounting duration = 200; remainder is 60 < init.
        assert!(s.on_timeout(&p).is_none());
    }

    #[test]
    fn test_duration_clamp_remainder_used() {
        let p = policy(100, 0, 1000, 0);
        let mut s = RetransState {
            count: 0,
            time: 600,
            duration: 0,
        };
        if let Some(next) = s.on_timeout(&p) {
            // Whatever the jitter did, the schedule never overruns the budget.
            assert!(s.duration + next <= 1000);
        }
    }
}
