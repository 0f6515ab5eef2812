//! PTS/STC comparison shared by both decode pipelines.
//!
//! Both DVB Subtitles and Teletext gate segment/page application on comparing the
//! PES packet's presentation timestamp against the host's system time clock. The
//! comparison operates on 45kHz ticks (half the 90kHz MPEG system clock) and must
//! tolerate the 33-bit counter wrapping around.

/// Lower bound, in 45kHz ticks, below which a PTS is considered implausibly close
/// to `now` to be worth an early hold (75ms).
pub const TS_MIN: i64 = 75 * 45;

/// Upper bound, in 45kHz ticks, beyond which a PTS is considered too far in the
/// future to be a legitimate near-term presentation time (30s).
pub const TS_MAX: i64 = 30 * 45_000;

/// Maximum amount, in 45kHz ticks, a PTS may trail the STC and still be shown
/// rather than dropped as stale (500ms).
pub const LATE_MAX: i64 = 500 * 45;

/// A system time clock sample, tagged because the host's clock source may not
/// always be available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StcTime {
    /// STC derived from the high 32 bits of a 33-bit PTS/PCR extension (unused by
    /// this crate's 45kHz domain but retained for host clock sources that report
    /// it this way).
    High32(u32),
    /// STC expressed directly in 45kHz ticks, wrapping at 2^32.
    Low32(u32),
    /// No STC is currently available from the host.
    Invalid,
}

impl StcTime {
    /// Returns the 45kHz tick count, or `None` if the clock is [`StcTime::Invalid`].
    pub fn ticks(self) -> Option<u32> {
        match self {
            StcTime::High32(t) | StcTime::Low32(t) => Some(t),
            StcTime::Invalid => None,
        }
    }
}

/// Outcome of comparing a packet's PTS against the current STC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateResult {
    /// The packet's presentation time has arrived (or no PTS was attached at all,
    /// per spec semantics for undated packets): apply it now.
    Process,
    /// The packet's presentation time is still in the future: hold it and retry
    /// this same packet on a later `process` call.
    Hold,
    /// The packet's presentation time has already passed by more than
    /// [`LATE_MAX`]: drop it without applying.
    Drop,
}

/// Stateless PTS/STC comparator implementing spec's signed 32-bit wraparound delta
/// semantics.
///
/// 45kHz ticks are derived from PES PTS values, which are 33-bit counters; this gate
/// only ever compares the low 32 bits, relying on a signed difference to absorb a
/// single wraparound. Differences whose magnitude would require multiple wraps to
/// explain are outside the range this format's timestamps ever produce in practice.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingGate;

impl TimingGate {
    /// Builds a new gate. Stateless; provided for symmetry with the rest of the
    /// crate's constructor-style API.
    pub fn new() -> Self {
        Self
    }

    /// Compares `pts` (45kHz ticks, may have no value for an undated packet) against
    /// `stc` and returns the action the caller should take.
    pub fn evaluate(&self, pts: Option<u32>, stc: StcTime) -> GateResult {
        let pts = match pts {
            Some(p) => p,
            None => return GateResult::Process,
        };
        let now = match stc.ticks() {
            Some(t) => t,
            None => return GateResult::Hold,
        };

        let delta = pts.wrapping_sub(now) as i32 as i64;

        if delta > TS_MAX {
            // Implausibly far in the future; treat as already-passed wraparound noise.
            return GateResult::Drop;
        }
        if delta > TS_MIN {
            return GateResult::Hold;
        }
        if delta < -LATE_MAX {
            return GateResult::Drop;
        }
        GateResult::Process
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undated_packet_always_processes() {
        let gate = TimingGate::new();
        assert_eq!(
            gate.evaluate(None, StcTime::Invalid),
            GateResult::Process
        );
    }

    #[test]
    fn invalid_stc_holds() {
        let gate = TimingGate::new();
        assert_eq!(
            gate.evaluate(Some(1000), StcTime::Invalid),
            GateResult::Hold
        );
    }

    #[test]
    fn near_future_pts_processes() {
        let gate = TimingGate::new();
        let now = 1_000_000u32;
        assert_eq!(
            gate.evaluate(Some(now + 10), StcTime::Low32(now)),
            GateResult::Process
        );
    }

    #[test]
    fn far_future_pts_holds() {
        let gate = TimingGate::new();
        let now = 1_000_000u32;
        assert_eq!(
            gate.evaluate(Some(now + TS_MIN as u32 + 1000), StcTime::Low32(now)),
            GateResult::Hold
        );
    }

    #[test]
    fn implausibly_far_future_pts_drops() {
        let gate = TimingGate::new();
        let now = 1_000_000u32;
        assert_eq!(
            gate.evaluate(Some(now + TS_MAX as u32 + 1), StcTime::Low32(now)),
            GateResult::Drop
        );
    }

    #[test]
    fn slightly_late_pts_processes() {
        let gate = TimingGate::new();
        let now = 1_000_000u32;
        assert_eq!(
            gate.evaluate(Some(now - 100), StcTime::Low32(now)),
            GateResult::Process
        );
    }

    #[test]
    fn very_late_pts_drops() {
        let gate = TimingGate::new();
        let now = 1_000_000u32;
        assert_eq!(
            gate.evaluate(Some(now - LATE_MAX as u32 - 100), StcTime::Low32(now)),
            GateResult::Drop
        );
    }

    #[test]
    fn pts_wraparound_is_handled() {
        let gate = TimingGate::new();
        let now = u32::MAX - 50;
        let pts = 10u32; // wrapped past 2^32
        assert_eq!(
            gate.evaluate(Some(pts), StcTime::Low32(now)),
            GateResult::Process
        );
    }
}
