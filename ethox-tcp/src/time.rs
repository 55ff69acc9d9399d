/*! Time structures.

The engine does not consult a wall clock. Instead the user drives it with a periodic tick and all
timers, RTT samples and timestamp option values are expressed in those ticks.

 - [Tick] is an absolute point on the engine clock.
 - [Expiration] records when a timer is due, if ever.

[Tick]: struct.Tick.html
[Expiration]: enum.Expiration.html
*/
use core::{cmp, fmt, ops};

/// Number of ticks per second.
///
/// The user should call the engine tick every `1000 / TICK_HZ` milliseconds.
pub const TICK_HZ: u32 = 5;

/// A point in time measured in engine ticks.
///
/// The counter wraps around after 2<sup>32</sup> ticks. Like sequence numbers, two ticks are
/// compared by the sign of their wrapping difference, which is meaningful as long as they are
/// less than 2<sup>31</sup> ticks apart. At 5Hz that is more than 13 years.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Tick(pub u32);

/// An expiration time, inversion of `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Expires at the given tick.
    When(Tick),
    /// Never expires.
    Never,
}

use Expiration::{When, Never};

impl Tick {
    /// The counter value at engine start.
    pub const ZERO: Tick = Tick(0);

    /// Advance the clock by one tick.
    pub fn advance(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// The number of ticks elapsed since an earlier point.
    ///
    /// Returns `0` when `earlier` actually lies in the future.
    pub fn since(self, earlier: Tick) -> u32 {
        let diff = self.0.wrapping_sub(earlier.0) as i32;
        if diff < 0 { 0 } else { diff as u32 }
    }

    /// The raw counter value, as echoed in the timestamp option.
    pub fn value(self) -> u32 {
        self.0
    }
}

/// Convert whole seconds into ticks.
pub fn secs_to_ticks(secs: u32) -> u32 {
    secs.saturating_mul(TICK_HZ)
}

impl ops::Add<u32> for Tick {
    type Output = Tick;

    fn add(self, rhs: u32) -> Tick {
        Tick(self.0.wrapping_add(rhs))
    }
}

impl ops::AddAssign<u32> for Tick {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl ops::Sub<u32> for Tick {
    type Output = Tick;

    fn sub(self, rhs: u32) -> Tick {
        Tick(self.0.wrapping_sub(rhs))
    }
}

impl cmp::PartialOrd for Tick {
    fn partial_cmp(&self, other: &Tick) -> Option<cmp::Ordering> {
        (self.0.wrapping_sub(other.0) as i32).partial_cmp(&0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl Expiration {
    /// Check if the expiration is due at the given tick.
    pub fn is_due(self, now: Tick) -> bool {
        match self {
            When(at) => at <= now,
            Never => false,
        }
    }

    /// The number of ticks remaining, zero when already due.
    pub fn remaining(self, now: Tick) -> Option<u32> {
        match self {
            When(at) => Some(at.since(now)),
            Never => None,
        }
    }

    /// The earlier of two expirations.
    pub fn min(self, other: Expiration) -> Expiration {
        match (self, other) {
            (When(a), When(b)) => if a <= b { When(a) } else { When(b) },
            (When(a), Never) | (Never, When(a)) => When(a),
            (Never, Never) => Never,
        }
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Expiration::Never
    }
}

impl From<Tick> for Expiration {
    fn from(tick: Tick) -> Self {
        When(tick)
    }
}
