//! Duration type used for the inactivity timeout.
//!
//! The SDP client never reads a clock itself; it only hands a [`Duration`] to the host when a
//! request goes out, and the host's timer service calls back into the session when it expires.
//!
//! [`Duration`]: struct.Duration.html

use core::fmt;
use core::ops::{Add, AddAssign};

/// A duration with millisecond resolution.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(u32);

impl Duration {
    /// Creates a `Duration` from a number of milliseconds.
    pub const fn from_millis(millis: u32) -> Self {
        Duration(millis)
    }

    /// Creates a `Duration` representing a number of seconds.
    pub const fn from_secs(secs: u16) -> Self {
        Duration(secs as u32 * 1_000)
    }

    /// Returns the number of whole seconds that fit in `self`.
    pub fn whole_secs(&self) -> u32 {
        self.0 / 1_000
    }

    /// Returns the number of milliseconds represented by `self`.
    pub fn as_millis(&self) -> u32 {
        self.0
    }
}

impl Add for Duration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Duration(self.0.checked_add(rhs.0).expect("duration overflow"))
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.0 / 1_000, self.0 % 1_000)
    }
}

impl defmt::Format for Duration {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(f, "{=u32}.{=u32:03}s", self.0 / 1_000, self.0 % 1_000);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let d = Duration::from_secs(30);
        assert_eq!(d.as_millis(), 30_000);
        assert_eq!(d.whole_secs(), 30);
        assert_eq!(d + Duration::from_millis(500), Duration::from_millis(30_500));
    }

    #[test]
    fn fmt() {
        assert_eq!(format!("{:?}", Duration::from_millis(1_250)), "1.250s");
        assert_eq!(format!("{:?}", Duration::from_millis(42)), "0.042s");
    }
}
