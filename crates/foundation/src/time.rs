/// Monotonic time in seconds, supplied by the host.
///
/// Nothing in the core reads a wall clock; callers pass `Time` explicitly so
/// timeouts stay replayable in tests.
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Default)]
pub struct Time(pub f64);

impl Time {
    pub const ZERO: Time = Time(0.0);

    pub fn from_millis(ms: u64) -> Self {
        Time(ms as f64 / 1000.0)
    }

    pub fn seconds(self) -> f64 {
        self.0
    }

    pub fn after(self, seconds: f64) -> Self {
        Time(self.0 + seconds)
    }

    pub fn since(self, earlier: Time) -> f64 {
        (self.0 - earlier.0).max(0.0)
    }
}
