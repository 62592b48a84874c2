use foundation::time::Time;

/// A single soft deadline that can be re-armed.
///
/// Re-arming replaces the previous deadline, the same way a pending timeout
/// is cleared before a new one is scheduled.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Deadline {
    at: Option<Time>,
}

impl Deadline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, now: Time, after_s: f64) {
        self.at = Some(now.after(after_s));
    }

    pub fn clear(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    pub fn expires_at(&self) -> Option<Time> {
        self.at
    }

    pub fn is_expired(&self, now: Time) -> bool {
        self.at.is_some_and(|at| now >= at)
    }

    /// Clears the deadline and returns `true` if it had expired.
    pub fn take_expired(&mut self, now: Time) -> bool {
        if self.is_expired(now) {
            self.at = None;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::Deadline;
    use foundation::time::Time;

    #[test]
    fn expires_once_after_delay() {
        let mut d = Deadline::new();
        assert!(!d.is_expired(Time(100.0)));

        d.arm(Time(1.0), 3.0);
        assert!(!d.take_expired(Time(3.9)));
        assert!(d.take_expired(Time(4.0)));
        assert!(!d.is_armed());
        assert!(!d.take_expired(Time(10.0)));
    }

    #[test]
    fn rearming_replaces_previous_deadline() {
        let mut d = Deadline::new();
        d.arm(Time(0.0), 3.0);
        d.arm(Time(2.0), 3.0);
        assert!(!d.is_expired(Time(3.5)));
        assert_eq!(d.expires_at(), Some(Time(5.0)));
    }
}
