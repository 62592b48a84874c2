/// Per-tick budget for work handed to the host (tile fetches, for example).
///
/// Budgets are abstract units, not wall-clock time, so the order in which work
/// is released stays reproducible.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameBudget {
    remaining_units: u32,
    spent_units: u32,
}

impl FrameBudget {
    pub fn new(units: u32) -> Self {
        Self {
            remaining_units: units,
            spent_units: 0,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(u32::MAX)
    }

    pub fn remaining_units(&self) -> u32 {
        self.remaining_units
    }

    pub fn spent_units(&self) -> u32 {
        self.spent_units
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_units == 0
    }

    /// Consumes `units` if the budget can cover them; otherwise leaves the
    /// budget untouched and returns `false`.
    pub fn try_consume(&mut self, units: u32) -> bool {
        match self.remaining_units.checked_sub(units) {
            Some(rest) => {
                self.remaining_units = rest;
                self.spent_units = self.spent_units.saturating_add(units);
                true
            }
            None => false,
        }
    }
}
