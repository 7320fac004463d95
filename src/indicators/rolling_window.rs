use super::IndicatorError;
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Fixed-capacity rolling window of decimal samples
///
/// Once `capacity` values have been added, each new value evicts the oldest.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingWindow {
    values: VecDeque<Decimal>,
    capacity: usize,
}

impl RollingWindow {
    /// Create a new window
    ///
    /// # Arguments
    /// * `capacity` - Number of most recent values kept, must be at least 1
    pub fn new(capacity: usize) -> Result<Self, IndicatorError> {
        if capacity == 0 {
            return Err(IndicatorError::InvalidWindow(capacity));
        }

        Ok(Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Add a value, evicting the oldest one if the window is full
    pub fn add(&mut self, value: Decimal) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Arithmetic mean of the held values, zero when empty
    pub fn average(&self) -> Result<Decimal, IndicatorError> {
        if self.values.is_empty() {
            return Ok(Decimal::ZERO);
        }

        checked_sum(self.values.iter())?
            .checked_div(Decimal::from(self.values.len()))
            .ok_or(IndicatorError::Overflow("average"))
    }

    /// Held values, oldest first
    pub fn values(&self) -> Vec<Decimal> {
        self.values.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Sum that reports overflow instead of panicking
pub fn checked_sum<'a>(values: impl IntoIterator<Item = &'a Decimal>) -> Result<Decimal, IndicatorError> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, value| acc.checked_add(*value))
        .ok_or(IndicatorError::Overflow("sum"))
}
