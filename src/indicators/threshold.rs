use super::rolling_window::checked_sum;
use super::{IndicatorError, RollingWindow};
use rust_decimal::{Decimal, MathematicalOps};

/// Bollinger style upper band over a window of past indicator values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub basis: Decimal,
    pub deviation: Decimal,
    pub upper: Decimal,
}

impl Threshold {
    /// `upper = mean + multiplier * population std dev` of the window
    pub fn from_window(window: &RollingWindow, multiplier: Decimal) -> Result<Self, IndicatorError> {
        let basis = window.average()?;
        let deviation = population_std_dev(&window.values())?;
        let upper = multiplier
            .checked_mul(deviation)
            .and_then(|band| band.checked_add(basis))
            .ok_or(IndicatorError::Overflow("threshold"))?;

        Ok(Self {
            basis,
            deviation,
            upper,
        })
    }

    /// Strictly above the upper band
    pub fn exceeded_by(&self, value: Decimal) -> bool {
        value > self.upper
    }
}

/// Population standard deviation (divides by n)
pub fn population_std_dev(values: &[Decimal]) -> Result<Decimal, IndicatorError> {
    if values.is_empty() {
        return Err(IndicatorError::EmptyWindow);
    }

    let n = Decimal::from(values.len());
    let mean = checked_sum(values)?
        .checked_div(n)
        .ok_or(IndicatorError::Overflow("mean"))?;

    let mut squares = Decimal::ZERO;
    for value in values {
        squares = value
            .checked_sub(mean)
            .and_then(|diff| diff.checked_mul(diff))
            .and_then(|sq| squares.checked_add(sq))
            .ok_or(IndicatorError::Overflow("variance"))?;
    }

    squares
        .checked_div(n)
        .and_then(|variance| variance.sqrt())
        .ok_or(IndicatorError::Numeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn window_of(values: &[&str]) -> RollingWindow {
        let mut window = RollingWindow::new(values.len()).unwrap();
        for value in values {
            window.add(dec(value));
        }
        window
    }

    #[test]
    fn test_population_std_dev() {
        let values: Vec<Decimal> = ["2", "4", "4", "4", "5", "5", "7", "9"]
            .iter()
            .map(|v| dec(v))
            .collect();
        assert_eq!(population_std_dev(&values).unwrap(), Decimal::from(2));
    }

    #[test]
    fn test_std_dev_of_constant_series_is_zero() {
        let values = vec![dec("1.5"); 10];
        assert_eq!(population_std_dev(&values).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_std_dev_empty() {
        assert_eq!(population_std_dev(&[]), Err(IndicatorError::EmptyWindow));
    }

    #[test]
    fn test_std_dev_overflow_is_an_error() {
        assert_eq!(
            population_std_dev(&[Decimal::MAX, Decimal::MAX]),
            Err(IndicatorError::Overflow("sum"))
        );
        assert_eq!(
            population_std_dev(&[Decimal::MAX, Decimal::MIN]),
            Err(IndicatorError::Overflow("variance"))
        );
    }

    #[test]
    fn test_trigger_boundary() {
        // basis 10, deviation 2, k 1.5 => upper band 13
        let window = window_of(&["8", "12"]);
        let threshold = Threshold::from_window(&window, dec("1.5")).unwrap();

        assert_eq!(threshold.basis, Decimal::from(10));
        assert!((threshold.deviation - Decimal::from(2)).abs() < dec("0.0000000001"));
        assert!((threshold.upper - Decimal::from(13)).abs() < dec("0.0000000001"));

        assert!(!threshold.exceeded_by(dec("12.999999")));
        assert!(threshold.exceeded_by(dec("13.000001")));
    }

    #[test]
    fn test_equal_to_upper_does_not_trigger() {
        let window = window_of(&["3", "3", "3"]);
        let threshold = Threshold::from_window(&window, dec("2.5")).unwrap();

        assert_eq!(threshold.upper, Decimal::from(3));
        assert!(!threshold.exceeded_by(Decimal::from(3)));
    }
}
