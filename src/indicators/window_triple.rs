use super::{IndicatorError, RollingWindow};
use rust_decimal::Decimal;

/// Price, volume and price×volume windows of equal length, always advanced together
#[derive(Debug, Clone, PartialEq)]
pub struct WindowTriple {
    price: RollingWindow,
    volume: RollingWindow,
    price_volume: RollingWindow,
}

impl WindowTriple {
    pub fn new(length: usize) -> Result<Self, IndicatorError> {
        Ok(Self {
            price: RollingWindow::new(length)?,
            volume: RollingWindow::new(length)?,
            price_volume: RollingWindow::new(length)?,
        })
    }

    /// Advance all three windows, or none of them if price × volume overflows
    pub fn add(&mut self, price: Decimal, volume: Decimal) -> Result<(), IndicatorError> {
        let price_volume = price
            .checked_mul(volume)
            .ok_or(IndicatorError::Overflow("price_volume"))?;

        self.price.add(price);
        self.volume.add(volume);
        self.price_volume.add(price_volume);
        Ok(())
    }

    pub fn price(&self) -> &RollingWindow {
        &self.price
    }

    pub fn volume(&self) -> &RollingWindow {
        &self.volume
    }

    pub fn price_volume(&self) -> &RollingWindow {
        &self.price_volume
    }

    pub fn length(&self) -> usize {
        self.price.capacity()
    }

    /// Volume weighted average price over the window, `None` without volume
    pub fn vwap(&self) -> Result<Option<Decimal>, IndicatorError> {
        Ok(self
            .price_volume
            .average()?
            .checked_div(self.volume.average()?))
    }
}
