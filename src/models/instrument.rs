use crate::collections::{BarAggregator, EventCollection, Named};
use crate::models::Point;
use chrono::Duration;

/// Tradable instrument with its tick and bar history
#[derive(Debug)]
pub struct Instrument {
    pub name: String,
    pub commission: f64,
    pub contract_size: f64,
    /// Minimum price increment
    pub step_size: f64,
    /// Account-currency worth of one `step_size` move
    pub step_value: f64,
    pub swap_long: f64,
    pub swap_short: f64,
    /// Bar width used when aggregating ticks
    pub time_frame: Option<Duration>,
    pub points: EventCollection<Point>,
    pub point_groups: BarAggregator,
}

impl Instrument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commission: 0.0,
            contract_size: 1.0,
            step_size: 0.01,
            step_value: 0.01,
            swap_long: 0.0,
            swap_short: 0.0,
            time_frame: None,
            points: EventCollection::new(),
            point_groups: BarAggregator::new(),
        }
    }

    pub fn with_time_frame(mut self, time_frame: Duration) -> Self {
        self.time_frame = Some(time_frame);
        self
    }

    pub fn with_steps(mut self, step_size: f64, step_value: f64) -> Self {
        self.step_size = step_size;
        self.step_value = step_value;
        self
    }

    pub fn with_commission(mut self, commission: f64) -> Self {
        self.commission = commission;
        self
    }

    /// Currency value of a price difference
    ///
    /// Returns None when `step_size` is zero.
    pub fn currency_delta(&self, price_delta: f64) -> Option<f64> {
        if self.step_size == 0.0 {
            return None;
        }
        Some(price_delta * (self.step_value / self.step_size))
    }

    /// Most recent bar, the quote orders are matched against
    pub fn quote(&self) -> Option<&Point> {
        self.point_groups.last()
    }
}

impl Named for Instrument {
    fn name(&self) -> &str {
        &self.name
    }
}
