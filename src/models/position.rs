use crate::models::{Instrument, Order, OrderId, OrderSide, Point};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One fill that contributes to a position's open price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub price: f64,
    pub size: f64,
    pub time: DateTime<Utc>,
}

/// Netted exposure on one instrument
///
/// Wraps the order that opened it. Estimates are refreshed from the latest quote;
/// `gain_loss` and `gain_loss_points` are only set once the position is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub order: Order,
    pub open_price: f64,
    pub close_price: Option<f64>,
    pub close_time: Option<DateTime<Utc>>,
    pub open_prices: Vec<Lot>,
    pub gain_loss: Option<f64>,
    pub gain_loss_points: Option<f64>,
    pub gain_loss_estimate: f64,
    pub gain_loss_points_estimate: f64,
    pub gain_loss_min: f64,
    pub gain_loss_max: f64,
    pub gain_loss_points_min: f64,
    pub gain_loss_points_max: f64,
}

impl Position {
    /// Create a position from its originating order and fills
    ///
    /// Size comes from the order; open price is the size-weighted average of `lots`.
    pub fn new(order: Order, lots: Vec<Lot>) -> Self {
        let open_price = weighted_price(&lots)
            .or(order.price)
            .unwrap_or_default();

        Self {
            order,
            open_price,
            close_price: None,
            close_time: None,
            open_prices: lots,
            gain_loss: None,
            gain_loss_points: None,
            gain_loss_estimate: 0.0,
            gain_loss_points_estimate: 0.0,
            gain_loss_min: 0.0,
            gain_loss_max: 0.0,
            gain_loss_points_min: 0.0,
            gain_loss_points_max: 0.0,
        }
    }

    pub fn id(&self) -> OrderId {
        self.order.id
    }

    pub fn instrument(&self) -> &str {
        &self.order.instrument
    }

    pub fn side(&self) -> OrderSide {
        self.order.side
    }

    pub fn size(&self) -> f64 {
        self.order.size
    }

    pub fn is_active(&self) -> bool {
        self.close_time.is_none() && self.order.size != 0.0
    }

    /// Price the position would close at: bid for a long, ask for a short
    pub fn close_price_estimate(&self, quote: &Point) -> Option<f64> {
        match self.order.side {
            OrderSide::Buy => quote.bid,
            OrderSide::Sell => quote.ask,
        }
    }

    /// Recompute unrealized gain/loss against `quote` and widen the excursion range
    ///
    /// # Returns
    /// The currency estimate, or None when the quote or instrument can't price it
    pub fn estimate(&mut self, quote: &Point, instrument: &Instrument) -> Option<f64> {
        let close = self.close_price_estimate(quote)?;
        let points = (close - self.open_price) * self.order.side.direction();

        self.gain_loss_points_estimate = points;
        self.gain_loss_points_min = self.gain_loss_points_min.min(points);
        self.gain_loss_points_max = self.gain_loss_points_max.max(points);

        let Some(value) = instrument.currency_delta(points) else {
            tracing::warn!(instrument = %instrument.name, "Incorrect instrument, step size is zero");
            return None;
        };

        let commission = instrument.commission * self.open_prices.len() as f64 * 2.0;
        let currency = self.order.size * (value - commission);

        self.gain_loss_estimate = currency;
        self.gain_loss_min = self.gain_loss_min.min(currency);
        self.gain_loss_max = self.gain_loss_max.max(currency);

        Some(currency)
    }

    /// Close at `price`, freezing gain/loss at the estimate for `quote`
    ///
    /// # Returns
    /// The realized gain/loss in account currency
    pub fn close(
        &mut self,
        price: f64,
        time: DateTime<Utc>,
        quote: &Point,
        instrument: &Instrument,
    ) -> f64 {
        self.estimate(quote, instrument);

        self.close_price = Some(price);
        self.close_time = Some(time);
        self.gain_loss = Some(self.gain_loss_estimate);
        self.gain_loss_points = Some(self.gain_loss_points_estimate);

        self.gain_loss_estimate
    }
}

/// Size-weighted average price, None when total size is zero
pub fn weighted_price(lots: &[Lot]) -> Option<f64> {
    let size: f64 = lots.iter().map(|lot| lot.size).sum();
    if size == 0.0 {
        return None;
    }

    let notional: f64 = lots.iter().map(|lot| lot.size * lot.price).sum();
    Some(notional / size)
}
