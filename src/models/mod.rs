// Simulation data model
pub mod account;
pub mod instrument;
pub mod order;
pub mod position;

pub use account::Account;
pub use instrument::Instrument;
pub use order::{Order, OrderId, OrderSide, OrderStatus, OrderType, TimeInForce};
pub use position::{Lot, Position};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// OHLC summary, every field stays None until a quote fills it
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
}

/// A quote at a point in time
///
/// The same struct carries raw ticks and aggregated bars: a bar is a point whose
/// `time` is the bucket start and whose `bar` holds the OHLC of the bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub time: DateTime<Utc>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask_size: Option<f64>,
    pub last: Option<f64>,
    pub bar: Bar,
    /// Name of the owning instrument, set when the tick is emitted
    pub instrument: Option<String>,
    pub account: Option<String>,
    #[serde(skip)]
    pub time_frame: Option<Duration>,
    /// Indicator values attached by name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub series: HashMap<String, Bar>,
}

impl Point {
    /// Create a bid/ask quote
    pub fn quote(time: DateTime<Utc>, bid: f64, ask: f64) -> Self {
        Self {
            time,
            bid: Some(bid),
            ask: Some(ask),
            last: Some(ask),
            ..Self::default()
        }
    }

    /// Best price available for a trade on this point
    pub fn price(&self) -> Option<f64> {
        self.last.or(self.bar.close).or(self.bid).or(self.ask)
    }

    pub fn series(&self, name: &str) -> Option<&Bar> {
        self.series.get(name)
    }

    pub fn set_series(&mut self, name: impl Into<String>, value: Bar) {
        self.series.insert(name.into(), value);
    }
}
