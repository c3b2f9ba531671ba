use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type OrderId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buy, -1 for sell
    pub fn direction(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Stop,
    Limit,
    StopLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Bracket leg waiting for its parent to fill
    Parked,
    Placed,
    Filled,
    PartiallyFilled,
    Cancelled,
    Expired,
    Declined,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    Date,
    FillOrKill,
    GoodTillCancel,
    ImmediateOrKill,
}

/// Order instruction
///
/// Bracket legs point at their parent through `container`; the parent lists
/// them in `children`. Both are ids, the orders themselves live in the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub instrument: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub size: f64,
    pub price: Option<f64>,
    /// Trigger level of a stop-limit order
    pub activation_price: Option<f64>,
    pub time_in_force: Option<TimeInForce>,
    pub status: Option<OrderStatus>,
    pub time: Option<DateTime<Utc>>,
    pub container: Option<OrderId>,
    pub children: Vec<OrderId>,
}

impl Order {
    pub fn new(
        instrument: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        size: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument: instrument.into(),
            side,
            order_type,
            size,
            price: None,
            activation_price: None,
            time_in_force: None,
            status: None,
            time: None,
            container: None,
            children: Vec::new(),
        }
    }

    pub fn market(instrument: impl Into<String>, side: OrderSide, size: f64) -> Self {
        Self::new(instrument, side, OrderType::Market, size)
    }

    pub fn stop(instrument: impl Into<String>, side: OrderSide, size: f64, price: f64) -> Self {
        Self::new(instrument, side, OrderType::Stop, size).with_price(price)
    }

    pub fn limit(instrument: impl Into<String>, side: OrderSide, size: f64, price: f64) -> Self {
        Self::new(instrument, side, OrderType::Limit, size).with_price(price)
    }

    pub fn stop_limit(
        instrument: impl Into<String>,
        side: OrderSide,
        size: f64,
        price: f64,
        activation_price: f64,
    ) -> Self {
        let mut order = Self::new(instrument, side, OrderType::StopLimit, size).with_price(price);
        order.activation_price = Some(activation_price);
        order
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    /// Link `child` as a bracket leg of this order
    pub fn attach(&mut self, child: &mut Order) {
        child.container = Some(self.id);
        if !self.children.contains(&child.id) {
            self.children.push(child.id);
        }
    }

    /// Link every leg to `parent` and return the batch, parent first
    pub fn bracket(mut parent: Order, mut legs: Vec<Order>) -> Vec<Order> {
        for leg in &mut legs {
            parent.attach(leg);
        }

        let mut batch = Vec::with_capacity(legs.len() + 1);
        batch.push(parent);
        batch.extend(legs);
        batch
    }

    /// Price set on the order, ignoring an explicit zero
    pub fn requested_price(&self) -> Option<f64> {
        self.price.filter(|price| *price != 0.0)
    }

    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market
    }
}
