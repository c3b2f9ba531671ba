use crate::collections::{EventCollection, NamedCollection};
use crate::models::{Instrument, Order, OrderId, Point, Position};
use std::collections::HashMap;

/// Simulated trading account
///
/// The four order/position collections are the public face of the account;
/// `brackets` is the arena of child orders still waiting for their parent to fill.
#[derive(Debug)]
pub struct Account {
    pub name: String,
    pub balance: f64,
    pub initial_balance: f64,
    pub leverage: f64,
    pub currency: String,
    pub instruments: NamedCollection<Instrument>,
    /// Orders that reached a terminal state
    pub orders: EventCollection<Order>,
    pub active_orders: EventCollection<Order>,
    /// Closed positions
    pub positions: EventCollection<Position>,
    pub active_positions: EventCollection<Position>,
    pub(crate) brackets: HashMap<OrderId, Order>,
}

impl Account {
    pub fn new(name: impl Into<String>, balance: f64) -> Self {
        Self {
            name: name.into(),
            balance,
            initial_balance: balance,
            leverage: 1.0,
            currency: "USD".to_string(),
            instruments: NamedCollection::new(),
            orders: EventCollection::new(),
            active_orders: EventCollection::new(),
            positions: EventCollection::new(),
            active_positions: EventCollection::new(),
            brackets: HashMap::new(),
        }
    }

    pub fn with_instrument(mut self, instrument: Instrument) -> Self {
        self.instruments.insert(instrument);
        self
    }

    /// Latest bar of an instrument
    pub fn quote(&self, instrument: &str) -> Option<&Point> {
        self.instruments.get(instrument)?.quote()
    }

    pub fn active_position(&self, instrument: &str) -> Option<&Position> {
        self.active_positions
            .find(|position| position.instrument() == instrument)
    }

    pub fn active_order(&self, id: OrderId) -> Option<&Order> {
        self.active_orders.find(|order| order.id == id)
    }

    /// Child order parked until its parent fills
    pub fn bracket(&self, id: OrderId) -> Option<&Order> {
        self.brackets.get(&id)
    }

    pub fn bracket_count(&self) -> usize {
        self.brackets.len()
    }

    /// Sum of realized gain/loss over closed positions
    pub fn realized_gain_loss(&self) -> f64 {
        self.positions.iter().filter_map(|p| p.gain_loss).sum()
    }

    /// Sum of current estimates over active positions
    pub fn unrealized_gain_loss(&self) -> f64 {
        self.active_positions
            .iter()
            .map(|p| p.gain_loss_estimate)
            .sum()
    }
}
