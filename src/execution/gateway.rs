use super::position_manager::{cancel_orders, create_position};
use super::price_feed::{parse_point, FeedEvent, PointParser, PriceFeed, TickSource};
use super::replay::drive;
use super::validation::validate_order;
use crate::models::{Account, Order, OrderId, OrderSide, OrderStatus, OrderType, Point};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// Order instruction queued through an [`OrderSender`]
#[derive(Debug, Clone)]
pub enum OrderCommand {
    Create(Vec<Order>),
    Update(Vec<Order>),
    Delete(Vec<Order>),
}

/// Cloneable handle for sending orders from inside collection handlers
///
/// Commands are applied by the gateway on its next driver tick, so handlers
/// never need a borrow of the gateway itself.
#[derive(Debug, Clone)]
pub struct OrderSender {
    tx: mpsc::UnboundedSender<OrderCommand>,
}

impl OrderSender {
    pub fn create_orders(&self, orders: Vec<Order>) -> Vec<Order> {
        self.send(OrderCommand::Create(orders.clone()));
        orders
    }

    pub fn update_orders(&self, orders: Vec<Order>) -> Vec<Order> {
        self.send(OrderCommand::Update(orders.clone()));
        orders
    }

    pub fn delete_orders(&self, orders: Vec<Order>) -> Vec<Order> {
        self.send(OrderCommand::Delete(orders.clone()));
        orders
    }

    fn send(&self, command: OrderCommand) {
        if self.tx.send(command).is_err() {
            tracing::warn!("Gateway is gone, order command dropped");
        }
    }
}

/// What one driver tick did
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// A tick was emitted for `instrument`
    Emitted {
        instrument: String,
        time: DateTime<Utc>,
    },
    /// No tick was ready, readers still have lines
    Pending,
    /// All readers are at end of input
    Exhausted,
    Disconnected,
}

/// Exchange simulator that replays tick documents against an account
///
/// Each emitted tick goes into the instrument's raw points and bar aggregator,
/// then queued order commands are applied, pending stop/limit orders are
/// matched and active positions are re-estimated.
pub struct SimulationGateway {
    account: Account,
    source: Box<dyn TickSource>,
    parser: PointParser,
    feed: Option<PriceFeed>,
    sender: OrderSender,
    commands: mpsc::UnboundedReceiver<OrderCommand>,
}

impl SimulationGateway {
    pub fn new(account: Account, source: impl TickSource + 'static) -> Self {
        let (tx, commands) = mpsc::unbounded_channel();

        Self {
            account,
            source: Box::new(source),
            parser: Box::new(parse_point),
            feed: None,
            sender: OrderSender { tx },
            commands,
        }
    }

    /// Replace the default line parser
    pub fn with_parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(&str) -> Option<Point> + Send + 'static,
    {
        self.parser = Box::new(parser);
        self
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Mutable account access, used to attach subscribers before replay
    pub fn account_mut(&mut self) -> &mut Account {
        &mut self.account
    }

    pub fn into_account(self) -> Account {
        self.account
    }

    pub fn order_sender(&self) -> OrderSender {
        self.sender.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.feed.is_some()
    }

    /// Open one reader per instrument
    ///
    /// Failures are logged and leave the gateway disconnected.
    pub fn connect(&mut self) {
        match self.open_feed() {
            Ok(feed) => {
                tracing::info!(
                    account = %self.account.name,
                    "Simulation gateway connected ({} instruments)",
                    feed.len()
                );
                self.feed = Some(feed);
            }
            Err(e) => {
                self.feed = None;
                tracing::error!(account = %self.account.name, "Failed to connect: {:#}", e);
            }
        }
    }

    pub fn disconnect(&mut self) {
        if self.feed.take().is_some() {
            tracing::info!(account = %self.account.name, "Simulation gateway disconnected");
        }
    }

    fn open_feed(&self) -> anyhow::Result<PriceFeed> {
        let mut names = Vec::with_capacity(self.account.instruments.len());

        for instrument in self.account.instruments.iter() {
            let has_time_frame = instrument
                .time_frame
                .is_some_and(|time_frame| time_frame > chrono::Duration::zero());
            if !has_time_frame {
                anyhow::bail!("Instrument {} has no time frame", instrument.name);
            }
            names.push(instrument.name.clone());
        }

        if names.is_empty() {
            anyhow::bail!("Account {} has no instruments", self.account.name);
        }

        PriceFeed::open(self.source.as_ref(), &names)
    }

    /// Run one driver tick
    pub fn step(&mut self) -> Step {
        let Some(feed) = self.feed.as_mut() else {
            return Step::Disconnected;
        };

        match feed.next_point(&self.parser) {
            FeedEvent::Point { index, point } => {
                let Some(name) = feed.instrument(index).map(str::to_string) else {
                    return Step::Pending;
                };
                let time = point.time;

                self.update_point(&name, point);
                self.process_commands();
                self.process_pending_orders(&name);
                self.refresh_positions(&name);

                Step::Emitted {
                    instrument: name,
                    time,
                }
            }
            FeedEvent::Pending => {
                self.process_commands();
                Step::Pending
            }
            FeedEvent::Exhausted => {
                self.process_commands();
                Step::Exhausted
            }
        }
    }

    /// Drain every reader without a timer
    ///
    /// # Returns
    /// Number of ticks emitted
    pub fn replay_all(&mut self) -> usize {
        let mut emitted = 0;
        loop {
            match self.step() {
                Step::Emitted { .. } => emitted += 1,
                Step::Pending => {}
                Step::Exhausted | Step::Disconnected => break,
            }
        }
        emitted
    }

    /// Drive the replay from a fixed-interval timer until every reader is exhausted
    ///
    /// # Arguments
    /// * `speed` - Interval between driver ticks, independent of tick timestamps
    pub async fn run(&mut self, speed: std::time::Duration) -> usize {
        let emitted = drive(speed, || Some(self.step())).await;

        tracing::info!(account = %self.account.name, "Replay finished after {} ticks", emitted);
        emitted
    }

    /// Validate and accept a batch of orders
    ///
    /// A batch with any violation is refused as a whole: violations are logged and
    /// every order comes back `Declined`. Otherwise bracket legs are parked,
    /// market orders fill at once and resting orders become active. Legs of a
    /// parent that fails to fill come back `Cancelled`.
    pub fn create_orders(&mut self, mut orders: Vec<Order>) -> Vec<Order> {
        let mut rejected = false;
        for order in &orders {
            for violation in validate_order(order, &self.account) {
                tracing::error!(order = %order.id, instrument = %order.instrument, "{}", violation);
                rejected = true;
            }
        }

        if rejected {
            for order in &mut orders {
                order.status = Some(OrderStatus::Declined);
            }
            return orders;
        }

        for leg in orders.iter_mut().filter(|o| o.container.is_some()) {
            leg.status = Some(OrderStatus::Parked);
            self.account.brackets.insert(leg.id, leg.clone());
        }

        let mut applied = Vec::with_capacity(orders.len());
        for mut order in orders {
            if order.container.is_some() {
                if !self.account.brackets.contains_key(&order.id) {
                    order.status = Some(OrderStatus::Cancelled);
                }
                applied.push(order);
                continue;
            }

            if order.is_market() {
                applied.push(self.execute(order));
                continue;
            }

            order.status = Some(OrderStatus::Placed);
            order.time = self.account.quote(&order.instrument).map(|quote| quote.time);

            tracing::info!(
                order = %order.id,
                instrument = %order.instrument,
                "Placed {:?} {:?} {} @ {:?}",
                order.side,
                order.order_type,
                order.size,
                order.price
            );

            self.account.active_orders.push(order.clone());
            applied.push(order);
        }

        applied
    }

    /// Change type, size and prices of active or parked orders, matched by id
    pub fn update_orders(&mut self, orders: Vec<Order>) -> Vec<Order> {
        let mut updated = Vec::with_capacity(orders.len());

        for changes in orders {
            let violations = validate_order(&changes, &self.account);
            if !violations.is_empty() {
                for violation in violations {
                    tracing::error!(order = %changes.id, "Update refused: {}", violation);
                }
                continue;
            }

            let account = &mut self.account;
            let result = match account.active_orders.position(|o| o.id == changes.id) {
                Some(index) => account.active_orders.modify(index, |order| {
                    apply_changes(order, &changes);
                    order.clone()
                }),
                None => account.brackets.get_mut(&changes.id).map(|order| {
                    apply_changes(order, &changes);
                    order.clone()
                }),
            };

            match result {
                Some(order) => {
                    tracing::debug!(order = %order.id, "Updated order");
                    updated.push(order);
                }
                None => tracing::warn!(order = %changes.id, "Update for unknown order"),
            }
        }

        updated
    }

    /// Cancel orders and, recursively, their bracket legs
    pub fn delete_orders(&mut self, orders: Vec<Order>) -> Vec<Order> {
        let ids: Vec<OrderId> = orders.iter().map(|o| o.id).collect();
        cancel_orders(&mut self.account, &ids)
    }

    /// Fill an order, or archive it as `Declined` and cancel its parked legs
    fn execute(&mut self, mut order: Order) -> Order {
        match create_position(&mut self.account, order.clone()) {
            Ok(execution) => execution.order,
            Err(e) => {
                tracing::error!(order = %order.id, "Failed to fill order: {:#}", e);
                order.status = Some(OrderStatus::Declined);
                cancel_orders(&mut self.account, &order.children);
                self.account.orders.push(order.clone());
                order
            }
        }
    }

    fn update_point(&mut self, name: &str, mut point: Point) {
        let account_name = self.account.name.clone();
        let Some(instrument) = self.account.instruments.get_mut(name) else {
            tracing::warn!(instrument = %name, "Tick for unknown instrument");
            return;
        };

        point.instrument = Some(name.to_string());
        point.account = Some(account_name);
        point.time_frame = instrument.time_frame;

        instrument.points.push(point.clone());
        if let Some(time_frame) = instrument.time_frame {
            instrument.point_groups.add(point, time_frame);
        }
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                OrderCommand::Create(orders) => {
                    self.create_orders(orders);
                }
                OrderCommand::Update(orders) => {
                    self.update_orders(orders);
                }
                OrderCommand::Delete(orders) => {
                    self.delete_orders(orders);
                }
            }
        }
    }

    fn process_pending_orders(&mut self, name: &str) {
        let Some(quote) = self.account.quote(name).cloned() else {
            return;
        };

        let activated: Vec<usize> = self
            .account
            .active_orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.instrument == name && is_activated(o, &quote))
            .map(|(index, _)| index)
            .collect();

        for index in activated {
            self.account.active_orders.modify(index, |order| {
                order.order_type = OrderType::Limit;
                tracing::info!(order = %order.id, "Stop-limit activated, now resting as limit");
            });
        }

        let triggered: Vec<OrderId> = self
            .account
            .active_orders
            .iter()
            .filter(|o| o.instrument == name && is_triggered(o, &quote))
            .map(|o| o.id)
            .collect();

        for id in triggered {
            // an earlier fill in this pass may have cancelled it
            let Some(order) = self.account.active_orders.remove_where(|o| o.id == id) else {
                continue;
            };
            tracing::info!(order = %id, "Triggered {:?} {:?}", order.side, order.order_type);
            self.execute(order);
        }
    }

    fn refresh_positions(&mut self, name: &str) {
        let Some(instrument) = self.account.instruments.get(name) else {
            return;
        };
        let Some(quote) = instrument.quote() else {
            return;
        };

        let indexes: Vec<usize> = self
            .account
            .active_positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.instrument() == name)
            .map(|(index, _)| index)
            .collect();

        for index in indexes {
            self.account.active_positions.modify(index, |position| {
                position.estimate(quote, instrument);
            });
        }
    }
}

fn apply_changes(order: &mut Order, changes: &Order) {
    order.order_type = changes.order_type;
    order.size = changes.size;
    order.price = changes.price;
    order.activation_price = changes.activation_price;
    order.time_in_force = changes.time_in_force;
}

/// Buy stop and sell limit fire on the ask, sell stop and buy limit on the bid
fn is_triggered(order: &Order, quote: &Point) -> bool {
    let Some(price) = order.requested_price() else {
        return false;
    };

    match (order.order_type, order.side) {
        (OrderType::Stop, OrderSide::Buy) | (OrderType::Limit, OrderSide::Sell) => {
            quote.ask.is_some_and(|ask| ask >= price)
        }
        (OrderType::Stop, OrderSide::Sell) | (OrderType::Limit, OrderSide::Buy) => {
            quote.bid.is_some_and(|bid| bid <= price)
        }
        _ => false,
    }
}

/// Stop-limit activation level touched
fn is_activated(order: &Order, quote: &Point) -> bool {
    if order.order_type != OrderType::StopLimit {
        return false;
    }
    let Some(activation) = order.activation_price else {
        return false;
    };

    match order.side {
        OrderSide::Buy => quote.ask.is_some_and(|ask| ask >= activation),
        OrderSide::Sell => quote.bid.is_some_and(|bid| bid <= activation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{Action, Observable};
    use crate::execution::MemorySource;
    use crate::models::Instrument;
    use chrono::Duration;
    use std::sync::{Arc, Mutex};

    const START: i64 = 1_700_000_000;

    fn document(quotes: &[(i64, f64, f64)]) -> String {
        let mut doc = String::from("Time Bid BidSize Ask AskSize\n");
        for (offset, bid, ask) in quotes {
            doc.push_str(&format!("{} {} 1 {} 1\n", START + offset, bid, ask));
        }
        doc
    }

    fn gateway(quotes: &[(i64, f64, f64)]) -> SimulationGateway {
        let instrument = Instrument::new("EURUSD")
            .with_steps(0.0001, 1.0)
            .with_time_frame(Duration::seconds(60));
        let account = Account::new("Demo", 1000.0).with_instrument(instrument);
        let source = MemorySource::new().with_document("EURUSD", document(quotes));

        let mut gateway = SimulationGateway::new(account, source);
        gateway.connect();
        gateway
    }

    /// Emit exactly `n` ticks
    fn advance(gateway: &mut SimulationGateway, n: usize) {
        for _ in 0..n {
            assert!(matches!(gateway.step(), Step::Emitted { .. }));
        }
    }

    #[test]
    fn test_connect_fails_without_document() {
        let account = Account::new("Demo", 0.0)
            .with_instrument(Instrument::new("EURUSD").with_time_frame(Duration::seconds(1)));
        let mut gateway = SimulationGateway::new(account, MemorySource::new());

        gateway.connect();

        assert!(!gateway.is_connected());
        assert_eq!(gateway.step(), Step::Disconnected);
    }

    #[test]
    fn test_connect_requires_time_frame() {
        let account = Account::new("Demo", 0.0).with_instrument(Instrument::new("EURUSD"));
        let source = MemorySource::new().with_document("EURUSD", document(&[(0, 1.0, 1.1)]));
        let mut gateway = SimulationGateway::new(account, source);

        gateway.connect();
        assert!(!gateway.is_connected());
    }

    #[test]
    fn test_replay_fills_points_and_bars() {
        let mut gateway = gateway(&[(0, 1.0, 1.1), (30, 1.0, 1.2), (60, 1.1, 1.2)]);

        assert_eq!(gateway.replay_all(), 3);
        assert_eq!(gateway.step(), Step::Exhausted);

        let instrument = gateway.account().instruments.get("EURUSD").unwrap();
        assert_eq!(instrument.points.len(), 3);
        assert_eq!(instrument.point_groups.len(), 2);

        let point = &instrument.points[0];
        assert_eq!(point.instrument.as_deref(), Some("EURUSD"));
        assert_eq!(point.account.as_deref(), Some("Demo"));
        assert_eq!(point.time_frame, Some(Duration::seconds(60)));
    }

    #[test]
    fn test_disconnect_stops_replay() {
        let mut gateway = gateway(&[(0, 1.0, 1.1), (1, 1.0, 1.1)]);
        advance(&mut gateway, 1);

        gateway.disconnect();

        assert!(!gateway.is_connected());
        assert_eq!(gateway.replay_all(), 0);
    }

    #[test]
    fn test_market_order_fills_at_quote() {
        let mut gateway = gateway(&[(0, 1.1000, 1.1002)]);
        advance(&mut gateway, 1);

        let orders = gateway.create_orders(vec![Order::market("EURUSD", OrderSide::Buy, 1.0)]);

        assert_eq!(orders[0].status, Some(OrderStatus::Filled));
        assert_eq!(orders[0].price, Some(1.1002));
        assert!(gateway.account().active_position("EURUSD").is_some());
    }

    #[test]
    fn test_rejected_batch_is_declined() {
        let mut gateway = gateway(&[(0, 1.1000, 1.1002)]);
        advance(&mut gateway, 1);

        let orders = gateway.create_orders(vec![
            Order::limit("EURUSD", OrderSide::Buy, 1.0, 1.0900),
            Order::stop("EURUSD", OrderSide::Buy, 1.0, 1.0900),
        ]);

        assert!(orders
            .iter()
            .all(|o| o.status == Some(OrderStatus::Declined)));
        assert!(gateway.account().active_orders.is_empty());
    }

    #[test]
    fn test_order_before_first_tick_is_declined() {
        let mut gateway = gateway(&[(0, 1.1000, 1.1002)]);

        let orders = gateway.create_orders(vec![Order::market("EURUSD", OrderSide::Buy, 1.0)]);

        assert_eq!(orders[0].status, Some(OrderStatus::Declined));
        assert!(gateway.account().active_positions.is_empty());
    }

    #[test]
    fn test_buy_stop_triggers_on_ask() {
        let mut gateway = gateway(&[(0, 1.1000, 1.1002), (1, 1.1005, 1.1007), (2, 1.1010, 1.1012)]);
        advance(&mut gateway, 1);

        let placed = gateway.create_orders(vec![Order::stop("EURUSD", OrderSide::Buy, 1.0, 1.1010)]);
        assert_eq!(placed[0].status, Some(OrderStatus::Placed));
        assert_eq!(gateway.account().active_orders.len(), 1);

        advance(&mut gateway, 1);
        assert!(gateway.account().active_position("EURUSD").is_none());

        advance(&mut gateway, 1);
        let position = gateway.account().active_position("EURUSD").unwrap();
        assert_eq!(position.open_price, 1.1010);
        assert!(gateway.account().active_orders.is_empty());
        assert_eq!(gateway.account().orders[0].status, Some(OrderStatus::Filled));
    }

    #[test]
    fn test_buy_limit_triggers_on_bid() {
        let mut gateway = gateway(&[(0, 1.1000, 1.1002), (1, 1.0990, 1.0992)]);
        advance(&mut gateway, 1);

        gateway.create_orders(vec![Order::limit("EURUSD", OrderSide::Buy, 1.0, 1.0995)]);
        advance(&mut gateway, 1);

        let position = gateway.account().active_position("EURUSD").unwrap();
        assert_eq!(position.side(), OrderSide::Buy);
        assert_eq!(position.open_price, 1.0995);
    }

    #[test]
    fn test_stop_limit_activates_then_fills() {
        let mut gateway = gateway(&[
            (0, 1.1000, 1.1002),
            (1, 1.1010, 1.1012),
            (2, 1.1003, 1.1005),
        ]);
        advance(&mut gateway, 1);

        gateway.create_orders(vec![Order::stop_limit(
            "EURUSD",
            OrderSide::Buy,
            1.0,
            1.1004,
            1.1010,
        )]);

        advance(&mut gateway, 1);
        assert_eq!(gateway.account().active_orders[0].order_type, OrderType::Limit);
        assert!(gateway.account().active_position("EURUSD").is_none());

        advance(&mut gateway, 1);
        let position = gateway.account().active_position("EURUSD").unwrap();
        assert_eq!(position.open_price, 1.1004);
    }

    #[test]
    fn test_take_profit_closes_and_cancels_stop_loss() {
        let mut gateway = gateway(&[(0, 1.1000, 1.1000), (1, 1.1010, 1.1010), (2, 1.1030, 1.1030)]);
        advance(&mut gateway, 1);

        let batch = Order::bracket(
            Order::market("EURUSD", OrderSide::Buy, 1.0),
            vec![
                Order::stop("EURUSD", OrderSide::Sell, 1.0, 1.0950),
                Order::limit("EURUSD", OrderSide::Sell, 1.0, 1.1020),
            ],
        );
        let stop_loss = batch[1].id;
        gateway.create_orders(batch);
        assert_eq!(gateway.account().active_orders.len(), 2);

        advance(&mut gateway, 2);

        let account = gateway.account();
        assert!(account.active_position("EURUSD").is_none());
        assert!(account.active_orders.is_empty());
        assert_eq!(account.positions.len(), 1);

        let cancelled = account.orders.find(|o| o.id == stop_loss).unwrap();
        assert_eq!(cancelled.status, Some(OrderStatus::Cancelled));
        assert!(account.balance > 1000.0);
    }

    #[test]
    fn test_wrong_side_bracket_leg_declines_batch() {
        let mut gateway = gateway(&[(0, 1.1000, 1.1002), (1, 1.1000, 1.1002)]);
        advance(&mut gateway, 1);

        let orders = gateway.create_orders(Order::bracket(
            Order::market("EURUSD", OrderSide::Buy, 1.0),
            vec![Order::stop("EURUSD", OrderSide::Sell, 1.0, 1.2000)],
        ));

        assert!(orders
            .iter()
            .all(|o| o.status == Some(OrderStatus::Declined)));

        advance(&mut gateway, 1);
        let account = gateway.account();
        assert!(account.active_positions.is_empty());
        assert!(account.positions.is_empty());
        assert_eq!(account.bracket_count(), 0);
    }

    #[test]
    fn test_bracket_legs_parked_until_parent_fills() {
        let mut gateway = gateway(&[(0, 1.1000, 1.1002), (1, 1.1050, 1.1052)]);
        advance(&mut gateway, 1);

        let orders = gateway.create_orders(Order::bracket(
            Order::stop("EURUSD", OrderSide::Buy, 1.0, 1.1050),
            vec![
                Order::stop("EURUSD", OrderSide::Sell, 1.0, 1.0950),
                Order::limit("EURUSD", OrderSide::Sell, 1.0, 1.1100),
            ],
        ));

        assert_eq!(orders[0].status, Some(OrderStatus::Placed));
        assert_eq!(orders[1].status, Some(OrderStatus::Parked));
        assert_eq!(orders[2].status, Some(OrderStatus::Parked));
        assert_eq!(
            gateway.account().bracket(orders[1].id).unwrap().status,
            Some(OrderStatus::Parked)
        );

        advance(&mut gateway, 1);

        let account = gateway.account();
        assert_eq!(account.bracket_count(), 0);
        assert_eq!(account.active_orders.len(), 2);
        assert!(account
            .active_orders
            .iter()
            .all(|o| o.status == Some(OrderStatus::Placed)));
    }

    #[test]
    fn test_failed_fill_is_declined_and_drops_its_legs() {
        let mut gateway = gateway(&[(0, 1.1000, 1.1002)]);
        advance(&mut gateway, 1);

        let mut batch = Order::bracket(
            Order::stop("GBPUSD", OrderSide::Buy, 1.0, 1.3000),
            vec![Order::stop("GBPUSD", OrderSide::Sell, 1.0, 1.2000)],
        );
        let mut leg = batch.remove(1);
        leg.status = Some(OrderStatus::Parked);
        gateway.account_mut().brackets.insert(leg.id, leg.clone());

        let parent = gateway.execute(batch.remove(0));

        assert_eq!(parent.status, Some(OrderStatus::Declined));
        let account = gateway.account();
        assert_eq!(account.bracket_count(), 0);
        assert!(account.active_positions.is_empty());
        assert_eq!(
            account.orders.find(|o| o.id == parent.id).unwrap().status,
            Some(OrderStatus::Declined)
        );
        assert_eq!(
            account.orders.find(|o| o.id == leg.id).unwrap().status,
            Some(OrderStatus::Cancelled)
        );
    }

    #[test]
    fn test_orders_from_subscriber_apply_in_same_tick() {
        let mut gateway = gateway(&[(0, 1.1000, 1.1002), (1, 1.1000, 1.1002)]);
        let sender = gateway.order_sender();
        let sent = Arc::new(Mutex::new(false));

        let flag = sent.clone();
        gateway
            .account_mut()
            .instruments
            .get_mut("EURUSD")
            .unwrap()
            .point_groups
            .subscribe_item(move |message| {
                let mut sent = flag.lock().unwrap();
                if message.action == Action::Create && !*sent {
                    sender.create_orders(vec![Order::market("EURUSD", OrderSide::Sell, 2.0)]);
                    *sent = true;
                }
            });

        advance(&mut gateway, 1);

        let position = gateway.account().active_position("EURUSD").unwrap();
        assert_eq!(position.side(), OrderSide::Sell);
        assert_eq!(position.size(), 2.0);
    }

    #[test]
    fn test_positions_refresh_each_tick() {
        let mut gateway = gateway(&[(0, 1.1000, 1.1000), (1, 1.1010, 1.1012), (2, 1.0990, 1.0992)]);
        advance(&mut gateway, 1);
        gateway.create_orders(vec![Order::market("EURUSD", OrderSide::Buy, 1.0)]);

        let updates = Arc::new(Mutex::new(0));
        let counter = updates.clone();
        gateway.account_mut().active_positions.subscribe_item(move |message| {
            if message.action == Action::Update {
                *counter.lock().unwrap() += 1;
            }
        });

        advance(&mut gateway, 2);

        let position = gateway.account().active_position("EURUSD").unwrap();
        assert_eq!(*updates.lock().unwrap(), 2);
        assert!((position.gain_loss_max - 10.0).abs() < 1e-6);
        assert!((position.gain_loss_min + 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_update_and_delete_orders() {
        let mut gateway = gateway(&[(0, 1.1000, 1.1002), (1, 1.1000, 1.1002)]);
        advance(&mut gateway, 1);

        let placed = gateway.create_orders(vec![Order::stop("EURUSD", OrderSide::Buy, 1.0, 1.1050)]);

        let mut changes = placed[0].clone();
        changes.price = Some(1.1060);
        changes.size = 2.0;
        let updated = gateway.update_orders(vec![changes.clone()]);

        assert_eq!(updated.len(), 1);
        assert_eq!(gateway.account().active_orders[0].price, Some(1.1060));
        assert_eq!(gateway.account().active_orders[0].size, 2.0);

        changes.price = Some(1.0);
        assert!(gateway.update_orders(vec![changes]).is_empty());
        assert_eq!(gateway.account().active_orders[0].price, Some(1.1060));

        let cancelled = gateway.delete_orders(placed);
        assert_eq!(cancelled[0].status, Some(OrderStatus::Cancelled));
        assert!(gateway.account().active_orders.is_empty());
    }

    #[test]
    fn test_custom_parser() {
        let account = Account::new("Demo", 0.0)
            .with_instrument(Instrument::new("X").with_time_frame(Duration::seconds(1)));
        let source = MemorySource::new().with_document("X", "price\n1.5\n1.6\n");

        let mut gateway = SimulationGateway::new(account, source).with_parser(|line| {
            let price: f64 = line.parse().ok()?;
            Some(Point::quote(DateTime::from_timestamp(START, 0)?, price, price))
        });
        gateway.connect();

        assert_eq!(gateway.replay_all(), 2);
        let bars = &gateway.account().instruments.get("X").unwrap().point_groups;
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].bar.high, Some(1.6));
    }

    #[tokio::test]
    async fn test_run_on_timer() {
        let mut gateway = gateway(&[(0, 1.0, 1.1), (1, 1.0, 1.1), (2, 1.0, 1.1)]);

        let emitted = gateway.run(std::time::Duration::from_millis(1)).await;

        assert_eq!(emitted, 3);
        assert_eq!(gateway.step(), Step::Exhausted);
    }
}
