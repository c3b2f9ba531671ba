use crate::collections::EventCollection;
use crate::models::{
    Account, Instrument, Lot, Order, OrderId, OrderSide, OrderStatus, Point, Position,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Remaining sizes at or below this are treated as flat
const SIZE_EPSILON: f64 = 1e-9;

/// Which netting step a fill went through
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// No position existed, a new one was opened
    Opened,
    /// Same-side fill merged into the position `replaced`
    Increased { replaced: OrderId },
    /// Opposite-side fill closed `closed`; `remaining` was re-opened when nonzero
    Decreased {
        closed: OrderId,
        gain_loss: f64,
        remaining: f64,
    },
}

/// A filled order and what it did to the account
#[derive(Debug, Clone)]
pub struct Execution {
    pub order: Order,
    pub transition: Transition,
}

/// Fill price: the order's own price if set, else ask for a buy and bid for a sell
pub fn fill_price(order: &Order, quote: &Point) -> Option<f64> {
    order.requested_price().or(match order.side {
        OrderSide::Buy => quote.ask,
        OrderSide::Sell => quote.bid,
    })
}

/// Fill `order` at the current quote and net it against the instrument's active position
///
/// Exactly one transition applies: open when flat, increase on the same side,
/// decrease (or reverse) on the opposite side. Afterwards the order's bracket
/// legs are released into the active orders.
pub fn create_position(account: &mut Account, mut order: Order) -> anyhow::Result<Execution> {
    let mut ledger = Ledger::split(account, &order.instrument)?;

    let quote = ledger
        .instrument
        .quote()
        .cloned()
        .with_context(|| format!("No quote for {}", order.instrument))?;
    let price = fill_price(&order, &quote)
        .with_context(|| format!("No {:?} price for {}", order.side, order.instrument))?;

    order.price = Some(price);
    order.time = Some(quote.time);
    order.status = Some(OrderStatus::Filled);

    let lot = Lot {
        price,
        size: order.size,
        time: quote.time,
    };

    ledger.active_orders.remove_where(|o| o.id == order.id);

    let existing = ledger
        .active_positions
        .position(|p| p.instrument() == order.instrument);

    let transition = match existing {
        Some(index) if ledger.active_positions[index].side() == order.side => {
            ledger.increase(index, &order, lot, &quote)
        }
        Some(index) => ledger.decrease(index, &order, lot, &quote),
        None => ledger.open(&order, lot, &quote),
    };

    activate_brackets(
        ledger.active_orders,
        ledger.brackets,
        &order.children,
        quote.time,
    );

    Ok(Execution { order, transition })
}

/// Cancel orders by id, recursing through their bracket legs
///
/// Works on both active orders and legs still parked in the arena. Cancelled
/// orders are archived and returned.
pub fn cancel_orders(account: &mut Account, ids: &[OrderId]) -> Vec<Order> {
    let mut cancelled = Vec::new();
    cancel_tree(
        &mut account.active_orders,
        &mut account.orders,
        &mut account.brackets,
        ids,
        &mut cancelled,
    );
    cancelled
}

fn cancel_tree(
    active_orders: &mut EventCollection<Order>,
    orders: &mut EventCollection<Order>,
    brackets: &mut HashMap<OrderId, Order>,
    ids: &[OrderId],
    cancelled: &mut Vec<Order>,
) {
    for id in ids {
        let order = active_orders
            .remove_where(|o| o.id == *id)
            .or_else(|| brackets.remove(id));

        let Some(mut order) = order else {
            continue;
        };

        order.status = Some(OrderStatus::Cancelled);
        tracing::info!(order = %order.id, instrument = %order.instrument, "Cancelled order");

        let children = order.children.clone();
        orders.push(order.clone());
        cancelled.push(order);

        cancel_tree(active_orders, orders, brackets, &children, cancelled);
    }
}

/// Move parked bracket legs into the active orders
fn activate_brackets(
    active_orders: &mut EventCollection<Order>,
    brackets: &mut HashMap<OrderId, Order>,
    ids: &[OrderId],
    time: DateTime<Utc>,
) {
    for id in ids {
        if let Some(mut child) = brackets.remove(id) {
            child.status = Some(OrderStatus::Placed);
            child.time = Some(time);
            tracing::info!(
                order = %child.id,
                instrument = %child.instrument,
                "Activated bracket order {:?} {:?} @ {:?}",
                child.side,
                child.order_type,
                child.price
            );
            active_orders.push(child);
        }
    }
}

/// Disjoint borrows of the account for one netting step
struct Ledger<'a> {
    instrument: &'a Instrument,
    balance: &'a mut f64,
    orders: &'a mut EventCollection<Order>,
    active_orders: &'a mut EventCollection<Order>,
    positions: &'a mut EventCollection<Position>,
    active_positions: &'a mut EventCollection<Position>,
    brackets: &'a mut HashMap<OrderId, Order>,
}

impl<'a> Ledger<'a> {
    fn split(account: &'a mut Account, instrument: &str) -> anyhow::Result<Self> {
        let instrument = account
            .instruments
            .get(instrument)
            .with_context(|| format!("Unknown instrument {}", instrument))?;

        Ok(Self {
            instrument,
            balance: &mut account.balance,
            orders: &mut account.orders,
            active_orders: &mut account.active_orders,
            positions: &mut account.positions,
            active_positions: &mut account.active_positions,
            brackets: &mut account.brackets,
        })
    }

    fn open(&mut self, order: &Order, lot: Lot, quote: &Point) -> Transition {
        let mut position = Position::new(order.clone(), vec![lot]);
        position.estimate(quote, self.instrument);

        tracing::info!(
            order = %order.id,
            instrument = %order.instrument,
            "Opened {:?} {} @ {:.5}",
            order.side,
            order.size,
            lot.price
        );

        self.orders.push(order.clone());
        self.active_positions.push(position);

        Transition::Opened
    }

    fn increase(&mut self, index: usize, order: &Order, lot: Lot, quote: &Point) -> Transition {
        let Some(mut previous) = self.active_positions.remove(index) else {
            return self.open(order, lot, quote);
        };

        let mut lots = previous.open_prices.clone();
        lots.push(lot);

        let mut merged = order.clone();
        merged.size = previous.size() + order.size;
        merged.children = previous
            .order
            .children
            .iter()
            .chain(&order.children)
            .copied()
            .collect();

        let mut next = Position::new(merged, lots);
        previous.close(next.open_price, lot.time, quote, self.instrument);
        next.estimate(quote, self.instrument);

        tracing::info!(
            order = %order.id,
            instrument = %order.instrument,
            "Increased {:?} to {} (avg: {:.5})",
            order.side,
            next.size(),
            next.open_price
        );

        let replaced = previous.id();
        self.orders.push(order.clone());
        self.positions.push(previous);
        self.active_positions.push(next);

        Transition::Increased { replaced }
    }

    fn decrease(&mut self, index: usize, order: &Order, lot: Lot, quote: &Point) -> Transition {
        let Some(mut previous) = self.active_positions.remove(index) else {
            return self.open(order, lot, quote);
        };

        let remaining = (order.size - previous.size()).abs();

        let gain_loss = previous.close(lot.price, lot.time, quote, self.instrument);
        *self.balance += gain_loss;

        tracing::info!(
            order = %order.id,
            instrument = %order.instrument,
            "Closed {:?} {} @ {:.5} (P&L: {:.2})",
            previous.side(),
            previous.size(),
            lot.price,
            gain_loss
        );

        let mut cancelled = Vec::new();
        cancel_tree(
            self.active_orders,
            self.orders,
            self.brackets,
            &previous.order.children,
            &mut cancelled,
        );

        let closed = previous.id();
        self.orders.push(order.clone());
        self.positions.push(previous);

        if remaining > SIZE_EPSILON {
            let mut rest = order.clone();
            rest.size = remaining;

            let mut next = Position::new(
                rest,
                vec![Lot {
                    size: remaining,
                    ..lot
                }],
            );
            next.estimate(quote, self.instrument);

            tracing::info!(
                instrument = %order.instrument,
                "Re-opened {:?} {} @ {:.5}",
                order.side,
                remaining,
                lot.price
            );

            self.active_positions.push(next);
        }

        Transition::Decreased {
            closed,
            gain_loss,
            remaining: if remaining > SIZE_EPSILON { remaining } else { 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn time(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn account() -> Account {
        let instrument = Instrument::new("EURUSD")
            .with_steps(0.0001, 1.0)
            .with_time_frame(Duration::seconds(1));
        let mut account = Account::new("Demo", 1000.0).with_instrument(instrument);
        quote(&mut account, 0, 1.1000, 1.1000);
        account
    }

    fn quote(account: &mut Account, seconds: i64, bid: f64, ask: f64) {
        let instrument = account.instruments.get_mut("EURUSD").unwrap();
        let point = Point::quote(time(seconds), bid, ask);
        instrument.points.push(point.clone());
        instrument.point_groups.add(point, Duration::seconds(1));
    }

    fn market(side: OrderSide, size: f64) -> Order {
        Order::market("EURUSD", side, size)
    }

    #[test]
    fn test_open_at_quote() {
        let mut account = account();
        quote(&mut account, 1, 1.0990, 1.1010);

        let execution = create_position(&mut account, market(OrderSide::Buy, 2.0)).unwrap();

        assert_eq!(execution.transition, Transition::Opened);
        assert_eq!(execution.order.price, Some(1.1010));
        assert_eq!(execution.order.status, Some(OrderStatus::Filled));

        let position = account.active_position("EURUSD").unwrap();
        assert_eq!(position.open_price, 1.1010);
        assert_eq!(position.size(), 2.0);
        assert_eq!(account.orders.len(), 1);
    }

    #[test]
    fn test_sell_opens_at_bid_and_explicit_price_wins() {
        let mut account = account();
        quote(&mut account, 1, 1.0990, 1.1010);

        let execution = create_position(&mut account, market(OrderSide::Sell, 1.0)).unwrap();
        assert_eq!(execution.order.price, Some(1.0990));

        let mut account = self::account();
        let order = market(OrderSide::Sell, 1.0).with_price(1.2345);
        let execution = create_position(&mut account, order).unwrap();
        assert_eq!(execution.order.price, Some(1.2345));
    }

    #[test]
    fn test_increase_weighted_average() {
        let mut account = account();
        quote(&mut account, 1, 1.1000, 1.1000);
        create_position(&mut account, market(OrderSide::Buy, 1.0)).unwrap();

        quote(&mut account, 2, 1.1030, 1.1030);
        let execution = create_position(&mut account, market(OrderSide::Buy, 3.0)).unwrap();
        assert!(matches!(execution.transition, Transition::Increased { .. }));

        quote(&mut account, 3, 1.1060, 1.1060);
        create_position(&mut account, market(OrderSide::Buy, 2.0)).unwrap();

        assert_eq!(account.active_positions.len(), 1);
        let position = account.active_position("EURUSD").unwrap();
        let lots = &position.open_prices;
        let expected = lots.iter().map(|l| l.size * l.price).sum::<f64>()
            / lots.iter().map(|l| l.size).sum::<f64>();

        assert_eq!(lots.len(), 3);
        assert_eq!(position.size(), 6.0);
        assert!((position.open_price - expected).abs() < 1e-9);

        // replaced positions are archived at the new average
        assert_eq!(account.positions.len(), 2);
        let archived = &account.positions[1];
        assert_eq!(archived.close_price, Some(position.open_price));
        assert!(archived.gain_loss.is_some());
        assert_eq!(account.balance, 1000.0);
    }

    #[test]
    fn test_exact_decrease_leaves_no_position() {
        let mut account = account();
        create_position(&mut account, market(OrderSide::Buy, 2.0)).unwrap();
        let execution = create_position(&mut account, market(OrderSide::Sell, 2.0)).unwrap();

        assert!(matches!(
            execution.transition,
            Transition::Decreased { remaining, .. } if remaining == 0.0
        ));
        assert!(account.active_position("EURUSD").is_none());
        assert_eq!(account.positions.len(), 1);
        assert_eq!(account.orders.len(), 2);
    }

    #[test]
    fn test_round_trip_gain_loss() {
        let mut account = account();
        let instrument = account.instruments.get_mut("EURUSD").unwrap();
        instrument.commission = 0.25;

        quote(&mut account, 1, 1.1000, 1.1000);
        create_position(&mut account, market(OrderSide::Buy, 3.0)).unwrap();

        quote(&mut account, 2, 1.1020, 1.1020);
        let execution = create_position(&mut account, market(OrderSide::Sell, 3.0)).unwrap();

        // 3 * 0.0020 * (1.0 / 0.0001) - 3 * 0.25 * 2
        let expected = 3.0 * 0.0020 * 10_000.0 - 3.0 * 0.25 * 2.0;
        let Transition::Decreased { gain_loss, .. } = execution.transition else {
            panic!("expected a decrease");
        };

        assert!((gain_loss - expected).abs() < 1e-6);
        assert_eq!(account.positions[0].gain_loss, Some(gain_loss));
        assert!((account.balance - (1000.0 + expected)).abs() < 1e-6);
    }

    #[test]
    fn test_reverse_opens_remainder_in_new_direction() {
        let mut account = account();
        create_position(&mut account, market(OrderSide::Buy, 1.0)).unwrap();

        quote(&mut account, 1, 1.0950, 1.0950);
        create_position(&mut account, market(OrderSide::Sell, 3.0)).unwrap();

        let position = account.active_position("EURUSD").unwrap();
        assert_eq!(position.side(), OrderSide::Sell);
        assert_eq!(position.size(), 2.0);
        assert_eq!(position.open_price, 1.0950);
        assert_eq!(position.open_prices[0].size, 2.0);
        assert_eq!(account.active_positions.len(), 1);
    }

    #[test]
    fn test_partial_decrease_reopens_on_incoming_side() {
        let mut account = account();
        create_position(&mut account, market(OrderSide::Buy, 3.0)).unwrap();
        create_position(&mut account, market(OrderSide::Sell, 1.0)).unwrap();

        let position = account.active_position("EURUSD").unwrap();
        assert_eq!(position.side(), OrderSide::Sell);
        assert_eq!(position.size(), 2.0);
        assert_eq!(position.open_prices.len(), 1);
        assert_eq!(account.positions.len(), 1);
        assert_eq!(account.positions[0].side(), OrderSide::Buy);
    }

    #[test]
    fn test_brackets_activate_after_fill() {
        let mut account = account();
        let batch = Order::bracket(
            market(OrderSide::Buy, 1.0),
            vec![Order::stop("EURUSD", OrderSide::Sell, 1.0, 1.0900)],
        );
        let leg_id = batch[1].id;
        account.brackets.insert(leg_id, batch[1].clone());

        create_position(&mut account, batch[0].clone()).unwrap();

        let leg = account.active_order(leg_id).unwrap();
        assert_eq!(leg.status, Some(OrderStatus::Placed));
        assert_eq!(leg.time, Some(time(0)));
        assert_eq!(account.bracket_count(), 0);
    }

    #[test]
    fn test_reversal_cancels_bracket_tree() {
        let mut account = account();

        let mut parent = market(OrderSide::Buy, 1.0);
        let mut stop_loss = Order::stop("EURUSD", OrderSide::Sell, 1.0, 1.0900);
        let mut nested = Order::limit("EURUSD", OrderSide::Buy, 1.0, 1.0800);
        parent.attach(&mut stop_loss);
        stop_loss.attach(&mut nested);

        account.brackets.insert(stop_loss.id, stop_loss.clone());
        account.brackets.insert(nested.id, nested.clone());

        create_position(&mut account, parent).unwrap();
        assert!(account.active_order(stop_loss.id).is_some());

        create_position(&mut account, market(OrderSide::Sell, 2.0)).unwrap();

        assert!(account.active_orders.is_empty());
        assert_eq!(account.bracket_count(), 0);
        let cancelled: Vec<OrderId> = account
            .orders
            .iter()
            .filter(|o| o.status == Some(OrderStatus::Cancelled))
            .map(|o| o.id)
            .collect();
        assert_eq!(cancelled, vec![stop_loss.id, nested.id]);
    }

    #[test]
    fn test_increase_carries_children_forward() {
        let mut account = account();

        let first = Order::bracket(
            market(OrderSide::Buy, 1.0),
            vec![Order::stop("EURUSD", OrderSide::Sell, 1.0, 1.09)],
        );
        account.brackets.insert(first[1].id, first[1].clone());
        create_position(&mut account, first[0].clone()).unwrap();

        create_position(&mut account, market(OrderSide::Buy, 1.0)).unwrap();

        let position = account.active_position("EURUSD").unwrap();
        assert_eq!(position.order.children, vec![first[1].id]);

        create_position(&mut account, market(OrderSide::Sell, 2.0)).unwrap();
        assert!(account.active_orders.is_empty());
    }

    #[test]
    fn test_cancel_orders_returns_tree() {
        let mut account = account();
        let mut parent = Order::stop("EURUSD", OrderSide::Buy, 1.0, 1.2);
        let mut leg = Order::stop("EURUSD", OrderSide::Sell, 1.0, 1.0);
        parent.attach(&mut leg);

        account.active_orders.push(parent.clone());
        account.brackets.insert(leg.id, leg.clone());

        let cancelled = cancel_orders(&mut account, &[parent.id]);

        assert_eq!(cancelled.len(), 2);
        assert!(cancelled
            .iter()
            .all(|o| o.status == Some(OrderStatus::Cancelled)));
        assert!(account.active_orders.is_empty());
        assert!(cancel_orders(&mut account, &[parent.id]).is_empty());
    }

    #[test]
    fn test_unknown_instrument_is_an_error() {
        let mut account = account();
        let order = Order::market("GBPUSD", OrderSide::Buy, 1.0);
        assert!(create_position(&mut account, order).is_err());
    }
}
