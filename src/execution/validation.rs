use crate::models::{Account, Instrument, Order, OrderSide, OrderType, Point};

/// Reason an order is refused at intake
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderViolation {
    #[error("Order has no instrument")]
    MissingInstrument,
    #[error("Instrument {0} is not registered with the account")]
    UnknownInstrument(String),
    #[error("Instrument {name} has no {field}")]
    IncompleteInstrument { name: String, field: &'static str },
    #[error("Order size must be positive, got {0}")]
    InvalidSize(f64),
    #[error("Order price is required for {0:?} orders")]
    MissingPrice(OrderType),
    #[error("Activation price is required for stop-limit orders")]
    MissingActivationPrice,
    #[error("Bracket legs must be resting orders")]
    MarketBracketLeg,
    #[error("Buy stop is below the offer")]
    BuyStopBelowOffer,
    #[error("Sell stop is above the bid")]
    SellStopAboveBid,
    #[error("Buy limit is above the offer")]
    BuyLimitAboveOffer,
    #[error("Sell limit is below the bid")]
    SellLimitBelowBid,
}

/// Check that an instrument can price and aggregate orders
pub fn validate_instrument(instrument: &Instrument) -> Vec<OrderViolation> {
    let missing = |field: &'static str| OrderViolation::IncompleteInstrument {
        name: instrument.name.clone(),
        field,
    };

    let mut violations = Vec::new();

    if instrument.step_size == 0.0 {
        violations.push(missing("step size"));
    }
    if instrument.step_value == 0.0 {
        violations.push(missing("step value"));
    }
    if instrument.contract_size == 0.0 {
        violations.push(missing("contract size"));
    }
    if instrument.time_frame.is_none() {
        violations.push(missing("time frame"));
    }
    if instrument.points.is_empty() {
        violations.push(missing("points"));
    }
    if instrument.point_groups.is_empty() {
        violations.push(missing("bars"));
    }

    violations
}

/// Check an order against its instrument and the current quote
///
/// Returns every violation found, empty when the order can be accepted.
pub fn validate_order(order: &Order, account: &Account) -> Vec<OrderViolation> {
    if order.instrument.is_empty() {
        return vec![OrderViolation::MissingInstrument];
    }

    let mut violations = match account.instruments.get(&order.instrument) {
        Some(instrument) => validate_instrument(instrument),
        None => vec![OrderViolation::UnknownInstrument(order.instrument.clone())],
    };

    if !(order.size > 0.0) {
        violations.push(OrderViolation::InvalidSize(order.size));
    }

    if !order.is_market() && order.requested_price().is_none() {
        violations.push(OrderViolation::MissingPrice(order.order_type));
    }

    if order.order_type == OrderType::StopLimit
        && order.activation_price.filter(|price| *price != 0.0).is_none()
    {
        violations.push(OrderViolation::MissingActivationPrice);
    }

    if order.container.is_some() && order.is_market() {
        violations.push(OrderViolation::MarketBracketLeg);
    }

    if let Some(quote) = account.quote(&order.instrument) {
        violations.extend(validate_pricing(order, quote));
    }

    violations
}

/// Stop and limit levels must sit on the right side of the current quote
pub fn validate_pricing(order: &Order, quote: &Point) -> Option<OrderViolation> {
    let (Some(bid), Some(ask)) = (quote.bid, quote.ask) else {
        return None;
    };

    let trigger = match order.order_type {
        OrderType::StopLimit => order.activation_price,
        _ => order.price,
    }?;

    match (order.order_type, order.side) {
        (OrderType::Stop | OrderType::StopLimit, OrderSide::Buy) if trigger < ask => {
            Some(OrderViolation::BuyStopBelowOffer)
        }
        (OrderType::Stop | OrderType::StopLimit, OrderSide::Sell) if trigger > bid => {
            Some(OrderViolation::SellStopAboveBid)
        }
        (OrderType::Limit, OrderSide::Buy) if trigger > ask => {
            Some(OrderViolation::BuyLimitAboveOffer)
        }
        (OrderType::Limit, OrderSide::Sell) if trigger < bid => {
            Some(OrderViolation::SellLimitBelowBid)
        }
        _ => None,
    }
}
