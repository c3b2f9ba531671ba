// Order matching and replay module
pub mod gateway;
pub mod position_manager;
pub mod price_feed;
pub mod replay;
pub mod validation;

pub use gateway::{OrderCommand, OrderSender, SimulationGateway, Step};
pub use position_manager::{cancel_orders, create_position, Execution, Transition};
pub use price_feed::{parse_point, FeedEvent, FileSource, MemorySource, PointParser, PriceFeed, TickSource};
pub use replay::Replay;
pub use validation::{validate_instrument, validate_order, validate_pricing, OrderViolation};
