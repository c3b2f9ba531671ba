// Observable collections module
pub mod bar_aggregator;
pub mod event_collection;
pub mod named_collection;
pub mod stream;

pub use bar_aggregator::{Aggregation, BarAggregator};
pub use event_collection::EventCollection;
pub use named_collection::{Named, NamedCollection};
pub use stream::{Action, CollectionMessage, ItemMessage, Observable, SubscriptionId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectionError {
    #[error("index {index} is out of bounds for collection of length {len}")]
    OutOfBounds { index: usize, len: usize },
}
