pub mod runner;
pub mod synthetic;

pub use runner::{InstrumentSummary, ReplayReport, ReplayRunner};
pub use synthetic::{MarketScenario, SyntheticTick, SyntheticTickGenerator, TickProfile};
