use crate::execution::MemorySource;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::path::Path;

/// Header line written at the top of every generated document
pub const TICK_HEADER: &str = "Time Bid BidSize Ask AskSize";

/// Price path shapes for generated ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Drifts up about one step every ten ticks
    Uptrend,
    /// Drifts down about one step every ten ticks
    Downtrend,
    /// Mean-reverting around the base price
    Sideways,
    /// Wide random steps
    Volatile,
    /// Sideways with a silent stretch every 50 ticks
    WithGaps,
}

/// One generated quote
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticTick {
    pub time: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
}

/// Instrument parameters the generator needs
#[derive(Debug, Clone)]
pub struct TickProfile {
    pub instrument: String,
    pub base_price: f64,
    pub step_size: f64,
}

impl TickProfile {
    pub fn new(instrument: impl Into<String>, base_price: f64, step_size: f64) -> Self {
        Self {
            instrument: instrument.into(),
            base_price,
            step_size,
        }
    }
}

/// Seeded random-walk generator of bid/ask ticks
///
/// The same seed, start and profile always produce the same documents.
pub struct SyntheticTickGenerator {
    rng: StdRng,
    start: DateTime<Utc>,
    interval: Duration,
}

impl SyntheticTickGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            start: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
            interval: Duration::seconds(1),
        }
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    /// Average spacing between ticks; each tick is jittered inside its slot
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval > Duration::zero() {
            self.interval = interval;
        }
        self
    }

    /// Generate `count` ticks for one instrument
    ///
    /// # Arguments
    /// * `scenario` - Shape of the mid-price path
    /// * `profile` - Base price and step size; prices are rounded to the step
    /// * `count` - Number of slots; `WithGaps` leaves some of them empty
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        profile: &TickProfile,
        count: usize,
    ) -> Vec<SyntheticTick> {
        let step = if profile.step_size > 0.0 {
            profile.step_size
        } else {
            0.01
        };
        let base = profile.base_price;
        let slot = self.interval.num_microseconds().unwrap_or(1_000_000).max(1);

        let mut ticks = Vec::with_capacity(count);
        let mut mid = base;

        for i in 0..count {
            if scenario == MarketScenario::WithGaps && i % 50 >= 45 {
                continue;
            }

            let noise = self.rng.gen_range(-1.0..1.0);
            mid += match scenario {
                MarketScenario::Uptrend => (0.1 + noise) * step,
                MarketScenario::Downtrend => (-0.1 + noise) * step,
                MarketScenario::Sideways | MarketScenario::WithGaps => {
                    (base - mid) * 0.05 + noise * 2.0 * step
                }
                MarketScenario::Volatile => noise * 10.0 * step,
            };
            mid = mid.max(base * 0.5).max(step * 10.0);

            let spread = self.rng.gen_range(1..=3) as f64 * step;
            let bid = round_to_step(mid - spread / 2.0, step);
            let ask = round_to_step(bid + spread, step);

            let jitter = self.rng.gen_range(0..slot);
            let time = self.start + Duration::microseconds(i as i64 * slot + jitter);

            // roughly one in ten ticks trades on the bid
            let ask_size = if self.rng.gen_bool(0.1) {
                0.0
            } else {
                self.rng.gen_range(1..=10) as f64
            };

            ticks.push(SyntheticTick {
                time,
                bid,
                ask,
                bid_size: self.rng.gen_range(1..=10) as f64,
                ask_size,
            });
        }

        ticks
    }

    /// Build an in-memory source with one document per profile
    pub fn source(
        &mut self,
        scenario: MarketScenario,
        profiles: &[TickProfile],
        count: usize,
    ) -> MemorySource {
        let mut source = MemorySource::new();
        for profile in profiles {
            let ticks = self.generate(scenario, profile, count);
            source.insert(profile.instrument.clone(), document(&ticks, profile.step_size));
        }
        source
    }

    /// Write `<dir>/<instrument>` files, one per profile
    ///
    /// # Returns
    /// Number of files written
    pub fn write_files(
        &mut self,
        dir: &Path,
        scenario: MarketScenario,
        profiles: &[TickProfile],
        count: usize,
    ) -> anyhow::Result<usize> {
        std::fs::create_dir_all(dir)?;

        for profile in profiles {
            let ticks = self.generate(scenario, profile, count);
            let path = dir.join(&profile.instrument);
            std::fs::write(&path, document(&ticks, profile.step_size))?;
            tracing::info!(instrument = %profile.instrument, "Wrote {} ticks to {}", ticks.len(), path.display());
        }

        Ok(profiles.len())
    }
}

/// Render ticks in the default line format, header first
pub fn document(ticks: &[SyntheticTick], step_size: f64) -> String {
    let decimals = price_decimals(step_size);
    let mut out = String::with_capacity((ticks.len() + 1) * 48);
    out.push_str(TICK_HEADER);
    out.push('\n');

    for tick in ticks {
        let _ = writeln!(
            out,
            "{}.{:06} {:.*} {} {:.*} {}",
            tick.time.timestamp(),
            tick.time.timestamp_subsec_micros(),
            decimals,
            tick.bid,
            tick.bid_size,
            decimals,
            tick.ask,
            tick.ask_size
        );
    }

    out
}

fn round_to_step(price: f64, step: f64) -> f64 {
    (price / step).round() * step
}

fn price_decimals(step: f64) -> usize {
    if step > 0.0 && step < 1.0 {
        (-step.log10() - 1e-9).ceil() as usize
    } else {
        0
    }
}
