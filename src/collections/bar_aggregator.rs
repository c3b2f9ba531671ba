use super::stream::{CollectionMessage, ItemMessage, Observable, SubscriptionId};
use super::EventCollection;
use crate::models::Point;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::ops::Index;

/// Outcome of feeding one tick into the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// A new bucket was appended at this index
    Created(usize),
    /// The latest bucket at this index absorbed the tick
    Updated(usize),
    /// The tick was refused (older than the latest bucket or a non-positive interval)
    Skipped,
}

/// Turns ticks into fixed-interval OHLC bars
///
/// Buckets live in an append-only [`EventCollection`]; `buckets` maps each
/// bucket start (microseconds since the epoch) to its index in that collection.
/// Only the latest bucket accepts merges.
pub struct BarAggregator {
    bars: EventCollection<Point>,
    buckets: HashMap<i64, usize>,
    latest: Option<i64>,
}

impl BarAggregator {
    pub fn new() -> Self {
        Self {
            bars: EventCollection::new(),
            buckets: HashMap::new(),
            latest: None,
        }
    }

    /// Add a tick, bucketed by `interval`
    ///
    /// # Arguments
    /// * `point` - The incoming tick
    /// * `interval` - Bucket width, must be positive
    pub fn add(&mut self, point: Point, interval: Duration) -> Aggregation {
        let Some(span) = interval.num_microseconds().filter(|span| *span > 0) else {
            tracing::warn!(interval = %interval, "Refusing tick for non-positive bucket interval");
            return Aggregation::Skipped;
        };

        let start = bucket_start(point.time, span);

        if self.latest.is_some_and(|latest| start < latest) {
            tracing::warn!(
                time = %point.time,
                "Skipping tick older than the latest bar"
            );
            return Aggregation::Skipped;
        }

        if let Some(&index) = self.buckets.get(&start) {
            let mut bar = self.bars[index].clone();
            merge_into(&mut bar, &point);

            return match self.bars.set(index, bar) {
                Ok(_) => Aggregation::Updated(index),
                Err(e) => {
                    tracing::warn!("Bar index out of sync: {}", e);
                    Aggregation::Skipped
                }
            };
        }

        let previous = self
            .buckets
            .get(&(start - span))
            .and_then(|&index| self.bars.get(index));
        let time = DateTime::from_timestamp_micros(start).unwrap_or(point.time);
        let bar = open_bucket(point, previous, time);

        let index = self.bars.len();
        self.bars.push(bar);
        self.buckets.insert(start, index);
        self.latest = Some(start);

        Aggregation::Created(index)
    }

    /// Index of the bucket that starts at `time`, if one exists
    pub fn index_of(&self, time: DateTime<Utc>) -> Option<usize> {
        self.buckets.get(&time.timestamp_micros()).copied()
    }

    pub fn bars(&self) -> &EventCollection<Point> {
        &self.bars
    }

    pub fn get(&self, index: usize) -> Option<&Point> {
        self.bars.get(index)
    }

    pub fn last(&self) -> Option<&Point> {
        self.bars.last()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.bars.iter()
    }
}

fn bucket_start(time: DateTime<Utc>, span: i64) -> i64 {
    time.timestamp_micros().div_euclid(span) * span
}

/// Build the first bar of a bucket from its opening tick
///
/// Missing ask/bid default to each other. Open and close are seeded from the
/// previous bucket's last price when there is one, else from ask and bid.
fn open_bucket(mut point: Point, previous: Option<&Point>, time: DateTime<Utc>) -> Point {
    point.time = time;

    if point.ask.is_none() && point.bid.is_none() {
        return point;
    }

    point.ask_size = point.ask_size.or(Some(0.0));
    point.bid_size = point.bid_size.or(Some(0.0));
    point.ask = point.ask.or(point.bid);
    point.bid = point.bid.or(point.ask);

    let seed = previous.and_then(|bar| bar.last);
    point.bar.open = point.bar.open.or(seed).or(point.ask);
    point.bar.close = point.bar.close.or(seed).or(point.bid);
    point.last = point.last.or(point.bar.close);

    if let (Some(ask), Some(bid)) = (point.ask, point.bid) {
        point.bar.low = point.bar.low.or(Some(ask.min(bid)));
        point.bar.high = point.bar.high.or(Some(ask.max(bid)));
    }

    point
}

/// Merge a tick into the open bar
///
/// Latest quote wins, sizes add up, and bounds only widen. A tick that pushes a
/// bound out also snaps close and last to that bound.
fn merge_into(bar: &mut Point, tick: &Point) {
    if tick.ask.is_some() || tick.bid.is_some() {
        bar.ask = tick.ask.or(tick.bid);
        bar.bid = tick.bid.or(tick.ask);
    }

    if let Some(price) = tick.price() {
        bar.last = Some(price);
        bar.bar.close = Some(price);
    }

    bar.ask_size = Some(bar.ask_size.unwrap_or(0.0) + tick.ask_size.unwrap_or(0.0));
    bar.bid_size = Some(bar.bid_size.unwrap_or(0.0) + tick.bid_size.unwrap_or(0.0));

    let (Some(ask), Some(bid)) = (tick.ask, tick.bid) else {
        return;
    };

    let low = ask.min(bid);
    let high = ask.max(bid);

    if matches!(bar.bar.low, Some(current) if low < current) {
        bar.last = Some(low);
        bar.bar.close = Some(low);
    }

    if matches!(bar.bar.high, Some(current) if high > current) {
        bar.last = Some(high);
        bar.bar.close = Some(high);
    }

    bar.bar.low = Some(bar.bar.low.map_or(low, |current| current.min(low)));
    bar.bar.high = Some(bar.bar.high.map_or(high, |current| current.max(high)));
}

impl Observable<Point> for BarAggregator {
    fn subscribe_item<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&ItemMessage<'_, Point>) + Send + 'static,
    {
        self.bars.subscribe_item(handler)
    }

    fn subscribe_collection<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&CollectionMessage<'_, Point>) + Send + 'static,
    {
        self.bars.subscribe_collection(handler)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bars.unsubscribe(id)
    }
}

impl Default for BarAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for BarAggregator {
    type Output = Point;

    fn index(&self, index: usize) -> &Point {
        &self.bars[index]
    }
}

impl fmt::Debug for BarAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BarAggregator")
            .field("bars", &self.bars.len())
            .field("latest", &self.latest)
            .finish()
    }
}
