use crate::models::Point;
use anyhow::Context;
use chrono::DateTime;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};

/// Line-oriented tick documents, one per instrument
pub trait TickSource: Send {
    /// Open the document for `instrument`, positioned at its header line
    fn open(&self, instrument: &str) -> anyhow::Result<Box<dyn BufRead + Send>>;
}

impl<T: TickSource + ?Sized> TickSource for Box<T> {
    fn open(&self, instrument: &str) -> anyhow::Result<Box<dyn BufRead + Send>> {
        (**self).open(instrument)
    }
}

/// Reads `<dir>/<instrument name>`
#[derive(Debug, Clone)]
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TickSource for FileSource {
    fn open(&self, instrument: &str) -> anyhow::Result<Box<dyn BufRead + Send>> {
        let path = self.dir.join(instrument);
        let file = File::open(&path)
            .with_context(|| format!("Failed to open tick file {}", path.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// In-memory documents keyed by instrument name
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    documents: HashMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, instrument: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(instrument, content);
        self
    }

    pub fn insert(&mut self, instrument: impl Into<String>, content: impl Into<String>) {
        self.documents.insert(instrument.into(), content.into());
    }
}

impl TickSource for MemorySource {
    fn open(&self, instrument: &str) -> anyhow::Result<Box<dyn BufRead + Send>> {
        let content = self
            .documents
            .get(instrument)
            .with_context(|| format!("No tick document for {}", instrument))?;
        Ok(Box::new(Cursor::new(content.clone().into_bytes())))
    }
}

/// Converts one raw line into a tick, None for lines that carry no tick
pub type PointParser = Box<dyn Fn(&str) -> Option<Point> + Send>;

/// Default line format: `unixSeconds bid bidSize ask askSize`
///
/// Seconds may be fractional. The trade price is the ask, or the bid when the
/// ask size is zero.
pub fn parse_point(line: &str) -> Option<Point> {
    let mut fields = line.split_whitespace();

    let seconds: f64 = fields.next()?.parse().ok()?;
    let bid: f64 = fields.next()?.parse().ok()?;
    let bid_size: f64 = fields.next()?.parse().ok()?;
    let ask: f64 = fields.next()?.parse().ok()?;
    let ask_size: f64 = fields.next()?.parse().ok()?;

    if !seconds.is_finite() {
        return None;
    }

    let time = DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)?;
    let last = if ask_size == 0.0 { bid } else { ask };

    Some(Point {
        time,
        bid: Some(bid),
        ask: Some(ask),
        bid_size: Some(bid_size),
        ask_size: Some(ask_size),
        last: Some(last),
        ..Point::default()
    })
}

/// Result of one attempt to draw a tick from the feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Earliest buffered tick and the index of its instrument
    Point { index: usize, point: Point },
    /// Nothing buffered this round, some readers still have lines
    Pending,
    /// Every reader reached the end of its document
    Exhausted,
}

struct FeedReader {
    instrument: String,
    reader: Box<dyn BufRead + Send>,
    buffered: Option<Point>,
    exhausted: bool,
}

impl FeedReader {
    /// Read one line into the empty buffer slot
    fn fill(&mut self, parser: &PointParser) {
        if self.buffered.is_some() || self.exhausted {
            return;
        }

        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => {
                tracing::info!(instrument = %self.instrument, "Tick source exhausted");
                self.exhausted = true;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    return;
                }
                self.buffered = parser(line);
                if self.buffered.is_none() {
                    tracing::warn!(instrument = %self.instrument, line, "Skipping malformed tick line");
                }
            }
            Err(e) => {
                tracing::warn!(instrument = %self.instrument, "Tick source read failed: {}", e);
                self.exhausted = true;
            }
        }
    }
}

/// Merges per-instrument tick documents into one time-ordered stream
pub struct PriceFeed {
    readers: Vec<FeedReader>,
}

impl PriceFeed {
    /// Open a reader per instrument and skip each header line
    ///
    /// # Arguments
    /// * `source` - Where the documents come from
    /// * `instruments` - Instrument names, in tie-break priority order
    pub fn open<S>(source: &S, instruments: &[String]) -> anyhow::Result<Self>
    where
        S: TickSource + ?Sized,
    {
        let mut readers = Vec::with_capacity(instruments.len());

        for instrument in instruments {
            let mut reader = source.open(instrument)?;

            let mut header = String::new();
            let read = reader
                .read_line(&mut header)
                .with_context(|| format!("Failed to read header for {}", instrument))?;

            readers.push(FeedReader {
                instrument: instrument.clone(),
                reader,
                buffered: None,
                exhausted: read == 0,
            });
        }

        Ok(Self { readers })
    }

    /// Top up empty slots, then hand out the earliest buffered tick
    ///
    /// Ties go to the lowest instrument index.
    pub fn next_point(&mut self, parser: &PointParser) -> FeedEvent {
        for reader in &mut self.readers {
            reader.fill(parser);
        }

        let mut earliest: Option<usize> = None;
        for (index, reader) in self.readers.iter().enumerate() {
            let Some(point) = &reader.buffered else {
                continue;
            };
            let is_earlier = match earliest.and_then(|i| self.readers[i].buffered.as_ref()) {
                Some(best) => point.time < best.time,
                None => true,
            };
            if is_earlier {
                earliest = Some(index);
            }
        }

        match earliest.and_then(|index| Some((index, self.readers[index].buffered.take()?))) {
            Some((index, point)) => FeedEvent::Point { index, point },
            None if self.is_exhausted() => FeedEvent::Exhausted,
            None => FeedEvent::Pending,
        }
    }

    pub fn instrument(&self, index: usize) -> Option<&str> {
        self.readers.get(index).map(|reader| reader.instrument.as_str())
    }

    pub fn is_exhausted(&self) -> bool {
        self.readers
            .iter()
            .all(|reader| reader.exhausted && reader.buffered.is_none())
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}
