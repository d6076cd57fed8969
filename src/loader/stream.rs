//! Lazy batched record streams over a list of shard files.
//!
//! A stream is a sequence of passes over its shards. Each pass reads shards
//! in order, parses every record, optionally decorrelates them through a
//! bounded shuffle buffer, and groups them into batches. The last batch of a
//! pass may be short. Passes repeat a fixed number of times or forever.
//!
//! With `prefetch_depth > 0` a reader thread per pass pulls raw records ahead
//! of the consumer into a bounded channel. Output order is the same as
//! without prefetching. Dropping the stream closes the channel, which stops
//! the reader; the thread is joined before the drop returns.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use rand::{rngs::StdRng, RngExt, SeedableRng};
use tracing::debug;

use crate::error::SeerError;
use crate::record::tfrecord::ShardReader;
use crate::record::ImageTensor;

/// Upper bound on raw records queued by a prefetch thread.
pub const MAX_PREFETCH_RECORDS: usize = 4096;

/// One parsed example: `(image, label)`.
pub type Example = (ImageTensor, i64);

/// How many passes a stream makes over its shards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Repeat {
    Count(usize),
    Forever,
}

impl Repeat {
    fn allows(self, passes_started: usize) -> bool {
        match self {
            Repeat::Count(n) => passes_started < n,
            Repeat::Forever => true,
        }
    }
}

/// Stream construction options.
#[derive(Clone, Debug)]
pub struct StreamOptions {
    pub batch_size: usize,
    /// Shuffle window in records; 0 disables shuffling.
    pub shuffle_buffer: usize,
    /// Batches of raw records read ahead on a background thread; 0 reads inline.
    /// The queue never exceeds [`MAX_PREFETCH_RECORDS`].
    pub prefetch_depth: usize,
    pub repeat: Repeat,
    /// Fixes the shuffle order. Pass `k` uses `seed + k`.
    pub seed: Option<u64>,
}

impl StreamOptions {
    /// A single ordered pass with no shuffling or prefetching.
    pub fn sequential(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle_buffer: 0,
            prefetch_depth: 0,
            repeat: Repeat::Count(1),
            seed: None,
        }
    }
}

/// A group of up to `batch_size` examples.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    pub images: Vec<ImageTensor>,
    pub labels: Vec<i64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Builds a lazy batch stream over `shards`.
///
/// # Errors
/// Fails if `batch_size` is zero. I/O and parse failures surface later, as the
/// stream's first (and last) `Err` item.
pub fn build_stream<P>(
    shards: Vec<PathBuf>,
    parse_fn: P,
    options: StreamOptions,
) -> Result<BatchStream<P>, SeerError>
where
    P: Fn(&[u8]) -> Result<Example, SeerError>,
{
    if options.batch_size == 0 {
        return Err(SeerError::InvalidStreamOptions {
            message: "batch size must be at least 1".to_string(),
        });
    }

    let rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::seed_from_u64(rand::rng().random::<u64>()),
    };

    Ok(BatchStream {
        shards,
        parse_fn,
        options,
        rng,
        pass: None,
        passes_started: 0,
        done: false,
    })
}

/// Iterator of batches; see the module docs.
pub struct BatchStream<P> {
    shards: Vec<PathBuf>,
    parse_fn: P,
    options: StreamOptions,
    rng: StdRng,
    pass: Option<Pass>,
    passes_started: usize,
    done: bool,
}

impl<P> BatchStream<P>
where
    P: Fn(&[u8]) -> Result<Example, SeerError>,
{
    /// Number of passes begun so far.
    pub fn passes_started(&self) -> usize {
        self.passes_started
    }

    fn start_pass(&mut self) -> Pass {
        if let Some(seed) = self.options.seed {
            self.rng = StdRng::seed_from_u64(seed.wrapping_add(self.passes_started as u64));
        }
        debug!(
            pass = self.passes_started,
            shards = self.shards.len(),
            "starting pass"
        );

        let source = if self.options.prefetch_depth > 0 {
            let capacity = prefetch_capacity(&self.options);
            RecordSource::Prefetched(PrefetchReader::spawn(self.shards.clone(), capacity))
        } else {
            RecordSource::Inline {
                shards: self.shards.clone().into_iter(),
                reader: None,
            }
        };

        Pass {
            source,
            buffer: Vec::new(),
            exhausted: false,
            yielded: 0,
        }
    }

    fn fail(&mut self, err: SeerError) -> Option<Result<Batch, SeerError>> {
        self.done = true;
        self.pass = None;
        Some(Err(err))
    }
}

impl<P> Iterator for BatchStream<P>
where
    P: Fn(&[u8]) -> Result<Example, SeerError>,
{
    type Item = Result<Batch, SeerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if self.pass.is_none() {
                if !self.options.repeat.allows(self.passes_started) {
                    self.done = true;
                    return None;
                }
                let pass = self.start_pass();
                self.pass = Some(pass);
                self.passes_started += 1;
            }

            let mut batch = Batch::default();
            let mut pass_ended = false;
            while batch.len() < self.options.batch_size {
                let item = match self.pass.as_mut() {
                    Some(pass) => pass.next_example(
                        &self.parse_fn,
                        &mut self.rng,
                        self.options.shuffle_buffer,
                    ),
                    None => None,
                };
                match item {
                    Some(Ok((image, label))) => {
                        batch.images.push(image);
                        batch.labels.push(label);
                    }
                    Some(Err(err)) => return self.fail(err),
                    None => {
                        pass_ended = true;
                        break;
                    }
                }
            }

            if pass_ended {
                let yielded = self.pass.take().map(|p| p.yielded).unwrap_or(0);
                if yielded == 0 {
                    // An empty pass would repeat forever without output.
                    self.done = true;
                    return None;
                }
                if batch.is_empty() {
                    continue;
                }
            }

            return Some(Ok(batch));
        }
    }
}

fn prefetch_capacity(options: &StreamOptions) -> usize {
    options
        .prefetch_depth
        .saturating_mul(options.batch_size)
        .clamp(1, MAX_PREFETCH_RECORDS)
}

/// State of one pass over the shards.
struct Pass {
    source: RecordSource,
    buffer: Vec<Example>,
    exhausted: bool,
    yielded: usize,
}

impl Pass {
    fn next_example<P>(
        &mut self,
        parse_fn: &P,
        rng: &mut StdRng,
        shuffle_buffer: usize,
    ) -> Option<Result<Example, SeerError>>
    where
        P: Fn(&[u8]) -> Result<Example, SeerError>,
    {
        if shuffle_buffer == 0 {
            let item = self
                .source
                .next()
                .map(|raw| raw.and_then(|bytes| parse_fn(&bytes)));
            if matches!(item, Some(Ok(_))) {
                self.yielded += 1;
            }
            return item;
        }

        while !self.exhausted && self.buffer.len() < shuffle_buffer {
            match self.source.next() {
                Some(Ok(bytes)) => match parse_fn(&bytes) {
                    Ok(example) => self.buffer.push(example),
                    Err(err) => return Some(Err(err)),
                },
                Some(Err(err)) => return Some(Err(err)),
                None => self.exhausted = true,
            }
        }

        if self.buffer.is_empty() {
            return None;
        }
        let pick = rng.random_range(0..self.buffer.len());
        self.yielded += 1;
        Some(Ok(self.buffer.swap_remove(pick)))
    }
}

/// Raw record bytes for one pass, read inline or by a prefetch thread.
enum RecordSource {
    Inline {
        shards: std::vec::IntoIter<PathBuf>,
        reader: Option<ShardReader>,
    },
    Prefetched(PrefetchReader),
}

impl RecordSource {
    fn next(&mut self) -> Option<Result<Vec<u8>, SeerError>> {
        match self {
            RecordSource::Inline { shards, reader } => loop {
                if let Some(current) = reader.as_mut() {
                    match current.next() {
                        Some(item) => return Some(item),
                        None => *reader = None,
                    }
                }
                let path = shards.next()?;
                match ShardReader::open(&path) {
                    Ok(opened) => *reader = Some(opened),
                    Err(err) => return Some(Err(err)),
                }
            },
            RecordSource::Prefetched(prefetch) => prefetch.next(),
        }
    }
}

/// Reads shards on a background thread into a bounded channel.
struct PrefetchReader {
    rx: Option<Receiver<Result<Vec<u8>, SeerError>>>,
    handle: Option<JoinHandle<()>>,
}

impl PrefetchReader {
    fn spawn(shards: Vec<PathBuf>, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        let handle = thread::spawn(move || read_shards(shards, tx));
        Self {
            rx: Some(rx),
            handle: Some(handle),
        }
    }

    fn next(&mut self) -> Option<Result<Vec<u8>, SeerError>> {
        self.rx.as_ref().and_then(|rx| rx.recv().ok())
    }
}

impl Drop for PrefetchReader {
    fn drop(&mut self) {
        // Closing the receiver unblocks a reader waiting on a full channel.
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn read_shards(shards: Vec<PathBuf>, tx: Sender<Result<Vec<u8>, SeerError>>) {
    for path in shards {
        let reader = match ShardReader::open(&path) {
            Ok(reader) => reader,
            Err(err) => {
                let _ = tx.send(Err(err));
                return;
            }
        };
        for frame in reader {
            let failed = frame.is_err();
            if tx.send(frame).is_err() || failed {
                return;
            }
        }
    }
}
