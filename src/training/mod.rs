//! Training event interfaces and a minimal epoch driver.
//!
//! Metrics reach a run log through an injected [`MetricsSink`]; there is no
//! ambient "current run". A training loop reports progress through
//! [`TrainingEvents`], and [`fit`] owns the order of those calls:
//!
//! 1. `on_batch_end` after every step
//! 2. `on_epoch_end` after every completed epoch
//! 3. `on_train_end` exactly once, whether training succeeded or failed

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::info;

use crate::error::SeerError;
use crate::loader::Batch;

/// Named scalar metrics, ordered by name.
pub type Metrics = BTreeMap<String, f64>;

/// Destination for named scalar metrics.
pub trait MetricsSink {
    fn log(&self, name: &str, value: f64);
}

/// Callbacks invoked by the training loop.
pub trait TrainingEvents {
    fn on_batch_end(&mut self, _batch: usize, _metrics: &Metrics) {}
    fn on_epoch_end(&mut self, _epoch: usize, _metrics: &Metrics) {}
    fn on_train_end(&mut self, _metrics: &Metrics) {}
}

/// Forwards training events to a [`MetricsSink`].
///
/// Batch metrics are logged under their own names, epoch metrics as
/// `epoch_<name>`, and final metrics as `final_<name>`.
pub struct RunLogger<'a, S: MetricsSink + ?Sized> {
    sink: &'a S,
}

impl<'a, S: MetricsSink + ?Sized> RunLogger<'a, S> {
    pub fn new(sink: &'a S) -> Self {
        Self { sink }
    }

    fn log_all(&self, prefix: &str, metrics: &Metrics) {
        for (name, value) in metrics {
            self.sink.log(&format!("{}{}", prefix, name), *value);
        }
    }
}

impl<S: MetricsSink + ?Sized> TrainingEvents for RunLogger<'_, S> {
    fn on_batch_end(&mut self, _batch: usize, metrics: &Metrics) {
        self.log_all("", metrics);
    }

    fn on_epoch_end(&mut self, _epoch: usize, metrics: &Metrics) {
        self.log_all("epoch_", metrics);
    }

    fn on_train_end(&mut self, metrics: &Metrics) {
        self.log_all("final_", metrics);
    }
}

/// Writes metrics to the `tracing` log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn log(&self, name: &str, value: f64) {
        info!(metric = name, value, "metric");
    }
}

/// Keeps every logged metric in memory, in logging order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<(String, f64)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything logged so far.
    pub fn entries(&self) -> Vec<(String, f64)> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Values logged under `name`, in order.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.entries()
            .into_iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v)
            .collect()
    }
}

impl MetricsSink for RecordingSink {
    fn log(&self, name: &str, value: f64) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push((name.to_string(), value));
    }
}

/// One optimisation step over a batch.
pub trait TrainStep {
    fn train_batch(&mut self, batch: &Batch) -> Result<Metrics, SeerError>;
}

/// Runs `epochs` epochs of `steps_per_epoch` batches each.
///
/// Batches are pulled from `batches`, which should repeat at least `epochs`
/// times. Epoch metrics are the mean of that epoch's batch metrics; the final
/// metrics are the last epoch's. Training stops early if the stream ends.
///
/// `on_train_end` is called exactly once, also when a step or the stream
/// fails; it then receives the metrics of the last completed epoch.
pub fn fit<I, T, E>(
    batches: I,
    epochs: usize,
    steps_per_epoch: usize,
    step: &mut T,
    events: &mut E,
) -> Result<Metrics, SeerError>
where
    I: IntoIterator<Item = Result<Batch, SeerError>>,
    T: TrainStep + ?Sized,
    E: TrainingEvents + ?Sized,
{
    let mut last_epoch = Metrics::new();
    let result = run_epochs(
        batches.into_iter(),
        epochs,
        steps_per_epoch,
        step,
        events,
        &mut last_epoch,
    );
    events.on_train_end(&last_epoch);
    result.map(|()| last_epoch)
}

fn run_epochs<I, T, E>(
    mut batches: I,
    epochs: usize,
    steps_per_epoch: usize,
    step: &mut T,
    events: &mut E,
    last_epoch: &mut Metrics,
) -> Result<(), SeerError>
where
    I: Iterator<Item = Result<Batch, SeerError>>,
    T: TrainStep + ?Sized,
    E: TrainingEvents + ?Sized,
{
    let mut global_batch = 0;
    for epoch in 0..epochs {
        let mut sums = Metrics::new();
        let mut steps = 0usize;

        while steps < steps_per_epoch {
            let batch = match batches.next() {
                Some(batch) => batch?,
                None => break,
            };
            let metrics = step.train_batch(&batch)?;
            events.on_batch_end(global_batch, &metrics);
            for (name, value) in &metrics {
                *sums.entry(name.clone()).or_insert(0.0) += value;
            }
            steps += 1;
            global_batch += 1;
        }

        if steps == 0 {
            break;
        }

        let means: Metrics = sums
            .into_iter()
            .map(|(name, sum)| (name, sum / steps as f64))
            .collect();
        events.on_epoch_end(epoch, &means);
        *last_epoch = means;

        if steps < steps_per_epoch {
            break;
        }
    }
    Ok(())
}

/// A data-only training step reporting batch statistics.
///
/// Useful for checking a dataset end to end without a model: it reports the
/// batch size, the mean pixel value, and the fraction of labels outside the
/// category range.
#[derive(Clone, Debug)]
pub struct BatchStats {
    num_categories: usize,
}

impl BatchStats {
    pub fn new(num_categories: usize) -> Self {
        Self { num_categories }
    }
}

impl TrainStep for BatchStats {
    fn train_batch(&mut self, batch: &Batch) -> Result<Metrics, SeerError> {
        let (sum, count) = batch
            .images
            .iter()
            .flat_map(|image| image.data.iter())
            .fold((0.0f64, 0usize), |(s, c), v| (s + f64::from(*v), c + 1));
        let out_of_range = batch
            .labels
            .iter()
            .filter(|&&label| label < 0 || label as usize >= self.num_categories)
            .count();

        let mut metrics = Metrics::new();
        metrics.insert("batch_size".to_string(), batch.len() as f64);
        metrics.insert(
            "mean_pixel".to_string(),
            if count == 0 { 0.0 } else { sum / count as f64 },
        );
        metrics.insert(
            "label_out_of_range".to_string(),
            if batch.is_empty() {
                0.0
            } else {
                out_of_range as f64 / batch.len() as f64
            },
        );
        Ok(metrics)
    }
}
