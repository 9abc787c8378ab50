use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Observer for batch classification events.
///
/// Keeps the use case free of any particular output mechanism; the CLI
/// logs through `log`, tests discard everything.
pub trait PipelineLogger: Send {
    /// Report image-level progress.
    fn progress(&mut self, current: usize, total: usize);

    /// Record how long a named stage took for one image.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. image megapixels).
    fn metric(&mut self, name: &str, value: f64);

    /// Count one image outcome (`happy`, `not_happy`, or a failure kind).
    fn outcome(&mut self, label: &str);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit an end-of-batch summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent logger that discards all events.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _current: usize, _total: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn outcome(&mut self, _label: &str) {}
    fn info(&mut self, _message: &str) {}
}

/// CLI logger that keeps per-stage timings, metrics and outcome counts
/// and reports them when the batch ends.
///
/// Progress lines are throttled to every `throttle_images` images.
pub struct StdoutPipelineLogger {
    throttle_images: usize,
    timings: HashMap<String, Vec<f64>>,
    metrics: HashMap<String, Vec<f64>>,
    outcomes: BTreeMap<String, usize>,
    start_time: Instant,
    total_images: usize,
    messages: Vec<String>,
}

impl StdoutPipelineLogger {
    pub fn new(throttle_images: usize) -> Self {
        Self {
            throttle_images: throttle_images.max(1),
            timings: HashMap::new(),
            metrics: HashMap::new(),
            outcomes: BTreeMap::new(),
            start_time: Instant::now(),
            total_images: 0,
            messages: Vec::new(),
        }
    }

    /// Returns the formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() && self.outcomes.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let images = self.total_images;
        let mut lines = vec![format!(
            "Batch summary ({images} images, {:.1}s total):",
            elapsed_ms / 1000.0
        )];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let total_ms: f64 = durations.iter().sum();
            lines.push(format!(
                "  {stage:8}: avg {:6.1}ms  max {:6.1}ms  total {total_ms:7.0}ms",
                mean(durations),
                durations.iter().copied().fold(0.0, f64::max)
            ));
        }

        let mut metric_names: Vec<_> = self.metrics.keys().collect();
        metric_names.sort();
        for name in metric_names {
            lines.push(format!("  {name}: avg {:.1}", mean(&self.metrics[name])));
        }

        for (label, count) in &self.outcomes {
            lines.push(format!("  {label}: {count}"));
        }

        if images > 0 && elapsed_ms > 0.0 {
            let rate = images as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Throughput: {rate:.1} images/s"));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn metrics_for(&self, name: &str) -> Option<&[f64]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }

    pub fn outcome_count(&self, label: &str) -> usize {
        self.outcomes.get(label).copied().unwrap_or(0)
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(10)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, current: usize, total: usize) {
        self.total_images = total;
        if total > 0 && (current % self.throttle_images == 0 || current == total) {
            log::info!("Classified {current}/{total} images");
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn outcome(&mut self, label: &str) {
        *self.outcomes.entry(label.to_string()).or_default() += 1;
    }

    fn info(&mut self, message: &str) {
        self.messages.push(message.to_string());
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
