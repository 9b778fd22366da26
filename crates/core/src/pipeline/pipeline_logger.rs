use std::collections::BTreeMap;
use std::time::Instant;

/// Cross-cutting sink for recognition-worker measurements.
///
/// The worker reports per-cycle timings and counts here; what happens to
/// them (nothing, a shutdown summary) is up to the host.
pub trait PipelineLogger: Send {
    /// Report that the frame with capture index `frame_index` was processed.
    fn cycle(&mut self, frame_index: u64);

    /// Record how long a named stage took for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a per-cycle quantity (face count, skipped frames).
    fn metric(&mut self, name: &str, value: f64);

    fn summary(&self) {}
}

pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn cycle(&mut self, _frame_index: u64) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
}

/// Running aggregate of one series. Constant size regardless of how long
/// the worker runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    pub count: u64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
}

impl SeriesStats {
    fn first(value: f64) -> Self {
        Self {
            count: 1,
            total: value,
            min: value,
            max: value,
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.total += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn mean(&self) -> f64 {
        self.total / self.count as f64
    }
}

fn record(series: &mut BTreeMap<String, SeriesStats>, name: &str, value: f64) {
    match series.get_mut(name) {
        Some(stats) => stats.add(value),
        None => {
            series.insert(name.to_string(), SeriesStats::first(value));
        }
    }
}

/// CLI logger: aggregates stage timings and metrics, logs a progress line
/// every `progress_every` cycles and a summary on shutdown.
pub struct StdoutPipelineLogger {
    progress_every: u64,
    timings: BTreeMap<String, SeriesStats>,
    metrics: BTreeMap<String, SeriesStats>,
    started: Instant,
    cycles: u64,
    last_frame_index: Option<u64>,
}

impl StdoutPipelineLogger {
    pub fn new(progress_every: u64) -> Self {
        Self {
            progress_every: progress_every.max(1),
            timings: BTreeMap::new(),
            metrics: BTreeMap::new(),
            started: Instant::now(),
            cycles: 0,
            last_frame_index: None,
        }
    }

    pub fn timing_stats(&self, stage: &str) -> Option<&SeriesStats> {
        self.timings.get(stage)
    }

    pub fn metric_stats(&self, name: &str) -> Option<&SeriesStats> {
        self.metrics.get(name)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// The formatted summary, or `None` before anything was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.cycles == 0 && self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }
        let elapsed_s = self.started.elapsed().as_secs_f64();
        let mut lines = vec![format!(
            "Recognition summary ({} cycles in {elapsed_s:.1}s):",
            self.cycles
        )];

        for (stage, stats) in &self.timings {
            lines.push(format!(
                "  {stage:10} avg {:6.1}ms  min {:6.1}ms  max {:6.1}ms",
                stats.mean(),
                stats.min,
                stats.max
            ));
        }
        for (name, stats) in &self.metrics {
            lines.push(format!(
                "  {name:10} avg {:.2}  max {}",
                stats.mean(),
                stats.max
            ));
        }
        if let Some(index) = self.last_frame_index {
            lines.push(format!("  last frame #{index}"));
        }
        if self.cycles > 0 && elapsed_s > 0.0 {
            lines.push(format!(
                "  {:.2} cycles/s",
                self.cycles as f64 / elapsed_s
            ));
        }
        Some(lines.join("\n"))
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(100)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn cycle(&mut self, frame_index: u64) {
        self.cycles += 1;
        self.last_frame_index = Some(frame_index);
        if self.cycles % self.progress_every == 0 {
            log::info!("Processed {} cycles (frame #{frame_index})", self.cycles);
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        record(&mut self.timings, stage, duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        record(&mut self.metrics, name, value);
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
