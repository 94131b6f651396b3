use std::collections::HashMap;
use std::time::Instant;

/// Observer for overlay loop events.
///
/// The loop reports stage timings and point metrics here instead of
/// writing output itself, so the CLI can summarise a run and tests can
/// stay silent.
pub trait OverlayLogger: Send {
    /// Record how long a named stage took for one cycle.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. faces per batch).
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// Emit an end-of-session summary. Default: no-op.
    fn summary(&self) {}
}

pub struct NullOverlayLogger;

impl OverlayLogger for NullOverlayLogger {
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Collects timings and metrics and reports a summary through `log`.
pub struct StdoutOverlayLogger {
    timings: HashMap<String, Vec<f64>>,
    metrics: HashMap<String, Vec<f64>>,
    start_time: Instant,
}

impl StdoutOverlayLogger {
    pub fn new() -> Self {
        Self {
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
        }
    }

    /// Returns the formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_s = self.start_time.elapsed().as_secs_f64();
        let mut lines = vec![format!("Overlay summary ({elapsed_s:.1}s):")];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let count = durations.len();
            let avg_ms = mean(durations);
            let max_ms = durations.iter().copied().fold(0.0, f64::max);
            lines.push(format!(
                "  {stage:12}: {count:5} runs  avg {avg_ms:6.1}ms  max {max_ms:6.1}ms"
            ));
            if elapsed_s > 0.0 {
                lines.push(format!("  {stage:12}: {:.1} Hz", count as f64 / elapsed_s));
            }
        }

        let mut names: Vec<_> = self.metrics.keys().collect();
        names.sort();
        for name in names {
            lines.push(format!("  {name}: avg {:.1}", mean(&self.metrics[name])));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn metrics_for(&self, name: &str) -> Option<&[f64]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }
}

impl Default for StdoutOverlayLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayLogger for StdoutOverlayLogger {
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

    fn info(&mut self, message: &str) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_null_logger_accepts_everything() {
        let mut logger = NullOverlayLogger;
        logger.timing("detect", 5.0);
        logger.metric("faces", 3.0);
        logger.info("hello");
        logger.summary();
    }

    #[test]
    fn test_timing_records_per_stage() {
        let mut logger = StdoutOverlayLogger::new();
        logger.timing("detect", 20.0);
        logger.timing("detect", 30.0);
        logger.timing("redraw", 1.0);

        assert_eq!(logger.timings_for("detect"), Some(&[20.0, 30.0][..]));
        assert_eq!(logger.timings_for("redraw").map(|v| v.len()), Some(1));
        assert!(logger.timings_for("missing").is_none());
    }

    #[test]
    fn test_metric_average_in_summary() {
        let mut logger = StdoutOverlayLogger::new();
        logger.metric("faces", 1.0);
        logger.metric("faces", 2.0);

        assert_relative_eq!(mean(logger.metrics_for("faces").unwrap()), 1.5);
        assert!(logger.summary_string().unwrap().contains("faces: avg 1.5"));
    }

    #[test]
    fn test_summary_lists_stages_with_max() {
        let mut logger = StdoutOverlayLogger::new();
        logger.timing("detect", 10.0);
        logger.timing("detect", 40.0);

        let summary = logger.summary_string().unwrap();
        assert!(summary.starts_with("Overlay summary"));
        assert!(summary.contains("detect"));
        assert!(summary.contains("avg   25.0ms"));
        assert!(summary.contains("max   40.0ms"));
    }

    #[test]
    fn test_empty_summary_is_none() {
        assert!(StdoutOverlayLogger::new().summary_string().is_none());
    }

    #[test]
    fn test_info_is_not_counted_in_summary() {
        let mut logger = StdoutOverlayLogger::new();
        logger.info("started");
        assert!(logger.summary_string().is_none());
    }
}
