//! Metric loggers.
//!
//! Training code reports scalars, histograms and text keyed by a tag and the
//! frame they belong to. Where the records end up is up to the implementation:
//! nowhere ([`NoopLogger`]), the `log` facade ([`ConsoleLogger`]) or a JSON
//! lines file ([`JsonlLogger`]).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::burnrl::base::EpisodeInfo;
use crate::error::PpoError;
use crate::utils::mean_std;

/// Sink for training metrics.
pub trait Logger: Send {
    fn add_scalar(&mut self, tag: &str, value: f64, frame: usize);

    fn add_histogram(&mut self, tag: &str, values: &[f32], frame: usize);

    fn add_text(&mut self, tag: &str, text: &str, frame: usize);

    fn flush(&mut self) {}
}

/// Compact description of a value distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub std: f32,
}

impl HistogramSummary {
    pub fn from_values(values: &[f32]) -> Self {
        let (mean, std) = mean_std(values);
        let (min, max) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        Self {
            count: values.len(),
            min: if values.is_empty() { 0.0 } else { min },
            max: if values.is_empty() { 0.0 } else { max },
            mean,
            std,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn add_scalar(&mut self, _tag: &str, _value: f64, _frame: usize) {}

    fn add_histogram(&mut self, _tag: &str, _values: &[f32], _frame: usize) {}

    fn add_text(&mut self, _tag: &str, _text: &str, _frame: usize) {}
}

/// Forwards records to the `log` facade under a common prefix.
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    prefix: String,
}

impl ConsoleLogger {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Logger for ConsoleLogger {
    fn add_scalar(&mut self, tag: &str, value: f64, frame: usize) {
        log::info!("[{}] frame {frame:>10} {tag}: {value:.6}", self.prefix);
    }

    fn add_histogram(&mut self, tag: &str, values: &[f32], frame: usize) {
        let s = HistogramSummary::from_values(values);
        log::debug!(
            "[{}] frame {frame:>10} {tag}: n={} min={:.4} max={:.4} mean={:.4} std={:.4}",
            self.prefix,
            s.count,
            s.min,
            s.max,
            s.mean,
            s.std
        );
    }

    fn add_text(&mut self, tag: &str, text: &str, frame: usize) {
        log::info!("[{}] frame {frame:>10} {tag}:\n{text}", self.prefix);
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Scalar {
        time: String,
        tag: &'a str,
        frame: usize,
        value: f64,
    },
    Histogram {
        time: String,
        tag: &'a str,
        frame: usize,
        summary: HistogramSummary,
    },
    Text {
        time: String,
        tag: &'a str,
        frame: usize,
        text: &'a str,
    },
}

/// Appends one JSON object per record to a file.
pub struct JsonlLogger {
    writer: BufWriter<File>,
}

impl JsonlLogger {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PpoError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    fn write(&mut self, record: &Record<'_>) {
        let written = serde_json::to_writer(&mut self.writer, record)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(e) = written {
            log::warn!("dropping metric record: {e}");
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Logger for JsonlLogger {
    fn add_scalar(&mut self, tag: &str, value: f64, frame: usize) {
        self.write(&Record::Scalar {
            time: now(),
            tag,
            frame,
            value,
        });
    }

    fn add_histogram(&mut self, tag: &str, values: &[f32], frame: usize) {
        self.write(&Record::Histogram {
            time: now(),
            tag,
            frame,
            summary: HistogramSummary::from_values(values),
        });
    }

    fn add_text(&mut self, tag: &str, text: &str, frame: usize) {
        self.write(&Record::Text {
            time: now(),
            tag,
            frame,
            text,
        });
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("failed to flush metric log: {e}");
        }
    }
}

impl Drop for JsonlLogger {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Aggregates finished-episode statistics reported by an environment and
/// writes their means every `log_interval` frames.
pub struct EnvLogger {
    logger: Box<dyn Logger>,
    log_interval: usize,
    num_envs: usize,
    frame: usize,
    last_log_frame: usize,
    episodes: Vec<EpisodeInfo>,
}

impl EnvLogger {
    pub fn new(logger: Box<dyn Logger>, num_envs: usize, log_interval: usize) -> Self {
        Self {
            logger,
            log_interval,
            num_envs,
            frame: 0,
            last_log_frame: 0,
            episodes: Vec::new(),
        }
    }

    pub fn logger_mut(&mut self) -> &mut dyn Logger {
        self.logger.as_mut()
    }

    /// Records the infos of one environment tick.
    pub fn step(&mut self, infos: &[Option<EpisodeInfo>], force_log: bool) {
        self.frame += self.num_envs;
        self.episodes.extend(infos.iter().flatten().copied());

        let due = self.frame >= self.last_log_frame + self.log_interval;
        if (due || force_log) && !self.episodes.is_empty() {
            self.last_log_frame = self.frame;
            let rewards: Vec<f32> = self.episodes.iter().map(|e| e.reward).collect();
            let lengths: Vec<f32> = self.episodes.iter().map(|e| e.length as f32).collect();
            let (reward_mean, _) = mean_std(&rewards);
            let (length_mean, _) = mean_std(&lengths);
            self.logger
                .add_scalar("episode reward", reward_mean as f64, self.frame);
            self.logger
                .add_scalar("episode length", length_mean as f64, self.frame);
            self.logger.add_histogram("episode rewards", &rewards, self.frame);
            self.episodes.clear();
        }
    }

    pub fn pending_episodes(&self) -> usize {
        self.episodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<(String, f64, usize)>>>);

    impl Logger for Recorder {
        fn add_scalar(&mut self, tag: &str, value: f64, frame: usize) {
            self.0.lock().unwrap().push((tag.to_string(), value, frame));
        }
        fn add_histogram(&mut self, _tag: &str, _values: &[f32], _frame: usize) {}
        fn add_text(&mut self, _tag: &str, _text: &str, _frame: usize) {}
    }

    #[test]
    fn histogram_summary_of_empty_slice_is_zeroed() {
        let s = HistogramSummary::from_values(&[]);
        assert_eq!(s.count, 0);
        assert_eq!(s.min, 0.0);
        assert_eq!(s.max, 0.0);
    }

    #[test]
    fn env_logger_waits_for_interval() {
        let recorder = Recorder::default();
        let mut env_logger = EnvLogger::new(Box::new(recorder.clone()), 2, 10);
        let done = Some(EpisodeInfo {
            reward: 3.0,
            length: 7,
        });

        env_logger.step(&[done, None], false);
        assert!(recorder.0.lock().unwrap().is_empty());
        assert_eq!(env_logger.pending_episodes(), 1);

        for _ in 0..4 {
            env_logger.step(&[None, done], false);
        }
        let records = recorder.0.lock().unwrap();
        assert_eq!(records[0], ("episode reward".to_string(), 3.0, 10));
        assert_eq!(records[1], ("episode length".to_string(), 7.0, 10));
    }

    #[test]
    fn forced_log_flushes_early() {
        let recorder = Recorder::default();
        let mut env_logger = EnvLogger::new(Box::new(recorder.clone()), 1, 1000);
        env_logger.step(
            &[Some(EpisodeInfo {
                reward: 1.0,
                length: 2,
            })],
            true,
        );
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
        assert_eq!(env_logger.pending_episodes(), 0);
    }

    #[test]
    fn jsonl_logger_writes_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        {
            let mut logger = JsonlLogger::create(&path).unwrap();
            logger.add_scalar("loss", 0.5, 64);
            logger.add_histogram("returns", &[1.0, 2.0], 64);
            logger.add_text("config", "{}", 0);
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "scalar");
        assert_eq!(first["frame"], 64);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["summary"]["count"], 2);
    }
}
