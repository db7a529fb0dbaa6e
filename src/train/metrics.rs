//! Scalar metric recording
//!
//! Every value goes to `tracing`. When an event log path is configured, each
//! value is also appended as one JSON object per line.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Which split a step ran on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Train,
    Test,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
        }
    }

    pub fn is_train(self) -> bool {
        self == Self::Train
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values produced by one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    pub loss: f32,
    pub kl_loss: f32,
    pub power_loss: f32,
    /// Pre-clipping global gradient norm, train steps only
    pub grad_norm: Option<f32>,
    /// Set for train steps
    pub learning_rate: Option<f32>,
}

/// Running sums of the losses over one phase of an epoch
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningLoss {
    pub loss: f64,
    pub kl_loss: f64,
    pub power_loss: f64,
    pub steps: usize,
}

impl RunningLoss {
    pub fn add(&mut self, m: &StepMetrics) {
        self.loss += f64::from(m.loss);
        self.kl_loss += f64::from(m.kl_loss);
        self.power_loss += f64::from(m.power_loss);
        self.steps += 1;
    }

    /// `(loss, kl, power)` averaged over steps; zeros when nothing ran
    pub fn averages(&self) -> (f32, f32, f32) {
        if self.steps == 0 {
            return (0.0, 0.0, 0.0);
        }
        let n = self.steps as f64;
        ((self.loss / n) as f32, (self.kl_loss / n) as f32, (self.power_loss / n) as f32)
    }
}

#[derive(Serialize)]
struct Event<'a> {
    tag: &'a str,
    step: u64,
    value: f32,
}

/// Records scalars keyed by tag and step
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    event_log: Option<BufWriter<File>>,
    latest: BTreeMap<String, (u64, f32)>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also append every record to `path` as JSON lines
    pub fn with_event_log(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(format!("creating {}", parent.display()), e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::io(format!("opening event log {}", path.display()), e))?;
        tracing::info!(path = %path.display(), "writing metric events");
        Ok(Self { event_log: Some(BufWriter::new(file)), latest: BTreeMap::new() })
    }

    pub fn record(&mut self, tag: &str, step: u64, value: f32) -> Result<()> {
        tracing::debug!(tag, step, value, "metric");
        self.latest.insert(tag.to_string(), (step, value));
        if let Some(log) = self.event_log.as_mut() {
            let line = serde_json::to_string(&Event { tag, step, value })
                .map_err(|e| Error::Serialization(format!("metric event: {e}")))?;
            writeln!(log, "{line}").map_err(|e| Error::io("writing metric event", e))?;
        }
        Ok(())
    }

    /// Record the scalars of one step under `{phase} ...` tags
    pub fn record_step(&mut self, phase: Phase, step: u64, m: &StepMetrics) -> Result<()> {
        self.record(&format!("{phase} loss"), step, m.loss)?;
        self.record(&format!("{phase} kl loss"), step, m.kl_loss)?;
        self.record(&format!("{phase} power loss"), step, m.power_loss)?;
        if let Some(norm) = m.grad_norm {
            self.record("gradient norm", step, norm)?;
        }
        if let Some(lr) = m.learning_rate {
            self.record("learning rate", step, lr)?;
        }
        Ok(())
    }

    /// Record epoch averages and log the summary line
    pub fn record_epoch(
        &mut self,
        phase: Phase,
        epoch: usize,
        step: u64,
        running: &RunningLoss,
    ) -> Result<()> {
        let (loss, kl, power) = running.averages();
        let epoch_step = epoch as u64;
        self.record(&format!("{phase} loss (per epoch)"), epoch_step, loss)?;
        self.record(&format!("{phase} kl loss (per epoch)"), epoch_step, kl)?;
        self.record(&format!("{phase} power loss (per epoch)"), epoch_step, power)?;
        tracing::info!(
            step,
            %phase,
            epoch,
            "Loss: {loss:.4} KL: {kl:.4} Power: {power:.4}"
        );
        self.flush()
    }

    /// Most recent `(step, value)` for `tag`
    pub fn latest(&self, tag: &str) -> Option<(u64, f32)> {
        self.latest.get(tag).copied()
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(log) = self.event_log.as_mut() {
            log.flush().map_err(|e| Error::io("flushing event log", e))?;
        }
        Ok(())
    }
}

impl Drop for MetricsRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "event log flush failed");
        }
    }
}
