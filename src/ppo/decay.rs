//! Frame-driven coefficient schedules.
//!
//! A schedule maps the number of frames seen so far to a multiplier. The
//! agent advances every schedule right before a training pass and multiplies
//! the learning rate, clip ranges and entropy bonus by the current values.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecayKind {
    Linear,
    /// Exponential interpolation; larger temperatures front-load the decay.
    Exponential { temperature: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayConfig {
    pub start_value: f32,
    pub end_value: f32,
    /// Frame at which `end_value` is reached and then held.
    pub end_frame: usize,
    pub kind: DecayKind,
}

impl DecayConfig {
    /// Linear decay from 1 to 0 over `end_frame` frames.
    pub fn new(end_frame: usize) -> Self {
        Self {
            start_value: 1.0,
            end_value: 0.0,
            end_frame,
            kind: DecayKind::Linear,
        }
    }

    pub fn with_start_value(mut self, value: f32) -> Self {
        self.start_value = value;
        self
    }

    pub fn with_end_value(mut self, value: f32) -> Self {
        self.end_value = value;
        self
    }

    pub fn with_kind(mut self, kind: DecayKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.end_frame == 0 {
            return Err(ConfigError::InvalidCount {
                field: "decay.end_frame",
                value: 0,
            });
        }
        for (field, value) in [
            ("decay.start_value", self.start_value),
            ("decay.end_value", self.end_value),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::OutOfRange {
                    field,
                    value: value as f64,
                    min: 0.0,
                    max: f64::INFINITY,
                });
            }
        }
        if let DecayKind::Exponential { temperature } = self.kind {
            if !(temperature.is_finite() && temperature > 0.0) {
                return Err(ConfigError::OutOfRange {
                    field: "decay.temperature",
                    value: temperature as f64,
                    min: f64::MIN_POSITIVE,
                    max: f64::INFINITY,
                });
            }
        }
        Ok(())
    }

    pub fn build(&self) -> ValueDecay {
        ValueDecay::new(self.clone())
    }
}

/// Live state of one schedule. Created once per agent and never reset.
#[derive(Debug, Clone)]
pub struct ValueDecay {
    config: DecayConfig,
    value: f32,
}

impl ValueDecay {
    pub fn new(config: DecayConfig) -> Self {
        let value = config.start_value;
        Self { config, value }
    }

    /// Recomputes the value for `frame`.
    pub fn step(&mut self, frame: usize) -> f32 {
        let progress = (frame as f32 / self.config.end_frame.max(1) as f32).clamp(0.0, 1.0);
        let weight = match self.config.kind {
            DecayKind::Linear => progress,
            DecayKind::Exponential { temperature } => {
                // normalized so that weight(0) = 0 and weight(1) = 1
                (1.0 - (-temperature * progress).exp()) / (1.0 - (-temperature).exp())
            }
        };
        self.value = self.config.start_value + (self.config.end_value - self.config.start_value) * weight;
        self.value
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

/// Current value of an optional schedule, 1 when absent.
pub(crate) fn multiplier(decay: &Option<ValueDecay>) -> f32 {
    decay.as_ref().map_or(1.0, ValueDecay::value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_decay_interpolates_then_holds() {
        let mut decay = DecayConfig::new(100).build();
        assert_eq!(decay.value(), 1.0);
        assert!((decay.step(25) - 0.75).abs() < 1e-6);
        assert!((decay.step(100) - 0.0).abs() < 1e-6);
        assert!((decay.step(1_000) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn exponential_decay_stays_within_bounds_and_decays_faster() {
        let config = DecayConfig::new(100).with_kind(DecayKind::Exponential { temperature: 4.0 });
        let mut exp = config.build();
        let mut lin = DecayConfig::new(100).build();
        for frame in [0, 10, 50, 90, 100, 150] {
            let e = exp.step(frame);
            let l = lin.step(frame);
            assert!((0.0..=1.0).contains(&e), "frame {frame}: {e}");
            assert!(e <= l + 1e-6, "frame {frame}: exp {e} > lin {l}");
        }
        assert!(exp.step(100).abs() < 1e-6);
    }

    #[test]
    fn custom_endpoints_are_respected() {
        let mut decay = DecayConfig::new(10)
            .with_start_value(2.0)
            .with_end_value(0.5)
            .build();
        assert!((decay.step(5) - 1.25).abs() < 1e-6);
        assert!((decay.step(10) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn absent_schedule_means_unit_multiplier() {
        assert_eq!(multiplier(&None), 1.0);
        let mut decay = DecayConfig::new(4).build();
        decay.step(2);
        assert!((multiplier(&Some(decay)) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn zero_length_schedule_is_rejected() {
        assert!(DecayConfig::new(0).validate().is_err());
        assert!(
            DecayConfig::new(5)
                .with_kind(DecayKind::Exponential { temperature: 0.0 })
                .validate()
                .is_err()
        );
    }
}
