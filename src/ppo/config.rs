//! Configuration for PPO training.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PpoError};
use crate::ppo::decay::DecayConfig;

/// How the policy objective is constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    /// Plain policy gradient on the log-space ratio.
    None,
    /// Clipped surrogate objective.
    #[default]
    Clip,
    /// Alternative name for the clipped objective, kept for configs written
    /// against large clip factors.
    ClipMod,
}

impl Constraint {
    pub fn clips(self) -> bool {
        matches!(self, Constraint::Clip | Constraint::ClipMod)
    }
}

impl FromStr for Constraint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(Constraint::None),
            "clip" => Ok(Constraint::Clip),
            "clip_mod" => Ok(Constraint::ClipMod),
            other => Err(ConfigError::UnknownConstraint(other.to_string())),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Constraint::None => "none",
            Constraint::Clip => "clip",
            Constraint::ClipMod => "clip_mod",
        };
        f.write_str(name)
    }
}

/// Hyperparameters of a single PPO agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoConfig {
    /// Parallel environment instances acted for on every step.
    pub num_actors: usize,
    /// Discount for returns (gamma).
    pub reward_discount: f32,
    /// GAE discount (lambda).
    pub advantage_discount: f32,
    /// Transitions collected per actor before each training pass.
    pub horizon: usize,
    /// Optimization epochs over each collected batch.
    pub ppo_iters: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub value_loss_scale: f32,
    pub entropy_bonus: f32,
    pub constraint: Constraint,
    /// Additive bound on the log-space probability ratio.
    pub policy_clip: f32,
    pub value_clip: f32,
    pub grad_clip_norm: f32,
    /// Multiplier applied to environment rewards before anything else.
    pub reward_scale: f32,
    /// Frames between logged training passes.
    pub log_interval: usize,
    pub lr_decay: Option<DecayConfig>,
    pub clip_decay: Option<DecayConfig>,
    pub entropy_decay: Option<DecayConfig>,
    pub model_save_folder: Option<String>,
    /// Frames between checkpoints; `None` disables checkpointing.
    pub model_save_interval: Option<usize>,
    pub model_init_path: Option<String>,
    /// Suffix checkpoints with the frame number instead of overwriting.
    pub save_intermediate_models: bool,
    pub model_save_tag: String,
    pub seed: u64,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            num_actors: 8,
            reward_discount: 0.99,
            advantage_discount: 0.95,
            horizon: 64,
            ppo_iters: 10,
            batch_size: 64,
            learning_rate: 3e-4,
            value_loss_scale: 0.5,
            entropy_bonus: 0.01,
            constraint: Constraint::Clip,
            policy_clip: 0.1,
            value_clip: 0.1,
            grad_clip_norm: 2.0,
            reward_scale: 1.0,
            log_interval: 10 * 1024,
            lr_decay: None,
            clip_decay: None,
            entropy_decay: None,
            model_save_folder: None,
            model_save_interval: None,
            model_init_path: None,
            save_intermediate_models: false,
            model_save_tag: "ppo_model".to_string(),
            seed: 0,
        }
    }
}

impl PpoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_actors(mut self, num_actors: usize) -> Self {
        self.num_actors = num_actors;
        self
    }

    pub fn with_reward_discount(mut self, gamma: f32) -> Self {
        self.reward_discount = gamma;
        self
    }

    pub fn with_advantage_discount(mut self, lambda: f32) -> Self {
        self.advantage_discount = lambda;
        self
    }

    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_ppo_iters(mut self, iters: usize) -> Self {
        self.ppo_iters = iters;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_value_loss_scale(mut self, scale: f32) -> Self {
        self.value_loss_scale = scale;
        self
    }

    pub fn with_entropy_bonus(mut self, bonus: f32) -> Self {
        self.entropy_bonus = bonus;
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn with_policy_clip(mut self, clip: f32) -> Self {
        self.policy_clip = clip;
        self
    }

    pub fn with_value_clip(mut self, clip: f32) -> Self {
        self.value_clip = clip;
        self
    }

    pub fn with_grad_clip_norm(mut self, norm: f32) -> Self {
        self.grad_clip_norm = norm;
        self
    }

    pub fn with_reward_scale(mut self, scale: f32) -> Self {
        self.reward_scale = scale;
        self
    }

    pub fn with_log_interval(mut self, frames: usize) -> Self {
        self.log_interval = frames;
        self
    }

    /// Decays learning rate, clip range and entropy bonus towards zero over
    /// `frames` training frames.
    pub fn with_learning_decay_frames(mut self, frames: usize) -> Self {
        self.lr_decay = Some(DecayConfig::new(frames));
        self.clip_decay = Some(DecayConfig::new(frames));
        self.entropy_decay = Some(DecayConfig::new(frames));
        self
    }

    pub fn with_lr_decay(mut self, decay: DecayConfig) -> Self {
        self.lr_decay = Some(decay);
        self
    }

    pub fn with_clip_decay(mut self, decay: DecayConfig) -> Self {
        self.clip_decay = Some(decay);
        self
    }

    pub fn with_entropy_decay(mut self, decay: DecayConfig) -> Self {
        self.entropy_decay = Some(decay);
        self
    }

    pub fn with_model_save(mut self, folder: impl Into<String>, interval: usize) -> Self {
        self.model_save_folder = Some(folder.into());
        self.model_save_interval = Some(interval);
        self
    }

    pub fn with_model_init_path(mut self, path: impl Into<String>) -> Self {
        self.model_init_path = Some(path.into());
        self
    }

    pub fn with_save_intermediate_models(mut self, enabled: bool) -> Self {
        self.save_intermediate_models = enabled;
        self
    }

    pub fn with_model_save_tag(mut self, tag: impl Into<String>) -> Self {
        self.model_save_tag = tag.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Minibatches per optimization epoch.
    pub fn minibatches(&self) -> usize {
        (self.num_actors * self.horizon / self.batch_size).max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("num_actors", self.num_actors),
            ("horizon", self.horizon),
            ("ppo_iters", self.ppo_iters),
            ("batch_size", self.batch_size),
            ("log_interval", self.log_interval),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::InvalidCount { field, value });
            }
        }

        let unit_ranges = [
            ("reward_discount", self.reward_discount),
            ("advantage_discount", self.advantage_discount),
        ];
        for (field, value) in unit_ranges {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    field,
                    value: value as f64,
                    min: 0.0,
                    max: 1.0,
                });
            }
        }

        let non_negative = [
            ("learning_rate", self.learning_rate),
            ("value_loss_scale", self.value_loss_scale as f64),
            ("entropy_bonus", self.entropy_bonus as f64),
            ("policy_clip", self.policy_clip as f64),
            ("value_clip", self.value_clip as f64),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::OutOfRange {
                    field,
                    value,
                    min: 0.0,
                    max: f64::INFINITY,
                });
            }
        }
        if !(self.grad_clip_norm.is_finite() && self.grad_clip_norm > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "grad_clip_norm",
                value: self.grad_clip_norm as f64,
                min: f64::MIN_POSITIVE,
                max: f64::INFINITY,
            });
        }

        if let Some(interval) = self.model_save_interval {
            if interval == 0 {
                return Err(ConfigError::InvalidCount {
                    field: "model_save_interval",
                    value: interval,
                });
            }
            if self.model_save_folder.is_none() {
                return Err(ConfigError::MissingSaveFolder);
            }
        }

        for decay in [&self.lr_decay, &self.clip_decay, &self.entropy_decay]
            .into_iter()
            .flatten()
        {
            decay.validate()?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<unserializable config: {e}>"))
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PpoError> {
        let json = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PpoConfig::default().validate().is_ok());
    }

    #[test]
    fn constraint_parses_known_modes_only() {
        assert_eq!("clip".parse::<Constraint>().unwrap(), Constraint::Clip);
        assert_eq!("clip_mod".parse::<Constraint>().unwrap(), Constraint::ClipMod);
        assert_eq!("none".parse::<Constraint>().unwrap(), Constraint::None);
        assert_eq!(
            "kl".parse::<Constraint>(),
            Err(ConfigError::UnknownConstraint("kl".to_string()))
        );
    }

    #[test]
    fn zero_horizon_is_rejected() {
        let err = PpoConfig::new().with_horizon(0).validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidCount {
                field: "horizon",
                value: 0
            }
        );
    }

    #[test]
    fn save_interval_requires_folder() {
        let mut config = PpoConfig::new();
        config.model_save_interval = Some(100);
        assert_eq!(config.validate(), Err(ConfigError::MissingSaveFolder));
    }

    #[test]
    fn minibatches_never_drop_below_one() {
        let config = PpoConfig::new()
            .with_num_actors(2)
            .with_horizon(4)
            .with_batch_size(64);
        assert_eq!(config.minibatches(), 1);
        let config = config.with_batch_size(2);
        assert_eq!(config.minibatches(), 4);
    }

    #[test]
    fn json_round_trip_keeps_fields() {
        let config = PpoConfig::new()
            .with_horizon(32)
            .with_constraint(Constraint::None)
            .with_learning_decay_frames(1000);
        let parsed = PpoConfig::from_json(&config.to_json()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let parsed = PpoConfig::from_json(r#"{"horizon": 16, "constraint": "clip_mod"}"#).unwrap();
        assert_eq!(parsed.horizon, 16);
        assert_eq!(parsed.constraint, Constraint::ClipMod);
        assert_eq!(parsed.batch_size, PpoConfig::default().batch_size);
    }
}
