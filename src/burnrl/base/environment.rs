use std::fmt::Debug;

use thiserror::Error;

use crate::burnrl::base::Space;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("environment expected {expected} action values, got {actual}")]
    ActionShape { expected: usize, actual: usize },

    #[error("malformed step result: {0}")]
    MalformedStep(String),

    #[error("environment failure: {0}")]
    Other(String),
}

/// Summary of a finished episode, reported by the environment on the step
/// that ended it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeInfo {
    pub reward: f32,
    pub length: usize,
}

/// Result of one vectorized step.
///
/// Layouts are row-major over `[num_envs, num_players, ...]`; a single-player
/// environment simply has `num_players == 1`.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// `[num_envs, num_players, observation_len]`
    pub states: Vec<f32>,
    /// `[num_envs, num_players]`
    pub rewards: Vec<f32>,
    /// `[num_envs]`, shared by all players of an environment instance.
    pub dones: Vec<bool>,
    /// `[num_envs, num_players]`
    pub infos: Vec<Option<EpisodeInfo>>,
}

impl StepResult {
    pub(crate) fn validate(&self, num_envs: usize, num_players: usize, obs_len: usize) -> Result<(), EnvError> {
        let checks = [
            ("states", self.states.len(), num_envs * num_players * obs_len),
            ("rewards", self.rewards.len(), num_envs * num_players),
            ("dones", self.dones.len(), num_envs),
            ("infos", self.infos.len(), num_envs * num_players),
        ];
        for (name, actual, expected) in checks {
            if actual != expected {
                return Err(EnvError::MalformedStep(format!(
                    "{name} has {actual} values, expected {expected}"
                )));
            }
        }
        Ok(())
    }
}

/// A batch of environment instances stepped together.
///
/// Every player of every instance acts on each call to [`step`](Self::step);
/// actions are laid out as `[num_envs, num_players, action_len]`.
pub trait VecEnvironment: Debug {
    fn observation_space(&self) -> &Space;

    fn action_space(&self) -> &Space;

    fn num_envs(&self) -> usize;

    fn set_num_envs(&mut self, num_envs: usize);

    fn num_players(&self) -> usize {
        1
    }

    /// Resets every instance, returning `[num_envs, num_players, observation_len]`.
    fn reset(&mut self) -> Result<Vec<f32>, EnvError>;

    fn step(&mut self, actions: &[f32]) -> Result<StepResult, EnvError>;
}
