use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;

use crate::burnrl::base::Logger;
use crate::error::{ConfigError, PpoError};
use crate::ppo::config::PpoConfig;
use crate::ppo::distribution::ActionDistribution;
use crate::ppo::model::ActorCritic;
use crate::ppo::training::TrainingData;

/// State handed to a [`TrainingAugmentation`] on every training pass.
pub struct UpdateContext<'a, B: AutodiffBackend, M> {
    /// The policy about to be updated, on the training device.
    pub model: &'a M,
    pub data: &'a TrainingData<B>,
    pub pd: ActionDistribution,
    pub logger: &'a mut dyn Logger,
    pub frame: usize,
    pub do_log: bool,
    pub rng: &'a mut StdRng,
}

/// Extra learning attached to the PPO update, e.g. a world model trained on
/// the same rollouts. Runs right before the policy is optimized.
pub trait TrainingAugmentation<B: AutodiffBackend, M: ActorCritic<B>> {
    /// Checked once when the augmentation is attached to an agent.
    fn validate(&self, _config: &PpoConfig) -> Result<(), ConfigError> {
        Ok(())
    }

    fn before_update(&mut self, ctx: UpdateContext<'_, B, M>) -> Result<(), PpoError>;
}

/// Plain PPO.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAugmentation;

impl<B: AutodiffBackend, M: ActorCritic<B>> TrainingAugmentation<B, M> for NoAugmentation {
    fn before_update(&mut self, _ctx: UpdateContext<'_, B, M>) -> Result<(), PpoError> {
        Ok(())
    }
}
