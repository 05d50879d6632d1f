//! The clipped PPO objective.
//!
//! The probability ratio is kept in log space, `logp - logp_old`, and the
//! clip bounds are applied additively to it: `clamp(ratio, -clip, clip)`.

use burn::prelude::*;

use crate::error::PpoError;
use crate::ppo::config::Constraint;
use crate::ppo::distribution::ActionDistribution;
use crate::utils::tensor_scalar;

/// Coefficients of one update, with decay multipliers already applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossCoefficients {
    pub constraint: Constraint,
    pub policy_clip: f32,
    pub value_clip: f32,
    pub value_loss_scale: f32,
    pub entropy_bonus: f32,
}

/// Inputs of a minibatch. New predictions carry gradients, the rest are
/// constants from the collected sample.
pub struct LossInput<B: Backend> {
    pub probs: Tensor<B, 2>,
    pub values: Tensor<B, 1>,
    pub probs_old: Tensor<B, 2>,
    pub values_old: Tensor<B, 1>,
    pub actions: Tensor<B, 2>,
    pub advantages: Tensor<B, 1>,
    pub returns: Tensor<B, 1>,
}

/// Per-sample loss terms and the reduced total.
pub struct PpoLoss<B: Backend> {
    pub total: Tensor<B, 1>,
    pub policy: Tensor<B, 1>,
    pub value: Tensor<B, 1>,
    pub entropy_loss: Tensor<B, 1>,
    pub entropy: Tensor<B, 1>,
    pub ratio: Tensor<B, 1>,
    pub kl: Tensor<B, 1>,
}

/// Huber loss with unit threshold, unreduced.
pub fn smooth_l1<B: Backend>(pred: Tensor<B, 1>, target: Tensor<B, 1>) -> Tensor<B, 1> {
    let diff = (pred - target).abs();
    let quad = diff.clone().clamp_max(1.0);
    quad.clone().powf_scalar(2.0).mul_scalar(0.5) + (diff - quad)
}

pub fn ppo_loss<B: Backend>(
    pd: ActionDistribution,
    input: LossInput<B>,
    coef: LossCoefficients,
) -> PpoLoss<B> {
    let LossInput {
        probs,
        values,
        probs_old,
        values_old,
        actions,
        advantages,
        returns,
    } = input;
    let actions = actions.detach();
    let probs_old = probs_old.detach();

    let logp = pd.logp(actions.clone(), probs.clone());
    let logp_old = pd.logp(actions, probs_old.clone()).detach();
    let ratio = logp - logp_old;

    let unclipped = ratio.clone() * advantages.clone();
    let policy = if coef.constraint.clips() {
        let clipped = ratio.clone().clamp(-coef.policy_clip, coef.policy_clip) * advantages;
        -unclipped.min_pair(clipped)
    } else {
        -unclipped
    };

    let values_clipped = values_old.clone()
        + (values.clone() - values_old).clamp(-coef.value_clip, coef.value_clip);
    let value_clipped_loss = smooth_l1(values_clipped, returns.clone());
    let value_loss = smooth_l1(values, returns);
    let value = value_loss
        .max_pair(value_clipped_loss)
        .mul_scalar(0.5 * coef.value_loss_scale);

    let entropy = pd.entropy(probs.clone());
    let entropy_loss = entropy.clone().mul_scalar(-coef.entropy_bonus);

    let total = policy.clone().mean() + value.clone().mean() + entropy_loss.clone().mean();
    let kl = pd.kl(probs_old, probs.detach());

    PpoLoss {
        total,
        policy,
        value,
        entropy_loss,
        entropy,
        ratio,
        kl,
    }
}

impl<B: Backend> PpoLoss<B> {
    /// Fails with [`PpoError::NumericalDivergence`] when the total is NaN or
    /// infinite.
    pub fn check_finite(&self) -> Result<(), PpoError> {
        let total = tensor_scalar(self.total.clone());
        if total.is_finite() {
            return Ok(());
        }
        Err(PpoError::NumericalDivergence {
            policy: tensor_scalar(self.policy.clone().mean()),
            value: tensor_scalar(self.value.clone().mean()),
            entropy: tensor_scalar(self.entropy_loss.clone().mean()),
        })
    }
}
