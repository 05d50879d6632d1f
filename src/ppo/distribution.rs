use std::f32::consts::PI;

use burn::{
    prelude::*,
    tensor::{Distribution, activation},
};

use crate::burnrl::base::Space;

/// Probability distribution over actions, parameterised by the policy head.
///
/// All methods work on batches: `probs` is `[N, prob_vector_len]` and
/// `actions` is `[N, action_vector_len]`. Per-sample results (`logp`,
/// `entropy`, `kl`) are summed over action dimensions and shaped `[N]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionDistribution {
    /// Independent normals; params are `mean ‖ log_std`.
    DiagGaussian { dim: usize },
    /// Independent binary choices; params are logits.
    Bernoulli { n: usize },
    /// One choice out of `n`; params are logits, the action is the index.
    Categorical { n: usize },
    /// A step in the `dim`-wide hidden-code space of a lower policy level.
    /// Params are `mean ‖ log_std` like [`DiagGaussian`](Self::DiagGaussian);
    /// the action is the delta added to the current code.
    Transaction { dim: usize },
}

impl ActionDistribution {
    pub fn from_space(space: &Space) -> Self {
        match space {
            Space::Box { .. } => ActionDistribution::DiagGaussian {
                dim: space.flat_len(),
            },
            Space::Discrete(n) => ActionDistribution::Categorical { n: *n },
            Space::MultiBinary(n) => ActionDistribution::Bernoulli { n: *n },
        }
    }

    /// `dim` of the Gaussian families, whose head carries a learned log-std.
    pub fn gaussian_dim(&self) -> Option<usize> {
        match *self {
            ActionDistribution::DiagGaussian { dim } | ActionDistribution::Transaction { dim } => {
                Some(dim)
            }
            _ => None,
        }
    }

    /// Width of the parameter vector produced by the policy head.
    pub fn prob_vector_len(&self) -> usize {
        match *self {
            ActionDistribution::DiagGaussian { dim } | ActionDistribution::Transaction { dim } => 2 * dim,
            ActionDistribution::Bernoulli { n } | ActionDistribution::Categorical { n } => n,
        }
    }

    /// Width of one sampled action.
    pub fn action_vector_len(&self) -> usize {
        match *self {
            ActionDistribution::DiagGaussian { dim } | ActionDistribution::Transaction { dim } => dim,
            ActionDistribution::Bernoulli { n } => n,
            ActionDistribution::Categorical { .. } => 1,
        }
    }

    /// Width of an action after [`to_inputs`](Self::to_inputs).
    pub fn input_vector_len(&self) -> usize {
        match *self {
            ActionDistribution::DiagGaussian { dim } | ActionDistribution::Transaction { dim } => dim,
            ActionDistribution::Bernoulli { n } | ActionDistribution::Categorical { n } => n,
        }
    }

    pub fn sample<B: Backend>(&self, probs: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = probs.device();
        match *self {
            ActionDistribution::DiagGaussian { dim } | ActionDistribution::Transaction { dim } => {
                let (mean, log_std) = split_gaussian(probs, dim);
                let eps = Tensor::random(mean.shape(), Distribution::Normal(0.0, 1.0), &device);
                mean + log_std.exp() * eps
            }
            ActionDistribution::Bernoulli { .. } => {
                let p = activation::sigmoid(probs);
                let u = Tensor::random(p.shape(), Distribution::Uniform(0.0, 1.0), &device);
                u.lower(p).float()
            }
            ActionDistribution::Categorical { .. } => {
                // Gumbel-max trick
                let u = Tensor::random(probs.shape(), Distribution::Uniform(0.0, 1.0), &device)
                    .clamp(1e-6, 1.0 - 1e-6);
                let gumbel = -((-u.log()).log());
                (probs + gumbel).argmax(1).float()
            }
        }
    }

    pub fn logp<B: Backend>(&self, actions: Tensor<B, 2>, probs: Tensor<B, 2>) -> Tensor<B, 1> {
        match *self {
            ActionDistribution::DiagGaussian { dim } | ActionDistribution::Transaction { dim } => {
                let (mean, log_std) = split_gaussian(probs, dim);
                let var = log_std.clone().mul_scalar(2.0).exp();
                let log_prob = -((actions - mean).powf_scalar(2.0)) / var.mul_scalar(2.0)
                    - log_std
                    - (2.0 * PI).sqrt().ln();
                log_prob.sum_dim(1).squeeze(1)
            }
            ActionDistribution::Bernoulli { .. } => {
                let log_p1 = activation::log_sigmoid(probs.clone());
                let log_p0 = activation::log_sigmoid(probs.neg());
                let ones = actions.ones_like();
                (actions.clone() * log_p1 + (ones - actions) * log_p0)
                    .sum_dim(1)
                    .squeeze(1)
            }
            ActionDistribution::Categorical { .. } => activation::log_softmax(probs, 1)
                .gather(1, actions.int())
                .squeeze(1),
        }
    }

    pub fn entropy<B: Backend>(&self, probs: Tensor<B, 2>) -> Tensor<B, 1> {
        match *self {
            ActionDistribution::DiagGaussian { dim } | ActionDistribution::Transaction { dim } => {
                let (_, log_std) = split_gaussian(probs, dim);
                let entropy = log_std.add_scalar(0.5 + 0.5 * (2.0 * PI).ln());
                entropy.sum_dim(1).squeeze(1)
            }
            ActionDistribution::Bernoulli { .. } => {
                let p = activation::sigmoid(probs.clone());
                let log_p1 = activation::log_sigmoid(probs.clone());
                let log_p0 = activation::log_sigmoid(probs.neg());
                let q = p.ones_like() - p.clone();
                (-(p * log_p1 + q * log_p0)).sum_dim(1).squeeze(1)
            }
            ActionDistribution::Categorical { .. } => {
                let log_p = activation::log_softmax(probs, 1);
                (-(log_p.clone().exp() * log_p)).sum_dim(1).squeeze(1)
            }
        }
    }

    /// `KL(p || q)` per sample.
    pub fn kl<B: Backend>(&self, p: Tensor<B, 2>, q: Tensor<B, 2>) -> Tensor<B, 1> {
        match *self {
            ActionDistribution::DiagGaussian { dim } | ActionDistribution::Transaction { dim } => {
                let (mean_p, log_std_p) = split_gaussian(p, dim);
                let (mean_q, log_std_q) = split_gaussian(q, dim);
                let var_p = log_std_p.clone().mul_scalar(2.0).exp();
                let var_q = log_std_q.clone().mul_scalar(2.0).exp();
                let kl = log_std_q - log_std_p
                    + (var_p + (mean_p - mean_q).powf_scalar(2.0)) / var_q.mul_scalar(2.0)
                    - 0.5;
                kl.sum_dim(1).squeeze(1)
            }
            ActionDistribution::Bernoulli { .. } => {
                let prob_p = activation::sigmoid(p.clone());
                let kl = prob_p.clone()
                    * (activation::log_sigmoid(p.clone()) - activation::log_sigmoid(q.clone()))
                    + (prob_p.ones_like() - prob_p)
                        * (activation::log_sigmoid(p.neg()) - activation::log_sigmoid(q.neg()));
                kl.sum_dim(1).squeeze(1)
            }
            ActionDistribution::Categorical { .. } => {
                let log_p = activation::log_softmax(p, 1);
                let log_q = activation::log_softmax(q, 1);
                (log_p.clone().exp() * (log_p - log_q)).sum_dim(1).squeeze(1)
            }
        }
    }

    /// Encodes actions as network inputs: one-hot for categorical actions,
    /// unchanged otherwise.
    pub fn to_inputs<B: Backend>(&self, actions: Tensor<B, 2>) -> Tensor<B, 2> {
        match *self {
            ActionDistribution::Categorical { n } => {
                let [batch, _] = actions.dims();
                let device = actions.device();
                Tensor::zeros([batch, n], &device).scatter(
                    1,
                    actions.int(),
                    Tensor::ones([batch, 1], &device),
                )
            }
            _ => actions,
        }
    }
}

fn split_gaussian<B: Backend>(probs: Tensor<B, 2>, dim: usize) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let [batch, _] = probs.dims();
    let mean = probs.clone().slice([0..batch, 0..dim]);
    let log_std = probs.slice([0..batch, dim..2 * dim]);
    (mean, log_std)
}
