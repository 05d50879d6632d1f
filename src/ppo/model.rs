use burn::{module::Param, prelude::*};

use crate::burnrl::base::Logger;
use crate::ppo::distribution::ActionDistribution;
use crate::utils::tensor_to_vec;

/// Policy and value predictions for a flat batch of `N` steps.
#[derive(Debug, Clone)]
pub struct HeadOutput<B: Backend> {
    /// `[N, prob_vector_len]`
    pub probs: Tensor<B, 2>,
    /// `[N]`
    pub state_values: Tensor<B, 1>,
    /// `[N, hidden_code_size]`
    pub hidden_code: Tensor<B, 2>,
}

/// Predictions of the upper level of a two-level actor, which picks a target
/// in the lower level's hidden-code space.
#[derive(Debug, Clone)]
pub struct UpperOutput<B: Backend> {
    pub head: HeadOutput<B>,
    /// Code deltas the lower level was conditioned on, `[N, upper_dim]`.
    pub actions: Tensor<B, 2>,
}

/// What an [`ActorCritic`] returns for a batch.
#[derive(Debug, Clone)]
pub enum ActorOutput<B: Backend> {
    Flat(HeadOutput<B>),
    /// `acting` drives the environment; `upper` chose its target.
    Hierarchical {
        acting: HeadOutput<B>,
        upper: UpperOutput<B>,
    },
}

impl<B: Backend> ActorOutput<B> {
    /// The head whose actions go to the environment.
    pub fn acting(&self) -> &HeadOutput<B> {
        match self {
            ActorOutput::Flat(out) | ActorOutput::Hierarchical { acting: out, .. } => out,
        }
    }

    pub fn into_acting(self) -> HeadOutput<B> {
        self.into_parts().0
    }

    pub fn into_parts(self) -> (HeadOutput<B>, Option<UpperOutput<B>>) {
        match self {
            ActorOutput::Flat(out) => (out, None),
            ActorOutput::Hierarchical { acting, upper } => (acting, Some(upper)),
        }
    }
}

/// An actor-critic network.
///
/// Inputs are sequence shaped `[seq, batch, ...]` and outputs are flattened
/// time-major, so row `t * batch + b` belongs to step `t` of sequence `b`.
/// Feed-forward models ignore `memory` and `resets` and return no memory.
pub trait ActorCritic<B: Backend>: Module<B> {
    /// `states` is `[seq, batch, observation_len]`, `resets` is `[seq, batch]`
    /// with `1.0` where an episode starts at that step.
    fn forward(
        &self,
        states: Tensor<B, 3>,
        memory: Option<Tensor<B, 2>>,
        resets: Tensor<B, 2>,
    ) -> (ActorOutput<B>, Option<Tensor<B, 2>>);

    /// Like [`forward`](Self::forward), but a hierarchical model conditions
    /// its lower level on the given upper actions instead of sampling new
    /// ones. `upper_actions` is `[seq * batch, upper_dim]`, time-major.
    fn replay(
        &self,
        states: Tensor<B, 3>,
        memory: Option<Tensor<B, 2>>,
        resets: Tensor<B, 2>,
        _upper_actions: Tensor<B, 2>,
    ) -> (ActorOutput<B>, Option<Tensor<B, 2>>) {
        self.forward(states, memory, resets)
    }

    /// Maps hidden codes back to policy and value predictions of the acting
    /// head.
    fn head(&self, hidden_code: Tensor<B, 2>) -> HeadOutput<B>;

    fn hidden_code_size(&self) -> usize;

    /// Width of the recurrent memory, `None` for feed-forward models.
    fn memory_size(&self) -> Option<usize> {
        None
    }

    /// Distribution of the upper level, `None` for flat models.
    fn upper_pd(&self) -> Option<ActionDistribution> {
        None
    }

    /// Writes parameter histograms.
    fn log_parameters(&self, _logger: &mut dyn Logger, _frame: usize) {}
}

/// Log-std and linear heads shared by every actor-critic in the crate.
#[derive(Module, Debug)]
pub struct PolicyValueHead<B: Backend> {
    policy: nn::Linear<B>,
    value: nn::Linear<B>,
    log_std: Option<Param<Tensor<B, 2>>>,
}

impl<B: Backend> PolicyValueHead<B> {
    pub fn new(hidden_size: usize, pd: ActionDistribution, device: &B::Device) -> Self {
        let (policy_out, log_std) = match pd.gaussian_dim() {
            Some(dim) => (
                dim,
                Some(Param::from_tensor(Tensor::zeros([1, dim], device))),
            ),
            None => (pd.prob_vector_len(), None),
        };
        let policy = nn::LinearConfig::new(hidden_size, policy_out)
            .with_initializer(nn::Initializer::XavierUniform { gain: 0.01 })
            .init(device);
        let value = nn::LinearConfig::new(hidden_size, 1)
            .with_initializer(nn::Initializer::XavierUniform { gain: 1.0 })
            .init(device);
        Self {
            policy,
            value,
            log_std,
        }
    }

    pub fn forward(&self, hidden_code: Tensor<B, 2>) -> HeadOutput<B> {
        let policy = self.policy.forward(hidden_code.clone());
        let probs = match &self.log_std {
            Some(log_std) => {
                let log_std = log_std.val().expand(policy.shape());
                Tensor::cat(vec![policy, log_std], 1)
            }
            None => policy,
        };
        let state_values = self.value.forward(hidden_code.clone()).squeeze(1);
        HeadOutput {
            probs,
            state_values,
            hidden_code,
        }
    }

    /// Histograms tagged `{prefix}/policy.weight` and so on.
    pub(crate) fn log_parameters(&self, logger: &mut dyn Logger, prefix: &str, frame: usize) {
        log_tensor(logger, &format!("{prefix}/policy.weight"), self.policy.weight.val(), frame);
        log_tensor(logger, &format!("{prefix}/value.weight"), self.value.weight.val(), frame);
        if let Some(log_std) = &self.log_std {
            log_tensor(logger, &format!("{prefix}/log_std"), log_std.val(), frame);
        }
    }
}

pub(crate) fn log_tensor<B: Backend, const D: usize>(
    logger: &mut dyn Logger,
    tag: &str,
    tensor: Tensor<B, D>,
    frame: usize,
) {
    match tensor_to_vec(tensor) {
        Ok(values) => logger.add_histogram(tag, &values, frame),
        Err(e) => log::warn!("skipping histogram {tag}: {e}"),
    }
}

/// Feed-forward tanh MLP with policy and value heads over a shared code.
#[derive(Module, Debug)]
pub struct MlpActorCritic<B: Backend> {
    linear1: nn::Linear<B>,
    linear2: nn::Linear<B>,
    head: PolicyValueHead<B>,
    hidden_size: usize,
}

impl<B: Backend> MlpActorCritic<B> {
    pub fn new(
        observation_len: usize,
        pd: ActionDistribution,
        hidden_size: usize,
        device: &B::Device,
    ) -> Self {
        let linear1 = nn::LinearConfig::new(observation_len, hidden_size).init(device);
        let linear2 = nn::LinearConfig::new(hidden_size, hidden_size).init(device);
        let head = PolicyValueHead::new(hidden_size, pd, device);

        Self {
            linear1,
            linear2,
            head,
            hidden_size,
        }
    }

    fn encode(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear1.forward(x).tanh();
        self.linear2.forward(x).tanh()
    }
}

impl<B: Backend> ActorCritic<B> for MlpActorCritic<B> {
    fn forward(
        &self,
        states: Tensor<B, 3>,
        _memory: Option<Tensor<B, 2>>,
        _resets: Tensor<B, 2>,
    ) -> (ActorOutput<B>, Option<Tensor<B, 2>>) {
        let [seq, batch, obs] = states.dims();
        let code = self.encode(states.reshape([seq * batch, obs]));
        (ActorOutput::Flat(self.head.forward(code)), None)
    }

    fn head(&self, hidden_code: Tensor<B, 2>) -> HeadOutput<B> {
        self.head.forward(hidden_code)
    }

    fn hidden_code_size(&self) -> usize {
        self.hidden_size
    }

    fn log_parameters(&self, logger: &mut dyn Logger, frame: usize) {
        log_tensor(logger, "linear1.weight", self.linear1.weight.val(), frame);
        log_tensor(logger, "linear2.weight", self.linear2.weight.val(), frame);
        self.head.log_parameters(logger, "head", frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn gaussian_head_appends_log_std() {
        let device = Default::default();
        let pd = ActionDistribution::DiagGaussian { dim: 2 };
        let model = MlpActorCritic::<B>::new(3, pd, 16, &device);
        let states = Tensor::<B, 3>::ones([4, 5, 3], &device);
        let (out, memory) = model.forward(states, None, Tensor::zeros([4, 5], &device));
        let out = out.into_acting();

        assert!(memory.is_none());
        assert_eq!(out.probs.dims(), [20, 4]);
        assert_eq!(out.state_values.dims(), [20]);
        assert_eq!(out.hidden_code.dims(), [20, 16]);
        let log_std = tensor_to_vec(out.probs.slice([0..20, 2..4])).unwrap();
        assert!(log_std.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn head_reproduces_forward_from_hidden_code() {
        let device = Default::default();
        let pd = ActionDistribution::Categorical { n: 3 };
        let model = MlpActorCritic::<B>::new(2, pd, 8, &device);
        let states = Tensor::<B, 3>::ones([1, 2, 2], &device);
        let (out, _) = model.forward(states, None, Tensor::zeros([1, 2], &device));
        let out = out.into_acting();
        let again = model.head(out.hidden_code.clone());
        assert_eq!(
            tensor_to_vec(out.probs).unwrap(),
            tensor_to_vec(again.probs).unwrap()
        );
    }
}
