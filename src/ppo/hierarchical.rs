//! Two-level recurrent actor.
//!
//! The lower QRNN stack turns observations into a code `cur`. The upper stack
//! runs on top of that code and picks a delta from a
//! [`Transaction`](ActionDistribution::Transaction) head; `cur + delta` is
//! the target the acting head is conditioned on. The target is detached, so
//! the upper level only learns from its own loss.

use burn::{prelude::*, tensor::activation};

use crate::burnrl::base::Logger;
use crate::ppo::distribution::ActionDistribution;
use crate::ppo::model::{ActorCritic, ActorOutput, HeadOutput, PolicyValueHead, UpperOutput, log_tensor};
use crate::ppo::qrnn::QrnnStack;

#[derive(Module, Debug)]
pub struct HierarchicalQrnnActorCritic<B: Backend> {
    lower: QrnnStack<B>,
    upper: QrnnStack<B>,
    /// `[norm(cur) ‖ norm(target)] -> code`
    merge: nn::Linear<B>,
    head: PolicyValueHead<B>,
    upper_head: PolicyValueHead<B>,
    hidden_size: usize,
}

impl<B: Backend> HierarchicalQrnnActorCritic<B> {
    pub fn new(
        observation_len: usize,
        pd: ActionDistribution,
        hidden_size: usize,
        num_layers: usize,
        device: &B::Device,
    ) -> Self {
        let upper_pd = ActionDistribution::Transaction { dim: hidden_size };
        Self {
            lower: QrnnStack::new(observation_len, hidden_size, num_layers, device),
            upper: QrnnStack::new(hidden_size, hidden_size, num_layers, device),
            merge: nn::LinearConfig::new(2 * hidden_size, hidden_size).init(device),
            head: PolicyValueHead::new(hidden_size, pd, device),
            upper_head: PolicyValueHead::new(hidden_size, upper_pd, device),
            hidden_size,
        }
    }

    fn run(
        &self,
        states: Tensor<B, 3>,
        memory: Option<Tensor<B, 2>>,
        resets: Tensor<B, 2>,
        upper_actions: Option<Tensor<B, 2>>,
    ) -> (ActorOutput<B>, Option<Tensor<B, 2>>) {
        let [seq, batch, _] = states.dims();
        let n = seq * batch;
        let h = self.hidden_size;
        let lower_size = self.lower.memory_size();
        let (lower_memory, upper_memory) = match memory {
            Some(memory) => {
                let [_, width] = memory.dims();
                (
                    Some(memory.clone().slice([0..batch, 0..lower_size])),
                    Some(memory.slice([0..batch, lower_size..width])),
                )
            }
            None => (None, None),
        };

        let (cur, lower_memory) = self.lower.forward(states, lower_memory, resets.clone());
        let (upper_x, upper_memory) = self.upper.forward(cur.clone(), upper_memory, resets);
        let cur = cur.reshape([n, h]);

        let upper_head = self.upper_head.forward(upper_x.reshape([n, h]));
        let deltas = match upper_actions {
            Some(actions) => actions,
            None => self.upper_pd_of().sample(upper_head.probs.clone().detach()),
        }
        .detach();
        let target = (cur.clone() + deltas.clone()).detach();

        let merged = Tensor::cat(vec![layer_norm(cur), layer_norm(target)], 1);
        let code = activation::relu(self.merge.forward(merged));
        let output = ActorOutput::Hierarchical {
            acting: self.head.forward(code),
            upper: UpperOutput {
                head: upper_head,
                actions: deltas,
            },
        };
        (output, Some(Tensor::cat(vec![lower_memory, upper_memory], 1)))
    }

    fn upper_pd_of(&self) -> ActionDistribution {
        ActionDistribution::Transaction {
            dim: self.hidden_size,
        }
    }
}

/// Normalizes every row to zero mean and unit variance.
fn layer_norm<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 2> {
    let centered = x.clone() - x.mean_dim(1);
    let var = centered.clone().powf_scalar(2.0).mean_dim(1);
    centered / var.add_scalar(1e-5).sqrt()
}

impl<B: Backend> ActorCritic<B> for HierarchicalQrnnActorCritic<B> {
    fn forward(
        &self,
        states: Tensor<B, 3>,
        memory: Option<Tensor<B, 2>>,
        resets: Tensor<B, 2>,
    ) -> (ActorOutput<B>, Option<Tensor<B, 2>>) {
        self.run(states, memory, resets, None)
    }

    fn replay(
        &self,
        states: Tensor<B, 3>,
        memory: Option<Tensor<B, 2>>,
        resets: Tensor<B, 2>,
        upper_actions: Tensor<B, 2>,
    ) -> (ActorOutput<B>, Option<Tensor<B, 2>>) {
        self.run(states, memory, resets, Some(upper_actions))
    }

    fn head(&self, hidden_code: Tensor<B, 2>) -> HeadOutput<B> {
        self.head.forward(hidden_code)
    }

    fn hidden_code_size(&self) -> usize {
        self.hidden_size
    }

    fn memory_size(&self) -> Option<usize> {
        Some(self.lower.memory_size() + self.upper.memory_size())
    }

    fn upper_pd(&self) -> Option<ActionDistribution> {
        Some(self.upper_pd_of())
    }

    fn log_parameters(&self, logger: &mut dyn Logger, frame: usize) {
        self.lower.log_parameters(logger, "qrnn_lower", frame);
        self.upper.log_parameters(logger, "qrnn_upper", frame);
        log_tensor(logger, "merge.weight", self.merge.weight.val(), frame);
        self.head.log_parameters(logger, "head", frame);
        self.upper_head.log_parameters(logger, "upper_head", frame);
    }
}
