//! Generator and discriminator of the latent world model.
//!
//! Both networks work on hidden codes of the policy model. The generator
//! predicts the next code, reward and done probability for a code and an
//! action; the discriminator scores `(code, next_code, action, reward, done)`
//! tuples. Hidden layers are spectrally normalized so the discriminator stays
//! roughly Lipschitz-bounded without a gradient penalty.

use burn::{
    module::Param,
    nn::{LayerNorm, LayerNormConfig},
    prelude::*,
    tensor::{Distribution, activation},
};

use crate::utils::tensor_scalar;

/// Linear layer whose weight is divided by an estimate of its largest
/// singular value on every forward pass.
///
/// The estimate comes from a few power iterations started from a uniform
/// vector and is treated as a constant.
#[derive(Module, Debug)]
pub struct SnLinear<B: Backend> {
    weight: Param<Tensor<B, 2>>,
    bias: Param<Tensor<B, 1>>,
    power_iterations: usize,
}

impl<B: Backend> SnLinear<B> {
    pub fn new(d_input: usize, d_output: usize, power_iterations: usize, device: &B::Device) -> Self {
        let bound = 1.0 / (d_input as f64).sqrt();
        let weight = Tensor::random([d_output, d_input], Distribution::Uniform(-bound, bound), device);
        Self {
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(Tensor::zeros([d_output], device)),
            power_iterations: power_iterations.max(1),
        }
    }

    /// Largest singular value of the raw weight.
    pub fn sigma(&self) -> f32 {
        let weight = self.weight.val().detach();
        let [_, d_input] = weight.dims();
        let device = weight.device();
        let mut v = Tensor::<B, 2>::ones([d_input, 1], &device).div_scalar((d_input as f32).sqrt());
        let mut u = normalize(weight.clone().matmul(v.clone()));
        for _ in 0..self.power_iterations {
            v = normalize(weight.clone().transpose().matmul(u));
            u = normalize(weight.clone().matmul(v.clone()));
        }
        let sigma = u.transpose().matmul(weight).matmul(v);
        tensor_scalar(sigma.reshape([1]))
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let weight = self.weight.val().div_scalar(self.sigma().abs() + 1e-12);
        input.matmul(weight.transpose()) + self.bias.val().unsqueeze()
    }
}

fn normalize<B: Backend>(v: Tensor<B, 2>) -> Tensor<B, 2> {
    let norm = v.clone().powf_scalar(2.0).sum().sqrt().reshape([1, 1]);
    v / (norm + 1e-12)
}

/// Three normalized ReLU blocks shared by both networks.
#[derive(Module, Debug)]
pub struct Trunk<B: Backend> {
    norm1: LayerNorm<B>,
    fc1: SnLinear<B>,
    norm2: LayerNorm<B>,
    fc2: SnLinear<B>,
    norm3: LayerNorm<B>,
}

impl<B: Backend> Trunk<B> {
    fn new(hidden_size: usize, power_iterations: usize, device: &B::Device) -> Self {
        Self {
            norm1: LayerNormConfig::new(hidden_size).init(device),
            fc1: SnLinear::new(hidden_size, hidden_size, power_iterations, device),
            norm2: LayerNormConfig::new(hidden_size).init(device),
            fc2: SnLinear::new(hidden_size, hidden_size, power_iterations, device),
            norm3: LayerNormConfig::new(hidden_size).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = activation::relu(self.norm1.forward(x));
        let x = activation::relu(self.norm2.forward(self.fc1.forward(x)));
        activation::relu(self.norm3.forward(self.fc2.forward(x)))
    }
}

/// Gated latent transition model.
#[derive(Module, Debug)]
pub struct GanGenerator<B: Backend> {
    action_embedding: SnLinear<B>,
    code_embedding: SnLinear<B>,
    trunk: Trunk<B>,
    output: nn::Linear<B>,
    code_size: usize,
}

/// One generated transition.
#[derive(Debug, Clone)]
pub struct GeneratedStep<B: Backend> {
    /// `[N, code_size]`
    pub next_code: Tensor<B, 2>,
    /// `[N]`
    pub reward: Tensor<B, 1>,
    /// `[N]`, probability in `(0, 1)`
    pub done: Tensor<B, 1>,
}

impl<B: Backend> GanGenerator<B> {
    pub fn new(
        code_size: usize,
        action_input_len: usize,
        hidden_size: usize,
        power_iterations: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            action_embedding: SnLinear::new(action_input_len, hidden_size, power_iterations, device),
            code_embedding: SnLinear::new(code_size, hidden_size, power_iterations, device),
            trunk: Trunk::new(hidden_size, power_iterations, device),
            output: nn::LinearConfig::new(hidden_size, 3 * code_size + 2).init(device),
            code_size,
        }
    }

    /// `next = sigmoid(f) * code + sigmoid(i) * candidate`
    pub fn forward(&self, code: Tensor<B, 2>, action_inputs: Tensor<B, 2>) -> GeneratedStep<B> {
        let c = self.code_size;
        let [n, _] = code.dims();
        let x = self.action_embedding.forward(action_inputs) + self.code_embedding.forward(code.clone());
        let out = self.output.forward(self.trunk.forward(x));

        let candidate = out.clone().slice([0..n, 0..c]);
        let forget = activation::sigmoid(out.clone().slice([0..n, c..2 * c]));
        let input = activation::sigmoid(out.clone().slice([0..n, 2 * c..3 * c]));
        let next_code = forget * code + input * candidate;

        let reward = out.clone().slice([0..n, 3 * c..3 * c + 1]).squeeze(1);
        let done = activation::sigmoid(out.slice([0..n, 3 * c + 1..3 * c + 2])).squeeze(1);
        GeneratedStep {
            next_code,
            reward,
            done,
        }
    }
}

/// Critic over latent transitions.
#[derive(Module, Debug)]
pub struct GanDiscriminator<B: Backend> {
    action_embedding: SnLinear<B>,
    cur_embedding: SnLinear<B>,
    next_embedding: SnLinear<B>,
    reward_done_embedding: SnLinear<B>,
    trunk: Trunk<B>,
    output: SnLinear<B>,
}

impl<B: Backend> GanDiscriminator<B> {
    pub fn new(
        code_size: usize,
        action_input_len: usize,
        hidden_size: usize,
        power_iterations: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            action_embedding: SnLinear::new(action_input_len, hidden_size, power_iterations, device),
            cur_embedding: SnLinear::new(code_size, hidden_size, power_iterations, device),
            next_embedding: SnLinear::new(code_size, hidden_size, power_iterations, device),
            reward_done_embedding: SnLinear::new(2, hidden_size, power_iterations, device),
            trunk: Trunk::new(hidden_size, power_iterations, device),
            output: SnLinear::new(hidden_size, 1, power_iterations, device),
        }
    }

    /// Scores `N` transitions, returning `[N]`.
    pub fn forward(
        &self,
        cur_code: Tensor<B, 2>,
        next_code: Tensor<B, 2>,
        action_inputs: Tensor<B, 2>,
        rewards: Tensor<B, 1>,
        dones: Tensor<B, 1>,
    ) -> Tensor<B, 1> {
        let reward_done = Tensor::stack::<2>(vec![rewards, dones], 1);
        let x = self.action_embedding.forward(action_inputs)
            + self.cur_embedding.forward(cur_code)
            + self.next_embedding.forward(next_code)
            + self.reward_done_embedding.forward(reward_done);
        self.output.forward(self.trunk.forward(x)).squeeze(1)
    }
}
