//! Quasi-recurrent actor-critic.
//!
//! A QRNN layer computes its gates for the whole sequence in one matrix
//! product and only runs the cheap element-wise fo-pooling step by step:
//!
//! ```text
//! z_t = tanh(W_z x_t)    f_t = sigmoid(W_f x_t)    o_t = sigmoid(W_o x_t)
//! c_t = f_t * c_{t-1} + (1 - f_t) * z_t
//! h_t = o_t * c_t
//! ```
//!
//! Layers are densely connected: layer `k` sees the stack input concatenated
//! with the outputs of every layer below it, and the last layer's output is
//! the hidden code. The recurrent memory is the cell state of every layer,
//! laid out `[batch, layers * hidden]`. It is zeroed for every sequence whose
//! reset flag is set at step `t` before `c_t` is computed.

use burn::{prelude::*, tensor::activation};

use crate::burnrl::base::Logger;
use crate::ppo::distribution::ActionDistribution;
use crate::ppo::model::{ActorCritic, ActorOutput, HeadOutput, PolicyValueHead, log_tensor};

#[derive(Module, Debug)]
pub struct QrnnLayer<B: Backend> {
    gates: nn::Linear<B>,
    hidden_size: usize,
}

impl<B: Backend> QrnnLayer<B> {
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self {
            gates: nn::LinearConfig::new(input_size, 3 * hidden_size).init(device),
            hidden_size,
        }
    }

    /// `x` is `[seq, batch, input]`, `cell` is `[batch, hidden]` and `keep`
    /// is `[seq, batch]` with `0.0` where memory is reset. Returns the outputs
    /// `[seq, batch, hidden]` and the last cell state.
    fn forward(&self, x: Tensor<B, 3>, mut cell: Tensor<B, 2>, keep: &Tensor<B, 2>) -> (Tensor<B, 3>, Tensor<B, 2>) {
        let [seq, batch, input] = x.dims();
        let h = self.hidden_size;
        let gates = self
            .gates
            .forward(x.reshape([seq * batch, input]))
            .reshape([seq, batch, 3 * h]);

        let mut outputs = Vec::with_capacity(seq);
        for t in 0..seq {
            let g = gates.clone().slice([t..t + 1, 0..batch, 0..3 * h]).reshape([batch, 3 * h]);
            let z = g.clone().slice([0..batch, 0..h]).tanh();
            let f = activation::sigmoid(g.clone().slice([0..batch, h..2 * h]));
            let o = activation::sigmoid(g.slice([0..batch, 2 * h..3 * h]));

            let keep_t = keep.clone().slice([t..t + 1, 0..batch]).reshape([batch, 1]);
            cell = cell * keep_t;
            cell = f.clone() * cell + (f.ones_like() - f) * z;
            outputs.push(o * cell.clone());
        }
        (Tensor::stack(outputs, 0), cell)
    }
}

/// Densely connected QRNN layers.
#[derive(Module, Debug)]
pub struct QrnnStack<B: Backend> {
    layers: Vec<QrnnLayer<B>>,
    hidden_size: usize,
}

impl<B: Backend> QrnnStack<B> {
    /// At least one layer is always built.
    pub fn new(input_size: usize, hidden_size: usize, num_layers: usize, device: &B::Device) -> Self {
        let layers = (0..num_layers.max(1))
            .map(|k| QrnnLayer::new(input_size + k * hidden_size, hidden_size, device))
            .collect();
        Self { layers, hidden_size }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn memory_size(&self) -> usize {
        self.layers.len() * self.hidden_size
    }

    /// Returns the last layer's outputs `[seq, batch, hidden]` and the next
    /// memory `[batch, layers * hidden]`.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        memory: Option<Tensor<B, 2>>,
        resets: Tensor<B, 2>,
    ) -> (Tensor<B, 3>, Tensor<B, 2>) {
        let [seq, batch, _] = x.dims();
        let h = self.hidden_size;
        let memory = memory.unwrap_or_else(|| Tensor::zeros([batch, self.memory_size()], &x.device()));
        let keep = resets.ones_like() - resets;

        let mut inputs = x;
        let mut cells = Vec::with_capacity(self.layers.len());
        for (k, layer) in self.layers.iter().enumerate() {
            let cell = memory.clone().slice([0..batch, k * h..(k + 1) * h]);
            let (y, cell) = layer.forward(inputs.clone(), cell, &keep);
            cells.push(cell);
            inputs = Tensor::cat(vec![inputs, y], 2);
        }
        let [_, _, width] = inputs.dims();
        let out = inputs.slice([0..seq, 0..batch, width - h..width]);
        (out, Tensor::cat(cells, 1))
    }

    pub fn log_parameters(&self, logger: &mut dyn Logger, prefix: &str, frame: usize) {
        for (k, layer) in self.layers.iter().enumerate() {
            let tag = format!("{prefix}.{k}.gates.weight");
            log_tensor(logger, &tag, layer.gates.weight.val(), frame);
        }
    }
}

#[derive(Module, Debug)]
pub struct QrnnActorCritic<B: Backend> {
    qrnn: QrnnStack<B>,
    head: PolicyValueHead<B>,
    hidden_size: usize,
}

impl<B: Backend> QrnnActorCritic<B> {
    pub fn new(
        observation_len: usize,
        pd: ActionDistribution,
        hidden_size: usize,
        num_layers: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            qrnn: QrnnStack::new(observation_len, hidden_size, num_layers, device),
            head: PolicyValueHead::new(hidden_size, pd, device),
            hidden_size,
        }
    }
}

impl<B: Backend> ActorCritic<B> for QrnnActorCritic<B> {
    fn forward(
        &self,
        states: Tensor<B, 3>,
        memory: Option<Tensor<B, 2>>,
        resets: Tensor<B, 2>,
    ) -> (ActorOutput<B>, Option<Tensor<B, 2>>) {
        let [seq, batch, _] = states.dims();
        let (x, memory) = self.qrnn.forward(states, memory, resets);
        let code = x.reshape([seq * batch, self.hidden_size]);
        (ActorOutput::Flat(self.head.forward(code)), Some(memory))
    }

    fn head(&self, hidden_code: Tensor<B, 2>) -> HeadOutput<B> {
        self.head.forward(hidden_code)
    }

    fn hidden_code_size(&self) -> usize {
        self.hidden_size
    }

    fn memory_size(&self) -> Option<usize> {
        Some(self.qrnn.memory_size())
    }

    fn log_parameters(&self, logger: &mut dyn Logger, frame: usize) {
        self.qrnn.log_parameters(logger, "qrnn", frame);
        self.head.log_parameters(logger, "head", frame);
    }
}
