use burn::{
    optim::{Adam, AdamConfig, GradientsParams, Optimizer, adaptor::OptimizerAdaptor},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PpoError};
use crate::mppo::replay_buffer::{ReplayBuffer, Trajectories};
use crate::mppo::world_model::{GanDiscriminator, GanGenerator};
use crate::ppo::augmentation::{TrainingAugmentation, UpdateContext};
use crate::ppo::config::PpoConfig;
use crate::ppo::distribution::ActionDistribution;
use crate::ppo::model::ActorCritic;
use crate::ppo::training::TrainingData;
use crate::utils::{float_tensor, tensor_scalar, tensor_to_vec};

/// Real done flags are squeezed into this range before they are scored.
const REAL_DONE_RANGE: (f32, f32) = (0.1, 0.9);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldModelConfig {
    /// Time slots kept per actor.
    pub replay_capacity: usize,
    /// Slices trained per pass.
    pub train_iters: usize,
    /// Windows per slice.
    pub train_rollouts: usize,
    /// Steps per window.
    pub train_horizon: usize,
    pub hidden_size: usize,
    pub disc_learning_rate: f64,
    pub gen_learning_rate: f64,
    pub power_iterations: usize,
}

impl Default for WorldModelConfig {
    fn default() -> Self {
        Self {
            replay_capacity: 16384,
            train_iters: 8,
            train_rollouts: 16,
            train_horizon: 16,
            hidden_size: 256,
            disc_learning_rate: 5e-4,
            gen_learning_rate: 1e-4,
            power_iterations: 3,
        }
    }
}

impl WorldModelConfig {
    pub fn with_replay_capacity(mut self, replay_capacity: usize) -> Self {
        self.replay_capacity = replay_capacity;
        self
    }

    pub fn with_train_iters(mut self, train_iters: usize) -> Self {
        self.train_iters = train_iters;
        self
    }

    pub fn with_train_rollouts(mut self, train_rollouts: usize) -> Self {
        self.train_rollouts = train_rollouts;
        self
    }

    pub fn with_train_horizon(mut self, train_horizon: usize) -> Self {
        self.train_horizon = train_horizon;
        self
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn with_learning_rates(mut self, discriminator: f64, generator: f64) -> Self {
        self.disc_learning_rate = discriminator;
        self.gen_learning_rate = generator;
        self
    }

    pub fn with_power_iterations(mut self, power_iterations: usize) -> Self {
        self.power_iterations = power_iterations;
        self
    }

    /// Replayed steps consumed by one training pass.
    pub fn steps_per_pass(&self) -> usize {
        self.train_iters * self.train_rollouts * self.train_horizon
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("replay_capacity", self.replay_capacity),
            ("train_iters", self.train_iters),
            ("train_rollouts", self.train_rollouts),
            ("hidden_size", self.hidden_size),
            ("power_iterations", self.power_iterations),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::InvalidCount { field, value });
            }
        }
        if self.train_horizon < 2 {
            return Err(ConfigError::OutOfRange {
                field: "train_horizon",
                value: self.train_horizon as f64,
                min: 2.0,
                max: f64::INFINITY,
            });
        }
        for (field, value) in [
            ("disc_learning_rate", self.disc_learning_rate),
            ("gen_learning_rate", self.gen_learning_rate),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::OutOfRange {
                    field,
                    value,
                    min: f64::MIN_POSITIVE,
                    max: f64::INFINITY,
                });
            }
        }
        let required = self.steps_per_pass();
        if self.replay_capacity <= required {
            return Err(ConfigError::ReplayTooSmall {
                capacity: self.replay_capacity,
                required,
            });
        }
        Ok(())
    }
}

/// Losses of the last slice of a world-model pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldModelLosses {
    pub disc_real: f32,
    pub disc_fake: f32,
    pub generator: f32,
}

/// Real transitions of one slice, flattened to `(horizon - 1) * rollouts`
/// rows.
struct RealBatch<B: Backend> {
    codes: Tensor<B, 2>,
    next_codes: Tensor<B, 2>,
    action_inputs: Tensor<B, 2>,
    rewards: Tensor<B, 1>,
    dones: Tensor<B, 1>,
}

/// Transitions unrolled by the generator, still attached to its graph.
struct FakeBatch<B: Backend> {
    codes: Tensor<B, 2>,
    next_codes: Tensor<B, 2>,
    action_inputs: Tensor<B, 2>,
    rewards: Tensor<B, 1>,
    dones: Tensor<B, 1>,
}

impl<B: Backend> FakeBatch<B> {
    fn detached(&self) -> Self {
        Self {
            codes: self.codes.clone().detach(),
            next_codes: self.next_codes.clone().detach(),
            action_inputs: self.action_inputs.clone().detach(),
            rewards: self.rewards.clone().detach(),
            dones: self.dones.clone().detach(),
        }
    }
}

/// Adversarial latent world model fed from a replay of past rollouts.
///
/// Every PPO pass pushes its rollouts into the replay. Once the replay holds
/// more than [`WorldModelConfig::steps_per_pass`] steps, each pass also trains
/// the discriminator on real and generated transitions and then the
/// generator against the updated discriminator.
pub struct WorldModelTrainer<B: AutodiffBackend> {
    config: WorldModelConfig,
    pd: ActionDistribution,
    replay: ReplayBuffer,
    generator: GanGenerator<B>,
    discriminator: GanDiscriminator<B>,
    gen_optimizer: OptimizerAdaptor<Adam, GanGenerator<B>, B>,
    disc_optimizer: OptimizerAdaptor<Adam, GanDiscriminator<B>, B>,
    last_losses: Option<WorldModelLosses>,
    train_steps: usize,
    device: B::Device,
}

impl<B: AutodiffBackend> WorldModelTrainer<B> {
    /// `hidden_code_size` must match the policy model the trainer is attached
    /// to, and `device` must be its training device.
    pub fn new(
        config: WorldModelConfig,
        hidden_code_size: usize,
        pd: ActionDistribution,
        device: B::Device,
    ) -> Result<Self, PpoError> {
        config.validate()?;
        let action_len = pd.input_vector_len();
        let generator = GanGenerator::new(
            hidden_code_size,
            action_len,
            config.hidden_size,
            config.power_iterations,
            &device,
        );
        let discriminator = GanDiscriminator::new(
            hidden_code_size,
            action_len,
            config.hidden_size,
            config.power_iterations,
            &device,
        );
        let adam = AdamConfig::new().with_beta_1(0.0).with_beta_2(0.9);
        Ok(Self {
            replay: ReplayBuffer::new(config.replay_capacity),
            gen_optimizer: adam.init::<B, GanGenerator<B>>(),
            disc_optimizer: adam.init::<B, GanDiscriminator<B>>(),
            generator,
            discriminator,
            last_losses: None,
            train_steps: 0,
            pd,
            device,
            config,
        })
    }

    pub fn config(&self) -> &WorldModelConfig {
        &self.config
    }

    pub fn replay(&self) -> &ReplayBuffer {
        &self.replay
    }

    pub fn generator(&self) -> &GanGenerator<B> {
        &self.generator
    }

    /// Completed world-model passes.
    pub fn train_steps(&self) -> usize {
        self.train_steps
    }

    pub fn last_losses(&self) -> Option<WorldModelLosses> {
        self.last_losses
    }

    fn trajectories(data: &TrainingData<B>) -> Result<Trajectories, PpoError> {
        Ok(Trajectories {
            horizon: data.horizon,
            rollouts: data.num_actors,
            states: tensor_to_vec(data.states.clone())?,
            actions: tensor_to_vec(data.actions.clone())?,
            rewards: tensor_to_vec(data.rewards.clone())?,
            dones: tensor_to_vec(data.dones.clone())?,
        })
    }

    /// Samples `train_iters * train_rollouts` windows and encodes their states
    /// with the policy model. Returns the detached codes
    /// `[horizon, windows, code]` with the windows themselves.
    fn encode<M: ActorCritic<B>>(
        &self,
        model: &M,
        rng: &mut StdRng,
    ) -> Result<(Tensor<B, 3>, Trajectories), PpoError> {
        let h = self.config.train_horizon;
        let windows = self.config.train_iters * self.config.train_rollouts;
        let batch = self.replay.sample(rng, windows, h)?;
        let obs = batch.state_len();

        // an episode starts at the window start and after every done
        let mut resets = vec![1.0; windows];
        resets.extend_from_slice(&batch.dones[..(h - 1) * windows]);

        let states = float_tensor(batch.states.clone(), [h, windows, obs], &self.device);
        let resets = float_tensor(resets, [h, windows], &self.device);
        let (out, _) = model.forward(states, None, resets);
        let code = model.hidden_code_size();
        let codes = out
            .into_acting()
            .hidden_code
            .detach()
            .to_device(&self.device)
            .reshape([h, windows, code]);
        Ok((codes, batch))
    }

    fn real_batch(&self, codes: &Tensor<B, 3>, batch: &Trajectories, slice: usize) -> RealBatch<B> {
        let h = self.config.train_horizon;
        let r = self.config.train_rollouts;
        let windows = batch.rollouts;
        let [_, _, c] = codes.dims();
        let cols = slice * r..(slice + 1) * r;
        let rows = (h - 1) * r;

        let codes = codes.clone().slice([0..h, cols.clone(), 0..c]);
        let act_len = batch.action_len();
        let actions = float_tensor(batch.actions.clone(), [h, windows, act_len], &self.device)
            .slice([0..h - 1, cols.clone(), 0..act_len])
            .reshape([rows, act_len]);
        let rewards = float_tensor(batch.rewards.clone(), [h, windows], &self.device)
            .slice([0..h - 1, cols.clone()])
            .reshape([rows]);
        let dones = float_tensor(batch.dones.clone(), [h, windows], &self.device)
            .slice([0..h - 1, cols])
            .reshape([rows])
            .clamp(REAL_DONE_RANGE.0, REAL_DONE_RANGE.1);

        RealBatch {
            codes: codes.clone().slice([0..h - 1, 0..r, 0..c]).reshape([rows, c]),
            next_codes: codes.slice([1..h, 0..r, 0..c]).reshape([rows, c]),
            action_inputs: self.pd.to_inputs(actions),
            rewards,
            dones,
        }
    }

    /// Unrolls the generator from the real initial codes, acting with the
    /// current policy at every step.
    fn unroll<M: ActorCritic<B>>(&self, model: &M, initial: Tensor<B, 2>) -> FakeBatch<B> {
        let steps = self.config.train_horizon;
        let mut code = initial;
        let (mut codes, mut next_codes, mut actions, mut rewards, mut dones) =
            (Vec::new(), Vec::new(), Vec::new(), Vec::new(), Vec::new());
        for _ in 0..steps {
            let probs = model.head(code.clone().detach()).probs.detach();
            let action_inputs = self.pd.to_inputs(self.pd.sample(probs)).detach();
            let step = self.generator.forward(code.clone(), action_inputs.clone());
            codes.push(code);
            next_codes.push(step.next_code.clone());
            actions.push(action_inputs);
            rewards.push(step.reward);
            dones.push(step.done);
            code = step.next_code;
        }
        FakeBatch {
            codes: Tensor::cat(codes, 0),
            next_codes: Tensor::cat(next_codes, 0),
            action_inputs: Tensor::cat(actions, 0),
            rewards: Tensor::cat(rewards, 0),
            dones: Tensor::cat(dones, 0),
        }
    }

    fn step_discriminator(&mut self, loss: Tensor<B, 1>) {
        let grads = GradientsParams::from_grads(loss.backward(), &self.discriminator);
        self.discriminator =
            self.disc_optimizer
                .step(self.config.disc_learning_rate, self.discriminator.clone(), grads);
    }

    fn train_slice<M: ActorCritic<B>>(
        &mut self,
        model: &M,
        codes: &Tensor<B, 3>,
        batch: &Trajectories,
        slice: usize,
    ) -> Result<WorldModelLosses, PpoError> {
        let real = self.real_batch(codes, batch, slice);
        let score = self.discriminator.forward(
            real.codes,
            real.next_codes,
            real.action_inputs,
            real.rewards,
            real.dones,
        );
        let disc_real = score.clamp_max(1.0).mean().neg();
        let disc_real_value = tensor_scalar(disc_real.clone());
        self.step_discriminator(disc_real);

        let r = self.config.train_rollouts;
        let [_, _, c] = codes.dims();
        let initial = codes
            .clone()
            .slice([0..1, slice * r..(slice + 1) * r, 0..c])
            .reshape([r, c]);
        let fake = self.unroll(model, initial);

        let detached = fake.detached();
        let score = self.discriminator.forward(
            detached.codes,
            detached.next_codes,
            detached.action_inputs,
            detached.rewards,
            detached.dones,
        );
        let disc_fake = score.clamp_min(-1.0).mean();
        let disc_fake_value = tensor_scalar(disc_fake.clone());
        self.step_discriminator(disc_fake);

        let score = self.discriminator.forward(
            fake.codes,
            fake.next_codes,
            fake.action_inputs,
            fake.rewards,
            fake.dones,
        );
        let gen_loss = score.mean().neg();
        let gen_value = tensor_scalar(gen_loss.clone());
        let grads = GradientsParams::from_grads(gen_loss.backward(), &self.generator);
        self.generator = self
            .gen_optimizer
            .step(self.config.gen_learning_rate, self.generator.clone(), grads);

        let losses = WorldModelLosses {
            disc_real: disc_real_value,
            disc_fake: disc_fake_value,
            generator: gen_value,
        };
        if [losses.disc_real, losses.disc_fake, losses.generator]
            .iter()
            .any(|l| !l.is_finite())
        {
            log::warn!("world model losses diverged: {losses:?}");
        }
        Ok(losses)
    }

    fn train<M: ActorCritic<B>>(&mut self, model: &M, rng: &mut StdRng) -> Result<WorldModelLosses, PpoError> {
        let (codes, batch) = self.encode(model, rng)?;
        let mut losses = None;
        for slice in 0..self.config.train_iters {
            losses = Some(self.train_slice(model, &codes, &batch, slice)?);
        }
        self.train_steps += 1;
        losses.ok_or_else(|| PpoError::InsufficientData("no world model slices".to_string()))
    }
}

impl<B, M> TrainingAugmentation<B, M> for WorldModelTrainer<B>
where
    B: AutodiffBackend,
    M: ActorCritic<B>,
{
    fn validate(&self, config: &PpoConfig) -> Result<(), ConfigError> {
        if config.horizon > self.config.replay_capacity {
            return Err(ConfigError::HorizonExceedsReplay {
                horizon: config.horizon,
                capacity: self.config.replay_capacity,
            });
        }
        Ok(())
    }

    fn before_update(&mut self, ctx: UpdateContext<'_, B, M>) -> Result<(), PpoError> {
        self.replay.push(&Self::trajectories(ctx.data)?)?;
        if self.replay.len() <= self.config.steps_per_pass() {
            return Ok(());
        }

        let losses = self.train(ctx.model, ctx.rng)?;
        self.last_losses = Some(losses);
        log::debug!(
            "world model pass {}: disc real {:.4}, disc fake {:.4}, generator {:.4}",
            self.train_steps,
            losses.disc_real,
            losses.disc_fake,
            losses.generator
        );
        if ctx.do_log {
            ctx.logger.add_scalar("world disc real loss", losses.disc_real as f64, ctx.frame);
            ctx.logger.add_scalar("world disc fake loss", losses.disc_fake as f64, ctx.frame);
            ctx.logger.add_scalar("world gen loss", losses.generator as f64, ctx.frame);
        }
        Ok(())
    }
}
