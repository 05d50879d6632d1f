use std::path::Path;

use burn::{
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{Adam, AdamConfig, GradientsParams, Optimizer, adaptor::OptimizerAdaptor},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::burnrl::base::{Agent, Logger, Space};
use crate::error::PpoError;
use crate::ppo::augmentation::{NoAugmentation, TrainingAugmentation, UpdateContext};
use crate::ppo::checkpoint::{checkpoint_path, load_model, save_model};
use crate::ppo::config::PpoConfig;
use crate::ppo::decay::{ValueDecay, multiplier};
use crate::ppo::distribution::ActionDistribution;
use crate::ppo::loss::{LossCoefficients, LossInput, PpoLoss, ppo_loss};
use crate::ppo::model::{ActorCritic, ActorOutput};
use crate::ppo::placement::PlacedModel;
use crate::ppo::rollout_buffer::{Sample, SampleStep, UpperStep};
use crate::ppo::training::{TrainingData, process_sample};
use crate::utils::{float_tensor, index_tensor, tensor_scalar, tensor_to_vec};

/// Rows of one minibatch.
enum Minibatch {
    /// Shuffled single transitions of a feed-forward model.
    Steps(Vec<usize>),
    /// Whole actor sequences of a recurrent model.
    Actors(Vec<usize>),
}

/// A PPO learner acting for `num_actors` parallel environments.
///
/// Acting runs on the gradient-free form of the model on `eval_device`;
/// collected steps are turned into a training pass every `horizon` steps,
/// which runs inline on `train_device`.
pub struct Ppo<B, M>
where
    B: AutodiffBackend,
    M: ActorCritic<B> + AutodiffModule<B>,
    M::InnerModule: ActorCritic<B::InnerBackend>,
{
    config: PpoConfig,
    pd: ActionDistribution,
    upper_pd: Option<ActionDistribution>,
    observation_len: usize,
    model: PlacedModel<B, M>,
    inference: Option<M::InnerModule>,
    optimizer: OptimizerAdaptor<Adam, M, B>,
    sample: Sample,
    memory: Option<Vec<f32>>,
    pending_rewards: Option<Vec<f32>>,
    pending_dones: Option<Vec<bool>>,
    lr_decay: Option<ValueDecay>,
    clip_decay: Option<ValueDecay>,
    entropy_decay: Option<ValueDecay>,
    augmentation: Box<dyn TrainingAugmentation<B, M>>,
    logger: Box<dyn Logger>,
    rng: StdRng,
    frame: usize,
    train_steps: usize,
    last_model_save_frame: usize,
    last_log_frame: usize,
    force_log: bool,
    do_log: bool,
    eval_device: B::Device,
    train_device: B::Device,
}

impl<B, M> Ppo<B, M>
where
    B: AutodiffBackend,
    M: ActorCritic<B> + AutodiffModule<B>,
    M::InnerModule: ActorCritic<B::InnerBackend>,
{
    pub fn new(
        config: PpoConfig,
        observation_space: &Space,
        action_space: &Space,
        model: M,
        eval_device: B::Device,
        train_device: B::Device,
        mut logger: Box<dyn Logger>,
    ) -> Result<Self, PpoError> {
        config.validate()?;

        let model = match &config.model_init_path {
            Some(path) => {
                log::info!("loading initial model weights from {path}");
                load_model(model, Path::new(path), &train_device)?
            }
            None => model,
        };
        let optimizer = AdamConfig::new()
            .with_grad_clipping(Some(GradientClippingConfig::Norm(config.grad_clip_norm)))
            .init::<B, M>();

        logger.add_text("PPO", &config.to_json(), 0);

        Ok(Self {
            pd: ActionDistribution::from_space(action_space),
            upper_pd: model.upper_pd(),
            observation_len: observation_space.flat_len(),
            model: PlacedModel::new(model, train_device.clone()),
            inference: None,
            optimizer,
            sample: Sample::new(),
            memory: None,
            pending_rewards: None,
            pending_dones: None,
            lr_decay: config.lr_decay.as_ref().map(|c| c.build()),
            clip_decay: config.clip_decay.as_ref().map(|c| c.build()),
            entropy_decay: config.entropy_decay.as_ref().map(|c| c.build()),
            augmentation: Box::new(NoAugmentation),
            logger,
            rng: StdRng::seed_from_u64(config.seed),
            frame: 0,
            train_steps: 0,
            last_model_save_frame: 0,
            last_log_frame: 0,
            force_log: false,
            do_log: false,
            eval_device,
            train_device,
            config,
        })
    }

    /// Attaches extra learning to every training pass. Fails if the
    /// augmentation cannot work with this agent's configuration.
    pub fn with_augmentation(
        mut self,
        augmentation: Box<dyn TrainingAugmentation<B, M>>,
    ) -> Result<Self, PpoError> {
        augmentation.validate(&self.config)?;
        self.augmentation = augmentation;
        Ok(self)
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        self.model.model()
    }

    pub fn pd(&self) -> ActionDistribution {
        self.pd
    }

    /// Completed training passes.
    pub fn train_steps(&self) -> usize {
        self.train_steps
    }

    /// Completed transitions waiting for the next training pass.
    pub fn collected_steps(&self) -> usize {
        self.sample.len()
    }

    pub fn learning_rate(&self) -> f64 {
        self.config.learning_rate * multiplier(&self.lr_decay) as f64
    }

    pub fn clip_mult(&self) -> f32 {
        multiplier(&self.clip_decay)
    }

    pub fn entropy_mult(&self) -> f32 {
        multiplier(&self.entropy_decay)
    }

    pub fn logger_mut(&mut self) -> &mut dyn Logger {
        self.logger.as_mut()
    }

    /// Writes the current weights to `path`.
    pub fn save(&self, path: &Path) -> Result<(), PpoError> {
        save_model(self.model.model(), path)
    }

    fn check_log(&mut self) {
        self.do_log = self.force_log || self.frame >= self.last_log_frame + self.config.log_interval;
        if self.do_log {
            self.last_log_frame = self.frame;
            self.force_log = false;
        }
    }

    fn train(&mut self) -> Result<(), PpoError> {
        self.check_log();

        for decay in [&mut self.lr_decay, &mut self.clip_decay, &mut self.entropy_decay]
            .into_iter()
            .flatten()
        {
            decay.step(self.frame);
        }

        let data = process_sample::<B>(
            &self.sample,
            self.pd,
            self.upper_pd,
            &self.config,
            &self.train_device,
        )?;
        self.sample.clear();
        if self.do_log {
            data.log(self.pd, self.logger.as_mut(), self.frame)?;
        }

        if self.model.ensure_placement(&self.train_device) {
            self.inference = None;
        }
        self.augmentation.before_update(UpdateContext {
            model: self.model.model(),
            data: &data,
            pd: self.pd,
            logger: self.logger.as_mut(),
            frame: self.frame,
            do_log: self.do_log,
            rng: &mut self.rng,
        })?;
        self.ppo_update(&data)?;
        self.check_save_model()?;
        self.train_steps += 1;
        if self.do_log {
            self.logger.flush();
        }
        Ok(())
    }

    fn minibatches(&mut self, data: &TrainingData<B>, recurrent: bool) -> Vec<Minibatch> {
        let batches = self.config.minibatches();
        if recurrent {
            let mut actors: Vec<usize> = (0..data.num_actors).collect();
            actors.shuffle(&mut self.rng);
            let per_batch = data.num_actors.div_ceil(batches.min(data.num_actors).max(1));
            actors
                .chunks(per_batch.max(1))
                .map(|chunk| Minibatch::Actors(chunk.to_vec()))
                .collect()
        } else {
            let n = data.len();
            let size = self.config.batch_size;
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut self.rng);
            (0..batches)
                .map(|b| b * size..((b + 1) * size).min(n))
                .filter(|range| !range.is_empty())
                .map(|range| Minibatch::Steps(order[range].to_vec()))
                .collect()
        }
    }

    /// Runs the model on a minibatch and returns its outputs with the flat
    /// rows of `data` they correspond to. Hierarchical models replay the
    /// upper actions they took while collecting.
    fn forward_minibatch(&self, data: &TrainingData<B>, batch: &Minibatch) -> (ActorOutput<B>, Vec<usize>) {
        let device = &self.train_device;
        let model = self.model.model();
        let (states, memory, resets, rows) = match batch {
            Minibatch::Steps(rows) => {
                let [h, a, obs] = data.states.dims();
                let idx = index_tensor::<B>(rows, device);
                let states = data
                    .states
                    .clone()
                    .reshape([h * a, obs])
                    .select(0, idx)
                    .unsqueeze_dim(0);
                let resets = Tensor::zeros([1, rows.len()], device);
                (states, None, resets, rows.clone())
            }
            Minibatch::Actors(actors) => {
                let idx = index_tensor::<B>(actors, device);
                let states = data.states.clone().select(1, idx.clone());
                let resets = data.resets.clone().select(1, idx.clone());
                let memory = data.initial_memory.clone().map(|m| m.select(0, idx));
                let rows = (0..data.horizon)
                    .flat_map(|t| actors.iter().map(move |&a| t * data.num_actors + a))
                    .collect();
                (states, memory, resets, rows)
            }
        };
        let (out, _) = match &data.upper {
            Some(upper) => {
                let actions = upper.actions.clone().select(0, index_tensor::<B>(&rows, device));
                model.replay(states, memory, resets, actions)
            }
            None => model.forward(states, memory, resets),
        };
        (out, rows)
    }

    fn ppo_update(&mut self, data: &TrainingData<B>) -> Result<(), PpoError> {
        if self.model.ensure_placement(&self.train_device) {
            self.inference = None;
        }

        let clip_mult = self.clip_mult();
        let coef = LossCoefficients {
            constraint: self.config.constraint,
            policy_clip: self.config.policy_clip * clip_mult,
            value_clip: self.config.value_clip * clip_mult,
            value_loss_scale: self.config.value_loss_scale,
            entropy_bonus: self.config.entropy_bonus * self.entropy_mult(),
        };
        let lr = self.learning_rate();
        let recurrent = self.model.model().memory_size().is_some();
        let device = self.train_device.clone();

        let mut last: Option<(f32, f32)> = None;
        for iter in 0..self.config.ppo_iters {
            let batches = self.minibatches(data, recurrent);
            for (b, batch) in batches.iter().enumerate() {
                let (out, rows) = self.forward_minibatch(data, batch);
                let idx = index_tensor::<B>(&rows, &device);
                let (acting, upper) = out.into_parts();
                let advantages = data.advantages.clone().select(0, idx.clone());
                let returns = data.returns.clone().select(0, idx.clone());
                let input = LossInput {
                    probs: acting.probs,
                    values: acting.state_values,
                    probs_old: data.probs_old.clone().select(0, idx.clone()),
                    values_old: data.values_old.clone().select(0, idx.clone()),
                    actions: data.actions.clone().select(0, idx.clone()),
                    advantages: advantages.clone(),
                    returns: returns.clone(),
                };
                let loss = ppo_loss(self.pd, input, coef);
                loss.check_finite()?;

                let upper_loss = match (upper, &data.upper, self.upper_pd) {
                    (Some(upper), Some(old), Some(upper_pd)) => {
                        let input = LossInput {
                            probs: upper.head.probs,
                            values: upper.head.state_values,
                            probs_old: old.probs_old.clone().select(0, idx.clone()),
                            values_old: old.values_old.clone().select(0, idx.clone()),
                            actions: old.actions.clone().select(0, idx),
                            advantages,
                            returns,
                        };
                        let upper_loss = ppo_loss(upper_pd, input, coef);
                        upper_loss.check_finite()?;
                        Some(upper_loss)
                    }
                    _ => None,
                };

                if self.do_log && iter + 1 == self.config.ppo_iters && b == 0 {
                    self.model.model().log_parameters(self.logger.as_mut(), self.frame);
                    self.log_loss(&loss)?;
                    if let Some(upper_loss) = &upper_loss {
                        let mean = tensor_scalar(upper_loss.total.clone()) as f64;
                        self.logger.add_scalar("upper loss", mean, self.frame);
                        let kl = tensor_scalar(upper_loss.kl.clone().mean()) as f64;
                        self.logger.add_scalar("upper kl", kl, self.frame);
                    }
                }
                let total = match upper_loss {
                    Some(upper_loss) => loss.total + upper_loss.total,
                    None => loss.total,
                };
                last = Some((
                    tensor_scalar(total.clone()),
                    tensor_scalar(loss.kl.clone().mean()),
                ));

                let grads = total.backward();
                let grads = GradientsParams::from_grads(grads, self.model.model());
                let optimizer = &mut self.optimizer;
                self.model.update(|model| optimizer.step(lr, model, grads));
            }
        }
        self.inference = None;

        if self.do_log {
            self.logger.add_scalar("learning rate", lr, self.frame);
            self.logger.add_scalar("clip mult", clip_mult as f64, self.frame);
            if let Some((total, kl)) = last {
                self.logger.add_scalar("total loss", total as f64, self.frame);
                self.logger.add_scalar("kl", kl as f64, self.frame);
            }
        }
        Ok(())
    }

    fn log_loss(&mut self, loss: &PpoLoss<B>) -> Result<(), PpoError> {
        let frame = self.frame;
        let logger = self.logger.as_mut();
        let mean = |t: &Tensor<B, 1>| tensor_scalar(t.clone().mean()) as f64;

        logger.add_histogram("loss value", &tensor_to_vec(loss.value.clone())?, frame);
        logger.add_histogram("loss ent", &tensor_to_vec(loss.entropy_loss.clone())?, frame);
        logger.add_scalar("entropy", mean(&loss.entropy), frame);
        logger.add_scalar("loss entropy", mean(&loss.entropy_loss), frame);
        logger.add_scalar("loss value", mean(&loss.value), frame);
        logger.add_histogram("ratio", &tensor_to_vec(loss.ratio.clone())?, frame);
        logger.add_scalar("ratio mean", mean(&loss.ratio), frame);
        logger.add_scalar("ratio abs mean", mean(&loss.ratio.clone().abs()), frame);
        logger.add_scalar(
            "ratio abs max",
            tensor_scalar(loss.ratio.clone().abs().max()) as f64,
            frame,
        );
        if self.config.constraint.clips() {
            logger.add_histogram("loss clip", &tensor_to_vec(loss.policy.clone())?, frame);
            logger.add_scalar("loss clip", mean(&loss.policy), frame);
        }
        Ok(())
    }

    fn check_save_model(&mut self) -> Result<(), PpoError> {
        let (Some(interval), Some(folder)) = (
            self.config.model_save_interval,
            self.config.model_save_folder.as_ref(),
        ) else {
            return Ok(());
        };
        if self.last_model_save_frame + interval > self.frame {
            return Ok(());
        }
        self.last_model_save_frame = self.frame;
        let frame = self.config.save_intermediate_models.then_some(self.frame);
        let path = checkpoint_path(folder, &self.config.model_save_tag, frame);
        log::info!("saving model to {}", path.display());
        save_model(self.model.model(), &path)
    }
}

impl<B, M> Agent for Ppo<B, M>
where
    B: AutodiffBackend,
    M: ActorCritic<B> + AutodiffModule<B>,
    M::InnerModule: ActorCritic<B::InnerBackend>,
{
    fn num_actors(&self) -> usize {
        self.config.num_actors
    }

    fn frame(&self) -> usize {
        self.frame
    }

    fn eval(&mut self, states: &[f32]) -> Result<Vec<f32>, PpoError> {
        let num_actors = self.config.num_actors;
        if states.len() != num_actors * self.observation_len {
            return Err(PpoError::shape(
                "agent states",
                num_actors * self.observation_len,
                states.len(),
            ));
        }
        let rewards = self.pending_rewards.take();
        let dones = self.pending_dones.take();
        if !self.sample.is_empty() && (rewards.is_none() || dones.is_none()) {
            return Err(PpoError::InsufficientData(
                "rewards and dones of the previous step were not reported".to_string(),
            ));
        }
        let resets = match (&self.memory, &dones) {
            (Some(_), Some(dones)) => dones.clone(),
            (Some(_), None) => vec![false; num_actors],
            (None, _) => vec![true; num_actors],
        };

        if self.model.ensure_placement(&self.eval_device) {
            self.inference = None;
        }
        let model = &self.model;
        let inference = self.inference.get_or_insert_with(|| model.model().valid());

        let device = &self.eval_device;
        let states_t = float_tensor(states.to_vec(), [1, num_actors, self.observation_len], device);
        let resets_t = float_tensor(
            resets.iter().map(|&r| if r { 1.0 } else { 0.0 }).collect(),
            [1, num_actors],
            device,
        );
        let memory_t = self.memory.as_ref().map(|m| {
            let width = m.len() / num_actors;
            float_tensor(m.clone(), [num_actors, width], device)
        });
        let (out, next_memory) = inference.forward(states_t, memory_t, resets_t);
        let (out, upper) = out.into_parts();
        let actions = tensor_to_vec(self.pd.sample(out.probs.clone()))?;
        let upper = match upper {
            Some(upper) => Some(UpperStep {
                probs: tensor_to_vec(upper.head.probs)?,
                values: tensor_to_vec(upper.head.state_values)?,
                actions: tensor_to_vec(upper.actions)?,
            }),
            None => None,
        };

        let step = SampleStep {
            states: states.to_vec(),
            probs: tensor_to_vec(out.probs)?,
            values: tensor_to_vec(out.state_values)?,
            actions: actions.clone(),
            resets,
            memory: self.memory.take(),
            upper,
        };
        self.sample
            .append(step, &rewards.unwrap_or_default(), &dones.unwrap_or_default())?;
        self.memory = next_memory.map(tensor_to_vec).transpose()?;
        self.frame += num_actors;

        if self.sample.len() >= self.config.horizon {
            self.train()?;
        }
        Ok(actions)
    }

    fn reward(&mut self, rewards: &[f32]) {
        self.pending_rewards = Some(rewards.to_vec());
    }

    fn finish_episodes(&mut self, dones: &[bool]) {
        self.pending_dones = Some(dones.to_vec());
    }

    fn force_log(&mut self) {
        self.force_log = true;
    }

    fn drop_collected_steps(&mut self) {
        self.sample.clear();
    }
}
