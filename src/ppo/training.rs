use burn::prelude::*;

use crate::burnrl::base::Logger;
use crate::error::PpoError;
use crate::ppo::config::PpoConfig;
use crate::ppo::distribution::ActionDistribution;
use crate::ppo::gae::process_rewards;
use crate::ppo::rollout_buffer::Sample;
use crate::utils::{float_tensor, tensor_to_vec};

/// Tensors of one training pass, flattened time-major over
/// `N = horizon * num_actors` rows.
#[derive(Debug, Clone)]
pub struct TrainingData<B: Backend> {
    pub horizon: usize,
    pub num_actors: usize,
    /// `[horizon, num_actors, observation_len]`
    pub states: Tensor<B, 3>,
    pub probs_old: Tensor<B, 2>,
    pub values_old: Tensor<B, 1>,
    pub actions: Tensor<B, 2>,
    pub advantages: Tensor<B, 1>,
    pub returns: Tensor<B, 1>,
    pub dones: Tensor<B, 1>,
    /// Scaled rewards.
    pub rewards: Tensor<B, 1>,
    /// `[horizon, num_actors]`
    pub resets: Tensor<B, 2>,
    /// `[num_actors, memory_size]`
    pub initial_memory: Option<Tensor<B, 2>>,
    pub upper: Option<UpperData<B>>,
}

/// Upper-level targets of a hierarchical model. The upper level shares the
/// advantages and returns of the acting level.
#[derive(Debug, Clone)]
pub struct UpperData<B: Backend> {
    pub probs_old: Tensor<B, 2>,
    pub values_old: Tensor<B, 1>,
    pub actions: Tensor<B, 2>,
}

fn flatten_rows<T: Copy>(rows: &[Vec<T>]) -> Vec<T> {
    rows.iter().flatten().copied().collect()
}

fn bools_to_floats(values: &[bool]) -> Vec<f32> {
    values.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect()
}

/// Converts a collected sample into training tensors on `device`.
///
/// The trailing state of the sample only contributes its value estimate as
/// the bootstrap for returns and advantages. `upper_pd` is set for
/// hierarchical models, whose samples carry an upper step per state.
pub fn process_sample<B: Backend>(
    sample: &Sample,
    pd: ActionDistribution,
    upper_pd: Option<ActionDistribution>,
    config: &PpoConfig,
    device: &B::Device,
) -> Result<TrainingData<B>, PpoError> {
    let horizon = sample.len();
    if horizon == 0 || sample.states.len() != horizon + 1 {
        return Err(PpoError::InsufficientData(format!(
            "sample holds {} states and {horizon} rewards",
            sample.states.len()
        )));
    }
    let num_actors = sample.values[0].len();
    let n = horizon * num_actors;
    let observation_len = sample.states[0].len() / num_actors.max(1);

    let rewards = flatten_rows(&sample.rewards);
    let dones = flatten_rows(&sample.dones);
    let values = flatten_rows(&sample.values);
    let processed = process_rewards(
        &rewards,
        &values,
        &dones,
        num_actors,
        config.reward_discount,
        config.advantage_discount,
        config.reward_scale,
    )?;

    let states = flatten_rows(&sample.states[..horizon]);
    let probs = flatten_rows(&sample.probs[..horizon]);
    let actions = flatten_rows(&sample.actions[..horizon]);
    let resets = bools_to_floats(&flatten_rows(&sample.resets[..horizon]));
    check_len("training states", states.len(), n * observation_len)?;
    check_len("training probs", probs.len(), n * pd.prob_vector_len())?;
    check_len("training actions", actions.len(), n * pd.action_vector_len())?;

    let initial_memory = match &sample.initial_memory {
        Some(memory) => {
            let width = memory.len() / num_actors.max(1);
            Some(float_tensor(memory.clone(), [num_actors, width], device))
        }
        None => None,
    };

    let upper = match upper_pd {
        Some(upper_pd) => Some(upper_data(sample, upper_pd, n, device)?),
        None => None,
    };

    Ok(TrainingData {
        horizon,
        num_actors,
        states: float_tensor(states, [horizon, num_actors, observation_len], device),
        probs_old: float_tensor(probs, [n, pd.prob_vector_len()], device),
        values_old: float_tensor(values[..n].to_vec(), [n], device),
        actions: float_tensor(actions, [n, pd.action_vector_len()], device),
        advantages: float_tensor(processed.advantages, [n], device),
        returns: float_tensor(processed.returns, [n], device),
        dones: float_tensor(bools_to_floats(&dones), [n], device),
        rewards: float_tensor(processed.rewards, [n], device),
        resets: float_tensor(resets, [horizon, num_actors], device),
        initial_memory,
        upper,
    })
}

fn upper_data<B: Backend>(
    sample: &Sample,
    pd: ActionDistribution,
    n: usize,
    device: &B::Device,
) -> Result<UpperData<B>, PpoError> {
    let horizon = sample.len();
    check_len("upper steps", sample.upper.len(), horizon + 1)?;
    let steps = &sample.upper[..horizon];
    let probs: Vec<f32> = steps.iter().flat_map(|s| s.probs.iter().copied()).collect();
    let values: Vec<f32> = steps.iter().flat_map(|s| s.values.iter().copied()).collect();
    let actions: Vec<f32> = steps.iter().flat_map(|s| s.actions.iter().copied()).collect();
    check_len("upper probs", probs.len(), n * pd.prob_vector_len())?;
    check_len("upper values", values.len(), n)?;
    check_len("upper actions", actions.len(), n * pd.action_vector_len())?;
    Ok(UpperData {
        probs_old: float_tensor(probs, [n, pd.prob_vector_len()], device),
        values_old: float_tensor(values, [n], device),
        actions: float_tensor(actions, [n, pd.action_vector_len()], device),
    })
}

fn check_len(context: &'static str, actual: usize, expected: usize) -> Result<(), PpoError> {
    if actual != expected {
        return Err(PpoError::shape(context, expected, actual));
    }
    Ok(())
}

impl<B: Backend> TrainingData<B> {
    pub fn len(&self) -> usize {
        self.horizon * self.num_actors
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Histograms of the batch inputs and targets.
    pub fn log(&self, pd: ActionDistribution, logger: &mut dyn Logger, frame: usize) -> Result<(), PpoError> {
        logger.add_histogram("rewards", &tensor_to_vec(self.rewards.clone())?, frame);
        logger.add_histogram("returns", &tensor_to_vec(self.returns.clone())?, frame);
        logger.add_histogram("advantages", &tensor_to_vec(self.advantages.clone())?, frame);
        logger.add_histogram("values", &tensor_to_vec(self.values_old.clone())?, frame);
        match pd.gaussian_dim() {
            Some(dim) => {
                let n = self.len();
                let mean = self.probs_old.clone().slice([0..n, 0..dim]);
                let std = self.probs_old.clone().slice([0..n, dim..2 * dim]).exp();
                logger.add_histogram("probs mean", &tensor_to_vec(mean)?, frame);
                logger.add_histogram("probs std", &tensor_to_vec(std)?, frame);
            }
            None => {
                let log_probs = burn::tensor::activation::log_softmax(self.probs_old.clone(), 1);
                logger.add_histogram("probs", &tensor_to_vec(log_probs)?, frame);
            }
        }
        Ok(())
    }
}
