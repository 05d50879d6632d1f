//! Discounted returns and generalized advantage estimation.
//!
//! Arrays are time-major and flattened: element `t * num_actors + a` belongs
//! to actor `a` at step `t`. `rewards` and `dones` cover `H` steps, `values`
//! covers `H + 1` so that the trailing estimate bootstraps the last step.

use crate::error::PpoError;
use crate::utils::mean_std;

/// Lower bound on the standard deviation used to standardize advantages.
pub const ADVANTAGE_STD_FLOOR: f32 = 1e-5;

fn check_lengths(
    rewards: &[f32],
    values: &[f32],
    dones: &[bool],
    num_actors: usize,
) -> Result<usize, PpoError> {
    if num_actors == 0 || rewards.len() % num_actors != 0 {
        return Err(PpoError::shape(
            "gae rewards",
            format!("a multiple of {num_actors}"),
            rewards.len(),
        ));
    }
    let horizon = rewards.len() / num_actors;
    if dones.len() != rewards.len() {
        return Err(PpoError::shape("gae dones", rewards.len(), dones.len()));
    }
    if values.len() != (horizon + 1) * num_actors {
        return Err(PpoError::shape(
            "gae values",
            (horizon + 1) * num_actors,
            values.len(),
        ));
    }
    Ok(horizon)
}

/// `R_t = r_t + gamma * R_{t+1} * (1 - done_t)`, with `R_H = V_H`.
pub fn calc_returns(
    rewards: &[f32],
    values: &[f32],
    dones: &[bool],
    num_actors: usize,
    gamma: f32,
) -> Result<Vec<f32>, PpoError> {
    let horizon = check_lengths(rewards, values, dones, num_actors)?;
    let mut returns = vec![0.0; rewards.len()];
    for a in 0..num_actors {
        let mut running = values[horizon * num_actors + a];
        for t in (0..horizon).rev() {
            let i = t * num_actors + a;
            let not_done = if dones[i] { 0.0 } else { 1.0 };
            running = rewards[i] + gamma * running * not_done;
            returns[i] = running;
        }
    }
    Ok(returns)
}

/// `delta_t = r_t + gamma * V_{t+1} * (1 - done_t) - V_t` and
/// `A_t = delta_t + gamma * lambda * A_{t+1} * (1 - done_t)`.
pub fn calc_advantages(
    rewards: &[f32],
    values: &[f32],
    dones: &[bool],
    num_actors: usize,
    gamma: f32,
    lambda: f32,
) -> Result<Vec<f32>, PpoError> {
    let horizon = check_lengths(rewards, values, dones, num_actors)?;
    let mut advantages = vec![0.0; rewards.len()];
    for a in 0..num_actors {
        let mut running = 0.0;
        for t in (0..horizon).rev() {
            let i = t * num_actors + a;
            let not_done = if dones[i] { 0.0 } else { 1.0 };
            let next_value = values[i + num_actors];
            let delta = rewards[i] + gamma * next_value * not_done - values[i];
            running = delta + gamma * lambda * running * not_done;
            advantages[i] = running;
        }
    }
    Ok(advantages)
}

/// Zero mean, unit standard deviation over the whole batch.
pub fn standardize(values: &mut [f32]) {
    let (mean, std) = mean_std(values);
    let std = std.max(ADVANTAGE_STD_FLOOR);
    for v in values.iter_mut() {
        *v = (*v - mean) / std;
    }
}

/// Processed rewards of one rollout.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRewards {
    pub rewards: Vec<f32>,
    pub returns: Vec<f32>,
    pub advantages: Vec<f32>,
}

/// Scales rewards, then computes returns and standardized advantages.
pub fn process_rewards(
    rewards: &[f32],
    values: &[f32],
    dones: &[bool],
    num_actors: usize,
    reward_discount: f32,
    advantage_discount: f32,
    reward_scale: f32,
) -> Result<ProcessedRewards, PpoError> {
    let rewards: Vec<f32> = rewards.iter().map(|r| r * reward_scale).collect();
    let returns = calc_returns(&rewards, values, dones, num_actors, reward_discount)?;
    let mut advantages = calc_advantages(
        &rewards,
        values,
        dones,
        num_actors,
        reward_discount,
        advantage_discount,
    )?;
    standardize(&mut advantages);
    Ok(ProcessedRewards {
        rewards,
        returns,
        advantages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAMMA: f32 = 0.99;
    const LAMBDA: f32 = 0.95;

    #[test]
    fn last_step_advantage_is_one_step_td_error() {
        let rewards = [0.5, -1.0, 2.0, 0.0];
        let values = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let dones = [false; 4];
        let adv = calc_advantages(&rewards, &values, &dones, 2, GAMMA, LAMBDA).unwrap();
        for a in 0..2 {
            let i = 2 + a;
            let expected = rewards[i] + GAMMA * values[i + 2] - values[i];
            assert!((adv[i] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn done_isolates_value_after_terminal_step() {
        let rewards = [1.0, 1.0, 1.0];
        let dones = [false, true, false];
        let base = [0.3, 0.2, 0.7, 0.9];
        let mut changed = base;
        changed[2] = 100.0;

        let r0 = calc_returns(&rewards, &base, &dones, 1, GAMMA).unwrap();
        let r1 = calc_returns(&rewards, &changed, &dones, 1, GAMMA).unwrap();
        let a0 = calc_advantages(&rewards, &base, &dones, 1, GAMMA, LAMBDA).unwrap();
        let a1 = calc_advantages(&rewards, &changed, &dones, 1, GAMMA, LAMBDA).unwrap();

        assert_eq!(r0[1], r1[1]);
        assert_eq!(a0[1], a1[1]);
        assert_eq!(r0[1], 1.0);
    }

    #[test]
    fn constant_rewards_accumulate_backwards() {
        // horizon 4, 2 actors, constant reward 1, no dones
        let rewards = [1.0; 8];
        let dones = [false; 8];
        let bootstrap = 2.0;
        let mut values = [0.0; 10];
        values[8] = bootstrap;
        values[9] = bootstrap;

        let returns = calc_returns(&rewards, &values, &dones, 2, GAMMA).unwrap();
        let last = 1.0 + GAMMA * bootstrap;
        assert!((returns[6] - last).abs() < 1e-6);
        assert!((returns[7] - last).abs() < 1e-6);
        let mut expected = last;
        for t in (0..3).rev() {
            expected = 1.0 + GAMMA * expected;
            assert!((returns[t * 2] - expected).abs() < 1e-5);
            assert!((returns[t * 2 + 1] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn actors_do_not_mix() {
        let rewards = [1.0, 0.0, 1.0, 0.0];
        let values = [0.0; 6];
        let dones = [false; 4];
        let returns = calc_returns(&rewards, &values, &dones, 2, GAMMA).unwrap();
        assert_eq!(returns[1], 0.0);
        assert_eq!(returns[3], 0.0);
        assert!((returns[0] - (1.0 + GAMMA)).abs() < 1e-6);
    }

    #[test]
    fn standardized_advantages_have_unit_moments() {
        let mut adv = vec![3.0, -1.0, 0.5, 7.0, 2.0, -4.0];
        standardize(&mut adv);
        let (mean, std) = mean_std(&adv);
        assert!(mean.abs() < 1e-5);
        assert!((std - 1.0).abs() < 1e-4);
    }

    #[test]
    fn degenerate_batch_is_floored() {
        let mut adv = vec![2.5; 5];
        standardize(&mut adv);
        assert!(adv.iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn reward_scale_applies_before_discounting() {
        let processed =
            process_rewards(&[1.0, 2.0], &[0.0, 0.0, 0.0], &[false, false], 1, 0.5, 0.9, 10.0)
                .unwrap();
        assert_eq!(processed.rewards, vec![10.0, 20.0]);
        assert!((processed.returns[0] - 20.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = calc_returns(&[1.0, 1.0], &[0.0, 0.0], &[false, false], 1, GAMMA).unwrap_err();
        assert!(matches!(err, PpoError::ShapeMismatch { context: "gae values", .. }));
    }
}
