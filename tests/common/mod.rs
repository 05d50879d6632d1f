#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use mppo::burnrl::base::{EnvError, EpisodeInfo, Logger, Space, StepResult, VecEnvironment};

/// Every player is asked for `target = tick % 2` and rewarded with
/// `-(action - target)^2`. Episodes last `length` ticks and instances reset
/// themselves.
#[derive(Debug)]
pub struct TargetEnv {
    observation_space: Space,
    action_space: Space,
    num_envs: usize,
    num_players: usize,
    length: usize,
    tick: usize,
    episode_reward: Vec<f32>,
}

impl TargetEnv {
    pub fn new(action_space: Space, num_envs: usize, num_players: usize, length: usize) -> Self {
        Self {
            observation_space: Space::boxed([3]),
            action_space,
            num_envs,
            num_players,
            length,
            tick: 0,
            episode_reward: vec![0.0; num_envs * num_players],
        }
    }

    pub fn discrete(num_envs: usize) -> Self {
        Self::new(Space::Discrete(2), num_envs, 1, 5)
    }

    fn target(&self) -> f32 {
        (self.tick % 2) as f32
    }

    fn states(&self) -> Vec<f32> {
        let phase = (self.tick % self.length) as f32 / self.length as f32;
        (0..self.num_envs * self.num_players)
            .flat_map(|slot| [self.target(), phase, (slot % self.num_players) as f32])
            .collect()
    }
}

impl VecEnvironment for TargetEnv {
    fn observation_space(&self) -> &Space {
        &self.observation_space
    }

    fn action_space(&self) -> &Space {
        &self.action_space
    }

    fn num_envs(&self) -> usize {
        self.num_envs
    }

    fn set_num_envs(&mut self, num_envs: usize) {
        self.num_envs = num_envs;
        self.episode_reward = vec![0.0; num_envs * self.num_players];
    }

    fn num_players(&self) -> usize {
        self.num_players
    }

    fn reset(&mut self) -> Result<Vec<f32>, EnvError> {
        self.tick = 0;
        self.episode_reward.fill(0.0);
        Ok(self.states())
    }

    fn step(&mut self, actions: &[f32]) -> Result<StepResult, EnvError> {
        let slots = self.num_envs * self.num_players;
        let width = self.action_space.flat_len();
        if actions.len() != slots * width {
            return Err(EnvError::ActionShape {
                expected: slots * width,
                actual: actions.len(),
            });
        }
        let target = self.target();
        let rewards: Vec<f32> = actions
            .chunks(width)
            .map(|a| -(a[0] - target).powi(2))
            .collect();
        self.tick += 1;
        let done = self.tick % self.length == 0;

        let mut infos = vec![None; slots];
        for (slot, reward) in rewards.iter().enumerate() {
            self.episode_reward[slot] += reward;
            if done {
                infos[slot] = Some(EpisodeInfo {
                    reward: self.episode_reward[slot],
                    length: self.length,
                });
                self.episode_reward[slot] = 0.0;
            }
        }
        Ok(StepResult {
            states: self.states(),
            rewards,
            dones: vec![done; self.num_envs],
            infos,
        })
    }
}

/// Keeps every record so tests can look for tags.
#[derive(Debug, Default, Clone)]
pub struct SharedLogger(pub Arc<Mutex<Vec<String>>>);

impl SharedLogger {
    pub fn tags(&self) -> Vec<String> {
        self.0.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn push(&self, tag: &str) {
        if let Ok(mut tags) = self.0.lock() {
            tags.push(tag.to_string());
        }
    }
}

impl Logger for SharedLogger {
    fn add_scalar(&mut self, tag: &str, _value: f64, _frame: usize) {
        self.push(tag);
    }

    fn add_histogram(&mut self, tag: &str, _values: &[f32], _frame: usize) {
        self.push(tag);
    }

    fn add_text(&mut self, tag: &str, _text: &str, _frame: usize) {
        self.push(tag);
    }
}
