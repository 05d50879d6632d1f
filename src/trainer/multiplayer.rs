use rand::{SeedableRng, rngs::StdRng, seq::index};
use serde::{Deserialize, Serialize};

use crate::burnrl::base::{Agent, EnvLogger, EpisodeInfo, Logger, VecEnvironment};
use crate::error::{ConfigError, PpoError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub population_size: usize,
    /// Player slots of the environment, filled by distinct agents.
    pub num_players: usize,
    /// Frames between two draws of the active agents.
    pub selection_train_frames: usize,
    pub log_interval: usize,
    pub seed: u64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            population_size: 2,
            num_players: 2,
            selection_train_frames: 100_000,
            log_interval: 10_000,
            seed: 0,
        }
    }
}

impl PopulationConfig {
    pub fn new(population_size: usize, num_players: usize) -> Self {
        Self {
            population_size,
            num_players,
            ..Default::default()
        }
    }

    pub fn with_selection_train_frames(mut self, selection_train_frames: usize) -> Self {
        self.selection_train_frames = selection_train_frames;
        self
    }

    pub fn with_log_interval(mut self, log_interval: usize) -> Self {
        self.log_interval = log_interval;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("num_players", self.num_players),
            ("selection_train_frames", self.selection_train_frames),
            ("log_interval", self.log_interval),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::InvalidCount { field, value });
            }
        }
        if self.population_size < self.num_players {
            return Err(ConfigError::PopulationTooSmall {
                population: self.population_size,
                players: self.num_players,
            });
        }
        Ok(())
    }
}

/// Trains a population of agents that take turns in the player slots of one
/// multiplayer environment.
///
/// Each agent acts for every environment instance of the slot it occupies,
/// so all agents must have `num_actors` equal to the environment size.
pub struct MultiplayerTrainer<E: VecEnvironment, A: Agent> {
    config: PopulationConfig,
    env: E,
    population: Vec<A>,
    env_loggers: Vec<EnvLogger>,
    /// Population index of the agent in each player slot.
    active: Vec<usize>,
    states: Vec<f32>,
    observation_len: usize,
    action_len: usize,
    frame: usize,
    last_selection_frame: usize,
    rng: StdRng,
}

impl<E: VecEnvironment, A: Agent> MultiplayerTrainer<E, A> {
    /// `make_logger` builds the metric logger of population member `i`.
    pub fn new(
        config: PopulationConfig,
        mut env: E,
        population: Vec<A>,
        mut make_logger: impl FnMut(usize) -> Box<dyn Logger>,
    ) -> Result<Self, PpoError> {
        config.validate()?;
        if population.len() != config.population_size {
            return Err(PpoError::shape(
                "population",
                config.population_size,
                population.len(),
            ));
        }
        if env.num_players() != config.num_players {
            return Err(PpoError::shape(
                "environment players",
                config.num_players,
                env.num_players(),
            ));
        }
        let num_actors = population[0].num_actors();
        if let Some(agent) = population.iter().find(|a| a.num_actors() != num_actors) {
            return Err(PpoError::shape("agent actors", num_actors, agent.num_actors()));
        }
        if env.num_envs() != num_actors {
            env.set_num_envs(num_actors);
        }

        let observation_len = env.observation_space().flat_len();
        let action_len = env.action_space().flat_len();
        let states = env.reset()?;
        let expected = num_actors * config.num_players * observation_len;
        if states.len() != expected {
            return Err(PpoError::shape("reset states", expected, states.len()));
        }

        let env_loggers = (0..config.population_size)
            .map(|i| EnvLogger::new(make_logger(i), num_actors, config.log_interval))
            .collect();
        let mut trainer = Self {
            rng: StdRng::seed_from_u64(config.seed),
            env,
            population,
            env_loggers,
            active: Vec::new(),
            states,
            observation_len,
            action_len,
            frame: 0,
            last_selection_frame: 0,
            config,
        };
        trainer.select_players();
        Ok(trainer)
    }

    pub fn population(&self) -> &[A] {
        &self.population
    }

    /// Population indices currently occupying the player slots.
    pub fn active(&self) -> &[usize] {
        &self.active
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Drops the in-flight samples of the current players and draws a fresh
    /// set of distinct agents for the slots.
    fn select_players(&mut self) {
        self.drop_collected_steps();
        self.active = index::sample(
            &mut self.rng,
            self.config.population_size,
            self.config.num_players,
        )
        .into_vec();
        self.last_selection_frame = self.frame;
        log::info!("frame {}: players {:?}", self.frame, self.active);
    }

    pub fn drop_collected_steps(&mut self) {
        for &i in &self.active {
            self.population[i].drop_collected_steps();
        }
    }

    /// Rows of `player` out of a `[num_envs, num_players, width]` buffer.
    fn player_rows<T: Copy>(values: &[T], num_envs: usize, num_players: usize, player: usize) -> Vec<T> {
        let width = values.len() / (num_envs * num_players).max(1);
        (0..num_envs)
            .flat_map(|e| {
                let start = (e * num_players + player) * width;
                values[start..start + width].iter().copied()
            })
            .collect()
    }

    pub fn step(&mut self, force_log: bool) -> Result<(), PpoError> {
        if self.frame >= self.last_selection_frame + self.config.selection_train_frames {
            self.select_players();
        }

        let num_envs = self.env.num_envs();
        let num_players = self.config.num_players;
        let mut actions = vec![0.0; num_envs * num_players * self.action_len];
        for (player, &agent_idx) in self.active.iter().enumerate() {
            let agent = &mut self.population[agent_idx];
            if force_log {
                agent.force_log();
            }
            let states = Self::player_rows(&self.states, num_envs, num_players, player);
            let player_actions = agent.eval(&states)?;
            if player_actions.len() != num_envs * self.action_len {
                return Err(PpoError::shape(
                    "player actions",
                    num_envs * self.action_len,
                    player_actions.len(),
                ));
            }
            for (e, row) in player_actions.chunks(self.action_len).enumerate() {
                let start = (e * num_players + player) * self.action_len;
                actions[start..start + self.action_len].copy_from_slice(row);
            }
        }

        let result = self.env.step(&actions)?;
        result.validate(num_envs, num_players, self.observation_len)?;
        for (player, &agent_idx) in self.active.iter().enumerate() {
            let agent = &mut self.population[agent_idx];
            agent.reward(&Self::player_rows(&result.rewards, num_envs, num_players, player));
            agent.finish_episodes(&result.dones);
            let infos: Vec<Option<EpisodeInfo>> =
                Self::player_rows(&result.infos, num_envs, num_players, player);
            self.env_loggers[agent_idx].step(&infos, force_log);
        }
        self.states = result.states;
        self.frame += num_envs;
        Ok(())
    }

    /// Steps until `max_frames` environment frames have passed, forcing a
    /// log on the last step.
    pub fn train(&mut self, max_frames: usize) -> Result<(), PpoError> {
        while self.frame < max_frames {
            let last = self.frame + self.env.num_envs() >= max_frames;
            self.step(last)?;
        }
        Ok(())
    }
}
