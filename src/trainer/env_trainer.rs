use crate::burnrl::base::{Agent, EnvLogger, Logger, VecEnvironment};
use crate::error::PpoError;

/// Runs one agent against a single-player vectorized environment.
///
/// The environment is expected to reset finished instances on its own, so
/// the states returned by a step are always the next observations to act on.
pub struct EnvTrainer<E: VecEnvironment, A: Agent> {
    env: E,
    agent: A,
    env_logger: EnvLogger,
    states: Vec<f32>,
    observation_len: usize,
}

impl<E: VecEnvironment, A: Agent> EnvTrainer<E, A> {
    /// Resizes the environment to the agent's actor count and resets it.
    pub fn new(mut env: E, agent: A, logger: Box<dyn Logger>, log_interval: usize) -> Result<Self, PpoError> {
        if env.num_players() != 1 {
            return Err(PpoError::shape("environment players", 1, env.num_players()));
        }
        if env.num_envs() != agent.num_actors() {
            log::debug!(
                "resizing environment from {} to {} instances",
                env.num_envs(),
                agent.num_actors()
            );
            env.set_num_envs(agent.num_actors());
        }
        let observation_len = env.observation_space().flat_len();
        let states = env.reset()?;
        if states.len() != env.num_envs() * observation_len {
            return Err(PpoError::shape(
                "reset states",
                env.num_envs() * observation_len,
                states.len(),
            ));
        }
        Ok(Self {
            env_logger: EnvLogger::new(logger, agent.num_actors(), log_interval),
            env,
            agent,
            states,
            observation_len,
        })
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut A {
        &mut self.agent
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn frame(&self) -> usize {
        self.agent.frame()
    }

    /// One environment tick: act, step, report the outcome. Training runs
    /// inside the agent when its horizon fills up.
    pub fn step(&mut self, force_log: bool) -> Result<(), PpoError> {
        if force_log {
            self.agent.force_log();
        }
        let actions = self.agent.eval(&self.states)?;
        let result = self.env.step(&actions)?;
        result.validate(self.env.num_envs(), 1, self.observation_len)?;

        self.agent.reward(&result.rewards);
        self.agent.finish_episodes(&result.dones);
        self.env_logger.step(&result.infos, force_log);
        self.states = result.states;
        Ok(())
    }

    /// Steps until the agent has seen `max_frames` frames. The last step
    /// forces a log so the final metrics are always written.
    pub fn train(&mut self, max_frames: usize) -> Result<(), PpoError> {
        let num_envs = self.agent.num_actors();
        while self.agent.frame() < max_frames {
            let last = self.agent.frame() + num_envs >= max_frames;
            self.step(last)?;
        }
        Ok(())
    }

    pub fn drop_collected_steps(&mut self) {
        self.agent.drop_collected_steps();
    }

    pub fn into_agent(self) -> A {
        self.agent
    }
}
