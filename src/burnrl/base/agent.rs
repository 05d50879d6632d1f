use crate::error::PpoError;

/// A learning agent driven one environment tick at a time.
///
/// Each tick the driver calls [`eval`](Agent::eval) with the current
/// observations of all actors, steps the environment with the returned
/// actions, then reports the outcome through [`reward`](Agent::reward) and
/// [`finish_episodes`](Agent::finish_episodes). The outcome is attached to
/// the transition on the next `eval` call.
pub trait Agent {
    /// Number of parallel environment instances this agent acts for.
    fn num_actors(&self) -> usize;

    /// Frames seen so far (one frame per actor per `eval`).
    fn frame(&self) -> usize;

    /// Chooses actions for `[num_actors, observation_len]` states and returns
    /// them as `[num_actors, action_len]`. Training runs inline when due.
    fn eval(&mut self, states: &[f32]) -> Result<Vec<f32>, PpoError>;

    fn reward(&mut self, rewards: &[f32]);

    fn finish_episodes(&mut self, dones: &[bool]);

    /// Forces the next training pass triggered by this agent to be logged.
    fn force_log(&mut self) {}

    /// Discards uncommitted sample data so the next training window starts
    /// fresh.
    fn drop_collected_steps(&mut self);
}
