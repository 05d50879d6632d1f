use crate::error::PpoError;

/// One rollout horizon of collected steps, kept on the host.
///
/// Every step stores the states the agent saw, the policy parameters and
/// value it predicted, the action it took and whether recurrent memory was
/// reset. The reward and done flag of a transition are only known on the
/// following step, so they are appended one step late: once collection stops,
/// `rewards.len() == dones.len() == states.len() - 1` and the trailing state
/// only serves to bootstrap values.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub states: Vec<Vec<f32>>,
    pub probs: Vec<Vec<f32>>,
    pub values: Vec<Vec<f32>>,
    pub actions: Vec<Vec<f32>>,
    pub resets: Vec<Vec<bool>>,
    pub rewards: Vec<Vec<f32>>,
    pub dones: Vec<Vec<bool>>,
    /// Upper-level predictions of a hierarchical model, one per state.
    pub upper: Vec<UpperStep>,
    /// Recurrent memory fed into the first recorded step.
    pub initial_memory: Option<Vec<f32>>,
}

/// Upper-level parameters, value and chosen delta of one step of all actors.
#[derive(Debug, Clone, PartialEq)]
pub struct UpperStep {
    pub probs: Vec<f32>,
    pub values: Vec<f32>,
    pub actions: Vec<f32>,
}

/// What the agent produced for one step of all actors.
#[derive(Debug, Clone)]
pub struct SampleStep {
    pub states: Vec<f32>,
    pub probs: Vec<f32>,
    pub values: Vec<f32>,
    pub actions: Vec<f32>,
    pub resets: Vec<bool>,
    pub memory: Option<Vec<f32>>,
    pub upper: Option<UpperStep>,
}

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step. `rewards` and `dones` belong to the transition that
    /// led into `step` and are dropped for the first step of a sample.
    pub fn append(
        &mut self,
        step: SampleStep,
        rewards: &[f32],
        dones: &[bool],
    ) -> Result<(), PpoError> {
        if self.states.is_empty() {
            self.initial_memory = step.memory;
        } else {
            let num_actors = step.values.len();
            if rewards.len() != num_actors || dones.len() != num_actors {
                return Err(PpoError::shape(
                    "sample rewards/dones",
                    num_actors,
                    format!("{}/{}", rewards.len(), dones.len()),
                ));
            }
            self.rewards.push(rewards.to_vec());
            self.dones.push(dones.to_vec());
        }
        self.states.push(step.states);
        self.probs.push(step.probs);
        self.values.push(step.values);
        self.actions.push(step.actions);
        self.resets.push(step.resets);
        self.upper.extend(step.upper);
        Ok(())
    }

    /// Completed transitions.
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
