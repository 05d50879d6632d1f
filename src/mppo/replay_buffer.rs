use rand::Rng;

use crate::error::PpoError;

/// Time-major trajectories: element `[t, r]` of a `[horizon, rollouts, ...]`
/// array lives at `(t * rollouts + r) * width`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectories {
    pub horizon: usize,
    pub rollouts: usize,
    pub states: Vec<f32>,
    pub actions: Vec<f32>,
    pub rewards: Vec<f32>,
    pub dones: Vec<f32>,
}

impl Trajectories {
    pub fn state_len(&self) -> usize {
        self.states.len() / (self.horizon * self.rollouts).max(1)
    }

    pub fn action_len(&self) -> usize {
        self.actions.len() / (self.horizon * self.rollouts).max(1)
    }

    fn validate(&self) -> Result<(), PpoError> {
        let n = self.horizon * self.rollouts;
        if n == 0 {
            return Err(PpoError::shape("replay push", "non-empty trajectories", 0));
        }
        if self.rewards.len() != n || self.dones.len() != n {
            return Err(PpoError::shape(
                "replay rewards/dones",
                n,
                format!("{}/{}", self.rewards.len(), self.dones.len()),
            ));
        }
        if self.states.len() % n != 0 || self.actions.len() % n != 0 {
            return Err(PpoError::shape(
                "replay states/actions",
                format!("multiples of {n}"),
                format!("{}/{}", self.states.len(), self.actions.len()),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    actors: usize,
    state_len: usize,
    action_len: usize,
}

/// Circular store of `capacity` time slots for a fixed set of actors.
///
/// Storage is allocated on the first push, when the actor count and row
/// widths become known.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    capacity: usize,
    layout: Option<Layout>,
    states: Vec<f32>,
    actions: Vec<f32>,
    rewards: Vec<f32>,
    dones: Vec<f32>,
    index: usize,
    full_loop: bool,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            layout: None,
            states: Vec::new(),
            actions: Vec::new(),
            rewards: Vec::new(),
            dones: Vec::new(),
            index: 0,
            full_loop: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether writes have wrapped around at least once.
    pub fn full_loop(&self) -> bool {
        self.full_loop
    }

    /// Number of valid time slots.
    pub fn len(&self) -> usize {
        if self.full_loop {
            self.capacity
        } else {
            self.index
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `[horizon, actors]` steps, wrapping to the start when the end
    /// of the buffer is reached. Shapes are checked before anything is
    /// written.
    pub fn push(&mut self, data: &Trajectories) -> Result<(), PpoError> {
        data.validate()?;
        if data.horizon > self.capacity {
            return Err(PpoError::shape("replay push length", self.capacity, data.horizon));
        }
        let layout = Layout {
            actors: data.rollouts,
            state_len: data.state_len(),
            action_len: data.action_len(),
        };
        match self.layout {
            Some(existing) if existing != layout => {
                return Err(PpoError::shape(
                    "replay layout",
                    format!("{existing:?}"),
                    format!("{layout:?}"),
                ));
            }
            Some(_) => {}
            None => {
                let slots = self.capacity * layout.actors;
                self.states = vec![0.0; slots * layout.state_len];
                self.actions = vec![0.0; slots * layout.action_len];
                self.rewards = vec![0.0; slots];
                self.dones = vec![0.0; slots];
                self.layout = Some(layout);
            }
        }

        if self.index + data.horizon <= self.capacity {
            self.write(data, 0..data.horizon, layout);
        } else {
            let head = self.capacity - self.index;
            self.write(data, 0..head, layout);
            self.index = 0;
            self.write(data, head..data.horizon, layout);
            self.full_loop = true;
        }
        Ok(())
    }

    fn write(&mut self, data: &Trajectories, steps: std::ops::Range<usize>, layout: Layout) {
        let a = layout.actors;
        let dst = self.index * a..(self.index + steps.len()) * a;
        let src = steps.start * a..steps.end * a;
        let copy = |dst_buf: &mut [f32], src_buf: &[f32], width: usize| {
            dst_buf[dst.start * width..dst.end * width]
                .copy_from_slice(&src_buf[src.start * width..src.end * width]);
        };
        copy(&mut self.states, &data.states, layout.state_len);
        copy(&mut self.actions, &data.actions, layout.action_len);
        copy(&mut self.rewards, &data.rewards, 1);
        copy(&mut self.dones, &data.dones, 1);
        self.index += steps.len();
    }

    /// Copies `rollouts` random windows of `horizon` consecutive steps, each
    /// taken from one actor. Windows start in `[0, len - horizon)`.
    pub fn sample<R: Rng>(
        &self,
        rng: &mut R,
        rollouts: usize,
        horizon: usize,
    ) -> Result<Trajectories, PpoError> {
        let Some(layout) = self.layout else {
            return Err(PpoError::InsufficientData("replay buffer is empty".to_string()));
        };
        let valid = self.len();
        if horizon == 0 || valid <= horizon {
            return Err(PpoError::InsufficientData(format!(
                "replay buffer holds {valid} steps, need more than {horizon}"
            )));
        }

        let mut out = Trajectories {
            horizon,
            rollouts,
            states: vec![0.0; horizon * rollouts * layout.state_len],
            actions: vec![0.0; horizon * rollouts * layout.action_len],
            rewards: vec![0.0; horizon * rollouts],
            dones: vec![0.0; horizon * rollouts],
        };
        for r in 0..rollouts {
            let actor = rng.random_range(0..layout.actors);
            let start = rng.random_range(0..valid - horizon);
            for t in 0..horizon {
                let src = (start + t) * layout.actors + actor;
                let dst = t * rollouts + r;
                let (s, w) = (layout.state_len, layout.action_len);
                out.states[dst * s..(dst + 1) * s]
                    .copy_from_slice(&self.states[src * s..(src + 1) * s]);
                out.actions[dst * w..(dst + 1) * w]
                    .copy_from_slice(&self.actions[src * w..(src + 1) * w]);
                out.rewards[dst] = self.rewards[src];
                out.dones[dst] = self.dones[src];
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    /// `[horizon, actors]` steps whose every value encodes its step index,
    /// offset by `base`.
    fn steps(base: usize, horizon: usize, actors: usize) -> Trajectories {
        let values: Vec<f32> = (0..horizon)
            .flat_map(|t| std::iter::repeat_n((base + t + 1) as f32, actors))
            .collect();
        Trajectories {
            horizon,
            rollouts: actors,
            states: values.iter().flat_map(|&v| [v, -v]).collect(),
            actions: values.clone(),
            rewards: values.clone(),
            dones: vec![0.0; horizon * actors],
        }
    }

    #[test]
    fn samples_only_pushed_values_before_wrap() {
        let mut buffer = ReplayBuffer::new(100);
        buffer.push(&steps(0, 10, 3)).unwrap();
        assert_eq!(buffer.len(), 10);
        assert!(!buffer.full_loop());

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let batch = buffer.sample(&mut rng, 4, 5).unwrap();
            assert!(batch.rewards.iter().all(|&r| (1.0..=10.0).contains(&r)));
            assert_eq!(batch.states.len(), 5 * 4 * 2);
            // windows are consecutive steps of one actor
            for r in 0..4 {
                for t in 1..5 {
                    let prev = batch.rewards[(t - 1) * 4 + r];
                    assert_eq!(batch.rewards[t * 4 + r], prev + 1.0);
                }
            }
        }
    }

    #[test]
    fn overflowing_push_wraps_and_reports_capacity() {
        let mut buffer = ReplayBuffer::new(8);
        buffer.push(&steps(0, 6, 2)).unwrap();
        buffer.push(&steps(6, 4, 2)).unwrap();
        assert!(buffer.full_loop());
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.index, 2);

        // slots 6 and 7 hold steps 7 and 8, slots 0 and 1 hold steps 9 and 10
        assert_eq!(&buffer.rewards[12..16], &[7.0, 7.0, 8.0, 8.0]);
        assert_eq!(&buffer.rewards[0..4], &[9.0, 9.0, 10.0, 10.0]);
        assert_eq!(&buffer.states[0..4], &[9.0, -9.0, 9.0, -9.0]);
    }

    #[test]
    fn wrapped_samples_never_read_padding() {
        let mut buffer = ReplayBuffer::new(8);
        buffer.push(&steps(0, 6, 1)).unwrap();
        buffer.push(&steps(6, 6, 1)).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let batch = buffer.sample(&mut rng, 2, 3).unwrap();
            assert!(batch.rewards.iter().all(|&r| r > 0.0));
        }
    }

    #[test]
    fn too_little_data_is_reported() {
        let mut buffer = ReplayBuffer::new(16);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            buffer.sample(&mut rng, 1, 4),
            Err(PpoError::InsufficientData(_))
        ));
        buffer.push(&steps(0, 4, 1)).unwrap();
        assert!(matches!(
            buffer.sample(&mut rng, 1, 4),
            Err(PpoError::InsufficientData(_))
        ));
    }

    #[test]
    fn mismatched_shapes_are_rejected_before_writing() {
        let mut buffer = ReplayBuffer::new(16);
        let mut bad = steps(0, 4, 2);
        bad.dones.pop();
        assert!(matches!(buffer.push(&bad), Err(PpoError::ShapeMismatch { .. })));
        assert!(buffer.is_empty());

        buffer.push(&steps(0, 4, 2)).unwrap();
        assert!(buffer.push(&steps(0, 4, 3)).is_err());
        assert!(buffer.push(&steps(0, 17, 2)).is_err());
        assert_eq!(buffer.len(), 4);
    }
}
