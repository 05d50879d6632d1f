pub mod agent;
pub mod augmentation;
pub mod checkpoint;
pub mod config;
pub mod decay;
pub mod distribution;
pub mod gae;
pub mod hierarchical;
pub mod loss;
pub mod model;
pub mod placement;
pub mod qrnn;
pub mod rollout_buffer;
pub mod training;

pub use agent::Ppo;
pub use augmentation::{NoAugmentation, TrainingAugmentation, UpdateContext};
pub use config::{Constraint, PpoConfig};
pub use decay::{DecayConfig, DecayKind, ValueDecay};
pub use distribution::ActionDistribution;
pub use hierarchical::HierarchicalQrnnActorCritic;
pub use model::{ActorCritic, ActorOutput, HeadOutput, MlpActorCritic, UpperOutput};
pub use qrnn::{QrnnActorCritic, QrnnStack};
pub use rollout_buffer::Sample;
pub use training::TrainingData;
