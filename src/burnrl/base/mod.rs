pub mod agent;
pub mod environment;
pub mod logger;
mod space;

pub use agent::Agent;
pub use environment::{EnvError, EpisodeInfo, StepResult, VecEnvironment};
pub use logger::{ConsoleLogger, EnvLogger, HistogramSummary, JsonlLogger, Logger, NoopLogger};
pub use space::Space;
