mod common;

use burn::backend::{Autodiff, NdArray, ndarray::NdArrayDevice};
use burn::module::AutodiffModule;
use burn::tensor::Tensor;
use mppo::burnrl::base::{Agent, NoopLogger, Space, VecEnvironment};
use mppo::mppo::{WorldModelConfig, WorldModelTrainer};
use mppo::ppo::{
    ActionDistribution, ActorCritic, DecayConfig, HierarchicalQrnnActorCritic, MlpActorCritic, Ppo, PpoConfig,
    QrnnActorCritic,
};
use mppo::{ConfigError, PpoError};
use mppo::trainer::{EnvTrainer, MultiplayerTrainer, PopulationConfig};

use common::{SharedLogger, TargetEnv};

type B = Autodiff<NdArray<f32>>;

const ACTORS: usize = 4;
const HORIZON: usize = 8;

fn config() -> PpoConfig {
    PpoConfig::new()
        .with_num_actors(ACTORS)
        .with_horizon(HORIZON)
        .with_batch_size(16)
        .with_ppo_iters(2)
        .with_learning_rate(1e-3)
        .with_log_interval(1)
        .with_seed(11)
}

/// Frames needed for `passes` training passes: a pass runs once `horizon`
/// transitions are complete, which takes `horizon + 1` evaluations.
fn frames_for(passes: usize) -> usize {
    passes * (HORIZON + 1) * ACTORS
}

fn mlp_agent(env: &TargetEnv, config: PpoConfig) -> Result<Ppo<B, MlpActorCritic<B>>, PpoError> {
    let device = NdArrayDevice::default();
    let pd = ActionDistribution::from_space(env.action_space());
    let model = MlpActorCritic::new(env.observation_space().flat_len(), pd, 16, &device);
    Ppo::new(
        config,
        env.observation_space(),
        env.action_space(),
        model,
        device.clone(),
        device,
        Box::new(NoopLogger),
    )
}

#[test]
fn feed_forward_agent_trains_every_horizon() {
    let env = TargetEnv::discrete(1);
    let agent = mlp_agent(&env, config()).unwrap();
    let mut trainer = EnvTrainer::new(env, agent, Box::new(NoopLogger), 100).unwrap();

    trainer.train(frames_for(3)).unwrap();
    assert_eq!(trainer.agent().train_steps(), 3);
    assert_eq!(trainer.agent().frame(), frames_for(3));
    assert_eq!(trainer.env().num_envs(), ACTORS);
}

#[test]
fn continuous_actions_train() {
    let env = TargetEnv::new(Space::boxed([2]), ACTORS, 1, 4);
    let agent = mlp_agent(&env, config()).unwrap();
    assert_eq!(agent.pd(), ActionDistribution::DiagGaussian { dim: 2 });
    let mut trainer = EnvTrainer::new(env, agent, Box::new(NoopLogger), 100).unwrap();
    trainer.train(frames_for(2)).unwrap();
    assert_eq!(trainer.agent().train_steps(), 2);
}

#[test]
fn recurrent_agent_trains_on_whole_sequences() {
    let env = TargetEnv::discrete(ACTORS);
    let device = NdArrayDevice::default();
    let pd = ActionDistribution::from_space(env.action_space());
    let model = QrnnActorCritic::<B>::new(env.observation_space().flat_len(), pd, 8, 3, &device);
    assert_eq!(model.memory_size(), Some(24));
    let agent = Ppo::new(
        config(),
        env.observation_space(),
        env.action_space(),
        model,
        device.clone(),
        device,
        Box::new(NoopLogger),
    )
    .unwrap();
    let mut trainer = EnvTrainer::new(env, agent, Box::new(NoopLogger), 100).unwrap();
    trainer.train(frames_for(2)).unwrap();
    assert_eq!(trainer.agent().train_steps(), 2);
}

#[test]
fn hierarchical_agent_trains_both_levels() {
    let env = TargetEnv::discrete(ACTORS);
    let logger = SharedLogger::default();
    let device = NdArrayDevice::default();
    let pd = ActionDistribution::from_space(env.action_space());
    let model = HierarchicalQrnnActorCritic::<B>::new(env.observation_space().flat_len(), pd, 8, 2, &device);
    assert_eq!(model.upper_pd(), Some(ActionDistribution::Transaction { dim: 8 }));
    let agent = Ppo::new(
        config(),
        env.observation_space(),
        env.action_space(),
        model,
        device.clone(),
        device,
        Box::new(logger.clone()),
    )
    .unwrap();
    let mut trainer = EnvTrainer::new(env, agent, Box::new(NoopLogger), 100).unwrap();
    trainer.train(frames_for(2)).unwrap();

    assert_eq!(trainer.agent().train_steps(), 2);
    let tags = logger.tags();
    for tag in ["upper loss", "upper kl", "upper_head/log_std", "qrnn_upper.1.gates.weight"] {
        assert!(tags.iter().any(|t| t == tag), "missing {tag}");
    }
}

#[test]
fn training_pass_changes_the_policy() {
    let env = TargetEnv::discrete(ACTORS);
    let agent = mlp_agent(&env, config()).unwrap();
    let device = NdArrayDevice::default();
    let states = Tensor::<NdArray<f32>, 3>::ones([1, 2, 3], &device);
    let resets = Tensor::<NdArray<f32>, 2>::zeros([1, 2], &device);
    let predict = |model: &MlpActorCritic<B>| {
        let (out, _) = model.valid().forward(states.clone(), None, resets.clone());
        let out = out.into_acting();
        let mut values = out.probs.into_data().to_vec::<f32>().unwrap();
        values.extend(out.state_values.into_data().to_vec::<f32>().unwrap());
        values
    };

    let before = predict(agent.model());
    let mut trainer = EnvTrainer::new(env, agent, Box::new(NoopLogger), 100).unwrap();
    trainer.train(frames_for(1)).unwrap();
    assert_eq!(trainer.agent().train_steps(), 1);
    let after = predict(trainer.agent().model());

    assert_eq!(before.len(), after.len());
    assert!(before.iter().zip(&after).any(|(a, b)| a != b));
}

#[test]
fn decays_shrink_learning_rate_and_clip() {
    let env = TargetEnv::discrete(ACTORS);
    let end = frames_for(4);
    let agent = mlp_agent(
        &env,
        config()
            .with_lr_decay(DecayConfig::new(end))
            .with_clip_decay(DecayConfig::new(end)),
    )
    .unwrap();
    assert_eq!(agent.clip_mult(), 1.0);
    let mut trainer = EnvTrainer::new(env, agent, Box::new(NoopLogger), 100).unwrap();

    // schedules advance to the frame count at the start of each pass
    trainer.train(frames_for(1)).unwrap();
    let (lr, clip) = (trainer.agent().learning_rate(), trainer.agent().clip_mult());
    assert!((clip - 0.75).abs() < 1e-6, "{clip}");
    assert!((lr - 0.75e-3).abs() < 1e-9, "{lr}");

    trainer.train(frames_for(2)).unwrap();
    assert!(trainer.agent().clip_mult() < clip);
    assert!(trainer.agent().learning_rate() < lr);
    assert!((trainer.agent().clip_mult() - 0.5).abs() < 1e-6);
    assert_eq!(trainer.agent().entropy_mult(), 1.0);
}

#[test]
fn non_finite_rewards_stop_training() {
    let env = TargetEnv::discrete(ACTORS);
    let mut agent = mlp_agent(&env, config()).unwrap();
    let states = vec![0.5; ACTORS * 3];

    let mut result = Ok(Vec::new());
    for _ in 0..=HORIZON {
        result = agent.eval(&states);
        if result.is_err() {
            break;
        }
        agent.reward(&[f32::NAN; ACTORS]);
        agent.finish_episodes(&[false; ACTORS]);
    }
    assert!(matches!(result, Err(PpoError::NumericalDivergence { .. })));
    assert_eq!(agent.train_steps(), 0);
}

#[test]
fn training_pass_writes_metrics() {
    let env = TargetEnv::discrete(ACTORS);
    let logger = SharedLogger::default();
    let device = NdArrayDevice::default();
    let pd = ActionDistribution::from_space(env.action_space());
    let model = MlpActorCritic::<B>::new(3, pd, 16, &device);
    let agent = Ppo::new(
        config(),
        env.observation_space(),
        env.action_space(),
        model,
        device.clone(),
        device,
        Box::new(logger.clone()),
    )
    .unwrap();
    let mut trainer = EnvTrainer::new(env, agent, Box::new(NoopLogger), 100).unwrap();
    trainer.train(frames_for(1)).unwrap();

    let tags = logger.tags();
    for tag in ["PPO", "advantages", "returns", "learning rate", "kl", "loss clip"] {
        assert!(tags.iter().any(|t| t == tag), "missing {tag}");
    }
}

#[test]
fn checkpoints_are_written_and_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().to_string_lossy().to_string();
    let env = TargetEnv::discrete(ACTORS);
    let agent = mlp_agent(
        &env,
        config()
            .with_model_save(folder.clone(), 1)
            .with_model_save_tag("target"),
    )
    .unwrap();
    let mut trainer = EnvTrainer::new(env, agent, Box::new(NoopLogger), 100).unwrap();
    trainer.train(frames_for(1)).unwrap();

    let path = dir.path().join("target.bin");
    assert!(path.exists());

    let env = TargetEnv::discrete(ACTORS);
    let restored = mlp_agent(
        &env,
        config().with_model_init_path(path.to_string_lossy().to_string()),
    );
    assert!(restored.is_ok());

    let env = TargetEnv::discrete(ACTORS);
    let missing = mlp_agent(&env, config().with_model_init_path(folder + "/missing.bin"));
    assert!(matches!(missing, Err(PpoError::Checkpoint(_))));
}

#[test]
fn world_model_trains_once_replay_is_filled() {
    let env = TargetEnv::discrete(ACTORS);
    let logger = SharedLogger::default();
    let device = NdArrayDevice::default();
    let pd = ActionDistribution::from_space(env.action_space());
    let model = MlpActorCritic::<B>::new(3, pd, 16, &device);
    let world = WorldModelTrainer::<B>::new(
        WorldModelConfig::default()
            .with_replay_capacity(64)
            .with_train_iters(2)
            .with_train_rollouts(2)
            .with_train_horizon(4)
            .with_hidden_size(16),
        model.hidden_code_size(),
        pd,
        device.clone(),
    )
    .unwrap();
    let agent = Ppo::new(
        config(),
        env.observation_space(),
        env.action_space(),
        model,
        device.clone(),
        device,
        Box::new(logger.clone()),
    )
    .unwrap()
    .with_augmentation(Box::new(world))
    .unwrap();
    let mut trainer = EnvTrainer::new(env, agent, Box::new(NoopLogger), 100).unwrap();

    // the replay holds 8, 16, 24 steps after each pass; 16 steps make one
    // world-model pass, so it first trains on the third
    trainer.train(frames_for(2)).unwrap();
    assert!(!logger.tags().iter().any(|t| t == "world gen loss"));
    trainer.train(frames_for(3)).unwrap();
    let tags = logger.tags();
    for tag in ["world disc real loss", "world disc fake loss", "world gen loss"] {
        assert!(tags.iter().any(|t| t == tag), "missing {tag}");
    }
}

#[test]
fn population_shares_a_multiplayer_environment() {
    let players = 2;
    let population = (0..3)
        .map(|_| {
            let env = TargetEnv::new(Space::Discrete(2), ACTORS, players, 5);
            mlp_agent(&env, config())
        })
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let env = TargetEnv::new(Space::Discrete(2), ACTORS, players, 5);
    let mut trainer = MultiplayerTrainer::new(
        PopulationConfig::new(3, players)
            .with_selection_train_frames(2 * ACTORS)
            .with_log_interval(ACTORS),
        env,
        population,
        |_| Box::new(NoopLogger),
    )
    .unwrap();

    trainer.train(frames_for(2)).unwrap();
    assert_eq!(trainer.frame(), frames_for(2));
    let acted: usize = trainer.population().iter().map(|a| a.frame()).sum();
    assert_eq!(acted, players * frames_for(2));
}

#[test]
fn invalid_configuration_fails_before_training() {
    let env = TargetEnv::discrete(ACTORS);
    assert!(matches!(
        mlp_agent(&env, config().with_horizon(0)),
        Err(PpoError::Config(_))
    ));
    let pd = ActionDistribution::Categorical { n: 2 };
    let small_replay = WorldModelTrainer::<B>::new(
        WorldModelConfig::default().with_replay_capacity(10),
        16,
        pd,
        Default::default(),
    );
    assert!(matches!(small_replay, Err(PpoError::Config(_))));
}

#[test]
fn world_model_rejects_rollouts_longer_than_its_replay() {
    let env = TargetEnv::discrete(ACTORS);
    let device = NdArrayDevice::default();
    let pd = ActionDistribution::from_space(env.action_space());
    let world = WorldModelTrainer::<B>::new(
        WorldModelConfig::default()
            .with_replay_capacity(32)
            .with_train_iters(2)
            .with_train_rollouts(2)
            .with_train_horizon(4),
        16,
        pd,
        device,
    )
    .unwrap();
    let agent = mlp_agent(&env, config().with_horizon(40)).unwrap();
    let result = agent.with_augmentation(Box::new(world));
    assert!(matches!(
        result,
        Err(PpoError::Config(ConfigError::HorizonExceedsReplay {
            horizon: 40,
            capacity: 32
        }))
    ));
}
