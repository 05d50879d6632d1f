use std::path::{Path, PathBuf};

use burn::{
    prelude::*,
    record::{BinFileRecorder, FullPrecisionSettings},
};

use crate::error::PpoError;

/// `{folder}/{tag}.bin`, or `{folder}/{tag}_{frame}.bin` for intermediate
/// snapshots.
pub fn checkpoint_path(folder: impl AsRef<Path>, tag: &str, frame: Option<usize>) -> PathBuf {
    let name = match frame {
        Some(frame) => format!("{tag}_{frame}.bin"),
        None => format!("{tag}.bin"),
    };
    folder.as_ref().join(name)
}

pub fn save_model<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<(), PpoError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| PpoError::Checkpoint(e.to_string()))
}

pub fn load_model<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<M, PpoError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(path, &recorder, device)
        .map_err(|e| PpoError::Checkpoint(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppo::{ActionDistribution, ActorCritic, MlpActorCritic};
    use crate::utils::tensor_to_vec;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn path_template() {
        assert_eq!(
            checkpoint_path("models", "ppo_model", None),
            PathBuf::from("models/ppo_model.bin")
        );
        assert_eq!(
            checkpoint_path("models", "ppo_model", Some(4096)),
            PathBuf::from("models/ppo_model_4096.bin")
        );
    }

    #[test]
    fn saved_weights_load_into_fresh_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = checkpoint_path(dir.path(), "m", Some(1));
        let device = Default::default();
        let pd = ActionDistribution::DiagGaussian { dim: 1 };

        let saved = MlpActorCritic::<B>::new(3, pd, 8, &device);
        save_model(&saved, &path).unwrap();
        assert!(path.exists());

        let loaded = load_model(MlpActorCritic::<B>::new(3, pd, 8, &device), &path, &device).unwrap();
        let states = Tensor::<B, 3>::ones([1, 2, 3], &device);
        let resets = Tensor::<B, 2>::zeros([1, 2], &device);
        let (a, _) = saved.forward(states.clone(), None, resets.clone());
        let (b, _) = loaded.forward(states, None, resets);
        assert_eq!(
            tensor_to_vec(a.into_acting().state_values).unwrap(),
            tensor_to_vec(b.into_acting().state_values).unwrap()
        );
    }

    #[test]
    fn missing_checkpoint_is_an_error() {
        let device = Default::default();
        let pd = ActionDistribution::Bernoulli { n: 1 };
        let model = MlpActorCritic::<B>::new(1, pd, 2, &device);
        let err = load_model(model, Path::new("does/not/exist.bin"), &device).unwrap_err();
        assert!(matches!(err, PpoError::Checkpoint(_)));
    }
}
