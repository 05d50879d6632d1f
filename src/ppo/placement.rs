use burn::prelude::*;

/// A module together with the device it currently lives on.
///
/// Acting and training may use different devices; the model is only moved
/// when the requested device differs from the current one.
#[derive(Debug, Clone)]
pub struct PlacedModel<B: Backend, M: Module<B>> {
    model: M,
    device: B::Device,
}

impl<B: Backend, M: Module<B>> PlacedModel<B, M> {
    pub fn new(model: M, device: B::Device) -> Self {
        let model = model.fork(&device);
        Self { model, device }
    }

    /// Moves the model to `device` unless it is already there. Returns whether
    /// a transfer happened.
    pub fn ensure_placement(&mut self, device: &B::Device) -> bool {
        if &self.device == device {
            return false;
        }
        log::debug!("moving model from {:?} to {:?}", self.device, device);
        self.model = self.model.clone().fork(device);
        self.device = device.clone();
        true
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Replaces the model with `f(model)`, e.g. after an optimizer step.
    pub fn update(&mut self, f: impl FnOnce(M) -> M) {
        self.model = f(self.model.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppo::{ActionDistribution, MlpActorCritic};
    use burn::backend::{Autodiff, NdArray};

    type B = Autodiff<NdArray<f32>>;

    #[test]
    fn placement_is_idempotent() {
        let device = <B as Backend>::Device::default();
        let model = MlpActorCritic::<B>::new(2, ActionDistribution::Bernoulli { n: 1 }, 4, &device);
        let mut placed = PlacedModel::new(model, device.clone());
        assert!(!placed.ensure_placement(&device));
        assert!(!placed.ensure_placement(&device));
        assert_eq!(placed.device(), &device);
    }

    #[test]
    #[ignore] // Requires WGPU hardware
    fn model_follows_the_requested_device() {
        use burn::backend::wgpu::{Wgpu, WgpuDevice};
        type G = Autodiff<Wgpu>;

        let train = WgpuDevice::DefaultDevice;
        let eval = WgpuDevice::Cpu;
        let model = MlpActorCritic::<G>::new(2, ActionDistribution::Bernoulli { n: 1 }, 4, &train);
        let mut placed = PlacedModel::new(model, train.clone());

        assert!(placed.ensure_placement(&eval));
        assert_eq!(placed.device(), &eval);
        assert!(!placed.ensure_placement(&eval));
        assert!(placed.ensure_placement(&train));
        assert_eq!(placed.device(), &train);
    }
}
