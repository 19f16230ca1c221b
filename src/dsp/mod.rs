pub mod config;
pub mod controller;
pub mod engine;
pub mod gain;
pub mod noise_profile;
pub mod synthesis;
pub mod utils;
pub mod windower;

pub use config::{EngineConfig, NoiseReductionSettings};
pub use controller::{ControllerPhase, DualProfileController, ProfileChain};
pub use engine::{EngineSample, EngineSnapshot, NoiseReductionEngine, ProcessOutcome};
pub use gain::{DecisionDirectedGainEstimator, DecisionDirectedState};
pub use noise_profile::{NoiseProfile, NoiseProfileEstimator, ProfileUpdate};
pub use synthesis::OverlapAddSynthesizer;
pub use windower::FrameWindower;
