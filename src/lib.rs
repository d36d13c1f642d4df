#![doc = include_str!("../README.md")]

// private mods (will be partly re-exported)
mod engine;
mod error;
mod mapping;
mod output;
mod particle;
mod shaper;
mod voice;

// public, flat re-exports
pub use error::Error;

pub use particle::{CollisionEvent, Particle, ParticleId, ParticleTable, SpaceBounds};

pub use shaper::{shape_gain, GainShaperParameters, ShapedGain};

pub use mapping::{filter_q, panning, FrequencyRange, GrainTargets};

pub use engine::{
    pool::{Grain, GrainId, GrainNodes, GrainPool},
    EngineCore, EngineSettings, GrainEngine, GrainRequest, GrainShaping, PolicySettings,
    TickContext, TriggerMode, TriggerPolicy,
};

pub use output::{
    offline::OfflineOutput, AudioOutput, Completion, CompletionNotifier, LivenessToken, NodeId,
    NodeParam, ParamRamp, SourceOptions,
};

#[cfg(feature = "wav-output")]
pub use output::offline::write_wav_file;

pub use voice::{loader::DecodeTask, LoadStatus, Voice, VoiceConfig, VoiceTelemetry};

// public mods
pub mod parameter;
pub mod utils;

pub mod policies {
    //! Grain trigger policy implementations.

    pub use super::engine::{
        collision::{CollisionPolicy, CollisionSettings},
        looping::{LoopDirection, LoopPolicy, LoopSettings},
    };
}
