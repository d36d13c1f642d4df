//! Boundary to the audio output collaborator, which renders grain node chains.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::Sender;

use crate::{
    engine::{pool::GrainId, TriggerMode},
    utils::sample::DecodedSample,
};

// -------------------------------------------------------------------------------------------------

pub mod offline;

#[cfg(test)]
pub(crate) mod testing;

// -------------------------------------------------------------------------------------------------

/// Identifies a node within an [`AudioOutput`].
pub type NodeId = usize;

// -------------------------------------------------------------------------------------------------

/// Automatable parameters of output nodes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
pub enum NodeParam {
    /// Linear gain of a gain node.
    Gain,
    /// Panning of a pan node in range `-1..=1`.
    Pan,
    /// Band-pass center frequency of a source in Hz.
    Frequency,
    /// Band-pass Q of a source.
    Q,
}

// -------------------------------------------------------------------------------------------------

/// A scheduled parameter change. Times are absolute output times in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamRamp {
    /// Step to the value at the given time.
    Set { value: f32, at: f64 },
    /// Ramp linearly from the previous scheduled value to the value, reaching it at `end`.
    Linear { value: f32, end: f64 },
    /// Exponentially approach the value, starting at `start`, with the given time constant in
    /// seconds.
    Target {
        value: f32,
        start: f64,
        time_constant: f32,
    },
}

impl ParamRamp {
    /// Time at which the ramp's event is scheduled.
    pub fn time(&self) -> f64 {
        match *self {
            ParamRamp::Set { at, .. } => at,
            ParamRamp::Linear { end, .. } => end,
            ParamRamp::Target { start, .. } => start,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Playback options of a filtered sample playback source.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// The sample to play.
    pub buffer: Arc<DecodedSample>,
    /// Output time at which playback starts.
    pub start: f64,
    /// Start offset within the sample in seconds.
    pub offset: f64,
    /// Playback duration in seconds.
    pub duration: f64,
    /// Playback rate factor. Negative rates play the sample backwards.
    pub playback_rate: f64,
    /// Initial band-pass center frequency in Hz.
    pub frequency: f32,
    /// Initial band-pass Q.
    pub q: f32,
}

// -------------------------------------------------------------------------------------------------

/// Cancellation token of a grain, shared with pending completion notifications.
///
/// Once killed, any later arriving completion notification which carries this token must be
/// ignored.
#[derive(Debug, Clone)]
pub struct LivenessToken(Arc<AtomicBool>);

impl LivenessToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn kill(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for LivenessToken {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

/// Completion notification of a grain's playback source.
#[derive(Debug, Clone)]
pub struct Completion {
    pub mode: TriggerMode,
    pub grain: GrainId,
    pub token: LivenessToken,
}

/// One-shot sender of a [`Completion`], registered at an output via [`AudioOutput::on_complete`].
#[derive(Debug)]
pub struct CompletionNotifier {
    sender: Sender<Completion>,
    completion: Completion,
}

impl CompletionNotifier {
    pub fn new(sender: Sender<Completion>, completion: Completion) -> Self {
        Self { sender, completion }
    }

    /// Is the grain this notifier belongs to still alive?
    pub fn is_live(&self) -> bool {
        self.completion.token.is_live()
    }

    /// Deliver the notification. Consumes the notifier.
    pub fn notify(self) {
        if let Err(err) = self.sender.send(self.completion) {
            // receiver is gone: the voice got dropped before the grain finished
            log::trace!("Dropping grain completion: {err}");
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Audio output collaborator: creates and automates the node chains grains play through.
///
/// A grain's chain is `source -> gain -> pan -> destination`, where destination usually is
/// a voice's mix bus gain node. Node ids of released or finished nodes must be ignored
/// silently by all functions.
pub trait AudioOutput {
    /// Output sample rate.
    fn sample_rate(&self) -> u32;
    /// Current output time in seconds.
    fn current_time(&self) -> f64;
    /// True when the output device is available and running.
    fn is_running(&self) -> bool;

    /// Create a gain node, routing to the given destination or to the main output.
    fn create_gain_node(&mut self, gain: f32, destination: Option<NodeId>) -> NodeId;
    /// Create a stereo panning node, routing to the given destination.
    fn create_pan_node(&mut self, pan: f32, destination: NodeId) -> NodeId;
    /// Create a band-pass filtered sample playback source, routing to the given destination.
    fn create_source(&mut self, options: SourceOptions, destination: NodeId) -> NodeId;

    /// Schedule a change of a node's parameter.
    fn schedule(&mut self, node: NodeId, param: NodeParam, ramp: ParamRamp);
    /// Stop a source at the given time.
    fn stop(&mut self, source: NodeId, at: f64);
    /// Disconnect and free a node at the given time.
    fn release(&mut self, node: NodeId, at: f64);

    /// Register a one-shot notification, which fires when the source finished playing or got
    /// stopped.
    fn on_complete(&mut self, source: NodeId, notifier: CompletionNotifier);
}

// -------------------------------------------------------------------------------------------------
