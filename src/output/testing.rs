//! Recording [`AudioOutput`] mock for tests.

use super::{AudioOutput, CompletionNotifier, NodeId, NodeParam, ParamRamp, SourceOptions};

// -------------------------------------------------------------------------------------------------

/// A recorded [`AudioOutput`] call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    CreateGain {
        node: NodeId,
        gain: f32,
        destination: Option<NodeId>,
    },
    CreatePan {
        node: NodeId,
        pan: f32,
        destination: NodeId,
    },
    CreateSource {
        node: NodeId,
        offset: f64,
        duration: f64,
        playback_rate: f64,
        frequency: f32,
        q: f32,
        destination: NodeId,
    },
    Schedule {
        node: NodeId,
        param: NodeParam,
        ramp: ParamRamp,
    },
    Stop {
        source: NodeId,
        at: f64,
    },
    Release {
        node: NodeId,
        at: f64,
    },
}

/// Records all calls, and holds back completion notifications until they are triggered
/// manually.
#[derive(Debug)]
pub(crate) struct RecordingOutput {
    pub time: f64,
    pub running: bool,
    pub calls: Vec<Call>,
    next_node: NodeId,
    notifiers: Vec<(NodeId, CompletionNotifier)>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self {
            time: 0.0,
            running: true,
            calls: Vec::new(),
            next_node: 1,
            notifiers: Vec::new(),
        }
    }

    /// Created sources, as `CreateSource` calls.
    pub fn sources(&self) -> Vec<&Call> {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::CreateSource { .. }))
            .collect()
    }

    /// All ramps which got scheduled for the given node and parameter.
    pub fn ramps(&self, node: NodeId, param: NodeParam) -> Vec<ParamRamp> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Schedule {
                    node: n,
                    param: p,
                    ramp,
                } if *n == node && *p == param => Some(*ramp),
                _ => None,
            })
            .collect()
    }

    pub fn is_released(&self, node: NodeId) -> bool {
        self.calls
            .iter()
            .any(|c| matches!(c, Call::Release { node: n, .. } if *n == node))
    }

    pub fn is_stopped(&self, source: NodeId) -> bool {
        self.calls
            .iter()
            .any(|c| matches!(c, Call::Stop { source: s, .. } if *s == source))
    }

    /// Number of completion notifications which did not fire yet.
    pub fn pending_completions(&self) -> usize {
        self.notifiers.len()
    }

    /// Fire all pending completion notifications.
    pub fn complete_all(&mut self) {
        for (_, notifier) in self.notifiers.drain(..) {
            notifier.notify();
        }
    }

    fn next_node(&mut self) -> NodeId {
        let node = self.next_node;
        self.next_node += 1;
        node
    }
}

impl AudioOutput for RecordingOutput {
    fn sample_rate(&self) -> u32 {
        48000
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn create_gain_node(&mut self, gain: f32, destination: Option<NodeId>) -> NodeId {
        let node = self.next_node();
        self.calls.push(Call::CreateGain {
            node,
            gain,
            destination,
        });
        node
    }

    fn create_pan_node(&mut self, pan: f32, destination: NodeId) -> NodeId {
        let node = self.next_node();
        self.calls.push(Call::CreatePan {
            node,
            pan,
            destination,
        });
        node
    }

    fn create_source(&mut self, options: SourceOptions, destination: NodeId) -> NodeId {
        let node = self.next_node();
        self.calls.push(Call::CreateSource {
            node,
            offset: options.offset,
            duration: options.duration,
            playback_rate: options.playback_rate,
            frequency: options.frequency,
            q: options.q,
            destination,
        });
        node
    }

    fn schedule(&mut self, node: NodeId, param: NodeParam, ramp: ParamRamp) {
        self.calls.push(Call::Schedule { node, param, ramp });
    }

    fn stop(&mut self, source: NodeId, at: f64) {
        self.calls.push(Call::Stop { source, at });
    }

    fn release(&mut self, node: NodeId, at: f64) {
        self.calls.push(Call::Release { node, at });
    }

    fn on_complete(&mut self, source: NodeId, notifier: CompletionNotifier) {
        self.notifiers.push((source, notifier));
    }
}
