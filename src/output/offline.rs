//! Offline rendering [`AudioOutput`] implementation.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use super::{AudioOutput, CompletionNotifier, NodeId, NodeParam, ParamRamp, SourceOptions};
use crate::utils::{
    biquad::{BandpassCoefficients, BiquadFilter},
    panning_factors,
    sample::DecodedSample,
    time_constant_to_coefficient,
};

#[cfg(feature = "wav-output")]
use crate::Error;

// -------------------------------------------------------------------------------------------------

const MIN_Q: f32 = 0.1;
const MAX_ROUTING_DEPTH: usize = 16;
/// Targets closer than this are considered reached.
const TARGET_EPSILON: f32 = 1e-6;

// -------------------------------------------------------------------------------------------------

/// A sample accurate automated node parameter.
#[derive(Debug, Clone)]
struct AutomatedParam {
    value: f32,
    anchor: (f64, f32),
    events: VecDeque<ParamRamp>,
}

impl AutomatedParam {
    fn new(value: f32) -> Self {
        Self {
            value,
            anchor: (0.0, value),
            events: VecDeque::new(),
        }
    }

    /// Schedule a new event. `Target` events cancel all events which are scheduled at or after
    /// their start time.
    fn schedule(&mut self, ramp: ParamRamp) {
        if let ParamRamp::Target { start, .. } = ramp {
            self.events.retain(|e| e.time() < start);
        }
        let time = ramp.time();
        let position = self
            .events
            .iter()
            .position(|e| e.time() > time)
            .unwrap_or(self.events.len());
        self.events.insert(position, ramp);
    }

    /// Move to the given output time, returning the current value.
    fn advance(&mut self, time: f64, sample_rate: u32) -> f32 {
        while let Some(event) = self.events.front().copied() {
            match event {
                ParamRamp::Set { value, at } => {
                    if at > time {
                        break;
                    }
                    self.value = value;
                    self.anchor = (at, value);
                    self.events.pop_front();
                }
                ParamRamp::Linear { value, end } => {
                    if end <= time {
                        self.value = value;
                        self.anchor = (end, value);
                        self.events.pop_front();
                        continue;
                    }
                    let (start, start_value) = self.anchor;
                    if time > start {
                        let t = ((time - start) / (end - start)) as f32;
                        self.value = start_value + (value - start_value) * t;
                    }
                    break;
                }
                ParamRamp::Target {
                    value,
                    start,
                    time_constant,
                } => {
                    if start > time {
                        break;
                    }
                    if self.events.get(1).is_some_and(|next| next.time() <= time) {
                        // superseded by the next event
                        self.anchor = (time, self.value);
                        self.events.pop_front();
                        continue;
                    }
                    let coefficient = time_constant_to_coefficient(time_constant, sample_rate);
                    self.value += (value - self.value) * coefficient;
                    if (self.value - value).abs() < TARGET_EPSILON {
                        self.value = value;
                        self.anchor = (time, value);
                        self.events.pop_front();
                    }
                    break;
                }
            }
        }
        self.value
    }
}

// -------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct GainNode {
    gain: AutomatedParam,
    current: f32,
    destination: Option<NodeId>,
}

#[derive(Debug)]
struct PanNode {
    pan: AutomatedParam,
    current: (f32, f32),
    destination: NodeId,
}

#[derive(Debug)]
struct SourceNode {
    buffer: Arc<DecodedSample>,
    position: f64,
    increment: f64,
    start: f64,
    end: f64,
    stop_at: Option<f64>,
    frequency: AutomatedParam,
    q: AutomatedParam,
    coefficients: Option<BandpassCoefficients>,
    filter: BiquadFilter,
    destination: NodeId,
    notifier: Option<CompletionNotifier>,
}

impl SourceNode {
    fn is_finished(&self, time: f64) -> bool {
        time >= self.end || self.stop_at.is_some_and(|stop_at| time >= stop_at)
    }

    fn process(&mut self, time: f64, sample_rate: u32) -> f32 {
        let input = self.buffer.mono_sample_at(self.position);
        self.position += self.increment;

        let frequency = self.frequency.advance(time, sample_rate);
        let q = self.q.advance(time, sample_rate).max(MIN_Q);
        match &mut self.coefficients {
            Some(coefficients) => {
                if let Err(err) = coefficients.set(sample_rate, frequency, q) {
                    log::warn!("Failed to update grain filter: {err}");
                }
            }
            None => match BandpassCoefficients::new(sample_rate, frequency, q) {
                Ok(coefficients) => self.coefficients = Some(coefficients),
                Err(err) => log::warn!("Failed to create grain filter: {err}"),
            },
        }
        match &self.coefficients {
            Some(coefficients) => self.filter.process_sample(coefficients, input as f64) as f32,
            None => input,
        }
    }
}

#[derive(Debug)]
enum Node {
    Gain(GainNode),
    Pan(PanNode),
    Source(SourceNode),
}

// -------------------------------------------------------------------------------------------------

/// Renders grain node chains into interleaved stereo buffers, without an audio device.
///
/// Output time only advances while rendering. The output can be suspended, which makes it
/// report itself as not running, e.g. to simulate a not yet available output device.
#[derive(Debug)]
pub struct OfflineOutput {
    sample_rate: u32,
    frame_position: u64,
    running: bool,
    next_node_id: NodeId,
    nodes: BTreeMap<NodeId, Node>,
    pending_releases: Vec<(NodeId, f64)>,
    source_outputs: Vec<(f32, NodeId)>,
    finished_sources: Vec<NodeId>,
}

impl OfflineOutput {
    /// Channel layout of rendered buffers.
    pub const CHANNEL_COUNT: usize = 2;

    /// Create a new, running offline output with the given sample rate.
    pub fn new(sample_rate: u32) -> Self {
        debug_assert!(sample_rate > 0, "Invalid sample rate");
        Self {
            sample_rate,
            frame_position: 0,
            running: true,
            next_node_id: 1,
            nodes: BTreeMap::new(),
            pending_releases: Vec::new(),
            source_outputs: Vec::new(),
            finished_sources: Vec::new(),
        }
    }

    /// Suspend the output: it no longer reports itself as running and renders silence.
    pub fn suspend(&mut self) {
        self.running = false;
    }

    /// Resume a suspended output.
    pub fn resume(&mut self) {
        self.running = true;
    }

    /// Number of nodes which are currently alive.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of sources which are currently alive (playing or waiting to be played).
    pub fn source_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| matches!(n, Node::Source(_)))
            .count()
    }

    /// Render the given number of frames into a newly allocated interleaved stereo buffer.
    pub fn render_frames(&mut self, frame_count: usize) -> Vec<f32> {
        let mut output = vec![0.0; frame_count * Self::CHANNEL_COUNT];
        self.render(&mut output);
        output
    }

    /// Render into the given interleaved stereo buffer, adding to the buffer's content.
    pub fn render(&mut self, output: &mut [f32]) {
        if !self.running {
            return;
        }
        let sample_rate = self.sample_rate;
        for frame in output.chunks_exact_mut(Self::CHANNEL_COUNT) {
            let time = self.current_time();
            self.process_releases(time);

            // advance mixer node automation
            for node in self.nodes.values_mut() {
                match node {
                    Node::Gain(gain) => gain.current = gain.gain.advance(time, sample_rate),
                    Node::Pan(pan) => {
                        pan.current = panning_factors(pan.pan.advance(time, sample_rate))
                    }
                    Node::Source(_) => (),
                }
            }

            // run sources
            let mut source_outputs = std::mem::take(&mut self.source_outputs);
            source_outputs.clear();
            for (id, node) in self.nodes.iter_mut() {
                if let Node::Source(source) = node {
                    if source.is_finished(time) {
                        self.finished_sources.push(*id);
                    } else if time >= source.start {
                        let sample = source.process(time, sample_rate);
                        source_outputs.push((sample, source.destination));
                    }
                }
            }

            // mix
            for (sample, destination) in &source_outputs {
                if let Some((left, right)) = self.route(*destination, *sample) {
                    frame[0] += left;
                    frame[1] += right;
                }
            }
            self.source_outputs = source_outputs;

            // notify finished sources
            for id in std::mem::take(&mut self.finished_sources) {
                self.remove_node(id);
            }
            self.frame_position += 1;
        }
    }

    /// Apply mixer nodes from the given destination on to the main output.
    fn route(&self, destination: NodeId, sample: f32) -> Option<(f32, f32)> {
        let (mut left, mut right) = (sample, sample);
        let mut node_id = Some(destination);
        let mut depth = 0;
        while let Some(id) = node_id {
            depth += 1;
            if depth > MAX_ROUTING_DEPTH {
                log::warn!("Node routing loop detected at node {id}");
                return None;
            }
            match self.nodes.get(&id)? {
                Node::Gain(gain) => {
                    left *= gain.current;
                    right *= gain.current;
                    node_id = gain.destination;
                }
                Node::Pan(pan) => {
                    left *= pan.current.0;
                    right *= pan.current.1;
                    node_id = Some(pan.destination);
                }
                Node::Source(_) => return None,
            }
        }
        Some((left, right))
    }

    fn process_releases(&mut self, time: f64) {
        if self.pending_releases.iter().any(|(_, at)| *at <= time) {
            let (due, pending): (Vec<_>, Vec<_>) = self
                .pending_releases
                .drain(..)
                .partition(|(_, at)| *at <= time);
            self.pending_releases = pending;
            for (id, _) in due {
                self.remove_node(id);
            }
        }
    }

    fn remove_node(&mut self, id: NodeId) {
        if let Some(Node::Source(source)) = self.nodes.remove(&id) {
            if let Some(notifier) = source.notifier {
                notifier.notify();
            }
        }
    }

    fn add_node(&mut self, node: Node) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        self.nodes.insert(id, node);
        id
    }
}

impl AudioOutput for OfflineOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.frame_position as f64 / self.sample_rate as f64
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn create_gain_node(&mut self, gain: f32, destination: Option<NodeId>) -> NodeId {
        self.add_node(Node::Gain(GainNode {
            gain: AutomatedParam::new(gain),
            current: gain,
            destination,
        }))
    }

    fn create_pan_node(&mut self, pan: f32, destination: NodeId) -> NodeId {
        self.add_node(Node::Pan(PanNode {
            pan: AutomatedParam::new(pan),
            current: panning_factors(pan),
            destination,
        }))
    }

    fn create_source(&mut self, options: SourceOptions, destination: NodeId) -> NodeId {
        let buffer_rate = options.buffer.sample_rate() as f64;
        let increment = options.playback_rate * buffer_rate / self.sample_rate as f64;
        let position = options.offset * buffer_rate;
        self.add_node(Node::Source(SourceNode {
            buffer: options.buffer,
            position,
            increment,
            start: options.start,
            end: options.start + options.duration.max(0.0),
            stop_at: None,
            frequency: AutomatedParam::new(options.frequency),
            q: AutomatedParam::new(options.q),
            coefficients: None,
            filter: BiquadFilter::new(),
            destination,
            notifier: None,
        }))
    }

    fn schedule(&mut self, node: NodeId, param: NodeParam, ramp: ParamRamp) {
        let automated = match (self.nodes.get_mut(&node), param) {
            (Some(Node::Gain(gain)), NodeParam::Gain) => &mut gain.gain,
            (Some(Node::Pan(pan)), NodeParam::Pan) => &mut pan.pan,
            (Some(Node::Source(source)), NodeParam::Frequency) => &mut source.frequency,
            (Some(Node::Source(source)), NodeParam::Q) => &mut source.q,
            (Some(_), param) => {
                log::warn!("Node {node} has no '{param}' parameter");
                return;
            }
            (None, _) => return,
        };
        automated.schedule(ramp);
    }

    fn stop(&mut self, source: NodeId, at: f64) {
        if let Some(Node::Source(source)) = self.nodes.get_mut(&source) {
            source.stop_at = Some(source.stop_at.map_or(at, |stop_at| stop_at.min(at)));
        }
    }

    fn release(&mut self, node: NodeId, at: f64) {
        if at <= self.current_time() {
            self.remove_node(node);
        } else {
            self.pending_releases.push((node, at));
        }
    }

    fn on_complete(&mut self, source: NodeId, notifier: CompletionNotifier) {
        match self.nodes.get_mut(&source) {
            Some(Node::Source(source)) => source.notifier = Some(notifier),
            // already finished: notify right away
            _ => notifier.notify(),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Write interleaved stereo frames, as rendered by an [`OfflineOutput`], into a 32 bit float
/// wav file.
#[cfg(feature = "wav-output")]
pub fn write_wav_file<P: AsRef<std::path::Path>>(
    path: P,
    samples: &[f32],
    sample_rate: u32,
) -> Result<(), Error> {
    let spec = hound::WavSpec {
        channels: OfflineOutput::CHANNEL_COUNT as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let map_err = |err: hound::Error| Error::OutputDeviceError(Box::new(err));
    let mut writer = hound::WavWriter::create(path, spec).map_err(map_err)?;
    for sample in samples {
        writer.write_sample(*sample).map_err(map_err)?;
    }
    writer.finalize().map_err(map_err)
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::{pool::GrainId, TriggerMode},
        output::{Completion, LivenessToken},
    };

    const SAMPLE_RATE: u32 = 1000;

    fn sine_sample() -> Arc<DecodedSample> {
        let samples = (0..1000)
            .map(|i| (2.0 * std::f32::consts::PI * 100.0 * i as f32 / SAMPLE_RATE as f32).sin())
            .collect();
        Arc::new(DecodedSample::from_mono(SAMPLE_RATE, samples))
    }

    fn source_options(start: f64, duration: f64) -> SourceOptions {
        SourceOptions {
            buffer: sine_sample(),
            start,
            offset: 0.0,
            duration,
            playback_rate: 1.0,
            frequency: 100.0,
            q: 1.0,
        }
    }

    #[test]
    fn automation() {
        let sample_rate = 1000;
        let dt = 1.0 / sample_rate as f64;
        let mut param = AutomatedParam::new(0.0);
        param.schedule(ParamRamp::Linear {
            value: 1.0,
            end: 1.0,
        });
        param.schedule(ParamRamp::Set { value: 0.0, at: 0.0 });
        assert_eq!(param.advance(0.0, sample_rate), 0.0);
        assert!((param.advance(0.5, sample_rate) - 0.5).abs() < 1e-6);
        assert_eq!(param.advance(1.0, sample_rate), 1.0);
        assert_eq!(param.advance(2.0, sample_rate), 1.0);

        // targets approach exponentially and cancel later events
        param.schedule(ParamRamp::Set { value: 5.0, at: 3.0 });
        param.schedule(ParamRamp::Target {
            value: 0.0,
            start: 2.0,
            time_constant: 0.01,
        });
        let mut time = 2.0;
        let mut last = param.advance(time, sample_rate);
        assert!(last < 1.0);
        for _ in 0..100 {
            time += dt;
            let value = param.advance(time, sample_rate);
            assert!(value <= last);
            last = value;
        }
        assert!(last < 0.01);
        // the set event at 3.0 got cancelled
        assert!(param.advance(3.5, sample_rate) < 0.01);
    }

    #[test]
    fn render_chain() {
        let mut output = OfflineOutput::new(SAMPLE_RATE);
        let bus = output.create_gain_node(0.5, None);
        let pan = output.create_pan_node(-1.0, bus);
        let gain = output.create_gain_node(1.0, Some(pan));
        output.create_source(source_options(0.0, 0.5), gain);
        assert_eq!(output.source_count(), 1);

        let rendered = output.render_frames(1000);
        let left_energy: f32 = rendered.iter().step_by(2).map(|s| s.abs()).sum();
        let right_energy: f32 = rendered.iter().skip(1).step_by(2).map(|s| s.abs()).sum();
        assert!(left_energy > 0.0);
        assert!(right_energy < 1e-3);
        // source finished and got removed
        assert_eq!(output.source_count(), 0);
        assert_eq!(output.node_count(), 3);
        assert!((output.current_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn completions() {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut output = OfflineOutput::new(SAMPLE_RATE);
        let bus = output.create_gain_node(1.0, None);
        let first = output.create_source(source_options(0.0, 0.1), bus);
        let second = output.create_source(source_options(0.0, 10.0), bus);
        for (index, source) in [first, second].into_iter().enumerate() {
            output.on_complete(
                source,
                CompletionNotifier::new(
                    sender.clone(),
                    Completion {
                        mode: TriggerMode::Collision,
                        grain: GrainId::new(index as u32, 0),
                        token: LivenessToken::new(),
                    },
                ),
            );
        }
        output.render_frames(50);
        assert!(receiver.try_recv().is_err());
        output.render_frames(100);
        assert_eq!(receiver.try_recv().unwrap().grain, GrainId::new(0, 0));

        // stopped sources complete too
        output.stop(second, output.current_time() + 0.01);
        output.render_frames(20);
        assert_eq!(receiver.try_recv().unwrap().grain, GrainId::new(1, 0));
        assert_eq!(output.source_count(), 0);

        // registering at an already finished source notifies immediately
        output.on_complete(
            second,
            CompletionNotifier::new(
                sender,
                Completion {
                    mode: TriggerMode::Collision,
                    grain: GrainId::new(2, 0),
                    token: LivenessToken::new(),
                },
            ),
        );
        assert_eq!(receiver.try_recv().unwrap().grain, GrainId::new(2, 0));
    }

    #[test]
    fn releases_and_suspension() {
        let mut output = OfflineOutput::new(SAMPLE_RATE);
        let bus = output.create_gain_node(1.0, None);
        let gain = output.create_gain_node(1.0, Some(bus));
        output.release(gain, 0.01);
        assert_eq!(output.node_count(), 2);
        output.render_frames(20);
        assert_eq!(output.node_count(), 1);
        output.release(bus, 0.0);
        assert_eq!(output.node_count(), 0);

        output.suspend();
        assert!(!output.is_running());
        let time = output.current_time();
        output.render_frames(100);
        assert_eq!(output.current_time(), time);
        output.resume();
        assert!(output.is_running());
    }

    #[test]
    fn released_chains_are_silent() {
        let mut output = OfflineOutput::new(SAMPLE_RATE);
        let bus = output.create_gain_node(1.0, None);
        let gain = output.create_gain_node(1.0, Some(bus));
        output.create_source(source_options(0.0, 1.0), gain);
        output.release(gain, 0.0);
        let rendered = output.render_frames(100);
        assert!(rendered.iter().all(|s| *s == 0.0));
    }
}
