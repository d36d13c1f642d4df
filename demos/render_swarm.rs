//! Renders a small, bouncing particle swarm with two species into a wav file.

use std::path::PathBuf;

use arg::{parse_args, Args};
use rand::{rngs::SmallRng, Rng, SeedableRng};

use grainfield::{
    utils::sample::DecodedSample, write_wav_file, CollisionEvent, Error, OfflineOutput, Particle,
    SpaceBounds, TriggerMode, Voice, VoiceConfig,
};

// -------------------------------------------------------------------------------------------------

const SAMPLE_RATE: u32 = 44100;
const TICKS_PER_SECOND: u32 = 60;

const WIDTH: f32 = 800.0;
const HEIGHT: f32 = 600.0;
const PARTICLES_PER_SPECIES: usize = 24;

const DEFAULT_LOG_LEVEL: log::Level = if cfg!(debug_assertions) {
    log::Level::Debug
} else {
    log::Level::Warn
};

// -------------------------------------------------------------------------------------------------

#[derive(Args, Debug, Default)]
struct Arguments {
    #[arg(short = "o", long = "output")]
    /// Path of the wav file to write. By default \"render-swarm.wav\".
    output_path: Option<PathBuf>,
    #[arg(short = "s", long = "sample")]
    /// Audio file to granulate. By default a synthesized tone.
    sample_path: Option<PathBuf>,
    #[arg(short = "d", long = "duration")]
    /// Rendered duration in seconds. By default 10.
    duration: Option<u32>,
    #[arg(short = "m", long = "mode")]
    /// Trigger mode: \"Collision\" or \"Loop\". By default \"Collision\".
    mode: Option<String>,
    #[arg(short = "l", long = "log-level")]
    /// Set logging level to \"debug\", \"info\", \"warn\" or \"error\".
    log_level: Option<log::Level>,
}

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Error> {
    let args = parse_args::<Arguments>();

    simple_logger::SimpleLogger::new()
        .with_level(args.log_level.unwrap_or(DEFAULT_LOG_LEVEL).to_level_filter())
        .with_module_level("symphonia_core", log::LevelFilter::Warn)
        .with_module_level("symphonia_format", log::LevelFilter::Warn)
        .init()
        .expect("Failed to set logger");

    let mode = match args.mode.as_deref() {
        Some(mode) => mode
            .parse::<TriggerMode>()
            .map_err(|err| Error::ParameterError(format!("Invalid mode '{mode}': {err}")))?,
        None => TriggerMode::Collision,
    };

    let mut output = OfflineOutput::new(SAMPLE_RATE);
    let bounds = SpaceBounds::new(WIDTH, HEIGHT);

    // create a voice for each species
    let mut voices = Vec::new();
    for species in 0..2 {
        let mut voice = Voice::new(VoiceConfig {
            species,
            bounds,
            seed: Some(species as u64),
            ..VoiceConfig::default()
        });
        match &args.sample_path {
            Some(path) => {
                voice.load_sample(std::fs::read(path)?, &output)?;
                voice.wait_for_sample()?;
            }
            None => voice.set_sample(synthesize_tone(110.0 * (species + 1) as f32)),
        }
        voice.set_trigger_mode(mode);
        voice.set_detune_range(0.3);
        voice.set_volume(0.5, &mut output);
        voices.push(voice);
    }

    // run simulation
    let mut swarm = Swarm::new(42);
    let frames_per_tick = (SAMPLE_RATE / TICKS_PER_SECOND) as usize;
    let tick_count = args.duration.unwrap_or(10) * TICKS_PER_SECOND;
    let mut rendered = Vec::with_capacity(
        tick_count as usize * frames_per_tick * OfflineOutput::CHANNEL_COUNT,
    );
    for tick in 0..tick_count {
        swarm.step();
        for voice in &mut voices {
            voice.update(&swarm.particles, &mut output);
        }
        if tick % TICKS_PER_SECOND == 0 {
            for voice in &voices {
                let telemetry = voice.telemetry();
                log::info!(
                    "species {}: {} grains, gain reduction {:.2}",
                    voice.species(),
                    telemetry.live_grains,
                    telemetry.gain_reduction
                );
            }
        }
        rendered.extend(output.render_frames(frames_per_tick));
    }

    // fade out
    for voice in &mut voices {
        voice.release_output(&mut output);
    }
    rendered.extend(output.render_frames(SAMPLE_RATE as usize / 10));

    let output_path = args
        .output_path
        .unwrap_or_else(|| PathBuf::from("render-swarm.wav"));
    write_wav_file(&output_path, &rendered, SAMPLE_RATE)?;
    log::info!("Wrote {}", output_path.display());
    Ok(())
}

// -------------------------------------------------------------------------------------------------

/// A decaying, harmonic tone, as stand-in for a real sample.
fn synthesize_tone(frequency: f32) -> DecodedSample {
    let frame_count = SAMPLE_RATE as usize * 2;
    let samples = (0..frame_count)
        .map(|frame| {
            let time = frame as f32 / SAMPLE_RATE as f32;
            let phase = std::f32::consts::TAU * frequency * time;
            let tone = (1..=6)
                .map(|harmonic| (phase * harmonic as f32).sin() / harmonic as f32)
                .sum::<f32>();
            tone * 0.4 * (-time).exp()
        })
        .collect();
    DecodedSample::from_mono(SAMPLE_RATE, samples)
}

// -------------------------------------------------------------------------------------------------

/// A minimal particle simulation: particles bounce off walls and each other.
struct Swarm {
    particles: Vec<Particle>,
}

impl Swarm {
    fn new(seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let particles = (0..PARTICLES_PER_SPECIES * 2)
            .map(|id| {
                Particle::new(
                    id,
                    id % 2,
                    rng.random_range(0.0..WIDTH),
                    rng.random_range(0.0..HEIGHT),
                )
                .with_velocity(rng.random_range(-4.0..4.0), rng.random_range(-4.0..4.0))
                .with_size(rng.random_range(2.0..10.0))
            })
            .collect();
        Self { particles }
    }

    fn step(&mut self) {
        for particle in &mut self.particles {
            particle.collisions.clear();
            particle.x += particle.vx;
            particle.y += particle.vy;
            if !(0.0..=WIDTH).contains(&particle.x) {
                particle.vx = -particle.vx;
                particle.x = particle.x.clamp(0.0, WIDTH);
            }
            if !(0.0..=HEIGHT).contains(&particle.y) {
                particle.vy = -particle.vy;
                particle.y = particle.y.clamp(0.0, HEIGHT);
            }
        }
        for a in 0..self.particles.len() {
            for b in a + 1..self.particles.len() {
                let (first, second) = (&self.particles[a], &self.particles[b]);
                let distance = (first.x - second.x).hypot(first.y - second.y);
                if distance < first.size + second.size {
                    let force = ((first.vx - second.vx).hypot(first.vy - second.vy) / 8.0)
                        .clamp(0.0, 1.0);
                    let (species_a, species_b) = (first.species, second.species);
                    self.particles[a].collisions.push(CollisionEvent::new(species_b, force));
                    self.particles[b].collisions.push(CollisionEvent::new(species_a, force));
                    // elastic bounce of equal masses
                    let (vx, vy) = (self.particles[a].vx, self.particles[a].vy);
                    self.particles[a].vx = self.particles[b].vx;
                    self.particles[a].vy = self.particles[b].vy;
                    self.particles[b].vx = vx;
                    self.particles[b].vy = vy;
                }
            }
        }
    }
}
