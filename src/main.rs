use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use snuggles::app::{Assistant, Exit};
use snuggles::config::Config;
use snuggles::tts::{ElevenLabsTts, TextToSpeech};
use snuggles::voice::{
    CapturePipeline, CpalOutput, PlaybackScheduler, PlaybackSink, SchedulerConfig, duration_of,
    frame_features, samples_to_wav,
};

/// Dr. Snuggles - realtime voice assistant
#[derive(Parser)]
#[command(name = "snuggles", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/snuggles/config.toml)
    #[arg(short, long, env = "SNUGGLES_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the captured audio to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
    /// Test the ElevenLabs TTS fallback
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is Dr. Snuggles testing the speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,snuggles=info",
        1 => "info,snuggles=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, output } => {
                test_mic(&config, duration, output.as_deref()).await
            }
            Command::TestSpeaker => test_speaker(&config).await,
            Command::TestTts { text } => test_tts(&config, &text).await,
        };
    }

    let mut assistant = Assistant::init(&config)?;
    let exit = assistant.run().await;
    assistant.shutdown().await;

    match exit? {
        Exit::Shutdown => Ok(()),
        Exit::Fatal(message) => Err(anyhow::anyhow!(message)),
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64, output: Option<&std::path::Path>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = CapturePipeline::new(config.audio.capture_block_size);
    let mut frames = capture.start()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let mut recorded = Vec::new();
    for i in 0..duration {
        let mut second = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, frames.recv()).await {
            second.extend_from_slice(&frame.samples);
        }

        let (energy, _) = frame_features(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        if output.is_some() {
            recorded.extend(second);
        }
    }

    capture.stop();

    if let Some(path) = output {
        let wav = samples_to_wav(&recorded, sample_rate)?;
        std::fs::write(path, wav)?;
        println!("\nWrote {} samples to {}", recorded.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave split into scheduled segments
#[allow(clippy::future_not_send)]
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = config.audio.playback_rate;
    let mut scheduler = PlaybackScheduler::new(
        CpalOutput::new(),
        SchedulerConfig {
            sample_rate,
            safety_margin: config.audio.safety_margin,
            drift_threshold: config.audio.drift_threshold,
        },
    );
    scheduler.start()?;

    let frequency = 440.0_f32;
    let total = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..total)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    // Segments of 100 ms exercise gapless scheduling
    for chunk in samples.chunks(sample_rate as usize / 10) {
        scheduler.enqueue(chunk);
    }
    println!(
        "Scheduled {} samples at {} Hz across {} segments",
        samples.len(),
        sample_rate,
        scheduler.active_segments().len()
    );

    tokio::time::sleep(duration_of(total, sample_rate) + Duration::from_millis(300)).await;
    scheduler.stop();

    println!("\n---");
    println!("If you heard a steady tone, your speakers are working!");
    println!("Clicks between segments point at scheduling gaps.");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test the TTS fallback end to end
#[allow(clippy::future_not_send)]
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = ElevenLabsTts::new(config.api_keys.elevenlabs.clone(), &config.tts)?;

    println!("Synthesizing speech...");
    let mp3 = tts.synthesize(text).await?;
    println!("Got {} bytes of audio", mp3.len());

    let mut scheduler = PlaybackScheduler::new(
        CpalOutput::new(),
        SchedulerConfig {
            sample_rate: config.audio.playback_rate,
            safety_margin: config.audio.safety_margin,
            drift_threshold: config.audio.drift_threshold,
        },
    );
    scheduler.start()?;

    let Some(segment) = scheduler.enqueue_encoded(&mp3) else {
        anyhow::bail!("TTS audio could not be decoded");
    };
    println!("Playing {:.1}s of speech...", segment.duration.as_secs_f32());

    tokio::time::sleep(segment.end() + Duration::from_millis(300)).await;
    scheduler.stop();

    println!("\nTTS test complete!");
    Ok(())
}
