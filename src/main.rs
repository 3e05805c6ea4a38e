use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use parley_gateway::daemon::open_fact_store;
use parley_gateway::db::LAST_PERSONA_KEY;
use parley_gateway::voice::{
    AudioBuffer, AudioCapture, AudioPlayback, AudioSink, HttpSynthesizer, PLAYBACK_SAMPLE_RATE,
    Synthesizer, calculate_energy, f32_to_i16,
};
use parley_gateway::{Config, Daemon, DialogueClient, WebSocketDialogueClient};

/// Parley - wake-word voice gateway for persona-addressed dialogue
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to ~/.config/parley/config.toml)
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Keep facts in memory instead of the database
    #[arg(long)]
    ephemeral: bool,

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
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List personas offered by the dialogue backend
    Personas,
    /// Show the last persona addressed
    LastPersona,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,parley_gateway=info",
        1 => "info,parley_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
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

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::Personas => list_personas(&config).await,
            Command::LastPersona => last_persona(&config, cli.ephemeral),
        };
    }

    tracing::info!(ephemeral = cli.ephemeral, "starting parley gateway");
    tracing::debug!(?config, "loaded configuration");

    let daemon = Daemon::new(config, cli.ephemeral)?;
    daemon.run().await?;

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new(config.audio.sample_rate, config.audio.frame_length)?;
    let (tx, mut rx) = mpsc::channel(256);
    capture.start(tx)?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut samples = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            samples.extend(frame.to_f32());
        }

        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

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
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = AudioPlayback::new()?;

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<i16> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            f32_to_i16((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3)
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), PLAYBACK_SAMPLE_RATE);
    playback
        .play(AudioBuffer::new(samples, PLAYBACK_SAMPLE_RATE))
        .await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let synthesizer = HttpSynthesizer::new(
        config.openai_api_key.clone().unwrap_or_default(),
        config.tts.model.clone(),
        config.tts.voice.clone(),
        config.tts.speed,
    )?
    .with_api_base(config.tts.base_url.clone());

    println!("Synthesizing speech...");
    let audio = synthesizer.synthesize(text).await?;
    println!(
        "Got {} samples ({:.1}s) of audio",
        audio.samples.len(),
        audio.duration().as_secs_f32()
    );

    println!("Playing audio...");
    let mut playback = AudioPlayback::new()?;
    playback.play(audio).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// List personas offered by the dialogue backend
async fn list_personas(config: &Config) -> anyhow::Result<()> {
    let mut client =
        WebSocketDialogueClient::new(config.dialogue.url.clone(), config.dialogue.connect_timeout);

    let personas = tokio::time::timeout(config.dialogue.response_timeout, client.list_personas())
        .await
        .map_err(|_| anyhow::anyhow!("dialogue backend did not answer in time"))??;

    if personas.is_empty() {
        println!("No personas available");
    }
    for persona in personas {
        let registered: Vec<&str> = config
            .names
            .iter()
            .filter(|n| n.persona == persona)
            .map(|n| n.label.as_str())
            .collect();
        if registered.is_empty() {
            println!("{persona}");
        } else {
            println!("{persona} (names: {})", registered.join(", "));
        }
    }

    Ok(())
}

/// Show the last persona addressed
fn last_persona(config: &Config, ephemeral: bool) -> anyhow::Result<()> {
    let facts = open_fact_store(config, ephemeral)?;
    match facts.get(LAST_PERSONA_KEY)? {
        Some(persona) => println!("Last persona: {persona}"),
        None => println!("No persona addressed yet"),
    }
    Ok(())
}
