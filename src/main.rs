use std::path::PathBuf;

use anyhow::{anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use watson_streaming::{
    BatchReport, ClientConfig, FailurePolicy, OutputFormat, SessionOptions, SpeechToText,
    SynthesizeOptions, TextToSpeech, Timing,
};

/// Stream audio files to IBM Watson Speech-to-Text, or text to Text-to-Speech
#[derive(Parser, Debug)]
#[command(name = "watson-stream")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transcribe audio files, writing one JSON transcript per file
    Recognize(RecognizeArgs),

    /// Synthesize text into audio files
    Synthesize(SynthesizeArgs),
}

#[derive(Args, Debug)]
struct RecognizeArgs {
    /// Audio files to transcribe
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Content type of every input file
    #[arg(long, default_value = "audio/wav")]
    content_type: String,

    /// Maximum number of concurrent sessions
    #[arg(short = 'w', long, default_value_t = 4)]
    workers: usize,

    /// Directory for the transcript files
    #[arg(short = 'o', long, default_value = "transcripts")]
    output_dir: PathBuf,

    /// Recognition model, e.g. en-US_Multimedia
    #[arg(short = 'm', long)]
    model: Option<String>,

    #[arg(long)]
    interim_results: bool,

    #[arg(long)]
    timestamps: bool,

    #[arg(long)]
    speaker_labels: bool,

    #[arg(long)]
    smart_formatting: bool,

    /// Comma-separated keywords to spot
    #[arg(long, value_delimiter = ',', requires = "keywords_threshold")]
    keywords: Vec<String>,

    #[arg(long)]
    keywords_threshold: Option<f64>,

    /// Seconds of silence before the service closes the session (-1 disables)
    #[arg(long, allow_hyphen_values = true)]
    inactivity_timeout: Option<i32>,

    /// Keep going when a file fails instead of aborting the batch
    #[arg(long)]
    isolate_failures: bool,
}

#[derive(Args, Debug)]
struct SynthesizeArgs {
    /// Text to synthesize; repeat for several utterances
    #[arg(short = 't', long = "text", required = true)]
    texts: Vec<String>,

    /// Directory for the audio files
    #[arg(short = 'o', long, default_value = ".")]
    output_dir: PathBuf,

    #[arg(long)]
    voice: Option<String>,

    /// Output format (ogg, wav, mp3, flac, webm, l16, mulaw, alaw)
    #[arg(short = 'f', long, default_value = "ogg")]
    format: String,

    #[arg(long)]
    sample_rate: Option<u32>,

    /// Request word timings
    #[arg(long)]
    word_timings: bool,

    #[arg(short = 'w', long, default_value_t = 2)]
    workers: usize,

    #[arg(long)]
    isolate_failures: bool,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ClientConfig::from_file(path)?
        }
        None => ClientConfig::from_env()?,
    };

    let report = match cli.command {
        Commands::Recognize(args) => recognize(config, args)?,
        Commands::Synthesize(args) => synthesize(config, args)?,
    };

    for outcome in &report.outcomes {
        match outcome.error() {
            Some(err) if outcome.is_closed() && err.is_server_reported() => {
                warn!(item_id = outcome.item_id, "Service reported: {err}");
            }
            Some(err) => error!(item_id = outcome.item_id, "Session failed: {err}"),
            None => {}
        }
    }
    if !report.is_success() {
        bail!(
            "{} of {} items did not complete ({} cancelled)",
            report.outcomes.len() - report.completed().count() + report.cancelled.len(),
            report.outcomes.len() + report.cancelled.len(),
            report.cancelled.len()
        );
    }
    info!("All {} items completed", report.outcomes.len());
    Ok(())
}

fn policy(isolate: bool) -> FailurePolicy {
    if isolate {
        FailurePolicy::Isolate
    } else {
        FailurePolicy::AbortBatch
    }
}

fn recognize(config: ClientConfig, args: RecognizeArgs) -> anyhow::Result<BatchReport> {
    let mut builder = SessionOptions::builder(args.content_type)
        .interim_results(args.interim_results)
        .timestamps(args.timestamps)
        .speaker_labels(args.speaker_labels)
        .smart_formatting(args.smart_formatting);
    if let Some(model) = args.model {
        builder = builder.model(model);
    }
    if let Some(threshold) = args.keywords_threshold {
        builder = builder.keywords(args.keywords, threshold);
    }
    if let Some(seconds) = args.inactivity_timeout {
        builder = builder.inactivity_timeout(seconds);
    }
    let options = builder.build()?;

    let client = SpeechToText::new(config)?.with_failure_policy(policy(args.isolate_failures));
    Ok(client.recognize_batch(args.files, options, args.workers, &args.output_dir)?)
}

fn synthesize(config: ClientConfig, args: SynthesizeArgs) -> anyhow::Result<BatchReport> {
    let format = OutputFormat::from_str_or_default(&args.format);
    let mut builder = SynthesizeOptions::builder().format(format);
    if let Some(voice) = args.voice {
        builder = builder.voice(voice);
    }
    if let Some(rate) = args.sample_rate {
        builder = builder.sample_rate(rate);
    }
    if args.word_timings {
        builder = builder.timings([Timing::Words]);
    }
    let options = builder.build()?;

    std::fs::create_dir_all(&args.output_dir)?;
    let jobs = args
        .texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let path = args
                .output_dir
                .join(format!("speech-{:03}.{}", i + 1, format.extension()));
            (text, path)
        })
        .collect();

    let client = TextToSpeech::new(config)?.with_failure_policy(policy(args.isolate_failures));
    Ok(client.synthesize_batch(jobs, options, args.workers)?)
}
