use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use kratko_core::{
    Acquisition, AcquisitionOrchestrator, Coordinator, JsonFileStore, MemoryStore, MessageBus,
    Outcome, PageAgent, PageState, Provider, RecognitionBackend, SettingsPatch, SettingsStore,
    audio::{MediaHost, NoMedia},
    config::{CONFIG_KEY, default_store_path, load_settings},
    contexts::DEFAULT_CAPTURE_SECONDS,
    format_outcome_readable, format_transcript_with_timestamps,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::{
    watch_page::{fetch_watch_page, http_client, normalize_video_url},
    wav_media::WavMedia,
};

mod watch_page;
mod wav_media;

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// CLI wrapper for RecognitionBackend (needed for clap ValueEnum)
#[derive(Clone, Copy, ValueEnum)]
enum CliBackend {
    Webspeech,
    Whisper,
}

impl From<CliBackend> for RecognitionBackend {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Webspeech => RecognitionBackend::Streaming,
            CliBackend::Whisper => RecognitionBackend::Batch,
        }
    }
}

#[derive(Parser)]
#[command(name = "kratko")]
#[command(about = "Summarize YouTube videos from their subtitles, or from their audio when there are none")]
struct Cli {
    /// API key for this run only; never written to the settings file
    #[arg(long, env = "KRATKO_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize a video
    Summarize(SummarizeArgs),
    /// Show, change or test the settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List the known providers with their endpoints and models
    Providers,
}

#[derive(Args)]
struct SummarizeArgs {
    /// Video URL
    url: String,

    /// Recognize the audio instead of reading subtitles
    #[arg(short, long)]
    audio: bool,

    /// WAV file played as the video's audio track
    #[arg(short, long, requires = "audio")]
    media: Option<PathBuf>,

    /// Seconds of audio to capture
    #[arg(short, long, default_value_t = DEFAULT_CAPTURE_SECONDS)]
    duration: f64,

    /// Recognition language hint (e.g. "en-US")
    #[arg(short, long)]
    language: Option<String>,

    /// Also print the subtitles with timestamps
    #[arg(short, long)]
    transcript: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the stored settings with the key masked
    Show,
    /// Change some settings; the rest keep their value
    Set(SetArgs),
    /// Send a short sample through the configured provider
    Test,
}

#[derive(Clone, Args)]
struct SetArgs {
    /// Provider id (see `kratko providers`)
    #[arg(long)]
    provider: Option<String>,

    /// API key to store
    #[arg(long)]
    key: Option<String>,

    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    model: Option<String>,

    /// Preferred audio recognition backend
    #[arg(long)]
    recognition: Option<CliBackend>,

    #[arg(long)]
    whisper_endpoint: Option<String>,

    #[arg(long)]
    whisper_model: Option<String>,
}

impl From<SetArgs> for SettingsPatch {
    fn from(args: SetArgs) -> Self {
        SettingsPatch {
            api_provider: args.provider,
            api_key: args.key,
            api_endpoint: args.endpoint,
            model: args.model,
            speech_recognition_provider: args.recognition.map(Into::into),
            whisper_endpoint: args.whisper_endpoint,
            whisper_model: args.whisper_model,
        }
    }
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Keeps the spinner text in step with the orchestrator's progress.
fn follow_progress(orchestrator: &AcquisitionOrchestrator, spinner: ProgressBar) {
    let mut progress = orchestrator.subscribe();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            if spinner.is_finished() {
                break;
            }
            let p = progress.borrow_and_update().clone();
            spinner.set_message(format!("{} {}", style(format!("[{:>3}%]", p.percent)).dim(), p.text));
        }
    });
}

/// The page, coordinator and UI contexts of one run, joined by a bus.
struct Contexts {
    bus: MessageBus,
    orchestrator: Arc<AcquisitionOrchestrator>,
    shutdown: broadcast::Sender<()>,
}

impl Contexts {
    /// `install` fills in default settings first; runs that only read
    /// settings leave the store alone.
    async fn start(
        store: Arc<dyn SettingsStore>,
        client: reqwest::Client,
        page: Option<PageAgent>,
        install: bool,
    ) -> Result<Self> {
        let bus = MessageBus::new();
        let (shutdown, _) = broadcast::channel(1);

        let coordinator = Coordinator::new(store, client);
        if install {
            coordinator.install().await?;
        }
        bus.serve(coordinator, shutdown.subscribe());

        if let Some(page) = page {
            bus.serve(page.clone(), shutdown.subscribe());
            page.announce(&bus).await;
        }

        Ok(Self {
            orchestrator: Arc::new(AcquisitionOrchestrator::new(bus.clone())),
            bus,
            shutdown,
        })
    }

    fn stop(self) {
        let _ = self.shutdown.send(());
        debug!(
            sent = self
                .bus
                .metrics()
                .sent_total
                .load(std::sync::atomic::Ordering::Relaxed),
            "Contexts stopped"
        );
    }
}

/// The persisted settings, with the per-run key layered on top in memory.
async fn settings_store(cli: &Cli) -> Result<Arc<dyn SettingsStore>> {
    let file = JsonFileStore::new(cli.store.clone().unwrap_or_else(default_store_path));
    debug!(path = %file.path().display(), "Settings store");

    let Some(key) = cli.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        return Ok(Arc::new(file));
    };
    let mut settings = load_settings(&file).await?;
    settings.api_key = key.trim().to_string();
    let overlay = MemoryStore::new();
    overlay
        .set(CONFIG_KEY, serde_json::to_value(&settings)?)
        .await?;
    Ok(Arc::new(overlay))
}

fn capture_window(seconds: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(window) if !window.is_zero() => Ok(window),
        _ => bail!("--duration must be a positive number of seconds, got {seconds}"),
    }
}

async fn summarize(cli: &Cli, args: &SummarizeArgs) -> Result<()> {
    let client = http_client()?;
    let url = normalize_video_url(&args.url)?;
    let window = capture_window(args.duration)?;

    let media: Arc<dyn MediaHost> = match (&args.media, args.audio) {
        (Some(path), _) => {
            let wav = WavMedia::open(path)?;
            println!(
                "{} Media: {} {}",
                style("✓").green().bold(),
                style(path.display()).dim(),
                style(format!("[{}]", format_duration(wav.duration()))).dim()
            );
            Arc::new(wav)
        }
        (None, true) => bail!("--audio needs --media <file.wav> to play the video's audio"),
        (None, false) => Arc::new(NoMedia),
    };

    let total_start = Instant::now();
    let spinner = create_spinner("Loading watch page...");
    let page_state: PageState = fetch_watch_page(&client, &url).await?;
    spinner.finish_with_message(format!(
        "{} Watch page loaded {}",
        style("✓").green().bold(),
        style(format!("[{}]", format_duration(total_start.elapsed()))).dim()
    ));

    // no speech engine outside a browser: audio always goes through the batch backend
    let page = PageAgent::new(Arc::new(page_state), media, None, client.clone());
    let contexts = Contexts::start(settings_store(cli).await?, client, Some(page), false).await?;
    let orchestrator = Arc::clone(&contexts.orchestrator);

    let status = orchestrator.page_status().await?;
    if !status.is_video_page {
        bail!("{url} is not a video page");
    }
    info!(video_id = status.video_id.as_deref().unwrap_or_default(), "Video page");

    println!("{}", style("─".repeat(60)).dim());
    let step_start = Instant::now();
    let spinner = create_spinner("Starting...");
    follow_progress(&orchestrator, spinner.clone());

    let outcome = if args.audio {
        orchestrator
            .recognize_and_summarize(
                window,
                RecognitionBackend::Batch,
                args.language.as_deref(),
            )
            .await
    } else {
        match orchestrator.extract_and_summarize().await {
            Ok(Acquisition::Summarized(outcome)) => Ok(outcome),
            Ok(Acquisition::NoSubtitles) => {
                spinner.finish_with_message(format!(
                    "{} This video has no subtitles",
                    style("✗").yellow().bold()
                ));
                println!(
                    "\n{} re-run with {} to summarize its audio\n",
                    style("Hint:").dim(),
                    style("--audio --media <file.wav>").cyan()
                );
                contexts.stop();
                return Ok(());
            }
            Err(e) => Err(e),
        }
    };

    let outcome: Outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            spinner.finish_and_clear();
            contexts.stop();
            return Err(e.into());
        }
    };
    spinner.finish_with_message(format!(
        "{} Summary generated {}",
        style("✓").green().bold(),
        style(format!("[{}]", format_duration(step_start.elapsed()))).dim()
    ));
    contexts.stop();

    println!(
        "\n{} {}\n",
        style("Total time:").dim(),
        style(format_duration(total_start.elapsed())).cyan().bold()
    );
    println!("{}", style("─".repeat(60)).dim());

    // Human-readable output
    println!("{}", format_outcome_readable(&outcome));
    if args.transcript {
        if let Some(transcript) = &outcome.transcript {
            println!("{}\n", style("## Subtitles").bold());
            println!("{}", format_transcript_with_timestamps(transcript));
        }
    }
    Ok(())
}

fn print_settings(reply: &Value) {
    let Some(config) = reply["config"].as_object() else {
        return;
    };
    for (key, value) in config {
        let value = match value {
            Value::String(s) if s.is_empty() => style("(not set)".to_string()).dim(),
            Value::String(s) => style(s.clone()),
            other => style(other.to_string()),
        };
        println!("  {:<28} {}", style(key).cyan(), value);
    }
}

async fn config(cli: &Cli, action: &ConfigAction) -> Result<()> {
    let client = http_client()?;
    // only `test` sees the per-run key, changes always go to the file
    let store: Arc<dyn SettingsStore> = match action {
        ConfigAction::Test => settings_store(cli).await?,
        _ => Arc::new(JsonFileStore::new(
            cli.store.clone().unwrap_or_else(default_store_path),
        )),
    };
    let install = matches!(action, ConfigAction::Set(_));
    let contexts = Contexts::start(store, client, None, install).await?;
    let orchestrator = Arc::clone(&contexts.orchestrator);

    let result = match action {
        ConfigAction::Show => orchestrator.settings().await.map(|reply| print_settings(&reply)),
        ConfigAction::Set(args) => {
            let patch = SettingsPatch::from(args.clone());
            if patch == SettingsPatch::default() {
                contexts.stop();
                bail!("Nothing to change; see `kratko config set --help`");
            }
            match orchestrator.save_settings(serde_json::to_value(patch)?).await {
                Ok(()) => {
                    println!("{} Settings saved", style("✓").green().bold());
                    orchestrator.settings().await.map(|reply| print_settings(&reply))
                }
                Err(e) => Err(e),
            }
        }
        ConfigAction::Test => {
            let spinner = create_spinner("Testing the provider connection...");
            let started = Instant::now();
            let reply = orchestrator.test_connection().await;
            spinner.finish_and_clear();
            reply.map(|summary| {
                println!(
                    "{} Connection works {}",
                    style("✓").green().bold(),
                    style(format!("[{}]", format_duration(started.elapsed()))).dim()
                );
                println!("\n{}", summary.trim());
            })
        }
    };
    contexts.stop();
    Ok(result?)
}

fn providers() {
    for provider in Provider::ALL {
        let info = provider.config();
        println!(
            "{} {}",
            style(format!("{:<10}", provider.id())).cyan().bold(),
            info.name
        );
        if !info.endpoint.is_empty() {
            println!("  {} {}", style("endpoint:").dim(), info.endpoint);
        }
        if !info.models.is_empty() {
            println!("  {} {}", style("models:  ").dim(), info.models.join(", "));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KRATKO_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    println!(
        "\n{}  {}\n",
        style("kratko").cyan().bold(),
        style("Video Summarizer").dim()
    );

    let result = match &cli.command {
        Command::Summarize(args) => summarize(&cli, args).await,
        Command::Config { action } => config(&cli, action).await,
        Command::Providers => {
            providers();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}
