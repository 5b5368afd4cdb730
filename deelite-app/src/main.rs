//! `deelite`: command-line host for the Dee-Lite kitchen assistant.
//!
//! Settings come from the JSON settings file, then environment variables,
//! then command-line flags (highest precedence).

mod commands;
mod settings;
mod storage;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use deelite_core::Voice;
use tracing_subscriber::EnvFilter;

use settings::{default_settings_path, load_settings, AppSettings};

/// Dee-Lite: a voice cooking assistant for your leftovers
#[derive(Parser)]
#[command(name = "deelite", version, about)]
struct Cli {
    /// API key for the generative model service
    #[arg(long, env = "DEELITE_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Settings file (defaults to the app data directory)
    #[arg(long, env = "DEELITE_SETTINGS", global = true)]
    settings: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Talk to Chef Dee-Lite through the microphone and speakers
    Voice {
        /// Prebuilt voice for the assistant
        #[arg(long, env = "DEELITE_VOICE")]
        voice: Option<Voice>,
        /// Input device name
        #[arg(long)]
        input: Option<String>,
        /// Output device name
        #[arg(long)]
        output: Option<String>,
        /// Print a microphone level meter
        #[arg(long)]
        levels: bool,
    },
    /// Suggest a sweet, a sour and a salty recipe from a photo of leftovers
    Analyze {
        /// Image file (jpeg, png, webp, heic)
        image: PathBuf,
        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },
    /// Text chat with Chef Dee-Lite
    Chat,
    /// Show today's kitchen lesson
    Lesson {
        /// Ignore the cached lesson
        #[arg(long)]
        refresh: bool,
    },
    /// List audio input and output devices
    Devices,
    /// Show the effective settings
    Config {
        /// Write the effective settings back to the settings file
        #[arg(long)]
        write: bool,
    },
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn,deelite=info",
        1 => "info,deelite=debug",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let mut settings: AppSettings = load_settings(&settings_path);
    settings.apply_env_overrides();
    if let Some(key) = cli.api_key {
        settings.api_key = Some(key);
        settings.normalize();
    }
    tracing::debug!(path = %settings_path.display(), "settings loaded");

    match cli.command {
        Command::Voice {
            voice,
            input,
            output,
            levels,
        } => {
            if let Some(voice) = voice {
                settings.voice = voice.to_string();
            }
            if input.is_some() {
                settings.input_device = input;
            }
            if output.is_some() {
                settings.output_device = output;
            }
            settings.normalize();
            commands::voice(&settings, levels).await
        }
        Command::Analyze { image, json } => commands::analyze(&settings, &image, json).await,
        Command::Chat => commands::chat(&settings).await,
        Command::Lesson { refresh } => commands::lesson(&settings, refresh).await,
        Command::Devices => {
            commands::devices();
            Ok(())
        }
        Command::Config { write } => commands::config(&settings, &settings_path, write),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_voice_subcommand_flags() {
        let cli = Cli::try_parse_from([
            "deelite", "-vv", "voice", "--voice", "kore", "--input", "USB Mic", "--levels",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Voice {
                voice,
                input,
                levels,
                ..
            } => {
                assert_eq!(voice, Some(Voice::Kore));
                assert_eq!(input.as_deref(), Some("USB Mic"));
                assert!(levels);
            }
            _ => panic!("expected voice subcommand"),
        }
    }

    #[test]
    fn rejects_unknown_voice() {
        assert!(Cli::try_parse_from(["deelite", "voice", "--voice", "Robot"]).is_err());
    }
}
