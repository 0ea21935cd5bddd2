use anyhow::Result;
use clap::{CommandFactory, Parser};
use omnivoice::app::{TalkOptions, run_talk_command};
use omnivoice::audio::{list_input_devices, list_output_devices};
use omnivoice::cli::{Cli, Commands, ConfigAction};
use omnivoice::config::Config;
use omnivoice::session::SessionState;
use owo_colors::OwoColorize;

#[tokio::main]
async fn main() -> Result<()> {
    omnivoice::audio::capture::suppress_audio_warnings();
    let cli = Cli::parse();
    omnivoice::logging::init(cli.verbose, cli.quiet);
    tracing::debug!(version = %omnivoice::version_string(), "omnivoice starting");

    match cli.command {
        None | Some(Commands::Talk) => {
            let config = load_config(cli.config.as_deref())?;
            let options = TalkOptions {
                device: cli.device,
                output_device: cli.output_device,
                model: cli.model,
                voice: cli.voice,
                input_wav: cli.input_wav,
                max_duration: cli.max_duration,
                quiet: cli.quiet,
            };
            let state = run_talk_command(config, options).await?;
            report_outcome(&state, cli.quiet);
            if state.failure().is_some() {
                std::process::exit(1);
            }
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "omnivoice", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Load configuration from a custom path or the default location, then apply
/// environment overrides.
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };
    Ok(config.with_env_overrides())
}

fn report_outcome(state: &SessionState, quiet: bool) {
    match state.failure() {
        Some(failure) => {
            eprintln!("{} {}", "Session failed:".red().bold(), failure.user_message());
            eprintln!("  {} {}", "Reason:".dimmed(), failure.reason);
        }
        None if !quiet => eprintln!("{}", "Neural link closed.".dimmed()),
        None => {}
    }
}

/// List available audio input and output devices.
fn list_audio_devices() -> Result<()> {
    let inputs = list_input_devices()?;
    let outputs = list_output_devices()?;

    if inputs.is_empty() && outputs.is_empty() {
        eprintln!("No audio devices found");
        std::process::exit(1);
    }

    println!("{}", "Input devices:".bold());
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    println!("{}", "Output devices:".bold());
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&std::path::Path>) -> Result<()> {
    let path = custom_path
        .map(std::path::Path::to_path_buf)
        .or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let mut config = load_config(custom_path)?;
            if config.live.api_key.is_some() {
                config.live.api_key = Some("<set>".to_string());
            }
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => match path {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("no configuration directory on this system"),
        },
        ConfigAction::Init { force } => {
            let Some(path) = path else {
                anyhow::bail!("no configuration directory on this system");
            };
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, Config::default().to_toml()?)?;
            println!("{} {}", "Wrote".green(), path.display());
        }
    }
    Ok(())
}
