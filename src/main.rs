use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use termgroups::config::Config;
use termgroups::groups::{InstanceProcessEvent, InstanceSeed, TerminalGroupService};
use termgroups::model::control_event::GroupEvent;
use termgroups::services::process::ProcessEvent;
use termgroups::services::tracing_setup;

#[derive(Parser, Debug)]
#[command(name = "termgroups")]
#[command(about = "Run groups of terminal processes and supervise their lifecycle", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch every group of the configured layout and stream its output
    Run {
        /// Configuration file (JSON)
        #[arg(long, value_name = "PATH")]
        config: PathBuf,

        /// Write logs to this file instead of stderr
        #[arg(long, value_name = "PATH")]
        log_file: Option<PathBuf>,

        /// Override terminal.exit_timeout_ms
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },
    /// Print an example configuration and exit
    PrintDefaultConfig,
}

fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::PrintDefaultConfig => {
            let json = serde_json::to_string_pretty(&Config::example())
                .context("Failed to serialize config")?;
            println!("{json}");
            Ok(())
        }
        Command::Run {
            config,
            log_file,
            timeout_ms,
        } => {
            let mut config = Config::load_from_file(&config)
                .with_context(|| format!("Failed to load config from {}", config.display()))?;
            if let Some(timeout_ms) = timeout_ms {
                config.terminal.exit_timeout_ms = timeout_ms;
            }
            if log_file.is_some() {
                config.logging.log_file = log_file;
            }
            config.validate().context("Invalid configuration")?;

            tracing_setup::init_global(config.logging.log_file.as_deref())?;

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;
            runtime.block_on(run(config))
        }
    }
}

async fn run(config: Config) -> AnyhowResult<()> {
    let timeout = config.terminal.exit_timeout();
    let mut service = TerminalGroupService::new(config.terminal.clone());
    let group_events = service.subscribe();

    for launches in &config.layout.groups {
        let Some((first, rest)) = launches.split_first() else {
            continue;
        };
        service.create_group(InstanceSeed::Launch(first.clone()));
        let Some(mut parent) = service.groups().last().map(|g| g.instances()[0].id()) else {
            continue;
        };
        for launch in rest {
            match service.split_instance(parent, InstanceSeed::Launch(launch.clone())) {
                Some(id) => parent = id,
                None => break,
            }
        }
    }

    if service.is_empty() {
        tracing::warn!("layout is empty, nothing to run");
        return Ok(());
    }
    service.set_active_group_by_index(0);
    tracing::info!(
        "running {} terminals in {} groups",
        service.instance_count(),
        service.group_count()
    );

    loop {
        tokio::select! {
            event = service.next_process_event() => {
                let Some(event) = event else { break };
                print_event(&service, &event);
                service.handle_process_event(&event);
                for change in group_events.try_iter() {
                    if let GroupEvent::InstanceDisposed { instance } = change {
                        tracing::debug!("{} disposed", instance);
                    }
                }
                if service.is_empty() {
                    tracing::info!("all terminals exited");
                    break;
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                tracing::info!("interrupted, stopping terminals");
                service.shutdown(timeout).await;
                break;
            }
        }
    }

    Ok(())
}

fn print_event(service: &TerminalGroupService, event: &InstanceProcessEvent) {
    let title = service
        .instance(event.instance)
        .map(|instance| instance.title().to_string())
        .unwrap_or_else(|| event.instance.to_string());

    match &event.event {
        ProcessEvent::Stdout(text) => print_prefixed(&title, text, false),
        ProcessEvent::Stderr(text) => print_prefixed(&title, text, true),
        ProcessEvent::Message(message) => println!("[{title}] message: {message}"),
        ProcessEvent::Spawn { pid } => println!("[{title}] started (pid {pid})"),
        ProcessEvent::Exit(info) => match info.code {
            Some(code) => println!("[{title}] exited with code {code}"),
            None => println!("[{title}] exited ({:?})", info.reason),
        },
    }
}

fn print_prefixed(title: &str, text: &str, stderr: bool) {
    for line in text.lines() {
        if stderr {
            eprintln!("[{title}] {line}");
        } else {
            println!("[{title}] {line}");
        }
    }
}
