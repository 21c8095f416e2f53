use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use thermowatch::events::PipelineEvent;
use thermowatch::{ArtifactLayout, EventBroadcaster, RegenOrchestrator, Settings, WatchSupervisor};

#[derive(Parser)]
#[command(name = "thermowatch")]
#[command(about = "Detection-overlay regeneration for thermal inspection imagery")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show the resolved configuration
    Config,

    /// Regenerate artifacts for one detection record and exit
    Regen {
        /// Path to the `*_detections.json` file
        record: PathBuf,
    },

    /// Watch record directories and regenerate artifacts on change
    Watch {
        /// Directories to watch (defaults to `<output_root>/json`)
        #[arg(long = "dir")]
        dirs: Vec<PathBuf>,

        /// Quiet period in milliseconds (overrides config)
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load().map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;
    thermowatch::logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => {
            let path = PathBuf::from(".thermowatch/settings.toml");
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Settings::default()
                .save(&path)
                .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))?;
            println!("Wrote {}", path.display());
        }

        Commands::Config => {
            let rendered = toml::to_string_pretty(&settings)?;
            print!("{rendered}");
        }

        Commands::Regen { record } => {
            let layout = ArtifactLayout::new(settings.output_root.clone());
            let broadcaster = EventBroadcaster::default();
            let orchestrator = RegenOrchestrator::new(layout, broadcaster, &settings.watch);

            orchestrator
                .regenerate(&record)
                .await
                .with_context(|| format!("regeneration failed for {}", record.display()))?;
            println!("Regenerated artifacts for {}", record.display());
        }

        Commands::Watch { dirs, debounce_ms } => {
            if let Some(ms) = debounce_ms {
                settings.watch.debounce_ms = ms;
            }

            let layout = ArtifactLayout::new(settings.output_root.clone());
            layout
                .ensure_dirs()
                .with_context(|| format!("cannot create {}", layout.root().display()))?;

            let broadcaster = EventBroadcaster::default();
            let orchestrator =
                RegenOrchestrator::new(layout.clone(), broadcaster.clone(), &settings.watch);
            let mut supervisor = WatchSupervisor::new(
                layout,
                orchestrator,
                broadcaster.clone(),
                settings.watch.clone(),
            );

            supervisor.start(dirs)?;

            // Narrate pipeline events until interrupted.
            let mut events = broadcaster.subscribe();
            let narrator = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    match event {
                        PipelineEvent::RegenerationSucceeded { path } => {
                            println!("updated   {}", path.display());
                        }
                        PipelineEvent::RegenerationFailed { path, kind } => {
                            println!("failed    {} ({kind:?})", path.display());
                        }
                        PipelineEvent::RecordRemoved { path } => {
                            println!("removed   {}", path.display());
                        }
                        _ => {}
                    }
                }
            });

            println!("Watching for record changes (Ctrl-C to stop)");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;

            supervisor.stop().await?;
            narrator.abort();
        }
    }

    Ok(())
}
