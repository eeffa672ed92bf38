//! Headless driver for the Vellum conversion core.
//!
//! Runs one command against the core and prints the response plus every
//! job event as JSON lines on stdout, which is the protocol the viewer
//! shell consumes.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use vellum_core::commands;
use vellum_core::pipeline::{ConvertOptions, PageSet};
use vellum_core::{Config, ViewerEvent, ViewerState};

#[derive(Parser, Debug)]
#[command(name = "vellum")]
#[command(about = "Staged DjVu-to-PDF conversion for the Vellum viewer")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a document for staged viewing and stream events until the
    /// final result
    View {
        /// Source document
        file: PathBuf,
    },
    /// Convert a document to PDF
    Convert {
        /// Source document
        file: PathBuf,
        /// Output PDF path
        output: PathBuf,
        /// Page subset, e.g. "1-5" or "1,4,9" (default: all pages)
        #[arg(long)]
        pages: Option<String>,
        /// Divide the source resolution by this factor
        #[arg(long, default_value_t = 1)]
        dpi_divisor: u32,
        /// Skip outline embedding
        #[arg(long)]
        no_outline: bool,
    },
    /// Print source metadata
    Info {
        /// Source document
        file: PathBuf,
    },
}

/// Initialize tracing/logging with the given directives. Logs go to stderr
/// so stdout stays a clean JSON-lines event channel.
fn init_logging(directives: &[&str]) {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in directives {
        filter = filter.add_directive(directive.parse().unwrap());
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&["vellum_core=info", "vellum_cli=info"]);
    let args = Args::parse();

    let config = Config::load_or_default();
    config
        .ensure_dirs()
        .context("failed to create the temp area")?;
    tracing::info!("Temp area: {:?}", config.temp_root);
    let (state, events) = ViewerState::new(config)?;

    match args.command {
        Command::View { file } => view(&state, events, &file).await,
        Command::Convert {
            file,
            output,
            pages,
            dpi_divisor,
            no_outline,
        } => {
            let options = ConvertOptions {
                pages: parse_pages(pages.as_deref())?,
                resolution_divisor: dpi_divisor,
                preserve_outline: !no_outline,
            };
            convert(&state, events, &file, &output, options).await
        }
        Command::Info { file } => {
            let info = commands::get_info(&state, &file.display().to_string())
                .await
                .map_err(|e| anyhow!("{e}"))?;
            println!("{}", serde_json::to_string(&info)?);
            Ok(())
        }
    }
}

async fn view(
    state: &ViewerState,
    mut events: mpsc::UnboundedReceiver<ViewerEvent>,
    file: &PathBuf,
) -> Result<()> {
    let response = commands::open_for_viewing(state, &file.display().to_string())
        .await
        .map_err(|e| anyhow!("{e}"))?;
    println!("{}", serde_json::to_string(&response)?);

    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
        if event.is_terminal() && event.job_id() == response.job_id {
            if matches!(event, ViewerEvent::ViewingError { .. }) {
                std::process::exit(1);
            }
            break;
        }
    }
    Ok(())
}

async fn convert(
    state: &ViewerState,
    mut events: mpsc::UnboundedReceiver<ViewerEvent>,
    file: &PathBuf,
    output: &PathBuf,
    options: ConvertOptions,
) -> Result<()> {
    let task_state = state.clone();
    let source = file.display().to_string();
    let target = output.display().to_string();
    let mut task = tokio::spawn(async move {
        commands::convert_to_target(&task_state, &source, Some(&target), options).await
    });

    // stream progress while the conversion runs
    let result = loop {
        tokio::select! {
            event = events.recv() => {
                if let Some(event) = event {
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
            result = &mut task => break result.context("conversion task panicked")?,
        }
    };
    // whatever the pipeline published right before finishing
    while let Ok(event) = events.try_recv() {
        println!("{}", serde_json::to_string(&event)?);
    }

    let response = result.map_err(|e| anyhow!("{e}"))?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

/// `"1-5"` -> a range, `"1,4,9"` -> an explicit set, nothing -> all pages.
fn parse_pages(spec: Option<&str>) -> Result<PageSet> {
    let Some(spec) = spec else {
        return Ok(PageSet::All);
    };
    if let Some((from, to)) = spec.split_once('-') {
        let from = from.trim().parse().context("invalid page range")?;
        let to = to.trim().parse().context("invalid page range")?;
        return Ok(PageSet::Range { from, to });
    }
    let pages = spec
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .context("invalid page list")?;
    if pages.is_empty() {
        bail!("empty page list");
    }
    Ok(PageSet::Pages(pages))
}
