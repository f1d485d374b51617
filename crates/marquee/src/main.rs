use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use marquee_core::{
    ConfigManager, ConnectionState, ConsoleHandle, FileStore, MemoryStore, Settings, StateStore,
    SystemClock, Transition, ViewerEvent, ViewerHandle,
};
use marquee_program::{EventId, ItemRef};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

mod demo;

/// Show-state console and audience displays for live events.
#[derive(Parser, Debug)]
#[command(name = "marquee")]
#[command(about = "Marquee live show console")]
struct Args {
    /// Settings file (created with defaults if missing)
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON store file; an in-memory store is used when omitted
    #[arg(long)]
    store: Option<PathBuf>,

    /// Event to operate on
    #[arg(long, default_value = "spring-gala")]
    event: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted run-through with a console and several viewers
    Rehearse {
        /// Number of audience displays to attach
        #[arg(long, default_value = "2")]
        viewers: usize,

        /// Length of the scripted break, in minutes
        #[arg(long, default_value = "15")]
        break_minutes: i64,
    },
    /// Read operator commands from stdin and apply them
    Console,
    /// Print the configuration schema as JSON
    Schema,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ConfigManager::new(args.config.clone());
    let settings = config.load().context("loading settings")?;
    log::info!("Using settings from {}", config.config_path().display());

    let event_id = EventId::new(args.event.clone());

    match args.command {
        Command::Schema => {
            println!("{}", serde_json::to_string_pretty(&ConfigManager::schema())?);
            Ok(())
        }
        Command::Rehearse {
            viewers,
            break_minutes,
        } => {
            let store = open_store(args.store.as_ref(), &event_id, &settings)?;
            rehearse(store, event_id, &settings, viewers, break_minutes).await
        }
        Command::Console => {
            let store = open_store(args.store.as_ref(), &event_id, &settings)?;
            operate(store, event_id, &settings).await
        }
    }
}

fn open_store(
    path: Option<&PathBuf>,
    event_id: &EventId,
    settings: &Settings,
) -> Result<Arc<dyn StateStore>, anyhow::Error> {
    match path {
        Some(path) => {
            let store = FileStore::open(path.clone(), settings.feed_buffer)
                .with_context(|| format!("opening store {}", path.display()))?;
            if !store.contains(event_id) {
                log::info!("Seeding {} in {}", event_id, path.display());
                store.insert_event(demo::spring_gala(event_id))?;
            }
            Ok(Arc::new(store))
        }
        None => {
            let store = MemoryStore::new(settings.feed_buffer);
            store.insert_event(demo::spring_gala(event_id));
            Ok(Arc::new(store))
        }
    }
}

async fn rehearse(
    store: Arc<dyn StateStore>,
    event_id: EventId,
    settings: &Settings,
    viewers: usize,
    break_minutes: i64,
) -> Result<(), anyhow::Error> {
    let clock = Arc::new(SystemClock);

    let mut displays = Vec::new();
    for n in 0..viewers {
        let (viewer, events) =
            ViewerHandle::spawn(Arc::clone(&store), event_id.clone(), settings, clock.clone());
        let printer = tokio::spawn(print_viewer(n, events));
        displays.push((viewer, printer));
    }

    let (console, mut console_events) =
        ConsoleHandle::spawn(Arc::clone(&store), event_id.clone(), settings, clock);
    let console_log = tokio::spawn(async move {
        while let Some(event) = console_events.recv().await {
            log::debug!("console: {:?}", event);
        }
    });

    wait_live(&console).await?;

    let script = vec![
        Transition::Activate(ItemRef::new("act-1", 1)),
        Transition::Activate(ItemRef::new("act-1", 2)),
        Transition::Activate(ItemRef::new("act-1", 4)),
        Transition::StartBreak {
            item_ref: ItemRef::new("act-1", 5),
            minutes: break_minutes,
        },
        Transition::StopBreak(ItemRef::new("act-1", 5)),
        Transition::Activate(ItemRef::new("act-2", 1)),
        Transition::Activate(ItemRef::new("act-2", 2)),
        Transition::SetEncoreRevealed(true),
        Transition::Deactivate(ItemRef::new("act-2", 2)),
    ];

    for transition in script {
        log::info!("Operator: {}", transition);
        if let Err(e) = console.apply(transition).await {
            log::error!("{}", e);
        }
        tokio::time::sleep(settings.tick_interval() * 2).await;
    }

    console.shutdown().await;
    let _ = console_log.await;
    for (viewer, printer) in displays {
        viewer.shutdown().await;
        let _ = printer.await;
    }
    Ok(())
}

async fn operate(
    store: Arc<dyn StateStore>,
    event_id: EventId,
    settings: &Settings,
) -> Result<(), anyhow::Error> {
    let clock = Arc::new(SystemClock);
    let (viewer, viewer_events) =
        ViewerHandle::spawn(Arc::clone(&store), event_id.clone(), settings, clock.clone());
    let printer = tokio::spawn(print_viewer(0, viewer_events));
    let (console, _console_events) = ConsoleHandle::spawn(store, event_id, settings, clock);

    wait_live(&console).await?;
    println!("commands: activate C I | deactivate C I | break C I MIN | stop C I | encore on|off | show | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }
        if line == "show" {
            if let Some(snapshot) = console.snapshot().await? {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            continue;
        }
        match parse_transition(line) {
            Ok(transition) => match console.apply(transition).await {
                Ok(snapshot) => println!("ok, active: {:?}", snapshot.active_items()),
                Err(e) => println!("error: {}", e),
            },
            Err(e) => println!("{}", e),
        }
    }

    console.shutdown().await;
    viewer.shutdown().await;
    let _ = printer.await;
    Ok(())
}

fn parse_transition(line: &str) -> Result<Transition, anyhow::Error> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let item = |container: &str, index: &str| -> Result<ItemRef, anyhow::Error> {
        let index = index
            .parse()
            .map_err(|e| anyhow!("invalid index {}: {}", index, e))?;
        Ok(ItemRef::new(container, index))
    };

    match words.as_slice() {
        ["activate", c, i] => Ok(Transition::Activate(item(c, i)?)),
        ["deactivate", c, i] => Ok(Transition::Deactivate(item(c, i)?)),
        ["break", c, i, minutes] => Ok(Transition::StartBreak {
            item_ref: item(c, i)?,
            minutes: minutes
                .parse()
                .map_err(|e| anyhow!("invalid minutes {}: {}", minutes, e))?,
        }),
        ["stop", c, i] => Ok(Transition::StopBreak(item(c, i)?)),
        ["encore", "on"] => Ok(Transition::SetEncoreRevealed(true)),
        ["encore", "off"] => Ok(Transition::SetEncoreRevealed(false)),
        _ => bail!("unknown command: {}", line),
    }
}

async fn wait_live(console: &ConsoleHandle) -> Result<(), anyhow::Error> {
    for _ in 0..100 {
        match console.connection().await? {
            ConnectionState::Live => return Ok(()),
            ConnectionState::Lost => bail!("change feed unavailable"),
            _ => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    bail!("timed out waiting for the change feed")
}

async fn print_viewer(n: usize, mut events: mpsc::UnboundedReceiver<ViewerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ViewerEvent::StateChanged { state } => {
                let now_showing = state.active_title.as_deref().unwrap_or("-");
                let encore = if state.encore_revealed { " [encore]" } else { "" };
                println!("[display {}] now: {}{}", n, now_showing, encore);
            }
            ViewerEvent::Countdown { display, .. } => {
                println!("[display {}] break ends in {}", n, display);
            }
            ViewerEvent::ConnectionChanged { state } => {
                println!("[display {}] feed {}", n, state);
            }
            ViewerEvent::ShutdownComplete => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transition() {
        assert_eq!(
            parse_transition("break act-1 5 10").unwrap(),
            Transition::StartBreak {
                item_ref: ItemRef::new("act-1", 5),
                minutes: 10
            }
        );
        assert_eq!(
            parse_transition("encore on").unwrap(),
            Transition::SetEncoreRevealed(true)
        );
        assert!(parse_transition("activate act-1 x").is_err());
        assert!(parse_transition("jump").is_err());
    }
}
