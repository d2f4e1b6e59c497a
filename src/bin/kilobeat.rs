//! kilobeat - headless live-coding client
//!
//! Reads one program per line from stdin and plays it on the default output
//! device. Lines starting with `:` are commands:
//!
//! - `:reset` - re-zero the shared clock
//! - `:record` / `:stop <file>` - capture a session to a file
//! - `:play <file>` - replay a recording
//! - `:connect [addr]` / `:disconnect` - join or leave a hub
//! - `:preset <name>` - load and run a preset
//! - `:add` / `:select <id>` - manage local participants (offline only)
//! - `:pose <x> <y> <angle>` - move the selected speaker
//! - `:volume <0..1>` - master volume
//! - `:quit`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use kilobeat::driver::{Command, Driver};
use kilobeat::program::PRESETS;
use kilobeat::protocol::{Position, Selection};
use kilobeat::session::{EditorSurface, TextBuffer};
use kilobeat::{CpalDevice, KilobeatConfig, ParticipantId, Pose, Router, Session};

#[derive(Parser)]
#[command(name = "kilobeat")]
#[command(about = "Collaborative live-coded audio")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Connect to this hub on startup
    #[arg(long)]
    connect: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.list_devices {
        for device in CpalDevice::list_outputs() {
            println!("{} ({} Hz, {} ch)", device.name(), device.sample_rate(), device.channels());
        }
        return Ok(());
    }

    let config = KilobeatConfig::load_from(cli.config.as_deref()).context("loading config")?;

    let device = CpalDevice::default_output().context("opening audio device")?;
    info!(device = device.name(), sample_rate = device.sample_rate(), "audio output");
    if device.sample_rate() != config.audio.sample_rate {
        info!(
            configured = config.audio.sample_rate,
            "using the device sample rate instead of the configured one"
        );
    }

    let router = Router::new(device.sample_rate())
        .with_tap_capacity(config.audio.tap_capacity)
        .with_output(device.create_sink().context("starting audio stream")?);
    let mut session = Session::new(router)
        .with_display(config.display.clone())
        .with_editor_factory(Box::new(|id| {
            Box::new(LoggedEditor::new(id)) as Box<dyn EditorSurface>
        }));
    session.set_volume(config.audio.master_volume);

    let (commands, rx) = tokio::sync::mpsc::unbounded_channel();
    if let Some(addr) = cli.connect {
        let _ = commands.send(Command::Connect(Some(addr)));
    }

    tokio::spawn(read_stdin(commands.clone()));
    tokio::spawn({
        let commands = commands.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received SIGINT, shutting down...");
                let _ = commands.send(Command::Shutdown);
            }
        }
    });
    drop(commands);

    Driver::new(session, config).run(rx).await;
    info!("Shutdown complete");
    Ok(())
}

/// A headless editor that logs every change of a participant's code.
struct LoggedEditor {
    id: ParticipantId,
    buffer: TextBuffer,
}

impl LoggedEditor {
    fn new(id: ParticipantId) -> Self {
        Self {
            id,
            buffer: TextBuffer::default(),
        }
    }
}

impl EditorSurface for LoggedEditor {
    fn content(&self) -> String {
        self.buffer.content()
    }

    fn cursor(&self) -> Position {
        self.buffer.cursor()
    }

    fn selections(&self) -> Vec<Selection> {
        self.buffer.selections()
    }

    fn set_value(&mut self, content: &str) {
        if self.buffer.content() != content {
            info!(participant = %self.id, code = content, "editor changed");
        }
        self.buffer.set_value(content);
    }

    fn set_cursor(&mut self, cursor: Position) {
        self.buffer.set_cursor(cursor);
    }

    fn set_selections(&mut self, selections: &[Selection]) {
        self.buffer.set_selections(selections);
    }
}

async fn read_stdin(commands: UnboundedSender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "stdin closed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == ":presets" {
            for preset in PRESETS {
                println!("{:>10}  {}", preset.name, preset.code);
            }
            continue;
        }
        match parse_line(line) {
            Ok(parsed) => {
                for command in parsed {
                    if commands.send(command).is_err() {
                        return;
                    }
                }
            }
            Err(message) => eprintln!("{message}"),
        }
    }
    let _ = commands.send(Command::Shutdown);
}

fn parse_line(line: &str) -> Result<Vec<Command>, String> {
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(vec![Command::SetCode(line.to_string()), Command::Run]);
    };
    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let command = match (name, args.as_slice()) {
        ("reset", []) => Command::Reset,
        ("record", []) => Command::Record,
        ("stop", [path]) => Command::Stop(PathBuf::from(path)),
        ("play", [path]) => Command::Play(PathBuf::from(path)),
        ("connect", []) => Command::Connect(None),
        ("connect", [addr]) => Command::Connect(Some(addr.to_string())),
        ("disconnect", []) => Command::Disconnect,
        ("preset", [preset]) => {
            return Ok(vec![Command::Preset(preset.to_string()), Command::Run]);
        }
        ("add", []) => Command::AddLocal,
        ("select", [id]) => Command::Select(ParticipantId(parse(id)?)),
        ("pose", [x, y, angle]) => Command::Pose(Pose {
            x: parse(x)?,
            y: parse(y)?,
            angle: parse(angle)?,
        }),
        ("volume", [frac]) => Command::Volume(parse(frac)?),
        ("quit", []) => Command::Shutdown,
        _ => return Err(format!("unknown command `:{rest}`")),
    };
    Ok(vec![command])
}

fn parse<T: std::str::FromStr>(word: &str) -> Result<T, String> {
    word.parse().map_err(|_| format!("bad argument `{word}`"))
}
