//! livecam - Drive the dual-channel live detection view from a terminal.
//!
//! Commands are read one per line from stdin:
//!
//! ```text
//! url <plate|object> <camera-url>   set (or with no url, clear) a camera
//! detect <plate|object>             run one detection now
//! auto <plate|object> <on|off>      toggle auto-polling
//! status                            print both channels
//! quit
//! ```

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use livecam_detect::{
    ChannelKind, FrameView, HttpDetectionService, LiveCamConfig, LiveView, SystemClock,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Live plate and object detection against a remote detection service"
)]
struct Args {
    /// Detection service base URL (overrides config).
    #[arg(long, env = "LIVECAM_DETECTION_URL")]
    detection_url: Option<String>,

    /// Plate camera URL to load at start.
    #[arg(long, env = "LIVECAM_PLATE_CAMERA_URL")]
    plate_url: Option<String>,

    /// Object camera URL to load at start.
    #[arg(long, env = "LIVECAM_OBJECT_CAMERA_URL")]
    object_url: Option<String>,

    /// Channels to start auto-polling immediately (plate, object).
    #[arg(long, env = "LIVECAM_AUTO_POLL", value_delimiter = ',')]
    auto: Vec<ChannelKind>,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Url(ChannelKind, String),
    Detect(ChannelKind),
    Auto(ChannelKind, bool),
    Status,
    Quit,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = LiveCamConfig::load()?;
    if let Some(url) = args.detection_url {
        cfg.detection_url = url;
    }
    if args.plate_url.is_some() {
        cfg.cameras.plate = args.plate_url;
    }
    if args.object_url.is_some() {
        cfg.cameras.object = args.object_url;
    }

    let service = HttpDetectionService::new(&cfg.detection_url, cfg.request_timeout)
        .context("configure detection service")?;
    let mut view = LiveView::mount(
        Arc::new(service),
        Arc::new(SystemClock),
        cfg.view_settings(),
    );
    log::info!("detection service: {}", cfg.detection_url);

    for (kind, url) in [
        (ChannelKind::Plate, cfg.cameras.plate.as_deref()),
        (ChannelKind::Object, cfg.cameras.object.as_deref()),
    ] {
        if let Some(url) = url {
            view.set_camera_url(kind, url)
                .map_err(|e| anyhow!("{} camera: {}", kind, e))?;
        }
    }
    for kind in args.auto {
        view.set_auto_poll(kind, true)
            .with_context(|| format!("start {} auto-poll", kind))?;
    }

    let stdin = io::stdin();
    let result = run_commands(stdin.lock(), &mut view);
    view.shutdown()?;
    result
}

fn run_commands<R: BufRead>(reader: R, view: &mut LiveView) -> Result<()> {
    let mut out = io::stdout();
    for line in reader.lines() {
        let line = line.context("failed to read stdin")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let command = match parse_command(trimmed) {
            Ok(command) => command,
            Err(err) => {
                writeln!(out, "error: {}", err)?;
                continue;
            }
        };
        match command {
            Command::Quit => break,
            Command::Status => {
                for kind in ChannelKind::ALL {
                    print_channel(&mut out, view, kind)?;
                }
            }
            Command::Url(kind, url) => match view.set_camera_url(kind, &url) {
                Ok(()) => print_channel(&mut out, view, kind)?,
                Err(err) => writeln!(out, "{}: {}", kind, err)?,
            },
            Command::Detect(kind) => match view.detect(kind) {
                Ok(report) => {
                    writeln!(out, "{}: ok after {} attempt(s)", kind, report.attempts)?;
                    print_channel(&mut out, view, kind)?;
                }
                Err(err) => writeln!(out, "{}: {}", kind, err)?,
            },
            Command::Auto(kind, enabled) => match view.set_auto_poll(kind, enabled) {
                Ok(()) => writeln!(
                    out,
                    "{}: auto-poll {}",
                    kind,
                    if view.is_auto_polling(kind) { "on" } else { "off" }
                )?,
                Err(err) => writeln!(out, "{}: {}", kind, err)?,
            },
        }
    }
    Ok(())
}

fn parse_command(line: &str) -> Result<Command> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().ok_or_else(|| anyhow!("empty command"))?;
    let command = match verb {
        "status" => Command::Status,
        "quit" | "exit" => Command::Quit,
        "detect" => Command::Detect(next_channel(verb, &mut parts)?),
        "url" => {
            let kind = next_channel(verb, &mut parts)?;
            Command::Url(kind, parts.next().unwrap_or("").to_string())
        }
        "auto" => {
            let kind = next_channel(verb, &mut parts)?;
            let enabled = match parts.next() {
                Some("on") => true,
                Some("off") => false,
                _ => return Err(anyhow!("auto needs 'on' or 'off'")),
            };
            Command::Auto(kind, enabled)
        }
        other => return Err(anyhow!("unknown command '{}'", other)),
    };
    Ok(command)
}

fn next_channel<'a>(verb: &str, parts: &mut impl Iterator<Item = &'a str>) -> Result<ChannelKind> {
    parts
        .next()
        .ok_or_else(|| anyhow!("{} needs a channel (plate or object)", verb))?
        .parse()
}

fn print_channel<W: Write>(out: &mut W, view: &LiveView, kind: ChannelKind) -> Result<()> {
    let channel = view.channel(kind);
    let shown = match view.display(kind) {
        FrameView::Blank => "no camera".to_string(),
        FrameView::Live(url) => format!("live {}", url),
        FrameView::Processed(frame) => {
            format!("processed {}x{} {}", frame.width(), frame.height(), frame.mime())
        }
    };
    writeln!(
        out,
        "{}: {:?} | {} | auto-poll {} | success rate {} ({}/{})",
        kind,
        channel.phase(),
        shown,
        if channel.auto_polling() { "on" } else { "off" },
        channel.stats(),
        channel.stats().successful(),
        channel.stats().total()
    )?;
    if let Some(at) = channel.last_detection_at() {
        writeln!(out, "  last detection: {}", at)?;
    }
    for line in channel.payload().lines() {
        writeln!(out, "  {}", line)?;
    }
    if let Some(err) = channel.last_error() {
        writeln!(out, "  error: {}", err)?;
    }
    Ok(())
}
