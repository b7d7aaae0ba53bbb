//! Interactive terminal front end.
//!
//! The shell only translates typed commands into controller operations and
//! renders controller events. It holds no scan state of its own.
//!
//! ```text
//! stage-scan> start tiles=4 frequency=20
//! stage-scan> next
//! stage-scan> stop
//! stage-scan> return
//! Have you turned off the lasers? [y/N] y
//! stage-scan> goto 1000 2000 0
//! ```

use crate::controller::ScanController;
use crate::events::ScanEvent;
use crate::params::ScanInput;
use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

const PROMPT: &str = "stage-scan> ";
const LASER_PROMPT: &str = "Have you turned off the lasers? [y/N] ";
const PROGRESS_WIDTH: usize = 20;

const HELP: &str = "\
Commands:
  start [field=value ...]  start a scan (fields: x_speed, y_speed,
                           trigger_frequency|frequency, y_scan_distance|distance,
                           tile_count|tiles, x_tile_step|step; distances in mm)
  next                     continue with the next tile
  stop                     stop the scan, disable trigger, halt stage
  return                   move back to the initial position of the last scan
  goto X Y Z               absolute move (device units)
  status                   show scan state and initial position
  help                     show this text
  quit                     stop any scan and exit";

/// One parsed shell command.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// `start [field=value ...]`
    Start(Vec<(String, String)>),
    /// `next`
    Next,
    /// `stop`
    Stop,
    /// `return`
    Return,
    /// `goto X Y Z`
    Goto {
        /// Raw X field
        x: String,
        /// Raw Y field
        y: String,
        /// Raw Z field
        z: String,
    },
    /// `status`
    Status,
    /// `help`
    Help,
    /// `quit`
    Quit,
    /// Blank line
    Empty,
}

/// Parse one input line.
///
/// # Errors
/// Returns a usage message for unknown commands or malformed arguments.
pub fn parse_intent(line: &str) -> std::result::Result<Intent, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(Intent::Empty);
    };
    let args: Vec<&str> = words.collect();

    match command.to_lowercase().as_str() {
        "start" => {
            let mut fields = Vec::with_capacity(args.len());
            for arg in args {
                let (field, value) = arg
                    .split_once('=')
                    .ok_or_else(|| format!("Expected field=value, got '{}'", arg))?;
                fields.push((field.to_string(), value.to_string()));
            }
            Ok(Intent::Start(fields))
        }
        "next" | "n" => no_args(Intent::Next, &args),
        "stop" | "s" => no_args(Intent::Stop, &args),
        "return" => no_args(Intent::Return, &args),
        "goto" | "move" => match args.as_slice() {
            [x, y, z] => Ok(Intent::Goto {
                x: x.to_string(),
                y: y.to_string(),
                z: z.to_string(),
            }),
            _ => Err("Usage: goto X Y Z".to_string()),
        },
        "status" => no_args(Intent::Status, &args),
        "help" | "?" => Ok(Intent::Help),
        "quit" | "exit" | "q" => Ok(Intent::Quit),
        other => Err(format!("Unknown command '{}'. Type 'help'.", other)),
    }
}

fn no_args(intent: Intent, args: &[&str]) -> std::result::Result<Intent, String> {
    if args.is_empty() {
        Ok(intent)
    } else {
        Err(format!("'{:?}' takes no arguments", intent).to_lowercase())
    }
}

/// Textual progress bar, e.g. `[##########----------] 5/10`.
pub fn progress_bar(current: u32, total: u32) -> String {
    let filled = if total == 0 {
        0
    } else {
        (current.min(total) as usize * PROGRESS_WIDTH) / total as usize
    };
    format!(
        "[{}{}] {}/{}",
        "#".repeat(filled),
        "-".repeat(PROGRESS_WIDTH - filled),
        current,
        total
    )
}

/// Render one event as a display line.
pub fn render_event(event: &ScanEvent) -> String {
    match event {
        ScanEvent::Log { level, text } => format!("[{}] {}", level, text),
        ScanEvent::Progress { current, total } => progress_bar(*current, *total),
        ScanEvent::State(state) => format!("state: {}", state),
    }
}

/// Print controller events to stdout until the controller goes away.
pub fn spawn_event_printer(mut events: broadcast::Receiver<ScanEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", render_event(&event)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    println!("[WARN] {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Read-eval loop over `input`, writing prompts and replies to `output`.
///
/// `defaults` seeds every `start`; fields given on the command line override
/// it for that run only. Ends on `quit` or end of input, stopping any active
/// scan first.
pub async fn run_shell<R, W>(
    controller: &ScanController,
    defaults: &ScanInput,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    write_out(&mut output, HELP).await?;

    loop {
        prompt(&mut output, PROMPT).await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let intent = match parse_intent(&line) {
            Ok(intent) => intent,
            Err(usage) => {
                write_out(&mut output, &usage).await?;
                continue;
            }
        };
        debug!(?intent, "Shell command");

        match intent {
            Intent::Empty => {}
            Intent::Start(fields) => {
                let mut input = defaults.clone();
                let mut unknown = Vec::new();
                for (field, value) in &fields {
                    if !input.set(field, value.as_str()) {
                        unknown.push(field.as_str());
                    }
                }
                if !unknown.is_empty() {
                    write_out(&mut output, &format!("Unknown field(s): {}", unknown.join(", ")))
                        .await?;
                    continue;
                }
                // Failures are reported through the event stream
                let _ = controller.start(&input);
            }
            Intent::Next => {
                let _ = controller.next();
            }
            Intent::Stop => controller.stop(),
            Intent::Return => {
                let confirmed = confirm(&mut lines, &mut output, LASER_PROMPT).await?;
                let _ = controller.return_to_start(confirmed).await;
            }
            Intent::Goto { x, y, z } => {
                let _ = controller.manual_move(&x, &y, &z).await;
            }
            Intent::Status => {
                let origin = controller
                    .origin()
                    .map_or_else(|| "none".to_string(), |p| p.to_string());
                write_out(
                    &mut output,
                    &format!("state: {}, initial position: {}", controller.state(), origin),
                )
                .await?;
            }
            Intent::Help => write_out(&mut output, HELP).await?,
            Intent::Quit => break,
        }
    }

    controller.shutdown().await;
    Ok(())
}

async fn confirm<R, W>(lines: &mut Lines<R>, output: &mut W, question: &str) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    prompt(output, question).await?;
    let answer = lines.next_line().await?.unwrap_or_default();
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn prompt<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

async fn write_out<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}
