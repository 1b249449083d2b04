//! Live viewer editing from stdin
//!
//! ```text
//! add <delay> <fps> [camera]
//! remove <viewer>
//! delay <viewer> <secs>
//! rate <viewer> <fps>
//! list
//! quit
//! ```

use std::io::BufRead;
use std::time::Duration;

use flume::Sender;
use tracing::{debug, warn};

use crate::capture::SourceId;
use crate::error::ConfigError;
use crate::pipeline::{FrameStore, ViewerId, ViewerSettings};

use super::validate::{parse_delay, parse_rate, parse_source, RateCap};

/// One validated edit, applied by the render loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerCommand {
    Add(ViewerSettings),
    Remove(ViewerId),
    SetDelay(ViewerId, Duration),
    SetRate(ViewerId, f64),
    List,
    Quit,
}

fn viewer_id(arg: Option<&str>) -> Result<ViewerId, ConfigError> {
    let arg = arg.ok_or(ConfigError::MissingArgument("viewer"))?;
    arg.parse::<u32>()
        .map(ViewerId)
        .map_err(|_| ConfigError::NotANumber(arg.into()))
}

fn native_rate(store: &FrameStore, source: SourceId) -> Result<f64, ConfigError> {
    store
        .native_rate(source)
        .ok_or(ConfigError::UnknownSource(source))
}

/// Parses one console line. Blank lines yield `None`.
///
/// Rates are checked against the native rate of the camera they apply to;
/// `rate` checks against the fastest camera since the viewer's own camera is
/// only known to the registry.
pub fn parse_command(line: &str, store: &FrameStore) -> Result<Option<ViewerCommand>, ConfigError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "add" => {
            let delay = parse_delay(words.next().ok_or(ConfigError::MissingArgument("delay"))?)?;
            let fps = words.next().ok_or(ConfigError::MissingArgument("fps"))?;
            let source = match words.next() {
                Some(arg) => parse_source(arg)?,
                None => store.sources().next().unwrap_or_default(),
            };
            let rate = parse_rate(fps, native_rate(store, source)?, RateCap::Reject)?;
            ViewerCommand::Add(ViewerSettings::new(delay, rate, source))
        }
        "remove" | "rm" => ViewerCommand::Remove(viewer_id(words.next())?),
        "delay" => {
            let id = viewer_id(words.next())?;
            let delay = parse_delay(words.next().ok_or(ConfigError::MissingArgument("delay"))?)?;
            ViewerCommand::SetDelay(id, delay)
        }
        "rate" | "fps" => {
            let id = viewer_id(words.next())?;
            let fps = words.next().ok_or(ConfigError::MissingArgument("fps"))?;
            let fastest = store
                .sources()
                .filter_map(|s| store.native_rate(s))
                .fold(0.0, f64::max);
            ViewerCommand::SetRate(id, parse_rate(fps, fastest, RateCap::Reject)?)
        }
        "list" | "ls" => ViewerCommand::List,
        "quit" | "q" => ViewerCommand::Quit,
        other => return Err(ConfigError::UnknownCommand(other.into())),
    };
    Ok(Some(command))
}

/// Reads commands from `input` until it closes or the receiver goes away.
///
/// Blocks on input, so the thread running it is left detached at shutdown.
pub fn run_console<R: BufRead>(input: R, store: &FrameStore, commands: Sender<ViewerCommand>) {
    for line in input.lines() {
        let Ok(line) = line else {
            break;
        };
        match parse_command(&line, store) {
            Ok(Some(command)) => {
                debug!(?command, "console command");
                if commands.send(command).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FrameStore {
        let mut store = FrameStore::new();
        store.register(SourceId(0), 30.0);
        store.register(SourceId(1), 15.0);
        store
    }

    #[test]
    fn parses_every_verb() {
        let store = store();
        let add = parse_command("add 1.5 20", &store).unwrap().unwrap();
        assert_eq!(
            add,
            ViewerCommand::Add(ViewerSettings::new(Duration::from_millis(1500), 20.0, SourceId(0)))
        );
        assert_eq!(
            parse_command("remove 3", &store).unwrap(),
            Some(ViewerCommand::Remove(ViewerId(3)))
        );
        assert_eq!(
            parse_command("delay 2 0.25", &store).unwrap(),
            Some(ViewerCommand::SetDelay(ViewerId(2), Duration::from_millis(250)))
        );
        assert_eq!(
            parse_command("rate 2 10", &store).unwrap(),
            Some(ViewerCommand::SetRate(ViewerId(2), 10.0))
        );
        assert_eq!(parse_command("LIST", &store).unwrap(), Some(ViewerCommand::List));
        assert_eq!(parse_command("quit", &store).unwrap(), Some(ViewerCommand::Quit));
        assert_eq!(parse_command("   ", &store).unwrap(), None);
    }

    #[test]
    fn rejects_bad_input() {
        let store = store();
        // Camera 1 tops out at 15 fps
        assert!(matches!(
            parse_command("add 1 20 1", &store),
            Err(ConfigError::RateAboveNative { .. })
        ));
        assert!(matches!(
            parse_command("add 1 10 5", &store),
            Err(ConfigError::UnknownSource(SourceId(5)))
        ));
        assert!(matches!(
            parse_command("add -1 10", &store),
            Err(ConfigError::NegativeDelay(_))
        ));
        assert!(matches!(
            parse_command("delay x 1", &store),
            Err(ConfigError::NotANumber(_))
        ));
        assert!(matches!(
            parse_command("remove", &store),
            Err(ConfigError::MissingArgument("viewer"))
        ));
        assert!(matches!(
            parse_command("delay 2 1e20", &store),
            Err(ConfigError::DelayTooLong { .. })
        ));
        assert!(matches!(
            parse_command("rate 2 1e-300", &store),
            Err(ConfigError::RateTooLow { .. })
        ));
        assert!(matches!(
            parse_command("explode", &store),
            Err(ConfigError::UnknownCommand(_))
        ));
    }

    #[test]
    fn console_forwards_until_input_ends() {
        let store = store();
        let (tx, rx) = flume::unbounded();
        let input = std::io::Cursor::new("add 1 10\nbogus\ndelay 1 1e20\nlist\n");
        run_console(input, &store, tx);

        let received: Vec<_> = rx.drain().collect();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1], ViewerCommand::List);
    }
}
