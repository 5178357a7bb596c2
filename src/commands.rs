//! Line-oriented control surface: one command per stdin line.

use crate::types::{Command, Point, SessionEvent, TrackId};
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use std::io::BufRead;

pub const HELP: &str = "commands: start | stop | click X Y | deselect | name ID TEXT | \
song ID | unsong ID | play | pause | seek MS | export | quit";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("{0}: bad or missing argument")]
    BadArgument(&'static str),
}

/// Parse one input line. Keywords are case-insensitive; a name keeps the
/// rest of the line verbatim.
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    if word.is_empty() {
        return Err(ParseError::Empty);
    }

    let cmd = match word.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "stop" => Command::Stop,
        "deselect" => Command::Deselect,
        "play" => Command::Play,
        "pause" => Command::Pause,
        "export" => Command::Export,
        "quit" | "exit" => Command::Quit,
        "click" => {
            let mut it = rest.split_whitespace().map(str::parse::<f64>);
            match (it.next(), it.next()) {
                (Some(Ok(x)), Some(Ok(y))) if x.is_finite() && y.is_finite() => {
                    Command::Click(Point { x, y })
                }
                _ => return Err(ParseError::BadArgument("click")),
            }
        }
        "name" => {
            let (id, text) = match rest.split_once(char::is_whitespace) {
                Some((id, text)) => (id, text),
                None => (rest, ""),
            };
            Command::Name(track_id(id, "name")?, text.to_string())
        }
        "song" => Command::Song(track_id(rest, "song")?),
        "unsong" => Command::Unsong(track_id(rest, "unsong")?),
        "seek" => Command::Seek(rest.parse().map_err(|_| ParseError::BadArgument("seek"))?),
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(cmd)
}

fn track_id(raw: &str, cmd: &'static str) -> Result<TrackId, ParseError> {
    raw.trim()
        .trim_start_matches('#')
        .parse()
        .map_err(|_| ParseError::BadArgument(cmd))
}

/// Reads commands until EOF or until the session loop goes away. EOF is
/// treated as `quit`.
pub struct CommandReader<R> {
    input: R,
    tx: Sender<SessionEvent>,
}

impl<R: BufRead> CommandReader<R> {
    pub fn new(input: R, tx: Sender<SessionEvent>) -> Self {
        Self { input, tx }
    }

    pub fn run(self) {
        info!("Command reader ready ({})", HELP);
        for line in self.input.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!("Command input failed: {}", e);
                    break;
                }
            };
            match parse_command(&line) {
                Ok(cmd) => {
                    debug!("Command: {:?}", cmd);
                    let quit = cmd == Command::Quit;
                    if self.tx.send(SessionEvent::Command(cmd)).is_err() || quit {
                        return;
                    }
                }
                Err(ParseError::Empty) => {}
                Err(e) => warn!("{} ({})", e, HELP),
            }
        }
        let _ = self.tx.send(SessionEvent::Command(Command::Quit));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::Cursor;

    #[test]
    fn test_parse_simple_words() {
        assert_eq!(parse_command("start"), Ok(Command::Start));
        assert_eq!(parse_command("  STOP \n"), Ok(Command::Stop));
        assert_eq!(parse_command("export"), Ok(Command::Export));
        assert_eq!(parse_command(""), Err(ParseError::Empty));
        assert_eq!(parse_command("dance"), Err(ParseError::Unknown("dance".into())));
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(
            parse_command("click 5 7.5"),
            Ok(Command::Click(Point { x: 5.0, y: 7.5 }))
        );
        assert_eq!(parse_command("click 5"), Err(ParseError::BadArgument("click")));
        assert_eq!(
            parse_command("name #3 Ana  Maria"),
            Ok(Command::Name(3, "Ana  Maria".into()))
        );
        assert_eq!(parse_command("name 3"), Ok(Command::Name(3, String::new())));
        assert_eq!(parse_command("song 12"), Ok(Command::Song(12)));
        assert_eq!(parse_command("unsong x"), Err(ParseError::BadArgument("unsong")));
        assert_eq!(parse_command("seek 2500"), Ok(Command::Seek(2_500)));
        assert_eq!(parse_command("seek -1"), Err(ParseError::BadArgument("seek")));
    }

    #[test]
    fn test_reader_forwards_and_quits_on_eof() {
        let (tx, rx) = unbounded();
        CommandReader::new(Cursor::new("start\nbogus\n\nclick 1 2\n"), tx).run();
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                SessionEvent::Command(Command::Start),
                SessionEvent::Command(Command::Click(Point { x: 1.0, y: 2.0 })),
                SessionEvent::Command(Command::Quit),
            ]
        );
    }
}
