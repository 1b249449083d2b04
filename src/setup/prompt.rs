//! Start-up questions on the terminal
//!
//! Every answer is validated; a rejected answer prints the reason and asks
//! again. End of input aborts with `UnexpectedEof`.

use std::io::{self, BufRead, Write};

use crate::capture::SourceId;
use crate::error::ConfigError;
use crate::pipeline::ViewerSettings;

use super::validate::{parse_delay, parse_positive, parse_rate, parse_source, RateCap};

const ASK: &str = "\x1b[94m";
const FAIL: &str = "\x1b[91m";
const RESET: &str = "\x1b[0m";

pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Asks `question` until `parse` accepts the answer.
    pub fn ask<T>(
        &mut self,
        question: &str,
        parse: impl Fn(&str) -> Result<T, ConfigError>,
    ) -> io::Result<T> {
        loop {
            write!(self.output, "{ASK}{question}{RESET}")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "input closed while configuring",
                ));
            }

            match parse(&line) {
                Ok(value) => return Ok(value),
                Err(e) => writeln!(self.output, "{FAIL}Invalid input. {e}.{RESET}")?,
            }
        }
    }

    pub fn resolution(&mut self) -> io::Result<(u32, u32)> {
        let width = self.ask("Enter width of video (in pixels): ", |s| {
            parse_positive(s, "width")
        })?;
        let height = self.ask("Enter height of video (in pixels): ", |s| {
            parse_positive(s, "height")
        })?;
        Ok((width, height))
    }

    /// Asks for the number of viewers, then delay, frame rate and camera of
    /// each. `sources` lists every camera with its native rate.
    pub fn viewers(&mut self, sources: &[(SourceId, f64)]) -> io::Result<Vec<ViewerSettings>> {
        let count = self.ask("Enter the number of displays: ", |s| {
            parse_positive(s, "number of displays")
        })?;

        let mut viewers = Vec::with_capacity(count as usize);
        for i in 1..=count {
            let delay = self.ask(
                &format!("Enter the delay for display {i} (in seconds): "),
                parse_delay,
            )?;

            let (source, native) = match sources {
                [only] => *only,
                _ => {
                    let ids: Vec<String> = sources.iter().map(|(id, _)| id.to_string()).collect();
                    self.ask(
                        &format!("Enter the camera for display {i} ({}): ", ids.join(", ")),
                        |s| {
                            let id = parse_source(s)?;
                            sources
                                .iter()
                                .find(|(candidate, _)| *candidate == id)
                                .copied()
                                .ok_or(ConfigError::UnknownSource(id))
                        },
                    )?
                }
            };

            let rate = self.ask(
                &format!("Enter the frame rate for display {i} (in fps, max {native}): "),
                |s| parse_rate(s, native, RateCap::Reject),
            )?;

            viewers.push(ViewerSettings::new(delay, rate, source));
        }
        Ok(viewers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn prompter(script: &str) -> Prompter<Cursor<Vec<u8>>, Vec<u8>> {
        Prompter::new(Cursor::new(script.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn reprompts_until_valid() {
        let mut p = prompter("abc\n-5\n2.5\n");
        let delay = p.ask("delay? ", parse_delay).unwrap();
        assert_eq!(delay, Duration::from_millis(2500));

        let transcript = String::from_utf8(p.output).unwrap();
        assert_eq!(transcript.matches("delay? ").count(), 3);
        assert_eq!(transcript.matches("Invalid input").count(), 2);
    }

    #[test]
    fn unrepresentable_values_are_asked_again() {
        let mut p = prompter("1e20\n3\n");
        assert_eq!(p.ask("delay? ", parse_delay).unwrap(), Duration::from_secs(3));

        let mut p = prompter("1e-300\n12\n");
        let rate = p
            .ask("fps? ", |line| parse_rate(line, 30.0, RateCap::Reject))
            .unwrap();
        assert_eq!(rate, 12.0);
        let transcript = String::from_utf8(p.output).unwrap();
        assert_eq!(transcript.matches("Invalid input").count(), 1);
    }

    #[test]
    fn single_camera_session() {
        let mut p = prompter("0\n2\n1\n30\n0.5\n60\n15\n");
        let viewers = p.viewers(&[(SourceId(0), 30.0)]).unwrap();

        assert_eq!(viewers.len(), 2);
        assert_eq!(viewers[0].delay, Duration::from_secs(1));
        assert_eq!(viewers[1].delay, Duration::from_millis(500));
        // 60 fps was over the cap and re-asked
        assert!((viewers[1].refresh_period.as_secs_f64() - 1.0 / 15.0).abs() < 1e-9);
        assert!(viewers.iter().all(|v| v.source == SourceId(0)));
    }

    #[test]
    fn multi_camera_session_asks_for_camera() {
        let mut p = prompter("1\n3\n7\n1\n25\n");
        let viewers = p
            .viewers(&[(SourceId(0), 30.0), (SourceId(1), 25.0)])
            .unwrap();
        assert_eq!(viewers[0].source, SourceId(1));
        assert_eq!(viewers[0].delay, Duration::from_secs(3));
    }

    #[test]
    fn eof_aborts() {
        let mut p = prompter("");
        let err = p.resolution().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn resolution_must_be_positive() {
        let mut p = prompter("0\n640\n480\n");
        assert_eq!(p.resolution().unwrap(), (640, 480));
    }
}
