//! Interactive y/n confirmation on the terminal.

use std::io::{self, BufRead, Write};
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::core::Decide;

/// Interpret a yes/no answer the way shell tools usually do
pub fn parse_answer(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Some(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Asks every question on a writer and reads the answer from a reader,
/// repeating the question until the answer parses.
pub struct PromptDecider<R, W> {
    io: Mutex<(R, W)>,
}

impl PromptDecider<io::BufReader<io::Stdin>, io::Stdout> {
    /// Prompt on stdout, answer on stdin
    pub fn stdio() -> Self {
        Self::new(io::BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R, W> PromptDecider<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

impl<R, W> Decide for PromptDecider<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn decide(&self, question: &str) -> Result<bool> {
        let mut guard = self
            .io
            .lock()
            .map_err(|_| anyhow::anyhow!("Prompt state poisoned"))?;
        let (reader, writer) = &mut *guard;

        loop {
            write!(writer, "{} [y/n] ", question)?;
            writer.flush()?;

            let mut line = String::new();
            let read = reader
                .read_line(&mut line)
                .context("Failed to read answer")?;
            if read == 0 {
                anyhow::bail!("No answer given for: {}", question);
            }

            match parse_answer(&line) {
                Some(answer) => return Ok(answer),
                None => writeln!(writer, "Please answer yes or no.")?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_answer() {
        for yes in ["y", "YES", " true\n", "on", "1", "t"] {
            assert_eq!(parse_answer(yes), Some(true), "{}", yes);
        }
        for no in ["n", "No", "false", "off", "0", "f\n"] {
            assert_eq!(parse_answer(no), Some(false), "{}", no);
        }
        assert_eq!(parse_answer("maybe"), None);
        assert_eq!(parse_answer(""), None);
    }

    #[test]
    fn test_reasks_until_valid() {
        let decider = PromptDecider::new(Cursor::new("what\nyes\n"), Vec::new());

        assert!(decider.decide("Change DATABASE_URL").unwrap());

        let (_, output) = decider.io.into_inner().unwrap();
        let output = String::from_utf8(output).unwrap();
        assert_eq!(output.matches("Change DATABASE_URL [y/n]").count(), 2);
        assert!(output.contains("Please answer yes or no."));
    }

    #[test]
    fn test_end_of_input_is_an_error() {
        let decider = PromptDecider::new(Cursor::new(""), Vec::new());
        let err = decider.decide("Remove REDIS_URL").unwrap_err();
        assert!(err.to_string().contains("Remove REDIS_URL"));
    }

    #[test]
    fn test_declines() {
        let decider = PromptDecider::new(Cursor::new("n\n"), io::sink());
        assert!(!decider.decide("Change X").unwrap());
    }
}
