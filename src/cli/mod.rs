pub mod menu;

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use anyhow::{Context, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Stdin lines read on a background thread, so the menu can notice a
/// signal while nothing is typed.
pub struct InputLines {
    rx: Receiver<String>,
}

impl InputLines {
    pub fn stdin() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("stdin-reader".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .context("Failed to spawn stdin reader")?;
        Ok(Self { rx })
    }

    #[cfg(test)]
    pub fn from_receiver(rx: Receiver<String>) -> Self {
        Self { rx }
    }

    /// Next line, or None on EOF or once `interrupted` is raised.
    pub fn next_line(&self, interrupted: &AtomicBool) -> Option<String> {
        loop {
            if interrupted.load(Ordering::Relaxed) {
                return None;
            }
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => return Some(line),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

/// Print `label` without a newline and flush.
pub fn prompt(label: &str) -> Result<()> {
    let mut out = std::io::stdout();
    write!(out, "{}", label)?;
    out.flush().context("Failed to flush stdout")
}

pub fn clear_screen() -> Result<()> {
    prompt("\x1B[2J\x1B[H")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_line_returns_none_on_eof() {
        let (tx, rx) = mpsc::channel();
        tx.send("1".to_string()).unwrap();
        drop(tx);
        let input = InputLines::from_receiver(rx);
        let flag = AtomicBool::new(false);
        assert_eq!(input.next_line(&flag).as_deref(), Some("1"));
        assert_eq!(input.next_line(&flag), None);
    }

    #[test]
    fn test_next_line_stops_when_interrupted() {
        let (_tx, rx) = mpsc::channel::<String>();
        let input = InputLines::from_receiver(rx);
        let flag = AtomicBool::new(true);
        assert_eq!(input.next_line(&flag), None);
    }
}
