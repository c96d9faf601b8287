//! Token reader backed by the terminal.
//!
//! Each scan prompts on stderr and takes one line of input as the tag UID.
//! Stdin is drained on a plain thread so an abandoned scan never keeps the
//! runtime from shutting down.

use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use tagblock_core::{ScanError, ScanFut, TokenReader, select_single};
use tagblock_types::TokenId;

pub struct ConsoleReader {
    lines: Mutex<mpsc::Receiver<io::Result<String>>>,
}

impl ConsoleReader {
    pub fn new(lines: mpsc::Receiver<io::Result<String>>) -> Self {
        Self {
            lines: Mutex::new(lines),
        }
    }

    /// Reader fed by the process's stdin.
    pub fn stdin() -> Self {
        let (tx, rx) = mpsc::channel(4);
        let spawned = thread::Builder::new()
            .name("tagblock-stdin".to_owned())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let failed = line.is_err();
                    if tx.blocking_send(line).is_err() || failed {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            // Dropping the sender makes every scan report the reader unavailable.
            tracing::warn!("Failed to start stdin reader: {e}");
        }
        Self::new(rx)
    }
}

impl TokenReader for ConsoleReader {
    fn scan(&self, timeout: Option<Duration>) -> ScanFut<'_> {
        Box::pin(async move {
            let mut lines = self.lines.lock().await;
            match timeout {
                Some(limit) => eprintln!(
                    "Hold a tag to the reader (enter its UID, {}s)...",
                    limit.as_secs()
                ),
                None => eprintln!("Hold a tag to the reader (enter its UID)..."),
            }
            match lines.recv().await {
                Some(Ok(line)) => parse_scan(&line),
                Some(Err(e)) => Err(ScanError::ReaderUnavailable(e.to_string())),
                None => Err(ScanError::ReaderUnavailable("input closed".to_owned())),
            }
        })
    }
}

/// Interpret one line of reader output.
///
/// Several values separated by whitespace or commas mean several tags were
/// in the field at once.
pub fn parse_scan(line: &str) -> Result<TokenId, ScanError> {
    let candidates = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty())
        .filter_map(|part| TokenId::new(normalize_uid(part)).ok())
        .collect();
    select_single(candidates)
}

/// `04:a1:b2` and `04a1b2` both become `04A1B2`. Anything that is not hex is
/// kept as typed.
fn normalize_uid(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| *c != ':').collect();
    if !compact.is_empty() && compact.chars().all(|c| c.is_ascii_hexdigit()) {
        compact.to_ascii_uppercase()
    } else {
        raw.to_owned()
    }
}
