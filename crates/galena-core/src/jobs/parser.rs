//! Line-oriented job script parser.
//!
//! Grammar, one command per line:
//!
//! ```text
//! WRITE [(key,value)(key2,value2)]
//! READ [key,key2]
//! DELETE [key,key2]
//! SHOW
//! WAIT <delay_ms>
//! BACKUP
//! HELP
//! # comment
//! ```
//!
//! Pairs may be separated by commas and whitespace inside the brackets. A
//! key runs to the first comma of its pair; the value is everything up to
//! the closing parenthesis. A malformed line yields an error the runner
//! reports and skips; it never aborts the job.

use crate::error::{GalenaError, Result};
use crate::jobs::command::Command;
use crate::storage::{MAX_BATCH_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// Parse one job script line.
pub fn parse_line(line: &str) -> Result<Command> {
    let line = line.trim_end_matches(['\r', '\n']);
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(Command::Empty);
    }

    let (verb, rest) = match trimmed.find([' ', '[']) {
        Some(pos) => trimmed.split_at(pos),
        None => (trimmed, ""),
    };

    match verb {
        "WRITE" => Ok(Command::Write(parse_pairs(rest)?)),
        "READ" => Ok(Command::Read(parse_keys(rest)?)),
        "DELETE" => Ok(Command::Delete(parse_keys(rest)?)),
        "SHOW" => bare(rest, Command::Show),
        "BACKUP" => bare(rest, Command::Backup),
        "HELP" => bare(rest, Command::Help),
        "WAIT" => {
            let delay = rest.trim().parse::<u64>().map_err(|_| {
                GalenaError::InvalidCommand(format!("WAIT expects a delay in ms, got {:?}", rest.trim()))
            })?;
            Ok(Command::Wait(delay))
        }
        _ => Err(GalenaError::InvalidCommand(format!(
            "unknown verb {verb:?}"
        ))),
    }
}

/// SHOW, BACKUP and HELP take no arguments.
fn bare(rest: &str, cmd: Command) -> Result<Command> {
    if rest.trim().is_empty() {
        Ok(cmd)
    } else {
        Err(GalenaError::InvalidCommand(format!(
            "unexpected arguments {:?}",
            rest.trim()
        )))
    }
}

/// Strip the surrounding `[` `]` of a batch payload.
fn strip_brackets(rest: &str) -> Result<&str> {
    let rest = rest.trim();
    rest.strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .ok_or_else(|| GalenaError::InvalidCommand("expected a [ ] batch".to_string()))
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(GalenaError::InvalidCommand("empty key".to_string()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(GalenaError::InvalidCommand(format!(
            "key longer than {MAX_KEY_SIZE} bytes"
        )));
    }
    Ok(())
}

/// `(key,value)(key2,value2)` with optional `,` and whitespace between
/// pairs.
fn parse_pairs(rest: &str) -> Result<Vec<(String, String)>> {
    let mut body = strip_brackets(rest)?;
    let mut pairs = Vec::new();

    loop {
        body = body.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if body.is_empty() {
            break;
        }
        let inner = body
            .strip_prefix('(')
            .ok_or_else(|| GalenaError::InvalidCommand("expected ( to open a pair".to_string()))?;
        let close = inner
            .find(')')
            .ok_or_else(|| GalenaError::InvalidCommand("unclosed pair".to_string()))?;
        let (key, value) = inner[..close]
            .split_once(',')
            .ok_or_else(|| GalenaError::InvalidCommand("pair without a comma".to_string()))?;

        check_key(key)?;
        if value.is_empty() {
            return Err(GalenaError::InvalidCommand("empty value".to_string()));
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(GalenaError::InvalidCommand(format!(
                "value longer than {MAX_VALUE_SIZE} bytes"
            )));
        }

        pairs.push((key.to_string(), value.to_string()));
        body = &inner[close + 1..];
    }

    if pairs.is_empty() {
        return Err(GalenaError::InvalidCommand("empty batch".to_string()));
    }
    if pairs.len() > MAX_BATCH_SIZE {
        return Err(GalenaError::InvalidCommand(format!(
            "more than {MAX_BATCH_SIZE} pairs in one batch"
        )));
    }
    Ok(pairs)
}

/// `key,key2,key3`, comma-separated.
fn parse_keys(rest: &str) -> Result<Vec<String>> {
    let body = strip_brackets(rest)?;
    let mut keys = Vec::new();

    for key in body.split(',') {
        let key = key.trim();
        check_key(key)?;
        keys.push(key.to_string());
    }

    if keys.len() > MAX_BATCH_SIZE {
        return Err(GalenaError::InvalidCommand(format!(
            "more than {MAX_BATCH_SIZE} keys in one batch"
        )));
    }
    Ok(keys)
}
