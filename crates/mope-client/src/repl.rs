//! Line-oriented interactive front end
//!
//! ```text
//! /insert <value>          insert one value
//! /insert file:<path>      insert every line of a file
//! /query <value>           rows equal to value
//! /range_query <min>,<max> rows between the bounds; either may be empty
//! <value>                  same as /insert <value>
//! ```

use std::path::PathBuf;

use indicatif::ProgressBar;
use mope_core::Transport;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::cipher::EncryptionScheme;
use crate::driver::NavigationDriver;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Insert(String),
    InsertFile(PathBuf),
    Query(String),
    RangeQuery {
        min: Option<String>,
        max: Option<String>,
    },
}

/// `Ok(None)` for blank lines
pub fn parse_line(line: &str) -> std::result::Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('/') {
        return Ok(Some(Command::Insert(line.to_string())));
    }

    let (verb, arg) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let arg = arg.trim();

    let command = match verb {
        "/insert" if arg.is_empty() => return Err("/insert needs a value".to_string()),
        "/insert" => match arg.strip_prefix("file:") {
            Some(path) => Command::InsertFile(PathBuf::from(path.trim())),
            None => Command::Insert(arg.to_string()),
        },
        "/query" if arg.is_empty() => return Err("/query needs a value".to_string()),
        "/query" => Command::Query(arg.to_string()),
        "/range_query" => {
            let (min, max) = arg
                .split_once(',')
                .ok_or_else(|| "/range_query needs <min>,<max>".to_string())?;
            Command::RangeQuery {
                min: bound(min),
                max: bound(max),
            }
        }
        other => return Err(format!("unknown command {other}")),
    };
    Ok(Some(command))
}

fn bound(side: &str) -> Option<String> {
    let side = side.trim();
    (!side.is_empty()).then(|| side.to_string())
}

/// Execute commands until the input ends or the session fails
///
/// Each result is written as one JSON line. Rejected input and values the
/// cipher cannot encrypt are reported and skipped; anything that reached the
/// server and failed ends the loop.
pub async fn run<T, E, R, W>(driver: &mut NavigationDriver<T, E>, input: R, mut output: W) -> Result<()>
where
    T: Transport,
    E: EncryptionScheme,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                emit_error(&mut output, &message).await?;
                continue;
            }
        };

        match execute(driver, command, &mut output).await {
            Ok(()) => {}
            Err(ClientError::Cipher(e)) => emit_error(&mut output, &e.to_string()).await?,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn execute<T, E, W>(driver: &mut NavigationDriver<T, E>, command: Command, output: &mut W) -> Result<()>
where
    T: Transport,
    E: EncryptionScheme,
    W: AsyncWrite + Unpin,
{
    match command {
        Command::Insert(value) => {
            let receipt = driver.insert(&value).await?;
            emit(output, &receipt).await
        }
        Command::InsertFile(path) => {
            let summary = driver.insert_file(&path, None, &ProgressBar::hidden()).await?;
            let line = format!(
                "inserted {} lines ({} duplicates) in {:?}",
                summary.lines, summary.duplicates, summary.elapsed
            );
            emit(output, &line).await
        }
        Command::Query(value) => {
            let records = driver.query(&value).await?;
            emit(output, &records).await
        }
        Command::RangeQuery { min, max } => {
            let records = driver.range_query(min.as_deref(), max.as_deref()).await?;
            emit(output, &records).await
        }
    }
}

async fn emit<W: AsyncWrite + Unpin, V: Serialize>(output: &mut W, value: &V) -> Result<()> {
    let mut line = serde_json::to_vec(value).map_err(std::io::Error::from)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}

async fn emit_error<W: AsyncWrite + Unpin>(output: &mut W, message: &str) -> Result<()> {
    emit(output, &serde_json::json!({ "error": message })).await
}
