//! Interactive terminal front end for [`DictionaryClient`].
//!
//! Reads one command per line from stdin, runs it against the server and
//! prints the outcome. Parsing lives in [`ConsoleCommand::parse`] so it can be
//! tested without a terminal.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::{
    cli::ClientArgs,
    client::{ClientOptions, DictionaryClient, Query, SearchOutcome},
    codec::split_fields,
    word::Word,
};

const HELP: &str = "\
commands:
  search/s <word>             exact English lookup
  contains/c <fragment>       English words containing <fragment>
  vn/v <meaning>              exact Vietnamese lookup
  vn-contains/vc <fragment>   Vietnamese meanings containing <fragment>
  all/a                       list every word
  add <eng|pos|phonetic|meaning|definition|example[|image]>
  update/u <eng|pos|phonetic|meaning|definition|example[|image]>
  delete/d <word> [pos]       delete one entry, or every entry for <word>
  ping/p                      check the connection
  reconnect/r                 open a fresh connection
  help/h                      show this text
  quit/q                      leave";

/// How often the background monitor pings the server.
const CONNECTION_CHECK_PERIOD: Duration = Duration::from_secs(2);

/// Fields a word needs on the console: english, pos, phonetic, meaning.
const MIN_WORD_FIELDS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Lookup(Query),
    Add(Word),
    Update(Word),
    Delete {
        english: String,
        part_of_speech: String,
    },
    DeleteAll(String),
    Ping,
    Reconnect,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parses one console line. Commands are case-insensitive and have short aliases.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("empty command"));
        }

        let (head, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (trimmed, ""),
        };

        let command = head.to_lowercase();
        let normalized = match command.as_str() {
            "s" => "search",
            "c" => "contains",
            "v" => "vn",
            "vc" => "vn-contains",
            "a" => "all",
            "u" => "update",
            "d" => "delete",
            "p" => "ping",
            "r" => "reconnect",
            "h" => "help",
            "q" | "exit" => "quit",
            other => other,
        };

        match normalized {
            "all" => return Ok(ConsoleCommand::Lookup(Query::All)),
            "ping" => return Ok(ConsoleCommand::Ping),
            "reconnect" => return Ok(ConsoleCommand::Reconnect),
            "help" => return Ok(ConsoleCommand::Help),
            "quit" => return Ok(ConsoleCommand::Quit),
            _ => {}
        }

        if rest.is_empty() {
            return Err(anyhow!("{normalized} needs an argument (try 'help')"));
        }

        match normalized {
            "search" => Ok(ConsoleCommand::Lookup(Query::Exact(rest.to_string()))),
            "contains" => Ok(ConsoleCommand::Lookup(Query::Containing(rest.to_string()))),
            "vn" => Ok(ConsoleCommand::Lookup(Query::VietnameseExact(
                rest.to_string(),
            ))),
            "vn-contains" => Ok(ConsoleCommand::Lookup(Query::VietnameseContaining(
                rest.to_string(),
            ))),
            "add" => parse_word(rest).map(ConsoleCommand::Add),
            "update" => parse_word(rest).map(ConsoleCommand::Update),
            "delete" => {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                match parts.as_slice() {
                    [english] => Ok(ConsoleCommand::DeleteAll(english.to_string())),
                    [english, part_of_speech] => Ok(ConsoleCommand::Delete {
                        english: english.to_string(),
                        part_of_speech: part_of_speech.to_string(),
                    }),
                    _ => Err(anyhow!("delete takes a word and an optional part of speech")),
                }
            }
            other => Err(anyhow!("unknown command '{other}' (try 'help')")),
        }
    }
}

fn parse_word(fields: &str) -> Result<Word> {
    let fields: Vec<&str> = split_fields(fields).into_iter().map(str::trim).collect();
    if fields.len() < MIN_WORD_FIELDS {
        return Err(anyhow!(
            "expected at least english|pos|phonetic|meaning, got {} field(s)",
            fields.len()
        ));
    }
    Ok(Word::from_fields(&fields))
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let options = ClientOptions {
        probe_timeout: args.probe_timeout(),
    };
    let client = DictionaryClient::connect_with(args.server, options)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    let client = Arc::new(client);
    write_stdout(&format!("*** connected to {}", client.server_addr())).await?;

    let mut connection = client.watch_connection(CONNECTION_CHECK_PERIOD);
    let monitor = tokio::spawn(async move {
        while connection.changed().await.is_ok() {
            let alive = *connection.borrow_and_update();
            let notice = if alive {
                "*** connection restored"
            } else {
                "*** connection lost (try 'reconnect')"
            };
            if write_stdout(notice).await.is_err() {
                break;
            }
        }
    });

    let mut stdin = BufReader::new(io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        if stdin.read_line(&mut input).await? == 0 {
            break;
        }
        if input.trim().is_empty() {
            continue;
        }

        match ConsoleCommand::parse(&input) {
            Ok(ConsoleCommand::Quit) => {
                write_stdout("*** goodbye").await?;
                break;
            }
            Ok(command) => execute(&client, command).await?,
            Err(err) => write_stderr(&format!("!!! {err}")).await?,
        }
    }

    monitor.abort();
    client.disconnect().await;
    Ok(())
}

async fn execute(client: &DictionaryClient, command: ConsoleCommand) -> io::Result<()> {
    match command {
        ConsoleCommand::Lookup(query) => match client.lookup(query).await {
            Ok(SearchOutcome::Found(words)) => render_words(&words).await,
            Ok(SearchOutcome::NotFound(term)) => {
                write_stdout(&format!("*** no matches for '{term}'")).await
            }
            Err(err) => {
                warn!(error = %err, "lookup failed");
                write_stderr(&format!("!!! {err}")).await
            }
        },
        ConsoleCommand::Add(word) => write_stdout(&client.add(&word).await).await,
        ConsoleCommand::Update(word) => write_stdout(&client.update(&word).await).await,
        ConsoleCommand::Delete {
            english,
            part_of_speech,
        } => write_stdout(&client.delete(&english, &part_of_speech).await).await,
        ConsoleCommand::DeleteAll(english) => {
            write_stdout(&client.delete_all(&english).await).await
        }
        ConsoleCommand::Ping => {
            let status = if client.is_connected().await {
                "*** server is reachable"
            } else {
                "*** server is not reachable (try 'reconnect')"
            };
            write_stdout(status).await
        }
        ConsoleCommand::Reconnect => {
            let status = if client.reconnect().await {
                "*** reconnected"
            } else {
                "*** reconnect failed"
            };
            write_stdout(status).await
        }
        ConsoleCommand::Help => write_stdout(HELP).await,
        ConsoleCommand::Quit => Ok(()),
    }
}

async fn render_words(words: &[Word]) -> io::Result<()> {
    for word in words {
        write_stdout(&word.to_string()).await?;
    }
    Ok(())
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
