//! Line-oriented wire codec.
//!
//! Every request and every response is one UTF-8 line of `|`-separated
//! fields. Multi-record responses flatten each [`Word`] into
//! [`WORD_FIELD_COUNT`] consecutive fields in store order, so decoding must
//! keep empty trailing fields: `split_fields` is the only splitter used.

use std::{fmt, io, str::FromStr};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::CodecError,
    word::{WORD_FIELD_COUNT, Word},
};

pub const SEPARATOR: char = '|';

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Fields a mutation request carries before the optional image path.
const MUTATION_BASE_FIELDS: usize = WORD_FIELD_COUNT - 1;

/// Splits a line on the separator, keeping empty fields, trailing ones included.
pub fn split_fields(line: &str) -> Vec<&str> {
    line.split(SEPARATOR).collect()
}

/// Replaces characters that would break framing inside a free-text field.
pub fn sanitize(text: &str) -> String {
    text.replace([SEPARATOR, '\n', '\r'], " ")
}

/// Rejects an argument that would change the shape of the request line.
pub fn ensure_plain(field: &'static str, value: &str) -> Result<(), CodecError> {
    if value.contains([SEPARATOR, '\n', '\r']) {
        return Err(CodecError::ReservedCharacter { field });
    }
    Ok(())
}

/// A client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Search(String),
    SearchContaining(String),
    SearchVietnamese(String),
    SearchVietnameseContaining(String),
    Add(Word),
    Update(Word),
    Delete {
        english: String,
        part_of_speech: String,
    },
    DeleteAll(String),
    GetAll,
    Ping,
    Quit,
}

impl Request {
    pub fn command(&self) -> &'static str {
        match self {
            Request::Search(_) => "SEARCH",
            Request::SearchContaining(_) => "SEARCH_CONTAINING",
            Request::SearchVietnamese(_) => "SEARCH_VIETNAMESE",
            Request::SearchVietnameseContaining(_) => "SEARCH_VIETNAMESE_CONTAINING",
            Request::Add(_) => "ADD",
            Request::Update(_) => "UPDATE",
            Request::Delete { .. } | Request::DeleteAll(_) => "DELETE",
            Request::GetAll => "GET_ALL",
            Request::Ping => "PING",
            Request::Quit => "QUIT",
        }
    }

    pub fn encode(&self) -> String {
        let command = self.command();
        match self {
            Request::Search(term)
            | Request::SearchContaining(term)
            | Request::SearchVietnamese(term)
            | Request::SearchVietnameseContaining(term)
            | Request::DeleteAll(term) => join(command, [term.as_str()]),
            Request::Add(word) | Request::Update(word) => {
                // Records without an image keep the six-field form older peers expect.
                let fields = word.fields();
                let count = if word.image_path.is_empty() {
                    MUTATION_BASE_FIELDS
                } else {
                    WORD_FIELD_COUNT
                };
                join(command, fields.into_iter().take(count))
            }
            Request::Delete {
                english,
                part_of_speech,
            } => join(command, [english.as_str(), part_of_speech.as_str()]),
            Request::GetAll => format!("{command}{SEPARATOR}"),
            Request::Ping | Request::Quit => command.to_string(),
        }
    }

    pub fn decode(line: &str) -> Result<Self, CodecError> {
        let fields = split_fields(line);
        let (command, args) = match fields.split_first() {
            Some((command, args)) if !command.is_empty() => (*command, args),
            _ => return Err(CodecError::EmptyLine),
        };

        match command {
            "SEARCH" => single_argument("SEARCH", args).map(Request::Search),
            "SEARCH_CONTAINING" => {
                single_argument("SEARCH_CONTAINING", args).map(Request::SearchContaining)
            }
            "SEARCH_VIETNAMESE" => {
                single_argument("SEARCH_VIETNAMESE", args).map(Request::SearchVietnamese)
            }
            "SEARCH_VIETNAMESE_CONTAINING" => {
                single_argument("SEARCH_VIETNAMESE_CONTAINING", args)
                    .map(Request::SearchVietnameseContaining)
            }
            "ADD" => word_argument("ADD", args).map(Request::Add),
            "UPDATE" => word_argument("UPDATE", args).map(Request::Update),
            "DELETE" => match args {
                [english] => Ok(Request::DeleteAll(english.to_string())),
                [english, part_of_speech] => Ok(Request::Delete {
                    english: english.to_string(),
                    part_of_speech: part_of_speech.to_string(),
                }),
                [] => Err(CodecError::MissingArgument {
                    command: "DELETE",
                    expected: "an English word and an optional part of speech",
                }),
                _ => Err(CodecError::TooManyFields {
                    command: "DELETE",
                    max: 2,
                }),
            },
            "GET_ALL" => Ok(Request::GetAll),
            "PING" => Ok(Request::Ping),
            "QUIT" => Ok(Request::Quit),
            other => Err(CodecError::UnknownCommand(other.to_string())),
        }
    }
}

fn single_argument(command: &'static str, args: &[&str]) -> Result<String, CodecError> {
    args.first()
        .map(|arg| arg.to_string())
        .ok_or(CodecError::MissingArgument {
            command,
            expected: "one argument",
        })
}

fn word_argument(command: &'static str, args: &[&str]) -> Result<Word, CodecError> {
    if args.len() < 2 {
        return Err(CodecError::MissingArgument {
            command,
            expected: "english|pos|phonetic|meaning|definition|example",
        });
    }
    if args.len() > WORD_FIELD_COUNT {
        return Err(CodecError::TooManyFields {
            command,
            max: WORD_FIELD_COUNT,
        });
    }
    Ok(Word::from_fields(args))
}

fn join<'a>(command: &str, args: impl IntoIterator<Item = &'a str>) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(SEPARATOR);
        line.push_str(arg);
    }
    line
}

/// Leading token of every response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
    NotFound,
    Ok,
    Pong,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Error => "ERROR",
            Status::NotFound => "NOT_FOUND",
            Status::Ok => "OK",
            Status::Pong => "PONG",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = CodecError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SUCCESS" => Ok(Status::Success),
            "ERROR" => Ok(Status::Error),
            "NOT_FOUND" => Ok(Status::NotFound),
            "OK" => Ok(Status::Ok),
            "PONG" => Ok(Status::Pong),
            other => Err(CodecError::UnknownStatus(other.to_string())),
        }
    }
}

/// A server reply: a status followed by zero or more payload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub fields: Vec<String>,
}

impl Response {
    pub fn new(status: Status, fields: Vec<String>) -> Self {
        Self { status, fields }
    }

    pub fn records(words: &[Word]) -> Self {
        let fields = words
            .iter()
            .flat_map(|word| word.fields().map(sanitize))
            .collect();
        Self::new(Status::Success, fields)
    }

    pub fn success(message: &str) -> Self {
        Self::new(Status::Success, vec![sanitize(message)])
    }

    pub fn error(message: &str) -> Self {
        Self::new(Status::Error, vec![sanitize(message)])
    }

    pub fn not_found(term: &str) -> Self {
        Self::new(Status::NotFound, vec![sanitize(term)])
    }

    pub fn ok(message: &str) -> Self {
        Self::new(Status::Ok, vec![sanitize(message)])
    }

    pub fn pong() -> Self {
        Self::new(Status::Pong, Vec::new())
    }

    pub fn encode(&self) -> String {
        join(self.status.as_str(), self.fields.iter().map(String::as_str))
    }

    pub fn decode(line: &str) -> Result<Self, CodecError> {
        let fields = split_fields(line);
        let (status, payload) = match fields.split_first() {
            Some((status, payload)) if !status.is_empty() => (*status, payload),
            _ => return Err(CodecError::EmptyLine),
        };
        let status = status.parse()?;
        let fields = payload.iter().map(|field| field.to_string()).collect();
        Ok(Self::new(status, fields))
    }

    /// Payload rejoined as free text.
    pub fn message(&self) -> String {
        self.fields.join("|")
    }

    /// Reassembles the flattened records of a `SUCCESS` reply.
    ///
    /// A short final group is padded with empty fields rather than dropped.
    pub fn into_words(self) -> Result<Vec<Word>, CodecError> {
        if self.status != Status::Success {
            return Err(CodecError::UnexpectedStatus(self.status.to_string()));
        }

        Ok(self
            .fields
            .chunks(WORD_FIELD_COUNT)
            .filter(|chunk| chunk.iter().any(|field| !field.is_empty()))
            .map(Word::from_fields)
            .collect())
    }
}

/// Reads one protocol line, without its terminator.
///
/// Returns `Ok(None)` once the peer has closed the stream.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;
    if bytes == 0 {
        return Ok(None);
    }
    let trimmed_len = line.trim_end_matches(LINE_ENDINGS).len();
    line.truncate(trimmed_len);
    Ok(Some(line))
}

/// Writes one protocol line and flushes so the peer sees it immediately.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
