//! Client side of the dictionary protocol.
//!
//! A [`DictionaryClient`] owns a single TCP connection shared by every caller.
//! The connection sits behind an async mutex (the gate): each operation
//! holds it for one full write-then-read round trip, so replies can never be
//! handed to the wrong caller. A caller cancelled halfway through a round
//! trip leaves its reply unread; the next holder of the gate notices and
//! swaps in a fresh connection. Failures never escape as errors from the
//! typed operations; they become an empty list, `false`, or a message.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{Mutex, watch},
    time::{MissedTickBehavior, interval, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    activity::{ActivityEvent, ActivityLog, TracingActivityLog},
    codec::{Request, Response, Status, ensure_plain, read_line, write_line},
    error::{ClientError, CodecError},
    word::Word,
};

/// Default bound on the liveness probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long `is_connected` waits for `PONG`. No other operation times out.
    pub probe_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// What to look up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Exact(String),
    Containing(String),
    VietnameseExact(String),
    VietnameseContaining(String),
    All,
}

impl Query {
    fn term(&self) -> &str {
        match self {
            Query::Exact(term)
            | Query::Containing(term)
            | Query::VietnameseExact(term)
            | Query::VietnameseContaining(term) => term,
            Query::All => "",
        }
    }

    fn into_request(self) -> Request {
        match self {
            Query::Exact(term) => Request::Search(term),
            Query::Containing(term) => Request::SearchContaining(term),
            Query::VietnameseExact(term) => Request::SearchVietnamese(term),
            Query::VietnameseContaining(term) => Request::SearchVietnameseContaining(term),
            Query::All => Request::GetAll,
        }
    }
}

/// Result of a lookup that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Found(Vec<Word>),
    /// The store answered with zero matches; carries the echoed term.
    NotFound(String),
}

impl SearchOutcome {
    pub fn into_words(self) -> Vec<Word> {
        match self {
            SearchOutcome::Found(words) => words,
            SearchOutcome::NotFound(_) => Vec::new(),
        }
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// Set between writing a request and reading its reply. Still set when
    /// the gate is next taken means the caller was cancelled mid exchange
    /// and its reply is still unread on the socket.
    in_flight: bool,
}

impl Connection {
    async fn open(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            in_flight: false,
        })
    }

    async fn exchange(&mut self, request: &Request) -> Result<Response, ClientError> {
        self.in_flight = true;
        write_line(&mut self.writer, &request.encode()).await?;
        let line = read_line(&mut self.reader)
            .await?
            .ok_or(ClientError::ConnectionClosed)?;
        self.in_flight = false;
        Ok(Response::decode(&line)?)
    }

    async fn close(mut self) {
        if let Err(err) = self.writer.shutdown().await {
            debug!(?err, "failed to shut down client writer");
        }
    }
}

pub struct DictionaryClient {
    addr: SocketAddr,
    options: ClientOptions,
    gate: Mutex<Option<Connection>>,
    activity: Arc<dyn ActivityLog>,
}

impl DictionaryClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Self::connect_with(addr, ClientOptions::default()).await
    }

    pub async fn connect_with(addr: SocketAddr, options: ClientOptions) -> Result<Self, ClientError> {
        let connection = Connection::open(addr).await?;
        info!(%addr, "connected to dictionary server");
        Ok(Self {
            addr,
            options,
            gate: Mutex::new(Some(connection)),
            activity: Arc::new(TracingActivityLog),
        })
    }

    pub fn with_activity_log(mut self, activity: Arc<dyn ActivityLog>) -> Self {
        self.activity = activity;
        self
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn search(&self, english: &str) -> Vec<Word> {
        self.search_words(Query::Exact(english.to_string())).await
    }

    pub async fn search_containing(&self, fragment: &str) -> Vec<Word> {
        self.search_words(Query::Containing(fragment.to_string()))
            .await
    }

    pub async fn search_vietnamese(&self, meaning: &str) -> Vec<Word> {
        self.search_words(Query::VietnameseExact(meaning.to_string()))
            .await
    }

    pub async fn search_vietnamese_containing(&self, fragment: &str) -> Vec<Word> {
        self.search_words(Query::VietnameseContaining(fragment.to_string()))
            .await
    }

    pub async fn get_all(&self) -> Vec<Word> {
        self.search_words(Query::All).await
    }

    /// Like the `search*` operations, but tells "no matches" apart from
    /// "request failed".
    pub async fn lookup(&self, query: Query) -> Result<SearchOutcome, ClientError> {
        self.activity.record(ActivityEvent::Search, query.term());
        ensure_plain("term", query.term())?;
        let response = self.round_trip(query.into_request()).await?;
        match response.status {
            Status::Success => Ok(SearchOutcome::Found(response.into_words()?)),
            Status::NotFound => Ok(SearchOutcome::NotFound(response.message())),
            Status::Error => Err(ClientError::Server(response.message())),
            other => Err(CodecError::UnexpectedStatus(other.to_string()).into()),
        }
    }

    pub async fn add(&self, word: &Word) -> String {
        self.activity.record(ActivityEvent::Add, &word.key().to_string());
        if let Err(err) = word.validate_for_mutation() {
            return format!("Error: {err}");
        }
        describe_reply(self.round_trip(Request::Add(word.clone())).await)
    }

    pub async fn update(&self, word: &Word) -> String {
        self.activity
            .record(ActivityEvent::Update, &word.key().to_string());
        if let Err(err) = word.validate_for_mutation() {
            return format!("Error: {err}");
        }
        describe_reply(self.round_trip(Request::Update(word.clone())).await)
    }

    /// Deletes the single entry identified by its natural key.
    pub async fn delete(&self, english: &str, part_of_speech: &str) -> String {
        self.activity
            .record(ActivityEvent::Delete, &format!("{english} ({part_of_speech})"));
        if let Err(err) = ensure_plain("english", english)
            .and_then(|()| ensure_plain("partOfSpeech", part_of_speech))
        {
            return format!("Error: {err}");
        }
        let request = Request::Delete {
            english: english.to_string(),
            part_of_speech: part_of_speech.to_string(),
        };
        describe_reply(self.round_trip(request).await)
    }

    /// Deletes every part of speech recorded for `english`.
    pub async fn delete_all(&self, english: &str) -> String {
        self.activity.record(ActivityEvent::DeleteAll, english);
        if let Err(err) = ensure_plain("english", english) {
            return format!("Error: {err}");
        }
        describe_reply(self.round_trip(Request::DeleteAll(english.to_string())).await)
    }

    /// Sends `PING` and waits a bounded time for `PONG`.
    ///
    /// Any failure drops the connection: a late `PONG` left on the stream
    /// would otherwise be read as the reply to the next request.
    pub async fn is_connected(&self) -> bool {
        let mut gate = self.gate.lock().await;
        self.discard_abandoned(&mut gate).await;
        let Some(connection) = gate.as_mut() else {
            return false;
        };

        let probe = match timeout(self.options.probe_timeout, connection.exchange(&Request::Ping))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        };
        let healthy = match probe {
            Ok(response) if response.status == Status::Pong => true,
            Ok(response) => {
                warn!(status = %response.status, "unexpected reply to liveness probe");
                false
            }
            Err(err) => {
                debug!(error = %err, "liveness probe failed");
                false
            }
        };

        if !healthy {
            if let Some(connection) = gate.take() {
                connection.close().await;
            }
        }
        healthy
    }

    /// Replaces the connection with a fresh one to the same server.
    ///
    /// Safe to call repeatedly; returns whether the new connection is up.
    pub async fn reconnect(&self) -> bool {
        let mut gate = self.gate.lock().await;
        if let Some(connection) = gate.take() {
            connection.close().await;
        }

        match Connection::open(self.addr).await {
            Ok(connection) => {
                *gate = Some(connection);
                info!(addr = %self.addr, "reconnected to dictionary server");
                true
            }
            Err(err) => {
                warn!(addr = %self.addr, error = %err, "reconnect failed");
                false
            }
        }
    }

    /// Says `QUIT` and drops the connection. Best effort.
    pub async fn disconnect(&self) {
        let mut gate = self.gate.lock().await;
        let Some(mut connection) = gate.take() else {
            return;
        };
        if connection.in_flight {
            connection.close().await;
            return;
        }
        match connection.exchange(&Request::Quit).await {
            Ok(response) => debug!(message = %response.message(), "server acknowledged quit"),
            Err(err) => debug!(error = %err, "quit was not acknowledged"),
        }
        connection.close().await;
    }

    async fn search_words(&self, query: Query) -> Vec<Word> {
        match self.lookup(query).await {
            Ok(outcome) => outcome.into_words(),
            Err(err) => {
                warn!(error = %err, "search failed");
                Vec::new()
            }
        }
    }

    /// One request/response pair under the gate.
    async fn round_trip(&self, request: Request) -> Result<Response, ClientError> {
        let mut gate = self.gate.lock().await;
        self.discard_abandoned(&mut gate).await;
        let connection = gate.as_mut().ok_or(ClientError::NotConnected)?;

        match connection.exchange(&request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                if err.is_transport() {
                    warn!(command = request.command(), error = %err, "connection lost");
                    *gate = None;
                }
                Err(err)
            }
        }
    }

    /// Replaces a connection whose last caller gave up before reading its
    /// reply. Called with the gate held.
    async fn discard_abandoned(&self, gate: &mut Option<Connection>) {
        if !gate.as_ref().is_some_and(|connection| connection.in_flight) {
            return;
        }
        debug!("discarding connection with an unread reply");
        if let Some(connection) = gate.take() {
            connection.close().await;
        }
        match Connection::open(self.addr).await {
            Ok(connection) => *gate = Some(connection),
            Err(err) => warn!(addr = %self.addr, error = %err, "failed to replace abandoned connection"),
        }
    }

    /// Probes the connection every `period` from a background task and
    /// publishes whether it is up.
    ///
    /// The task holds only a weak reference: it ends when the client is
    /// dropped or every receiver is gone. Probes share the gate with
    /// ordinary operations, so they never interleave with other traffic.
    pub fn watch_connection(self: &Arc<Self>, period: Duration) -> watch::Receiver<bool> {
        let (status, receiver) = watch::channel(true);
        let client = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                select! {
                    _ = status.closed() => break,
                    _ = ticker.tick() => {}
                }
                let Some(client) = client.upgrade() else {
                    break;
                };
                let alive = client.is_connected().await;
                status.send_if_modified(|current| {
                    let changed = *current != alive;
                    *current = alive;
                    changed
                });
            }
        });
        receiver
    }
}

fn describe_reply(result: Result<Response, ClientError>) -> String {
    match result {
        Ok(response) => match response.status {
            Status::Success | Status::Ok | Status::Pong => response.message(),
            Status::Error => format!("Error: {}", response.message()),
            Status::NotFound => format!("Not found: {}", response.message()),
        },
        Err(err) => format!("Connection error: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use tokio::net::TcpListener;

    use super::*;

    #[derive(Default)]
    struct RecordingLog {
        events: StdMutex<Vec<(ActivityEvent, String)>>,
    }

    impl ActivityLog for RecordingLog {
        fn record(&self, event: ActivityEvent, detail: &str) {
            self.events.lock().unwrap().push((event, detail.to_string()));
        }
    }

    /// Accepts one connection and never answers.
    async fn silent_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        (addr, task)
    }

    #[test]
    fn replies_become_prefixed_messages() {
        assert_eq!(
            describe_reply(Ok(Response::success("Added run (verb)"))),
            "Added run (verb)"
        );
        assert_eq!(
            describe_reply(Ok(Response::error("Word already exists: run (verb)"))),
            "Error: Word already exists: run (verb)"
        );
        assert_eq!(
            describe_reply(Ok(Response::not_found("walk"))),
            "Not found: walk"
        );
        assert_eq!(
            describe_reply(Err(ClientError::ConnectionClosed)),
            "Connection error: server closed the connection"
        );
    }

    #[tokio::test]
    async fn probe_times_out_and_drops_connection() {
        let (addr, server) = silent_server().await;
        let options = ClientOptions {
            probe_timeout: Duration::from_millis(50),
        };
        let client = DictionaryClient::connect_with(addr, options)
            .await
            .expect("connect");

        assert!(!client.is_connected().await);
        // The timed-out connection is gone; operations report failure instead of hanging.
        assert!(!client.is_connected().await);
        assert!(client.search("run").await.is_empty());
        assert!(matches!(
            client.lookup(Query::Exact("run".into())).await,
            Err(ClientError::NotConnected)
        ));

        assert!(client.reconnect().await);
        server.abort();
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_sending() {
        let (addr, server) = silent_server().await;
        let log = Arc::new(RecordingLog::default());
        let client = DictionaryClient::connect(addr)
            .await
            .expect("connect")
            .with_activity_log(log.clone());

        let message = client.add(&Word::new("run", "verb", "")).await;
        assert_eq!(message, "Error: field 'vietnameseMeaning' cannot be blank");

        let message = client.delete_all("run\nPING").await;
        assert!(message.starts_with("Error:"));

        assert!(matches!(
            client.lookup(Query::Exact("run|x".into())).await,
            Err(ClientError::Codec(CodecError::ReservedCharacter { .. }))
        ));

        let events: Vec<_> = log
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|(event, _)| *event)
            .collect();
        assert_eq!(
            events,
            [ActivityEvent::Add, ActivityEvent::DeleteAll, ActivityEvent::Search]
        );
        server.abort();
    }
}
