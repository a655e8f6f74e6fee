use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use futures::FutureExt;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{Mutex, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    codec::{Request, Response, read_line, write_line},
    error::StoreError,
    store::LookupStore,
    word::{NaturalKey, Word, fold_english},
};

type SessionId = u64;

/// How long `stop` waits for a signalled session before aborting its task.
const SESSION_CLOSE_GRACE: Duration = Duration::from_secs(1);

const FAREWELL: &str = "Goodbye!";

pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    pub fn new(listener: TcpListener, store: Arc<dyn LookupStore>) -> Self {
        Self {
            listener,
            state: Arc::new(ServerState::new(store)),
        }
    }

    pub async fn bind(addr: SocketAddr, store: Arc<dyn LookupStore>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::new(listener, store))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A cloneable handle that can stop the server from another task.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Accepts connections until `shutdown` resolves or [`ServerHandle::stop`] is called.
    ///
    /// The listening socket is closed when this returns.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, state } = self;
        let mut stopped = state.shutdown.subscribe();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    state.stop().await;
                    break;
                }
                _ = wait_for_stop(&mut stopped) => break,
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state).await;
                }
            }
        }

        drop(listener);
        info!("listener closed");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl ServerHandle {
    /// Stops accepting, closes every live session and clears the registry.
    ///
    /// Calling it again, or after the server already stopped, does nothing.
    pub async fn stop(&self) {
        self.state.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub async fn live_sessions(&self) -> usize {
        self.state.sessions.lock().await.len()
    }
}

async fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, state).await,
        Err(err) if state.is_running() => warn!(error = ?err, "failed to accept connection"),
        Err(err) => debug!(error = ?err, "accept failed after shutdown"),
    }
}

async fn spawn_session(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let id = state.next_id();
    info!(%peer, session = id, "client connected");

    // Hold the registry lock across the spawn so the session cannot
    // deregister before it has been registered.
    let mut sessions = state.sessions.lock().await;
    let session_state = Arc::clone(state);
    let task = tokio::spawn(async move {
        if let Err(err) = run_session(stream, &session_state).await {
            warn!(%peer, session = id, error = ?err, "session closed with error");
        }
        session_state.deregister(id).await;
        info!(%peer, session = id, "client disconnected");
    });
    sessions.insert(id, SessionRecord { peer, task });
}

struct ServerState {
    store: Arc<dyn LookupStore>,
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    next_id: AtomicU64,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
}

struct SessionRecord {
    peer: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerState {
    fn new(store: Arc<dyn LookupStore>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(true),
            shutdown,
        }
    }

    fn next_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn deregister(&self, id: SessionId) {
        self.sessions.lock().await.remove(&id);
    }

    async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("server shutting down");
        self.shutdown.send_replace(true);

        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (id, SessionRecord { peer, task }) in sessions {
            let abort = task.abort_handle();
            if timeout(SESSION_CLOSE_GRACE, task).await.is_err() {
                warn!(%peer, session = id, "session did not close in time; aborting");
                abort.abort();
            }
        }
    }
}

/// Resolves once the server is stopping; a dropped sender counts as stopping.
async fn wait_for_stop(stopped: &mut watch::Receiver<bool>) {
    let _ = stopped.wait_for(|stopped| *stopped).await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStep {
    Continue,
    Close,
}

async fn run_session(stream: TcpStream, state: &ServerState) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer = writer;
    let mut shutdown = state.shutdown.subscribe();

    let outcome = serve_requests(state, &mut reader, &mut writer, &mut shutdown).await;
    close_session(writer, reader).await;
    outcome
}

async fn serve_requests<R, W>(
    state: &ServerState,
    reader: &mut R,
    writer: &mut W,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        select! {
            biased;
            _ = wait_for_stop(shutdown) => {
                debug!("session closed by server shutdown");
                return Ok(());
            }
            step = serve_one(state.store.as_ref(), reader, writer) => {
                if step? == SessionStep::Close {
                    return Ok(());
                }
            }
        }
    }
}

async fn serve_one<R, W>(store: &dyn LookupStore, reader: &mut R, writer: &mut W) -> Result<SessionStep>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(line) = read_line(reader).await? else {
        return Ok(SessionStep::Close);
    };

    let (response, step) = respond(store, &line).await;
    write_line(writer, &response.encode()).await?;
    Ok(step)
}

async fn close_session(mut writer: OwnedWriteHalf, reader: BufReader<OwnedReadHalf>) {
    if let Err(err) = writer.shutdown().await {
        debug!(?err, "failed to shut down session writer");
    }
    drop(writer);
    drop(reader);
}

/// Turns one request line into its reply. Never fails: decode errors, store
/// errors and panics inside the store all become `ERROR` replies.
async fn respond(store: &dyn LookupStore, line: &str) -> (Response, SessionStep) {
    let request = match Request::decode(line) {
        Ok(request) => request,
        Err(err) => {
            debug!(%line, error = %err, "rejected request");
            return (Response::error(&err.to_string()), SessionStep::Continue);
        }
    };

    if request == Request::Quit {
        return (Response::ok(FAREWELL), SessionStep::Close);
    }

    let command = request.command();
    let response = match AssertUnwindSafe(dispatch(store, request)).catch_unwind().await {
        Ok(response) => response,
        Err(_) => {
            warn!(command, "request handler panicked");
            Response::error(&format!("internal error while handling {command}"))
        }
    };
    (response, SessionStep::Continue)
}

async fn dispatch(store: &dyn LookupStore, request: Request) -> Response {
    match request {
        Request::Ping => Response::pong(),
        Request::Search(term) => records_or_not_found(store.find_exact(&term).await, &term),
        Request::SearchContaining(term) => {
            records_or_not_found(store.find_containing(&term).await, &term)
        }
        Request::SearchVietnamese(term) => {
            records_or_not_found(store.find_vietnamese_exact(&term).await, &term)
        }
        Request::SearchVietnameseContaining(term) => {
            records_or_not_found(store.find_vietnamese_containing(&term).await, &term)
        }
        Request::GetAll => records_or_not_found(store.list_all().await, ""),
        Request::Add(word) => add_word(store, word).await,
        Request::Update(word) => update_word(store, word).await,
        Request::Delete {
            english,
            part_of_speech,
        } => {
            let key = NaturalKey::new(&english, &part_of_speech);
            mutation_reply(
                store.delete_one(&english, &part_of_speech).await,
                format!("Deleted {key}"),
                format!("Word not found: {key}"),
            )
        }
        Request::DeleteAll(english) => {
            let english = fold_english(&english);
            mutation_reply(
                store.delete_all(&english).await,
                format!("Deleted every entry for {english}"),
                format!("Word not found: {english}"),
            )
        }
        Request::Quit => Response::ok(FAREWELL),
    }
}

async fn add_word(store: &dyn LookupStore, word: Word) -> Response {
    if let Err(err) = word.validate_for_mutation() {
        return Response::error(&err.to_string());
    }
    let key = word.key();
    mutation_reply(
        store.insert(word).await,
        format!("Added {key}"),
        format!("Word already exists: {key}"),
    )
}

async fn update_word(store: &dyn LookupStore, word: Word) -> Response {
    if let Err(err) = word.validate_for_mutation() {
        return Response::error(&err.to_string());
    }
    let key = word.key();
    mutation_reply(
        store.update(word).await,
        format!("Updated {key}"),
        format!("Word not found: {key}"),
    )
}

fn records_or_not_found(result: Result<Vec<Word>, StoreError>, term: &str) -> Response {
    match result {
        Ok(words) if words.is_empty() => Response::not_found(term),
        Ok(words) => Response::records(&words),
        Err(err) => store_failure(err),
    }
}

fn mutation_reply(
    result: Result<bool, StoreError>,
    applied: String,
    rejected: String,
) -> Response {
    match result {
        Ok(true) => Response::success(&applied),
        Ok(false) => Response::error(&rejected),
        Err(err) => store_failure(err),
    }
}

fn store_failure(err: StoreError) -> Response {
    warn!(error = %err, "lookup store call failed");
    Response::error(&err.to_string())
}
