use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::backend::{Backend, BackendFuture};
use crate::dataset::Dataset;
use crate::error::StoreError;
use crate::settings::{Credentials, Session};

/// Prefix of a reply string that means "request refused".
pub const ERROR_SENTINEL: &str = "ERROR:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteOp {
    Get,
    Set,
    Delete,
    Count,
}

/// Parameters of one remote datastore call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub op: RemoteOp,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Dataset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// What a remote service can answer.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteReply {
    Dataset(Dataset),
    Collection(Vec<Dataset>),
    Count(u64),
    Empty,
    Rejected(String),
}

impl RemoteReply {
    pub fn parse(value: Value) -> Result<Self, StoreError> {
        match value {
            Value::Null => Ok(Self::Empty),
            Value::Object(dataset) => Ok(Self::Dataset(dataset)),
            Value::Number(n) => n
                .as_u64()
                .map(Self::Count)
                .ok_or_else(|| StoreError::Protocol(format!("count is not a whole number: {n}"))),
            Value::String(s) => match s.strip_prefix(ERROR_SENTINEL) {
                Some(reason) => Ok(Self::Rejected(reason.trim().to_string())),
                None => Err(StoreError::Protocol(format!("unexpected string reply: {s}"))),
            },
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(dataset) => Ok(dataset),
                    other => Err(StoreError::Protocol(format!(
                        "collection entry is not a dataset: {other}"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Collection),
            Value::Bool(b) => Err(StoreError::Protocol(format!("unexpected boolean reply: {b}"))),
        }
    }
}

/// Moves one request to the service and brings back its raw reply.
pub trait Transport: Send + Sync {
    fn exchange<'a>(
        &'a self,
        request: &'a RemoteRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StoreError>> + Send + 'a>>;
}

/// One independent HTTP POST per request.
pub struct HttpTransport {
    http: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }
}

impl Transport for HttpTransport {
    fn exchange<'a>(
        &'a self,
        request: &'a RemoteRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let resp = self
                .http
                .post(&self.url)
                .json(request)
                .send()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;

            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;

            if !status.is_success() {
                return Err(StoreError::Http {
                    status: status.as_u16(),
                    body,
                });
            }

            // A bare sentinel line is not valid JSON; hand it on as a string.
            Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
        })
    }
}

#[derive(Serialize)]
struct RequestFrame<'a> {
    seq: u64,
    request: &'a RemoteRequest,
}

#[derive(Deserialize)]
struct ReplyFrame {
    seq: u64,
    #[serde(default)]
    reply: Value,
}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Persistent duplex channel: newline-delimited JSON frames over TCP.
///
/// Requests carry a per-connection sequence number; the reader task routes
/// each reply frame back to the caller waiting on that number.
pub struct SocketTransport {
    next_seq: AtomicU64,
    pending: PendingReplies,
    closed: Arc<AtomicBool>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    reader: JoinHandle<()>,
}

impl SocketTransport {
    pub async fn connect(addr: &str) -> Result<Self, StoreError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();

        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(read_half, pending.clone(), closed.clone()));

        tracing::info!(addr, "Datastore channel connected");

        Ok(Self {
            next_seq: AtomicU64::new(1),
            pending,
            closed,
            writer: tokio::sync::Mutex::new(write_half),
            reader,
        })
    }

    fn forget(&self, seq: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&seq);
        }
    }
}

/// A request still waiting for its reply frame.
struct Outstanding<'a> {
    transport: &'a SocketTransport,
    seq: u64,
}

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        self.transport.forget(self.seq);
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(read_half: OwnedReadHalf, pending: PendingReplies, closed: Arc<AtomicBool>) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let frame: ReplyFrame = match serde_json::from_str(&line) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed reply frame, skipping");
                        continue;
                    }
                };
                let waiter = pending.lock().ok().and_then(|mut p| p.remove(&frame.seq));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(frame.reply);
                    }
                    None => tracing::warn!(seq = frame.seq, "Reply for unknown sequence number"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Datastore channel read failed");
                break;
            }
        }
    }

    closed.store(true, Ordering::Release);
    // Dropping the senders wakes every caller still waiting.
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
    tracing::info!("Datastore channel closed");
}

impl Transport for SocketTransport {
    fn exchange<'a>(
        &'a self,
        request: &'a RemoteRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            self.pending
                .lock()
                .map_err(|_| StoreError::Disconnected)?
                .insert(seq, tx);
            // Removes the entry however this future ends, dropped included.
            let _outstanding = Outstanding {
                transport: self,
                seq,
            };

            if self.closed.load(Ordering::Acquire) {
                return Err(StoreError::Disconnected);
            }

            let mut line = serde_json::to_vec(&RequestFrame { seq, request })?;
            line.push(b'\n');

            {
                let mut writer = self.writer.lock().await;
                writer.write_all(&line).await?;
            }

            tracing::debug!(seq, op = ?request.op, table = %request.table, "Request sent");
            rx.await.map_err(|_| StoreError::Disconnected)
        })
    }
}

/// Datastore backend served by a remote service.
pub struct RemoteBackend {
    transport: Arc<dyn Transport>,
    collection: String,
    credentials: Option<Credentials>,
}

impl RemoteBackend {
    pub fn new(
        transport: Arc<dyn Transport>,
        collection: String,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            transport,
            collection,
            credentials,
        }
    }

    async fn call(
        &self,
        op: RemoteOp,
        key: Option<&str>,
        data: Option<&Dataset>,
        session: Option<&Session>,
    ) -> Result<RemoteReply, StoreError> {
        if session.is_some_and(|s| !s.is_valid()) {
            return Err(StoreError::SessionExpired);
        }

        let request = RemoteRequest {
            op,
            table: self.collection.clone(),
            key: key.map(str::to_string),
            data: data.cloned(),
            credentials: session
                .map(|s| s.credentials().clone())
                .or_else(|| self.credentials.clone()),
        };

        let reply = RemoteReply::parse(self.transport.exchange(&request).await?)?;
        if let RemoteReply::Rejected(reason) = reply {
            tracing::warn!(
                table = %self.collection,
                op = ?op,
                reason = %reason,
                "Remote datastore rejected request"
            );
            if let Some(session) = session {
                session.invalidate();
            }
            return Err(StoreError::Rejected(reason));
        }
        Ok(reply)
    }
}

impl Backend for RemoteBackend {
    fn name(&self) -> &str {
        "remote"
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
        session: Option<&'a Session>,
    ) -> BackendFuture<'a, Option<Dataset>> {
        Box::pin(async move {
            match self.call(RemoteOp::Get, Some(key), None, session).await? {
                RemoteReply::Dataset(d) => Ok(Some(d)),
                RemoteReply::Collection(mut items) if items.len() <= 1 => Ok(items.pop()),
                RemoteReply::Empty => Ok(None),
                other => Err(StoreError::Protocol(format!("get answered with {other:?}"))),
            }
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        dataset: &'a Dataset,
        session: Option<&'a Session>,
    ) -> BackendFuture<'a, Option<Dataset>> {
        Box::pin(async move {
            match self
                .call(RemoteOp::Set, Some(key), Some(dataset), session)
                .await?
            {
                RemoteReply::Dataset(d) => Ok(Some(d)),
                _ => Ok(None),
            }
        })
    }

    fn delete<'a>(
        &'a self,
        key: Option<&'a str>,
        session: Option<&'a Session>,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.call(RemoteOp::Delete, key, None, session).await?;
            Ok(())
        })
    }

    fn count<'a>(&'a self, session: Option<&'a Session>) -> BackendFuture<'a, usize> {
        Box::pin(async move {
            match self.call(RemoteOp::Count, None, None, session).await? {
                RemoteReply::Count(n) => Ok(n as usize),
                RemoteReply::Collection(items) => Ok(items.len()),
                other => Err(StoreError::Protocol(format!("count answered with {other:?}"))),
            }
        })
    }
}
