use std::future::Future;

use arkiv_auth::Classification;
use arkiv_contracts::NewViewEvent;
use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use ulid::Ulid;

use crate::dedup::{DedupCache, DedupKey};
use crate::metrics;

/// Request facts the recorder needs, extracted by the HTTP layer. The
/// classifier result is passed alongside as a value; the recorder never
/// reaches back into request-scoped state.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub path: String,
    pub raw_target_id: Option<String>,
    pub forwarded_for: Option<String>,
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
}

/// Destination for accepted view events. The production sink is the ledger
/// store; tests substitute an in-memory one.
pub trait ViewSink: Send + Sync + 'static {
    type Error: std::fmt::Display + Send;

    fn append(&self, event: NewViewEvent) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl ViewSink for arkiv_ledger::ViewStore {
    type Error = arkiv_ledger::LedgerError;

    async fn append(&self, event: NewViewEvent) -> Result<(), Self::Error> {
        self.append_view(&event).await.map(|_| ())
    }
}

/// Best-effort view instrumentation: decides synchronously, persists
/// asynchronously, and never surfaces an error to the content response.
#[derive(Clone)]
pub struct ViewRecorder {
    dedup: DedupCache,
    tx: UnboundedSender<NewViewEvent>,
}

impl ViewRecorder {
    pub fn new(dedup: DedupCache) -> (Self, UnboundedReceiver<NewViewEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { dedup, tx }, rx)
    }

    pub fn record_if_new(&self, classification: &Classification, meta: RequestMeta) {
        match classification {
            Classification::Authenticated(principal) if principal.role.is_privileged() => {
                metrics::inc_view_suppressed("privileged");
                return;
            }
            // A present-but-unverifiable token is ambiguous traffic; it is
            // never counted rather than risk inflating the numbers.
            Classification::Invalid => {
                metrics::inc_view_suppressed("unclassified");
                return;
            }
            _ => {}
        }

        let signature =
            visitor_signature(meta.forwarded_for.as_deref(), meta.remote_addr.as_deref());

        // A malformed id falls back to path-based dedup; tracking must not
        // fail the underlying content response.
        let target_id = meta
            .raw_target_id
            .as_deref()
            .and_then(|raw| Ulid::from_string(raw).ok());

        let key = match target_id {
            Some(id) => DedupKey::for_target(&signature, id),
            None => DedupKey::for_path(&signature, &meta.path),
        };

        if !self.dedup.should_record(key, Instant::now()) {
            metrics::inc_view_suppressed("duplicate");
            return;
        }

        let event = NewViewEvent {
            path: meta.path,
            target_id,
            visitor_signature: signature,
            user_agent_raw: meta.user_agent.unwrap_or_default(),
            occurred_at: Utc::now(),
        };

        // A closed channel means the writer is gone; the view is dropped
        // like any other persistence failure.
        if self.tx.send(event).is_ok() {
            metrics::inc_view_recorded();
        }
    }
}

/// Drains the recorder queue into the sink. Failures go to `on_error` and
/// nowhere else; the task keeps draining until every sender is dropped.
pub fn spawn_view_writer<S, F>(
    mut rx: UnboundedReceiver<NewViewEvent>,
    sink: S,
    on_error: F,
) -> JoinHandle<()>
where
    S: ViewSink,
    F: Fn(&S::Error) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(err) = sink.append(event).await {
                on_error(&err);
            }
        }
    })
}

/// Coarse visitor signature: first element of the forwarded-for list when
/// present, else the raw connection address. Used only to group repeated
/// requests, never as identity.
pub fn visitor_signature(forwarded_for: Option<&str>, remote_addr: Option<&str>) -> String {
    forwarded_for
        .and_then(|raw| raw.split(',').next())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .or_else(|| remote_addr.map(|s| s.to_string()))
        .unwrap_or_default()
}
