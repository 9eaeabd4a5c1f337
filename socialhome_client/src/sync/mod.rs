//! Orchestrates fetches against the shared store.
//!
//! Every operation names its target stream explicitly. The store lock is
//! taken only for the synchronous merge steps between awaits, so concurrent
//! operations interleave at request boundaries and never observe a half
//! applied merge.

mod content;
mod events;
mod live;
mod profiles;

use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use flume::{Receiver, Sender};

use crate::auth::AuthContext;
use crate::config::ClientConfig;
use crate::contents::MergeOutcome;
use crate::error::{FetchError, SyncError};
use crate::gateway::{api_path, ApiRequest, FetchGateway, Fetched, HttpTransport};
use crate::models::{Content, ContentId, Profile};
use crate::store::Store;
use crate::streams::{Direction, Origin, Stream, StreamDefinition, StreamParams, StreamStatus};

pub use content::PublishRequest;
pub use events::{Severity, SyncEvent, Toast};
pub use live::LiveOutcome;

use events::LoadingIndicator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub loading_delay: Duration,
    pub toast_life: Duration,
    pub max_unfetched_backlog: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for SyncSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            loading_delay: config.loading_indicator_delay(),
            toast_life: config.toast_lifetime(),
            max_unfetched_backlog: config.max_unfetched_backlog,
        }
    }
}

#[derive(Clone)]
pub struct Synchronizer {
    gateway: FetchGateway,
    auth: Arc<dyn AuthContext>,
    store: Arc<Mutex<Store>>,
    events: Sender<SyncEvent>,
    settings: SyncSettings,
    loading_visible: Arc<AtomicUsize>,
}

impl Synchronizer {
    pub fn new(
        gateway: FetchGateway,
        auth: Arc<dyn AuthContext>,
        definitions: impl IntoIterator<Item = StreamDefinition>,
        settings: SyncSettings,
    ) -> (Self, Receiver<SyncEvent>) {
        let (events, receiver) = flume::unbounded();
        let synchronizer = Self {
            gateway,
            auth,
            store: Arc::new(Mutex::new(Store::new(definitions))),
            events,
            settings,
            loading_visible: Arc::new(AtomicUsize::new(0)),
        };
        (synchronizer, receiver)
    }

    /// Wires an HTTP transport for `config` and the socialhome routes.
    pub fn from_config(
        config: &ClientConfig,
        auth: Arc<dyn AuthContext>,
        definitions: impl IntoIterator<Item = StreamDefinition>,
    ) -> anyhow::Result<(Self, Receiver<SyncEvent>)> {
        let transport = HttpTransport::new(config.base_url.clone(), config.request_timeout())?;
        let gateway = FetchGateway::new(Arc::new(transport), auth.clone());
        Ok(Self::new(gateway, auth, definitions, SyncSettings::from(config)))
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut Store) -> T) -> T {
        let mut guard = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn is_stream_active(&self, name: &str) -> bool {
        self.with_store(|store| store.streams.is_active(name))
    }

    pub fn is_available(&self, name: &str) -> bool {
        let authenticated = self.auth.is_authenticated();
        self.with_store(|store| store.streams.is_available(name, authenticated))
    }

    pub fn has_content(&self, name: &str) -> bool {
        self.with_store(|store| store.streams.has_content(name))
    }

    pub fn content(&self, id: ContentId) -> Option<Content> {
        self.with_store(|store| store.contents.get(id).cloned())
    }

    /// Cached contents of a stream in index order.
    pub fn stream_contents(&self, name: &str) -> Vec<Content> {
        self.with_store(|store| {
            let Some(stream) = store.streams.get(name) else {
                return Vec::new();
            };
            stream
                .index()
                .iter()
                .filter_map(|id| store.contents.get(*id).cloned())
                .collect()
        })
    }

    pub fn stream(&self, name: &str) -> Option<Stream> {
        self.with_store(|store| store.streams.get(name).cloned())
    }

    pub fn stream_status(&self, name: &str) -> Option<StreamStatus> {
        self.with_store(|store| store.streams.get(name).map(Stream::status))
    }

    pub fn stream_route(&self, name: &str) -> Option<(String, StreamParams)> {
        self.with_store(|store| store.streams.stream_route(name))
    }

    pub fn profile(&self, uuid: &str) -> Option<Profile> {
        self.with_store(|store| store.profiles.get(uuid).cloned())
    }

    /// The stream most recently entered successfully.
    pub fn current_stream(&self) -> Option<String> {
        self.with_store(|store| store.current_stream.clone())
    }

    fn loading_indicator(&self) -> LoadingIndicator {
        LoadingIndicator::start(
            self.settings.loading_delay,
            self.loading_visible.clone(),
            self.events.clone(),
        )
    }

    async fn request(&self, request: ApiRequest) -> Result<Fetched, FetchError> {
        let _indicator = self.loading_indicator();
        self.gateway.call(request).await
    }

    fn stream_request(&self, name: &str) -> Result<ApiRequest, SyncError> {
        self.with_store(|store| {
            store
                .streams
                .get(name)
                .map(|stream| ApiRequest::get(api_path(&stream.endpoint)))
                .ok_or_else(|| SyncError::UnknownStream(name.to_string()))
        })
    }

    /// Fetches a page for `name` and merges it. Access denials mark the
    /// stream as requiring login. A page that arrives after the stream was
    /// replaced or reset is dropped.
    async fn fetch_stream(
        &self,
        name: &str,
        request: ApiRequest,
        direction: Direction,
    ) -> Result<MergeOutcome, SyncError> {
        let generation = self.with_store(|store| {
            store.streams.get_mut(name).map(|stream| {
                stream.loading = true;
                stream.generation()
            })
        });
        let result = self
            .request(request)
            .await
            .and_then(Fetched::stream_payload);
        let merged = self.with_store(|store| {
            let current = generation.is_some_and(|g| store.streams.is_current(name, g));
            if generation.is_some() && !current {
                tracing::debug!(stream = name, "discarding page for a superseded stream");
                return result.map(|_| Ok(MergeOutcome::default()));
            }
            if let Some(stream) = store.streams.get_mut(name) {
                stream.loading = false;
                if let Err(err) = &result {
                    if err.marks_auth_required() {
                        stream.auth_required = true;
                    }
                }
            }
            result.map(|payload| {
                store.merge_stream_payload(name, payload, direction, Origin::Fetched)
            })
        });
        match merged {
            Ok(outcome) => outcome,
            Err(err) => Err(self.report("Content", err)),
        }
    }

    /// Turns a failed call into a user notification. An expired session
    /// resets every stream and signals a sign-out instead.
    fn report(&self, summary: &str, err: FetchError) -> SyncError {
        if self.handle_session_expiry(&err) {
            return SyncError::Fetch(err);
        }
        tracing::warn!(summary, error = %err, "request failed");
        self.toast(Severity::Error, summary, err.to_string());
        SyncError::Fetch(err)
    }

    /// Like `report`, for background calls the user did not ask for.
    fn report_quietly(&self, context: &str, err: FetchError) -> SyncError {
        if !self.handle_session_expiry(&err) {
            tracing::warn!(context, error = %err, "background request failed");
        }
        SyncError::Fetch(err)
    }

    fn handle_session_expiry(&self, err: &FetchError) -> bool {
        if !matches!(err, FetchError::SessionExpired { .. }) {
            return false;
        }
        tracing::info!("session expired, resetting all streams");
        self.with_store(|store| store.streams.reset(None));
        let _ = self.events.send(SyncEvent::SignedOut);
        true
    }

    fn toast(&self, severity: Severity, summary: &str, detail: String) {
        let _ = self.events.send(SyncEvent::Toast(Toast {
            severity,
            summary: summary.to_string(),
            detail,
            life: self.settings.toast_life,
        }));
    }
}
