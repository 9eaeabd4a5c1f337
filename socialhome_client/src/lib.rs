//! Client-side stream synchronization for socialhome.
//!
//! Keeps named, paginated timelines of posts in sync with the server: it
//! merges pages and live notifications, tracks cursors for scrolling in both
//! directions, and applies local mutations (share, delete, reply) to every
//! cached stream.

pub mod auth;
pub mod config;
pub mod contents;
pub mod error;
pub mod gateway;
pub mod models;
pub mod profiles;
pub mod store;
pub mod streams;
pub mod sync;

pub use auth::{AuthContext, SessionState};
pub use config::ClientConfig;
pub use error::{FetchError, SyncError};
pub use gateway::{ApiRequest, FetchGateway, Fetched, HttpTransport, Method, RawResponse, Transport};
pub use models::{Content, ContentId, LiveNotification, Profile, StreamPayload};
pub use streams::{default_definitions, StreamDefinition, StreamKind, StreamParams, StreamStatus};
pub use sync::{LiveOutcome, PublishRequest, Severity, SyncEvent, SyncSettings, Synchronizer, Toast};
