use serde_json::Value;

use super::Synchronizer;
use crate::contents::MergeOutcome;
use crate::error::{FetchError, SyncError};
use crate::gateway::{api_path, ApiRequest, Fetched, Method};
use crate::models::{Content, ContentId, StreamPayload, UnfetchedCount};
use crate::streams::{Direction, Origin, StreamKind, StreamParams, CONTENT_STREAM};

/// A create, edit or reply submission.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    method: Method,
    path: String,
    body: Value,
    stream: Option<String>,
}

impl PublishRequest {
    pub fn create(body: Value) -> Self {
        Self {
            method: Method::Post,
            path: api_path("content"),
            body,
            stream: None,
        }
    }

    pub fn edit(id: ContentId, body: Value) -> Self {
        Self {
            method: Method::Patch,
            path: api_path(&format!("content/{id}")),
            body,
            stream: None,
        }
    }

    pub fn reply(parent: ContentId, mut body: Value) -> Self {
        if let Value::Object(fields) = &mut body {
            fields.insert("parent".into(), parent.into());
        }
        Self::create(body)
    }

    /// Top-level results are also merged into `stream`.
    pub fn into_stream(mut self, stream: &str) -> Self {
        self.stream = Some(stream.to_string());
        self
    }
}

fn content_path(id: ContentId) -> String {
    api_path(&format!("content/{id}"))
}

fn first_item(payload: &StreamPayload, id: ContentId) -> Result<Content, SyncError> {
    payload
        .items()
        .first()
        .cloned()
        .ok_or(SyncError::UnknownContent(id))
}

impl Synchronizer {
    /// Resolves `name` for display and brings it up to date. A failed first
    /// fetch restores the stream as it was before the call.
    pub async fn enter_stream(&self, name: &str, params: StreamParams) -> Result<(), SyncError> {
        let (transition, kind, is_empty, newest, single_id) = self.with_store(|store| {
            let transition = store.streams.get_or_create(name, params.clone(), false)?;
            let stream = store
                .streams
                .get_mut(name)
                .ok_or_else(|| SyncError::UnknownStream(name.to_string()))?;
            stream.clear_backlog();
            Ok::<_, SyncError>((
                transition,
                stream.kind,
                stream.index().is_empty(),
                stream.newest_cursor(),
                params.get("id").cloned(),
            ))
        })?;

        let result = match kind {
            StreamKind::Contacts => Ok(()),
            StreamKind::SingleContent => match single_id.as_deref().map(str::parse::<ContentId>) {
                Some(Ok(id)) => self.get_content(id, Some(CONTENT_STREAM), false).await.map(drop),
                _ => Err(SyncError::InvalidParams(format!(
                    "{name} needs a numeric id, got {single_id:?}"
                ))),
            },
            StreamKind::Timeline if is_empty => {
                let request = self.stream_request(name)?.query_opt("first_id", newest);
                self.fetch_stream(name, request, Direction::Newer).await.map(drop)
            }
            StreamKind::Timeline => self.get_unfetched_count(name).await.map(drop),
        };

        self.with_store(|store| match &result {
            Ok(()) => {
                if store.streams.commit(transition) {
                    store.current_stream = Some(name.to_string());
                }
            }
            Err(_) => store.streams.rollback(transition),
        });
        match &result {
            Ok(()) => tracing::info!(stream = name, "entered stream"),
            Err(err) => tracing::info!(stream = name, error = %err, "stream transition rolled back"),
        }
        result
    }

    /// Fetches the page below the oldest loaded item, stopping at the next
    /// segment when there is a gap. Does nothing once the stream is exhausted.
    pub async fn load_older(&self, name: &str) -> Result<MergeOutcome, SyncError> {
        let (exhausted, oldest, gap) = self.with_store(|store| {
            store
                .streams
                .get(name)
                .map(|stream| (stream.no_more_data, stream.oldest_cursor(), stream.gap_cursor()))
                .ok_or_else(|| SyncError::UnknownStream(name.to_string()))
        })?;
        if exhausted {
            return Ok(MergeOutcome::default());
        }
        let request = self
            .stream_request(name)?
            .query_opt("last_id", oldest)
            .query_opt("first_id", gap);
        self.fetch_stream(name, request, Direction::Older).await
    }

    /// Pulls in everything newer than the newest loaded item when live
    /// notifications or the count probe announced new content.
    pub async fn catch_up_to_newest(&self, name: &str) -> Result<MergeOutcome, SyncError> {
        let newest = self.with_store(|store| {
            let stream = store
                .streams
                .get_mut(name)
                .ok_or_else(|| SyncError::UnknownStream(name.to_string()))?;
            if stream.pending_count() == 0 {
                return Ok::<_, SyncError>(None);
            }
            stream.clear_backlog();
            Ok(Some(stream.newest_cursor()))
        })?;
        let Some(newest) = newest else {
            return Ok(MergeOutcome::default());
        };
        let request = self.stream_request(name)?.query_opt("first_id", newest);
        self.fetch_stream(name, request, Direction::Newer).await
    }

    /// Asks how many items are newer than the newest loaded one. When the
    /// server cannot tell, the stream is refreshed instead.
    pub async fn get_unfetched_count(&self, name: &str) -> Result<Option<u64>, SyncError> {
        let (newest, generation) = self.with_store(|store| {
            store
                .streams
                .get(name)
                .map(|stream| (stream.newest_cursor(), stream.generation()))
                .ok_or_else(|| SyncError::UnknownStream(name.to_string()))
        })?;
        let request = self
            .stream_request(name)?
            .query_opt("first_id", newest)
            .flag("unfetched_count");
        let probe = self
            .request(request)
            .await
            .and_then(Fetched::decode::<UnfetchedCount>)
            .map_err(|err| self.report("Content", err))?;

        self.with_store(|store| {
            if let Some(stream) = store
                .streams
                .get_mut(name)
                .filter(|stream| stream.generation() == generation)
            {
                let count = probe.count.unwrap_or(0);
                stream.set_unfetched_count(usize::try_from(count).unwrap_or(usize::MAX));
            }
        });
        tracing::debug!(stream = name, count = ?probe.count, "unfetched content probed");
        if probe.count.is_none() {
            let request = self.stream_request(name)?.query_opt("first_id", newest);
            self.fetch_stream(name, request, Direction::Newer).await?;
        }
        Ok(probe.count)
    }

    /// Loads a single content. Cached items are served from the cache
    /// unless `update` is set; replies to uncached parents resolve to their
    /// thread root. With a stream name the result is merged into it.
    pub async fn get_content(
        &self,
        id: ContentId,
        stream: Option<&str>,
        update: bool,
    ) -> Result<Content, SyncError> {
        let cached = self.with_store(|store| {
            let content = store.contents.get(id)?;
            let shown = content
                .root_parent
                .and_then(|root| store.contents.get(root))
                .unwrap_or(content);
            Some(shown.clone())
        });

        let payload = match cached {
            Some(content) if !update => StreamPayload::from_items(vec![content]),
            _ => self
                .fetch_content(id)
                .await
                .map_err(|err| self.report("Content", err))?,
        };
        let content = first_item(&payload, id)?;

        self.with_store(|store| match stream {
            Some(name) => {
                let target = store
                    .streams
                    .get_mut(name)
                    .ok_or_else(|| SyncError::UnknownStream(name.to_string()))?;
                // Only the single-content view takes its route and
                // subscription from the item; live refreshes keep theirs.
                let payload = if name == CONTENT_STREAM {
                    target.params = StreamParams::from([("id".to_string(), content.id.to_string())]);
                    payload
                } else {
                    StreamPayload::from_items(payload.into_items())
                };
                store.merge_stream_payload(name, payload, Direction::Newer, Origin::Fetched)?;
                Ok(content)
            }
            None => {
                if !store.contents.contains(content.id) {
                    store.contents.upsert(content.clone(), &mut store.profiles);
                }
                Ok(content)
            }
        })
    }

    /// Network half of `get_content`: a reply whose parent is cached is
    /// linked into the reply tree, any other reply is swapped for its root.
    async fn fetch_content(&self, id: ContentId) -> Result<StreamPayload, FetchError> {
        let payload = self
            .request(ApiRequest::get(content_path(id)))
            .await?
            .stream_payload()?;
        let Some(content) = payload.items().first().cloned() else {
            return Ok(payload);
        };
        let Some(parent) = content.parent else {
            return Ok(payload);
        };

        let parent_cached = self.with_store(|store| {
            if !store.contents.contains(parent) {
                return false;
            }
            store
                .contents
                .merge_replies(vec![content.clone()], &mut store.profiles);
            true
        });
        if parent_cached {
            return Ok(payload);
        }
        let root = content.root_parent.unwrap_or(parent);
        self.request(ApiRequest::get(content_path(root)))
            .await?
            .stream_payload()
    }

    /// Creates, edits or replies. Replies are linked under their parent;
    /// top-level results go to the requested stream without moving its
    /// cursors.
    pub async fn publish_content(&self, request: PublishRequest) -> Result<Content, SyncError> {
        let PublishRequest {
            method,
            path,
            body,
            stream,
        } = request;
        let payload = self
            .request(ApiRequest::new(method, path).json(body))
            .await
            .and_then(Fetched::stream_payload)
            .map_err(|err| self.report("Content", err))?;
        let content = payload.items().first().cloned().ok_or_else(|| {
            SyncError::Fetch(FetchError::Decode(serde::de::Error::custom(
                "publish response carried no content",
            )))
        })?;

        self.with_store(|store| {
            if content.is_reply() {
                store
                    .contents
                    .merge_replies(payload.into_items(), &mut store.profiles);
                return Ok(());
            }
            match stream.as_deref() {
                Some(name) => store
                    .merge_stream_payload(name, payload, Direction::Newer, Origin::Local)
                    .map(drop),
                None => {
                    store.contents.upsert(content.clone(), &mut store.profiles);
                    Ok(())
                }
            }
        })?;
        tracing::info!(id = content.id, reply = content.is_reply(), "content published");
        Ok(content)
    }

    /// Deletes a content on the server, then everywhere locally.
    pub async fn delete_content(&self, id: ContentId) -> Result<usize, SyncError> {
        self.request(ApiRequest::delete(content_path(id)))
            .await
            .map_err(|err| self.report("Content Deletion Error", err))?;
        let removed = self.with_store(|store| store.remove_content(id));
        tracing::info!(id, removed, "content deleted");
        Ok(removed)
    }

    /// Fetches the direct thread, or the whole conversation, below `id`.
    pub async fn fetch_replies(
        &self,
        id: ContentId,
        full_conversation: bool,
    ) -> Result<Vec<ContentId>, SyncError> {
        let action = if full_conversation { "replies" } else { "thread" };
        let payload = self
            .request(ApiRequest::get(api_path(&format!("content/{id}/{action}"))))
            .await
            .and_then(Fetched::stream_payload)
            .map_err(|err| self.report_quietly("replies", err))?;
        Ok(self.with_store(|store| {
            store
                .contents
                .merge_replies(payload.into_items(), &mut store.profiles)
        }))
    }

    /// Expands or collapses replies, fetching them when the cached tree is
    /// incomplete. Returns whether the replies are now shown.
    pub async fn toggle_replies(&self, id: ContentId) -> Result<bool, SyncError> {
        let needs_fetch = self
            .with_store(|store| store.contents.toggle_replies(id))
            .ok_or(SyncError::UnknownContent(id))?;
        if needs_fetch {
            self.fetch_replies(id, false).await?;
        }
        Ok(self
            .with_store(|store| store.contents.get(id).map(|content| content.show_replies))
            .unwrap_or(false))
    }

    pub fn toggle_reply_editor(&self, id: ContentId) -> Result<bool, SyncError> {
        self.with_store(|store| store.contents.toggle_reply_editor(id))
            .ok_or(SyncError::UnknownContent(id))
    }

    /// Empties every stream, e.g. after signing out, and optionally reloads
    /// one of them.
    pub async fn reset_content(&self, refetch: Option<&str>) -> Result<(), SyncError> {
        self.with_store(|store| store.streams.reset(None));
        tracing::info!(refetch, "all streams reset");
        if let Some(name) = refetch {
            let request = self.stream_request(name)?;
            self.fetch_stream(name, request, Direction::Newer).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::*;
    use crate::error::{FetchError, SyncError};
    use crate::gateway::RawResponse;
    use crate::streams::StreamParams;
    use crate::sync::SyncEvent;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::PublishRequest;

    fn params(pairs: &[(&str, &str)]) -> StreamParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn forward_then_backward_pagination() {
        let h = setup();
        h.transport.respond_json("/api/streams/public/", posts(&[5, 4, 3]));
        h.transport.respond_json("/api/streams/public/?last_id=3", posts(&[2, 1]));
        h.transport.respond_json("/api/streams/public/?last_id=1", posts(&[]));

        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();
        let stream = h.sync.stream("public").unwrap();
        assert_eq!(stream.index(), &[5, 4, 3]);
        assert_eq!(stream.first_ids(), vec![5]);
        assert_eq!(stream.last_ids(), vec![3]);

        let outcome = h.sync.load_older("public").await.unwrap();
        assert_eq!(outcome.new_ids, vec![2, 1]);
        let stream = h.sync.stream("public").unwrap();
        assert_eq!(stream.index(), &[5, 4, 3, 2, 1]);
        assert_eq!(stream.last_ids(), vec![1]);

        h.sync.load_older("public").await.unwrap();
        assert!(h.sync.stream("public").unwrap().no_more_data);

        // Exhausted streams do not hit the network again.
        h.sync.load_older("public").await.unwrap();
        assert_eq!(
            h.transport.request_paths(),
            vec![
                "/api/streams/public/",
                "/api/streams/public/?last_id=3",
                "/api/streams/public/?last_id=1",
            ]
        );
    }

    #[tokio::test]
    async fn backward_fetch_stops_at_gap() {
        let h = setup();
        h.transport.respond_json("/api/streams/local/", posts(&[5, 4]));
        h.transport.respond_json(
            "/api/streams/local/?first_id=5&unfetched_count",
            json!({"count": null}),
        );
        h.transport.respond_json(
            "/api/streams/local/?first_id=5",
            json!({"context": {"unfetched_content": true}, "data": posts(&[20, 19])}),
        );
        h.transport
            .respond_json("/api/streams/local/?last_id=19&first_id=5", posts(&[18, 6]));

        h.sync.enter_stream("local", StreamParams::new()).await.unwrap();
        let count = h.sync.get_unfetched_count("local").await.unwrap();
        assert_eq!(count, None);
        let stream = h.sync.stream("local").unwrap();
        assert_eq!(stream.first_ids(), vec![20, 5]);
        assert_eq!(stream.last_ids(), vec![19, 4]);

        h.sync.load_older("local").await.unwrap();
        let stream = h.sync.stream("local").unwrap();
        assert_eq!(stream.index(), &[20, 19, 18, 6, 5, 4]);
        assert_eq!(stream.first_ids(), vec![20]);
        assert_eq!(stream.last_ids(), vec![4]);
    }

    #[tokio::test]
    async fn reentering_probes_for_new_content() {
        let h = setup();
        h.transport.respond_json("/api/streams/public/", posts(&[5, 4]));
        h.transport.respond_json(
            "/api/streams/public/?first_id=5&unfetched_count",
            json!({"count": 2}),
        );
        h.transport
            .respond_json("/api/streams/public/?first_id=5", posts(&[7, 6]));

        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();
        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();
        assert_eq!(h.sync.stream("public").unwrap().pending_count(), 2);

        let outcome = h.sync.catch_up_to_newest("public").await.unwrap();
        assert_eq!(outcome.new_ids, vec![7, 6]);
        let stream = h.sync.stream("public").unwrap();
        assert_eq!(stream.index(), &[7, 6, 5, 4]);
        assert_eq!(stream.pending_count(), 0);

        // Nothing pending, nothing fetched.
        let outcome = h.sync.catch_up_to_newest("public").await.unwrap();
        assert!(outcome.new_ids.is_empty());
        assert_eq!(h.transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn failed_transition_restores_previous_stream() {
        let h = setup();
        h.transport.respond_json("/api/streams/tag/rust/", posts(&[3]));
        h.transport.respond(
            "/api/streams/tag/go/",
            RawResponse::json(404, &json!({"detail": "Not found."})),
        );

        h.sync
            .enter_stream("tag", params(&[("tag_name", "rust")]))
            .await
            .unwrap();
        let err = h
            .sync
            .enter_stream("tag", params(&[("tag_name", "go")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Fetch(_)));

        let stream = h.sync.stream("tag").unwrap();
        assert_eq!(stream.params, params(&[("tag_name", "rust")]));
        assert_eq!(stream.index(), &[3]);
        assert!(stream.auth_required);
        assert!(h.sync.is_stream_active("tag"));
        assert_eq!(h.sync.current_stream().as_deref(), Some("tag"));
        assert_eq!(
            h.sync.stream_route("tag"),
            Some(("tag".to_string(), params(&[("tag_name", "rust")])))
        );
    }

    #[tokio::test]
    async fn session_expiry_during_transition_leaves_streams_cleared() {
        let h = setup_with(signed_in());
        h.transport.respond_json("/api/streams/public/", posts(&[9]));
        h.transport.respond_json("/api/streams/tag/rust/", posts(&[3]));
        h.transport.respond(
            "/api/streams/tag/go/",
            RawResponse::json(401, &json!({"detail": "Not authenticated."})),
        );

        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();
        h.sync
            .enter_stream("tag", params(&[("tag_name", "rust")]))
            .await
            .unwrap();
        let err = h
            .sync
            .enter_stream("tag", params(&[("tag_name", "go")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err.fetch_error(),
            Some(FetchError::SessionExpired { status: 401 })
        ));

        assert!(h.sync.stream("public").unwrap().index().is_empty());
        let tag = h.sync.stream("tag").unwrap();
        assert!(tag.index().is_empty());
        assert!(!tag.is_active);
        assert!(!h.sync.has_content("tag"));
        assert!(h
            .events
            .try_iter()
            .any(|event| matches!(event, SyncEvent::SignedOut)));
    }

    #[tokio::test]
    async fn single_content_stream_records_id_and_notify_key() {
        let h = setup();
        let mut item = post(42);
        item["notify_key"] = json!("content_42");
        h.transport.respond_json("/api/content/42/", item);

        h.sync
            .enter_stream("content", params(&[("id", "42")]))
            .await
            .unwrap();
        let stream = h.sync.stream("content").unwrap();
        assert_eq!(stream.index(), &[42]);
        assert_eq!(stream.params, params(&[("id", "42")]));
        assert_eq!(stream.notify_key.as_deref(), Some("content/42"));
        assert!(h.sync.is_stream_active("content"));

        let err = h
            .sync
            .enter_stream("content", params(&[("id", "abc")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn reply_with_uncached_parent_resolves_to_root() {
        let h = setup();
        h.transport.respond_json("/api/content/11/", reply(11, 10));
        h.transport.respond_json("/api/content/10/", post(10));

        let content = h.sync.get_content(11, None, false).await.unwrap();
        assert_eq!(content.id, 10);
        assert!(h.sync.content(10).is_some());
        assert!(h.sync.content(11).is_none());

        // Now cached: served without a request.
        let again = h.sync.get_content(10, None, false).await.unwrap();
        assert_eq!(again.id, 10);
        assert_eq!(h.transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn contacts_views_do_not_fetch() {
        let h = setup();
        h.sync
            .enter_stream("profile-followers", params(&[("uuid", "me")]))
            .await
            .unwrap();
        assert!(h.transport.requests().is_empty());
        assert!(h.sync.is_stream_active("profile-followers"));
    }

    #[tokio::test]
    async fn publish_reply_links_under_parent() {
        let h = setup();
        h.transport.respond_json("/api/streams/public/", posts(&[1]));
        h.transport.respond_json("/api/content/", reply(2, 1));
        h.transport.respond_json("/api/content/", post(3));
        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();

        let published = h
            .sync
            .publish_content(PublishRequest::reply(1, json!({"text": "hi"})))
            .await
            .unwrap();
        assert_eq!(published.id, 2);
        assert_eq!(h.sync.content(1).unwrap().reply_ids, vec![2]);
        assert_eq!(
            h.transport.requests()[1].body,
            Some(json!({"text": "hi", "parent": 1}))
        );

        h.sync
            .publish_content(PublishRequest::create(json!({"text": "new"})).into_stream("public"))
            .await
            .unwrap();
        let stream = h.sync.stream("public").unwrap();
        assert_eq!(stream.index(), &[3, 1]);
        assert_eq!(stream.first_ids(), vec![1]);
    }

    #[tokio::test]
    async fn publish_validation_error_is_toasted() {
        let h = setup();
        h.transport.respond(
            "/api/content/",
            RawResponse::json(400, &json!({"recipients": ["Unknown recipient"]})),
        );
        let err = h
            .sync
            .publish_content(PublishRequest::create(json!({"text": ""})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown recipient");
        assert_eq!(h.toasts()[0].detail, "Unknown recipient");
    }

    #[tokio::test]
    async fn delete_cascades_everywhere() {
        let h = setup();
        h.transport.respond_json("/api/streams/public/", posts(&[3, 2, 1]));
        h.transport.respond_json("/api/streams/local/", posts(&[2]));
        h.transport
            .respond_json("/api/content/2/thread/", json!([reply(20, 2), reply(21, 20)]));
        h.transport.respond("/api/content/2/", RawResponse::empty(204));

        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();
        h.sync.enter_stream("local", StreamParams::new()).await.unwrap();
        assert_eq!(h.sync.fetch_replies(2, false).await.unwrap(), vec![20, 21]);

        assert_eq!(h.sync.delete_content(2).await.unwrap(), 3);
        assert_eq!(h.sync.stream("public").unwrap().index(), &[3, 1]);
        assert!(h.sync.stream("local").unwrap().index().is_empty());
        assert!(h.sync.content(20).is_none());
        assert!(h.sync.content(21).is_none());
    }

    #[tokio::test]
    async fn toggling_replies_fetches_missing_thread() {
        let h = setup();
        let mut parent = post(1);
        parent["reply_count"] = json!(1);
        h.transport
            .respond_json("/api/streams/public/", serde_json::Value::Array(vec![parent]));
        h.transport
            .respond_json("/api/content/1/thread/", json!([reply(5, 1)]));
        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();

        assert!(h.sync.toggle_replies(1).await.unwrap());
        assert_eq!(h.sync.content(1).unwrap().reply_ids, vec![5]);
        assert!(!h.sync.toggle_replies(1).await.unwrap());
        assert!(h.sync.toggle_reply_editor(1).unwrap());
        assert!(matches!(
            h.sync.toggle_reply_editor(99),
            Err(SyncError::UnknownContent(99))
        ));
    }

    #[tokio::test]
    async fn reset_content_refetches_requested_stream() {
        let h = setup();
        h.transport.respond_json("/api/streams/public/", posts(&[2, 1]));
        h.transport.respond_json("/api/streams/local/", posts(&[9]));
        h.transport.respond_json("/api/streams/public/", posts(&[3, 2, 1]));
        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();
        h.sync.enter_stream("local", StreamParams::new()).await.unwrap();

        h.sync.reset_content(Some("public")).await.unwrap();
        assert_eq!(h.sync.stream("public").unwrap().index(), &[3, 2, 1]);
        assert!(!h.sync.has_content("local"));
    }
}
