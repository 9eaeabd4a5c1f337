use super::Synchronizer;
use crate::error::SyncError;
use crate::gateway::{api_path, ApiRequest, Fetched, Method};
use crate::models::{ContentId, LiveNotification, ShareResponse, StreamPayload};
use crate::profiles::ProfileRegistrar;
use crate::streams::{Direction, Origin};

/// What a live notification did to the client state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    /// Unknown parent, already cached reply, or id already queued.
    Ignored,
    /// Collapsed parent: only its reply count moved.
    ReplyCounted,
    /// Expanded parent: the reply was fetched and linked.
    ReplyFetched,
    /// Already displayed: refreshed in place.
    Refreshed,
    /// Added to the stream's unfetched backlog.
    Queued,
}

enum LivePlan {
    Done(LiveOutcome),
    FetchReply,
    Refresh,
}

impl Synchronizer {
    /// Applies a push notification to `stream`.
    pub async fn record_live_notification(
        &self,
        stream: &str,
        event: LiveNotification,
    ) -> Result<LiveOutcome, SyncError> {
        let cap = self.settings.max_unfetched_backlog;
        let plan = self.with_store(|store| {
            if let Some(parent_id) = event.parent_id {
                let expanded = store
                    .contents
                    .get(parent_id)
                    .map(|parent| parent.show_replies || !parent.reply_ids.is_empty());
                let plan = match expanded {
                    None => LivePlan::Done(LiveOutcome::Ignored),
                    Some(_) if store.contents.contains(event.id) => {
                        LivePlan::Done(LiveOutcome::Ignored)
                    }
                    Some(true) => LivePlan::FetchReply,
                    Some(false) => {
                        if let Some(parent) = store.contents.get_mut(parent_id) {
                            parent.reply_count += 1;
                        }
                        LivePlan::Done(LiveOutcome::ReplyCounted)
                    }
                };
                return Ok::<_, SyncError>(plan);
            }
            let target = store
                .streams
                .get_mut(stream)
                .ok_or_else(|| SyncError::UnknownStream(stream.to_string()))?;
            if target.contains(event.id) {
                Ok(LivePlan::Refresh)
            } else if target.push_unfetched(event.id, cap) {
                Ok(LivePlan::Done(LiveOutcome::Queued))
            } else {
                Ok(LivePlan::Done(LiveOutcome::Ignored))
            }
        })?;

        let outcome = match plan {
            LivePlan::Done(outcome) => outcome,
            LivePlan::FetchReply => {
                self.get_content(event.id, None, false).await?;
                LiveOutcome::ReplyFetched
            }
            LivePlan::Refresh => {
                self.get_content(event.id, Some(stream), true).await?;
                LiveOutcome::Refreshed
            }
        };
        tracing::debug!(stream, id = event.id, ?outcome, "live notification");
        Ok(outcome)
    }

    /// Shares (`desired = true`) or unshares a content and applies the new
    /// share edge to `stream` without moving its cursors.
    pub async fn apply_share_toggle(
        &self,
        stream: &str,
        id: ContentId,
        desired: bool,
    ) -> Result<(), SyncError> {
        self.with_store(|store| {
            if !store.contents.contains(id) {
                return Err(SyncError::UnknownContent(id));
            }
            if store.streams.get(stream).is_none() {
                return Err(SyncError::UnknownStream(stream.to_string()));
            }
            Ok(())
        })?;
        let method = if desired { Method::Post } else { Method::Delete };
        let response = self
            .request(ApiRequest::new(method, api_path(&format!("content/{id}/share"))))
            .await
            .and_then(Fetched::decode::<ShareResponse>)
            .map_err(|err| self.report("Share Error", err))?;

        let current_user = self.auth.current_user();
        self.with_store(|store| {
            let mut updated = store
                .contents
                .get(id)
                .cloned()
                .ok_or(SyncError::UnknownContent(id))?;
            updated.through = response.content_id;
            if desired {
                updated.through_author = current_user;
                updated.shares_count += 1;
            } else {
                if let Some(author) = &response.through_author {
                    store.profiles.register_profile(author);
                }
                updated.through_author = response.through_author;
                updated.shares_count = updated.shares_count.saturating_sub(1);
            }
            updated.user_has_shared = desired;
            store.merge_stream_payload(
                stream,
                StreamPayload::from_items(vec![updated]),
                Direction::Newer,
                Origin::Local,
            )
        })?;
        tracing::info!(id, shared = desired, "share toggled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::*;
    use super::LiveOutcome;
    use crate::error::SyncError;
    use crate::gateway::RawResponse;
    use crate::models::LiveNotification;
    use crate::streams::StreamParams;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn live_top_level_is_queued_then_caught_up() {
        let h = setup();
        h.transport.respond_json("/api/streams/public/", posts(&[5, 4, 3]));
        h.transport.respond_json("/api/streams/public/?first_id=5", posts(&[9]));
        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();

        let outcome = h
            .sync
            .record_live_notification("public", LiveNotification::top_level(9))
            .await
            .unwrap();
        assert_eq!(outcome, LiveOutcome::Queued);
        assert_eq!(h.sync.stream("public").unwrap().unfetched(), &[9]);
        let again = h
            .sync
            .record_live_notification("public", LiveNotification::top_level(9))
            .await
            .unwrap();
        assert_eq!(again, LiveOutcome::Ignored);

        h.sync.catch_up_to_newest("public").await.unwrap();
        let stream = h.sync.stream("public").unwrap();
        assert_eq!(stream.index(), &[9, 5, 4, 3]);
        assert!(stream.unfetched().is_empty());
    }

    #[tokio::test]
    async fn backlog_is_capped() {
        let h = setup();
        h.transport.respond_json("/api/streams/public/", posts(&[1]));
        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();
        for id in 10..15 {
            h.sync
                .record_live_notification("public", LiveNotification::top_level(id))
                .await
                .unwrap();
        }
        assert_eq!(h.sync.stream("public").unwrap().unfetched(), &[14, 13, 12]);
    }

    #[tokio::test]
    async fn live_update_of_displayed_item_refreshes_it() {
        let h = setup();
        h.transport.respond_json("/api/streams/public/", posts(&[5, 4]));
        let mut edited = post(4);
        edited["text"] = json!("edited");
        edited["notify_key"] = json!("content_4");
        h.transport.respond_json("/api/content/4/", edited);
        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();

        let outcome = h
            .sync
            .record_live_notification("public", LiveNotification::top_level(4))
            .await
            .unwrap();
        assert_eq!(outcome, LiveOutcome::Refreshed);
        assert_eq!(h.sync.content(4).unwrap().text(), Some("edited"));
        let stream = h.sync.stream("public").unwrap();
        assert_eq!(stream.index(), &[5, 4]);
        assert_eq!(stream.notify_key, None);
    }

    #[tokio::test]
    async fn live_replies_count_or_fetch() {
        let h = setup();
        h.transport.respond_json("/api/streams/public/", posts(&[1, 2]));
        h.transport.respond_json("/api/content/1/thread/", json!([reply(10, 1)]));
        h.transport.respond_json("/api/content/11/", reply(11, 1));
        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();

        // Collapsed parent without loaded replies: count only.
        let outcome = h
            .sync
            .record_live_notification("public", LiveNotification::reply(30, 2))
            .await
            .unwrap();
        assert_eq!(outcome, LiveOutcome::ReplyCounted);
        assert_eq!(h.sync.content(2).unwrap().reply_count, 1);

        // Unknown parent and already cached replies are ignored.
        for event in [LiveNotification::reply(31, 99), LiveNotification::reply(1, 2)] {
            let outcome = h.sync.record_live_notification("public", event).await.unwrap();
            assert_eq!(outcome, LiveOutcome::Ignored);
        }

        // Parent with loaded replies: fetch and link.
        h.sync.fetch_replies(1, false).await.unwrap();
        let outcome = h
            .sync
            .record_live_notification("public", LiveNotification::reply(11, 1))
            .await
            .unwrap();
        assert_eq!(outcome, LiveOutcome::ReplyFetched);
        let parent = h.sync.content(1).unwrap();
        assert_eq!(parent.reply_ids, vec![10, 11]);
        assert_eq!(parent.reply_count, 2);
    }

    #[tokio::test]
    async fn share_updates_through_and_count() {
        let h = setup_with(signed_in());
        h.transport.respond_json("/api/streams/public/", posts(&[5, 4, 3]));
        h.transport
            .respond_json("/api/content/5/share/", json!({"content_id": 77}));
        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();

        h.sync.apply_share_toggle("public", 5, true).await.unwrap();
        let content = h.sync.content(5).unwrap();
        assert_eq!(content.through, 77);
        assert_eq!(content.shares_count, 1);
        assert!(content.user_has_shared);
        assert_eq!(content.through_author.map(|p| p.uuid).as_deref(), Some("me"));

        let stream = h.sync.stream("public").unwrap();
        assert_eq!(stream.index(), &[5, 4, 3]);
        assert_eq!(stream.first_ids(), vec![5]);
        assert_eq!(stream.content_for_through(77), Some(5));
        assert_eq!(h.transport.requests()[1].method, crate::gateway::Method::Post);
    }

    #[tokio::test]
    async fn unshare_restores_author_edge() {
        let h = setup_with(signed_in());
        let mut shared = post(5);
        shared["shares_count"] = json!(1);
        shared["user_has_shared"] = json!(true);
        h.transport
            .respond_json("/api/streams/public/", serde_json::Value::Array(vec![shared]));
        h.transport.respond_json(
            "/api/content/5/share/",
            json!({"content_id": 5, "through_author": {"uuid": "author-5", "name": "Poster"}}),
        );
        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();

        h.sync.apply_share_toggle("public", 5, false).await.unwrap();
        let content = h.sync.content(5).unwrap();
        assert_eq!(content.through, 5);
        assert_eq!(content.shares_count, 0);
        assert!(!content.user_has_shared);
        assert_eq!(
            h.sync.profile("author-5").and_then(|p| p.name).as_deref(),
            Some("Poster")
        );
    }

    #[tokio::test]
    async fn share_failures_are_toasted_and_unknown_content_rejected() {
        let h = setup();
        h.transport.respond_json("/api/streams/public/", posts(&[5]));
        h.transport.respond(
            "/api/content/5/share/",
            RawResponse::json(400, &json!({"detail": "Cannot share own content"})),
        );
        h.sync.enter_stream("public", StreamParams::new()).await.unwrap();

        assert!(matches!(
            h.sync.apply_share_toggle("public", 6, true).await,
            Err(SyncError::UnknownContent(6))
        ));
        assert!(h.sync.apply_share_toggle("public", 5, true).await.is_err());
        let toasts = h.toasts();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].summary, "Share Error");
        assert_eq!(h.sync.content(5).unwrap().through, 5);
    }
}
