use std::collections::HashMap;

use crate::models::{Content, ContentId, StreamPayload};
use crate::profiles::ProfileRegistrar;
use crate::streams::{Direction, Origin, Stream};

/// What a merge changed in the target stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Ids spliced into the index, newest first.
    pub new_ids: Vec<ContentId>,
    /// Items that were already cached and got their server fields refreshed.
    pub updated: usize,
}

/// Every content record known to the client, keyed by id.
#[derive(Debug, Default)]
pub struct ContentCache {
    contents: HashMap<ContentId, Content>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ContentId) -> Option<&Content> {
        self.contents.get(&id)
    }

    pub fn get_mut(&mut self, id: ContentId) -> Option<&mut Content> {
        self.contents.get_mut(&id)
    }

    pub fn contains(&self, id: ContentId) -> bool {
        self.contents.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Inserts a new record or refreshes an existing one. Returns `true`
    /// when the record was already cached.
    pub fn upsert(&mut self, item: Content, profiles: &mut dyn ProfileRegistrar) -> bool {
        match self.contents.get_mut(&item.id) {
            Some(existing) => {
                let through_changed = existing.through != item.through;
                if through_changed && item.through != item.id {
                    if let Some(through_author) = &item.through_author {
                        profiles.register_profile(through_author);
                    }
                }
                existing.merge_from(item);
                true
            }
            None => {
                profiles.register_profile(&item.author);
                if item.through != item.id {
                    if let Some(through_author) = &item.through_author {
                        profiles.register_profile(through_author);
                    }
                }
                self.contents.insert(item.id, item);
                false
            }
        }
    }

    /// Merges a stream response into `stream` and the cache.
    pub fn merge_into_stream(
        &mut self,
        stream: &mut Stream,
        payload: StreamPayload,
        direction: Direction,
        origin: Origin,
        profiles: &mut dyn ProfileRegistrar,
    ) -> MergeOutcome {
        if let Some(key) = payload.notify_key() {
            stream.notify_key = Some(key);
        }
        if let Some(tag_uuid) = payload.context().and_then(|context| context.tag_uuid.clone()) {
            stream.tag_uuid = Some(tag_uuid);
        }
        let unfetched_content = payload.unfetched_content();
        let items = payload.into_items();
        if direction == Direction::Older && items.is_empty() {
            tracing::debug!(stream = %stream.name, "no older content");
            stream.no_more_data = true;
        }

        let mut outcome = MergeOutcome::default();
        for item in items {
            let (id, through) = (item.id, item.through);
            if self.upsert(item, profiles) {
                outcome.updated += 1;
            }
            if !stream.contains(id) && !outcome.new_ids.contains(&id) {
                outcome.new_ids.push(id);
            }
            stream.record_through(through, id);
        }
        stream.insert_new_ids(&outcome.new_ids, direction, unfetched_content, origin);
        tracing::debug!(
            stream = %stream.name,
            new = outcome.new_ids.len(),
            updated = outcome.updated,
            ?direction,
            "merged stream payload"
        );
        outcome
    }

    /// Stores replies and links each one into its parent's reply list.
    /// Returns the ids that were newly linked.
    pub fn merge_replies(
        &mut self,
        items: Vec<Content>,
        profiles: &mut dyn ProfileRegistrar,
    ) -> Vec<ContentId> {
        let links: Vec<(ContentId, Option<ContentId>)> =
            items.iter().map(|item| (item.id, item.parent)).collect();
        for item in items {
            self.upsert(item, profiles);
        }

        let mut linked = Vec::new();
        for (id, parent) in links {
            let Some(parent) = parent.and_then(|parent| self.contents.get_mut(&parent)) else {
                continue;
            };
            if !parent.reply_ids.contains(&id) {
                parent.reply_ids.push(id);
                linked.push(id);
            }
            parent.reply_count = u32::try_from(parent.reply_ids.len()).unwrap_or(u32::MAX);
        }
        linked
    }

    /// Flips the replies pane. Returns whether replies must be fetched, or
    /// `None` for an unknown id. Collapsing also collapses direct replies.
    pub fn toggle_replies(&mut self, id: ContentId) -> Option<bool> {
        let content = self.contents.get_mut(&id)?;
        content.show_replies = !content.show_replies;
        if content.show_replies {
            return Some(content.reply_ids.len() != content.reply_count as usize);
        }
        let children = content.reply_ids.clone();
        for child in children {
            if let Some(reply) = self.contents.get_mut(&child) {
                reply.show_replies = false;
            }
        }
        Some(false)
    }

    pub fn toggle_reply_editor(&mut self, id: ContentId) -> Option<bool> {
        let content = self.contents.get_mut(&id)?;
        content.active_reply_editor = !content.active_reply_editor;
        Some(content.active_reply_editor)
    }

    /// Removes `id` and all of its descendant replies, detaching it from its
    /// parent. Returns the number of removed records.
    pub fn remove_cascade(&mut self, id: ContentId) -> usize {
        let Some(root) = self.contents.remove(&id) else {
            return 0;
        };
        if let Some(parent) = root.parent.and_then(|parent| self.contents.get_mut(&parent)) {
            if let Some(pos) = parent.reply_ids.iter().position(|reply| *reply == id) {
                parent.reply_ids.remove(pos);
            }
            parent.reply_count = parent.reply_count.saturating_sub(1);
        }

        let mut removed = 1;
        let mut pending = root.reply_ids;
        while let Some(reply_id) = pending.pop() {
            if let Some(reply) = self.contents.remove(&reply_id) {
                removed += 1;
                pending.extend(reply.reply_ids);
            }
        }
        removed
    }

    /// Ids of `id` and every cached descendant, parent first.
    pub fn descendants(&self, id: ContentId) -> Vec<ContentId> {
        let mut ids = Vec::new();
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(content) = self.contents.get(&next) {
                ids.push(next);
                pending.extend(content.reply_ids.iter().rev());
            }
        }
        ids
    }
}
