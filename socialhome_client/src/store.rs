use crate::contents::{ContentCache, MergeOutcome};
use crate::error::SyncError;
use crate::models::{ContentId, StreamPayload};
use crate::profiles::ProfileCache;
use crate::streams::{Direction, Origin, StreamDefinition, StreamRegistry};

/// All client-side state. Lives behind one mutex in the synchronizer and is
/// only touched by synchronous steps.
#[derive(Debug, Default)]
pub struct Store {
    pub streams: StreamRegistry,
    pub contents: ContentCache,
    pub profiles: ProfileCache,
    /// Last stream entered successfully; routing state only.
    pub current_stream: Option<String>,
}

impl Store {
    pub fn new(definitions: impl IntoIterator<Item = StreamDefinition>) -> Self {
        Self {
            streams: StreamRegistry::initialize(definitions),
            contents: ContentCache::new(),
            profiles: ProfileCache::new(),
            current_stream: None,
        }
    }

    pub fn merge_stream_payload(
        &mut self,
        name: &str,
        payload: StreamPayload,
        direction: Direction,
        origin: Origin,
    ) -> Result<MergeOutcome, SyncError> {
        let stream = self
            .streams
            .get_mut(name)
            .ok_or_else(|| SyncError::UnknownStream(name.to_string()))?;
        Ok(self
            .contents
            .merge_into_stream(stream, payload, direction, origin, &mut self.profiles))
    }

    /// Deletes `id` and its replies from the cache and from every stream.
    pub fn remove_content(&mut self, id: ContentId) -> usize {
        let doomed = self.contents.descendants(id);
        for doomed_id in &doomed {
            self.streams.remove_from_all(*doomed_id);
        }
        let removed = self.contents.remove_cascade(id);
        tracing::debug!(id, removed, "removed content");
        removed
    }

    /// Every id referenced by a stream index has a cache record.
    pub fn is_consistent(&self) -> bool {
        self.streams
            .streams()
            .all(|stream| stream.index().iter().all(|id| self.contents.contains(*id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Content, Profile};
    use crate::streams::{default_definitions, StreamParams};
    use pretty_assertions::assert_eq;

    fn post(id: ContentId, parent: Option<ContentId>) -> Content {
        Content {
            id,
            through: id,
            parent,
            author: Profile {
                uuid: "a".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn items(ids: &[ContentId]) -> StreamPayload {
        StreamPayload::from_items(ids.iter().map(|id| post(*id, None)).collect())
    }

    #[test]
    fn merge_targets_named_stream_only() {
        let mut store = Store::new(default_definitions());
        store
            .merge_stream_payload("local", items(&[3, 2]), Direction::Newer, Origin::Fetched)
            .unwrap();
        assert_eq!(store.streams.get("local").unwrap().index(), &[3, 2]);
        assert!(store.streams.get("public").unwrap().index().is_empty());
        assert!(matches!(
            store.merge_stream_payload("nope", items(&[1]), Direction::Newer, Origin::Fetched),
            Err(SyncError::UnknownStream(_))
        ));
    }

    #[test]
    fn deletion_reaches_every_stream_and_reply() {
        let mut store = Store::new(default_definitions());
        for name in ["public", "local"] {
            store
                .merge_stream_payload(name, items(&[5, 4, 3]), Direction::Newer, Origin::Fetched)
                .unwrap();
        }
        let transition = store
            .streams
            .get_or_create("tag", StreamParams::from([("tag_name".into(), "x".into())]), false)
            .unwrap();
        store.streams.commit(transition);
        store
            .merge_stream_payload("tag", items(&[4]), Direction::Newer, Origin::Fetched)
            .unwrap();
        store.contents.merge_replies(
            vec![post(10, Some(4)), post(11, Some(10)), post(12, Some(4))],
            &mut store.profiles,
        );
        let before = store.contents.len();

        assert_eq!(store.remove_content(4), 4);
        assert_eq!(store.contents.len(), before - 4);
        for name in ["public", "local"] {
            let stream = store.streams.get(name).unwrap();
            assert_eq!(stream.index(), &[5, 3]);
            assert_eq!(stream.first_ids(), vec![5]);
            assert_eq!(stream.last_ids(), vec![3]);
        }
        let tag = store.streams.get("tag").unwrap();
        assert!(tag.index().is_empty());
        assert!(tag.segments().is_empty());
        assert!(store.is_consistent());
    }
}
