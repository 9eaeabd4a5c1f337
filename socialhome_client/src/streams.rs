//! Named streams, their cursors and the registry that owns them.

use std::collections::{BTreeMap, HashMap};

use crate::error::SyncError;
use crate::models::ContentId;

pub type StreamParams = BTreeMap<String, String>;

/// Name of the reserved single-content pseudo-stream.
pub const CONTENT_STREAM: &str = "content";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamKind {
    #[default]
    Timeline,
    SingleContent,
    /// Follower/following views; entering them never fetches content.
    Contacts,
}

/// Declarative stream description supplied by the routing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDefinition {
    pub name: String,
    /// Endpoint template below `/api/`, with `{param}` placeholders.
    pub endpoint: String,
    pub pinned: bool,
    pub auth_required: bool,
    pub kind: StreamKind,
    pub title: Option<String>,
}

impl StreamDefinition {
    pub fn pinned(name: &str, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            pinned: true,
            auth_required: false,
            kind: StreamKind::Timeline,
            title: None,
        }
    }

    pub fn unpinned(name: &str, endpoint: &str) -> Self {
        Self {
            pinned: false,
            ..Self::pinned(name, endpoint)
        }
    }

    pub fn requires_auth(mut self, auth_required: bool) -> Self {
        self.auth_required = auth_required;
        self
    }

    pub fn kind(mut self, kind: StreamKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }
}

/// The socialhome route table.
pub fn default_definitions() -> Vec<StreamDefinition> {
    vec![
        StreamDefinition::pinned("followed", "streams/followed")
            .requires_auth(true)
            .title("Posts from people you follow"),
        StreamDefinition::pinned("limited", "streams/limited")
            .requires_auth(true)
            .title("Posts from chosen friends"),
        StreamDefinition::pinned("local", "streams/local").title("Posts from local users"),
        StreamDefinition::pinned("public", "streams/public")
            .title("Posts from all over the Fediverse"),
        StreamDefinition::pinned("tags", "streams/tags")
            .requires_auth(true)
            .title("Posts from tags you follow"),
        StreamDefinition::unpinned("tag", "streams/tag/{tag_name}")
            .title("Posts tagged with #{tag_name}"),
        StreamDefinition::unpinned(CONTENT_STREAM, "content/{id}").kind(StreamKind::SingleContent),
        StreamDefinition::unpinned("profile-all", "streams/profile-all/{uuid}"),
        StreamDefinition::unpinned("profile-pinned", "streams/profile-pinned/{uuid}"),
        StreamDefinition::unpinned("profile-followers", "profiles/followers")
            .kind(StreamKind::Contacts),
        StreamDefinition::unpinned("profile-following", "profiles/following")
            .kind(StreamKind::Contacts),
    ]
}

fn render_template(template: &str, params: &StreamParams) -> String {
    params.iter().fold(template.to_string(), |rendered, (key, value)| {
        rendered.replace(&format!("{{{key}}}"), value)
    })
}

/// Text before the first `-`: `profile-all` and `profile-pinned` share a base.
fn base_name(name: &str) -> &str {
    name.split_once('-').map_or(name, |(base, _)| base)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Prepend: initial loads, catch-up fetches, local updates.
    Newer,
    /// Append after the oldest loaded item of the newest segment.
    Older,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Fetched,
    /// Produced locally from a mutation response; never moves cursors.
    Local,
}

/// A contiguous run of the index that was fetched in one piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub first: ContentId,
    pub last: ContentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Empty,
    Loading,
    Loaded,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub name: String,
    pub endpoint: String,
    pub params: StreamParams,
    pub kind: StreamKind,
    pub pinned: bool,
    pub title: Option<String>,
    pub notify_key: Option<String>,
    pub tag_uuid: Option<String>,
    pub no_more_data: bool,
    pub is_active: bool,
    pub auth_required: bool,
    index: Vec<ContentId>,
    segments: Vec<Segment>,
    cached_throughs: HashMap<ContentId, ContentId>,
    unfetched: Vec<ContentId>,
    unfetched_count: usize,
    generation: u64,
    pub(crate) loading: bool,
}

impl Stream {
    pub fn from_definition(definition: &StreamDefinition, params: StreamParams) -> Self {
        Self {
            name: definition.name.clone(),
            endpoint: render_template(&definition.endpoint, &params),
            title: definition
                .title
                .as_deref()
                .map(|title| render_template(title, &params)),
            params,
            kind: definition.kind,
            pinned: definition.pinned,
            notify_key: None,
            tag_uuid: None,
            no_more_data: false,
            is_active: definition.pinned,
            auth_required: definition.auth_required,
            index: Vec::new(),
            segments: Vec::new(),
            cached_throughs: HashMap::new(),
            unfetched: Vec::new(),
            unfetched_count: 0,
            generation: 0,
            loading: false,
        }
    }

    /// Changes whenever the registry replaces or resets this stream. A
    /// response is merged only if the generation it was requested under is
    /// still current.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Content ids, newest first.
    pub fn index(&self) -> &[ContentId] {
        &self.index
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn first_ids(&self) -> Vec<ContentId> {
        self.segments.iter().map(|segment| segment.first).collect()
    }

    pub fn last_ids(&self) -> Vec<ContentId> {
        self.segments.iter().map(|segment| segment.last).collect()
    }

    /// Newest loaded id, the `first_id` of forward fetches.
    pub fn newest_cursor(&self) -> Option<ContentId> {
        self.segments.first().map(|segment| segment.first)
    }

    /// Oldest id of the newest segment, the `last_id` of backward fetches.
    pub fn oldest_cursor(&self) -> Option<ContentId> {
        self.segments.first().map(|segment| segment.last)
    }

    /// Newest id of the second segment: where a backward fetch should stop.
    pub fn gap_cursor(&self) -> Option<ContentId> {
        self.segments.get(1).map(|segment| segment.first)
    }

    pub fn contains(&self, id: ContentId) -> bool {
        self.index.contains(&id)
    }

    /// True for content ids in the index and for share edges seen in it.
    pub fn is_loaded(&self, id: ContentId) -> bool {
        self.contains(id) || self.cached_throughs.contains_key(&id)
    }

    pub fn content_for_through(&self, through: ContentId) -> Option<ContentId> {
        self.cached_throughs.get(&through).copied()
    }

    pub(crate) fn record_through(&mut self, through: ContentId, id: ContentId) {
        self.cached_throughs.insert(through, id);
    }

    pub fn unfetched(&self) -> &[ContentId] {
        &self.unfetched
    }

    /// Size of the backlog: pushed ids or the last probed count, whichever
    /// is larger.
    pub fn pending_count(&self) -> usize {
        self.unfetched.len().max(self.unfetched_count)
    }

    /// Adds a pushed id to the front of the backlog, keeping at most `cap`.
    pub(crate) fn push_unfetched(&mut self, id: ContentId, cap: usize) -> bool {
        if self.unfetched.contains(&id) {
            return false;
        }
        self.unfetched.insert(0, id);
        self.unfetched.truncate(cap.max(1));
        true
    }

    pub(crate) fn set_unfetched_count(&mut self, count: usize) {
        self.unfetched.truncate(count);
        self.unfetched_count = count;
    }

    pub(crate) fn clear_backlog(&mut self) {
        self.unfetched.clear();
        self.unfetched_count = 0;
    }

    pub fn status(&self) -> StreamStatus {
        if self.loading {
            StreamStatus::Loading
        } else if self.no_more_data {
            StreamStatus::Exhausted
        } else if self.index.is_empty() {
            StreamStatus::Empty
        } else {
            StreamStatus::Loaded
        }
    }

    pub fn reset(&mut self) {
        self.index.clear();
        self.segments.clear();
        self.clear_backlog();
        self.no_more_data = false;
    }

    /// Splices ids that are not yet in the index and maintains the segment
    /// cursors.
    pub(crate) fn insert_new_ids(
        &mut self,
        new_ids: &[ContentId],
        direction: Direction,
        unfetched_content: bool,
        origin: Origin,
    ) {
        let (Some(&new_first), Some(&new_last)) = (new_ids.first(), new_ids.last()) else {
            return;
        };
        let at = match direction {
            Direction::Newer => 0,
            Direction::Older => self
                .oldest_cursor()
                .and_then(|cursor| self.index.iter().position(|id| *id == cursor))
                .map_or(self.index.len(), |pos| pos + 1),
        };
        self.index.splice(at..at, new_ids.iter().copied());

        let opened = Segment {
            first: new_first,
            last: new_last,
        };
        if self.segments.is_empty() {
            self.segments.push(opened);
            return;
        }
        match direction {
            Direction::Newer => {
                if unfetched_content {
                    self.segments.insert(0, opened);
                }
                if origin == Origin::Fetched {
                    self.segments[0].first = new_first;
                }
            }
            Direction::Older => {
                if !unfetched_content && self.segments.len() >= 2 {
                    // The gap between the two newest segments is now filled.
                    let newest = self.segments.remove(0);
                    self.segments[0].first = newest.first;
                } else {
                    self.segments[0].last = new_last;
                }
            }
        }
        tracing::debug!(
            stream = %self.name,
            first_ids = ?self.first_ids(),
            last_ids = ?self.last_ids(),
            "cursors updated"
        );
    }

    /// Drops `id` from the index, moving any cursor that pointed at it to
    /// its neighbour inside the same segment.
    pub(crate) fn remove_id(&mut self, id: ContentId) -> bool {
        let Some(pos) = self.index.iter().position(|candidate| *candidate == id) else {
            return false;
        };
        let newer = pos.checked_sub(1).and_then(|p| self.index.get(p)).copied();
        let older = self.index.get(pos + 1).copied();
        self.segments.retain_mut(|segment| {
            if segment.first == id && segment.last == id {
                return false;
            }
            if segment.first == id {
                match older {
                    Some(older) => segment.first = older,
                    None => return false,
                }
            } else if segment.last == id {
                match newer {
                    Some(newer) => segment.last = newer,
                    None => return false,
                }
            }
            true
        });
        self.index.remove(pos);
        self.cached_throughs.retain(|_, content_id| *content_id != id);
        true
    }
}

/// Result of resolving a stream for navigation. Holds the snapshot needed
/// to undo the switch if the first fetch fails.
#[derive(Debug)]
pub struct StreamTransition {
    name: String,
    pinned: bool,
    generation: u64,
    /// Set only when `get_or_create` replaced the entity.
    previous: Option<Stream>,
    replaced: bool,
}

impl StreamTransition {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Default)]
pub struct StreamRegistry {
    definitions: HashMap<String, StreamDefinition>,
    streams: HashMap<String, Stream>,
    active_unpinned: Option<String>,
    generations: u64,
}

impl StreamRegistry {
    /// Creates every pinned stream plus the reserved `content` stream.
    pub fn initialize(definitions: impl IntoIterator<Item = StreamDefinition>) -> Self {
        let mut registry = Self::default();
        for definition in definitions {
            registry
                .definitions
                .insert(definition.name.clone(), definition);
        }
        registry
            .definitions
            .entry(CONTENT_STREAM.to_string())
            .or_insert_with(|| {
                StreamDefinition::unpinned(CONTENT_STREAM, "content/{id}")
                    .kind(StreamKind::SingleContent)
            });
        for definition in registry.definitions.values() {
            if definition.pinned || definition.name == CONTENT_STREAM {
                registry.generations += 1;
                let mut stream = Stream::from_definition(definition, StreamParams::new());
                stream.generation = registry.generations;
                registry.streams.insert(definition.name.clone(), stream);
            }
        }
        registry
    }

    pub fn definition(&self, name: &str) -> Option<&StreamDefinition> {
        self.definitions.get(name)
    }

    pub fn get(&self, name: &str) -> Option<&Stream> {
        self.streams.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Stream> {
        self.streams.get_mut(name)
    }

    pub fn streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.values()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.streams.keys().cloned().collect();
        names.sort();
        names
    }

    /// Name of the most recently entered non-pinned stream.
    pub fn active_unpinned(&self) -> Option<&str> {
        self.active_unpinned.as_deref()
    }

    /// Resolves `name` for navigation. Pinned streams are reused; a
    /// non-pinned stream is reused only when re-entered with equal params
    /// from the same family of views, otherwise it starts over.
    pub fn get_or_create(
        &mut self,
        name: &str,
        params: StreamParams,
        force_reset: bool,
    ) -> Result<StreamTransition, SyncError> {
        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| SyncError::UnknownStream(name.to_string()))?;

        if definition.pinned {
            let stream = self
                .streams
                .entry(name.to_string())
                .or_insert_with(|| Stream::from_definition(definition, StreamParams::new()));
            if force_reset {
                self.generations += 1;
                stream.reset();
                stream.generation = self.generations;
            }
            return Ok(StreamTransition {
                name: name.to_string(),
                pinned: true,
                generation: stream.generation,
                previous: None,
                replaced: false,
            });
        }

        let same_family = self
            .active_unpinned
            .as_deref()
            .is_some_and(|active| base_name(active) == base_name(name));
        let reusable = self.streams.get(name).filter(|stream| {
            !force_reset && same_family && stream.params == params
        });
        if let Some(stream) = reusable {
            return Ok(StreamTransition {
                name: name.to_string(),
                pinned: false,
                generation: stream.generation,
                previous: None,
                replaced: false,
            });
        }

        tracing::debug!(stream = name, ?params, "initializing stream");
        self.generations += 1;
        let mut stream = Stream::from_definition(definition, params);
        stream.generation = self.generations;
        let previous = self.streams.insert(name.to_string(), stream);
        Ok(StreamTransition {
            name: name.to_string(),
            pinned: false,
            generation: self.generations,
            previous,
            replaced: true,
        })
    }

    /// Whether `name` is still the entity `generation` was taken from.
    pub fn is_current(&self, name: &str, generation: u64) -> bool {
        self.streams
            .get(name)
            .is_some_and(|stream| stream.generation == generation)
    }

    /// Makes a non-pinned stream the active one. Returns false when the
    /// stream was replaced or reset while the transition was in flight.
    pub fn commit(&mut self, transition: StreamTransition) -> bool {
        if !self.is_current(&transition.name, transition.generation) {
            return false;
        }
        if transition.pinned {
            return true;
        }
        let name = transition.name;
        if let Some(stream) = self.streams.get_mut(&name) {
            stream.is_active = true;
        }
        if let Some(previous) = self.active_unpinned.take() {
            if previous != name {
                if let Some(stream) = self.streams.get_mut(&previous) {
                    stream.is_active = false;
                }
            }
        }
        self.active_unpinned = Some(name);
        true
    }

    /// Puts back the entity `get_or_create` replaced. An access denial seen
    /// during the failed attempt is kept so the UI can prompt a login. A
    /// reused stream keeps what was merged meanwhile, and a stream that was
    /// replaced or reset since is left alone.
    pub fn rollback(&mut self, transition: StreamTransition) {
        if transition.pinned || !self.is_current(&transition.name, transition.generation) {
            return;
        }
        if !transition.replaced {
            if let Some(stream) = self.streams.get_mut(&transition.name) {
                stream.loading = false;
            }
            return;
        }
        let denied = self
            .streams
            .get(&transition.name)
            .is_some_and(|stream| stream.auth_required);
        match transition.previous {
            Some(mut previous) => {
                previous.auth_required |= denied;
                previous.loading = false;
                self.streams.insert(transition.name, previous);
            }
            None => {
                if let Some(stream) = self.streams.get_mut(&transition.name) {
                    stream.is_active = false;
                    stream.loading = false;
                }
            }
        }
    }

    /// Clears one stream, or all of them when `name` is `None`. Responses
    /// still in flight for a cleared stream are discarded.
    pub fn reset(&mut self, name: Option<&str>) {
        let targets: Vec<&mut Stream> = match name {
            Some(name) => self.streams.get_mut(name).into_iter().collect(),
            None => self.streams.values_mut().collect(),
        };
        for stream in targets {
            self.generations += 1;
            stream.reset();
            stream.generation = self.generations;
        }
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.streams.get(name).is_some_and(|stream| stream.is_active)
    }

    pub fn is_available(&self, name: &str, authenticated: bool) -> bool {
        self.streams
            .get(name)
            .is_some_and(|stream| stream.is_active && (authenticated || !stream.auth_required))
    }

    pub fn has_content(&self, name: &str) -> bool {
        self.streams
            .get(name)
            .is_some_and(|stream| !stream.index.is_empty())
    }

    /// Name and params needed to navigate back to a cached stream.
    pub fn stream_route(&self, name: &str) -> Option<(String, StreamParams)> {
        self.streams
            .get(name)
            .map(|stream| (stream.name.clone(), stream.params.clone()))
    }

    /// Removes `id` from every stream; returns how many streams held it.
    pub fn remove_from_all(&mut self, id: ContentId) -> usize {
        self.streams
            .values_mut()
            .filter_map(|stream| stream.remove_id(id).then_some(()))
            .count()
    }
}
