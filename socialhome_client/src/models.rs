use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type ContentId = u64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub finger: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub user_following: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    pub updating: bool,
    #[serde(skip)]
    pub followers: Option<ContactList>,
    #[serde(skip)]
    pub following: Option<ContactList>,
}

impl Profile {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.finger.as_deref())
            .unwrap_or(&self.uuid)
    }

    /// Copies server-side fields from `incoming`. Absent optional fields keep
    /// their previous value; local contact lists and the busy flag are left to
    /// the caller.
    pub(crate) fn merge_from(&mut self, incoming: Profile) {
        if incoming.name.is_some() {
            self.name = incoming.name;
        }
        if incoming.finger.is_some() {
            self.finger = incoming.finger;
        }
        if incoming.handle.is_some() {
            self.handle = incoming.handle;
        }
        if incoming.avatar_url.is_some() {
            self.avatar_url = incoming.avatar_url;
        }
        self.is_local = incoming.is_local;
        self.user_following = incoming.user_following;
        self.extra.extend(incoming.extra);
    }

    pub fn contacts(&self, kind: ContactKind) -> Option<&ContactList> {
        match kind {
            ContactKind::Followers => self.followers.as_ref(),
            ContactKind::Following => self.following.as_ref(),
        }
    }

    pub(crate) fn contacts_mut(&mut self, kind: ContactKind) -> &mut Option<ContactList> {
        match kind {
            ContactKind::Followers => &mut self.followers,
            ContactKind::Following => &mut self.following,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactList {
    pub list: Vec<String>,
    pub count: Option<u64>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactKind {
    Followers,
    Following,
}

impl ContactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactKind::Followers => "followers",
            ContactKind::Following => "following",
        }
    }

    /// Resolves `profile-followers` style view names.
    pub fn from_view_name(name: &str) -> Option<Self> {
        match name.rsplit('-').next()? {
            "followers" => Some(ContactKind::Followers),
            "following" => Some(ContactKind::Following),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: ContentId,
    pub author: Profile,
    #[serde(default)]
    pub through: ContentId,
    #[serde(default)]
    pub through_author: Option<Profile>,
    #[serde(default)]
    pub parent: Option<ContentId>,
    #[serde(default)]
    pub root_parent: Option<ContentId>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub shares_count: u32,
    #[serde(default)]
    pub user_has_shared: bool,
    #[serde(default, skip_serializing)]
    pub notify_key: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,

    // Local view state, never sent by the server.
    #[serde(skip)]
    pub reply_ids: Vec<ContentId>,
    #[serde(skip)]
    pub share_ids: Vec<ContentId>,
    #[serde(skip)]
    pub show_replies: bool,
    #[serde(skip)]
    pub active_reply_editor: bool,
}

impl Content {
    pub fn is_reply(&self) -> bool {
        self.parent.is_some()
    }

    pub fn is_share(&self) -> bool {
        self.through != self.id
    }

    pub fn text(&self) -> Option<&str> {
        self.payload
            .get("text")
            .or_else(|| self.payload.get("rendered"))
            .and_then(Value::as_str)
    }

    /// Overwrites the server fields with `incoming` while keeping the reply
    /// tree and view flags built up locally.
    pub(crate) fn merge_from(&mut self, incoming: Content) {
        self.author = incoming.author;
        self.through = incoming.through;
        self.through_author = incoming.through_author;
        self.parent = incoming.parent;
        self.root_parent = incoming.root_parent;
        self.reply_count = incoming.reply_count;
        self.shares_count = incoming.shares_count;
        self.user_has_shared = incoming.user_has_shared;
        self.payload.extend(incoming.payload);
    }

    fn normalize(&mut self) {
        if self.through == 0 {
            self.through = self.id;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamContext {
    #[serde(default)]
    pub notify_key: Option<String>,
    #[serde(default)]
    pub unfetched_content: Option<bool>,
    #[serde(default)]
    pub tag_uuid: Option<String>,
}

/// A decoded stream response: either the `{context, data}` envelope or a
/// bare list of contents. Single objects are normalized to one-element lists.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPayload {
    Enveloped {
        context: StreamContext,
        data: Vec<Content>,
    },
    Bare {
        items: Vec<Content>,
        notify_key: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Content>),
    One(Box<Content>),
}

impl OneOrMany {
    /// Returns the items and, for a single object, its own notify key.
    fn into_items(self) -> (Vec<Content>, Option<String>) {
        match self {
            OneOrMany::Many(items) => (items, None),
            OneOrMany::One(mut item) => {
                let key = item.notify_key.take();
                (vec![*item], key)
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WirePayload {
    Enveloped {
        context: StreamContext,
        data: OneOrMany,
    },
    Items(OneOrMany),
}

impl StreamPayload {
    pub fn decode(value: Value) -> Result<Self, serde_json::Error> {
        let mut payload = match serde_json::from_value::<WirePayload>(value)? {
            WirePayload::Enveloped { mut context, data } => {
                let (data, item_key) = data.into_items();
                if item_key.is_some() {
                    context.notify_key = item_key;
                }
                StreamPayload::Enveloped { context, data }
            }
            WirePayload::Items(items) => {
                let (items, notify_key) = items.into_items();
                StreamPayload::Bare { items, notify_key }
            }
        };
        for item in payload.items_mut() {
            item.notify_key = None;
            item.normalize();
        }
        Ok(payload)
    }

    pub fn from_items(items: Vec<Content>) -> Self {
        StreamPayload::Bare {
            items,
            notify_key: None,
        }
    }

    /// Subscription key with the first `_` turned into the channel separator.
    pub fn notify_key(&self) -> Option<String> {
        let raw = match self {
            StreamPayload::Enveloped { context, .. } => context.notify_key.as_deref(),
            StreamPayload::Bare { notify_key, .. } => notify_key.as_deref(),
        };
        raw.map(|key| key.replacen('_', "/", 1))
    }

    pub fn unfetched_content(&self) -> bool {
        match self {
            StreamPayload::Enveloped { context, .. } => context.unfetched_content.unwrap_or(false),
            StreamPayload::Bare { .. } => false,
        }
    }

    pub fn context(&self) -> Option<&StreamContext> {
        match self {
            StreamPayload::Enveloped { context, .. } => Some(context),
            StreamPayload::Bare { .. } => None,
        }
    }

    pub fn items(&self) -> &[Content] {
        match self {
            StreamPayload::Enveloped { data, .. } => data,
            StreamPayload::Bare { items, .. } => items,
        }
    }

    fn items_mut(&mut self) -> &mut Vec<Content> {
        match self {
            StreamPayload::Enveloped { data, .. } => data,
            StreamPayload::Bare { items, .. } => items,
        }
    }

    pub fn into_items(self) -> Vec<Content> {
        match self {
            StreamPayload::Enveloped { data, .. } => data,
            StreamPayload::Bare { items, .. } => items,
        }
    }
}

/// Response of the `unfetched_count` probe. A `null` count means the server
/// could not tell and a full fetch is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct UnfetchedCount {
    #[serde(default)]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShareResponse {
    pub content_id: ContentId,
    #[serde(default)]
    pub through_author: Option<Profile>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContactsPage {
    #[serde(default)]
    pub results: Vec<Profile>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
}

/// A push event announcing new or edited content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LiveNotification {
    pub id: ContentId,
    #[serde(default, rename = "parentId", alias = "parent_id")]
    pub parent_id: Option<ContentId>,
}

impl LiveNotification {
    pub fn top_level(id: ContentId) -> Self {
        Self {
            id,
            parent_id: None,
        }
    }

    pub fn reply(id: ContentId, parent_id: ContentId) -> Self {
        Self {
            id,
            parent_id: Some(parent_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn post(id: u64) -> Value {
        json!({"id": id, "through": id, "author": {"uuid": "a1"}, "text": format!("post {id}")})
    }

    #[test]
    fn decodes_bare_list() {
        let payload = StreamPayload::decode(json!([post(5), post(4)])).expect("decode");
        let ids: Vec<_> = payload.items().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![5, 4]);
        assert_eq!(payload.notify_key(), None);
        assert!(!payload.unfetched_content());
    }

    #[test]
    fn single_object_becomes_one_item_and_keeps_notify_key() {
        let mut item = post(7);
        item["notify_key"] = json!("content_7");
        let payload = StreamPayload::decode(item).expect("decode");
        assert_eq!(payload.items().len(), 1);
        assert_eq!(payload.notify_key().as_deref(), Some("content/7"));
        assert_eq!(payload.items()[0].notify_key, None);
        assert_eq!(payload.items()[0].text(), Some("post 7"));
    }

    #[test]
    fn decodes_envelope_context() {
        let payload = StreamPayload::decode(json!({
            "context": {"notify_key": "streams_tag__1", "unfetched_content": true, "tag_uuid": "t-1"},
            "data": [post(3)]
        }))
        .expect("decode");
        assert_eq!(payload.notify_key().as_deref(), Some("streams/tag__1"));
        assert!(payload.unfetched_content());
        assert_eq!(payload.context().and_then(|c| c.tag_uuid.as_deref()), Some("t-1"));
        assert_eq!(payload.into_items().len(), 1);
    }

    #[test]
    fn missing_through_defaults_to_id() {
        let payload =
            StreamPayload::decode(json!({"id": 9, "author": {"uuid": "a1"}})).expect("decode");
        assert_eq!(payload.items()[0].through, 9);
        assert!(!payload.items()[0].is_share());
    }

    #[test]
    fn merge_keeps_local_reply_state() {
        let mut cached: Content =
            serde_json::from_value(json!({"id": 1, "through": 1, "author": {"uuid": "a"}, "reply_count": 1}))
                .expect("content");
        cached.reply_ids.push(2);
        cached.show_replies = true;
        let incoming: Content = serde_json::from_value(
            json!({"id": 1, "through": 8, "author": {"uuid": "a"}, "reply_count": 1, "text": "edited"}),
        )
        .expect("content");
        cached.merge_from(incoming);
        assert_eq!(cached.through, 8);
        assert_eq!(cached.reply_ids, vec![2]);
        assert!(cached.show_replies);
        assert_eq!(cached.text(), Some("edited"));
    }

    #[test]
    fn contact_kind_from_view_name() {
        assert_eq!(ContactKind::from_view_name("profile-followers"), Some(ContactKind::Followers));
        assert_eq!(ContactKind::from_view_name("following"), Some(ContactKind::Following));
        assert_eq!(ContactKind::from_view_name("profile-all"), None);
    }

    #[test]
    fn live_notification_accepts_camel_case_parent() {
        let event: LiveNotification =
            serde_json::from_value(json!({"id": 4, "parentId": 2})).expect("event");
        assert_eq!(event, LiveNotification::reply(4, 2));
    }
}
