use std::collections::HashMap;

use crate::models::{ContactKind, ContactList, ContactsPage, Profile};

/// Capability handed to the content cache so it can record authors without
/// reaching into the profile store.
pub trait ProfileRegistrar {
    fn register_profile(&mut self, profile: &Profile);
}

/// Where the next contacts request should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactsCursor {
    FirstPage,
    Next(String),
    Complete,
}

#[derive(Debug, Default)]
pub struct ProfileCache {
    profiles: HashMap<String, Profile>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or merges `profile` and returns its uuid. Re-registering a
    /// profile clears its busy flag and drops cached contact lists.
    pub fn set_profile(&mut self, mut profile: Profile) -> String {
        let uuid = profile.uuid.clone();
        match self.profiles.get_mut(&uuid) {
            Some(existing) => {
                existing.merge_from(profile);
                existing.updating = false;
                existing.followers = None;
                existing.following = None;
            }
            None => {
                profile.updating = false;
                self.profiles.insert(uuid.clone(), profile);
            }
        }
        uuid
    }

    pub fn get(&self, uuid: &str) -> Option<&Profile> {
        self.profiles.get(uuid)
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.profiles.contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Claims the per-profile update slot. `None` for unknown profiles,
    /// `Some(false)` when a request is already in flight.
    pub fn try_begin_update(&mut self, uuid: &str) -> Option<bool> {
        let profile = self.profiles.get_mut(uuid)?;
        if profile.updating {
            return Some(false);
        }
        profile.updating = true;
        Some(true)
    }

    pub fn set_following(&mut self, uuid: &str, following: bool) -> bool {
        match self.profiles.get_mut(uuid) {
            Some(profile) => {
                profile.user_following = following;
                true
            }
            None => false,
        }
    }

    pub fn contacts_cursor(&self, uuid: &str, kind: ContactKind) -> Option<ContactsCursor> {
        let profile = self.profiles.get(uuid)?;
        let cursor = match profile.contacts(kind) {
            Some(ContactList { next: Some(next), .. }) => ContactsCursor::Next(next.clone()),
            Some(contacts) if !contacts.list.is_empty() => ContactsCursor::Complete,
            _ => ContactsCursor::FirstPage,
        };
        Some(cursor)
    }

    /// Registers every profile on the page, then appends their uuids to the
    /// owner's contact list.
    pub fn apply_contacts_page(&mut self, owner: &str, kind: ContactKind, page: ContactsPage) -> bool {
        if !self.profiles.contains_key(owner) {
            return false;
        }
        let mut contacts = self
            .profiles
            .get(owner)
            .and_then(|profile| profile.contacts(kind).cloned())
            .unwrap_or_default();
        for profile in page.results {
            contacts.list.push(self.set_profile(profile));
        }
        contacts.count = page.count;
        contacts.next = page.next;
        match self.profiles.get_mut(owner) {
            Some(profile) => {
                *profile.contacts_mut(kind) = Some(contacts);
                true
            }
            None => false,
        }
    }
}

impl ProfileRegistrar for ProfileCache {
    fn register_profile(&mut self, profile: &Profile) {
        self.set_profile(profile.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn profile(uuid: &str, name: &str) -> Profile {
        Profile {
            uuid: uuid.into(),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    #[test]
    fn merges_partial_updates() {
        let mut cache = ProfileCache::new();
        let mut first = profile("p1", "Ada");
        first.avatar_url = Some("/a.png".into());
        cache.set_profile(first);

        let mut update = Profile {
            uuid: "p1".into(),
            user_following: true,
            ..Default::default()
        };
        update.finger = Some("ada@example.org".into());
        cache.set_profile(update);

        let merged = cache.get("p1").unwrap();
        assert_eq!(merged.name.as_deref(), Some("Ada"));
        assert_eq!(merged.avatar_url.as_deref(), Some("/a.png"));
        assert_eq!(merged.finger.as_deref(), Some("ada@example.org"));
        assert!(merged.user_following);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn update_guard_blocks_second_request_until_reregistered() {
        let mut cache = ProfileCache::new();
        cache.set_profile(profile("p1", "Ada"));
        assert_eq!(cache.try_begin_update("p1"), Some(true));
        assert_eq!(cache.try_begin_update("p1"), Some(false));
        assert_eq!(cache.try_begin_update("missing"), None);

        cache.set_profile(profile("p1", "Ada L."));
        assert_eq!(cache.try_begin_update("p1"), Some(true));
    }

    #[test]
    fn contacts_paginate_then_complete() {
        let mut cache = ProfileCache::new();
        cache.set_profile(profile("me", "Me"));
        assert_eq!(
            cache.contacts_cursor("me", ContactKind::Followers),
            Some(ContactsCursor::FirstPage)
        );

        cache.apply_contacts_page(
            "me",
            ContactKind::Followers,
            ContactsPage {
                results: vec![profile("f1", "One"), profile("f2", "Two")],
                count: Some(3),
                next: Some("https://example.org/api/profiles/followers/?page=2".into()),
            },
        );
        assert_eq!(
            cache.contacts_cursor("me", ContactKind::Followers),
            Some(ContactsCursor::Next(
                "https://example.org/api/profiles/followers/?page=2".into()
            ))
        );

        cache.apply_contacts_page(
            "me",
            ContactKind::Followers,
            ContactsPage {
                results: vec![profile("f3", "Three")],
                count: Some(3),
                next: None,
            },
        );
        let followers = cache.get("me").unwrap().contacts(ContactKind::Followers).unwrap();
        assert_eq!(followers.list, vec!["f1", "f2", "f3"]);
        assert_eq!(followers.count, Some(3));
        assert_eq!(
            cache.contacts_cursor("me", ContactKind::Followers),
            Some(ContactsCursor::Complete)
        );
        assert!(cache.contains("f3"));
        assert_eq!(
            cache.contacts_cursor("me", ContactKind::Following),
            Some(ContactsCursor::FirstPage)
        );
    }

    #[test]
    fn reregistering_owner_drops_contacts() {
        let mut cache = ProfileCache::new();
        cache.set_profile(profile("me", "Me"));
        cache.apply_contacts_page(
            "me",
            ContactKind::Following,
            ContactsPage {
                results: vec![profile("x", "X")],
                count: Some(1),
                next: None,
            },
        );
        cache.register_profile(&profile("me", "Me"));
        assert!(cache.get("me").unwrap().following.is_none());
    }
}
