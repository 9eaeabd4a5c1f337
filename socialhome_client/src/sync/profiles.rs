use serde_json::Value;

use super::Synchronizer;
use crate::error::SyncError;
use crate::gateway::{api_path, ApiRequest, Fetched};
use crate::models::{ContactKind, ContactsPage, Profile};
use crate::profiles::ContactsCursor;

impl Synchronizer {
    pub async fn fetch_profile(&self, uuid: &str) -> Result<Profile, SyncError> {
        let profile = self
            .request(ApiRequest::get(api_path(&format!("profiles/{uuid}"))))
            .await
            .and_then(Fetched::decode::<Profile>)
            .map_err(|err| self.report("Profile", err))?;
        Ok(self.store_profile(profile))
    }

    /// Resolves a local username to a profile uuid.
    pub async fn fetch_user_profile(&self, username: &str) -> Result<String, SyncError> {
        let profile = self
            .request(ApiRequest::get(api_path(&format!("users/{username}"))))
            .await
            .and_then(Fetched::decode::<Profile>)
            .map_err(|err| self.report_quietly("user profile", err))?;
        Ok(self.store_profile(profile).uuid)
    }

    /// Asks the server to refresh a remote profile. Returns `false` without a
    /// request while a previous one is still pending; the slot is released
    /// when the profile is next stored.
    pub async fn request_profile_update(&self, uuid: &str) -> Result<bool, SyncError> {
        let claimed = self
            .with_store(|store| store.profiles.try_begin_update(uuid))
            .ok_or_else(|| SyncError::UnknownProfile(uuid.to_string()))?;
        if !claimed {
            return Ok(false);
        }
        self.request(ApiRequest::get(api_path(&format!(
            "profiles/{uuid}/schedule_update"
        ))))
        .await
        .map_err(|err| self.report_quietly("profile update", err))?;
        tracing::info!(uuid, "profile update requested");
        Ok(true)
    }

    pub async fn follow_change(&self, uuid: &str, follow: bool) -> Result<(), SyncError> {
        let action = if follow { "follow" } else { "unfollow" };
        self.request(ApiRequest::post(api_path(&format!("profiles/{uuid}/{action}"))))
            .await
            .map_err(|err| self.report(&format!("Error ({action})"), err))?;
        self.with_store(|store| store.profiles.set_following(uuid, follow));
        Ok(())
    }

    /// PATCHes profile fields. A profile echoed back by the server is stored.
    pub async fn update_profile(&self, uuid: &str, updates: Value) -> Result<(), SyncError> {
        let fetched = self
            .request(ApiRequest::patch(api_path(&format!("profiles/{uuid}"))).json(updates))
            .await
            .map_err(|err| self.report("Profile update error", err))?;
        if let Ok(profile) = fetched.decode::<Profile>() {
            self.store_profile(profile);
        }
        Ok(())
    }

    /// Saves the order of profile page sections.
    pub async fn reorder_profile(&self, order: &[String]) -> Result<(), SyncError> {
        let body = serde_json::json!({ "sort_order": order.join(",") });
        self.request(ApiRequest::post(api_path("profiles/organize")).json(body))
            .await
            .map_err(|err| self.report("Profile organize error", err))?;
        Ok(())
    }

    /// Loads the next page of followers or followings for `uuid`. Returns
    /// `false` when the list is already complete.
    pub async fn fetch_contacts(&self, kind: ContactKind, uuid: &str) -> Result<bool, SyncError> {
        let cursor = self
            .with_store(|store| store.profiles.contacts_cursor(uuid, kind))
            .ok_or_else(|| SyncError::UnknownProfile(uuid.to_string()))?;
        let path = match cursor {
            ContactsCursor::Complete => return Ok(false),
            ContactsCursor::FirstPage => api_path(&format!("profiles/{}", kind.as_str())),
            ContactsCursor::Next(next) => next,
        };
        let page = self
            .request(ApiRequest::get(path))
            .await
            .and_then(Fetched::decode::<ContactsPage>)
            .map_err(|err| self.report("Contacts error", err))?;
        let fetched = page.results.len();
        self.with_store(|store| store.profiles.apply_contacts_page(uuid, kind, page));
        tracing::debug!(uuid, kind = kind.as_str(), fetched, "contacts page loaded");
        Ok(true)
    }

    fn store_profile(&self, profile: Profile) -> Profile {
        self.with_store(|store| {
            let uuid = store.profiles.set_profile(profile.clone());
            store.profiles.get(&uuid).cloned().unwrap_or(profile)
        })
    }
}
