use crate::identity::{Identity, UserProfile};
use crate::model::ProfileUpdate;

use super::{Engine, EngineError};

impl Engine {
    /// The caller's profile. A saved profile wins over what the identity
    /// provider knows; with neither the user is not found.
    pub async fn get_user(&self, who: &Identity) -> Result<UserProfile, EngineError> {
        if let Some(saved) = self.store_call(self.stores.users.get_profile(&who.user_id)).await? {
            return Ok(saved);
        }
        Ok(self.identity.profile(&who.user_id).await?)
    }

    /// Save the caller's names. The email always comes from the identity.
    pub async fn update_user(&self, who: &Identity, update: ProfileUpdate) -> Result<UserProfile, EngineError> {
        let mut errors = Vec::new();
        if update.first_name.trim().is_empty() {
            errors.push("first name cannot be empty".to_string());
        }
        if update.last_name.trim().is_empty() {
            errors.push("last name cannot be empty".to_string());
        }
        if who.email.is_empty() {
            errors.push("email cannot be empty".to_string());
        }
        if !errors.is_empty() {
            return Err(EngineError::InvalidInput(errors));
        }

        let profile = UserProfile {
            first_name: update.first_name.trim().to_string(),
            last_name: update.last_name.trim().to_string(),
            email: who.email.clone(),
        };
        let users = self.stores.users.clone();
        let user_id = who.user_id.clone();
        let saved = profile.clone();
        self.store_write((), async move { users.upsert_profile(&user_id, saved).await })
            .await?;
        tracing::debug!(user = %who.user_id, "profile updated");
        Ok(profile)
    }
}
