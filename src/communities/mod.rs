use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, StoreContext};
use crate::models::{Community, CreateCommunityRequest};
use crate::store::Store;

#[derive(Clone)]
pub struct Communities {
    store: Arc<Store>,
}

impl Communities {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn create_community(&self, req: CreateCommunityRequest) -> CoreResult<Community> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::Validation("community name must not be empty".to_string()));
        }

        let community = Community {
            id: Uuid::new_v4().to_string(),
            name,
            image: req.image,
            created_at: Utc::now(),
        };
        self.store
            .create_community(&community)
            .context(|| format!("create_community({})", community.name))?;
        log::info!("Created community {} ({})", community.name, community.id);
        Ok(community)
    }

    pub fn get_community(&self, id: &str) -> CoreResult<Community> {
        self.store
            .get_community(id)
            .context(|| format!("get_community({})", id))
    }

    /// Add the user to the community's members. Joining twice is harmless.
    pub fn join_community(&self, community_id: &str, user_id: &str) -> CoreResult<()> {
        self.get_community(community_id)?;
        if !self.store.user_exists(user_id).context(|| format!("user_exists({})", user_id))? {
            return Err(CoreError::NotFound(format!("User {}", user_id)));
        }
        self.store
            .add_community_member(community_id, user_id, Utc::now())
            .context(|| format!("join_community({} -> {})", user_id, community_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;

    #[test]
    fn test_join_is_recorded_on_user() {
        let store = Arc::new(Store::in_memory().unwrap());
        store.upsert_user(&User::new("a1", "alice", "Alice")).unwrap();
        let communities = Communities::new(store.clone());

        let rust = communities
            .create_community(CreateCommunityRequest {
                name: "Rustaceans".to_string(),
                image: String::new(),
            })
            .unwrap();
        communities.join_community(&rust.id, "a1").unwrap();
        communities.join_community(&rust.id, "a1").unwrap();

        assert_eq!(store.get_user("a1").unwrap().communities, vec![rust.id.clone()]);
        assert!(matches!(
            communities.join_community("missing", "a1"),
            Err(CoreError::NotFound(_))
        ));
    }
}
