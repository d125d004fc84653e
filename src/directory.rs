//! Interfaces to the systems that own tools, users and communities.
//!
//! The booking core reads these entities and writes back exactly two
//! fields: a nomadic tool's actual holder and a user's reputation.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::engine::EngineError;
use crate::model::*;

#[async_trait]
pub trait ToolDirectory: Send + Sync {
    async fn tool(&self, id: ToolId) -> Result<Option<Tool>, EngineError>;

    /// Must be idempotent: setting the same holder twice is a no-op.
    async fn set_actual_holder(&self, id: ToolId, holder: UserId) -> Result<(), EngineError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user(&self, id: UserId) -> Result<Option<User>, EngineError>;

    async fn set_reputation(&self, id: UserId, reputation: Reputation) -> Result<(), EngineError>;
}

#[async_trait]
pub trait CommunityDirectory: Send + Sync {
    async fn is_member(&self, user: UserId, community: CommunityId) -> Result<bool, EngineError>;
}

/// Directory backed by in-process maps. Used by tests, benches and
/// embedders without a separate user/tool service.
#[derive(Default)]
pub struct InMemoryDirectory {
    tools: DashMap<ToolId, Tool>,
    users: DashMap<UserId, User>,
    memberships: DashSet<(UserId, CommunityId)>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_tool(&self, tool: Tool) {
        self.tools.insert(tool.id, tool);
    }

    pub fn put_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn join(&self, user: UserId, community: CommunityId) {
        self.memberships.insert((user, community));
    }

    pub fn leave(&self, user: UserId, community: CommunityId) {
        self.memberships.remove(&(user, community));
    }

    pub fn set_active(&self, user: UserId, active: bool) {
        if let Some(mut u) = self.users.get_mut(&user) {
            u.active = active;
        }
    }

    pub fn tool_snapshot(&self, id: &ToolId) -> Option<Tool> {
        self.tools.get(id).map(|t| t.value().clone())
    }

    pub fn user_snapshot(&self, id: &UserId) -> Option<User> {
        self.users.get(id).map(|u| u.value().clone())
    }
}

#[async_trait]
impl ToolDirectory for InMemoryDirectory {
    async fn tool(&self, id: ToolId) -> Result<Option<Tool>, EngineError> {
        Ok(self.tool_snapshot(&id))
    }

    async fn set_actual_holder(&self, id: ToolId, holder: UserId) -> Result<(), EngineError> {
        let mut tool = self.tools.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        tool.actual_holder_id = Some(holder);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn user(&self, id: UserId) -> Result<Option<User>, EngineError> {
        Ok(self.user_snapshot(&id))
    }

    async fn set_reputation(&self, id: UserId, reputation: Reputation) -> Result<(), EngineError> {
        let mut user = self.users.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        user.reputation = reputation.score;
        user.rating_count = reputation.count;
        Ok(())
    }
}

#[async_trait]
impl CommunityDirectory for InMemoryDirectory {
    async fn is_member(&self, user: UserId, community: CommunityId) -> Result<bool, EngineError> {
        Ok(self.memberships.contains(&(user, community)))
    }
}
