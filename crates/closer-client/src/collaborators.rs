//! Seams between the coordinator and the outside world. Production code
//! wires these to REST (see `rest`); tests substitute in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use closer_types::api::{SendDirectMessageRequest, SendGroupMessageRequest};
use closer_types::models::{DirectMessage, GroupMessage};

/// Account and key lookups.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Another user's published public key, base64. `None` when the user
    /// never enrolled for encryption.
    async fn fetch_public_key(&self, user_id: Uuid) -> Result<Option<String>>;

    /// Publish our public key and escrow the private half for recovery.
    async fn store_keys(&self, public_key: &str, private_key: Option<&str>) -> Result<()>;

    /// Our own escrowed private key, if the account carries one.
    async fn escrowed_secret(&self) -> Result<Option<String>>;
}

/// Message persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn fetch_direct(&self, partner_id: Uuid) -> Result<Vec<DirectMessage>>;
    async fn submit_direct(
        &self,
        receiver_id: Uuid,
        req: SendDirectMessageRequest,
    ) -> Result<DirectMessage>;
    async fn delete_direct(&self, message_id: Uuid) -> Result<()>;

    async fn fetch_group(&self, group_id: Uuid) -> Result<Vec<GroupMessage>>;
    async fn submit_group(
        &self,
        group_id: Uuid,
        req: SendGroupMessageRequest,
    ) -> Result<GroupMessage>;
    async fn delete_group(&self, group_id: Uuid, message_id: Uuid) -> Result<()>;
}

/// Gateway room subscriptions.
#[async_trait]
pub trait FanoutLink: Send + Sync {
    async fn join_group(&self, group_id: Uuid) -> Result<()>;
    async fn leave_group(&self, group_id: Uuid) -> Result<()>;
}
