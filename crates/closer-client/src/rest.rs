//! REST-backed collaborator implementations and the gateway command link.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::mpsc;
use uuid::Uuid;

use closer_types::api::{
    AuthResponse, PublicKeyResponse, SendDirectMessageRequest, SendGroupMessageRequest,
    StoreKeysRequest,
};
use closer_types::events::ClientCommand;
use closer_types::models::{DirectMessage, GroupMessage};

use crate::collaborators::{AccountDirectory, FanoutLink, MessageStore};

/// Authenticated HTTP client against the Closer server.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl AccountDirectory for RestClient {
    async fn fetch_public_key(&self, user_id: Uuid) -> Result<Option<String>> {
        let resp = self
            .http
            .get(self.url(&format!("/auth/public-key/{user_id}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("public key lookup failed")?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: PublicKeyResponse = resp.error_for_status()?.json().await?;
        Ok(body.public_key)
    }

    async fn store_keys(&self, public_key: &str, private_key: Option<&str>) -> Result<()> {
        self.http
            .post(self.url("/auth/keys"))
            .bearer_auth(&self.token)
            .json(&StoreKeysRequest {
                public_key: public_key.to_string(),
                private_key: private_key.map(String::from),
            })
            .send()
            .await
            .context("key enrollment failed")?
            .error_for_status()?;
        Ok(())
    }

    async fn escrowed_secret(&self) -> Result<Option<String>> {
        let body: AuthResponse = self
            .http
            .get(self.url("/auth/me"))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("session lookup failed")?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.private_key)
    }
}

#[async_trait]
impl MessageStore for RestClient {
    async fn fetch_direct(&self, partner_id: Uuid) -> Result<Vec<DirectMessage>> {
        let body = self
            .http
            .get(self.url(&format!("/messages/{partner_id}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("conversation fetch failed")?
            .error_for_status()?
            .json()
            .await?;
        Ok(body)
    }

    async fn submit_direct(
        &self,
        receiver_id: Uuid,
        req: SendDirectMessageRequest,
    ) -> Result<DirectMessage> {
        let body = self
            .http
            .post(self.url(&format!("/messages/send/{receiver_id}")))
            .bearer_auth(&self.token)
            .json(&req)
            .send()
            .await
            .context("message submit failed")?
            .error_for_status()?
            .json()
            .await?;
        Ok(body)
    }

    async fn delete_direct(&self, message_id: Uuid) -> Result<()> {
        self.http
            .delete(self.url(&format!("/messages/{message_id}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("message delete failed")?
            .error_for_status()?;
        Ok(())
    }

    async fn fetch_group(&self, group_id: Uuid) -> Result<Vec<GroupMessage>> {
        let body = self
            .http
            .get(self.url(&format!("/groups/{group_id}/messages")))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("group history fetch failed")?
            .error_for_status()?
            .json()
            .await?;
        Ok(body)
    }

    async fn submit_group(
        &self,
        group_id: Uuid,
        req: SendGroupMessageRequest,
    ) -> Result<GroupMessage> {
        let body = self
            .http
            .post(self.url(&format!("/groups/{group_id}/messages")))
            .bearer_auth(&self.token)
            .json(&req)
            .send()
            .await
            .context("group message submit failed")?
            .error_for_status()?
            .json()
            .await?;
        Ok(body)
    }

    async fn delete_group(&self, group_id: Uuid, message_id: Uuid) -> Result<()> {
        self.http
            .delete(self.url(&format!("/groups/{group_id}/messages/{message_id}")))
            .bearer_auth(&self.token)
            .send()
            .await
            .context("group message delete failed")?
            .error_for_status()?;
        Ok(())
    }
}

/// Room join/leave intents travel over the WebSocket, not REST. This link
/// hands serialized commands to whatever task owns the socket writer.
pub struct GatewayLink {
    tx: mpsc::UnboundedSender<ClientCommand>,
}

impl GatewayLink {
    pub fn new(tx: mpsc::UnboundedSender<ClientCommand>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl FanoutLink for GatewayLink {
    async fn join_group(&self, group_id: Uuid) -> Result<()> {
        self.tx
            .send(ClientCommand::JoinGroup { group_id })
            .context("gateway link closed")?;
        Ok(())
    }

    async fn leave_group(&self, group_id: Uuid) -> Result<()> {
        self.tx
            .send(ClientCommand::LeaveGroup { group_id })
            .context("gateway link closed")?;
        Ok(())
    }
}
