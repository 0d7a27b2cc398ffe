//! Delivery coordination: one conversation selected at a time, optimistic
//! sends reconciled against server confirmations, gateway events folded
//! into local state.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};
use uuid::Uuid;

use closer_crypto::{KeyPair, KeyStore, PublicKey, direct, group};
use closer_types::api::{SendDirectMessageRequest, SendGroupMessageRequest};
use closer_types::events::ChatEvent;
use closer_types::models::{Group, Role, UserSummary};

use crate::cache::PublicKeyCache;
use crate::collaborators::{AccountDirectory, FanoutLink, MessageStore};
use crate::timeline::{self, ViewMessage};

/// The conversation currently on screen.
#[derive(Clone)]
pub enum Selection {
    None,
    Direct(UserSummary),
    Group(Group),
}

/// What the caller should do after an event: chime, toast, or nothing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EventOutcome {
    pub play_sound: bool,
    pub notice: Option<String>,
}

pub struct DeliveryCoordinator {
    directory: Arc<dyn AccountDirectory>,
    store: Arc<dyn MessageStore>,
    fanout: Arc<dyn FanoutLink>,
    key_store: KeyStore,
    me: UserSummary,
    keys: Option<KeyPair>,
    key_cache: PublicKeyCache,
    selection: Selection,
    timeline: Vec<ViewMessage>,
    groups: Vec<Group>,
    online: Vec<Uuid>,
    sound_enabled: bool,
}

impl DeliveryCoordinator {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        store: Arc<dyn MessageStore>,
        fanout: Arc<dyn FanoutLink>,
        key_store: KeyStore,
        me: UserSummary,
    ) -> Self {
        Self {
            directory,
            store,
            fanout,
            key_store,
            me,
            keys: None,
            key_cache: PublicKeyCache::new(),
            selection: Selection::None,
            timeline: Vec::new(),
            groups: Vec::new(),
            online: Vec::new(),
            sound_enabled: true,
        }
    }

    // -- Enrollment --

    /// Make sure this session has a usable key pair: load the local store,
    /// fall back to the account's escrowed copy, generate-and-escrow as a
    /// last resort. Generation failure is fatal to enrollment; callers must
    /// not silently continue unencrypted.
    pub async fn ensure_keys(&mut self) -> Result<()> {
        if self.keys.is_some() {
            return Ok(());
        }

        if let Some(keys) = self.key_store.load()? {
            self.keys = Some(keys);
            return Ok(());
        }

        if let Some(secret) = self.directory.escrowed_secret().await? {
            let keys = KeyPair::from_secret_b64(&secret)?;
            self.key_store.persist(&keys)?;
            debug!("recovered key pair from account escrow");
            self.keys = Some(keys);
            return Ok(());
        }

        let keys = KeyPair::generate()?;
        self.directory
            .store_keys(&keys.public_b64(), Some(&keys.secret_b64()))
            .await
            .context("failed to enroll keys")?;
        self.key_store.persist(&keys)?;
        self.keys = Some(keys);
        Ok(())
    }

    /// Resolve a user's public key through the session cache. Only hits are
    /// cached; `None` means "send plaintext to this reader".
    async fn resolve_key(&mut self, user_id: Uuid) -> Option<PublicKey> {
        if user_id == self.me.id {
            return self.keys.as_ref().map(|k| k.public().clone());
        }
        if let Some(key) = self.key_cache.get(user_id) {
            return Some(key.clone());
        }
        match self.directory.fetch_public_key(user_id).await {
            Ok(Some(encoded)) => match PublicKey::from_b64(&encoded) {
                Ok(key) => {
                    self.key_cache.insert(user_id, key.clone());
                    Some(key)
                }
                Err(e) => {
                    warn!("unusable public key for {}: {}", user_id, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("public key lookup failed for {}: {}", user_id, e);
                None
            }
        }
    }

    // -- Conversation selection --

    /// Fetch and decrypt a direct conversation, then switch to it. On fetch
    /// failure the previous selection and timeline stay untouched.
    pub async fn open_direct(&mut self, user: UserSummary) -> Result<()> {
        let history = self
            .store
            .fetch_direct(user.id)
            .await
            .context("failed to load conversation")?;
        self.timeline = history
            .iter()
            .map(|m| timeline::view_direct(m, self.me.id, self.keys.as_ref()))
            .collect();
        self.selection = Selection::Direct(user);
        Ok(())
    }

    pub async fn open_group(&mut self, group: Group) -> Result<()> {
        let history = self
            .store
            .fetch_group(group.id)
            .await
            .context("failed to load group history")?;
        self.timeline = history
            .iter()
            .map(|m| timeline::view_group(m, self.me.id, self.keys.as_ref()))
            .collect();
        self.selection = Selection::Group(group);
        Ok(())
    }

    pub fn close_conversation(&mut self) {
        self.selection = Selection::None;
        self.timeline.clear();
    }

    // -- Sending --

    pub async fn send_direct(&mut self, text: Option<String>, image: Option<String>) -> Result<()> {
        let Selection::Direct(partner) = &self.selection else {
            bail!("no direct conversation selected");
        };
        let partner_id = partner.id;
        if text.as_deref().unwrap_or("").is_empty() && image.is_none() {
            bail!("nothing to send");
        }

        // Optimistic placeholder goes up before any I/O
        let optimistic_id = Uuid::new_v4();
        self.timeline.push(ViewMessage::optimistic(
            optimistic_id,
            self.me.id,
            text.clone(),
            image.clone(),
            chrono::Utc::now(),
        ));

        let mut req = SendDirectMessageRequest {
            text: text.clone(),
            image,
            envelope: Default::default(),
        };

        // Best-effort encryption: no recipient key or no local keys means
        // plaintext, a cipher error means plaintext with a warning. Sending
        // is never blocked by crypto.
        let recipient_key = match &text {
            Some(_) => self.resolve_key(partner_id).await,
            None => None,
        };
        if let (Some(plaintext), Some(keys), Some(recipient_key)) =
            (text.as_deref(), self.keys.as_ref(), recipient_key.as_ref())
        {
            match direct::encrypt_direct(plaintext, recipient_key, keys) {
                Ok(sealed) => {
                    req.text = Some(sealed.text);
                    req.envelope = sealed.envelope;
                }
                Err(e) => warn!("encryption failed, sending unencrypted: {}", e),
            }
        } else if text.is_some() {
            debug!("no key material for {}, sending plaintext", partner_id);
        }

        match self.store.submit_direct(partner_id, req).await {
            Ok(confirmed) => {
                // We know what we typed; the confirmed record is rendered
                // from the local plaintext, never re-decrypted
                let view = timeline::confirmed_direct(&confirmed, text);
                if let Some(slot) = self.timeline.iter_mut().find(|m| m.id == optimistic_id) {
                    *slot = view;
                }
                Ok(())
            }
            Err(e) => {
                self.timeline.retain(|m| m.id != optimistic_id);
                Err(e.context("message failed to send"))
            }
        }
    }

    pub async fn send_group(&mut self, text: Option<String>, image: Option<String>) -> Result<()> {
        let Selection::Group(selected) = &self.selection else {
            bail!("no group selected");
        };
        let group_id = selected.id;
        // Membership snapshot at send time decides the key fanout
        let member_ids = selected.member_ids();
        if text.as_deref().unwrap_or("").is_empty() && image.is_none() {
            bail!("nothing to send");
        }

        let optimistic_id = Uuid::new_v4();
        self.timeline.push(ViewMessage::optimistic(
            optimistic_id,
            self.me.id,
            text.clone(),
            image.clone(),
            chrono::Utc::now(),
        ));

        let mut req = SendGroupMessageRequest {
            text: text.clone(),
            image,
            envelope: Default::default(),
        };

        if let Some(plaintext) = text.as_deref() {
            let mut recipients = Vec::with_capacity(member_ids.len());
            for member_id in member_ids {
                let public_key = self.resolve_key(member_id).await;
                recipients.push(group::GroupRecipient {
                    user_id: member_id,
                    public_key,
                });
            }
            if let Some(keys) = self.keys.as_ref() {
                match group::encrypt_group(plaintext, &recipients, keys) {
                    Ok(sealed) => {
                        req.text = Some(sealed.text);
                        req.envelope = sealed.envelope;
                    }
                    Err(e) => warn!("group encryption failed, sending unencrypted: {}", e),
                }
            }
        }

        match self.store.submit_group(group_id, req).await {
            Ok(confirmed) => {
                let view = timeline::confirmed_group(&confirmed, text);
                if let Some(slot) = self.timeline.iter_mut().find(|m| m.id == optimistic_id) {
                    *slot = view;
                }
                self.bump_group(group_id);
                Ok(())
            }
            Err(e) => {
                self.timeline.retain(|m| m.id != optimistic_id);
                Err(e.context("message failed to send"))
            }
        }
    }

    // -- Deletion --

    pub async fn delete_direct_message(&mut self, message_id: Uuid) -> Result<()> {
        self.store
            .delete_direct(message_id)
            .await
            .context("failed to delete message")?;
        self.timeline.retain(|m| m.id != message_id);
        Ok(())
    }

    pub async fn delete_group_message(&mut self, message_id: Uuid) -> Result<()> {
        let Selection::Group(selected) = &self.selection else {
            bail!("no group selected");
        };
        self.store
            .delete_group(selected.id, message_id)
            .await
            .context("failed to delete message")?;
        self.timeline.retain(|m| m.id != message_id);
        Ok(())
    }

    // -- Gateway events --

    /// Fold one gateway event into local state. Every variant is handled
    /// here; callers act on the returned outcome only.
    pub async fn handle_event(&mut self, event: ChatEvent) -> EventOutcome {
        let mut outcome = EventOutcome::default();

        match event {
            ChatEvent::NewMessage { message } => {
                if message.sender_id.id() == self.me.id {
                    // Our optimistic copy is already on screen
                    return outcome;
                }
                if let Selection::Direct(partner) = &self.selection {
                    if partner.id == message.sender_id.id() {
                        self.timeline.push(timeline::view_direct(
                            &message,
                            self.me.id,
                            self.keys.as_ref(),
                        ));
                        outcome.play_sound = self.sound_enabled;
                    }
                }
            }

            ChatEvent::MessageDeleted { message_id, .. } => {
                if matches!(self.selection, Selection::Direct(_)) {
                    self.timeline.retain(|m| m.id != message_id);
                }
            }

            ChatEvent::NewGroupMessage { group_id, message } => {
                self.bump_group(group_id);
                let selected = matches!(&self.selection, Selection::Group(g) if g.id == group_id);
                if selected {
                    if message.is_system() {
                        // Membership notices always land, silently
                        self.timeline.push(timeline::view_group(
                            &message,
                            self.me.id,
                            self.keys.as_ref(),
                        ));
                    } else if message.sender_uuid() != Some(self.me.id) {
                        self.timeline.push(timeline::view_group(
                            &message,
                            self.me.id,
                            self.keys.as_ref(),
                        ));
                        outcome.play_sound = self.sound_enabled;
                    }
                }
            }

            ChatEvent::GroupMessageDeleted { group_id, message_id } => {
                if matches!(&self.selection, Selection::Group(g) if g.id == group_id) {
                    self.timeline.retain(|m| m.id != message_id);
                }
            }

            ChatEvent::GroupCreated { group } => {
                if let Err(e) = self.fanout.join_group(group.id).await {
                    warn!("failed to join group room {}: {}", group.id, e);
                }
                if group.created_by != self.me.id {
                    outcome.notice = Some(format!("You were added to {}", group.name));
                }
                if !self.groups.iter().any(|g| g.id == group.id) {
                    self.groups.insert(0, group);
                }
            }

            ChatEvent::GroupUpdated { group } => {
                self.upsert_group(group);
            }

            ChatEvent::GroupDeleted { group_id } => {
                if let Err(e) = self.fanout.leave_group(group_id).await {
                    warn!("failed to leave group room {}: {}", group_id, e);
                }
                let name = self
                    .groups
                    .iter()
                    .find(|g| g.id == group_id)
                    .map(|g| g.name.clone());
                self.groups.retain(|g| g.id != group_id);
                if matches!(&self.selection, Selection::Group(g) if g.id == group_id) {
                    self.close_conversation();
                }
                outcome.notice =
                    Some(format!("{} was deleted", name.unwrap_or_else(|| "Group".into())));
            }

            ChatEvent::MembersAdded { group, .. } => {
                self.upsert_group(group);
            }

            ChatEvent::MemberRemoved { group_id, user_id, group } => {
                if user_id == self.me.id {
                    if let Err(e) = self.fanout.leave_group(group_id).await {
                        warn!("failed to leave group room {}: {}", group_id, e);
                    }
                    self.groups.retain(|g| g.id != group_id);
                    if matches!(&self.selection, Selection::Group(g) if g.id == group_id) {
                        self.close_conversation();
                    }
                    outcome.notice = Some(format!("You were removed from {}", group.name));
                } else {
                    self.upsert_group(group);
                }
            }

            ChatEvent::MemberLeft { group_id, user_id, group } => {
                if user_id == self.me.id {
                    self.groups.retain(|g| g.id != group_id);
                } else {
                    self.upsert_group(group);
                }
            }

            ChatEvent::MemberRoleUpdated { user_id, new_role, group, .. } => {
                if user_id == self.me.id {
                    outcome.notice = Some(match new_role {
                        Role::Admin => format!("You are now an admin of {}", group.name),
                        _ => format!("You are now a member of {}", group.name),
                    });
                }
                self.upsert_group(group);
            }

            ChatEvent::OnlineUsers { user_ids } => {
                self.online = user_ids;
            }
        }

        outcome
    }

    fn upsert_group(&mut self, group: Group) {
        if matches!(&self.selection, Selection::Group(g) if g.id == group.id) {
            self.selection = Selection::Group(group.clone());
        }
        match self.groups.iter_mut().find(|g| g.id == group.id) {
            Some(slot) => *slot = group,
            None => self.groups.insert(0, group),
        }
    }

    /// Most-recently-active group floats to the top of the list.
    fn bump_group(&mut self, group_id: Uuid) {
        if let Some(pos) = self.groups.iter().position(|g| g.id == group_id) {
            let group = self.groups.remove(pos);
            self.groups.insert(0, group);
        }
    }

    // -- Accessors --

    pub fn set_groups(&mut self, groups: Vec<Group>) {
        self.groups = groups;
    }

    pub fn set_sound_enabled(&mut self, enabled: bool) {
        self.sound_enabled = enabled;
    }

    pub fn timeline(&self) -> &[ViewMessage] {
        &self.timeline
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn online_users(&self) -> &[Uuid] {
        &self.online
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn has_keys(&self) -> bool {
        self.keys.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{AccountDirectory, FanoutLink, MessageStore};
    use crate::timeline::NO_KEY_PLACEHOLDER;
    use async_trait::async_trait;
    use closer_types::models::{
        DirectMessage, GroupMember, GroupMessage, MessageKind, SenderRef,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeDirectory {
        published: Mutex<HashMap<Uuid, String>>,
        stored: Mutex<Vec<(String, Option<String>)>>,
        escrow: Mutex<Option<String>>,
    }

    #[async_trait]
    impl AccountDirectory for FakeDirectory {
        async fn fetch_public_key(&self, user_id: Uuid) -> Result<Option<String>> {
            Ok(self.published.lock().unwrap().get(&user_id).cloned())
        }
        async fn store_keys(&self, public_key: &str, private_key: Option<&str>) -> Result<()> {
            self.stored
                .lock()
                .unwrap()
                .push((public_key.to_string(), private_key.map(String::from)));
            Ok(())
        }
        async fn escrowed_secret(&self) -> Result<Option<String>> {
            Ok(self.escrow.lock().unwrap().clone())
        }
    }

    struct FakeStore {
        me: Uuid,
        direct_history: Mutex<Vec<DirectMessage>>,
        group_history: Mutex<Vec<GroupMessage>>,
        submitted_direct: Mutex<Vec<SendDirectMessageRequest>>,
        submitted_group: Mutex<Vec<SendGroupMessageRequest>>,
        fail_submit: AtomicBool,
    }

    impl FakeStore {
        fn new(me: Uuid) -> Self {
            Self {
                me,
                direct_history: Mutex::new(Vec::new()),
                group_history: Mutex::new(Vec::new()),
                submitted_direct: Mutex::new(Vec::new()),
                submitted_group: Mutex::new(Vec::new()),
                fail_submit: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl MessageStore for FakeStore {
        async fn fetch_direct(&self, _partner_id: Uuid) -> Result<Vec<DirectMessage>> {
            Ok(self.direct_history.lock().unwrap().clone())
        }
        async fn submit_direct(
            &self,
            receiver_id: Uuid,
            req: SendDirectMessageRequest,
        ) -> Result<DirectMessage> {
            if self.fail_submit.load(Ordering::Relaxed) {
                anyhow::bail!("connection reset");
            }
            self.submitted_direct.lock().unwrap().push(req.clone());
            Ok(DirectMessage {
                id: Uuid::new_v4(),
                sender_id: SenderRef::Id(self.me),
                receiver_id,
                text: req.text,
                image: req.image,
                envelope: req.envelope,
                created_at: chrono::Utc::now(),
            })
        }
        async fn delete_direct(&self, _message_id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn fetch_group(&self, _group_id: Uuid) -> Result<Vec<GroupMessage>> {
            Ok(self.group_history.lock().unwrap().clone())
        }
        async fn submit_group(
            &self,
            group_id: Uuid,
            req: SendGroupMessageRequest,
        ) -> Result<GroupMessage> {
            if self.fail_submit.load(Ordering::Relaxed) {
                anyhow::bail!("connection reset");
            }
            self.submitted_group.lock().unwrap().push(req.clone());
            Ok(GroupMessage {
                id: Uuid::new_v4(),
                group_id,
                sender_id: Some(SenderRef::Id(self.me)),
                text: req.text,
                image: req.image,
                kind: MessageKind::Message,
                system_action: None,
                envelope: req.envelope,
                created_at: chrono::Utc::now(),
            })
        }
        async fn delete_group(&self, _group_id: Uuid, _message_id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFanout {
        joined: Mutex<Vec<Uuid>>,
        left: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl FanoutLink for FakeFanout {
        async fn join_group(&self, group_id: Uuid) -> Result<()> {
            self.joined.lock().unwrap().push(group_id);
            Ok(())
        }
        async fn leave_group(&self, group_id: Uuid) -> Result<()> {
            self.left.lock().unwrap().push(group_id);
            Ok(())
        }
    }

    fn temp_key_store() -> KeyStore {
        let dir = std::env::temp_dir().join(format!("closer-coord-{}", Uuid::new_v4()));
        KeyStore::new(dir)
    }

    fn user(name: &str) -> UserSummary {
        UserSummary {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            avatar: None,
        }
    }

    fn group_of(members: &[(UserSummary, Role)]) -> Group {
        let created_by = members
            .iter()
            .find(|(_, r)| *r == Role::Creator)
            .map(|(u, _)| u.id)
            .unwrap_or_default();
        Group {
            id: Uuid::new_v4(),
            name: "team".into(),
            description: None,
            avatar: None,
            created_by,
            members: members
                .iter()
                .map(|(u, role)| GroupMember {
                    user: SenderRef::Expanded(u.clone()),
                    role: *role,
                })
                .collect(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    struct Rig {
        coordinator: DeliveryCoordinator,
        directory: Arc<FakeDirectory>,
        store: Arc<FakeStore>,
        fanout: Arc<FakeFanout>,
    }

    fn rig(me: &UserSummary) -> Rig {
        let directory = Arc::new(FakeDirectory::default());
        let store = Arc::new(FakeStore::new(me.id));
        let fanout = Arc::new(FakeFanout::default());
        let coordinator = DeliveryCoordinator::new(
            directory.clone(),
            store.clone(),
            fanout.clone(),
            temp_key_store(),
            me.clone(),
        );
        Rig {
            coordinator,
            directory,
            store,
            fanout,
        }
    }

    #[tokio::test]
    async fn ensure_keys_generates_and_escrows() {
        let me = user("alice");
        let mut rig = rig(&me);

        rig.coordinator.ensure_keys().await.unwrap();
        assert!(rig.coordinator.has_keys());

        let stored = rig.directory.stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].1.is_some(), "private half should be escrowed");
    }

    #[tokio::test]
    async fn ensure_keys_recovers_from_escrow() {
        let me = user("alice");
        let rig_parts = rig(&me);
        let mut coordinator = rig_parts.coordinator;

        let original = KeyPair::generate().unwrap();
        *rig_parts.directory.escrow.lock().unwrap() = Some(original.secret_b64());

        coordinator.ensure_keys().await.unwrap();
        // No re-enrollment: the escrowed pair was adopted as-is
        assert!(rig_parts.directory.stored.lock().unwrap().is_empty());
        assert!(coordinator.has_keys());
    }

    // Scenario: A sends "hello" to B with both enrolled. B's stored record
    // decrypts; A's timeline shows exactly one confirmed plaintext record.
    #[tokio::test]
    async fn direct_send_encrypts_and_confirms_optimistically() {
        let alice = user("alice");
        let bob = user("bob");
        let bob_keys = KeyPair::generate().unwrap();

        let mut rig = rig(&alice);
        rig.directory
            .published
            .lock()
            .unwrap()
            .insert(bob.id, bob_keys.public_b64());

        rig.coordinator.ensure_keys().await.unwrap();
        rig.coordinator.open_direct(bob.clone()).await.unwrap();
        rig.coordinator
            .send_direct(Some("hello".into()), None)
            .await
            .unwrap();

        let timeline = rig.coordinator.timeline();
        assert_eq!(timeline.len(), 1);
        assert!(!timeline[0].is_optimistic);
        assert_eq!(timeline[0].text.as_deref(), Some("hello"));
        assert!(timeline[0].decrypted);
        assert_eq!(timeline[0].signature_valid, Some(true));

        // What went over the wire is ciphertext Bob can open
        let submitted = rig.store.submitted_direct.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        let req = &submitted[0];
        assert!(req.envelope.is_encrypted);
        assert_ne!(req.text.as_deref(), Some("hello"));
        let plaintext = direct::decrypt_direct(
            req.text.as_deref().unwrap(),
            &req.envelope,
            &bob_keys,
            false,
        )
        .unwrap();
        assert_eq!(plaintext, "hello");
    }

    #[tokio::test]
    async fn failed_send_rolls_back_the_placeholder() {
        let alice = user("alice");
        let bob = user("bob");
        let mut rig = rig(&alice);
        rig.store.fail_submit.store(true, Ordering::Relaxed);

        rig.coordinator.open_direct(bob).await.unwrap();
        let err = rig
            .coordinator
            .send_direct(Some("hello".into()), None)
            .await;
        assert!(err.is_err());
        assert!(rig.coordinator.timeline().is_empty());
    }

    #[tokio::test]
    async fn unenrolled_recipient_gets_plaintext() {
        let alice = user("alice");
        let bob = user("bob");
        let mut rig = rig(&alice);

        rig.coordinator.ensure_keys().await.unwrap();
        rig.coordinator.open_direct(bob).await.unwrap();
        rig.coordinator
            .send_direct(Some("hello".into()), None)
            .await
            .unwrap();

        let submitted = rig.store.submitted_direct.lock().unwrap();
        assert!(!submitted[0].envelope.is_encrypted);
        assert_eq!(submitted[0].text.as_deref(), Some("hello"));

        // Our own confirmed send is always marked readable, encrypted or not
        let timeline = rig.coordinator.timeline();
        assert!(timeline[0].decrypted);
        assert_eq!(timeline[0].signature_valid, Some(true));
    }

    #[tokio::test]
    async fn failed_group_send_rolls_back_the_placeholder() {
        let alice = user("alice");
        let bob = user("bob");
        let group = group_of(&[(alice.clone(), Role::Creator), (bob.clone(), Role::Member)]);
        let mut rig = rig(&alice);
        rig.store.fail_submit.store(true, Ordering::Relaxed);

        rig.coordinator.open_group(group).await.unwrap();
        let err = rig.coordinator.send_group(Some("hello".into()), None).await;
        assert!(err.is_err());
        assert!(rig.coordinator.timeline().is_empty());
    }

    // Scenario: group of [A, B, C] where C never enrolled. The envelope
    // carries wraps for A and B only; C sees the no-key placeholder.
    #[tokio::test]
    async fn group_send_skips_keyless_member() {
        let alice = user("alice");
        let bob = user("bob");
        let carol = user("carol");
        let bob_keys = KeyPair::generate().unwrap();

        let mut rig = rig(&alice);
        rig.directory
            .published
            .lock()
            .unwrap()
            .insert(bob.id, bob_keys.public_b64());
        // carol publishes nothing

        let group = group_of(&[
            (alice.clone(), Role::Creator),
            (bob.clone(), Role::Member),
            (carol.clone(), Role::Member),
        ]);

        rig.coordinator.ensure_keys().await.unwrap();
        rig.coordinator.open_group(group.clone()).await.unwrap();
        rig.coordinator
            .send_group(Some("hi team".into()), None)
            .await
            .unwrap();

        let submitted = rig.store.submitted_group.lock().unwrap();
        let req = &submitted[0];
        assert!(req.envelope.is_encrypted);
        assert_eq!(req.envelope.encrypted_keys.len(), 2);
        assert!(req.envelope.key_for(alice.id).is_some());
        assert!(req.envelope.key_for(bob.id).is_some());
        assert!(req.envelope.key_for(carol.id).is_none());

        // Bob decrypts; Carol gets the placeholder
        let stored = GroupMessage {
            id: Uuid::new_v4(),
            group_id: group.id,
            sender_id: Some(SenderRef::Id(alice.id)),
            text: req.text.clone(),
            image: None,
            kind: MessageKind::Message,
            system_action: None,
            envelope: req.envelope.clone(),
            created_at: chrono::Utc::now(),
        };
        let bob_view = timeline::view_group(&stored, bob.id, Some(&bob_keys));
        assert_eq!(bob_view.text.as_deref(), Some("hi team"));

        let carol_keys = KeyPair::generate().unwrap();
        let carol_view = timeline::view_group(&stored, carol.id, Some(&carol_keys));
        assert!(carol_view.no_key);
        assert_eq!(carol_view.text.as_deref(), Some(NO_KEY_PLACEHOLDER));
    }

    #[tokio::test]
    async fn own_broadcast_copy_is_suppressed() {
        let alice = user("alice");
        let bob = user("bob");
        let mut rig = rig(&alice);

        rig.coordinator.open_direct(bob.clone()).await.unwrap();

        let own = DirectMessage {
            id: Uuid::new_v4(),
            sender_id: SenderRef::Id(alice.id),
            receiver_id: bob.id,
            text: Some("echo".into()),
            image: None,
            envelope: Default::default(),
            created_at: chrono::Utc::now(),
        };
        let outcome = rig
            .coordinator
            .handle_event(ChatEvent::NewMessage { message: own })
            .await;
        assert_eq!(outcome, EventOutcome::default());
        assert!(rig.coordinator.timeline().is_empty());

        let incoming = DirectMessage {
            id: Uuid::new_v4(),
            sender_id: SenderRef::Id(bob.id),
            receiver_id: alice.id,
            text: Some("hi".into()),
            image: None,
            envelope: Default::default(),
            created_at: chrono::Utc::now(),
        };
        let outcome = rig
            .coordinator
            .handle_event(ChatEvent::NewMessage { message: incoming })
            .await;
        assert!(outcome.play_sound);
        assert_eq!(rig.coordinator.timeline().len(), 1);
    }

    #[tokio::test]
    async fn system_notices_append_without_sound() {
        let alice = user("alice");
        let bob = user("bob");
        let group = group_of(&[(alice.clone(), Role::Creator), (bob.clone(), Role::Member)]);
        let mut rig = rig(&alice);

        rig.coordinator.set_groups(vec![group.clone()]);
        rig.coordinator.open_group(group.clone()).await.unwrap();

        let notice = GroupMessage {
            id: Uuid::new_v4(),
            group_id: group.id,
            sender_id: None,
            text: Some("alice added bob".into()),
            image: None,
            kind: MessageKind::System,
            system_action: Some(closer_types::models::SystemAction::MemberAdded),
            envelope: Default::default(),
            created_at: chrono::Utc::now(),
        };
        let outcome = rig
            .coordinator
            .handle_event(ChatEvent::NewGroupMessage {
                group_id: group.id,
                message: notice,
            })
            .await;
        assert!(!outcome.play_sound);
        assert_eq!(rig.coordinator.timeline().len(), 1);
        assert_eq!(rig.coordinator.timeline()[0].kind, MessageKind::System);
    }

    #[tokio::test]
    async fn group_deletion_clears_selection_and_leaves_room() {
        let alice = user("alice");
        let bob = user("bob");
        let group = group_of(&[(bob.clone(), Role::Creator), (alice.clone(), Role::Member)]);
        let mut rig = rig(&alice);

        rig.coordinator.set_groups(vec![group.clone()]);
        rig.coordinator.open_group(group.clone()).await.unwrap();

        let outcome = rig
            .coordinator
            .handle_event(ChatEvent::GroupDeleted { group_id: group.id })
            .await;
        assert!(outcome.notice.is_some());
        assert!(matches!(rig.coordinator.selection(), Selection::None));
        assert!(rig.coordinator.groups().is_empty());
        assert_eq!(rig.fanout.left.lock().unwrap().as_slice(), &[group.id]);
    }

    #[tokio::test]
    async fn activity_bumps_group_ordering() {
        let alice = user("alice");
        let bob = user("bob");
        let first = group_of(&[(alice.clone(), Role::Creator)]);
        let second = group_of(&[(alice.clone(), Role::Creator), (bob.clone(), Role::Member)]);
        let mut rig = rig(&alice);
        rig.coordinator.set_groups(vec![first.clone(), second.clone()]);

        let msg = GroupMessage {
            id: Uuid::new_v4(),
            group_id: second.id,
            sender_id: Some(SenderRef::Id(bob.id)),
            text: Some("ping".into()),
            image: None,
            kind: MessageKind::Message,
            system_action: None,
            envelope: Default::default(),
            created_at: chrono::Utc::now(),
        };
        rig.coordinator
            .handle_event(ChatEvent::NewGroupMessage {
                group_id: second.id,
                message: msg,
            })
            .await;

        assert_eq!(rig.coordinator.groups()[0].id, second.id);
        assert_eq!(rig.coordinator.groups()[1].id, first.id);
    }
}
