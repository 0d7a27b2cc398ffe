use crate::Database;
use crate::models::{DirectMessageRow, GroupMemberRow, GroupMessageRow, GroupRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        full_name: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, full_name, email, password) VALUES (?1, ?2, ?3, ?4)",
                (id, full_name, email, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Publish a user's public key and (optionally) escrow the private half.
    pub fn store_keys(&self, id: &str, public_key: &str, private_key: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            if let Some(private_key) = private_key {
                conn.execute(
                    "UPDATE users SET public_key = ?2, private_key = ?3 WHERE id = ?1",
                    (id, public_key, private_key),
                )?;
            } else {
                conn.execute(
                    "UPDATE users SET public_key = ?2 WHERE id = ?1",
                    (id, public_key),
                )?;
            }
            Ok(())
        })
    }

    pub fn list_contacts(&self, exclude_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLS} FROM users WHERE id != ?1 ORDER BY full_name"
            ))?;
            let rows = stmt
                .query_map([exclude_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Users this user has exchanged at least one direct message with.
    pub fn list_chat_partners(&self, user_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLS} FROM users WHERE id IN (
                     SELECT receiver_id FROM direct_messages WHERE sender_id = ?1
                     UNION
                     SELECT sender_id FROM direct_messages WHERE receiver_id = ?1
                 ) ORDER BY full_name"
            ))?;
            let rows = stmt
                .query_map([user_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Direct messages --

    pub fn insert_direct_message(&self, row: &DirectMessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO direct_messages
                   (id, sender_id, receiver_id, text, image, is_encrypted,
                    encrypted_key, sender_encrypted_key, iv, signature,
                    sender_public_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    row.id,
                    row.sender_id,
                    row.receiver_id,
                    row.text,
                    row.image,
                    row.is_encrypted,
                    row.encrypted_key,
                    row.sender_encrypted_key,
                    row.iv,
                    row.signature,
                    row.sender_public_key,
                    row.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_direct_message(&self, id: &str) -> Result<Option<DirectMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DM_COLS} FROM direct_messages WHERE id = ?1"
            ))?;
            stmt.query_row([id], direct_from_row).optional()
        })
    }

    /// Both directions of one conversation, oldest first.
    pub fn get_conversation(&self, a: &str, b: &str) -> Result<Vec<DirectMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DM_COLS} FROM direct_messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC"
            ))?;
            let rows = stmt
                .query_map([a, b], direct_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_direct_message(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM direct_messages WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Groups --

    pub fn create_group(&self, row: &GroupRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO groups (id, name, description, avatar, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.id,
                    row.name,
                    row.description,
                    row.avatar,
                    row.created_by,
                    row.created_at,
                    row.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_group(&self, id: &str) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, avatar, created_by, created_at, updated_at
                 FROM groups WHERE id = ?1",
            )?;
            stmt.query_row([id], group_from_row).optional()
        })
    }

    /// Groups the user belongs to, most recently active first.
    pub fn groups_for_user(&self, user_id: &str) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name, g.description, g.avatar, g.created_by, g.created_at, g.updated_at
                 FROM groups g
                 JOIN group_members m ON m.group_id = g.id
                 WHERE m.user_id = ?1
                 ORDER BY g.updated_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], group_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn group_ids_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT group_id FROM group_members WHERE user_id = ?1")?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_group(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE groups SET
                     name = COALESCE(?2, name),
                     description = COALESCE(?3, description),
                     avatar = COALESCE(?4, avatar),
                     updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![id, name, description, avatar],
            )?;
            Ok(())
        })
    }

    /// Bump the group's activity timestamp (message sent).
    pub fn touch_group(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE groups SET updated_at = datetime('now') WHERE id = ?1",
                [id],
            )?;
            Ok(())
        })
    }

    /// Hard delete; members and messages go with it (ON DELETE CASCADE).
    pub fn delete_group(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM groups WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Group members --

    pub fn add_member(&self, group_id: &str, user_id: &str, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role) VALUES (?1, ?2, ?3)",
                (group_id, user_id, role),
            )?;
            Ok(())
        })
    }

    pub fn remove_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                (group_id, user_id),
            )?;
            Ok(())
        })
    }

    pub fn update_member_role(&self, group_id: &str, user_id: &str, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE group_members SET role = ?3 WHERE group_id = ?1 AND user_id = ?2",
                (group_id, user_id, role),
            )?;
            Ok(())
        })
    }

    pub fn member_role(&self, group_id: &str, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT role FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                (group_id, user_id),
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn get_group_members(&self, group_id: &str) -> Result<Vec<GroupMemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.user_id, u.full_name, u.avatar, m.role
                 FROM group_members m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.group_id = ?1
                 ORDER BY m.joined_at ASC",
            )?;
            let rows = stmt
                .query_map([group_id], |row| {
                    Ok(GroupMemberRow {
                        user_id: row.get(0)?,
                        full_name: row.get(1)?,
                        avatar: row.get(2)?,
                        role: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Group messages --

    pub fn insert_group_message(&self, row: &GroupMessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_messages
                   (id, group_id, sender_id, text, image, kind, system_action,
                    is_encrypted, encrypted_keys, iv, signature, sender_public_key, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    row.id,
                    row.group_id,
                    row.sender_id,
                    row.text,
                    row.image,
                    row.kind,
                    row.system_action,
                    row.is_encrypted,
                    row.encrypted_keys,
                    row.iv,
                    row.signature,
                    row.sender_public_key,
                    row.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_group_message(&self, id: &str) -> Result<Option<GroupMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{GM_SELECT} WHERE gm.id = ?1"
            ))?;
            stmt.query_row([id], group_message_from_row).optional()
        })
    }

    /// Full history of a group, oldest first, sender expanded.
    pub fn get_group_messages(&self, group_id: &str) -> Result<Vec<GroupMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{GM_SELECT} WHERE gm.group_id = ?1 ORDER BY gm.created_at ASC"
            ))?;
            let rows = stmt
                .query_map([group_id], group_message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_group_message(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM group_messages WHERE id = ?1", [id])?;
            Ok(())
        })
    }
}

const USER_COLS: &str =
    "id, full_name, email, password, avatar, public_key, private_key, created_at";

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLS} FROM users WHERE {column} = ?1"
    ))?;
    stmt.query_row([value], user_from_row).optional()
}

const DM_COLS: &str = "id, sender_id, receiver_id, text, image, is_encrypted, encrypted_key, \
     sender_encrypted_key, iv, signature, sender_public_key, created_at";

const GM_SELECT: &str = "SELECT gm.id, gm.group_id, gm.sender_id, u.full_name, u.avatar, \
     gm.text, gm.image, gm.kind, gm.system_action, gm.is_encrypted, gm.encrypted_keys, \
     gm.iv, gm.signature, gm.sender_public_key, gm.created_at \
     FROM group_messages gm LEFT JOIN users u ON u.id = gm.sender_id";

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        avatar: row.get(4)?,
        public_key: row.get(5)?,
        private_key: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn direct_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirectMessageRow> {
    Ok(DirectMessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        text: row.get(3)?,
        image: row.get(4)?,
        is_encrypted: row.get(5)?,
        encrypted_key: row.get(6)?,
        sender_encrypted_key: row.get(7)?,
        iv: row.get(8)?,
        signature: row.get(9)?,
        sender_public_key: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn group_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        avatar: row.get(3)?,
        created_by: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn group_message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMessageRow> {
    Ok(GroupMessageRow {
        id: row.get(0)?,
        group_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        sender_avatar: row.get(4)?,
        text: row.get(5)?,
        image: row.get(6)?,
        kind: row.get(7)?,
        system_action: row.get(8)?,
        is_encrypted: row.get(9)?,
        encrypted_keys: row.get(10)?,
        iv: row.get(11)?,
        signature: row.get(12)?,
        sender_public_key: row.get(13)?,
        created_at: row.get(14)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_user(db: &Database, name: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        db.create_user(&id, name, &format!("{name}@example.com"), "hash")
            .unwrap();
        id
    }

    fn direct_row(id: &str, from: &str, to: &str, text: &str) -> DirectMessageRow {
        DirectMessageRow {
            id: id.to_string(),
            sender_id: from.to_string(),
            receiver_id: to.to_string(),
            text: Some(text.to_string()),
            image: None,
            is_encrypted: false,
            encrypted_key: None,
            sender_encrypted_key: None,
            iv: None,
            signature: None,
            sender_public_key: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn key_escrow_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = seed_user(&db, "alice");

        db.store_keys(&id, "pub-b64", Some("priv-b64")).unwrap();
        let user = db.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(user.public_key.as_deref(), Some("pub-b64"));
        assert_eq!(user.private_key.as_deref(), Some("priv-b64"));

        // Re-publishing only the public half leaves the escrow untouched
        db.store_keys(&id, "pub-b64-2", None).unwrap();
        let user = db.get_user_by_id(&id).unwrap().unwrap();
        assert_eq!(user.public_key.as_deref(), Some("pub-b64-2"));
        assert_eq!(user.private_key.as_deref(), Some("priv-b64"));
    }

    #[test]
    fn conversation_covers_both_directions() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "alice");
        let b = seed_user(&db, "bob");
        let c = seed_user(&db, "carol");

        db.insert_direct_message(&direct_row("m1", &a, &b, "hi bob")).unwrap();
        db.insert_direct_message(&direct_row("m2", &b, &a, "hi alice")).unwrap();
        db.insert_direct_message(&direct_row("m3", &a, &c, "hi carol")).unwrap();

        let convo = db.get_conversation(&a, &b).unwrap();
        assert_eq!(convo.len(), 2);

        let partners = db.list_chat_partners(&a).unwrap();
        let names: Vec<_> = partners.iter().map(|u| u.full_name.as_str()).collect();
        assert_eq!(names, vec!["bob", "carol"]);
    }

    #[test]
    fn group_lifecycle_and_roles() {
        let db = Database::open_in_memory().unwrap();
        let creator = seed_user(&db, "alice");
        let member = seed_user(&db, "bob");

        let gid = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        db.create_group(&GroupRow {
            id: gid.clone(),
            name: "team".into(),
            description: None,
            avatar: None,
            created_by: creator.clone(),
            created_at: now.clone(),
            updated_at: now,
        })
        .unwrap();
        db.add_member(&gid, &creator, "creator").unwrap();
        db.add_member(&gid, &member, "member").unwrap();

        assert_eq!(db.member_role(&gid, &creator).unwrap().as_deref(), Some("creator"));
        assert_eq!(db.get_group_members(&gid).unwrap().len(), 2);

        db.update_member_role(&gid, &member, "admin").unwrap();
        assert_eq!(db.member_role(&gid, &member).unwrap().as_deref(), Some("admin"));

        db.remove_member(&gid, &member).unwrap();
        assert!(db.member_role(&gid, &member).unwrap().is_none());

        db.delete_group(&gid).unwrap();
        assert!(db.get_group(&gid).unwrap().is_none());
        // Cascade removed the remaining membership
        assert!(db.group_ids_for_user(&creator).unwrap().is_empty());
    }

    #[test]
    fn group_message_fanout_json_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let alice = seed_user(&db, "alice");

        let gid = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        db.create_group(&GroupRow {
            id: gid.clone(),
            name: "team".into(),
            description: None,
            avatar: None,
            created_by: alice.clone(),
            created_at: now.clone(),
            updated_at: now.clone(),
        })
        .unwrap();

        db.insert_group_message(&GroupMessageRow {
            id: "gm1".into(),
            group_id: gid.clone(),
            sender_id: Some(alice.clone()),
            sender_name: None,
            sender_avatar: None,
            text: Some("ciphertext-b64".into()),
            image: None,
            kind: "message".into(),
            system_action: None,
            is_encrypted: true,
            encrypted_keys: Some(r#"[{"recipientId":"x","encryptedKey":"y"}]"#.into()),
            iv: Some("iv-b64".into()),
            signature: Some("deadbeef".into()),
            sender_public_key: Some("pub".into()),
            created_at: now,
        })
        .unwrap();

        let messages = db.get_group_messages(&gid).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_encrypted);
        assert_eq!(messages[0].sender_name.as_deref(), Some("alice"));
        assert!(messages[0].encrypted_keys.as_deref().unwrap().contains("recipientId"));
    }
}
