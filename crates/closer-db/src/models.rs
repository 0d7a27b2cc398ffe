/// Raw row shapes straight out of SQLite; conversion into the shared wire
/// types happens in closer-api.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub avatar: Option<String>,
    pub public_key: Option<String>,
    pub private_key: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct DirectMessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image: Option<String>,
    pub is_encrypted: bool,
    pub encrypted_key: Option<String>,
    pub sender_encrypted_key: Option<String>,
    pub iv: Option<String>,
    pub signature: Option<String>,
    pub sender_public_key: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct GroupMemberRow {
    pub user_id: String,
    pub full_name: String,
    pub avatar: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct GroupMessageRow {
    pub id: String,
    pub group_id: String,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
    pub text: Option<String>,
    pub image: Option<String>,
    pub kind: String,
    pub system_action: Option<String>,
    pub is_encrypted: bool,
    pub encrypted_keys: Option<String>,
    pub iv: Option<String>,
    pub signature: Option<String>,
    pub sender_public_key: Option<String>,
    pub created_at: String,
}
