//! In-memory storage implementation
//!
//! Used in tests and for running the pipeline without a database.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use super::{Directory, OutboxStore};
use crate::models::{
    ConversationKey, ConversationThread, Credential, Delivery, DirectoryUser, LabelBinding,
    NewSendRecord, Role, SendRecord, Team, TenderInfo,
};

/// In-memory implementation of OutboxStore and Directory
///
/// Uses maps protected by RwLocks for thread-safe access.
pub struct InMemoryOutboxStore {
    records: RwLock<BTreeMap<i64, SendRecord>>,
    conversations: RwLock<HashMap<ConversationKey, ConversationThread>>,
    label_bindings: RwLock<HashMap<(i64, String), LabelBinding>>,
    credentials: RwLock<HashMap<i64, Credential>>,
    users: RwLock<HashMap<i64, DirectoryUser>>,
    roles: RwLock<Vec<Role>>,
    teams: RwLock<Vec<Team>>,
    /// (user_id, role_id) pairs
    user_roles: RwLock<HashSet<(i64, i64)>>,
    tenders: RwLock<HashMap<i64, TenderInfo>>,
}

impl InMemoryOutboxStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            conversations: RwLock::new(HashMap::new()),
            label_bindings: RwLock::new(HashMap::new()),
            credentials: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            roles: RwLock::new(Vec::new()),
            teams: RwLock::new(Vec::new()),
            user_roles: RwLock::new(HashSet::new()),
            tenders: RwLock::new(HashMap::new()),
        }
    }

    // === Directory seeding ===

    pub fn add_user(&self, user: DirectoryUser) {
        self.users.write().unwrap().insert(user.id, user);
    }

    pub fn add_role(&self, id: i64, name: impl Into<String>) {
        self.roles.write().unwrap().push(Role {
            id,
            name: name.into(),
        });
    }

    pub fn add_team(&self, id: i64, name: impl Into<String>) {
        self.teams.write().unwrap().push(Team {
            id,
            name: name.into(),
        });
    }

    pub fn assign_role(&self, user_id: i64, role_id: i64) {
        self.user_roles.write().unwrap().insert((user_id, role_id));
    }

    pub fn add_tender(&self, tender: TenderInfo) {
        self.tenders.write().unwrap().insert(tender.id, tender);
    }

    /// Overwrite a stored record (for setting up retry scenarios)
    pub fn put_record(&self, record: SendRecord) {
        self.records.write().unwrap().insert(record.id, record);
    }

    /// All records, ordered by ID
    pub fn records(&self) -> Vec<SendRecord> {
        self.records.read().unwrap().values().cloned().collect()
    }

    fn update_record(&self, id: i64, f: impl FnOnce(&mut SendRecord)) -> Result<()> {
        let mut records = self.records.write().unwrap();
        match records.get_mut(&id) {
            Some(record) => {
                f(record);
                Ok(())
            }
            None => anyhow::bail!("Send record {} not found", id),
        }
    }
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn insert_record(&self, record: NewSendRecord) -> Result<SendRecord> {
        let mut records = self.records.write().unwrap();
        let id = records.keys().next_back().map_or(1, |last| last + 1);
        let record = SendRecord::from_new(id, record, Utc::now());
        records.insert(id, record.clone());
        Ok(record)
    }

    fn get_record(&self, id: i64) -> Result<Option<SendRecord>> {
        Ok(self.records.read().unwrap().get(&id).cloned())
    }

    fn mark_sending(&self, id: i64, at: DateTime<Utc>) -> Result<Option<SendRecord>> {
        let mut records = self.records.write().unwrap();
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        if !record.status.can_transmit() {
            return Ok(None);
        }
        record.apply_sending(at);
        Ok(Some(record.clone()))
    }

    fn mark_sent(&self, id: i64, delivery: &Delivery) -> Result<()> {
        self.update_record(id, |record| record.apply_sent(delivery))
    }

    fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        self.update_record(id, |record| record.apply_failed(error))
    }

    fn list_retryable(&self, max_retries: u32) -> Result<Vec<SendRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .values()
            .filter(|r| r.is_retryable(max_retries))
            .cloned()
            .collect())
    }

    fn get_conversation(&self, key: &ConversationKey) -> Result<Option<ConversationThread>> {
        Ok(self.conversations.read().unwrap().get(key).cloned())
    }

    fn upsert_conversation(&self, thread: ConversationThread) -> Result<()> {
        self.conversations
            .write()
            .unwrap()
            .insert(thread.key.clone(), thread);
        Ok(())
    }

    fn get_label_binding(&self, user_id: i64, label_name: &str) -> Result<Option<LabelBinding>> {
        let bindings = self.label_bindings.read().unwrap();
        Ok(bindings.get(&(user_id, label_name.to_string())).cloned())
    }

    fn save_label_binding(&self, binding: LabelBinding) -> Result<()> {
        self.label_bindings
            .write()
            .unwrap()
            .insert((binding.user_id, binding.label_name.clone()), binding);
        Ok(())
    }

    fn get_credential(&self, user_id: i64) -> Result<Option<Credential>> {
        Ok(self.credentials.read().unwrap().get(&user_id).cloned())
    }

    fn save_credential(&self, credential: Credential) -> Result<()> {
        self.credentials
            .write()
            .unwrap()
            .insert(credential.user_id, credential);
        Ok(())
    }

    fn update_access_token(
        &self,
        user_id: i64,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
        refresh_token: Option<&str>,
    ) -> Result<()> {
        let mut credentials = self.credentials.write().unwrap();
        let Some(credential) = credentials.get_mut(&user_id) else {
            anyhow::bail!("No credential stored for user {}", user_id);
        };
        credential.access_token = access_token.to_string();
        credential.expires_at = expires_at;
        if let Some(refresh_token) = refresh_token {
            credential.refresh_token = Some(refresh_token.to_string());
        }
        Ok(())
    }

    fn find_connected_user_ids(&self, emails: &[String]) -> Result<Vec<i64>> {
        if emails.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<String> = emails.iter().map(|e| e.to_lowercase()).collect();
        let credentials = self.credentials.read().unwrap();
        let mut ids: Vec<i64> = credentials
            .values()
            .filter(|c| wanted.contains(&c.provider_email.to_lowercase()))
            .map(|c| c.user_id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

impl Directory for InMemoryOutboxStore {
    fn get_user(&self, id: i64) -> Result<Option<DirectoryUser>> {
        Ok(self.users.read().unwrap().get(&id).cloned())
    }

    fn list_roles(&self) -> Result<Vec<Role>> {
        Ok(self.roles.read().unwrap().clone())
    }

    fn list_teams(&self) -> Result<Vec<Team>> {
        Ok(self.teams.read().unwrap().clone())
    }

    fn active_emails_by_role(&self, role_id: i64, team_id: i64) -> Result<Vec<String>> {
        let users = self.users.read().unwrap();
        let user_roles = self.user_roles.read().unwrap();
        let mut matches: Vec<&DirectoryUser> = users
            .values()
            .filter(|u| u.is_active && u.primary_team_id == Some(team_id))
            .filter(|u| user_roles.contains(&(u.id, role_id)))
            .collect();
        matches.sort_by_key(|u| u.id);
        Ok(matches.into_iter().map(|u| u.email.clone()).collect())
    }

    fn get_tender(&self, id: i64) -> Result<Option<TenderInfo>> {
        Ok(self.tenders.read().unwrap().get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationKey, SendStatus};

    fn new_record() -> NewSendRecord {
        NewSendRecord {
            conversation: ConversationKey::new("tender", 1),
            event_type: "assigned".to_string(),
            from_user_id: 1,
            from_email: "s@example.com".to_string(),
            to_emails: vec!["a@example.com".to_string()],
            cc_emails: vec![],
            cc_suppressed: false,
            subject: "S".to_string(),
            template_name: "t1".to_string(),
            template_data: serde_json::json!({}),
            body_html: "<p>x</p>".to_string(),
            label_path: None,
            attachments: vec![],
        }
    }

    #[test]
    fn test_insert_assigns_increasing_ids() {
        let store = InMemoryOutboxStore::new();
        let a = store.insert_record(new_record()).unwrap();
        let b = store.insert_record(new_record()).unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.status, SendStatus::Pending);
    }

    #[test]
    fn test_mark_sending_rejects_in_flight_records() {
        let store = InMemoryOutboxStore::new();
        let record = store.insert_record(new_record()).unwrap();

        let sending = store.mark_sending(record.id, Utc::now()).unwrap().unwrap();
        assert_eq!(sending.attempts, 1);
        assert!(store.mark_sending(record.id, Utc::now()).unwrap().is_none());
        assert!(store.mark_sending(999, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_connected_users_match_case_insensitively() {
        let store = InMemoryOutboxStore::new();
        store
            .save_credential(Credential::new(3, "Alice@Example.com", "tok"))
            .unwrap();
        store
            .save_credential(Credential::new(4, "bob@example.com", "tok"))
            .unwrap();

        let ids = store
            .find_connected_user_ids(&["alice@example.COM".to_string()])
            .unwrap();
        assert_eq!(ids, vec![3]);
    }
}
