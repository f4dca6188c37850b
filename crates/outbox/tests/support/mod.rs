//! Shared fixtures for integration tests: a scriptable Gmail fake, a
//! dispatcher that queues tasks until the test runs them, and a harness
//! wiring the service against the in-memory store.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::prelude::*;
use chrono::Utc;
use outbox::gmail::api::{Label, MessageRef, SendMessageRequest, SentMessageResponse, TokenResponse};
use outbox::{
    ApiError, Credential, Dispatcher, DirectoryUser, EmailService, Environment, GmailApi,
    GmailTransport, HandlebarsRenderer, InMemoryOutboxStore, OutboxSettings, OutboxStore, Task,
    TenderInfo,
};
use tempfile::TempDir;

pub const SENDER_ID: i64 = 1;
pub const LEADER_ID: i64 = 2;
pub const ADMIN_ID: i64 = 3;
pub const OUTSIDER_ID: i64 = 4;
pub const TENDER_ID: i64 = 7;
pub const MAIL_DOMAIN: &str = "test.example.com";

/// A message the fake accepted (or rejected), decoded
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub access_token: String,
    pub thread_id: Option<String>,
    pub message: String,
}

impl SentRequest {
    /// Header lines of the top-level message
    pub fn headers(&self) -> Vec<String> {
        let (head, _) = self.message.split_once("\r\n\r\n").unwrap();
        head.split("\r\n").map(str::to_string).collect()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        let prefix = format!("{}: ", name);
        self.headers()
            .into_iter()
            .find_map(|h| h.strip_prefix(&prefix).map(str::to_string))
    }
}

#[derive(Default)]
struct FakeState {
    sends: Vec<SentRequest>,
    send_script: VecDeque<Result<(), ApiError>>,
    next_id: u32,
    labels: HashMap<String, Vec<Label>>,
    list_calls: usize,
    created: Vec<(String, String)>,
    /// Labels another client creates just before ours, keyed by name
    conflicts: HashMap<String, (String, Label)>,
    modified: Vec<(String, String, Vec<String>)>,
    searches: Vec<(String, String)>,
    search_results: HashMap<String, Result<Vec<MessageRef>, ApiError>>,
    refresh_error: Option<ApiError>,
    refresh_calls: Vec<String>,
}

/// In-memory Gmail: one mailbox per access token
#[derive(Default)]
pub struct FakeGmail {
    state: Mutex<FakeState>,
}

impl FakeGmail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next send fail with `error` (sends succeed once the script runs out)
    pub fn fail_next_send(&self, error: ApiError) {
        self.state.lock().unwrap().send_script.push_back(Err(error));
    }

    pub fn succeed_next_send(&self) {
        self.state.lock().unwrap().send_script.push_back(Ok(()));
    }

    /// Creating `name` answers 409, as if another client created it first
    ///
    /// The label only shows up in listings once the conflict has happened.
    pub fn conflict_on_create(&self, access_token: &str, name: &str, existing_id: &str) {
        let label = Label {
            id: existing_id.to_string(),
            name: name.to_string(),
            label_type: Some("user".to_string()),
        };
        self.state
            .lock()
            .unwrap()
            .conflicts
            .insert(name.to_string(), (access_token.to_string(), label));
    }

    pub fn set_search_result(&self, access_token: &str, result: Result<Vec<MessageRef>, ApiError>) {
        self.state
            .lock()
            .unwrap()
            .search_results
            .insert(access_token.to_string(), result);
    }

    pub fn fail_refresh(&self, error: ApiError) {
        self.state.lock().unwrap().refresh_error = Some(error);
    }

    pub fn sends(&self) -> Vec<SentRequest> {
        self.state.lock().unwrap().sends.clone()
    }

    pub fn created_labels(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn modified(&self) -> Vec<(String, String, Vec<String>)> {
        self.state.lock().unwrap().modified.clone()
    }

    pub fn searches(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().searches.clone()
    }

    pub fn refresh_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().refresh_calls.clone()
    }
}

impl GmailApi for FakeGmail {
    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.refresh_calls.push(refresh_token.to_string());
        if let Some(error) = state.refresh_error.clone() {
            return Err(error);
        }
        Ok(TokenResponse {
            access_token: format!("refreshed-{}", refresh_token),
            refresh_token: None,
            expires_in: Some(3600),
            token_type: Some("Bearer".to_string()),
        })
    }

    fn send_message(
        &self,
        access_token: &str,
        request: &SendMessageRequest,
    ) -> Result<SentMessageResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        let message = String::from_utf8(BASE64_URL_SAFE_NO_PAD.decode(&request.raw).unwrap()).unwrap();
        state.sends.push(SentRequest {
            access_token: access_token.to_string(),
            thread_id: request.thread_id.clone(),
            message,
        });

        if let Some(Err(error)) = state.send_script.pop_front() {
            return Err(error);
        }

        state.next_id += 1;
        let id = state.next_id;
        Ok(SentMessageResponse {
            id: format!("msg-{}", id),
            thread_id: Some(
                request
                    .thread_id
                    .clone()
                    .unwrap_or_else(|| format!("thread-{}", id)),
            ),
            label_ids: vec!["SENT".to_string()],
        })
    }

    fn list_labels(&self, access_token: &str) -> Result<Vec<Label>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        Ok(state.labels.get(access_token).cloned().unwrap_or_default())
    }

    fn create_label(&self, access_token: &str, name: &str) -> Result<Label, ApiError> {
        let mut state = self.state.lock().unwrap();
        if let Some((owner, label)) = state.conflicts.remove(name) {
            state.labels.entry(owner).or_default().push(label);
            return Err(ApiError::status(409, "Label name exists or conflicts"));
        }
        state.created.push((access_token.to_string(), name.to_string()));
        let label = Label {
            id: format!("Label_{}", state.created.len()),
            name: name.to_string(),
            label_type: Some("user".to_string()),
        };
        state
            .labels
            .entry(access_token.to_string())
            .or_default()
            .push(label.clone());
        Ok(label)
    }

    fn modify_message(
        &self,
        access_token: &str,
        message_id: &str,
        add_label_ids: &[String],
    ) -> Result<(), ApiError> {
        self.state.lock().unwrap().modified.push((
            access_token.to_string(),
            message_id.to_string(),
            add_label_ids.to_vec(),
        ));
        Ok(())
    }

    fn search_messages(
        &self,
        access_token: &str,
        query: &str,
        _max_results: u32,
    ) -> Result<Vec<MessageRef>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state
            .searches
            .push((access_token.to_string(), query.to_string()));
        state
            .search_results
            .get(access_token)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Holds dispatched tasks until `run_all` is called
#[derive(Default)]
pub struct QueueDispatcher {
    queue: Mutex<VecDeque<(String, Task)>>,
    refusing: AtomicBool,
}

impl QueueDispatcher {
    /// While set, every dispatch fails and the task is dropped
    pub fn refuse_tasks(&self, refuse: bool) {
        self.refusing.store(refuse, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn names(&self) -> Vec<String> {
        self.queue
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Run queued tasks, including any they dispatch, until none remain
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.queue.lock().unwrap().pop_front();
            let Some((_, task)) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, name: &str, task: Task) -> anyhow::Result<()> {
        if self.refusing.load(Ordering::SeqCst) {
            anyhow::bail!("no capacity for {}", name);
        }
        self.queue
            .lock()
            .unwrap()
            .push_back((name.to_string(), task));
        Ok(())
    }
}

/// A service wired against fakes, with a seeded directory
pub struct Harness {
    pub store: Arc<InMemoryOutboxStore>,
    pub gmail: Arc<FakeGmail>,
    pub dispatcher: Arc<QueueDispatcher>,
    pub service: EmailService,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn production() -> Self {
        Self::with_settings(|settings| settings.environment = Environment::Production)
    }

    pub fn with_settings(configure: impl FnOnce(&mut OutboxSettings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("templates");
        let uploads = dir.path().join("uploads");
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::create_dir_all(&uploads).unwrap();

        std::fs::write(
            templates.join("t1.hbs"),
            "<p>Hello from {{data.senderName}}</p>",
        )
        .unwrap();
        std::fs::write(
            templates.join("tender.hbs"),
            "<p>{{data.tenderName}} ({{data.teamName}})</p>",
        )
        .unwrap();

        let store = Arc::new(seeded_store());
        let gmail = Arc::new(FakeGmail::new());
        let dispatcher = Arc::new(QueueDispatcher::default());

        let mut settings = OutboxSettings {
            mail_domain: MAIL_DOMAIN.to_string(),
            uploads_root: uploads,
            templates_dir: templates.clone(),
            label_settle_delay: Duration::ZERO,
            database_path: dir.path().join("unused.sqlite"),
            ..OutboxSettings::default()
        };
        configure(&mut settings);

        let transport = GmailTransport::new(gmail.clone(), store.clone(), settings.label_settle_delay);
        let service = EmailService::new(
            store.clone(),
            store.clone(),
            transport,
            Arc::new(HandlebarsRenderer::new(templates)),
            dispatcher.clone(),
            settings,
        )
        .unwrap();

        Self {
            store,
            gmail,
            dispatcher,
            service,
            dir,
        }
    }

    pub fn uploads(&self) -> std::path::PathBuf {
        self.dir.path().join("uploads")
    }

    /// Give `user_id` a connected mailbox with a fresh token
    pub fn connect(&self, user_id: i64, email: &str, token: &str) {
        self.store
            .save_credential(
                Credential::new(user_id, email, token)
                    .with_refresh_token(format!("refresh-{}", user_id))
                    .with_expires_at(Utc::now() + chrono::Duration::hours(1)),
            )
            .unwrap();
    }
}

fn seeded_store() -> InMemoryOutboxStore {
    let store = InMemoryOutboxStore::new();
    store.add_team(1, "AC");
    store.add_team(2, "Accounts");
    store.add_role(10, "Admin");
    store.add_role(11, "Team Leader");

    store.add_user(DirectoryUser::new(SENDER_ID, "Sam Sender", "sam@example.com").with_team(1));
    store.add_user(DirectoryUser::new(LEADER_ID, "Lee Leader", "lee@example.com").with_team(1));
    store.add_user(DirectoryUser::new(ADMIN_ID, "Ana Admin", "ana@example.com").with_team(1));
    store.add_user(DirectoryUser::new(OUTSIDER_ID, "Oz Outsider", "oz@example.com").with_team(2));
    store.assign_role(LEADER_ID, 11);
    store.assign_role(ADMIN_ID, 10);

    store.add_tender(TenderInfo {
        id: TENDER_ID,
        team_id: 1,
        name: "Road Works".to_string(),
    });

    store
        .save_credential(
            Credential::new(SENDER_ID, "sam@example.com", "tok-sam")
                .with_refresh_token("refresh-sam")
                .with_expires_at(Utc::now() + chrono::Duration::hours(1)),
        )
        .unwrap();

    store
}
