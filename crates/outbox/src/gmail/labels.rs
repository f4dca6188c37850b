//! Hierarchical label management
//!
//! Gmail nests labels by name ("A/B" sits under "A"), so applying a path
//! makes sure every ancestor exists first. Label IDs are cached per user in
//! the store; the mailbox stays the source of truth.

use anyhow::{Context, Result};
use log::{debug, info};
use std::sync::Arc;

use super::GmailApi;
use super::api::Label;
use crate::models::{LabelBinding, label_ancestors};
use crate::storage::OutboxStore;

/// Finds, creates and applies labels in a user's mailbox
pub struct LabelManager {
    api: Arc<dyn GmailApi>,
    store: Arc<dyn OutboxStore>,
}

impl LabelManager {
    pub fn new(api: Arc<dyn GmailApi>, store: Arc<dyn OutboxStore>) -> Self {
        Self { api, store }
    }

    /// Resolve the label ID for `label_path`, creating missing levels
    ///
    /// Walks `A`, `A/B`, `A/B/C` in order. Each level comes from the cache,
    /// then from the mailbox's label list, then is created. A creation that
    /// conflicts with a concurrent creator falls back to a fresh lookup.
    pub fn ensure_label(&self, user_id: i64, access_token: &str, label_path: &str) -> Result<String> {
        let ancestors = label_ancestors(label_path);
        if ancestors.is_empty() {
            anyhow::bail!("Empty label path");
        }

        // Listed at most once per call, and only on a cache miss
        let mut remote: Option<Vec<Label>> = None;
        let mut label_id = String::new();

        for name in &ancestors {
            if let Some(binding) = self.store.get_label_binding(user_id, name)? {
                label_id = binding.label_id;
                continue;
            }

            if remote.is_none() {
                remote = Some(
                    self.api
                        .list_labels(access_token)
                        .context("Failed to list labels")?,
                );
            }

            let existing = remote
                .as_deref()
                .and_then(|labels| find_by_name(labels, name))
                .map(|label| label.id.clone());

            label_id = match existing {
                Some(id) => id,
                None => self.create_label(access_token, name)?,
            };

            self.store
                .save_label_binding(LabelBinding::new(user_id, name.as_str(), label_id.as_str()))?;
        }

        Ok(label_id)
    }

    /// Add `label_path` to a message in the user's mailbox
    pub fn apply_label(
        &self,
        user_id: i64,
        access_token: &str,
        message_id: &str,
        label_path: &str,
    ) -> Result<()> {
        let label_id = self.ensure_label(user_id, access_token, label_path)?;

        self.api
            .modify_message(access_token, message_id, &[label_id])
            .with_context(|| format!("Failed to apply label {} to {}", label_path, message_id))?;

        debug!("Applied label {} to message {} for user {}", label_path, message_id, user_id);
        Ok(())
    }

    fn create_label(&self, access_token: &str, name: &str) -> Result<String> {
        match self.api.create_label(access_token, name) {
            Ok(label) => {
                info!("Created label {}", name);
                Ok(label.id)
            }
            Err(e) if e.is_conflict() => {
                debug!("Label {} already exists, looking it up", name);
                let labels = self
                    .api
                    .list_labels(access_token)
                    .context("Failed to list labels after conflict")?;

                find_by_name(&labels, name)
                    .map(|label| label.id.clone())
                    .with_context(|| format!("Label {} conflicted but was not listed", name))
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("Failed to create label {}", name))),
        }
    }
}

fn find_by_name<'a>(labels: &'a [Label], name: &str) -> Option<&'a Label> {
    labels.iter().find(|label| label.name == name)
}
