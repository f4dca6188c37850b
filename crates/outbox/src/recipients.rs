//! Recipient resolution
//!
//! Turns recipient descriptors into concrete addresses using the directory.
//! Role names and team names are loaded once when the resolver is built;
//! a restart is the only way to pick up new roles or renamed teams.

use anyhow::{Context, Result};
use log::{info, warn};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use crate::models::RecipientSource;
use crate::storage::Directory;

static EMAIL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

pub const TEAM_LEADER_ROLE: &str = "Team Leader";
pub const ADMIN_ROLE: &str = "Admin";
pub const COORDINATOR_ROLE: &str = "Coordinator";

/// Team whose admin is copied on money-related mail
pub const ACCOUNTS_TEAM: &str = "Accounts";

/// Whether `email` has the `local@domain.tld` shape
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_SHAPE.is_match(email)
}

pub struct RecipientResolver {
    directory: Arc<dyn Directory>,
    /// role name -> role ID
    roles: HashMap<String, i64>,
    /// team ID -> team name
    teams: HashMap<i64, String>,
}

impl RecipientResolver {
    /// Build a resolver, loading the role and team lookups
    pub fn load(directory: Arc<dyn Directory>) -> Result<Self> {
        let roles: HashMap<String, i64> = directory
            .list_roles()
            .context("Failed to load roles")?
            .into_iter()
            .map(|role| (role.name, role.id))
            .collect();

        let teams: HashMap<i64, String> = directory
            .list_teams()
            .context("Failed to load teams")?
            .into_iter()
            .map(|team| (team.id, team.name))
            .collect();

        info!("Loaded {} roles, {} teams", roles.len(), teams.len());

        Ok(Self {
            directory,
            roles,
            teams,
        })
    }

    /// Resolve every source and merge the results
    ///
    /// Duplicates (exact string match) are dropped; first occurrence wins.
    pub fn resolve_all(&self, sources: &[RecipientSource]) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut emails = Vec::new();

        for source in sources {
            for email in self.resolve(source)? {
                if seen.insert(email.clone()) {
                    emails.push(email);
                }
            }
        }

        Ok(emails)
    }

    /// Resolve a single source
    pub fn resolve(&self, source: &RecipientSource) -> Result<Vec<String>> {
        match source {
            RecipientSource::User { user_id } => self.email_for_user(*user_id),
            RecipientSource::Role { role, team_id } => self.emails_for_role(role, *team_id),
            RecipientSource::Emails { emails } => Ok(emails
                .iter()
                .filter(|email| is_valid_email(email))
                .cloned()
                .collect()),
        }
    }

    /// The active user's address, or nothing
    pub fn email_for_user(&self, user_id: i64) -> Result<Vec<String>> {
        let user = self.directory.get_user(user_id)?;
        Ok(user
            .filter(|u| u.is_active)
            .map(|u| u.email)
            .into_iter()
            .collect())
    }

    /// Active holders of `role` whose primary team is `team_id`
    pub fn emails_for_role(&self, role: &str, team_id: i64) -> Result<Vec<String>> {
        let Some(role_id) = self.roles.get(role) else {
            warn!("Role not found: {}", role);
            return Ok(Vec::new());
        };

        self.directory.active_emails_by_role(*role_id, team_id)
    }

    pub fn team_name(&self, team_id: i64) -> String {
        self.teams
            .get(&team_id)
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn team_leader(&self, team_id: i64) -> Result<Option<String>> {
        self.first_for_role(TEAM_LEADER_ROLE, team_id)
    }

    pub fn team_admin(&self, team_id: i64) -> Result<Option<String>> {
        self.first_for_role(ADMIN_ROLE, team_id)
    }

    pub fn team_coordinator(&self, team_id: i64) -> Result<Option<String>> {
        self.first_for_role(COORDINATOR_ROLE, team_id)
    }

    /// Admin of the tender's team plus the Accounts team admin
    pub fn both_admins(&self, tender_team_id: i64) -> Result<Vec<String>> {
        let accounts_team = self
            .teams
            .iter()
            .find(|(_, name)| name.as_str() == ACCOUNTS_TEAM)
            .map(|(id, _)| *id);

        let mut admins = Vec::new();
        if let Some(admin) = self.team_admin(tender_team_id)? {
            admins.push(admin);
        }
        if let Some(team_id) = accounts_team
            && let Some(admin) = self.team_admin(team_id)?
            && !admins.contains(&admin)
        {
            admins.push(admin);
        }

        Ok(admins)
    }

    fn first_for_role(&self, role: &str, team_id: i64) -> Result<Option<String>> {
        Ok(self.emails_for_role(role, team_id)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DirectoryUser;
    use crate::storage::InMemoryOutboxStore;

    fn directory() -> Arc<InMemoryOutboxStore> {
        let store = InMemoryOutboxStore::new();
        store.add_team(1, "AC");
        store.add_team(2, ACCOUNTS_TEAM);
        store.add_role(10, ADMIN_ROLE);
        store.add_role(11, TEAM_LEADER_ROLE);

        store.add_user(DirectoryUser::new(1, "Asha", "asha@example.com").with_team(1));
        store.add_user(DirectoryUser::new(2, "Ben", "ben@example.com").with_team(1));
        store.add_user(DirectoryUser::new(3, "Cy", "cy@example.com").with_team(1).inactive());
        store.add_user(DirectoryUser::new(4, "Dee", "dee@example.com").with_team(2));

        store.assign_role(1, 10);
        store.assign_role(2, 11);
        store.assign_role(3, 11);
        store.assign_role(4, 10);
        Arc::new(store)
    }

    fn resolver() -> RecipientResolver {
        RecipientResolver::load(directory()).unwrap()
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last+tag@sub.example.co.in"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("a@nodot"));
        assert!(!is_valid_email("a b@x.com"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_resolve_each_source_kind() {
        let resolver = resolver();

        assert_eq!(
            resolver.resolve(&RecipientSource::user(1)).unwrap(),
            vec!["asha@example.com"]
        );
        assert!(resolver.resolve(&RecipientSource::user(3)).unwrap().is_empty());
        assert!(resolver.resolve(&RecipientSource::user(99)).unwrap().is_empty());

        // Inactive leader (user 3) is excluded
        assert_eq!(
            resolver.resolve(&RecipientSource::role(TEAM_LEADER_ROLE, 1)).unwrap(),
            vec!["ben@example.com"]
        );
        assert!(
            resolver
                .resolve(&RecipientSource::role("Astronaut", 1))
                .unwrap()
                .is_empty()
        );

        assert_eq!(
            resolver
                .resolve(&RecipientSource::emails(["ok@x.com", "broken", "also ok@x.com"]))
                .unwrap(),
            vec!["ok@x.com"]
        );
    }

    #[test]
    fn test_resolve_all_dedups_overlaps() {
        let resolver = resolver();
        let sources = vec![
            RecipientSource::user(1),
            RecipientSource::role(ADMIN_ROLE, 1),
            RecipientSource::emails(["asha@example.com", "ASHA@example.com"]),
        ];

        // Dedup is case-sensitive
        assert_eq!(
            resolver.resolve_all(&sources).unwrap(),
            vec!["asha@example.com", "ASHA@example.com"]
        );
    }

    #[test]
    fn test_role_helpers() {
        let resolver = resolver();

        assert_eq!(resolver.team_name(1), "AC");
        assert_eq!(resolver.team_name(42), "Unknown");
        assert_eq!(resolver.team_leader(1).unwrap().as_deref(), Some("ben@example.com"));
        assert_eq!(resolver.team_coordinator(1).unwrap(), None);
        assert_eq!(
            resolver.both_admins(1).unwrap(),
            vec!["asha@example.com", "dee@example.com"]
        );
        // Accounts' own admin is not listed twice
        assert_eq!(resolver.both_admins(2).unwrap(), vec!["dee@example.com"]);
    }

    #[test]
    fn test_lookups_are_loaded_once() {
        let directory = directory();
        let resolver = RecipientResolver::load(directory.clone()).unwrap();

        directory.add_role(12, COORDINATOR_ROLE);
        directory.assign_role(2, 12);

        // Role added after load stays unknown until a reload
        assert_eq!(resolver.team_coordinator(1).unwrap(), None);
        let reloaded = RecipientResolver::load(directory).unwrap();
        assert_eq!(
            reloaded.team_coordinator(1).unwrap().as_deref(),
            Some("ben@example.com")
        );
    }
}
