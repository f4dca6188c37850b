//! Read-only directory entities (users, roles, teams, tenders)

use serde::{Deserialize, Serialize};

/// A person known to the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub primary_team_id: Option<i64>,
}

impl DirectoryUser {
    pub fn new(id: i64, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            is_active: true,
            primary_team_id: None,
        }
    }

    pub fn with_team(mut self, team_id: i64) -> Self {
        self.primary_team_id = Some(team_id);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
}

/// The slice of a tender the mailer needs for labeling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderInfo {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
}
