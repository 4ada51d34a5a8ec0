//! Decoded server replies and their canonical text form.
//!
//! Rendering is pure: every section is sorted so the same deployment always
//! yields the same bytes, whatever order the server listed things in.

use std::fmt::Write as _;

use mongodb::bson::{self, Document};
use serde::Deserialize;

use mongodrift_core::sampler::SampleError;

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(default)]
pub struct RoleRef {
    pub db: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UserEntry {
    pub db: String,
    pub user: String,
    pub roles: Vec<RoleRef>,
}

/// One `members[]` entry of `replSetGetConfig`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemberConfig {
    #[serde(rename = "_id")]
    pub id: i64,
    pub host: String,
    pub votes: f64,
    pub arbiter_only: bool,
    pub build_indexes: bool,
    pub hidden: bool,
    pub priority: f64,
}

/// One `members[]` entry of `replSetGetStatus`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemberStatus {
    #[serde(rename = "_id")]
    pub id: i64,
    pub name: String,
    pub state_str: String,
    pub health: f64,
    pub sync_source_host: String,
    pub syncing_to: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UsersInfoReply {
    users: Vec<UserEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplSetConfig {
    members: Vec<MemberConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplSetConfigReply {
    config: ReplSetConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplSetStatusReply {
    members: Vec<MemberStatus>,
}

/// Everything one sample captures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    pub databases: Vec<String>,
    pub users: Vec<UserEntry>,
    pub members: Vec<MemberConfig>,
    pub statuses: Vec<MemberStatus>,
}

impl Inventory {
    /// Assemble an inventory from raw command replies.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::Decode`] when a reply does not have the
    /// expected shape.
    pub fn from_replies(
        databases: Vec<String>,
        users_info: Document,
        repl_config: Document,
        repl_status: Document,
    ) -> Result<Self, SampleError> {
        let users: UsersInfoReply = decode("usersInfo", users_info)?;
        let config: ReplSetConfigReply = decode("replSetGetConfig", repl_config)?;
        let status: ReplSetStatusReply = decode("replSetGetStatus", repl_status)?;

        Ok(Self {
            databases,
            users: users.users,
            members: config.config.members,
            statuses: status.members,
        })
    }

    /// Canonical text: `DB`, `USER`/`USER_ROLE`, `SETTING`, `REPL_STAT`
    /// lines, each section sorted.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();

        let mut databases = self.databases.clone();
        databases.sort();
        for name in &databases {
            let _ = writeln!(out, "DB: {name}");
        }

        let mut users = self.users.clone();
        users.sort_by(|a, b| (&a.db, &a.user).cmp(&(&b.db, &b.user)));
        for user in &mut users {
            let _ = writeln!(out, "USER: db={}, user={}", user.db, user.user);
            user.roles.sort();
            for role in &user.roles {
                let _ = writeln!(
                    out,
                    "USER_ROLE: db={}, user={}, role={}/{}",
                    user.db, user.user, role.db, role.role
                );
            }
        }

        let mut members = self.members.clone();
        members.sort_by_key(|m| m.id);
        for m in &members {
            let _ = writeln!(
                out,
                "SETTING: id={}, host={}, vote={}, arbiterOnly={}, buildIndexes={}, hidden={}, priority={}",
                m.id,
                m.host,
                format_number(m.votes),
                m.arbiter_only,
                m.build_indexes,
                m.hidden,
                format_number(m.priority)
            );
        }

        let mut statuses = self.statuses.clone();
        statuses.sort_by_key(|s| s.id);
        for s in &statuses {
            let _ = writeln!(
                out,
                "REPL_STAT: id={}, name={}, state={}, health={}, syncSourceHost={}, syncingTo={}",
                s.id,
                s.name,
                s.state_str,
                format_number(s.health),
                s.sync_source_host,
                s.syncing_to
            );
        }

        out
    }
}

fn decode<T: serde::de::DeserializeOwned>(what: &str, doc: Document) -> Result<T, SampleError> {
    bson::from_document(doc).map_err(|e| SampleError::Decode {
        what: what.to_string(),
        message: e.to_string(),
    })
}

/// Whole numbers print without a fractional part (`1`, not `1.0`).
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
