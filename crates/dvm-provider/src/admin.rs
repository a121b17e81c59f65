//! Admin control surface.
//!
//! Out-of-band operator commands: rebroadcast the service announcements,
//! publish updated profile metadata, adjust requester balances. Commands run
//! at startup when configured, or on receipt of an authenticated admin
//! message; anything from a key outside the admin set is rejected and never
//! executed.

use dvm_protocol::{Event, EventTemplate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("unauthorized admin command from {0}")]
    Unauthorized(String),

    #[error("malformed admin command: {0}")]
    Malformed(String),
}

/// Public profile metadata (kind 0 content).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Lightning address shown to zappers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
}

impl Profile {
    /// Build the kind-0 metadata event.
    pub fn to_template(&self, created_at: u64) -> EventTemplate {
        let content = serde_json::to_string(self).unwrap_or_default();
        EventTemplate::new(created_at, dvm_protocol::kinds::KIND_METADATA, vec![], content)
    }
}

/// One operator command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Re-publish every registered task's announcement; idempotent.
    RebroadcastAnnouncement,
    /// Publish updated profile metadata.
    UpdateProfile { profile: Profile },
    /// Credit (or debit, with negative delta) a requester's balance.
    AdjustBalance { pubkey: String, delta_sats: i64 },
}

/// What the engine should do at startup.
#[derive(Debug, Clone, Default)]
pub struct AdminConfig {
    /// Rebroadcast announcements on startup
    pub rebroadcast_announcement: bool,
    /// Publish the profile on startup
    pub update_profile: bool,
    /// Profile used by the startup publish
    pub profile: Profile,
    /// Keys allowed to issue runtime admin commands
    pub admin_pubkeys: Vec<String>,
}

impl AdminConfig {
    /// Commands to run before the engine starts listening.
    pub fn startup_commands(&self) -> Vec<AdminCommand> {
        let mut commands = Vec::new();
        if self.rebroadcast_announcement {
            commands.push(AdminCommand::RebroadcastAnnouncement);
        }
        if self.update_profile {
            commands.push(AdminCommand::UpdateProfile {
                profile: self.profile.clone(),
            });
        }
        commands
    }
}

/// Authenticate and decode a runtime admin message.
///
/// The signature is assumed checked by the transport; authorization here is
/// membership of the author key in the admin set.
pub fn parse_command(event: &Event, admins: &[String]) -> Result<AdminCommand, AdminError> {
    if !admins.iter().any(|a| a == &event.pubkey) {
        return Err(AdminError::Unauthorized(event.pubkey.clone()));
    }
    serde_json::from_str(&event.content).map_err(|e| AdminError::Malformed(e.to_string()))
}
