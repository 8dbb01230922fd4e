use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::operation::UnknownVariant;

/// A per-user data table under maintenance. Every variant carries `id`, `user_id`, `created_at`
/// and `deleted_at` columns.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagedTable {
	UserSessions,
	UserPreferences,
	UserActivityLogs,
	UserConversations,
	UserMemory,
	UserEmbeddings,
}
impl ManagedTable {
	pub const ALL: [Self; 6] = [
		Self::UserSessions,
		Self::UserPreferences,
		Self::UserActivityLogs,
		Self::UserConversations,
		Self::UserMemory,
		Self::UserEmbeddings,
	];

	pub const fn name(self) -> &'static str {
		match self {
			Self::UserSessions => "user_sessions",
			Self::UserPreferences => "user_preferences",
			Self::UserActivityLogs => "user_activity_logs",
			Self::UserConversations => "user_conversations",
			Self::UserMemory => "user_memory",
			Self::UserEmbeddings => "user_embeddings",
		}
	}

	/// Name of the read view that hides soft-deleted rows.
	pub const fn active_view(self) -> &'static str {
		match self {
			Self::UserSessions => "active_user_sessions",
			Self::UserPreferences => "active_user_preferences",
			Self::UserActivityLogs => "active_user_activity_logs",
			Self::UserConversations => "active_user_conversations",
			Self::UserMemory => "active_user_memory",
			Self::UserEmbeddings => "active_user_embeddings",
		}
	}
}
impl fmt::Display for ManagedTable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}
impl FromStr for ManagedTable {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|table| table.name() == s.trim())
			.ok_or_else(|| UnknownVariant { kind: "managed table", value: s.to_string() })
	}
}
