//! Durable commands addressed to the control plane.
//!
//! When a subscription cannot be dispatched on this node, the failure is
//! recorded as a [`Command`] through a [`CommandRepository`]. Retrying is the
//! business of whoever consumes the command on the management side.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{error::CacheResult, types::SubscriptionId};

/// Tag describing what a command is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandTag {
    /// A subscription could not be dispatched.
    SubscriptionFailure,
}

/// Recipient of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRecipient {
    /// The management plane.
    ManagementApis,
    /// Gateway nodes.
    DataPlane,
}

/// A durable, addressed message.
///
/// `content` is an opaque serialized payload whose schema is determined by
/// the tags, e.g. [`SubscriptionFailurePayload`] for
/// [`CommandTag::SubscriptionFailure`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Command {
    /// Command identifier.
    #[builder(into)]
    pub id: String,
    /// Organization the command belongs to.
    #[builder(into)]
    pub organization_id: String,
    /// Environment the command belongs to.
    #[builder(into)]
    pub environment_id: String,
    /// Identifier of the emitting node.
    #[builder(into)]
    pub from: String,
    /// Recipient of the command.
    pub to: MessageRecipient,
    /// What the command is about.
    #[builder(default)]
    pub tags: BTreeSet<CommandTag>,
    /// Serialized payload.
    #[builder(into)]
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Time after which the command may be discarded.
    pub expired_at: DateTime<Utc>,
}

impl Command {
    /// Returns `true` if the command carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: CommandTag) -> bool {
        self.tags.contains(&tag)
    }
}

/// Payload of a [`CommandTag::SubscriptionFailure`] command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFailurePayload {
    /// The subscription that failed to dispatch.
    pub subscription_id: SubscriptionId,
    /// Human-readable failure cause.
    pub failure_cause: String,
}

/// Durable store for commands.
#[async_trait]
pub trait CommandRepository: Send + Sync {
    /// Persists a new command.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`](crate::CacheError) if the command could not be
    /// persisted.
    async fn create(&self, command: &Command) -> CacheResult<()>;
}

/// In-memory command repository, useful in tests and single-node setups.
#[derive(Debug, Default, Clone)]
pub struct MemoryCommandRepository {
    commands: Arc<RwLock<Vec<Command>>>,
}

impl MemoryCommandRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All commands created so far, in creation order.
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.commands.read().clone()
    }

    /// Number of commands created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.read().len()
    }

    /// Returns `true` if no command was created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CommandRepository for MemoryCommandRepository {
    #[tracing::instrument(skip(self, command), fields(command_id = %command.id))]
    async fn create(&self, command: &Command) -> CacheResult<()> {
        self.commands.write().push(command.clone());
        Ok(())
    }
}
