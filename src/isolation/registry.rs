//! Declarative table traits for entity-level isolation.
//!
//! Each table is described once by the columns it can be filtered on. The
//! policy generator derives the isolation strategy from that descriptor
//! instead of introspecting live columns on every boot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::schema::table_names;

/// How rows of a table relate to the current entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityIsolation {
    /// Participant join table filtered on its own entity column
    ParticipantSelf {
        /// Entity column on the participant table
        column: String,
    },
    /// Visible to every participant of the row's room
    SharedRoom {
        /// Room column
        room_column: String,
        /// Optional direct owner column, OR-ed in
        entity_column: Option<String>,
    },
    /// Visible to every participant of the row's message channel
    SharedChannel {
        /// Channel column
        channel_column: String,
        /// Optional direct owner column, OR-ed in
        entity_column: Option<String>,
    },
    /// Visible only to the entity named by the column
    DirectOwnership {
        /// Entity or author column
        column: String,
    },
    /// No entity filter
    None,
}

impl EntityIsolation {
    /// Column an index is built on for this strategy
    pub fn filter_column(&self) -> Option<&str> {
        match self {
            EntityIsolation::ParticipantSelf { column } => Some(column),
            EntityIsolation::SharedRoom { room_column, .. } => Some(room_column),
            EntityIsolation::SharedChannel { channel_column, .. } => Some(channel_column),
            EntityIsolation::DirectOwnership { column } => Some(column),
            EntityIsolation::None => None,
        }
    }
}

/// Which participant table a table's rows are joined through
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    /// Not a participant table
    None,
    /// Room participants
    Room,
    /// Message channel participants
    Channel,
}

/// Static descriptor of one table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableTraits {
    /// Table name
    pub name: String,
    /// Room-id column, if any
    pub room_column: Option<String>,
    /// Channel-id column, if any
    pub channel_column: Option<String>,
    /// Entity-id or author-id column, if any
    pub entity_column: Option<String>,
    /// Participant join table kind
    pub participant: ParticipantKind,
    /// Zero rows visible without a bound entity
    pub strict: bool,
}

impl TableTraits {
    /// Descriptor with no filter columns
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            room_column: None,
            channel_column: None,
            entity_column: None,
            participant: ParticipantKind::None,
            strict: false,
        }
    }

    /// Set the room column (builder pattern)
    pub fn room(mut self, column: impl Into<String>) -> Self {
        self.room_column = Some(column.into());
        self
    }

    /// Set the channel column (builder pattern)
    pub fn channel(mut self, column: impl Into<String>) -> Self {
        self.channel_column = Some(column.into());
        self
    }

    /// Set the entity/author column (builder pattern)
    pub fn entity(mut self, column: impl Into<String>) -> Self {
        self.entity_column = Some(column.into());
        self
    }

    /// Mark as a participant join table (builder pattern)
    pub fn participants(mut self, kind: ParticipantKind) -> Self {
        self.participant = kind;
        self
    }

    /// Mark as strict (builder pattern)
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Isolation strategy, in priority order: participant self-filter,
    /// shared room, shared channel, direct ownership.
    pub fn isolation(&self) -> EntityIsolation {
        if self.participant != ParticipantKind::None {
            if let Some(column) = &self.entity_column {
                return EntityIsolation::ParticipantSelf {
                    column: column.clone(),
                };
            }
        }
        if let Some(room_column) = &self.room_column {
            return EntityIsolation::SharedRoom {
                room_column: room_column.clone(),
                entity_column: self.entity_column.clone(),
            };
        }
        if let Some(channel_column) = &self.channel_column {
            return EntityIsolation::SharedChannel {
                channel_column: channel_column.clone(),
                entity_column: self.entity_column.clone(),
            };
        }
        if let Some(column) = &self.entity_column {
            return EntityIsolation::DirectOwnership {
                column: column.clone(),
            };
        }
        EntityIsolation::None
    }

    /// Check every identifier in the descriptor
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.name)?;
        for column in [&self.room_column, &self.channel_column, &self.entity_column]
            .into_iter()
            .flatten()
        {
            validate_identifier(column)?;
        }
        Ok(())
    }
}

/// Reject anything that is not a plain lowercase SQL identifier.
pub fn validate_identifier(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StoreError::Config(format!("Invalid SQL identifier: {name:?}")))
    }
}

/// Tables never touched by the policy installer
pub const EXCLUDED_TABLES: &[&str] = &[table_names::SERVERS];

/// Registry of table descriptors
#[derive(Clone, Debug, Default)]
pub struct TableRegistry {
    tables: BTreeMap<String, TableTraits>,
}

impl TableRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry describing the core tables
    pub fn with_core_tables() -> Self {
        use table_names::*;

        let mut registry = Self::new();
        let core = [
            TableTraits::new(PARTICIPANTS)
                .entity("entity_id")
                .room("room_id")
                .participants(ParticipantKind::Room),
            TableTraits::new(CHANNEL_PARTICIPANTS)
                .entity("entity_id")
                .channel("channel_id")
                .participants(ParticipantKind::Channel),
            TableTraits::new(ROOMS).room("id"),
            TableTraits::new(CHANNELS).channel("id"),
            TableTraits::new(ENTITIES),
            TableTraits::new(MEMORIES).room("room_id").entity("entity_id").strict(),
            TableTraits::new(LOGS).room("room_id").entity("entity_id").strict(),
            TableTraits::new(COMPONENTS).room("room_id").entity("entity_id").strict(),
            TableTraits::new(TASKS).room("room_id").entity("entity_id").strict(),
            TableTraits::new(MESSAGES).channel("channel_id").entity("author_id"),
        ];
        for traits in core {
            registry.tables.insert(traits.name.clone(), traits);
        }
        registry
    }

    /// Add or replace a descriptor
    pub fn register(&mut self, traits: TableTraits) -> Result<()> {
        traits.validate()?;
        self.tables.insert(traits.name.clone(), traits);
        Ok(())
    }

    /// Descriptor for `table`
    pub fn get(&self, table: &str) -> Option<&TableTraits> {
        self.tables.get(table)
    }

    /// Isolation strategy for `table`; unknown tables get none
    pub fn isolation_for(&self, table: &str) -> EntityIsolation {
        self.get(table)
            .map(TableTraits::isolation)
            .unwrap_or(EntityIsolation::None)
    }

    /// Whether `table` is strict
    pub fn is_strict(&self, table: &str) -> bool {
        self.get(table).is_some_and(|t| t.strict)
    }

    /// Registered descriptors in name order
    pub fn iter(&self) -> impl Iterator<Item = &TableTraits> {
        self.tables.values()
    }

    /// Number of registered tables
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_participant_table_filters_itself() {
        let registry = TableRegistry::with_core_tables();
        assert_eq!(
            registry.isolation_for("participants"),
            EntityIsolation::ParticipantSelf {
                column: "entity_id".to_string()
            }
        );
        assert_eq!(
            registry.isolation_for("channel_participants"),
            EntityIsolation::ParticipantSelf {
                column: "entity_id".to_string()
            }
        );
    }

    #[test]
    fn test_room_column_wins_over_entity_column() {
        let registry = TableRegistry::with_core_tables();
        assert_eq!(
            registry.isolation_for("memories"),
            EntityIsolation::SharedRoom {
                room_column: "room_id".to_string(),
                entity_column: Some("entity_id".to_string()),
            }
        );
        assert_eq!(
            registry.isolation_for("rooms"),
            EntityIsolation::SharedRoom {
                room_column: "id".to_string(),
                entity_column: None,
            }
        );
    }

    #[test]
    fn test_direct_ownership_and_unfiltered() {
        let owned = TableTraits::new("notes").entity("author_id");
        assert_eq!(
            owned.isolation(),
            EntityIsolation::DirectOwnership {
                column: "author_id".to_string()
            }
        );

        let registry = TableRegistry::with_core_tables();
        assert_eq!(registry.isolation_for("entities"), EntityIsolation::None);
        assert_eq!(registry.isolation_for("agents"), EntityIsolation::None);
    }

    #[test]
    fn test_strict_classification() {
        let registry = TableRegistry::with_core_tables();
        for table in ["memories", "logs", "components", "tasks"] {
            assert!(registry.is_strict(table), "{table} should be strict");
        }
        for table in ["rooms", "channels", "entities", "participants"] {
            assert!(!registry.is_strict(table), "{table} should be permissive");
        }
    }

    #[test]
    fn test_register_rejects_bad_identifiers() {
        let mut registry = TableRegistry::new();
        assert!(registry.register(TableTraits::new("ok_table").room("room_id")).is_ok());
        assert!(registry.register(TableTraits::new("bad; DROP")).is_err());
        assert!(registry
            .register(TableTraits::new("fine").entity("Entity\"Id"))
            .is_err());
        assert_eq!(registry.len(), 1);
    }
}
