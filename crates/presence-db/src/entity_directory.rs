//! `PostgreSQL` entity lookups.
//!
//! The `entities` table is owned by whatever registers students; this module
//! only reads it. Rows are mapped to [`Entity`] through [`EntityRow`].

use async_trait::async_trait;
use presence_types::{BadgeId, Entity, EntityId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DbError;
use crate::store::EntityDirectory;

/// Badge resolution against the `entities` table.
#[derive(Clone)]
pub struct PgEntityDirectory {
    pool: PgPool,
}

impl PgEntityDirectory {
    /// Create a directory bound to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntityDirectory for PgEntityDirectory {
    async fn resolve(&self, badge_id: &BadgeId) -> Result<Option<Entity>, DbError> {
        let row = sqlx::query_as::<_, EntityRow>(
            r"SELECT id, badge_id, name, department
              FROM entities
              WHERE badge_id = $1",
        )
        .bind(badge_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Entity::try_from).transpose()
    }
}

/// A row from the `entities` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntityRow {
    /// Entity UUID.
    pub id: Uuid,
    /// Badge identifier.
    pub badge_id: String,
    /// Display name.
    pub name: String,
    /// Department, if recorded.
    pub department: Option<String>,
}

impl TryFrom<EntityRow> for Entity {
    type Error = DbError;

    fn try_from(row: EntityRow) -> Result<Self, Self::Error> {
        let badge_id = BadgeId::parse(&row.badge_id)
            .ok_or_else(|| DbError::InvalidData(format!("entity {} has a blank badge", row.id)))?;
        Ok(Self {
            id: EntityId::from(row.id),
            badge_id,
            name: row.name,
            department: row.department,
        })
    }
}
