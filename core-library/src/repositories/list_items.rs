//! Collection and playlist membership

use crate::error::{LibraryError, Result};
use crate::models::{ItemId, ListItem};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{query_as, FromRow, SqlitePool};
use std::collections::{HashMap, HashSet};

/// Outcome of replacing a list's members with a new snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDiff {
    pub added: usize,
    pub moved: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl ListDiff {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.moved == 0 && self.removed == 0
    }
}

/// List membership repository interface
#[async_trait]
pub trait ListItemRepository: Send + Sync {
    /// Replace the members of `list_id` with `members`, in order
    ///
    /// Duplicate entries keep their first position. Members no longer present
    /// are deleted; moved members get a history entry.
    async fn replace_members(&self, list_id: &ItemId, members: &[ItemId], at: i64)
        -> Result<ListDiff>;

    /// Members of a list, in order
    async fn members(&self, list_id: &ItemId) -> Result<Vec<ListItem>>;

    /// Count members of a list
    async fn count(&self, list_id: &ItemId) -> Result<i64>;
}

/// SQLite implementation of ListItemRepository
pub struct SqliteListItemRepository {
    pool: SqlitePool,
}

impl SqliteListItemRepository {
    /// Create a new SQLite list item repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ListItemRow {
    list_id: String,
    item_id: String,
    position: i64,
    last_changed: i64,
    change_history: String,
}

impl TryFrom<ListItemRow> for ListItem {
    type Error = LibraryError;

    fn try_from(row: ListItemRow) -> Result<Self> {
        Ok(ListItem {
            list_id: ItemId::from_string(&row.list_id)
                .map_err(|e| LibraryError::invalid("list_id", e.to_string()))?,
            item_id: ItemId::from_string(&row.item_id)
                .map_err(|e| LibraryError::invalid("item_id", e.to_string()))?,
            position: row.position,
            last_changed: row.last_changed,
            change_history: serde_json::from_str(&row.change_history)?,
        })
    }
}

#[async_trait]
impl ListItemRepository for SqliteListItemRepository {
    async fn replace_members(
        &self,
        list_id: &ItemId,
        members: &[ItemId],
        at: i64,
    ) -> Result<ListDiff> {
        let list_key = list_id.to_string();
        let mut tx = self.pool.begin().await?;

        let rows = query_as::<_, ListItemRow>("SELECT * FROM list_items WHERE list_id = ?")
            .bind(&list_key)
            .fetch_all(&mut *tx)
            .await?;

        let mut existing: HashMap<ItemId, ListItem> = rows
            .into_iter()
            .map(|row| ListItem::try_from(row).map(|item| (item.item_id, item)))
            .collect::<Result<_>>()?;

        let mut seen = HashSet::new();
        let mut diff = ListDiff::default();
        let mut position = 0i64;

        for item_id in members {
            if !seen.insert(*item_id) {
                continue;
            }

            match existing.remove(item_id) {
                Some(mut member) => {
                    if member.move_to(position, at) {
                        sqlx::query(
                            r#"
                            UPDATE list_items SET position = ?, last_changed = ?, change_history = ?
                            WHERE list_id = ? AND item_id = ?
                            "#,
                        )
                        .bind(member.position)
                        .bind(member.last_changed)
                        .bind(serde_json::to_string(&member.change_history)?)
                        .bind(&list_key)
                        .bind(item_id.to_string())
                        .execute(&mut *tx)
                        .await?;
                        diff.moved += 1;
                    } else {
                        diff.unchanged += 1;
                    }
                }
                None => {
                    let member = ListItem::added(*list_id, *item_id, position, at);
                    sqlx::query(
                        r#"
                        INSERT INTO list_items (list_id, item_id, position, last_changed, change_history)
                        VALUES (?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&list_key)
                    .bind(item_id.to_string())
                    .bind(member.position)
                    .bind(member.last_changed)
                    .bind(serde_json::to_string(&member.change_history)?)
                    .execute(&mut *tx)
                    .await?;
                    diff.added += 1;
                }
            }

            position += 1;
        }

        for stale in existing.keys() {
            sqlx::query("DELETE FROM list_items WHERE list_id = ? AND item_id = ?")
                .bind(&list_key)
                .bind(stale.to_string())
                .execute(&mut *tx)
                .await?;
            diff.removed += 1;
        }

        tx.commit().await?;
        Ok(diff)
    }

    async fn members(&self, list_id: &ItemId) -> Result<Vec<ListItem>> {
        let rows = query_as::<_, ListItemRow>(
            "SELECT * FROM list_items WHERE list_id = ? ORDER BY position",
        )
        .bind(list_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ListItem::try_from).collect()
    }

    async fn count(&self, list_id: &ItemId) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM list_items WHERE list_id = ?")
            .bind(list_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }
}
