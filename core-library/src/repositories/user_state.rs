//! Per-user item state repository
//!
//! Rows are keyed by `(user_id, item_id)`. Every write bumps `version`;
//! [`UserStateRepository::save_merged`] only succeeds against the version it
//! read, so a direct user action racing a sync merge is never overwritten
//! silently.

use crate::error::{LibraryError, Result};
use crate::models::{ItemId, UserId, UserItemState};
use async_trait::async_trait;
use sqlx::{query_as, FromRow, SqlitePool};

/// User state repository interface
#[async_trait]
pub trait UserStateRepository: Send + Sync {
    /// Find the state for a user and item
    async fn find(&self, user_id: &UserId, item_id: &ItemId) -> Result<Option<UserItemState>>;

    /// Insert or unconditionally overwrite a state row
    async fn upsert(&self, state: &UserItemState) -> Result<()>;

    /// Write a merged state if nobody else wrote since it was read
    ///
    /// A state with `version == 0` is inserted only if no row exists yet;
    /// otherwise the row is updated only if its version still equals
    /// `state.version`.
    ///
    /// # Returns
    /// - `Ok(true)` if the write was applied
    /// - `Ok(false)` if a concurrent write won; re-read and merge again
    async fn save_merged(&self, state: &UserItemState) -> Result<bool>;

    /// Record a direct favorite toggle and stamp `favorite_action_at`
    async fn set_favorite(
        &self,
        user_id: &UserId,
        item_id: &ItemId,
        is_favorite: bool,
        at: i64,
    ) -> Result<UserItemState>;

    /// Record a direct rating change and stamp `rating_action_at`
    async fn set_rating(
        &self,
        user_id: &UserId,
        item_id: &ItemId,
        rating: Option<f64>,
        at: i64,
    ) -> Result<UserItemState>;

    /// All states a user marked favorite
    async fn favorites(&self, user_id: &UserId) -> Result<Vec<UserItemState>>;

    /// Count states for a user
    async fn count_for_user(&self, user_id: &UserId) -> Result<i64>;
}

/// SQLite implementation of UserStateRepository
pub struct SqliteUserStateRepository {
    pool: SqlitePool,
}

impl SqliteUserStateRepository {
    /// Create a new SQLite user state repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn require(&self, user_id: &UserId, item_id: &ItemId) -> Result<UserItemState> {
        self.find(user_id, item_id)
            .await?
            .ok_or_else(|| LibraryError::NotFound {
                entity_type: "UserItemState".to_string(),
                id: format!("{}:{}", user_id, item_id),
            })
    }
}

#[derive(Debug, FromRow)]
struct UserItemStateRow {
    user_id: String,
    item_id: String,
    is_favorite: bool,
    user_rating: Option<f64>,
    play_count: i64,
    position_seconds: i64,
    duration_seconds: Option<i64>,
    played_percentage: f64,
    played_at: Option<i64>,
    last_played_at: Option<i64>,
    favorite_action_at: Option<i64>,
    rating_action_at: Option<i64>,
    updated_at: i64,
    version: i64,
}

impl TryFrom<UserItemStateRow> for UserItemState {
    type Error = LibraryError;

    fn try_from(row: UserItemStateRow) -> Result<Self> {
        Ok(UserItemState {
            user_id: UserId::from_string(&row.user_id)
                .map_err(|e| LibraryError::invalid("user_id", e.to_string()))?,
            item_id: ItemId::from_string(&row.item_id)
                .map_err(|e| LibraryError::invalid("item_id", e.to_string()))?,
            is_favorite: row.is_favorite,
            user_rating: row.user_rating,
            play_count: row.play_count,
            position_seconds: row.position_seconds,
            duration_seconds: row.duration_seconds,
            played_percentage: row.played_percentage,
            played_at: row.played_at,
            last_played_at: row.last_played_at,
            favorite_action_at: row.favorite_action_at,
            rating_action_at: row.rating_action_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

fn validate(state: &UserItemState) -> Result<()> {
    if state.play_count < 0 {
        return Err(LibraryError::invalid("play_count", "cannot be negative"));
    }
    if !(0.0..=100.0).contains(&state.played_percentage) {
        return Err(LibraryError::invalid(
            "played_percentage",
            format!("{} is outside 0-100", state.played_percentage),
        ));
    }
    Ok(())
}

#[async_trait]
impl UserStateRepository for SqliteUserStateRepository {
    async fn find(&self, user_id: &UserId, item_id: &ItemId) -> Result<Option<UserItemState>> {
        let row = query_as::<_, UserItemStateRow>(
            "SELECT * FROM user_item_state WHERE user_id = ? AND item_id = ?",
        )
        .bind(user_id.to_string())
        .bind(item_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserItemState::try_from).transpose()
    }

    async fn upsert(&self, state: &UserItemState) -> Result<()> {
        validate(state)?;

        sqlx::query(
            r#"
            INSERT INTO user_item_state (
                user_id, item_id, is_favorite, user_rating,
                play_count, position_seconds, duration_seconds, played_percentage,
                played_at, last_played_at, favorite_action_at, rating_action_at,
                updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
            ON CONFLICT(user_id, item_id) DO UPDATE SET
                is_favorite = excluded.is_favorite,
                user_rating = excluded.user_rating,
                play_count = excluded.play_count,
                position_seconds = excluded.position_seconds,
                duration_seconds = excluded.duration_seconds,
                played_percentage = excluded.played_percentage,
                played_at = excluded.played_at,
                last_played_at = excluded.last_played_at,
                favorite_action_at = excluded.favorite_action_at,
                rating_action_at = excluded.rating_action_at,
                updated_at = excluded.updated_at,
                version = user_item_state.version + 1
            "#,
        )
        .bind(state.user_id.to_string())
        .bind(state.item_id.to_string())
        .bind(state.is_favorite)
        .bind(state.user_rating)
        .bind(state.play_count)
        .bind(state.position_seconds)
        .bind(state.duration_seconds)
        .bind(state.played_percentage)
        .bind(state.played_at)
        .bind(state.last_played_at)
        .bind(state.favorite_action_at)
        .bind(state.rating_action_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_merged(&self, state: &UserItemState) -> Result<bool> {
        validate(state)?;

        let result = if state.version == 0 {
            sqlx::query(
                r#"
                INSERT INTO user_item_state (
                    user_id, item_id, is_favorite, user_rating,
                    play_count, position_seconds, duration_seconds, played_percentage,
                    played_at, last_played_at, favorite_action_at, rating_action_at,
                    updated_at, version
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
                ON CONFLICT(user_id, item_id) DO NOTHING
                "#,
            )
            .bind(state.user_id.to_string())
            .bind(state.item_id.to_string())
            .bind(state.is_favorite)
            .bind(state.user_rating)
            .bind(state.play_count)
            .bind(state.position_seconds)
            .bind(state.duration_seconds)
            .bind(state.played_percentage)
            .bind(state.played_at)
            .bind(state.last_played_at)
            .bind(state.favorite_action_at)
        .bind(state.rating_action_at)
            .bind(state.updated_at)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE user_item_state SET
                    is_favorite = ?, user_rating = ?,
                    play_count = ?, position_seconds = ?, duration_seconds = ?,
                    played_percentage = ?, played_at = ?, last_played_at = ?,
                    favorite_action_at = ?, rating_action_at = ?, updated_at = ?,
                    version = version + 1
                WHERE user_id = ? AND item_id = ? AND version = ?
                "#,
            )
            .bind(state.is_favorite)
            .bind(state.user_rating)
            .bind(state.play_count)
            .bind(state.position_seconds)
            .bind(state.duration_seconds)
            .bind(state.played_percentage)
            .bind(state.played_at)
            .bind(state.last_played_at)
            .bind(state.favorite_action_at)
        .bind(state.rating_action_at)
            .bind(state.updated_at)
            .bind(state.user_id.to_string())
            .bind(state.item_id.to_string())
            .bind(state.version)
            .execute(&self.pool)
            .await?
        };

        Ok(result.rows_affected() == 1)
    }

    async fn set_favorite(
        &self,
        user_id: &UserId,
        item_id: &ItemId,
        is_favorite: bool,
        at: i64,
    ) -> Result<UserItemState> {
        sqlx::query(
            r#"
            INSERT INTO user_item_state (
                user_id, item_id, is_favorite, favorite_action_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, 1)
            ON CONFLICT(user_id, item_id) DO UPDATE SET
                is_favorite = excluded.is_favorite,
                favorite_action_at = excluded.favorite_action_at,
                updated_at = excluded.updated_at,
                version = user_item_state.version + 1
            "#,
        )
        .bind(user_id.to_string())
        .bind(item_id.to_string())
        .bind(is_favorite)
        .bind(at)
        .bind(at)
        .execute(&self.pool)
        .await?;

        self.require(user_id, item_id).await
    }

    async fn set_rating(
        &self,
        user_id: &UserId,
        item_id: &ItemId,
        rating: Option<f64>,
        at: i64,
    ) -> Result<UserItemState> {
        if rating.is_some_and(|r| !r.is_finite() || r < 0.0) {
            return Err(LibraryError::invalid("user_rating", "must be a non-negative number"));
        }

        sqlx::query(
            r#"
            INSERT INTO user_item_state (
                user_id, item_id, user_rating, rating_action_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, 1)
            ON CONFLICT(user_id, item_id) DO UPDATE SET
                user_rating = excluded.user_rating,
                rating_action_at = excluded.rating_action_at,
                updated_at = excluded.updated_at,
                version = user_item_state.version + 1
            "#,
        )
        .bind(user_id.to_string())
        .bind(item_id.to_string())
        .bind(rating)
        .bind(at)
        .bind(at)
        .execute(&self.pool)
        .await?;

        self.require(user_id, item_id).await
    }

    async fn favorites(&self, user_id: &UserId) -> Result<Vec<UserItemState>> {
        let rows = query_as::<_, UserItemStateRow>(
            "SELECT * FROM user_item_state WHERE user_id = ? AND is_favorite = 1 ORDER BY updated_at DESC",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserItemState::try_from).collect()
    }

    async fn count_for_user(&self, user_id: &UserId) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_item_state WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{CanonicalItem, CanonicalItemData, ClientLinkage, ItemKind};
    use crate::repositories::{CatalogRepository, SqliteCatalogRepository};
    use bridge_traits::ClientId;

    async fn setup() -> (SqliteUserStateRepository, ItemId) {
        let pool = create_test_pool().await.unwrap();
        let catalog = SqliteCatalogRepository::new(pool.clone());
        let item = CanonicalItem::from_data(CanonicalItemData::new(ItemKind::Movie, "Alpha"), None, 0);
        let linkage = ClientLinkage::new(item.id, ClientId::new("jf"), "123", vec![], 0);
        catalog.create(&item, &linkage).await.unwrap();
        (SqliteUserStateRepository::new(pool), item.id)
    }

    #[tokio::test]
    async fn test_upsert_never_duplicates() {
        let (repo, item_id) = setup().await;
        let user = UserId::new();

        let mut state = UserItemState::new(user, item_id, 100);
        state.play_count = 1;
        repo.upsert(&state).await.unwrap();

        state.play_count = 2;
        repo.upsert(&state).await.unwrap();

        assert_eq!(repo.count_for_user(&user).await.unwrap(), 1);
        let found = repo.find(&user, &item_id).await.unwrap().unwrap();
        assert_eq!(found.play_count, 2);
        assert_eq!(found.version, 2);
    }

    #[tokio::test]
    async fn test_save_merged_detects_concurrent_write() {
        let (repo, item_id) = setup().await;
        let user = UserId::new();

        let fresh = UserItemState::new(user, item_id, 100);
        assert!(repo.save_merged(&fresh).await.unwrap());
        // Second insert of a never-stored state loses
        assert!(!repo.save_merged(&fresh).await.unwrap());

        let mut read = repo.find(&user, &item_id).await.unwrap().unwrap();
        assert_eq!(read.version, 1);

        repo.set_favorite(&user, &item_id, true, 200).await.unwrap();

        read.play_count = 3;
        assert!(!repo.save_merged(&read).await.unwrap());

        let mut reread = repo.find(&user, &item_id).await.unwrap().unwrap();
        assert!(reread.is_favorite);
        reread.play_count = 3;
        assert!(repo.save_merged(&reread).await.unwrap());

        let stored = repo.find(&user, &item_id).await.unwrap().unwrap();
        assert_eq!(stored.play_count, 3);
        assert!(stored.is_favorite);
        assert_eq!(stored.version, 3);
    }

    #[tokio::test]
    async fn test_direct_actions_stamp_their_own_field() {
        let (repo, item_id) = setup().await;
        let user = UserId::new();

        let state = repo.set_favorite(&user, &item_id, true, 500).await.unwrap();
        assert!(state.is_favorite);
        assert_eq!(state.favorite_action_at, Some(500));
        assert_eq!(state.rating_action_at, None);

        let state = repo.set_rating(&user, &item_id, Some(8.0), 600).await.unwrap();
        assert!(state.is_favorite);
        assert_eq!(state.user_rating, Some(8.0));
        assert_eq!(state.favorite_action_at, Some(500));
        assert_eq!(state.rating_action_at, Some(600));

        assert!(repo.set_rating(&user, &item_id, Some(-1.0), 700).await.is_err());
        assert_eq!(repo.favorites(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_percentage_rejected() {
        let (repo, item_id) = setup().await;
        let mut state = UserItemState::new(UserId::new(), item_id, 0);
        state.played_percentage = 140.0;

        let err = repo.upsert(&state).await.unwrap_err();
        assert!(matches!(err, LibraryError::InvalidInput { .. }));
    }
}
