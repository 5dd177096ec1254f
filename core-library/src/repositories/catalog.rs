//! Catalog repository: canonical items, cross references and client linkages
//!
//! Cross-reference ids live in `item_cross_refs`, keyed by
//! `(kind, source, value)`. Writing an item claims its ids there; a claim
//! held by a different item is a [`LibraryError::Conflict`].

use crate::error::{LibraryError, Result};
use crate::models::{CanonicalItem, ClientLinkage, CrossRef, CrossRefs, ItemId, ItemKind};
use async_trait::async_trait;
use bridge_traits::ClientId;
use chrono::NaiveDate;
use sqlx::{query_as, FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

/// Catalog repository interface
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Find an item by its canonical ID
    async fn find_by_id(&self, id: &ItemId) -> Result<Option<CanonicalItem>>;

    /// Find the item a client's native id is linked to
    async fn find_by_client_external_id(
        &self,
        client_id: &ClientId,
        external_item_id: &str,
    ) -> Result<Option<CanonicalItem>>;

    /// Find the item holding a cross-reference id within a kind
    async fn find_by_cross_reference(
        &self,
        kind: ItemKind,
        cross_ref: &CrossRef,
    ) -> Result<Option<CanonicalItem>>;

    /// Insert a new item together with its first linkage
    ///
    /// Item, cross references and linkage are written atomically.
    ///
    /// # Errors
    /// - `Conflict` if a cross-reference id or the linkage is already taken
    async fn create(&self, item: &CanonicalItem, linkage: &ClientLinkage) -> Result<()>;

    /// Update an existing item and claim any new cross-reference ids
    ///
    /// # Errors
    /// - `NotFound` if the item does not exist
    /// - `Conflict` if a cross-reference id belongs to another item
    async fn update(&self, item: &CanonicalItem) -> Result<()>;

    /// Link a client's native id to an existing item
    ///
    /// # Errors
    /// - `Conflict` if the `(client_id, external_item_id)` pair is already linked
    async fn link(&self, linkage: &ClientLinkage) -> Result<()>;

    /// Record that a linked item was seen again
    async fn touch_linkage(
        &self,
        client_id: &ClientId,
        external_item_id: &str,
        external_parent_ids: &[String],
        seen_at: i64,
    ) -> Result<()>;

    /// Find a linkage by its key
    async fn find_linkage(
        &self,
        client_id: &ClientId,
        external_item_id: &str,
    ) -> Result<Option<ClientLinkage>>;

    /// All linkages pointing at an item
    async fn linkages_for_item(&self, item_id: &ItemId) -> Result<Vec<ClientLinkage>>;

    /// The item currently holding a cross-reference id, if any
    async fn cross_ref_owner(&self, kind: ItemKind, cross_ref: &CrossRef) -> Result<Option<ItemId>>;

    /// Direct children of an item, ordered by index number
    async fn children(&self, parent_id: &ItemId) -> Result<Vec<CanonicalItem>>;

    /// Count all items
    async fn count(&self) -> Result<i64>;

    /// Count items of one kind
    async fn count_by_kind(&self, kind: ItemKind) -> Result<i64>;

    /// Count all linkages
    async fn count_linkages(&self) -> Result<i64>;
}

/// SQLite implementation of CatalogRepository
pub struct SqliteCatalogRepository {
    pool: SqlitePool,
}

impl SqliteCatalogRepository {
    /// Create a new SQLite catalog repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

#[derive(Debug, FromRow)]
struct CanonicalItemRow {
    id: String,
    kind: String,
    title: String,
    sort_title: Option<String>,
    description: Option<String>,
    release_date: Option<String>,
    year: Option<i32>,
    genres: String,
    artwork_url: Option<String>,
    community_rating: Option<f64>,
    critic_rating: Option<f64>,
    official_rating: Option<String>,
    runtime_seconds: Option<i64>,
    index_number: Option<i32>,
    parent_id: Option<String>,
    imdb_id: Option<String>,
    tmdb_id: Option<String>,
    tvdb_id: Option<String>,
    musicbrainz_id: Option<String>,
    smart_criteria: Option<String>,
    is_placeholder: bool,
    created_at: i64,
    updated_at: i64,
}

fn parse_item_id(field: &str, value: &str) -> Result<ItemId> {
    ItemId::from_string(value).map_err(|e| LibraryError::invalid(field, e.to_string()))
}

impl TryFrom<CanonicalItemRow> for CanonicalItem {
    type Error = LibraryError;

    fn try_from(row: CanonicalItemRow) -> Result<Self> {
        let kind = ItemKind::parse(&row.kind)
            .ok_or_else(|| LibraryError::invalid("kind", format!("unknown kind {}", row.kind)))?;

        let release_date = row
            .release_date
            .as_deref()
            .map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d"))
            .transpose()
            .map_err(|e| LibraryError::invalid("release_date", e.to_string()))?;

        let parent_id = row
            .parent_id
            .as_deref()
            .map(|p| parse_item_id("parent_id", p))
            .transpose()?;

        Ok(CanonicalItem {
            id: parse_item_id("id", &row.id)?,
            kind,
            title: row.title,
            sort_title: row.sort_title,
            description: row.description,
            release_date,
            year: row.year,
            genres: serde_json::from_str(&row.genres)?,
            artwork_url: row.artwork_url,
            community_rating: row.community_rating,
            critic_rating: row.critic_rating,
            official_rating: row.official_rating,
            runtime_seconds: row.runtime_seconds,
            index_number: row.index_number,
            parent_id,
            cross_refs: CrossRefs {
                imdb: row.imdb_id,
                tmdb: row.tmdb_id,
                tvdb: row.tvdb_id,
                musicbrainz: row.musicbrainz_id,
            },
            smart_criteria: row.smart_criteria,
            is_placeholder: row.is_placeholder,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LinkageRow {
    client_id: String,
    external_item_id: String,
    item_id: String,
    external_parent_ids: String,
    created_at: i64,
    last_seen_at: i64,
}

impl TryFrom<LinkageRow> for ClientLinkage {
    type Error = LibraryError;

    fn try_from(row: LinkageRow) -> Result<Self> {
        Ok(ClientLinkage {
            item_id: parse_item_id("item_id", &row.item_id)?,
            client_id: ClientId::new(row.client_id),
            external_item_id: row.external_item_id,
            external_parent_ids: serde_json::from_str(&row.external_parent_ids)?,
            created_at: row.created_at,
            last_seen_at: row.last_seen_at,
        })
    }
}

fn rows_to_items(rows: Vec<CanonicalItemRow>) -> Result<Vec<CanonicalItem>> {
    rows.into_iter().map(CanonicalItem::try_from).collect()
}

// ============================================================================
// Statement Helpers
// ============================================================================

fn validate(item: &CanonicalItem) -> Result<()> {
    item.validate()
        .map_err(|msg| LibraryError::invalid("canonical_item", msg))
}

async fn insert_item(conn: &mut SqliteConnection, item: &CanonicalItem) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO canonical_items (
            id, kind, title, sort_title, description,
            release_date, year, genres, artwork_url,
            community_rating, critic_rating, official_rating,
            runtime_seconds, index_number, parent_id,
            imdb_id, tmdb_id, tvdb_id, musicbrainz_id,
            smart_criteria, is_placeholder, created_at, updated_at
        ) VALUES (
            ?, ?, ?, ?, ?,
            ?, ?, ?, ?,
            ?, ?, ?,
            ?, ?, ?,
            ?, ?, ?, ?,
            ?, ?, ?, ?
        )
        "#,
    )
    .bind(item.id.to_string())
    .bind(item.kind.as_str())
    .bind(&item.title)
    .bind(&item.sort_title)
    .bind(&item.description)
    .bind(item.release_date.map(|d| d.format("%Y-%m-%d").to_string()))
    .bind(item.year)
    .bind(serde_json::to_string(&item.genres)?)
    .bind(&item.artwork_url)
    .bind(item.community_rating)
    .bind(item.critic_rating)
    .bind(&item.official_rating)
    .bind(item.runtime_seconds)
    .bind(item.index_number)
    .bind(item.parent_id.map(|p| p.to_string()))
    .bind(&item.cross_refs.imdb)
    .bind(&item.cross_refs.tmdb)
    .bind(&item.cross_refs.tvdb)
    .bind(&item.cross_refs.musicbrainz)
    .bind(&item.smart_criteria)
    .bind(item.is_placeholder)
    .bind(item.created_at)
    .bind(item.updated_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Claim every cross-reference id of `item`, failing if one is held elsewhere.
async fn claim_cross_refs(conn: &mut SqliteConnection, item: &CanonicalItem) -> Result<()> {
    let item_id = item.id.to_string();

    for cross_ref in item.cross_refs.iter() {
        sqlx::query(
            r#"
            INSERT INTO item_cross_refs (kind, source, value, item_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(kind, source, value) DO NOTHING
            "#,
        )
        .bind(item.kind.as_str())
        .bind(cross_ref.source.as_str())
        .bind(&cross_ref.value)
        .bind(&item_id)
        .execute(&mut *conn)
        .await?;

        let owner: (String,) = sqlx::query_as(
            "SELECT item_id FROM item_cross_refs WHERE kind = ? AND source = ? AND value = ?",
        )
        .bind(item.kind.as_str())
        .bind(cross_ref.source.as_str())
        .bind(&cross_ref.value)
        .fetch_one(&mut *conn)
        .await?;

        if owner.0 != item_id {
            return Err(LibraryError::Conflict(format!(
                "{} id {} for {} already belongs to item {}",
                cross_ref.source, cross_ref.value, item.kind, owner.0
            )));
        }
    }

    Ok(())
}

async fn insert_linkage(conn: &mut SqliteConnection, linkage: &ClientLinkage) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO client_linkages (
            client_id, external_item_id, item_id,
            external_parent_ids, created_at, last_seen_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(linkage.client_id.as_str())
    .bind(&linkage.external_item_id)
    .bind(linkage.item_id.to_string())
    .bind(serde_json::to_string(&linkage.external_parent_ids)?)
    .bind(linkage.created_at)
    .bind(linkage.last_seen_at)
    .execute(conn)
    .await?;

    Ok(())
}

// ============================================================================
// Repository Implementation
// ============================================================================

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn find_by_id(&self, id: &ItemId) -> Result<Option<CanonicalItem>> {
        let row = query_as::<_, CanonicalItemRow>("SELECT * FROM canonical_items WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(CanonicalItem::try_from).transpose()
    }

    async fn find_by_client_external_id(
        &self,
        client_id: &ClientId,
        external_item_id: &str,
    ) -> Result<Option<CanonicalItem>> {
        let row = query_as::<_, CanonicalItemRow>(
            r#"
            SELECT ci.* FROM canonical_items ci
            JOIN client_linkages l ON l.item_id = ci.id
            WHERE l.client_id = ? AND l.external_item_id = ?
            "#,
        )
        .bind(client_id.as_str())
        .bind(external_item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CanonicalItem::try_from).transpose()
    }

    async fn find_by_cross_reference(
        &self,
        kind: ItemKind,
        cross_ref: &CrossRef,
    ) -> Result<Option<CanonicalItem>> {
        let row = query_as::<_, CanonicalItemRow>(
            r#"
            SELECT ci.* FROM canonical_items ci
            JOIN item_cross_refs x ON x.item_id = ci.id
            WHERE x.kind = ? AND x.source = ? AND x.value = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(cross_ref.source.as_str())
        .bind(&cross_ref.value)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CanonicalItem::try_from).transpose()
    }

    async fn create(&self, item: &CanonicalItem, linkage: &ClientLinkage) -> Result<()> {
        validate(item)?;
        if linkage.item_id != item.id {
            return Err(LibraryError::invalid(
                "linkage",
                "linkage must point at the item being created",
            ));
        }

        let mut tx = self.pool.begin().await?;
        insert_item(&mut tx, item).await?;
        claim_cross_refs(&mut tx, item).await?;
        insert_linkage(&mut tx, linkage).await?;
        tx.commit().await?;

        debug!(item_id = %item.id, kind = %item.kind, client_id = %linkage.client_id, "Created canonical item");
        Ok(())
    }

    async fn update(&self, item: &CanonicalItem) -> Result<()> {
        validate(item)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE canonical_items SET
                title = ?, sort_title = ?, description = ?,
                release_date = ?, year = ?, genres = ?, artwork_url = ?,
                community_rating = ?, critic_rating = ?, official_rating = ?,
                runtime_seconds = ?, index_number = ?, parent_id = ?,
                imdb_id = ?, tmdb_id = ?, tvdb_id = ?, musicbrainz_id = ?,
                smart_criteria = ?, is_placeholder = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&item.title)
        .bind(&item.sort_title)
        .bind(&item.description)
        .bind(item.release_date.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(item.year)
        .bind(serde_json::to_string(&item.genres)?)
        .bind(&item.artwork_url)
        .bind(item.community_rating)
        .bind(item.critic_rating)
        .bind(&item.official_rating)
        .bind(item.runtime_seconds)
        .bind(item.index_number)
        .bind(item.parent_id.map(|p| p.to_string()))
        .bind(&item.cross_refs.imdb)
        .bind(&item.cross_refs.tmdb)
        .bind(&item.cross_refs.tvdb)
        .bind(&item.cross_refs.musicbrainz)
        .bind(&item.smart_criteria)
        .bind(item.is_placeholder)
        .bind(item.updated_at)
        .bind(item.id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "CanonicalItem".to_string(),
                id: item.id.to_string(),
            });
        }

        claim_cross_refs(&mut tx, item).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn link(&self, linkage: &ClientLinkage) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_linkage(&mut conn, linkage).await?;

        debug!(
            item_id = %linkage.item_id,
            client_id = %linkage.client_id,
            external_item_id = %linkage.external_item_id,
            "Linked client item"
        );
        Ok(())
    }

    async fn touch_linkage(
        &self,
        client_id: &ClientId,
        external_item_id: &str,
        external_parent_ids: &[String],
        seen_at: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE client_linkages SET external_parent_ids = ?, last_seen_at = ?
            WHERE client_id = ? AND external_item_id = ?
            "#,
        )
        .bind(serde_json::to_string(external_parent_ids)?)
        .bind(seen_at)
        .bind(client_id.as_str())
        .bind(external_item_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "ClientLinkage".to_string(),
                id: format!("{}:{}", client_id, external_item_id),
            });
        }

        Ok(())
    }

    async fn find_linkage(
        &self,
        client_id: &ClientId,
        external_item_id: &str,
    ) -> Result<Option<ClientLinkage>> {
        let row = query_as::<_, LinkageRow>(
            "SELECT * FROM client_linkages WHERE client_id = ? AND external_item_id = ?",
        )
        .bind(client_id.as_str())
        .bind(external_item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ClientLinkage::try_from).transpose()
    }

    async fn linkages_for_item(&self, item_id: &ItemId) -> Result<Vec<ClientLinkage>> {
        let rows = query_as::<_, LinkageRow>(
            "SELECT * FROM client_linkages WHERE item_id = ? ORDER BY created_at, client_id",
        )
        .bind(item_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ClientLinkage::try_from).collect()
    }

    async fn cross_ref_owner(&self, kind: ItemKind, cross_ref: &CrossRef) -> Result<Option<ItemId>> {
        let owner: Option<(String,)> = sqlx::query_as(
            "SELECT item_id FROM item_cross_refs WHERE kind = ? AND source = ? AND value = ?",
        )
        .bind(kind.as_str())
        .bind(cross_ref.source.as_str())
        .bind(&cross_ref.value)
        .fetch_optional(&self.pool)
        .await?;

        owner.map(|(id,)| parse_item_id("item_id", &id)).transpose()
    }

    async fn children(&self, parent_id: &ItemId) -> Result<Vec<CanonicalItem>> {
        let rows = query_as::<_, CanonicalItemRow>(
            "SELECT * FROM canonical_items WHERE parent_id = ? ORDER BY index_number, title",
        )
        .bind(parent_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows_to_items(rows)
    }

    async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM canonical_items")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    async fn count_by_kind(&self, kind: ItemKind) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM canonical_items WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    async fn count_linkages(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM client_linkages")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }
}

/// Cross references of `item` that no other item claims yet.
///
/// Used before merging incoming ids into an existing item, so a stale or
/// shared id reported by one client does not block the rest of the update.
pub async fn unclaimed_cross_refs(
    repo: &dyn CatalogRepository,
    item_id: &ItemId,
    kind: ItemKind,
    incoming: &CrossRefs,
) -> Result<CrossRefs> {
    let mut free = incoming.clone();
    for cross_ref in incoming.iter() {
        match repo.cross_ref_owner(kind, &cross_ref).await? {
            Some(owner) if owner != *item_id => free.clear(cross_ref.source),
            _ => {}
        }
    }
    Ok(free)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{CanonicalItemData, CrossRefSource};

    fn client(id: &str) -> ClientId {
        ClientId::new(id)
    }

    fn movie(title: &str, imdb: &str) -> CanonicalItem {
        let data = CanonicalItemData::new(ItemKind::Movie, title)
            .with_cross_refs(CrossRefs::default().with(CrossRefSource::Imdb, imdb));
        CanonicalItem::from_data(data, None, 1_700_000_000)
    }

    async fn create_linked(
        repo: &SqliteCatalogRepository,
        item: &CanonicalItem,
        client_id: &str,
        external: &str,
    ) {
        let linkage = ClientLinkage::new(item.id, client(client_id), external, vec![], 1_700_000_000);
        repo.create(item, &linkage).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_and_find_by_linkage() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCatalogRepository::new(pool);
        let item = movie("Alpha", "tt001");

        create_linked(&repo, &item, "jf", "123").await;

        let found = repo
            .find_by_client_external_id(&client("jf"), "123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, item);

        assert!(repo
            .find_by_client_external_id(&client("plex"), "123")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_by_cross_reference_is_scoped_by_kind() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCatalogRepository::new(pool);

        let tmdb = CrossRefs::default().with(CrossRefSource::Tmdb, "42");
        let film = CanonicalItem::from_data(
            CanonicalItemData::new(ItemKind::Movie, "Film").with_cross_refs(tmdb.clone()),
            None,
            0,
        );
        let show = CanonicalItem::from_data(
            CanonicalItemData::new(ItemKind::Series, "Show").with_cross_refs(tmdb),
            None,
            0,
        );

        create_linked(&repo, &film, "jf", "f1").await;
        create_linked(&repo, &show, "jf", "s1").await;

        let key = CrossRef::new(CrossRefSource::Tmdb, "42");
        let found = repo.find_by_cross_reference(ItemKind::Series, &key).await.unwrap();
        assert_eq!(found.map(|i| i.id), Some(show.id));
        let found = repo.find_by_cross_reference(ItemKind::Movie, &key).await.unwrap();
        assert_eq!(found.map(|i| i.id), Some(film.id));
    }

    #[tokio::test]
    async fn test_duplicate_cross_reference_is_conflict() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCatalogRepository::new(pool);

        create_linked(&repo, &movie("Alpha", "tt001"), "jf", "123").await;

        let duplicate = movie("Alpha copy", "tt001");
        let linkage = ClientLinkage::new(duplicate.id, client("plex"), "999", vec![], 0);
        let err = repo.create(&duplicate, &linkage).await.unwrap_err();
        assert!(err.is_conflict(), "unexpected error: {err}");

        // Rolled back as a whole
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.count_linkages().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_linkage_is_conflict() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCatalogRepository::new(pool);
        let item = movie("Alpha", "tt001");
        create_linked(&repo, &item, "jf", "123").await;

        let again = ClientLinkage::new(item.id, client("jf"), "123", vec![], 5);
        assert!(repo.link(&again).await.unwrap_err().is_conflict());

        let other = ClientLinkage::new(item.id, client("plex"), "999", vec![], 5);
        repo.link(&other).await.unwrap();
        assert_eq!(repo.linkages_for_item(&item.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_claims_new_cross_refs() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCatalogRepository::new(pool);
        let mut item = movie("Alpha", "tt001");
        create_linked(&repo, &item, "jf", "123").await;

        item.cross_refs.set(CrossRefSource::Tmdb, "77");
        item.year = Some(2001);
        repo.update(&item).await.unwrap();

        let found = repo
            .find_by_cross_reference(ItemKind::Movie, &CrossRef::new(CrossRefSource::Tmdb, "77"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.year, Some(2001));

        let other = movie("Beta", "tt002");
        create_linked(&repo, &other, "jf", "456").await;

        let mut stolen = other.clone();
        stolen.cross_refs.set(CrossRefSource::Tmdb, "77");
        assert!(repo.update(&stolen).await.unwrap_err().is_conflict());

        let free = unclaimed_cross_refs(&repo, &other.id, ItemKind::Movie, &stolen.cross_refs)
            .await
            .unwrap();
        assert_eq!(free.get(CrossRefSource::Tmdb), None);
        assert_eq!(free.get(CrossRefSource::Imdb), Some("tt002"));
    }

    #[tokio::test]
    async fn test_update_missing_item() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCatalogRepository::new(pool);

        let err = repo.update(&movie("Ghost", "tt404")).await.unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_touch_linkage() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCatalogRepository::new(pool);
        let item = movie("Alpha", "tt001");
        create_linked(&repo, &item, "jf", "123").await;

        repo.touch_linkage(&client("jf"), "123", &["lib-1".to_string()], 1_800_000_000)
            .await
            .unwrap();

        let linkage = repo.find_linkage(&client("jf"), "123").await.unwrap().unwrap();
        assert_eq!(linkage.last_seen_at, 1_800_000_000);
        assert_eq!(linkage.created_at, 1_700_000_000);
        assert_eq!(linkage.external_parent_ids, vec!["lib-1".to_string()]);

        let err = repo
            .touch_linkage(&client("jf"), "nope", &[], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_children_and_counts() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCatalogRepository::new(pool);

        let series = CanonicalItem::from_data(CanonicalItemData::new(ItemKind::Series, "Show"), None, 0);
        create_linked(&repo, &series, "jf", "s").await;

        for i in (1..=3).rev() {
            let mut data = CanonicalItemData::new(ItemKind::Season, format!("Season {i}"));
            data.index_number = Some(i);
            let season = CanonicalItem::from_data(data, Some(series.id), 0);
            create_linked(&repo, &season, "jf", &format!("season-{i}")).await;
        }

        let children = repo.children(&series.id).await.unwrap();
        let numbers: Vec<_> = children.iter().map(|c| c.index_number).collect();
        assert_eq!(numbers, vec![Some(1), Some(2), Some(3)]);

        assert_eq!(repo.count_by_kind(ItemKind::Season).await.unwrap(), 3);
        assert_eq!(repo.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCatalogRepository::new(pool);

        let mut data = CanonicalItemData::new(ItemKind::Movie, "Alpha");
        data.release_date = NaiveDate::from_ymd_opt(1999, 3, 31);
        data.genres = vec!["Action".to_string(), "Sci-Fi".to_string()];
        data.community_rating = Some(8.7);
        data.runtime_seconds = Some(8160);
        let item = CanonicalItem::from_data(data, None, 10);
        create_linked(&repo, &item, "jf", "m").await;

        let found = repo.find_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(found.release_date, item.release_date);
        assert_eq!(found.genres, item.genres);
        assert_eq!(found.community_rating, Some(8.7));
        assert!(!found.is_placeholder);
    }
}
