//! # Identity Resolution
//!
//! Decides which canonical item a client's native item is written against.
//!
//! ## Overview
//!
//! For `(client_id, external_item_id, converted data)`:
//!
//! 1. An existing [`ClientLinkage`] wins. Empty fields on the linked item are
//!    filled from the incoming data; present fields are kept.
//! 2. Otherwise a trusted cross-reference id (checked in configured order)
//!    matching an item of the same kind gets a new linkage.
//! 3. Otherwise a new item and linkage are created.
//!
//! Parents are resolved the same way, outermost first, before the child.
//! Parents nobody has synced yet become placeholders.
//!
//! ## Concurrency
//!
//! Each find-or-create holds exclusive locks on every candidate key (the
//! linkage key plus each trusted cross-reference id), taken in sorted order.
//! Two runs that could land on the same item therefore serialize here, and
//! the second one finds what the first created.

use crate::factory::{ConvertedItem, ParentRef};
use crate::{Result, SyncError};
use bridge_traits::ClientId;
use core_library::repositories::{unclaimed_cross_refs, CatalogRepository};
use core_library::{
    CanonicalItem, CanonicalItemData, ClientLinkage, CrossRef, CrossRefSource, ItemId, LibraryError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, instrument};

// ============================================================================
// Keyed Locks
// ============================================================================

/// Exclusive async locks keyed by string, created on demand.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Holds a set of keyed locks until dropped.
pub struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Lock every key, in sorted order. Duplicate keys are locked once.
    pub async fn lock_all(&self, mut keys: Vec<String>) -> KeyedGuard<'_> {
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.entry(key).lock_owned().await);
        }

        KeyedGuard {
            owner: self,
            keys,
            guards,
        }
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        let mut locks = match self.owner.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        for key in &self.keys {
            // Only the map still references an idle lock
            if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(key);
            }
        }
    }
}

// ============================================================================
// Resolution Results
// ============================================================================

/// How an item was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Existing linkage for this client
    Linked,
    /// Existing item found by cross-reference id; new linkage written
    Matched,
    /// New item and linkage
    Created,
}

#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub item: CanonicalItem,
    pub resolution: Resolution,
    /// Placeholder parents created on the way
    pub placeholders: Vec<CanonicalItem>,
}

struct Candidate<'a> {
    client_id: &'a ClientId,
    external_id: &'a str,
    data: &'a CanonicalItemData,
    parent_id: Option<ItemId>,
    external_parent_ids: &'a [String],
    as_placeholder: bool,
}

fn map_library_error(err: LibraryError) -> SyncError {
    if err.is_conflict() {
        SyncError::IdentityConflict(err.to_string())
    } else {
        SyncError::Persistence(err)
    }
}

// ============================================================================
// Identity Resolver
// ============================================================================

pub struct IdentityResolver {
    catalog: Arc<dyn CatalogRepository>,
    locks: KeyedLocks,
    trusted_sources: Vec<CrossRefSource>,
    create_missing_parents: bool,
}

impl IdentityResolver {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        trusted_sources: Vec<CrossRefSource>,
        create_missing_parents: bool,
    ) -> Self {
        Self {
            catalog,
            locks: KeyedLocks::new(),
            trusted_sources,
            create_missing_parents,
        }
    }

    /// Resolve a converted item and its parents.
    ///
    /// # Errors
    ///
    /// - `MissingParent` if a parent is unknown and placeholders are disabled
    /// - `IdentityConflict` if a unique constraint rejected a write
    /// - `Persistence` for any other repository failure
    /// - `Conversion` if the resulting record is invalid
    #[instrument(skip(self, converted), fields(client_id = %client_id, external_id = %converted.external_id))]
    pub async fn resolve(
        &self,
        client_id: &ClientId,
        converted: &ConvertedItem,
        now: i64,
    ) -> Result<ResolvedItem> {
        let mut placeholders = Vec::new();
        let mut parent_id = None;
        let mut ancestor_ids: Vec<String> = Vec::new();

        if let Some(parent) = &converted.parent {
            for link in parent.chain() {
                let resolved = self
                    .resolve_parent(client_id, link, parent_id, &ancestor_ids, now)
                    .await?;
                if resolved.resolution == Resolution::Created {
                    placeholders.push(resolved.item.clone());
                }
                parent_id = Some(resolved.item.id);
                ancestor_ids.push(link.external_id.clone());
            }
        }

        let (item, resolution) = self
            .resolve_candidate(
                Candidate {
                    client_id,
                    external_id: &converted.external_id,
                    data: &converted.data,
                    parent_id,
                    external_parent_ids: &ancestor_ids,
                    as_placeholder: false,
                },
                now,
            )
            .await?;

        Ok(ResolvedItem {
            item,
            resolution,
            placeholders,
        })
    }

    async fn resolve_parent(
        &self,
        client_id: &ClientId,
        parent: &ParentRef,
        parent_id: Option<ItemId>,
        ancestor_ids: &[String],
        now: i64,
    ) -> Result<ResolvedItem> {
        let data = parent.placeholder_data();
        let (item, resolution) = self
            .resolve_candidate(
                Candidate {
                    client_id,
                    external_id: &parent.external_id,
                    data: &data,
                    parent_id,
                    external_parent_ids: ancestor_ids,
                    as_placeholder: true,
                },
                now,
            )
            .await?;

        Ok(ResolvedItem {
            item,
            resolution,
            placeholders: Vec::new(),
        })
    }

    fn trusted_refs<'a>(&'a self, data: &'a CanonicalItemData) -> impl Iterator<Item = CrossRef> + 'a {
        self.trusted_sources.iter().filter_map(move |source| {
            data.cross_refs
                .get(*source)
                .map(|value| CrossRef::new(*source, value))
        })
    }

    fn lock_keys(&self, candidate: &Candidate<'_>) -> Vec<String> {
        let mut keys = vec![format!(
            "link:{}:{}",
            candidate.client_id, candidate.external_id
        )];
        keys.extend(self.trusted_refs(candidate.data).map(|cross_ref| {
            format!(
                "xref:{}:{}:{}",
                candidate.data.kind, cross_ref.source, cross_ref.value
            )
        }));
        keys
    }

    async fn resolve_candidate(
        &self,
        candidate: Candidate<'_>,
        now: i64,
    ) -> Result<(CanonicalItem, Resolution)> {
        let _guard = self.locks.lock_all(self.lock_keys(&candidate)).await;

        // 1. Linkage fast path
        if let Some(item) = self
            .catalog
            .find_by_client_external_id(candidate.client_id, candidate.external_id)
            .await
            .map_err(map_library_error)?
        {
            let item = self.fill_existing(item, &candidate, now).await?;
            self.catalog
                .touch_linkage(
                    candidate.client_id,
                    candidate.external_id,
                    candidate.external_parent_ids,
                    now,
                )
                .await
                .map_err(map_library_error)?;
            return Ok((item, Resolution::Linked));
        }

        // 2. Trusted cross-reference match
        for cross_ref in self.trusted_refs(candidate.data) {
            let Some(item) = self
                .catalog
                .find_by_cross_reference(candidate.data.kind, &cross_ref)
                .await
                .map_err(map_library_error)?
            else {
                continue;
            };

            debug!(
                item_id = %item.id,
                source = %cross_ref.source,
                "Matched by cross reference"
            );
            let linkage = ClientLinkage::new(
                item.id,
                candidate.client_id.clone(),
                candidate.external_id,
                candidate.external_parent_ids.to_vec(),
                now,
            );
            self.catalog.link(&linkage).await.map_err(map_library_error)?;
            let item = self.fill_existing(item, &candidate, now).await?;
            return Ok((item, Resolution::Matched));
        }

        // 3. Create
        let mut item = if candidate.as_placeholder {
            if !self.create_missing_parents {
                return Err(SyncError::MissingParent {
                    parent_kind: candidate.data.kind.to_string(),
                    external_id: candidate.external_id.to_string(),
                });
            }
            CanonicalItem::placeholder(candidate.data.clone(), candidate.parent_id, now)
        } else {
            CanonicalItem::from_data(candidate.data.clone(), candidate.parent_id, now)
        };
        item.validate()
            .map_err(|message| SyncError::conversion(item.kind.as_str(), message))?;
        item.cross_refs =
            unclaimed_cross_refs(self.catalog.as_ref(), &item.id, item.kind, &item.cross_refs)
                .await
                .map_err(map_library_error)?;

        let linkage = ClientLinkage::new(
            item.id,
            candidate.client_id.clone(),
            candidate.external_id,
            candidate.external_parent_ids.to_vec(),
            now,
        );
        self.catalog
            .create(&item, &linkage)
            .await
            .map_err(map_library_error)?;

        debug!(
            item_id = %item.id,
            kind = %item.kind,
            placeholder = item.is_placeholder,
            "Created canonical item"
        );
        Ok((item, Resolution::Created))
    }

    /// Fill empty fields of an existing item; present values are kept.
    async fn fill_existing(
        &self,
        mut item: CanonicalItem,
        candidate: &Candidate<'_>,
        now: i64,
    ) -> Result<CanonicalItem> {
        let mut incoming = candidate.data.clone();
        incoming.cross_refs =
            unclaimed_cross_refs(self.catalog.as_ref(), &item.id, item.kind, &incoming.cross_refs)
                .await
                .map_err(map_library_error)?;

        let parent_id = candidate.parent_id.filter(|parent| *parent != item.id);
        if item.fill_missing_from(&incoming, parent_id, candidate.as_placeholder) {
            item.updated_at = now;
            self.catalog.update(&item).await.map_err(map_library_error)?;
        }
        Ok(item)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::db::create_test_pool;
    use core_library::repositories::SqliteCatalogRepository;
    use core_library::{CrossRefs, ItemKind};

    async fn resolver(create_missing_parents: bool) -> (IdentityResolver, Arc<SqliteCatalogRepository>) {
        let pool = create_test_pool().await.unwrap();
        let catalog = Arc::new(SqliteCatalogRepository::new(pool));
        let resolver = IdentityResolver::new(
            catalog.clone(),
            CrossRefSource::ALL.to_vec(),
            create_missing_parents,
        );
        (resolver, catalog)
    }

    fn movie(external_id: &str, title: &str, imdb: Option<&str>) -> ConvertedItem {
        let mut refs = CrossRefs::default();
        if let Some(imdb) = imdb {
            refs.set(CrossRefSource::Imdb, imdb);
        }
        ConvertedItem::new(
            external_id,
            CanonicalItemData::new(ItemKind::Movie, title).with_cross_refs(refs),
        )
    }

    fn episode(external_id: &str) -> ConvertedItem {
        let series = ParentRef::new(ItemKind::Series, "s1", "Show");
        let season = ParentRef::new(ItemKind::Season, "se1", "Season 1").with_parent(series);
        let mut item = ConvertedItem::new(
            external_id,
            CanonicalItemData::new(ItemKind::Episode, format!("Episode {external_id}")),
        );
        item.parent = Some(season);
        item
    }

    #[tokio::test]
    async fn test_linkage_fast_path_is_idempotent() {
        let (resolver, catalog) = resolver(true).await;
        let client = ClientId::new("jf");

        let first = resolver.resolve(&client, &movie("1", "Alpha", None), 10).await.unwrap();
        let second = resolver.resolve(&client, &movie("1", "Alpha", None), 20).await.unwrap();

        assert_eq!(first.resolution, Resolution::Created);
        assert_eq!(second.resolution, Resolution::Linked);
        assert_eq!(first.item.id, second.item.id);
        assert_eq!(catalog.count().await.unwrap(), 1);
        assert_eq!(catalog.count_linkages().await.unwrap(), 1);

        let linkage = catalog.find_linkage(&client, "1").await.unwrap().unwrap();
        assert_eq!(linkage.last_seen_at, 20);
    }

    #[tokio::test]
    async fn test_cross_reference_match_keeps_first_title() {
        let (resolver, catalog) = resolver(true).await;

        let a = resolver
            .resolve(&ClientId::new("a"), &movie("123", "Alpha", Some("tt001")), 10)
            .await
            .unwrap();
        let b = resolver
            .resolve(
                &ClientId::new("b"),
                &movie("999", "Alpha (Director's Cut)", Some("tt001")),
                20,
            )
            .await
            .unwrap();

        assert_eq!(b.resolution, Resolution::Matched);
        assert_eq!(a.item.id, b.item.id);
        assert_eq!(b.item.title, "Alpha");
        assert_eq!(catalog.count().await.unwrap(), 1);
        assert_eq!(catalog.linkages_for_item(&a.item.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_untrusted_source_is_not_matched() {
        let pool = create_test_pool().await.unwrap();
        let catalog = Arc::new(SqliteCatalogRepository::new(pool));
        let resolver = IdentityResolver::new(catalog.clone(), vec![CrossRefSource::Tmdb], true);

        resolver
            .resolve(&ClientId::new("a"), &movie("1", "Alpha", Some("tt001")), 10)
            .await
            .unwrap();
        let second = resolver
            .resolve(&ClientId::new("b"), &movie("2", "Alpha", Some("tt001")), 20)
            .await
            .unwrap();

        // The second item cannot claim the id, but is still created
        assert_eq!(second.resolution, Resolution::Created);
        assert!(second.item.cross_refs.imdb.is_none());
        assert_eq!(catalog.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_parents_are_created_once_as_placeholders() {
        let (resolver, catalog) = resolver(true).await;
        let client = ClientId::new("jf");

        let first = resolver.resolve(&client, &episode("e1"), 10).await.unwrap();
        assert_eq!(first.placeholders.len(), 2);
        assert_eq!(first.placeholders[0].kind, ItemKind::Series);
        assert!(first.placeholders.iter().all(|p| p.is_placeholder));

        let second = resolver.resolve(&client, &episode("e2"), 20).await.unwrap();
        assert!(second.placeholders.is_empty());
        assert_eq!(first.item.parent_id, second.item.parent_id);

        assert_eq!(catalog.count_by_kind(ItemKind::Series).await.unwrap(), 1);
        assert_eq!(catalog.count_by_kind(ItemKind::Season).await.unwrap(), 1);

        let season = catalog
            .find_by_id(&first.item.parent_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        let season_link = catalog.find_linkage(&client, "se1").await.unwrap().unwrap();
        assert_eq!(season_link.external_parent_ids, vec!["s1"]);
        assert!(season.parent_id.is_some());
    }

    #[tokio::test]
    async fn test_parent_sync_fills_placeholder() {
        let (resolver, catalog) = resolver(true).await;
        let client = ClientId::new("jf");

        let episode = resolver.resolve(&client, &episode("e1"), 10).await.unwrap();
        let season_id = episode.item.parent_id.unwrap();

        let mut season_data = CanonicalItemData::new(ItemKind::Season, "Season 1");
        season_data.description = Some("The first season".to_string());
        let mut season = ConvertedItem::new("se1", season_data);
        season.parent = Some(ParentRef::new(ItemKind::Series, "s1", "Show"));

        let resolved = resolver.resolve(&client, &season, 20).await.unwrap();
        assert_eq!(resolved.resolution, Resolution::Linked);
        assert_eq!(resolved.item.id, season_id);
        assert!(!resolved.item.is_placeholder);
        assert_eq!(resolved.item.description.as_deref(), Some("The first season"));
        assert_eq!(catalog.count_by_kind(ItemKind::Season).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_parent_when_placeholders_disabled() {
        let (resolver, catalog) = resolver(false).await;

        let result = resolver.resolve(&ClientId::new("jf"), &episode("e1"), 10).await;
        assert!(matches!(result, Err(SyncError::MissingParent { .. })));
        assert_eq!(catalog.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_creates_one_item() {
        let (resolver, catalog) = resolver(true).await;
        let resolver = Arc::new(resolver);

        let mut handles = Vec::new();
        for client in ["a", "b", "c", "d"] {
            let resolver = resolver.clone();
            handles.push(tokio::spawn(async move {
                resolver
                    .resolve(
                        &ClientId::new(client),
                        &movie(&format!("{client}-1"), "Alpha", Some("tt001")),
                        10,
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(catalog.count().await.unwrap(), 1);
        assert_eq!(catalog.count_linkages().await.unwrap(), 4);
        assert!(resolver.locks.is_empty());
    }

    #[tokio::test]
    async fn test_keyed_locks_dedupe_and_clean_up() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks
                .lock_all(vec!["b".to_string(), "a".to_string(), "b".to_string()])
                .await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }
}
