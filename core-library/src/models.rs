//! Domain models for the canonical media catalog
//!
//! Three record families are kept apart:
//!
//! - [`CanonicalItem`]: one record per logical media item, whoever reported it
//! - [`ClientLinkage`]: the mapping from one client's native id to a canonical item
//! - [`UserItemState`]: per-user play state and preferences for a canonical item
//!
//! Collections and playlists additionally own [`ListItem`] rows.

use bridge_traits::ClientId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for a canonical item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a local user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Kinds and Cross References
// =============================================================================

/// Canonical item kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Movie,
    Series,
    Season,
    Episode,
    Artist,
    Album,
    Track,
    Collection,
    Playlist,
}

impl ItemKind {
    pub const ALL: [ItemKind; 9] = [
        ItemKind::Movie,
        ItemKind::Series,
        ItemKind::Season,
        ItemKind::Episode,
        ItemKind::Artist,
        ItemKind::Album,
        ItemKind::Track,
        ItemKind::Collection,
        ItemKind::Playlist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Movie => "movie",
            ItemKind::Series => "series",
            ItemKind::Season => "season",
            ItemKind::Episode => "episode",
            ItemKind::Artist => "artist",
            ItemKind::Album => "album",
            ItemKind::Track => "track",
            ItemKind::Collection => "collection",
            ItemKind::Playlist => "playlist",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ItemKind::ALL.iter().copied().find(|kind| kind.as_str() == s)
    }

    /// Whether this kind owns a member list.
    pub fn is_list(&self) -> bool {
        matches!(self, ItemKind::Collection | ItemKind::Playlist)
    }

    /// The kind of an item's direct container, if the kind has one.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_library::models::ItemKind;
    ///
    /// assert_eq!(ItemKind::Episode.parent_kind(), Some(ItemKind::Season));
    /// assert_eq!(ItemKind::Track.parent_kind(), Some(ItemKind::Album));
    /// assert_eq!(ItemKind::Movie.parent_kind(), None);
    /// ```
    pub fn parent_kind(&self) -> Option<ItemKind> {
        match self {
            ItemKind::Season => Some(ItemKind::Series),
            ItemKind::Episode => Some(ItemKind::Season),
            ItemKind::Album => Some(ItemKind::Artist),
            ItemKind::Track => Some(ItemKind::Album),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Third-party id namespace used to match items across clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossRefSource {
    Imdb,
    Tmdb,
    Tvdb,
    MusicBrainz,
}

impl CrossRefSource {
    /// Default trust order.
    pub const ALL: [CrossRefSource; 4] = [
        CrossRefSource::Imdb,
        CrossRefSource::Tmdb,
        CrossRefSource::Tvdb,
        CrossRefSource::MusicBrainz,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CrossRefSource::Imdb => "imdb",
            CrossRefSource::Tmdb => "tmdb",
            CrossRefSource::Tvdb => "tvdb",
            CrossRefSource::MusicBrainz => "musicbrainz",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "imdb" => Some(CrossRefSource::Imdb),
            "tmdb" => Some(CrossRefSource::Tmdb),
            "tvdb" => Some(CrossRefSource::Tvdb),
            "musicbrainz" | "mbid" => Some(CrossRefSource::MusicBrainz),
            _ => None,
        }
    }
}

impl fmt::Display for CrossRefSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrossRef {
    pub source: CrossRefSource,
    pub value: String,
}

impl CrossRef {
    pub fn new(source: CrossRefSource, value: impl Into<String>) -> Self {
        Self {
            source,
            value: value.into(),
        }
    }
}

/// The cross-reference ids known for one item, at most one per source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossRefs {
    pub imdb: Option<String>,
    pub tmdb: Option<String>,
    pub tvdb: Option<String>,
    pub musicbrainz: Option<String>,
}

impl CrossRefs {
    pub fn get(&self, source: CrossRefSource) -> Option<&str> {
        match source {
            CrossRefSource::Imdb => self.imdb.as_deref(),
            CrossRefSource::Tmdb => self.tmdb.as_deref(),
            CrossRefSource::Tvdb => self.tvdb.as_deref(),
            CrossRefSource::MusicBrainz => self.musicbrainz.as_deref(),
        }
    }

    fn slot(&mut self, source: CrossRefSource) -> &mut Option<String> {
        match source {
            CrossRefSource::Imdb => &mut self.imdb,
            CrossRefSource::Tmdb => &mut self.tmdb,
            CrossRefSource::Tvdb => &mut self.tvdb,
            CrossRefSource::MusicBrainz => &mut self.musicbrainz,
        }
    }

    /// Set the id for `source`. Blank values are ignored.
    pub fn set(&mut self, source: CrossRefSource, value: impl AsRef<str>) {
        let value = value.as_ref().trim();
        if !value.is_empty() {
            *self.slot(source) = Some(value.to_string());
        }
    }

    pub fn clear(&mut self, source: CrossRefSource) {
        *self.slot(source) = None;
    }

    pub fn with(mut self, source: CrossRefSource, value: impl AsRef<str>) -> Self {
        self.set(source, value);
        self
    }

    /// Present ids in default trust order.
    pub fn iter(&self) -> impl Iterator<Item = CrossRef> + '_ {
        CrossRefSource::ALL
            .iter()
            .filter_map(|source| self.get(*source).map(|value| CrossRef::new(*source, value)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Copy ids for sources this set lacks. Returns whether anything changed.
    pub fn fill_missing(&mut self, other: &CrossRefs) -> bool {
        let mut changed = false;
        for cross_ref in other.iter() {
            let slot = self.slot(cross_ref.source);
            if slot.is_none() {
                *slot = Some(cross_ref.value);
                changed = true;
            }
        }
        changed
    }
}

// =============================================================================
// Canonical Items
// =============================================================================

/// Metadata produced by a converter, before identity resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalItemData {
    pub kind: ItemKind,
    pub title: String,
    pub sort_title: Option<String>,
    pub description: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub artwork_url: Option<String>,
    pub community_rating: Option<f64>,
    pub critic_rating: Option<f64>,
    pub official_rating: Option<String>,
    pub runtime_seconds: Option<i64>,
    /// Episode/season/track number within the parent
    pub index_number: Option<i32>,
    pub cross_refs: CrossRefs,
    /// Serialized criteria for smart lists
    pub smart_criteria: Option<String>,
}

impl CanonicalItemData {
    pub fn new(kind: ItemKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            sort_title: None,
            description: None,
            release_date: None,
            year: None,
            genres: Vec::new(),
            artwork_url: None,
            community_rating: None,
            critic_rating: None,
            official_rating: None,
            runtime_seconds: None,
            index_number: None,
            cross_refs: CrossRefs::default(),
            smart_criteria: None,
        }
    }

    pub fn with_cross_refs(mut self, cross_refs: CrossRefs) -> Self {
        self.cross_refs = cross_refs;
        self
    }
}

/// One deduplicated record per logical media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalItem {
    pub id: ItemId,
    pub kind: ItemKind,
    pub title: String,
    pub sort_title: Option<String>,
    pub description: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub artwork_url: Option<String>,
    pub community_rating: Option<f64>,
    pub critic_rating: Option<f64>,
    pub official_rating: Option<String>,
    pub runtime_seconds: Option<i64>,
    pub index_number: Option<i32>,
    pub parent_id: Option<ItemId>,
    pub cross_refs: CrossRefs,
    pub smart_criteria: Option<String>,
    /// Created from a child's parent reference; filled in by the parent's own sync
    pub is_placeholder: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

fn fill<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) -> bool {
    if slot.is_none() && incoming.is_some() {
        *slot = incoming.clone();
        true
    } else {
        false
    }
}

impl CanonicalItem {
    pub fn from_data(data: CanonicalItemData, parent_id: Option<ItemId>, now: i64) -> Self {
        Self {
            id: ItemId::new(),
            kind: data.kind,
            title: data.title,
            sort_title: data.sort_title,
            description: data.description,
            release_date: data.release_date,
            year: data.year,
            genres: data.genres,
            artwork_url: data.artwork_url,
            community_rating: data.community_rating,
            critic_rating: data.critic_rating,
            official_rating: data.official_rating,
            runtime_seconds: data.runtime_seconds,
            index_number: data.index_number,
            parent_id,
            cross_refs: data.cross_refs,
            smart_criteria: data.smart_criteria,
            is_placeholder: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// A stand-in for a parent that has not been synced yet.
    pub fn placeholder(data: CanonicalItemData, parent_id: Option<ItemId>, now: i64) -> Self {
        let mut item = Self::from_data(data, parent_id, now);
        item.is_placeholder = true;
        item
    }

    /// Fill fields that are still empty from `data`.
    ///
    /// Values already present are kept, so the first writer wins on
    /// conflicting metadata. A full record (`as_placeholder == false`)
    /// clears the placeholder flag. Returns whether anything changed;
    /// `updated_at` is left to the caller.
    pub fn fill_missing_from(
        &mut self,
        data: &CanonicalItemData,
        parent_id: Option<ItemId>,
        as_placeholder: bool,
    ) -> bool {
        let mut changed = false;

        if self.title.trim().is_empty() && !data.title.trim().is_empty() {
            self.title = data.title.clone();
            changed = true;
        }
        changed |= fill(&mut self.sort_title, &data.sort_title);
        changed |= fill(&mut self.description, &data.description);
        changed |= fill(&mut self.release_date, &data.release_date);
        changed |= fill(&mut self.year, &data.year);
        if self.genres.is_empty() && !data.genres.is_empty() {
            self.genres = data.genres.clone();
            changed = true;
        }
        changed |= fill(&mut self.artwork_url, &data.artwork_url);
        changed |= fill(&mut self.community_rating, &data.community_rating);
        changed |= fill(&mut self.critic_rating, &data.critic_rating);
        changed |= fill(&mut self.official_rating, &data.official_rating);
        changed |= fill(&mut self.runtime_seconds, &data.runtime_seconds);
        changed |= fill(&mut self.index_number, &data.index_number);
        changed |= fill(&mut self.parent_id, &parent_id);
        changed |= fill(&mut self.smart_criteria, &data.smart_criteria);
        changed |= self.cross_refs.fill_missing(&data.cross_refs);

        if self.is_placeholder && !as_placeholder {
            self.is_placeholder = false;
            changed = true;
        }

        changed
    }

    /// Validate item data
    pub fn validate(&self) -> Result<(), String> {
        if self.runtime_seconds.is_some_and(|r| r < 0) {
            return Err("Runtime cannot be negative".to_string());
        }
        if self.index_number.is_some_and(|n| n < 0) {
            return Err("Index number cannot be negative".to_string());
        }
        for rating in [self.community_rating, self.critic_rating].into_iter().flatten() {
            if !rating.is_finite() || rating < 0.0 {
                return Err(format!("Invalid rating: {}", rating));
            }
        }
        if self.parent_id == Some(self.id) {
            return Err("Item cannot be its own parent".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Client Linkage
// =============================================================================

/// Maps one client's native item id to a canonical item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientLinkage {
    pub item_id: ItemId,
    pub client_id: ClientId,
    pub external_item_id: String,
    /// Native ids of the containers, outermost first
    pub external_parent_ids: Vec<String>,
    pub created_at: i64,
    pub last_seen_at: i64,
}

impl ClientLinkage {
    pub fn new(
        item_id: ItemId,
        client_id: ClientId,
        external_item_id: impl Into<String>,
        external_parent_ids: Vec<String>,
        now: i64,
    ) -> Self {
        Self {
            item_id,
            client_id,
            external_item_id: external_item_id.into(),
            external_parent_ids,
            created_at: now,
            last_seen_at: now,
        }
    }
}

// =============================================================================
// User State
// =============================================================================

/// Percentage at which an item counts as completed.
pub const COMPLETED_THRESHOLD: f64 = 90.0;

/// Per-user play state for one canonical item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserItemState {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub is_favorite: bool,
    pub user_rating: Option<f64>,
    pub play_count: i64,
    pub position_seconds: i64,
    pub duration_seconds: Option<i64>,
    pub played_percentage: f64,
    pub played_at: Option<i64>,
    pub last_played_at: Option<i64>,
    /// Pending direct favorite toggle, cleared once a remote report agrees or is newer
    pub favorite_action_at: Option<i64>,
    /// Pending direct rating change
    pub rating_action_at: Option<i64>,
    pub updated_at: i64,
    /// Optimistic concurrency token; 0 means never stored
    pub version: i64,
}

impl UserItemState {
    pub fn new(user_id: UserId, item_id: ItemId, now: i64) -> Self {
        Self {
            user_id,
            item_id,
            is_favorite: false,
            user_rating: None,
            play_count: 0,
            position_seconds: 0,
            duration_seconds: None,
            played_percentage: 0.0,
            played_at: None,
            last_played_at: None,
            favorite_action_at: None,
            rating_action_at: None,
            updated_at: now,
            version: 0,
        }
    }

    pub fn completed(&self) -> bool {
        self.played_percentage >= COMPLETED_THRESHOLD
    }
}

/// User data as a remote server reported it. `None` means "not reported".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteUserData {
    pub is_favorite: Option<bool>,
    pub user_rating: Option<f64>,
    pub play_count: Option<i64>,
    pub position_seconds: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub played_percentage: Option<f64>,
    pub played: Option<bool>,
    pub played_at: Option<i64>,
    pub last_played_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl RemoteUserData {
    /// Reported percentage, else position / duration, else 100 if marked played.
    pub fn effective_percentage(&self) -> Option<f64> {
        if let Some(percentage) = self.played_percentage {
            return Some(percentage.clamp(0.0, 100.0));
        }
        match (self.position_seconds, self.duration_seconds) {
            (Some(position), Some(duration)) if position > 0 && duration > 0 => {
                Some((position as f64 / duration as f64 * 100.0).clamp(0.0, 100.0))
            }
            _ if self.played == Some(true) => Some(100.0),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == RemoteUserData::default()
    }
}

// =============================================================================
// List Membership
// =============================================================================

/// Number of history entries kept per list member.
pub const MAX_LIST_HISTORY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListChangeKind {
    Added,
    Moved { from: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListChange {
    pub at: i64,
    pub change: ListChangeKind,
}

/// One member of a collection or playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub list_id: ItemId,
    pub item_id: ItemId,
    pub position: i64,
    pub last_changed: i64,
    pub change_history: Vec<ListChange>,
}

impl ListItem {
    pub fn added(list_id: ItemId, item_id: ItemId, position: i64, at: i64) -> Self {
        let mut item = Self {
            list_id,
            item_id,
            position,
            last_changed: at,
            change_history: Vec::new(),
        };
        item.record(ListChange {
            at,
            change: ListChangeKind::Added,
        });
        item
    }

    /// Move to `position`, recording the change. No-op if already there.
    pub fn move_to(&mut self, position: i64, at: i64) -> bool {
        if self.position == position {
            return false;
        }
        let from = self.position;
        self.position = position;
        self.last_changed = at;
        self.record(ListChange {
            at,
            change: ListChangeKind::Moved { from },
        });
        true
    }

    fn record(&mut self, change: ListChange) {
        self.change_history.push(change);
        if self.change_history.len() > MAX_LIST_HISTORY {
            let excess = self.change_history.len() - MAX_LIST_HISTORY;
            self.change_history.drain(..excess);
        }
    }
}
