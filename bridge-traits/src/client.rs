//! Media Server Client Abstractions
//!
//! The uniform contract a media server adapter satisfies to take part in
//! synchronization. Adapters own transport, credentials and the mapping from
//! local users to remote users; the core only sees native items.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ClientError, ClientResult};
use crate::query::QueryOptions;

// ============================================================================
// Identity Types
// ============================================================================

/// Identifier of one configured client instance (e.g. "living-room-jellyfin").
///
/// Client ids are chosen by the host application, so they are plain strings
/// rather than generated UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The family of media server an adapter talks to.
///
/// Converters are registered per kind, so two Jellyfin clients share the same
/// field mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientKind {
    Emby,
    Jellyfin,
    Plex,
    Subsonic,
}

impl ClientKind {
    pub const ALL: [ClientKind; 4] = [
        ClientKind::Emby,
        ClientKind::Jellyfin,
        ClientKind::Plex,
        ClientKind::Subsonic,
    ];

    /// Get the human-readable display name for this client kind
    pub fn display_name(&self) -> &'static str {
        match self {
            ClientKind::Emby => "Emby",
            ClientKind::Jellyfin => "Jellyfin",
            ClientKind::Plex => "Plex",
            ClientKind::Subsonic => "Subsonic",
        }
    }

    /// Get the identifier string used in logs and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::Emby => "emby",
            ClientKind::Jellyfin => "jellyfin",
            ClientKind::Plex => "plex",
            ClientKind::Subsonic => "subsonic",
        }
    }

    /// Parse a client kind from a string identifier
    ///
    /// # Examples
    ///
    /// ```
    /// use bridge_traits::client::ClientKind;
    ///
    /// assert_eq!(ClientKind::parse("Jellyfin"), Some(ClientKind::Jellyfin));
    /// assert_eq!(ClientKind::parse("navidrome"), Some(ClientKind::Subsonic));
    /// assert_eq!(ClientKind::parse("kodi"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "emby" => Some(ClientKind::Emby),
            "jellyfin" => Some(ClientKind::Jellyfin),
            "plex" => Some(ClientKind::Plex),
            "subsonic" | "opensubsonic" | "navidrome" | "airsonic" => Some(ClientKind::Subsonic),
            _ => None,
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// A category of data a client adapter can supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Movies,
    Series,
    Seasons,
    Episodes,
    Artists,
    Albums,
    Tracks,
    Collections,
    Playlists,
    PlayHistory,
    Favorites,
}

impl Capability {
    /// Capabilities in the order a sync run visits them.
    ///
    /// Containers come before their children so parent resolution usually
    /// hits an existing linkage instead of creating a placeholder.
    pub const SYNC_ORDER: [Capability; 11] = [
        Capability::Movies,
        Capability::Series,
        Capability::Seasons,
        Capability::Episodes,
        Capability::Artists,
        Capability::Albums,
        Capability::Tracks,
        Capability::Collections,
        Capability::Playlists,
        Capability::PlayHistory,
        Capability::Favorites,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Movies => "movies",
            Capability::Series => "series",
            Capability::Seasons => "seasons",
            Capability::Episodes => "episodes",
            Capability::Artists => "artists",
            Capability::Albums => "albums",
            Capability::Tracks => "tracks",
            Capability::Collections => "collections",
            Capability::Playlists => "playlists",
            Capability::PlayHistory => "play_history",
            Capability::Favorites => "favorites",
        }
    }

    /// Whether items of this capability own a member list.
    pub fn is_list(&self) -> bool {
        matches!(self, Capability::Collections | Capability::Playlists)
    }

    /// Whether items of this capability carry per-user state to merge.
    pub fn carries_user_state(&self) -> bool {
        matches!(self, Capability::PlayHistory | Capability::Favorites)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Native Payloads
// ============================================================================

/// An item exactly as the remote server described it.
///
/// `native_kind` is the server's own type tag (`"Movie"`, `"episode"`,
/// `"song"`); the payload is the server's JSON object. Converters in the core
/// turn this into a canonical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeItem {
    pub native_kind: String,
    pub payload: serde_json::Value,
}

impl NativeItem {
    pub fn new(native_kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            native_kind: native_kind.into(),
            payload,
        }
    }

    /// Best-effort remote id for diagnostics when conversion fails.
    pub fn id_hint(&self) -> Option<String> {
        ["Id", "id", "ratingKey"].iter().find_map(|key| {
            match self.payload.get(*key) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            }
        })
    }
}

/// One page of native items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativePage {
    pub items: Vec<NativeItem>,
    /// Total matching items on the server, when the server reports it
    pub total: Option<u64>,
}

impl NativePage {
    pub fn new(items: Vec<NativeItem>, total: Option<u64>) -> Self {
        Self { items, total }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether a caller paging with `options` has reached the end.
    pub fn is_last(&self, options: &QueryOptions) -> bool {
        let received = self.items.len() as u64;
        if received == 0 || received < u64::from(options.limit) {
            return true;
        }
        match self.total {
            Some(total) => u64::from(options.offset) + received >= total,
            None => false,
        }
    }
}

// ============================================================================
// Client Contract
// ============================================================================

/// Capability interface every media server adapter implements.
///
/// Each capability has a `supports_*` probe and a fetch method. Both default
/// to "not supported", so an adapter only overrides what its server offers.
/// Fetching an unsupported capability returns [`ClientError::NotSupported`],
/// never an empty page.
///
/// Network, auth and timeout failures are returned as errors; the caller
/// decides how far they propagate.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::client::{MediaClient, ClientId, ClientKind, NativePage};
///
/// struct MyJellyfin { id: ClientId, http: reqwest::Client }
///
/// #[async_trait::async_trait]
/// impl MediaClient for MyJellyfin {
///     fn client_id(&self) -> &ClientId { &self.id }
///     fn kind(&self) -> ClientKind { ClientKind::Jellyfin }
///     fn supports_movies(&self) -> bool { true }
///     async fn get_movies(&self, options: &QueryOptions) -> ClientResult<NativePage> {
///         // GET /Users/{id}/Items?IncludeItemTypes=Movie&StartIndex=..&Limit=..
///         todo!()
///     }
/// }
/// ```
#[async_trait]
pub trait MediaClient: Send + Sync {
    /// Host-assigned id of this configured client
    fn client_id(&self) -> &ClientId;

    /// Server family, used to pick converters
    fn kind(&self) -> ClientKind;

    fn supports_movies(&self) -> bool {
        false
    }

    fn supports_series(&self) -> bool {
        false
    }

    fn supports_seasons(&self) -> bool {
        false
    }

    fn supports_episodes(&self) -> bool {
        false
    }

    fn supports_artists(&self) -> bool {
        false
    }

    fn supports_albums(&self) -> bool {
        false
    }

    fn supports_tracks(&self) -> bool {
        false
    }

    fn supports_collections(&self) -> bool {
        false
    }

    fn supports_playlists(&self) -> bool {
        false
    }

    fn supports_play_history(&self) -> bool {
        false
    }

    fn supports_favorites(&self) -> bool {
        false
    }

    async fn get_movies(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Err(ClientError::NotSupported(Capability::Movies))
    }

    async fn get_series(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Err(ClientError::NotSupported(Capability::Series))
    }

    async fn get_seasons(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Err(ClientError::NotSupported(Capability::Seasons))
    }

    async fn get_episodes(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Err(ClientError::NotSupported(Capability::Episodes))
    }

    async fn get_artists(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Err(ClientError::NotSupported(Capability::Artists))
    }

    async fn get_albums(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Err(ClientError::NotSupported(Capability::Albums))
    }

    async fn get_tracks(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Err(ClientError::NotSupported(Capability::Tracks))
    }

    async fn get_collections(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Err(ClientError::NotSupported(Capability::Collections))
    }

    async fn get_playlists(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Err(ClientError::NotSupported(Capability::Playlists))
    }

    /// Items the user has played, each embedding the remote user data
    async fn get_play_history(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Err(ClientError::NotSupported(Capability::PlayHistory))
    }

    /// Items the user marked as favorite, each embedding the remote user data
    async fn get_favorites(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Err(ClientError::NotSupported(Capability::Favorites))
    }

    /// Members of a collection or playlist, in list order
    ///
    /// # Arguments
    ///
    /// * `capability` - `Collections` or `Playlists`
    /// * `list_external_id` - The server's id for the list
    async fn get_list_members(
        &self,
        capability: Capability,
        _list_external_id: &str,
        _options: &QueryOptions,
    ) -> ClientResult<NativePage> {
        Err(ClientError::NotSupported(capability))
    }

    /// Approximate item count for a capability, used to weight progress
    ///
    /// Returns `Ok(None)` when the server cannot tell cheaply.
    async fn estimate_count(&self, _capability: Capability) -> ClientResult<Option<u64>> {
        Ok(None)
    }

    /// Dispatch a `supports_*` probe by capability.
    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Movies => self.supports_movies(),
            Capability::Series => self.supports_series(),
            Capability::Seasons => self.supports_seasons(),
            Capability::Episodes => self.supports_episodes(),
            Capability::Artists => self.supports_artists(),
            Capability::Albums => self.supports_albums(),
            Capability::Tracks => self.supports_tracks(),
            Capability::Collections => self.supports_collections(),
            Capability::Playlists => self.supports_playlists(),
            Capability::PlayHistory => self.supports_play_history(),
            Capability::Favorites => self.supports_favorites(),
        }
    }

    /// Dispatch a fetch by capability.
    async fn fetch(&self, capability: Capability, options: &QueryOptions) -> ClientResult<NativePage> {
        match capability {
            Capability::Movies => self.get_movies(options).await,
            Capability::Series => self.get_series(options).await,
            Capability::Seasons => self.get_seasons(options).await,
            Capability::Episodes => self.get_episodes(options).await,
            Capability::Artists => self.get_artists(options).await,
            Capability::Albums => self.get_albums(options).await,
            Capability::Tracks => self.get_tracks(options).await,
            Capability::Collections => self.get_collections(options).await,
            Capability::Playlists => self.get_playlists(options).await,
            Capability::PlayHistory => self.get_play_history(options).await,
            Capability::Favorites => self.get_favorites(options).await,
        }
    }

    /// All capabilities this client supports, in sync order.
    fn supported_capabilities(&self) -> Vec<Capability> {
        Capability::SYNC_ORDER
            .iter()
            .copied()
            .filter(|capability| self.supports(*capability))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MoviesOnly {
        id: ClientId,
    }

    #[async_trait]
    impl MediaClient for MoviesOnly {
        fn client_id(&self) -> &ClientId {
            &self.id
        }

        fn kind(&self) -> ClientKind {
            ClientKind::Jellyfin
        }

        fn supports_movies(&self) -> bool {
            true
        }

        async fn get_movies(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
            Ok(NativePage::new(
                vec![NativeItem::new("Movie", json!({"Id": "m1", "Name": "Alpha"}))],
                Some(1),
            ))
        }
    }

    #[test]
    fn test_client_kind_parse() {
        assert_eq!(ClientKind::parse("EMBY"), Some(ClientKind::Emby));
        assert_eq!(ClientKind::parse("plex"), Some(ClientKind::Plex));
        assert_eq!(ClientKind::parse("opensubsonic"), Some(ClientKind::Subsonic));
        assert_eq!(ClientKind::parse("unknown"), None);
    }

    #[test]
    fn test_sync_order_puts_containers_first() {
        let order = Capability::SYNC_ORDER;
        let pos = |c: Capability| order.iter().position(|x| *x == c).unwrap();
        assert!(pos(Capability::Series) < pos(Capability::Seasons));
        assert!(pos(Capability::Seasons) < pos(Capability::Episodes));
        assert!(pos(Capability::Artists) < pos(Capability::Albums));
        assert!(pos(Capability::Albums) < pos(Capability::Tracks));
        assert_eq!(order.last(), Some(&Capability::Favorites));
    }

    #[test]
    fn test_supported_capabilities() {
        let client = MoviesOnly {
            id: ClientId::new("c1"),
        };
        assert_eq!(client.supported_capabilities(), vec![Capability::Movies]);
        assert!(!client.supports(Capability::Tracks));
    }

    #[tokio::test]
    async fn test_unsupported_fetch_is_typed_error() {
        let client = MoviesOnly {
            id: ClientId::new("c1"),
        };
        let options = QueryOptions::default();

        let err = client.fetch(Capability::Tracks, &options).await.unwrap_err();
        assert_eq!(err, ClientError::NotSupported(Capability::Tracks));

        let page = client.fetch(Capability::Movies, &options).await.unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_default_list_members_not_supported() {
        let client = MoviesOnly {
            id: ClientId::new("c1"),
        };
        let err = client
            .get_list_members(Capability::Playlists, "p1", &QueryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::NotSupported(Capability::Playlists));
        assert_eq!(client.estimate_count(Capability::Movies).await.unwrap(), None);
    }

    #[test]
    fn test_native_item_id_hint() {
        assert_eq!(
            NativeItem::new("Movie", json!({"Id": "abc"})).id_hint(),
            Some("abc".to_string())
        );
        assert_eq!(
            NativeItem::new("movie", json!({"ratingKey": 42})).id_hint(),
            Some("42".to_string())
        );
        assert_eq!(NativeItem::new("song", json!({"title": "x"})).id_hint(), None);
    }

    #[test]
    fn test_page_is_last() {
        let options = QueryOptions::default().with_page(0, 2);
        let item = NativeItem::new("Movie", json!({}));

        assert!(NativePage::empty().is_last(&options));
        assert!(NativePage::new(vec![item.clone()], None).is_last(&options));
        assert!(!NativePage::new(vec![item.clone(), item.clone()], None).is_last(&options));
        assert!(NativePage::new(vec![item.clone(), item], Some(2)).is_last(&options));
    }
}
