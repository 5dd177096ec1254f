//! Emby and Jellyfin `BaseItemDto` converters
//!
//! Both servers share the schema. Durations and positions are 100 ns ticks.

use super::fields;
use crate::factory::{ConvertedItem, ParentRef};
use crate::Result;
use bridge_traits::NativeItem;
use core_library::{CanonicalItemData, CrossRefSource, CrossRefs, ItemKind, RemoteUserData};
use serde_json::Value;

const TICKS_PER_SECOND: i64 = 10_000_000;

/// Native type names and the canonical kind each maps to.
pub(crate) const NATIVE_KINDS: &[(&str, ItemKind)] = &[
    ("Movie", ItemKind::Movie),
    ("Series", ItemKind::Series),
    ("Season", ItemKind::Season),
    ("Episode", ItemKind::Episode),
    ("MusicArtist", ItemKind::Artist),
    ("MusicAlbum", ItemKind::Album),
    ("Audio", ItemKind::Track),
    ("BoxSet", ItemKind::Collection),
    ("Playlist", ItemKind::Playlist),
];

fn ticks_to_seconds(ticks: Option<i64>) -> Option<i64> {
    ticks.map(|t| t / TICKS_PER_SECOND)
}

fn musicbrainz_key(kind: ItemKind) -> Option<&'static str> {
    match kind {
        ItemKind::Track => Some("MusicBrainzTrack"),
        ItemKind::Album => Some("MusicBrainzAlbum"),
        ItemKind::Artist => Some("MusicBrainzArtist"),
        _ => None,
    }
}

fn provider_ids(payload: &Value, kind: ItemKind) -> CrossRefs {
    let mut refs = CrossRefs::default();
    let Some(ids) = fields::object(payload, "ProviderIds") else {
        return refs;
    };

    if let Some(imdb) = fields::string(ids, "Imdb") {
        refs.set(CrossRefSource::Imdb, imdb);
    }
    if let Some(tmdb) = fields::string(ids, "Tmdb") {
        refs.set(CrossRefSource::Tmdb, tmdb);
    }
    if let Some(tvdb) = fields::string(ids, "Tvdb") {
        refs.set(CrossRefSource::Tvdb, tvdb);
    }
    if let Some(mbid) = musicbrainz_key(kind).and_then(|key| fields::string(ids, key)) {
        refs.set(CrossRefSource::MusicBrainz, mbid);
    }
    refs
}

/// Ids a child carries for one of its containers
fn parent_refs(payload: &Value, key: &str) -> CrossRefs {
    let mut refs = CrossRefs::default();
    if let Some(mbid) = fields::object(payload, "ProviderIds").and_then(|ids| fields::string(ids, key)) {
        refs.set(CrossRefSource::MusicBrainz, mbid);
    }
    refs
}

fn series_ref(payload: &Value) -> Option<ParentRef> {
    let id = fields::string(payload, "SeriesId")?;
    let title = fields::string(payload, "SeriesName").unwrap_or_default();
    Some(ParentRef::new(ItemKind::Series, id, title))
}

fn artist_ref(payload: &Value) -> Option<ParentRef> {
    let artist = fields::first_object(payload, "AlbumArtists")
        .or_else(|| fields::first_object(payload, "ArtistItems"))?;
    let id = fields::string(artist, "Id")?;
    let title = fields::string(artist, "Name").unwrap_or_default();
    let mut parent = ParentRef::new(ItemKind::Artist, id, title);
    parent.cross_refs = parent_refs(payload, "MusicBrainzAlbumArtist");
    Some(parent)
}

fn parent_chain(payload: &Value, kind: ItemKind) -> Option<ParentRef> {
    match kind {
        ItemKind::Season => series_ref(payload),
        ItemKind::Episode => {
            let series = series_ref(payload);
            match fields::string(payload, "SeasonId") {
                Some(season_id) => {
                    let title = fields::string(payload, "SeasonName").unwrap_or_default();
                    let mut season = ParentRef::new(ItemKind::Season, season_id, title);
                    season.index_number = fields::int32(payload, "ParentIndexNumber");
                    season.parent = series.map(Box::new);
                    Some(season)
                }
                None => series,
            }
        }
        ItemKind::Album => artist_ref(payload),
        ItemKind::Track => {
            let artist = artist_ref(payload);
            match fields::string(payload, "AlbumId") {
                Some(album_id) => {
                    let title = fields::string(payload, "Album").unwrap_or_default();
                    let mut album = ParentRef::new(ItemKind::Album, album_id, title);
                    album.cross_refs = parent_refs(payload, "MusicBrainzAlbum");
                    album.parent = artist.map(Box::new);
                    Some(album)
                }
                None => artist,
            }
        }
        _ => None,
    }
}

fn user_data(payload: &Value, runtime_seconds: Option<i64>) -> Option<RemoteUserData> {
    let data = fields::object(payload, "UserData")?;
    let played = fields::boolean(data, "Played");
    let last_played_at = fields::timestamp(data, "LastPlayedDate");

    let remote = RemoteUserData {
        is_favorite: fields::boolean(data, "IsFavorite"),
        user_rating: fields::float(data, "Rating"),
        play_count: fields::int(data, "PlayCount"),
        position_seconds: ticks_to_seconds(fields::int(data, "PlaybackPositionTicks")),
        duration_seconds: runtime_seconds,
        played_percentage: fields::float(data, "PlayedPercentage"),
        played,
        played_at: if played == Some(true) { last_played_at } else { None },
        last_played_at,
        updated_at: None,
    };
    (!remote.is_empty()).then_some(remote)
}

pub(crate) fn convert(item: &NativeItem, kind: ItemKind) -> Result<ConvertedItem> {
    let payload = &item.payload;
    let external_id = fields::required_id(item, &["Id"])?;

    let mut data = CanonicalItemData::new(kind, fields::string(payload, "Name").unwrap_or_default());
    data.sort_title = fields::string(payload, "SortName");
    data.description = fields::string(payload, "Overview");
    data.release_date = fields::date(payload, "PremiereDate");
    data.year = fields::year_or_date(fields::int32(payload, "ProductionYear"), data.release_date);
    data.genres = fields::string_list(payload, "Genres");
    data.community_rating = fields::float(payload, "CommunityRating");
    data.critic_rating = fields::float(payload, "CriticRating");
    data.official_rating = fields::string(payload, "OfficialRating");
    data.runtime_seconds = ticks_to_seconds(fields::int(payload, "RunTimeTicks"));
    data.index_number = fields::int32(payload, "IndexNumber");
    data.cross_refs = provider_ids(payload, kind);
    data.artwork_url = fields::object(payload, "ImageTags")
        .and_then(|tags| fields::string(tags, "Primary"))
        .map(|tag| format!("Items/{}/Images/Primary?tag={}", external_id, tag));

    let user_data = user_data(payload, data.runtime_seconds);
    let parent = parent_chain(payload, kind);

    Ok(ConvertedItem {
        external_id,
        data,
        parent,
        user_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncError;
    use serde_json::json;

    #[test]
    fn test_movie_fields() {
        let item = NativeItem::new(
            "Movie",
            json!({
                "Id": "123",
                "Name": "Alpha",
                "SortName": "alpha",
                "PremiereDate": "2001-05-04T00:00:00.0000000Z",
                "Genres": ["Drama"],
                "CommunityRating": 7.5,
                "OfficialRating": "PG-13",
                "RunTimeTicks": 72_000_000_000i64,
                "ProviderIds": { "Imdb": "tt001", "Tmdb": "55" },
                "ImageTags": { "Primary": "abc" }
            }),
        );

        let converted = convert(&item, ItemKind::Movie).unwrap();
        assert_eq!(converted.external_id, "123");
        assert_eq!(converted.data.title, "Alpha");
        assert_eq!(converted.data.year, Some(2001));
        assert_eq!(converted.data.runtime_seconds, Some(7200));
        assert_eq!(converted.data.cross_refs.imdb.as_deref(), Some("tt001"));
        assert_eq!(converted.data.cross_refs.tmdb.as_deref(), Some("55"));
        assert_eq!(
            converted.data.artwork_url.as_deref(),
            Some("Items/123/Images/Primary?tag=abc")
        );
        assert!(converted.parent.is_none());
        assert!(converted.user_data.is_none());
    }

    #[test]
    fn test_missing_optional_fields_become_defaults() {
        let item = NativeItem::new("Movie", json!({ "Id": "1", "Genres": null }));
        let converted = convert(&item, ItemKind::Movie).unwrap();

        assert_eq!(converted.data.title, "");
        assert!(converted.data.genres.is_empty());
        assert!(converted.data.cross_refs.is_empty());
    }

    #[test]
    fn test_missing_id_fails() {
        let item = NativeItem::new("Movie", json!({ "Name": "No id" }));
        assert!(matches!(
            convert(&item, ItemKind::Movie),
            Err(SyncError::Conversion { .. })
        ));
    }

    #[test]
    fn test_episode_parent_chain_and_user_data() {
        let item = NativeItem::new(
            "Episode",
            json!({
                "Id": "e1",
                "Name": "Pilot",
                "IndexNumber": 1,
                "ParentIndexNumber": 1,
                "SeriesId": "s1",
                "SeriesName": "Show",
                "SeasonId": "se1",
                "SeasonName": "Season 1",
                "RunTimeTicks": 18_000_000_000i64,
                "UserData": {
                    "PlaybackPositionTicks": 9_000_000_000i64,
                    "PlayCount": 2,
                    "IsFavorite": true,
                    "Played": false,
                    "LastPlayedDate": "2024-03-01T12:00:00Z"
                }
            }),
        );

        let converted = convert(&item, ItemKind::Episode).unwrap();
        let season = converted.parent.as_ref().unwrap();
        assert_eq!(season.kind, ItemKind::Season);
        assert_eq!(season.index_number, Some(1));
        assert_eq!(season.parent.as_ref().unwrap().external_id, "s1");
        assert_eq!(converted.external_parent_ids(), vec!["s1", "se1"]);

        let user = converted.user_data.unwrap();
        assert_eq!(user.position_seconds, Some(900));
        assert_eq!(user.duration_seconds, Some(1800));
        assert_eq!(user.play_count, Some(2));
        assert_eq!(user.is_favorite, Some(true));
        assert_eq!(user.last_played_at, Some(1_709_294_400));
        assert_eq!(user.played_at, None);
        assert_eq!(user.effective_percentage(), Some(50.0));
    }

    #[test]
    fn test_track_parents_carry_musicbrainz_ids() {
        let item = NativeItem::new(
            "Audio",
            json!({
                "Id": "t1",
                "Name": "Song",
                "AlbumId": "al1",
                "Album": "Record",
                "AlbumArtists": [{ "Id": "ar1", "Name": "Band" }],
                "ProviderIds": {
                    "MusicBrainzTrack": "mb-track",
                    "MusicBrainzAlbum": "mb-album",
                    "MusicBrainzAlbumArtist": "mb-artist"
                }
            }),
        );

        let converted = convert(&item, ItemKind::Track).unwrap();
        assert_eq!(
            converted.data.cross_refs.musicbrainz.as_deref(),
            Some("mb-track")
        );

        let album = converted.parent.as_ref().unwrap();
        assert_eq!(album.kind, ItemKind::Album);
        assert_eq!(album.cross_refs.musicbrainz.as_deref(), Some("mb-album"));

        let artist = album.parent.as_ref().unwrap();
        assert_eq!(artist.kind, ItemKind::Artist);
        assert_eq!(artist.title, "Band");
        assert_eq!(artist.cross_refs.musicbrainz.as_deref(), Some("mb-artist"));
    }
}
