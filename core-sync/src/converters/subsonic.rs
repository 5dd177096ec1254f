//! Subsonic / OpenSubsonic converters
//!
//! Durations are seconds. Only music kinds exist. `starred` carries the time
//! the user starred the item and `played` the last play (OpenSubsonic).

use super::fields;
use crate::factory::{ConvertedItem, ParentRef};
use crate::Result;
use bridge_traits::NativeItem;
use core_library::{CanonicalItemData, CrossRefSource, CrossRefs, ItemKind, RemoteUserData};
use serde_json::Value;

pub(crate) const NATIVE_KINDS: &[(&str, ItemKind)] = &[
    ("artist", ItemKind::Artist),
    ("album", ItemKind::Album),
    ("song", ItemKind::Track),
    ("playlist", ItemKind::Playlist),
];

fn artist_ref(payload: &Value) -> Option<ParentRef> {
    let id = fields::string(payload, "artistId")?;
    let title = fields::string(payload, "artist").unwrap_or_default();
    Some(ParentRef::new(ItemKind::Artist, id, title))
}

fn parent_chain(payload: &Value, kind: ItemKind) -> Option<ParentRef> {
    match kind {
        ItemKind::Album => artist_ref(payload),
        ItemKind::Track => {
            let artist = artist_ref(payload);
            match fields::string(payload, "albumId") {
                Some(album_id) => {
                    let title = fields::string(payload, "album").unwrap_or_default();
                    let mut album = ParentRef::new(ItemKind::Album, album_id, title);
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
    let starred_at = fields::timestamp(payload, "starred");
    let play_count = fields::int(payload, "playCount");
    let last_played_at = fields::timestamp(payload, "played");
    let user_rating = fields::float(payload, "userRating");

    if starred_at.is_none()
        && play_count.is_none()
        && last_played_at.is_none()
        && user_rating.is_none()
    {
        return None;
    }

    let played = play_count.map(|count| count > 0);
    Some(RemoteUserData {
        is_favorite: starred_at.map(|_| true),
        user_rating,
        play_count,
        position_seconds: None,
        duration_seconds: runtime_seconds,
        played_percentage: None,
        played,
        played_at: if played == Some(true) { last_played_at } else { None },
        last_played_at,
        updated_at: starred_at,
    })
}

pub(crate) fn convert(item: &NativeItem, kind: ItemKind) -> Result<ConvertedItem> {
    let payload = &item.payload;
    let external_id = fields::required_id(item, &["id"])?;

    let title = fields::first_string(payload, &["title", "name"]).unwrap_or_default();
    let mut data = CanonicalItemData::new(kind, title);
    data.sort_title = fields::string(payload, "sortName");
    data.description = fields::string(payload, "comment");
    data.year = fields::int32(payload, "year");
    data.genres = match fields::get(payload, "genres") {
        Some(_) => fields::string_list(payload, "genres"),
        None => fields::string_list(payload, "genre"),
    };
    data.community_rating = fields::float(payload, "averageRating");
    data.runtime_seconds = fields::int(payload, "duration");
    data.index_number = fields::int32(payload, "track");
    data.artwork_url = fields::string(payload, "coverArt").map(|id| format!("getCoverArt?id={id}"));

    let mut refs = CrossRefs::default();
    if let Some(mbid) = fields::string(payload, "musicBrainzId") {
        refs.set(CrossRefSource::MusicBrainz, mbid);
    }
    data.cross_refs = refs;

    let user_data = user_data(payload, data.runtime_seconds);
    let parent = parent_chain(payload, kind);

    Ok(ConvertedItem {
        external_id,
        data,
        parent,
        user_data,
    })
}
