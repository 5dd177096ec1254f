//! Plex metadata converters
//!
//! Durations and offsets are milliseconds. Cross references come from the
//! `Guid` array (`imdb://tt…`, `tmdb://…`, `tvdb://…`, `mbid://…`); parents
//! from the `parent*` and `grandparent*` fields.

use super::fields;
use crate::factory::{ConvertedItem, ParentRef};
use crate::Result;
use bridge_traits::NativeItem;
use core_library::{CanonicalItemData, CrossRefSource, CrossRefs, ItemKind, RemoteUserData};
use serde_json::Value;

pub(crate) const NATIVE_KINDS: &[(&str, ItemKind)] = &[
    ("movie", ItemKind::Movie),
    ("show", ItemKind::Series),
    ("season", ItemKind::Season),
    ("episode", ItemKind::Episode),
    ("artist", ItemKind::Artist),
    ("album", ItemKind::Album),
    ("track", ItemKind::Track),
    ("collection", ItemKind::Collection),
    ("playlist", ItemKind::Playlist),
];

fn ms_to_seconds(ms: Option<i64>) -> Option<i64> {
    ms.map(|ms| ms / 1000)
}

fn parse_guid(refs: &mut CrossRefs, guid: &str) {
    let Some((scheme, value)) = guid.split_once("://") else {
        return;
    };
    let source = match scheme {
        "imdb" => CrossRefSource::Imdb,
        "tmdb" => CrossRefSource::Tmdb,
        "tvdb" => CrossRefSource::Tvdb,
        "mbid" => CrossRefSource::MusicBrainz,
        legacy => match legacy.rsplit('.').next() {
            // com.plexapp.agents.imdb://tt0111161?lang=en
            Some("imdb") => CrossRefSource::Imdb,
            Some("themoviedb") => CrossRefSource::Tmdb,
            Some("thetvdb") => CrossRefSource::Tvdb,
            Some("musicbrainz") => CrossRefSource::MusicBrainz,
            _ => return,
        },
    };
    let value = value.split(['?', '/']).next().unwrap_or(value);
    if refs.get(source).is_none() {
        refs.set(source, value);
    }
}

fn guids(payload: &Value) -> CrossRefs {
    let mut refs = CrossRefs::default();
    if let Some(Value::Array(entries)) = fields::get(payload, "Guid") {
        for entry in entries {
            if let Some(id) = fields::string(entry, "id") {
                parse_guid(&mut refs, &id);
            }
        }
    }
    if let Some(legacy) = fields::string(payload, "guid") {
        parse_guid(&mut refs, &legacy);
    }
    refs
}

fn container(payload: &Value, prefix: &str, kind: ItemKind) -> Option<ParentRef> {
    let id = fields::string(payload, &format!("{prefix}RatingKey"))?;
    let title = fields::string(payload, &format!("{prefix}Title")).unwrap_or_default();
    let mut parent = ParentRef::new(kind, id, title);
    parent.index_number = fields::int32(payload, &format!("{prefix}Index"));
    Some(parent)
}

fn parent_chain(payload: &Value, kind: ItemKind) -> Option<ParentRef> {
    let (parent_kind, grandparent_kind) = match kind {
        ItemKind::Season => (ItemKind::Series, None),
        ItemKind::Episode => (ItemKind::Season, Some(ItemKind::Series)),
        ItemKind::Album => (ItemKind::Artist, None),
        ItemKind::Track => (ItemKind::Album, Some(ItemKind::Artist)),
        _ => return None,
    };

    let grandparent =
        grandparent_kind.and_then(|gp_kind| container(payload, "grandparent", gp_kind));
    match container(payload, "parent", parent_kind) {
        Some(mut parent) => {
            parent.parent = grandparent.map(Box::new);
            Some(parent)
        }
        None => grandparent,
    }
}

fn user_data(payload: &Value, runtime_seconds: Option<i64>) -> Option<RemoteUserData> {
    let play_count = fields::int(payload, "viewCount");
    let position_seconds = ms_to_seconds(fields::int(payload, "viewOffset"));
    let last_played_at = fields::timestamp(payload, "lastViewedAt");
    let user_rating = fields::float(payload, "userRating");

    if play_count.is_none()
        && position_seconds.is_none()
        && last_played_at.is_none()
        && user_rating.is_none()
    {
        return None;
    }

    let played = play_count.map(|count| count > 0);
    Some(RemoteUserData {
        is_favorite: None,
        user_rating,
        play_count,
        position_seconds,
        duration_seconds: runtime_seconds,
        played_percentage: None,
        played,
        played_at: if played == Some(true) { last_played_at } else { None },
        last_played_at,
        updated_at: fields::timestamp(payload, "lastRatedAt"),
    })
}

pub(crate) fn convert(item: &NativeItem, kind: ItemKind) -> Result<ConvertedItem> {
    let payload = &item.payload;
    let external_id = fields::required_id(item, &["ratingKey"])?;

    let mut data = CanonicalItemData::new(kind, fields::string(payload, "title").unwrap_or_default());
    data.sort_title = fields::string(payload, "titleSort");
    data.description = fields::string(payload, "summary");
    data.release_date = fields::date(payload, "originallyAvailableAt");
    data.year = fields::year_or_date(fields::int32(payload, "year"), data.release_date);
    data.genres = fields::string_list(payload, "Genre");
    data.community_rating = fields::float(payload, "audienceRating");
    data.critic_rating = fields::float(payload, "rating");
    data.official_rating = fields::string(payload, "contentRating");
    data.runtime_seconds = ms_to_seconds(fields::int(payload, "duration"));
    data.index_number = fields::int32(payload, "index");
    data.artwork_url = fields::string(payload, "thumb");
    data.cross_refs = guids(payload);
    if kind.is_list() && fields::boolean(payload, "smart") == Some(true) {
        data.smart_criteria = fields::string(payload, "content");
    }

    let user_data = user_data(payload, data.runtime_seconds);
    let parent = parent_chain(payload, kind);

    Ok(ConvertedItem {
        external_id,
        data,
        parent,
        user_data,
    })
}
