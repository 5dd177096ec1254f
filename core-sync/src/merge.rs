//! # User-State Merge
//!
//! Folds a remote server's report into the stored [`UserItemState`].
//!
//! ## Rules
//!
//! - `play_count` takes the maximum. A report marked played counts as one play.
//! - `played_at` and `last_played_at` take the later timestamp.
//! - Position, percentage and duration move only when the report's last play
//!   is newer than the stored one (or nothing is stored yet).
//! - Favorites are a logical OR across clients. A reported unfavorite only
//!   applies when it carries a change time strictly newer than any pending
//!   local favorite toggle.
//! - A reported favorite is held back only by a pending local unfavorite, and
//!   a reported rating only by a pending local rating. Either is overridden by
//!   a report whose change time is strictly newer.
//! - Favorite and rating actions are tracked separately, so a local rating
//!   never blocks a remote favorite.
//!
//! The remote change time for favorites and ratings is
//! [`RemoteUserData::updated_at`]. Play timestamps are not used for it.

use core_library::{ItemId, RemoteUserData, UserId, UserItemState};

/// Merge `remote` into `existing`, or into a fresh state if none is stored.
///
/// The returned state keeps the stored `version` so it can be written with
/// `UserStateRepository::save_merged`.
pub fn merge_user_state(
    existing: Option<UserItemState>,
    user_id: UserId,
    item_id: ItemId,
    remote: &RemoteUserData,
    now: i64,
) -> UserItemState {
    let is_new = existing.is_none();
    let mut state = existing.unwrap_or_else(|| UserItemState::new(user_id, item_id, now));

    merge_playback(&mut state, remote, is_new);
    merge_user_actions(&mut state, remote);

    state.updated_at = now;
    state
}

fn later(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn merge_playback(state: &mut UserItemState, remote: &RemoteUserData, is_new: bool) {
    let reported_play = remote.last_played_at.or(remote.played_at);
    let advanced = match (reported_play, state.last_played_at) {
        (Some(incoming), Some(stored)) => incoming > stored,
        (Some(_), None) => true,
        (None, _) => is_new,
    };

    let incoming_count = remote
        .play_count
        .or(if remote.played == Some(true) { Some(1) } else { None });
    if let Some(count) = incoming_count {
        state.play_count = state.play_count.max(count.max(0));
    }

    state.played_at = later(state.played_at, remote.played_at);
    state.last_played_at = later(state.last_played_at, reported_play);

    if advanced {
        if let Some(position) = remote.position_seconds {
            state.position_seconds = position.max(0);
        }
        if let Some(percentage) = remote.effective_percentage() {
            state.played_percentage = percentage;
        }
        if remote.duration_seconds.is_some() {
            state.duration_seconds = remote.duration_seconds;
        }
    }
}

fn newer(changed_at: Option<i64>, pending: Option<i64>) -> bool {
    match (changed_at, pending) {
        (Some(reported), Some(local)) => reported > local,
        (_, None) => true,
        (None, Some(_)) => false,
    }
}

fn merge_user_actions(state: &mut UserItemState, remote: &RemoteUserData) {
    let changed_at = remote.updated_at;

    if let Some(favorite) = remote.is_favorite {
        let overrides_local = newer(changed_at, state.favorite_action_at);
        if favorite && !state.is_favorite && overrides_local {
            state.is_favorite = true;
        } else if !favorite && state.is_favorite && changed_at.is_some() && overrides_local {
            state.is_favorite = false;
        }

        if favorite == state.is_favorite || overrides_local {
            state.favorite_action_at = None;
        }
    }

    if let Some(rating) = remote.user_rating {
        if newer(changed_at, state.rating_action_at) {
            state.user_rating = Some(rating);
            state.rating_action_at = None;
        } else if state.user_rating == Some(rating) {
            state.rating_action_at = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3600;
    const T0: i64 = 1_700_000_000;

    fn stored(configure: impl FnOnce(&mut UserItemState)) -> UserItemState {
        let mut state = UserItemState::new(UserId::new(), ItemId::new(), T0);
        state.version = 1;
        configure(&mut state);
        state
    }

    fn merge(existing: UserItemState, remote: &RemoteUserData) -> UserItemState {
        let (user, item) = (existing.user_id, existing.item_id);
        merge_user_state(Some(existing), user, item, remote, T0 + 10 * HOUR)
    }

    #[test]
    fn test_first_report_creates_state() {
        let remote = RemoteUserData {
            play_count: Some(2),
            position_seconds: Some(600),
            duration_seconds: Some(1200),
            ..Default::default()
        };

        let state = merge_user_state(None, UserId::new(), ItemId::new(), &remote, T0);
        assert_eq!(state.version, 0);
        assert_eq!(state.play_count, 2);
        assert_eq!(state.position_seconds, 600);
        assert_eq!(state.played_percentage, 50.0);
        assert!(!state.is_favorite);
    }

    #[test]
    fn test_later_play_completes_item() {
        let existing = stored(|s| {
            s.play_count = 1;
            s.played_percentage = 40.0;
            s.position_seconds = 2880;
            s.duration_seconds = Some(7200);
            s.last_played_at = Some(T0);
        });
        assert!(!existing.completed());

        let remote = RemoteUserData {
            play_count: Some(1),
            played_percentage: Some(95.0),
            played: Some(true),
            played_at: Some(T0 + HOUR),
            last_played_at: Some(T0 + HOUR),
            ..Default::default()
        };

        let state = merge(existing, &remote);
        assert!(state.completed());
        assert_eq!(state.play_count, 1);
        assert_eq!(state.played_at, Some(T0 + HOUR));
        assert_eq!(state.version, 1);
    }

    #[test]
    fn test_older_report_keeps_position() {
        let existing = stored(|s| {
            s.play_count = 3;
            s.position_seconds = 1000;
            s.played_percentage = 50.0;
            s.played_at = Some(T0 + HOUR);
            s.last_played_at = Some(T0 + HOUR);
        });

        let remote = RemoteUserData {
            play_count: Some(1),
            position_seconds: Some(100),
            played_percentage: Some(5.0),
            played: Some(true),
            played_at: Some(T0),
            last_played_at: Some(T0),
            ..Default::default()
        };

        let state = merge(existing, &remote);
        assert_eq!(state.play_count, 3);
        assert_eq!(state.position_seconds, 1000);
        assert_eq!(state.played_percentage, 50.0);
        assert_eq!(state.played_at, Some(T0 + HOUR));
    }

    #[test]
    fn test_played_without_count_counts_once() {
        let existing = stored(|_| {});
        let remote = RemoteUserData {
            played: Some(true),
            ..Default::default()
        };

        let state = merge(existing, &remote);
        assert_eq!(state.play_count, 1);
    }

    #[test]
    fn test_favorite_is_logical_or() {
        let existing = stored(|s| s.is_favorite = true);
        let remote = RemoteUserData {
            is_favorite: Some(false),
            ..Default::default()
        };

        assert!(merge(existing, &remote).is_favorite);
    }

    #[test]
    fn test_timestamped_unfavorite_applies() {
        let existing = stored(|s| s.is_favorite = true);
        let remote = RemoteUserData {
            is_favorite: Some(false),
            updated_at: Some(T0 + HOUR),
            ..Default::default()
        };

        assert!(!merge(existing, &remote).is_favorite);
    }

    #[test]
    fn test_local_unfavorite_survives_older_report() {
        let existing = stored(|s| {
            s.is_favorite = false;
            s.favorite_action_at = Some(T0 + HOUR);
        });
        let remote = RemoteUserData {
            is_favorite: Some(true),
            updated_at: Some(T0),
            ..Default::default()
        };

        let state = merge(existing, &remote);
        assert!(!state.is_favorite);
        assert_eq!(state.favorite_action_at, Some(T0 + HOUR));
    }

    #[test]
    fn test_newer_remote_supersedes_local_action() {
        let existing = stored(|s| {
            s.is_favorite = false;
            s.user_rating = Some(3.0);
            s.favorite_action_at = Some(T0);
            s.rating_action_at = Some(T0);
        });
        let remote = RemoteUserData {
            is_favorite: Some(true),
            user_rating: Some(8.0),
            updated_at: Some(T0 + HOUR),
            ..Default::default()
        };

        let state = merge(existing, &remote);
        assert!(state.is_favorite);
        assert_eq!(state.user_rating, Some(8.0));
        assert_eq!(state.favorite_action_at, None);
        assert_eq!(state.rating_action_at, None);
    }

    #[test]
    fn test_pending_rating_not_replaced_by_untimestamped_report() {
        let existing = stored(|s| {
            s.user_rating = Some(9.0);
            s.rating_action_at = Some(T0);
        });
        let remote = RemoteUserData {
            user_rating: Some(4.0),
            ..Default::default()
        };

        let state = merge(existing, &remote);
        assert_eq!(state.user_rating, Some(9.0));
        assert_eq!(state.rating_action_at, Some(T0));
    }

    #[test]
    fn test_agreeing_report_clears_local_action() {
        let existing = stored(|s| {
            s.is_favorite = true;
            s.favorite_action_at = Some(T0);
        });
        let remote = RemoteUserData {
            is_favorite: Some(true),
            ..Default::default()
        };

        assert_eq!(merge(existing, &remote).favorite_action_at, None);
    }

    #[test]
    fn test_local_rating_does_not_block_remote_favorite() {
        let existing = stored(|s| {
            s.user_rating = Some(7.0);
            s.rating_action_at = Some(100);
        });
        let remote = RemoteUserData {
            is_favorite: Some(true),
            ..Default::default()
        };

        let state = merge(existing, &remote);
        assert!(state.is_favorite);
        assert_eq!(state.user_rating, Some(7.0));
        assert_eq!(state.rating_action_at, Some(100));
    }

    #[test]
    fn test_local_favorite_does_not_block_remote_rating() {
        let existing = stored(|s| {
            s.is_favorite = false;
            s.favorite_action_at = Some(T0);
        });
        let remote = RemoteUserData {
            is_favorite: Some(true),
            user_rating: Some(6.0),
            ..Default::default()
        };

        let state = merge(existing, &remote);
        assert!(!state.is_favorite);
        assert_eq!(state.favorite_action_at, Some(T0));
        assert_eq!(state.user_rating, Some(6.0));
    }
}
