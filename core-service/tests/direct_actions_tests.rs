//! Direct user actions racing later sync runs.

use async_trait::async_trait;
use bridge_traits::{
    ClientId, ClientKind, ClientResult, FixedClock, MediaClient, NativeItem, NativePage,
    QueryOptions,
};
use core_library::{ItemId, UserId};
use core_runtime::config::CoreConfig;
use core_service::CoreService;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

const T0: i64 = 1_700_000_000;

#[derive(Default)]
struct Reports {
    favorites: Vec<Value>,
    history: Vec<Value>,
}

/// Jellyfin server with one movie whose favorites and history reports can change between runs.
struct JellyfinServer {
    id: ClientId,
    reports: Mutex<Reports>,
}

impl JellyfinServer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ClientId::new("jf"),
            reports: Mutex::new(Reports::default()),
        })
    }

    fn report_favorite(&self, user_data: Value) {
        self.reports.lock().unwrap().favorites = vec![movie(Some(user_data))];
    }

    fn report_history(&self, user_data: Value) {
        self.reports.lock().unwrap().history = vec![movie(Some(user_data))];
    }
}

fn movie(user_data: Option<Value>) -> Value {
    let mut payload = json!({
        "Id": "m1",
        "Name": "Alpha",
        "RunTimeTicks": 72_000_000_000i64,
        "ProviderIds": { "Imdb": "tt001" }
    });
    if let Some(data) = user_data {
        payload["UserData"] = data;
    }
    payload
}

fn page(payloads: Vec<Value>) -> NativePage {
    let total = payloads.len() as u64;
    let items = payloads
        .into_iter()
        .map(|payload| NativeItem::new("Movie", payload))
        .collect();
    NativePage::new(items, Some(total))
}

#[async_trait]
impl MediaClient for JellyfinServer {
    fn client_id(&self) -> &ClientId {
        &self.id
    }

    fn kind(&self) -> ClientKind {
        ClientKind::Jellyfin
    }

    fn supports_movies(&self) -> bool {
        true
    }

    fn supports_play_history(&self) -> bool {
        true
    }

    fn supports_favorites(&self) -> bool {
        true
    }

    async fn get_movies(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Ok(page(vec![movie(None)]))
    }

    async fn get_play_history(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Ok(page(self.reports.lock().unwrap().history.clone()))
    }

    async fn get_favorites(&self, _options: &QueryOptions) -> ClientResult<NativePage> {
        Ok(page(self.reports.lock().unwrap().favorites.clone()))
    }
}

async fn setup(server: Arc<JellyfinServer>) -> (CoreService, Arc<FixedClock>, ItemId) {
    let clock = Arc::new(FixedClock::at(T0));
    let config = CoreConfig::builder()
        .in_memory()
        .clock(clock.clone())
        .build()
        .unwrap();
    let core = CoreService::bootstrap(config, vec![server]).await.unwrap();

    core.run_sync(UserId::new(), ClientId::new("jf")).await.unwrap();
    let item = core
        .catalog()
        .find_by_client_external_id(&ClientId::new("jf"), "m1")
        .await
        .unwrap()
        .unwrap();

    (core, clock, item.id)
}

#[tokio::test]
async fn test_local_unfavorite_survives_untimestamped_favorite_report() {
    let server = JellyfinServer::new();
    server.report_favorite(json!({ "IsFavorite": true }));
    let (core, clock, item_id) = setup(server.clone()).await;
    let user = UserId::new();

    core.run_sync(user, ClientId::new("jf")).await.unwrap();
    assert!(core.user_state(&user, &item_id).await.unwrap().unwrap().is_favorite);

    clock.advance(60);
    core.set_favorite(user, item_id, false).await.unwrap();

    clock.advance(60);
    server.report_history(json!({
        "IsFavorite": true,
        "PlayCount": 3,
        "PlaybackPositionTicks": 18_000_000_000i64,
        "LastPlayedDate": "2024-03-01T12:00:00Z"
    }));
    core.run_sync(user, ClientId::new("jf")).await.unwrap();

    let state = core.user_state(&user, &item_id).await.unwrap().unwrap();
    assert!(!state.is_favorite);
    assert_eq!(state.favorite_action_at, Some(T0 + 60));
    assert_eq!(state.play_count, 3);
    assert_eq!(state.position_seconds, 1800);
    assert_eq!(state.played_percentage, 25.0);
    assert_eq!(state.last_played_at, Some(1_709_294_400));
}

#[tokio::test]
async fn test_local_rating_keeps_remote_favorite_flowing() {
    let server = JellyfinServer::new();
    let (core, clock, item_id) = setup(server.clone()).await;
    let user = UserId::new();

    clock.advance(60);
    let state = core.set_rating(user, item_id, Some(9.0)).await.unwrap();
    assert_eq!(state.rating_action_at, Some(T0 + 60));
    assert!(!state.is_favorite);

    clock.advance(60);
    server.report_favorite(json!({ "IsFavorite": true, "Rating": 4.0 }));
    core.run_sync(user, ClientId::new("jf")).await.unwrap();

    let state = core.user_state(&user, &item_id).await.unwrap().unwrap();
    assert!(state.is_favorite);
    assert_eq!(state.user_rating, Some(9.0));
    assert_eq!(state.rating_action_at, Some(T0 + 60));
    assert_eq!(state.favorite_action_at, None);
}

#[tokio::test]
async fn test_agreeing_report_releases_local_rating() {
    let server = JellyfinServer::new();
    let (core, _clock, item_id) = setup(server.clone()).await;
    let user = UserId::new();

    core.set_rating(user, item_id, Some(8.0)).await.unwrap();

    server.report_favorite(json!({ "IsFavorite": true, "Rating": 8.0 }));
    core.run_sync(user, ClientId::new("jf")).await.unwrap();
    let state = core.user_state(&user, &item_id).await.unwrap().unwrap();
    assert_eq!(state.rating_action_at, None);

    server.report_favorite(json!({ "IsFavorite": true, "Rating": 6.0 }));
    core.run_sync(user, ClientId::new("jf")).await.unwrap();
    let state = core.user_state(&user, &item_id).await.unwrap().unwrap();
    assert_eq!(state.user_rating, Some(6.0));
}
