use super::*;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct ApiState {
    requests: Arc<Mutex<Vec<String>>>,
}

impl ApiState {
    async fn record(&self, line: impl Into<String>) {
        self.requests.lock().await.push(line.into());
    }

    async fn saw(&self, line: &str) -> bool {
        self.requests.lock().await.iter().any(|seen| seen == line)
    }
}

async fn list_trucks(State(state): State<ApiState>) -> Json<Value> {
    state.record("GET /trucks").await;
    Json(json!({ "data": [{ "id": "1" }, { "id": "2" }] }))
}

async fn get_truck(State(state): State<ApiState>, Path(id): Path<String>) -> Json<Value> {
    state.record(format!("GET /trucks/{id}")).await;
    Json(json!({ "data": { "id": id } }))
}

async fn create_truck(State(state): State<ApiState>, Json(body): Json<Value>) -> Json<Value> {
    state.record(format!("POST /trucks {body}")).await;
    Json(json!({ "data": body }))
}

async fn delete_truck(State(state): State<ApiState>, Path(id): Path<String>) -> Json<Value> {
    state.record(format!("DELETE /trucks/{id}")).await;
    Json(json!({ "data": { "id": id } }))
}

async fn update_truck(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record(format!("PUT /trucks/{id} {body}")).await;
    Json(json!({ "data": { "updated": body } }))
}

async fn patch_truck(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record(format!("PATCH /trucks/{id} {body}")).await;
    Json(json!({ "data": { "id": id } }))
}

async fn broken(State(state): State<ApiState>) -> impl IntoResponse {
    state.record("GET /broken").await;
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "details": { "field": "name" }, "hint": "ignored" })),
    )
}

async fn broken_without_details(State(state): State<ApiState>) -> impl IntoResponse {
    state.record("GET /broken_bare").await;
    (StatusCode::CONFLICT, Json(json!({ "reason": "duplicate" })))
}

fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/trucks", get(list_trucks).post(create_truck))
        .route(
            "/trucks/:id",
            get(get_truck)
                .delete(delete_truck)
                .put(update_truck)
                .patch(patch_truck),
        )
        .route("/broken", get(broken))
        .route("/broken_bare", get(broken_without_details))
        .with_state(state)
}

async fn spawn_api() -> (String, ApiState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ApiState::default();
    let app = api_router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

async fn truck_client(api_url: &str) -> CrudClient {
    ClientBuilder::new()
        .with_api_url(api_url)
        .expect("api url")
        .entity_at("truck", "trucks")
        .entity_at("broken", "broken")
        .entity_at("broken_bare", "broken_bare")
        .build()
        .expect("client")
}

#[tokio::test]
async fn create_round_trip_updates_slice() {
    let (api_url, api) = spawn_api().await;
    let client = truck_client(&api_url).await;
    let actions = client.actions("truck").expect("actions");

    actions
        .create(json!({ "name": "hauler" }))
        .await
        .expect("create");

    let state = client.store().state("truck").await.expect("slice");
    assert_eq!(state.item, json!({ "name": "hauler" }));
    assert_eq!(state.all_items.len(), 1);
    assert!(api.saw(r#"POST /trucks {"name":"hauler"}"#).await);
}

#[tokio::test]
async fn get_many_then_delete_trims_the_collection() {
    let (api_url, api) = spawn_api().await;
    let client = truck_client(&api_url).await;
    let actions = client.actions("truck").expect("actions");

    actions.get_many(Value::Null).await.expect("get many");
    actions.delete(json!({ "id": "1" })).await.expect("delete");

    let state = client.store().state("truck").await.expect("slice");
    assert_eq!(state.all_items, vec![json!({ "id": "2" })]);
    assert!(api.saw("DELETE /trucks/1").await);
}

#[tokio::test]
async fn update_swaps_in_the_updated_record() {
    let (api_url, _api) = spawn_api().await;
    let client = truck_client(&api_url).await;
    let actions = client.actions("truck").expect("actions");

    actions
        .update(json!({ "id": "3", "name": "renamed" }))
        .await
        .expect("update");

    let state = client.store().state("truck").await.expect("slice");
    assert_eq!(state.item, json!({ "id": "3", "name": "renamed" }));
}

#[tokio::test]
async fn patch_body_excludes_the_id() {
    let (api_url, api) = spawn_api().await;
    let client = truck_client(&api_url).await;
    let actions = client.actions("truck").expect("actions");

    actions
        .patch(json!({ "id": "3", "name": "patched" }))
        .await
        .expect("patch");

    assert!(api.saw(r#"PATCH /trucks/3 {"name":"patched"}"#).await);
}

#[tokio::test]
async fn http_error_normalizes_server_details() {
    let (api_url, _api) = spawn_api().await;
    let client = truck_client(&api_url).await;
    let actions = client.actions("broken").expect("actions");

    let err = actions.get_many(Value::Null).await.expect_err("must fail");
    let dispatch_err = match err {
        ActionError::Dispatch(dispatch_err) => dispatch_err,
        other => panic!("expected a dispatch rejection, got {other}"),
    };
    let rejection = dispatch_err.rejection().expect("normalized error");
    assert_eq!(rejection.status, 422);
    assert_eq!(rejection.details, json!({ "field": "name" }));

    // the slice never saw a transition
    let state = client.store().state("broken").await.expect("slice");
    assert_eq!(state, store::SliceState::default());
}

#[tokio::test]
async fn http_error_without_details_keeps_the_whole_body() {
    let (api_url, _api) = spawn_api().await;
    let client = truck_client(&api_url).await;
    let actions = client.actions("broken_bare").expect("actions");

    let err = actions.get_many(Value::Null).await.expect_err("must fail");
    let dispatch_err = match err {
        ActionError::Dispatch(dispatch_err) => dispatch_err,
        other => panic!("expected a dispatch rejection, got {other}"),
    };
    let rejection = dispatch_err.rejection().expect("normalized error");
    assert_eq!(rejection.status, 409);
    assert_eq!(rejection.details, json!({ "reason": "duplicate" }));
}

#[tokio::test]
async fn network_failure_is_a_transport_error() {
    // Grab a port that nothing is listening on.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let client = ClientBuilder::new()
        .with_api_url(&format!("http://{addr}"))
        .expect("api url")
        .entity_at("truck", "trucks")
        .build()
        .expect("client");
    let actions = client.actions("truck").expect("actions");

    let err = actions.get_many(Value::Null).await.expect_err("must fail");
    assert!(matches!(
        err,
        ActionError::Transport(TransportError::Network(_))
    ));
}

#[tokio::test]
async fn get_one_requires_an_id_parameter() {
    let (api_url, _api) = spawn_api().await;
    let client = truck_client(&api_url).await;
    let actions = client.actions("truck").expect("actions");

    let err = actions.get_one(json!({})).await.expect_err("must fail");
    assert!(matches!(
        err,
        ActionError::Transport(TransportError::MissingId { .. })
    ));
}

#[tokio::test]
async fn push_with_id_refetches_that_item() {
    let (api_url, api) = spawn_api().await;
    let client = truck_client(&api_url).await;

    client
        .handle_push(r#"{"type":"truck","id":"42"}"#)
        .await
        .expect("push");

    assert!(api.saw("GET /trucks/42").await);
    let state = client.store().state("truck").await.expect("slice");
    assert_eq!(state.item, json!({ "id": "42" }));
}

#[tokio::test]
async fn push_without_id_refetches_the_collection() {
    let (api_url, api) = spawn_api().await;
    let client = truck_client(&api_url).await;

    client
        .handle_push(r#"{"type":"truck"}"#)
        .await
        .expect("push");

    assert!(api.saw("GET /trucks").await);
    let state = client.store().state("truck").await.expect("slice");
    assert_eq!(state.all_items.len(), 2);
}

#[tokio::test]
async fn push_for_unregistered_entity_is_an_explicit_error() {
    let (api_url, _api) = spawn_api().await;
    let client = truck_client(&api_url).await;

    let err = client
        .handle_push(r#"{"type":"boat","id":"1"}"#)
        .await
        .expect_err("must fail");

    assert!(matches!(err, PushError::UnknownEntity(entity) if entity == "boat"));
}

#[tokio::test]
async fn malformed_push_message_is_an_explicit_error() {
    let (api_url, _api) = spawn_api().await;
    let client = truck_client(&api_url).await;

    let err = client
        .handle_push("not json at all")
        .await
        .expect_err("must fail");

    assert!(matches!(err, PushError::Malformed(_)));
}

async fn push_ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket
            .send(WsMessage::Text(r#"{"type":"boat"}"#.into()))
            .await;
        let _ = socket
            .send(WsMessage::Text(r#"{"type":"truck","id":"42"}"#.into()))
            .await;
        let _ = socket.send(WsMessage::Close(None)).await;
    })
}

#[tokio::test]
async fn push_loop_routes_frames_and_survives_bad_ones() {
    let (api_url, _api) = spawn_api().await;
    let client = truck_client(&api_url).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route("/ws", get(push_ws_handler));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    // The unroutable "boat" frame is logged and skipped; the loop ends on
    // the server's close frame.
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        client.run_push_loop(&format!("ws://{addr}/ws")),
    )
    .await
    .expect("loop finishes")
    .expect("loop ok");

    let state = client.store().state("truck").await.expect("slice");
    assert_eq!(state.item, json!({ "id": "42" }));
}

#[test]
fn websocket_url_rewrites_the_scheme() {
    assert_eq!(
        config::websocket_url("http://api.example.com").expect("ws"),
        "ws://api.example.com/ws"
    );
    assert_eq!(
        config::websocket_url("https://api.example.com/").expect("wss"),
        "wss://api.example.com/ws"
    );
    assert!(config::websocket_url("ftp://api.example.com").is_err());
}

#[test]
fn settings_prefer_an_explicit_ws_url() {
    let settings = config::Settings {
        api_url: "http://api.example.com".into(),
        ws_url: Some("wss://push.example.com/feed".into()),
    };
    assert_eq!(settings.push_url().expect("ws"), "wss://push.example.com/feed");

    let derived = config::Settings {
        api_url: "http://api.example.com".into(),
        ws_url: None,
    };
    assert_eq!(derived.push_url().expect("ws"), "ws://api.example.com/ws");
}

#[tokio::test]
async fn duplicate_entity_registration_last_wins() {
    let (api_url, api) = spawn_api().await;
    let client = ClientBuilder::new()
        .with_api_url(&api_url)
        .expect("api url")
        .entity_at("truck", "broken")
        .entity_at("truck", "trucks")
        .build()
        .expect("client");

    client
        .handle_push(r#"{"type":"truck"}"#)
        .await
        .expect("push");

    assert!(api.saw("GET /trucks").await);
    assert!(!api.saw("GET /broken").await);
}

#[tokio::test]
async fn builder_without_backend_fails_to_build() {
    let err = ClientBuilder::new()
        .entity("truck")
        .build()
        .expect_err("must fail");
    assert!(err.to_string().contains("backend"));
}
