//! HTTP contract tests: lobby lifecycle, move submission, and the
//! socket-token endpoint, exercised over a real listener.

mod helpers;

use helpers::spawn_app;
use serde_json::{json, Value};

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn create_lobby_as(
    app: &helpers::TestApp,
    token: &str,
    body: Value,
) -> (reqwest::StatusCode, Value) {
    let response = client()
        .post(app.http("/lobby"))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .expect("request");
    let status = response.status();
    let body = response.json().await.unwrap_or(Value::Null);
    (status, body)
}

fn lobby_body() -> Value {
    json!({
        "name": "API Lobby",
        "gameType": "tic-tac-toe",
        "maxPlayers": 2,
        "turnTimerSeconds": 60,
    })
}

#[tokio::test]
async fn create_join_start_and_move_over_http() {
    let app = spawn_app().await;
    let alice = app.user_token("u1", "Alice");
    let bob = app.user_token("u2", "Bob");

    let (status, created) = create_lobby_as(&app, &alice, lobby_body()).await;
    assert_eq!(status, reqwest::StatusCode::CREATED);
    let code = created["lobby"]["code"].as_str().unwrap().to_string();

    // Both players join.
    for token in [&alice, &bob] {
        let response = client()
            .post(app.http(&format!("/lobby/{code}")))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert!(body["player"]["principalId"].is_string());
        assert!(body["game"].is_object());
    }

    // Creator starts.
    let response = client()
        .post(app.http(&format!("/lobby/{code}/start")))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let started: Value = response.json().await.unwrap();
    let game_id = started["game"]["gameId"].as_str().unwrap().to_string();
    assert_eq!(started["game"]["status"], "playing");

    // Submit a move through POST /game/:id/state.
    let response = client()
        .post(app.http(&format!("/game/{game_id}/state")))
        .bearer_auth(&alice)
        .json(&json!({ "move": { "type": "place", "data": { "row": 0, "col": 0 } } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let moved: Value = response.json().await.unwrap();
    assert_eq!(moved["game"]["currentPlayerIndex"], 1);

    // Out-of-turn move is a structured rejection.
    let response = client()
        .post(app.http(&format!("/game/{game_id}/state")))
        .bearer_auth(&alice)
        .json(&json!({ "move": { "type": "place", "data": { "row": 0, "col": 1 } } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "NOT_YOUR_TURN");
    assert!(error["translationKey"].is_string());
}

#[tokio::test]
async fn lobby_endpoints_require_authentication() {
    let app = spawn_app().await;
    let response = client()
        .post(app.http("/lobby"))
        .json(&lobby_body())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "AUTH_REQUIRED");
}

#[tokio::test]
async fn wrong_password_is_forbidden_and_full_lobby_rejected() {
    let app = spawn_app().await;
    let alice = app.user_token("u1", "Alice");
    let (_, created) = create_lobby_as(
        &app,
        &alice,
        json!({
            "name": "Secret Lobby",
            "gameType": "tic-tac-toe",
            "maxPlayers": 2,
            "turnTimerSeconds": 60,
            "password": "hunter2",
        }),
    )
    .await;
    let code = created["lobby"]["code"].as_str().unwrap();

    let bob = app.user_token("u2", "Bob");
    let response = client()
        .post(app.http(&format!("/lobby/{code}")))
        .bearer_auth(&bob)
        .json(&json!({ "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

    let response = client()
        .post(app.http(&format!("/lobby/{code}")))
        .bearer_auth(&bob)
        .json(&json!({ "password": "hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // Creator takes the second seat; a third join hits capacity.
    client()
        .post(app.http(&format!("/lobby/{code}")))
        .bearer_auth(&alice)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    let carol = app.user_token("u3", "Carol");
    let response = client()
        .post(app.http(&format!("/lobby/{code}")))
        .bearer_auth(&carol)
        .json(&json!({ "password": "hunter2" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "LOBBY_FULL");
}

#[tokio::test]
async fn unknown_lobby_is_not_found() {
    let app = spawn_app().await;
    let alice = app.user_token("u1", "Alice");
    let response = client()
        .get(app.http("/lobby/ZZZZ99"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn add_bot_is_creator_only_over_http() {
    let app = spawn_app().await;
    let alice = app.user_token("u1", "Alice");
    let (_, created) = create_lobby_as(&app, &alice, lobby_body()).await;
    let code = created["lobby"]["code"].as_str().unwrap();
    client()
        .post(app.http(&format!("/lobby/{code}")))
        .bearer_auth(&alice)
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    let bob = app.user_token("u2", "Bob");
    let response = client()
        .post(app.http(&format!("/lobby/{code}/add-bot")))
        .bearer_auth(&bob)
        .json(&json!({ "difficulty": "hard" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

    let response = client()
        .post(app.http(&format!("/lobby/{code}/add-bot")))
        .bearer_auth(&alice)
        .json(&json!({ "difficulty": "hard" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["player"]["isBot"], true);
}

#[tokio::test]
async fn guest_header_works_for_moves() {
    let app = spawn_app().await;
    // Provision the guest by resolving a guest token once.
    let token = app.guest_token("guest-http", "Wanderer");
    app.server.identity().resolve(&token).await.unwrap();

    let alice = app.user_token("u1", "Alice");
    let (_, created) = create_lobby_as(&app, &alice, lobby_body()).await;
    let code = created["lobby"]["code"].as_str().unwrap().to_string();
    client()
        .post(app.http(&format!("/lobby/{code}")))
        .bearer_auth(&alice)
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    // Guest joins via the X-Guest-Id header.
    let response = client()
        .post(app.http(&format!("/lobby/{code}")))
        .header("X-Guest-Id", "guest-http")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let response = client()
        .post(app.http(&format!("/lobby/{code}/start")))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    let started: Value = response.json().await.unwrap();
    let game_id = started["game"]["gameId"].as_str().unwrap().to_string();

    // Alice (seat 0) moves, then the guest moves via header auth.
    client()
        .post(app.http(&format!("/game/{game_id}/state")))
        .bearer_auth(&alice)
        .json(&json!({ "move": { "type": "place", "data": { "row": 0, "col": 0 } } }))
        .send()
        .await
        .unwrap();
    let response = client()
        .post(app.http(&format!("/game/{game_id}/state")))
        .header("X-Guest-Id", "guest-http")
        .json(&json!({ "move": { "type": "place", "data": { "row": 1, "col": 1 } } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn socket_token_round_trips_through_identity() {
    let app = spawn_app().await;
    let alice = app.user_token("u1", "Alice");
    let response = client()
        .get(app.http("/socket/token"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let token = body["token"].as_str().unwrap();

    let principal = app.server.identity().resolve(token).await.unwrap();
    assert_eq!(principal.id, "u1");
}

#[tokio::test]
async fn list_lobbies_filters_by_game_type() {
    let app = spawn_app().await;
    let alice = app.user_token("u1", "Alice");
    create_lobby_as(&app, &alice, lobby_body()).await;
    create_lobby_as(
        &app,
        &alice,
        json!({
            "name": "Dice Night",
            "gameType": "yahtzee",
            "maxPlayers": 4,
            "turnTimerSeconds": 90,
        }),
    )
    .await;

    let response = client()
        .get(app.http("/lobby?gameType=yahtzee"))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    let lobbies = body["lobbies"].as_array().unwrap();
    assert_eq!(lobbies.len(), 1);
    assert_eq!(lobbies[0]["gameType"], "yahtzee");
    assert!(lobbies[0].get("passwordHash").is_none());
}
