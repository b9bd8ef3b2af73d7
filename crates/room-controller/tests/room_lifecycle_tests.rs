//! End-to-end room lifecycle over real HTTP.
//!
//! Each test spawns a `TestRoomServer` (fake tunnel servers and certificate
//! authority, real actors and filesystem) and drives it with `ApiClient`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use common::types::RoomId;
use rc_test_utils::{ApiClient, TestRoomServer};
use room_controller::certs::mock::FakeAuthority;
use room_controller::network::launcher::mock::FakeLauncher;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn room_id_of(body: &Value) -> String {
    body["room_id"].as_str().unwrap().to_string()
}

fn parse_room_id(raw: &str) -> RoomId {
    raw.parse().unwrap()
}

async fn error_code(response: reqwest::Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body: Value = response.json().await.unwrap();
    (status, body["error"]["code"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn test_two_member_room_lifecycle() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let bob = client.register("bob").await?;
    assert_ne!(alice, bob);

    let created = client.create_room(&alice).await?;
    let room_id = room_id_of(&created);
    assert_eq!(created["host"], json!(alice));
    assert_eq!(created["members"], json!([alice]));
    let host_config = created["client_config"].as_str().unwrap();
    assert!(host_config.contains("remote vpn.test 1194"));

    let joined = client.join(&room_id, &bob).await?;
    assert_eq!(joined["members"], json!([alice, bob]));
    assert_ne!(joined["client_config"].as_str().unwrap(), host_config);

    let rooms = client.list_rooms().await?;
    assert_eq!(rooms, json!([{ "room_id": room_id, "member_count": 2 }]));

    let detail = client.room_detail(&room_id).await?;
    assert_eq!(detail[0]["display_name"], "alice");
    assert_eq!(detail[1]["display_name"], "bob");
    assert_eq!(detail[1]["origin_address"], "127.0.0.1");

    let left = client.leave(&room_id, &alice).await?;
    assert_eq!(left["members"], json!([bob]));

    let left = client.leave(&room_id, &bob).await?;
    assert_eq!(left["members"], json!([]));

    assert_eq!(client.list_rooms().await?, json!([]));

    // Destroyed room leaves no process and no working directory behind
    let process = server.launcher().process(parse_room_id(&room_id)).unwrap();
    assert!(!process.is_alive());
    assert!(process.stop_requested());
    assert!(!server.config().work_dir.join(&room_id).exists());

    let response = reqwest::get(format!("{}/api/v1/rooms/{room_id}", server.url())).await?;
    assert_eq!(response.status(), 404);

    Ok(())
}

#[tokio::test]
async fn test_member_directory_holds_client_config() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let bob = client.register("bob").await?;
    let room_id = room_id_of(&client.create_room(&alice).await?);
    let joined = client.join(&room_id, &bob).await?;

    let member_dir = server
        .config()
        .work_dir
        .join(&room_id)
        .join("members")
        .join(&bob);
    let on_disk = std::fs::read_to_string(member_dir.join("client.ovpn"))?;
    assert_eq!(on_disk, joined["client_config"].as_str().unwrap());

    // Only the rendered configuration remains after issuance
    let entries: Vec<String> = std::fs::read_dir(&member_dir)?
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["client.ovpn".to_string()]);

    client.leave(&room_id, &bob).await?;
    assert!(!member_dir.exists());

    Ok(())
}

#[tokio::test]
async fn test_create_room_for_unregistered_host() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());

    let response = client.create_room_raw(&RoomId::new().to_string()).await?;
    assert_eq!(error_code(response).await, (404, "NOT_FOUND".to_string()));

    assert_eq!(client.list_rooms().await?, json!([]));
    assert_eq!(server.launcher().launch_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_join_is_conflict() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let room_id = room_id_of(&client.create_room(&alice).await?);

    let response = client.join_raw(&room_id, &alice).await?;
    assert_eq!(
        error_code(response).await,
        (409, "ALREADY_MEMBER".to_string())
    );

    let detail = client.room_detail(&room_id).await?;
    assert_eq!(detail.as_array().unwrap().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_leave_by_non_member_is_conflict() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let bob = client.register("bob").await?;
    let room_id = room_id_of(&client.create_room(&alice).await?);

    let response = client.leave_raw(&room_id, &bob).await?;
    assert_eq!(error_code(response).await, (409, "NOT_A_MEMBER".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_join_unknown_room_or_user() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let room_id = room_id_of(&client.create_room(&alice).await?);

    let response = client.join_raw(&RoomId::new().to_string(), &alice).await?;
    assert_eq!(error_code(response).await, (404, "NOT_FOUND".to_string()));

    let response = client.join_raw(&room_id, &RoomId::new().to_string()).await?;
    assert_eq!(error_code(response).await, (404, "NOT_FOUND".to_string()));

    let response = client.join_raw("not-a-room", &alice).await?;
    assert_eq!(error_code(response).await, (404, "NOT_FOUND".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_concurrent_joins_all_succeed() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());

    let host = client.register("host").await?;
    let room_id = room_id_of(&client.create_room(&host).await?);

    let mut guests = Vec::new();
    for i in 0..10 {
        guests.push(client.register(&format!("guest-{i}")).await?);
    }

    let mut tasks = Vec::new();
    for guest in guests.clone() {
        let client = client.clone();
        let room_id = room_id.clone();
        tasks.push(tokio::spawn(async move { client.join(&room_id, &guest).await }));
    }
    for task in tasks {
        task.await??;
    }

    let detail = client.room_detail(&room_id).await?;
    let members = detail.as_array().unwrap();
    assert_eq!(members.len(), 11);
    assert_eq!(members[0]["user_id"], json!(host));
    for guest in &guests {
        assert!(members.iter().any(|m| m["user_id"] == json!(guest)));
    }

    // Each join signed exactly once, never two at a time
    assert_eq!(server.authority().sign_count(), 11);
    assert_eq!(server.authority().max_signing_in_flight(), 1);

    Ok(())
}

#[tokio::test]
async fn test_rejoin_issues_distinct_credentials() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let bob = client.register("bob").await?;
    let room_id = room_id_of(&client.create_room(&alice).await?);

    let first = client.join(&room_id, &bob).await?;
    client.leave(&room_id, &bob).await?;
    let second = client.join(&room_id, &bob).await?;

    assert_ne!(first["client_config"], second["client_config"]);
    assert_eq!(second["members"], json!([alice, bob]));

    Ok(())
}

#[tokio::test]
async fn test_each_room_gets_its_own_port() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let first = client.create_room(&alice).await?;
    let second = client.create_room(&alice).await?;

    assert!(first["client_config"]
        .as_str()
        .unwrap()
        .contains("remote vpn.test 1194"));
    assert!(second["client_config"]
        .as_str()
        .unwrap()
        .contains("remote vpn.test 1195"));

    // Slot 0 is released with its room and reused
    client.leave(&room_id_of(&first), &alice).await?;
    let third = client.create_room(&alice).await?;
    assert!(third["client_config"]
        .as_str()
        .unwrap()
        .contains("remote vpn.test 1194"));

    Ok(())
}

#[tokio::test]
async fn test_health_reports_counts() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    client.register("bob").await?;
    client.create_room(&alice).await?;

    let health: Value = reqwest::get(format!("{}/health", server.url()))
        .await?
        .json()
        .await?;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["active_rooms"], 1);
    assert_eq!(health["registered_users"], 2);

    server.shutdown().await;

    let health: Value = reqwest::get(format!("{}/health", server.url()))
        .await?
        .json()
        .await?;
    assert_eq!(health["status"], "draining");
    assert_eq!(health["active_rooms"], 0);
    assert_eq!(server.launcher().alive_count(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_room_list_never_shows_empty_rooms() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let client = client.clone();
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut empty_seen = 0;
            while !done.load(Ordering::SeqCst) {
                let rooms = client.list_rooms().await.unwrap();
                empty_seen += rooms
                    .as_array()
                    .unwrap()
                    .iter()
                    .filter(|room| room["member_count"] == 0)
                    .count();
            }
            empty_seen
        })
    };

    for i in 0..20 {
        let host = client.register(&format!("host-{i}")).await?;
        let room_id = room_id_of(&client.create_room(&host).await?);
        client.leave(&room_id, &host).await?;
    }

    done.store(true, Ordering::SeqCst);
    assert_eq!(reader.await?, 0);
    assert_eq!(client.list_rooms().await?, json!([]));

    Ok(())
}

#[tokio::test]
async fn test_room_list_and_detail_agree_during_failing_join() -> Result<()> {
    let server = TestRoomServer::spawn_with(
        FakeLauncher::healthy(),
        FakeAuthority::slow_signing(Duration::from_millis(300)),
    )
    .await?;
    let client = ApiClient::new(server.url());

    let host = client.register("host").await?;
    let guest = client.register("guest").await?;
    let room_id = room_id_of(&client.create_room(&host).await?);

    server.authority().set_fail_sign(true);
    let join = {
        let client = client.clone();
        let room_id = room_id.clone();
        tokio::spawn(async move { client.join_raw(&room_id, &guest).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let rooms = client.list_rooms().await?;
    assert_eq!(rooms, json!([{ "room_id": room_id, "member_count": 1 }]));

    let response = join.await??;
    assert_eq!(error_code(response).await, (502, "SIGNING_ERROR".to_string()));

    let rooms = client.list_rooms().await?;
    assert_eq!(rooms, json!([{ "room_id": room_id, "member_count": 1 }]));
    let detail = client.room_detail(&room_id).await?;
    assert_eq!(detail.as_array().unwrap().len(), 1);

    Ok(())
}
