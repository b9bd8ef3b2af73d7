//! Failure handling: rollback of partial work and forced termination.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use common::types::RoomId;
use rc_test_utils::{ApiClient, TestRoomServer};
use room_controller::certs::mock::FakeAuthority;
use room_controller::network::launcher::mock::FakeLauncher;
use serde_json::{json, Value};
use std::time::Duration;

async fn error_code(response: reqwest::Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body: Value = response.json().await.unwrap();
    (status, body["error"]["code"].as_str().unwrap().to_string())
}

fn room_dirs(server: &TestRoomServer) -> usize {
    std::fs::read_dir(&server.config().work_dir)
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_issuance_failure_leaves_membership_unchanged() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let bob = client.register("bob").await?;
    let room_id = client.create_room(&alice).await?["room_id"]
        .as_str()
        .unwrap()
        .to_string();

    server.authority().set_fail_sign(true);
    let response = client.join_raw(&room_id, &bob).await?;
    assert_eq!(
        error_code(response).await,
        (502, "SIGNING_ERROR".to_string())
    );

    let detail = client.room_detail(&room_id).await?;
    assert_eq!(detail.as_array().unwrap().len(), 1);
    assert_eq!(
        client.list_rooms().await?,
        json!([{ "room_id": room_id, "member_count": 1 }])
    );
    let member_dir = server
        .config()
        .work_dir
        .join(&room_id)
        .join("members")
        .join(&bob);
    assert!(!member_dir.exists());

    // The same member can join once the authority recovers
    server.authority().set_fail_sign(false);
    let joined = client.join(&room_id, &bob).await?;
    assert_eq!(joined["members"], json!([alice, bob]));

    Ok(())
}

#[tokio::test]
async fn test_network_spawn_failure_creates_no_room() -> Result<()> {
    let server =
        TestRoomServer::spawn_with(FakeLauncher::failing_launch(), FakeAuthority::accepting())
            .await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let response = client.create_room_raw(&alice).await?;
    assert_eq!(
        error_code(response).await,
        (502, "PROCESS_LAUNCH_ERROR".to_string())
    );

    assert_eq!(client.list_rooms().await?, json!([]));
    assert_eq!(room_dirs(&server), 0);

    // Slot and reservation were released, so a later create succeeds
    server.launcher().set_fail_launch(false);
    let created = client.create_room(&alice).await?;
    assert!(created["client_config"]
        .as_str()
        .unwrap()
        .contains("remote vpn.test 1194"));

    Ok(())
}

#[tokio::test]
async fn test_dh_failure_creates_no_room() -> Result<()> {
    let server =
        TestRoomServer::spawn_with(FakeLauncher::failing_dh(), FakeAuthority::accepting()).await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let response = client.create_room_raw(&alice).await?;
    assert_eq!(error_code(response).await.0, 502);

    assert_eq!(server.launcher().launch_count(), 0);
    assert_eq!(room_dirs(&server), 0);

    Ok(())
}

#[tokio::test]
async fn test_server_dying_at_startup_creates_no_room() -> Result<()> {
    let server =
        TestRoomServer::spawn_with(FakeLauncher::exiting_on_start(), FakeAuthority::accepting())
            .await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let response = client.create_room_raw(&alice).await?;
    assert_eq!(
        error_code(response).await,
        (502, "PROCESS_LAUNCH_ERROR".to_string())
    );
    assert_eq!(room_dirs(&server), 0);

    Ok(())
}

#[tokio::test]
async fn test_missing_ca_material_creates_no_room() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let client = ApiClient::new(server.url());
    std::fs::remove_file(server.config().server_key_path())?;

    let alice = client.register("alice").await?;
    let response = client.create_room_raw(&alice).await?;
    assert_eq!(
        error_code(response).await,
        (502, "PROCESS_LAUNCH_ERROR".to_string())
    );

    assert_eq!(server.launcher().dh_count(), 0);
    assert_eq!(room_dirs(&server), 0);

    Ok(())
}

#[tokio::test]
async fn test_host_credential_failure_stops_network() -> Result<()> {
    let server =
        TestRoomServer::spawn_with(FakeLauncher::healthy(), FakeAuthority::failing_keygen())
            .await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let response = client.create_room_raw(&alice).await?;
    assert_eq!(
        error_code(response).await,
        (500, "KEY_GENERATION_ERROR".to_string())
    );

    assert_eq!(server.launcher().launch_count(), 1);
    assert_eq!(server.launcher().alive_count(), 0);
    assert_eq!(client.list_rooms().await?, json!([]));
    assert_eq!(room_dirs(&server), 0);

    Ok(())
}

#[tokio::test]
async fn test_stubborn_server_is_force_killed_on_last_leave() -> Result<()> {
    let server =
        TestRoomServer::spawn_with(FakeLauncher::ignoring_sigterm(), FakeAuthority::accepting())
            .await?;
    let client = ApiClient::new(server.url());

    let alice = client.register("alice").await?;
    let room_id = client.create_room(&alice).await?["room_id"]
        .as_str()
        .unwrap()
        .to_string();

    let left = client.leave(&room_id, &alice).await?;
    assert_eq!(left["members"], json!([]));

    let process = server
        .launcher()
        .process(room_id.parse::<RoomId>().unwrap())
        .unwrap();
    assert!(process.stop_requested());
    assert!(process.force_killed());
    assert!(!process.is_alive());
    assert_eq!(client.list_rooms().await?, json!([]));

    Ok(())
}

#[tokio::test]
async fn test_signing_is_serialized_across_rooms() -> Result<()> {
    let server = TestRoomServer::spawn_with(
        FakeLauncher::healthy(),
        FakeAuthority::slow_signing(Duration::from_millis(20)),
    )
    .await?;
    let client = ApiClient::new(server.url());

    let mut hosts = Vec::new();
    for i in 0..4 {
        hosts.push(client.register(&format!("host-{i}")).await?);
    }

    let mut tasks = Vec::new();
    for host in hosts {
        let client = client.clone();
        tasks.push(tokio::spawn(async move { client.create_room(&host).await }));
    }
    for task in tasks {
        task.await??;
    }

    assert_eq!(client.list_rooms().await?.as_array().unwrap().len(), 4);
    assert_eq!(server.authority().sign_count(), 4);
    assert_eq!(server.authority().max_signing_in_flight(), 1);

    Ok(())
}

#[tokio::test]
async fn test_shutdown_reaps_every_tunnel_server() -> Result<()> {
    let server =
        TestRoomServer::spawn_with(FakeLauncher::ignoring_sigterm(), FakeAuthority::accepting())
            .await?;
    let client = ApiClient::new(server.url());

    for i in 0..3 {
        let host = client.register(&format!("host-{i}")).await?;
        client.create_room(&host).await?;
    }
    assert_eq!(server.launcher().alive_count(), 3);

    server.shutdown().await;

    assert_eq!(server.launcher().alive_count(), 0);
    assert_eq!(room_dirs(&server), 0);

    let alice = client.register("late").await?;
    let response = client.create_room_raw(&alice).await?;
    assert_eq!(error_code(response).await, (503, "UNAVAILABLE".to_string()));

    Ok(())
}
