use super::*;
use crate::state::test_helpers::{room, seed_connection, test_app_state};
use crate::services::rooms;
use tokio::time::{Duration, timeout};

async fn recv_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("event receive timed out")
        .expect("channel closed")
}

#[tokio::test]
async fn admit_with_dev_token_registers_connection() {
    let state = test_app_state();
    let user = Uuid::new_v4();

    let admitted = admit(&state, &format!("{user}:acme"))
        .await
        .expect("admission should succeed");

    assert_eq!(admitted.identity.user_id, user);
    let info = lookup(&state, admitted.connection_id).expect("connection should be registered");
    assert_eq!(info.user_id, user);
    assert_eq!(info.workspace, "acme");
}

#[tokio::test]
async fn admit_with_bad_token_is_unauthorized() {
    let state = test_app_state();
    let err = admit(&state, "nonsense").await.unwrap_err();
    assert!(matches!(err, AuthError::Rejected));
    assert!(state.conns.is_empty());
}

#[tokio::test]
async fn touch_refreshes_last_seen() {
    let state = test_app_state();
    let (conn_id, _rx) = seed_connection(&state, Uuid::new_v4(), "acme");

    state.conns.get_mut(&conn_id).unwrap().last_seen_ms = 0;
    touch(&state, conn_id);
    assert!(state.conns.get(&conn_id).unwrap().last_seen_ms > 0);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let state = test_app_state();
    let (conn_id, _rx) = seed_connection(&state, Uuid::new_v4(), "acme");

    assert!(disconnect(&state, conn_id, "test"));
    assert!(!disconnect(&state, conn_id, "duplicate signal"));
    assert!(!disconnect(&state, Uuid::new_v4(), "never existed"));
}

#[tokio::test]
async fn disconnect_cleans_rooms_presence_and_notifies_peers() {
    let state = test_app_state();
    let doc = room("document:acme/doc-9");
    let user_a = Uuid::new_v4();
    let user_b = Uuid::new_v4();
    let (conn_a, _rx_a) = seed_connection(&state, user_a, "acme");
    let (conn_b, mut rx_b) = seed_connection(&state, user_b, "acme");

    rooms::join(&state, conn_a, &doc).unwrap();
    rooms::join(&state, conn_b, &doc).unwrap();
    // B joined last, so its queue starts empty; nothing to drain.

    disconnect(&state, conn_a, "socket closed");

    assert!(lookup(&state, conn_a).is_none());
    assert_eq!(rooms::members(&state, &doc), vec![conn_b]);
    let snapshot = crate::services::presence::snapshot(&state, &doc);
    assert!(snapshot.iter().all(|p| p.user_id != user_a));

    let event = recv_event(&mut rx_b).await;
    assert_eq!(event, ServerEvent::MemberLeft { room: doc, user_id: user_a });
}

#[tokio::test]
async fn evicted_connection_never_reappears_in_members() {
    let state = test_app_state();
    let doc = room("document:acme/doc-10");
    let (conn_a, _rx_a) = seed_connection(&state, Uuid::new_v4(), "acme");
    let (conn_b, _rx_b) = seed_connection(&state, Uuid::new_v4(), "acme");

    rooms::join(&state, conn_a, &doc).unwrap();
    rooms::join(&state, conn_b, &doc).unwrap();
    disconnect(&state, conn_a, "evicted");

    for _ in 0..3 {
        assert!(!rooms::members(&state, &doc).contains(&conn_a));
    }
}

#[tokio::test]
async fn disconnect_keeps_presence_while_user_has_another_connection() {
    let state = test_app_state();
    let doc = room("document:acme/doc-11");
    let user = Uuid::new_v4();
    // Two tabs of the same user.
    let (tab_one, _rx1) = seed_connection(&state, user, "acme");
    let (tab_two, _rx2) = seed_connection(&state, user, "acme");

    rooms::join(&state, tab_one, &doc).unwrap();
    rooms::join(&state, tab_two, &doc).unwrap();

    disconnect(&state, tab_one, "tab closed");

    let snapshot = crate::services::presence::snapshot(&state, &doc);
    assert!(snapshot.iter().any(|p| p.user_id == user), "presence must survive while a connection remains");
}
