use super::*;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::time::{Duration, timeout};

type HubSocket = WebSocketStream<TcpStream>;

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base: Duration::from_millis(10),
        cap: Duration::from_millis(50),
        jitter: Duration::ZERO,
        max_attempts: None,
    }
}

async fn hub_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}/api/ws", listener.local_addr().expect("local addr"));
    (listener, url)
}

async fn hub_accept(listener: &TcpListener) -> HubSocket {
    let (stream, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .expect("accept timed out")
        .expect("accept");
    tokio_tungstenite::accept_async(stream).await.expect("ws accept")
}

async fn hub_recv(ws: &mut HubSocket) -> ClientEvent {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("hub receive timed out")
            .expect("socket closed")
            .expect("transport error");
        if let Message::Text(text) = msg {
            return wire::decode_client(&text).expect("decode");
        }
    }
}

async fn hub_send(ws: &mut HubSocket, event: &ServerEvent) {
    let json = wire::encode(event).expect("encode");
    ws.send(Message::text(json)).await.expect("send");
}

async fn next_notification(client: &mut RoomClient) -> Notification {
    timeout(Duration::from_secs(2), client.next())
        .await
        .expect("notification timed out")
        .expect("notification stream closed")
}

/// Accept a socket and complete the admission handshake for `user`.
async fn admit(listener: &TcpListener, user: Uuid) -> HubSocket {
    let mut ws = hub_accept(listener).await;
    let event = hub_recv(&mut ws).await;
    assert!(matches!(event, ClientEvent::Connect { .. }));
    hub_send(
        &mut ws,
        &ServerEvent::Connected { connection_id: Uuid::new_v4(), user_id: user },
    )
    .await;
    ws
}

fn doc(text: &str) -> RoomId {
    text.parse().expect("valid test room id")
}

#[tokio::test]
async fn handshake_join_and_update_reach_the_caller() {
    let (listener, url) = hub_listener().await;
    let user = Uuid::new_v4();
    let mut client = RoomClient::spawn(url, format!("{user}:acme"), fast_policy());

    let mut hub = hub_accept(&listener).await;
    let ClientEvent::Connect { token } = hub_recv(&mut hub).await else {
        panic!("first event must be connect");
    };
    assert_eq!(token, format!("{user}:acme"));
    hub_send(
        &mut hub,
        &ServerEvent::Connected { connection_id: Uuid::new_v4(), user_id: user },
    )
    .await;
    assert!(matches!(
        next_notification(&mut client).await,
        Notification::Connected { user_id, .. } if user_id == user
    ));

    let room = doc("document:acme/doc-1");
    client.join(room.clone()).await.unwrap();
    let event = hub_recv(&mut hub).await;
    assert_eq!(event, ClientEvent::JoinRoom { room: room.clone() });

    hub_send(&mut hub, &ServerEvent::Joined { room: room.clone(), presence: vec![] }).await;
    assert_eq!(
        next_notification(&mut client).await,
        Notification::Joined { room: room.clone(), snapshot: vec![] }
    );

    let sender = Uuid::new_v4();
    hub_send(
        &mut hub,
        &ServerEvent::Update {
            room: room.clone(),
            sender,
            seq: 1,
            payload: json!({"op": "insert"}),
            ts: 1_000,
        },
    )
    .await;
    assert_eq!(
        next_notification(&mut client).await,
        Notification::Update { room, sender, seq: 1, payload: json!({"op": "insert"}) }
    );
}

#[tokio::test]
async fn desired_rooms_are_replayed_after_a_reconnect() {
    let (listener, url) = hub_listener().await;
    let user = Uuid::new_v4();
    let mut client = RoomClient::spawn(url, format!("{user}:acme"), fast_policy());
    let room = doc("document:acme/doc-replay");

    let mut hub = admit(&listener, user).await;
    assert!(matches!(next_notification(&mut client).await, Notification::Connected { .. }));

    client.join(room.clone()).await.unwrap();
    assert_eq!(hub_recv(&mut hub).await, ClientEvent::JoinRoom { room: room.clone() });

    // Hub goes away mid-session.
    drop(hub);
    assert_eq!(next_notification(&mut client).await, Notification::Disconnected);

    // The client redials and re-joins without any caller involvement.
    let mut hub = admit(&listener, user).await;
    assert!(matches!(next_notification(&mut client).await, Notification::Connected { .. }));
    assert_eq!(hub_recv(&mut hub).await, ClientEvent::JoinRoom { room });
}

#[tokio::test]
async fn membership_edits_while_disconnected_apply_at_the_next_handshake() {
    let (listener, url) = hub_listener().await;
    let user = Uuid::new_v4();
    let slow_policy = ReconnectPolicy {
        base: Duration::from_millis(500),
        cap: Duration::from_secs(1),
        jitter: Duration::ZERO,
        max_attempts: None,
    };
    let mut client = RoomClient::spawn(url, format!("{user}:acme"), slow_policy);
    let room = doc("document:acme/doc-offline");

    let hub = admit(&listener, user).await;
    assert!(matches!(next_notification(&mut client).await, Notification::Connected { .. }));
    drop(hub);
    assert_eq!(next_notification(&mut client).await, Notification::Disconnected);

    // Issued during the backoff window: the join is remembered, the publish
    // is shed.
    client.join(room.clone()).await.unwrap();
    client.publish(room.clone(), json!({"op": "stale"})).await.unwrap();

    let mut hub = admit(&listener, user).await;
    assert!(matches!(next_notification(&mut client).await, Notification::Connected { .. }));
    assert_eq!(hub_recv(&mut hub).await, ClientEvent::JoinRoom { room });

    let quiet = timeout(Duration::from_millis(150), hub.next()).await;
    assert!(quiet.is_err(), "the offline publish must not be replayed");
}

#[tokio::test]
async fn pings_are_answered_without_reaching_the_caller() {
    let (listener, url) = hub_listener().await;
    let user = Uuid::new_v4();
    let mut client = RoomClient::spawn(url, format!("{user}:acme"), fast_policy());

    let mut hub = admit(&listener, user).await;
    assert!(matches!(next_notification(&mut client).await, Notification::Connected { .. }));

    hub_send(&mut hub, &ServerEvent::Ping).await;
    assert_eq!(hub_recv(&mut hub).await, ClientEvent::Pong);

    // The next thing the caller sees is real traffic, not the ping.
    let room = doc("document:acme/doc-ping");
    hub_send(&mut hub, &ServerEvent::MemberLeft { room: room.clone(), user_id: user }).await;
    assert_eq!(
        next_notification(&mut client).await,
        Notification::MemberLeft { room, user_id: user }
    );
}

#[tokio::test]
async fn unauthorized_rejection_ends_the_session_for_good() {
    let (listener, url) = hub_listener().await;
    let mut client = RoomClient::spawn(url, "bogus".into(), fast_policy());

    let mut hub = hub_accept(&listener).await;
    hub_recv(&mut hub).await;
    hub_send(
        &mut hub,
        &ServerEvent::Rejected {
            code: wire::codes::UNAUTHORIZED.to_owned(),
            message: "identity token rejected".to_owned(),
        },
    )
    .await;

    assert!(matches!(
        next_notification(&mut client).await,
        Notification::Rejected { code, .. } if code == wire::codes::UNAUTHORIZED
    ));
    // Terminal: the stream closes instead of reconnecting.
    assert!(timeout(Duration::from_secs(1), client.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn gives_up_after_the_attempt_budget_is_spent() {
    let (listener, url) = hub_listener().await;
    // Nothing listens on the port anymore.
    drop(listener);

    let policy = ReconnectPolicy {
        base: Duration::from_millis(5),
        cap: Duration::from_millis(10),
        jitter: Duration::ZERO,
        max_attempts: Some(2),
    };
    let mut client = RoomClient::spawn(url, "token".into(), policy);

    assert_eq!(next_notification(&mut client).await, Notification::GaveUp);
    assert!(timeout(Duration::from_secs(1), client.next()).await.unwrap().is_none());
    assert!(client.join(doc("document:acme/doc-x")).await.is_err());
}
