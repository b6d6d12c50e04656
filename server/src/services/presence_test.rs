use super::*;
use crate::state::test_helpers::{room, test_app_state};
use serde_json::json;

#[test]
fn touch_creates_and_refreshes_entries() {
    let state = test_app_state();
    let doc = room("document:acme/doc-1");
    let user = Uuid::new_v4();

    touch(&state, &doc, user, Some(json!({"line": 3})), 1_000);
    touch(&state, &doc, user, None, 2_000);

    let snapshot = snapshot(&state, &doc);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].last_seen_ms, 2_000);
    // A nil position refreshes liveness without moving the cursor.
    assert_eq!(snapshot[0].position, Some(json!({"line": 3})));
}

#[test]
fn snapshot_is_ordered_by_user_id() {
    let state = test_app_state();
    let doc = room("document:acme/doc-2");
    let users = [Uuid::from_u128(9), Uuid::from_u128(1), Uuid::from_u128(5)];
    for user in users {
        touch(&state, &doc, user, None, 1_000);
    }

    let ordered: Vec<Uuid> = snapshot(&state, &doc).iter().map(|p| p.user_id).collect();
    assert_eq!(ordered, vec![Uuid::from_u128(1), Uuid::from_u128(5), Uuid::from_u128(9)]);
}

#[test]
fn expire_removes_only_entries_past_the_window() {
    let state = test_app_state();
    let doc = room("document:acme/doc-3");
    let chan = room("channel:acme/general");
    let stale_user = Uuid::new_v4();
    let fresh_user = Uuid::new_v4();

    touch(&state, &doc, stale_user, None, 1_000);
    touch(&state, &doc, fresh_user, None, 40_000);
    touch(&state, &chan, stale_user, None, 2_000);

    let mut expired = expire(&state, 50_000, 30_000);
    expired.sort();

    let mut expected = vec![(doc.clone(), stale_user), (chan.clone(), stale_user)];
    expected.sort();
    assert_eq!(expired, expected);

    let remaining: Vec<Uuid> = snapshot(&state, &doc).iter().map(|p| p.user_id).collect();
    assert_eq!(remaining, vec![fresh_user]);
    // The channel's map emptied out entirely and must not linger.
    assert!(!state.presence.contains_key(&chan));
}

#[test]
fn expire_at_exactly_the_window_boundary_keeps_the_entry() {
    let state = test_app_state();
    let doc = room("document:acme/doc-4");
    touch(&state, &doc, Uuid::new_v4(), None, 20_000);

    assert!(expire(&state, 50_000, 30_000).is_empty());
    assert_eq!(snapshot(&state, &doc).len(), 1);
}

#[test]
fn clear_removes_entry_and_purges_empty_rooms() {
    let state = test_app_state();
    let doc = room("document:acme/doc-5");
    let user = Uuid::new_v4();
    touch(&state, &doc, user, None, 1_000);

    assert!(clear(&state, &doc, user));
    assert!(!clear(&state, &doc, user));
    assert!(!state.presence.contains_key(&doc));
}
