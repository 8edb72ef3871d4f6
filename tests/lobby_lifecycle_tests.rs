mod common;

use common::{World, count, test_config};
use std::time::Duration;
use tsunagu::error::ServiceError;
use tsunagu::lobby::core::session::KEY_RELAY_JOIN_CODE;
use tsunagu::lobby::{GameMode, PlayerCharacter};
use tsunagu::memory::StoreOp;
use tsunagu::{LobbyError, LobbyEvent, Phase, Stage};

#[tokio::test]
async fn operations_before_sign_in_are_rejected() {
    let world = World::new();
    let player = world.player(test_config());

    let result = player
        .coordinator
        .create_session("Room", 2, false, GameMode::Conquest)
        .await;

    assert!(matches!(result, Err(LobbyError::InvalidInput(_))));
    assert_eq!(player.coordinator.phase(), Phase::Unauthenticated);
    assert!(player.store.calls().is_empty());
}

#[tokio::test]
async fn sign_in_normalizes_profile_and_lists_lobbies() {
    let world = World::new();
    let mut player = world.player(test_config());

    player.coordinator.authenticate("Big Bob").await.unwrap();

    let calls = player.store.calls();
    let sign_in = &calls[0];
    assert_eq!(sign_in.op, StoreOp::SignIn);
    assert_eq!(sign_in.keys, vec!["Big_Bob".to_string()]);
    assert_eq!(player.store.call_count(StoreOp::Query), 1);
    assert!(matches!(
        player.drain().as_slice(),
        [LobbyEvent::ListChanged { .. }]
    ));
    assert_eq!(player.coordinator.phase(), Phase::Idle);
}

#[tokio::test]
async fn joining_with_blank_code_makes_no_remote_call() {
    let world = World::new();
    let player = world.signed_in("Bob").await;
    player.store.clear_calls();

    let result = player.coordinator.join_by_code("   ").await;

    assert!(matches!(result, Err(LobbyError::InvalidInput(_))));
    assert!(player.store.calls().is_empty());
    assert_eq!(player.coordinator.phase(), Phase::Idle);
}

#[tokio::test]
async fn joining_a_full_lobby_reports_capacity() {
    let world = World::new();
    let (_host, _guest, lobby) = world.lobby_pair(2).await;
    let mut late = world.signed_in("Carol").await;

    let result = late.coordinator.join_by_code(&lobby.lobby_code).await;

    assert_eq!(result, Err(LobbyError::Capacity));
    assert_eq!(late.coordinator.phase(), Phase::Idle);
    assert!(late.drain().is_empty());
}

#[tokio::test]
async fn joined_session_event_carries_the_lobby() {
    let world = World::new();
    let mut host = world.signed_in("Alice").await;

    let lobby = host
        .coordinator
        .create_session("Room", 4, false, GameMode::Conquest)
        .await
        .unwrap();

    assert_eq!(
        host.drain(),
        vec![LobbyEvent::JoinedSession {
            lobby: lobby.clone()
        }]
    );
    assert!(host.coordinator.is_host());
    assert_eq!(lobby.game_mode(), Some(GameMode::Conquest));
    assert_eq!(lobby.relay_join_code(), None);
}

#[tokio::test]
async fn transient_poll_failures_keep_last_snapshot() {
    let world = World::new();
    let mut host = world.signed_in("Alice").await;
    let guest = world.signed_in("Bob").await;
    let lobby = host
        .coordinator
        .create_session("Room", 3, false, GameMode::CaptureTheFlag)
        .await
        .unwrap();
    guest.coordinator.join_by_code(&lobby.lobby_code).await.unwrap();
    host.drain();
    host.store.fail_next(StoreOp::Get, 2);

    assert!(host.coordinator.poll_tick().await.is_err());
    assert!(host.coordinator.poll_tick().await.is_err());
    assert_eq!(host.coordinator.joined_lobby().unwrap().members.len(), 1);
    assert!(host.drain().is_empty());

    host.coordinator.poll_tick().await.unwrap();

    let events = host.drain();
    assert_eq!(events.len(), 1);
    let LobbyEvent::SessionUpdated { lobby: updated } = &events[0] else {
        panic!("expected a session update, got {events:?}");
    };
    assert!(updated.has_member(&guest.id()));
}

#[tokio::test]
async fn unchanged_lobby_emits_nothing() {
    let world = World::new();
    let (mut host, _guest, _lobby) = world.lobby_pair(3).await;

    host.coordinator.poll_tick().await.unwrap();
    host.drain();
    host.coordinator.poll_tick().await.unwrap();

    assert!(host.drain().is_empty());
}

#[tokio::test]
async fn kick_takes_precedence_over_start() {
    let world = World::new();
    let (host, mut guest, _lobby) = world.lobby_pair(2).await;
    host.coordinator.poll_tick().await.unwrap();

    host.coordinator.kick_member(&guest.id()).await.unwrap();
    guest.coordinator.poll_tick().await.unwrap();

    let events = guest.drain();
    assert!(matches!(events.as_slice(), [LobbyEvent::KickedOrLeft { .. }]));
    assert_eq!(guest.coordinator.phase(), Phase::Idle);
    assert_eq!(world.relay.join_calls(), 0);
}

#[tokio::test]
async fn only_the_host_can_kick() {
    let world = World::new();
    let (host, guest, _lobby) = world.lobby_pair(3).await;
    guest.store.clear_calls();

    let result = guest.coordinator.kick_member(&host.id()).await;

    assert!(matches!(result, Err(LobbyError::InvalidInput(_))));
    assert!(guest.store.calls().is_empty());
}

#[tokio::test]
async fn leave_during_poll_discards_the_late_result() {
    let world = World::new();
    let (host, mut guest, _lobby) = world.lobby_pair(2).await;
    host.coordinator.poll_tick().await.unwrap();

    guest.store.hold_gets();
    let poller = guest.coordinator.clone();
    let poll = tokio::spawn(async move { poller.poll_tick().await });
    while guest.store.call_count(StoreOp::Get) == 0 {
        tokio::task::yield_now().await;
    }

    guest.coordinator.leave_session().await.unwrap();
    guest.store.release_gets();
    poll.await.unwrap().unwrap();

    assert_eq!(guest.drain(), vec![LobbyEvent::LeftSession]);
    assert_eq!(guest.coordinator.phase(), Phase::Idle);
    assert_eq!(world.relay.join_calls(), 0);
}

#[tokio::test]
async fn leaving_when_not_joined_is_a_no_op() {
    let world = World::new();
    let mut player = world.signed_in("Alice").await;
    player.store.clear_calls();

    player.coordinator.leave_session().await.unwrap();

    assert!(player.store.calls().is_empty());
    assert!(player.drain().is_empty());
}

#[tokio::test]
async fn last_member_leaving_removes_the_lobby() {
    let world = World::new();
    let mut host = world.signed_in("Alice").await;
    host.coordinator
        .create_session("Room", 2, false, GameMode::Conquest)
        .await
        .unwrap();

    host.coordinator.leave_session().await.unwrap();

    assert_eq!(world.backend.lobby_count(), 0);
    assert!(host.drain().contains(&LobbyEvent::LeftSession));
}

#[tokio::test]
async fn heartbeat_is_only_sent_by_the_host() {
    let world = World::new();
    let (host, guest, _lobby) = world.lobby_pair(2).await;

    host.coordinator.heartbeat_tick().await.unwrap();
    guest.coordinator.heartbeat_tick().await.unwrap();

    assert_eq!(host.store.call_count(StoreOp::Heartbeat), 1);
    assert_eq!(guest.store.call_count(StoreOp::Heartbeat), 0);
}

#[tokio::test]
async fn host_deleting_the_lobby_reaches_the_guest() {
    let world = World::new();
    let (mut host, mut guest, lobby) = world.lobby_pair(3).await;

    host.coordinator.delete_session().await.unwrap();

    assert_eq!(host.drain(), vec![LobbyEvent::LeftSession]);
    assert!(world.backend.lobby(&lobby.id).is_none());

    guest.coordinator.poll_tick().await.unwrap();
    assert_eq!(
        guest.drain(),
        vec![LobbyEvent::KickedOrLeft {
            lobby_id: lobby.id.clone()
        }]
    );
}

#[tokio::test]
async fn game_mode_change_reaches_the_guest() {
    let world = World::new();
    let (mut host, mut guest, _lobby) = world.lobby_pair(3).await;

    let mode = host.coordinator.change_game_mode().await.unwrap();

    assert_eq!(mode, GameMode::Conquest);
    assert!(host.drain().contains(&LobbyEvent::GameModeChanged { mode }));

    guest.coordinator.poll_tick().await.unwrap();
    assert!(guest.drain().contains(&LobbyEvent::GameModeChanged { mode }));

    let result = guest.coordinator.change_game_mode().await;
    assert!(matches!(result, Err(LobbyError::InvalidInput(_))));
    assert_eq!(guest.store.call_count(StoreOp::UpdateMetadata), 0);
}

#[tokio::test]
async fn player_updates_are_written_to_own_attributes() {
    let world = World::new();
    let (_host, guest, lobby) = world.lobby_pair(3).await;

    guest.coordinator.update_player_name("Big Bob").await.unwrap();
    guest
        .coordinator
        .update_player_character(PlayerCharacter::Zombie)
        .await
        .unwrap();

    let stored = world.backend.lobby(&lobby.id).unwrap();
    let member = stored.member(&guest.id()).unwrap();
    assert_eq!(member.display_name(), "Big_Bob");
    assert_eq!(member.character(), PlayerCharacter::Zombie);
    assert_eq!(guest.store.call_count(StoreOp::UpdatePlayer), 2);
}

#[tokio::test]
async fn lobby_list_hides_private_lobbies_and_member_data() {
    let world = World::new();
    let first = world.signed_in("Alice").await;
    let second = world.signed_in("Bob").await;
    let hidden = world.signed_in("Carol").await;
    let mut browser = world.signed_in("Dave").await;

    first
        .coordinator
        .create_session("Older", 4, false, GameMode::Conquest)
        .await
        .unwrap();
    hidden
        .coordinator
        .create_session("Secret", 4, true, GameMode::Conquest)
        .await
        .unwrap();
    second
        .coordinator
        .create_session("Newer", 4, false, GameMode::Conquest)
        .await
        .unwrap();

    let lobbies = browser.coordinator.refresh_list().await.unwrap();

    let names: Vec<_> = lobbies.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, ["Newer", "Older"]);
    assert!(lobbies.iter().all(|l| l.data(KEY_RELAY_JOIN_CODE).is_none()));
    assert!(matches!(
        browser.drain().as_slice(),
        [LobbyEvent::ListChanged { .. }]
    ));
    assert_eq!(browser.coordinator.phase(), Phase::Idle);
}

#[tokio::test]
async fn quick_join_fails_cleanly_without_open_lobbies() {
    let world = World::new();
    let player = world.signed_in("Alice").await;

    let result = player.coordinator.quick_join().await;

    assert!(matches!(
        result,
        Err(LobbyError::Remote(ServiceError::NotFound(_)))
    ));
    assert_eq!(player.coordinator.phase(), Phase::Idle);
}

#[tokio::test]
async fn quick_join_picks_an_open_lobby() {
    let world = World::new();
    let host = world.signed_in("Alice").await;
    let guest = world.signed_in("Bob").await;
    let lobby = host
        .coordinator
        .create_session("Room", 2, false, GameMode::Conquest)
        .await
        .unwrap();

    let joined = guest.coordinator.quick_join().await.unwrap();

    assert_eq!(joined.id, lobby.id);
    assert_eq!(guest.coordinator.phase(), Phase::Joined(Stage::Waiting));
}

#[tokio::test(start_paused = true)]
async fn timers_drive_the_lobby_to_a_network_session() {
    let world = World::new();
    let (mut host, mut guest, _lobby) = world.lobby_pair(2).await;

    let _host_driver = tsunagu::CoordinatorDriver::spawn(host.coordinator.clone());
    let _guest_driver = tsunagu::CoordinatorDriver::spawn(guest.coordinator.clone());

    tokio::time::sleep(Duration::from_secs(16)).await;

    assert!(matches!(
        host.coordinator.phase(),
        Phase::Joined(Stage::InSession { .. })
    ));
    assert!(matches!(
        guest.coordinator.phase(),
        Phase::Joined(Stage::InSession { .. })
    ));
    assert!(host.store.call_count(StoreOp::Heartbeat) >= 1);
    assert_eq!(guest.store.call_count(StoreOp::Heartbeat), 0);
    let is_start = |e: &LobbyEvent| matches!(e, LobbyEvent::StartRequested { .. });
    assert_eq!(count(&host.drain(), is_start), 1);
    assert_eq!(count(&guest.drain(), is_start), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_driver_stops_polling() {
    let world = World::new();
    let (host, _guest, _lobby) = world.lobby_pair(3).await;

    let driver = tsunagu::CoordinatorDriver::spawn(host.coordinator.clone());
    tokio::time::sleep(Duration::from_millis(2500)).await;
    drop(driver);
    let polls = host.store.call_count(StoreOp::Get);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(polls, 2);
    assert_eq!(host.store.call_count(StoreOp::Get), polls);
}

#[tokio::test(start_paused = true)]
async fn list_refresh_timer_runs_when_configured() {
    let world = World::new();
    let config = test_config().with_list_refresh(Some(Duration::from_secs(5)));
    let browser = world.signed_in_with("Dave", config).await;

    let _driver = tsunagu::CoordinatorDriver::spawn(browser.coordinator.clone());
    tokio::time::sleep(Duration::from_millis(10_500)).await;

    // One from sign-in, two from the timer
    assert_eq!(browser.store.call_count(StoreOp::Query), 3);
}

#[tokio::test]
async fn own_write_during_poll_is_not_reported_twice() {
    let world = World::new();
    let (mut host, _guest, _lobby) = world.lobby_pair(3).await;
    host.coordinator.poll_tick().await.unwrap();
    host.drain();

    host.store.hold_gets();
    let poller = host.coordinator.clone();
    let poll = tokio::spawn(async move { poller.poll_tick().await });
    while host.store.call_count(StoreOp::Get) < 2 {
        tokio::task::yield_now().await;
    }
    host.coordinator.change_game_mode().await.unwrap();
    host.store.release_gets();
    poll.await.unwrap().unwrap();
    host.coordinator.poll_tick().await.unwrap();

    let events = host.drain();
    assert_eq!(
        count(&events, |e| matches!(e, LobbyEvent::GameModeChanged { .. })),
        1
    );
    assert_eq!(
        count(&events, |e| matches!(e, LobbyEvent::SessionUpdated { .. })),
        1
    );
    assert_eq!(
        host.coordinator.joined_lobby().unwrap().game_mode(),
        Some(GameMode::Conquest)
    );
}
