use super::*;
use crate::clock::ManualClock;
use crate::config::{BreakerConfig, RateLimitConfig};
use crate::domain::{
    CashoutTarget, CrashBetStatus, GameSettings, PlaceBetRequest, Ticket,
};
use crate::fairness::{
    crash_point, derive, extend_seed_chain, hash_seed, round_seed_chain, verify_round, ChickenCurve,
    FixedSeedSource,
};
use crate::repository::MemoryStore;
use shared::{GameKind, Multiplier};

const START_MS: i64 = 1_700_000_000_000;

struct Harness {
    coordinator: SettlementCoordinator,
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
}

fn harness_with(config: EngineConfig, seeds: Vec<String>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at_epoch_ms(START_MS));
    let coordinator = SettlementCoordinator::new(store.clone(), &config)
        .with_clock(clock.clone())
        .with_seed_source(Box::new(FixedSeedSource::new(seeds)));
    Harness {
        coordinator,
        clock,
        store,
    }
}

fn harness(seeds: Vec<String>) -> Harness {
    harness_with(EngineConfig::default(), seeds)
}

fn bx(n: u64) -> Amount {
    Amount::from_bx(n).unwrap()
}

fn bet_request(user: i64, game: GameKind, stake: u64, client_seed: &str) -> PlaceBetRequest {
    PlaceBetRequest {
        user_id: UserId(user),
        game,
        stake: bx(stake),
        client_seed: client_seed.to_string(),
        auto_cashout: None,
        request_id: None,
    }
}

/// Server seed that makes round `round_id` crash inside `[min, max]`
/// hundredths once the given client seeds have been placed, in order
fn crash_seed(round_id: u64, client_seeds: &[&str], min: u32, max: u32) -> String {
    let chain = client_seeds
        .iter()
        .fold(round_seed_chain(RoundId(round_id)), |chain, seed| extend_seed_chain(&chain, seed));
    (0..)
        .map(|i| format!("server-{}", i))
        .find(|seed| {
            let point = crash_point(&derive(seed, &chain, round_id), 300).hundredths();
            (min..=max).contains(&point)
        })
        .unwrap()
}

/// Client seed under which the first `steps` chicken steps survive
fn surviving_client_seed(server_seed: &str, steps: u32) -> String {
    let curve = ChickenCurve::default();
    (0..)
        .map(|i| format!("client-{}", i))
        .find(|c| (0..steps).all(|step| curve.survives(server_seed, c, step)))
        .unwrap()
}

async fn fund(h: &Harness, user: i64, amount: u64) {
    h.coordinator
        .ledger()
        .deposit(UserId(user), Asset::Bx, bx(amount), &format!("fund-{}", user))
        .await
        .unwrap();
}

fn bet_id(receipt: &crate::domain::PlaceBetReceipt) -> BetId {
    match receipt.ticket {
        Ticket::Bet { bet_id, .. } => bet_id,
        Ticket::Session { .. } => panic!("expected a crash bet"),
    }
}

fn session_id(receipt: &crate::domain::PlaceBetReceipt) -> SessionId {
    match receipt.ticket {
        Ticket::Session { session_id } => session_id,
        Ticket::Bet { .. } => panic!("expected a chicken session"),
    }
}

#[tokio::test]
async fn test_crash_round_cashout_and_loss() {
    let seed = crash_seed(1, &["alice", "bob"], 300, 2_000);
    let h = harness(vec![seed.clone()]);
    fund(&h, 1, 100).await;
    fund(&h, 2, 100).await;

    let round = h.coordinator.open_round().await.unwrap();
    assert_eq!(round.server_seed_hash, hash_seed(&seed));

    let first = h
        .coordinator
        .place_bet(bet_request(1, GameKind::Crash, 20, "alice"))
        .await
        .unwrap();
    let second = h
        .coordinator
        .place_bet(bet_request(2, GameKind::Crash, 20, "bob"))
        .await
        .unwrap();
    assert_eq!(first.committed_seed_hash, round.server_seed_hash);

    h.coordinator.activate_round(round.round_id).await.unwrap();
    // Progression near 2.05x
    h.clock.advance_ms(12_000);
    let receipt = h
        .coordinator
        .cashout(
            UserId(1),
            CashoutTarget::Bet {
                bet_id: bet_id(&first),
                multiplier: Some(Multiplier::from_hundredths(200)),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(receipt.payout, bx(40));
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(120));

    h.clock.advance_ms(60_000);
    let reveal = h.coordinator.resolve_round(round.round_id).await.unwrap();
    tokio_test::assert_ok!(verify_round(&reveal));
    assert_eq!(reveal.server_seed, seed);

    let lost = h.coordinator.crash_bet(UserId(2), bet_id(&second)).await.unwrap();
    assert_eq!(lost.status, CrashBetStatus::Lost);
    assert_eq!(h.coordinator.balance(UserId(2), Asset::Bx).await.unwrap(), bx(80));

    // One debit and at most one credit per bet
    let ledger = h.coordinator.ledger();
    assert_eq!(ledger.journal(&crate::domain::bet_reference(bet_id(&first))).await.unwrap().len(), 2);
    assert_eq!(ledger.journal(&crate::domain::bet_reference(bet_id(&second))).await.unwrap().len(), 1);
    assert_eq!(h.store.total_balance(Asset::Bx).await.unwrap(), 0);
}

#[tokio::test]
async fn test_bets_need_an_open_round() {
    let h = harness(vec![crash_seed(1, &["early"], 300, 2_000)]);
    fund(&h, 1, 100).await;
    assert!(matches!(
        h.coordinator.place_bet(bet_request(1, GameKind::Crash, 5, "early")).await,
        Err(EngineError::RoundNotOpen)
    ));

    let round = h.coordinator.open_round().await.unwrap();
    h.coordinator
        .place_bet(bet_request(1, GameKind::Crash, 5, "early"))
        .await
        .unwrap();
    h.coordinator.activate_round(round.round_id).await.unwrap();
    assert!(matches!(
        h.coordinator.place_bet(bet_request(1, GameKind::Crash, 5, "late")).await,
        Err(EngineError::RoundNotOpen)
    ));
    // A refused placement leaves no debit behind
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(95));
}

#[tokio::test]
async fn test_reveal_waits_for_resolution() {
    let h = harness(vec![crash_seed(1, &[], 300, 2_000)]);
    let round = h.coordinator.open_round().await.unwrap();
    assert!(matches!(
        h.coordinator.reveal_round(round.round_id).await,
        Err(EngineError::RevealBeforeResolution(_))
    ));
    h.coordinator.activate_round(round.round_id).await.unwrap();
    assert!(h.coordinator.reveal_round(round.round_id).await.is_err());
    // Resolving before the crash is refused
    assert!(h.coordinator.resolve_round(round.round_id).await.is_err());

    h.clock.advance_ms(60_000);
    let reveal = h.coordinator.resolve_round(round.round_id).await.unwrap();
    assert_eq!(h.coordinator.reveal_round(round.round_id).await.unwrap(), reveal);
    // Resolving again is a no-op with the same proof
    assert_eq!(h.coordinator.resolve_round(round.round_id).await.unwrap(), reveal);

    let view = h.coordinator.current_round().await.unwrap().unwrap();
    assert_eq!(view.crash_point, Some(reveal.crash_point));
}

#[tokio::test]
async fn test_cashout_after_crash_is_lost() {
    let h = harness(vec![crash_seed(1, &["late"], 300, 2_000)]);
    fund(&h, 1, 100).await;
    let round = h.coordinator.open_round().await.unwrap();
    let placed = h
        .coordinator
        .place_bet(bet_request(1, GameKind::Crash, 10, "late"))
        .await
        .unwrap();
    h.coordinator.activate_round(round.round_id).await.unwrap();

    let view = h.coordinator.current_round().await.unwrap().unwrap();
    assert_eq!(view.crash_point, None);

    h.clock.advance_ms(60_000);
    let target = CashoutTarget::Bet {
        bet_id: bet_id(&placed),
        multiplier: None,
    };
    let err = h
        .coordinator
        .cashout(UserId(1), target.clone(), Some("late-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::GameEnded { ref state, .. } if state == "lost"));

    // The replay reports the same loss
    assert!(matches!(
        h.coordinator.cashout(UserId(1), target, Some("late-1")).await,
        Err(EngineError::GameEnded { .. })
    ));
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(90));
}

#[tokio::test]
async fn test_second_crash_cashout_is_refused() {
    let h = harness(vec![crash_seed(1, &["twice"], 300, 2_000)]);
    fund(&h, 1, 100).await;
    let round = h.coordinator.open_round().await.unwrap();
    let placed = h
        .coordinator
        .place_bet(bet_request(1, GameKind::Crash, 10, "twice"))
        .await
        .unwrap();
    h.coordinator.activate_round(round.round_id).await.unwrap();
    h.clock.advance_ms(5_000);

    let target = CashoutTarget::Bet {
        bet_id: bet_id(&placed),
        multiplier: None,
    };
    h.coordinator.cashout(UserId(1), target.clone(), None).await.unwrap();
    assert!(matches!(
        h.coordinator.cashout(UserId(1), target, None).await,
        Err(EngineError::AlreadyCashed { .. })
    ));
    // Someone else's bet is invisible
    assert!(matches!(
        h.coordinator.crash_bet(UserId(2), bet_id(&placed)).await,
        Err(EngineError::GameNotFound(_))
    ));
}

#[tokio::test]
async fn test_auto_cashout_is_paid_at_target() {
    let h = harness(vec![crash_seed(1, &["auto", "stay"], 300, 2_000)]);
    fund(&h, 1, 100).await;
    let round = h.coordinator.open_round().await.unwrap();

    let mut auto = bet_request(1, GameKind::Crash, 10, "auto");
    auto.auto_cashout = Some(Multiplier::from_hundredths(150));
    let auto = h.coordinator.place_bet(auto).await.unwrap();
    let mut above = bet_request(1, GameKind::Crash, 10, "stay");
    above.auto_cashout = Some(Multiplier::from_hundredths(5_000));
    h.coordinator.place_bet(above).await.unwrap();

    h.coordinator.activate_round(round.round_id).await.unwrap();
    h.clock.advance_ms(1_000);
    assert_eq!(h.coordinator.settle_auto_cashouts(round.round_id).await.unwrap(), 0);

    // 1.5x is reached at about 6.76s
    h.clock.advance_ms(6_000);
    assert_eq!(h.coordinator.settle_auto_cashouts(round.round_id).await.unwrap(), 1);
    assert_eq!(h.coordinator.settle_auto_cashouts(round.round_id).await.unwrap(), 0);

    let cashed = h.coordinator.crash_bet(UserId(1), bet_id(&auto)).await.unwrap();
    assert_eq!(cashed.cashout_multiplier, Some(Multiplier::from_hundredths(150)));
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(95));

    h.clock.advance_ms(60_000);
    h.coordinator.resolve_round(round.round_id).await.unwrap();
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(95));
}

#[tokio::test]
async fn test_chicken_three_steps_then_cashout() {
    let client = surviving_client_seed("chicken-seed", 3);
    let h = harness(vec!["chicken-seed".to_string()]);
    fund(&h, 1, 100).await;

    let receipt = h
        .coordinator
        .place_bet(bet_request(1, GameKind::Chicken, 10, &client))
        .await
        .unwrap();
    assert_eq!(receipt.committed_seed_hash, hash_seed("chicken-seed"));
    let session = session_id(&receipt);

    for expected in 1..=3 {
        let outcome = h.coordinator.step(UserId(1), session, None).await.unwrap();
        assert!(outcome.alive);
        assert_eq!(outcome.step, expected);
    }
    assert!(matches!(
        h.coordinator.reveal_session(session).await,
        Err(EngineError::RevealBeforeResolution(_))
    ));

    let cashed = h
        .coordinator
        .cashout(UserId(1), CashoutTarget::Session { session_id: session }, None)
        .await
        .unwrap();
    assert_eq!(cashed.payout, "17.5".parse::<Amount>().unwrap());
    assert_eq!(
        h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(),
        "107.5".parse::<Amount>().unwrap()
    );

    let reveal = h.coordinator.reveal_session(session).await.unwrap();
    assert_eq!(reveal.server_seed, "chicken-seed");
    assert_eq!(reveal.steps_drawn, 3);
    assert!(matches!(
        h.coordinator.step(UserId(1), session, None).await,
        Err(EngineError::GameEnded { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_chicken_cashouts_settle_once() {
    let h = harness(vec!["race-seed".to_string()]);
    fund(&h, 1, 100).await;
    let session = session_id(
        &h.coordinator
            .place_bet(bet_request(1, GameKind::Chicken, 10, "race"))
            .await
            .unwrap(),
    );

    let target = CashoutTarget::Session { session_id: session };
    let (a, b) = tokio::join!(
        h.coordinator.cashout(UserId(1), target.clone(), None),
        h.coordinator.cashout(UserId(1), target.clone(), None)
    );
    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!([a, b]
        .into_iter()
        .any(|r| matches!(r, Err(EngineError::GameEnded { .. }))));

    let journal = h
        .coordinator
        .ledger()
        .journal(&crate::domain::session_reference(session))
        .await
        .unwrap();
    assert_eq!(journal.len(), 2);
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(100));
}

#[tokio::test]
async fn test_replayed_cashout_returns_original_receipt() {
    let h = harness(vec!["replay-seed".to_string()]);
    fund(&h, 1, 100).await;
    let session = session_id(
        &h.coordinator
            .place_bet(bet_request(1, GameKind::Chicken, 10, "replay"))
            .await
            .unwrap(),
    );
    let target = CashoutTarget::Session { session_id: session };

    let first = h
        .coordinator
        .cashout(UserId(1), target.clone(), Some("req-1"))
        .await
        .unwrap();
    let replay = h
        .coordinator
        .cashout(UserId(1), target.clone(), Some("req-1"))
        .await
        .unwrap();
    assert_eq!(first, replay);

    // A different request id hits the terminal state instead
    assert!(matches!(
        h.coordinator.cashout(UserId(1), target, Some("req-2")).await,
        Err(EngineError::GameEnded { .. })
    ));
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(100));
}

#[tokio::test]
async fn test_replayed_placement_debits_once() {
    let h = harness(vec!["place-seed".to_string()]);
    fund(&h, 1, 100).await;
    let mut request = bet_request(1, GameKind::Chicken, 10, "once");
    request.request_id = Some("place-1".to_string());

    let first = h.coordinator.place_bet(request.clone()).await.unwrap();
    let replay = h.coordinator.place_bet(request).await.unwrap();
    assert_eq!(first, replay);
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(90));
}

#[tokio::test]
async fn test_debit_race_admits_exactly_one() {
    let h = harness(Vec::new());
    fund(&h, 1, 10).await;
    let (a, b) = tokio::join!(
        h.coordinator.place_bet(bet_request(1, GameKind::Chicken, 10, "a")),
        h.coordinator.place_bet(bet_request(1, GameKind::Chicken, 10, "b"))
    );
    assert_eq!([&a, &b].iter().filter(|r| r.is_ok()).count(), 1);
    assert!([a, b]
        .into_iter()
        .any(|r| matches!(r, Err(EngineError::InsufficientFunds { .. }))));
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), Amount::ZERO);
}

#[tokio::test]
async fn test_validation_happens_before_any_debit() {
    let h = harness(Vec::new());
    fund(&h, 1, 100).await;
    assert!(matches!(
        h.coordinator.place_bet(bet_request(1, GameKind::Chicken, 20_000, "big")).await,
        Err(EngineError::BetLimit { .. })
    ));

    let mut disabled: GameSettings = h.coordinator.catalog().settings(GameKind::Chicken).await.unwrap();
    disabled.enabled = false;
    h.coordinator.catalog().upsert(disabled).await.unwrap();
    assert!(matches!(
        h.coordinator.place_bet(bet_request(1, GameKind::Chicken, 5, "off")).await,
        Err(EngineError::GameDisabled(GameKind::Chicken))
    ));
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(100));
}

#[tokio::test]
async fn test_storage_outage_stops_new_bets() {
    let config = EngineConfig {
        breaker: BreakerConfig {
            failure_threshold: 2,
            reset_timeout_seconds: 60,
        },
        ..EngineConfig::default()
    };
    let h = harness_with(config, vec!["outage-seed".to_string()]);
    fund(&h, 1, 100).await;
    let session = session_id(
        &h.coordinator
            .place_bet(bet_request(1, GameKind::Chicken, 10, "outage"))
            .await
            .unwrap(),
    );

    h.store.set_offline(true);
    for _ in 0..2 {
        assert!(matches!(
            h.coordinator.place_bet(bet_request(1, GameKind::Chicken, 10, "x")).await,
            Err(EngineError::StorageUnavailable(_))
        ));
    }
    assert!(h.coordinator.breaker().is_open().await);

    h.store.set_offline(false);
    assert!(matches!(
        h.coordinator.place_bet(bet_request(1, GameKind::Chicken, 10, "y")).await,
        Err(EngineError::StorageUnavailable(_))
    ));
    // Accepted bets still settle
    let cashed = h
        .coordinator
        .cashout(UserId(1), CashoutTarget::Session { session_id: session }, None)
        .await
        .unwrap();
    assert_eq!(cashed.payout, bx(10));
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(100));
}

#[tokio::test]
async fn test_stalled_round_is_reported() {
    let h = harness(vec![crash_seed(1, &[], 300, 2_000)]);
    let round = h.coordinator.open_round().await.unwrap();
    let now = h.coordinator.clock().now();
    assert!(h.coordinator.check_round_deadline(&round, 120_000, now).is_ok());

    h.clock.advance_ms(130_000);
    let later = h.coordinator.clock().now();
    assert!(matches!(
        h.coordinator.check_round_deadline(&round, 120_000, later),
        Err(EngineError::RoundStalled { round_id: 1, .. })
    ));
}

#[tokio::test]
async fn test_rounds_follow_each_other() {
    let h = harness(Vec::new());
    let first = h.coordinator.open_round().await.unwrap();
    assert!(h.coordinator.open_round().await.is_err());

    h.coordinator.activate_round(first.round_id).await.unwrap();
    // Fallback seeds crash at unknown points; a long wait always crashes
    h.clock.advance_ms(600_000);
    h.coordinator.resolve_round(first.round_id).await.unwrap();

    let second = h.coordinator.open_round().await.unwrap();
    assert_eq!(second.round_id, RoundId(2));
    assert_eq!(second.status, RoundStatus::Open);
    assert_ne!(second.server_seed_hash, first.server_seed_hash);
}

#[tokio::test]
async fn test_cashout_ahead_of_live_multiplier_settles_nothing() {
    let clients = ["a", "b", "c"];
    let h = harness(vec![crash_seed(1, &clients, 300, 2_000)]);
    fund(&h, 1, 100).await;
    let round = h.coordinator.open_round().await.unwrap();
    let mut bets = Vec::new();
    for client in clients {
        let receipt = h
            .coordinator
            .place_bet(bet_request(1, GameKind::Crash, 10, client))
            .await
            .unwrap();
        bets.push(bet_id(&receipt));
    }
    h.coordinator.activate_round(round.round_id).await.unwrap();
    h.clock.advance_ms(1);

    // Targets below and far above the crash point get the same answer
    for (bet, requested) in bets.iter().zip([150, 250, 10_000]) {
        let target = CashoutTarget::Bet {
            bet_id: *bet,
            multiplier: Some(Multiplier::from_hundredths(requested)),
        };
        assert!(matches!(
            h.coordinator.cashout(UserId(1), target, None).await,
            Err(EngineError::InvalidRequest(_))
        ));
        let stored = h.coordinator.crash_bet(UserId(1), *bet).await.unwrap();
        assert_eq!(stored.status, CrashBetStatus::Placed);
    }
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(70));

    // About 2.61x: a 2.50x request is now behind the curve and settles
    h.clock.advance_ms(16_000);
    let target = CashoutTarget::Bet {
        bet_id: bets[1],
        multiplier: Some(Multiplier::from_hundredths(250)),
    };
    let receipt = h.coordinator.cashout(UserId(1), target, None).await.unwrap();
    assert_eq!(receipt.payout, bx(25));
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(95));
}

#[tokio::test]
async fn test_refused_placements_keep_rate_limit_quota() {
    let config = EngineConfig {
        rate_limit: RateLimitConfig {
            max_wagers: 2,
            window_ms: 60_000,
            max_tracked_keys: 100,
        },
        ..EngineConfig::default()
    };
    let h = harness_with(config, vec![crash_seed(1, &["late"], 300, 2_000)]);
    fund(&h, 1, 100).await;

    for _ in 0..3 {
        assert!(matches!(
            h.coordinator.place_bet(bet_request(1, GameKind::Crash, 10, "early")).await,
            Err(EngineError::RoundNotOpen)
        ));
    }

    h.coordinator.open_round().await.unwrap();
    h.coordinator
        .place_bet(bet_request(1, GameKind::Crash, 10, "late"))
        .await
        .unwrap();
    h.coordinator
        .place_bet(bet_request(1, GameKind::Chicken, 10, "walk"))
        .await
        .unwrap();
    assert!(matches!(
        h.coordinator.place_bet(bet_request(1, GameKind::Chicken, 10, "again")).await,
        Err(EngineError::RateLimited { .. })
    ));
    assert_eq!(h.coordinator.balance(UserId(1), Asset::Bx).await.unwrap(), bx(80));
}
