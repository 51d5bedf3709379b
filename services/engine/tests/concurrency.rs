mod common;

use common::{bx, crash_seed, TestContext};
use engine::{
    config::EngineConfig,
    domain::{bet_reference, session_reference, CashoutTarget, CrashBetStatus, PlaceBetRequest, SessionStatus, Ticket},
    errors::EngineError,
};
use shared::{GameKind, Multiplier, SessionId, UserId};

fn relaxed_limits() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.rate_limit.max_wagers = 10_000;
    config.retry.max_retries = 50;
    config
}

fn chicken_bet(user: i64, client_seed: String) -> PlaceBetRequest {
    PlaceBetRequest {
        user_id: UserId(user),
        game: GameKind::Chicken,
        stake: bx(5),
        client_seed,
        auto_cashout: None,
        request_id: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_chicken_play_conserves_funds() {
    let ctx = TestContext::with_engine(relaxed_limits(), Vec::new());
    for user in 1..=8 {
        ctx.fund(user, 50).await;
    }

    let mut handles = Vec::new();
    for user in 1..=8i64 {
        let coordinator = ctx.coordinator.clone();
        handles.push(tokio::spawn(async move {
            let mut sessions = Vec::new();
            for game in 0..5 {
                let receipt = match coordinator
                    .place_bet(chicken_bet(user, format!("u{}-g{}", user, game)))
                    .await
                {
                    Ok(receipt) => receipt,
                    Err(EngineError::InsufficientFunds { .. }) => break,
                    Err(e) => panic!("unexpected placement failure: {}", e),
                };
                let Ticket::Session { session_id } = receipt.ticket else {
                    panic!("chicken bets open sessions");
                };
                for _ in 0..(game % 3) {
                    if !coordinator.step(UserId(user), session_id, None).await.unwrap().alive {
                        break;
                    }
                }
                // Two racing cash-outs per session
                let target = CashoutTarget::Session { session_id };
                let (a, b) = tokio::join!(
                    coordinator.cashout(UserId(user), target.clone(), None),
                    coordinator.cashout(UserId(user), target.clone(), None)
                );
                assert!(!(a.is_ok() && b.is_ok()), "session {} paid twice", session_id);
                sessions.push(session_id);
            }
            sessions
        }));
    }

    let mut sessions: Vec<(i64, SessionId)> = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        for session in handle.await.unwrap() {
            sessions.push((i as i64 + 1, session));
        }
    }

    for (user, session_id) in sessions {
        let session = ctx.coordinator.session(UserId(user), session_id).await.unwrap();
        let journal = ctx
            .coordinator
            .ledger()
            .journal(&session_reference(session_id))
            .await
            .unwrap();
        match session.status {
            SessionStatus::Cashed => {
                assert_eq!(journal.len(), 2);
                assert_eq!(journal[1].amount, session.payout);
            }
            SessionStatus::Lost => assert_eq!(journal.len(), 1),
            SessionStatus::Playing => panic!("session {} left open", session_id),
        }
    }
    for user in 1..=8 {
        assert!(ctx.balance(user).await.units() <= bx(1_000).units());
    }
    ctx.assert_conserved().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cashouts_racing_resolution_settle_once() {
    let seeds: Vec<String> = (0..10).map(|i| format!("racer-{}", i)).collect();
    let seed_refs: Vec<&str> = seeds.iter().map(String::as_str).collect();
    let ctx = TestContext::with_engine(relaxed_limits(), vec![crash_seed(1, &seed_refs, 200, 400)]);

    let round = ctx.coordinator.open_round().await.unwrap();
    let mut bets = Vec::new();
    for (i, seed) in seeds.iter().enumerate() {
        let user = i as i64 + 1;
        ctx.fund(user, 20).await;
        let receipt = ctx
            .coordinator
            .place_bet(PlaceBetRequest {
                user_id: UserId(user),
                game: GameKind::Crash,
                stake: bx(10),
                client_seed: seed.clone(),
                auto_cashout: (i % 2 == 0).then(|| Multiplier::from_hundredths(150)),
                request_id: None,
            })
            .await
            .unwrap();
        let Ticket::Bet { bet_id, .. } = receipt.ticket else {
            panic!("crash bets get a bet id");
        };
        bets.push((UserId(user), bet_id));
    }
    let round_id = round.round_id;
    ctx.coordinator.activate_round(round_id).await.unwrap();

    // Jump past the crash, then race manual cash-outs, the auto pass and resolution
    ctx.clock.advance_ms(60_000);
    let mut handles = Vec::new();
    for (user, bet_id) in bets.clone() {
        let coordinator = ctx.coordinator.clone();
        handles.push(tokio::spawn(async move {
            let _ = coordinator
                .cashout(user, CashoutTarget::Bet { bet_id, multiplier: None }, None)
                .await;
        }));
    }
    let auto = {
        let coordinator = ctx.coordinator.clone();
        tokio::spawn(async move { coordinator.settle_auto_cashouts(round_id).await })
    };
    let resolve = {
        let coordinator = ctx.coordinator.clone();
        tokio::spawn(async move { coordinator.resolve_round(round_id).await })
    };
    for handle in handles {
        handle.await.unwrap();
    }
    let _ = auto.await.unwrap();
    resolve.await.unwrap().unwrap();

    for (user, bet_id) in bets {
        let bet = ctx.coordinator.crash_bet(user, bet_id).await.unwrap();
        let journal = ctx.coordinator.ledger().journal(&bet_reference(bet_id)).await.unwrap();
        match bet.status {
            CrashBetStatus::Cashed => {
                assert_eq!(journal.len(), 2);
                assert_eq!(bet.cashout_multiplier, Some(Multiplier::from_hundredths(150)));
                assert_eq!(ctx.balance(user.get()).await, bx(25));
            }
            CrashBetStatus::Lost => {
                assert_eq!(journal.len(), 1);
                assert_eq!(ctx.balance(user.get()).await, bx(10));
            }
            CrashBetStatus::Placed => panic!("bet {} survived resolution", bet_id),
        }
    }
    ctx.assert_conserved().await;
}
