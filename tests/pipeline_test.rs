// End-to-end settlement tests: submit intents through the queue, let the
// worker settle them, and poll for results the way an HTTP client would.

use std::sync::Arc;
use std::time::Duration;

use lmsr_market::app_state::AppState;
use lmsr_market::config::Config;
use lmsr_market::models::Side;
use lmsr_market::settlement::results::TradeResult;
use lmsr_market::settlement::SettlementPipeline;

fn app() -> Arc<AppState> {
    let state = Arc::new(AppState::new(Config::default()));
    state.pipeline.ensure_worker_running();
    state
}

/// Poll until the result lands. Fails the test after ~5 seconds.
async fn settle(pipeline: &SettlementPipeline, request_id: &str) -> TradeResult {
    for _ in 0..500 {
        if let Some(result) = pipeline.poll(request_id) {
            return result;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("intent {} never settled", request_id);
}

#[tokio::test]
async fn test_buy_settles_and_moves_price() {
    let state = app();
    let market = state.create_market("q".into(), String::new(), String::new());

    let (yes_before, _) = state.states.prices(&market.id, &state.lmsr).unwrap();
    assert!((yes_before - 0.5).abs() < 1e-9);

    let (request_id, _) = state
        .pipeline
        .submit_buy(&market.id, "alice", Side::Yes, 100.0);
    let result = settle(&state.pipeline, &request_id).await;

    assert!(result.success, "buy failed: {}", result.message);
    assert!(result.shares.unwrap() > 0.0);
    assert_eq!(state.ledger.balance("alice"), 900.0);

    let (yes_after, no_after) = state.states.prices(&market.id, &state.lmsr).unwrap();
    assert!(yes_after > 0.5);
    assert!((yes_after + no_after - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_insufficient_balance_reports_failure() {
    let state = app();
    let market = state.create_market("q".into(), String::new(), String::new());

    let (request_id, _) = state
        .pipeline
        .submit_buy(&market.id, "alice", Side::No, 99999.0);
    let result = settle(&state.pipeline, &request_id).await;

    assert!(!result.success);
    assert!(result.message.contains("Insufficient"), "{}", result.message);
    assert_eq!(state.ledger.balance("alice"), 1000.0);
    assert_eq!(
        state.states.read(&market.id).unwrap(),
        (state.config.lmsr_buffer, state.config.lmsr_buffer)
    );
}

#[tokio::test]
async fn test_buy_after_resolution_fails_in_queue() {
    let state = app();
    let market = state.create_market("q".into(), String::new(), String::new());

    state
        .book
        .resolve_and_pay(&state.ledger, &market.id, Side::No, 0.02)
        .unwrap();

    // Submitted directly to the pipeline, bypassing the handler's fail-fast
    // check, as happens when resolution lands while the intent is queued.
    let (request_id, _) = state
        .pipeline
        .submit_buy(&market.id, "alice", Side::Yes, 100.0);
    let result = settle(&state.pipeline, &request_id).await;

    assert!(!result.success);
    assert!(result.message.contains("not open"), "{}", result.message);
    assert_eq!(state.ledger.balance("alice"), 1000.0);
}

#[tokio::test]
async fn test_buy_then_undo_restores_balance_and_state() {
    let state = app();
    let market = state.create_market("q".into(), String::new(), String::new());

    let (buy_id, _) = state
        .pipeline
        .submit_buy(&market.id, "alice", Side::Yes, 250.0);
    let buy = settle(&state.pipeline, &buy_id).await;
    assert!(buy.success);
    let position_id = buy.position_id.unwrap();
    assert_eq!(state.ledger.balance("alice"), 750.0);

    let (undo_id, _) = state
        .pipeline
        .submit_undo(&market.id, "alice", &position_id);
    let undo = settle(&state.pipeline, &undo_id).await;

    assert!(undo.success, "undo failed: {}", undo.message);
    assert_eq!(state.ledger.balance("alice"), 1000.0);
    assert_eq!(
        state.states.read(&market.id).unwrap(),
        (state.config.lmsr_buffer, state.config.lmsr_buffer)
    );
    assert!(state.book.get(&market.id).unwrap().positions.is_empty());
}

#[tokio::test]
async fn test_partial_then_dust_sell_deletes_position() {
    let state = app();
    let market = state.create_market("q".into(), String::new(), String::new());

    let (buy_id, _) = state
        .pipeline
        .submit_buy(&market.id, "alice", Side::Yes, 100.0);
    let buy = settle(&state.pipeline, &buy_id).await;
    let position_id = buy.position_id.unwrap();
    let shares = buy.shares.unwrap();

    let (sell_id, _) =
        state
            .pipeline
            .submit_sell(&market.id, "alice", &position_id, shares / 2.0);
    let sell = settle(&state.pipeline, &sell_id).await;
    assert!(sell.success, "partial sell failed: {}", sell.message);
    assert!(sell.amount.unwrap() > 0.0);

    let market_after = state.book.get(&market.id).unwrap();
    assert_eq!(market_after.positions.len(), 1);
    let remaining = market_after.positions[0].shares;
    assert!((remaining - shares / 2.0).abs() < 1e-9);

    // Selling everything that is left leaves less than dust, so the
    // position record is deleted.
    let (sell_all_id, _) = state
        .pipeline
        .submit_sell(&market.id, "alice", &position_id, remaining);
    let sell_all = settle(&state.pipeline, &sell_all_id).await;
    assert!(sell_all.success);
    assert!(state.book.get(&market.id).unwrap().positions.is_empty());
}

#[tokio::test]
async fn test_concurrent_buys_settle_sequentially() {
    let state = app();
    let market = state.create_market("q".into(), String::new(), String::new());

    let mut handles = Vec::new();
    for i in 0..10 {
        let state = state.clone();
        let market_id = market.id.clone();
        handles.push(tokio::spawn(async move {
            let wallet = format!("wallet-{}", i);
            let (request_id, _) = state
                .pipeline
                .submit_buy(&market_id, &wallet, Side::Yes, 50.0);
            settle(&state.pipeline, &request_id).await
        }));
    }

    let mut total_shares = 0.0;
    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.success, "{}", result.message);
        total_shares += result.shares.unwrap();
    }

    // Single-consumer settlement means the state counter is exactly the
    // buffer plus every settled share, no lost updates.
    let (q_yes, q_no) = state.states.read(&market.id).unwrap();
    assert!((q_yes - (state.config.lmsr_buffer + total_shares)).abs() < 1e-6);
    assert_eq!(q_no, state.config.lmsr_buffer);

    for i in 0..10 {
        assert_eq!(state.ledger.balance(&format!("wallet-{}", i)), 950.0);
    }
}

#[tokio::test]
async fn test_result_delivery_is_single_shot() {
    let state = app();
    let market = state.create_market("q".into(), String::new(), String::new());

    let (request_id, _) = state
        .pipeline
        .submit_buy(&market.id, "alice", Side::Yes, 10.0);
    let first = settle(&state.pipeline, &request_id).await;
    assert!(first.success);
    assert!(state.pipeline.poll(&request_id).is_none());
}

#[tokio::test]
async fn test_resolution_pays_winners_and_skips_losers() {
    let state = app();
    let market = state.create_market("q".into(), String::new(), String::new());

    let (yes_id, _) = state
        .pipeline
        .submit_buy(&market.id, "winner", Side::Yes, 100.0);
    let yes_buy = settle(&state.pipeline, &yes_id).await;
    let (no_id, _) = state
        .pipeline
        .submit_buy(&market.id, "loser", Side::No, 100.0);
    let no_buy = settle(&state.pipeline, &no_id).await;
    assert!(yes_buy.success && no_buy.success);

    let summary = state
        .book
        .resolve_and_pay(&state.ledger, &market.id, Side::Yes, 0.02)
        .unwrap();
    assert_eq!(summary.winning_positions, 1);

    // Winner: shares redeem 1:1, 2% fee on the profit over the 100 basis.
    let shares = yes_buy.shares.unwrap();
    let expected_payout = shares - 0.02 * (shares - 100.0).max(0.0);
    assert!((state.ledger.balance("winner") - (900.0 + expected_payout)).abs() < 1e-6);
    assert_eq!(state.ledger.balance("loser"), 900.0);

    // Trading on the resolved market is rejected at the door.
    assert!(state.book.ensure_open(&market.id).is_err());
}
