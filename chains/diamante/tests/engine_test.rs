mod common;

use common::*;
use core_logic::Worker;
use diamante::engine::{AccountStatus, LoginResult, TransferResult, MAX_TX_ATTEMPTS};
use diamante::scheduler::CountdownKind;
use diamante::store::IdentityStore;
use diamante::transport::TransportResponse;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const HOUR: Duration = Duration::from_secs(3600);

fn has_at_most_4_decimals(x: f64) -> bool {
    let scaled = x * 10_000.0;
    (scaled - scaled.round()).abs() < 1e-6
}

#[tokio::test(start_paused = true)]
async fn test_single_transfer_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;

    let countdown = h.engine.run_daily_cycle().await.unwrap();

    let transfers = transport.requests_to("transaction/transfer");
    assert_eq!(transfers.len(), 1);
    let payload = transfers[0].payload.as_ref().unwrap();
    let amount = payload["amount"].as_f64().unwrap();
    assert!((1.0..10.0).contains(&amount), "amount {}", amount);
    assert!(has_at_most_4_decimals(amount));
    assert_eq!(payload["toAddress"], OTHER);
    assert_eq!(payload["userId"], "user-1");
    assert_eq!(transfers[0].headers["Cookie"], "access_token=tok");

    assert_eq!(h.engine.tx_count(), 1);
    assert!(h.engine.faucet_claimed());
    assert_eq!(h.engine.balance(), 50.0);
    assert_eq!(countdown.kind, CountdownKind::Cycle);
    assert_eq!(h.engine.snapshot().status, AccountStatus::WaitingCycle);
    assert_eq!(h.metrics.successful_transfers(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_already_claimed_keeps_existing_claim_time() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(0.0);
    transport.on(
        "fund-wallet",
        vec![business_error(400, "You have already claimed for the day")],
    );
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;
    h.store.get_or_create(ME).await;
    h.store.record_claim(ME, 1_700_000_000_000).await;

    h.engine.run_daily_cycle().await.unwrap();

    assert!(h.engine.faucet_claimed());
    assert_eq!(h.engine.last_claim_time(), 1_700_000_000_000);
    assert_eq!(h.store.get(ME).await.unwrap().last_claim_time, 1_700_000_000_000);
}

#[tokio::test(start_paused = true)]
async fn test_already_claimed_sets_claim_time_once() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(0.0);
    transport.on("fund-wallet", vec![business_error(400, "Faucet can be claimed once per day")]);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;

    h.engine.run_daily_cycle().await.unwrap();
    let first = h.engine.last_claim_time();
    assert!(first > 0);
    assert!(h.engine.faucet_claimed());

    tokio::time::sleep(HOUR).await;
    h.engine.run_daily_cycle().await.unwrap();
    assert_eq!(h.engine.last_claim_time(), first);
    assert_eq!(h.store.get(ME).await.unwrap().last_claim_time, first);
}

#[tokio::test(start_paused = true)]
async fn test_faucet_failure_leaves_unclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    transport.on("fund-wallet", vec![business_error(500, "Network guardians are syncing")]);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;

    h.engine.run_daily_cycle().await.unwrap();

    assert!(!h.engine.faucet_claimed());
    assert_eq!(h.engine.last_claim_time(), 0);
    // Transfers still run on the existing balance.
    assert_eq!(h.engine.tx_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_low_balance_skips_transfers() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(0.5);
    let h = harness(dir.path(), config(3, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;

    let countdown = h.engine.run_daily_cycle().await.unwrap();

    assert_eq!(transport.calls("transaction/transfer"), 0);
    assert_eq!(countdown.kind, CountdownKind::Cycle);
    let jitter = h.engine.cycle_jitter().unwrap();
    assert!(jitter >= 2 * HOUR && jitter <= 5 * HOUR);
    assert_eq!(countdown.remaining(), 24 * HOUR + jitter);
    assert_eq!(h.engine.snapshot().status, AccountStatus::WaitingCycle);
}

#[tokio::test(start_paused = true)]
async fn test_five_failures_then_next_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    transport.on("fund-wallet", vec![business_error(500, "Internal error")]);
    transport.on("transaction/transfer", vec![business_error(500, "Transfer failed")]);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;

    let countdown = h.engine.run_daily_cycle().await.unwrap();

    assert_eq!(transport.calls("transaction/transfer"), MAX_TX_ATTEMPTS as usize);
    assert_eq!(h.engine.tx_count(), 0);
    // No faucet and no transfer: short retry, jitter untouched.
    assert_eq!(countdown.kind, CountdownKind::Retry);
    assert_eq!(countdown.remaining(), HOUR);
    assert!(h.engine.cycle_jitter().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_iteration_moves_to_next() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    let mut script = vec![business_error(500, "Transfer failed"); 5];
    script.push(transfer_ok());
    transport.on("transaction/transfer", script);
    let h = harness(dir.path(), config(2, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;

    h.engine.run_daily_cycle().await.unwrap();

    assert_eq!(transport.calls("transaction/transfer"), 6);
    assert_eq!(h.engine.tx_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_does_not_consume_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    let mut script = vec![unauthorized()];
    script.extend(vec![business_error(500, "Transfer failed"); 5]);
    transport.on("transaction/transfer", script);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;

    h.engine.run_daily_cycle().await.unwrap();

    assert_eq!(transport.calls("transaction/transfer"), 6);
    // Cycle login plus the re-login after 401.
    assert_eq!(transport.calls("connect-wallet"), 2);
    assert_eq!(h.engine.tx_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_then_success() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    transport.on("transaction/transfer", vec![unauthorized(), transfer_ok()]);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;

    h.engine.run_daily_cycle().await.unwrap();

    assert_eq!(transport.calls("transaction/transfer"), 2);
    assert_eq!(h.engine.tx_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_stops_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    transport.on(
        "transaction/transfer",
        vec![business_error(400, "Insufficient balance for transfer")],
    );
    let h = harness(dir.path(), config(3, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;

    let countdown = h.engine.run_daily_cycle().await.unwrap();

    assert_eq!(transport.calls("transaction/transfer"), 1);
    assert_eq!(countdown.kind, CountdownKind::Cycle);
    assert!(countdown.remaining() >= 26 * HOUR);
    assert_eq!(h.engine.tx_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_recipient_never_self() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(500.0);
    let me_lower = ME.to_lowercase();
    let h = harness(
        dir.path(),
        config(4, 1.0, 2.0),
        vec![me_lower.as_str(), OTHER, ME],
        Arc::clone(&transport),
    )
    .await;

    h.engine.run_daily_cycle().await.unwrap();

    let transfers = transport.requests_to("transaction/transfer");
    assert_eq!(transfers.len(), 4);
    for t in transfers {
        let to = t.payload.unwrap()["toAddress"].as_str().unwrap().to_string();
        assert!(!to.eq_ignore_ascii_case(ME));
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_recipients_skips_transfers() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![], Arc::clone(&transport)).await;

    let countdown = h.engine.run_daily_cycle().await.unwrap();

    assert_eq!(transport.calls("transaction/transfer"), 0);
    // Faucet claimed counts as progress.
    assert_eq!(countdown.kind, CountdownKind::Cycle);
}

#[tokio::test(start_paused = true)]
async fn test_device_id_stable_across_logins_and_restart() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;

    assert_eq!(h.engine.login().await, LoginResult::Success);
    let first = h.engine.device_id().unwrap();
    assert_eq!(h.engine.login().await, LoginResult::Success);
    assert_eq!(h.engine.device_id().unwrap(), first);

    // Simulated restart: fresh store and engine over the same file.
    let reloaded = Arc::new(IdentityStore::load(dir.path().join("account_data.json")).await);
    let restarted = harness_with_store(reloaded, config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport));
    assert_eq!(restarted.engine.login().await, LoginResult::Success);
    assert_eq!(restarted.engine.device_id().unwrap(), first);

    for req in transport.requests_to("connect-wallet") {
        let payload = req.payload.unwrap();
        assert_eq!(payload["deviceId"], first.as_str());
        assert_eq!(payload["address"], ME);
        assert_eq!(payload["deviceSource"], "web_app");
    }
}

#[tokio::test(start_paused = true)]
async fn test_login_outcomes() {
    let dir = tempfile::tempdir().unwrap();

    let transport = ScriptedTransport::new();
    transport.on("connect-wallet", vec![blocked()]);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;
    let start = tokio::time::Instant::now();
    assert_eq!(h.engine.login().await, LoginResult::Blocked);
    assert!(start.elapsed() >= Duration::from_secs(60));
    assert_eq!(h.engine.snapshot().status, AccountStatus::Blocked);

    transport.on("connect-wallet", vec![login_unregistered()]);
    assert_eq!(h.engine.login().await, LoginResult::NotRegistered);
    assert_eq!(h.engine.snapshot().status, AccountStatus::NotRegistered);
    assert!(!h.engine.snapshot().logged_in);

    transport.on(
        "connect-wallet",
        vec![json_response(200, serde_json::json!({"data": {"userId": "u"}}))],
    );
    assert_eq!(h.engine.login().await, LoginResult::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_login_failure_schedules_retry_login() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    transport.on("connect-wallet", vec![TransportResponse::failure("helper crashed")]);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;

    let countdown = h.engine.run_daily_cycle().await.unwrap();

    assert_eq!(countdown.kind, CountdownKind::RetryLogin);
    assert_eq!(countdown.remaining(), Duration::from_secs(600));
    assert_eq!(transport.calls("fund-wallet"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_running_engine() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;

    let token = CancellationToken::new();
    let engine = Arc::clone(&h.engine);
    let handle = tokio::spawn(engine.run(token.clone()));

    // Long enough for a full cycle; the engine is then in its countdown.
    tokio::time::sleep(HOUR).await;
    assert!(h.engine.is_running());
    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.status, AccountStatus::WaitingCycle);
    assert!(snapshot.next_action.starts_with("Next Cycle:"));

    token.cancel();
    handle.await.unwrap().unwrap();

    let snapshot = h.engine.snapshot();
    assert_eq!(snapshot.status, AccountStatus::Stopped);
    assert_eq!(snapshot.next_action, "Stopped by User");
    assert!(!h.engine.is_running());
    assert_eq!(transport.calls("transaction/transfer"), 1);
}


#[tokio::test(start_paused = true)]
async fn test_transfer_403_cools_down_and_uses_an_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    transport.on("transaction/transfer", vec![blocked(), transfer_ok()]);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;
    assert_eq!(h.engine.login().await, LoginResult::Success);

    let start = tokio::time::Instant::now();
    assert_eq!(h.engine.send_with_retry(OTHER, 2.5).await, TransferResult::Sent);

    assert_eq!(transport.calls("transaction/transfer"), 2);
    // 403 cooldown, retry delay, post-transfer sync pause.
    assert!(start.elapsed() >= Duration::from_secs(60 + 15 + 8));
    assert_eq!(h.engine.tx_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transfer_403_exhausts_budget() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    transport.on("transaction/transfer", vec![blocked()]);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;
    assert_eq!(h.engine.login().await, LoginResult::Success);

    let start = tokio::time::Instant::now();
    assert_eq!(h.engine.send_with_retry(OTHER, 2.5).await, TransferResult::Exhausted);

    assert_eq!(transport.calls("transaction/transfer"), MAX_TX_ATTEMPTS as usize);
    assert!(start.elapsed() >= Duration::from_secs(60 * MAX_TX_ATTEMPTS as u64));
    assert_eq!(h.engine.tx_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transfer_sync_error_waits_and_uses_an_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    transport.on(
        "transaction/transfer",
        vec![business_error(500, "Network guardians are syncing"), transfer_ok()],
    );
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;
    assert_eq!(h.engine.login().await, LoginResult::Success);

    let start = tokio::time::Instant::now();
    assert_eq!(h.engine.send_with_retry(OTHER, 2.5).await, TransferResult::Sent);

    assert_eq!(transport.calls("transaction/transfer"), 2);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(30 + 15 + 8));
    assert!(elapsed <= Duration::from_secs(40 + 25 + 8 + 60));
}

#[tokio::test(start_paused = true)]
async fn test_transfer_403_with_sync_message_takes_block_cooldown() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    transport.on(
        "transaction/transfer",
        vec![business_error(403, "Network guardians are syncing"), transfer_ok()],
    );
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;
    assert_eq!(h.engine.login().await, LoginResult::Success);

    let start = tokio::time::Instant::now();
    assert_eq!(h.engine.send_with_retry(OTHER, 2.5).await, TransferResult::Sent);

    assert!(start.elapsed() >= Duration::from_secs(60 + 15 + 8));
}

#[tokio::test(start_paused = true)]
async fn test_faucet_403_cools_down_unclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    transport.on("fund-wallet", vec![blocked()]);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;
    assert_eq!(h.engine.login().await, LoginResult::Success);

    let start = tokio::time::Instant::now();
    assert!(h.engine.claim_faucet().await);

    assert!(start.elapsed() >= Duration::from_secs(60));
    assert!(!h.engine.faucet_claimed());
    assert_eq!(h.engine.last_claim_time(), 0);
    assert_eq!(h.metrics.snapshot().faucet_claims, 0);
}

#[tokio::test(start_paused = true)]
async fn test_faucet_403_with_claimed_message_is_not_a_claim() {
    let dir = tempfile::tempdir().unwrap();
    let transport = happy_transport(50.0);
    transport.on("fund-wallet", vec![business_error(403, "You have already claimed for the day")]);
    let h = harness(dir.path(), config(1, 1.0, 10.0), vec![OTHER], Arc::clone(&transport)).await;
    assert_eq!(h.engine.login().await, LoginResult::Success);

    let start = tokio::time::Instant::now();
    assert!(h.engine.claim_faucet().await);

    assert!(start.elapsed() >= Duration::from_secs(60));
    assert!(!h.engine.faucet_claimed());
    assert_eq!(h.engine.last_claim_time(), 0);
    assert_eq!(h.store.get(ME).await.map(|r| r.last_claim_time).unwrap_or(0), 0);
}
