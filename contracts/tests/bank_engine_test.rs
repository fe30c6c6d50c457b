//! Integration tests for the bank engine.
//!
//! These drive the engine through its public surface against the in-memory
//! collaborators: multi-asset deposits through the router, withdrawals paid
//! in the native asset, capacity and staleness boundaries, halt gating,
//! compensation on failed transfers, and persistence across restarts.

use std::sync::Arc;

use strongbox_contracts::{
    BankEngine, BankError, BankState, Collaborators, FixedRateRouter, InMemoryCustody,
    ManualClock, ManualPriceFeed,
};
use strongbox_protocol::{Address, Amount, AssetId, BankConfig, VaultDB};

const NOW: u64 = 1_700_000_000;
const ONE_USD: Amount = 1_000_000;
const ONE_NATIVE: Amount = 1_000_000_000_000_000_000;
const ONE_A: Amount = 100_000_000;

fn authority() -> Address {
    Address::repeat_tail(0xAD)
}

fn alice() -> Address {
    Address::repeat_tail(0xA1)
}

fn bob() -> Address {
    Address::repeat_tail(0xB0)
}

fn usd() -> AssetId {
    BankConfig::default().accounting_asset
}

/// An 8-decimal token priced by the `A/USD` feed.
fn asset_a() -> AssetId {
    AssetId::token(Address::repeat_tail(0x0A))
}

/// Everything a test needs to poke at the engine's surroundings.
struct Harness {
    engine: BankEngine,
    feed: Arc<ManualPriceFeed>,
    router: FixedRateRouter,
    custody: InMemoryCustody,
    clock: ManualClock,
}

fn config(max_cap: u64) -> BankConfig {
    BankConfig {
        max_cap,
        ..BankConfig::with_authority(authority())
    }
}

fn collaborators(
    feed: &Arc<ManualPriceFeed>,
    router: &FixedRateRouter,
    custody: &InMemoryCustody,
    clock: &ManualClock,
) -> Collaborators {
    Collaborators {
        price_feed: feed.clone(),
        router: Box::new(router.clone()),
        custody: Box::new(custody.clone()),
        clock: Arc::new(clock.clone()),
    }
}

/// Native at 2_000.0, A at 2.0, router A→USD at 2.0 less a 1% fee, custody
/// holding 100 native for payouts.
fn harness_with(config: BankConfig, db: Option<VaultDB>) -> Harness {
    let feed = Arc::new(ManualPriceFeed::new());
    feed.set_price("NATIVE/USD", 2_000_0000_0000, 8, NOW);
    feed.set_price("A/USD", 2_0000_0000, 8, NOW);

    let router = FixedRateRouter::new().with_fee_bps(100);
    router.set_rate(asset_a(), usd(), 2 * ONE_USD, ONE_A);

    let custody =
        InMemoryCustody::new(Address::repeat_tail(0xBA)).with_holdings(AssetId::NATIVE, 100 * ONE_NATIVE);
    let clock = ManualClock::new(NOW);

    let collab = collaborators(&feed, &router, &custody, &clock);
    let engine = match db {
        Some(db) => BankEngine::open(config, db, collab).unwrap(),
        None => BankEngine::new(config, collab).unwrap(),
    };
    Harness {
        engine,
        feed,
        router,
        custody,
        clock,
    }
}

fn harness(max_cap: u64) -> Harness {
    harness_with(config(max_cap), None)
}

fn register_a(h: &mut Harness) {
    h.engine
        .add_asset(&authority(), asset_a(), 8, "A/USD".into())
        .unwrap();
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[test]
fn swap_deposit_then_full_withdrawal() {
    let mut h = harness(1_000_000 * 1_000_000);
    register_a(&mut h);

    // 100 A at 2.0 is worth 200 units; the router keeps 1%.
    let receipt = h.engine.deposit_asset(alice(), asset_a(), 100 * ONE_A).unwrap();
    assert!(receipt.credited >= 190 * ONE_USD && receipt.credited <= 200 * ONE_USD);
    assert_eq!(receipt.credited, 198 * ONE_USD);

    let info = h.engine.bank_info().unwrap();
    assert_eq!(info.total_capacity_used, receipt.credited);
    assert_eq!(info.total_balance, receipt.credited);
    assert_eq!(h.custody.holdings(&usd()), receipt.credited);
    assert_eq!(h.custody.holdings(&asset_a()), 0);

    let balance = h.engine.balance_of(&alice());
    let out = h.engine.withdraw(alice(), balance).unwrap();
    // 198 units at 2_000 per native.
    assert_eq!(out.payout, 99_000_000_000_000_000);
    assert_eq!(out.balance_after, 0);

    let info = h.engine.bank_info().unwrap();
    assert_eq!(info.total_capacity_used, 0);
    assert_eq!(info.deposit_count, 1);
    assert_eq!(info.withdrawal_count, 1);
    h.engine.check_invariant().unwrap();
}

#[test]
fn unregistered_routable_asset_uses_router_quote() {
    let mut h = harness(1_000_000 * 1_000_000);
    let b = AssetId::token(Address::repeat_tail(0x0B));
    h.router.set_rate(b, usd(), 1, 1);

    assert!(!h.engine.asset_config(&b).supported);
    assert!(h.engine.has_route(&b));

    // Quote is 495 after the 1% fee; the fill matches it exactly.
    let receipt = h.engine.deposit_asset(bob(), b, 500).unwrap();
    assert_eq!(receipt.credited, 495);
    assert_eq!(h.engine.balance_of(&bob()), 495);
}

#[test]
fn native_asset_via_deposit_asset() {
    let mut h = harness(1_000_000 * 1_000_000);
    let receipt = h.engine.deposit_asset(alice(), AssetId::NATIVE, ONE_NATIVE).unwrap();
    assert_eq!(receipt.asset, AssetId::NATIVE);
    assert_eq!(receipt.credited, 2_000 * ONE_USD);
}

// ---------------------------------------------------------------------------
// Round Trip
// ---------------------------------------------------------------------------

#[test]
fn accounting_deposit_round_trips_through_native() {
    let mut h = harness(1_000_000 * 1_000_000);
    // A price that does not divide evenly.
    h.feed.set_price("NATIVE/USD", 3_141_5926_5358, 8, NOW);

    let x = 1_234_567_891;
    h.engine.deposit_asset(alice(), usd(), x).unwrap();
    let out = h.engine.withdraw(alice(), x).unwrap();

    let back = strongbox_contracts::math::to_accounting(out.payout, 18, 3_141_5926_5358, 8, 6).unwrap();
    assert!(back <= x);
    assert!(x - back <= 1, "round trip lost {} units", x - back);
}

// ---------------------------------------------------------------------------
// Capacity
// ---------------------------------------------------------------------------

#[test]
fn deposit_landing_exactly_on_cap_succeeds() {
    let mut h = harness(1_000 * 1_000_000);
    h.engine.deposit_asset(alice(), usd(), 600 * ONE_USD).unwrap();
    h.engine.deposit_asset(bob(), usd(), 400 * ONE_USD).unwrap();
    assert_eq!(h.engine.bank_info().unwrap().cap_remaining, 0);
}

#[test]
fn deposit_over_cap_changes_nothing() {
    let mut h = harness(1_000 * 1_000_000);
    h.engine.deposit_asset(alice(), usd(), 1_000 * ONE_USD).unwrap();
    let before = h.engine.bank_info().unwrap();

    let err = h.engine.deposit_asset(bob(), usd(), 1).unwrap_err();
    assert!(matches!(err, BankError::CapacityExceeded { .. }));
    assert!(matches!(
        h.engine.deposit_native(bob(), ONE_NATIVE),
        Err(BankError::CapacityExceeded { .. })
    ));

    assert_eq!(h.engine.bank_info().unwrap(), before);
    assert_eq!(h.engine.balance_of(&bob()), 0);
    assert_eq!(h.custody.holdings(&usd()), 1_000 * ONE_USD);
}

#[test]
fn over_delivering_route_cannot_breach_cap() {
    // Estimate is 200 units, minimum 190, cap 250; the route pays 400.
    let mut h = harness(250 * 1_000_000);
    register_a(&mut h);
    h.router.set_rate(asset_a(), usd(), 4 * ONE_USD, ONE_A);
    h.router.set_fee_bps(0);

    let err = h.engine.deposit_asset(alice(), asset_a(), 100 * ONE_A).unwrap_err();
    assert!(matches!(err, BankError::CapacityExceeded { .. }));

    assert_eq!(h.engine.balance_of(&alice()), 0);
    assert_eq!(h.engine.bank_info().unwrap().total_capacity_used, 0);
    // The swap output went back to the depositor.
    assert_eq!(h.custody.holdings(&usd()), 0);
    h.engine.check_invariant().unwrap();
}

// ---------------------------------------------------------------------------
// Market Conditions
// ---------------------------------------------------------------------------

#[test]
fn price_at_staleness_threshold_is_accepted() {
    let mut h = harness(1_000_000 * 1_000_000);
    h.feed.set_price("NATIVE/USD", 2_000_0000_0000, 8, NOW - 3_600);
    assert!(h.engine.deposit_native(alice(), ONE_NATIVE).is_ok());
}

#[test]
fn price_past_staleness_threshold_is_rejected() {
    let mut h = harness(1_000_000 * 1_000_000);
    h.feed.set_price("NATIVE/USD", 2_000_0000_0000, 8, NOW - 3_601);
    assert!(matches!(
        h.engine.deposit_native(alice(), ONE_NATIVE),
        Err(BankError::Oracle(_))
    ));
    assert_eq!(h.custody.holdings(&AssetId::NATIVE), 100 * ONE_NATIVE);
}

#[test]
fn clock_drift_makes_registered_asset_price_stale() {
    let mut h = harness(1_000_000 * 1_000_000);
    register_a(&mut h);
    h.clock.advance(3_601);
    let err = h.engine.deposit_asset(alice(), asset_a(), ONE_A).unwrap_err();
    assert_eq!(err.kind(), "OracleError");
}

#[test]
fn excessive_router_fee_is_slippage() {
    let h = harness(1_000_000 * 1_000_000);
    let greedy = FixedRateRouter::new().with_fee_bps(600);
    greedy.set_rate(asset_a(), usd(), 2 * ONE_USD, ONE_A);
    let mut engine = BankEngine::new(
        config(1_000_000 * 1_000_000),
        collaborators(&h.feed, &greedy, &h.custody, &h.clock),
    )
    .unwrap();
    engine
        .add_asset(&authority(), asset_a(), 8, "A/USD".into())
        .unwrap();

    let err = engine.deposit_asset(alice(), asset_a(), 100 * ONE_A).unwrap_err();
    assert!(matches!(
        err,
        BankError::SlippageExceeded {
            min_amount_out: 190_000_000,
            amount_out: 188_000_000,
        }
    ));
    assert_eq!(engine.balance_of(&alice()), 0);
    // The input was refunded.
    assert_eq!(h.custody.holdings(&asset_a()), 0);
}

#[test]
fn unrefundable_slippage_reports_transfer_failure() {
    let mut h = harness(1_000_000 * 1_000_000);
    register_a(&mut h);
    h.router.set_fee_bps(600);
    h.custody.set_refuse_payouts(true);

    let err = h.engine.deposit_asset(alice(), asset_a(), 100 * ONE_A).unwrap_err();
    assert_eq!(err.kind(), "TransferFailed");
    assert!(err.to_string().contains("SlippageExceeded"));

    // Custody kept the input and nothing was credited.
    assert_eq!(h.custody.holdings(&asset_a()), 100 * ONE_A);
    assert_eq!(h.engine.balance_of(&alice()), 0);
    let info = h.engine.bank_info().unwrap();
    assert_eq!(info.total_capacity_used, 0);
    assert_eq!(info.deposit_count, 0);
    h.engine.check_invariant().unwrap();
}

#[test]
fn failed_swap_settlement_refunds_the_output() {
    let h = harness(1_000_000 * 1_000_000);
    // Custody cannot book any more of the accounting asset.
    let full = InMemoryCustody::new(Address::repeat_tail(0xBA)).with_holdings(usd(), Amount::MAX);
    let mut engine = BankEngine::new(
        config(1_000_000 * 1_000_000),
        collaborators(&h.feed, &h.router, &full, &h.clock),
    )
    .unwrap();
    engine
        .add_asset(&authority(), asset_a(), 8, "A/USD".into())
        .unwrap();

    let err = engine.deposit_asset(alice(), asset_a(), 100 * ONE_A).unwrap_err();
    assert!(matches!(err, BankError::TransferFailed(_)));
    assert_eq!(engine.balance_of(&alice()), 0);
    assert_eq!(engine.bank_info().unwrap().total_capacity_used, 0);
    // The 198 units the router delivered went back to the depositor.
    assert_eq!(full.holdings(&usd()), Amount::MAX - 198 * ONE_USD);
    engine.check_invariant().unwrap();
}

#[test]
fn registered_asset_without_route_fails_with_no_route() {
    let mut h = harness(1_000_000 * 1_000_000);
    register_a(&mut h);
    h.router.remove_route(&asset_a(), &usd());

    let err = h.engine.deposit_asset(alice(), asset_a(), ONE_A).unwrap_err();
    assert!(matches!(err, BankError::NoRoute(a) if a == asset_a()));
    assert_eq!(h.custody.holdings(&asset_a()), 0);
}

#[test]
fn zero_amounts_are_rejected_everywhere() {
    let mut h = harness(1_000_000 * 1_000_000);
    assert!(matches!(h.engine.deposit_native(alice(), 0), Err(BankError::ZeroAmount)));
    assert!(matches!(h.engine.deposit_asset(alice(), usd(), 0), Err(BankError::ZeroAmount)));
    assert!(matches!(h.engine.withdraw(alice(), 0), Err(BankError::ZeroAmount)));
}

// ---------------------------------------------------------------------------
// Withdrawal Atomicity
// ---------------------------------------------------------------------------

#[test]
fn refused_payout_restores_balance() {
    let mut h = harness(1_000_000 * 1_000_000);
    h.engine.deposit_asset(alice(), usd(), 50 * ONE_USD).unwrap();
    h.custody.set_refuse_payouts(true);

    let err = h.engine.withdraw(alice(), 20 * ONE_USD).unwrap_err();
    assert!(matches!(err, BankError::TransferFailed(_)));
    assert_eq!(h.engine.balance_of(&alice()), 50 * ONE_USD);

    let info = h.engine.bank_info().unwrap();
    assert_eq!(info.total_capacity_used, 50 * ONE_USD);
    assert_eq!(info.withdrawal_count, 0);
    h.engine.check_invariant().unwrap();
}

#[test]
fn overdraw_is_rejected_without_side_effects() {
    let mut h = harness(1_000_000 * 1_000_000);
    h.engine.deposit_asset(alice(), usd(), 5 * ONE_USD).unwrap();
    assert!(matches!(
        h.engine.withdraw(alice(), 6 * ONE_USD),
        Err(BankError::InsufficientBalance { .. })
    ));
    assert_eq!(h.custody.holdings(&AssetId::NATIVE), 100 * ONE_NATIVE);
}

// ---------------------------------------------------------------------------
// Halt & Administration
// ---------------------------------------------------------------------------

#[test]
fn halted_bank_rejects_value_movement() {
    let mut h = harness(1_000_000 * 1_000_000);
    h.engine.deposit_asset(alice(), usd(), 10 * ONE_USD).unwrap();
    h.engine.halt(&authority()).unwrap();
    let before = h.engine.bank_info().unwrap();
    assert!(before.halted);

    assert!(matches!(h.engine.deposit_native(alice(), ONE_NATIVE), Err(BankError::Halted)));
    assert!(matches!(h.engine.deposit_asset(alice(), usd(), 1), Err(BankError::Halted)));
    assert!(matches!(h.engine.withdraw(alice(), 1), Err(BankError::Halted)));
    assert_eq!(h.engine.bank_info().unwrap(), before);

    h.engine.resume(&authority()).unwrap();
    assert!(h.engine.withdraw(alice(), ONE_USD).is_ok());
}

#[test]
fn admin_surface_requires_authority() {
    let mut h = harness(1_000_000 * 1_000_000);
    let caller = alice();
    assert!(matches!(
        h.engine.add_asset(&caller, asset_a(), 8, "A/USD".into()),
        Err(BankError::Unauthorized { .. })
    ));
    assert!(matches!(h.engine.remove_asset(&caller, &asset_a()), Err(BankError::Unauthorized { .. })));
    assert!(matches!(h.engine.halt(&caller), Err(BankError::Unauthorized { .. })));
    assert!(matches!(h.engine.resume(&caller), Err(BankError::Unauthorized { .. })));
    assert!(matches!(
        h.engine.transfer_authority(&caller, caller),
        Err(BankError::Unauthorized { .. })
    ));
    assert_eq!(h.engine.state(), BankState::Active);
}

#[test]
fn registry_errors_surface_through_engine() {
    let mut h = harness(1_000_000 * 1_000_000);
    register_a(&mut h);
    assert!(matches!(
        h.engine.add_asset(&authority(), asset_a(), 8, "A/USD".into()),
        Err(BankError::AlreadyRegistered(_))
    ));
    let stranger = AssetId::token(Address::repeat_tail(0x77));
    assert!(matches!(
        h.engine.remove_asset(&authority(), &stranger),
        Err(BankError::NotRegistered(_))
    ));
}

#[test]
fn asset_removal_with_outstanding_balances_is_allowed() {
    let mut h = harness(1_000_000 * 1_000_000);
    register_a(&mut h);
    h.engine.deposit_asset(alice(), asset_a(), ONE_A).unwrap();
    let held = h.engine.balance_of(&alice());

    h.engine.remove_asset(&authority(), &asset_a()).unwrap();
    assert!(!h.engine.asset_config(&asset_a()).supported);
    // Balances are in the accounting unit and stay withdrawable.
    assert!(h.engine.withdraw(alice(), held).is_ok());
}

#[test]
fn queries_do_not_mutate() {
    let mut h = harness(1_000_000 * 1_000_000);
    register_a(&mut h);
    h.engine.deposit_asset(alice(), usd(), 7 * ONE_USD).unwrap();

    let info = h.engine.bank_info().unwrap();
    for _ in 0..3 {
        let _ = h.engine.balance_of(&alice());
        let _ = h.engine.asset_config(&asset_a());
        let _ = h.engine.has_route(&asset_a());
        let _ = h.engine.preview_conversion(&asset_a(), &usd());
        assert_eq!(h.engine.bank_info().unwrap(), info);
    }
}

#[test]
fn preview_quotes_one_whole_unit() {
    let mut h = harness(1_000_000 * 1_000_000);
    register_a(&mut h);
    // 1 A at 2.0 less 1%.
    assert_eq!(h.engine.preview_conversion(&asset_a(), &usd()).unwrap(), 1_980_000);
    assert!(matches!(
        h.engine.preview_conversion(&usd(), &asset_a()),
        Err(BankError::NoRoute(_))
    ));
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let db = VaultDB::open(dir.path()).unwrap();
        let mut h = harness_with(config(1_000_000 * 1_000_000), Some(db.clone()));
        register_a(&mut h);
        h.engine.deposit_asset(alice(), usd(), 42 * ONE_USD).unwrap();
        h.engine.deposit_asset(bob(), asset_a(), ONE_A).unwrap();
        h.engine.transfer_authority(&authority(), bob()).unwrap();
        h.engine.halt(&bob()).unwrap();
        db.flush().unwrap();
    }

    let db = VaultDB::open(dir.path()).unwrap();
    let h = harness_with(config(1_000_000 * 1_000_000), Some(db));
    assert_eq!(h.engine.balance_of(&alice()), 42 * ONE_USD);
    assert_eq!(h.engine.balance_of(&bob()), 1_980_000);
    assert!(h.engine.asset_config(&asset_a()).supported);
    assert!(h.engine.is_halted());
    assert_eq!(h.engine.authority(), bob());

    let info = h.engine.bank_info().unwrap();
    assert_eq!(info.total_capacity_used, 42 * ONE_USD + 1_980_000);
    assert_eq!(info.deposit_count, 2);
    h.engine.check_invariant().unwrap();
}

#[test]
fn bad_config_is_refused() {
    let feed = Arc::new(ManualPriceFeed::new());
    let router = FixedRateRouter::new();
    let custody = InMemoryCustody::new(Address::repeat_tail(0xBA));
    let clock = ManualClock::new(NOW);
    let result = BankEngine::new(BankConfig::default(), collaborators(&feed, &router, &custody, &clock));
    assert!(matches!(result, Err(BankError::InvalidConfig(_))));
}
