//! Background refresh tests for token-pricer.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use token_pricer::types::Network;
use token_pricer::PriceScheduler;

const REFRESH: Duration = Duration::from_secs(120);
const MAX_BACKOFF: Duration = Duration::from_secs(600);

fn scheduler(node: &Arc<ScriptedNode>) -> Arc<PriceScheduler> {
    node.quote(weth().address, usdc().address, 500, 2_500_000_000);
    PriceScheduler::new(Arc::new(engine(node)), Network::Ethereum, vec![usdc(), weth()], REFRESH, MAX_BACKOFF)
}

#[tokio::test(start_paused = true)]
async fn refreshes_on_interval_regardless_of_age() {
    let node = ScriptedNode::new();
    let scheduler = scheduler(&node);
    let mut updates = scheduler.updates();
    let _task = scheduler.spawn();

    updates.changed().await.unwrap();
    assert_eq!(node.aggregates(), 1);
    assert_eq!(scheduler.latest().unwrap().price_of("WETH"), Some(2500.0));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(node.aggregates(), 1);

    updates.changed().await.unwrap();
    assert_eq!(node.aggregates(), 2);
}

#[tokio::test(start_paused = true)]
async fn backs_off_while_rate_limited() {
    let node = ScriptedNode::new();
    node.fail_all(Some(Failure::RateLimited));
    let scheduler = scheduler(&node);
    let _task = scheduler.spawn();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(node.aggregates(), 1);
    // next attempt after 240s, not 120s
    tokio::time::sleep(Duration::from_secs(150)).await;
    assert_eq!(node.aggregates(), 1);
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(node.aggregates(), 2);

    // recovery resets the cadence: 480s backoff, then back to 120s
    node.fail_all(None);
    tokio::time::sleep(Duration::from_secs(480)).await;
    assert_eq!(node.aggregates(), 3);
    tokio::time::sleep(Duration::from_secs(121)).await;
    assert_eq!(node.aggregates(), 4);
}

#[tokio::test(start_paused = true)]
async fn stops_when_scheduler_is_dropped() {
    let node = ScriptedNode::new();
    let scheduler = scheduler(&node);
    let task = scheduler.spawn();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(node.aggregates(), 1);

    drop(scheduler);
    tokio::time::timeout(Duration::from_secs(300), task).await.unwrap().unwrap();
    assert_eq!(node.aggregates(), 1);
}

#[tokio::test]
async fn refetch_bypasses_the_interval() {
    let node = ScriptedNode::new();
    let scheduler = scheduler(&node);

    scheduler.refresh(false).await;
    scheduler.refresh(false).await;
    assert_eq!(node.aggregates(), 1);
    let result = scheduler.refetch().await;
    assert_eq!(node.aggregates(), 2);
    assert_eq!(result.price_of("WETH"), Some(2500.0));

    scheduler.subscribe(Network::Ethereum, vec![usdc()]);
    let result = scheduler.refetch().await;
    assert_eq!(node.aggregates(), 2);
    assert_eq!(result.tokens.len(), 1);
}
