//! Behavioural tests for worker concurrency and queue ordering.

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::pool::{PoolError, SessionHandler, SessionPool, WorkerSlot};

use super::support::Gate;

type StepResult = Result<(), String>;

/// Permits handed out when a scenario ends so no worker stays parked.
const TEARDOWN_PERMITS: usize = 1024;

struct GatedHandler {
    gate: Arc<Gate>,
}

impl SessionHandler<u32> for GatedHandler {
    fn serve(&self, connection: u32, _worker: &WorkerSlot) {
        self.gate.pass(connection);
    }
}

struct PoolWorld {
    gate: Arc<Gate>,
    pool: Option<Arc<SessionPool<u32>>>,
    submitted: u32,
    joiner: Option<JoinHandle<Result<(), PoolError>>>,
}

impl PoolWorld {
    fn new() -> Self {
        Self {
            gate: Arc::new(Gate::default()),
            pool: None,
            submitted: 0,
            joiner: None,
        }
    }

    fn pool(&self) -> Result<&Arc<SessionPool<u32>>, String> {
        self.pool
            .as_ref()
            .ok_or_else(|| "pool has not been started".to_owned())
    }
}

impl Drop for PoolWorld {
    fn drop(&mut self) {
        self.gate.release(TEARDOWN_PERMITS);
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }
}

#[fixture]
fn world() -> RefCell<PoolWorld> {
    RefCell::new(PoolWorld::new())
}

#[given("a gated pool with {size} workers")]
fn given_gated_pool(world: &RefCell<PoolWorld>, size: usize) -> StepResult {
    let gate = Arc::clone(&world.borrow().gate);
    let pool = SessionPool::start(size, Arc::new(GatedHandler { gate }))
        .map_err(|error| error.to_string())?;
    world.borrow_mut().pool = Some(Arc::new(pool));
    Ok(())
}

#[when("{count} sessions are submitted")]
fn when_sessions_submitted(world: &RefCell<PoolWorld>, count: u32) -> StepResult {
    let mut world = world.borrow_mut();
    for id in 0..count {
        world
            .pool()?
            .start_session_for(id)
            .map_err(|error| error.to_string())?;
    }
    world.submitted = count;
    Ok(())
}

#[when("the pool shuts down while the first session runs")]
fn when_pool_shuts_down(world: &RefCell<PoolWorld>) -> StepResult {
    let mut world = world.borrow_mut();
    if !world.gate.wait_for_entered(1) {
        return Err("first session never started".to_owned());
    }
    let pool = Arc::clone(world.pool()?);
    pool.shutdown();
    world.joiner = Some(thread::spawn(move || pool.join()));
    Ok(())
}

#[then("{size} sessions start straight away")]
fn then_sessions_start(world: &RefCell<PoolWorld>, size: usize) {
    let world = world.borrow();
    assert!(world.gate.wait_for_entered(size), "first {size} sessions start");
    thread::sleep(Duration::from_millis(50));
    let mut first = world.gate.entered();
    assert_eq!(first.len(), size, "no more than {size} run at once");
    first.sort_unstable();
    let expected: Vec<u32> = (0..world.submitted).take(size).collect();
    assert_eq!(first, expected);
    let pool = world.pool().expect("pool started");
    assert_eq!(pool.pending(), world.submitted as usize - size);
}

#[then("the queued sessions start in submission order as permits are released")]
fn then_queue_is_fifo(world: &RefCell<PoolWorld>) {
    let world = world.borrow();
    let running = world.gate.entered().len() as u32;
    for expected in running..world.submitted {
        world.gate.release(1);
        assert!(world.gate.wait_for_entered(expected as usize + 1));
        assert_eq!(world.gate.entered().last(), Some(&expected));
    }
}

#[then("the pool drains with at most {size} sessions running at once")]
fn then_pool_drains(world: &RefCell<PoolWorld>, size: usize) {
    let world = world.borrow();
    world.gate.release(size);
    let pool = world.pool().expect("pool started");
    pool.shutdown();
    pool.join().expect("workers exit");
    assert_eq!(world.gate.max_running(), size);
}

#[then("no sessions remain queued")]
fn then_nothing_queued(world: &RefCell<PoolWorld>) {
    let world = world.borrow();
    assert_eq!(world.pool().expect("pool started").pending(), 0);
}

#[then("only the first session ran once it is released")]
fn then_only_first_ran(world: &RefCell<PoolWorld>) {
    let mut world = world.borrow_mut();
    world.gate.release(1);
    world
        .joiner
        .take()
        .expect("pool was shut down")
        .join()
        .expect("join thread")
        .expect("workers exit cleanly");
    assert_eq!(world.gate.entered(), [0]);
}

#[scenario(
    path = "tests/features/session_pool.feature",
    name = "One worker runs queued sessions strictly in order"
)]
fn single_worker_pool(world: RefCell<PoolWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/session_pool.feature",
    name = "Two workers share six sessions"
)]
fn two_worker_pool(world: RefCell<PoolWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/session_pool.feature",
    name = "Three workers share seven sessions"
)]
fn three_worker_pool(world: RefCell<PoolWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/session_pool.feature",
    name = "Shutdown lets running sessions finish and drops queued ones"
)]
fn shutdown_drops_queued_sessions(world: RefCell<PoolWorld>) {
    drop(world);
}
