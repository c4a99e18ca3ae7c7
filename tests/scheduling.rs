//! Delays, schedules and the shared timeline under a virtual clock.

#[macro_use]
mod common;

use common::{init_test_logging, test_runtime};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use strand::time::{Exponential, Recurs, Spaced};
use strand::{Clock, Effect, Schedule, Scheduler, Time};

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

/// An effect that records the runtime clock each time it runs.
fn stamp(log: &Rc<RefCell<Vec<Time>>>) -> Effect<String, ()> {
    let log = log.clone();
    Scheduler::current::<String>().map(move |scheduler| log.borrow_mut().push(scheduler.unix_time()))
}

#[test]
fn sleep_advances_virtual_clock_exactly() {
    init_test("sleep_advances_virtual_clock_exactly");
    let runtime = test_runtime();
    let log = Rc::new(RefCell::new(Vec::new()));
    let program = Effect::<String, ()>::sleep(Duration::from_millis(40))
        .flat_map({
            let log = log.clone();
            move |()| stamp(&log)
        })
        .flat_map({
            let log = log.clone();
            move |()| stamp(&log).delayed(Duration::from_millis(60))
        });
    let exit = runtime.block_on(program).expect("run");
    assert_with_log!(exit == Ok(()), "completed", "ok", exit);
    let stamps = log.borrow().clone();
    assert_with_log!(
        stamps == vec![Time::from_millis(40), Time::from_millis(100)],
        "clock readings",
        "40ms, 100ms",
        stamps
    );
    test_complete!("sleep_advances_virtual_clock_exactly");
}

#[test]
fn concurrent_sleepers_wake_in_deadline_order() {
    init_test("concurrent_sleepers_wake_in_deadline_order");
    let runtime = test_runtime();
    let order = Rc::new(RefCell::new(Vec::new()));
    let sleeper = |ms: u64, order: &Rc<RefCell<Vec<u64>>>| {
        let order = order.clone();
        Effect::<String, ()>::sleep(Duration::from_millis(ms)).map(move |()| order.borrow_mut().push(ms))
    };
    let program = sleeper(30, &order)
        .fork::<String>()
        .zip(sleeper(10, &order).fork::<String>())
        .zip(sleeper(20, &order).fork::<String>())
        .flat_map(|((a, b), c)| a.join().flat_map(move |()| b.join()).flat_map(move |()| c.join()));
    let exit = runtime.block_on(program).expect("run");
    assert_with_log!(exit == Ok(()), "completed", "ok", exit);
    let seen = order.borrow().clone();
    assert_with_log!(seen == vec![10, 20, 30], "deadline order", "10, 20, 30", seen);
    assert_with_log!(runtime.now() == Time::from_millis(30), "latest deadline", Time::from_millis(30), runtime.now());
    test_complete!("concurrent_sleepers_wake_in_deadline_order");
}

#[test]
fn spaced_take_runs_with_pauses() {
    init_test("spaced_take_runs_with_pauses");
    let runtime = test_runtime();
    let log = Rc::new(RefCell::new(Vec::new()));
    let program = stamp(&log).repeat(Spaced(Duration::from_millis(10)).take(3));
    let exit = runtime.block_on(program).expect("run");
    let iterations = exit.as_ref().map(|state| state.iterations).ok();
    assert_with_log!(iterations == Some(4), "final step count", Some(4), iterations);
    let stamps = log.borrow().clone();
    assert_with_log!(
        stamps == vec![Time::ZERO, Time::from_millis(10), Time::from_millis(20)],
        "first run immediate, then spaced",
        "0, 10ms, 20ms",
        stamps
    );
    test_complete!("spaced_take_runs_with_pauses");
}

#[test]
fn recurs_runs_back_to_back() {
    init_test("recurs_runs_back_to_back");
    let runtime = test_runtime();
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let tick = Effect::<String, ()>::sync(move || counter.set(counter.get() + 1));
    let exit = runtime.block_on(tick.clone().repeat(Recurs(5))).expect("run");
    assert_with_log!(exit.is_ok(), "ok", true, exit.is_ok());
    assert_with_log!(runs.get() == 5, "five runs", 5, runs.get());
    assert_with_log!(runtime.now() == Time::ZERO, "no waiting", Time::ZERO, runtime.now());

    runs.set(0);
    let _ = runtime.block_on(tick.repeat(Recurs(0))).expect("run");
    assert_with_log!(runs.get() == 0, "done before first run", 0, runs.get());
    test_complete!("recurs_runs_back_to_back");
}

#[test]
fn schedule_done_after_first_run_runs_once() {
    init_test("schedule_done_after_first_run_runs_once");
    let runtime = test_runtime();
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let tick = Effect::<String, ()>::sync(move || counter.set(counter.get() + 1));

    let state = runtime.block_on(tick.clone().repeat(Recurs(1))).expect("run");
    let iterations = state.as_ref().ok().map(|state| state.iterations);
    assert_with_log!(runs.get() == 1, "one run", 1, runs.get());
    assert_with_log!(iterations == Some(2), "two steps", Some(2), iterations);

    runs.set(0);
    let spaced = Spaced(Duration::from_secs(5)).take(1);
    let state = runtime.block_on(tick.repeat(spaced)).expect("run");
    let iterations = state.as_ref().ok().map(|state| state.iterations);
    assert_with_log!(runs.get() == 1, "capped at one run", 1, runs.get());
    assert_with_log!(iterations == Some(2), "two steps", Some(2), iterations);
    assert_with_log!(runtime.now() == Time::ZERO, "no pause after the last run", Time::ZERO, runtime.now());
    test_complete!("schedule_done_after_first_run_runs_once");
}

#[test]
fn exponential_backoff_doubles_pauses() {
    init_test("exponential_backoff_doubles_pauses");
    let runtime = test_runtime();
    let log = Rc::new(RefCell::new(Vec::new()));
    let program = stamp(&log).repeat(Exponential::new(Duration::from_millis(10), 3));
    let _ = runtime.block_on(program).expect("run");
    let stamps = log.borrow().clone();
    assert_with_log!(
        stamps
            == vec![
                Time::ZERO,
                Time::from_millis(10),
                Time::from_millis(30),
                Time::from_millis(70),
            ],
        "pauses 10, 20, 40",
        "0, 10ms, 30ms, 70ms",
        stamps
    );
    test_complete!("exponential_backoff_doubles_pauses");
}

#[test]
fn failure_stops_repetition() {
    init_test("failure_stops_repetition");
    let runtime = test_runtime();
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let flaky = Effect::<String, ()>::try_sync(move || {
        counter.set(counter.get() + 1);
        if counter.get() == 2 {
            Err("second run failed".to_string())
        } else {
            Ok(())
        }
    });
    let exit = runtime
        .block_on(flaky.repeat(Spaced(Duration::from_millis(5))))
        .expect("run");
    let failures: Vec<String> = exit
        .as_ref()
        .err()
        .map(|cause| cause.failures().into_iter().cloned().collect())
        .unwrap_or_default();
    assert_with_log!(failures == vec!["second run failed".to_string()], "failure surfaced", "second run failed", failures);
    assert_with_log!(runs.get() == 2, "stopped", 2, runs.get());
    assert_with_log!(runtime.pending_timers() == 0, "nothing left armed", 0, runtime.pending_timers());
    test_complete!("failure_stops_repetition");
}

#[test]
fn scheduler_service_is_shared_by_fibers() {
    init_test("scheduler_service_is_shared_by_fibers");
    let runtime = test_runtime();
    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    let program = Scheduler::current::<String>().map(move |scheduler| {
        let flag = flag.clone();
        scheduler.schedule_task(Duration::from_millis(15), move || flag.set(true))
    });
    let exit = runtime.block_on(program).expect("run");
    let scheduled = exit.as_ref().is_ok_and(Option::is_some);
    assert_with_log!(scheduled, "task queued", true, scheduled);

    let pending = runtime.services().scheduler.pending_tasks();
    assert_with_log!(pending == 1, "on the runtime scheduler", 1, pending);
    assert_with_log!(!ran.get(), "not yet due", false, ran.get());

    let clock = runtime.virtual_clock().expect("virtual time").clone();
    clock.advance_to(Time::from_millis(15));
    let fired = runtime.drive();
    assert_with_log!(fired == 1, "host timer fired", 1, fired);
    assert_with_log!(ran.get(), "task ran", true, ran.get());
    test_complete!("scheduler_service_is_shared_by_fibers");
}

#[test]
fn scheduler_in_context_overrides_default() {
    init_test("scheduler_in_context_overrides_default");
    let runtime = test_runtime();
    let private = Scheduler::new(runtime.services().timer.fork_timer());
    let context = strand::Context::new().add(private.clone());
    let program = Effect::<String, ()>::sleep(Duration::from_millis(5)).provide(context);
    let fiber = runtime.run_with(program, |_| {});

    assert_with_log!(private.pending_tasks() == 1, "queued on provided scheduler", 1, private.pending_tasks());
    let default_pending = runtime.services().scheduler.pending_tasks();
    assert_with_log!(default_pending == 0, "default untouched", 0, default_pending);

    let clock = runtime.virtual_clock().expect("virtual time").clone();
    clock.advance_to(Time::from_millis(5));
    runtime.drive();
    let exit = fiber.poll();
    assert_with_log!(exit == Some(Ok(())), "woke through shared driver", "Some(Ok(()))", exit);
    test_complete!("scheduler_in_context_overrides_default");
}
