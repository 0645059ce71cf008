use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::*;

const PERIOD: Duration = Duration::from_secs(5);

fn counting_task(delayed: bool, cancel: CancellationToken) -> (PollTask, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let tick = move || {
        let seen = seen.clone();
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        }
    };
    let task = if delayed {
        PollTask::spawn_delayed("test", PERIOD, cancel, tick)
    } else {
        PollTask::spawn("test", PERIOD, cancel, tick)
    };
    (task, count)
}

async fn wait(d: Duration) {
    tokio::time::sleep(d).await;
}

#[tokio::test(start_paused = true)]
async fn first_tick_is_immediate_then_periodic() {
    let (task, count) = counting_task(false, CancellationToken::new());
    wait(Duration::from_millis(10)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    wait(PERIOD).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert!(!task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn delayed_task_waits_one_period() {
    let (_task, count) = counting_task(true, CancellationToken::new());
    wait(Duration::from_millis(10)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    wait(PERIOD).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_halts_further_ticks() {
    let (task, count) = counting_task(false, CancellationToken::new());
    wait(Duration::from_millis(10)).await;
    task.stop();
    wait(PERIOD * 3).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_cancels() {
    let (task, count) = counting_task(false, CancellationToken::new());
    wait(Duration::from_millis(10)).await;
    drop(task);
    wait(PERIOD * 3).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelling_parent_token_stops_child_task() {
    let root = CancellationToken::new();
    let (task, count) = counting_task(false, root.child_token());
    wait(Duration::from_millis(10)).await;
    root.cancel();
    wait(PERIOD * 2).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn break_ends_the_loop() {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let task = PollTask::spawn("test", PERIOD, CancellationToken::new(), move || {
        let seen = seen.clone();
        async move {
            if seen.fetch_add(1, Ordering::SeqCst) + 1 >= 2 { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
        }
    });
    wait(PERIOD * 4).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert!(task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn cancellation_drops_in_flight_tick() {
    let applied = Arc::new(AtomicBool::new(false));
    let flag = applied.clone();
    let task = PollTask::spawn("slow", PERIOD, CancellationToken::new(), move || {
        let flag = flag.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            flag.store(true, Ordering::SeqCst);
            ControlFlow::Continue(())
        }
    });
    wait(Duration::from_secs(1)).await;
    task.shutdown().await;
    wait(Duration::from_secs(5)).await;
    assert!(!applied.load(Ordering::SeqCst));
}
