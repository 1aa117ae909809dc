/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Timer behaviour on tokio's paused clock: sleeping in a test advances time
//! only once every component has gone idle.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kestrel::prelude::*;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::setup::{
    components::{Journal, Recorder},
    initialize_tracing, settle,
};
mod setup;

#[kestrel_event(extends = timeout)]
struct RetryDue {
    timeout: Timeout,
    attempt: u32,
}

/// A client receiving its own timeouts and rejections from the shared timer.
fn spawn_client(
    runtime: &KestrelRuntime,
    timer: &TimerService,
    journal: &Journal,
) -> anyhow::Result<ComponentHandle> {
    let mut builder = runtime.new_component_with_state("client", Recorder::new(journal))?;
    let me = builder.id();
    builder
        .subscribe_shared::<Timeout, _>(timer.membrane(), Priority::Normal, move |state, timeout, _| {
            if timeout.timer_id.owner == me {
                state.journal.record(format!("timeout {}", timeout.timer_id.local));
            }
            Ok(())
        })?
        .subscribe_shared::<TimerRejected, _>(timer.membrane(), Priority::Normal, move |state, rejected, _| {
            if rejected.timer_id.owner == me {
                state.journal.record(format!("rejected {}", rejected.timer_id.local));
            }
            Ok(())
        })?;
    let client = builder.create()?;
    client.start()?;
    Ok(client)
}

#[tokio::test(start_paused = true)]
async fn one_shot_fires_exactly_once_after_its_delay() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let timer = TimerService::spawn(&runtime).await?;

    let fired_at = Arc::new(Mutex::new(Vec::new()));
    let mut builder = runtime.new_component::<Recorder>("client")?;
    let me = builder.id();
    let record = fired_at.clone();
    builder.subscribe_shared::<Timeout, _>(timer.membrane(), Priority::Normal, move |_, timeout, _| {
        record.lock().push((timeout.timer_id, Instant::now()));
        Ok(())
    })?;
    builder.create()?.start()?;

    let id = TimerId::new(me, 1);
    let scheduled = Instant::now();
    timer
        .membrane()
        .trigger(ScheduleTimeout::new(Duration::from_millis(100), id))?;
    settle(Duration::from_millis(10)).await;
    assert_eq!(timer.active_timers(), 1);

    settle(Duration::from_millis(500)).await;
    let fired = fired_at.lock().clone();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].0, id);
    assert!(fired[0].1.duration_since(scheduled) >= Duration::from_millis(100));
    assert_eq!(timer.active_timers(), 0);
    runtime.shutdown_all().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancel_before_fire_suppresses_the_timeout() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let timer = TimerService::spawn(&runtime).await?;
    let journal = Journal::default();
    let client = spawn_client(&runtime, &timer, &journal)?;

    let id = TimerId::new(client.id(), 1);
    timer
        .membrane()
        .trigger(ScheduleTimeout::new(Duration::from_millis(1000), id))?;
    settle(Duration::from_millis(10)).await;
    timer.membrane().trigger(CancelTimeout::new(id))?;
    settle(Duration::from_millis(2000)).await;

    assert!(journal.entries().is_empty());
    assert_eq!(timer.active_timers(), 0);

    // The id is free again after cancellation.
    timer
        .membrane()
        .trigger(ScheduleTimeout::new(Duration::from_millis(50), id))?;
    settle(Duration::from_millis(100)).await;
    assert_eq!(journal.entries(), vec!["timeout 1"]);
    runtime.shutdown_all().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancel_after_handoff_still_delivers_once() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let timer = TimerService::spawn(&runtime).await?;
    let journal = Journal::default();

    let mut builder = runtime.new_component_with_state("sleeper", Recorder::new(&journal))?;
    let inbox = builder.create_channel(ChannelSpec::new("sleeper-inbox").carries::<Timeout>());
    builder.subscribe::<Timeout, _>(&inbox, Priority::Normal, |state, timeout, _| {
        state.journal.record(format!("timeout {}", timeout.timer_id.local));
        Ok(())
    })?;
    // Created but not started: the delivered timeout waits in its queue.
    let sleeper = builder.create()?;

    let id = TimerId::new(sleeper.id(), 8);
    timer
        .membrane()
        .trigger(ScheduleTimeout::new(Duration::from_millis(50), id).deliver_to(&inbox))?;
    settle(Duration::from_millis(60)).await;
    assert_eq!(sleeper.queued(), 1);

    timer.membrane().trigger(CancelTimeout::new(id))?;
    settle(Duration::from_millis(100)).await;
    sleeper.start()?;
    settle(Duration::from_millis(10)).await;

    assert_eq!(journal.entries(), vec!["timeout 8"]);
    assert_eq!(timer.active_timers(), 0);
    runtime.shutdown_all().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn periodic_timeouts_repeat_until_cancelled() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let timer = TimerService::spawn(&runtime).await?;
    let journal = Journal::default();
    let client = spawn_client(&runtime, &timer, &journal)?;

    let id = TimerId::new(client.id(), 3);
    timer.membrane().trigger(SchedulePeriodicTimeout::new(
        Duration::ZERO,
        Duration::from_millis(50),
        id,
    ))?;
    settle(Duration::from_millis(220)).await;
    let observed = journal.count("timeout 3");
    assert!((4..=5).contains(&observed), "observed {observed} timeouts");
    assert_eq!(timer.active_timers(), 1);

    timer.membrane().trigger(CancelPeriodicTimeout::new(id))?;
    settle(Duration::from_millis(10)).await;
    let at_cancel = journal.count("timeout 3");
    settle(Duration::from_millis(200)).await;
    assert_eq!(journal.count("timeout 3"), at_cancel);
    assert_eq!(timer.active_timers(), 0);
    runtime.shutdown_all().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn duplicate_ids_and_zero_periods_are_rejected() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let timer = TimerService::spawn(&runtime).await?;
    let journal = Journal::default();
    let client = spawn_client(&runtime, &timer, &journal)?;

    let id = TimerId::new(client.id(), 1);
    timer
        .membrane()
        .trigger(ScheduleTimeout::new(Duration::from_millis(100), id))?;
    timer
        .membrane()
        .trigger(ScheduleTimeout::new(Duration::from_millis(30), id))?;
    timer.membrane().trigger(SchedulePeriodicTimeout::new(
        Duration::from_millis(10),
        Duration::ZERO,
        TimerId::new(client.id(), 2),
    ))?;
    settle(Duration::from_millis(300)).await;

    // The first schedule stands; the duplicate neither replaced it nor fired.
    assert_eq!(journal.count("rejected 1"), 1);
    assert_eq!(journal.count("timeout 1"), 1);
    assert_eq!(journal.count("rejected 2"), 1);
    assert_eq!(journal.count("timeout 2"), 0);
    runtime.shutdown_all().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deadlines_past_the_clock_range_are_rejected() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let timer = TimerService::spawn(&runtime).await?;
    let journal = Journal::default();
    let client = spawn_client(&runtime, &timer, &journal)?;

    timer.membrane().trigger(SchedulePeriodicTimeout::new(
        Duration::ZERO,
        Duration::MAX,
        TimerId::new(client.id(), 9),
    ))?;
    timer
        .membrane()
        .trigger(ScheduleTimeout::new(Duration::MAX, TimerId::new(client.id(), 2)))?;
    timer
        .membrane()
        .trigger(ScheduleTimeout::new(Duration::from_millis(100), TimerId::new(client.id(), 1)))?;
    settle(Duration::from_millis(300)).await;

    assert_eq!(journal.count("rejected 9"), 1);
    assert_eq!(journal.count("rejected 2"), 1);
    assert_eq!(journal.count("timeout 9"), 0);
    // The time source survived and still serves ordinary timers.
    assert_eq!(journal.count("timeout 1"), 1);
    assert_eq!(journal.count("rejected 1"), 0);
    assert_eq!(timer.active_timers(), 0);
    runtime.shutdown_all().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn timer_ids_are_namespaced_by_owner() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let timer = TimerService::spawn(&runtime).await?;
    let journal = Journal::default();
    let client = spawn_client(&runtime, &timer, &journal)?;
    let other = runtime.new_component::<Recorder>("other")?.create()?;

    let mine = TimerId::new(client.id(), 1);
    let theirs = TimerId::new(other.id(), 1);
    timer
        .membrane()
        .trigger(ScheduleTimeout::new(Duration::from_millis(100), mine))?;
    timer
        .membrane()
        .trigger(ScheduleTimeout::new(Duration::from_millis(100), theirs))?;
    timer.membrane().trigger(CancelTimeout::new(theirs))?;
    settle(Duration::from_millis(300)).await;

    // Same local id, different owners: no duplicate, and the cancel hit only one.
    assert_eq!(journal.count("rejected 1"), 0);
    assert_eq!(journal.count("timeout 1"), 1);
    assert_eq!(timer.active_timers(), 0);
    runtime.shutdown_all().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn custom_timeouts_reach_their_target_channel() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let timer = TimerService::spawn(&runtime).await?;
    let journal = Journal::default();

    let mut builder = runtime.new_component_with_state("retrier", Recorder::new(&journal))?;
    let inbox = builder.create_channel(ChannelSpec::new("retries").carries::<Timeout>());
    builder.subscribe::<RetryDue, _>(&inbox, Priority::Normal, |state, due, _| {
        state.journal.record(format!("retry {} of {}", due.attempt, due.timeout.timer_id.local));
        Ok(())
    })?;
    let retrier = builder.create()?;
    retrier.start()?;

    let due = RetryDue {
        timeout: Timeout::new(TimerId::new(retrier.id(), 5)),
        attempt: 3,
    };
    timer
        .membrane()
        .trigger(ScheduleTimeout::with_event(Duration::from_millis(20), due)?.deliver_to(&inbox))?;
    settle(Duration::from_millis(50)).await;

    assert_eq!(journal.entries(), vec!["retry 3 of 5"]);
    runtime.shutdown_all().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn destroying_the_timer_tears_down_its_membrane() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let timer = TimerService::spawn(&runtime).await?;
    let journal = Journal::default();
    let client = spawn_client(&runtime, &timer, &journal)?;

    assert!(matches!(
        TimerService::spawn(&runtime).await,
        Err(KestrelError::MembraneExists(_))
    ));
    let second = TimerService::spawn_named(&runtime, "kestrel.timer.backup").await?;

    timer.membrane().trigger(ScheduleTimeout::new(
        Duration::from_millis(100),
        TimerId::new(client.id(), 1),
    ))?;
    settle(Duration::from_millis(10)).await;
    timer.handle().destroy().await;
    settle(Duration::from_millis(200)).await;

    assert!(journal.entries().is_empty());
    assert_eq!(timer.active_timers(), 0);
    assert!(matches!(
        timer.membrane().trigger(CancelTimeout::new(TimerId::new(client.id(), 1))),
        Err(KestrelError::MembraneTornDown(_))
    ));
    assert!(!second.membrane().is_torn_down());
    runtime.shutdown_all().await?;
    Ok(())
}
