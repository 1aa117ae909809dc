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

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kestrel::prelude::*;
use kestrel_test::prelude::*;

use crate::setup::{
    components::{Journal, Recorder},
    events::{LoudPing, Note, Ping, Pong},
    initialize_tracing, settle, wait_until,
};
mod setup;

const WAIT: Duration = Duration::from_secs(5);

/// Events from one producer reach a subscription in the order they were triggered.
#[kestrel_test]
async fn events_from_one_producer_arrive_in_order() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let pings = runtime.create_channel(ChannelSpec::new("pings").carries::<Ping>());
    let journal = Journal::default();

    let mut builder = runtime.new_component_with_state("listener", Recorder::new(&journal))?;
    builder.subscribe::<Ping, _>(&pings, Priority::Normal, |state, ping, _| {
        state.journal.record(ping.n.to_string());
        Ok(())
    })?;
    let listener = builder.create()?;
    listener.start()?;

    for n in 0..200 {
        pings.trigger(Ping { n })?;
    }
    wait_until(WAIT, || journal.len() == 200).await?;

    let expected: Vec<String> = (0..200).map(|n| n.to_string()).collect();
    assert_eq!(journal.entries(), expected);
    runtime.shutdown_all().await?;
    Ok(())
}

/// Each subscriber receives every event, and one component's subscriptions
/// fire in registration order.
#[kestrel_test]
async fn every_subscription_receives_the_event() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let pings = runtime.create_channel(ChannelSpec::new("pings").carries::<Ping>());
    let journal = Journal::default();

    let mut first = runtime.new_component_with_state("first", Recorder::new(&journal))?;
    first
        .subscribe::<Ping, _>(&pings, Priority::Normal, |state, _, _| {
            state.journal.record("first-a");
            Ok(())
        })?
        .subscribe::<Ping, _>(&pings, Priority::Normal, |state, _, _| {
            state.journal.record("first-b");
            Ok(())
        })?;
    let first = first.create()?;

    let mut second = runtime.new_component_with_state("second", Recorder::new(&journal))?;
    second.subscribe::<Ping, _>(&pings, Priority::Normal, |state, _, _| {
        state.journal.record("second");
        Ok(())
    })?;
    let second = second.create()?;
    assert_eq!(pings.subscription_count(), 3);

    first.start()?;
    second.start()?;
    pings.trigger(Ping { n: 1 })?;
    wait_until(WAIT, || journal.len() == 3).await?;

    let entries = journal.entries();
    let a = entries.iter().position(|e| e == "first-a");
    let b = entries.iter().position(|e| e == "first-b");
    assert!(a < b, "registration order not kept: {entries:?}");
    assert_eq!(journal.count("second"), 1);
    runtime.shutdown_all().await?;
    Ok(())
}

/// A subscription for a base kind also receives its variants, seeing the base value.
#[kestrel_test]
async fn base_subscribers_receive_variants() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let pings = runtime.create_channel(
        ChannelSpec::new("pings")
            .carries::<Ping>()
            .carries::<Note>(),
    );
    let journal = Journal::default();

    let mut builder = runtime.new_component_with_state("listener", Recorder::new(&journal))?;
    builder
        .subscribe::<Ping, _>(&pings, Priority::Normal, |state, ping, _| {
            state.journal.record(format!("ping {}", ping.n));
            Ok(())
        })?
        .subscribe::<LoudPing, _>(&pings, Priority::Normal, |state, loud, _| {
            state.journal.record(format!("loud {}", loud.volume));
            Ok(())
        })?;
    let listener = builder.create()?;
    listener.start()?;

    // LoudPing is not declared, but the channel carries its base kind.
    pings.trigger(LoudPing {
        ping: Ping { n: 7 },
        volume: 11,
    })?;
    pings.trigger(Ping { n: 8 })?;
    wait_until(WAIT, || journal.len() == 3).await?;

    assert_eq!(journal.entries(), vec!["ping 7", "loud 11", "ping 8"]);
    runtime.shutdown_all().await?;
    Ok(())
}

/// Triggering a kind the channel does not carry is an error and reaches nobody.
#[kestrel_test]
async fn undeclared_kinds_are_refused() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let pings = runtime.create_channel(ChannelSpec::new("pings").carries::<Ping>());

    let err = pings.trigger(Pong { n: 1 }).unwrap_err();
    assert!(matches!(err, KestrelError::UndeclaredEvent { .. }));
    assert!(!pings.accepts(&Pong { n: 1 }));
    assert!(pings.accepts(&Ping { n: 1 }));
    runtime.shutdown_all().await?;
    Ok(())
}

/// A trigger on a channel without subscribers succeeds and does nothing.
#[kestrel_test]
async fn triggering_without_subscribers_is_a_no_op() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let pings = runtime.create_channel(ChannelSpec::new("pings").carries::<Ping>());
    assert_eq!(pings.subscription_count(), 0);
    pings.trigger(Ping { n: 1 })?;
    pings.trigger_with_priority(Ping { n: 2 }, Priority::High)?;
    assert_eq!(runtime.component_count(), 0);
    runtime.shutdown_all().await?;
    Ok(())
}

/// Queued high-priority invocations run before low-priority ones.
#[kestrel_test]
async fn high_priority_is_dispatched_first() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let bulk = runtime.create_channel(ChannelSpec::new("bulk").carries::<Ping>());
    let urgent = runtime.create_channel(ChannelSpec::new("urgent").carries::<Ping>());
    let journal = Journal::default();

    let mut builder = runtime.new_component_with_state("sorter", Recorder::new(&journal))?;
    builder
        .subscribe::<Ping, _>(&bulk, Priority::Low, |state, ping, _| {
            state.journal.record(format!("low {}", ping.n));
            Ok(())
        })?
        .subscribe::<Ping, _>(&urgent, Priority::High, |state, ping, _| {
            state.journal.record(format!("high {}", ping.n));
            Ok(())
        })?;
    let sorter = builder.create()?;

    // Not started yet: both invocations wait in the ready queue together.
    bulk.trigger(Ping { n: 1 })?;
    urgent.trigger(Ping { n: 2 })?;
    bulk.trigger_with_priority(Ping { n: 3 }, Priority::High)?;
    assert_eq!(sorter.queued(), 3);

    sorter.start()?;
    wait_until(WAIT, || journal.len() == 3).await?;
    // The override moves ping 3 ahead of ping 1; it still runs the bulk handler.
    assert_eq!(journal.entries(), vec!["high 2", "low 3", "low 1"]);
    runtime.shutdown_all().await?;
    Ok(())
}

/// Many producers never cause two handlers of one component to overlap.
#[kestrel_test]
async fn a_component_runs_one_handler_at_a_time() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let pings = runtime.create_channel(ChannelSpec::new("pings").carries::<Ping>());
    let notes = runtime.create_channel(ChannelSpec::new("notes").carries::<Note>());

    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let handled = Arc::new(AtomicUsize::new(0));

    let mut builder = runtime.new_component::<Recorder>("serial")?;
    for channel in [&pings, &notes] {
        let (busy, overlaps, handled) = (busy.clone(), overlaps.clone(), handled.clone());
        let guard = move || {
            if busy.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_micros(200));
            busy.store(false, Ordering::SeqCst);
            handled.fetch_add(1, Ordering::SeqCst);
        };
        if channel.carries_kind(&EventKind::of::<Ping>()) {
            builder.subscribe::<Ping, _>(channel, Priority::Normal, move |_, _, _| {
                guard();
                Ok(())
            })?;
        } else {
            builder.subscribe::<Note, _>(channel, Priority::High, move |_, _, _| {
                guard();
                Ok(())
            })?;
        }
    }
    let serial = builder.create()?;
    serial.start()?;

    let mut producers = Vec::new();
    for p in 0..4u32 {
        let (pings, notes) = (pings.clone(), notes.clone());
        producers.push(tokio::spawn(async move {
            for n in 0..50 {
                if n % 2 == 0 {
                    pings.trigger(Ping { n: p * 100 + n }).ok();
                } else {
                    notes.trigger(Note(format!("{p}-{n}"))).ok();
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for producer in producers {
        producer.await?;
    }
    wait_until(WAIT, || handled.load(Ordering::SeqCst) == 200).await?;
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    runtime.shutdown_all().await?;
    Ok(())
}

/// After unsubscribing, a component no longer receives that kind from that channel.
#[kestrel_test]
async fn unsubscribe_stops_delivery() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let pings = runtime.create_channel(ChannelSpec::new("pings").carries::<Ping>());
    let journal = Journal::default();

    let mut builder = runtime.new_component_with_state("listener", Recorder::new(&journal))?;
    builder.subscribe::<Ping, _>(&pings, Priority::Normal, |state, ping, _| {
        state.journal.record(ping.n.to_string());
        Ok(())
    })?;
    let listener = builder.create()?;
    listener.start()?;

    pings.trigger(Ping { n: 1 })?;
    wait_until(WAIT, || journal.len() == 1).await?;
    assert_eq!(listener.unsubscribe::<Ping>(&pings), 1);
    assert_eq!(pings.subscription_count(), 0);

    pings.trigger(Ping { n: 2 })?;
    settle(Duration::from_millis(50)).await;
    assert_eq!(journal.entries(), vec!["1"]);
    runtime.shutdown_all().await?;
    Ok(())
}

/// Components reply by triggering on a channel handed to them.
#[kestrel_test]
async fn handlers_trigger_follow_up_events() -> anyhow::Result<()> {
    initialize_tracing();
    let runtime = KestrelApp::launch_async().await;
    let pings = runtime.create_channel(ChannelSpec::new("pings").carries::<Ping>());
    let pongs = runtime.create_channel(ChannelSpec::new("pongs").carries::<Pong>());
    let journal = Journal::default();

    let mut responder = runtime.new_component::<Recorder>("responder")?;
    let replies = pongs.clone();
    responder.subscribe::<Ping, _>(&pings, Priority::Normal, move |_, ping, ctx| {
        ctx.trigger(Pong { n: ping.n + 1 }, &replies)?;
        Ok(())
    })?;
    let responder = responder.create()?;

    let mut collector = runtime.new_component_with_state("collector", Recorder::new(&journal))?;
    collector.subscribe::<Pong, _>(&pongs, Priority::Normal, |state, pong, _| {
        state.handled += 1;
        state.journal.record(format!("pong {}", pong.n));
        Ok(())
    })?;
    let collector = collector.create()?;

    runtime.start_all()?;
    assert_eq!(responder.lifecycle(), Lifecycle::Started);
    assert_eq!(collector.lifecycle(), Lifecycle::Started);

    pings.trigger(Ping { n: 41 })?;
    wait_until(WAIT, || journal.len() == 1).await?;
    assert_eq!(journal.entries(), vec!["pong 42"]);
    runtime.shutdown_all().await?;
    Ok(())
}
