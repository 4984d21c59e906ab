// ABOUTME: Headless mode - submits one task, streams bus events to stdout,
// ABOUTME: and reports the final outcome.

use std::time::Duration;

use anyhow::Result;
use canopy::bus::{BusEvent, BusItem, until_settled};
use canopy::engine::RunOutcome;
use futures::StreamExt;

use crate::wiring::Runtime;

const PRINTER_DRAIN: Duration = Duration::from_secs(2);

pub async fn run(runtime: &Runtime, agent: &str, task: &str, json: bool) -> Result<RunOutcome> {
    let dispatcher = &runtime.dispatcher;
    let events = dispatcher.bus().subscribe();
    let run_id = dispatcher.submit(agent, task)?;
    tracing::info!(run_id = %run_id, agent, "submitted");

    let mut events = Box::pin(until_settled(events, run_id.clone()));
    let mut printer = tokio::spawn(async move {
        while let Some(item) = events.next().await {
            match item {
                BusItem::Event(event) if json => {
                    if let Ok(line) = serde_json::to_string(&*event) {
                        println!("{}", line);
                    }
                }
                BusItem::Event(event) => println!("{}", summarize(&event)),
                BusItem::Gap { missed } => println!("... {} events dropped", missed),
            }
        }
    });

    let outcome = tokio::select! {
        outcome = dispatcher.await_run(&run_id) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, cancelling run tree");
            dispatcher.cancel(&run_id).await?;
            dispatcher.await_run(&run_id).await?
        }
    };

    // The printer ends on the root's terminal event; a gap can swallow it.
    if tokio::time::timeout(PRINTER_DRAIN, &mut printer).await.is_err() {
        tracing::debug!("event printer did not see the final status");
        printer.abort();
    }
    Ok(outcome)
}

fn summarize(event: &BusEvent) -> String {
    match event {
        BusEvent::RunStarted {
            run_id,
            agent,
            parent_run_id,
            max_steps,
            ..
        } => match parent_run_id {
            Some(parent) => format!("[{}] {} started under {} (budget {})", short(run_id), agent, short(parent), max_steps),
            None => format!("[{}] {} started (budget {})", short(run_id), agent, max_steps),
        },
        BusEvent::Step { run_id, agent, step } => {
            format!("[{}] {} #{} {}", short(run_id), agent, step.index, step.summary())
        }
        BusEvent::StatusChanged {
            run_id,
            agent,
            status,
            reason,
            ..
        } => match reason {
            Some(reason) => format!("[{}] {} -> {:?}: {}", short(run_id), agent, status, reason),
            None => format!("[{}] {} -> {:?}", short(run_id), agent, status),
        },
    }
}

fn short(run_id: &str) -> &str {
    run_id.get(..8).unwrap_or(run_id)
}
