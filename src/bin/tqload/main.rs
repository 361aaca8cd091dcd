mod args;

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use bytes::Bytes;
use clap::Parser;
use futures::future;
use tokio::signal;
use tokio::time::{interval, sleep};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Level};

use crate::args::Args;
use tubeq::{
    OnTaskChange, PutOptions, Queue, QueueOptions, ReleaseOptions,
    StoreOptions, TaskStore,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            };
            cancel.cancel();
        });
    }

    match run(cancel, args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "load run failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(cancel: CancellationToken, args: Args) -> Result<()> {
    ensure!(args.utubes > 0, "at least one micro-tube is required");
    ensure!(args.workers > 0, "at least one worker is required");

    let mut limits = HashMap::new();
    for i in 0..args.utubes {
        limits.insert(format!("load-{i}"), args.limit);
    }

    let store = TaskStore::create("load", StoreOptions::default());
    let on_change: OnTaskChange = Box::new(|task, kind| {
        trace!(
            id = %task.id,
            status = %task.status,
            kind = kind.map(|k| k.as_str()).unwrap_or("timer"),
            "task changed"
        );
    });
    let queue = Arc::new(
        Queue::new(store, Some(on_change), QueueOptions { limits })
            .context("building queue")?,
    );

    info!(
        utubes = args.utubes,
        limit = args.limit,
        tasks = args.tasks,
        workers = args.workers,
        "load run starting"
    );

    let acked = Arc::new(AtomicU64::new(0));

    let mut handles = vec![tokio::spawn(produce(
        Arc::clone(&queue),
        cancel.clone(),
        args.clone(),
    ))];
    for _ in 0..args.workers {
        handles.push(tokio::spawn(work(
            Arc::clone(&queue),
            cancel.clone(),
            Arc::clone(&acked),
            args.tasks,
            Duration::from_millis(args.work_ms),
        )));
    }
    handles.push(tokio::spawn(kick_buried(
        Arc::clone(&queue),
        cancel.clone(),
        Arc::clone(&acked),
        args.tasks,
    )));

    future::join_all(handles).await;

    let stats = queue.stats();
    println!(
        "{}",
        serde_yaml::to_string(&stats).context("rendering stats")?
    );

    match Arc::try_unwrap(queue) {
        Ok(queue) => queue.shutdown().await,
        Err(_) => cancel.cancel(),
    }

    Ok(())
}

/// Puts tasks round-robin across the tubes, pacing on an interval; every
/// seventh task is put with a short delay to exercise the delayed path.
async fn produce(queue: Arc<Queue>, cancel: CancellationToken, args: Args) {
    let tubes: Vec<String> =
        (0..args.utubes).map(|i| format!("load-{i}")).collect();

    let ticks =
        interval(Duration::from_millis(args.put_interval_ms.max(1)));
    let mut ticks = IntervalStream::new(ticks).take(args.tasks as usize);

    let mut n: u64 = 0;
    while ticks.next().await.is_some() {
        if cancel.is_cancelled() {
            break;
        }

        let utube = tubes[(n % tubes.len() as u64) as usize].clone();
        let task = queue.put(
            Bytes::from(format!("task-{n}")),
            PutOptions {
                pri: Some((n % 3) as i64),
                delay: (n % 7 == 0).then(|| Duration::from_millis(20)),
                utube: Some(utube),
                ..Default::default()
            },
        );
        trace!(id = %task.id, "produced");
        n += 1;
    }

    info!(count = n, "producer finished");
}

/// Takes tasks and acks them after simulated work. A bounded number of
/// takes detour through release and bury so those paths see load too.
async fn work(
    queue: Arc<Queue>,
    cancel: CancellationToken,
    acked: Arc<AtomicU64>,
    goal: u64,
    work: Duration,
) {
    let mut took: u64 = 0;
    let mut detours: u64 = 16;

    while !cancel.is_cancelled() && acked.load(Ordering::Relaxed) < goal {
        let Some(task) = queue.take() else {
            sleep(Duration::from_millis(2)).await;
            continue;
        };
        took += 1;

        sleep(work).await;

        if detours > 0 && took % 13 == 0 {
            detours -= 1;
            let _ = queue.release(task.id, ReleaseOptions::default());
        } else if detours > 0 && took % 17 == 0 {
            detours -= 1;
            let _ = queue.bury(task.id);
        } else if queue.delete(task.id).is_some() {
            acked.fetch_add(1, Ordering::Relaxed);
        }
    }

    debug!(took, "worker finished");
}

/// Returns buried tasks to circulation until the run completes.
async fn kick_buried(
    queue: Arc<Queue>,
    cancel: CancellationToken,
    acked: Arc<AtomicU64>,
    goal: u64,
) {
    while !cancel.is_cancelled() && acked.load(Ordering::Relaxed) < goal {
        sleep(Duration::from_millis(50)).await;

        let kicked = queue.kick(8);
        if kicked > 0 {
            debug!(kicked, "kicked buried tasks");
        }
    }
}
