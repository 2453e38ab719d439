//! zkmt demo
//!
//! Two sessions on an in-memory server: one keeps a membership watch on
//! `/group`, the other joins and leaves it. Then a burst of asynchronous
//! requests shows completions arriving in submission order.
//!
//! # Environment Variables
//!
//! - `RUST_LOG=debug` - Log level filter (default info)
//! - `ZKMT_MAX_POLL_MS`, `ZKMT_THREAD_PREFIX`, ... - Session configuration
//!
//! Run with `RUST_LOG=zkmt_runtime=debug cargo run -p zkmt-demo`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::info;
use zkmt::{
    Acl, CreateMode, Event, MemoryServer, ReturnCode, SessionConfig, State, StringCallback,
    Watcher, ZkResult, ZooKeeper, ANY_VERSION,
};

fn main() -> ZkResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    println!("=== zkmt demo ===\n");

    let server = MemoryServer::new();
    let config = SessionConfig::from_env();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let session_watcher: Arc<dyn Watcher> = Arc::new(move |event: Event, state: State, _: &str| {
        if event == Event::Session {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(state);
            }
        }
    });

    let observer = ZooKeeper::connect(Box::new(server.connect()?), config.clone(), Some(session_watcher))?;
    if let Ok(state) = rx.recv_timeout(Duration::from_secs(5)) {
        println!("observer session {:#x} is {}", observer.session_id(), state);
    }

    let member = ZooKeeper::connect(Box::new(server.connect()?), config, None)?;
    let open = Acl::open_unsafe();
    observer.create_sync("/group", b"", &open, CreateMode::Persistent)?;

    // membership watch
    let (events_tx, events_rx) = mpsc::channel();
    let events_tx = Mutex::new(events_tx);
    let membership: Arc<dyn Watcher> = Arc::new(move |event: Event, _: State, path: &str| {
        if let Ok(tx) = events_tx.lock() {
            let _ = tx.send((event, path.to_string()));
        }
    });
    let (children, _) = observer.get_children_sync("/group", Some(membership))?;
    println!("members before join: {:?}", children);

    let me = member.create_sync("/group/member-", b"alive", &open, CreateMode::EphemeralSequential)?;
    println!("joined as {}", me);
    if let Ok((event, path)) = events_rx.recv_timeout(Duration::from_secs(5)) {
        println!("observer saw {:?} on {}", event, path);
    }
    let (children, _) = observer.get_children_sync("/group", None)?;
    println!("members after join: {:?}", children);

    // burst of asynchronous creates; sequence numbers follow submission
    const BURST: usize = 1000;
    let done = Arc::new(AtomicUsize::new(0));
    let in_order = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    member.create_sync("/jobs", b"", &open, CreateMode::Persistent)?;
    for _ in 0..BURST {
        let (done, in_order) = (done.clone(), in_order.clone());
        let cb: Arc<dyn StringCallback> = Arc::new(move |rc: ReturnCode, _: &str, name: &str| {
            let seen = done.fetch_add(1, Ordering::SeqCst);
            if rc.is_ok() && name.ends_with(&format!("{:010}", seen)) {
                in_order.fetch_add(1, Ordering::SeqCst);
            }
        });
        member.create("/jobs/job-", b"", &open, CreateMode::PersistentSequential, Some(cb))?;
    }
    while done.load(Ordering::SeqCst) < BURST && start.elapsed() < Duration::from_secs(10) {
        std::thread::sleep(Duration::from_millis(1));
    }
    println!(
        "{} completions in {:?}, {} in submission order",
        done.load(Ordering::SeqCst),
        start.elapsed(),
        in_order.load(Ordering::SeqCst)
    );

    let stat = member.set_sync(&me, b"leaving", ANY_VERSION)?;
    info!(version = stat.version, "member updated its node");

    member.close()?;
    println!("member closed; nodes left: {}", server.node_count());
    observer.close()?;

    println!("\n=== done ===");
    Ok(())
}
