use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use map_reduce::app::{crash, wc};
use map_reduce::storage::bucket_of;
use map_reduce::{
    Assignment, Coordinator, CoordinatorHandle, MapFn, Phase, ReduceFn, ServiceClient, Worker,
};
use tarpc::{client, context, tokio_serde::formats::Json};
use tempfile::TempDir;
use tokio::task::JoinHandle;

const BACKOFF: Duration = Duration::from_millis(50);

fn write_inputs(dir: &Path, contents: &[(&str, &str)]) -> Vec<PathBuf> {
    contents
        .iter()
        .map(|(name, text)| {
            let p = dir.join(name);
            std::fs::write(&p, text).unwrap();
            p
        })
        .collect()
}

async fn start(files: Vec<PathBuf>, nreduce: usize, timeout: Duration) -> CoordinatorHandle {
    Coordinator {
        addr: "127.0.0.1:0".parse().unwrap(),
        timeout,
        files,
        nreduce,
    }
    .start()
    .await
    .unwrap()
}

fn spawn_worker(
    id: u64,
    addr: SocketAddr,
    dir: &Path,
    map: MapFn,
    reduce: ReduceFn,
) -> JoinHandle<anyhow::Result<()>> {
    let w = Worker {
        id,
        server: addr.to_string(),
        dir: dir.to_owned(),
        backoff: BACKOFF,
        map,
        reduce,
    };
    tokio::spawn(async move { w.launch().await })
}

/// Collects `mr-out-*` files into a key -> (value, bucket) table, checking that
/// no key appears twice.
fn collect_output(dir: &Path) -> HashMap<String, (String, usize)> {
    let mut result = HashMap::new();
    for ent in std::fs::read_dir(dir).unwrap() {
        let p = ent.unwrap().path();
        let name = p.file_name().unwrap().to_str().unwrap().to_owned();
        if let Some(bucket) = name.strip_prefix("mr-out-") {
            let bucket: usize = bucket.parse().unwrap();
            let s = std::fs::read_to_string(&p).unwrap();
            let mut prev: Option<String> = None;
            for l in s.lines() {
                let kv: Vec<&str> = l.split(' ').collect();
                assert_eq!(kv.len(), 2, "malformed line {:?}", l);
                if let Some(prev) = &prev {
                    assert!(prev.as_str() < kv[0], "output not sorted by key");
                }
                prev = Some(kv[0].to_owned());
                let dup = result.insert(kv[0].to_owned(), (kv[1].to_owned(), bucket));
                assert!(dup.is_none(), "{} in more than one output", kv[0]);
            }
        }
    }
    result
}

fn sequential(files: &[PathBuf]) -> HashMap<String, String> {
    let mut cnt = HashMap::<String, Vec<String>>::new();
    for fname in files {
        let contents = std::fs::read_to_string(fname).unwrap();
        for kv in wc::map(fname, &contents) {
            cnt.entry(kv.key).or_default().push(kv.value);
        }
    }
    cnt.iter()
        .map(|(k, vs)| (k.clone(), wc::reduce(k, vs)))
        .collect()
}

fn assert_matches_sequential(dir: &Path, files: &[PathBuf], nreduce: usize) {
    let result = collect_output(dir);
    let seq = sequential(files);
    assert_eq!(result.len(), seq.len());
    for (k, v) in seq.iter() {
        let (got, bucket) = result.get(k).unwrap();
        assert_eq!(got, v, "count of {}", k);
        assert_eq!(*bucket, bucket_of(k, nreduce), "bucket of {}", k);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_word_count() {
    let _ = pretty_env_logger::try_init();
    let dir = TempDir::new().unwrap();
    let files = write_inputs(
        dir.path(),
        &[
            ("pg-0.txt", "It was the best of times, it was the worst of times"),
            ("pg-1.txt", "it was the age of wisdom\nit was the age of foolishness"),
            ("pg-2.txt", "it was the epoch of belief, it was the epoch of incredulity"),
            ("pg-3.txt", ""),
        ],
    );
    let nreduce = 3;
    let handle = start(files.clone(), nreduce, Duration::from_secs(10)).await;

    let workers: Vec<_> = (0..4)
        .map(|i| spawn_worker(i, handle.local_addr(), dir.path(), wc::map, wc::reduce))
        .collect();
    handle.wait().await;
    for w in workers {
        w.await.unwrap().unwrap();
    }

    for r in 0..nreduce {
        assert!(dir.path().join(format!("mr-out-{}", r)).exists());
    }
    assert_matches_sequential(dir.path(), &files, nreduce);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_inputs_two_buckets() {
    let _ = pretty_env_logger::try_init();
    let dir = TempDir::new().unwrap();
    let files = write_inputs(
        dir.path(),
        &[("a.txt", "x y z x\nw"), ("b.txt", "y y q w x")],
    );
    let handle = start(files.clone(), 2, Duration::from_secs(10)).await;

    let workers: Vec<_> = (0..2)
        .map(|i| spawn_worker(i, handle.local_addr(), dir.path(), wc::map, wc::reduce))
        .collect();
    handle.wait().await;
    for w in workers {
        w.await.unwrap().unwrap();
    }

    let result = collect_output(dir.path());
    let expected = [("q", "1"), ("w", "2"), ("x", "3"), ("y", "3"), ("z", "1")];
    assert_eq!(result.len(), expected.len());
    for (k, v) in expected.iter() {
        let (got, bucket) = &result[*k];
        assert_eq!(got, v);
        assert_eq!(*bucket, bucket_of(k, 2));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_silent_worker_is_replaced() {
    let _ = pretty_env_logger::try_init();
    let dir = TempDir::new().unwrap();
    let files = write_inputs(
        dir.path(),
        &[("a.txt", "one two three"), ("b.txt", "two three"), ("c.txt", "three")],
    );
    let handle = start(files.clone(), 2, Duration::from_secs(1)).await;

    // Take map task 0 and never finish it.
    let transport = tarpc::serde_transport::tcp::connect(handle.local_addr(), Json::default)
        .await
        .unwrap();
    let straggler = ServiceClient::new(client::Config::default(), transport).spawn();
    let assignment = straggler.get_task(context::current(), 1000).await.unwrap();
    assert!(matches!(assignment, Assignment::Map { id: 0, .. }));

    let workers: Vec<_> = (0..2)
        .map(|i| spawn_worker(i, handle.local_addr(), dir.path(), wc::map, wc::reduce))
        .collect();
    while !handle.done() {
        tokio::time::sleep(BACKOFF).await;
    }

    let reply = straggler
        .report_task(context::current(), 1000, Phase::Map, 0, true)
        .await
        .unwrap();
    assert!(!reply.ok);
    let job = handle.scheduler().job();
    assert!(job.all_completed(Phase::Map) && job.all_completed(Phase::Reduce));
    assert_eq!(job.in_progress(Phase::Map), 0);

    handle.wait().await;
    for w in workers {
        w.await.unwrap().unwrap();
    }
    assert_matches_sequential(dir.path(), &files, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crashing_workers() {
    let _ = pretty_env_logger::try_init();
    let dir = TempDir::new().unwrap();
    let files = write_inputs(
        dir.path(),
        &[
            ("a.txt", "alpha beta gamma alpha"),
            ("b.txt", "beta gamma delta"),
            ("c.txt", "gamma delta epsilon"),
            ("d.txt", "alpha epsilon"),
        ],
    );
    let nreduce = 3;
    let handle = start(files.clone(), nreduce, Duration::from_secs(1)).await;

    let addr = handle.local_addr();
    let spawn_crashy = |id| spawn_worker(id, addr, dir.path(), crash::map, crash::reduce);

    // Restart workers as they die, like a process supervisor would.
    let mut workers: Vec<_> = (0..3).map(spawn_crashy).collect();
    let mut next_id = 3;
    while !handle.done() {
        for w in workers.iter_mut() {
            if w.is_finished() {
                *w = spawn_crashy(next_id);
                next_id += 1;
            }
        }
        tokio::time::sleep(BACKOFF).await;
    }
    handle.wait().await;

    assert_matches_sequential(dir.path(), &files, nreduce);
}
