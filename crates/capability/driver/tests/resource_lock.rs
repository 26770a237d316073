use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use wolf_driver::ResourceRegistry;

/// 记录受保护区段的进入/退出顺序。
async fn protected_io(registry: Arc<ResourceRegistry>, log: Arc<Mutex<Vec<String>>>, who: &str) {
    let _guard = registry.acquire("192.168.1.10:502").await;
    log.lock().await.push(format!("{who}:enter"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    log.lock().await.push(format!("{who}:exit"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_resource_never_overlaps() {
    let registry = Arc::new(ResourceRegistry::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for who in ["a", "b", "c"] {
        let registry = registry.clone();
        let log = log.clone();
        tasks.push(tokio::spawn(async move {
            protected_io(registry, log, who).await;
        }));
    }
    for task in tasks {
        task.await.expect("task");
    }

    let log = log.lock().await;
    assert_eq!(log.len(), 6);
    for pair in log.chunks(2) {
        let enter = pair[0].strip_suffix(":enter").expect("enter first");
        let exit = pair[1].strip_suffix(":exit").expect("exit second");
        assert_eq!(enter, exit);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn different_resources_run_concurrently() {
    let registry = Arc::new(ResourceRegistry::new());
    let first = registry.acquire("/dev/ttyUSB0").await;
    let second = tokio::time::timeout(
        Duration::from_millis(100),
        registry.acquire("/dev/ttyUSB1"),
    )
    .await;
    assert!(second.is_ok());
    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        registry.acquire("/dev/ttyUSB0"),
    )
    .await;
    assert!(blocked.is_err());
    drop(first);
}
