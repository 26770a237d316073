//! 每日自更新检查。

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// 自更新接口：返回 true 表示已安装新版本，进程需要退出等待重启。
#[async_trait]
pub trait Updater: Send + Sync {
    async fn update(&self, force: bool) -> bool;
}

/// 不做任何更新。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUpdater;

#[async_trait]
impl Updater for NoopUpdater {
    async fn update(&self, _force: bool) -> bool {
        false
    }
}

pub const DAILY: Duration = Duration::from_secs(86_400);

/// 每隔 `every` 检查一次更新；更新成功返回 true，停机时返回 false。
pub async fn watch_updates(
    updater: Arc<dyn Updater>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> bool {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = shutdown.wait_for(|stop| *stop) => return false,
        }
        if updater.update(false).await {
            info!(target: "wolf.updater", "update_installed_exiting");
            return true;
        }
        debug!(target: "wolf.updater", "update_check_no_update");
    }
}
