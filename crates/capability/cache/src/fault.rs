//! 致命缓存故障上报
//!
//! 调度器之外的调用方（后台监听任务、HTTP 层）遇到致命缓存错误时，通过
//! [`FaultReporter`] 通知主循环，进程以该错误的退出码结束。

use crate::error::CacheError;
use tokio::sync::mpsc;
use tracing::error;

#[derive(Debug, Clone)]
pub struct FaultReporter {
    tx: mpsc::UnboundedSender<CacheError>,
}

/// 创建故障通道；接收端由主循环持有。
pub fn fault_channel() -> (FaultReporter, mpsc::UnboundedReceiver<CacheError>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FaultReporter { tx }, rx)
}

impl FaultReporter {
    /// 没有接收端的上报器，上报只记录日志。
    pub fn detached() -> Self {
        fault_channel().0
    }

    /// 致命错误转交主循环并返回 true；非致命错误原样返回 false。
    pub fn report(&self, source: &str, err: CacheError) -> bool {
        if !err.is_fatal() {
            return false;
        }
        error!(target: "wolf.cache", source, error = %err, "cache_fault_reported");
        let _ = self.tx.send(err);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fatal_errors_reach_the_receiver() {
        let (faults, mut rx) = fault_channel();
        assert!(!faults.report("http", CacheError::Codec("bad marker".into())));
        assert!(faults.report("http", CacheError::Unreachable("refused".into())));
        let err = rx.try_recv().expect("fault");
        assert_eq!(err.exit_code(), 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn detached_reporter_does_not_fail() {
        assert!(FaultReporter::detached().report("listener", CacheError::Protocol("NOAUTH".into())));
    }
}
