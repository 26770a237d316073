//! 物理资源锁注册表
//!
//! 按资源标识（串口路径、PLC 地址等）懒创建互斥锁，同一资源的所有驱动实例
//! 共享同一把锁。另提供按资源标识共享任意句柄（如共享监听连接）。

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

type SharedHandle = Arc<dyn Any + Send + Sync>;

/// 资源锁守卫，drop 即释放。
pub struct ResourceGuard {
    resource_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        debug!(target: "wolf.resources", resource = %self.resource_id, "resource_released");
    }
}

/// 进程级资源注册表。
#[derive(Default)]
pub struct ResourceRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    shared: Mutex<HashMap<String, SharedHandle>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, resource_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(resource_id.to_string())
            .or_default()
            .clone()
    }

    /// 获取资源锁；被占用时记录等待并阻塞到可用。
    pub async fn acquire(&self, resource_id: &str) -> ResourceGuard {
        let lock = self.lock_for(resource_id);
        let guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(target: "wolf.resources", resource = resource_id, "resource_contended");
                lock.lock_owned().await
            }
        };
        debug!(target: "wolf.resources", resource = resource_id, "resource_acquired");
        ResourceGuard {
            resource_id: resource_id.to_string(),
            _guard: guard,
        }
    }

    /// 显式释放（等价于 drop 守卫）。
    pub fn release(&self, guard: ResourceGuard) {
        drop(guard);
    }

    /// 已登记的资源数。
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按资源标识获取共享句柄，不存在时用 `factory` 创建。
    ///
    /// 同一标识已登记了其他类型的句柄时返回 None。
    pub fn shared<T, F>(&self, resource_id: &str, factory: F) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = shared
            .entry(resource_id.to_string())
            .or_insert_with(|| Arc::new(factory()) as SharedHandle)
            .clone();
        handle.downcast::<T>().ok()
    }

    /// 移除共享句柄（驱动重载时）。
    pub fn forget_shared(&self, resource_id: &str) {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(resource_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_id_shares_one_lock() {
        let registry = ResourceRegistry::new();
        let guard = registry.acquire("/dev/ttyUSB0").await;
        assert_eq!(guard.resource_id(), "/dev/ttyUSB0");
        assert!(registry.lock_for("/dev/ttyUSB0").try_lock().is_err());
        assert!(registry.lock_for("/dev/ttyUSB1").try_lock().is_ok());
        registry.release(guard);
        assert!(registry.lock_for("/dev/ttyUSB0").try_lock().is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn shared_handles_are_created_once() {
        let registry = ResourceRegistry::new();
        let first = registry.shared("radio", || 7u32).expect("u32");
        let second = registry.shared("radio", || 9u32).expect("u32");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 7);
        assert!(registry.shared("radio", String::new).is_none());
        registry.forget_shared("radio");
        assert_eq!(*registry.shared("radio", || 9u32).expect("u32"), 9);
    }
}
