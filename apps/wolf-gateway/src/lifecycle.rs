//! 生命周期与重载控制
//!
//! 启动和 SIGHUP 时整体重建驱动集合：先停止旧驱动，再按当前配置构造新集合，
//! 更新缓存的出口队列列表，最后执行一次性步骤（推送元数据、启动监听）。
//! 重载需要驱动集合的写锁，因此总是等到正在执行的周期结束。

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use wolf_cache::{CacheError, FaultReporter, MeasurementCache};
use wolf_config::{AppConfig, ConfigError, DriverSections};
use wolf_driver::{CloudDriver, DriverCatalog, DriverContext, DriverError, DriverSet, ResourceRegistry};
use wolf_scheduler::SchedulerError;

/// 进程级错误，决定退出码。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn exit_code(&self) -> i32 {
        match self {
            GatewayError::Cache(err) => err.exit_code(),
            GatewayError::Driver(DriverError::Cache(err)) => err.exit_code(),
            GatewayError::Scheduler(err) => err.exit_code(),
            _ => 1,
        }
    }
}

/// 随网关发布的全部驱动工厂。
pub fn bundled_catalog() -> DriverCatalog {
    wolf_cloud::register(wolf_field::register(DriverCatalog::new()))
}

pub struct Gateway {
    cache: Arc<dyn MeasurementCache>,
    config: Arc<AppConfig>,
    catalog: DriverCatalog,
    resources: Arc<ResourceRegistry>,
    drivers: Arc<RwLock<DriverSet>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    faults: FaultReporter,
}

impl Gateway {
    pub fn new(cache: Arc<dyn MeasurementCache>, config: Arc<AppConfig>, catalog: DriverCatalog) -> Self {
        Self {
            cache,
            config,
            catalog,
            resources: Arc::new(ResourceRegistry::new()),
            drivers: Arc::new(RwLock::new(DriverSet::default())),
            listeners: Mutex::new(Vec::new()),
            faults: FaultReporter::detached(),
        }
    }

    /// 驱动后台任务的致命缓存故障交给主循环。
    pub fn with_faults(mut self, faults: FaultReporter) -> Self {
        self.faults = faults;
        self
    }

    pub fn drivers(&self) -> Arc<RwLock<DriverSet>> {
        self.drivers.clone()
    }

    /// 读取驱动段文件；文件不存在时按零个驱动段继续。
    pub fn load_sections(&self) -> Result<DriverSections, ConfigError> {
        match DriverSections::load(&self.config.config_file) {
            Ok(sections) => Ok(sections),
            Err(ConfigError::FileNotFound(path)) => {
                error!(target: "wolf.lifecycle", path = %path, "config_file_not_found");
                Ok(DriverSections::default())
            }
            Err(err) => Err(err),
        }
    }

    /// 按当前配置重建驱动集合。
    pub async fn reload(&self) -> Result<(), GatewayError> {
        let sections = self.load_sections()?;
        self.apply(&sections).await
    }

    /// 用给定驱动段替换当前驱动集合。
    pub async fn apply(&self, sections: &DriverSections) -> Result<(), GatewayError> {
        let built = {
            let mut drivers = self.drivers.write().await;
            self.stop_listeners();
            drivers.stop_all().await;
            *drivers = DriverSet::default();

            let ctx = DriverContext {
                cache: self.cache.clone(),
                config: self.config.clone(),
                resources: self.resources.clone(),
                faults: self.faults.clone(),
            };
            let built = self.catalog.build_all(sections, &ctx).await?;
            self.cache.set_sinks(built.sink_names());
            *drivers = built.clone();
            built
        };
        info!(
            target: "wolf.lifecycle",
            field = built.field.len(),
            cloud = built.cloud.len(),
            sinks = ?built.sink_names(),
            "drivers_loaded"
        );
        self.once(&built).await
    }

    /// 一次性步骤：并发推送元数据目录，然后启动监听驱动。
    async fn once(&self, drivers: &DriverSet) -> Result<(), GatewayError> {
        let mut posts = JoinSet::new();
        for driver in drivers.cloud.iter().cloned() {
            posts.spawn(post_config(driver));
        }
        while let Some(joined) = posts.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    std::panic::resume_unwind(err.into_panic());
                }
            }
        }

        let mut started = Vec::new();
        for driver in &drivers.field {
            let Some(listener) = driver.as_listener() else {
                continue;
            };
            match listener.start().await {
                Ok(handle) => {
                    info!(target: "wolf.lifecycle", driver = driver.name(), "listener_started");
                    started.push(handle);
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    error!(target: "wolf.lifecycle", driver = driver.name(), error = %err, "listener_start_failed");
                }
            }
        }
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(started);
        Ok(())
    }

    fn stop_listeners(&self) {
        let handles: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            handle.abort();
        }
    }

    /// 停止全部驱动（退出前调用）。
    pub async fn stop(&self) {
        let drivers = self.drivers.write().await;
        self.stop_listeners();
        drivers.stop_all().await;
    }
}

async fn post_config(driver: Arc<dyn CloudDriver>) {
    let Some(publisher) = driver.as_config_publisher() else {
        return;
    };
    if publisher.post_config().await {
        info!(target: "wolf.lifecycle", sink = driver.name(), "config_posted");
    } else {
        warn!(target: "wolf.lifecycle", sink = driver.name(), "config_post_failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::Record;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wolf_cache::{Delivery, InMemoryCache};
    use wolf_config::{ParamSpec, Params, Section};
    use wolf_driver::{
        CloudDriverFactory, ConfigPublisher, FieldDriver, FieldDriverFactory, Listener, Stoppable,
    };

    #[derive(Default)]
    struct Counters {
        listeners_started: AtomicUsize,
        stopped: AtomicUsize,
        configs_posted: AtomicUsize,
    }

    struct Counted {
        name: String,
        counters: Arc<Counters>,
    }

    impl FieldDriver for Counted {
        fn name(&self) -> &str {
            &self.name
        }

        fn as_listener(&self) -> Option<&dyn Listener> {
            Some(self)
        }

        fn as_stoppable(&self) -> Option<&dyn Stoppable> {
            Some(self)
        }
    }

    #[async_trait]
    impl Listener for Counted {
        async fn start(&self) -> Result<JoinHandle<()>, DriverError> {
            self.counters.listeners_started.fetch_add(1, Ordering::SeqCst);
            Ok(tokio::spawn(std::future::pending()))
        }
    }

    #[async_trait]
    impl Stoppable for Counted {
        async fn stop(&self) {
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Delivery for Counted {
        async fn deliver(&self, _record: &Record) -> bool {
            true
        }
    }

    #[async_trait]
    impl ConfigPublisher for Counted {
        async fn post_config(&self) -> bool {
            self.counters.configs_posted.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    impl CloudDriver for Counted {
        fn name(&self) -> &str {
            &self.name
        }

        fn as_config_publisher(&self) -> Option<&dyn ConfigPublisher> {
            Some(self)
        }

        fn as_stoppable(&self) -> Option<&dyn Stoppable> {
            Some(self)
        }
    }

    struct CountingFactory(Arc<Counters>);

    #[async_trait]
    impl FieldDriverFactory for CountingFactory {
        fn kind(&self) -> &'static str {
            "counted"
        }

        fn params(&self) -> &'static [ParamSpec] {
            &[]
        }

        async fn build(
            &self,
            section: &Section,
            _params: Params,
            _ctx: &DriverContext,
        ) -> Result<Arc<dyn FieldDriver>, DriverError> {
            Ok(Arc::new(Counted {
                name: section.name.clone(),
                counters: self.0.clone(),
            }))
        }
    }

    #[async_trait]
    impl CloudDriverFactory for CountingFactory {
        fn kind(&self) -> &'static str {
            "counted"
        }

        fn params(&self) -> &'static [ParamSpec] {
            &[]
        }

        async fn build(
            &self,
            section: &Section,
            _params: Params,
            _ctx: &DriverContext,
        ) -> Result<Arc<dyn CloudDriver>, DriverError> {
            Ok(Arc::new(Counted {
                name: section.name.clone(),
                counters: self.0.clone(),
            }))
        }
    }

    fn gateway(counters: Arc<Counters>) -> (Arc<InMemoryCache>, Gateway) {
        let cache = Arc::new(InMemoryCache::new("1"));
        let mut config = AppConfig::from_env().expect("config");
        config.config_file = "/nonexistent/wolf.toml".to_string();
        let catalog = DriverCatalog::new()
            .with_field(Arc::new(CountingFactory(counters.clone())))
            .with_cloud(Arc::new(CountingFactory(counters)));
        let gateway = Gateway::new(cache.clone(), Arc::new(config), catalog);
        (cache, gateway)
    }

    fn sections() -> DriverSections {
        DriverSections::parse(
            "[field.counted.a]\n[field.counted.b]\n[field.counted.off]\ndisabled = true\n[cloud.counted]\n",
        )
        .expect("parse")
    }

    #[tokio::test]
    async fn apply_registers_sinks_and_runs_once_steps() {
        let counters = Arc::new(Counters::default());
        let (cache, gateway) = gateway(counters.clone());

        gateway.apply(&sections()).await.expect("apply");

        assert_eq!(cache.sinks(), vec!["counted".to_string()]);
        assert_eq!(counters.configs_posted.load(Ordering::SeqCst), 1);
        assert_eq!(counters.listeners_started.load(Ordering::SeqCst), 2);
        assert_eq!(gateway.drivers().read().await.field.len(), 2);
    }

    #[tokio::test]
    async fn reapply_stops_previous_drivers() {
        let counters = Arc::new(Counters::default());
        let (cache, gateway) = gateway(counters.clone());

        gateway.apply(&sections()).await.expect("apply");
        gateway
            .apply(&DriverSections::parse("[field.counted.a]\n").expect("parse"))
            .await
            .expect("reapply");

        assert_eq!(counters.stopped.load(Ordering::SeqCst), 3);
        assert!(cache.sinks().is_empty());
        assert_eq!(counters.listeners_started.load(Ordering::SeqCst), 3);

        gateway.stop().await;
        assert_eq!(counters.stopped.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn missing_config_file_loads_nothing() {
        let (_, gateway) = gateway(Arc::new(Counters::default()));
        gateway.reload().await.expect("reload");
        let drivers = gateway.drivers();
        let drivers = drivers.read().await;
        assert!(drivers.field.is_empty());
        assert!(drivers.cloud.is_empty());
    }

    #[test]
    fn bundled_catalog_covers_sample_config() {
        let catalog = bundled_catalog();
        assert_eq!(catalog.field_kinds(), vec!["modbus_tcp", "mqtt_raw"]);
        assert_eq!(catalog.cloud_kinds(), vec!["mqtt", "rest"]);

        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/wolf.toml");
        let sections = DriverSections::load(path).expect("sample config");
        for section in sections.field.iter().chain(&sections.cloud) {
            let known = catalog.field_kinds().contains(&section.kind.as_str())
                || catalog.cloud_kinds().contains(&section.kind.as_str());
            assert!(known, "unknown kind {}", section.kind);
        }
        assert_eq!(sections.field_sections("modbus_tcp").count(), 1);
        assert!(sections.cloud_section("rest").is_some_and(|s| s.is_disabled()));
    }

    #[test]
    fn exit_codes_follow_cache_failure_cause() {
        let unreachable = GatewayError::Cache(CacheError::Unreachable("down".into()));
        assert_eq!(unreachable.exit_code(), 2);
        let config = GatewayError::Config(ConfigError::Parse("bad".into()));
        assert_eq!(config.exit_code(), 1);
    }
}
