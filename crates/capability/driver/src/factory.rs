//! 驱动工厂与驱动目录
//!
//! 每种驱动类型注册一个工厂，工厂声明参数模式并按配置段构造驱动实例。
//! [`DriverCatalog`] 把配置文件中的全部段构造成驱动集合；单个段构造失败只禁用该段。

use crate::driver::{CloudDriver, FieldDriver};
use crate::error::DriverError;
use crate::resources::ResourceRegistry;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use wolf_cache::{FaultReporter, MeasurementCache};
use wolf_config::{AppConfig, DriverSections, ParamSpec, Params, Section, parse_section};

/// 注入给每个驱动的运行环境。
#[derive(Clone)]
pub struct DriverContext {
    pub cache: Arc<dyn MeasurementCache>,
    pub config: Arc<AppConfig>,
    pub resources: Arc<ResourceRegistry>,
    /// 后台任务遇到致命缓存错误时上报
    pub faults: FaultReporter,
}

impl DriverContext {
    pub fn client_id(&self) -> &str {
        self.cache.client_id()
    }
}

#[async_trait]
pub trait FieldDriverFactory: Send + Sync {
    fn kind(&self) -> &'static str;

    fn params(&self) -> &'static [ParamSpec];

    /// 构造驱动，并通过 `store_meta` 登记其元数据。
    async fn build(
        &self,
        section: &Section,
        params: Params,
        ctx: &DriverContext,
    ) -> Result<Arc<dyn FieldDriver>, DriverError>;
}

#[async_trait]
pub trait CloudDriverFactory: Send + Sync {
    fn kind(&self) -> &'static str;

    fn params(&self) -> &'static [ParamSpec];

    async fn build(
        &self,
        section: &Section,
        params: Params,
        ctx: &DriverContext,
    ) -> Result<Arc<dyn CloudDriver>, DriverError>;
}

/// 当前启用的驱动集合。
#[derive(Clone, Default)]
pub struct DriverSet {
    pub field: Vec<Arc<dyn FieldDriver>>,
    pub cloud: Vec<Arc<dyn CloudDriver>>,
}

impl DriverSet {
    /// 启用的出口名（即云端驱动名）。
    pub fn sink_names(&self) -> Vec<String> {
        self.cloud.iter().map(|driver| driver.name().to_string()).collect()
    }

    /// 调用所有驱动的停止钩子。
    pub async fn stop_all(&self) {
        for driver in &self.field {
            if let Some(stoppable) = driver.as_stoppable() {
                stoppable.stop().await;
                info!(target: "wolf.drivers", driver = driver.name(), "driver_stopped");
            }
        }
        for driver in &self.cloud {
            if let Some(stoppable) = driver.as_stoppable() {
                stoppable.stop().await;
                info!(target: "wolf.drivers", driver = driver.name(), "driver_stopped");
            }
        }
    }
}

/// 按类型索引的驱动工厂目录。
#[derive(Default)]
pub struct DriverCatalog {
    field: BTreeMap<&'static str, Arc<dyn FieldDriverFactory>>,
    cloud: BTreeMap<&'static str, Arc<dyn CloudDriverFactory>>,
}

impl DriverCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, factory: Arc<dyn FieldDriverFactory>) -> Self {
        self.field.insert(factory.kind(), factory);
        self
    }

    pub fn with_cloud(mut self, factory: Arc<dyn CloudDriverFactory>) -> Self {
        self.cloud.insert(factory.kind(), factory);
        self
    }

    pub fn field_kinds(&self) -> Vec<&'static str> {
        self.field.keys().copied().collect()
    }

    pub fn cloud_kinds(&self) -> Vec<&'static str> {
        self.cloud.keys().copied().collect()
    }

    /// 构造全部启用的驱动。
    ///
    /// 缓存后端级故障直接返回；其他构造失败记录 error + warn 并跳过该段。
    pub async fn build_all(
        &self,
        sections: &DriverSections,
        ctx: &DriverContext,
    ) -> Result<DriverSet, DriverError> {
        let mut built = DriverSet::default();

        for section in &sections.field {
            if section.is_disabled() {
                info!(target: "wolf.drivers", driver = %section.name, "driver_disabled");
                continue;
            }
            let result = match self.field.get(section.kind.as_str()) {
                Some(factory) => match parse_section(section, factory.params()) {
                    Ok(params) => factory.build(section, params, ctx).await,
                    Err(err) => Err(err.into()),
                },
                None => Err(DriverError::UnknownKind(section.kind.clone())),
            };
            match result {
                Ok(driver) => {
                    info!(target: "wolf.drivers", driver = %section.name, kind = %section.kind, "field_driver_loaded");
                    built.field.push(driver);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => report_failure(section, &err),
            }
        }

        for section in &sections.cloud {
            if section.is_disabled() {
                info!(target: "wolf.drivers", driver = %section.name, "driver_disabled");
                continue;
            }
            let result = match self.cloud.get(section.kind.as_str()) {
                Some(factory) => match parse_section(section, factory.params()) {
                    Ok(params) => factory.build(section, params, ctx).await,
                    Err(err) => Err(err.into()),
                },
                None => Err(DriverError::UnknownKind(section.kind.clone())),
            };
            match result {
                Ok(driver) => {
                    info!(target: "wolf.drivers", driver = %section.name, kind = %section.kind, "cloud_driver_loaded");
                    built.cloud.push(driver);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => report_failure(section, &err),
            }
        }

        Ok(built)
    }
}

fn report_failure(section: &Section, err: &DriverError) {
    error!(target: "wolf.drivers", driver = %section.name, error = %err, "driver_build_failed");
    warn!(target: "wolf.drivers", driver = %section.name, "driver_section_disabled_for_this_run");
}
