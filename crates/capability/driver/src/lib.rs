//! # Wolf Driver 模块
//!
//! 现场/云端驱动与网关核心之间的边界：
//!
//! - [`capability`]：`Pollable`、`Writable`、`Listener`、`Stoppable`、`ConfigPublisher`
//! - [`FieldDriver`] / [`CloudDriver`]：驱动实例，通过 `as_*` 暴露能力
//! - [`DriverCatalog`]：驱动工厂目录，按配置段构造驱动集合
//! - [`ResourceRegistry`]：物理资源锁与共享句柄

pub mod capability;
pub mod driver;
pub mod error;
pub mod factory;
pub mod resources;

pub use capability::{ConfigPublisher, Listener, Pollable, Stoppable, Writable};
pub use driver::{CloudDriver, FieldDriver};
pub use error::DriverError;
pub use factory::{
    CloudDriverFactory, DriverCatalog, DriverContext, DriverSet, FieldDriverFactory,
};
pub use resources::{ResourceGuard, ResourceRegistry};
