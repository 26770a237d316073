use async_trait::async_trait;
use domain::{MappingRow, Record};
use std::sync::Arc;
use wolf_cache::{CacheError, Delivery, FaultReporter, InMemoryCache, MeasurementCache};
use wolf_config::schema::ParamDefault;
use wolf_config::{AppConfig, DriverSections, ParamSpec, Params, Section};
use wolf_driver::{
    CloudDriver, CloudDriverFactory, DriverCatalog, DriverContext, DriverError, FieldDriver,
    FieldDriverFactory, ResourceRegistry,
};

struct Meter {
    name: String,
}

impl FieldDriver for Meter {
    fn name(&self) -> &str {
        &self.name
    }
}

struct MeterFactory;

const METER_PARAMS: &[ParamSpec] = &[
    ParamSpec::string("device_id").required(),
    ParamSpec::int("timeout").default(ParamDefault::Int(3)),
];

#[async_trait]
impl FieldDriverFactory for MeterFactory {
    fn kind(&self) -> &'static str {
        "meter"
    }

    fn params(&self) -> &'static [ParamSpec] {
        METER_PARAMS
    }

    async fn build(
        &self,
        section: &Section,
        params: Params,
        ctx: &DriverContext,
    ) -> Result<Arc<dyn FieldDriver>, DriverError> {
        let device_id = params.require_str("device_id")?;
        if device_id == "boom" {
            return Err(DriverError::Cache(CacheError::Unreachable("down".into())));
        }
        let rows: Vec<MappingRow> = section.mapping()?;
        ctx.cache
            .store_meta(device_id, &section.name, "meter", &rows)
            .await?;
        Ok(Arc::new(Meter {
            name: section.name.clone(),
        }))
    }
}

struct Sink {
    name: String,
}

#[async_trait]
impl Delivery for Sink {
    async fn deliver(&self, _record: &Record) -> bool {
        true
    }
}

impl CloudDriver for Sink {
    fn name(&self) -> &str {
        &self.name
    }
}

struct SinkFactory;

#[async_trait]
impl CloudDriverFactory for SinkFactory {
    fn kind(&self) -> &'static str {
        "sink"
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
        Ok(Arc::new(Sink {
            name: section.name.clone(),
        }))
    }
}

fn context(cache: Arc<InMemoryCache>) -> DriverContext {
    DriverContext {
        cache,
        config: Arc::new(AppConfig::from_env().expect("config")),
        resources: Arc::new(ResourceRegistry::new()),
        faults: FaultReporter::detached(),
    }
}

fn catalog() -> DriverCatalog {
    DriverCatalog::new()
        .with_field(Arc::new(MeterFactory))
        .with_cloud(Arc::new(SinkFactory))
}

#[tokio::test]
async fn broken_sections_are_skipped() {
    let sections = DriverSections::parse(
        r#"
[field.meter.good]
device_id = "M1"

[[field.meter.good.mapping]]
measure_id = "V"

[field.meter.missing_device]
timeout = 1

[field.meter.off]
device_id = "M3"
disabled = true

[field.dlms.unknown]
device_id = "M4"

[cloud.sink]
"#,
    )
    .expect("parse");
    let cache = Arc::new(InMemoryCache::new("1"));
    let built = catalog()
        .build_all(&sections, &context(cache.clone()))
        .await
        .expect("build");

    let names: Vec<_> = built.field.iter().map(|d| d.name().to_string()).collect();
    assert_eq!(names, vec!["meter.good"]);
    assert_eq!(built.sink_names(), vec!["sink"]);
    assert!(built.field[0].as_pollable().is_none());

    let meta = cache.load_meta(&Default::default()).await.expect("meta");
    assert_eq!(meta.len(), 1);
    assert_eq!(meta[0].driver_id, "meter.good");
}

#[tokio::test]
async fn fatal_cache_error_aborts_loading() {
    let sections = DriverSections::parse(
        r#"
[field.meter.bad]
device_id = "boom"
"#,
    )
    .expect("parse");
    let cache = Arc::new(InMemoryCache::new("1"));
    let err = catalog()
        .build_all(&sections, &context(cache))
        .await
        .err()
        .expect("fatal");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn cloud_driver_is_a_delivery_callback() {
    let cache = InMemoryCache::new("1");
    cache.set_sinks(vec!["sink".to_string()]);
    cache
        .store(&Record::new("1", "M1", 10.0).with_measure("V", 1.0))
        .await
        .expect("store");

    let sink: Arc<dyn CloudDriver> = Arc::new(Sink {
        name: "sink".to_string(),
    });
    let report = cache.load(sink.name(), sink.as_ref()).await.expect("load");
    assert_eq!(report.delivered, 1);
}
