//! Modbus TCP 现场驱动
//!
//! 每次轮询/写入建立一条短连接，按映射表逐个读取寄存器。
//! 同一 `host:port` 上的所有实例通过资源锁串行访问网桥。

use crate::registers::{DataType, Register, Table, WordOrder, decode, encode};
use async_trait::async_trait;
use domain::{MappingRow, MeasureValue, Record, now_epoch_secs};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, warn};
use wolf_config::schema::ParamDefault;
use wolf_config::{ConfigError, ParamSpec, Params, Section};
use wolf_driver::{
    DriverContext, DriverError, FieldDriver, FieldDriverFactory, Pollable, ResourceRegistry,
    Writable,
};

pub const KIND: &str = "modbus_tcp";

const PARAMS: &[ParamSpec] = &[
    ParamSpec::string("device_id").required(),
    ParamSpec::string("descr").default(ParamDefault::Str("")),
    ParamSpec::string("host").required(),
    ParamSpec::int("port").default(ParamDefault::Int(502)),
    ParamSpec::int("slave_id").default(ParamDefault::Int(0)),
    ParamSpec::one_of("endianity", &["little", "big"]).default(ParamDefault::Str("little")),
    ParamSpec::int("retries").default(ParamDefault::Int(3)),
    ParamSpec::float("backoff").default(ParamDefault::Float(0.3)),
    ParamSpec::float("timeout").default(ParamDefault::Float(3.0)),
];

/// 映射行与解析后的寄存器信息
#[derive(Debug, Clone)]
struct Point {
    row: MappingRow,
    register: Register,
    data_type: DataType,
}

impl Point {
    fn parse(row: MappingRow) -> Result<Self, DriverError> {
        let register = Register::parse(&row.address)?;
        let data_type = if register.is_bit() && row.measure_type.is_empty() {
            DataType::U16
        } else {
            DataType::parse(&row.measure_type)?
        };
        Ok(Self {
            row,
            register,
            data_type,
        })
    }
}

pub struct ModbusTcpDriver {
    name: String,
    client_id: String,
    device_id: String,
    host: String,
    port: u16,
    slave_id: u8,
    order: WordOrder,
    retries: u32,
    backoff: Duration,
    timeout: Duration,
    points: Vec<Point>,
    resources: Arc<ResourceRegistry>,
}

impl ModbusTcpDriver {
    fn resource_id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn resolve(&self) -> Result<SocketAddr, DriverError> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| DriverError::Transport(format!("resolve {}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| DriverError::Transport(format!("no address for {}", self.host)))
    }

    /// 连接网桥，失败按 `backoff * 次数` 退避重试。
    async fn connect(&self) -> Result<Context, DriverError> {
        let addr = self.resolve().await?;
        let mut attempt = 0;
        loop {
            let reason = match timeout(self.timeout, tcp::connect(addr)).await {
                Ok(Ok(mut ctx)) => {
                    ctx.set_slave(Slave(self.slave_id));
                    return Ok(ctx);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "connect timed out".to_string(),
            };
            if attempt >= self.retries {
                return Err(DriverError::Transport(format!(
                    "cannot connect to bridge {}: {}",
                    addr, reason
                )));
            }
            attempt += 1;
            sleep(self.backoff * attempt).await;
        }
    }

    async fn read_point(&self, ctx: &mut Context, point: &Point) -> Result<MeasureValue, DriverError> {
        let address = point.register.address;
        let count = point.data_type.register_count();
        let failed = |e: String| {
            DriverError::Transport(format!(
                "error reading bridge {} slave {} register {}: {}",
                self.host, self.slave_id, point.row.address, e
            ))
        };

        if point.register.is_bit() {
            let request = async {
                match point.register.table {
                    Table::Coil => ctx.read_coils(address, 1).await,
                    _ => ctx.read_discrete_inputs(address, 1).await,
                }
            };
            let bits = timeout(self.timeout, request)
                .await
                .map_err(|_| failed("timed out".to_string()))?
                .map_err(|e| failed(e.to_string()))?
                .map_err(|e| failed(format!("exception: {:?}", e)))?;
            let bit = bits.first().copied().ok_or_else(|| failed("empty response".to_string()))?;
            return Ok(MeasureValue::Bool(bit));
        }

        let request = async {
            match point.register.table {
                Table::HoldingRegister => ctx.read_holding_registers(address, count).await,
                _ => ctx.read_input_registers(address, count).await,
            }
        };
        let registers = timeout(self.timeout, request)
            .await
            .map_err(|_| failed("timed out".to_string()))?
            .map_err(|e| failed(e.to_string()))?
            .map_err(|e| failed(format!("exception: {:?}", e)))?;

        debug!(
            target: "wolf.field.modbus",
            host = %self.host,
            slave = self.slave_id,
            register = %point.row.address,
            values = ?registers,
            "modbus_registers_read"
        );

        decode(
            &registers,
            point.data_type,
            self.order,
            point.row.scale,
            point.row.offset,
        )
        .map_err(|e| failed(e.to_string()))
    }

    async fn write_point(
        &self,
        ctx: &mut Context,
        point: &Point,
        value: &MeasureValue,
    ) -> Result<(), DriverError> {
        let address = point.register.address;
        let failed = |e: String| {
            DriverError::Transport(format!(
                "error writing to bridge {} slave {} register {}: {}",
                self.host, self.slave_id, point.row.address, e
            ))
        };
        let words = match point.register.table {
            Table::HoldingRegister => {
                encode(value, point.data_type, self.order).map_err(|e| failed(e.to_string()))?
            }
            Table::Coil => Vec::new(),
            _ => return Err(failed("register is not writable".to_string())),
        };
        let bit = value.as_f64().is_some_and(|v| v != 0.0);
        let request = async {
            match (point.register.table, words.as_slice()) {
                (Table::HoldingRegister, [word]) => ctx.write_single_register(address, *word).await,
                (Table::HoldingRegister, _) => ctx.write_multiple_registers(address, &words).await,
                _ => ctx.write_single_coil(address, bit).await,
            }
        };
        timeout(self.timeout, request)
            .await
            .map_err(|_| failed("timed out".to_string()))?
            .map_err(|e| failed(e.to_string()))?
            .map_err(|e| failed(format!("exception: {:?}", e)))?;
        Ok(())
    }
}

impl FieldDriver for ModbusTcpDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_pollable(&self) -> Option<&dyn Pollable> {
        Some(self)
    }

    fn as_writable(&self) -> Option<&dyn Writable> {
        Some(self)
    }
}

#[async_trait]
impl Pollable for ModbusTcpDriver {
    async fn poll(&self) -> Result<Record, DriverError> {
        let _guard = self.resources.acquire(&self.resource_id()).await;
        let mut ctx = self.connect().await?;
        let mut record = Record::new(&self.client_id, &self.device_id, now_epoch_secs());
        for point in &self.points {
            let value = self.read_point(&mut ctx, point).await?;
            record.measures.insert(point.row.measure_id.clone(), value);
        }
        Ok(record)
    }
}

#[async_trait]
impl Writable for ModbusTcpDriver {
    async fn write(&self, measure_id: &str, value: &MeasureValue) -> Result<bool, DriverError> {
        let point = self
            .points
            .iter()
            .find(|point| point.row.measure_id == measure_id)
            .ok_or_else(|| DriverError::UnknownMeasure(measure_id.to_string()))?;
        if !point.row.rw {
            warn!(
                target: "wolf.field.modbus",
                driver = %self.name,
                measure = measure_id,
                "modbus_write_read_only"
            );
            return Ok(false);
        }

        let _guard = self.resources.acquire(&self.resource_id()).await;
        let mut ctx = self.connect().await?;
        match self.write_point(&mut ctx, point, value).await {
            Ok(()) => {
                debug!(
                    target: "wolf.field.modbus",
                    driver = %self.name,
                    measure = measure_id,
                    value = %value,
                    "modbus_written"
                );
                Ok(true)
            }
            Err(err) => {
                warn!(target: "wolf.field.modbus", driver = %self.name, error = %err, "modbus_write_failed");
                Ok(false)
            }
        }
    }
}

pub struct ModbusTcpFactory;

#[async_trait]
impl FieldDriverFactory for ModbusTcpFactory {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn params(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    async fn build(
        &self,
        section: &Section,
        params: Params,
        ctx: &DriverContext,
    ) -> Result<Arc<dyn FieldDriver>, DriverError> {
        let invalid = |option: &str, reason: &str| {
            ConfigError::Invalid(format!("{}.{}", section.name, option), reason.to_string())
        };
        let device_id = params.require_str("device_id")?.to_string();
        let descr = params.str("descr").unwrap_or_default().to_string();
        let port = u16::try_from(params.int("port").unwrap_or(502))
            .map_err(|_| invalid("port", "must be a TCP port"))?;
        let slave_id = u8::try_from(params.int("slave_id").unwrap_or(0))
            .map_err(|_| invalid("slave_id", "must be 0..=255"))?;
        let retries = u32::try_from(params.int("retries").unwrap_or(3))
            .map_err(|_| invalid("retries", "must not be negative"))?;
        let backoff = Duration::try_from_secs_f64(params.float("backoff").unwrap_or(0.3))
            .map_err(|_| invalid("backoff", "must be a positive number of seconds"))?;
        let timeout = Duration::try_from_secs_f64(params.float("timeout").unwrap_or(3.0))
            .map_err(|_| invalid("timeout", "must be a positive number of seconds"))?;
        let order = match params.str("endianity") {
            Some("big") => WordOrder::Big,
            _ => WordOrder::Little,
        };

        let rows = section.mapping()?;
        let points = rows
            .iter()
            .cloned()
            .map(Point::parse)
            .collect::<Result<Vec<_>, _>>()?;

        ctx.cache
            .store_meta(&device_id, &section.name, &descr, &rows)
            .await?;

        Ok(Arc::new(ModbusTcpDriver {
            name: section.name.clone(),
            client_id: ctx.client_id().to_string(),
            device_id,
            host: params.require_str("host")?.to_string(),
            port,
            slave_id,
            order,
            retries,
            backoff,
            timeout,
            points,
            resources: ctx.resources.clone(),
        }))
    }
}
