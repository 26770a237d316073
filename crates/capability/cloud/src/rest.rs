//! REST 云端驱动
//!
//! - 记录：`POST <baseurl>/organization/measures`，200/201/409 视为已投递
//! - 元数据：`POST <baseurl>/organization/measures/config`
//!
//! 写请求携带从 `GET <baseurl>/token` 取得的 `X-CSRF-TOKEN`；
//! 收到 403 时刷新一次令牌后重试。

use crate::payload::RecordPayload;
use async_trait::async_trait;
use domain::{MetaFilter, Record};
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use wolf_cache::{Delivery, MeasurementCache};
use wolf_config::schema::ParamDefault;
use wolf_config::{ConfigError, ParamSpec, Params, Section};
use wolf_driver::{CloudDriver, CloudDriverFactory, ConfigPublisher, DriverContext, DriverError};

pub const KIND: &str = "rest";

const CSRF_HEADER: &str = "x-csrf-token";

const PARAMS: &[ParamSpec] = &[
    ParamSpec::string("baseurl").required(),
    ParamSpec::string("username"),
    ParamSpec::string("password"),
    ParamSpec::int("retries").default(ParamDefault::Int(3)),
    ParamSpec::float("backoff").default(ParamDefault::Float(0.3)),
    ParamSpec::int("timeout").default(ParamDefault::Int(30)),
    ParamSpec::boolean("csrf").default(ParamDefault::Bool(true)),
];

/// 状态码是否表示记录已被服务端接收（409 表示重复提交）。
pub fn is_accepted(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::OK | StatusCode::CREATED | StatusCode::CONFLICT
    )
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT
    )
}

pub struct RestSink {
    name: String,
    base_url: String,
    credentials: Option<(String, String)>,
    retries: u32,
    backoff: Duration,
    csrf: bool,
    http: reqwest::Client,
    token: Mutex<Option<String>>,
    cache: Arc<dyn MeasurementCache>,
}

impl RestSink {
    fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_token(&self, token: Option<String>) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    async fn fetch_token(&self) -> bool {
        let url = format!("{}/token", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) => {
                let token = response
                    .headers()
                    .get(CSRF_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                debug!(target: "wolf.cloud.rest", sink = %self.name, url = %url, found = token.is_some(), "rest_token_fetched");
                let found = token.is_some();
                self.set_token(token);
                found
            }
            Err(err) => {
                error!(target: "wolf.cloud.rest", sink = %self.name, url = %url, error = %err, "rest_token_failed");
                false
            }
        }
    }

    /// 发送一次 POST，连接失败和 500/502/504 按退避重试。
    async fn send<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Option<StatusCode> {
        let mut attempt = 0;
        loop {
            let mut request = self.http.post(url).json(body);
            if let Some((username, password)) = &self.credentials {
                request = request.basic_auth(username, Some(password));
            }
            if let Some(token) = self.token() {
                request = request.header(CSRF_HEADER, token);
            }
            let outcome = request.send().await;
            let retry = match &outcome {
                Ok(response) => is_retryable(response.status()),
                Err(err) => err.is_connect() || err.is_timeout(),
            };
            if !retry || attempt >= self.retries {
                return match outcome {
                    Ok(response) => Some(response.status()),
                    Err(err) => {
                        error!(target: "wolf.cloud.rest", sink = %self.name, url = %url, error = %err, "rest_request_failed");
                        self.set_token(None);
                        None
                    }
                };
            }
            attempt += 1;
            tokio::time::sleep(self.backoff * attempt).await;
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Option<StatusCode> {
        if self.csrf && self.token().is_none() && !self.fetch_token().await {
            error!(target: "wolf.cloud.rest", sink = %self.name, base_url = %self.base_url, "rest_token_refused");
            return None;
        }
        let status = self.send(url, body).await?;
        if status != StatusCode::FORBIDDEN {
            return Some(status);
        }
        if self.csrf && self.fetch_token().await {
            let status = self.send(url, body).await?;
            if status != StatusCode::FORBIDDEN {
                return Some(status);
            }
        }
        error!(target: "wolf.cloud.rest", sink = %self.name, url = %url, "rest_post_forbidden");
        Some(status)
    }
}

#[async_trait]
impl Delivery for RestSink {
    async fn deliver(&self, record: &Record) -> bool {
        let url = format!("{}/organization/measures", self.base_url);
        let payload = RecordPayload::from_record(record);
        let Some(status) = self.post(&url, &payload).await else {
            return false;
        };
        info!(
            target: "wolf.cloud.rest",
            sink = %self.name,
            client_id = %record.client_id,
            device_id = %record.device_id,
            at = %payload.at,
            status = status.as_u16(),
            "rest_record_posted"
        );
        is_accepted(status)
    }
}

#[async_trait]
impl ConfigPublisher for RestSink {
    async fn post_config(&self) -> bool {
        let filter = MetaFilter::default().client(self.cache.client_id());
        let entries = match self.cache.load_meta(&filter).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(target: "wolf.cloud.rest", sink = %self.name, error = %err, "rest_config_load_failed");
                return false;
            }
        };
        let url = format!("{}/organization/measures/config", self.base_url);
        match self.post(&url, &entries).await {
            Some(status) => {
                info!(target: "wolf.cloud.rest", sink = %self.name, entries = entries.len(), status = status.as_u16(), "rest_config_posted");
                true
            }
            None => false,
        }
    }
}

impl CloudDriver for RestSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_config_publisher(&self) -> Option<&dyn ConfigPublisher> {
        Some(self)
    }
}

pub struct RestSinkFactory;

#[async_trait]
impl CloudDriverFactory for RestSinkFactory {
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
    ) -> Result<Arc<dyn CloudDriver>, DriverError> {
        let invalid = |option: &str, reason: String| {
            ConfigError::Invalid(format!("{}.{}", section.name, option), reason)
        };
        let base_url = params
            .require_str("baseurl")?
            .trim_end_matches('/')
            .to_string();
        let retries = u32::try_from(params.int("retries").unwrap_or(3))
            .map_err(|_| invalid("retries", "must not be negative".to_string()))?;
        let backoff = Duration::try_from_secs_f64(params.float("backoff").unwrap_or(0.3))
            .map_err(|_| invalid("backoff", "must be a positive number of seconds".to_string()))?;
        let timeout = u64::try_from(params.int("timeout").unwrap_or(30))
            .map_err(|_| invalid("timeout", "must not be negative".to_string()))?;
        let credentials = match (params.str("username"), params.str("password")) {
            (Some(username), Some(password)) => Some((username.to_string(), password.to_string())),
            _ => None,
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| invalid("baseurl", e.to_string()))?;

        info!(target: "wolf.cloud.rest", sink = %section.name, base_url = %base_url, "rest_sink_configured");

        Ok(Arc::new(RestSink {
            name: section.name.clone(),
            base_url,
            credentials,
            retries,
            backoff,
            csrf: params.boolean("csrf").unwrap_or(true),
            http,
            token: Mutex::new(None),
            cache: ctx.cache.clone(),
        }))
    }
}
