//! Wolf 网关进程：缓存、驱动、调度器、写回队列与 HTTP 接口的装配。
//!
//! 退出码：0 正常退出（SIGTERM/SIGINT 或自更新），1 配置错误，
//! 2 缓存后端不可达，3 缓存后端协议/配置错误。

mod handlers;
mod lifecycle;
mod response;
mod routes;

use lifecycle::{Gateway, GatewayError, bundled_catalog};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use wolf_cache::{FaultReporter, MeasurementCache, RedisCache, fault_channel};
use wolf_config::AppConfig;
use wolf_driver::DriverCatalog;
use wolf_scheduler::{
    DAILY, NoopUpdater, Scheduler, WriteBackSender, watch_updates, write_back_queue,
};
use wolf_telemetry::init_tracing;

const WRITEBACK_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<dyn MeasurementCache>,
    pub writeback: WriteBackSender,
    pub faults: FaultReporter,
}

#[tokio::main]
async fn main() -> ExitCode {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };
    init_tracing(&config.log_level);

    match run(config).await {
        Ok(()) => {
            info!(target: "wolf.lifecycle", "gateway_exited");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(target: "wolf.lifecycle", error = %err, exit_code = err.exit_code(), "gateway_failed");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}

async fn run(config: AppConfig) -> Result<(), GatewayError> {
    let config = Arc::new(config);
    info!(
        target: "wolf.lifecycle",
        client_id = %config.client_id,
        interval_secs = config.interval_secs,
        config_file = %config.config_file,
        "gateway_starting"
    );

    let cache: Arc<dyn MeasurementCache> = Arc::new(
        RedisCache::connect(
            &config.redis_url,
            config.redis_pool_size,
            config.client_id.clone(),
            config.redis_expire_days,
        )
        .await?,
    );
    cache.register_client(&config.client_descr).await?;

    let http = if config.http_enabled {
        let listener = TcpListener::bind(&config.http_addr).await?;
        info!(target: "wolf.http", addr = %config.http_addr, "http_listening");
        Some(listener)
    } else {
        None
    };
    serve(cache, config, bundled_catalog(), http).await
}

/// 装配驱动、调度器、写回消费者与 HTTP 接口，运行到停机信号、自更新或致命缓存故障。
async fn serve(
    cache: Arc<dyn MeasurementCache>,
    config: Arc<AppConfig>,
    catalog: DriverCatalog,
    http: Option<TcpListener>,
) -> Result<(), GatewayError> {
    let (faults, mut fault_rx) = fault_channel();
    let gateway = Gateway::new(cache.clone(), config.clone(), catalog).with_faults(faults.clone());
    gateway.reload().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Scheduler::new(
        cache.clone(),
        gateway.drivers(),
        config.interval_secs,
        shutdown_rx.clone(),
    );
    let mut scheduler_task = tokio::spawn(async move { scheduler.run().await });

    let (writeback, worker) = write_back_queue(cache.clone(), gateway.drivers(), WRITEBACK_CAPACITY);
    let mut worker_task = tokio::spawn(worker.run(shutdown_rx.clone()));

    let mut updater_task = tokio::spawn(watch_updates(
        Arc::new(NoopUpdater),
        DAILY,
        shutdown_rx.clone(),
    ));

    let http_task = if let Some(listener) = http {
        let state = AppState {
            cache: cache.clone(),
            writeback: writeback.clone(),
            faults: faults.clone(),
        };
        let app = routes::create_api_router()
            .with_state(state)
            .layer(TraceLayer::new_for_http());
        let mut shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let stopped = async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            };
            axum::serve(listener, app)
                .with_graceful_shutdown(stopped)
                .await
        }))
    } else {
        None
    };

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let outcome: Result<(), GatewayError> = loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!(target: "wolf.lifecycle", "reload_requested");
                match gateway.load_sections() {
                    Ok(sections) => {
                        if let Err(err) = gateway.apply(&sections).await {
                            break Err(err);
                        }
                    }
                    Err(err) => {
                        error!(target: "wolf.lifecycle", error = %err, "reload_rejected");
                    }
                }
            }
            Some(err) = fault_rx.recv() => {
                error!(target: "wolf.lifecycle", error = %err, "cache_fault_exiting");
                break Err(err.into());
            }
            _ = terminate.recv() => {
                info!(target: "wolf.lifecycle", signal = "SIGTERM", "shutdown_requested");
                break Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                info!(target: "wolf.lifecycle", signal = "SIGINT", "shutdown_requested");
                break Ok(());
            }
            updated = &mut updater_task => {
                if matches!(updated, Ok(true)) {
                    info!(target: "wolf.lifecycle", "shutdown_after_update");
                }
                break Ok(());
            }
            finished = &mut scheduler_task => {
                break match finished {
                    Ok(result) => result.map_err(GatewayError::from),
                    Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                    Err(_) => Ok(()),
                };
            }
            finished = &mut worker_task => {
                break match finished {
                    Ok(result) => result.map_err(GatewayError::from),
                    Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                    Err(_) => Ok(()),
                };
            }
        }
    };

    let _ = shutdown_tx.send(true);
    drop(writeback);
    if outcome.is_err() {
        return outcome;
    }

    // 等待进行中的周期结束
    if !scheduler_task.is_finished() {
        if let Ok(Err(err)) = scheduler_task.await {
            return Err(err.into());
        }
    }
    if !worker_task.is_finished() {
        let _ = worker_task.await;
    }
    updater_task.abort();
    if let Some(http_task) = http_task {
        let _ = http_task.await;
    }

    gateway.stop().await;
    cache.save().await?;
    info!(target: "wolf.lifecycle", "gateway_stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use wolf_cache::InMemoryCache;

    async fn get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let request = format!("GET {path} HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("request");
        let mut response = String::new();
        stream.read_to_string(&mut response).await.expect("response");
        response
    }

    #[tokio::test]
    async fn unreachable_cache_seen_by_http_ends_the_gateway() {
        let cache = Arc::new(InMemoryCache::new("1"));
        cache.register_client("plant").await.expect("client");
        let mut config = AppConfig::from_env().expect("config");
        config.config_file = "config/does-not-exist.toml".to_string();
        config.interval_secs = 30;
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let gateway = tokio::spawn(serve(
            cache.clone(),
            Arc::new(config),
            bundled_catalog(),
            Some(listener),
        ));

        assert!(get(addr, "/wolf/clients").await.starts_with("HTTP/1.1 200"));
        cache.set_reachable(false);
        assert!(get(addr, "/wolf/clients").await.starts_with("HTTP/1.1 503"));

        let err = tokio::time::timeout(Duration::from_secs(5), gateway)
            .await
            .expect("gateway exited")
            .expect("join")
            .expect_err("fatal");
        assert_eq!(err.exit_code(), 2);
    }
}
