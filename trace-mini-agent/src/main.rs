// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use datadog_trace_mini_agent::config::Config;
use datadog_trace_mini_agent::info::{InfoBlob, InfoEndpoint};
use datadog_trace_mini_agent::peer_cred::{self, ContainerIdCache, PeerPid};
use datadog_trace_mini_agent::rate_limiter::RateLimiter;
use datadog_trace_mini_agent::receiver::{handle, ReceiverState};
use datadog_trace_mini_agent::watchdog::Watchdog;
use datadog_trace_mini_agent::{listener, otlp_server};
use datadog_trace_obfuscation::cache::CacheStatsHandle;
use datadog_trace_obfuscation::obfuscate::Obfuscator;
use datadog_trace_obfuscation::obfuscation_config::ObfuscationConfig;
use datadog_trace_protobuf::pb;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_DEADLINE: std::time::Duration = std::time::Duration::from_secs(5);
const OUT_CHANNEL_CAPACITY: usize = 10_000;

const ADVERTISED_ENDPOINTS: &[InfoEndpoint] = &[
    InfoEndpoint { path: "/v0.1/spans", hidden: false },
    InfoEndpoint { path: "/v0.2/traces", hidden: false },
    InfoEndpoint { path: "/v0.3/traces", hidden: false },
    InfoEndpoint { path: "/v0.4/traces", hidden: false },
    InfoEndpoint { path: "/v0.5/traces", hidden: false },
    InfoEndpoint { path: "/v0.7/traces", hidden: false },
    InfoEndpoint { path: "/v0.6/stats", hidden: false },
    InfoEndpoint { path: "/info", hidden: false },
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let obfuscation_config = ObfuscationConfig::new().map_err(|e| anyhow::anyhow!("{e}"))?;
    let obfuscator = Obfuscator::new(obfuscation_config);
    let mut sql_cache_stats = CacheStatsHandle::spawn(
        obfuscator.sql_cache(),
        Duration::from_secs(10),
        |hits, misses| info!(hits, misses, "sql obfuscation cache stats"),
    );
    let rate_limiter = Arc::new(RateLimiter::new(config.target_rate));
    let info_blob = Arc::new(InfoBlob::new(AGENT_VERSION, ADVERTISED_ENDPOINTS));
    let container_id_cache = Arc::new(ContainerIdCache::new());

    let (out_tx, mut out_rx) = mpsc::channel::<pb::TracerPayload>(OUT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(payload) = out_rx.recv().await {
            let chunk_count = payload.chunks.len();
            info!(chunk_count, "forwarding tracer payload downstream");
        }
    });

    let flusher = Arc::new(match &config.dogstatsd_addr {
        Some(addr) => {
            let endpoint = ddcommon::Endpoint::from_slice(addr);
            match dogstatsd_client::new_flusher(endpoint) {
                Ok(flusher) => {
                    info!(addr, "dogstatsd flusher configured");
                    flusher
                }
                Err(e) => {
                    warn!(error = %e, "failed to configure dogstatsd flusher");
                    dogstatsd_client::Flusher::default()
                }
            }
        }
        None => dogstatsd_client::Flusher::default(),
    });

    let shutdown = CancellationToken::new();
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            ctrl_c_shutdown.cancel();
        }
    });

    let rate_limiter_decay = rate_limiter.clone();
    let decay_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = ticker.tick() => rate_limiter_decay.decay_score(),
                _ = decay_shutdown.cancelled() => break,
            }
        }
    });

    let watchdog = Watchdog::new(
        config.max_memory_bytes,
        config.watchdog_interval,
        rate_limiter.clone(),
        flusher.clone(),
    );
    let watchdog_shutdown = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = watchdog.run(|| 0.0) => {},
            _ = watchdog_shutdown.cancelled() => {},
        }
    });

    let state = Arc::new(ReceiverState {
        rate_limiter,
        obfuscator: tokio::sync::Mutex::new(obfuscator),
        out_tx: out_tx.clone(),
        container_id_cache,
        info_blob,
        max_request_bytes: config.max_request_bytes as usize,
        dropped_status_code: config.dropped_status_code,
        agent_version: AGENT_VERSION,
        escape_count: AtomicU64::new(0),
        escape_tasks: tokio::sync::Mutex::new(JoinSet::new()),
    });

    if let Some(otlp_port) = config.otlp_port {
        let addr = SocketAddr::new(config.host, otlp_port);
        let out_tx = out_tx.clone();
        let otlp_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = otlp_server::serve(addr, out_tx, otlp_shutdown.cancelled_owned()).await {
                error!(error = %e, "OTLP server exited with an error");
            }
        });
    }

    if let Some(uds_path) = config.uds_socket_path.clone() {
        let state = state.clone();
        let uds_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_uds(&uds_path, state, uds_shutdown).await {
                error!(error = %e, "unix socket trace receiver exited with an error");
            }
        });
    }

    let addr = SocketAddr::new(config.host, config.port);
    let tcp_listener = TcpListener::bind(addr).await?;
    info!(%addr, "trace receiver listening");
    let measured = listener::MeasuredListener::new(tcp_listener);
    let _stats_flusher = measured.spawn_stats_flusher(|accepted, timed_out, errored| {
        info!(accepted, timed_out, errored, "listener stats");
    });
    let capped = listener::ConnectionCappedListener::new(measured, config.connection_limit);

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = capped.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        let state = state.clone();
                        connections.spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move {
                                    match handle(state, req).await {
                                        Ok(resp) => Ok::<_, Infallible>(resp),
                                        Err(never) => match never {},
                                    }
                                }
                            });
                            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                                .serve_connection(io, service)
                                .await
                            {
                                warn!(%peer_addr, error = %e, "connection error");
                            }
                        });
                    }
                    Err(listener::AcceptError::LeaseExhausted(_)) => {
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    }
                    Err(listener::AcceptError::Io(e)) => {
                        warn!(error = %e, "accept error");
                    }
                }
            }
        }
    }

    shutdown.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
        while connections.join_next().await.is_some() {}
        let mut escapes = state.escape_tasks.lock().await;
        while escapes.join_next().await.is_some() {}
    })
    .await;
    sql_cache_stats.close().await;
    drop(out_tx);
    Ok(())
}

/// Accepts connections on a unix domain socket, mirroring the TCP accept loop above but
/// resolving each peer's pid via `SO_PEERCRED` so `receiver::handle` can look up a container id
/// for tracer clients that can't send a `Datadog-Container-ID` header over UDS.
async fn serve_uds(
    path: &str,
    state: Arc<ReceiverState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let socket_path = std::path::Path::new(path);
    if let Ok(metadata) = std::fs::symlink_metadata(socket_path) {
        if metadata.file_type().is_socket() {
            std::fs::remove_file(socket_path)?;
        } else {
            anyhow::bail!("refusing to remove non-socket file at {}", socket_path.display());
        }
    }
    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o722))?;
    info!(path, "unix socket trace receiver listening");

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let peer_pid = peer_cred::peer_credentials(&stream).ok().map(|c| c.pid);
                        let state = state.clone();
                        connections.spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |mut req| {
                                if let Some(pid) = peer_pid {
                                    req.extensions_mut().insert(PeerPid(pid));
                                }
                                let state = state.clone();
                                async move {
                                    match handle(state, req).await {
                                        Ok(resp) => Ok::<_, Infallible>(resp),
                                        Err(never) => match never {},
                                    }
                                }
                            });
                            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                                .serve_connection(io, service)
                                .await
                            {
                                warn!(error = %e, "unix socket connection error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "unix socket accept error"),
                }
            }
        }
    }
    let _ = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    let _ = std::fs::remove_file(socket_path);
    Ok(())
}
