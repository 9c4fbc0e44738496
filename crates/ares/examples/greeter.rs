//! A greeter service with an HTTP and a gRPC endpoint.
//!
//! ```text
//! cargo run -p ares --example greeter
//! curl localhost:8080/v1/greet/ares
//! kill -HUP <pid>    # graceful, exit 0
//! kill -TERM <pid>   # immediate, exit 1
//! ```
//!
//! Configuration comes from `greeter.toml` if present, then `.env`, then
//! `ARES__*` variables, e.g. `ARES__SERVERS__GRPC__ADDR=0.0.0.0:9191`.

use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use ares::config::{AresConfig, ConfigLoader, ServerEntry, ServerScheme};
use ares::prelude::*;
use ares::telemetry::init_logging;
use serde::Serialize;

#[derive(Serialize)]
struct Greeting<'a> {
    message: String,
    name: &'a str,
}

fn http_server(entry: &ServerEntry, config: &AresConfig) -> anyhow::Result<HttpServer> {
    let server = HttpServer::new(entry.name.clone(), entry.addr.clone());
    server.use_plugin(&Recovery::new())?;
    server.use_plugin(&AccessLog::new())?;
    if config.rate_limit.enabled {
        let limit = RateLimit::new(config.rate_limit.capacity, config.rate_limit.interval())
            .max_wait(config.rate_limit.max_wait());
        server.use_plugin(&limit)?;
    }

    server.get(
        "/health",
        http_handler(|_ctx, _req| async { Ok(response::text(StatusCode::OK, "ok")) }),
    )?;

    let v1 = server.group("/v1", Vec::new());
    v1.get(
        "/greet/:name",
        http_handler(|ctx, _req| async move {
            let name = ctx.param("name").unwrap_or("stranger");
            if name.len() > 64 {
                return Err(AresError::validation("name too long"));
            }
            let body = Greeting {
                message: format!("hello {name}"),
                name,
            };
            Ok(response::json(StatusCode::OK, &body))
        }),
    )?;
    Ok(server)
}

fn rpc_server(entry: &ServerEntry) -> anyhow::Result<RpcServer> {
    let server = RpcServer::new(entry.name.clone(), entry.addr.clone());
    server.use_plugin(&Recovery::new())?;
    server.use_plugin(&AccessLog::new())?;

    server.register_unary(
        "greeter.Greeter",
        "SayHello",
        unary_handler(|_ctx, msg| async move {
            let name = String::from_utf8(msg.to_vec())
                .map_err(|_| Status::invalid_argument("name must be utf-8"))?;
            Ok(format!("hello {name}").into())
        }),
    )?;

    server.register_stream(
        "greeter.Greeter",
        "Chat",
        stream_handler(|_ctx, mut stream| async move {
            while let Some(msg) = stream.recv().await {
                let msg = msg?;
                let mut reply = b"echo:".to_vec();
                reply.extend_from_slice(&msg);
                stream.send(reply).await?;
            }
            Ok(())
        }),
    )?;
    Ok(server)
}

async fn run() -> anyhow::Result<ExitCode> {
    let config = ConfigLoader::new()
        .with_development()
        .with_optional_file("greeter.toml")?
        .with_dotenv()?
        .with_env_prefix("ARES")
        .load()
        .context("loading configuration")?;

    init_logging(&config.logging.to_log_config(&config.app)).context("initializing logging")?;

    let mut app = App::builder().config(&config.app).build();
    for entry in &config.servers {
        let server: Arc<dyn Server> = match entry.scheme {
            ServerScheme::Http => Arc::new(http_server(entry, &config)?),
            ServerScheme::Grpc => Arc::new(rpc_server(entry)?),
        };
        app.serve(server)?;
    }

    let served = Arc::new(AtomicU64::new(0));
    let heartbeat = {
        let served = Arc::clone(&served);
        Singleton::new("heartbeat", Duration::from_secs(30), move || {
            let served = Arc::clone(&served);
            async move {
                let beats = served.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::info!(beats, "heartbeat");
            }
        })
    };
    app.add_worker("heartbeat", Arc::new(heartbeat));
    app.add_worker(
        "report",
        Arc::new(CronWorker::new("report", "0 */5 * * * *", || async {
            tracing::info!("five minute report");
        })?),
    );

    app.defer(|| tracing::info!("greeter cleaned up"));

    let exit = app.run().await?;
    Ok(exit.into())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("greeter: {err:#}");
            ExitCode::FAILURE
        }
    }
}
