//! End-to-end tests for the HTTP server: dispatch, error rendering and both
//! stop modes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ares_core::{http_handler, response, AresError, HttpHandler, REQUEST_ID_HEADER};
use ares_middleware::plugins::Recovery;
use ares_middleware::HttpLink;
use ares_server::{HttpServer, Server, ServerError, ServerResult, ServerState};
use bytes::Bytes;
use http::{header, HeaderMap, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

type Reply = (StatusCode, HeaderMap, Bytes);

async fn start(server: HttpServer) -> (Arc<HttpServer>, SocketAddr, JoinHandle<ServerResult<()>>) {
    let server = Arc::new(server);
    let mut states = server.state_changes();
    let task = tokio::spawn(Arc::clone(&server).serve());
    states
        .wait_for(|state| *state == ServerState::Running)
        .await
        .expect("server state channel closed");
    let addr = server.local_addr().expect("bound address");
    (server, addr, task)
}

async fn send(addr: SocketAddr, req: Request<Full<Bytes>>) -> hyper::Result<Reply> {
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(conn);
    let resp = sender.send_request(req).await?;
    let (parts, body) = resp.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok((parts.status, parts.headers, body))
}

async fn get(addr: SocketAddr, path: &str) -> hyper::Result<Reply> {
    send(addr, request(Method::GET, path)).await
}

fn request(method: Method, path: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(path)
        .header(header::HOST, "localhost")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn slow(entered: Arc<Notify>, delay: Duration) -> HttpHandler {
    http_handler(move |_ctx, _req| {
        let entered = Arc::clone(&entered);
        async move {
            entered.notify_one();
            tokio::time::sleep(delay).await;
            Ok(response::text(StatusCode::OK, "done"))
        }
    })
}

fn error_code(body: &Bytes) -> String {
    let value: serde_json::Value = serde_json::from_slice(body).unwrap();
    value["error"]["code"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_routes_with_params() {
    let server = HttpServer::new("api", "127.0.0.1:0");
    server
        .get(
            "/v1/user/:id",
            http_handler(|ctx, _req| async move {
                let id = ctx.param("id").unwrap_or_default().to_string();
                Ok(response::text(StatusCode::OK, format!("user {id} via {}", ctx.pattern().unwrap_or("-"))))
            }),
        )
        .unwrap();
    server
        .get(
            "/v1/user/list",
            http_handler(|_ctx, _req| async { Ok(response::text(StatusCode::OK, "list")) }),
        )
        .unwrap();
    let (server, addr, _task) = start(server).await;

    let (status, headers, body) = get(addr, "/v1/user/42").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "user 42 via /v1/user/:id");
    assert!(headers.contains_key(REQUEST_ID_HEADER));

    let (_, _, body) = get(addr, "/v1/user/list").await.unwrap();
    assert_eq!(body, "list");

    server.stop().await;
}

#[tokio::test]
async fn test_not_found_and_method_not_allowed() {
    let server = HttpServer::new("api", "127.0.0.1:0");
    server
        .get("/users", http_handler(|_ctx, _req| async { Ok(response::empty(StatusCode::OK)) }))
        .unwrap();
    server
        .put("/users", http_handler(|_ctx, _req| async { Ok(response::empty(StatusCode::OK)) }))
        .unwrap();
    let (server, addr, _task) = start(server).await;

    let (status, _, body) = get(addr, "/nope").await.unwrap();
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");

    let (status, headers, body) = send(addr, request(Method::DELETE, "/users")).await.unwrap();
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers[header::ALLOW], "GET, PUT");
    assert_eq!(error_code(&body), "METHOD_NOT_ALLOWED");

    server.stop().await;
}

fn counting_link(seen: &Arc<AtomicUsize>) -> HttpLink {
    let seen = Arc::clone(seen);
    Arc::new(move |next: HttpHandler| -> HttpHandler {
        let seen = Arc::clone(&seen);
        http_handler(move |ctx, req| {
            seen.fetch_add(1, Ordering::SeqCst);
            let next = Arc::clone(&next);
            async move { next(ctx, req).await }
        })
    })
}

#[tokio::test]
async fn test_unmatched_requests_pass_server_links() {
    let seen = Arc::new(AtomicUsize::new(0));
    let server = HttpServer::new("api", "127.0.0.1:0");
    server.use_link(counting_link(&seen)).unwrap();
    server
        .get("/users", http_handler(|_ctx, _req| async { Ok(response::empty(StatusCode::OK)) }))
        .unwrap();
    let (server, addr, _task) = start(server).await;

    let (status, headers, _) = send(addr, request(Method::POST, "/users")).await.unwrap();
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers[header::ALLOW], "GET");
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let (status, _, _) = get(addr, "/nope").await.unwrap();
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    get(addr, "/users").await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 3);

    server.stop().await;
}

#[tokio::test]
async fn test_handler_errors_render_envelope_with_request_id() {
    let server = HttpServer::new("api", "127.0.0.1:0");
    server
        .post(
            "/orders",
            http_handler(|_ctx, _req| async { Err(AresError::conflict("order already exists")) }),
        )
        .unwrap();
    let (server, addr, _task) = start(server).await;

    let id = "01890a5d-ac96-774b-bcce-b302099a8057";
    let mut req = request(Method::POST, "/orders");
    req.headers_mut().insert(REQUEST_ID_HEADER, id.parse().unwrap());
    let (status, headers, body) = send(addr, req).await.unwrap();

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(headers[REQUEST_ID_HEADER], id);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"]["request_id"], id);
    assert_eq!(value["error"]["message"], "order already exists");

    server.stop().await;
}

#[tokio::test]
async fn test_server_links_wrap_later_routes() {
    let server = HttpServer::new("api", "127.0.0.1:0");
    server.use_plugin(&Recovery::new()).unwrap();
    server
        .get(
            "/boom",
            http_handler(|_ctx, _req| async {
                if true {
                    panic!("handler exploded");
                }
                Ok(response::empty(StatusCode::OK))
            }),
        )
        .unwrap();
    let (server, addr, _task) = start(server).await;

    let (status, _, body) = get(addr, "/boom").await.unwrap();
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&body), "INTERNAL_ERROR");

    // The connection task survived the panic
    let (status, _, _) = get(addr, "/missing").await.unwrap();
    assert_eq!(status, StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_graceful_stop_waits_for_in_flight_request() {
    let entered = Arc::new(Notify::new());
    let server = HttpServer::new("api", "127.0.0.1:0");
    server
        .get("/slow", slow(Arc::clone(&entered), Duration::from_millis(200)))
        .unwrap();
    let (server, addr, task) = start(server).await;

    let in_flight = tokio::spawn(async move { get(addr, "/slow").await });
    entered.notified().await;

    server.graceful_stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.active_connections(), 0);

    let (status, _, body) = in_flight.await.unwrap().unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "done");

    task.await.unwrap().unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_graceful_stop_drains_every_connection() {
    let (entered_tx, mut entered) = tokio::sync::mpsc::unbounded_channel::<Duration>();
    let server = HttpServer::new("api", "127.0.0.1:0");
    server
        .get(
            "/sleep/:ms",
            http_handler(move |ctx, _req| {
                let entered = entered_tx.clone();
                let delay = Duration::from_millis(ctx.param("ms").and_then(|ms| ms.parse().ok()).unwrap_or(0));
                async move {
                    let _ = entered.send(delay);
                    tokio::time::sleep(delay).await;
                    Ok(response::text(StatusCode::OK, "done"))
                }
            }),
        )
        .unwrap();
    let (server, _addr, task) = start(server).await;

    let addr = server.local_addr().unwrap();
    let in_flight: Vec<_> = [50, 100, 250]
        .into_iter()
        .map(|ms| tokio::spawn(async move { get(addr, &format!("/sleep/{ms}")).await }))
        .collect();
    for _ in 0..3 {
        entered.recv().await.unwrap();
    }
    assert_eq!(server.active_connections(), 3);

    let started = tokio::time::Instant::now();
    server.graceful_stop().await;
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(server.active_connections(), 0);

    for request in in_flight {
        let (status, _, body) = request.await.unwrap().unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "done");
    }
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_graceful_stop_with_drain_timeout_closes_stragglers() {
    let entered = Arc::new(Notify::new());
    let server = HttpServer::builder()
        .name("api")
        .addr("127.0.0.1:0")
        .drain_timeout(Duration::from_millis(50))
        .build();
    server
        .get("/stuck", slow(Arc::clone(&entered), Duration::from_secs(30)))
        .unwrap();
    let (server, addr, _task) = start(server).await;

    let in_flight = tokio::spawn(async move { get(addr, "/stuck").await });
    entered.notified().await;

    tokio::time::timeout(Duration::from_secs(5), server.graceful_stop())
        .await
        .expect("drain should be bounded");
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(in_flight.await.unwrap().is_err());
}

#[tokio::test]
async fn test_stop_closes_connections_immediately() {
    let entered = Arc::new(Notify::new());
    let server = HttpServer::new("api", "127.0.0.1:0");
    server
        .get("/slow", slow(Arc::clone(&entered), Duration::from_secs(30)))
        .unwrap();
    let (server, addr, task) = start(server).await;

    let in_flight = tokio::spawn(async move { get(addr, "/slow").await });
    entered.notified().await;
    assert_eq!(server.active_connections(), 1);

    server.stop().await;
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.active_connections(), 0);
    assert!(in_flight.await.unwrap().is_err());
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_during_drain_short_circuits() {
    let entered = Arc::new(Notify::new());
    let server = HttpServer::new("api", "127.0.0.1:0");
    server
        .get("/slow", slow(Arc::clone(&entered), Duration::from_secs(30)))
        .unwrap();
    let (server, addr, _task) = start(server).await;

    let _in_flight = tokio::spawn(async move { get(addr, "/slow").await });
    entered.notified().await;

    let draining = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.graceful_stop().await }
    });
    let mut states = server.state_changes();
    states
        .wait_for(|state| *state == ServerState::Draining)
        .await
        .unwrap();

    server.stop().await;
    tokio::time::timeout(Duration::from_secs(5), draining)
        .await
        .expect("drain should end once stopped")
        .unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn test_bind_conflict_fails_start() {
    let first = HttpServer::new("first", "127.0.0.1:0");
    let (first, addr, _task) = start(first).await;

    let second = Arc::new(HttpServer::new("second", addr.to_string()));
    let err = Arc::clone(&second).serve().await.unwrap_err();
    assert!(matches!(err, ServerError::Bind { .. }));
    assert_eq!(second.state(), ServerState::Stopped);

    let again = Arc::clone(&second).serve().await.unwrap_err();
    assert!(matches!(again, ServerError::AlreadyStarted(_)));

    first.stop().await;
}

#[tokio::test]
async fn test_adopted_listener() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::builder().name("adopted").listener(listener).build();
    assert_eq!(server.addr(), addr.to_string());
    server
        .get("/", http_handler(|_ctx, _req| async { Ok(response::text(StatusCode::OK, "root")) }))
        .unwrap();
    let (server, bound, _task) = start(server).await;
    assert_eq!(bound, addr);

    let (_, _, body) = get(addr, "/").await.unwrap();
    assert_eq!(body, "root");
    server.graceful_stop().await;
}
