use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

const COORDINATION_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "TUTORGATE_UPSTREAM_API_KEY",
    "TUTORGATE_UPSTREAM_BASE_URL",
    "UPSTASH_REDIS_REST_URL",
    "UPSTASH_REDIS_REST_TOKEN",
    "KV_REST_API_URL",
    "KV_REST_API_TOKEN",
    "TUTORGATE_REDIS_URL",
    "TUTORGATE_MATERIALS_DB",
];

fn reserve_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("reserve addr");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr.to_string()
}

fn wait_for_http(addr: &str) {
    for _ in 0..80 {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("http server not ready on {addr}");
}

fn spawn_gateway(addr: &str, env: &[(&str, &str)]) -> Child {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_tutorgated"));
    for var in COORDINATION_VARS {
        cmd.env_remove(var);
    }
    cmd.env("TUTORGATE_BIND_ADDR", addr)
        .env("RUST_LOG", "warn")
        .envs(env.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let child = cmd.spawn().expect("spawn tutorgated");
    wait_for_http(addr);
    child
}

fn send_http(addr: &str, method: &str, path: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect http");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).expect("write request");
    stream.flush().expect("flush");
    let mut buf = String::new();
    stream.read_to_string(&mut buf).expect("read response");
    buf
}

fn response_body(response: &str) -> &str {
    response.split("\r\n\r\n").nth(1).unwrap_or("")
}

fn response_header(response: &str) -> String {
    response
        .split("\r\n\r\n")
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn stop(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn http_surface_without_upstream_key() {
    let addr = reserve_addr();
    let child = spawn_gateway(&addr, &[]);

    let health = send_http(&addr, "GET", "/health", "");
    assert!(health.starts_with("HTTP/1.1 200"));
    let body = response_body(&health);
    assert!(body.contains("\"status\":\"ok\""));
    assert!(body.contains("\"coordination\":\"local\""));

    let preflight = send_http(&addr, "OPTIONS", "/api/chat", "");
    assert!(preflight.starts_with("HTTP/1.1 204"));
    let headers = response_header(&preflight);
    assert!(headers.contains("access-control-allow-origin: *"));
    assert!(headers.contains("access-control-allow-methods: post,options"));
    assert!(headers.contains("access-control-allow-headers: content-type, authorization"));

    let wrong_method = send_http(&addr, "GET", "/api/chat", "");
    assert!(wrong_method.starts_with("HTTP/1.1 405"));
    assert!(response_body(&wrong_method).contains("Method not allowed"));

    let no_key = send_http(&addr, "POST", "/api/chat", r#"{"message":"hello"}"#);
    assert!(no_key.starts_with("HTTP/1.1 500"));
    assert!(response_body(&no_key).contains("Upstream API key missing on server"));
    assert!(response_header(&no_key).contains("access-control-allow-origin: *"));

    stop(child);
}

#[test]
fn http_guard_rejections_and_unreachable_upstream() {
    let addr = reserve_addr();
    let dead_upstream = format!("http://{}", reserve_addr());
    let child = spawn_gateway(
        &addr,
        &[
            ("TUTORGATE_UPSTREAM_API_KEY", "sk-test"),
            ("TUTORGATE_UPSTREAM_BASE_URL", dead_upstream.as_str()),
            ("TUTORGATE_UPSTREAM_TIMEOUT_MS", "2000"),
        ],
    );

    let garbage = send_http(&addr, "POST", "/api/chat", "{not json");
    assert!(garbage.starts_with("HTTP/1.1 500"));
    assert!(response_body(&garbage).contains("Invalid request payload"));

    let long = format!(r#"{{"message":"{}"}}"#, "a".repeat(4001));
    let too_long = send_http(&addr, "POST", "/api/chat", &long);
    assert!(too_long.starts_with("HTTP/1.1 400"));
    assert!(response_body(&too_long).contains("Message too long."));

    let processing = send_http(
        &addr,
        "POST",
        "/api/chat",
        r#"{"message":"hi","processingStatus":"Embedding chunks"}"#,
    );
    assert!(processing.starts_with("HTTP/1.1 409"));
    assert!(response_body(&processing).contains("Materials still processing."));

    let unreachable = send_http(&addr, "POST", "/api/chat", r#"{"message":"hi"}"#);
    assert!(unreachable.starts_with("HTTP/1.1 500"));
    assert!(response_body(&unreachable).contains("Proxy failed"));

    // The failed request must not leave its lock behind.
    let again = send_http(&addr, "POST", "/api/chat", r#"{"message":"hi"}"#);
    assert!(again.starts_with("HTTP/1.1 500"));
    assert!(response_body(&again).contains("Proxy failed"));

    stop(child);
}
