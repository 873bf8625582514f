//! Compiler server scenarios: single writer, request coalescing, watch
//! mode, error reporting, and the deterministic endpoint.

use std::time::Duration;

use trellis_build::EventPayload;
use trellis_conformance::{CountingToolchain, FixtureWorkspace, FAIL_MARKER};
use trellis_config::{BuildSettings, EnvOverrides};
use trellis_context::{compiler_port, resolve_context, PathResolver};
use trellis_server::client::ResponseStream;
use trellis_server::{
    acquire_or_connect, serve, Client, Endpoint, Request, Response, ServerHandle, ServerInfo,
};

fn workspace() -> FixtureWorkspace {
    let mut ws = FixtureWorkspace::single("app");
    for i in 0..6 {
        ws = ws.with_file(&format!("src/m{i}.ts"), &format!("export const m{i} = {i};\n"));
    }
    ws
}

#[tokio::test]
async fn one_owner_per_workspace() {
    let ws = workspace();
    let toolchain = CountingToolchain::new("v1");
    let session = ws.session(&toolchain);
    let url = session.context().build.compiler_url.clone();

    let Endpoint::Owner(listener) = acquire_or_connect(&url).await.unwrap() else {
        panic!("first caller should own the workspace");
    };
    let server = serve(listener, session).await.unwrap();

    // Every later caller is routed to the running server.
    let mut clients = Vec::new();
    for _ in 0..3 {
        match acquire_or_connect(&url).await.unwrap() {
            Endpoint::Client(client) => clients.push(client),
            Endpoint::Owner(_) => panic!("second owner for {url}"),
        }
    }

    let mut tasks = Vec::new();
    for client in clients {
        tasks.push(tokio::spawn(async move { client.request(&Request::Build).await }));
    }
    for task in tasks {
        match task.await.unwrap().unwrap() {
            Response::Build { outcome } => assert!(outcome.is_success()),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    // However the requests were grouped, each file compiled exactly once.
    assert_eq!(toolchain.count(), 6);
    let mut compiled = toolchain.compiled();
    compiled.sort();
    compiled.dedup();
    assert_eq!(compiled.len(), 6);

    server.shutdown().await.unwrap();
}

async fn start(ws: &FixtureWorkspace, toolchain: &CountingToolchain) -> (ServerHandle, Client) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = serve(listener, ws.session(toolchain)).await.unwrap();
    let client = Client::for_addr(server.local_addr());
    (server, client)
}

async fn info(client: &Client) -> ServerInfo {
    match client.request(&Request::Info).await.unwrap() {
        Response::Info { info } => info,
        other => panic!("unexpected reply {other:?}"),
    }
}

async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Waits for the next `wanted` state event, returning how many `building`
/// events went by on the way (including `wanted` itself).
async fn next_state(stream: &mut ResponseStream, wanted: &str) -> usize {
    let mut passes = 0;
    loop {
        let next = tokio::time::timeout(Duration::from_secs(10), stream.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {wanted}"))
            .unwrap();
        let Some(Response::Event { record }) = next else {
            continue;
        };
        if let EventPayload::State { state } = record.payload {
            if state == "building" {
                passes += 1;
            }
            if state == wanted {
                return passes;
            }
        }
    }
}

#[tokio::test]
async fn build_requested_mid_pass_shares_that_pass() {
    let ws = workspace();
    let toolchain = CountingToolchain::new("v1").with_delay(Duration::from_millis(150));
    let (server, client) = start(&ws, &toolchain).await;

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.request(&Request::Build).await.unwrap() })
    };
    wait_until("the first compile", || toolchain.count() >= 1).await;
    let second = client.request(&Request::Build).await.unwrap();
    let first = first.await.unwrap();

    assert_eq!(first, second);
    assert_eq!(toolchain.count(), 6);
    assert_eq!(info(&client).await.builds, 1);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn saves_during_a_pass_cause_one_follow_up_pass() {
    let ws = workspace();
    let toolchain = CountingToolchain::new("v1").with_delay(Duration::from_millis(150));
    let (server, client) = start(&ws, &toolchain).await;

    let mut stream = client.send(&Request::Watch).await.unwrap();
    assert_eq!(stream.next().await.unwrap(), Some(Response::Ack));
    assert_eq!(next_state(&mut stream, "building").await, 1);
    wait_until("the first compile", || toolchain.count() >= 1).await;

    // Several saves while the initial pass is still compiling.
    for i in 0..3 {
        ws.write(&format!("src/m{i}.ts"), &format!("export const m{i} = {};\n", i + 10));
    }
    assert_eq!(next_state(&mut stream, "watching").await, 0);
    assert_eq!(next_state(&mut stream, "watching").await, 1);

    // Nothing else is pending.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(info(&client).await.builds, 2);
    let out = ws.path(".trellis_output/node_modules/app/src/m1.js");
    assert!(std::fs::read_to_string(out).unwrap().contains("m1 = 11"));

    drop(stream);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn info_reports_a_failed_build_until_it_is_fixed() {
    let ws = workspace().with_file("src/bad.ts", &format!("{FAIL_MARKER}\n"));
    let toolchain = CountingToolchain::new("v1");
    let (server, client) = start(&ws, &toolchain).await;

    let Response::Build { outcome } = client.request(&Request::Build).await.unwrap() else {
        panic!("expected a build outcome");
    };
    assert!(!outcome.is_success());
    let last_error = info(&client).await.last_error.expect("failed build is reported");
    assert!(last_error.contains("bad.ts"));

    ws.write("src/bad.ts", "export const fixed = true;\n");
    let Response::Build { outcome } = client.request(&Request::Build).await.unwrap() else {
        panic!("expected a build outcome");
    };
    assert!(outcome.is_success());
    assert_eq!(info(&client).await.last_error, None);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn stopped_server_frees_the_endpoint() {
    let ws = workspace();
    let toolchain = CountingToolchain::new("v1");
    let session = ws.session(&toolchain);
    let url = session.context().build.compiler_url.clone();

    let Endpoint::Owner(listener) = acquire_or_connect(&url).await.unwrap() else {
        panic!("first caller should own the workspace");
    };
    let server = serve(listener, session).await.unwrap();
    let client = trellis_server::Client::for_addr(server.local_addr());
    assert_eq!(client.request(&Request::Stop).await.unwrap(), Response::Ack);
    server.wait().await.unwrap();

    // The accept loop notices the coordinator is gone and drops the
    // listener; retry briefly until the port is free again.
    let mut owner = None;
    for _ in 0..50 {
        if let Ok(Endpoint::Owner(listener)) = acquire_or_connect(&url).await {
            owner = Some(listener);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(owner.is_some());
}

#[test]
fn endpoint_is_a_function_of_the_workspace_path() {
    let ws = FixtureWorkspace::mono("shop", &[("app", ""), ("core", "")])
        .with_file("modules/app/src/a.ts", "export {};\n")
        .with_file("modules/core/src/c.ts", "export {};\n");
    let settings = BuildSettings::default();
    let env = EnvOverrides::default();

    let urls: Vec<String> = [".", "modules/app", "modules/core/src"]
        .iter()
        .map(|folder| {
            let folder = ws.path(folder);
            resolve_context(&PathResolver::new(), Some(folder.as_path()), &env, &settings)
                .unwrap()
                .build
                .compiler_url
        })
        .collect();
    assert!(urls.iter().all(|u| *u == urls[0]));

    let port = compiler_port(ws.root());
    assert_eq!(urls[0], format!("http://localhost:{port}"));
    assert!((20000..29000).contains(&port));
    assert_eq!(compiler_port(ws.root()), port);
}
