//! End-to-end scenarios against a scripted loopback HTTP server.
//!
//! Each test stands up a tiny HTTP/1.1 server with canned responses, runs
//! the controller against it, and inspects the files left on disk (plus the
//! requests the server saw).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use quarry_core::config::Config;
use quarry_engine::Controller;
use quarry_net::cookies::CookieJar;

const SHA256_HELLOWORLD: &str = "936a185caaa266bb9cbe981e9e05cb78cd732b0b3280eb944412bb6f8f8f07af";
const SHA256_HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
const SHA256_WORLD: &str = "486ea46224d1bb4fb680f34f7c9ad96a8f24ec88be73ea8e5a6c65260e9cb8a7";

// ============================================================================
// Scripted server
// ============================================================================

/// One request as the server saw it: path plus lower-cased headers.
#[derive(Clone, Debug)]
struct SeenRequest {
    path: String,
    headers: HashMap<String, String>,
}

type Responder = Arc<dyn Fn(&SeenRequest) -> Vec<u8> + Send + Sync>;

struct TestServer {
    addr: SocketAddr,
    hits: Arc<Mutex<Vec<SeenRequest>>>,
}

impl TestServer {
    async fn start(routes: HashMap<String, Responder>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits: Arc<Mutex<Vec<SeenRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);

        let hits_task = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let routes = Arc::clone(&routes);
                let hits = Arc::clone(&hits_task);
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut reader = BufReader::new(read_half);
                    loop {
                        let Some(request) = read_request(&mut reader).await else {
                            break;
                        };
                        hits.lock().unwrap().push(request.clone());
                        let reply = routes.get(&request.path).map_or_else(
                            || response(404, "Not Found", &[], b""),
                            |responder| responder(&request),
                        );
                        if write_half.write_all(&reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Self { addr, hits }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn requests_for(&self, path: &str) -> Vec<SeenRequest> {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

async fn read_request(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
) -> Option<SeenRequest> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let path = line.split_whitespace().nth(1)?.to_string();

    let mut headers = HashMap::new();
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await.ok()? == 0 {
            return None;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    Some(SeenRequest { path, headers })
}

fn response(status: u16, reason: &str, headers: &[(&str, String)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\n", body.len());
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

fn ok_with_type(content_type: &str, body: &[u8]) -> Responder {
    let content_type = content_type.to_string();
    let body = body.to_vec();
    Arc::new(move |_| {
        response(
            200,
            "OK",
            &[("Content-Type", content_type.clone())],
            &body,
        )
    })
}

/// Serve a byte slice honoring `Range: bytes=a-b` with 206.
fn ranged(content: &'static [u8]) -> Responder {
    Arc::new(move |request| {
        let range = request.headers.get("range").cloned().unwrap_or_default();
        if let Some(spec) = range.strip_prefix("bytes=") {
            if let Some((start, end)) = spec.split_once('-') {
                let start: usize = start.parse().unwrap_or(0);
                let end: usize = end
                    .parse()
                    .map_or(content.len(), |e: usize| (e + 1).min(content.len()));
                let slice = &content[start.min(content.len())..end];
                return response(
                    206,
                    "Partial Content",
                    &[(
                        "Content-Range",
                        format!("bytes {start}-{}/{}", end.saturating_sub(1), content.len()),
                    )],
                    slice,
                );
            }
        }
        response(200, "OK", &[], content)
    })
}

async fn run_quarry(cfg: Config, roots: &[String]) -> Controller {
    let cfg = Arc::new(cfg);
    let mut controller = Controller::new(
        Arc::clone(&cfg),
        Arc::new(CookieJar::new()),
        CancellationToken::new(),
    )
    .unwrap();
    for root in roots {
        controller.add_root_uri(root).unwrap();
    }
    controller.run().await.unwrap();
    controller
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn simple_get_writes_one_file() {
    let mut routes: HashMap<String, Responder> = HashMap::new();
    routes.insert("/hello".to_string(), ok_with_type("text/plain", b"hello"));
    let server = TestServer::start(routes).await;

    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        num_threads: 2,
        directory_prefix: Some(dir.path().to_path_buf()),
        ..Config::default()
    };

    let controller = run_quarry(cfg, &[server.url("/hello")]).await;

    assert_eq!(
        std::fs::read(dir.path().join("hello")).unwrap(),
        b"hello"
    );
    assert_eq!(controller.blacklist().len(), 1);
    assert_eq!(server.requests_for("/hello").len(), 1);
}

#[tokio::test]
async fn redirect_chain_lands_on_final_body() {
    let mut routes: HashMap<String, Responder> = HashMap::new();
    routes.insert(
        "/a".to_string(),
        Arc::new(|_| {
            response(
                301,
                "Moved Permanently",
                &[("Location", "/b".to_string())],
                b"",
            )
        }),
    );
    routes.insert(
        "/b".to_string(),
        Arc::new(|_| response(302, "Found", &[("Location", "/c".to_string())], b"")),
    );
    routes.insert("/c".to_string(), ok_with_type("text/plain", b"x"));
    let server = TestServer::start(routes).await;

    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        num_threads: 2,
        directory_prefix: Some(dir.path().to_path_buf()),
        ..Config::default()
    };

    let controller = run_quarry(cfg, &[server.url("/a")]).await;

    assert_eq!(std::fs::read(dir.path().join("c")).unwrap(), b"x");
    // three URIs admitted across the chain
    assert_eq!(controller.blacklist().len(), 3);
    assert!(!dir.path().join("a").exists());
    assert!(!dir.path().join("b").exists());
}

#[tokio::test]
async fn recursive_fetch_follows_extracted_links() {
    let html = br#"<html><body><a href="/b">x</a><img src="c.png"></body></html>"#;
    let mut routes: HashMap<String, Responder> = HashMap::new();
    routes.insert("/".to_string(), ok_with_type("text/html", html));
    routes.insert("/b".to_string(), ok_with_type("text/plain", b"B"));
    routes.insert("/c.png".to_string(), ok_with_type("image/png", b"PNG"));
    let server = TestServer::start(routes).await;

    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        num_threads: 2,
        recursive: true,
        directory_prefix: Some(dir.path().to_path_buf()),
        ..Config::default()
    };

    let controller = run_quarry(cfg, &[server.url("/")]).await;

    let host_dir = dir.path().join("127.0.0.1");
    assert_eq!(std::fs::read(host_dir.join("index.html")).unwrap(), html);
    assert_eq!(std::fs::read(host_dir.join("b")).unwrap(), b"B");
    assert_eq!(std::fs::read(host_dir.join("c.png")).unwrap(), b"PNG");
    assert_eq!(controller.blacklist().len(), 3);
}

#[tokio::test]
async fn metalink_http_chases_description_only() {
    let mut routes: HashMap<String, Responder> = HashMap::new();
    let meta_uri = Arc::new(Mutex::new(String::new()));

    let meta_for_route = Arc::clone(&meta_uri);
    routes.insert(
        "/file".to_string(),
        Arc::new(move |_| {
            let meta = meta_for_route.lock().unwrap().clone();
            response(
                302,
                "Found",
                &[
                    (
                        "Link",
                        format!("<{meta}>; rel=describedby; type=\"application/metalink4+xml\""),
                    ),
                    (
                        "Link",
                        format!("<{meta}.dup>; rel=duplicate; pri=1; geo=de"),
                    ),
                    (
                        "Digest",
                        "SHA-256=5QgXpvMLXWCi1GpNZI9mtzdhFFdtz6tuNwCKIYbbZfU=".to_string(),
                    ),
                    ("Location", "/mirror/file".to_string()),
                ],
                b"ignored",
            )
        }),
    );
    let server = TestServer::start(routes).await;
    *meta_uri.lock().unwrap() = server.url("/file.meta4");

    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        num_threads: 2,
        directory_prefix: Some(dir.path().to_path_buf()),
        ..Config::default()
    };

    let controller = run_quarry(cfg, &[server.url("/file")]).await;

    // the .meta4 was chased (and 404ed); the Location was not followed and
    // the 302 body was discarded
    assert_eq!(server.requests_for("/file.meta4").len(), 1);
    assert!(server.requests_for("/mirror/file").is_empty());
    assert!(server.requests_for("/file.meta4.dup").is_empty());
    assert_eq!(controller.blacklist().len(), 2);
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn metalink_xml_pieces_download_and_verify() {
    let mut routes: HashMap<String, Responder> = HashMap::new();
    let xml_holder: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));

    let xml_for_route = Arc::clone(&xml_holder);
    routes.insert(
        "/rel.meta4".to_string(),
        Arc::new(move |_| {
            let xml = xml_for_route.lock().unwrap().clone();
            response(
                200,
                "OK",
                &[("Content-Type", "application/metalink4+xml".to_string())],
                xml.as_bytes(),
            )
        }),
    );
    for mirror in ["/m1/rel.bin", "/m2/rel.bin", "/m3/rel.bin"] {
        routes.insert(mirror.to_string(), ranged(b"helloworld"));
    }
    let server = TestServer::start(routes).await;

    *xml_holder.lock().unwrap() = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<metalink xmlns="urn:ietf:params:xml:ns:metalink">
  <file name="rel.bin">
    <size>10</size>
    <hash type="sha-256">{SHA256_HELLOWORLD}</hash>
    <pieces length="5" type="sha-256">
      <hash>{SHA256_HELLO}</hash>
      <hash>{SHA256_WORLD}</hash>
    </pieces>
    <url priority="1">{m1}</url>
    <url priority="2">{m2}</url>
    <url priority="3">{m3}</url>
  </file>
</metalink>"#,
        m1 = server.url("/m1/rel.bin"),
        m2 = server.url("/m2/rel.bin"),
        m3 = server.url("/m3/rel.bin"),
    );

    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        num_threads: 2,
        directory_prefix: Some(dir.path().to_path_buf()),
        ..Config::default()
    };

    run_quarry(cfg, &[server.url("/rel.meta4")]).await;

    assert_eq!(
        std::fs::read(dir.path().join("rel.bin")).unwrap(),
        b"helloworld"
    );
    // both pieces were fetched with ranges
    let ranged_hits: usize = ["/m1/rel.bin", "/m2/rel.bin", "/m3/rel.bin"]
        .iter()
        .map(|p| server.requests_for(p).len())
        .sum();
    assert_eq!(ranged_hits, 2);
}

#[tokio::test]
async fn single_mirror_single_piece_behaves_like_plain_get() {
    let mut routes: HashMap<String, Responder> = HashMap::new();
    let xml_holder: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));

    let xml_for_route = Arc::clone(&xml_holder);
    routes.insert(
        "/one.meta4".to_string(),
        Arc::new(move |_| {
            let xml = xml_for_route.lock().unwrap().clone();
            response(
                200,
                "OK",
                &[("Content-Type", "application/metalink4+xml".to_string())],
                xml.as_bytes(),
            )
        }),
    );
    routes.insert("/only/one.bin".to_string(), ranged(b"helloworld"));
    let server = TestServer::start(routes).await;

    *xml_holder.lock().unwrap() = format!(
        r#"<metalink xmlns="urn:ietf:params:xml:ns:metalink">
  <file name="one.bin">
    <size>10</size>
    <hash type="sha-256">{SHA256_HELLOWORLD}</hash>
    <pieces length="10" type="sha-256"><hash>{SHA256_HELLOWORLD}</hash></pieces>
    <url>{m}</url>
  </file>
</metalink>"#,
        m = server.url("/only/one.bin"),
    );

    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        num_threads: 2,
        directory_prefix: Some(dir.path().to_path_buf()),
        ..Config::default()
    };

    run_quarry(cfg, &[server.url("/one.meta4")]).await;

    assert_eq!(
        std::fs::read(dir.path().join("one.bin")).unwrap(),
        b"helloworld"
    );
}

#[tokio::test]
async fn revalidated_document_feeds_links_from_disk() {
    let mut routes: HashMap<String, Responder> = HashMap::new();
    routes.insert(
        "/page.html".to_string(),
        Arc::new(|_| response(304, "Not Modified", &[], b"")),
    );
    routes.insert("/fresh".to_string(), ok_with_type("text/plain", b"F"));
    let server = TestServer::start(routes).await;

    let dir = tempfile::tempdir().unwrap();
    let host_dir = dir.path().join("127.0.0.1");
    std::fs::create_dir_all(&host_dir).unwrap();
    let cached = br#"<html><a href="/fresh">f</a></html>"#;
    std::fs::write(host_dir.join("page.html"), cached).unwrap();

    let cfg = Config {
        num_threads: 2,
        recursive: true,
        timestamping: true,
        directory_prefix: Some(dir.path().to_path_buf()),
        ..Config::default()
    };

    run_quarry(cfg, &[server.url("/page.html")]).await;

    // the conditional request carried If-Modified-Since
    let seen = server.requests_for("/page.html");
    assert_eq!(seen.len(), 1);
    assert!(seen[0].headers.contains_key("if-modified-since"));

    // no rewrite of the cached page, but its links were fetched
    assert_eq!(std::fs::read(host_dir.join("page.html")).unwrap(), cached);
    assert_eq!(std::fs::read(host_dir.join("fresh")).unwrap(), b"F");
}

#[tokio::test]
async fn continue_resumes_at_local_size() {
    let mut routes: HashMap<String, Responder> = HashMap::new();
    routes.insert("/big".to_string(), ranged(b"helloworld"));
    let server = TestServer::start(routes).await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("big"), b"hello").unwrap();

    let cfg = Config {
        num_threads: 1,
        continue_download: true,
        directory_prefix: Some(dir.path().to_path_buf()),
        ..Config::default()
    };

    run_quarry(cfg, &[server.url("/big")]).await;

    assert_eq!(
        std::fs::read(dir.path().join("big")).unwrap(),
        b"helloworld"
    );
    let seen = server.requests_for("/big");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].headers.get("range").map(String::as_str), Some("bytes=5-"));
}

#[tokio::test]
async fn spider_mode_writes_nothing() {
    let mut routes: HashMap<String, Responder> = HashMap::new();
    routes.insert("/hello".to_string(), ok_with_type("text/plain", b"hello"));
    let server = TestServer::start(routes).await;

    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        num_threads: 1,
        spider: true,
        directory_prefix: Some(dir.path().to_path_buf()),
        ..Config::default()
    };

    run_quarry(cfg, &[server.url("/hello")]).await;

    assert_eq!(server.requests_for("/hello").len(), 1);
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}
