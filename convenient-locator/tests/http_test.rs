//! Locator behavior against a throwaway HTTP server

use convenient_locator::{Locator, LocatorError};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread;
use tokio_util::sync::CancellationToken;

/// Serve one canned response per connection, `count` times; returns the base URL
fn serve(count: usize, headers: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming().take(count) {
            let mut stream = stream.unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
            }
            let head = format!(
                "{headers}Content-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        }
    });
    format!("http://{addr}")
}

#[test]
fn test_name_from_last_segment() {
    let base = serve(1, "HTTP/1.1 200 OK\r\n", b"a,b\n1,2\n".to_vec());
    let fetched = Locator::new()
        .open(&format!("{base}/files/table.csv"), &CancellationToken::new())
        .unwrap();

    assert_eq!(fetched.name, "table.csv");
    assert_eq!(fetched.dest, "table.csv");
    assert!(!fetched.has_explicit_dest());

    let mut body = String::new();
    let _ = { fetched.body }.read_to_string(&mut body).unwrap();
    assert_eq!(body, "a,b\n1,2\n");
}

#[test]
fn test_name_from_content_disposition() {
    let base = serve(
        1,
        "HTTP/1.1 200 OK\r\nContent-Disposition: attachment; filename=\"release.zip\"\r\n",
        b"PK".to_vec(),
    );
    let fetched = Locator::new()
        .open(&format!("{base}/download?id=7"), &CancellationToken::new())
        .unwrap();
    assert_eq!(fetched.name, "release.zip");
}

#[test]
fn test_directory_destination_keeps_upstream_name() {
    let base = serve(1, "HTTP/1.1 200 OK\r\n", b"x".to_vec());
    let fetched = Locator::new()
        .open(&format!("{base}/pkg/v0.9.4.tar.gz:/tmp/"), &CancellationToken::new())
        .unwrap();
    assert_eq!(fetched.name, "v0.9.4.tar.gz");
    assert_eq!(fetched.dest, "/tmp");
}

#[test]
fn test_path_destination_renames() {
    let base = serve(1, "HTTP/1.1 200 OK\r\n", b"x".to_vec());
    let fetched = Locator::new()
        .open(&format!("{base}/pkg/v0.9.4.tar.gz:/tmp/some.zip"), &CancellationToken::new())
        .unwrap();
    assert_eq!(fetched.name, "some.zip");
    assert_eq!(fetched.dest, "/tmp");
}

#[test]
fn test_gzip_body_is_decoded() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"decoded payload").unwrap();
    let base = serve(
        1,
        "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\n",
        encoder.finish().unwrap(),
    );

    let fetched = Locator::new()
        .open(&format!("{base}/payload.txt"), &CancellationToken::new())
        .unwrap();
    let mut body = String::new();
    let _ = { fetched.body }.read_to_string(&mut body).unwrap();
    assert_eq!(body, "decoded payload");
}

#[test]
fn test_not_found_is_an_error() {
    let base = serve(1, "HTTP/1.1 404 Not Found\r\n", b"missing".to_vec());
    let result = Locator::new().open(&format!("{base}/absent.zip"), &CancellationToken::new());
    match result {
        Err(LocatorError::Status { code, .. }) => assert_eq!(code, 404),
        other => panic!("Expected status error, got {:?}", other),
    }
}

#[test]
fn test_cancelled_before_fetch() {
    let token = CancellationToken::new();
    token.cancel();
    let result = Locator::new().open("http://127.0.0.1:9/never", &token);
    assert!(matches!(result, Err(LocatorError::Cancelled)));
}

#[test]
fn test_body_read_fails_after_cancel() {
    let base = serve(1, "HTTP/1.1 200 OK\r\n", vec![b'z'; 64 * 1024]);
    let token = CancellationToken::new();
    let mut fetched = Locator::new()
        .open(&format!("{base}/big.bin"), &token)
        .unwrap();

    token.cancel();
    let mut sink = Vec::new();
    assert!(fetched.body.read_to_end(&mut sink).is_err());
}
