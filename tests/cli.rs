use assert_cmd::prelude::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::{fs, net::SocketAddr, process::Command, sync::mpsc, thread};
use tempfile::TempDir;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use questr::publish::Signer;
use questr::signer::KeySigner;

/// Minimal relay: every REQ gets an immediate EOSE, every EVENT gets an
/// accepting OK. Runs on its own runtime thread for the life of the test
/// process.
fn spawn_mock_relay() -> String {
    let (tx, rx) = mpsc::channel::<SocketAddr>();
    thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(Message::Text(txt))) = ws.next().await {
                        let v: Value = serde_json::from_str(&txt).unwrap();
                        match v[0].as_str() {
                            Some("REQ") => {
                                let sub = v[1].as_str().unwrap();
                                ws.send(Message::Text(json!(["EOSE", sub]).to_string()))
                                    .await
                                    .unwrap();
                            }
                            Some("EVENT") => {
                                let id = v[1]["id"].as_str().unwrap();
                                ws.send(Message::Text(
                                    json!(["OK", id, true, ""]).to_string(),
                                ))
                                .await
                                .unwrap();
                            }
                            _ => {}
                        }
                    }
                });
            }
        });
    });
    format!("ws://{}", rx.recv().unwrap())
}

fn write_env(dir: &TempDir, relay: &str) -> String {
    let env_path = dir.path().join("env");
    fs::write(&env_path, format!("RELAYS={relay}\nTIMEOUT_MS=5000\n")).unwrap();
    env_path.to_str().unwrap().to_string()
}

#[test]
fn keygen_prints_matching_keypair() {
    let out = Command::cargo_bin("questr")
        .unwrap()
        .arg("keygen")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: Value = serde_json::from_slice(&out).unwrap();
    let pubkey = v["pubkey"].as_str().unwrap();
    let seckey = v["seckey"].as_str().unwrap();
    assert_eq!(pubkey.len(), 64);
    assert_eq!(seckey.len(), 64);
    let signer = KeySigner::from_hex(seckey).unwrap();
    assert_eq!(signer.public_key(), pubkey);
}

#[test]
fn publish_reports_accepting_relay() {
    let relay = spawn_mock_relay();
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir, &relay);
    let sec = "01".repeat(32);

    let out = Command::cargo_bin("questr")
        .unwrap()
        .args(["--env", &env_path, "publish", "hello from the cli", "--sec", &sec])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["accepted"], json!([relay]));
    assert_eq!(v["failed"], json!([]));
    assert_eq!(v["id"].as_str().unwrap().len(), 64);
}

#[test]
fn follows_of_unknown_pubkey_prints_nothing() {
    let relay = spawn_mock_relay();
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir, &relay);

    let out = Command::cargo_bin("questr")
        .unwrap()
        .args(["--env", &env_path, "follows", &"a1".repeat(32)])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(out.is_empty());
}

#[test]
fn publish_without_key_fails() {
    let dir = TempDir::new().unwrap();
    let env_path = write_env(&dir, "ws://127.0.0.1:1");

    Command::cargo_bin("questr")
        .unwrap()
        .env_remove("NOSTR_SECRET_KEY")
        .args(["--env", &env_path, "publish", "no key"])
        .assert()
        .failure();
}
