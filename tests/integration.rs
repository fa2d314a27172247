use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_po-intake"))
}

const ORDER_EML: &str = "From: Acme Orders <orders@acme.example>\r\n\
To: buying@northwind.example\r\n\
Subject: Purchase Order PO-7781\r\n\
Date: Wed, 01 Jan 2025 10:00:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Please find the purchase order attached.\r\n\
--b1\r\n\
Content-Type: application/pdf; name=\"PO-7781.pdf\"\r\n\
Content-Disposition: attachment; filename=\"PO-7781.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQKJcTl8uXr\r\n\
--b1--\r\n";

const CHATTER_EML: &str = "From: friend@example.com\r\n\
To: buying@northwind.example\r\n\
Subject: Lunch\r\n\
Date: Wed, 01 Jan 2025 12:00:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
See you at noon.\r\n";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let mail_dir = root.join("mail");
    fs::create_dir_all(&mail_dir).unwrap();
    fs::write(mail_dir.join("po-7781.eml"), ORDER_EML).unwrap();
    fs::write(mail_dir.join("lunch.eml"), CHATTER_EML).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/orders.sqlite"

[mailbox]
provider = "maildir"

[mailbox.maildir]
root = "{root}/mail"

[fetch]
download_dir = "{root}/received"

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("po-intake.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "po_intake=warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run po-intake: {}", e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, again) = run(&config_path, &["init"]);
    assert!(again, "second init failed");
}

#[test]
fn test_ingest_window_from_maildir() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run(
        &config_path,
        &["ingest", "--since", "2025-01-01", "--until", "2025-01-01"],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("messages: 2"), "{}", stdout);
    assert!(stdout.contains("order_emails: 1"), "{}", stdout);
    assert!(stdout.contains("document: "), "{}", stdout);
    assert!(stdout.trim_end().ends_with("ok"));

    let received: Vec<_> = fs::read_dir(tmp.path().join("received"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(received.len(), 1);
    assert!(received[0].ends_with("_attachment_PO-7781.pdf"), "{:?}", received);
}

#[test]
fn test_ingest_outside_window_finds_nothing() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run(
        &config_path,
        &["ingest", "--since", "2025-02-01", "--until", "2025-02-02"],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("messages: 0"), "{}", stdout);
    assert!(!stdout.contains("document: "));
    let received = tmp.path().join("received");
    assert!(!received.exists() || fs::read_dir(received).unwrap().next().is_none());
}

#[test]
fn test_ingest_rejects_reversed_window() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run(
        &config_path,
        &["ingest", "--since", "2025-01-05", "--until", "2025-01-01"],
    );
    assert!(!success);
    assert!(stderr.contains("--since must be before --until"), "{}", stderr);
}

#[test]
fn test_empty_store_commands() {
    let (_tmp, config_path) = setup_test_env();
    run(&config_path, &["init"]);

    let (stdout, stderr, success) = run(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Orders:      0"), "{}", stdout);

    let (stdout, _, success) = run(&config_path, &["orders", "list"]);
    assert!(success);
    assert!(stdout.contains("No orders."));

    let (_, stderr, success) = run(&config_path, &["orders", "get", "PO-404"]);
    assert!(!success);
    assert!(stderr.contains("Order not found"), "{}", stderr);

    let (_, _, success) = run(&config_path, &["orders", "delete", "PO-404"]);
    assert!(!success);
}

#[test]
fn test_process_without_api_key_fails() {
    let (tmp, config_path) = setup_test_env();
    run(&config_path, &["init"]);
    let pdf = tmp.path().join("po.pdf");
    fs::write(&pdf, b"%PDF-1.4\n").unwrap();

    let output = Command::new(binary())
        .arg("--config")
        .arg(&config_path)
        .args(["process", pdf.to_str().unwrap()])
        .env_remove("GEMINI_API_KEY")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GEMINI_API_KEY"), "{}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        "[db]\npath = \"x.sqlite\"\n\n[mailbox]\nprovider = \"imap\"\n",
    )
    .unwrap();

    let (_, stderr, success) = run(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Unknown mailbox provider"), "{}", stderr);
}
