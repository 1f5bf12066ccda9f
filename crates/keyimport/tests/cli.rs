use assert_cmd::Command;
use eyre::Context as _;
use predicates::prelude::*;
use std::{
    io::{Read as _, Write as _},
    net::TcpListener,
    sync::mpsc,
    time::Duration,
};
use tempfile::TempDir;

const WIF: &str = "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn";
const ADDRESS: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";
const UNCOMPRESSED_WIF: &str = "5Kb8kLf9zgWQnogidDA76MzPL6TsZZY36hWXMssSzNydYXYB9KF";

/// Isolated config + data dirs with a cheap KDF so tests stay fast in debug builds.
struct Sandbox {
    cfg: TempDir,
    data: TempDir,
}

impl Sandbox {
    fn new() -> eyre::Result<Self> {
        let sandbox = Self {
            cfg: tempfile::tempdir()?,
            data: tempfile::tempdir()?,
        };
        std::fs::write(
            sandbox.cfg.path().join("config.toml"),
            "app_mode = \"offline\"\n\n[kdf]\nmemory_kib = 64\niterations = 1\nparallelism = 1\n",
        )
        .context("write config.toml")?;
        Ok(sandbox)
    }

    fn cmd(&self) -> Command {
        Command::from_std(self.std_cmd())
    }

    fn std_cmd(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin!("keyimport"));
        cmd.env("KEYIMPORT_CONFIG_DIR", self.cfg.path())
            .env("KEYIMPORT_DATA_DIR", self.data.path())
            .env_remove("KEYIMPORT_APP_MODE")
            .env_remove("KEYIMPORT_NETWORK")
            .env_remove("KEYIMPORT_CLASSIFIER_URLS")
            .env_remove("KEYIMPORT_PASSPHRASE")
            .env_remove("RUST_LOG");
        cmd
    }

    fn import(&self, stdin: &str, passphrase: &str) -> Command {
        let mut cmd = self.cmd();
        cmd.env("KEYIMPORT_PASSPHRASE", passphrase)
            .args(["import", "--mode", "offline"])
            .write_stdin(stdin.to_owned());
        cmd
    }

    fn import_online(&self, service: &ClassifierService) -> Command {
        let mut cmd = self.cmd();
        cmd.env("KEYIMPORT_PASSPHRASE", "correct-pass")
            .env("KEYIMPORT_CLASSIFIER_URLS", &service.base)
            .args(["import", "--mode", "online"])
            .write_stdin(format!("{WIF}\n"));
        cmd
    }
}

/// Loopback classification service answering every request with one status.
struct ClassifierService {
    base: String,
    /// One message per request received, sent before the reply delay starts.
    requests: mpsc::Receiver<()>,
}

impl ClassifierService {
    fn start(status: &'static str, delay: Duration) -> eyre::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").context("bind classifier")?;
        let base = format!("http://{}", listener.local_addr()?);
        let (tx, requests) = mpsc::channel();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut buf = [0_u8; 2048];
                let _read = stream.read(&mut buf);
                let _seen = tx.send(());
                std::thread::sleep(delay);
                let body = format!(r#"{{"status":"{status}"}}"#);
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _write = stream.write_all(resp.as_bytes());
            }
        });
        Ok(Self { base, requests })
    }
}

#[test]
fn paths_reports_the_override_dirs() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    let out = sb.cmd().arg("paths").output().context("run keyimport paths")?;
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse paths json")?;
    assert_eq!(
        v.get("config_dir").and_then(|x| x.as_str()),
        sb.cfg.path().to_str()
    );
    assert!(v.get("address_index").and_then(|x| x.as_str()).is_some());
    Ok(())
}

#[test]
fn offline_import_stores_the_key_once() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.import(&format!("{WIF}\n"), "correct-pass")
        .assert()
        .success()
        .stderr(predicate::str::contains(format!(
            "imported private key for {ADDRESS}"
        )));

    sb.cmd()
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(ADDRESS).and(predicate::str::contains("private_key")));

    sb.import(WIF, "another-pass")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already_imported"));

    let index = std::fs::read_to_string(sb.cfg.path().join("addresses").join("index.json"))?;
    assert!(!index.contains(WIF), "the WIF must never be stored in clear");
    assert!(!index.contains("correct-pass"));
    Ok(())
}

#[test]
fn stored_key_verifies_with_its_passphrase() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.import(WIF, "correct-pass").assert().success();

    sb.cmd()
        .env("KEYIMPORT_PASSPHRASE", "correct-pass")
        .args(["verify", ADDRESS])
        .assert()
        .success()
        .stdout(predicate::str::contains("passphrase ok"));
    sb.cmd()
        .env("KEYIMPORT_PASSPHRASE", "wrong-pass")
        .args(["verify", ADDRESS])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn watch_only_address_blocks_import() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.cmd()
        .args(["watch", ADDRESS])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("watching {ADDRESS}")));

    sb.import(WIF, "correct-pass")
        .assert()
        .failure()
        .stderr(predicate::str::contains("watch_only_duplicate"));

    sb.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("watch-only").and(predicate::str::contains("private-key").not()));
    Ok(())
}

#[test]
fn malformed_input_is_a_format_error() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.import("", "correct-pass")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid_format"));
    sb.import("not a key", "correct-pass")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid_format"));
    Ok(())
}

#[test]
fn uncompressed_key_is_rejected_as_json() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    let out = sb
        .import(UNCOMPRESSED_WIF, "correct-pass")
        .arg("--json")
        .output()
        .context("run keyimport import --json")?;
    assert!(!out.status.success());

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse notice json")?;
    assert_eq!(v.get("ok").and_then(serde_json::Value::as_bool), Some(false));
    assert_eq!(
        v.get("code").and_then(|x| x.as_str()),
        Some("uncompressed_key")
    );
    Ok(())
}

#[test]
fn json_success_notice_carries_the_address() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    let out = sb
        .import(WIF, "correct-pass")
        .arg("--json")
        .output()
        .context("run keyimport import --json")?;
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let v: serde_json::Value = serde_json::from_slice(&out.stdout).context("parse notice json")?;
    assert_eq!(v.get("ok").and_then(serde_json::Value::as_bool), Some(true));
    assert_eq!(v.get("address").and_then(|x| x.as_str()), Some(ADDRESS));
    Ok(())
}

#[test]
fn empty_passphrase_fails_the_import() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.import(WIF, "")
        .assert()
        .failure()
        .stderr(predicate::str::contains("import_failed"));
    sb.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(ADDRESS).not());
    Ok(())
}

#[test]
fn online_import_without_reachable_classifier_is_a_connectivity_error() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    sb.cmd()
        .env("KEYIMPORT_PASSPHRASE", "correct-pass")
        .env("KEYIMPORT_CLASSIFIER_URLS", "http://127.0.0.1:9")
        .env("KEYIMPORT_CLASSIFIER_TIMEOUT_SECONDS", "1")
        .args(["import", "--mode", "online"])
        .write_stdin(WIF)
        .assert()
        .failure()
        .stderr(predicate::str::contains("connectivity"));

    // Nothing was stored, so the same key can be retried offline.
    sb.import(WIF, "correct-pass").assert().success();
    Ok(())
}

#[test]
fn online_import_succeeds_for_a_normal_address() -> eyre::Result<()> {
    let sb = Sandbox::new()?;
    let service = ClassifierService::start("normal", Duration::ZERO)?;
    sb.import_online(&service)
        .assert()
        .success()
        .stderr(predicate::str::contains(format!(
            "imported private key for {ADDRESS}"
        )));
    assert!(service.requests.try_recv().is_ok(), "classifier must be consulted");

    sb.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(ADDRESS).and(predicate::str::contains("private-key")));
    Ok(())
}

#[test]
fn online_policy_rejections_store_nothing() -> eyre::Result<()> {
    for (status, code) in [
        ("special_address", "special_address"),
        ("tx_too_much", "too_many_transactions"),
    ] {
        let sb = Sandbox::new()?;
        let service = ClassifierService::start(status, Duration::ZERO)?;
        sb.import_online(&service)
            .assert()
            .failure()
            .stderr(predicate::str::contains(code));
        sb.cmd()
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains(ADDRESS).not());
    }
    Ok(())
}

#[cfg(unix)]
#[test]
fn ctrl_c_during_classification_cancels_the_import() -> eyre::Result<()> {
    use std::process::Stdio;

    let sb = Sandbox::new()?;
    let service = ClassifierService::start("normal", Duration::from_secs(2))?;
    let mut child = sb
        .std_cmd()
        .env("KEYIMPORT_PASSPHRASE", "correct-pass")
        .env("KEYIMPORT_CLASSIFIER_URLS", &service.base)
        .args(["import", "--mode", "online"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawn keyimport import")?;
    {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| eyre::eyre!("stdin not piped"))?;
        stdin.write_all(format!("{WIF}\n").as_bytes())?;
    }

    // The request is in flight and the service is still thinking.
    service
        .requests
        .recv_timeout(Duration::from_secs(60))
        .context("classifier was never called")?;
    std::thread::sleep(Duration::from_millis(200));
    let kill = std::process::Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .context("send SIGINT")?;
    assert!(kill.success(), "kill -INT failed");

    let out = child.wait_with_output().context("wait for keyimport")?;
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(!out.status.success(), "interrupted import must fail: {stderr}");
    assert!(stderr.contains("interrupted"), "{stderr}");
    assert!(stderr.contains("import cancelled"), "{stderr}");

    sb.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(ADDRESS).not());
    Ok(())
}
