//! Centralised helpers for operator-facing CLI output and secret prompts.
//!
//! Human-readable text goes to stderr; `--json` notices go to stdout, one object per line.

use crate::{
    errors::ImportNotice,
    import::{ImportEvent, ImportSurface, Passphrase, ProgressKind},
};
use std::io::{BufRead as _, IsTerminal as _, Write as _};
use zeroize::Zeroizing;

const PASSPHRASE_ENV: &str = "KEYIMPORT_PASSPHRASE";

fn stderr_writeln(s: &str) {
    let mut stderr = std::io::stderr().lock();
    if stderr.write_all(s.as_bytes()).is_err() {
        return;
    }
    if stderr.write_all(b"\n").is_err() {
        return;
    }
    let _flush = stderr.flush();
}

pub fn stdout_writeln(s: &str) -> eyre::Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{s}").map_err(|e| eyre::eyre!("write stdout: {e}"))?;
    stdout
        .flush()
        .map_err(|e| eyre::eyre!("flush stdout: {e}"))
}

pub fn print_notice(notice: &ImportNotice, json: bool) {
    if json {
        let res = serde_json::to_string(notice)
            .map_err(|e| eyre::eyre!("serialize notice: {e}"))
            .and_then(|s| stdout_writeln(&s));
        if let Err(e) = res {
            stderr_writeln(&format!("keyimport: {e:#}"));
        }
    } else if notice.ok {
        stderr_writeln(&format!("keyimport: {}", notice.message));
    } else {
        stderr_writeln(&format!("keyimport: {} [{}]", notice.message, notice.code));
    }
}

pub fn notice_for(event: &ImportEvent) -> ImportNotice {
    match event {
        ImportEvent::Succeeded { address } => ImportNotice::imported(address),
        ImportEvent::Failed(reason) => ImportNotice::from(reason),
    }
}

pub fn print_interrupted() {
    stderr_writeln("keyimport: interrupted; waiting for the running import step to finish...");
}

pub fn print_cancelled() {
    stderr_writeln("keyimport: import cancelled; nothing was stored.");
}

/// Renders coordinator progress and the terminal notice on the terminal.
#[derive(Debug, Clone, Copy)]
pub struct TerminalSurface {
    json: bool,
}

impl TerminalSurface {
    pub const fn new(json: bool) -> Self {
        Self { json }
    }
}

impl ImportSurface for TerminalSurface {
    fn progress_started(&mut self, kind: ProgressKind) {
        stderr_writeln(match kind {
            ProgressKind::Classifying => "Checking address with the classification service...",
            ProgressKind::Importing => "Sealing and storing private key...",
        });
    }

    fn progress_finished(&mut self) {}

    fn notify(&mut self, event: &ImportEvent) {
        print_notice(&notice_for(event), self.json);
    }
}

/// Read the WIF key from a hidden prompt, or from the first line of stdin when it is piped.
pub fn read_private_key() -> eyre::Result<Zeroizing<String>> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        let s = rpassword::prompt_password("Private key (WIF): ")
            .map_err(|e| eyre::eyre!("read private key: {e}"))?;
        return Ok(Zeroizing::new(s));
    }
    let mut line = Zeroizing::new(String::new());
    stdin
        .lock()
        .read_line(&mut line)
        .map_err(|e| eyre::eyre!("read private key from stdin: {e}"))?;
    Ok(line)
}

/// Obtain the sealing passphrase. `Ok(None)` means the operator cancelled.
///
/// `KEYIMPORT_PASSPHRASE` wins when set; otherwise the passphrase is typed twice on the
/// controlling terminal. An empty answer or a mismatch cancels.
pub fn read_passphrase() -> eyre::Result<Option<Passphrase>> {
    if let Ok(v) = std::env::var(PASSPHRASE_ENV) {
        let v = Zeroizing::new(v);
        return Ok(Some(Passphrase::from_bytes(v.as_bytes())));
    }

    let first = Zeroizing::new(
        rpassword::prompt_password("Passphrase to protect the key: ")
            .map_err(|e| eyre::eyre!("read passphrase (or set {PASSPHRASE_ENV}): {e}"))?,
    );
    if first.is_empty() {
        return Ok(None);
    }
    let second = Zeroizing::new(
        rpassword::prompt_password("Repeat passphrase: ")
            .map_err(|e| eyre::eyre!("read passphrase: {e}"))?,
    );
    if *first != *second {
        stderr_writeln("keyimport: passphrases do not match.");
        return Ok(None);
    }
    Ok(Some(Passphrase::from_bytes(first.as_bytes())))
}
