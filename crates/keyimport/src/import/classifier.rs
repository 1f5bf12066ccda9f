use crate::{
    config::ClassifierConfig,
    errors::TransportError,
    retry::{try_all_with_backoff, BackoffConfig},
};
use eyre::Context as _;
use reqwest::Client;
use serde::Deserialize;
use std::{future::Future, time::Duration};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// What the classification service knows about an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Normal,
    SpecialAddress,
    TxTooMuch,
}

impl Classification {
    pub fn from_status(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "special_address" | "specialaddress" => Some(Self::SpecialAddress),
            "tx_too_much" | "txtoomuch" => Some(Self::TxTooMuch),
            _ => None,
        }
    }
}

pub trait AddressClassifier: Send + Sync + 'static {
    fn classify(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<Classification, TransportError>> + Send;
}

/// Progress of one classification call, as seen by its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyPhase {
    Started,
    Succeeded(Classification),
    Failed(TransportError),
}

/// Run `classifier` and report `Started`, then exactly one outcome phase.
pub async fn classify_with_phases<C: AddressClassifier + ?Sized>(
    classifier: &C,
    address: &str,
    mut report: impl FnMut(ClassifyPhase) + Send,
) -> Result<Classification, TransportError> {
    report(ClassifyPhase::Started);
    let res = classifier.classify(address).await;
    report(match &res {
        Ok(c) => ClassifyPhase::Succeeded(*c),
        Err(e) => ClassifyPhase::Failed(e.clone()),
    });
    res
}

fn host_prefix_ok(s: &str, prefix: &str) -> bool {
    if !s.starts_with(prefix) {
        return false;
    }
    matches!(s.as_bytes().get(prefix.len()), None | Some(b':' | b'/'))
}

fn base_url_is_allowed(url: &str) -> bool {
    let u = url.trim();
    u.starts_with("https://")
        || host_prefix_ok(u, "http://127.0.0.1")
        || host_prefix_ok(u, "http://localhost")
        || host_prefix_ok(u, "http://[::1]")
}

#[derive(Debug, Deserialize)]
struct AddressTypeResponse {
    status: String,
}

/// Classification over HTTP: `GET {base}/address/{address}/type`.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    client: Client,
    base_urls: Vec<String>,
    backoff: BackoffConfig,
}

impl HttpClassifier {
    pub fn new(cfg: &ClassifierConfig) -> eyre::Result<Self> {
        let mut base_urls = Vec::with_capacity(cfg.base_urls.len());
        for u in &cfg.base_urls {
            if !base_url_is_allowed(u) {
                eyre::bail!("classifier url must use https (or loopback): {u}");
            }
            base_urls.push(u.trim().trim_end_matches('/').to_owned());
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds.max(1)))
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_urls,
            backoff: BackoffConfig::from(cfg),
        })
    }

    async fn fetch(&self, base: &str, address: &str) -> eyre::Result<Classification> {
        let url = format!("{base}/address/{address}/type");
        let resp: AddressTypeResponse = self
            .client
            .get(url)
            .send()
            .await
            .context("classifier request")?
            .error_for_status()
            .context("classifier status")?
            .json()
            .await
            .context("classifier json")?;
        Classification::from_status(&resp.status)
            .ok_or_else(|| eyre::eyre!("unknown address status: {}", resp.status))
    }
}

impl AddressClassifier for HttpClassifier {
    async fn classify(&self, address: &str) -> Result<Classification, TransportError> {
        let res = try_all_with_backoff(
            &self.base_urls,
            &self.backoff,
            |base| {
                let base = base.clone();
                async move { self.fetch(&base, address).await }
            },
            "classify address",
        )
        .await;
        match res {
            Ok(c) => {
                tracing::info!(address, classification = ?c, "address classified");
                Ok(c)
            }
            Err(e) => {
                tracing::warn!(address, error = %format!("{e:#}"), "address classification failed");
                Err(TransportError::new(format!("{e:#}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        net::TcpListener,
    };

    const ADDR: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";

    fn test_cfg(base: String, timeout_seconds: u64) -> ClassifierConfig {
        ClassifierConfig {
            base_urls: vec![base],
            timeout_seconds,
            rounds: 1,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Serve `body` with `status` to every connection; returns the base URL.
    async fn serve(status: &'static str, body: &'static str) -> eyre::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base = format!("http://{}", listener.local_addr()?);
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0_u8; 2048];
                let _read = sock.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _write = sock.write_all(resp.as_bytes()).await;
                let _shutdown = sock.shutdown().await;
            }
        });
        Ok(base)
    }

    #[test]
    fn status_strings_parse() {
        assert_eq!(
            Classification::from_status("normal"),
            Some(Classification::Normal)
        );
        assert_eq!(
            Classification::from_status("SPECIAL_ADDRESS"),
            Some(Classification::SpecialAddress)
        );
        assert_eq!(
            Classification::from_status("tx_too_much"),
            Some(Classification::TxTooMuch)
        );
        assert_eq!(Classification::from_status("unknown"), None);
    }

    #[test]
    fn plain_http_is_only_allowed_for_loopback() {
        assert!(base_url_is_allowed("https://classifier.invalid"));
        assert!(base_url_is_allowed("http://127.0.0.1:8080"));
        assert!(base_url_is_allowed("http://localhost"));
        assert!(!base_url_is_allowed("http://localhost.evil.example"));
        assert!(!base_url_is_allowed("http://10.0.0.1"));
        assert!(HttpClassifier::new(&test_cfg("http://10.0.0.1".into(), 1)).is_err());
    }

    #[tokio::test]
    async fn classifies_from_service_response() -> eyre::Result<()> {
        let base = serve("200 OK", r#"{"status":"special_address"}"#).await?;
        let classifier = HttpClassifier::new(&test_cfg(base, 5))?;
        assert_eq!(
            classifier.classify(ADDR).await?,
            Classification::SpecialAddress
        );
        Ok(())
    }

    #[tokio::test]
    async fn malformed_body_and_http_errors_are_transport_errors() -> eyre::Result<()> {
        let garbage = serve("200 OK", r#"{"nope":true}"#).await?;
        assert!(HttpClassifier::new(&test_cfg(garbage, 5))?
            .classify(ADDR)
            .await
            .is_err());

        let unavailable = serve("503 Service Unavailable", "{}").await?;
        assert!(HttpClassifier::new(&test_cfg(unavailable, 5))?
            .classify(ADDR)
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn silent_service_times_out() -> eyre::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base = format!("http://{}", listener.local_addr()?);
        tokio::spawn(async move {
            let mut held = vec![];
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        let res = HttpClassifier::new(&test_cfg(base, 1))?.classify(ADDR).await;
        assert!(res.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn no_endpoints_is_a_transport_error() -> eyre::Result<()> {
        let classifier = HttpClassifier::new(&ClassifierConfig::default())?;
        assert!(classifier.classify(ADDR).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn phases_report_start_then_outcome() -> eyre::Result<()> {
        let base = serve("200 OK", r#"{"status":"normal"}"#).await?;
        let classifier = HttpClassifier::new(&test_cfg(base, 5))?;
        let mut phases = vec![];
        let res = classify_with_phases(&classifier, ADDR, |p| phases.push(p)).await?;
        assert_eq!(res, Classification::Normal);
        assert_eq!(
            phases,
            vec![
                ClassifyPhase::Started,
                ClassifyPhase::Succeeded(Classification::Normal)
            ]
        );
        Ok(())
    }
}
