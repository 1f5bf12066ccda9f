use serde::{Deserialize, Serialize};

/// Whether imports consult the classification service before asking for a passphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    /// Network-connected install; every candidate address is classified first.
    #[default]
    Online,
    /// Air-gapped install; classification is skipped entirely.
    Offline,
}

impl AppMode {
    pub const fn requires_classification(self) -> bool {
        matches!(self, Self::Online)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Mainnet,
    Testnet,
}

impl NetworkMode {
    pub const fn kind(self) -> bitcoin::NetworkKind {
        match self {
            Self::Mainnet => bitcoin::NetworkKind::Main,
            Self::Testnet => bitcoin::NetworkKind::Test,
        }
    }

    pub const fn network(self) -> bitcoin::Network {
        match self {
            Self::Mainnet => bitcoin::Network::Bitcoin,
            Self::Testnet => bitcoin::Network::Testnet,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Classification service base URLs, tried in order. Required in online mode; with no
    /// endpoint configured every classification reports a transport failure.
    ///
    /// Must be `https`, except `http://localhost` / `http://127.0.0.1` / `http://[::1]` for
    /// local testing.
    pub base_urls: Vec<String>,
    /// Per-request timeout (seconds).
    pub timeout_seconds: u64,
    /// Full passes over `base_urls` before giving up.
    pub rounds: usize,
    /// First backoff delay between rounds (milliseconds); doubles each round.
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_urls: vec![],
            timeout_seconds: 10,
            rounds: 2,
            backoff_base_ms: 400,
            backoff_max_ms: 4_000,
        }
    }
}

/// Argon2id cost parameters used when sealing imported keys.
///
/// The values are recorded next to every sealed key, so changing them only affects new imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfConfig {
    pub const MAX_MEMORY_KIB: u32 = 1024 * 1024;
    pub const MAX_ITERATIONS: u32 = 64;
    pub const MAX_PARALLELISM: u32 = 16;

    /// Costs are read back from disk, so they are bounded before any derivation runs.
    pub const fn within_limits(&self) -> bool {
        self.memory_kib <= Self::MAX_MEMORY_KIB
            && self.iterations <= Self::MAX_ITERATIONS
            && self.parallelism <= Self::MAX_PARALLELISM
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        // Matches `argon2::Params::DEFAULT` in argon2 0.5.x.
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeyImportConfig {
    pub app_mode: AppMode,
    pub network_mode: NetworkMode,
    pub classifier: ClassifierConfig,
    pub kdf: KdfConfig,
}

pub fn parse_app_mode(s: &str) -> Option<AppMode> {
    match s.trim().to_lowercase().as_str() {
        "online" | "hot" => Some(AppMode::Online),
        "offline" | "cold" | "advanced" => Some(AppMode::Offline),
        _ => None,
    }
}

pub fn parse_network_mode(s: &str) -> Option<NetworkMode> {
    match s.trim().to_lowercase().as_str() {
        "mainnet" | "main" | "bitcoin" => Some(NetworkMode::Mainnet),
        "testnet" | "test" => Some(NetworkMode::Testnet),
        _ => None,
    }
}
