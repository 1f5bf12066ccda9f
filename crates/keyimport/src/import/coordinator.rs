//! Import state machine.
//!
//! Decoding runs synchronously inside [`ImportCoordinator::submit`]. Classification and the
//! seal/check/persist pipeline each run on their own tokio task and report back over an
//! unbounded channel; [`ImportCoordinator::next_step`] applies those messages in order. Every
//! worker message carries the attempt id it was spawned for, so late deliveries from a
//! superseded attempt are dropped.

use super::{
    classifier::{classify_with_phases, Classification, ClassifyPhase},
    decoder::{DecodedKey, KeyDecoder},
    guard::{DuplicateGuard, DuplicateStatus},
    secret_store::SecretStore,
    AddressClassifier, AddressRecord, AddressRegistry, Passphrase,
};
use crate::{
    config::{AppMode, KdfConfig},
    errors::{DecryptionError, FailureReason},
    keystore::crypto::seal_private_key,
};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportState {
    Idle,
    Validating,
    Classifying,
    AwaitingPassphrase,
    Decrypting,
    CheckingDuplicates,
    Persisting,
    Done { address: String },
    Failed(FailureReason),
}

impl ImportState {
    /// Background work is running for the current attempt.
    pub const fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Classifying | Self::Decrypting | Self::CheckingDuplicates | Self::Persisting
        )
    }
}

/// The single terminal notification of an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportEvent {
    Succeeded { address: String },
    Failed(FailureReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressKind {
    Classifying,
    Importing,
}

/// The interactive side: progress indication and the final notice.
pub trait ImportSurface {
    fn progress_started(&mut self, kind: ProgressKind);
    fn progress_finished(&mut self);
    fn notify(&mut self, event: &ImportEvent);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Rejected before any background work was scheduled.
    Finished(ImportEvent),
    /// Another attempt is in flight; the input was ignored.
    Busy,
    Classifying,
    AwaitingPassphrase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    PassphraseRequired,
    Finished(ImportEvent),
    /// The surface was dismissed before passphrase entry; the attempt was dropped unsaved.
    Cancelled,
    /// Nothing is pending.
    Idle,
}

pub struct ImportContext<C, R> {
    pub mode: AppMode,
    pub decoder: KeyDecoder,
    pub kdf: KdfConfig,
    pub classifier: Arc<C>,
    pub registry: Arc<R>,
}

#[derive(Debug)]
enum WorkerEvent {
    Classify(ClassifyPhase),
    Phase(ImportState),
    Finished(Result<String, FailureReason>),
}

#[derive(Debug)]
struct WorkerMessage {
    attempt: u64,
    event: WorkerEvent,
}

pub struct ImportCoordinator<C, R> {
    ctx: ImportContext<C, R>,
    surface: Option<Box<dyn ImportSurface>>,
    dismissed: bool,
    progress_open: bool,
    state: ImportState,
    attempt: u64,
    pending: Option<DecodedKey>,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    rx: mpsc::UnboundedReceiver<WorkerMessage>,
}

impl<C: AddressClassifier, R: AddressRegistry> ImportCoordinator<C, R> {
    pub fn new(ctx: ImportContext<C, R>, surface: Box<dyn ImportSurface>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            surface: Some(surface),
            dismissed: false,
            progress_open: false,
            state: ImportState::Idle,
            attempt: 0,
            pending: None,
            tx,
            rx,
        }
    }

    pub const fn state(&self) -> &ImportState {
        &self.state
    }

    /// Start an attempt for `raw`. Must be called from within a tokio runtime.
    pub fn submit(&mut self, raw: &str) -> Submission {
        if self.state.is_in_flight() {
            tracing::debug!(state = ?self.state, "import already in flight; ignoring submission");
            return Submission::Busy;
        }

        self.attempt = self.attempt.wrapping_add(1);
        self.pending = None;
        self.state = ImportState::Validating;

        let key = match self.ctx.decoder.decode(raw) {
            Ok(k) => k,
            Err(e) => return Submission::Finished(self.finish(Err(e.into()))),
        };
        let address = key.address().to_owned();
        tracing::info!(attempt = self.attempt, address = %address, mode = ?self.ctx.mode, "private key decoded");
        self.pending = Some(key);

        if !self.ctx.mode.requires_classification() {
            self.state = ImportState::AwaitingPassphrase;
            return Submission::AwaitingPassphrase;
        }

        self.state = ImportState::Classifying;
        let attempt = self.attempt;
        let tx = self.tx.clone();
        let classifier = Arc::clone(&self.ctx.classifier);
        tokio::spawn(async move {
            let _outcome = classify_with_phases(&*classifier, &address, |phase| {
                deliver(&tx, attempt, WorkerEvent::Classify(phase));
            })
            .await;
        });
        Submission::Classifying
    }

    /// Hand over the passphrase for the waiting attempt. Anything else wipes it and returns false.
    pub fn passphrase_entered(&mut self, mut passphrase: Passphrase) -> bool {
        if self.state != ImportState::AwaitingPassphrase {
            tracing::debug!(state = ?self.state, "no attempt awaits a passphrase; wiping it");
            passphrase.wipe();
            return false;
        }
        let Some(key) = self.pending.take() else {
            passphrase.wipe();
            self.state = ImportState::Idle;
            return false;
        };

        self.state = ImportState::Decrypting;
        self.open_progress(ProgressKind::Importing);
        let worker = ImportWorker {
            attempt: self.attempt,
            tx: self.tx.clone(),
            registry: Arc::clone(&self.ctx.registry),
            kdf: self.ctx.kdf,
        };
        tokio::spawn(worker.run(key, passphrase));
        true
    }

    /// The operator abandoned passphrase entry. No terminal event is emitted.
    pub fn passphrase_cancelled(&mut self) -> bool {
        if self.state != ImportState::AwaitingPassphrase {
            return false;
        }
        tracing::info!(attempt = self.attempt, "passphrase entry cancelled");
        self.pending = None;
        self.state = ImportState::Idle;
        true
    }

    /// Detach the interactive surface. In-flight work keeps running and still updates state,
    /// but an attempt that would next ask for a passphrase is cancelled instead.
    pub fn dismiss(&mut self) {
        self.dismissed = true;
        self.surface = None;
        self.progress_open = false;
    }

    /// Wait for the next externally visible step of the current attempt.
    pub async fn next_step(&mut self) -> Step {
        loop {
            match &self.state {
                ImportState::AwaitingPassphrase if self.dismissed => {
                    tracing::info!(attempt = self.attempt, "dismissed before passphrase entry");
                    self.pending = None;
                    self.state = ImportState::Idle;
                    return Step::Cancelled;
                }
                ImportState::AwaitingPassphrase => return Step::PassphraseRequired,
                s if !s.is_in_flight() => return Step::Idle,
                _ => {}
            }

            let Some(msg) = self.rx.recv().await else {
                return Step::Idle;
            };
            if msg.attempt != self.attempt {
                tracing::debug!(attempt = msg.attempt, "dropping stale worker message");
                continue;
            }

            match msg.event {
                WorkerEvent::Classify(ClassifyPhase::Started) => {
                    self.open_progress(ProgressKind::Classifying);
                }
                WorkerEvent::Classify(ClassifyPhase::Succeeded(Classification::Normal)) => {
                    self.close_progress();
                    self.state = ImportState::AwaitingPassphrase;
                }
                WorkerEvent::Classify(ClassifyPhase::Succeeded(Classification::SpecialAddress)) => {
                    return Step::Finished(self.finish(Err(FailureReason::SpecialAddress)));
                }
                WorkerEvent::Classify(ClassifyPhase::Succeeded(Classification::TxTooMuch)) => {
                    return Step::Finished(self.finish(Err(FailureReason::TxTooMuch)));
                }
                WorkerEvent::Classify(ClassifyPhase::Failed(e)) => {
                    tracing::warn!(error = %e, "classification failed");
                    return Step::Finished(self.finish(Err(FailureReason::Connectivity)));
                }
                WorkerEvent::Phase(state) => self.state = state,
                WorkerEvent::Finished(outcome) => return Step::Finished(self.finish(outcome)),
            }
        }
    }

    fn open_progress(&mut self, kind: ProgressKind) {
        if let Some(surface) = self.surface.as_mut() {
            surface.progress_started(kind);
            self.progress_open = true;
        }
    }

    fn close_progress(&mut self) {
        if !self.progress_open {
            return;
        }
        self.progress_open = false;
        if let Some(surface) = self.surface.as_mut() {
            surface.progress_finished();
        }
    }

    fn finish(&mut self, outcome: Result<String, FailureReason>) -> ImportEvent {
        self.pending = None;
        self.close_progress();
        let event = match outcome {
            Ok(address) => {
                tracing::info!(attempt = self.attempt, address = %address, "private key imported");
                self.state = ImportState::Done {
                    address: address.clone(),
                };
                ImportEvent::Succeeded { address }
            }
            Err(reason) => {
                tracing::warn!(
                    attempt = self.attempt,
                    category = ?reason.category(),
                    retryable = reason.is_retryable(),
                    reason = %reason,
                    "private key import failed"
                );
                self.state = ImportState::Failed(reason.clone());
                ImportEvent::Failed(reason)
            }
        };
        if let Some(surface) = self.surface.as_mut() {
            surface.notify(&event);
        }
        event
    }
}

fn deliver(tx: &mpsc::UnboundedSender<WorkerMessage>, attempt: u64, event: WorkerEvent) {
    if tx.send(WorkerMessage { attempt, event }).is_err() {
        tracing::debug!(attempt, "coordinator gone; dropping worker message");
    }
}

/// Owns everything the seal/check/persist pipeline needs; nothing is shared with the
/// coordinator except the channel.
struct ImportWorker<R> {
    attempt: u64,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    registry: Arc<R>,
    kdf: KdfConfig,
}

impl<R: AddressRegistry> ImportWorker<R> {
    async fn run(self, key: DecodedKey, passphrase: Passphrase) {
        let outcome = self.pipeline(key, passphrase).await;
        deliver(&self.tx, self.attempt, WorkerEvent::Finished(outcome));
    }

    async fn pipeline(
        &self,
        key: DecodedKey,
        mut passphrase: Passphrase,
    ) -> Result<String, FailureReason> {
        let store = SecretStore::new(Arc::clone(&self.registry));
        let lease = match store.lease() {
            Ok(lease) => lease,
            Err(e) => {
                passphrase.wipe();
                return Err(e.into());
            }
        };
        tracing::debug!(
            attempt = self.attempt,
            locked = lease.is_locked(),
            "registry lease acquired"
        );

        let kdf = self.kdf;
        let (key, sealed) = tokio::task::spawn_blocking(move || {
            let mut passphrase = passphrase;
            let sealed = seal_private_key(
                &mut passphrase,
                &kdf,
                key.address(),
                key.secret_bytes(),
                |plaintext| key.matches_secret(plaintext),
            );
            (key, sealed)
        })
        .await
        .map_err(|e| DecryptionError::KeyDerivation(format!("seal task: {e}")))?;
        let sealed = sealed?;

        deliver(
            &self.tx,
            self.attempt,
            WorkerEvent::Phase(ImportState::CheckingDuplicates),
        );
        match DuplicateGuard::new(Arc::clone(&self.registry)).check(key.address()) {
            DuplicateStatus::WatchOnlyConflict => return Err(FailureReason::WatchOnlyDuplicate),
            DuplicateStatus::PrivateKeyConflict => return Err(FailureReason::AlreadyImported),
            DuplicateStatus::Unique => {}
        }

        deliver(
            &self.tx,
            self.attempt,
            WorkerEvent::Phase(ImportState::Persisting),
        );
        store.persist(lease, AddressRecord::new(&key, sealed)).await?;
        Ok(key.address().to_owned())
    }
}
