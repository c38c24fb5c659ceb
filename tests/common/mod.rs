//! Common test utilities for sync engine and scheduler tests
//!
//! Provides in-memory fakes for the Kubernetes Secret API, the Vault backend
//! and the status reporter, plus builders for VaultSecret snapshots.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use vault_secrets_controller::backend::ResponseShape;
use vault_secrets_controller::controller::destination::StoreError;
use vault_secrets_controller::prelude::*;

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

/// Fixed starting point for manual clocks
pub fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

pub fn at(offset_secs: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(offset_secs)
}

// ---------------------------------------------------------------------------
// Secret store
// ---------------------------------------------------------------------------

/// In-memory Secret API with resourceVersion semantics
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<BTreeMap<(String, String), Secret>>,
    next_version: AtomicU32,
    /// Replace calls that fail as if someone else wrote first
    injected_conflicts: AtomicU32,
    pub writes: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl MemorySecretStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn bump(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Store a Secret as if created by someone else
    pub fn insert(&self, namespace: &str, mut secret: Secret) {
        let name = secret.metadata.name.clone().unwrap();
        secret.metadata.namespace = Some(namespace.to_string());
        secret.metadata.resource_version = Some(self.bump());
        secret.metadata.uid = Some(format!("secret-uid-{name}"));
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name), secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.lock().unwrap().is_empty()
    }

    pub fn inject_conflicts(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.secret(namespace, name))
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, StoreError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let mut secrets = self.secrets.lock().unwrap();
        let key = (namespace.to_string(), name.clone());
        if secrets.contains_key(&key) {
            return Err(StoreError::Conflict(format!("{name} already exists")));
        }
        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(self.bump());
        stored.metadata.uid = Some(format!("secret-uid-{name}"));
        secrets.insert(key, stored.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn replace(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<Secret, StoreError> {
        let mut secrets = self.secrets.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        let Some(current) = secrets.get_mut(&key) else {
            return Err(StoreError::Conflict(format!("{name} was deleted")));
        };
        if self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            // Simulate a concurrent external write
            current.metadata.resource_version = Some(self.bump());
            return Err(StoreError::Conflict(format!(
                "{name} was modified concurrently"
            )));
        }
        if current.metadata.resource_version != secret.metadata.resource_version {
            return Err(StoreError::Conflict(format!("{name} resourceVersion mismatch")));
        }
        let mut stored = secret.clone();
        stored.metadata.resource_version = Some(self.bump());
        *current = stored.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        uid: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut secrets = self.secrets.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        let Some(current) = secrets.get(&key) else {
            return Ok(false);
        };
        if uid.is_some() && current.metadata.uid.as_deref() != uid {
            return Err(StoreError::Conflict(format!("{name} uid changed")));
        }
        secrets.remove(&key);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Backend answering from scripted queues
///
/// Fetches of all kinds share one queue. With `block_when_empty` an empty
/// queue blocks the call until its context is cancelled or times out.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    fetches: Mutex<VecDeque<Result<CredentialRecord, BackendError>>>,
    renewals: Mutex<VecDeque<Result<LeaseRenewal, BackendError>>>,
    calls: Mutex<Vec<String>>,
    block_when_empty: AtomicBool,
    pub in_flight: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn blocking() -> Arc<Self> {
        let backend = Self::default();
        backend.block_when_empty.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn push_fetch(&self, result: Result<CredentialRecord, BackendError>) {
        self.fetches.lock().unwrap().push_back(result);
    }

    pub fn push_renewal(&self, result: Result<LeaseRenewal, BackendError>) {
        self.renewals.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    async fn next_fetch(
        &self,
        ctx: &CallContext,
        call: String,
    ) -> Result<CredentialRecord, BackendError> {
        self.calls.lock().unwrap().push(call);
        let next = self.fetches.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None if self.block_when_empty.load(Ordering::SeqCst) => {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                let result = ctx
                    .run(
                        "fetch",
                        std::future::pending::<Result<CredentialRecord, BackendError>>(),
                    )
                    .await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                result
            }
            None => Err(BackendError::Unavailable("no scripted response".to_string())),
        }
    }
}

#[async_trait]
impl SecretBackend for ScriptedBackend {
    async fn fetch_dynamic(
        &self,
        ctx: &CallContext,
        mount: &str,
        path: &str,
        _params: Option<&Map<String, Value>>,
    ) -> Result<CredentialRecord, BackendError> {
        self.next_fetch(ctx, format!("fetch_dynamic {mount}/{path}"))
            .await
    }

    async fn read_static(
        &self,
        ctx: &CallContext,
        mount: &str,
        path: &str,
        kv_version: u8,
    ) -> Result<CredentialRecord, BackendError> {
        self.next_fetch(ctx, format!("read_static {mount}/{path} v{kv_version}"))
            .await
    }

    async fn issue_certificate(
        &self,
        ctx: &CallContext,
        mount: &str,
        role: &str,
        common_name: &str,
        _params: &Map<String, Value>,
    ) -> Result<CredentialRecord, BackendError> {
        self.next_fetch(ctx, format!("issue_certificate {mount}/{role} {common_name}"))
            .await
    }

    async fn renew_lease(
        &self,
        _ctx: &CallContext,
        lease_id: &str,
        increment: Option<Duration>,
    ) -> Result<LeaseRenewal, BackendError> {
        self.calls.lock().unwrap().push(format!(
            "renew_lease {lease_id} {}",
            increment.map_or(0, |i| i.as_secs())
        ));
        self.renewals
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Unavailable("no scripted renewal".to_string())))
    }

    async fn revoke_lease(&self, _ctx: &CallContext, lease_id: &str) -> Result<(), BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("revoke_lease {lease_id}"));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecordingReporter {
    statuses: Mutex<Vec<StatusUpdate>>,
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn last_status(&self) -> Option<StatusUpdate> {
        self.statuses.lock().unwrap().last().cloned()
    }

    pub fn clear(&self) {
        self.statuses.lock().unwrap().clear();
        self.events.lock().unwrap().clear();
    }
}

impl StatusReporter for RecordingReporter {
    fn report(&self, _spec: &SpecSnapshot, update: StatusUpdate) {
        self.statuses.lock().unwrap().push(update);
    }

    fn event(&self, _spec: &SpecSnapshot, event: SyncEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn dynamic_record(
    issued_at: DateTime<Utc>,
    lease_id: &str,
    lease_secs: u64,
    renewable: bool,
    password: &str,
) -> CredentialRecord {
    CredentialRecord::from_response(
        json!({
            "request_id": "req-1",
            "lease_id": lease_id,
            "lease_duration": lease_secs,
            "renewable": renewable,
            "data": {"username": "u1", "password": password}
        }),
        ResponseShape::Dynamic,
        issued_at,
    )
    .unwrap()
}

pub fn certificate_record(
    issued_at: DateTime<Utc>,
    serial: &str,
    common_name: &str,
    valid_secs: i64,
) -> CredentialRecord {
    CredentialRecord::from_response(
        json!({
            "data": {
                "certificate": format!("-----BEGIN CERTIFICATE----- CN={common_name}"),
                "private_key": format!("key-{serial}"),
                "issuing_ca": "ca",
                "serial_number": serial,
                "expiration": (issued_at + chrono::Duration::seconds(valid_secs)).timestamp()
            }
        }),
        ResponseShape::Certificate,
        issued_at,
    )
    .unwrap()
}

pub fn static_record(issued_at: DateTime<Utc>, value: &str) -> CredentialRecord {
    CredentialRecord::from_response(
        json!({"data": {"api_key": value}}),
        ResponseShape::KvV1,
        issued_at,
    )
    .unwrap()
}

pub fn dynamic_source() -> SecretSource {
    SecretSource {
        r#type: SourceType::Dynamic,
        mount: "database".to_string(),
        path: Some("creds/readonly".to_string()),
        params: None,
        role: None,
        common_name: None,
        alt_names: Vec::new(),
        ip_sans: Vec::new(),
        ttl: None,
        kv_version: 2,
    }
}

pub fn pki_source(common_name: &str) -> SecretSource {
    SecretSource {
        r#type: SourceType::Pki,
        mount: "pki".to_string(),
        path: None,
        role: Some("web".to_string()),
        common_name: Some(common_name.to_string()),
        ..dynamic_source()
    }
}

pub fn kv_source() -> SecretSource {
    SecretSource {
        r#type: SourceType::Kv,
        mount: "secret".to_string(),
        path: Some("apps/web".to_string()),
        kv_version: 1,
        ..dynamic_source()
    }
}

pub fn snapshot(name: &str, source: SecretSource, create: bool) -> SpecSnapshot {
    SpecSnapshot {
        key: SpecKey::new("apps", name),
        uid: format!("uid-{name}"),
        generation: 1,
        spec: VaultSecretSpec {
            source,
            destination: DestinationConfig {
                name: format!("{name}-secret"),
                namespace: None,
                create,
            },
            refresh: RefreshPolicy::default(),
            suspend: false,
        },
        resync_token: None,
        recorded_lease_id: None,
    }
}

/// Pre-existing Opaque Secret not created by the controller
pub fn foreign_secret(name: &str) -> Secret {
    Secret {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([(
            "stale".to_string(),
            ByteString(b"old".to_vec()),
        )])),
        ..Default::default()
    }
}

pub fn test_settings() -> EngineSettings {
    EngineSettings {
        backoff_base: Duration::from_secs(1),
        backoff_max: Duration::from_secs(60),
        max_fatal_retries: 2,
        max_transient_retries: 0,
        backend_timeout: Duration::from_secs(30),
    }
}

/// Engine wired to in-memory fakes
#[derive(Debug)]
pub struct Harness {
    pub engine: Arc<SyncEngine>,
    pub store: Arc<MemorySecretStore>,
    pub backend: Arc<ScriptedBackend>,
    pub reporter: Arc<RecordingReporter>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(ScriptedBackend::new())
    }

    pub fn with_backend(backend: Arc<ScriptedBackend>) -> Self {
        let store = MemorySecretStore::new();
        let reporter = RecordingReporter::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let writer = DestinationWriter::new(store.clone(), 3);
        let engine = Arc::new(SyncEngine::new(
            backend.clone(),
            writer,
            reporter.clone(),
            clock.clone(),
            test_settings(),
        ));
        Self {
            engine,
            store,
            backend,
            reporter,
            clock,
        }
    }

    pub fn advance(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}

/// Poll `condition` until it holds or five seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
