//! Process-wide pipeline context.
//!
//! Holds settings plus the store and inference client, both built lazily on
//! first use and reused afterwards. Construction runs under an init lock,
//! so callers racing on first use share one instance.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::info;

use crate::config::Settings;
use crate::ingest::{IngestReport, Ingestor, TenantContext, UploadSummary};
use crate::pipeline::inference::{InferenceClient, OpenAiClient};
use crate::pipeline::{CancellationFlag, ConversionResult, Converter, IngestError};
use crate::schema::Entity;
use crate::store::{SqliteStore, Store};

pub struct PipelineContext {
    settings: Settings,
    store: OnceLock<Arc<dyn Store>>,
    inference: OnceLock<Arc<dyn InferenceClient>>,
    init: Mutex<()>,
}

impl PipelineContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            store: OnceLock::new(),
            inference: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// Context with components supplied up front (tests, embedding).
    pub fn with_components(
        settings: Settings,
        store: Arc<dyn Store>,
        inference: Arc<dyn InferenceClient>,
    ) -> Self {
        let ctx = Self::new(settings);
        let _ = ctx.store.set(store);
        let _ = ctx.inference.set(inference);
        ctx
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The shared store, opened and migrated on first call.
    pub fn store(&self) -> Result<Arc<dyn Store>, IngestError> {
        if let Some(store) = self.store.get() {
            return Ok(Arc::clone(store));
        }
        let _guard = self.init_guard();
        if let Some(store) = self.store.get() {
            return Ok(Arc::clone(store));
        }
        let path = &self.settings.database_path;
        let opened: Arc<dyn Store> = Arc::new(SqliteStore::open(path)?);
        info!(path = %path.display(), "Store opened");
        Ok(Arc::clone(self.store.get_or_init(|| opened)))
    }

    /// The shared inference client. Fails with a configuration error when
    /// no API key is set.
    pub fn inference(&self) -> Result<Arc<dyn InferenceClient>, IngestError> {
        if let Some(client) = self.inference.get() {
            return Ok(Arc::clone(client));
        }
        let _guard = self.init_guard();
        if let Some(client) = self.inference.get() {
            return Ok(Arc::clone(client));
        }
        let api_key = self.settings.require_api_key()?;
        let client = OpenAiClient::new(
            &self.settings.inference_base_url,
            api_key,
            &self.settings.inference_model,
            self.settings.inference_timeout_secs,
        )?;
        info!(
            model = %self.settings.inference_model,
            base_url = %self.settings.inference_base_url,
            "Inference client ready"
        );
        let client: Arc<dyn InferenceClient> = Arc::new(client);
        Ok(Arc::clone(self.inference.get_or_init(|| client)))
    }

    /// The guarded value is `()`, so a poisoned lock carries no bad state.
    fn init_guard(&self) -> MutexGuard<'_, ()> {
        self.init.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Phase 1, phase 2 and coercion for one file.
    pub fn convert(
        &self,
        bytes: &[u8],
        target: Option<Entity>,
        cancel: &CancellationFlag,
    ) -> Result<ConversionResult, IngestError> {
        let client = self.inference()?;
        Converter::new(client.as_ref())
            .with_batch_size(self.settings.batch_size)
            .convert(bytes, target, cancel)
    }

    /// Persist already converted records.
    pub fn ingest(
        &self,
        conversion: &ConversionResult,
        tenant: &TenantContext,
        cancel: &CancellationFlag,
    ) -> Result<IngestReport, IngestError> {
        let store = self.store()?;
        Ok(Ingestor::new(store.as_ref())
            .with_source_rows(&conversion.source_rows)
            .ingest(
            conversion.entity,
            &conversion.records,
            tenant,
            cancel,
        ))
    }

    /// Convert then ingest, returning the caller-facing summary.
    ///
    /// Both components are resolved before any work starts, so a
    /// configuration error never leaves a partial upload behind.
    pub fn upload(
        &self,
        bytes: &[u8],
        target: Option<Entity>,
        tenant: &TenantContext,
        cancel: &CancellationFlag,
    ) -> Result<UploadSummary, IngestError> {
        self.store()?;
        self.inference()?;
        let conversion = self.convert(bytes, target, cancel)?;
        let report = self.ingest(&conversion, tenant, cancel)?;
        Ok(UploadSummary::new(&conversion, &report))
    }
}
