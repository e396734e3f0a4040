//! Client facade: owns the schema slot, the accumulating batch, and the
//! drain scheduler, and exposes the mutation and query entry points.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use parking_lot::RwLock;

use crate::config::ClientConfig;
use crate::decode::{decode_items, Item};
use crate::drain::{DrainScheduler, OpHandle, SealedWork};
use crate::encode::opcode::STALE_SENTINEL;
use crate::encode::{Encoded, MutationEncoder, PendingBatch};
use crate::engine::EngineBoundary;
use crate::error::{Result, UmbraError};
use crate::query::{CompiledQuery, QueryBuilder};
use crate::schema::{Schema, SchemaDecl};
use crate::types::{NodeId, Payload, SchemaHash, Value};

struct Inner {
    config: ClientConfig,
    engine: Arc<dyn EngineBoundary>,
    schema: RwLock<Option<Arc<Schema>>>,
    active: Arc<StdMutex<Option<PendingBatch>>>,
    epoch: Arc<AtomicU64>,
    scheduler: DrainScheduler,
}

/// The client-side data layer: encodes mutations, compiles queries,
/// decodes results, and drives the engine boundary.
#[derive(Clone)]
pub struct Umbra {
    inner: Arc<Inner>,
}

impl Umbra {
    /// Opens a client over an engine boundary. No mutation or query is
    /// accepted until a schema is loaded.
    pub fn open(config: ClientConfig, engine: Arc<dyn EngineBoundary>) -> Self {
        let active: Arc<StdMutex<Option<PendingBatch>>> = Arc::new(StdMutex::new(None));
        let epoch = Arc::new(AtomicU64::new(0));
        let scheduler = DrainScheduler::spawn(
            Arc::clone(&engine),
            Arc::clone(&active),
            Arc::clone(&epoch),
            config.drain_interval_ms,
        );
        Self {
            inner: Arc::new(Inner {
                config,
                engine,
                schema: RwLock::new(None),
                active,
                epoch,
                scheduler,
            }),
        }
    }

    /// Compiles and installs a schema. Every accumulating or in-flight
    /// batch is cancelled atomically: their handles settle with
    /// `SchemaChanged` and none of their bytes reach the engine.
    pub fn set_schema(&self, decl: &SchemaDecl) -> Result<SchemaHash> {
        let schema = Arc::new(Schema::compile(decl)?);
        let hash = schema.hash();

        // Bump the epoch first so the drain worker refuses anything sealed
        // under the old schema, then cancel the accumulating batch.
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        {
            let mut guard = self.inner.active.lock().expect("active batch lock poisoned");
            if let Some(batch) = guard.take() {
                batch.cancel(UmbraError::SchemaChanged);
            }
        }
        *self.inner.schema.write() = Some(schema);
        tracing::debug!(%hash, "schema installed");
        Ok(hash)
    }

    /// The installed schema.
    pub fn schema(&self) -> Result<Arc<Schema>> {
        self.inner
            .schema
            .read()
            .clone()
            .ok_or_else(|| UmbraError::invalid("no schema loaded"))
    }

    fn with_encoder<F>(&self, mut op: F) -> Result<OpHandle>
    where
        F: FnMut(&mut MutationEncoder<'_>) -> Result<Encoded>,
    {
        let schema = self.schema()?;
        let mut guard = self.inner.active.lock().expect("active batch lock poisoned");
        for _ in 0..2 {
            let epoch = self.inner.epoch.load(Ordering::Acquire);
            let batch = guard.get_or_insert_with(|| {
                PendingBatch::new(schema.hash(), self.inner.config.buffer_ceiling, epoch)
            });
            let mut encoder = MutationEncoder::new(&schema, batch, &self.inner.config)?;
            match op(&mut encoder)? {
                Encoded::Done(handle) => {
                    if self.inner.config.drain_interval_ms == 0 {
                        self.flush_locked(&mut guard);
                    }
                    return Ok(handle);
                }
                Encoded::NeedsFlush => {
                    // Hard-flush and retry against a fresh buffer; a
                    // second NeedsFlush is impossible because the fit
                    // check already ruled out TooLarge.
                    self.flush_locked(&mut guard);
                }
            }
        }
        Err(UmbraError::Corruption("encode retry did not converge"))
    }

    /// Seals and submits the accumulating batch. Runs under the active
    /// lock so the worker's timer path cannot reorder around it.
    fn flush_locked(&self, guard: &mut Option<PendingBatch>) {
        let Some(batch) = guard.take() else {
            return;
        };
        if batch.is_empty() {
            return;
        }
        let batch_epoch = batch.epoch();
        if batch_epoch != self.inner.epoch.load(Ordering::Acquire) {
            batch.cancel(UmbraError::SchemaChanged);
            return;
        }
        match batch.seal() {
            Ok((frame, handles)) => {
                self.inner
                    .scheduler
                    .submit(SealedWork::new(frame, handles, batch_epoch));
            }
            Err(err) => tracing::warn!(%err, "sealing batch failed"),
        }
    }

    /// Creates a node; the handle settles with its engine-final id.
    pub fn create(&self, type_name: &str, payload: Payload) -> Result<OpHandle> {
        self.with_encoder(|enc| enc.create(type_name, &payload))
    }

    /// Creates a node under a caller-chosen id (unsafe mode).
    pub fn create_with_id(
        &self,
        type_name: &str,
        id: NodeId,
        payload: Payload,
    ) -> Result<OpHandle> {
        self.with_encoder(|enc| enc.create_with_id(type_name, id, &payload))
    }

    /// Creates-or-merges keyed by an alias property in the payload.
    pub fn upsert(&self, type_name: &str, payload: Payload) -> Result<OpHandle> {
        self.with_encoder(|enc| enc.upsert(type_name, &payload))
    }

    /// Patches an existing node.
    pub fn update(&self, type_name: &str, id: NodeId, payload: Payload) -> Result<OpHandle> {
        self.with_encoder(|enc| enc.update(type_name, id, &payload))
    }

    /// Deletes a node.
    pub fn delete(&self, type_name: &str, id: NodeId) -> Result<OpHandle> {
        self.with_encoder(|enc| enc.delete(type_name, id))
    }

    /// Schedules expiry in `ttl_secs` seconds.
    pub fn expire(&self, type_name: &str, id: NodeId, ttl_secs: u32) -> Result<OpHandle> {
        self.with_encoder(|enc| enc.expire(type_name, id, ttl_secs))
    }

    /// Applies a signed delta to a fixed numeric property.
    pub fn increment(
        &self,
        type_name: &str,
        id: NodeId,
        path: &str,
        delta: impl Into<Value>,
    ) -> Result<OpHandle> {
        let delta = delta.into();
        self.with_encoder(|enc| enc.increment(type_name, id, path, delta.clone()))
    }

    /// Drops the engine-side sort index for one property.
    pub fn delete_sort_index(&self, type_name: &str, path: &str) -> Result<OpHandle> {
        self.with_encoder(|enc| enc.delete_sort_index(type_name, path))
    }

    /// Seals the accumulating batch and blocks until everything queued so
    /// far has settled at the engine.
    pub fn drain(&self) {
        {
            let mut guard = self.inner.active.lock().expect("active batch lock poisoned");
            self.flush_locked(&mut guard);
        }
        self.inner.scheduler.barrier();
    }

    /// Starts a query over one type.
    pub fn query(&self, type_name: impl Into<String>) -> QueryBuilder {
        QueryBuilder::new(type_name)
    }

    /// Compiles and executes a query, decoding the result buffer.
    pub fn run_query(&self, builder: QueryBuilder) -> Result<Vec<Item>> {
        let schema = self.schema()?;
        let compiled =
            builder.compile_with_threshold(&schema, self.inner.config.inline_set_threshold)?;
        self.run_compiled(&compiled)
    }

    /// Executes already-compiled byte-code. Surfaces the engine's stale
    /// sentinel as `StaleQuery`; the caller recompiles and resends.
    pub fn run_compiled(&self, compiled: &CompiledQuery) -> Result<Vec<Item>> {
        let response = self.inner.engine.query(&compiled.bytes)?;
        if response.len() == 1 && response[0] == STALE_SENTINEL {
            return Err(UmbraError::StaleQuery);
        }
        decode_items(&compiled.root, &compiled.include, &response)
    }
}

impl QueryBuilder {
    /// Compiles against the client's schema and runs in one step.
    pub fn run(self, db: &Umbra) -> Result<Vec<Item>> {
        db.run_query(self)
    }
}
