//! The engine facade: owns both registries and the naming contexts and runs
//! read and write transactions against them.
//!
//! # Examples
//!
//! ```
//! use treeconf::config::EngineConfig;
//! use treeconf::engine::Engine;
//! use treeconf::schema::Schema;
//!
//! let engine = Engine::builder(&Schema::new(), EngineConfig::default())
//!     .build()
//!     .unwrap();
//! assert!(engine.reader_order().is_empty());
//! ```
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::context::{ReadContext, WriteContext, WriteScope};
use crate::data::Node;
use crate::error::{AppliedWrite, EngineError, NamingError};
use crate::logging::{Logger, StepEntry};
use crate::naming::{NamingContext, NamingContexts};
use crate::path::{Key, NodePath};
use crate::read::{ReaderRegistry, ReaderRegistryBuilder};
use crate::schema::{NavigationTable, Schema};
use crate::write::{PlannedWrite, WriterRegistry, WriterRegistryBuilder};

/// Outcome of a successful write transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// Transaction id.
    pub transaction: u64,
    /// Executed steps in order.
    pub applied: Vec<AppliedWrite>,
    /// Step log of the transaction.
    pub steps: Vec<StepEntry>,
    /// Identity mapping changes made durable at commit.
    pub mappings_committed: usize,
}

/// Assembles an [`Engine`].
///
/// Customizers are registered through [`readers`](Self::readers) and
/// [`writers`](Self::writers); both share one [`NavigationTable`] built
/// from the schema.
#[derive(Debug)]
pub struct EngineBuilder {
    config: EngineConfig,
    nav: Arc<NavigationTable>,
    readers: ReaderRegistryBuilder,
    writers: WriterRegistryBuilder,
    naming: Option<NamingContexts>,
}

impl EngineBuilder {
    /// Builder for trees described by `schema`.
    #[must_use]
    pub fn new(schema: &Schema, config: EngineConfig) -> Self {
        let nav = Arc::new(NavigationTable::build(schema));
        Self {
            readers: ReaderRegistryBuilder::new(Arc::clone(&nav))
                .parallel_list_reads(config.engine.parallel_list_reads),
            writers: WriterRegistryBuilder::new(Arc::clone(&nav)),
            nav,
            config,
            naming: None,
        }
    }

    /// The navigation table shared by readers and writers.
    #[must_use]
    pub const fn nav(&self) -> &Arc<NavigationTable> {
        &self.nav
    }

    /// Reader registrations.
    pub const fn readers(&mut self) -> &mut ReaderRegistryBuilder {
        &mut self.readers
    }

    /// Writer registrations.
    pub const fn writers(&mut self) -> &mut WriterRegistryBuilder {
        &mut self.writers
    }

    /// Use these naming contexts instead of the ones described by the
    /// configuration.
    #[must_use]
    pub fn naming_contexts(mut self, contexts: NamingContexts) -> Self {
        self.naming = Some(contexts);
        self
    }

    /// Validate registrations and open the mapping store.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Registration`] if a reader does not fit the schema.
    /// - [`EngineError::Config`] if the configuration is invalid or the
    ///   store cannot be opened.
    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;
        let naming = match self.naming {
            Some(contexts) => contexts,
            None => {
                let store = self.config.open_store()?;
                self.config.naming_contexts(&store)
            }
        };
        let readers = self.readers.build()?;
        let writers = self.writers.build();
        info!(
            target: "treeconf::engine",
            readers = readers.order().len(),
            writers = writers.order().len(),
            scopes = naming.scopes().len(),
            "engine ready"
        );
        Ok(Engine {
            readers,
            writers,
            nav: self.nav,
            naming,
            reply_timeout: self.config.reply_timeout(),
            next_transaction: AtomicU64::new(0),
        })
    }
}

/// Composite reader, composite writer and identity maps behind one API.
///
/// The engine is `Sync`; transactions may run from several threads.
#[derive(Debug)]
pub struct Engine {
    readers: ReaderRegistry,
    writers: WriterRegistry,
    nav: Arc<NavigationTable>,
    naming: NamingContexts,
    reply_timeout: Duration,
    next_transaction: AtomicU64,
}

impl Engine {
    /// Start assembling an engine.
    #[must_use]
    pub fn builder(schema: &Schema, config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(schema, config)
    }

    fn begin(&self) -> u64 {
        self.next_transaction.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Read the subtree at `path`; `None` when nothing is configured there.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Read`]; see [`ReaderRegistry::read`].
    pub fn read(&self, path: &NodePath) -> Result<Option<Node>, EngineError> {
        let tx = self.begin();
        debug!(target: "treeconf::engine", tx, path = %path, "read");
        let ctx = ReadContext::new(tx, &self.naming, self.reply_timeout);
        Ok(self.readers.read(path, &ctx)?)
    }

    /// Read the whole tree.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Read`] if a customizer fails.
    pub fn read_all(&self) -> Result<Node, EngineError> {
        let tx = self.begin();
        debug!(target: "treeconf::engine", tx, "read all");
        let ctx = ReadContext::new(tx, &self.naming, self.reply_timeout);
        Ok(self.readers.read_all(&ctx)?)
    }

    /// Keys of every element of the list at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Read`]; see [`ReaderRegistry::list_keys`].
    pub fn list_keys(&self, path: &NodePath) -> Result<Vec<Key>, EngineError> {
        let tx = self.begin();
        let ctx = ReadContext::new(tx, &self.naming, self.reply_timeout);
        Ok(self.readers.list_keys(path, &ctx)?)
    }

    /// The steps a write would execute, without executing them.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Write`]; see [`WriterRegistry::plan`].
    pub fn plan(
        &self,
        base: &NodePath,
        before: Option<&Node>,
        after: Option<&Node>,
    ) -> Result<Vec<PlannedWrite>, EngineError> {
        Ok(self.writers.plan(base, before, after)?)
    }

    /// Apply the difference between `before` and `after`, both rooted at
    /// `base`.
    ///
    /// Identity mapping changes made by writers become durable when the
    /// transaction ends. If a step fails, the changes of the steps that
    /// completed are still committed, since their device effects remain.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Write`] if the data cannot be planned.
    /// - [`EngineError::WritePlan`] if a step fails.
    /// - [`EngineError::Naming`] if the mapping store rejects the commit.
    pub fn write(
        &self,
        base: &NodePath,
        before: Option<&Node>,
        after: Option<&Node>,
    ) -> Result<WriteReport, EngineError> {
        let tx = self.begin();
        let log = Logger::new(tx);
        log.stage(&format!("write {base}"));

        let scope = WriteScope {
            base,
            before,
            after,
            nav: &self.nav,
            naming: &self.naming,
        };
        let mut ctx = WriteContext::new(tx, scope, &log, self.reply_timeout);
        let result = self.writers.write(base, before, after, &mut ctx);
        let committed = ctx.into_mappings().commit(&self.naming);
        let summary = log.summary();

        match (result, committed) {
            (Ok(applied), Ok(mappings_committed)) => Ok(WriteReport {
                transaction: tx,
                applied,
                steps: log.steps(),
                mappings_committed,
            }),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), committed) => {
                if let Err(commit_error) = committed {
                    warn!(
                        target: "treeconf::engine",
                        tx,
                        error = %commit_error,
                        "mapping commit failed after aborted plan"
                    );
                }
                log.error(&format!("transaction aborted ({summary}): {e}"));
                Err(e)
            }
        }
    }

    /// Identity map of `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::UnknownScope`] if the scope is not configured.
    pub fn naming(&self, scope: &str) -> Result<&NamingContext, NamingError> {
        self.naming.get(scope).map(Arc::as_ref)
    }

    /// All naming contexts.
    #[must_use]
    pub const fn naming_contexts(&self) -> &NamingContexts {
        &self.naming
    }

    /// Node types with a reader, in dispatch order.
    #[must_use]
    pub fn reader_order(&self) -> Vec<&NodePath> {
        self.readers.order()
    }

    /// Node types with a writer, in create/update order.
    #[must_use]
    pub fn writer_order(&self) -> Vec<&NodePath> {
        self.writers.order()
    }
}
