//! Static command-kind dispatch.
//!
//! Commands carry no payload through the engine, only an id. An application
//! that runs several kinds of work behind one queue declares the supported
//! kinds up front: the [`Dispatcher`] is built at startup from explicit
//! `(kind, handler)` pairs and resolves a command's kind through a
//! [`CommandCatalog`] lookup, never through runtime type inspection. An
//! unresolvable or unregistered kind is an ordinary execute failure and goes
//! through the normal retry path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::records::CommandId;
use crate::worker::{ExecuteError, Executor};

/// Resolves a command id to its declared kind tag. Backed by whatever the
/// application stores command payloads in; out of scope for the engine.
#[async_trait]
pub trait CommandCatalog: Send + Sync {
    async fn kind_of(&self, command: CommandId) -> Result<String, ExecuteError>;
}

/// Executor that routes each command to the handler registered for its kind.
pub struct Dispatcher {
    catalog: Arc<dyn CommandCatalog>,
    handlers: HashMap<String, Arc<dyn Executor>>,
}

impl Dispatcher {
    pub fn builder(catalog: Arc<dyn CommandCatalog>) -> DispatcherBuilder {
        DispatcherBuilder {
            catalog,
            handlers: HashMap::new(),
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[async_trait]
impl Executor for Dispatcher {
    async fn execute(&self, command: CommandId) -> Result<(), ExecuteError> {
        let kind = self.catalog.kind_of(command).await?;
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| format!("no handler registered for command kind '{}'", kind))?;
        handler.execute(command).await
    }
}

/// Startup-time builder for the dispatch table.
pub struct DispatcherBuilder {
    catalog: Arc<dyn CommandCatalog>,
    handlers: HashMap<String, Arc<dyn Executor>>,
}

impl DispatcherBuilder {
    /// Register the handler for one command kind. Last registration wins.
    pub fn handler(mut self, kind: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        self.handlers.insert(kind.into(), executor);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            catalog: self.catalog,
            handlers: self.handlers,
        }
    }
}
