//! Agent entry point
//!
//! [`Agent::attach`] wires the components to a runtime: it builds the shared
//! state, installs the transformation dispatcher as the runtime's load-time
//! hook and keeps the coordinator for redefinition requests.

use crate::config::AgentConfig;
use crate::manipulation::Manipulation;
use crate::observer::{ChangeObserver, IdentityCache};
use crate::plan::ManipulationPlan;
use crate::redefine::{RedefinitionBatch, Redefiner};
use crate::registry::ManipulationRegistry;
use crate::retrofit::Retrofitter;
use crate::runtime::{CommitReport, Runtime};
use crate::scope::LoadScope;
use crate::side_table::FieldTable;
use crate::state::AgentState;
use crate::transform::Transformer;
use std::sync::Arc;

/// An attached hotswap engine
pub struct Agent {
    state: Arc<AgentState>,
    transformer: Arc<Transformer>,
    retrofitter: Arc<Retrofitter>,
    redefiner: Redefiner,
}

impl Agent {
    /// Attach to `runtime`
    ///
    /// `HOTSWAP_DUMP_DIR` takes precedence over `config.dump_directory`.
    pub fn attach(runtime: Arc<dyn Runtime>, config: AgentConfig) -> crate::Result<Self> {
        let config = config.with_env_overrides();
        config.validate()?;
        let state = Arc::new(AgentState::new(config));
        let retrofitter = Arc::new(Retrofitter::new(state.clone(), runtime.clone()));
        let transformer = Arc::new(Transformer::new(state.clone(), Some(retrofitter.clone())));
        let redefiner = Redefiner::new(state.clone(), runtime.clone(), transformer.clone());

        runtime.register_transformer(transformer.clone());
        tracing::info!(
            retrofit_scopes = state.config().retrofit_scopes,
            dump_directory = %state.config().effective_dump_directory().display(),
            "hotswap agent attached"
        );

        Ok(Self {
            state,
            transformer,
            retrofitter,
            redefiner,
        })
    }

    /// Apply a redefinition batch
    pub fn redefine(&self, batch: &RedefinitionBatch) -> crate::Result<CommitReport> {
        Ok(self.redefiner.redefine(batch)?)
    }

    /// Install a manipulation for `type_name`
    pub fn install(&self, type_name: &str, manipulation: Manipulation) -> bool {
        self.state.registry().add(type_name, manipulation)
    }

    /// Install every manipulation of `plan`, owned by `scope`
    ///
    /// Returns the number of newly added manipulations.
    pub fn install_plan(
        &self,
        plan: &ManipulationPlan,
        scope: Option<&Arc<LoadScope>>,
    ) -> crate::Result<usize> {
        let manipulations = plan.to_manipulations(scope)?;
        Ok(manipulations
            .into_iter()
            .filter(|(type_name, manipulation)| self.install(type_name, manipulation.clone()))
            .count())
    }

    /// Forget everything held for scopes that are no longer reachable
    ///
    /// Also runs at the start of every redefinition.
    pub fn sweep(&self) -> usize {
        self.state.sweep()
    }

    /// Manipulation registry
    pub fn registry(&self) -> &ManipulationRegistry {
        self.state.registry()
    }

    /// Shared state
    pub fn state(&self) -> &Arc<AgentState> {
        &self.state
    }

    /// Register a change observer
    pub fn add_observer(&self, observer: Arc<dyn ChangeObserver>) {
        self.state.add_observer(observer);
    }

    /// Register an identity-keyed cache flushed after every commit
    pub fn add_identity_cache(&self, cache: Arc<dyn IdentityCache>) {
        self.state.add_identity_cache(cache);
    }

    /// Load-time dispatcher registered with the runtime
    pub fn transformer(&self) -> &Arc<Transformer> {
        &self.transformer
    }

    /// Scope retrofitter
    pub fn retrofitter(&self) -> &Arc<Retrofitter> {
        &self.retrofitter
    }

    /// Added-field side-table
    pub fn field_table(&self) -> &Arc<FieldTable> {
        self.state.field_table()
    }
}
