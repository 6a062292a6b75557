//! Generation lifecycle: install, activate, prune.
//!
//! Each generation kind moves through
//! `Uninitialized → Seeding → Current → Retiring → Destroyed`.
//! The configured ids of this deployment become `Current` at install; any
//! other id found in the store at activate is retired and destroyed.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Error;
use crate::config::GenerationsConfig;
use crate::identity::RequestIdentity;
use crate::network::Fetcher;
use crate::store::CacheDb;

/// Which family of content a generation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    /// App shell: seeded from the manifest at install.
    #[default]
    Static,
    /// Runtime data: starts empty, filled by strategies.
    Dynamic,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GenerationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(Self::Static),
            "dynamic" => Ok(Self::Dynamic),
            other => Err(format!("unknown generation kind: {other}")),
        }
    }
}

/// Lifecycle state of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Uninitialized,
    Seeding,
    Current,
    Retiring,
    Destroyed,
}

impl GenerationState {
    pub fn can_transition_to(self, next: GenerationState) -> bool {
        use GenerationState::*;
        matches!(
            (self, next),
            (Uninitialized, Seeding)
                | (Seeding, Current)
                | (Seeding, Uninitialized)
                | (Current, Retiring)
                | (Retiring, Destroyed)
        )
    }
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Seeding => "seeding",
            Self::Current => "current",
            Self::Retiring => "retiring",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Slots {
    states: HashMap<GenerationKind, GenerationState>,
    /// Lifecycle of ids pruned by this manager.
    stale: BTreeMap<String, GenerationState>,
}

impl Slots {
    fn transition(&mut self, kind: GenerationKind, to: GenerationState) -> Result<GenerationState, Error> {
        let from = self.states.get(&kind).copied().unwrap_or(GenerationState::Uninitialized);
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { kind: kind.to_string(), from: from.to_string(), to: to.to_string() });
        }
        self.states.insert(kind, to);
        Ok(from)
    }

    /// A generation seeded by an earlier process. There is no direct
    /// Uninitialized -> Current edge; resume walks through Seeding.
    fn resume(&mut self, kind: GenerationKind) -> Result<(), Error> {
        self.transition(kind, GenerationState::Seeding)?;
        self.transition(kind, GenerationState::Current)?;
        Ok(())
    }

    fn transition_stale(&mut self, id: &str, to: GenerationState) -> Result<(), Error> {
        // an id destroyed earlier may have been recreated by another host
        let from = match self.stale.get(id) {
            None | Some(GenerationState::Destroyed) => GenerationState::Current,
            Some(state) => *state,
        };
        // a failed deletion leaves the id Retiring; the next activate retries it
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { kind: id.to_string(), from: from.to_string(), to: to.to_string() });
        }
        self.stale.insert(id.to_string(), to);
        Ok(())
    }
}

/// Owns the generation ids of the running deployment.
///
/// All state lives behind one lock, so a reader never sees two current
/// generations of the same kind.
#[derive(Debug)]
pub struct GenerationManager {
    db: CacheDb,
    static_id: String,
    dynamic_id: Option<String>,
    slots: RwLock<Slots>,
}

impl GenerationManager {
    pub fn new(db: CacheDb, static_id: impl Into<String>, dynamic_id: Option<String>) -> Self {
        let mut states = HashMap::new();
        states.insert(GenerationKind::Static, GenerationState::Uninitialized);
        if dynamic_id.is_some() {
            states.insert(GenerationKind::Dynamic, GenerationState::Uninitialized);
        }
        Self {
            db,
            static_id: static_id.into(),
            dynamic_id,
            slots: RwLock::new(Slots { states, stale: BTreeMap::new() }),
        }
    }

    pub fn from_config(db: CacheDb, config: &GenerationsConfig) -> Self {
        Self::new(db, config.static_name.clone(), config.dynamic_name.clone())
    }

    /// Configured id for `kind`, whatever its state.
    pub fn id(&self, kind: GenerationKind) -> Option<&str> {
        match kind {
            GenerationKind::Static => Some(&self.static_id),
            GenerationKind::Dynamic => self.dynamic_id.as_deref(),
        }
    }

    fn configured(&self) -> impl Iterator<Item = (GenerationKind, &str)> {
        [GenerationKind::Static, GenerationKind::Dynamic]
            .into_iter()
            .filter_map(|kind| self.id(kind).map(|id| (kind, id)))
    }

    pub async fn state(&self, kind: GenerationKind) -> GenerationState {
        let slots = self.slots.read().await;
        slots.states.get(&kind).copied().unwrap_or(GenerationState::Uninitialized)
    }

    /// Id of the current generation of `kind`, if any.
    pub async fn current_id(&self, kind: GenerationKind) -> Option<String> {
        let slots = self.slots.read().await;
        match slots.states.get(&kind) {
            Some(GenerationState::Current) => self.id(kind).map(str::to_string),
            _ => None,
        }
    }

    /// Current generation ids in lookup order: static first, then dynamic.
    pub async fn current_ids(&self) -> Vec<String> {
        let slots = self.slots.read().await;
        self.configured()
            .filter(|(kind, _)| slots.states.get(kind) == Some(&GenerationState::Current))
            .map(|(_, id)| id.to_string())
            .collect()
    }

    /// State of an id retired by [`GenerationManager::activate`].
    pub async fn stale_state(&self, id: &str) -> Option<GenerationState> {
        self.slots.read().await.stale.get(id).copied()
    }

    /// Seed the static generation from `manifest` and register the dynamic one.
    ///
    /// Both kinds become current together or not at all. Installing again
    /// while already current re-seeds in place; the manifest write is
    /// overwrite-idempotent.
    pub async fn install(&self, manifest: &[RequestIdentity], fetcher: &dyn Fetcher) -> Result<(), Error> {
        let pending: Vec<GenerationKind> = {
            let mut slots = self.slots.write().await;
            let kinds: Vec<GenerationKind> = self
                .configured()
                .map(|(kind, _)| kind)
                .filter(|kind| slots.states.get(kind) != Some(&GenerationState::Current))
                .collect();
            for kind in &kinds {
                slots.transition(*kind, GenerationState::Seeding)?;
            }
            kinds
        };

        let result = self.seed_all(manifest, fetcher).await;

        let mut slots = self.slots.write().await;
        let to = if result.is_ok() { GenerationState::Current } else { GenerationState::Uninitialized };
        for kind in &pending {
            slots.transition(*kind, to)?;
        }

        match &result {
            Ok(()) => tracing::info!(
                static_id = %self.static_id,
                dynamic_id = self.dynamic_id.as_deref().unwrap_or("-"),
                "install complete"
            ),
            Err(e) => tracing::error!(static_id = %self.static_id, "install failed: {e}"),
        }
        result
    }

    async fn seed_all(&self, manifest: &[RequestIdentity], fetcher: &dyn Fetcher) -> Result<(), Error> {
        let companions: Vec<(&str, GenerationKind)> =
            self.dynamic_id.as_deref().map(|id| (id, GenerationKind::Dynamic)).into_iter().collect();

        self.db
            .seed_with(&self.static_id, GenerationKind::Static, manifest, fetcher, &companions)
            .await?;
        Ok(())
    }

    /// Mark configured generations already present in the store as current.
    ///
    /// Lets a restarted host skip install. Like install this is all or
    /// nothing: unless every configured id is stored, no kind resumes.
    /// Returns the kinds that resumed.
    pub async fn resume(&self) -> Result<Vec<GenerationKind>, Error> {
        let mut missing = Vec::new();
        for (_, id) in self.configured() {
            if !self.db.has_generation(id).await? {
                missing.push(id);
            }
        }
        if !missing.is_empty() {
            tracing::debug!(?missing, "generations not installed, nothing to resume");
            return Ok(Vec::new());
        }

        let mut slots = self.slots.write().await;
        let mut resumed = Vec::new();
        for (kind, _) in self.configured() {
            if slots.states.get(&kind) == Some(&GenerationState::Uninitialized) {
                slots.resume(kind)?;
                resumed.push(kind);
            }
        }
        if !resumed.is_empty() {
            tracing::debug!(?resumed, "resumed generations from store");
        }
        Ok(resumed)
    }

    /// Delete every stored generation that is not current.
    ///
    /// Requires a current static generation. Every stale id is attempted; the
    /// first deletion error is returned after the rest have run. Returns the
    /// ids that were destroyed.
    pub async fn activate(&self) -> Result<Vec<String>, Error> {
        let keep = {
            let slots = self.slots.read().await;
            let state = slots.states.get(&GenerationKind::Static).copied().unwrap_or(GenerationState::Uninitialized);
            if state != GenerationState::Current {
                return Err(Error::InvalidTransition {
                    kind: GenerationKind::Static.to_string(),
                    from: state.to_string(),
                    to: "active".into(),
                });
            }
            self.configured()
                .filter(|(kind, _)| slots.states.get(kind) == Some(&GenerationState::Current))
                .map(|(_, id)| id.to_string())
                .collect::<Vec<_>>()
        };

        let stale: Vec<String> = self
            .db
            .list_generation_ids()
            .await?
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();

        let mut destroyed = Vec::with_capacity(stale.len());
        let mut first_error = None;

        for id in stale {
            self.slots.write().await.transition_stale(&id, GenerationState::Retiring)?;
            tracing::info!(generation = %id, "removing stale generation");

            match self.db.delete_generation(&id).await {
                Ok(entries) => {
                    self.slots.write().await.transition_stale(&id, GenerationState::Destroyed)?;
                    tracing::debug!(generation = %id, entries, "stale generation destroyed");
                    destroyed.push(id);
                }
                Err(e) => {
                    tracing::warn!(generation = %id, "failed to remove stale generation: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(destroyed),
        }
    }
}
