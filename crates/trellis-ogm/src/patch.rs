//! Versioned one-time schema and data patches.
//!
//! Patches are ordered by version, then by priority, and each runs in its own
//! transaction. The graph remembers where it is on a singleton
//! `SchemaVersion` node: the last version reached and the keys of every patch
//! applied so far, so a patch never runs twice even when a later patch of the
//! same version failed.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;

use trellis_core::{NodeId, OgmError, Properties, Value};
use trellis_graph::{GraphStore, GraphTxn, NodeQuery};

use crate::mapper::Mapper;
use crate::session::Session;

const SCHEMA_LABEL: &str = "SchemaVersion";

/// `major.minor.patch`; missing trailing components read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PatchError::InvalidVersion(s.to_string());
        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        match parts.as_slice() {
            [major] => Ok(Self::new(*major, 0, 0)),
            [major, minor] => Ok(Self::new(*major, *minor, 0)),
            [major, minor, patch] => Ok(Self::new(*major, *minor, *patch)),
            _ => Err(invalid()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("patch {patch} for version {version} failed")]
    Failed {
        patch: String,
        version: Version,
        #[source]
        source: OgmError,
    },

    #[error(transparent)]
    Store(#[from] OgmError),

    #[error("invalid version \"{0}\"")]
    InvalidVersion(String),
}

/// A one-time migration step.
#[async_trait]
pub trait Patch<S: GraphStore>: Send + Sync {
    fn version(&self) -> Version;

    /// Orders patches of the same version, lower first.
    fn priority(&self) -> i32 {
        0
    }

    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }

    /// Apply the patch inside `session`. The scheduler commits it.
    async fn update(&self, mapper: &Mapper<S>, session: &mut Session<S::Txn>) -> trellis_core::Result<()>;
}

fn patch_key<S: GraphStore>(patch: &dyn Patch<S>) -> String {
    format!("{}#{}#{}", patch.version(), patch.priority(), patch.name())
}

/// Outcome of one scheduler run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatchReport {
    pub from: Version,
    pub to: Version,
    pub applied: Vec<String>,
    /// Patches in the window that an earlier run already applied.
    pub skipped: Vec<String>,
}

/// Stored migration state on the `SchemaVersion` node.
#[derive(Debug, Default)]
struct SchemaState {
    node: Option<NodeId>,
    version: Version,
    applied: Vec<String>,
}

impl SchemaState {
    async fn load<T: GraphTxn>(txn: &mut T) -> Result<Self, PatchError> {
        let query = NodeQuery::label(SCHEMA_LABEL).window(0, Some(1));
        let Some(node) = txn.find(&query).await.map_err(OgmError::from)?.into_iter().next() else {
            return Ok(Self::default());
        };
        let version = match node.properties.get("version").and_then(Value::as_str) {
            Some(raw) => raw.parse()?,
            None => Version::default(),
        };
        let applied = match node.properties.get("applied") {
            Some(Value::List(keys)) => keys.iter().filter_map(Value::as_str).map(str::to_string).collect(),
            _ => Vec::new(),
        };
        Ok(Self {
            node: Some(node.id),
            version,
            applied,
        })
    }

    async fn store<T: GraphTxn>(&mut self, txn: &mut T) -> Result<(), PatchError> {
        let version = Value::from(self.version.to_string());
        let applied = Value::from(self.applied.clone());
        match self.node {
            Some(id) => {
                txn.set_property(id, "version", version).await.map_err(OgmError::from)?;
                txn.set_property(id, "applied", applied).await.map_err(OgmError::from)?;
            }
            None => {
                let mut properties = Properties::new();
                properties.insert("version".to_string(), version);
                properties.insert("applied".to_string(), applied);
                self.node = Some(txn.create_node(SCHEMA_LABEL, properties).await.map_err(OgmError::from)?);
            }
        }
        Ok(())
    }
}

pub struct PatchScheduler<S: GraphStore> {
    mapper: Mapper<S>,
    patches: Vec<Box<dyn Patch<S>>>,
}

impl<S: GraphStore> PatchScheduler<S> {
    pub fn new(mapper: Mapper<S>) -> Self {
        Self {
            mapper,
            patches: Vec::new(),
        }
    }

    pub fn register(&mut self, patch: impl Patch<S> + 'static) -> &mut Self {
        self.patches.push(Box::new(patch));
        self
    }

    pub fn register_all(&mut self, patches: impl IntoIterator<Item = Box<dyn Patch<S>>>) -> &mut Self {
        self.patches.extend(patches);
        self
    }

    /// Registered patches by (version, priority). Ties keep registration order.
    pub fn ordered(&self) -> Vec<&dyn Patch<S>> {
        let mut ordered: Vec<&dyn Patch<S>> = self.patches.iter().map(|p| p.as_ref()).collect();
        ordered.sort_by_key(|p| (p.version(), p.priority()));
        ordered
    }

    /// Schema version currently recorded in the graph.
    pub async fn stored_version(&self) -> Result<Version, PatchError> {
        let mut session = self.mapper.session().await?;
        let state = SchemaState::load(session.txn()?).await?;
        session.rollback().await?;
        Ok(state.version)
    }

    /// Migrate to the version named in the mapper configuration.
    pub async fn migrate(&self) -> Result<PatchReport, PatchError> {
        let target = self.mapper.config().schema_version.parse()?;
        self.run(target).await
    }

    /// Apply every patch with `stored < version <= target`, in order.
    ///
    /// The first failing patch halts the run; patches applied before it stay
    /// applied.
    pub async fn run(&self, target: Version) -> Result<PatchReport, PatchError> {
        let stored = self.stored_version().await?;
        let mut report = PatchReport {
            from: stored,
            to: stored,
            ..PatchReport::default()
        };
        if stored > target {
            tracing::warn!(%stored, %target, "Stored schema version is ahead of the target, no patches applied");
            return Ok(report);
        }

        let window: Vec<&dyn Patch<S>> = self
            .ordered()
            .into_iter()
            .filter(|p| p.version() > stored && p.version() <= target)
            .collect();
        tracing::info!(%stored, %target, patches = window.len(), "Running schema patches");

        for (index, patch) in window.iter().enumerate() {
            let key = patch_key(*patch);
            let version = patch.version();

            let mut session = self.mapper.session().await?;
            let mut state = SchemaState::load(session.txn()?).await?;
            if state.applied.contains(&key) {
                tracing::debug!(patch = %key, "Patch already applied");
                report.skipped.push(key);
                session.rollback().await?;
            } else {
                let failed = |source: OgmError| PatchError::Failed {
                    patch: patch.name(),
                    version,
                    source,
                };
                if let Err(err) = patch.update(&self.mapper, &mut session).await {
                    tracing::error!(patch = %key, error = %err, "Patch failed");
                    if session.is_active() {
                        session.rollback().await?;
                    }
                    return Err(failed(err));
                }
                state.applied.push(key.clone());
                state.store(session.txn().map_err(failed)?).await?;
                session.commit().await.map_err(failed)?;
                tracing::info!(patch = %key, "Applied patch");
                report.applied.push(key);
            }

            let group_done = window.get(index + 1).map_or(true, |next| next.version() != version);
            if group_done {
                self.record_version(version).await?;
                report.to = version;
            }
        }

        self.record_version(target).await?;
        report.to = target;
        tracing::info!(from = %report.from, to = %report.to, applied = report.applied.len(), "Schema is up to date");
        Ok(report)
    }

    async fn record_version(&self, version: Version) -> Result<(), PatchError> {
        let mut session = self.mapper.session().await?;
        let mut state = SchemaState::load(session.txn()?).await?;
        if state.version == version && state.node.is_some() {
            session.rollback().await?;
            return Ok(());
        }
        state.version = version;
        state.store(session.txn()?).await?;
        session.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use trellis_core::{ErrorKind, Registry};
    use trellis_graph::MemoryGraph;

    struct Recorder {
        version: Version,
        priority: i32,
        label: &'static str,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn new(version: &str, priority: i32, label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                version: version.parse().unwrap(),
                priority,
                label,
                fail: false,
                log: log.clone(),
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl Patch<MemoryGraph> for Recorder {
        fn version(&self) -> Version {
            self.version
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn name(&self) -> String {
            self.label.to_string()
        }

        async fn update(&self, _mapper: &Mapper<MemoryGraph>, session: &mut Session<<MemoryGraph as GraphStore>::Txn>) -> trellis_core::Result<()> {
            let mut properties = Properties::new();
            properties.insert("by".to_string(), Value::from(self.label));
            session.txn()?.create_node("Marker", properties).await?;
            if self.fail {
                return Err(OgmError::Internal(format!("{} exploded", self.label)));
            }
            self.log.lock().unwrap().push(self.label.to_string());
            Ok(())
        }
    }

    fn scheduler(graph: &MemoryGraph) -> PatchScheduler<MemoryGraph> {
        PatchScheduler::new(Mapper::new(graph.clone()).with_registry(Arc::new(Registry::new())))
    }

    fn logged(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn versions_parse_and_order() {
        assert_eq!("1".parse::<Version>().unwrap(), Version::new(1, 0, 0));
        assert_eq!("1.2".parse::<Version>().unwrap(), Version::new(1, 2, 0));
        assert_eq!("1.2.3".parse::<Version>().unwrap().to_string(), "1.2.3");
        assert!(Version::new(1, 10, 0) > Version::new(1, 9, 9));
        for bad in ["", "1.x", "1.2.3.4", "-1"] {
            assert!(matches!(bad.parse::<Version>(), Err(PatchError::InvalidVersion(_))), "{bad}");
        }
    }

    #[tokio::test]
    async fn patches_run_by_version_then_priority() {
        let graph = MemoryGraph::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = scheduler(&graph);
        scheduler
            .register(Recorder::new("1.1.0", 0, "c", &log))
            .register(Recorder::new("1.0.0", 5, "b", &log))
            .register(Recorder::new("1.0.0", -1, "a", &log))
            .register(Recorder::new("2.0.0", -100, "d", &log));

        let report = scheduler.run(Version::new(2, 0, 0)).await.unwrap();
        assert_eq!(logged(&log), ["a", "b", "c", "d"]);
        assert_eq!(report.applied.len(), 4);
        assert_eq!(report.to, Version::new(2, 0, 0));
        assert_eq!(scheduler.stored_version().await.unwrap(), Version::new(2, 0, 0));
    }

    #[tokio::test]
    async fn each_patch_applies_exactly_once() {
        let graph = MemoryGraph::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = scheduler(&graph);
        scheduler
            .register(Recorder::new("1.0.0", 0, "a", &log))
            .register(Recorder::new("1.1.0", 0, "b", &log));

        scheduler.run(Version::new(1, 0, 0)).await.unwrap();
        scheduler.run(Version::new(1, 1, 0)).await.unwrap();
        let report = scheduler.run(Version::new(1, 1, 0)).await.unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(logged(&log), ["a", "b"]);
    }

    #[tokio::test]
    async fn failure_halts_and_keeps_earlier_patches() {
        let graph = MemoryGraph::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = scheduler(&graph);
        scheduler
            .register(Recorder::new("1.0.0", 0, "first", &log))
            .register(Recorder::new("1.0.0", 1, "broken", &log).failing())
            .register(Recorder::new("1.1.0", 0, "never", &log));

        let err = scheduler.run(Version::new(1, 1, 0)).await.unwrap_err();
        match err {
            PatchError::Failed { patch, version, source } => {
                assert_eq!(patch, "broken");
                assert_eq!(version, Version::new(1, 0, 0));
                assert_eq!(source.kind(), ErrorKind::Internal);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(logged(&log), ["first"]);
        // One marker from "first" plus the schema node; the broken patch rolled back.
        assert_eq!(graph.node_count(), 2);
        assert_eq!(scheduler.stored_version().await.unwrap(), Version::default());

        // Once fixed, only the remaining patches run.
        let mut fixed = self::scheduler(&graph);
        fixed
            .register(Recorder::new("1.0.0", 0, "first", &log))
            .register(Recorder::new("1.0.0", 1, "broken", &log))
            .register(Recorder::new("1.1.0", 0, "never", &log));
        let report = fixed.run(Version::new(1, 1, 0)).await.unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(logged(&log), ["first", "broken", "never"]);
    }

    #[tokio::test]
    async fn stored_version_ahead_of_target_applies_nothing() {
        let graph = MemoryGraph::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = scheduler(&graph);
        scheduler.register(Recorder::new("2.0.0", 0, "late", &log));
        scheduler.run(Version::new(3, 0, 0)).await.unwrap();

        scheduler.register(Recorder::new("1.5.0", 0, "old", &log));
        let report = scheduler.run(Version::new(2, 5, 0)).await.unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.to, Version::new(3, 0, 0));
        assert_eq!(logged(&log), ["late"]);
    }

    #[tokio::test]
    async fn patches_below_the_stored_version_are_ignored() {
        let graph = MemoryGraph::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = scheduler(&graph);
        scheduler.run(Version::new(1, 0, 0)).await.unwrap();

        scheduler
            .register(Recorder::new("0.9.0", 0, "stale", &log))
            .register(Recorder::new("1.2.0", 0, "fresh", &log));
        scheduler.run(Version::new(2, 0, 0)).await.unwrap();
        assert_eq!(logged(&log), ["fresh"]);
    }
}
