//! Link-plan and artifact-plan synthesis for `rb`.
//!
//! Planning consumes a fully expanded [`Registry`] and an immutable
//! [`PlanConfig`] and produces one or more [`TargetPlan`]s per target. It is
//! pure: nothing here touches the filesystem or mutates the registry, so a
//! discarded plan has no side effects and any failure is reproducible.
//!
//! [`Registry`]: rb_graph::Registry
//! [`PlanConfig`]: rb_cfg::PlanConfig
//! [`TargetPlan`]: rb_types::TargetPlan

use rb_types::{TargetKey, TargetKind};
use thiserror::Error;

mod java;
mod linker;
mod variants;

pub use linker::{Advisory, LinkPlanner};
pub use variants::{TOOLCHAIN_VERSION_INPUT, TargetPlanner};

/// Fatal planning failures.
///
/// User-input problems (unknown dependencies, bad enumeration values) are
/// rejected earlier, by the graph; an error here signals a defect in the tool
/// itself.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("logic error: {kind} target {key} reached compiled-object planning")]
    Internal { key: TargetKey, kind: TargetKind },
}

#[cfg(test)]
pub(crate) mod testutil {
    use rb_cfg::PlanConfig;
    use rb_graph::Registry;
    use rb_types::{Target, TargetKey, TargetKind};

    pub(crate) fn key(path: &str, name: &str) -> TargetKey {
        TargetKey::new(path, name)
    }

    pub(crate) fn library(path: &str, name: &str, deps: &[TargetKey]) -> Target {
        let mut target = Target::new(key(path, name), TargetKind::CcLibrary);
        target.sources = vec![compact_str::format_compact!("{name}.cc")];
        target.declared_deps = deps.to_vec();
        target
    }

    pub(crate) fn binary(path: &str, name: &str, deps: &[TargetKey]) -> Target {
        let mut target = Target::new(key(path, name), TargetKind::CcBinary);
        target.sources = vec![compact_str::format_compact!("{name}.cc")];
        target.declared_deps = deps.to_vec();
        target
    }

    /// Register `targets` with `config` and expand the graph.
    pub(crate) fn graph(config: &PlanConfig, targets: Vec<Target>) -> Registry {
        let mut registry = Registry::new(config).unwrap();
        for target in targets {
            registry.register(target).unwrap();
        }
        registry.expand_all().unwrap();
        registry
    }
}
