//! Command line driver for `rb`: load a target manifest, expand the graph,
//! and print the computed plans.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use clap::Parser;
use compact_str::CompactString;
use rb_cfg::PlanConfig;
use rb_graph::Registry;
use rb_plan::TargetPlanner;
use rb_types::{CcAttrs, DynamicLink, Target, TargetKey, TargetKind, WarningPolicy};
use serde::Deserialize;

#[derive(Debug, Parser)]
#[command(name = "rb", about = "Translate declarative build targets into link plans.")]
struct Cli {
    /// Path to the target manifest.
    manifest: PathBuf,
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let raw = std::fs::read_to_string(&cli.manifest)
        .with_context(|| format!("reading manifest {}", cli.manifest.display()))?;
    let manifest = Manifest::from_toml(&raw)?;

    let mut registry = Registry::new(&manifest.config)?;
    for spec in manifest.target {
        let target = spec.into_target()?;
        registry.register(target)?;
    }
    registry.expand_all()?;
    tracing::debug!(targets = registry.len(), "expanded dependency graph");

    let planner = TargetPlanner::new(&registry, &manifest.config);
    for plan in planner.plan_all()? {
        println!("{plan:#?}");
    }
    Ok(())
}

/// A manifest: the planning configuration plus the declared targets.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Manifest {
    config: PlanConfig,
    target: Vec<TargetSpec>,
}

impl Manifest {
    fn from_toml(raw: &str) -> Result<Self, anyhow::Error> {
        let manifest = toml::from_str(raw)?;
        Ok(manifest)
    }
}

/// One declared target, as written in the manifest.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetSpec {
    path: CompactString,
    name: CompactString,
    kind: CompactString,
    #[serde(default)]
    srcs: Vec<CompactString>,
    #[serde(default)]
    deps: Vec<CompactString>,
    #[serde(default)]
    warning: Option<CompactString>,
    #[serde(default)]
    defs: Vec<CompactString>,
    #[serde(default)]
    incs: Vec<CompactString>,
    #[serde(default)]
    export_incs: Vec<CompactString>,
    #[serde(default)]
    optimize: Vec<CompactString>,
    #[serde(default)]
    always_optimize: bool,
    #[serde(default)]
    link_all_symbols: bool,
    #[serde(default)]
    deprecated: bool,
    #[serde(default)]
    dynamic_link: Option<bool>,
    #[serde(default)]
    export_dynamic: bool,
    #[serde(default)]
    build_dynamic: bool,
    #[serde(default)]
    extra_cppflags: Vec<CompactString>,
    #[serde(default)]
    extra_linkflags: Vec<CompactString>,
    #[serde(default)]
    heap_check: Option<CompactString>,
    #[serde(default)]
    heap_check_debug: bool,
    #[serde(default)]
    testdata: Vec<CompactString>,
    #[serde(default)]
    always_run: bool,
    #[serde(default)]
    exclusive: bool,
}

impl TargetSpec {
    fn into_target(self) -> Result<Target, anyhow::Error> {
        let key = TargetKey::new(self.path, self.name);
        let kind = TargetKind::from_str(&self.kind)
            .with_context(|| format!("target {key}"))?;

        let mut declared_deps = Vec::with_capacity(self.deps.len());
        for dep in &self.deps {
            let dep = TargetKey::from_label(dep)
                .with_context(|| format!("target {key}: invalid dependency label '{dep}'"))?;
            declared_deps.push(dep);
        }

        let warning = match self.warning.as_deref() {
            None | Some("yes") => WarningPolicy::Yes,
            Some("no") => WarningPolicy::No,
            Some(other) => anyhow::bail!("target {key}: invalid warning policy '{other}'"),
        };
        let dynamic_link = match self.dynamic_link {
            Some(true) => DynamicLink::On,
            Some(false) => DynamicLink::Off,
            None => DynamicLink::Default,
        };

        let mut target = Target::new(key, kind);
        target.sources = self.srcs;
        target.declared_deps = declared_deps;
        target.attrs = CcAttrs {
            warning,
            defs: self.defs,
            incs: self.incs,
            export_incs: self.export_incs,
            optimize: self.optimize,
            always_optimize: self.always_optimize,
            link_all_symbols: self.link_all_symbols,
            deprecated: self.deprecated,
            dynamic_link,
            export_dynamic: self.export_dynamic,
            build_dynamic: self.build_dynamic,
            extra_cppflags: self.extra_cppflags,
            extra_linkflags: self.extra_linkflags,
            heap_check: self.heap_check,
            heap_check_debug: self.heap_check_debug,
            testdata: self.testdata,
            always_run: self.always_run,
            exclusive: self.exclusive,
        };
        Ok(target)
    }
}
