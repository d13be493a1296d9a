//! Per-kind artifact plan assembly.
//!
//! Kind-specific behavior is composed, not inherited: a test plan is the
//! binary plan with test metadata layered on, a benchmark is a binary whose
//! framework dependencies were injected at registration, and a plugin is a
//! shared library built over the static partition.

use std::collections::BTreeSet;

use compact_str::{CompactString, format_compact};
use rb_cfg::PlanConfig;
use rb_graph::Registry;
use rb_types::{
    ArtifactKind, CompilePlan, CopyAction, DYNAMIC_SUFFIX, LinkPlan, ObjectPlan, Target,
    TargetKey, TargetKind, TargetPlan, TestMeta, plan_id, plan_id_suffixed, sanitize_id,
};

use crate::PlanError;
use crate::java;
use crate::linker::LinkPlanner;

/// Implicit build-time input of every binary: an artifact derived from the
/// toolchain metadata, so binaries relink when the toolchain changes.
pub const TOOLCHAIN_VERSION_INPUT: &str = "toolchain_version";

/// Assembles full artifact plans, one target at a time.
///
/// Construction runs the prebuilt pre-pass: a single scan over all declared
/// targets determining which prebuilt libraries need their static form
/// materialized. Planning itself is then independent per target.
#[derive(Debug)]
pub struct TargetPlanner<'a> {
    registry: &'a Registry,
    config: &'a PlanConfig,
    linker: LinkPlanner<'a>,
    /// Prebuilt libraries with at least one consumer that links statically.
    static_prebuilts: BTreeSet<TargetKey>,
}

impl<'a> TargetPlanner<'a> {
    pub fn new(registry: &'a Registry, config: &'a PlanConfig) -> Self {
        let mut static_prebuilts = BTreeSet::new();
        for target in registry.targets() {
            if !target.kind.needs_static_prebuilt() {
                continue;
            }
            for dep in &target.expanded_deps {
                let Some(dep_target) = registry.lookup(dep) else {
                    continue;
                };
                if dep_target.kind == TargetKind::PrebuiltCcLibrary {
                    static_prebuilts.insert(dep.clone());
                }
            }
        }

        TargetPlanner {
            registry,
            config,
            linker: LinkPlanner::new(registry, config),
            static_prebuilts,
        }
    }

    /// Plan every registered target, in declaration order.
    pub fn plan_all(&self) -> Result<Vec<TargetPlan>, PlanError> {
        let mut plans = Vec::with_capacity(self.registry.len());
        for target in self.registry.targets() {
            plans.extend(self.plan_target(target)?);
        }
        Ok(plans)
    }

    /// Plan one target. Libraries built in both forms, and prebuilt
    /// libraries materialized in both forms, produce two plans.
    pub fn plan_target(&self, target: &Target) -> Result<Vec<TargetPlan>, PlanError> {
        if target.kind.is_cc_compiled() || target.kind == TargetKind::PrebuiltCcLibrary {
            for advisory in self.linker.advisories(target) {
                tracing::warn!("{advisory}");
            }
        }

        match target.kind {
            TargetKind::CcLibrary => self.plan_cc_library(target),
            TargetKind::PrebuiltCcLibrary => Ok(self.plan_prebuilt(target)),
            TargetKind::CcBinary | TargetKind::CcBenchmark => {
                Ok(vec![self.plan_cc_binary(target)?])
            }
            TargetKind::CcTest => {
                let mut plan = self.plan_cc_binary(target)?;
                plan.test = Some(TestMeta {
                    testdata: target.attrs.testdata.clone(),
                    always_run: target.attrs.always_run,
                    exclusive: target.attrs.exclusive,
                    heap_check: target.heap_check,
                });
                Ok(vec![plan])
            }
            TargetKind::CcPlugin => self.plan_plugin(target),
            // Swig wrapper generation and prebuilt jars are handled outside
            // this core; they only participate as dependencies.
            TargetKind::SwigLibrary | TargetKind::PrebuiltJavaLibrary => {
                Ok(vec![TargetPlan::none(target.key.clone())])
            }
            TargetKind::JavaLibrary | TargetKind::JavaBinary | TargetKind::JavaTest => {
                Ok(vec![java::plan_java(self.registry, self.config, target)])
            }
        }
    }

    fn plan_cc_library(&self, target: &Target) -> Result<Vec<TargetPlan>, PlanError> {
        let key = &target.key;
        let compile = self.compile_plan(target)?;

        let link = LinkPlan {
            export_includes: self.linker.export_includes(target),
            artifact_kind: ArtifactKind::StaticArchive,
            ..LinkPlan::default()
        };
        let mut plans = vec![TargetPlan {
            key: key.clone(),
            id: plan_id(&key.path, &key.name),
            output: Some(self.build_path(&key.path, &format_compact!("lib{}.a", key.name))),
            link,
            compile: Some(compile),
            java: None,
            copy: None,
            implicit_inputs: Vec::new(),
            test: None,
        }];

        let build_dynamic = self.config.generate_dynamic || target.attrs.build_dynamic;
        if build_dynamic && !(target.sources.is_empty() && target.expanded_deps.is_empty()) {
            let mut flags = vec![
                CompactString::const_new("-Xlinker"),
                CompactString::const_new("--no-undefined"),
            ];
            flags.extend(target.attrs.extra_linkflags.iter().cloned());
            let link = LinkPlan {
                dynamic_libs: self.linker.dynamic_deps(target),
                extra_link_flags: flags,
                artifact_kind: ArtifactKind::SharedLibrary,
                ..LinkPlan::default()
            };
            plans.push(TargetPlan {
                key: key.clone(),
                id: plan_id_suffixed(&key.path, &key.name, Some(DYNAMIC_SUFFIX)),
                output: Some(self.build_path(&key.path, &format_compact!("lib{}.so", key.name))),
                link,
                compile: None,
                java: None,
                copy: None,
                implicit_inputs: Vec::new(),
                test: None,
            });
        }

        Ok(plans)
    }

    fn plan_cc_binary(&self, target: &Target) -> Result<TargetPlan, PlanError> {
        let key = &target.key;
        let compile = self.compile_plan(target)?;
        let attrs = &target.attrs;

        let mut link = LinkPlan {
            export_includes: self.linker.export_includes(target),
            artifact_kind: ArtifactKind::Executable,
            ..LinkPlan::default()
        };
        let mut flags: Vec<CompactString> = Vec::new();

        if self.linker.effective_dynamic_link(target) {
            link.dynamic_libs = self.linker.dynamic_deps(target);
            if attrs.export_dynamic {
                flags.push(CompactString::const_new("-rdynamic"));
            }
            flags.extend(attrs.extra_linkflags.iter().cloned());
        } else {
            let (whole_archive, statics) = self.linker.static_deps(target);
            flags.push(CompactString::const_new("-static-libgcc"));
            flags.push(CompactString::const_new("-static-libstdc++"));
            flags.extend(LinkPlanner::whole_archive_flags(&whole_archive));
            if attrs.export_dynamic {
                flags.push(CompactString::const_new("-rdynamic"));
            }
            flags.extend(self.config.linkflags.iter().cloned());
            flags.extend(attrs.extra_linkflags.iter().cloned());
            link.static_libs = statics;
            link.whole_archive_libs = whole_archive;
        }
        link.extra_link_flags = flags;

        Ok(TargetPlan {
            key: key.clone(),
            id: plan_id(&key.path, &key.name),
            output: Some(self.build_path(&key.path, &key.name)),
            link,
            compile: Some(compile),
            java: None,
            copy: None,
            implicit_inputs: vec![CompactString::const_new(TOOLCHAIN_VERSION_INPUT)],
            test: None,
        })
    }

    fn plan_plugin(&self, target: &Target) -> Result<Vec<TargetPlan>, PlanError> {
        let key = &target.key;
        // An empty plugin is a valid no-op, not an error.
        if target.sources.is_empty() && target.expanded_deps.is_empty() {
            return Ok(vec![TargetPlan::none(key.clone())]);
        }

        let compile = self.compile_plan(target)?;
        let (whole_archive, statics) = self.linker.static_deps(target);
        let mut flags: Vec<CompactString> = target.attrs.extra_linkflags.to_vec();
        flags.extend(LinkPlanner::whole_archive_flags(&whole_archive));

        let link = LinkPlan {
            static_libs: statics,
            whole_archive_libs: whole_archive,
            export_includes: self.linker.export_includes(target),
            extra_link_flags: flags,
            artifact_kind: ArtifactKind::SharedLibrary,
            ..LinkPlan::default()
        };
        Ok(vec![TargetPlan {
            key: key.clone(),
            id: plan_id_suffixed(&key.path, &key.name, Some(DYNAMIC_SUFFIX)),
            output: Some(self.build_path(&key.path, &format_compact!("lib{}.so", key.name))),
            link,
            compile: Some(compile),
            java: None,
            copy: None,
            implicit_inputs: Vec::new(),
            test: None,
        }])
    }

    /// Plan the copy actions materializing a prebuilt library.
    ///
    /// The static form is produced only when the pre-pass found a consumer
    /// that links statically; a prebuilt library used purely dynamically
    /// materializes the shared form alone.
    fn plan_prebuilt(&self, target: &Target) -> Vec<TargetPlan> {
        let key = &target.key;
        let mut plans = Vec::new();

        if self.static_prebuilts.contains(key) {
            plans.push(self.prebuilt_copy(key, false));
        }
        if self.config.generate_dynamic || target.attrs.build_dynamic {
            plans.push(self.prebuilt_copy(key, true));
        }
        if plans.is_empty() {
            plans.push(TargetPlan::none(key.clone()));
        }
        plans
    }

    fn prebuilt_copy(&self, key: &TargetKey, dynamic: bool) -> TargetPlan {
        let suffix = if dynamic { "so" } else { "a" };
        // Flavor directory is lib{machine}_{profile}, shared by every
        // prebuilt artifact under the same path.
        let src = format_compact!(
            "{}/lib{}_{}/lib{}.{}",
            key.path,
            self.config.machine,
            self.config.profile.as_str(),
            key.name,
            suffix
        );
        let dest = self.build_path(&key.path, &format_compact!("lib{}.{}", key.name, suffix));
        let id = if dynamic {
            plan_id_suffixed(&key.path, &key.name, Some(DYNAMIC_SUFFIX))
        } else {
            plan_id(&key.path, &key.name)
        };

        TargetPlan {
            key: key.clone(),
            id,
            output: Some(dest.clone()),
            link: LinkPlan {
                artifact_kind: ArtifactKind::CopiedPrebuilt,
                ..LinkPlan::default()
            },
            compile: None,
            java: None,
            copy: Some(CopyAction { src, dest }),
            implicit_inputs: Vec::new(),
            test: None,
        }
    }

    /// Resolve flags and plan one object per source.
    pub(crate) fn compile_plan(&self, target: &Target) -> Result<CompilePlan, PlanError> {
        if !target.kind.is_cc_compiled() {
            return Err(PlanError::Internal {
                key: target.key.clone(),
                kind: target.kind,
            });
        }

        let (flags, include_paths) = self.linker.cc_flags(target);
        let key = &target.key;
        let objects = target
            .sources
            .iter()
            .map(|src| ObjectPlan {
                id: format_compact!("{}_{}_object", plan_id(&key.path, src), sanitize_id(&key.name)),
                source: format_compact!("{}/{}", key.path, src),
                output: self.build_path(
                    &key.path,
                    &format_compact!("{}.objs/{}.o", key.name, src),
                ),
            })
            .collect();

        Ok(CompilePlan {
            flags,
            include_paths,
            objects,
        })
    }

    fn build_path(&self, path: &str, file: &str) -> CompactString {
        format_compact!("{}/{}/{}", self.config.build_dir, path, file)
    }
}
