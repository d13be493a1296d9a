//! Link-list construction over an expanded dependency closure.

use std::fmt;

use compact_str::{CompactString, format_compact};
use rb_cfg::{PlanConfig, Profile};
use rb_graph::Registry;
use rb_types::{
    DYNAMIC_SUFFIX, DynamicLink, LibRef, Target, TargetKey, TargetKind, WarningPolicy,
};

/// A non-fatal advisory raised while planning one target.
///
/// Advisories are logged by the planner and never alter any plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// A direct dependency on a deprecated library. The replacement is the
    /// first declared dependency of the deprecated library itself, if any.
    DeprecatedDependency {
        target: TargetKey,
        dep: TargetKey,
        replacement: Option<TargetKey>,
    },
    /// `warning = "no"` used outside the permitted source areas.
    WarningSuppression { target: TargetKey },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::DeprecatedDependency {
                target,
                dep,
                replacement: Some(replacement),
            } => write!(
                f,
                "{target}: {dep} has been deprecated, please depend on {replacement} instead"
            ),
            Advisory::DeprecatedDependency {
                target,
                dep,
                replacement: None,
            } => write!(f, "{target}: {dep} has been deprecated and names no replacement"),
            Advisory::WarningSuppression { target } => write!(
                f,
                "{target}: warning = \"no\" is only allowed in permitted source areas"
            ),
        }
    }
}

/// Computes link lists, propagated includes, and compile flags for one
/// target from its `expanded_deps`.
///
/// Every method is a pure function of the (read-only) registry, the
/// immutable configuration, and the target; traversal order always follows
/// `expanded_deps`, which makes the output deterministic.
#[derive(Debug, Clone, Copy)]
pub struct LinkPlanner<'a> {
    registry: &'a Registry,
    config: &'a PlanConfig,
}

impl<'a> LinkPlanner<'a> {
    pub fn new(registry: &'a Registry, config: &'a PlanConfig) -> Self {
        LinkPlanner { registry, config }
    }

    /// Static link lists: `(whole_archive_libs, static_libs)`.
    ///
    /// Both preserve the relative traversal order of `expanded_deps`, and a
    /// library lands in exactly one of the two. External keys are referenced
    /// by literal name and never inspected for symbol-retention flags.
    pub fn static_deps(&self, target: &Target) -> (Vec<LibRef>, Vec<LibRef>) {
        let mut whole_archive = Vec::new();
        let mut statics = Vec::new();
        for dep in &target.expanded_deps {
            if dep.is_external() {
                statics.push(LibRef::for_key(dep, None));
                continue;
            }
            let Some(dep_target) = self.registry.lookup(dep) else {
                continue;
            };
            if !dep_target.kind.is_library_like() {
                continue;
            }
            if dep_target.attrs.link_all_symbols {
                whole_archive.push(LibRef::for_key(dep, None));
            } else {
                statics.push(LibRef::for_key(dep, None));
            }
        }
        (whole_archive, statics)
    }

    /// Dynamic link list, resolved at load time.
    ///
    /// Same traversal as the static list, except that a plain compiled
    /// library with no sources is skipped: an empty static wrapper produces
    /// no artifact to link against. No whole-archive concept applies.
    pub fn dynamic_deps(&self, target: &Target) -> Vec<LibRef> {
        let mut libs = Vec::new();
        for dep in &target.expanded_deps {
            if dep.is_external() {
                libs.push(LibRef::for_key(dep, None));
                continue;
            }
            let Some(dep_target) = self.registry.lookup(dep) else {
                continue;
            };
            if !dep_target.kind.is_library_like() {
                continue;
            }
            if dep_target.kind == TargetKind::CcLibrary && dep_target.sources.is_empty() {
                continue;
            }
            libs.push(LibRef::for_key(dep, Some(DYNAMIC_SUFFIX)));
        }
        libs
    }

    /// Include paths exported by dependencies, each re-rooted under the
    /// exporting dependency's path, in traversal order.
    ///
    /// External dependencies export nothing.
    pub fn export_includes(&self, target: &Target) -> Vec<CompactString> {
        let mut includes = Vec::new();
        for dep in &target.expanded_deps {
            if dep.is_external() {
                continue;
            }
            let Some(dep_target) = self.registry.lookup(dep) else {
                continue;
            };
            if !dep_target.kind.is_library_like() {
                continue;
            }
            for inc in &dep_target.attrs.export_incs {
                includes.push(rebase_path(&dep.path, inc));
            }
        }
        includes
    }

    /// Compiler flags and include search paths for this target's objects.
    pub fn cc_flags(&self, target: &Target) -> (Vec<CompactString>, Vec<CompactString>) {
        let attrs = &target.attrs;
        let mut flags: Vec<CompactString> = Vec::new();

        if attrs.warning == WarningPolicy::No {
            flags.push(CompactString::const_new("-w"));
        }
        for def in &attrs.defs {
            flags.push(format_compact!("-D{def}"));
        }

        if self.config.profile == Profile::Release || attrs.always_optimize {
            let opt_list = if !attrs.optimize.is_empty() {
                &attrs.optimize
            } else {
                &self.config.optimize
            };
            if opt_list.is_empty() {
                flags.push(CompactString::const_new("-O2"));
            } else {
                for flag in opt_list {
                    if flag.starts_with('-') {
                        flags.push(flag.clone());
                    } else {
                        flags.push(format_compact!("-{flag}"));
                    }
                }
            }
        }

        // Keep frame pointers in release builds so profilers can walk stacks.
        if self.config.profile == Profile::Release
            && !flags.iter().any(|flag| flag == "-fno-omit-frame-pointer")
        {
            flags.push(CompactString::const_new("-fno-omit-frame-pointer"));
        }
        flags.extend(attrs.extra_cppflags.iter().cloned());

        // Own include paths, falling back to the exported ones, then
        // everything propagated from the closure.
        let own = if !attrs.incs.is_empty() {
            &attrs.incs
        } else {
            &attrs.export_incs
        };
        let mut includes: Vec<CompactString> = own
            .iter()
            .map(|inc| rebase_path(&target.key.path, inc))
            .collect();
        includes.extend(self.export_includes(target));
        dedup_preserving_order(&mut includes);

        (flags, includes)
    }

    /// Whether this target links its dynamic plan instead of the static one.
    pub fn effective_dynamic_link(&self, target: &Target) -> bool {
        match target.attrs.dynamic_link {
            DynamicLink::On => true,
            DynamicLink::Off => false,
            DynamicLink::Default => {
                target.kind == TargetKind::CcTest && self.config.test_dynamic_link
            }
        }
    }

    /// Symbol-retention bracket for the whole-archive list.
    ///
    /// Empty input produces no bracket markers at all.
    pub fn whole_archive_flags(whole_archive: &[LibRef]) -> Vec<CompactString> {
        if whole_archive.is_empty() {
            return Vec::new();
        }
        let mut flags = Vec::with_capacity(whole_archive.len() + 2);
        flags.push(CompactString::const_new("-Wl,--whole-archive"));
        for lib in whole_archive {
            flags.push(format_compact!("{lib}"));
        }
        flags.push(CompactString::const_new("-Wl,--no-whole-archive"));
        flags
    }

    /// Advisories for one target: one per *direct* dependency on a
    /// deprecated library (naming the suggested replacement), plus one when
    /// warning suppression is used outside the permitted source areas.
    pub fn advisories(&self, target: &Target) -> Vec<Advisory> {
        let mut advisories = Vec::new();
        for dep in &target.declared_deps {
            if dep.is_external() {
                continue;
            }
            let Some(dep_target) = self.registry.lookup(dep) else {
                continue;
            };
            if !dep_target.attrs.deprecated {
                continue;
            }
            advisories.push(Advisory::DeprecatedDependency {
                target: target.key.clone(),
                dep: dep.clone(),
                replacement: dep_target.declared_deps.first().cloned(),
            });
        }

        if target.attrs.warning == WarningPolicy::No && !target.sources.is_empty() {
            let permitted = self
                .config
                .permitted_warning_areas
                .iter()
                .any(|area| target.key.path.contains(area.as_str()));
            if !permitted {
                advisories.push(Advisory::WarningSuppression {
                    target: target.key.clone(),
                });
            }
        }
        advisories
    }
}

/// Join `inc` under `path` and normalize away `.` and `..` components.
fn rebase_path(path: &str, inc: &str) -> CompactString {
    let mut components: Vec<&str> = Vec::new();
    for component in path.split('/').chain(inc.split('/')) {
        match component {
            "" | "." => (),
            ".." => {
                components.pop();
            }
            other => components.push(other),
        }
    }
    CompactString::from(components.join("/"))
}

fn dedup_preserving_order(values: &mut Vec<CompactString>) {
    let mut seen = std::collections::BTreeSet::new();
    values.retain(|value| seen.insert(value.clone()));
}
