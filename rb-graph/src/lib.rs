//! The target registry and dependency expansion for `rb`.
//!
//! Targets are registered once, immutably, in declaration order. Registration
//! performs the per-kind normalization that older build tools did in target
//! constructors: prebuilt targets lose their sources, binaries and tests gain
//! their injected framework dependencies, and declared enumerations are
//! validated so a bad value aborts before any plan exists. After
//! [`Registry::expand_all`] fills every target's transitive closure the
//! registry is read-only for the rest of the build.

use std::collections::{BTreeMap, BTreeSet};

use compact_str::CompactString;
use rb_cfg::PlanConfig;
use rb_types::{HeapCheck, Target, TargetKey, TargetKind};
use smallvec::SmallVec;
use thiserror::Error;

/// Fatal errors raised while building or expanding the target graph.
///
/// All of these abort the build before any plan is produced.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("{from}: depends on unknown target {missing}")]
    UnknownDependency { from: TargetKey, missing: TargetKey },

    #[error("{target}: dependency cycle through {through}")]
    DependencyCycle { target: TargetKey, through: TargetKey },

    #[error("{key}: declared more than once")]
    DuplicateTarget { key: TargetKey },

    #[error("{target}: heap_check '{value}' is not one of {allowed:?}")]
    InvalidHeapCheck {
        target: TargetKey,
        value: CompactString,
        allowed: &'static [&'static str],
    },

    #[error("configured default heap_check '{value}' is not one of {allowed:?}")]
    InvalidDefaultHeapCheck {
        value: CompactString,
        allowed: &'static [&'static str],
    },

    #[error("{target}: C++ keyword '{name}' cannot be used as a macro definition")]
    ReservedMacro {
        target: TargetKey,
        name: CompactString,
    },

    #[error("{target}: link_all_symbols is only allowed on library-like targets")]
    LinkAllSymbolsOnNonLibrary { target: TargetKey },

    #[error("invalid dependency label '{label}' in configuration")]
    InvalidLabel { label: CompactString },
}

/// All declared targets, keyed by `(path, name)`, plus the injected
/// dependency sets derived from the configuration.
#[derive(Debug)]
pub struct Registry {
    /// Map of [`TargetKey`] to [`Target`].
    targets: BTreeMap<TargetKey, Target>,
    /// Keys in declaration order.
    order: Vec<TargetKey>,

    /// Libraries every binary-like target links against.
    binary_extra_libs: SmallVec<[TargetKey; 4]>,
    /// Test-framework core and main-entry libraries.
    test_libs: SmallVec<[TargetKey; 4]>,
    /// Heap-check profiler libraries, regular and debug flavor.
    heap_check_libs: SmallVec<[TargetKey; 4]>,
    heap_check_debug_libs: SmallVec<[TargetKey; 4]>,
    /// Benchmark-framework core and main-entry libraries.
    benchmark_libs: SmallVec<[TargetKey; 4]>,
    /// Default heap-check mode for tests that leave it unspecified.
    default_heap_check: Option<HeapCheck>,
}

impl Registry {
    /// Create an empty [`Registry`], resolving the injected dependency sets
    /// from `config`.
    pub fn new(config: &PlanConfig) -> Result<Self, GraphError> {
        let mut test_libs = parse_labels(&config.test_framework_libs)?;
        test_libs.extend(parse_labels(&config.test_main_libs)?);
        let mut benchmark_libs = parse_labels(&config.benchmark_libs)?;
        benchmark_libs.extend(parse_labels(&config.benchmark_main_libs)?);

        let default_heap_check = match &config.default_heap_check {
            None => None,
            Some(value) => {
                let mode = HeapCheck::parse(value).ok_or_else(|| {
                    GraphError::InvalidDefaultHeapCheck {
                        value: value.clone(),
                        allowed: HeapCheck::ALLOWED,
                    }
                })?;
                Some(mode)
            }
        };

        Ok(Registry {
            targets: BTreeMap::default(),
            order: Vec::new(),
            binary_extra_libs: parse_labels(&config.binary_extra_libs)?,
            test_libs,
            heap_check_libs: parse_labels(&config.heap_check_libs)?,
            heap_check_debug_libs: parse_labels(&config.heap_check_debug_libs)?,
            benchmark_libs,
            default_heap_check,
        })
    }

    /// Register a declared [`Target`].
    ///
    /// # Errors
    ///
    /// * If a target with the same key was already registered.
    /// * If a declared attribute fails validation, e.g. an unknown
    ///   `heap_check` value or a C++ keyword used as a macro name.
    pub fn register(&mut self, mut target: Target) -> Result<(), GraphError> {
        if self.targets.contains_key(&target.key) {
            return Err(GraphError::DuplicateTarget { key: target.key });
        }

        check_defs(&target)?;
        if target.attrs.link_all_symbols && !target.kind.is_library_like() {
            return Err(GraphError::LinkAllSymbolsOnNonLibrary { target: target.key });
        }

        // A prebuilt artifact is copied, never compiled.
        if target.kind.is_prebuilt() {
            target.sources.clear();
        }
        // The closure is derived later, exactly once, by `expand_all`.
        target.expanded_deps.clear();

        match target.kind {
            TargetKind::CcBinary => {
                inject_deps(&mut target.declared_deps, &self.binary_extra_libs);
            }
            TargetKind::CcTest => {
                inject_deps(&mut target.declared_deps, &self.binary_extra_libs);
                inject_deps(&mut target.declared_deps, &self.test_libs);
                target.heap_check = self.resolve_heap_check(&target)?;
                if target.heap_check.is_some() {
                    let profiler = if target.attrs.heap_check_debug {
                        &self.heap_check_debug_libs
                    } else {
                        &self.heap_check_libs
                    };
                    inject_deps(&mut target.declared_deps, profiler);
                }
            }
            TargetKind::CcBenchmark => {
                inject_deps(&mut target.declared_deps, &self.binary_extra_libs);
                inject_deps(&mut target.declared_deps, &self.benchmark_libs);
            }
            _ => (),
        }

        tracing::debug!(key = %target.key, kind = %target.kind, "registered target");
        self.order.push(target.key.clone());
        self.targets.insert(target.key.clone(), target);
        Ok(())
    }

    /// Get the [`Target`] for `key`, if one is registered.
    ///
    /// External keys are never registered and always return `None`.
    pub fn lookup(&self, key: &TargetKey) -> Option<&Target> {
        self.targets.get(key)
    }

    /// All targets, in declaration order.
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.order.iter().map(|key| {
            self.targets
                .get(key)
                .expect("declaration order only holds registered keys")
        })
    }

    /// Number of registered targets.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Compute `expanded_deps` for every registered target: the deduplicated
    /// transitive closure of its declared dependencies, preserving order of
    /// first encounter under a depth-first preorder traversal.
    ///
    /// The result is deterministic: two runs over an unchanged graph produce
    /// identical closures. External (`#`) keys are leaves and are never
    /// expanded further.
    ///
    /// # Errors
    ///
    /// * If a dependency names a target that was never registered.
    /// * If the declared dependencies contain a cycle.
    pub fn expand_all(&mut self) -> Result<(), GraphError> {
        let mut closures: BTreeMap<TargetKey, Vec<TargetKey>> = BTreeMap::default();
        let mut visiting: BTreeSet<TargetKey> = BTreeSet::default();

        for key in &self.order {
            self.closure_of(key, &mut closures, &mut visiting)?;
        }

        for (key, closure) in closures {
            let target = self
                .targets
                .get_mut(&key)
                .expect("closures are only computed for registered targets");
            target.expanded_deps = closure;
        }
        Ok(())
    }

    fn closure_of(
        &self,
        key: &TargetKey,
        closures: &mut BTreeMap<TargetKey, Vec<TargetKey>>,
        visiting: &mut BTreeSet<TargetKey>,
    ) -> Result<(), GraphError> {
        // Compute-once: a finished closure is never recomputed.
        if closures.contains_key(key) {
            return Ok(());
        }

        let target = self
            .targets
            .get(key)
            .expect("closure_of is only called with registered keys");

        let mut closure = Vec::new();
        let mut seen: BTreeSet<TargetKey> = BTreeSet::default();
        for dep in &target.declared_deps {
            if !dep.is_external() {
                if !self.targets.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        from: key.clone(),
                        missing: dep.clone(),
                    });
                }
                if visiting.contains(dep) || dep == key {
                    return Err(GraphError::DependencyCycle {
                        target: key.clone(),
                        through: dep.clone(),
                    });
                }
                visiting.insert(key.clone());
                let result = self.closure_of(dep, closures, visiting);
                visiting.remove(key);
                result?;
            }

            if seen.insert(dep.clone()) {
                closure.push(dep.clone());
            }
            if !dep.is_external() {
                let dep_closure = &closures[dep];
                for transitive in dep_closure {
                    if seen.insert(transitive.clone()) {
                        closure.push(transitive.clone());
                    }
                }
            }
        }

        closures.insert(key.clone(), closure);
        Ok(())
    }

    fn resolve_heap_check(&self, target: &Target) -> Result<Option<HeapCheck>, GraphError> {
        match &target.attrs.heap_check {
            None => Ok(self.default_heap_check),
            Some(value) => {
                let mode =
                    HeapCheck::parse(value).ok_or_else(|| GraphError::InvalidHeapCheck {
                        target: target.key.clone(),
                        value: value.clone(),
                        allowed: HeapCheck::ALLOWED,
                    })?;
                Ok(Some(mode))
            }
        }
    }
}

/// Append `libs` to `deps`, skipping entries already declared.
fn inject_deps(deps: &mut Vec<TargetKey>, libs: &[TargetKey]) {
    for lib in libs {
        if !deps.contains(lib) {
            deps.push(lib.clone());
        }
    }
}

fn parse_labels(labels: &[CompactString]) -> Result<SmallVec<[TargetKey; 4]>, GraphError> {
    labels
        .iter()
        .map(|label| {
            TargetKey::from_label(label).ok_or_else(|| GraphError::InvalidLabel {
                label: label.clone(),
            })
        })
        .collect()
}

/// C++ keywords, which must not be used as macro definition names.
static CXX_KEYWORDS: &[&str] = &[
    "and", "and_eq", "alignas", "alignof", "asm", "auto", "bitand", "bitor", "bool", "break",
    "case", "catch", "char", "char16_t", "char32_t", "class", "compl", "const", "constexpr",
    "const_cast", "continue", "decltype", "default", "delete", "double", "dynamic_cast", "else",
    "enum", "explicit", "export", "extern", "false", "float", "for", "friend", "goto", "if",
    "inline", "int", "long", "mutable", "namespace", "new", "noexcept", "not", "not_eq",
    "nullptr", "operator", "or", "or_eq", "private", "protected", "public", "register",
    "reinterpret_cast", "return", "short", "signed", "sizeof", "static", "static_assert",
    "static_cast", "struct", "switch", "template", "this", "thread_local", "throw", "true",
    "try", "typedef", "typeid", "typename", "union", "unsigned", "using", "virtual", "void",
    "volatile", "wchar_t", "while", "xor", "xor_eq",
];

fn check_defs(target: &Target) -> Result<(), GraphError> {
    for def in &target.attrs.defs {
        let name = match def.find('=') {
            Some(pos) => &def[..pos],
            None => def.as_str(),
        };
        if CXX_KEYWORDS.contains(&name) {
            return Err(GraphError::ReservedMacro {
                target: target.key.clone(),
                name: CompactString::new(name),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rb_types::CcAttrs;

    fn key(path: &str, name: &str) -> TargetKey {
        TargetKey::new(path, name)
    }

    fn library(path: &str, name: &str, deps: &[TargetKey]) -> Target {
        let mut target = Target::new(key(path, name), TargetKind::CcLibrary);
        target.declared_deps = deps.to_vec();
        target
    }

    fn registry() -> Registry {
        Registry::new(&PlanConfig::default()).unwrap()
    }

    #[test]
    fn smoketest_register_and_lookup() {
        let mut registry = registry();
        registry.register(library("base", "log", &[])).unwrap();
        registry
            .register(library("base", "string", &[key("base", "log")]))
            .unwrap();

        assert_eq!(registry.len(), 2);
        let target = registry.lookup(&key("base", "string")).unwrap();
        assert_eq!(target.kind, TargetKind::CcLibrary);
        assert_eq!(target.declared_deps, vec![key("base", "log")]);

        let order: Vec<_> = registry.targets().map(|t| t.key.clone()).collect();
        assert_eq!(order, vec![key("base", "log"), key("base", "string")]);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = registry();
        registry.register(library("base", "log", &[])).unwrap();
        let err = registry.register(library("base", "log", &[])).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTarget { .. }));
    }

    #[test]
    fn expansion_dedups_and_preserves_first_encounter_order() {
        let mut registry = registry();
        registry.register(library("d", "d", &[])).unwrap();
        registry
            .register(library("c", "c", &[key("d", "d")]))
            .unwrap();
        registry
            .register(library("b", "b", &[key("c", "c"), key("d", "d")]))
            .unwrap();
        registry
            .register(library("a", "a", &[key("b", "b"), key("c", "c")]))
            .unwrap();
        registry.expand_all().unwrap();

        let a = registry.lookup(&key("a", "a")).unwrap();
        assert_eq!(
            a.expanded_deps,
            vec![key("b", "b"), key("c", "c"), key("d", "d")]
        );
        // Every direct dependency is present, and no key appears twice.
        for dep in &a.declared_deps {
            assert!(a.expanded_deps.contains(dep));
        }
        let unique: BTreeSet<_> = a.expanded_deps.iter().collect();
        assert_eq!(unique.len(), a.expanded_deps.len());
    }

    #[test]
    fn expansion_is_deterministic() {
        let build = || {
            let mut registry = registry();
            registry.register(library("z", "z", &[])).unwrap();
            registry
                .register(library("m", "m", &[key("z", "z"), TargetKey::external("rt")]))
                .unwrap();
            registry
                .register(library("a", "a", &[key("m", "m"), key("z", "z")]))
                .unwrap();
            registry.expand_all().unwrap();
            registry
                .lookup(&key("a", "a"))
                .unwrap()
                .expanded_deps
                .clone()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn external_deps_are_leaves() {
        let mut registry = registry();
        registry
            .register(library("base", "log", &[TargetKey::external("pthread")]))
            .unwrap();
        registry
            .register(library("app", "app", &[key("base", "log")]))
            .unwrap();
        registry.expand_all().unwrap();

        let app = registry.lookup(&key("app", "app")).unwrap();
        assert_eq!(
            app.expanded_deps,
            vec![key("base", "log"), TargetKey::external("pthread")]
        );
    }

    #[test]
    fn unknown_dependency_names_both_targets() {
        let mut registry = registry();
        registry
            .register(library("app", "app", &[key("base", "nope")]))
            .unwrap();
        let err = registry.expand_all().unwrap_err();
        match err {
            GraphError::UnknownDependency { from, missing } => {
                assert_eq!(from, key("app", "app"));
                assert_eq!(missing, key("base", "nope"));
            }
            other => panic!("expected UnknownDependency, got {other:?}"),
        }
    }

    #[test]
    fn dependency_cycle_is_fatal() {
        let mut registry = registry();
        registry
            .register(library("a", "a", &[key("b", "b")]))
            .unwrap();
        registry
            .register(library("b", "b", &[key("a", "a")]))
            .unwrap();
        let err = registry.expand_all().unwrap_err();
        assert!(matches!(err, GraphError::DependencyCycle { .. }));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut registry = registry();
        registry
            .register(library("a", "a", &[key("a", "a")]))
            .unwrap();
        let err = registry.expand_all().unwrap_err();
        assert!(matches!(err, GraphError::DependencyCycle { .. }));
    }

    #[test]
    fn prebuilt_sources_are_cleared() {
        let mut registry = registry();
        let mut prebuilt = Target::new(key("third", "ssl"), TargetKind::PrebuiltCcLibrary);
        prebuilt.sources = vec!["ssl.cc".into()];
        registry.register(prebuilt).unwrap();
        assert!(registry.lookup(&key("third", "ssl")).unwrap().sources.is_empty());
    }

    #[test]
    fn reserved_macro_fails_registration() {
        let mut registry = registry();
        let mut target = library("base", "log", &[]);
        target.attrs.defs = vec!["NDEBUG".into(), "inline=__inline".into()];
        let err = registry.register(target).unwrap_err();
        match err {
            GraphError::ReservedMacro { name, .. } => assert_eq!(name, "inline"),
            other => panic!("expected ReservedMacro, got {other:?}"),
        }
    }

    #[test]
    fn link_all_symbols_rejected_on_binary() {
        let mut registry = registry();
        let mut target = Target::new(key("app", "app"), TargetKind::CcBinary);
        target.attrs = CcAttrs {
            link_all_symbols: true,
            ..CcAttrs::default()
        };
        let err = registry.register(target).unwrap_err();
        assert!(matches!(err, GraphError::LinkAllSymbolsOnNonLibrary { .. }));
    }

    fn test_config() -> PlanConfig {
        let mut config = PlanConfig::default();
        config.test_framework_libs = vec!["thirdparty/gtest:gtest".into()];
        config.test_main_libs = vec!["thirdparty/gtest:gtest_main".into()];
        config.heap_check_libs = vec!["thirdparty/perftools:tcmalloc".into()];
        config.heap_check_debug_libs = vec!["thirdparty/perftools:tcmalloc_debug".into()];
        config.benchmark_libs = vec!["thirdparty/benchmark:benchmark".into()];
        config.benchmark_main_libs = vec!["thirdparty/benchmark:benchmark_main".into()];
        config
    }

    #[test]
    fn tests_gain_framework_deps() {
        let mut registry = Registry::new(&test_config()).unwrap();
        let target = Target::new(key("base", "log_test"), TargetKind::CcTest);
        registry.register(target).unwrap();

        let target = registry.lookup(&key("base", "log_test")).unwrap();
        assert_eq!(
            target.declared_deps,
            vec![
                key("thirdparty/gtest", "gtest"),
                key("thirdparty/gtest", "gtest_main"),
            ]
        );
        assert_eq!(target.heap_check, None);
    }

    #[test]
    fn heap_check_injects_profiler() {
        let mut registry = Registry::new(&test_config()).unwrap();
        let mut target = Target::new(key("base", "leak_test"), TargetKind::CcTest);
        target.attrs.heap_check = Some("strict".into());
        registry.register(target).unwrap();

        let target = registry.lookup(&key("base", "leak_test")).unwrap();
        assert_eq!(target.heap_check, Some(HeapCheck::Strict));
        assert!(target
            .declared_deps
            .contains(&key("thirdparty/perftools", "tcmalloc")));
    }

    #[test]
    fn heap_check_debug_selects_debug_profiler() {
        let mut registry = Registry::new(&test_config()).unwrap();
        let mut target = Target::new(key("base", "leak_test"), TargetKind::CcTest);
        target.attrs.heap_check = Some("normal".into());
        target.attrs.heap_check_debug = true;
        registry.register(target).unwrap();

        let target = registry.lookup(&key("base", "leak_test")).unwrap();
        assert!(target
            .declared_deps
            .contains(&key("thirdparty/perftools", "tcmalloc_debug")));
        assert!(!target
            .declared_deps
            .contains(&key("thirdparty/perftools", "tcmalloc")));
    }

    #[test]
    fn invalid_heap_check_aborts_before_any_plan() {
        let mut registry = Registry::new(&test_config()).unwrap();
        let mut target = Target::new(key("base", "leak_test"), TargetKind::CcTest);
        target.attrs.heap_check = Some("bogus".into());
        let err = registry.register(target).unwrap_err();
        match err {
            GraphError::InvalidHeapCheck { value, allowed, .. } => {
                assert_eq!(value, "bogus");
                assert_eq!(allowed, HeapCheck::ALLOWED);
            }
            other => panic!("expected InvalidHeapCheck, got {other:?}"),
        }
    }

    #[test]
    fn default_heap_check_comes_from_config() {
        let mut config = test_config();
        config.default_heap_check = Some("normal".into());
        let mut registry = Registry::new(&config).unwrap();
        registry
            .register(Target::new(key("base", "t"), TargetKind::CcTest))
            .unwrap();
        let target = registry.lookup(&key("base", "t")).unwrap();
        assert_eq!(target.heap_check, Some(HeapCheck::Normal));
    }

    #[test]
    fn benchmarks_gain_framework_deps() {
        let mut registry = Registry::new(&test_config()).unwrap();
        registry
            .register(Target::new(key("base", "bench"), TargetKind::CcBenchmark))
            .unwrap();
        let target = registry.lookup(&key("base", "bench")).unwrap();
        assert_eq!(
            target.declared_deps,
            vec![
                key("thirdparty/benchmark", "benchmark"),
                key("thirdparty/benchmark", "benchmark_main"),
            ]
        );
    }

    #[test]
    fn binary_extra_libs_are_injected() {
        let mut config = PlanConfig::default();
        config.binary_extra_libs = vec!["#pthread".into()];
        let mut registry = Registry::new(&config).unwrap();
        registry
            .register(Target::new(key("app", "app"), TargetKind::CcBinary))
            .unwrap();
        let target = registry.lookup(&key("app", "app")).unwrap();
        assert_eq!(target.declared_deps, vec![TargetKey::external("pthread")]);
    }

    #[test]
    fn invalid_config_label_is_rejected() {
        let mut config = PlanConfig::default();
        config.binary_extra_libs = vec!["not a label".into()];
        let err = Registry::new(&config).unwrap_err();
        assert!(matches!(err, GraphError::InvalidLabel { .. }));
    }
}
