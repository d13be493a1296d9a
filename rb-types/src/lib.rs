//! Types used throughout `rb`.
//!
//! The goal of this crate is to be very lightweight, so take care with adding dependencies.

use std::fmt;
use std::str::FromStr;

use compact_str::{CompactString, format_compact};

/// Path component that marks an external/system library, e.g. `#pthread`.
///
/// External libraries are never built locally and are referenced by their
/// literal name when linking.
pub const EXTERNAL_PATH: &str = "#";

/// Identity of a build target, a `(path, name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetKey {
    /// Workspace-relative directory the target is declared in.
    pub path: CompactString,
    /// Name of the target within that directory.
    pub name: CompactString,
}

impl TargetKey {
    /// Create a new [`TargetKey`].
    pub fn new<P: Into<CompactString>, N: Into<CompactString>>(path: P, name: N) -> Self {
        TargetKey {
            path: path.into(),
            name: name.into(),
        }
    }

    /// Create a [`TargetKey`] for an external/system library.
    pub fn external<N: Into<CompactString>>(name: N) -> Self {
        TargetKey {
            path: CompactString::const_new(EXTERNAL_PATH),
            name: name.into(),
        }
    }

    /// Returns true if this key names an external/system library.
    pub fn is_external(&self) -> bool {
        self.path == EXTERNAL_PATH
    }

    /// Parse a dependency label.
    ///
    /// Accepted forms are `#name` for external libraries and `path:name` or
    /// `//path:name` for targets built by `rb`.
    pub fn from_label(label: &str) -> Option<Self> {
        if let Some(name) = label.strip_prefix(EXTERNAL_PATH) {
            if name.is_empty() || name.contains(':') {
                return None;
            }
            return Some(TargetKey::external(name));
        }

        let label = label.strip_prefix("//").unwrap_or(label);
        let (path, name) = label.split_once(':')?;
        if path.is_empty() || name.is_empty() {
            return None;
        }
        Some(TargetKey::new(path, name))
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_external() {
            write!(f, "#{}", self.name)
        } else {
            write!(f, "//{}:{}", self.path, self.name)
        }
    }
}

/// The kind of a build target.
///
/// A closed enumeration instead of string tags, so per-kind behavior is
/// expressed as capability methods and dispatch is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetKind {
    CcLibrary,
    PrebuiltCcLibrary,
    CcBinary,
    CcTest,
    CcPlugin,
    CcBenchmark,
    SwigLibrary,
    JavaLibrary,
    PrebuiltJavaLibrary,
    JavaBinary,
    JavaTest,
}

impl TargetKind {
    /// Whether targets of this kind participate in link lists as libraries.
    pub fn is_library_like(self) -> bool {
        matches!(
            self,
            TargetKind::CcLibrary
                | TargetKind::PrebuiltCcLibrary
                | TargetKind::CcPlugin
                | TargetKind::SwigLibrary
                | TargetKind::JavaLibrary
                | TargetKind::PrebuiltJavaLibrary
        )
    }

    /// Whether targets of this kind compile C/C++ sources to objects.
    pub fn is_cc_compiled(self) -> bool {
        matches!(
            self,
            TargetKind::CcLibrary
                | TargetKind::CcBinary
                | TargetKind::CcTest
                | TargetKind::CcPlugin
                | TargetKind::CcBenchmark
        )
    }

    /// Whether targets of this kind compile Java sources to a class tree.
    pub fn is_java_compiled(self) -> bool {
        matches!(
            self,
            TargetKind::JavaLibrary | TargetKind::JavaBinary | TargetKind::JavaTest
        )
    }

    /// Whether this kind denotes a Java target of any flavor.
    pub fn is_java(self) -> bool {
        self.is_java_compiled() || self == TargetKind::PrebuiltJavaLibrary
    }

    /// Whether the artifact for this kind is supplied externally and copied,
    /// never compiled.
    pub fn is_prebuilt(self) -> bool {
        matches!(
            self,
            TargetKind::PrebuiltCcLibrary | TargetKind::PrebuiltJavaLibrary
        )
    }

    /// Whether a consumer of this kind forces the static form of any prebuilt
    /// library in its dependency closure to be materialized.
    pub fn needs_static_prebuilt(self) -> bool {
        matches!(
            self,
            TargetKind::CcTest
                | TargetKind::CcBinary
                | TargetKind::CcBenchmark
                | TargetKind::CcPlugin
                | TargetKind::SwigLibrary
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::CcLibrary => "cc_library",
            TargetKind::PrebuiltCcLibrary => "prebuilt_cc_library",
            TargetKind::CcBinary => "cc_binary",
            TargetKind::CcTest => "cc_test",
            TargetKind::CcPlugin => "cc_plugin",
            TargetKind::CcBenchmark => "cc_benchmark",
            TargetKind::SwigLibrary => "swig_library",
            TargetKind::JavaLibrary => "java_library",
            TargetKind::PrebuiltJavaLibrary => "prebuilt_java_library",
            TargetKind::JavaBinary => "java_binary",
            TargetKind::JavaTest => "java_test",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "cc_library" => TargetKind::CcLibrary,
            "prebuilt_cc_library" => TargetKind::PrebuiltCcLibrary,
            "cc_binary" => TargetKind::CcBinary,
            "cc_test" => TargetKind::CcTest,
            "cc_plugin" => TargetKind::CcPlugin,
            "cc_benchmark" => TargetKind::CcBenchmark,
            "swig_library" => TargetKind::SwigLibrary,
            "java_library" => TargetKind::JavaLibrary,
            "prebuilt_java_library" => TargetKind::PrebuiltJavaLibrary,
            "java_binary" => TargetKind::JavaBinary,
            "java_test" => TargetKind::JavaTest,
            other => return Err(UnknownKind(CompactString::new(other))),
        };
        Ok(kind)
    }
}

/// Error returned when parsing an unrecognized target kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub CompactString);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown target kind '{}'", self.0)
    }
}

impl std::error::Error for UnknownKind {}

/// Warning policy for a compiled target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WarningPolicy {
    /// Build with the standard warning set.
    #[default]
    Yes,
    /// Suppress warnings, only permitted for configured source areas.
    No,
}

/// Tri-state dynamic-link request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DynamicLink {
    On,
    Off,
    /// Unspecified; the effective value comes from kind-specific policy.
    #[default]
    Default,
}

/// Heap-checker mode for tests, see gperftools' heap checker docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapCheck {
    Minimal,
    Normal,
    Strict,
    Draconian,
    AsIs,
    Local,
}

impl HeapCheck {
    /// The set of accepted `heap_check` values.
    pub const ALLOWED: &'static [&'static str] =
        &["minimal", "normal", "strict", "draconian", "as-is", "local"];

    /// Parse a declared `heap_check` value, `None` if it is not in
    /// [`HeapCheck::ALLOWED`].
    pub fn parse(value: &str) -> Option<Self> {
        let mode = match value {
            "minimal" => HeapCheck::Minimal,
            "normal" => HeapCheck::Normal,
            "strict" => HeapCheck::Strict,
            "draconian" => HeapCheck::Draconian,
            "as-is" => HeapCheck::AsIs,
            "local" => HeapCheck::Local,
            _ => return None,
        };
        Some(mode)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HeapCheck::Minimal => "minimal",
            HeapCheck::Normal => "normal",
            HeapCheck::Strict => "strict",
            HeapCheck::Draconian => "draconian",
            HeapCheck::AsIs => "as-is",
            HeapCheck::Local => "local",
        }
    }
}

/// Declared attributes of a compiled target.
///
/// These are exactly what the user wrote in the build definition. Effective
/// values (e.g. the dynamic-link decision for a test) are computed by the
/// planner, never stored back here.
#[derive(Debug, Clone, Default)]
pub struct CcAttrs {
    /// Warning policy.
    pub warning: WarningPolicy,
    /// Preprocessor macro definitions, `NAME` or `NAME=VALUE`.
    pub defs: Vec<CompactString>,
    /// Include paths, relative to the target's own path.
    pub incs: Vec<CompactString>,
    /// Include paths exported to dependents, relative to the target's path.
    pub export_incs: Vec<CompactString>,
    /// Optimization flags overriding the configured default.
    pub optimize: Vec<CompactString>,
    /// Apply optimization flags even in non-release profiles.
    pub always_optimize: bool,
    /// Retain all symbols of this archive when linked, even if unreferenced.
    /// Only meaningful on library-like kinds.
    pub link_all_symbols: bool,
    /// This library is deprecated; the suggested replacement is the first
    /// entry of its own declared dependencies.
    pub deprecated: bool,
    /// Dynamic-link request for binaries and tests.
    pub dynamic_link: DynamicLink,
    /// Export symbols from the executable (`-rdynamic`).
    pub export_dynamic: bool,
    /// Also build the shared form of this library.
    pub build_dynamic: bool,
    /// Extra compiler flags appended verbatim.
    pub extra_cppflags: Vec<CompactString>,
    /// Extra linker flags appended verbatim.
    pub extra_linkflags: Vec<CompactString>,
    /// Declared heap-checker mode, validated at registration.
    pub heap_check: Option<CompactString>,
    /// Link the debug flavor of the heap-check profiler libraries.
    pub heap_check_debug: bool,
    /// Data files the test needs at runtime.
    pub testdata: Vec<CompactString>,
    /// Run this test on every invocation, ignoring cached results.
    pub always_run: bool,
    /// This test cannot run concurrently with other tests.
    pub exclusive: bool,
}

/// A declared build target.
///
/// Created once at declaration time and immutable after registration;
/// `expanded_deps` is derived exactly once per invocation by dependency
/// expansion and is the only field written after registration.
#[derive(Debug, Clone)]
pub struct Target {
    /// Identity of this target.
    pub key: TargetKey,
    /// Kind of this target.
    pub kind: TargetKind,
    /// Source files, relative to `key.path`. Empty for prebuilt targets.
    pub sources: Vec<CompactString>,
    /// Direct dependencies, in declaration order.
    pub declared_deps: Vec<TargetKey>,
    /// Deduplicated transitive closure of `declared_deps`, preserving order
    /// of first encounter. Order is load-bearing: it is the static link order.
    pub expanded_deps: Vec<TargetKey>,
    /// Declared attributes.
    pub attrs: CcAttrs,
    /// Heap-checker mode resolved at registration from the declared value or
    /// the configured default.
    pub heap_check: Option<HeapCheck>,
}

impl Target {
    /// Create a new [`Target`] with no sources, dependencies, or attributes.
    pub fn new(key: TargetKey, kind: TargetKind) -> Self {
        Target {
            key,
            kind,
            sources: Vec::new(),
            declared_deps: Vec::new(),
            expanded_deps: Vec::new(),
            attrs: CcAttrs::default(),
            heap_check: None,
        }
    }
}

/// A library reference in a link list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibRef {
    /// An external/system library, referenced by its literal name.
    System(CompactString),
    /// A library built by `rb`, referenced by its plan-graph identifier.
    Built(CompactString),
}

impl LibRef {
    /// Reference for a dependency key, with an optional artifact-kind suffix
    /// for internal libraries.
    pub fn for_key(key: &TargetKey, suffix: Option<&str>) -> Self {
        if key.is_external() {
            LibRef::System(key.name.clone())
        } else {
            LibRef::Built(plan_id_suffixed(&key.path, &key.name, suffix))
        }
    }
}

impl fmt::Display for LibRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibRef::System(name) => write!(f, "'{name}'"),
            LibRef::Built(id) => f.write_str(id),
        }
    }
}

/// What kind of artifact a plan produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArtifactKind {
    StaticArchive,
    SharedLibrary,
    Executable,
    /// A prebuilt artifact copied into the build tree.
    CopiedPrebuilt,
    /// A packaged Java archive.
    JavaArchive,
    /// Nothing to produce; valid for e.g. an empty plugin.
    #[default]
    None,
}

/// The ordered link description for one planned artifact.
///
/// This is the value handed to the rule emitter; all sequences preserve the
/// deterministic traversal order they were computed in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkPlan {
    /// Libraries linked statically, in traversal order.
    pub static_libs: Vec<LibRef>,
    /// Libraries linked inside a whole-archive bracket. Disjoint from
    /// `static_libs`.
    pub whole_archive_libs: Vec<LibRef>,
    /// Libraries resolved at load time.
    pub dynamic_libs: Vec<LibRef>,
    /// Include paths propagated from dependencies, re-rooted under each
    /// dependency's path.
    pub export_includes: Vec<CompactString>,
    /// Linker flags, in emission order.
    pub extra_link_flags: Vec<CompactString>,
    /// Artifact produced by this plan.
    pub artifact_kind: ArtifactKind,
}

/// One compiled object in a [`CompilePlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPlan {
    /// Plan-graph identifier of the object.
    pub id: CompactString,
    /// Source file, relative to the workspace root.
    pub source: CompactString,
    /// Output path of the object file under the build directory.
    pub output: CompactString,
}

/// Compile section of a plan for a cc target with sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilePlan {
    /// Compiler flags, in emission order.
    pub flags: Vec<CompactString>,
    /// Include search paths, deduplicated preserving order.
    pub include_paths: Vec<CompactString>,
    /// Objects to compile, one per source.
    pub objects: Vec<ObjectPlan>,
}

/// Two-phase plan for a Java target: compile to a class tree, then package.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JavaPlan {
    /// Directory the class tree is compiled into.
    pub classes_dir: CompactString,
    /// The packaged archive.
    pub jar: CompactString,
    /// Compile classpath, in traversal order.
    pub classpath: Vec<CompactString>,
}

/// Copy action materializing a prebuilt artifact into the build tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyAction {
    pub src: CompactString,
    pub dest: CompactString,
}

/// Test metadata carried on a plan for the test runner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestMeta {
    pub testdata: Vec<CompactString>,
    pub always_run: bool,
    pub exclusive: bool,
    pub heap_check: Option<HeapCheck>,
}

/// A fully planned artifact for one target.
///
/// Targets usually produce one of these; a library also built dynamically, or
/// a prebuilt library materialized in both forms, produces two with distinct
/// identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetPlan {
    /// The target this plan belongs to.
    pub key: TargetKey,
    /// Deterministic plan-graph identifier, see [`plan_id`].
    pub id: CompactString,
    /// Output path of the artifact, `None` when nothing is produced.
    pub output: Option<CompactString>,
    /// Link description.
    pub link: LinkPlan,
    /// Compile section, present for cc kinds with sources.
    pub compile: Option<CompilePlan>,
    /// Java two-phase section.
    pub java: Option<JavaPlan>,
    /// Copy action for prebuilt artifacts.
    pub copy: Option<CopyAction>,
    /// Implicit build-time inputs, e.g. the toolchain-version artifact every
    /// binary depends on.
    pub implicit_inputs: Vec<CompactString>,
    /// Test metadata, present for test kinds.
    pub test: Option<TestMeta>,
}

impl TargetPlan {
    /// An empty plan producing nothing for `key`.
    pub fn none(key: TargetKey) -> Self {
        let id = plan_id(&key.path, &key.name);
        TargetPlan {
            key,
            id,
            output: None,
            link: LinkPlan::default(),
            compile: None,
            java: None,
            copy: None,
            implicit_inputs: Vec::new(),
            test: None,
        }
    }
}

/// Derive the deterministic plan-graph identifier for `(path, name)`.
///
/// `(path, name)` is the registry's identity contract, so identifiers cannot
/// collide as long as the sanitized forms stay injective per graph, which
/// holds for the path/name character sets accepted by the build definitions.
pub fn plan_id(path: &str, name: &str) -> CompactString {
    format_compact!("{}_{}", sanitize_id(path), sanitize_id(name))
}

/// Like [`plan_id`] but with an artifact-kind suffix, e.g. `dynamic`.
pub fn plan_id_suffixed(path: &str, name: &str, suffix: Option<&str>) -> CompactString {
    match suffix {
        Some(suffix) => format_compact!("{}_{}_{}", sanitize_id(path), sanitize_id(name), suffix),
        None => plan_id(path, name),
    }
}

/// Suffix used for the shared form of a library.
pub const DYNAMIC_SUFFIX: &str = "dynamic";

/// Sanitize one path or name component for use in a plan-graph identifier.
pub fn sanitize_id(part: &str) -> CompactString {
    part.chars()
        .map(|c| match c {
            '/' | '.' | '-' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoketest_labels() {
        let key = TargetKey::from_label("//base/string:string").unwrap();
        assert_eq!(key, TargetKey::new("base/string", "string"));
        assert!(!key.is_external());
        assert_eq!(key.to_string(), "//base/string:string");

        let key = TargetKey::from_label("base/string:string").unwrap();
        assert_eq!(key, TargetKey::new("base/string", "string"));

        let key = TargetKey::from_label("#pthread").unwrap();
        assert!(key.is_external());
        assert_eq!(key.to_string(), "#pthread");

        assert_eq!(TargetKey::from_label("no-colon"), None);
        assert_eq!(TargetKey::from_label(":name"), None);
        assert_eq!(TargetKey::from_label("path:"), None);
        assert_eq!(TargetKey::from_label("#"), None);
    }

    #[test]
    fn smoketest_kind_roundtrip() {
        let kinds = [
            TargetKind::CcLibrary,
            TargetKind::PrebuiltCcLibrary,
            TargetKind::CcBinary,
            TargetKind::CcTest,
            TargetKind::CcPlugin,
            TargetKind::CcBenchmark,
            TargetKind::SwigLibrary,
            TargetKind::JavaLibrary,
            TargetKind::PrebuiltJavaLibrary,
            TargetKind::JavaBinary,
            TargetKind::JavaTest,
        ];
        for kind in kinds {
            assert_eq!(kind.as_str().parse::<TargetKind>().unwrap(), kind);
        }
        assert!("cc_lib".parse::<TargetKind>().is_err());
    }

    #[test]
    fn kind_capabilities() {
        assert!(TargetKind::CcLibrary.is_library_like());
        assert!(TargetKind::PrebuiltCcLibrary.is_library_like());
        assert!(TargetKind::CcPlugin.is_library_like());
        assert!(!TargetKind::CcBinary.is_library_like());
        assert!(!TargetKind::CcTest.is_library_like());

        assert!(TargetKind::CcBenchmark.is_cc_compiled());
        assert!(!TargetKind::PrebuiltCcLibrary.is_cc_compiled());
        assert!(!TargetKind::JavaLibrary.is_cc_compiled());

        assert!(TargetKind::CcBinary.needs_static_prebuilt());
        assert!(TargetKind::SwigLibrary.needs_static_prebuilt());
        assert!(!TargetKind::CcLibrary.needs_static_prebuilt());

        assert!(TargetKind::JavaLibrary.is_java_compiled());
        assert!(!TargetKind::PrebuiltJavaLibrary.is_java_compiled());
        assert!(TargetKind::PrebuiltJavaLibrary.is_java());
    }

    #[test]
    fn heap_check_parse() {
        for value in HeapCheck::ALLOWED {
            let mode = HeapCheck::parse(value).unwrap();
            assert_eq!(mode.as_str(), *value);
        }
        assert_eq!(HeapCheck::parse("bogus"), None);
        assert_eq!(HeapCheck::parse(""), None);
    }

    #[test]
    fn plan_id_is_deterministic() {
        assert_eq!(plan_id("base/string", "string"), "base_string_string");
        assert_eq!(plan_id("third-party/re2", "re2.lib"), "third_party_re2_re2_lib");
        assert_eq!(
            plan_id_suffixed("base/string", "string", Some(DYNAMIC_SUFFIX)),
            "base_string_string_dynamic"
        );
        assert_eq!(plan_id_suffixed("a", "b", None), plan_id("a", "b"));
    }

    #[test]
    fn lib_ref_display() {
        let system = LibRef::for_key(&TargetKey::external("z"), None);
        assert_eq!(system, LibRef::System("z".into()));
        assert_eq!(system.to_string(), "'z'");

        let built = LibRef::for_key(&TargetKey::new("base", "log"), Some(DYNAMIC_SUFFIX));
        assert_eq!(built, LibRef::Built("base_log_dynamic".into()));
        assert_eq!(built.to_string(), "base_log_dynamic");
    }
}
