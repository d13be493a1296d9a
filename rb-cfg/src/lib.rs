//! Planning configuration for `rb`.
//!
//! A [`PlanConfig`] is loaded once, before any planning begins, and is never
//! mutated afterward. Everything that used to be an implicit global in older
//! build tools (default flags, injected framework libraries, test linking
//! policy) is an explicit field here and gets passed into the planners by
//! reference.

use compact_str::CompactString;
use serde::Deserialize;

/// Build profile, selects optimization behavior and the prebuilt flavor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Debug,
    #[default]
    Release,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Debug => "debug",
            Profile::Release => "release",
        }
    }
}

/// Immutable configuration consumed by dependency expansion and planning.
///
/// Dependency labels in this struct use the same forms the build definitions
/// do: `path:name` for targets built by `rb`, `#name` for system libraries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanConfig {
    /// Build profile.
    pub profile: Profile,
    /// Machine word width, `"32"` or `"64"`; part of the prebuilt flavor.
    pub machine: CompactString,
    /// Root of the build output tree.
    pub build_dir: CompactString,
    /// Also build the shared form of every library.
    pub generate_dynamic: bool,

    /// Default optimization flags when a target declares none. Applied with
    /// a `-` prefix; falls back to `-O2` when empty.
    pub optimize: Vec<CompactString>,
    /// Default linker flags appended to every statically linked binary.
    pub linkflags: Vec<CompactString>,
    /// Extra libraries every binary links against.
    pub binary_extra_libs: Vec<CompactString>,

    /// Default dynamic-link policy for tests that leave it unspecified.
    pub test_dynamic_link: bool,
    /// Test-framework core libraries injected into every test.
    pub test_framework_libs: Vec<CompactString>,
    /// Test-framework main-entry libraries injected into every test.
    pub test_main_libs: Vec<CompactString>,
    /// Default heap-check mode for tests that leave it unspecified.
    pub default_heap_check: Option<CompactString>,
    /// Heap-check profiler libraries injected when a test enables checking.
    pub heap_check_libs: Vec<CompactString>,
    /// Debug flavor of the heap-check profiler libraries.
    pub heap_check_debug_libs: Vec<CompactString>,

    /// Benchmark-framework core libraries injected into every benchmark.
    pub benchmark_libs: Vec<CompactString>,
    /// Benchmark-framework main-entry libraries injected into every benchmark.
    pub benchmark_main_libs: Vec<CompactString>,

    /// Source areas where `warning = "no"` is permitted, matched as path
    /// substrings.
    pub permitted_warning_areas: Vec<CompactString>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        PlanConfig {
            profile: Profile::default(),
            machine: CompactString::const_new("64"),
            build_dir: CompactString::const_new("build"),
            generate_dynamic: false,
            optimize: Vec::new(),
            linkflags: Vec::new(),
            binary_extra_libs: Vec::new(),
            test_dynamic_link: false,
            test_framework_libs: Vec::new(),
            test_main_libs: Vec::new(),
            default_heap_check: None,
            heap_check_libs: Vec::new(),
            heap_check_debug_libs: Vec::new(),
            benchmark_libs: Vec::new(),
            benchmark_main_libs: Vec::new(),
            permitted_warning_areas: vec![CompactString::const_new("thirdparty")],
        }
    }
}

impl PlanConfig {
    /// Parse a [`PlanConfig`] from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self, anyhow::Error> {
        let config = toml::from_str(raw)?;
        Ok(config)
    }
}
