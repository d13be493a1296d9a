//! Two-phase plans for Java targets: compile to a class tree, then package
//! the tree into an archive.

use compact_str::format_compact;
use rb_cfg::PlanConfig;
use rb_graph::Registry;
use rb_types::{
    ArtifactKind, JavaPlan, LinkPlan, Target, TargetKind, TargetPlan, TestMeta, plan_id,
};

/// Plan a `java_library`, `java_binary`, or `java_test`.
///
/// A dependency contributes to the compile classpath only if it is itself a
/// compilable archive target; prebuilt archives are referenced by their file
/// path in the source tree and are never recompiled.
pub(crate) fn plan_java(registry: &Registry, config: &PlanConfig, target: &Target) -> TargetPlan {
    let key = &target.key;
    let build_dir = &config.build_dir;

    let mut classpath = Vec::new();
    for dep in &target.expanded_deps {
        let Some(dep_target) = registry.lookup(dep) else {
            continue;
        };
        if dep_target.kind.is_java_compiled() {
            classpath.push(format_compact!("{}/{}/{}.jar", build_dir, dep.path, dep.name));
        } else if dep_target.kind == TargetKind::PrebuiltJavaLibrary {
            classpath.push(format_compact!("{}/{}.jar", dep.path, dep.name));
        }
    }

    let jar = format_compact!("{}/{}/{}.jar", build_dir, key.path, key.name);
    let java = JavaPlan {
        classes_dir: format_compact!("{}/{}/{}.classes", build_dir, key.path, key.name),
        jar: jar.clone(),
        classpath,
    };

    let test = (target.kind == TargetKind::JavaTest).then(|| TestMeta {
        testdata: target.attrs.testdata.clone(),
        always_run: target.attrs.always_run,
        exclusive: target.attrs.exclusive,
        heap_check: None,
    });

    TargetPlan {
        key: key.clone(),
        id: plan_id(&key.path, &key.name),
        output: Some(jar),
        link: LinkPlan {
            artifact_kind: ArtifactKind::JavaArchive,
            ..LinkPlan::default()
        },
        compile: None,
        java: Some(java),
        copy: None,
        implicit_inputs: Vec::new(),
        test,
    }
}
