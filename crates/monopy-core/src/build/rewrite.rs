use monopy_domain::{DependencySpec, Manifest, ManifestDialect, SourceRegistryMerger};

use super::ResolvedDependency;

/// Replace every dependency section of the bundle manifest with `resolved`.
///
/// The python constraint keeps its original layout. Sources referenced by
/// resolved dependencies are merged with the ones the manifest declares and
/// each dependency is pointed at the merged name.
pub fn apply(manifest: &mut Manifest, resolved: Vec<ResolvedDependency>) {
    manifest.dependencies.clear();
    manifest.groups.clear();
    if manifest.dialect == ManifestDialect::Uv {
        manifest.reset_dependency_sources = true;
    }

    let mut merger = SourceRegistryMerger::with_declared(manifest.sources.clone());
    for dependency in &resolved {
        if let Some(source) = &dependency.source {
            merger.register(source.clone());
        }
    }

    for dependency in resolved {
        let mut spec = dependency.spec;
        if let (DependencySpec::Registry(registry), Some(source)) = (&mut spec, &dependency.source) {
            registry.source = Some(merger.name_for(source));
        }
        manifest.set_dependency(None, &dependency.name, spec);
    }
    manifest.sources = merger.merged();
}
