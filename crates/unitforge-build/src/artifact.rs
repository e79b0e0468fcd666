//! Build artifacts: one compilable test per scenario.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use unitforge_core::domain::{Rendering, TestScenario, TypeModel};
use unitforge_core::synth::render::include_name;
use unitforge_core::{render_test, MockFabricator, MockSet, ProjectIndex};

/// Everything needed to compile and run one scenario in isolation.
#[derive(Debug, Clone)]
pub struct BuildArtifact {
    pub id: String,
    pub scenario: TestScenario,
    /// Private working directory; nothing else writes here.
    pub dir: PathBuf,
    pub mocks: MockSet,
    /// Quoted includes of the test source, target header first.
    pub includes: Vec<String>,
    pub project_root: PathBuf,
    /// Absolute directory of the target's own header.
    pub header_dir: PathBuf,
    /// Every other project header directory.
    pub extra_include_dirs: Vec<PathBuf>,
    pub impl_sources: Vec<PathBuf>,
}

impl BuildArtifact {
    pub fn source_path(&self) -> PathBuf {
        self.dir.join("test.cpp")
    }

    pub fn mock_dir(&self) -> PathBuf {
        self.dir.join("mocks")
    }

    pub fn binary_path(&self) -> PathBuf {
        self.dir.join("test_bin")
    }

    pub fn render(&self, rendering: Rendering) -> String {
        render_test(&self.scenario, rendering, &self.includes)
    }

    /// Create the artifact directory and write the fabricated mocks. The
    /// mock directory always exists so its `-I` entry is valid.
    pub fn prepare(&self) -> Result<()> {
        let mock_dir = self.mock_dir();
        std::fs::create_dir_all(&mock_dir).with_context(|| format!("create {:?}", mock_dir))?;
        for header in &self.mocks.headers {
            let path = mock_dir.join(&header.path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
            }
            std::fs::write(&path, &header.contents).with_context(|| format!("write {:?}", path))?;
        }
        Ok(())
    }

    pub fn write_source(&self, source: &str) -> Result<()> {
        let path = self.source_path();
        std::fs::write(&path, source).with_context(|| format!("write {:?}", path))
    }
}

/// Turns scenarios into artifacts for one iteration.
pub struct ArtifactPlanner<'a> {
    index: &'a ProjectIndex,
    types: &'a [TypeModel],
    mocks: BTreeMap<(String, PathBuf), MockSet>,
}

impl<'a> ArtifactPlanner<'a> {
    pub fn new(index: &'a ProjectIndex, types: &'a [TypeModel]) -> Self {
        Self {
            index,
            types,
            mocks: BTreeMap::new(),
        }
    }

    fn owner(&self, scenario: &TestScenario) -> Option<&'a TypeModel> {
        self.types
            .iter()
            .find(|t| t.qualified_name() == scenario.operation.owner && t.header == scenario.header)
    }

    fn mocks_for(&mut self, scenario: &TestScenario) -> MockSet {
        let key = (scenario.operation.owner.clone(), scenario.header.clone());
        if let Some(set) = self.mocks.get(&key) {
            return set.clone();
        }
        let set = self
            .owner(scenario)
            .map(|ty| MockFabricator::new(self.index).fabricate(ty))
            .unwrap_or_default();
        self.mocks.insert(key, set.clone());
        set
    }

    /// One artifact per scenario under `artifacts_dir`. Directory names are
    /// the scenario slugs, suffixed when two slugs collide.
    pub fn plan(&mut self, scenarios: &[TestScenario], artifacts_dir: &Path) -> Vec<BuildArtifact> {
        let root = self.index.root().to_path_buf();
        let header_dirs = self.index.header_dirs();
        let mut used: BTreeSet<String> = BTreeSet::new();

        scenarios
            .iter()
            .map(|scenario| {
                let slug = scenario.slug();
                let mut id = slug.clone();
                let mut n = 2;
                while !used.insert(id.clone()) {
                    id = format!("{}-{}", slug, n);
                    n += 1;
                }

                let mocks = self.mocks_for(scenario);
                let mut includes = vec![include_name(&scenario.header)];
                includes.extend(mocks.force_includes.iter().cloned());
                let header_dir = root.join(scenario.header.parent().unwrap_or_else(|| Path::new("")));

                BuildArtifact {
                    dir: artifacts_dir.join(&id),
                    id,
                    scenario: scenario.clone(),
                    mocks,
                    includes,
                    project_root: root.clone(),
                    header_dir,
                    extra_include_dirs: header_dirs.clone(),
                    impl_sources: self.index.implementation_closure(&scenario.header),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet as Set;
    use unitforge_core::{Extractor, Synthesizer};

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn test_plan_and_prepare() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("proj");
        write(
            &root,
            "inc/Driver.h",
            "#pragma once\n#include \"hal/uart.h\"\nclass Driver {\npublic:\n    void Start();\nprivate:\n    Uart bus_;\n};\n",
        );
        write(&root, "src/Driver.cpp", "#include \"Driver.h\"\nvoid Driver::Start() { bus_.Open(1); }\n");

        let model = Extractor::new(&root).extract().unwrap();
        let index = ProjectIndex::from_model(&model);
        let output = Synthesizer::default().synthesize(&model.types, None, &Set::new());
        assert!(!output.scenarios.is_empty());

        let artifacts_dir = dir.path().join("out/artifacts");
        let mut planner = ArtifactPlanner::new(&index, &model.types);
        let artifacts = planner.plan(&output.scenarios, &artifacts_dir);
        assert_eq!(artifacts.len(), output.scenarios.len());

        let ids: Set<&str> = artifacts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids.len(), artifacts.len());

        let first = &artifacts[0];
        assert_eq!(first.includes[0], "Driver.h");
        assert_eq!(first.header_dir, root.join("inc"));
        assert_eq!(first.impl_sources, vec![root.join("src/Driver.cpp")]);

        first.prepare().unwrap();
        first.write_source(&first.render(Rendering::Primary)).unwrap();
        assert!(first.mock_dir().join("hal/uart.h").is_file());
        let source = std::fs::read_to_string(first.source_path()).unwrap();
        assert!(source.contains("#include \"Driver.h\""));
    }
}
