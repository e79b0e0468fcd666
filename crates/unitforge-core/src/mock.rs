//! Mock Fabricator.
//!
//! For every dependency of a target type that nothing in the project tree
//! declares, fabricate a minimal stand-in header. Unresolvable quoted
//! includes reached from the target get a guard-only header so that they
//! resolve. Fabricated headers live in a directory searched before any
//! project directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{slugify, unqualified, TypeModel};
use crate::extract::member_user_types;
use crate::project::ProjectIndex;

/// Unresolved quoted includes that name toolchain headers, never shadowed.
const SYSTEM_HEADERS: &[&str] = &[
    "assert.h", "ctype.h", "errno.h", "float.h", "limits.h", "math.h", "stdarg.h", "stdbool.h",
    "stddef.h", "stdint.h", "stdio.h", "stdlib.h", "string.h", "time.h", "unistd.h",
];

/// Directory, under the mock include directory, for stand-ins that no
/// include spells. Keeps them from shadowing real headers of the same name.
pub const FALLBACK_MOCK_DIR: &str = "unitforge-mocks";

/// Conversion helper every stub method returns. Converts to any
/// value-initialisable type.
const ANY_RETURN: &str = "\
#ifndef UNITFORGE_MOCK_ANY_RETURN
#define UNITFORGE_MOCK_ANY_RETURN
struct UnitforgeAnyReturn {
    template <typename T>
    operator T() const { return T{}; }
};
#endif
";

/// One fabricated header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockHeader {
    /// Relative to the mock include directory, as spelled in `#include`.
    pub path: PathBuf,
    /// Dependencies stubbed here; empty for a guard-only header.
    pub stubs: Vec<String>,
    pub contents: String,
}

/// Everything fabricated for one target type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockSet {
    pub headers: Vec<MockHeader>,
    /// Mock headers the test source must include itself because no real
    /// header pulls them in.
    pub force_includes: Vec<String>,
}

impl MockSet {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

pub struct MockFabricator<'a> {
    index: &'a ProjectIndex,
}

fn include_guard(path: &Path) -> String {
    format!("UNITFORGE_MOCK_{}", slugify(&path.to_string_lossy()).to_ascii_uppercase())
}

fn include_spelling(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn is_system_header(include: &str) -> bool {
    Path::new(include).extension().is_none() || SYSTEM_HEADERS.contains(&include)
}

/// Stub class for one dependency, wrapped in its namespace when qualified.
fn stub_class(out: &mut String, dependency: &str, methods: &[String]) {
    let name = unqualified(dependency);
    let namespace = dependency
        .strip_suffix(name)
        .and_then(|ns| ns.strip_suffix("::"))
        .map(|ns| ns.trim_start_matches("::"))
        .filter(|ns| !ns.is_empty());

    if let Some(ns) = namespace {
        let _ = writeln!(out, "namespace {} {{\n", ns);
    }
    let _ = writeln!(out, "class {} {{", name);
    out.push_str("public:\n");
    let _ = writeln!(out, "    {}() = default;", name);
    out.push_str("    template <typename... Args>\n");
    let _ = writeln!(out, "    explicit {}(Args&&...) {{}}", name);
    let _ = writeln!(out, "    virtual ~{}() = default;", name);
    for method in methods {
        out.push_str("    template <typename... Args>\n");
        let _ = writeln!(out, "    UnitforgeAnyReturn {}(Args&&...) {{ return {{}}; }}", method);
    }
    out.push_str("};\n");
    if let Some(ns) = namespace {
        let _ = writeln!(out, "\n}}  // namespace {}", ns);
    }
}

fn render_header(path: &Path, stubs: &BTreeMap<String, Vec<String>>) -> String {
    let guard = include_guard(path);
    let mut out = String::new();
    let _ = writeln!(out, "// Generated by unitforge: stand-in for {}.", include_spelling(path));
    let _ = writeln!(out, "#ifndef {}", guard);
    let _ = writeln!(out, "#define {}", guard);
    if !stubs.is_empty() {
        out.push_str("\n#include <cstdint>\n#include <string>\n\n");
        out.push_str(ANY_RETURN);
        for (dependency, methods) in stubs {
            out.push('\n');
            stub_class(&mut out, dependency, methods);
        }
    }
    let _ = writeln!(out, "\n#endif  // {}", guard);
    out
}

impl<'a> MockFabricator<'a> {
    pub fn new(index: &'a ProjectIndex) -> Self {
        Self { index }
    }

    /// Dependencies of `target` that no project header declares.
    pub fn undeclared_dependencies(&self, target: &TypeModel) -> BTreeSet<String> {
        target
            .dependencies
            .iter()
            .cloned()
            .chain(member_user_types(target))
            .chain(target.dependency_calls.keys().cloned())
            .filter(|d| unqualified(d) != target.name && !self.index.declares(d))
            .collect()
    }

    /// `unitforge-mocks/<Name>.h`, suffixed if the project itself resolves
    /// that spelling.
    fn fallback_path(&self, target: &TypeModel, name: &str) -> PathBuf {
        let dir = Path::new(FALLBACK_MOCK_DIR);
        let mut path = dir.join(format!("{}.h", name));
        let mut n = 2;
        while self.index.resolve(&target.header, &include_spelling(&path)).is_some() {
            path = dir.join(format!("{}-{}.h", name, n));
            n += 1;
        }
        path
    }

    /// Fabricate stand-ins for one target type. Identical inputs give
    /// byte-identical output.
    pub fn fabricate(&self, target: &TypeModel) -> MockSet {
        let reachable = self.index.reachable_files(&target.header);
        let mut unresolved: BTreeSet<String> = reachable
            .iter()
            .flat_map(|file| self.index.unresolved_includes(file))
            .filter(|inc| !is_system_header(inc))
            .collect();

        // path -> (dependency -> stub methods)
        let mut planned: BTreeMap<PathBuf, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        let mut force_includes: BTreeSet<String> = BTreeSet::new();

        for dependency in self.undeclared_dependencies(target) {
            let name = unqualified(&dependency);
            let matching_include = unresolved.iter().find(|inc| {
                Path::new(inc.as_str())
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map_or(false, |stem| stem.eq_ignore_ascii_case(name))
            });
            let path = match matching_include {
                Some(inc) => PathBuf::from(inc),
                None => {
                    let path = self.fallback_path(target, name);
                    force_includes.insert(include_spelling(&path));
                    path
                }
            };
            let methods = target
                .dependency_calls
                .iter()
                .find(|(dep, _)| unqualified(dep) == name)
                .map(|(_, methods)| methods.clone())
                .unwrap_or_default();
            planned.entry(path).or_default().insert(dependency, methods);
        }

        unresolved.retain(|inc| !planned.contains_key(Path::new(inc.as_str())));
        for inc in unresolved {
            planned.entry(PathBuf::from(inc)).or_default();
        }

        let headers: Vec<MockHeader> = planned
            .into_iter()
            .map(|(path, stubs)| MockHeader {
                contents: render_header(&path, &stubs),
                stubs: stubs.keys().cloned().collect(),
                path,
            })
            .collect();

        debug!(
            target_type = %target.qualified_name(),
            mocks = headers.len(),
            force_includes = force_includes.len(),
            "Mocks fabricated"
        );
        MockSet {
            headers,
            force_includes: force_includes.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DataMember, OperationModel, Parameter};
    use crate::extract::{HeaderFile, SourceFile, SourceModel};

    fn driver() -> TypeModel {
        let mut ty = TypeModel::new("Driver", "inc/Driver.h");
        ty.namespace = vec!["app".to_string()];
        ty.operations.push(
            OperationModel::method("app::Driver", "Attach", "void")
                .with_parameters(vec![Parameter::new("bus", "hal::Uart &"), Parameter::new("mode", "Mode")]),
        );
        ty.dependencies = vec!["hal::Uart".to_string(), "Mode".to_string()];
        ty.members.push(DataMember {
            name: "clock_".to_string(),
            type_name: "Clock".to_string(),
        });
        ty.dependency_calls
            .insert("Clock".to_string(), vec!["Now".to_string(), "Reset".to_string()]);
        ty
    }

    fn index() -> ProjectIndex {
        ProjectIndex::from_model(&SourceModel {
            root: PathBuf::from("/proj"),
            types: vec![driver()],
            headers: vec![
                HeaderFile {
                    path: PathBuf::from("inc/Driver.h"),
                    includes: vec!["hal/uart.h".to_string(), "Modes.h".to_string(), "config.h".to_string()],
                    declares: vec!["Driver".to_string()],
                },
                HeaderFile {
                    path: PathBuf::from("inc/Modes.h"),
                    includes: Vec::new(),
                    declares: vec!["Mode".to_string()],
                },
            ],
            sources: vec![SourceFile {
                path: PathBuf::from("src/Driver.cpp"),
                includes: vec!["Driver.h".to_string(), "stdio.h".to_string()],
                defines_main: false,
            }],
            diagnostics: Vec::new(),
        })
    }

    #[test]
    fn test_only_undeclared_dependencies_are_mocked() {
        let index = index();
        let fabricator = MockFabricator::new(&index);
        let deps = fabricator.undeclared_dependencies(&driver());
        assert_eq!(
            deps.into_iter().collect::<Vec<_>>(),
            vec!["Clock".to_string(), "hal::Uart".to_string()]
        );
    }

    #[test]
    fn test_mock_paths_and_force_includes() {
        let index = index();
        let mocks = MockFabricator::new(&index).fabricate(&driver());
        let paths: Vec<String> = mocks.headers.iter().map(|h| include_spelling(&h.path)).collect();
        assert_eq!(paths, vec!["config.h", "hal/uart.h", "unitforge-mocks/Clock.h"]);
        assert_eq!(mocks.force_includes, vec!["unitforge-mocks/Clock.h".to_string()]);

        let guard_only = &mocks.headers[0];
        assert!(guard_only.stubs.is_empty());
        assert!(!guard_only.contents.contains("class"));
        assert!(guard_only.contents.contains("#ifndef UNITFORGE_MOCK_CONFIG_H"));
    }

    #[test]
    fn test_stub_contents() {
        let index = index();
        let mocks = MockFabricator::new(&index).fabricate(&driver());
        let uart = mocks.headers.iter().find(|h| h.stubs == vec!["hal::Uart".to_string()]).unwrap();
        assert!(uart.contents.contains("namespace hal {"));
        assert!(uart.contents.contains("class Uart {"));
        assert!(uart.contents.contains("virtual ~Uart() = default;"));

        let clock = mocks.headers.iter().find(|h| h.stubs == vec!["Clock".to_string()]).unwrap();
        assert!(clock.contents.contains("UnitforgeAnyReturn Now(Args&&...)"));
        assert!(clock.contents.contains("UnitforgeAnyReturn Reset(Args&&...)"));
        assert!(!clock.contents.contains("namespace"));
    }

    #[test]
    fn test_forced_mock_never_shadows_project_header() {
        let mut model = SourceModel {
            root: PathBuf::from("/proj"),
            types: vec![driver()],
            headers: vec![
                HeaderFile {
                    path: PathBuf::from("inc/Driver.h"),
                    includes: Vec::new(),
                    declares: vec!["Driver".to_string(), "Mode".to_string()],
                },
                HeaderFile {
                    path: PathBuf::from("inc/Clock.h"),
                    includes: Vec::new(),
                    declares: vec!["WallClock".to_string()],
                },
            ],
            sources: Vec::new(),
            diagnostics: Vec::new(),
        };
        let index = ProjectIndex::from_model(&model);
        let mocks = MockFabricator::new(&index).fabricate(&driver());
        assert!(mocks.force_includes.contains(&"unitforge-mocks/Clock.h".to_string()));
        assert!(index.resolve(Path::new("inc/Driver.h"), "unitforge-mocks/Clock.h").is_none());

        model.headers.push(HeaderFile {
            path: PathBuf::from("unitforge-mocks/Clock.h"),
            includes: Vec::new(),
            declares: Vec::new(),
        });
        let index = ProjectIndex::from_model(&model);
        let mocks = MockFabricator::new(&index).fabricate(&driver());
        assert!(mocks.force_includes.contains(&"unitforge-mocks/Clock-2.h".to_string()));
        assert!(!mocks.force_includes.contains(&"unitforge-mocks/Clock.h".to_string()));
    }

    #[test]
    fn test_fabrication_is_deterministic() {
        let index = index();
        let fabricator = MockFabricator::new(&index);
        assert_eq!(fabricator.fabricate(&driver()), fabricator.fabricate(&driver()));
    }
}
