//! Include resolution over an extracted project tree.
//!
//! Resolution mirrors what the compiler will see: the including file's own
//! directory, then the project root, then every directory that holds a
//! project header (all of which are passed as `-I`).

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Component, Path, PathBuf};

use crate::domain::unqualified;
use crate::extract::{SourceFile, SourceModel};

#[derive(Debug, Clone)]
pub struct ProjectIndex {
    root: PathBuf,
    headers: BTreeSet<PathBuf>,
    includes: BTreeMap<PathBuf, Vec<String>>,
    sources: Vec<SourceFile>,
    header_dirs: Vec<PathBuf>,
    declared: BTreeSet<String>,
}

/// Lexically normalise `a/./b/../c` to `a/c`.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

impl ProjectIndex {
    pub fn from_model(model: &SourceModel) -> Self {
        let headers: BTreeSet<PathBuf> = model.headers.iter().map(|h| h.path.clone()).collect();
        let mut includes: BTreeMap<PathBuf, Vec<String>> = model
            .headers
            .iter()
            .map(|h| (h.path.clone(), h.includes.clone()))
            .collect();
        for source in &model.sources {
            includes.insert(source.path.clone(), source.includes.clone());
        }
        let header_dirs: BTreeSet<PathBuf> = headers
            .iter()
            .map(|h| h.parent().map(Path::to_path_buf).unwrap_or_default())
            .collect();
        let declared = model
            .headers
            .iter()
            .flat_map(|h| h.declares.iter().cloned())
            .chain(model.types.iter().map(|t| t.name.clone()))
            .collect();
        Self {
            root: model.root.clone(),
            headers,
            includes,
            sources: model.sources.clone(),
            header_dirs: header_dirs.into_iter().collect(),
            declared,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute directories containing project headers, sorted.
    pub fn header_dirs(&self) -> Vec<PathBuf> {
        self.header_dirs.iter().map(|d| self.root.join(d)).collect()
    }

    /// Project-relative header an include refers to, if it is in the tree.
    pub fn resolve(&self, including: &Path, include: &str) -> Option<PathBuf> {
        let target = Path::new(include);
        let local = including.parent().map(|p| p.join(target));
        local
            .into_iter()
            .chain(std::iter::once(target.to_path_buf()))
            .chain(self.header_dirs.iter().map(|d| d.join(target)))
            .map(|p| normalize(&p))
            .find(|p| self.headers.contains(p))
    }

    /// Quoted includes of a file that do not resolve inside the tree.
    pub fn unresolved_includes(&self, file: &Path) -> Vec<String> {
        self.includes
            .get(file)
            .map(|incs| {
                incs.iter()
                    .filter(|inc| self.resolve(file, inc).is_none())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Breadth-first walk from `header` over resolvable includes, pulling in
    /// same-stem implementation files of every header reached. Files
    /// defining `main` are never entered. Returns (every file reached,
    /// implementation files reached), project-relative.
    fn walk(&self, header: &Path) -> (BTreeSet<PathBuf>, BTreeSet<PathBuf>) {
        let mut seen_files: BTreeSet<PathBuf> = BTreeSet::new();
        let mut closure: BTreeSet<PathBuf> = BTreeSet::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        queue.push_back(header.to_path_buf());

        while let Some(file) = queue.pop_front() {
            if !seen_files.insert(file.clone()) {
                continue;
            }
            if self.headers.contains(&file) {
                for source in self.sources.iter().filter(|s| !s.defines_main && stem(&s.path) == stem(&file)) {
                    if closure.insert(source.path.clone()) {
                        queue.push_back(source.path.clone());
                    }
                }
            }
            if let Some(incs) = self.includes.get(&file) {
                for inc in incs {
                    if let Some(resolved) = self.resolve(&file, inc) {
                        queue.push_back(resolved);
                    }
                }
            }
        }
        (seen_files, closure)
    }

    /// Every project file a test of `header` ends up reading, relative and
    /// sorted.
    pub fn reachable_files(&self, header: &Path) -> Vec<PathBuf> {
        self.walk(header).0.into_iter().collect()
    }

    /// Implementation files to compile alongside a test for `header`: the
    /// same-stem sources of every header reachable through resolvable
    /// includes, followed transitively through those sources' own includes.
    /// Paths are absolute and sorted.
    pub fn implementation_closure(&self, header: &Path) -> Vec<PathBuf> {
        self.walk(header)
            .1
            .into_iter()
            .map(|p| self.root.join(p))
            .collect()
    }

    /// Whether any project header declares `name` (unqualified).
    pub fn declares(&self, name: &str) -> bool {
        self.declared.contains(unqualified(name))
    }
}
