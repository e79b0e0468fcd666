//! Cumulative coverage counts.
//!
//! Every count is a sum, so merging is commutative and associative: any
//! order of merges over the same samples yields the same map.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{unqualified, OperationKind, OperationModel};

/// Hits of one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCoverage {
    pub start_line: u32,
    pub hits: u64,
}

/// Smaller of two start lines where 0 means unknown.
fn known_min(a: u32, b: u32) -> u32 {
    match (a, b) {
        (0, s) | (s, 0) => s,
        (a, b) => a.min(b),
    }
}

/// Line and function hits for one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    /// Line number -> execution count. Presence means instrumented.
    pub lines: BTreeMap<u32, u64>,
    pub functions: BTreeMap<String, FunctionCoverage>,
}

impl FileCoverage {
    pub fn declare_function(&mut self, name: String, start_line: u32) {
        let entry = self.functions.entry(name).or_insert(FunctionCoverage { start_line, hits: 0 });
        entry.start_line = known_min(entry.start_line, start_line);
    }

    pub fn record_function_hits(&mut self, name: &str, hits: u64) {
        match self.functions.get_mut(name) {
            Some(f) => f.hits += hits,
            None => {
                // FNDA before FN: keep the hits, the start line is unknown.
                self.functions.insert(name.to_string(), FunctionCoverage { start_line: 0, hits });
            }
        }
    }

    fn merge(&mut self, other: &FileCoverage) {
        for (line, hits) in &other.lines {
            *self.lines.entry(*line).or_insert(0) += hits;
        }
        for (name, f) in &other.functions {
            let entry = self
                .functions
                .entry(name.clone())
                .or_insert(FunctionCoverage { start_line: f.start_line, hits: 0 });
            entry.hits += f.hits;
            entry.start_line = known_min(entry.start_line, f.start_line);
        }
    }

    /// (instrumented lines, lines hit at least once)
    pub fn line_totals(&self) -> (u64, u64) {
        let found = self.lines.len() as u64;
        let hit = self.lines.values().filter(|h| **h > 0).count() as u64;
        (found, hit)
    }

    /// (functions, functions entered at least once)
    pub fn function_totals(&self) -> (u64, u64) {
        let found = self.functions.len() as u64;
        let hit = self.functions.values().filter(|f| f.hits > 0).count() as u64;
        (found, hit)
    }

    /// Lines `[start, end)` of the function starting at `start`: up to the
    /// next function's start, or past the last instrumented line.
    fn function_span(&self, start: u32) -> (u32, u32) {
        let end = self
            .functions
            .values()
            .map(|f| f.start_line)
            .filter(|s| *s > start)
            .min()
            .unwrap_or_else(|| self.lines.keys().next_back().map_or(start, |l| l + 1));
        (start, end.max(start + 1))
    }
}

/// Per-file coverage keyed by source path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageMap {
    files: BTreeMap<PathBuf, FileCoverage>,
}

/// Itanium nested-name fragment for `ns::Type::op`, e.g. `3geo5Shape4Area`;
/// constructors end in `C` (`C1`/`C2` follow in the symbol).
fn mangled_fragment(op: &OperationModel) -> String {
    let mut fragment: String = op
        .owner
        .split("::")
        .filter(|part| !part.is_empty())
        .map(|part| format!("{}{}", part.len(), part))
        .collect();
    match op.kind {
        OperationKind::Constructor => fragment.push('C'),
        OperationKind::Destructor => fragment.push('D'),
        OperationKind::Method => fragment.push_str(&format!("{}{}", op.name.len(), op.name)),
    }
    fragment
}

/// Whether a recorded function name (mangled or demangled) is `op`.
pub fn function_matches(name: &str, op: &OperationModel) -> bool {
    if name.starts_with("_Z") {
        let fragment = mangled_fragment(op);
        let Some(pos) = name.find(&fragment) else {
            return false;
        };
        let rest = &name[pos + fragment.len()..];
        // A nested name `N...E` must end right after the operation name
        // (`...4AreaEv`), or the ctor/dtor marker must be followed by its
        // variant digit.
        return match op.kind {
            OperationKind::Method => rest.starts_with('E'),
            _ => rest.starts_with(|c: char| c.is_ascii_digit()),
        };
    }
    let short_owner = unqualified(&op.owner);
    let call = format!("{}::{}(", op.owner, op.name);
    let short_call = format!("{}::{}(", short_owner, op.name);
    name.contains(&call) || name.starts_with(&short_call) || name.contains(&format!("::{}", short_call))
}

/// Lexical containment of `path` in `root`, rejecting `..` escapes.
fn relative_under(path: &Path, root: &Path) -> Option<PathBuf> {
    let rel = if path.is_absolute() {
        path.strip_prefix(root).ok()?
    } else {
        path
    };
    if rel.components().any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))) {
        return None;
    }
    Some(rel.to_path_buf())
}

impl CoverageMap {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn file(&self, path: &Path) -> Option<&FileCoverage> {
        self.files.get(path)
    }

    pub fn files(&self) -> impl Iterator<Item = (&PathBuf, &FileCoverage)> {
        self.files.iter()
    }

    /// Add a parsed file record, summing with any record for the same path.
    pub fn add_file(&mut self, path: PathBuf, file: FileCoverage) {
        self.files.entry(path).or_default().merge(&file);
    }

    pub fn merge(&mut self, other: &CoverageMap) {
        for (path, file) in &other.files {
            self.files.entry(path.clone()).or_default().merge(file);
        }
    }

    /// Keep only files physically under `root`, keyed relative to it.
    pub fn restricted_to(&self, root: &Path) -> CoverageMap {
        let mut out = CoverageMap::default();
        for (path, file) in &self.files {
            if let Some(rel) = relative_under(path, root) {
                out.add_file(rel, file.clone());
            }
        }
        out
    }

    pub fn line_totals(&self) -> (u64, u64) {
        self.files.values().fold((0, 0), |(f, h), file| {
            let (ff, fh) = file.line_totals();
            (f + ff, h + fh)
        })
    }

    pub fn function_totals(&self) -> (u64, u64) {
        self.files.values().fold((0, 0), |(f, h), file| {
            let (ff, fh) = file.function_totals();
            (f + ff, h + fh)
        })
    }

    /// Aggregate line coverage in percent; 0 when nothing is instrumented.
    pub fn line_percent(&self) -> f64 {
        let (found, hit) = self.line_totals();
        percent(hit, found)
    }

    /// Observed line ratio of one operation over the line span of every
    /// matching function. `None` when no recorded function matches (inline
    /// or never-instrumented code).
    pub fn operation_ratio(&self, op: &OperationModel) -> Option<f64> {
        let mut found = 0u64;
        let mut hit = 0u64;
        let mut matched = false;
        for file in self.files.values() {
            for (name, f) in &file.functions {
                if !function_matches(name, op) {
                    continue;
                }
                matched = true;
                if f.start_line == 0 {
                    found += 1;
                    hit += u64::from(f.hits > 0);
                    continue;
                }
                let (start, end) = file.function_span(f.start_line);
                for (_, hits) in file.lines.range(start..end) {
                    found += 1;
                    hit += u64::from(*hits > 0);
                }
            }
        }
        matched.then(|| if found == 0 { 0.0 } else { hit as f64 / found as f64 })
    }
}

pub fn percent(hit: u64, found: u64) -> f64 {
    if found == 0 {
        0.0
    } else {
        hit as f64 * 100.0 / found as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(lines: &[(u32, u64)], functions: &[(&str, u32, u64)]) -> FileCoverage {
        FileCoverage {
            lines: lines.iter().copied().collect(),
            functions: functions
                .iter()
                .map(|(n, s, h)| (n.to_string(), FunctionCoverage { start_line: *s, hits: *h }))
                .collect(),
        }
    }

    fn map(path: &str, f: FileCoverage) -> CoverageMap {
        let mut m = CoverageMap::default();
        m.add_file(PathBuf::from(path), f);
        m
    }

    #[test]
    fn test_merge_sums_counts() {
        let mut a = map("/p/a.cpp", file(&[(1, 1), (2, 0)], &[("f", 1, 1)]));
        let b = map("/p/a.cpp", file(&[(2, 3), (3, 0)], &[("f", 1, 2)]));
        a.merge(&b);
        let merged = a.file(Path::new("/p/a.cpp")).unwrap();
        assert_eq!(merged.lines.get(&2), Some(&3));
        assert_eq!(merged.functions.get("f").unwrap().hits, 3);
        assert_eq!(a.line_totals(), (3, 2));
    }

    #[test]
    fn test_restricted_to_root() {
        let mut m = map("/proj/src/a.cpp", file(&[(1, 1)], &[]));
        m.merge(&map("/usr/include/c++/vector", file(&[(1, 1)], &[])));
        m.merge(&map("/proj/../etc/x.cpp", file(&[(1, 1)], &[])));
        let r = m.restricted_to(Path::new("/proj"));
        let paths: Vec<&PathBuf> = r.files().map(|(p, _)| p).collect();
        assert_eq!(paths, vec![&PathBuf::from("src/a.cpp")]);
    }

    #[test]
    fn test_function_matching() {
        let area = OperationModel::method("geo::Shape", "Area", "int");
        assert!(function_matches("_ZNK3geo5Shape4AreaEv", &area));
        assert!(function_matches("geo::Shape::Area() const", &area));
        assert!(!function_matches("_ZNK3geo5Shape8AreaSlowEv", &area));
        assert!(!function_matches("geo::Shape::AreaSlow()", &area));

        let ctor = OperationModel::constructor("geo::Shape");
        assert!(function_matches("_ZN3geo5ShapeC2Ev", &ctor));
        assert!(!function_matches("_ZN3geo5Shape4AreaEv", &ctor));

        let global = OperationModel::method("Counter", "Tick", "void");
        assert!(function_matches("_ZN7Counter4TickEv", &global));
        assert!(function_matches("Counter::Tick()", &global));
    }

    #[test]
    fn test_operation_ratio_over_function_span() {
        let m = map(
            "src/Shape.cpp",
            file(
                &[(3, 1), (4, 1), (5, 0), (8, 0), (9, 0)],
                &[("_ZN5Shape4AreaEv", 3, 1), ("_ZN5Shape5ResetEv", 8, 0)],
            ),
        );
        let area = OperationModel::method("Shape", "Area", "int");
        let ratio = m.operation_ratio(&area).unwrap();
        assert!((ratio - 2.0 / 3.0).abs() < 1e-9);

        let reset = OperationModel::method("Shape", "Reset", "void");
        assert_eq!(m.operation_ratio(&reset), Some(0.0));

        let missing = OperationModel::method("Shape", "Inline", "void");
        assert_eq!(m.operation_ratio(&missing), None);
    }

    #[test]
    fn test_percent_of_empty_map_is_zero() {
        assert_eq!(CoverageMap::default().line_percent(), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }
}
