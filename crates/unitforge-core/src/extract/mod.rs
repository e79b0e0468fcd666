//! Source Model Extractor.
//!
//! Walks a project tree and reconstructs, for every header, the classes and
//! structs it declares together with their public surface. The scanner is
//! deliberately tolerant: a file it cannot make sense of produces a
//! diagnostic and is skipped, never an abort.

pub mod scanner;
pub mod signature;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::domain::{
    base_type, unqualified, ConfigError, ExtractionError, ForgeResult, OperationKind,
    OperationModel, TypeModel, Visibility,
};
use scanner::{blank_noise, chunks, defines_main, quoted_includes, Chunk};
use signature::{clean_head, first_single_colon, parse_member, referenced_user_types, MemberDecl};

pub const HEADER_EXTENSIONS: &[&str] = &["h", "hh", "hpp", "hxx"];
pub const SOURCE_EXTENSIONS: &[&str] = &["cpp", "cc", "cxx", "c"];

/// A header seen during the walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderFile {
    /// Relative to the project root.
    pub path: PathBuf,
    pub includes: Vec<String>,
    /// Type-like names the header declares at any scope: classes (including
    /// forward declarations), enums, typedefs and aliases.
    #[serde(default)]
    pub declares: Vec<String>,
}

/// An implementation file seen during the walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Relative to the project root.
    pub path: PathBuf,
    pub includes: Vec<String>,
    /// Defines `int main(`; never linked into a test binary.
    pub defines_main: bool,
}

/// Everything the extractor learned about a project tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceModel {
    pub root: PathBuf,
    pub types: Vec<TypeModel>,
    pub headers: Vec<HeaderFile>,
    pub sources: Vec<SourceFile>,
    pub diagnostics: Vec<ExtractionError>,
}

/// Serialized view that excludes the absolute root, so moving a tree does
/// not change its fingerprint.
#[derive(Serialize)]
struct FingerprintView<'a> {
    types: &'a [TypeModel],
    headers: &'a [HeaderFile],
    sources: &'a [SourceFile],
}

impl SourceModel {
    /// SHA-256 over the canonical JSON form of the model.
    pub fn fingerprint(&self) -> String {
        let view = FingerprintView {
            types: &self.types,
            headers: &self.headers,
            sources: &self.sources,
        };
        let bytes = serde_json::to_vec(&view).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Look a type up by qualified or unqualified name.
    pub fn find_type(&self, name: &str) -> Option<&TypeModel> {
        self.types
            .iter()
            .find(|t| t.qualified_name() == name)
            .or_else(|| self.types.iter().find(|t| t.name == unqualified(name)))
    }

    pub fn instantiable_count(&self) -> usize {
        self.types.iter().filter(|t| t.instantiable()).count()
    }
}

/// Directory names never descended into. Hidden directories and
/// `cmake-build-*` trees are skipped as well.
pub const DEFAULT_EXCLUDES: &[&str] = &["build", "out", "CMakeFiles", "node_modules"];

const CMAKE_BUILD_PREFIX: &str = "cmake-build-";

/// Walks a project root and produces a [`SourceModel`].
#[derive(Debug, Clone)]
pub struct Extractor {
    root: PathBuf,
    exclude_dirs: Vec<String>,
    exclude_paths: Vec<PathBuf>,
}

impl Extractor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude_dirs: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            exclude_paths: Vec::new(),
        }
    }

    /// Additional directory names to skip anywhere in the tree.
    pub fn with_exclude_dirs(mut self, dirs: impl IntoIterator<Item = String>) -> Self {
        self.exclude_dirs.extend(dirs);
        self
    }

    /// Absolute paths to skip (e.g. the run's own output directory).
    pub fn with_exclude_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclude_paths.push(path.into());
        self
    }

    fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        if self.exclude_paths.iter().any(|p| path.starts_with(p)) {
            return true;
        }
        if !is_dir {
            return false;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.starts_with('.')
            || name.starts_with(CMAKE_BUILD_PREFIX)
            || self.exclude_dirs.iter().any(|d| d == name)
    }

    /// Scan the whole tree. Only a missing root is an error.
    pub fn extract(&self) -> ForgeResult<SourceModel> {
        if !self.root.is_dir() {
            return Err(ConfigError::MissingProjectRoot(self.root.clone()).into());
        }

        let mut model = SourceModel {
            root: self.root.clone(),
            types: Vec::new(),
            headers: Vec::new(),
            sources: Vec::new(),
            diagnostics: Vec::new(),
        };
        let mut header_texts: Vec<(PathBuf, String)> = Vec::new();
        let mut source_texts: BTreeMap<String, Vec<String>> = BTreeMap::new();

        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_excluded(e.path(), e.file_type().is_dir()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_default();
            let is_header = HEADER_EXTENSIONS.contains(&ext.as_str());
            let is_source = SOURCE_EXTENSIONS.contains(&ext.as_str());
            if !is_header && !is_source {
                continue;
            }

            let rel = path.strip_prefix(&self.root).unwrap_or(path).to_path_buf();
            let raw = match std::fs::read(path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    let err = ExtractionError::Unreadable {
                        path: rel,
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "Skipping file");
                    model.diagnostics.push(err);
                    continue;
                }
            };
            let includes = quoted_includes(&raw);
            let clean = blank_noise(&raw);

            if is_header {
                model.headers.push(HeaderFile {
                    path: rel.clone(),
                    includes,
                    declares: declared_names(&clean),
                });
                header_texts.push((rel, clean));
            } else {
                let stem = file_stem(&rel);
                model.sources.push(SourceFile {
                    path: rel,
                    includes,
                    defines_main: defines_main(&clean),
                });
                source_texts.entry(stem).or_default().push(clean);
            }
        }

        for (rel, clean) in &header_texts {
            match scan_header(rel, clean) {
                Ok((mut types, diagnostics)) => {
                    let paired = source_texts.get(&file_stem(rel));
                    for ty in &mut types {
                        record_dependency_calls(ty, clean, paired.map(Vec::as_slice).unwrap_or(&[]));
                    }
                    for diag in &diagnostics {
                        debug!(diagnostic = %diag, "Extraction diagnostic");
                    }
                    model.types.extend(types);
                    model.diagnostics.extend(diagnostics);
                }
                Err(err) => {
                    warn!(error = %err, "Skipping header");
                    model.diagnostics.push(err);
                }
            }
        }

        info!(
            headers = model.headers.len(),
            sources = model.sources.len(),
            types = model.types.len(),
            instantiable = model.instantiable_count(),
            diagnostics = model.diagnostics.len(),
            "Source model extracted"
        );
        Ok(model)
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

fn declared_name_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"\benum\s+(?:class\s+|struct\s+)?([A-Za-z_]\w*)",
            r"\b(?:class|struct)\s+([A-Za-z_]\w*)\s*(?:final\s*)?[;{:]",
            r"\busing\s+([A-Za-z_]\w*)\s*=",
            r"\btypedef\b[^;{}]*?\b([A-Za-z_]\w*)\s*;",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid regex"))
        .collect()
    })
}

/// Sorted, deduplicated names declared anywhere in a blanked header.
pub fn declared_names(clean: &str) -> Vec<String> {
    let names: BTreeSet<String> = declared_name_res()
        .iter()
        .flat_map(|re| re.captures_iter(clean).map(|caps| caps[1].to_string()))
        .collect();
    names.into_iter().collect()
}

/// Scan one blanked header. Returns the types found plus non-fatal
/// diagnostics, or an error when the file as a whole cannot be scanned.
pub fn scan_header(rel: &Path, clean: &str) -> Result<(Vec<TypeModel>, Vec<ExtractionError>), ExtractionError> {
    let mut scan = HeaderScan {
        header: rel,
        types: Vec::new(),
        diagnostics: Vec::new(),
    };
    scan.scope(clean, &[]).map_err(|offset| ExtractionError::UnbalancedBraces {
        path: rel.to_path_buf(),
        offset,
    })?;
    Ok((scan.types, scan.diagnostics))
}

fn namespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:inline )?namespace ?([\w:]*)$").expect("valid regex"))
}

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:typedef )?(class|struct)\b(.*)$").expect("valid regex"))
}

fn template_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^template ?<.*>\s*(?:class|struct) (\w+)").expect("valid regex"))
}

fn access_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(public|protected|private)(?:\s+(?:slots|Q_SLOTS))?\s*:").expect("valid regex")
    })
}

struct HeaderScan<'a> {
    header: &'a Path,
    types: Vec<TypeModel>,
    diagnostics: Vec<ExtractionError>,
}

impl HeaderScan<'_> {
    /// Scan a namespace-level body. Errors carry the byte offset (relative to
    /// the body) of an unbalanced brace.
    fn scope(&mut self, body: &str, namespace: &[String]) -> Result<(), usize> {
        let parts = chunks(body).map_err(|u| u.offset)?;
        for part in parts {
            let Chunk::Block { head, body: inner } = part else {
                continue;
            };
            let head = clean_head(head);

            if let Some(caps) = namespace_re().captures(&head) {
                let name = &caps[1];
                if name.is_empty() {
                    // Anonymous namespace: internal linkage, nothing to test.
                    continue;
                }
                let mut nested = namespace.to_vec();
                nested.extend(name.split("::").filter(|s| !s.is_empty()).map(String::from));
                self.scope(inner, &nested)?;
            } else if head.starts_with("extern") && !head.contains('(') {
                self.scope(inner, namespace)?;
            } else if head.starts_with("template") {
                if let Some(caps) = template_class_re().captures(&head) {
                    self.diagnostics.push(ExtractionError::TemplateSkipped {
                        path: self.header.to_path_buf(),
                        name: caps[1].to_string(),
                    });
                }
            } else if let Some(caps) = class_re().captures(&head) {
                let is_struct = &caps[1] == "struct";
                if let Some(name) = class_name(&caps[2]) {
                    let ty = self.scan_type(&name, is_struct, namespace, inner)?;
                    self.types.push(ty);
                }
            }
        }
        Ok(())
    }

    fn scan_type(&mut self, name: &str, is_struct: bool, namespace: &[String], body: &str) -> Result<TypeModel, usize> {
        let mut ty = TypeModel::new(name, self.header);
        ty.namespace = namespace.to_vec();
        ty.is_struct = is_struct;
        let owner = ty.qualified_name();

        let mut access = if is_struct {
            Visibility::Public
        } else {
            Visibility::Private
        };
        ty.sections.push(access);

        let mut declared_ctor = false;
        let mut declared_dtor: Option<(Visibility, bool)> = None;

        let parts = chunks(body).map_err(|u| u.offset)?;
        for part in parts {
            let (head, is_block) = match part {
                Chunk::Declaration(head) => (head, false),
                Chunk::Block { head, .. } => (head, true),
            };

            let mut rest = head;
            for caps in access_label_re().captures_iter(head) {
                let Some(whole) = caps.get(0) else { continue };
                // `public::` would be a qualified name, not a label.
                if head[whole.end()..].starts_with(':') {
                    continue;
                }
                if let Some(vis) = Visibility::parse(&caps[1]) {
                    access = vis;
                    ty.sections.push(vis);
                }
                rest = &head[whole.end()..];
            }

            let rest_clean = clean_head(rest);
            if is_block && (class_re().is_match(&rest_clean) || rest_clean.starts_with("enum") || rest_clean.starts_with("union")) {
                // Nested types are not modelled.
                continue;
            }

            match parse_member(rest, name) {
                MemberDecl::Function(decl) => {
                    let kind = if decl.name == name {
                        declared_ctor = true;
                        OperationKind::Constructor
                    } else if decl.name.starts_with('~') {
                        declared_dtor = Some((access, decl.is_deleted));
                        OperationKind::Destructor
                    } else {
                        OperationKind::Method
                    };
                    if decl.is_pure_virtual {
                        ty.is_abstract = true;
                    }
                    ty.operations.push(OperationModel {
                        owner: owner.clone(),
                        name: decl.name,
                        parameters: decl.parameters,
                        return_type: decl.return_type,
                        kind,
                        visibility: access,
                        is_static: decl.is_static,
                        is_const: decl.is_const,
                        is_virtual: decl.is_virtual,
                        is_pure_virtual: decl.is_pure_virtual,
                        is_deleted: decl.is_deleted,
                        is_implicit: false,
                    });
                }
                MemberDecl::Data(member) => ty.members.push(member),
                MemberDecl::Ignored => {}
            }
        }

        if !declared_ctor {
            let mut implicit = OperationModel::constructor(owner.clone());
            implicit.is_implicit = true;
            ty.operations.insert(0, implicit);
        }
        if let Some((visibility, deleted)) = declared_dtor {
            ty.externally_destructible = visibility == Visibility::Public && !deleted;
        }
        let default_constructible = ty
            .constructors()
            .any(|c| c.is_public() && !c.is_deleted && c.parameters.iter().all(|p| p.has_default));
        ty.default_constructible = default_constructible;
        ty.dependencies = public_dependencies(&ty);
        Ok(ty)
    }
}

/// Name of a class from the text following `class`/`struct`.
fn class_name(rest: &str) -> Option<String> {
    let before_bases = match first_single_colon(rest) {
        Some(pos) => &rest[..pos],
        None => rest,
    };
    if before_bases.contains('<') {
        // Explicit specialisation.
        return None;
    }
    before_bases
        .split_whitespace()
        .filter(|t| *t != "final")
        .last()
        .filter(|t| scanner::is_identifier(t))
        .map(String::from)
}

fn public_dependencies(ty: &TypeModel) -> Vec<String> {
    let own_name = ty.name.as_str();
    let qualified = ty.qualified_name();
    let mut deps: Vec<String> = Vec::new();
    for op in ty.operations.iter().filter(|op| op.is_public() && !op.is_deleted) {
        let types = std::iter::once(op.return_type.as_str()).chain(op.parameters.iter().map(|p| p.type_name.as_str()));
        for type_name in types {
            for dep in referenced_user_types(type_name) {
                if dep == own_name || dep == qualified || deps.contains(&dep) {
                    continue;
                }
                deps.push(dep);
            }
        }
    }
    deps
}

/// Scan the header and its same-stem implementation files for calls made
/// through data members of user types (`uart_->Send(`, `bus.Read(`).
fn record_dependency_calls(ty: &mut TypeModel, header_text: &str, sources: &[String]) {
    let mut calls: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for member in &ty.members {
        let Some(dep) = referenced_user_types(&member.type_name).into_iter().next() else {
            continue;
        };
        if dep == ty.name {
            continue;
        }
        let pattern = format!(r"\b{}\s*(?:\.|->)\s*([A-Za-z_]\w*)\s*\(", regex::escape(&member.name));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        let methods = calls.entry(dep).or_default();
        for text in std::iter::once(header_text).chain(sources.iter().map(String::as_str)) {
            for caps in re.captures_iter(text) {
                methods.insert(caps[1].to_string());
            }
        }
    }
    ty.dependency_calls = calls
        .into_iter()
        .filter(|(_, methods)| !methods.is_empty())
        .map(|(dep, methods)| (dep, methods.into_iter().collect()))
        .collect();
}

/// Base type spellings of data members that reference user types.
pub fn member_user_types(ty: &TypeModel) -> Vec<String> {
    ty.members
        .iter()
        .flat_map(|m| referenced_user_types(base_type(&m.type_name)))
        .filter(|d| *d != ty.name)
        .collect()
}
