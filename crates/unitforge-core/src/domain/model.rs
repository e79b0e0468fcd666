//! Structural model of the C++ code under test.
//!
//! The model is an approximation of the public API surface, rich enough to
//! generate compilable call sites. Everything here is plain data: the
//! extractor builds it, every later stage only reads it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Declared access of a member or section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

impl Visibility {
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "public" => Some(Visibility::Public),
            "protected" => Some(Visibility::Protected),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        }
    }
}

/// What kind of callable an operation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Constructor,
    Destructor,
    Method,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name; empty when the declaration omits it.
    pub name: String,
    /// Declared type, whitespace-normalised (e.g. `const std::string &`).
    pub type_name: String,
    /// Whether the declaration supplies a default argument.
    pub has_default: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            has_default: false,
        }
    }
}

/// One callable member or static operation of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationModel {
    /// Namespace-qualified name of the owning type (e.g. `geo::Shape`).
    pub owner: String,
    /// Unqualified operation name (`Area`, `Shape`, `~Shape`).
    pub name: String,
    pub parameters: Vec<Parameter>,
    /// Declared return type; empty for constructors and destructors.
    pub return_type: String,
    pub kind: OperationKind,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_const: bool,
    pub is_virtual: bool,
    pub is_pure_virtual: bool,
    /// `= delete`.
    pub is_deleted: bool,
    /// Not written in the source; supplied by the language (implicit ctor).
    pub is_implicit: bool,
}

impl OperationModel {
    /// A public, non-static method with the given return type and no parameters.
    pub fn method(owner: impl Into<String>, name: impl Into<String>, return_type: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            parameters: Vec::new(),
            return_type: return_type.into(),
            kind: OperationKind::Method,
            visibility: Visibility::Public,
            is_static: false,
            is_const: false,
            is_virtual: false,
            is_pure_virtual: false,
            is_deleted: false,
            is_implicit: false,
        }
    }

    /// A public constructor with no parameters.
    pub fn constructor(owner: impl Into<String>) -> Self {
        let owner = owner.into();
        let name = unqualified(&owner).to_string();
        Self {
            kind: OperationKind::Constructor,
            return_type: String::new(),
            ..Self::method(owner, name, "")
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Parameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Stable identifier including parameter types so overloads stay distinct:
    /// `geo::Shape::Scale(double)`.
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self
            .parameters
            .iter()
            .map(|p| p.type_name.as_str())
            .collect();
        format!("{}::{}({})", self.owner, self.name, params.join(", "))
    }

    /// Filesystem and identifier friendly form of [`Self::signature`].
    pub fn slug(&self) -> String {
        slugify(&self.signature())
    }
}

/// A non-static data member. Only used to find which dependency instances a
/// type holds, never for synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataMember {
    pub name: String,
    pub type_name: String,
}

/// Reconstructed testable surface of one C++ class or struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeModel {
    pub name: String,
    /// Enclosing namespaces, outermost first.
    pub namespace: Vec<String>,
    /// `struct` (public by default) rather than `class`.
    pub is_struct: bool,
    /// Header declaring the type, relative to the project root.
    pub header: PathBuf,
    /// Access sections in declaration order, including the implicit leading one.
    pub sections: Vec<Visibility>,
    pub default_constructible: bool,
    /// Public, non-deleted destructor (declared or implicit).
    pub externally_destructible: bool,
    /// Declares at least one pure virtual method.
    pub is_abstract: bool,
    pub operations: Vec<OperationModel>,
    /// User type names referenced by public signatures.
    pub dependencies: Vec<String>,
    pub members: Vec<DataMember>,
    /// Methods observed being called on data members, keyed by the member's
    /// base type. Mocks for those types declare matching stubs.
    #[serde(default)]
    pub dependency_calls: BTreeMap<String, Vec<String>>,
}

impl TypeModel {
    pub fn new(name: impl Into<String>, header: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            namespace: Vec::new(),
            is_struct: false,
            header: header.into(),
            sections: Vec::new(),
            default_constructible: true,
            externally_destructible: true,
            is_abstract: false,
            operations: Vec::new(),
            dependencies: Vec::new(),
            members: Vec::new(),
            dependency_calls: BTreeMap::new(),
        }
    }

    /// `ns1::ns2::Name`, or just `Name` at global scope.
    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.namespace.join("::"), self.name)
        }
    }

    pub fn constructors(&self) -> impl Iterator<Item = &OperationModel> {
        self.operations
            .iter()
            .filter(|op| op.kind == OperationKind::Constructor)
    }

    /// At least one public, non-deleted constructor.
    pub fn has_accessible_constructor(&self) -> bool {
        self.constructors()
            .any(|ctor| ctor.is_public() && !ctor.is_deleted)
    }

    /// Whether a test may create and destroy a local instance.
    pub fn instantiable(&self) -> bool {
        self.has_accessible_constructor() && self.externally_destructible && !self.is_abstract
    }
}

/// Drop cv-qualifiers and pointer/reference declarators: `const Foo &` -> `Foo`.
pub fn base_type(type_name: &str) -> &str {
    let mut t = type_name.trim();
    loop {
        let before = t;
        for prefix in ["const ", "volatile ", "struct ", "class "] {
            if let Some(rest) = t.strip_prefix(prefix) {
                t = rest.trim_start();
            }
        }
        for suffix in ["&&", "&", "*", " const", " volatile"] {
            if let Some(rest) = t.strip_suffix(suffix) {
                t = rest.trim_end();
            }
        }
        if t == before {
            return t;
        }
    }
}

/// Strip namespace qualification: `a::b::C` -> `C`.
pub fn unqualified(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name)
}

/// Replace everything that is not `[A-Za-z0-9_]` with `_` and squeeze runs.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_underscore = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name() {
        let mut ty = TypeModel::new("Shape", "inc/Shape.h");
        assert_eq!(ty.qualified_name(), "Shape");
        ty.namespace = vec!["geo".to_string(), "detail".to_string()];
        assert_eq!(ty.qualified_name(), "geo::detail::Shape");
    }

    #[test]
    fn test_signature_distinguishes_overloads() {
        let a = OperationModel::method("geo::Shape", "Scale", "void")
            .with_parameters(vec![Parameter::new("f", "double")]);
        let b = OperationModel::method("geo::Shape", "Scale", "void")
            .with_parameters(vec![Parameter::new("x", "int"), Parameter::new("y", "int")]);
        assert_eq!(a.signature(), "geo::Shape::Scale(double)");
        assert_eq!(b.signature(), "geo::Shape::Scale(int, int)");
        assert_ne!(a.slug(), b.slug());
    }

    #[test]
    fn test_instantiable_requires_ctor_and_dtor() {
        let mut ty = TypeModel::new("Factory", "Factory.h");
        ty.operations
            .push(OperationModel::constructor("Factory").with_visibility(Visibility::Protected));
        assert!(!ty.instantiable());

        ty.operations.push(OperationModel::constructor("Factory"));
        assert!(ty.instantiable());

        ty.externally_destructible = false;
        assert!(!ty.instantiable());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("geo::Shape::Area()"), "geo_Shape_Area");
        assert_eq!(slugify("A::f(const std::string &)#no-throw"), "A_f_const_std_string_no_throw");
    }

    #[test]
    fn test_base_type() {
        assert_eq!(base_type("const std::string &"), "std::string");
        assert_eq!(base_type("hal::Uart *"), "hal::Uart");
        assert_eq!(base_type("char const *"), "char");
        assert_eq!(base_type("int"), "int");
    }

    #[test]
    fn test_unqualified() {
        assert_eq!(unqualified("a::b::C"), "C");
        assert_eq!(unqualified("C"), "C");
    }
}
