//! Parameter classification and the argument literal table.
//!
//! Each supported parameter category maps to three literals: the primary
//! value, a fallback used by the single retry rendering, and a boundary value
//! used by the `boundary-argument` strategy. Pointer and reference parameters
//! always bind a named local of the pointee/referent type.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{base_type, ArgumentBinding, LocalValue, ParamCategory, PassBy, TypeModel};

/// Resolves a type spelling to a modelled type.
pub trait TypeLookup {
    fn lookup_type(&self, name: &str) -> Option<&TypeModel>;
}

impl TypeLookup for [TypeModel] {
    fn lookup_type(&self, name: &str) -> Option<&TypeModel> {
        let name = name.strip_prefix("::").unwrap_or(name);
        self.iter()
            .find(|t| t.qualified_name() == name)
            .or_else(|| self.iter().find(|t| t.name == name))
    }
}

/// Literals for one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralSet {
    pub primary: String,
    pub fallback: String,
    pub boundary: String,
}

/// A classified, bindable parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamPlan {
    pub parameter: String,
    pub category: ParamCategory,
    pub literals: LiteralSet,
    /// Local to declare for pointer/reference parameters: (type, pass-by).
    pub local: Option<(String, PassBy)>,
    pub var: String,
}

impl ParamPlan {
    /// Binding for a scenario; `boundary` swaps in the boundary literal as the
    /// primary value and keeps the usual primary as fallback.
    pub fn binding(&self, boundary: bool) -> ArgumentBinding {
        let (primary, fallback) = if boundary {
            (self.literals.boundary.clone(), self.literals.primary.clone())
        } else {
            (self.literals.primary.clone(), self.literals.fallback.clone())
        };
        ArgumentBinding {
            parameter: self.parameter.clone(),
            category: self.category,
            primary,
            fallback,
            local: self.local.as_ref().map(|(type_name, pass_by)| LocalValue {
                var: self.var.clone(),
                type_name: type_name.clone(),
                pass_by: *pass_by,
            }),
        }
    }

    /// Whether the boundary literal differs from the primary one.
    pub fn has_boundary(&self) -> bool {
        self.literals.boundary != self.literals.primary
    }
}

/// Why a parameter cannot be bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsupported {
    pub type_name: String,
    pub detail: &'static str,
}

/// Coarse category of a return type, used to key the strategy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCategory {
    Void,
    Boolean,
    Numeric,
    Other,
}

fn sized_integral_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:u?int(?:_fast|_least)?\d+_t|u?intptr_t|s?size_t|ptrdiff_t|wchar_t|char(?:8|16|32)_t|u?intmax_t)$")
            .expect("valid regex")
    })
}

fn strip_std(name: &str) -> &str {
    let name = name.strip_prefix("::").unwrap_or(name);
    name.strip_prefix("std::").unwrap_or(name)
}

pub fn is_integral(value_type: &str) -> bool {
    let name = strip_std(value_type);
    if sized_integral_re().is_match(name) {
        return true;
    }
    let words: Vec<&str> = name.split_whitespace().collect();
    !words.is_empty()
        && words
            .iter()
            .all(|w| matches!(*w, "signed" | "unsigned" | "short" | "long" | "int" | "char"))
}

pub fn is_floating(value_type: &str) -> bool {
    matches!(value_type, "float" | "double" | "long double")
}

fn is_string_class(value_type: &str) -> bool {
    matches!(strip_std(value_type), "string" | "string_view")
}

fn is_unsigned(value_type: &str) -> bool {
    let name = strip_std(value_type);
    name.split_whitespace().any(|w| w == "unsigned")
        || name.starts_with("uint")
        || matches!(name, "size_t" | "char8_t" | "char16_t" | "char32_t")
}

/// Check a numeric result must pass, derived from its declared type and
/// the operation's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueBound {
    NotNan,
    /// Signed counts, sizes and lengths.
    NonNegative,
}

const QUANTITY_WORDS: &[&str] = &["count", "size", "length", "len", "capacity", "num", "total"];

/// `GetItemCount` / `item_count` -> `["get", "item", "count"]`.
fn name_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for c in name.chars() {
        if (c == '_' || c.is_ascii_uppercase()) && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        if c != '_' {
            current.push(c.to_ascii_lowercase());
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// `None` when the declaration implies nothing beyond the type's range.
pub fn value_bound(return_type: &str, operation: &str) -> Option<ValueBound> {
    let value = base_type(return_type.trim());
    if is_floating(value) {
        return Some(ValueBound::NotNan);
    }
    let quantity = name_words(operation)
        .iter()
        .any(|w| QUANTITY_WORDS.contains(&w.as_str()));
    (is_integral(value) && !is_unsigned(value) && quantity).then_some(ValueBound::NonNegative)
}

/// Classify a declared return type.
pub fn return_category(return_type: &str) -> ReturnCategory {
    let t = return_type.trim();
    if t.ends_with('*') || t.ends_with('&') {
        return ReturnCategory::Other;
    }
    let value = base_type(t);
    if value == "void" {
        ReturnCategory::Void
    } else if value == "bool" {
        ReturnCategory::Boolean
    } else if is_integral(value) || is_floating(value) {
        ReturnCategory::Numeric
    } else {
        ReturnCategory::Other
    }
}

/// Literals for a by-value parameter of `value_type`, or the reason the
/// table cannot spell one.
fn value_literals<L: TypeLookup + ?Sized>(
    value_type: &str,
    lookup: &L,
) -> Result<(ParamCategory, LiteralSet), &'static str> {
    if value_type == "bool" {
        return Ok((
            ParamCategory::Boolean,
            LiteralSet {
                primary: "true".into(),
                fallback: "false".into(),
                boundary: "false".into(),
            },
        ));
    }
    if is_integral(value_type) {
        return Ok((
            ParamCategory::Integral,
            LiteralSet {
                primary: "0".into(),
                fallback: "1".into(),
                boundary: format!("std::numeric_limits<{}>::max()", value_type),
            },
        ));
    }
    if is_floating(value_type) {
        return Ok((
            ParamCategory::Floating,
            LiteralSet {
                primary: "0.0".into(),
                fallback: "1.0".into(),
                boundary: format!("std::numeric_limits<{}>::max()", value_type),
            },
        ));
    }
    if is_string_class(value_type) {
        let class = if strip_std(value_type) == "string" {
            "std::string"
        } else {
            "std::string_view"
        };
        let boundary = if class == "std::string" {
            "std::string(1024, 'x')".to_string()
        } else {
            "std::string_view()".to_string()
        };
        return Ok((
            ParamCategory::StringLike,
            LiteralSet {
                primary: format!("{}(\"test\")", class),
                fallback: "\"test\"".into(),
                boundary,
            },
        ));
    }
    if value_type == "void" || value_type == "auto" {
        return Err("no value of this type");
    }
    if value_type.contains('<') {
        return Err("template arguments");
    }
    if !crate::extract::scanner::is_qualified_identifier(value_type) {
        return Err("unrecognised type spelling");
    }
    if let Some(model) = lookup.lookup_type(value_type) {
        if !(model.instantiable() && model.default_constructible) {
            return Err("user type is not default constructible");
        }
    }
    // Unknown names are enums, typedefs or fabricated stand-ins; all of
    // them value-initialise.
    Ok((
        ParamCategory::UserDefined,
        LiteralSet {
            primary: format!("{}{{}}", value_type),
            fallback: format!("{}()", value_type),
            boundary: format!("{}{{}}", value_type),
        },
    ))
}

/// Classify one declared parameter and choose its literals.
///
/// `var` names the local declared for pointer/reference parameters.
pub fn plan_parameter<L: TypeLookup + ?Sized>(
    name: &str,
    type_name: &str,
    var: &str,
    lookup: &L,
) -> Result<ParamPlan, Unsupported> {
    let unsupported = |detail: &'static str| Unsupported {
        type_name: type_name.to_string(),
        detail,
    };
    let t = type_name.trim();
    if t == "..." {
        return Err(unsupported("variadic"));
    }
    if t.contains('(') || t.contains('[') {
        return Err(unsupported("function or array type"));
    }
    if t.contains("&&") {
        return Err(unsupported("rvalue reference"));
    }

    let indirections = t.matches(['*', '&']).count();
    let parameter = if name.is_empty() { var.to_string() } else { name.to_string() };
    let value = base_type(t);

    if indirections == 0 {
        let (category, literals) = value_literals(value, lookup).map_err(unsupported)?;
        return Ok(ParamPlan {
            parameter,
            category,
            literals,
            local: None,
            var: var.to_string(),
        });
    }
    if indirections > 1 {
        return Err(unsupported("multiple indirection"));
    }

    let is_pointer = t.ends_with('*');
    if is_pointer && value == "char" && t.split_whitespace().any(|w| w == "const") {
        // `const char *` is a C string: pass literals directly.
        return Ok(ParamPlan {
            parameter,
            category: ParamCategory::StringLike,
            literals: LiteralSet {
                primary: "\"test\"".into(),
                fallback: "\"\"".into(),
                boundary: "\"\"".into(),
            },
            local: None,
            var: var.to_string(),
        });
    }

    let (_, literals) = value_literals(value, lookup).map_err(unsupported)?;
    let (category, pass_by) = if is_pointer {
        (ParamCategory::Pointer, PassBy::Address)
    } else {
        (ParamCategory::Reference, PassBy::Reference)
    };
    Ok(ParamPlan {
        parameter,
        category,
        literals,
        local: Some((value.to_string(), pass_by)),
        var: var.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OperationModel;

    #[test]
    fn test_value_bound_from_type_and_name() {
        assert_eq!(value_bound("double", "Ratio"), Some(ValueBound::NotNan));
        assert_eq!(value_bound("const float", "Scale"), Some(ValueBound::NotNan));
        assert_eq!(value_bound("int", "GetItemCount"), Some(ValueBound::NonNegative));
        assert_eq!(value_bound("long", "buffer_size"), Some(ValueBound::NonNegative));
        assert_eq!(value_bound("int", "Delta"), None);
        assert_eq!(value_bound("int", "Resize"), None);
        assert_eq!(value_bound("unsigned int", "Count"), None);
        assert_eq!(value_bound("std::size_t", "Length"), None);
    }

    fn plan(type_name: &str) -> Result<ParamPlan, Unsupported> {
        let none: &[TypeModel] = &[];
        plan_parameter("p", type_name, "arg0", none)
    }

    #[test]
    fn test_scalar_categories() {
        assert_eq!(plan("int").unwrap().category, ParamCategory::Integral);
        assert_eq!(plan("unsigned long long").unwrap().category, ParamCategory::Integral);
        assert_eq!(plan("std::size_t").unwrap().category, ParamCategory::Integral);
        assert_eq!(plan("uint8_t").unwrap().category, ParamCategory::Integral);
        assert_eq!(plan("double").unwrap().category, ParamCategory::Floating);
        assert_eq!(plan("bool").unwrap().category, ParamCategory::Boolean);
        assert_eq!(plan("std::string").unwrap().category, ParamCategory::StringLike);
        assert_eq!(plan("const char *").unwrap().category, ParamCategory::StringLike);
        assert_eq!(plan("Color").unwrap().category, ParamCategory::UserDefined);
    }

    #[test]
    fn test_integral_literals() {
        let p = plan("int").unwrap();
        assert_eq!(p.literals.primary, "0");
        assert_eq!(p.literals.fallback, "1");
        assert_eq!(p.literals.boundary, "std::numeric_limits<int>::max()");
        assert!(p.has_boundary());
        assert!(p.local.is_none());
    }

    #[test]
    fn test_pointer_and_reference_bind_locals() {
        let p = plan("int *").unwrap();
        assert_eq!(p.category, ParamCategory::Pointer);
        assert_eq!(p.local, Some(("int".to_string(), PassBy::Address)));
        assert_eq!(p.binding(false).call_expr(crate::domain::Rendering::Primary), "&arg0");

        let r = plan("const std::string &").unwrap();
        assert_eq!(r.category, ParamCategory::Reference);
        assert_eq!(r.local, Some(("std::string".to_string(), PassBy::Reference)));
        assert_eq!(r.literals.primary, "std::string(\"test\")");
    }

    #[test]
    fn test_unsupported_shapes() {
        assert!(plan("...").is_err());
        assert!(plan("void (*)(int)").is_err());
        assert!(plan("Foo &&").is_err());
        assert!(plan("char * *").is_err());
        assert!(plan("void *").is_err());
        assert!(plan("std::vector<int>").is_err());
    }

    #[test]
    fn test_known_type_must_be_constructible() {
        let mut ty = TypeModel::new("Engine", "Engine.h");
        ty.operations
            .push(OperationModel::constructor("Engine").with_visibility(crate::domain::Visibility::Private));
        ty.default_constructible = false;
        let types = vec![ty];
        let err = plan_parameter("e", "Engine &", "arg0", types.as_slice()).unwrap_err();
        assert_eq!(err.type_name, "Engine &");
    }

    #[test]
    fn test_boundary_binding_swaps_primary() {
        let b = plan("double").unwrap().binding(true);
        assert_eq!(b.primary, "std::numeric_limits<double>::max()");
        assert_eq!(b.fallback, "0.0");
    }

    #[test]
    fn test_return_categories() {
        assert_eq!(return_category("void"), ReturnCategory::Void);
        assert_eq!(return_category("bool"), ReturnCategory::Boolean);
        assert_eq!(return_category("const int"), ReturnCategory::Numeric);
        assert_eq!(return_category("double"), ReturnCategory::Numeric);
        assert_eq!(return_category("int &"), ReturnCategory::Other);
        assert_eq!(return_category("std::string"), ReturnCategory::Other);
    }
}
