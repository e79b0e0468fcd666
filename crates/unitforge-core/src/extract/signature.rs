//! Member declaration and parameter-list parsing.

use std::sync::OnceLock;

use regex::Regex;

use super::scanner::{is_identifier, is_qualified_identifier, matching_close, split_top_level, type_tokens};
use crate::domain::{DataMember, Parameter};

/// Fundamental type keywords. Never treated as a parameter name or a user type.
const TYPE_KEYWORDS: &[&str] = &[
    "void", "bool", "char", "wchar_t", "char8_t", "char16_t", "char32_t", "short", "int", "long",
    "signed", "unsigned", "float", "double", "auto", "const", "volatile", "struct", "class",
    "enum", "typename", "union",
];

/// Qualifiers that never form a complete type on their own.
const QUALIFIERS: &[&str] = &["const", "volatile", "struct", "class", "enum", "typename"];

/// Declaration specifiers that are not part of the return type.
const SPECIFIERS: &[&str] = &[
    "virtual", "static", "inline", "explicit", "constexpr", "consteval", "extern", "friend",
];

/// Names commonly pulled in by `using namespace std;` or `<cstdint>`.
const STD_NAMES: &[&str] = &[
    "std", "size_t", "ssize_t", "ptrdiff_t", "intptr_t", "uintptr_t", "nullptr_t", "int8_t",
    "int16_t", "int32_t", "int64_t", "uint8_t", "uint16_t", "uint32_t", "uint64_t", "string",
    "wstring", "string_view", "vector", "map", "set", "unordered_map", "unordered_set", "list",
    "deque", "array", "pair", "tuple", "shared_ptr", "unique_ptr", "weak_ptr", "function",
    "optional", "ostream", "istream", "iostream", "mutex", "thread", "atomic", "chrono",
];

/// A parsed function-like member declaration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FunctionDecl {
    /// Unqualified name; destructors keep the leading `~`.
    pub name: String,
    /// Empty for constructors and destructors.
    pub return_type: String,
    pub parameters: Vec<Parameter>,
    pub is_static: bool,
    pub is_const: bool,
    pub is_virtual: bool,
    pub is_pure_virtual: bool,
    pub is_deleted: bool,
}

/// Classification of one statement inside a class body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberDecl {
    Function(FunctionDecl),
    Data(DataMember),
    Ignored,
}

fn attribute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[.*?\]\]|\balignas\s*\([^)]*\)").expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Collapse whitespace and drop attributes.
pub fn clean_head(head: &str) -> String {
    let without_attrs = attribute_re().replace_all(head, " ");
    whitespace_re()
        .replace_all(without_attrs.trim(), " ")
        .into_owned()
}

/// Join tokens into the canonical spelling used across the model.
pub fn normalize_type(tokens: &[String]) -> String {
    tokens.join(" ")
}

/// First `(` that is not nested inside `<>`.
fn first_call_paren(text: &str) -> Option<usize> {
    let mut angle = 0i32;
    for (i, b) in text.bytes().enumerate() {
        match b {
            b'<' => angle += 1,
            b'>' => angle = (angle - 1).max(0),
            b'(' if angle == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// Position of the first single `:` (not part of `::`) at bracket depth zero.
pub fn first_single_colon(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'<' | b'[' | b'{' => depth += 1,
            b')' | b'>' | b']' | b'}' => depth = (depth - 1).max(0),
            b':' if depth == 0 => {
                if bytes.get(i + 1) == Some(&b':') {
                    i += 2;
                    continue;
                }
                return Some(i);
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Position of a top-level `=` that is an initializer (not `==`, `<=`...).
fn top_level_assign(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'(' | b'<' | b'[' | b'{' => depth += 1,
            b')' | b'>' | b']' | b'}' => depth = (depth - 1).max(0),
            b'=' if depth == 0 => {
                let prev = if i > 0 { bytes[i - 1] } else { b' ' };
                let next = bytes.get(i + 1).copied().unwrap_or(b' ');
                if next != b'=' && !matches!(prev, b'=' | b'!' | b'<' | b'>') {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse one statement of a class body (already stripped of access labels).
pub fn parse_member(head: &str, class_name: &str) -> MemberDecl {
    let text = clean_head(head);
    if text.is_empty() {
        return MemberDecl::Ignored;
    }
    let first_word = text.split([' ', '<', '(']).next().unwrap_or("");
    if matches!(
        first_word,
        "friend" | "using" | "typedef" | "static_assert" | "enum" | "template" | "namespace"
            | "class" | "struct" | "union"
    ) {
        return MemberDecl::Ignored;
    }

    match first_call_paren(&text) {
        Some(open) => parse_function(&text, open, class_name),
        None => parse_data_member(&text),
    }
}

fn parse_function(text: &str, open: usize, class_name: &str) -> MemberDecl {
    let prefix = &text[..open];
    let Some(close) = matching_close(text, open, b'(', b')') else {
        return MemberDecl::Ignored;
    };
    let params_text = &text[open + 1..close];
    let suffix = text[close + 1..].trim();

    // Function pointer member: `void (*cb)(int)`.
    if params_text.trim_start().starts_with(['*', '&']) {
        return MemberDecl::Ignored;
    }

    let mut tokens = type_tokens(prefix);
    if tokens.iter().any(|t| t == "operator" || t.starts_with("operator")) {
        return MemberDecl::Ignored;
    }
    let Some(name) = tokens.pop() else {
        return MemberDecl::Ignored;
    };
    let bare = name.strip_prefix('~').unwrap_or(&name);
    if !is_identifier(bare) {
        return MemberDecl::Ignored;
    }

    let mut decl = FunctionDecl {
        name: name.clone(),
        ..FunctionDecl::default()
    };
    let mut return_tokens = Vec::new();
    for token in tokens {
        match token.as_str() {
            "virtual" => decl.is_virtual = true,
            "static" => decl.is_static = true,
            t if SPECIFIERS.contains(&t) => {}
            _ => return_tokens.push(token),
        }
    }

    let is_special = bare == class_name;
    if is_special && !return_tokens.is_empty() {
        return MemberDecl::Ignored;
    }
    if !is_special && return_tokens.is_empty() {
        // Macro invocation such as `DISALLOW_COPY(Foo)`.
        return MemberDecl::Ignored;
    }

    // Suffix: cv, ref-qualifiers, noexcept, trailing return, override, `= ...`,
    // and for inline constructors a member-initializer list.
    let suffix = match first_single_colon(suffix) {
        Some(pos) if is_special => &suffix[..pos],
        _ => suffix,
    };
    let (qualifiers, assigned) = match top_level_assign(suffix) {
        Some(pos) => (&suffix[..pos], suffix[pos + 1..].trim()),
        None => (suffix, ""),
    };
    let qualifier_words: Vec<&str> = qualifiers
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .filter(|w| !w.is_empty())
        .collect();
    decl.is_const = qualifier_words.first() == Some(&"const");
    if qualifier_words.iter().any(|w| *w == "override" || *w == "final") {
        decl.is_virtual = true;
    }
    match assigned {
        "0" => {
            decl.is_pure_virtual = true;
            decl.is_virtual = true;
        }
        "delete" => decl.is_deleted = true,
        _ => {}
    }

    if !is_special {
        let mut return_type = normalize_type(&return_tokens);
        if return_type == "auto" {
            if let Some(pos) = qualifiers.find("->") {
                let trailing: Vec<String> = type_tokens(&qualifiers[pos + 2..])
                    .into_iter()
                    .take_while(|t| !matches!(t.as_str(), "override" | "final" | "noexcept"))
                    .collect();
                if !trailing.is_empty() {
                    return_type = normalize_type(&trailing);
                }
            }
        }
        decl.return_type = return_type;
    }

    decl.parameters = parse_parameters(params_text);
    MemberDecl::Function(decl)
}

fn parse_data_member(text: &str) -> MemberDecl {
    let declarators = split_top_level(text, ',');
    let Some(first) = declarators.first() else {
        return MemberDecl::Ignored;
    };
    let mut first = first.as_str();
    if let Some(pos) = top_level_assign(first) {
        first = &first[..pos];
    }
    if let Some(pos) = first_single_colon(first) {
        // Bit-field width.
        first = &first[..pos];
    }
    let mut tokens = type_tokens(first);
    if tokens.iter().any(|t| t == "static") {
        return MemberDecl::Ignored;
    }
    tokens.retain(|t| !matches!(t.as_str(), "mutable" | "inline" | "constexpr"));
    if tokens.len() < 2 {
        return MemberDecl::Ignored;
    }
    let Some(last) = tokens.pop() else {
        return MemberDecl::Ignored;
    };
    let name = last.split('[').next().unwrap_or("").to_string();
    if !is_identifier(&name) {
        return MemberDecl::Ignored;
    }
    MemberDecl::Data(DataMember {
        name,
        type_name: normalize_type(&tokens),
    })
}

/// Parse the text between a declaration's parentheses.
pub fn parse_parameters(text: &str) -> Vec<Parameter> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "void" {
        return Vec::new();
    }
    split_top_level(trimmed, ',')
        .iter()
        .filter(|piece| !piece.trim().is_empty())
        .map(|piece| parse_parameter(piece))
        .collect()
}

fn parse_parameter(piece: &str) -> Parameter {
    let piece = clean_head(piece);
    let (decl, has_default) = match top_level_assign(&piece) {
        Some(pos) => (piece[..pos].trim().to_string(), true),
        None => (piece.clone(), false),
    };

    if decl == "..." {
        return Parameter {
            name: String::new(),
            type_name: "...".to_string(),
            has_default,
        };
    }

    // Function pointer or reference-to-function parameters keep their
    // spelling minus the declarator name; classification rejects them later.
    if decl.contains('(') {
        static FN_NAME: OnceLock<Regex> = OnceLock::new();
        let re = FN_NAME.get_or_init(|| Regex::new(r"\(\s*([*&])\s*(\w+)\s*\)").expect("valid regex"));
        let name = re
            .captures(&decl)
            .map(|c| c[2].to_string())
            .unwrap_or_default();
        return Parameter {
            name,
            type_name: re.replace(&decl, "($1)").into_owned(),
            has_default,
        };
    }

    let mut tokens = type_tokens(&decl);
    let mut name = String::new();
    if let Some(last) = tokens.last() {
        let (candidate, is_array) = match last.find('[') {
            Some(pos) => (&last[..pos], true),
            None => (last.as_str(), false),
        };
        let rest_is_type = tokens[..tokens.len() - 1]
            .iter()
            .any(|t| !QUALIFIERS.contains(&t.as_str()));
        if tokens.len() >= 2
            && rest_is_type
            && is_identifier(candidate)
            && !TYPE_KEYWORDS.contains(&candidate)
        {
            name = candidate.to_string();
            tokens.pop();
            if is_array {
                tokens.push("*".to_string());
            }
        }
    }

    Parameter {
        name,
        type_name: normalize_type(&tokens),
        has_default,
    }
}

fn type_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:::)?[A-Za-z_]\w*(?:::[A-Za-z_]\w*)*").expect("valid regex"))
}

/// User-defined type names mentioned in a type spelling, in order of
/// appearance. Builtins and `std` names are excluded; template arguments are
/// searched too (`std::vector<Sensor>` yields `Sensor`).
pub fn referenced_user_types(type_name: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in type_name_re().find_iter(type_name) {
        let name = m.as_str().trim_start_matches("::");
        if !is_qualified_identifier(name) {
            continue;
        }
        let head = name.split("::").next().unwrap_or(name);
        if head == "std" || TYPE_KEYWORDS.contains(&name) || STD_NAMES.contains(&name) {
            continue;
        }
        if matches!(name, "const" | "volatile" | "nullptr" | "true" | "false") {
            continue;
        }
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(head: &str, class: &str) -> FunctionDecl {
        match parse_member(head, class) {
            MemberDecl::Function(f) => f,
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_plain_method() {
        let f = function("int Area() const", "Shape");
        assert_eq!(f.name, "Area");
        assert_eq!(f.return_type, "int");
        assert!(f.is_const);
        assert!(f.parameters.is_empty());
    }

    #[test]
    fn test_parse_pure_virtual() {
        let f = function(" virtual double Perimeter() const = 0", "Shape");
        assert!(f.is_pure_virtual);
        assert!(f.is_virtual);
        assert_eq!(f.return_type, "double");
    }

    #[test]
    fn test_parse_deleted_and_static() {
        assert!(function("Factory(const Factory&) = delete", "Factory").is_deleted);
        let f = function("static Factory& Instance()", "Factory");
        assert!(f.is_static);
        assert_eq!(f.return_type, "Factory &");
    }

    #[test]
    fn test_parse_constructor_and_destructor() {
        let ctor = function("explicit Sensor(int id, const std::string& label = \"\")", "Sensor");
        assert_eq!(ctor.name, "Sensor");
        assert!(ctor.return_type.is_empty());
        assert_eq!(ctor.parameters.len(), 2);
        assert_eq!(ctor.parameters[1].type_name, "const std::string &");
        assert!(ctor.parameters[1].has_default);

        let dtor = function("virtual ~Sensor()", "Sensor");
        assert_eq!(dtor.name, "~Sensor");
        assert!(dtor.is_virtual);
    }

    #[test]
    fn test_inline_constructor_with_initializer_list() {
        let ctor = function("Point(int x, int y) : x_(x), y_{y}", "Point");
        assert_eq!(ctor.parameters.len(), 2);
        assert!(!ctor.is_deleted);
    }

    #[test]
    fn test_trailing_return_type() {
        let f = function("auto Size() const -> std::size_t", "Buffer");
        assert_eq!(f.return_type, "std::size_t");
    }

    #[test]
    fn test_operators_and_macros_are_ignored() {
        assert_eq!(parse_member("bool operator==(const A& o) const", "A"), MemberDecl::Ignored);
        assert_eq!(parse_member("DISALLOW_COPY(A)", "A"), MemberDecl::Ignored);
        assert_eq!(parse_member("friend class B", "A"), MemberDecl::Ignored);
        assert_eq!(parse_member("void (*callback)(int)", "A"), MemberDecl::Ignored);
    }

    #[test]
    fn test_data_members() {
        assert_eq!(
            parse_member("hal::Uart* uart_", "Driver"),
            MemberDecl::Data(DataMember {
                name: "uart_".to_string(),
                type_name: "hal::Uart *".to_string()
            })
        );
        assert_eq!(
            parse_member("int count_ = 0", "Driver"),
            MemberDecl::Data(DataMember {
                name: "count_".to_string(),
                type_name: "int".to_string()
            })
        );
        assert_eq!(parse_member("static int instances", "Driver"), MemberDecl::Ignored);
    }

    #[test]
    fn test_parse_parameters_edge_cases() {
        assert!(parse_parameters("void").is_empty());
        assert!(parse_parameters("  ").is_empty());

        let params = parse_parameters("unsigned int, const Foo, char buf[16], ...");
        assert_eq!(params[0].name, "");
        assert_eq!(params[0].type_name, "unsigned int");
        assert_eq!(params[1].name, "");
        assert_eq!(params[1].type_name, "const Foo");
        assert_eq!(params[2].name, "buf");
        assert_eq!(params[2].type_name, "char *");
        assert_eq!(params[3].type_name, "...");

        let params = parse_parameters("std::map<int, std::string> table, void (*cb)(int)");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].type_name, "std::map<int, std::string>");
        assert_eq!(params[1].name, "cb");
        assert_eq!(params[1].type_name, "void (*)(int)");
    }

    #[test]
    fn test_referenced_user_types() {
        assert_eq!(referenced_user_types("const hal::Uart &"), vec!["hal::Uart"]);
        assert_eq!(referenced_user_types("std::vector<Sensor>"), vec!["Sensor"]);
        assert!(referenced_user_types("unsigned long").is_empty());
        assert!(referenced_user_types("std::string").is_empty());
        assert!(referenced_user_types("uint8_t *").is_empty());
    }
}
