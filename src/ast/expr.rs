//! Opaque SQL expressions.

/// Function names whose result changes per row or per call. A column default
/// calling one of them cannot be stored in the catalog and forces a rewrite.
pub const VOLATILE_FUNCTIONS: &[&str] = &[
    "now",
    "random",
    "nextval",
    "clock_timestamp",
    "statement_timestamp",
    "timeofday",
    "txid_current",
    "gen_random_uuid",
];

/// Prefix matched in addition to [`VOLATILE_FUNCTIONS`] (`uuid_generate_v4` and friends).
pub const VOLATILE_FUNCTION_PREFIX: &str = "uuid_generate";

/// An expression kept as source text plus the names of the functions it calls.
///
/// Function names are lowercased and stripped of their schema, so
/// `pg_catalog.now()` is recorded as `now`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub raw: String,
    pub functions: Vec<String>,
}

impl Expr {
    pub fn new(raw: impl Into<String>, functions: Vec<String>) -> Self {
        Self {
            raw: raw.into(),
            functions,
        }
    }

    /// Expression without any function call.
    pub fn literal(raw: impl Into<String>) -> Self {
        Self::new(raw, Vec::new())
    }

    pub fn calls(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f == name)
    }

    /// Whether the expression calls a known volatile function.
    pub fn is_volatile(&self) -> bool {
        self.functions.iter().any(|f| {
            VOLATILE_FUNCTIONS.contains(&f.as_str()) || f.starts_with(VOLATILE_FUNCTION_PREFIX)
        })
    }

    pub fn is_null(&self) -> bool {
        self.raw.trim().eq_ignore_ascii_case("null")
    }

    /// Whether this is a `CHECK` body of the form `column IS NOT NULL`.
    pub fn is_not_null_check_for(&self, column: &str) -> bool {
        let normalized = normalize(&self.raw);
        let column = column.to_lowercase();
        normalized == format!("{column} is not null")
            || normalized == format!("\"{column}\" is not null")
    }
}

/// Lowercase, drop outer parentheses and collapse whitespace.
fn normalize(raw: &str) -> String {
    let mut s = raw.trim();
    while s.starts_with('(') && s.ends_with(')') {
        s = s[1..s.len() - 1].trim();
    }
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volatile_detection() {
        assert!(Expr::new("now()", vec!["now".into()]).is_volatile());
        assert!(Expr::new("uuid_generate_v4()", vec!["uuid_generate_v4".into()]).is_volatile());
        assert!(!Expr::new("lower('x')", vec!["lower".into()]).is_volatile());
        assert!(!Expr::literal("'now'").is_volatile());
    }

    #[test]
    fn test_not_null_check() {
        assert!(Expr::literal("email IS NOT NULL").is_not_null_check_for("email"));
        assert!(Expr::literal("(  email   is not null )").is_not_null_check_for("email"));
        assert!(Expr::literal("\"email\" IS NOT NULL").is_not_null_check_for("email"));
        assert!(!Expr::literal("email <> ''").is_not_null_check_for("email"));
        assert!(!Expr::literal("name IS NOT NULL").is_not_null_check_for("email"));
    }
}
