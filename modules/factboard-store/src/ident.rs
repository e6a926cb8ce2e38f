use std::fmt;
use std::sync::LazyLock;

use factboard_common::FactboardError;
use regex::Regex;

static RE_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap());

/// A table or view name that is safe to splice into SQL text. Names arrive
/// from CLI flags, so they are checked once here and never quoted by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident(String);

impl Ident {
    pub fn parse(name: &str) -> Result<Self, FactboardError> {
        let name = name.trim();
        if RE_IDENT.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(FactboardError::Config(format!(
                "'{name}' is not a valid table or view name"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_schema_qualified_names() {
        assert_eq!(Ident::parse("v_events_ready").unwrap().as_str(), "v_events_ready");
        let qualified = Ident::parse("public.fact_events").unwrap();
        assert_eq!(qualified.as_str(), "public.fact_events");
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(Ident::parse("fact_events; DROP TABLE x").is_err());
        assert!(Ident::parse("1table").is_err());
        assert!(Ident::parse("a.b.c").is_err());
        assert!(Ident::parse("").is_err());
        assert!(Ident::parse("\"quoted\"").is_err());
    }
}
