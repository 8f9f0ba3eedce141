//! Storefront locales.

use serde::{Deserialize, Serialize};

/// Locales the storefront sells and mails in.
///
/// Stored as plain text on customers, orders and email log rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    /// Lithuanian, the shop's home locale.
    #[default]
    Lt,
    /// English.
    En,
}

impl Locale {
    /// Parse a locale code. Unknown codes yield `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "lt" => Some(Self::Lt),
            "en" => Some(Self::En),
            _ => None,
        }
    }

    /// Parse a locale code, falling back to the default locale.
    pub fn from_code_or_default(code: Option<&str>) -> Self {
        code.and_then(Self::from_code).unwrap_or_default()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "lt",
            Self::En => "en",
        }
    }
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_parsing() {
        assert_eq!(Locale::from_code("lt"), Some(Locale::Lt));
        assert_eq!(Locale::from_code(" EN "), Some(Locale::En));
        assert_eq!(Locale::from_code("de"), None);
        assert_eq!(Locale::from_code_or_default(Some("de")), Locale::Lt);
        assert_eq!(Locale::from_code_or_default(None), Locale::Lt);
    }

    #[test]
    fn test_locale_serialization() {
        assert_eq!(serde_json::to_string(&Locale::En).unwrap(), "\"en\"");
        let parsed: Locale = serde_json::from_str("\"lt\"").unwrap();
        assert_eq!(parsed, Locale::Lt);
    }
}
