//! Purpose: Provide the internal runtime JSON decode entrypoints.
//! Exports: `from_str`, `describe_error`.
//! Role: Parser boundary that centralizes serde_json usage details.
//! Notes: Error mapping is done by callsites so domain context stays explicit.
//! Notes: `describe_error` never echoes input text; upstream payloads may carry personal data.

use serde::de::DeserializeOwned;
use serde_json::error::Category;

pub(crate) fn from_str<T: DeserializeOwned>(input: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(input)
}

pub(crate) fn describe_error(err: &serde_json::Error) -> String {
    let category = match err.classify() {
        Category::Io => "io",
        Category::Syntax => "syntax",
        Category::Data => "data",
        Category::Eof => "eof",
    };
    format!(
        "{category} error at line {} column {}",
        err.line(),
        err.column()
    )
}

#[cfg(test)]
mod tests {
    use super::{describe_error, from_str};
    use serde_json::Value;

    #[test]
    fn describe_error_reports_category_and_position() {
        let err = from_str::<Value>(r#"{"a":}"#).unwrap_err();
        assert_eq!(describe_error(&err), "syntax error at line 1 column 6");
    }

    #[test]
    fn describe_error_flags_truncated_input() {
        let err = from_str::<Value>(r#"{"secret":"#).unwrap_err();
        let text = describe_error(&err);
        assert!(text.starts_with("eof error"));
        assert!(!text.contains("secret"));
    }
}
