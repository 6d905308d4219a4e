//! FTS5 query sanitization.
//!
//! User query text is never handed to the FTS engine raw. `MATCH` input has
//! its own expression grammar where `"`, `*`, `(`, `)`, `:`, `^`, `-` and the
//! uppercase tokens `AND OR NOT NEAR` are operators; any of them surviving
//! into the query is at best a syntax error and at worst a way to subvert
//! column filters. Sanitization reduces input to lowercase alphanumeric and
//! underscore tokens joined by spaces, which FTS5 parses as a plain
//! conjunction of terms.

/// Maximum sanitized query length. Anything longer is truncated at a token
/// boundary; FTS5 gains nothing from kilobyte queries.
const MAX_QUERY_LEN: usize = 1024;

/// Sanitize user text for use in an FTS5 `MATCH` expression.
///
/// Only `[A-Za-z0-9_]` characters survive, lowercased; every other byte
/// becomes a token separator. Lowercasing also neutralizes the operator
/// tokens (`AND OR NOT NEAR` are only operators in uppercase). Returns an
/// empty string when no token survives; callers treat that as "no matches"
/// rather than an error.
pub fn sanitize_fts_query(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_QUERY_LEN));
    let mut in_token = false;

    for c in input.chars() {
        if c.is_alphanumeric() || c == '_' {
            if !in_token && !out.is_empty() {
                out.push(' ');
            }
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            in_token = true;
        } else {
            in_token = false;
        }
        if out.len() >= MAX_QUERY_LEN {
            // Truncate at the last complete token. The cut point must land
            // on a char boundary: lowercasing can expand one char to
            // several bytes right at the cap.
            let mut cut = MAX_QUERY_LEN.min(out.len());
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            if let Some(pos) = out[..cut].rfind(' ') {
                cut = pos;
            }
            out.truncate(cut);
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_words_pass_through() {
        assert_eq!(sanitize_fts_query("parse config file"), "parse config file");
        assert_eq!(sanitize_fts_query("get_user_name"), "get_user_name");
    }

    #[test]
    fn test_operators_neutralized() {
        assert_eq!(sanitize_fts_query("foo OR bar"), "foo or bar");
        assert_eq!(sanitize_fts_query("a AND b NOT c NEAR d"), "a and b not c near d");
    }

    #[test]
    fn test_metacharacters_stripped() {
        assert_eq!(sanitize_fts_query(r#""quoted" (grouped) star*"#), "quoted grouped star");
        assert_eq!(sanitize_fts_query("col:value ^anchor -minus"), "col value anchor minus");
    }

    #[test]
    fn test_injection_attempt_is_inert() {
        let q = sanitize_fts_query(r#"" OR 1=1 --"#);
        assert_eq!(q, "or 1 1");
    }

    #[test]
    fn test_empty_and_symbol_only_input() {
        assert_eq!(sanitize_fts_query(""), "");
        assert_eq!(sanitize_fts_query("(((***)))"), "");
        assert_eq!(sanitize_fts_query("  \t\n"), "");
    }

    #[test]
    fn test_unicode_survives_lowercased() {
        assert_eq!(sanitize_fts_query("Größe Ändern"), "größe ändern");
    }

    proptest! {
        /// Output never contains an FTS5 metacharacter, for any input.
        #[test]
        fn prop_output_is_safe(input in "\\PC{0,400}") {
            let out = sanitize_fts_query(&input);
            for c in out.chars() {
                prop_assert!(
                    c.is_alphanumeric() || c == '_' || c == ' ',
                    "unsafe char {:?} in output {:?}", c, out
                );
                prop_assert!(!c.is_uppercase(), "uppercase {:?} escaped lowering", c);
            }
        }

        /// Output length is bounded regardless of input size.
        #[test]
        fn prop_output_bounded(input in "\\PC{0,5000}") {
            prop_assert!(sanitize_fts_query(&input).len() <= MAX_QUERY_LEN);
        }

        /// Sanitization is idempotent.
        #[test]
        fn prop_idempotent(input in "\\PC{0,300}") {
            let once = sanitize_fts_query(&input);
            prop_assert_eq!(sanitize_fts_query(&once), once.clone());
        }
    }
}
