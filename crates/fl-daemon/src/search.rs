//! The fault search query language.
//!
//! `?q=` is tokenized on spaces with double-quote grouping. Recognized
//! tokens:
//!
//! ```text
//! is:resolved  is:ignored      (leading '-' negates)
//! environment:<v>  env:<v>
//! assignee:<id>
//! tag:<v>                      (repeatable; matches any)
//! anything else                (substring match on class/message/location)
//! ```

use fl_db::FaultFilter;

pub fn parse_query(q: &str, limit: i64, offset: i64) -> FaultFilter {
    let mut filter = FaultFilter {
        limit,
        offset,
        ..Default::default()
    };

    for token in tokenize(q) {
        let (negated, token) = match token.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, token.as_str()),
        };
        if token.is_empty() {
            continue;
        }

        match token.split_once(':') {
            Some(("is", "resolved")) => filter.resolved = Some(!negated),
            Some(("is", "ignored")) => filter.ignored = Some(!negated),
            Some(("environment" | "env", value)) if !value.is_empty() => {
                filter.environment = Some(value.to_string());
            }
            Some(("assignee", value)) if !value.is_empty() => {
                filter.assignee = Some(value.to_string());
            }
            Some(("tag", value)) if !value.is_empty() => {
                filter.tags.push(value.to_string());
            }
            _ => filter.terms.push(token.to_string()),
        }
    }

    filter
}

/// Split on whitespace; double quotes group (and are dropped).
fn tokenize(q: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in q.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(q: &str) -> FaultFilter {
        parse_query(q, 50, 0)
    }

    #[test]
    fn empty_query_is_the_default_filter() {
        let f = parse("");
        assert_eq!(f.resolved, None);
        assert_eq!(f.ignored, None);
        assert!(f.terms.is_empty());
    }

    #[test]
    fn is_tokens_set_flags() {
        let f = parse("is:resolved is:ignored");
        assert_eq!(f.resolved, Some(true));
        assert_eq!(f.ignored, Some(true));
    }

    #[test]
    fn dash_negates_is_tokens() {
        let f = parse("-is:resolved -is:ignored");
        assert_eq!(f.resolved, Some(false));
        assert_eq!(f.ignored, Some(false));
    }

    #[test]
    fn env_aliases_both_work() {
        assert_eq!(parse("env:prod").environment.as_deref(), Some("prod"));
        assert_eq!(
            parse("environment:staging").environment.as_deref(),
            Some("staging")
        );
    }

    #[test]
    fn tags_are_repeatable() {
        let f = parse("tag:db tag:urgent");
        assert_eq!(f.tags, vec!["db", "urgent"]);
    }

    #[test]
    fn assignee_is_captured() {
        let f = parse("assignee:3f1c");
        assert_eq!(f.assignee.as_deref(), Some("3f1c"));
    }

    #[test]
    fn bare_tokens_become_search_terms() {
        let f = parse("timeout checkout");
        assert_eq!(f.terms, vec!["timeout", "checkout"]);
    }

    #[test]
    fn quotes_group_spaces_into_one_term() {
        let f = parse(r#""connection reset" env:prod"#);
        assert_eq!(f.terms, vec!["connection reset"]);
        assert_eq!(f.environment.as_deref(), Some("prod"));
    }

    #[test]
    fn quoted_prefix_values_keep_their_spaces() {
        let f = parse(r#"tag:"needs triage""#);
        assert_eq!(f.tags, vec!["needs triage"]);
    }

    #[test]
    fn unknown_prefix_is_a_plain_term() {
        let f = parse("status:open");
        assert_eq!(f.terms, vec!["status:open"]);
    }

    #[test]
    fn limit_and_offset_pass_through() {
        let f = parse_query("", 25, 75);
        assert_eq!(f.limit, 25);
        assert_eq!(f.offset, 75);
    }
}
