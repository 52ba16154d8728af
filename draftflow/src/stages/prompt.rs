//! `{name}` placeholder substitution for prompt templates.

use std::collections::BTreeMap;

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Replaces every `{name}` whose name is in `vars`.
///
/// Braces that do not enclose a known name, such as JSON examples inside the
/// template, are copied through unchanged.
#[must_use]
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match vars.get(name).filter(|_| is_placeholder_name(name)) {
                    Some(value) => {
                        out.push_str(value);
                        rest = &after[close + 1..];
                    }
                    None => {
                        out.push('{');
                        rest = after;
                    }
                }
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_substitutes_known_names() {
        let out = render_template(
            "Analyze part {index} of {total}:\n{item}",
            &vars(&[("index", "2"), ("total", "6"), ("item", "text")]),
        );
        assert_eq!(out, "Analyze part 2 of 6:\ntext");
    }

    #[test]
    fn test_leaves_json_and_unknown_placeholders() {
        let template = r#"Return {"concepts": []} for {item} and {unknown}"#;
        let out = render_template(template, &vars(&[("item", "x")]));
        assert_eq!(out, r#"Return {"concepts": []} for x and {unknown}"#);
    }

    #[test]
    fn test_nested_and_unterminated_braces() {
        let out = render_template("{{item}} {item", &vars(&[("item", "v")]));
        assert_eq!(out, "{v} {item");
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let out = render_template("{a}", &vars(&[("a", "{b}"), ("b", "no")]));
        assert_eq!(out, "{b}");
    }
}
