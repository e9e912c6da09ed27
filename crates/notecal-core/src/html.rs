//! Markup escaping.

/// Escapes a string for embedding in HTML text or attribute values.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            html_escape("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;"
        );
    }

    #[test]
    fn escapes_ampersand_first() {
        assert_eq!(html_escape("&lt;"), "&amp;lt;");
        assert_eq!(html_escape("a \"b\""), "a &quot;b&quot;");
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(html_escape("access_denied"), "access_denied");
        assert_eq!(html_escape(""), "");
    }
}
