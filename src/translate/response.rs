use regex::Regex;

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// Code extracted from one generation reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub code: String,
    /// The code section carried its closing marker.
    pub terminated: bool,
}

/// Extracts the code payload from a tagged reply.
///
/// Total over all inputs: a reply without a code section yields an empty,
/// unterminated result.
#[derive(Debug, Clone)]
pub struct ResponseParser {
    closed: Regex,
    open: Regex,
    opening_tag: String,
    closing_tag: String,
}

impl ResponseParser {
    pub fn new(opening_tag: &str, closing_tag: &str) -> Self {
        let open = regex::escape(opening_tag);
        let close = regex::escape(closing_tag);
        Self {
            closed: Regex::new(&format!("(?s){open}(.*?){close}")).unwrap(),
            open: Regex::new(&format!("(?s){open}(.*)$")).unwrap(),
            opening_tag: opening_tag.to_string(),
            closing_tag: closing_tag.to_string(),
        }
    }

    pub fn opening_tag(&self) -> &str {
        &self.opening_tag
    }

    pub fn closing_tag(&self) -> &str {
        &self.closing_tag
    }

    /// Prefers a fully closed code section, then falls back to everything
    /// after an unterminated opening marker.
    pub fn parse(&self, response: &str) -> ParsedResponse {
        let (raw, terminated) = if let Some(caps) = self.closed.captures(response) {
            (caps.get(1).map_or("", |m| m.as_str()), true)
        } else if let Some(caps) = self.open.captures(response) {
            (caps.get(1).map_or("", |m| m.as_str()), false)
        } else {
            return ParsedResponse {
                code: String::new(),
                terminated: false,
            };
        };

        ParsedResponse {
            code: decode_entities(&strip_fence(&unwrap_cdata(raw))),
            terminated,
        }
    }

    pub fn extract_code(&self, response: &str) -> String {
        self.parse(response).code
    }

    /// Parses a reply to a continuation request. The service resumes in the
    /// middle of the code section, so a reply may carry only the closing
    /// marker, or no marker at all when it is itself cut off.
    pub fn parse_continuation(&self, response: &str) -> ParsedResponse {
        if response.contains(self.opening_tag.as_str()) {
            return self.parse(response);
        }
        let (raw, terminated) = match response.find(self.closing_tag.as_str()) {
            Some(end) => (&response[..end], true),
            None => (response, false),
        };
        ParsedResponse {
            code: decode_entities(&strip_fence(&unwrap_cdata(raw))),
            terminated,
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new("<code>", "</code>")
    }
}

/// Unwraps a payload wrapped in `<![CDATA[ ... ]]>`; a missing closing
/// marker keeps everything after the opening one. Markers inside the code
/// are left alone.
fn unwrap_cdata(raw: &str) -> String {
    let Some(inner) = raw.trim_start().strip_prefix(CDATA_OPEN) else {
        return raw.to_string();
    };
    match inner.trim_end().strip_suffix(CDATA_CLOSE) {
        Some(body) => body.to_string(),
        None => inner.to_string(),
    }
}

/// Drops a surrounding markdown fence (```lang ... ```), closed or not.
fn strip_fence(raw: &str) -> String {
    let trimmed = raw.trim_start();
    if !trimmed.starts_with("```") {
        return raw.to_string();
    }
    let body = match trimmed.find('\n') {
        Some(nl) => &trimmed[nl + 1..],
        None => return String::new(),
    };
    let tail = body.trim_end();
    match tail.strip_suffix("```") {
        Some(inner) => inner.to_string(),
        None => body.to_string(),
    }
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_section() {
        let parsed = ResponseParser::default()
            .parse("<response><code>int x = 1;</code><rationale>easy</rationale></response>");
        assert_eq!(parsed.code, "int x = 1;");
        assert!(parsed.terminated);
    }

    #[test]
    fn test_open_section() {
        let parsed = ResponseParser::default().parse("<response><code>partial code without closing");
        assert_eq!(parsed.code, "partial code without closing");
        assert!(!parsed.terminated);
    }

    #[test]
    fn test_no_section_is_empty() {
        for input in ["", "plain text", "</code>", "<cod", "\u{0}\u{1}<<>>&&"] {
            let parsed = ResponseParser::default().parse(input);
            assert_eq!(parsed.code, "", "input {input:?}");
            assert!(!parsed.terminated);
        }
    }

    #[test]
    fn test_cdata_unwrapped() {
        let parser = ResponseParser::default();
        assert_eq!(
            parser.extract_code("<code><![CDATA[if (a < b) {}]]></code>"),
            "if (a < b) {}"
        );
        assert_eq!(
            parser.extract_code("<code><![CDATA[if (a < b) {}</code>"),
            "if (a < b) {}"
        );
    }

    #[test]
    fn test_cdata_inside_code_is_kept() {
        let parser = ResponseParser::default();
        let code = "class X {\n  String s = \"<![CDATA[a]]>\";\n}\n";
        assert_eq!(parser.extract_code(&format!("<code>{code}</code>")), code);
        assert_eq!(
            parser.extract_code("<code>\n<![CDATA[String s = \"<![CDATA[a]]>\";]]>\n</code>"),
            "String s = \"<![CDATA[a]]>\";"
        );
    }

    #[test]
    fn test_entities_decoded() {
        assert_eq!(
            ResponseParser::default().extract_code("<code>a &lt; b &amp;&amp; c &gt; d</code>"),
            "a < b && c > d"
        );
    }

    #[test]
    fn test_fence_stripped() {
        let parser = ResponseParser::default();
        assert_eq!(
            parser.extract_code("<code>```java\nclass A {}\n```</code>"),
            "class A {}\n"
        );
        assert_eq!(
            parser.extract_code("<code>```rust\nfn main() {"),
            "fn main() {"
        );
    }

    #[test]
    fn test_custom_tags() {
        let parser = ResponseParser::new("[[code]]", "[[/code]]");
        assert_eq!(parser.extract_code("x [[code]]a+b[[/code]] y"), "a+b");
    }

    #[test]
    fn test_continuation_with_closing_marker_only() {
        let parsed = ResponseParser::default().parse_continuation("remaining code</code></response>");
        assert_eq!(parsed.code, "remaining code");
        assert!(parsed.terminated);
    }

    #[test]
    fn test_continuation_without_markers() {
        let parsed = ResponseParser::default().parse_continuation("more code");
        assert_eq!(parsed.code, "more code");
        assert!(!parsed.terminated);

        let empty = ResponseParser::default().parse_continuation("");
        assert_eq!(empty.code, "");
    }

    #[test]
    fn test_continuation_with_full_envelope() {
        let parsed = ResponseParser::default().parse_continuation("<response><code>x</code>");
        assert_eq!(parsed.code, "x");
        assert!(parsed.terminated);
    }

    #[test]
    fn test_first_closed_section_wins() {
        let parsed = ResponseParser::default().parse("<code>one</code> <code>two</code>");
        assert_eq!(parsed.code, "one");
    }
}
