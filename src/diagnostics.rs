use crate::functions::builtins::escape;

/// Attribute present on every rendered diagnostic.
pub const DIAGNOSTIC_MARKER: &str = "data-template-error";

/// Inline error block rendered in place of a template that failed to
/// evaluate in development mode. Every interpolated value is escaped.
pub fn render_diagnostic(identity: &str, message: &str, source: &str) -> String {
    format!(
        concat!(
            "<div {marker} style=\"border:3px solid #d00;background:#fff0f0;color:#600;",
            "padding:1em;margin:1em 0;font-family:monospace;white-space:normal\">",
            "<strong>Template error</strong> in <code>{identity}</code>",
            "<pre style=\"white-space:pre-wrap\">{message}</pre>",
            "<details><summary>Template source</summary>",
            "<pre style=\"white-space:pre-wrap\">{source}</pre></details>",
            "</div>"
        ),
        marker = DIAGNOSTIC_MARKER,
        identity = escape(identity),
        message = escape(message),
        source = escape(source),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_everything_interpolated() {
        let html = render_diagnostic("<a>.html", "x < y", "${'<script>'}");
        assert!(html.contains(DIAGNOSTIC_MARKER));
        assert!(html.contains("&lt;a&gt;.html"));
        assert!(html.contains("x &lt; y"));
        assert!(!html.contains("<script>"));
    }
}
