use pulldown_cmark::{CowStr, Event, Parser, Tag, html};

/// Render a markdown body to sanitized HTML.
///
/// Pure function: the output is built only from pulldown-cmark events, so
/// it can never contain tags outside the renderer's fixed set. Raw HTML in
/// the input is re-emitted as escaped text, images keep only `src`/`alt`
/// (titles are dropped), links keep only `href`, and script-ish URL schemes
/// are neutralized.
pub fn render(input: &str) -> String {
    let parser = Parser::new(input).map(|event| match event {
        Event::Html(raw) => Event::Text(raw),
        Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title: _,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: safe_url(dest_url),
            title: CowStr::Borrowed(""),
            id,
        }),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title: _,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: safe_url(dest_url),
            title: CowStr::Borrowed(""),
            id,
        }),
        other => other,
    });

    let mut out = String::new();
    html::push_html(&mut out, parser);
    out.trim_end().to_string()
}

fn safe_url(url: CowStr<'_>) -> CowStr<'_> {
    let lowered = url.trim().to_ascii_lowercase();
    if lowered.starts_with("javascript:")
        || lowered.starts_with("vbscript:")
        || lowered.starts_with("data:")
    {
        CowStr::Borrowed("")
    } else {
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_basic_markdown() {
        assert_eq!(render("**hi**"), "<p><strong>hi</strong></p>");
        assert_eq!(render("# title"), "<h1>title</h1>");
        assert_eq!(render("`code`"), "<p><code>code</code></p>");
    }

    #[test]
    fn escapes_raw_html() {
        let out = render("<script>alert('x')</script>");
        assert!(!out.contains("<script>"), "raw html must be escaped: {out}");
        assert!(out.contains("&lt;script&gt;"));

        let out = render("hello <img src=x onerror=alert(1)> world");
        assert!(!out.contains("<img"), "inline html must be escaped: {out}");
    }

    #[test]
    fn images_keep_only_src_and_alt() {
        let out = render("![a cat](https://example.com/cat.png \"hover text\")");
        assert!(out.contains(r#"src="https://example.com/cat.png""#));
        assert!(out.contains(r#"alt="a cat""#));
        assert!(!out.contains("title="), "title attribute must be stripped: {out}");
        assert!(!out.contains("onerror"));
    }

    #[test]
    fn script_schemes_are_neutralized() {
        let out = render("[click](javascript:alert(1))");
        assert!(!out.contains("javascript:"), "{out}");

        let out = render("![x](data:text/html;base64,AAAA)");
        assert!(!out.contains("data:"), "{out}");
    }

    #[test]
    fn rendering_is_deterministic() {
        let input = "*a* [b](https://b.example) `c`\n\n> quote";
        assert_eq!(render(input), render(input));
    }
}
