//! Markdown rendering for tutor replies.
//!
//! Replies mix markdown with LaTeX (`$…$` inline, `$$…$$` display). Math is
//! cut out before markdown runs so emphasis rules never touch it, then put
//! back verbatim (HTML-escaped) for MathJax to typeset in the page.

use crate::types::ChatTurn;
use comrak::plugins::syntect::SyntectAdapter;
use comrak::{ComrakOptions, ComrakPlugins, markdown_to_html_with_plugins};
use once_cell::sync::Lazy;

static MARKDOWN_OPTIONS: Lazy<ComrakOptions> = Lazy::new(|| {
    let mut options = ComrakOptions::default();
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.autolink = true;
    options.render.unsafe_ = false;
    options
});

const MATHJAX_CONFIG: &str = r#"<script>
window.MathJax = { tex: { inlineMath: [['$', '$']], displayMath: [['$$', '$$']] } };
</script>
<script async src="https://cdn.jsdelivr.net/npm/mathjax@3/es5/tex-mml-chtml.js"></script>"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    /// Math including its delimiters.
    Math { source: &'a str, display: bool },
}

/// Splits `text` into prose and math. Unclosed delimiters stay prose.
pub fn split_math(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find('$') {
        let open = cursor + offset;
        let (display, close) = if text[open..].starts_with("$$") {
            (true, text[open + 2..].find("$$").map(|i| open + 2 + i + 2))
        } else {
            (false, text[open + 1..].find('$').map(|i| open + 1 + i + 1))
        };

        let Some(end) = close else {
            break;
        };
        if open > text_start {
            segments.push(Segment::Text(&text[text_start..open]));
        }
        segments.push(Segment::Math {
            source: &text[open..end],
            display,
        });
        text_start = end;
        cursor = end;
    }

    if text_start < text.len() {
        segments.push(Segment::Text(&text[text_start..]));
    }
    segments
}

fn placeholder(index: usize) -> String {
    format!("TUTORMATH{index}X")
}

/// Renders a reply to an HTML fragment with its math left for MathJax.
pub fn render_content(text: &str) -> String {
    let mut markdown = String::with_capacity(text.len());
    let mut math = Vec::new();
    for segment in split_math(text) {
        match segment {
            Segment::Text(prose) => markdown.push_str(prose),
            Segment::Math { source, .. } => {
                markdown.push_str(&placeholder(math.len()));
                math.push(source);
            }
        }
    }

    let adapter = SyntectAdapter::new(Some("base16-ocean.dark"));
    let mut plugins = ComrakPlugins::default();
    plugins.render.codefence_syntax_highlighter = Some(&adapter);
    let mut html = markdown_to_html_with_plugins(&markdown, &MARKDOWN_OPTIONS, &plugins);

    for (index, source) in math.iter().enumerate() {
        html = html.replace(&placeholder(index), &escape_html(source));
    }
    html
}

/// A standalone HTML page of the whole conversation.
pub fn render_transcript(title: &str, turns: &[ChatTurn]) -> String {
    let mut body = String::new();
    for turn in turns {
        let (class, label) = if turn.is_user() {
            ("user", "You")
        } else {
            ("tutor", "Tutor")
        };
        body.push_str(&format!("<section class=\"turn {class}\">\n<h3>{label}"));
        if turn.extended_reasoning() == Some(true) {
            body.push_str(" <small>(extended reasoning)</small>");
        }
        body.push_str("</h3>\n");
        if let Some(image) = turn.image() {
            body.push_str(&format!(
                "<img alt=\"Math problem\" src=\"{}\">\n",
                escape_html(&image.to_data_url())
            ));
        }
        if !turn.text().is_empty() {
            body.push_str(&render_content(turn.text()));
        }
        body.push_str("</section>\n");
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n{MATHJAX_CONFIG}\n</head>\n<body>\n<h1>{title}</h1>\n{body}</body>\n</html>\n",
        title = escape_html(title),
    )
}

fn escape_html(text: &str) -> String {
    let mut out = Vec::with_capacity(text.len());
    match comrak::html::escape(&mut out, text.as_bytes()) {
        Ok(()) => String::from_utf8(out).unwrap_or_default(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageData;

    #[test]
    fn splits_inline_and_display_math() {
        let segments = split_math("Let $x_1$ be given. $$\\int_0^1 x\\,dx$$ done");
        assert_eq!(
            segments,
            vec![
                Segment::Text("Let "),
                Segment::Math {
                    source: "$x_1$",
                    display: false
                },
                Segment::Text(" be given. "),
                Segment::Math {
                    source: "$$\\int_0^1 x\\,dx$$",
                    display: true
                },
                Segment::Text(" done"),
            ]
        );
    }

    #[test]
    fn unclosed_dollar_is_prose() {
        assert_eq!(split_math("costs $5"), vec![Segment::Text("costs $5")]);
        assert!(split_math("").is_empty());
    }

    #[test]
    fn math_survives_markdown() {
        let html = render_content("Compute $a_1 * b_2$ and *think*.");
        assert!(html.contains("$a_1 * b_2$"));
        assert!(html.contains("<em>think</em>"));
    }

    #[test]
    fn math_and_raw_html_are_escaped() {
        let html = render_content("If $a<b$ then <script>alert(1)</script>");
        assert!(html.contains("$a&lt;b$"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn many_placeholders_do_not_collide() {
        let text: String = (0..12).map(|i| format!("${i}$ ")).collect();
        let html = render_content(&text);
        for i in 0..12 {
            assert!(html.contains(&format!("${i}$")));
        }
        assert!(!html.contains("TUTORMATH"));
    }

    #[test]
    fn transcript_is_a_full_page() {
        let turns = vec![
            ChatTurn::user_image(ImageData::from_bytes("image/png", b"png")),
            ChatTurn::tutor("Start by isolating $x$.", true),
        ];
        let page = render_transcript("Session <1> & \"two\"", &turns);
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<title>Session &lt;1&gt; &amp; &quot;two&quot;</title>"));
        assert!(page.contains("mathjax@3"));
        assert!(page.contains("src=\"data:image/png;base64,cG5n\""));
        assert!(page.contains("(extended reasoning)"));
        assert!(page.contains("$x$"));
    }
}
