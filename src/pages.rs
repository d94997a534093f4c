use axum::response::Html;

const LANDING: &str = include_str!("../templates/landing.html");
const SCANNER: &str = include_str!("../templates/scanner.html");
const ABOUT: &str = include_str!("../templates/about.html");
const RESULT: &str = include_str!("../templates/result.html");

pub struct ResultView<'a> {
    pub image_url: &'a str,
    pub disease_name: &'a str,
    pub confidence: &'a str,
    pub description: &'a str,
    /// Trusted HTML, inserted as is.
    pub treatments: &'a str,
}

pub async fn landing() -> Html<&'static str> {
    Html(LANDING)
}

pub async fn scanner() -> Html<String> {
    scanner_page(None)
}

pub async fn about() -> Html<&'static str> {
    Html(ABOUT)
}

pub fn scanner_page(error: Option<&str>) -> Html<String> {
    let banner = error
        .map(|message| format!(r#"<div class="error">{}</div>"#, escape(message)))
        .unwrap_or_default();
    Html(render(SCANNER, &[("error", banner.as_str())]))
}

pub fn result_page(view: &ResultView) -> Html<String> {
    let image_url = escape(view.image_url);
    let disease_name = escape(view.disease_name);
    let confidence = escape(view.confidence);
    let description = escape(view.description);

    Html(render(
        RESULT,
        &[
            ("image_url", image_url.as_str()),
            ("disease_name", disease_name.as_str()),
            ("confidence", confidence.as_str()),
            ("description", description.as_str()),
            ("treatments", view.treatments),
        ],
    ))
}

/// Single pass over `template`; substituted values are never rescanned.
fn render(template: &str, slots: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            rest = &rest[start..];
            break;
        };

        let key = after[..end].trim();
        match slots.iter().find(|(name, _)| *name == key) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
