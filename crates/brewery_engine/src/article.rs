use brewery_core::{ErrorKind, PipelineError, StageParams};
use scraper::{Html, Selector};

use crate::stage::Transformer;

/// Turns a fetched HTML page into Markdown: the `<title>` as a heading, then
/// the first `<article>` (or `<body>`) converted with html2md.
///
/// Recognised parameter: `include_title` (`true` by default).
#[derive(Debug, Default, Clone, Copy)]
pub struct ArticleExtractor;

impl ArticleExtractor {
    pub fn extract(&self, html: &str, include_title: bool) -> Result<String, PipelineError> {
        let doc = Html::parse_document(html);
        let title = select_first(&doc, "title")
            .map(|node| node.text().collect::<String>().trim().to_string())
            .filter(|title| !title.is_empty());
        let content_html = select_first(&doc, "article")
            .or_else(|| select_first(&doc, "body"))
            .map(|node| node.inner_html())
            .unwrap_or_else(|| doc.root_element().html());

        let body = html2md::parse_html(&content_html).trim().to_string();
        if body.is_empty() {
            return Err(PipelineError::transform(
                ErrorKind::Fatal,
                "no readable content in page",
            ));
        }
        Ok(match title {
            Some(title) if include_title => format!("# {title}\n\n{body}\n"),
            _ => format!("{body}\n"),
        })
    }
}

fn select_first<'a>(doc: &'a Html, selector: &str) -> Option<scraper::ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    let first = doc.select(&selector).next();
    first
}

impl Transformer for ArticleExtractor {
    fn transform(&self, text: &str, params: &StageParams) -> Result<String, PipelineError> {
        let include_title = params
            .get("include_title")
            .map_or(true, |value| !value.eq_ignore_ascii_case("false"));
        self.extract(text, include_title)
    }
}
