use brewery_core::{ErrorKind, StageParams};
use brewery_engine::{ArticleExtractor, Transformer};

const PAGE: &str = r#"
<html>
  <head><title> Weekly Roundup </title></head>
  <body>
    <nav>Home | About</nav>
    <article>
      <h2>Rust 1.90 released</h2>
      <p>The release brings <a href="https://blog.rust-lang.org">new lints</a>.</p>
    </article>
  </body>
</html>
"#;

#[test]
fn extracts_title_and_article_as_markdown() {
    let markdown = ArticleExtractor
        .transform(PAGE, &StageParams::default())
        .unwrap();

    assert!(markdown.starts_with("# Weekly Roundup\n\n"));
    assert!(markdown.contains("Rust 1.90 released"));
    assert!(markdown.contains("[new lints](https://blog.rust-lang.org)"));
    assert!(!markdown.contains("Home | About"));
}

#[test]
fn title_can_be_turned_off() {
    let params: StageParams = [("include_title", "false")].into_iter().collect();

    let markdown = ArticleExtractor.transform(PAGE, &params).unwrap();

    assert!(!markdown.contains("Weekly Roundup"));
    assert!(markdown.contains("Rust 1.90 released"));
}

#[test]
fn falls_back_to_body_without_article() {
    let html = "<html><body><p>Just a note.</p></body></html>";

    let markdown = ArticleExtractor
        .transform(html, &StageParams::default())
        .unwrap();

    assert_eq!(markdown.trim(), "Just a note.");
}

#[test]
fn empty_page_is_a_fatal_transform_error() {
    let err = ArticleExtractor
        .transform("<html><body>   </body></html>", &StageParams::default())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fatal);
}
