//! Fetcher adapters against a mock HTTP server.

use httpmock::prelude::*;

use mindloom::config::ScrapingConfig;
use mindloom::ingestion::crawler::WebCrawler;
use mindloom::ingestion::scrapers::WebScraper;

fn fast_config() -> ScrapingConfig {
    ScrapingConfig {
        rate_limit_ms: 0,
        max_retries: 0,
        ..ScrapingConfig::default()
    }
}

#[tokio::test]
async fn scraper_extracts_title_and_main_content() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/article");
        then.status(200).body(
            "<html><head><title>Deep Dive</title></head><body>\
             <nav>menu</nav>\
             <article><p>The interesting part of the page.</p></article>\
             <footer>footer</footer></body></html>",
        );
    });

    let scraper = WebScraper::new(&fast_config()).unwrap();
    let page = scraper.scrape(&server.url("/article")).await.unwrap();

    assert_eq!(page.title, "Deep Dive");
    assert!(page.text.contains("interesting part"));
    assert!(!page.text.contains("menu"));
    assert_eq!(page.metadata["domain"], "127.0.0.1");
}

#[tokio::test]
async fn scraper_retries_transient_failures() {
    let server = MockServer::start();
    // Always 503: with retries enabled the scraper should call more than
    // once before giving up.
    let mock = server.mock(|when, then| {
        when.method(GET).path("/flaky");
        then.status(503);
    });

    let config = ScrapingConfig {
        rate_limit_ms: 0,
        max_retries: 2,
        ..ScrapingConfig::default()
    };
    let scraper = WebScraper::new(&config).unwrap();
    let result = scraper.scrape(&server.url("/flaky")).await;

    assert!(result.is_err());
    assert_eq!(mock.hits(), 3);
}

#[tokio::test]
async fn scraper_does_not_retry_client_errors() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/missing");
        then.status(404);
    });

    let config = ScrapingConfig {
        rate_limit_ms: 0,
        max_retries: 3,
        ..ScrapingConfig::default()
    };
    let scraper = WebScraper::new(&config).unwrap();
    assert!(scraper.scrape(&server.url("/missing")).await.is_err());
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn crawler_walks_links_within_limits() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/");
        then.status(200).body(format!(
            "<html><head><title>Home</title></head><body>\
             <p>Welcome home.</p>\
             <a href=\"{0}/a\">A</a>\
             <a href=\"{0}/b\">B</a>\
             <a href=\"mailto:x@y.z\">mail</a>\
             </body></html>",
            server.base_url()
        ));
    });
    server.mock(|when, then| {
        when.method(GET).path("/a");
        then.status(200)
            .body("<html><head><title>Page A</title></head><body><p>Alpha content.</p></body></html>");
    });
    server.mock(|when, then| {
        when.method(GET).path("/b");
        then.status(200)
            .body("<html><head><title>Page B</title></head><body><p>Beta content.</p></body></html>");
    });

    let crawler = WebCrawler::new(&fast_config())
        .unwrap()
        .with_limits(10, 2);
    let pages = crawler.crawl(&server.url("/"), false).await.unwrap();

    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0].title, "Home");
    assert_eq!(pages[0].depth, 0);
    let titles: Vec<&str> = pages.iter().map(|p| p.title.as_str()).collect();
    assert!(titles.contains(&"Page A"));
    assert!(titles.contains(&"Page B"));
    assert!(pages.iter().skip(1).all(|p| p.depth == 1));
}

#[tokio::test]
async fn crawler_enforces_max_pages() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/");
        then.status(200).body(format!(
            "<html><body><a href=\"{0}/a\">A</a><a href=\"{0}/b\">B</a></body></html>",
            server.base_url()
        ));
    });
    for path in ["/a", "/b"] {
        server.mock(|when, then| {
            when.method(GET).path(path);
            then.status(200).body("<html><body><p>leaf</p></body></html>");
        });
    }

    let crawler = WebCrawler::new(&fast_config())
        .unwrap()
        .with_limits(2, 3);
    let pages = crawler.crawl(&server.url("/"), false).await.unwrap();
    assert_eq!(pages.len(), 2);
}

#[tokio::test]
async fn crawler_seeds_from_sitemap() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/sitemap.xml");
        then.status(200).body(format!(
            "<?xml version=\"1.0\"?>\
             <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\
             <url><loc>{0}/docs</loc></url>\
             </urlset>",
            server.base_url()
        ));
    });
    server.mock(|when, then| {
        when.method(GET).path("/docs");
        then.status(200)
            .body("<html><head><title>Docs</title></head><body><p>Documentation.</p></body></html>");
    });
    server.mock(|when, then| {
        when.method(GET).path("/");
        then.status(200)
            .body("<html><head><title>Home</title></head><body><p>Home.</p></body></html>");
    });

    let crawler = WebCrawler::new(&fast_config())
        .unwrap()
        .with_limits(5, 1);
    let pages = crawler.crawl(&server.url("/"), true).await.unwrap();

    let titles: Vec<&str> = pages.iter().map(|p| p.title.as_str()).collect();
    assert!(titles.contains(&"Docs"));
    assert!(titles.contains(&"Home"));
}
