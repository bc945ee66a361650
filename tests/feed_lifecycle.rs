//! Integration tests for the feed lifecycle: discover, subscribe, refresh,
//! exchange as OPML, clean up.
//!
//! Each test creates its own in-memory SQLite database and mock HTTP server.

use pretty_assertions::assert_eq;
use tidings::feed::{
    FeedLocator, FeedSyncCoordinator, HttpFetcher, MaintenanceService, OpmlInterchange,
    RefreshSummary, REQUEST_TIMEOUT,
};
use tidings::storage::{Database, FeedQuery, FeedSort, FolderScope, NewFeed};
use tidings::util::{RetryPolicy, UrlPolicy};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn locator() -> FeedLocator {
    FeedLocator::new(HttpFetcher::new(UrlPolicy::AllowPrivate, REQUEST_TIMEOUT).unwrap())
}

fn rss(title: &str, ids: impl IntoIterator<Item = u32>) -> String {
    let items: String = ids
        .into_iter()
        .map(|id| {
            format!(
                "<item><guid>{id}</guid><title>Post {id}</title>\
                 <link>https://example.com/posts/{id}</link>\
                 <pubDate>Mon, 01 Jan 2024 10:{:02}:00 +0000</pubDate></item>",
                id % 60
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>{title}</title>
        <link>https://example.com/</link><description>About {title}</description>{items}</channel></rss>"#
    )
}

async fn serve(server: &MockServer, at: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

// ============================================================================
// Discovery + Subscribe
// ============================================================================

#[tokio::test]
async fn test_subscribe_via_site_html_link() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/",
        r#"<html><head><title>Blog</title>
            <link href="/feed.xml" rel="alternate" type="application/rss+xml">
        </head><body>hello</body></html>"#
            .to_string(),
    )
    .await;
    serve(&server, "/feed.xml", rss("Blog", 1..=3)).await;

    let sync = FeedSyncCoordinator::new(test_db().await, locator());
    let feed = sync.add_feed(&server.uri(), None).await.unwrap();

    assert_eq!(feed.url, format!("{}/feed.xml", server.uri()));
    assert_eq!(feed.title, "Blog");
    assert_eq!(feed.description.as_deref(), Some("About Blog"));
    assert_eq!(feed.unread_count, 3);
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_refresh_never_duplicates_articles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("Daily", 1..=10)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    serve(&server, "/rss", rss("Daily", 1..=12)).await;

    let sync = FeedSyncCoordinator::new(test_db().await, locator());
    let feed = sync
        .add_feed(&format!("{}/rss", server.uri()), None)
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let mut outcomes = sync.refresh_all(&[feed.clone()], &cancel).await;
    outcomes.extend(sync.refresh_all(&[feed.clone()], &cancel).await);
    let summary = RefreshSummary::from(outcomes.as_slice());
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.new_articles, 2);

    let db = sync.database();
    for id in 1..=12 {
        let count = db
            .count_articles_with_external_id(feed.id, &id.to_string())
            .await
            .unwrap();
        assert_eq!(count, 1, "external id {id}");
    }
    let stored = db.feed(feed.id).await.unwrap().unwrap();
    assert_eq!(stored.unread_count, 12);
}

#[tokio::test]
async fn test_read_state_keeps_unread_count_current() {
    let server = MockServer::start().await;
    serve(&server, "/rss", rss("Counts", 1..=4)).await;

    let sync = FeedSyncCoordinator::new(test_db().await, locator());
    let feed = sync
        .add_feed(&format!("{}/rss", server.uri()), None)
        .await
        .unwrap();
    let articles = sync.database().articles_for_feed(feed.id, None).await.unwrap();

    assert_eq!(sync.set_read(articles[0].id, true).await.unwrap(), 3);
    assert_eq!(sync.set_read(articles[0].id, false).await.unwrap(), 4);
    sync.set_starred(articles[1].id, true).await.unwrap();
    assert_eq!(sync.mark_feed_read(feed.id).await.unwrap(), 4);

    let stored = sync.database().feed(feed.id).await.unwrap().unwrap();
    assert_eq!(stored.unread_count, 0);
    let starred = sync.database().article(articles[1].id).await.unwrap().unwrap();
    assert!(starred.starred);
}

// ============================================================================
// OPML Round Trip
// ============================================================================

#[tokio::test]
async fn test_opml_round_trip_preserves_folders() {
    let server = MockServer::start().await;
    for name in ["alpha", "beta", "gamma"] {
        serve(&server, &format!("/{name}"), rss(name, 1..=2)).await;
    }

    let source = test_db().await;
    let tech = source.create_folder("Tech").await.unwrap();
    source.create_folder("Empty").await.unwrap();
    let sync = FeedSyncCoordinator::new(source.clone(), locator());
    sync.add_feed(&format!("{}/alpha", server.uri()), Some(tech.id))
        .await
        .unwrap();
    sync.add_feed(&format!("{}/beta", server.uri()), Some(tech.id))
        .await
        .unwrap();
    sync.add_feed(&format!("{}/gamma", server.uri()), None)
        .await
        .unwrap();

    let document = OpmlInterchange::new(source, locator())
        .export_store()
        .await
        .unwrap();

    let target = test_db().await;
    let result = OpmlInterchange::new(target.clone(), locator())
        .import_document(document.as_bytes(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.feeds_added, 3);
    assert_eq!(result.folders_created, 2);
    assert!(result.failures.is_empty());

    let tech = target.folder_by_name("Tech").await.unwrap().unwrap();
    let filed: Vec<String> = target
        .query_feeds(&FeedQuery::in_folder(FolderScope::In(tech.id)).sorted(FeedSort::Title))
        .await
        .unwrap()
        .into_iter()
        .map(|feed| feed.title)
        .collect();
    assert_eq!(filed, vec!["alpha", "beta"]);

    let unfiled = target
        .query_feeds(&FeedQuery::in_folder(FolderScope::Unfiled))
        .await
        .unwrap();
    assert_eq!(unfiled.len(), 1);
    assert_eq!(unfiled[0].url, format!("{}/gamma", server.uri()));
    assert!(target.folder_by_name("Empty").await.unwrap().is_some());

    // Importing the same document again changes nothing
    let again = OpmlInterchange::new(target.clone(), locator())
        .import_document(document.as_bytes(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.feeds_added, 0);
    assert_eq!(again.feeds_skipped, 3);
    assert_eq!(again.folders_created, 0);
}

// ============================================================================
// Maintenance
// ============================================================================

#[tokio::test]
async fn test_cleanup_merges_duplicates_and_drops_dead_feeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("ok", 1..=1)))
        .mount(&server)
        .await;

    let db = test_db().await;
    let news_a = db.create_folder("News").await.unwrap();
    let news_b = db.create_folder("News").await.unwrap();
    let feed = |suffix: &str, folder_id| NewFeed {
        title: suffix.to_string(),
        url: format!("{}/{suffix}", server.uri()),
        folder_id,
        ..NewFeed::default()
    };
    db.insert_feed(&feed("one", Some(news_a.id)), &[]).await.unwrap();
    db.insert_feed(&feed("two", Some(news_b.id)), &[]).await.unwrap();
    db.insert_feed(&feed("two", None), &[]).await.unwrap();
    db.insert_feed(&feed("gone", None), &[]).await.unwrap();

    let service = MaintenanceService::with_policy(
        db.clone(),
        locator(),
        RetryPolicy {
            max_attempts: 3,
            delay: std::time::Duration::from_millis(1),
        },
    );
    let result = service.run_cleanup(&CancellationToken::new()).await.unwrap();

    assert_eq!(result.folders_removed, 1);
    assert_eq!(result.feeds_removed, 1);
    assert_eq!(result.failing_feeds_removed, 1);

    let folders = db.folders().await.unwrap();
    assert_eq!(folders.len(), 1);
    let members = db
        .query_feeds(&FeedQuery::in_folder(FolderScope::In(news_a.id)))
        .await
        .unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(db.query_feeds(&FeedQuery::all()).await.unwrap().len(), 2);
}
