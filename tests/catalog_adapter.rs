mod common;

use std::sync::Arc;

use common::{context, static_fetch_client, stub, test_config};
use flyer_finder::adapters::CatalogAdapter;
use flyer_finder::extract::OfferBlockSelectors;
use flyer_finder::models::{ContentMode, RetailerKind};
use flyer_finder::traits::RetailerAdapter;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn catalog_page(names: &[&str], next: Option<u32>) -> String {
    let blocks: String = names
        .iter()
        .map(|name| {
            format!(
                r#"<div data-offer-id="{name}"><h3>{name}</h3><span class="price">19,90 kr</span></div>"#
            )
        })
        .collect();
    let link = next
        .map(|page| format!(r#"<a class="pagination-next" href="/willys?page={page}">Nästa</a>"#))
        .unwrap_or_default();
    format!(r#"<section class="catalog-section">{blocks}</section>{link}"#)
}

async fn mount_page(server: &MockServer, page: &str, body: String, hits: u64) {
    Mock::given(method("GET"))
        .and(path("/willys"))
        .and(query_param("page", page))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .with_priority(1)
        .expect(hits)
        .mount(server)
        .await;
}

fn adapter(server: &MockServer, max_pages: usize) -> CatalogAdapter {
    let mut config = test_config(&server.uri());
    config.catalog.max_pages = max_pages;
    let selectors = Arc::new(OfferBlockSelectors::compile(&config.offers).unwrap());
    CatalogAdapter::new(
        static_fetch_client(&config),
        selectors,
        &config.listing.embedded_data,
        config.catalog.clone(),
    )
}

#[tokio::test]
async fn stops_when_a_page_repeats_the_previous_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/willys"))
        .respond_with(ResponseTemplate::new(200).set_body_string(catalog_page(&["Pasta", "Pesto"], Some(2))))
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "2", catalog_page(&["Tomater", "Pasta"], Some(3)), 1).await;
    mount_page(&server, "3", catalog_page(&["Basilika"], Some(4)), 1).await;
    // Page 4 repeats page 3.
    mount_page(&server, "4", catalog_page(&["Basilika"], Some(5)), 1).await;
    mount_page(&server, "5", catalog_page(&["Ska inte läsas"], None), 0).await;

    let extraction = adapter(&server, 50)
        .extract(
            &stub("Willys", &format!("{}/willys", server.uri()), RetailerKind::Catalog),
            ContentMode::Static,
            &context(&server.uri()),
        )
        .await
        .unwrap();

    let names: Vec<_> = extraction.offers.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, ["Pasta", "Pesto", "Tomater", "Basilika"]);
    assert!(extraction.diagnostic.is_none());
}

#[tokio::test]
async fn empty_page_ends_enumeration_without_next_link() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/willys"))
        .respond_with(ResponseTemplate::new(200).set_body_string(catalog_page(&["Kaffe", "Te"], None)))
        .mount(&server)
        .await;
    mount_page(&server, "2", "<main></main>".to_string(), 1).await;
    mount_page(&server, "3", catalog_page(&["Ska inte läsas"], None), 0).await;

    let extraction = adapter(&server, 50)
        .extract(
            &stub("Willys", &format!("{}/willys", server.uri()), RetailerKind::Catalog),
            ContentMode::Static,
            &context(&server.uri()),
        )
        .await
        .unwrap();
    assert_eq!(extraction.offers.len(), 2);
}

#[tokio::test]
async fn page_budget_bounds_enumeration() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/willys"))
        .respond_with(ResponseTemplate::new(200).set_body_string(catalog_page(&["Sida 1"], Some(2))))
        .mount(&server)
        .await;
    mount_page(&server, "2", catalog_page(&["Sida 2"], Some(3)), 1).await;
    mount_page(&server, "3", catalog_page(&["Sida 3"], Some(4)), 0).await;

    let extraction = adapter(&server, 2)
        .extract(
            &stub("Willys", &format!("{}/willys", server.uri()), RetailerKind::Catalog),
            ContentMode::Static,
            &context(&server.uri()),
        )
        .await
        .unwrap();
    assert_eq!(extraction.offers.len(), 2);
}
