mod helpers;

use helpers::{HISTORY_PATH, TestSite, history_body, wishlist_page};
use pricewatch::Error;
use pricewatch::model::{EntityKind, Location, TrackedEntity};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

fn product(id: u64) -> TrackedEntity {
    TrackedEntity {
        id,
        kind: EntityKind::Product,
        canonical_path: format!("thing-a{id}.html"),
        display_name: String::new(),
    }
}

fn wishlist(id: u64) -> TrackedEntity {
    TrackedEntity {
        id,
        kind: EntityKind::Wishlist,
        canonical_path: format!("?cat=WL-{id}"),
        display_name: String::new(),
    }
}

#[tokio::test]
async fn product_history_is_requested_alone() {
    let t = TestSite::start(1).await;
    Mock::given(method("POST"))
        .and(path(HISTORY_PATH))
        .and(body_json(serde_json::json!({
            "id": [2378831], "itemcount": [1], "params": { "days": 9999, "loc": "at" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body(&[
            (1700000000000, 19.99, 1),
            (1700086400000, 0.0, 0),
        ])))
        .expect(1)
        .mount(&t.server)
        .await;

    let client = t.history_client();
    let history = client.get_history(&product(2378831), Location::At).await.unwrap();
    assert_eq!(history.points.len(), 2);
    assert!(history.points[0].valid);
    assert!(!history.points[1].valid);
    assert_eq!(history.meta.current_best, Some(0.0));
    // the gap carries the last valid price
    let prices: Vec<f64> = history.carried_forward(None).into_iter().map(|(_, p)| p).collect();
    assert_eq!(prices, vec![19.99, 19.99]);
}

#[tokio::test]
async fn wishlist_history_is_one_batch() {
    let t = TestSite::start(1).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(wishlist_page(
            "Gaming PC",
            "€ 1.299,00",
            &[(11, 1), (22, 2)],
        )))
        .expect(1)
        .mount(&t.server)
        .await;
    Mock::given(method("POST"))
        .and(path(HISTORY_PATH))
        .and(body_json(serde_json::json!({
            "id": [11, 22], "itemcount": [1, 2], "params": { "days": 9999, "loc": "de" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body(&[(1700000000000, 1299.0, 1)])))
        .expect(1)
        .mount(&t.server)
        .await;

    let client = t.history_client();
    let history = client.get_history(&wishlist(1156092), Location::De).await.unwrap();
    assert_eq!(history.points[0].price, 1299.0);
}

#[tokio::test]
async fn empty_series_is_no_history_found() {
    let t = TestSite::start(1).await;
    Mock::given(method("POST"))
        .and(path(HISTORY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body(&[])))
        .mount(&t.server)
        .await;

    let client = t.history_client();
    let err = client.get_history(&product(5), Location::De).await.unwrap_err();
    assert!(matches!(err, Error::NoHistoryFound), "{err:?}");
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn empty_wishlist_is_no_history_found() {
    let t = TestSite::start(1).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(wishlist_page("Empty", "€ 0,00", &[])))
        .mount(&t.server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body(&[(1700000000000, 1.0, 1)])))
        .expect(0)
        .mount(&t.server)
        .await;

    let err = t.history_client().get_history(&wishlist(9), Location::De).await.unwrap_err();
    assert!(matches!(err, Error::NoHistoryFound), "{err:?}");
}

#[tokio::test]
async fn fresh_cache_skips_the_network() {
    let t = TestSite::start(1).await;
    Mock::given(method("POST"))
        .and(path(HISTORY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(history_body(&[(1700000000000, 5.0, 1)])))
        .expect(2)
        .mount(&t.server)
        .await;

    let client = t.history_client();
    let first = client.get_history(&product(5), Location::De).await.unwrap();
    let second = client.get_history(&product(5), Location::De).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));

    // a different location is a different series
    client.get_history(&product(5), Location::At).await.unwrap();
    assert_eq!(client.cache().len(), 2);
}
