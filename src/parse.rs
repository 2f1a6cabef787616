use scraper::{Html, Selector};
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::model::{Currency, EntityKind};

static PRODUCT_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.variant__header h1").expect("static selector"));
static PRODUCT_PRICE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div#offer__price-0 span.gh_price").expect("static selector"));
static WISHLIST_NAME: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.wishlist h1.wishlist__headline > span").expect("static selector")
});
static WISHLIST_PRICE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.wishlist_sum_area span.gh_price span.gh_price > span.gh_price")
        .expect("static selector")
});
static WISHLIST_ITEM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.wishlist__item").expect("static selector"));

/// Name and current price read from a listing page.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedEntity {
    pub name: String,
    pub price: f64,
    pub currency: Currency,
}

/// One product line of a wishlist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WishlistItem {
    pub id: u64,
    pub count: u64,
}

/// Reads name and price from a product or wishlist page.
///
/// A missing or unreadable price is an error: zero is a meaningful value in
/// the history series and must never stand in for "not found".
pub fn parse_entity(kind: EntityKind, html: &str) -> Result<ParsedEntity> {
    let doc = Html::parse_document(html);
    let (name_sel, price_sel) = match kind {
        EntityKind::Product => (&*PRODUCT_NAME, &*PRODUCT_PRICE),
        EntityKind::Wishlist => (&*WISHLIST_NAME, &*WISHLIST_PRICE),
    };

    let name = first_text(&doc, name_sel).unwrap_or_default();
    let raw_price = first_text(&doc, price_sel)
        .ok_or_else(|| Error::parse(format!("no price node on {kind} page")))?;
    let (price, currency) = parse_price(&raw_price)?;

    Ok(ParsedEntity {
        name,
        price,
        currency,
    })
}

/// Extracts product ids and quantities from a wishlist page. Items missing
/// either attribute are skipped.
pub fn parse_wishlist_items(html: &str) -> Vec<WishlistItem> {
    let doc = Html::parse_document(html);
    doc.select(&WISHLIST_ITEM)
        .filter_map(|el| {
            let id = el.value().attr("data-id")?.trim().parse().ok()?;
            let count = el.value().attr("data-count")?.trim().parse().ok()?;
            Some(WishlistItem { id, count })
        })
        .collect()
}

/// Parses price text such as `€ 1.299,00`, `£ 12.34` or `PLN 99,90`.
/// The currency comes from the symbol, not from the amount.
pub fn parse_price(raw: &str) -> Result<(f64, Currency)> {
    let currency = if raw.contains('€') {
        Currency::Eur
    } else if raw.contains('£') {
        Currency::Gbp
    } else if raw.contains("PLN") || raw.contains("zł") {
        Currency::Pln
    } else {
        return Err(Error::parse(format!("no currency in price '{raw}'")));
    };

    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if !digits.chars().any(|c| c.is_ascii_digit()) {
        return Err(Error::parse(format!("no amount in price '{raw}'")));
    }

    let normalized = match (digits.rfind(','), digits.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => digits.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => digits.replace(',', ""),
        _ => digits.replace(',', "."),
    };

    let amount = normalized
        .parse::<f64>()
        .map_err(|e| Error::parse(format!("cannot parse price '{raw}': {e}")))?;
    Ok((amount, currency))
}

fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}
