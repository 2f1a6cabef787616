use url::Url;

use crate::error::{Error, Result};
use crate::model::{EntityKind, EntityKey, Location, TrackedEntity};

/// Query parameter the site uses to pick the price region.
const LOCALE_PARAM: &str = "hloc";
const WISHLIST_CAT_PREFIX: &str = "WL-";

/// A classified listing URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: u64,
    /// Taken from the domain, never from query parameters.
    pub location: Location,
    /// First allowed `hloc` value, if any.
    pub hloc: Option<Location>,
    pub canonical_path: String,
}

impl EntityRef {
    pub fn key(&self) -> EntityKey {
        EntityKey {
            kind: self.kind,
            id: self.id,
        }
    }

    pub fn canonical_url(&self) -> String {
        format!("https://{}/{}", self.location.domain(), self.canonical_path)
    }

    /// Entity with an empty display name; the first fetch fills it in.
    pub fn to_entity(&self) -> TrackedEntity {
        TrackedEntity {
            id: self.id,
            kind: self.kind,
            canonical_path: self.canonical_path.clone(),
            display_name: String::new(),
        }
    }
}

/// Classifies a raw listing URL.
///
/// Accepted shapes:
/// - product: `<scheme>://<domain>/<slug>-a<digits>.html[?params]`
/// - wishlist: `<scheme>://<domain>/?cat=WL-<digits>` or `<scheme>://<domain>/wishlists/<digits>`
///
/// The scheme may be omitted and a leading `www.` is ignored.
pub fn parse_listing_url(raw: &str) -> Result<EntityRef> {
    let trimmed = raw.trim();
    let invalid = || Error::InvalidUrl(trimmed.to_string());

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&with_scheme).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }

    let host = url.host_str().ok_or_else(invalid)?;
    let location = Location::from_domain(host).ok_or_else(invalid)?;

    let (kind, id, canonical_path) = match_product(&url)
        .or_else(|| match_wishlist(&url))
        .ok_or_else(invalid)?;

    let hloc = url
        .query_pairs()
        .filter(|(k, _)| k == LOCALE_PARAM)
        .find_map(|(_, v)| v.parse::<Location>().ok());

    Ok(EntityRef {
        kind,
        id,
        location,
        hloc,
        canonical_path,
    })
}

fn match_product(url: &Url) -> Option<(EntityKind, u64, String)> {
    let segment = url.path().strip_prefix('/')?;
    if segment.is_empty() || segment.contains('/') {
        return None;
    }
    let stem = segment.strip_suffix(".html")?;

    let digits_len = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .count();
    if digits_len == 0 {
        return None;
    }
    let (slug, digits) = stem.split_at(stem.len() - digits_len);
    let slug = slug.strip_suffix('a')?;
    if !slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return None;
    }

    let id = digits.parse().ok()?;
    Some((EntityKind::Product, id, segment.to_string()))
}

fn match_wishlist(url: &Url) -> Option<(EntityKind, u64, String)> {
    let path = url.path();

    if path == "/" {
        let cat = url
            .query_pairs()
            .find(|(k, _)| k == "cat")
            .map(|(_, v)| v.into_owned())?;
        let id = parse_digits(cat.strip_prefix(WISHLIST_CAT_PREFIX)?)?;
        return Some((EntityKind::Wishlist, id, format!("?cat={WISHLIST_CAT_PREFIX}{id}")));
    }

    let rest = path.strip_prefix("/wishlists/")?;
    let id = parse_digits(rest.trim_end_matches('/'))?;
    Some((EntityKind::Wishlist, id, format!("wishlists/{id}")))
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wishlist_query_shape() {
        let r = parse_listing_url("https://geizhals.de/?cat=WL-1156092&a=1").unwrap();
        assert_eq!(r.kind, EntityKind::Wishlist);
        assert_eq!(r.id, 1156092);
        assert_eq!(r.location, Location::De);
        assert_eq!(r.canonical_path, "?cat=WL-1156092");
        assert_eq!(r.canonical_url(), "https://geizhals.de/?cat=WL-1156092");
    }

    #[test]
    fn wishlist_path_shape() {
        let r = parse_listing_url("https://geizhals.de/wishlists/2564724").unwrap();
        assert_eq!(r.kind, EntityKind::Wishlist);
        assert_eq!(r.id, 2564724);
        assert_eq!(r.canonical_path, "wishlists/2564724");
    }

    #[test]
    fn wishlist_on_other_sites() {
        let at = parse_listing_url("https://geizhals.at/?cat=WL-1156092").unwrap();
        assert_eq!(at.location, Location::At);
        let uk = parse_listing_url("https://skinflint.co.uk/?cat=WL-1156092").unwrap();
        assert_eq!(uk.location, Location::Uk);
        assert_eq!(uk.canonical_url(), "https://skinflint.co.uk/?cat=WL-1156092");
    }

    #[test]
    fn product_strips_locale_params() {
        let plain = parse_listing_url("https://geizhals.de/jabra-elite-85t-a2378831.html").unwrap();
        for raw in [
            "https://geizhals.de/jabra-elite-85t-a2378831.html?hloc=pl",
            "https://geizhals.de/jabra-elite-85t-a2378831.html?hloc=pl&hloc=de",
            "https://geizhals.de/jabra-elite-85t-a2378831.html?hloc=pl&hloc=de&hloc=at&hloc=uk",
            "https://geizhals.de/jabra-elite-85t-a2378831.html?hloc=fr",
            "https://geizhals.de/jabra-elite-85t-a2378831.html?fsean=123&v=e#offers",
        ] {
            let r = parse_listing_url(raw).unwrap();
            assert_eq!(r.canonical_path, plain.canonical_path, "{raw}");
            assert_eq!(r.canonical_path, "jabra-elite-85t-a2378831.html");
            assert_eq!(r.id, 2378831);
            assert_eq!(r.kind, EntityKind::Product);
            assert_eq!(r.location, Location::De);
        }
    }

    #[test]
    fn first_allowed_hloc_wins() {
        let r = parse_listing_url("https://geizhals.de/x-a1.html?hloc=fr&hloc=pl&hloc=at").unwrap();
        assert_eq!(r.hloc, Some(Location::Pl));
        let none = parse_listing_url("https://geizhals.de/x-a1.html").unwrap();
        assert_eq!(none.hloc, None);
    }

    #[test]
    fn scheme_and_www_are_optional() {
        let r = parse_listing_url("www.cenowarka.pl/foo-bar-a42.html").unwrap();
        assert_eq!(r.location, Location::Pl);
        assert_eq!(r.id, 42);
    }

    #[test]
    fn rejects_unknown_domains_and_shapes() {
        for raw in [
            "https://geizhals.fr/jabra-elite-85t-a2378831.html?hloc=fr",
            "https://example.com/jabra-elite-85t-a2378831.html",
            "https://geizhals.de/jabra-elite-85t.html",
            "https://geizhals.de/?cat=hvent",
            "https://geizhals.de/wishlists/abc",
            "https://geizhals.de/",
            "ftp://geizhals.de/x-a1.html",
            "",
        ] {
            let err = parse_listing_url(raw).unwrap_err();
            assert!(matches!(err, Error::InvalidUrl(_)), "{raw}");
        }
    }
}
