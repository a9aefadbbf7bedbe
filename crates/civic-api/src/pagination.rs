//! Pagination link helpers.

use reqwest::Url;

/// Base used to parse relative pagination links.
const RELATIVE_BASE: &str = "http://localhost/";

/// Read the `page[number]` parameter of a pagination link.
///
/// Links may be absolute or relative to the API root, and the brackets may
/// be percent-encoded.
pub fn page_number_from_url(link: &str) -> Option<u32> {
    let url = Url::parse(link)
        .or_else(|_| Url::parse(RELATIVE_BASE).and_then(|base| base.join(link)))
        .ok()?;

    url.query_pairs()
        .find(|(key, _)| key == "page[number]")
        .and_then(|(_, value)| value.parse().ok())
}
