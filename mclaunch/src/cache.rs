//! A small time-windowed cache for manifest-style HTTP GET requests.
//!
//! This sits above [`crate::http`] and is meant for small JSON documents that are
//! fetched repeatedly during a single run (the Mojang version manifest, in particular)
//! where re-downloading on every call would be wasteful but a full on-disk cache (as
//! [`crate::download`] has for large assets) would be overkill. Entries are kept for one
//! hour and only successful responses are cached; this is a best-effort accelerator, not
//! a singleflight, concurrent lookups for the same URL may both race and re-fetch.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Duration a cached response is considered fresh.
const FRESH_WINDOW: Duration = Duration::from_secs(60 * 60);

struct Entry {
    body: Vec<u8>,
    fetched_at: Instant,
}

static CACHE: Lazy<Mutex<HashMap<Box<str>, Entry>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Fetch the body of `url`, returning a cached copy if one was stored less than an hour
/// ago. Only successful (2xx) responses are cached; a failing request is never cached
/// and always re-fetched on the next call.
pub fn get_or_fetch(client: &reqwest::Client, url: &str) -> reqwest::Result<Vec<u8>> {

    if let Some(entry) = CACHE.lock().unwrap().get(url) {
        if entry.fetched_at.elapsed() < FRESH_WINDOW {
            return Ok(entry.body.clone());
        }
    }

    let client = client.clone();
    let url_owned = url.to_string();
    let body = crate::rt::sync(async move {
        let res = client.get(&url_owned).send().await?;
        let res = res.error_for_status()?;
        res.bytes().await
    })?.to_vec();

    CACHE.lock().unwrap().insert(url.into(), Entry {
        body: body.clone(),
        fetched_at: Instant::now(),
    });

    Ok(body)

}

/// Clear all cached entries, regardless of freshness. Mainly useful for tests.
#[cfg(test)]
pub fn clear() {
    CACHE.lock().unwrap().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_successful_response_until_window_elapses() {
        clear();

        let mut server = mockito::Server::new();
        let mock = server.mock("GET", "/manifest.json")
            .with_status(200)
            .with_body("{\"ok\":true}")
            .expect(1)
            .create();

        let client = reqwest::Client::new();
        let url = format!("{}/manifest.json", server.url());

        let first = get_or_fetch(&client, &url).unwrap();
        let second = get_or_fetch(&client, &url).unwrap();

        assert_eq!(first, second);
        mock.assert();
    }

    #[test]
    fn does_not_cache_failed_response() {
        clear();

        let mut server = mockito::Server::new();
        let mock = server.mock("GET", "/missing.json")
            .with_status(404)
            .expect(2)
            .create();

        let client = reqwest::Client::new();
        let url = format!("{}/missing.json", server.url());

        assert!(get_or_fetch(&client, &url).is_err());
        assert!(get_or_fetch(&client, &url).is_err());
        mock.assert();
    }
}
