//! Shared constants used across the application.

/// User agent string sent with every forum request.
///
/// The forum serves its private JSON API to browser-like clients only.
pub const SCRAPER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Cookie carrying the forum session identifier.
pub const SESSION_ID_COOKIE: &str = "huSessID";

/// Cookie carrying the browser-version token the forum pairs with the session.
pub const BROWSER_VERSION_COOKIE: &str = "huBv";

/// Default forum base URL.
pub const DEFAULT_BASE_URL: &str = "https://healthunlocked.com";

/// Placeholder username the forum shows for deleted or hidden accounts.
pub const HIDDEN_USERNAME: &str = "Hidden";
