//! Post-logout navigation hook

use tracing::info;

/// Where the session manager sends the user once the session is gone.
///
/// A browser shell performs a full-page redirect; a terminal front end may
/// print a prompt to log in again.
pub trait Navigator: Send + Sync {
    fn redirect(&self, route: &str);
}

/// Navigator that only records the redirect in the log.
#[derive(Debug, Default, Clone)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn redirect(&self, route: &str) {
        info!(route, "Session ended, redirecting to landing route");
    }
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn redirect(&self, route: &str) {
        self(route)
    }
}
