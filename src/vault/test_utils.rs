//! Helpers for unit tests that run against a wiremock server.

use crate::vault::auth_provider::StaticTokenProvider;
use crate::vault::core::VaultCore;
use std::sync::Arc;
use wiremock::MockServer;

pub(crate) use crate::init_logging;

/// Token used by every mocked session.
pub const TEST_TOKEN: &str = "root";

/// Builds a session pointing at `server`, authenticated with [`TEST_TOKEN`].
pub async fn core_for(server: &MockServer) -> Arc<VaultCore> {
    let core = VaultCore::builder(server.uri())
        .with_auth_provider(Arc::new(StaticTokenProvider::new(TEST_TOKEN)))
        .build()
        .await
        .expect("failed to build test session");
    Arc::new(core)
}

/// Returns the number of requests `server` received for `method` and `path`.
pub async fn request_count(server: &MockServer, method: &str, path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.method.as_str() == method && request.url.path() == path)
        .count()
}
