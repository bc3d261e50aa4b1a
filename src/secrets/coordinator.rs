//! Per-node cache of resolved cluster singletons.

use arc_swap::ArcSwapOption;
use std::sync::Arc;

use crate::secrets::{
    ensure_singleton, AsymmetricSigningKey, PostActionCookieSecret, SecretResult, TelemetryId,
};
use crate::storage::SystemStore;

/// Resolves and caches the secrets every node must agree on.
pub struct SecretCoordinator {
    store: Arc<dyn SystemStore>,
    cookie_secret: ArcSwapOption<PostActionCookieSecret>,
    signing_key: ArcSwapOption<AsymmetricSigningKey>,
    telemetry_id: ArcSwapOption<TelemetryId>,
}

impl SecretCoordinator {
    pub fn new(store: Arc<dyn SystemStore>) -> Self {
        Self {
            store,
            cookie_secret: ArcSwapOption::empty(),
            signing_key: ArcSwapOption::empty(),
            telemetry_id: ArcSwapOption::empty(),
        }
    }

    /// Make sure the cookie secret exists and return it.
    pub async fn ensure_post_action_cookie_secret(
        &self,
    ) -> SecretResult<Arc<PostActionCookieSecret>> {
        ensure_singleton(self.store.as_ref(), &self.cookie_secret).await
    }

    /// Make sure the signing key exists and return it.
    pub async fn ensure_asymmetric_signing_key(&self) -> SecretResult<Arc<AsymmetricSigningKey>> {
        ensure_singleton(self.store.as_ref(), &self.signing_key).await
    }

    pub async fn ensure_telemetry_id(&self) -> SecretResult<Arc<TelemetryId>> {
        ensure_singleton(self.store.as_ref(), &self.telemetry_id).await
    }

    /// The cookie secret, if it has been resolved.
    pub fn post_action_cookie_secret(&self) -> Option<Arc<PostActionCookieSecret>> {
        self.cookie_secret.load_full()
    }

    /// The signing key, if it has been resolved.
    pub fn asymmetric_signing_key(&self) -> Option<Arc<AsymmetricSigningKey>> {
        self.signing_key.load_full()
    }

    pub fn telemetry_id(&self) -> Option<Arc<TelemetryId>> {
        self.telemetry_id.load_full()
    }
}
