//! Device context resolution with local fallback.
//!
//! Decides, per session attempt, whether the hardware session targets the
//! local camera or a remote peripheral's camera. Remote resolution can fail;
//! the session then falls back to local, and the fallback is observable in
//! the diagnostic event (the attempt reports `local`, not an error).

use std::sync::Arc;

use super::errors::SessionError;
use super::provider::{CaptureProvider, DeviceContextProvider, ProviderAvailability};
use super::types::{DeviceContext, DeviceMode};

/// A successfully resolved device context.
pub struct ResolvedContext {
    /// The context actually obtained (may be `Local` after a remote fallback).
    pub context: DeviceContext,
    /// Provider handle, cached by the session across rebinds.
    pub provider: Arc<dyn CaptureProvider>,
}

impl std::fmt::Debug for ResolvedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedContext")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Resolves the provider handle for one bind attempt.
#[derive(Clone)]
pub struct DeviceContextResolver {
    local: Arc<dyn DeviceContextProvider>,
    remote: Option<Arc<dyn DeviceContextProvider>>,
}

impl DeviceContextResolver {
    /// Build a resolver over a local provider and an optional remote one.
    pub fn new(
        local: Arc<dyn DeviceContextProvider>,
        remote: Option<Arc<dyn DeviceContextProvider>>,
    ) -> Self {
        Self { local, remote }
    }

    /// Resolve a provider for the requested mode.
    ///
    /// Remote mode tries the remote provider first and falls back to local on
    /// any failure. `DeviceUnavailable` only when local fails too.
    pub async fn resolve(&self, mode: DeviceMode) -> Result<ResolvedContext, SessionError> {
        if mode == DeviceMode::Remote {
            match &self.remote {
                Some(remote) => match remote.resolve().await {
                    Ok(ProviderAvailability::Available(provider)) => {
                        return Ok(ResolvedContext {
                            context: remote.context(),
                            provider,
                        });
                    }
                    Ok(ProviderAvailability::Unavailable(reason)) => {
                        log::warn!(
                            "remote context {} unavailable ({}), falling back to local",
                            remote.context(),
                            reason
                        );
                    }
                    Err(_) => {
                        log::warn!("remote resolver dropped its reply, falling back to local");
                    }
                },
                None => {
                    log::warn!("remote mode requested but no remote provider configured, falling back to local");
                }
            }
        }

        match self.local.resolve().await {
            Ok(ProviderAvailability::Available(provider)) => Ok(ResolvedContext {
                context: self.local.context(),
                provider,
            }),
            Ok(ProviderAvailability::Unavailable(reason)) => {
                Err(SessionError::DeviceUnavailable(reason))
            }
            Err(_) => Err(SessionError::DeviceUnavailable(
                "local resolver dropped its reply".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::simulated::{SimulatedCaptureProvider, SimulatedDeviceProvider};

    #[test]
    fn test_resolved_context_debug_omits_provider() {
        let resolved = ResolvedContext {
            context: DeviceContext::Local,
            provider: Arc::new(SimulatedCaptureProvider::new()),
        };
        assert_eq!(
            format!("{:?}", resolved),
            "ResolvedContext { context: Local, .. }"
        );
    }

    #[tokio::test]
    async fn test_local_mode_resolves_local() {
        let resolver =
            DeviceContextResolver::new(Arc::new(SimulatedDeviceProvider::local()), None);
        let resolved = resolver.resolve(DeviceMode::Local).await.unwrap();
        assert_eq!(resolved.context, DeviceContext::Local);
    }

    #[tokio::test]
    async fn test_remote_mode_resolves_remote() {
        let resolver = DeviceContextResolver::new(
            Arc::new(SimulatedDeviceProvider::local()),
            Some(Arc::new(SimulatedDeviceProvider::remote("watch-1"))),
        );
        let resolved = resolver.resolve(DeviceMode::Remote).await.unwrap();
        assert_eq!(resolved.context, DeviceContext::Remote("watch-1".to_string()));
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local() {
        let resolver = DeviceContextResolver::new(
            Arc::new(SimulatedDeviceProvider::local()),
            Some(Arc::new(
                SimulatedDeviceProvider::remote("watch-1").unavailable("peripheral unpaired"),
            )),
        );
        let resolved = resolver.resolve(DeviceMode::Remote).await.unwrap();
        assert_eq!(resolved.context, DeviceContext::Local);
    }

    #[tokio::test]
    async fn test_remote_mode_without_remote_provider_falls_back() {
        let resolver =
            DeviceContextResolver::new(Arc::new(SimulatedDeviceProvider::local()), None);
        let resolved = resolver.resolve(DeviceMode::Remote).await.unwrap();
        assert_eq!(resolved.context, DeviceContext::Local);
    }

    #[tokio::test]
    async fn test_both_contexts_unavailable() {
        let resolver = DeviceContextResolver::new(
            Arc::new(SimulatedDeviceProvider::local().unavailable("no camera")),
            Some(Arc::new(
                SimulatedDeviceProvider::remote("watch-1").unavailable("unpaired"),
            )),
        );
        let err = resolver.resolve(DeviceMode::Remote).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::DeviceUnavailable("no camera".to_string())
        );
    }
}
