use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use super::Permission;

/// Permission and connectivity state supplied by the host platform.
#[async_trait]
pub trait Platform: Send + Sync {
    fn has_permission(&self, permission: Permission) -> bool;

    async fn is_network_available(&self) -> bool;
}

/// Desktop host: permissions are implicit, connectivity is checked with a DNS
/// lookup.
#[derive(Debug, Clone)]
pub struct DesktopPlatform {
    granted: HashSet<Permission>,
    check_host: String,
    check_timeout: Duration,
}

impl Default for DesktopPlatform {
    fn default() -> Self {
        Self {
            granted: [
                Permission::AccessCoarseLocation,
                Permission::AccessFineLocation,
                Permission::AccessBackgroundLocation,
            ]
            .into_iter()
            .collect(),
            check_host: "one.one.one.one:443".to_string(),
            check_timeout: Duration::from_secs(2),
        }
    }
}

impl DesktopPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the granted permissions.
    pub fn with_permissions(mut self, granted: impl IntoIterator<Item = Permission>) -> Self {
        self.granted = granted.into_iter().collect();
        self
    }

    /// `host:port` resolved to decide whether the network is up.
    pub fn with_check_host(mut self, host: impl Into<String>) -> Self {
        self.check_host = host.into();
        self
    }
}

#[async_trait]
impl Platform for DesktopPlatform {
    fn has_permission(&self, permission: Permission) -> bool {
        self.granted.contains(&permission)
    }

    async fn is_network_available(&self) -> bool {
        let lookup = tokio::net::lookup_host(self.check_host.as_str());
        match tokio::time::timeout(self.check_timeout, lookup).await {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            Ok(Err(e)) => {
                tracing::debug!("Connectivity check failed: {}", e);
                false
            }
            Err(_) => {
                tracing::debug!("Connectivity check timed out");
                false
            }
        }
    }
}
