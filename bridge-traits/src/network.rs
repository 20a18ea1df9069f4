//! Connectivity, as far as upload gating needs it.
//!
//! Android answers from `ConnectivityManager`; desktop probes a host.

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Cellular,
    WiFi,
    Ethernet,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    /// The probe gave no answer either way.
    Indeterminate,
}

#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub status: NetworkStatus,
    pub network_type: Option<NetworkType>,
    /// Billed per byte, or flagged metered by the user.
    pub is_metered: bool,
}

impl NetworkInfo {
    pub fn offline() -> Self {
        Self {
            status: NetworkStatus::Disconnected,
            network_type: None,
            is_metered: false,
        }
    }

    /// Uploads marked unmetered-only wait for Wi-Fi or ethernet.
    pub fn permits_upload(&self, unmetered_only: bool) -> bool {
        self.status == NetworkStatus::Connected && !(unmetered_only && self.is_metered)
    }
}

#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    async fn get_network_info(&self) -> Result<NetworkInfo>;

    async fn is_connected(&self) -> bool {
        self.get_network_info()
            .await
            .map(|info| info.status == NetworkStatus::Connected)
            .unwrap_or(false)
    }

    async fn is_metered(&self) -> bool {
        self.get_network_info()
            .await
            .map(|info| info.is_metered)
            .unwrap_or(false)
    }

    /// A monitor that cannot answer blocks uploads.
    async fn allows_upload(&self, unmetered_only: bool) -> bool {
        self.get_network_info()
            .await
            .map(|info| info.permits_upload(unmetered_only))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    fn cellular() -> NetworkInfo {
        NetworkInfo {
            status: NetworkStatus::Connected,
            network_type: Some(NetworkType::Cellular),
            is_metered: true,
        }
    }

    #[test]
    fn test_permits_upload() {
        assert!(cellular().permits_upload(false));
        assert!(!cellular().permits_upload(true));
        assert!(!NetworkInfo::offline().permits_upload(false));
    }

    struct Fixed(Option<NetworkInfo>);

    #[async_trait]
    impl NetworkMonitor for Fixed {
        async fn get_network_info(&self) -> Result<NetworkInfo> {
            self.0
                .clone()
                .ok_or_else(|| BridgeError::NotAvailable("connectivity".into()))
        }
    }

    #[core_async::test]
    async fn test_monitor_defaults() {
        let metered = Fixed(Some(cellular()));
        assert!(metered.is_connected().await);
        assert!(metered.is_metered().await);
        assert!(!metered.allows_upload(true).await);

        let broken = Fixed(None);
        assert!(!broken.is_connected().await);
        assert!(!broken.allows_upload(false).await);
    }
}
