//! Placeholder for a physical QKD device.
//!
//! No device driver is linked in. The stub holds no streams, so every
//! operation falls through to the trait defaults and fails as unsupported,
//! which surfaces as `NoConnection`.

use super::StreamBackend;

/// Hardware backend stub.
#[derive(Debug, Default, Clone)]
pub struct HardwareStreamBackend {
    device: String,
}

impl HardwareStreamBackend {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl StreamBackend for HardwareStreamBackend {
    fn name(&self) -> &'static str {
        "hardware"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::etsi004::{Ksid, Qos, Role, StreamStatus};

    #[tokio::test]
    async fn test_stub_refuses_open_and_get_key() {
        let backend = HardwareStreamBackend::new("/dev/qkd0");
        let err = backend
            .open("a", "b", &Qos::default(), Role::Initiator)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StreamStatus::NoConnection);

        let err = backend
            .get_key(Ksid::from_bytes([1; 16]), 0, None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), StreamStatus::NoConnection);
    }

    #[tokio::test]
    async fn test_stub_refuses_close() {
        let backend = HardwareStreamBackend::new("/dev/qkd0");
        let err = backend.close(Ksid::from_bytes([1; 16])).await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::Unsupported {
                backend: "hardware",
                operation: "close"
            }
        ));
        assert_eq!(err.status(), StreamStatus::NoConnection);
        assert_eq!(backend.device(), "/dev/qkd0");
    }
}
