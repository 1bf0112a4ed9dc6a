//! RequestProxy - the plugin's send channel back to the host

use std::sync::Arc;

/// Host-side dispatch for addressed requests.
///
/// Implemented by the manager; plugins only ever see [`RequestProxy`].
pub trait RequestBroker: Send + Sync {
    /// Deliver a request. A `receiver` of `None` addresses the host.
    /// Returns the receiver's answer, or 0 when the request could not be
    /// delivered.
    fn handle(&self, sender: &str, receiver: Option<&str>, code: u16, data: &mut [u8]) -> u16;
}

/// The send channel passed to every plugin factory.
///
/// Cheap to clone; clones share the underlying broker. The proxy stays
/// valid for the life of the plugin, but sends answer 0 once the manager
/// that issued it is gone.
#[derive(Clone)]
pub struct RequestProxy {
    broker: Arc<dyn RequestBroker>,
}

impl RequestProxy {
    /// Wrap a broker. Called by the host when constructing plugins.
    pub fn new(broker: Arc<dyn RequestBroker>) -> Self {
        Self { broker }
    }

    /// A proxy wired to nothing: every send answers 0.
    ///
    /// Useful in plugin unit tests, where no host is running.
    pub fn disconnected() -> Self {
        struct Disconnected;

        impl RequestBroker for Disconnected {
            fn handle(
                &self,
                _sender: &str,
                _receiver: Option<&str>,
                _code: u16,
                _data: &mut [u8],
            ) -> u16 {
                0
            }
        }

        Self::new(Arc::new(Disconnected))
    }

    /// Send `code` and `data` to `receiver`; `None` addresses the host.
    /// `sender` should be the sending plugin's own name.
    pub fn send(&self, sender: &str, receiver: Option<&str>, code: u16, data: &mut [u8]) -> u16 {
        self.broker.handle(sender, receiver, code, data)
    }
}
