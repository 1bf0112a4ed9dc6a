//! Request routing between plugins and the host

use std::sync::{Mutex, Weak};

use jackplug_plugin_api::RequestBroker;

use crate::manager::ManagerState;

/// Routes addressed requests over the manager state.
///
/// Holds only a weak handle, so outstanding proxies cannot keep a dropped
/// manager alive; sends after the manager is gone answer 0. The receiver is
/// resolved under the state lock and dispatched outside it, so a request
/// handler is free to route further requests (including back to the
/// sender).
pub(crate) struct Router {
    state: Weak<Mutex<ManagerState>>,
}

impl Router {
    pub fn new(state: Weak<Mutex<ManagerState>>) -> Self {
        Self { state }
    }
}

impl RequestBroker for Router {
    fn handle(&self, sender: &str, receiver: Option<&str>, code: u16, data: &mut [u8]) -> u16 {
        let Some(state) = self.state.upgrade() else {
            return 0;
        };
        tracing::trace!(%sender, receiver = ?receiver, code, "routing request");

        match receiver {
            Some(name) => {
                let instance = {
                    let state = state.lock().unwrap();
                    state
                        .registry
                        .get(name)
                        .filter(|record| record.is_live())
                        .and_then(|record| record.instance().cloned())
                };
                match instance {
                    Some(instance) => instance.handle_request(sender, code, data),
                    None => 0,
                }
            }
            None => {
                let handler = {
                    let state = state.lock().unwrap();
                    state.host_handler.clone()
                };
                match handler {
                    Some(handler) => handler(sender, code, data),
                    None => 0,
                }
            }
        }
    }
}
