//! Application state shared across all route handlers

use std::sync::Arc;

use crate::config::Config;
use crate::conversation::ConversationEngine;
use crate::lifecycle::ConnectionLifecycleManager;
use crate::store::RecordStore;
use crate::transport::{HttpBridgeTransport, TransportAdapter};
use crate::websocket::WebSocketState;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RecordStore>,
    pub lifecycle: ConnectionLifecycleManager,
    pub engine: Arc<ConversationEngine>,
    pub transport: Arc<dyn TransportAdapter>,
    /// Set when the gateway drives an HTTP chat bridge; receives its webhook
    pub bridge: Option<Arc<HttpBridgeTransport>>,
    pub ws: WebSocketState,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        lifecycle: ConnectionLifecycleManager,
        engine: Arc<ConversationEngine>,
        transport: Arc<dyn TransportAdapter>,
        bridge: Option<Arc<HttpBridgeTransport>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            lifecycle,
            engine,
            transport,
            bridge,
            ws: WebSocketState::new(),
        }
    }
}
