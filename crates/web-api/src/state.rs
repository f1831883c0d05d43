use std::sync::Arc;

use application::{ChatRuntime, ConnectionGateway};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<ChatRuntime>,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    pub fn new(runtime: Arc<ChatRuntime>, jwt_service: Arc<JwtService>) -> Self {
        Self {
            runtime,
            jwt_service,
        }
    }

    pub fn gateway(&self) -> &Arc<ConnectionGateway> {
        self.runtime.gateway()
    }
}
