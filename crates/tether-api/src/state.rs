use std::sync::Arc;

use crate::service::ChatService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub service: ChatService,
    pub jwt_secret: String,
}

impl AppStateInner {
    pub fn new(service: ChatService, jwt_secret: impl Into<String>) -> AppState {
        Arc::new(Self {
            service,
            jwt_secret: jwt_secret.into(),
        })
    }
}
