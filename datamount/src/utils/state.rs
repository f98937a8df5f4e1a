use std::sync::Arc;

use crate::config::Config;
use crate::error::AppError;
use crate::mount::MountService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MountService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, AppError> {
        let config = Arc::new(config);
        Ok(AppState {
            service: Arc::new(MountService::new(config.clone())?),
            config,
        })
    }
}
