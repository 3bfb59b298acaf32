use crate::config::Config;
use crate::service::TezosService;

pub struct AppState {
    pub config: Config,
    pub service: TezosService,
}
