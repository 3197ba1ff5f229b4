use crate::cli::Args;
use crate::store::Store;
use std::sync::Arc;

/// Tunables of the derived-state and certificate rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub streak_window_days: u32,
    pub default_certificate_threshold: u32,
    pub attention_after_days: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            streak_window_days: 30,
            default_certificate_threshold: 5,
            attention_after_days: 7,
        }
    }
}

impl From<&Args> for EngineSettings {
    fn from(args: &Args) -> Self {
        EngineSettings {
            streak_window_days: args.streak_window_days,
            default_certificate_threshold: args.default_certificate_threshold,
            attention_after_days: args.attention_after_days,
        }
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub settings: Arc<EngineSettings>,
}

impl AppState {
    pub fn new(store: Store, settings: EngineSettings) -> Self {
        AppState {
            store,
            settings: Arc::new(settings),
        }
    }
}
