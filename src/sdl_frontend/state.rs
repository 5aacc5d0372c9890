use nanoserde::{DeJson, SerJson};

/// Persisted frontend configuration; command line flags override these.
#[derive(Debug, Clone, SerJson, DeJson)]
pub struct AppState {
    pub scale: u32,
    pub uncapped_speed: bool,
    pub color_filter: bool,
}

impl Default for AppState {
    fn default() -> Self {
        AppState {
            scale: 3,
            uncapped_speed: false,
            color_filter: false,
        }
    }
}

/// Bookkeeping for the running emulator session.
#[derive(Debug, Default)]
pub struct AppEmulatorState {
    pub awaiting_audio: bool,
    pub paused: bool,
    pub exiting: bool,
}
