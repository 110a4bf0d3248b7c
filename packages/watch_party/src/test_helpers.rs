use std::path::Path;

use crate::AppState;
use crate::config::{FileConfig, ServerConfig};

/// Build an `AppState` serving assets from `static_dir` with file logging off.
///
/// Callers keep the backing `TempDir` alive for the duration of the test.
pub fn test_app_state(static_dir: &Path) -> AppState {
    let mut server_config = ServerConfig::from_file(&FileConfig::default());
    server_config.static_dir = static_dir.to_path_buf();
    server_config.log_file = None;
    AppState::new(server_config)
}
