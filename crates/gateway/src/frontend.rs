//! Static frontend assets served from the configured public directory.
//!
//! Any path not matched by an API route falls through to the directory;
//! `/` resolves to `index.html`.

use std::path::Path;
use tower_http::services::ServeDir;

/// Serve `public_dir` as the router's fallback.
pub fn static_files(public_dir: &Path) -> ServeDir {
    ServeDir::new(public_dir).append_index_html_on_directories(true)
}
