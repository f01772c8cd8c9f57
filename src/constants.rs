//! Application constants for pixfetch
//!
//! Constants are grouped by functional domain, mirroring where they are
//! consumed: HTTP client tuning, worker pool sizing, and cache layout.

use std::time::Duration;

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all image requests
    pub const USER_AGENT: &str = "pixfetch/0.1.0 (feed image pipeline)";

    /// Default HTTP request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 25;
}

/// Worker pool sizing
pub mod pools {
    /// Maximum concurrent network downloads
    pub const MAX_CONCURRENT_FETCHES: usize = 6;

    /// Maximum concurrent decode/resize operations
    ///
    /// Separate from the download pool so a burst of decodes cannot starve
    /// network throughput.
    pub const MAX_CONCURRENT_RENDERS: usize = 6;
}

/// Disk cache layout and persistence
pub mod cache {
    /// Directory name under the OS cache area
    pub const CACHE_DIR_NAME: &str = "pixfetch";

    /// File name of the serialized index blob
    pub const INDEX_FILE_NAME: &str = "image-index.json";

    /// Suffix appended to raw image files on disk
    pub const IMAGE_FILE_SUFFIX: &str = ".imagedata";

    /// Suffix for temporary files during atomic writes
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Index insertions between flushes of the index blob to disk
    pub const SAVES_BETWEEN_INDEX_FLUSHES: usize = 20;
}

/// Memory cache sizing
pub mod memory {
    /// Default number of decoded bitmaps held in memory
    pub const DEFAULT_CAPACITY: usize = 128;
}
