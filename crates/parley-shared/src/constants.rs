/// Protocol version advertised by the realtime gateway
pub const PROTOCOL_VERSION: &str = "/parley/1.0.0";

/// Application name
pub const APP_NAME: &str = "Parley";

/// How long a typing indicator stays lit on the receiving side without a refresh
pub const TYPING_TIMEOUT_SECS: u64 = 3;

/// Maximum attachment size in bytes (10 MiB)
pub const MAX_ATTACHMENT_SIZE: usize = 10 * 1024 * 1024;

/// Outbound events buffered per connection before new ones are dropped
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Deadline for a single persistence call in milliseconds
pub const DEFAULT_DB_TIMEOUT_MS: u64 = 5_000;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Header carrying the caller identity set by the upstream session gateway
pub const CALLER_ID_HEADER: &str = "x-user-id";
