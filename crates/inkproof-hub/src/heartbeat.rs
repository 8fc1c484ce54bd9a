use std::time::Duration;

/// Read deadline for a client connection; refreshed on every inbound frame
/// (including pongs). Taken verbatim from the original websocket client's
/// `pongWait`.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Interval at which the write loop pings an idle connection.
/// `9/10 * PONG_WAIT`, same ratio as the original `pingPeriod`.
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Deadline for a single outbound frame write.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Recommended bound on a client's outbound frame queue.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// Maximum size of an inbound frame before the connection is closed. 64 KiB
/// comfortably covers document-update payloads; chat-only deployments could
/// get by with much less.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;
