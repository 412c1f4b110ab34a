use serde::{Deserialize, Serialize};

/// SSE streaming behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Interval between `: ping` keep-alive comments.
    #[serde(default = "d_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Maximum number of events replayed on reconnect. Older missed events
    /// are dropped and the client is told how many.
    #[serde(default = "d_replay_limit")]
    pub replay_limit: usize,
    /// Live events queued per connection. A client that falls further
    /// behind loses the overflow and receives a `warning` frame.
    #[serde(default = "d_buffer")]
    pub buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: d_keep_alive_secs(),
            replay_limit: d_replay_limit(),
            buffer: d_buffer(),
        }
    }
}

fn d_keep_alive_secs() -> u64 {
    30
}

fn d_replay_limit() -> usize {
    1000
}

fn d_buffer() -> usize {
    256
}
