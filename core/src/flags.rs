use std::time::Duration;

use env_flags::env_flags;

env_flags! {
    /// Program invoked as the external assistant. Must accept the prompt
    /// on stdin and write its result to stdout.
    pub HUDDLE_ASSISTANT: &str = "claude";

    /// Wall-clock budget for one assistant invocation.
    pub HUDDLE_EXEC_TIMEOUT_MS: Duration = Duration::from_millis(180_000), |value| {
        value.parse().map(Duration::from_millis)
    };
}
