use super::Container;
use crate::poll::Diagnostics;
use async_trait::async_trait;
use log::{error, warn};

/// The number of log lines requested from the engine before trimming to the byte budget.
const DIAGNOSTIC_LOG_LINES: usize = 500;

#[async_trait]
impl Diagnostics for Container {
    async fn log_diagnostics(&self, reason: &str) {
        error!("Container '{}' diagnostics: {}", self.label(), reason);
        let id = match self.id() {
            Some(id) => id,
            None => {
                warn!("Container '{}' has no id, nothing to inspect", self.label());
                return;
            }
        };

        match self.engine().inspect(&id).await {
            Ok(details) => {
                let state = details.state;
                error!(
                    "Container '{}' state: status '{}', exit code {}, error '{}', started at '{}', finished at '{}'",
                    self.label(),
                    state.status,
                    state.exit_code,
                    state.error,
                    state.started_at,
                    state.finished_at
                );
            }
            Err(e) => warn!("Unable to inspect container '{}': {}", id, e),
        }

        match self.engine().logs(&id, Some(DIAGNOSTIC_LOG_LINES)).await {
            Ok(logs) => error!(
                "Container '{}' logs (last {} bytes):\n{}",
                self.label(),
                self.diagnostic_log_bytes(),
                tail_bytes(&logs, self.diagnostic_log_bytes())
            ),
            Err(e) => warn!("Unable to get logs of container '{}': {}", id, e),
        }
    }
}

/// The last `max` bytes of `text`, moved forward to the next character boundary.
pub(crate) fn tail_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
