use std::sync::atomic::{AtomicU64, Ordering};

// Process-wide counter so interleaved log lines can be correlated.
static LOG_SEQUENCE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub struct LogContext {
    pub component: String,
    pub instance_id: String,
    pub session_id: Option<u64>,
    pub sequence: u64,
}

impl LogContext {
    pub fn new(component: &str, instance_id: &str) -> Self {
        Self {
            component: component.to_string(),
            instance_id: instance_id.to_string(),
            session_id: None,
            sequence: LOG_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn with_session(mut self, session_id: u64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn format(&self, level: &str, message: &str) -> String {
        let session_info = match self.session_id {
            Some(id) => format!(" session={}", id),
            None => String::new(),
        };

        format!(
            "[{}][seq={:06}][{}:{}{}] {}",
            level, self.sequence, self.component, self.instance_id, session_info, message
        )
    }
}

/// Uniform prefixing for component log lines.
pub trait ComponentLogger {
    fn log_context(&self) -> LogContext;

    fn debug(&self, message: &str) {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("{}", self.log_context().format("DEBUG", message));
        }
    }

    fn info(&self, message: &str) {
        log::info!("{}", self.log_context().format("INFO", message));
    }

    fn warn(&self, message: &str) {
        log::warn!("{}", self.log_context().format("WARN", message));
    }

    fn error(&self, message: &str) {
        log::error!("{}", self.log_context().format("ERROR", message));
    }
}
