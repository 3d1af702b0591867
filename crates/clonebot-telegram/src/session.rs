//! Per-user chat state.

use clonebot_core::Instance;

/// What the bot remembers about one user between messages.
#[derive(Debug, Default)]
pub struct UserSession {
    /// Whether the next text message is the content of creds.json.
    pub awaiting_creds: bool,
    /// The user's running application, if any.
    pub instance: Option<Instance>,
}

impl UserSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for creds.json on the next message.
    pub fn expect_creds(&mut self) {
        self.awaiting_creds = true;
    }

    /// Stop treating text as creds.json.
    pub fn clear_awaiting(&mut self) {
        self.awaiting_creds = false;
    }

    /// The running instance. Exited instances are dropped.
    pub fn running_instance(&mut self) -> Option<&Instance> {
        let running = self.instance.as_mut().map(Instance::is_running).unwrap_or(false);
        if !running {
            self.instance = None;
        }
        self.instance.as_ref()
    }

    /// PID of the running instance.
    pub fn running_pid(&mut self) -> Option<u32> {
        self.running_instance().and_then(Instance::pid)
    }

    /// Whether anything worth keeping is left in this session.
    pub fn is_empty(&self) -> bool {
        !self.awaiting_creds && self.instance.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session() {
        let session = UserSession::new();
        assert!(!session.awaiting_creds);
        assert!(session.instance.is_none());
        assert!(session.is_empty());
    }

    #[test]
    fn test_awaiting_flag() {
        let mut session = UserSession::new();
        session.expect_creds();
        assert!(session.awaiting_creds);
        assert!(!session.is_empty());

        session.clear_awaiting();
        assert!(!session.awaiting_creds);
    }

    #[test]
    fn test_running_pid_without_instance() {
        let mut session = UserSession::new();
        assert_eq!(session.running_pid(), None);
    }
}
