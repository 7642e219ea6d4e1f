//! Connection options and crate-wide limits

/// Capacity of the host event queue created by [`crate::runtime::event_loop`]
/// when no other size is requested.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Longest service name accepted, in bytes.
///
/// This crate picks the limit; names longer than this are refused before
/// any endpoint sees them.
pub const MAX_SERVICE_NAME_LEN: usize = 128;

/// Deepest nesting of lists/maps (arrays/dictionaries) the codec and the
/// wire decoder accept. Anything deeper is refused instead of recursed into.
pub const MAX_DEPTH: usize = 64;

/// Where a service name is looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Namespace {
    /// System-wide services, reachable with privileged lookups
    #[default]
    System,
    /// Services private to the current login session
    Session,
}

/// Options an [`Endpoint`](crate::transport::Endpoint) receives when opening
/// a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Look the service up in the system namespace
    pub privileged: bool,
    /// Label of the connection's dispatch queue; defaults to the service name
    pub queue_label: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            privileged: true,
            queue_label: None,
        }
    }
}

impl ConnectOptions {
    pub fn namespace(&self) -> Namespace {
        if self.privileged {
            Namespace::System
        } else {
            Namespace::Session
        }
    }

    /// Queue label to use for a connection to `service_name`
    pub fn queue_label_for(&self, service_name: &str) -> String {
        self.queue_label
            .clone()
            .unwrap_or_else(|| service_name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_privileged() {
        let options = ConnectOptions::default();
        assert_eq!(options.namespace(), Namespace::System);
        assert_eq!(options.queue_label_for("com.example.svc"), "com.example.svc");
    }

    #[test]
    fn session_lookup_with_custom_label() {
        let options = ConnectOptions {
            privileged: false,
            queue_label: Some("bridge.q".into()),
        };
        assert_eq!(options.namespace(), Namespace::Session);
        assert_eq!(options.queue_label_for("com.example.svc"), "bridge.q");
    }
}
