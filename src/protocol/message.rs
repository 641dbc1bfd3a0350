use std::fmt;

/// Closed vocabulary of status words carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusType {
    Get,
    GetSuccess,
    GetError,
    Put,
    PutSuccess,
    PutUpdate,
    PutError,
    PutFromCoordinator1,
    PutFromCoordinator2,
    DeleteSuccess,
    DeleteError,
    Keyrange,
    KeyrangeRead,
    KeyrangeUpdate,
    KeyrangeSuccess,
    Rebalance,
    RebalanceSuccess,
    RebalanceError,
    ServerStopped,
    ServerWriteLock,
    ServerNotResponsible,
    NewServer,
    KillingMyself,
    ServerStart,
    ServerStartSuccess,
    ServerStop,
    ServerStopSuccess,
    ServerShutdown,
    ServerShutdownSuccess,
    ServerShutdownError,
    Heartbeat,
    Subscribe,
    SubscribeSuccess,
    Unsubscribe,
    UnsubscribeSuccess,
}

impl StatusType {
    pub const ALL: [StatusType; 35] = [
        StatusType::Get,
        StatusType::GetSuccess,
        StatusType::GetError,
        StatusType::Put,
        StatusType::PutSuccess,
        StatusType::PutUpdate,
        StatusType::PutError,
        StatusType::PutFromCoordinator1,
        StatusType::PutFromCoordinator2,
        StatusType::DeleteSuccess,
        StatusType::DeleteError,
        StatusType::Keyrange,
        StatusType::KeyrangeRead,
        StatusType::KeyrangeUpdate,
        StatusType::KeyrangeSuccess,
        StatusType::Rebalance,
        StatusType::RebalanceSuccess,
        StatusType::RebalanceError,
        StatusType::ServerStopped,
        StatusType::ServerWriteLock,
        StatusType::ServerNotResponsible,
        StatusType::NewServer,
        StatusType::KillingMyself,
        StatusType::ServerStart,
        StatusType::ServerStartSuccess,
        StatusType::ServerStop,
        StatusType::ServerStopSuccess,
        StatusType::ServerShutdown,
        StatusType::ServerShutdownSuccess,
        StatusType::ServerShutdownError,
        StatusType::Heartbeat,
        StatusType::Subscribe,
        StatusType::SubscribeSuccess,
        StatusType::Unsubscribe,
        StatusType::UnsubscribeSuccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusType::Get => "GET",
            StatusType::GetSuccess => "GET_SUCCESS",
            StatusType::GetError => "GET_ERROR",
            StatusType::Put => "PUT",
            StatusType::PutSuccess => "PUT_SUCCESS",
            StatusType::PutUpdate => "PUT_UPDATE",
            StatusType::PutError => "PUT_ERROR",
            StatusType::PutFromCoordinator1 => "PUT_FROM_COORDINATOR_1",
            StatusType::PutFromCoordinator2 => "PUT_FROM_COORDINATOR_2",
            StatusType::DeleteSuccess => "DELETE_SUCCESS",
            StatusType::DeleteError => "DELETE_ERROR",
            StatusType::Keyrange => "KEYRANGE",
            StatusType::KeyrangeRead => "KEYRANGE_READ",
            StatusType::KeyrangeUpdate => "KEYRANGE_UPDATE",
            StatusType::KeyrangeSuccess => "KEYRANGE_SUCCESS",
            StatusType::Rebalance => "REBALANCE",
            StatusType::RebalanceSuccess => "REBALANCE_SUCCESS",
            StatusType::RebalanceError => "REBALANCE_ERROR",
            StatusType::ServerStopped => "SERVER_STOPPED",
            StatusType::ServerWriteLock => "SERVER_WRITE_LOCK",
            StatusType::ServerNotResponsible => "SERVER_NOT_RESPONSIBLE",
            StatusType::NewServer => "NEW_SERVER",
            StatusType::KillingMyself => "KILLING_MYSELF",
            StatusType::ServerStart => "SERVER_START",
            StatusType::ServerStartSuccess => "SERVER_START_SUCCESS",
            StatusType::ServerStop => "SERVER_STOP",
            StatusType::ServerStopSuccess => "SERVER_STOP_SUCCESS",
            StatusType::ServerShutdown => "SERVER_SHUTDOWN",
            StatusType::ServerShutdownSuccess => "SERVER_SHUTDOWN_SUCCESS",
            StatusType::ServerShutdownError => "SERVER_SHUTDOWN_ERROR",
            StatusType::Heartbeat => "HEARTBEAT",
            StatusType::Subscribe => "SUBSCRIBE",
            StatusType::SubscribeSuccess => "SUBSCRIBE_SUCCESS",
            StatusType::Unsubscribe => "UNSUBSCRIBE",
            StatusType::UnsubscribeSuccess => "UNSUBSCRIBE_SUCCESS",
        }
    }

    /// Case-insensitive lookup of a status word.
    pub fn from_word(word: &str) -> Option<StatusType> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(word))
    }

    /// Replica slot targeted by a `PUT_FROM_COORDINATOR_<n>` status.
    pub fn replica_slot(&self) -> Option<u8> {
        match self {
            StatusType::PutFromCoordinator1 => Some(1),
            StatusType::PutFromCoordinator2 => Some(2),
            _ => None,
        }
    }

    pub fn replica_put(slot: u8) -> Option<StatusType> {
        match slot {
            1 => Some(StatusType::PutFromCoordinator1),
            2 => Some(StatusType::PutFromCoordinator2),
            _ => None,
        }
    }
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message: `STATUS[ KEY[ VALUE]]`.
///
/// A message whose first word is not a known status carries no status or key;
/// its whole text travels in `value` and is written back verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvMessage {
    status: Option<StatusType>,
    key: Option<String>,
    value: Option<String>,
}

impl KvMessage {
    pub fn new(status: StatusType) -> Self {
        Self {
            status: Some(status),
            key: None,
            value: None,
        }
    }

    pub fn with_key(status: StatusType, key: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            key: Some(key.into()),
            value: None,
        }
    }

    pub fn with_value(status: StatusType, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            key: Some(key.into()),
            value: Some(value.into()),
        }
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            status: None,
            key: None,
            value: Some(text.into()),
        }
    }

    pub fn status(&self) -> Option<StatusType> {
        self.status
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is(&self, status: StatusType) -> bool {
        self.status == Some(status)
    }

    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (word, rest) = match text.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim_start()),
            None => (text, ""),
        };

        let Some(status) = StatusType::from_word(word) else {
            return Self::raw(text);
        };

        if rest.is_empty() {
            return Self::new(status);
        }

        match rest.split_once(char::is_whitespace) {
            Some((key, value)) => {
                let value = value.trim_start();
                if value.is_empty() {
                    Self::with_key(status, key)
                } else {
                    Self::with_value(status, key, value)
                }
            }
            None => Self::with_key(status, rest),
        }
    }
}

impl fmt::Display for KvMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(status) = self.status else {
            return f.write_str(self.value.as_deref().unwrap_or_default());
        };

        write!(f, "{}", status)?;
        if let Some(key) = &self.key {
            write!(f, " {}", key)?;
            if let Some(value) = &self.value {
                write!(f, " {}", value)?;
            }
        }
        Ok(())
    }
}
