//! User-visible notices.

use crate::error::ChatError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    /// The credential was rejected; the session is over.
    AuthRejected,
    /// A REST call failed and its optimistic effect was undone.
    RequestFailed,
    /// An outbound frame could not be delivered.
    SendFailed,
    /// The server reported an error over the socket.
    Server,
    /// Input was refused before anything was sent.
    Invalid,
    /// Reconnect attempts were exhausted.
    Disconnected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The notice for `err`, if it is one the user should see.
    pub fn from_error(kind: NoticeKind, err: &ChatError) -> Option<Self> {
        if !err.is_user_visible() {
            return None;
        }
        let kind = match err {
            ChatError::Auth(_) => NoticeKind::AuthRejected,
            ChatError::Validation(_) => NoticeKind::Invalid,
            _ => kind,
        };
        Some(Self::new(kind, err.to_string()))
    }
}

/// Sending half of the notice stream. Never blocks; a full queue drops the notice.
#[derive(Clone, Debug)]
pub struct NoticeSink {
    tx: async_channel::Sender<Notice>,
}

impl NoticeSink {
    pub fn raise(&self, notice: Notice) {
        tracing::info!("[Notice] {:?}: {}", notice.kind, notice.message);
        if let Err(e) = self.tx.try_send(notice) {
            tracing::debug!("[Notice] Dropped: {}", e);
        }
    }

    pub fn raise_error(&self, kind: NoticeKind, err: &ChatError) {
        if let Some(notice) = Notice::from_error(kind, err) {
            self.raise(notice);
        }
    }
}

/// Create a bounded notice stream.
pub fn notice_channel(capacity: usize) -> (NoticeSink, async_channel::Receiver<Notice>) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));
    (NoticeSink { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superseded_is_silent() {
        assert!(Notice::from_error(NoticeKind::RequestFailed, &ChatError::Superseded).is_none());
    }

    #[test]
    fn test_kind_follows_error() {
        let notice =
            Notice::from_error(NoticeKind::RequestFailed, &ChatError::Auth("expired".into()))
                .unwrap();
        assert_eq!(notice.kind, NoticeKind::AuthRejected);
    }

    #[test]
    fn test_full_queue_drops() {
        let (sink, rx) = notice_channel(1);
        sink.raise(Notice::new(NoticeKind::Server, "one"));
        sink.raise(Notice::new(NoticeKind::Server, "two"));
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_recv().unwrap().message, "one");
    }

    #[test]
    fn test_sink_survives_receiver_clone() {
        let (sink, rx) = notice_channel(4);
        let other = rx.clone();
        sink.raise_error(NoticeKind::SendFailed, &ChatError::NotConnected);
        let notice = tokio_test::block_on(other.recv()).unwrap();
        assert_eq!(notice.kind, NoticeKind::SendFailed);
        assert!(rx.is_empty());
    }
}
