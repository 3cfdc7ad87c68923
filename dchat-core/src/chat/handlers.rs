//! Handler registries for decrypted messages and errors
//!
//! Dispatch runs on a snapshot of the registry taken by the caller, outside
//! any lock. A panicking handler is logged and skipped.

use super::envelope::DecryptedMessage;
use super::error::ChatError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

pub type MessageHandler = Arc<dyn Fn(&DecryptedMessage) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&ChatError) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Handlers {
    decrypted: Vec<MessageHandler>,
    errors: Vec<ErrorHandler>,
}

impl Handlers {
    pub fn on_decrypted(&mut self, handler: MessageHandler) {
        self.decrypted.push(handler);
    }

    pub fn on_error(&mut self, handler: ErrorHandler) {
        self.errors.push(handler);
    }

    pub fn clear(&mut self) {
        self.decrypted.clear();
        self.errors.clear();
    }

    pub fn decrypted_handlers(&self) -> Vec<MessageHandler> {
        self.decrypted.clone()
    }

    pub fn error_handlers(&self) -> Vec<ErrorHandler> {
        self.errors.clone()
    }

    pub fn len(&self) -> usize {
        self.decrypted.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Call every handler; returns how many returned normally
pub fn dispatch_message(handlers: &[MessageHandler], msg: &DecryptedMessage) -> usize {
    let mut ok = 0;
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(msg))) {
            Ok(()) => ok += 1,
            Err(_) => warn!(cid = %msg.cid, "message handler panicked"),
        }
    }
    ok
}

pub fn dispatch_error(handlers: &[ErrorHandler], err: &ChatError) -> usize {
    let mut ok = 0;
    for handler in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(err))) {
            Ok(()) => ok += 1,
            Err(_) => warn!(error = %err, "error handler panicked"),
        }
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message() -> DecryptedMessage {
        DecryptedMessage {
            cid: "c".into(),
            sender: "bob".into(),
            timestamp: 0,
            plaintext: b"hi".to_vec(),
            is_group: false,
            subject: "dchat.dm.c.msg".into(),
        }
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handlers = Handlers::default();

        let counter = calls.clone();
        handlers.on_decrypted(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        handlers.on_decrypted(Arc::new(|_| panic!("handler bug")));
        let counter = calls.clone();
        handlers.on_decrypted(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let ok = dispatch_message(&handlers.decrypted_handlers(), &message());
        assert_eq!(ok, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_error_dispatch() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handlers = Handlers::default();
        let sink = seen.clone();
        handlers.on_error(Arc::new(move |e| sink.lock().unwrap().push(e.clone())));

        dispatch_error(&handlers.error_handlers(), &ChatError::KeyNotConfigured);
        assert_eq!(*seen.lock().unwrap(), vec![ChatError::KeyNotConfigured]);
    }

    #[test]
    fn test_clear() {
        let mut handlers = Handlers::default();
        handlers.on_decrypted(Arc::new(|_| {}));
        handlers.on_error(Arc::new(|_| {}));
        assert_eq!(handlers.len(), 2);

        handlers.clear();
        assert!(handlers.is_empty());
    }
}
