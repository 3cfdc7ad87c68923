//! Metrics names and helpers
//!
//! Counters go through the `metrics` facade; installing a recorder or
//! exporter is left to the embedding application.

use metrics::{counter, describe_counter};

mod collector;

pub use collector::{TrafficCounters, TrafficSnapshot};

pub const BROKER_MESSAGES_IN: &str = "dchat_broker_messages_in_total";
pub const BROKER_MESSAGES_OUT: &str = "dchat_broker_messages_out_total";
pub const BROKER_SLOW_CONSUMER: &str = "dchat_broker_slow_consumer_total";
pub const CHAT_DECRYPT_FAILURES: &str = "dchat_chat_decrypt_failures_total";
pub const CHAT_MESSAGES_DELIVERED: &str = "dchat_chat_messages_delivered_total";

/// Register descriptions for every counter
pub fn init_metrics() {
    describe_counter!(BROKER_MESSAGES_IN, "Messages received by the broker from clients and routes");
    describe_counter!(BROKER_MESSAGES_OUT, "Messages written by the broker to clients and routes");
    describe_counter!(BROKER_SLOW_CONSUMER, "Messages dropped because a connection queue was full");
    describe_counter!(CHAT_DECRYPT_FAILURES, "Inbound chat messages that failed to decrypt");
    describe_counter!(CHAT_MESSAGES_DELIVERED, "Decrypted chat messages handed to handlers");
}

pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        init_metrics();
        record_counter(BROKER_MESSAGES_IN, 1);
        record_counter(CHAT_DECRYPT_FAILURES, 3);
    }
}
