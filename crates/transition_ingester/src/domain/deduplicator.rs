use tracing::debug;

/// Whether a delivery should be processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDecision {
    Proceed,
    Skip,
}

/// Decide whether to process a delivery based on the broker's redelivery flag
///
/// No state is kept between messages: a redelivery that the broker does not
/// flag as a duplicate is processed again.
pub fn check_delivery(duplicate: bool, message_id: u16) -> DeliveryDecision {
    if duplicate {
        debug!(message_id, "ignoring duplicate message");
        DeliveryDecision::Skip
    } else {
        DeliveryDecision::Proceed
    }
}
