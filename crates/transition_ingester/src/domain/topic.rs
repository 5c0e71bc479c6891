use common::domain::{DomainError, DomainResult};

/// Identity carried in an inbound topic of the form
/// `{prefix}/{subject_id}/{device_id}/...`
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTopic {
    pub subject_id: String,
    pub device_id: Option<String>,
}

/// Parse an inbound MQTT topic such as `owntracks/alice/phone1/event`
///
/// The second path segment names the tracked subject and must be non-empty.
/// The third segment, when present and non-empty, names the device.
///
/// # Examples
/// ```
/// use transition_ingester::domain::parse_topic;
///
/// let parsed = parse_topic("owntracks/alice/phone1/event").unwrap();
/// assert_eq!(parsed.subject_id, "alice");
/// assert_eq!(parsed.device_id.as_deref(), Some("phone1"));
/// ```
pub fn parse_topic(topic: &str) -> DomainResult<ParsedTopic> {
    let mut segments = topic.split('/').skip(1);

    let subject_id = match segments.next() {
        Some(subject) if !subject.is_empty() => subject.to_string(),
        Some(_) => {
            return Err(DomainError::InvalidTopic(format!(
                "Subject ID cannot be empty in topic '{}'",
                topic
            )))
        }
        None => {
            return Err(DomainError::InvalidTopic(format!(
                "Invalid topic format '{}': expected '{{prefix}}/{{subject_id}}/{{device_id}}/event'",
                topic
            )))
        }
    };

    let device_id = segments
        .next()
        .filter(|device| !device.is_empty())
        .map(str::to_string);

    Ok(ParsedTopic {
        subject_id,
        device_id,
    })
}
