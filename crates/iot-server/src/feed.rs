//! Line-oriented topic feed
//!
//! Each line is `<topic> [json-payload]`. Event topics are fired on the event
//! bus as if a device had published them; command topics are dispatched to the
//! addressed device. Blank lines and lines starting with `#` are skipped.
//!
//! ```text
//! iot/v1/devices/sim-occupancy-001/event/occupied {"occupied": true}
//! iot/v1/devices/sim-light-001/cmd/setBrightness {"brightness": 80}
//! ```

use iot_core::topics::{self, TopicError, TopicKind};
use iot_core::DeviceEvent;
use iot_event_bus::SharedEventBus;
use iot_orchestrator::CommandDispatcher;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Topic(#[from] TopicError),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("command params must be a JSON object")]
    ParamsNotObject,

    #[error("'{0}' topics cannot be injected")]
    Unsupported(TopicKind),
}

/// A parsed feed line
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Event(DeviceEvent),
    Command {
        device_id: String,
        action_name: String,
        params: Map<String, Value>,
    },
}

/// Parse one line; `Ok(None)` for blank and comment lines
pub fn parse_line(line: &str) -> Result<Option<FeedMessage>, FeedError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (topic, payload) = match line.split_once(char::is_whitespace) {
        Some((topic, rest)) => (topic, serde_json::from_str(rest.trim())?),
        None => (line, Value::Object(Map::new())),
    };

    let parsed = topics::parse(topic)?;
    match parsed.kind {
        TopicKind::Event => Ok(Some(FeedMessage::Event(parsed.into_event(payload)?))),
        TopicKind::Cmd => {
            let Value::Object(params) = payload else {
                return Err(FeedError::ParamsNotObject);
            };
            Ok(Some(FeedMessage::Command {
                device_id: parsed.device_id,
                // parse() guarantees a sub path for command topics
                action_name: parsed.sub_path.unwrap_or_default(),
                params,
            }))
        }
        other => Err(FeedError::Unsupported(other)),
    }
}

/// Read lines until EOF, firing events and dispatching commands
pub async fn run<R>(
    reader: R,
    bus: SharedEventBus,
    commands: Arc<dyn CommandDispatcher>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(FeedMessage::Event(event))) => bus.fire(event),
            Ok(Some(FeedMessage::Command {
                device_id,
                action_name,
                params,
            })) => {
                let commands = Arc::clone(&commands);
                tokio::spawn(async move {
                    match commands.send_command(&device_id, &action_name, &params).await {
                        Ok(result) => info!(
                            device_id = %device_id,
                            action = %action_name,
                            result = %result,
                            "Command succeeded"
                        ),
                        Err(e) => warn!(
                            device_id = %device_id,
                            action = %action_name,
                            error = %e,
                            "Command failed"
                        ),
                    }
                });
            }
            Err(e) => warn!(line = %line, error = %e, "Ignoring feed line"),
        }
    }
    info!("Topic feed closed");
    Ok(())
}
