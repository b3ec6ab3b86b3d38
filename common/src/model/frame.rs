use crate::model::task::Task;
use serde::{Deserialize, Serialize};

/// Payload encoding of the downloaded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryType {
    Text,
    Binary,
}

impl Default for BinaryType {
    fn default() -> Self {
        BinaryType::Text
    }
}

/// Every frame on a Downloader -> Parser connection is one of these
/// shapes, passed through the package codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// Advisory heartbeat, ignored by the parser beyond logging.
    Ping { event: String, interval: u64 },
    /// A task together with its downloaded body.
    Download {
        task: Task,
        download_data: Vec<u8>,
        #[serde(default)]
        binary_type: BinaryType,
    },
    /// Short human-readable acknowledgement sent back by the parser.
    Ack { message: String },
}

impl Frame {
    pub fn ping(interval: u64) -> Self {
        Frame::Ping {
            event: "ping".to_string(),
            interval,
        }
    }

    pub fn ack(message: impl Into<String>) -> Self {
        Frame::Ack {
            message: message.into(),
        }
    }

    pub fn is_ping(&self) -> bool {
        matches!(self, Frame::Ping { event, .. } if event == "ping")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_detection() {
        let frame = Frame::ping(25);
        assert!(frame.is_ping());
        let frame = Frame::ack("done 3 urls");
        assert!(!frame.is_ping());
    }

    #[test]
    fn test_frame_json_shapes() {
        let json = serde_json::to_string(&Frame::ping(25)).unwrap();
        assert!(json.contains("\"event\":\"ping\""));
        assert!(json.contains("\"interval\":25"));

        let task = Task::new("http://example.com");
        let frame = Frame::Download {
            task,
            download_data: b"<html></html>".to_vec(),
            binary_type: BinaryType::Text,
        };
        let back: Frame = serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        match back {
            Frame::Download { download_data, .. } => {
                assert_eq!(download_data, b"<html></html>".to_vec())
            }
            _ => panic!("expected download frame"),
        }
    }
}
