use serde::Serialize;
use zbus::interface;

use crate::detection_loop::LoopControl;

/// D-Bus interface for the checkpoint daemon.
///
/// Bus name: org.checkpoint.Checkpoint1
/// Object path: /org/checkpoint/Checkpoint1
pub struct CheckpointService {
    control: LoopControl,
}

impl CheckpointService {
    pub fn new(control: LoopControl) -> Self {
        Self { control }
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("encode: {e}")))
}

#[interface(name = "org.checkpoint.Checkpoint1")]
impl CheckpointService {
    /// Enable detection. Returns false while models or the registry are loading.
    async fn start(&self) -> bool {
        let started = self.control.start().await;
        tracing::info!(started, "start requested");
        started
    }

    /// Suspend detection. Returns false if it was not running.
    async fn stop(&self) -> bool {
        let stopped = self.control.stop().await;
        tracing::info!(stopped, "stop requested");
        stopped
    }

    /// Current cycle snapshot as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "snapshot": self.control.snapshot(),
        }))
    }

    /// Registry entries and whether each one was enrolled, as JSON.
    async fn list_registry(&self) -> zbus::fdo::Result<String> {
        to_json(&self.control.registry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkpoint_core::{EntrySummary, Snapshot};

    #[test]
    fn test_snapshot_json_shape() {
        let json = to_json(&Snapshot::default()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["state"], "idle");
        assert_eq!(value["status"]["kind"], "loading_models");
        assert!(value["countdown"].is_null());
    }

    #[test]
    fn test_registry_json_shape() {
        let json = to_json(&vec![EntrySummary {
            id: 7,
            display_name: "Alice".into(),
            enrolled: true,
        }])
        .unwrap();
        assert_eq!(json, r#"[{"id":7,"display_name":"Alice","enrolled":true}]"#);
    }
}
