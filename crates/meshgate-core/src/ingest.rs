//! Ingest pipeline: decode, merge, persist.
//!
//! Runs on the supervisor's receive task, which makes it the registry's
//! only writer. Nothing here awaits: decoding and merging are synchronous
//! and persistence is handed to the [`PersistenceSink`] queue.

use std::sync::Arc;

use bytes::Bytes;
use meshgate_types::event::field_names;
use meshgate_types::{Event, EventKind, FieldValue, NodeView};

use crate::decoder::Decoder;
use crate::persistence::{PersistOp, PersistenceSink};
use crate::registry::{ApplyOutcome, Registry};

/// Turns raw transport messages into registry updates.
#[derive(Debug, Clone)]
pub struct IngestPipeline {
    decoder: Decoder,
    registry: Arc<Registry>,
    sink: PersistenceSink,
}

impl IngestPipeline {
    /// Wire a pipeline around shared components.
    pub const fn new(decoder: Decoder, registry: Arc<Registry>, sink: PersistenceSink) -> Self {
        Self {
            decoder,
            registry,
            sink,
        }
    }

    /// The registry this pipeline writes to.
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Process one message.
    ///
    /// Returns `None` when the message was dropped (undecodable or an echo
    /// of our own traffic), otherwise the registry outcome.
    pub fn ingest(&self, topic: &str, payload: &Bytes) -> Option<ApplyOutcome> {
        let event = match self.decoder.decode(topic, payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(topic, bytes = payload.len(), error = %e, "dropping undecodable message");
                return None;
            }
        };

        if event.is_self_originated() {
            tracing::debug!(topic, kind = %event.kind(), "ignoring self-originated message");
            return None;
        }

        let outcome = self.registry.apply(&event);
        if outcome.merged {
            tracing::trace!(
                node_id = %event.node_id(),
                kind = %event.kind(),
                created = outcome.created,
                version = self.registry.version(),
                "merged event"
            );
        }

        self.persist(&event, outcome, payload);
        Some(outcome)
    }

    fn persist(&self, event: &Event, outcome: ApplyOutcome, payload: &Bytes) {
        if outcome.created || outcome.identity_changed || outcome.position_changed {
            if let Some(node) = self.registry.get(event.node_id()) {
                if outcome.created || outcome.identity_changed {
                    self.sink.submit(PersistOp::UpsertIdentity {
                        node_id: node.id.clone(),
                        name: node.name.clone(),
                        seen_at: event.received_at(),
                    });
                }
                if outcome.position_changed {
                    if let Some(op) = position_op(&node, event) {
                        self.sink.submit(op);
                    }
                }
            }
        }

        if *event.kind() != EventKind::Command {
            self.sink.submit(PersistOp::AppendEvent {
                node_id: event.node_id().clone(),
                kind: event.kind().as_str().to_owned(),
                topic: event.source_topic().to_owned(),
                payload: payload.clone(),
                received_at: event.received_at(),
            });
        }
    }
}

fn position_op(node: &NodeView, event: &Event) -> Option<PersistOp> {
    let coordinate = |key: &str| node.fields.get(key).and_then(FieldValue::as_f64);
    Some(PersistOp::UpdatePosition {
        node_id: node.id.clone(),
        latitude: coordinate(field_names::LATITUDE)?,
        longitude: coordinate(field_names::LONGITUDE)?,
        altitude: coordinate(field_names::ALTITUDE),
        seen_at: event.received_at(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use meshgate_types::NodeId;
    use tokio::sync::mpsc;

    use super::*;

    fn pipeline() -> (IngestPipeline, mpsc::Receiver<PersistOp>) {
        let (sink, rx) = PersistenceSink::channel(64);
        let pipeline = IngestPipeline::new(Decoder::new("!meshgate"), Arc::new(Registry::new()), sink);
        (pipeline, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<PersistOp>) -> Vec<PersistOp> {
        let mut ops = Vec::new();
        while let Ok(op) = rx.try_recv() {
            ops.push(op);
        }
        ops
    }

    fn json(raw: &str) -> Bytes {
        Bytes::copy_from_slice(raw.as_bytes())
    }

    #[test]
    fn nodeinfo_upserts_identity_and_appends_history() {
        let (pipeline, mut rx) = pipeline();
        let payload = json(
            r#"{"from":"!a1b2","type":"nodeinfo","payload":{"shortname":"AB","longname":"Alpha Beta"}}"#,
        );

        let outcome = pipeline.ingest("msh.json.nodeinfo", &payload).unwrap();
        assert!(outcome.created);

        let ops = drain(&mut rx);
        assert_eq!(ops.len(), 2);
        assert!(matches!(
            &ops[0],
            PersistOp::UpsertIdentity { node_id, name, .. }
                if node_id.as_str() == "!a1b2" && name == "Alpha Beta"
        ));
        assert!(matches!(
            &ops[1],
            PersistOp::AppendEvent { kind, topic, payload: raw, .. }
                if kind == "nodeinfo" && topic == "msh.json.nodeinfo" && *raw == payload
        ));
        assert_eq!(
            pipeline.registry().get(&NodeId::from("!a1b2")).unwrap().name,
            "Alpha Beta"
        );
    }

    #[test]
    fn identical_position_is_written_once() {
        let (pipeline, mut rx) = pipeline();
        let payload = json(r#"{"from":"!1","type":"position","payload":{"lat":45.5,"lon":9.2,"altitude":100}}"#);

        pipeline.ingest("msh.pos", &payload);
        pipeline.ingest("msh.pos", &payload);

        let positions: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|op| matches!(op, PersistOp::UpdatePosition { .. }))
            .collect();
        assert_eq!(positions.len(), 1);
        assert!(matches!(
            &positions[0],
            PersistOp::UpdatePosition { altitude: Some(alt), .. } if (*alt - 100.0).abs() < f64::EPSILON
        ));
    }

    #[test]
    fn undecodable_and_echoed_messages_are_dropped() {
        let (pipeline, mut rx) = pipeline();

        assert!(pipeline.ingest("msh.bad", &Bytes::from_static(b"\xff\xff")).is_none());
        assert!(
            pipeline
                .ingest(
                    "mesh/request/!1/location",
                    &json(r#"{"cmd":"request_position","from":"!meshgate","to":"!1"}"#),
                )
                .is_none()
        );

        assert!(pipeline.registry().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn foreign_commands_are_not_historized() {
        let (pipeline, mut rx) = pipeline();
        let outcome = pipeline
            .ingest(
                "mesh/request/!2/location",
                &json(r#"{"cmd":"request_position","from":"!1","to":"!2"}"#),
            )
            .unwrap();
        assert!(outcome.created);

        let ops = drain(&mut rx);
        assert!(ops.iter().all(|op| !matches!(op, PersistOp::AppendEvent { .. })));
    }
}
