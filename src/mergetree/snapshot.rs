//! Snapshots of the sequenced state
//!
//! A snapshot captures what every replica agrees on as of `current_seq`:
//! live segments plus the tombstones still inside the collaboration window,
//! so ops referencing any sequence number at or above `min_seq` still
//! resolve after a reload. This replica's pending edits are left out; they
//! reach other replicas through the op stream.
//!
//! Segments acknowledged at or below `min_seq` are written with the
//! universal sequence number: no in-flight op can tell them apart.

use super::client::MergeClient;
use super::properties::PropertySet;
use super::segment::{Payload, SegmentSpec};
use super::stamp::{ClientIdx, ClientTable, InsertStamp, RemoveStamp, SeqNum, UNIVERSAL_SEQ};
use super::tree::MergeTree;
use super::window::CollaborationWindow;
use crate::error::{MergeError, Result};
use crate::options::MergeTreeOptions;
use serde::{Deserialize, Serialize};
use tracing::debug;

fn is_universal(seq: &SeqNum) -> bool {
    *seq == UNIVERSAL_SEQ
}

/// One segment as stored in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSegment {
    pub payload: Payload,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub props: PropertySet,

    #[serde(default, skip_serializing_if = "is_universal")]
    pub seq: SeqNum,

    /// Index into [`Snapshot::clients`]
    pub client: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_seq: Option<SeqNum>,

    /// Indices into [`Snapshot::clients`], winning remover first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_clients: Vec<u32>,
}

/// Sequenced state of a replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub min_seq: SeqNum,
    pub current_seq: SeqNum,

    /// Client ids referenced by segments
    pub clients: Vec<String>,

    pub segments: Vec<SnapshotSegment>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl MergeClient {
    /// Capture the sequenced state
    pub fn snapshot(&self) -> Snapshot {
        let min_seq = self.window.min_seq;
        let local = self.window.client;
        let mut segments = Vec::new();

        for handle in self.tree.segments() {
            let Ok(segment) = self.tree.segment(handle) else {
                continue;
            };
            let insert = segment.insert_stamp();
            if insert.is_pending() {
                continue;
            }
            let removal = segment.removal().filter(|removal| !removal.is_pending());
            if removal.is_some_and(|removal| removal.seq < min_seq) {
                continue;
            }

            let removed_clients = removal
                .map(|removal| {
                    removal
                        .clients
                        .iter()
                        .filter(|&&client| removal.local_seq.is_none() || client != local)
                        .map(|client| client.0)
                        .collect()
                })
                .unwrap_or_default();
            segments.push(SnapshotSegment {
                payload: segment.payload().clone(),
                props: segment.properties.sequenced_values(),
                seq: if insert.seq <= min_seq {
                    UNIVERSAL_SEQ
                } else {
                    insert.seq
                },
                client: insert.client.0,
                removed_seq: removal.map(|removal| removal.seq),
                removed_clients,
            });
        }

        Snapshot {
            min_seq,
            current_seq: self.window.current_seq,
            clients: self.clients.names().map(String::from).collect(),
            segments,
        }
    }

    /// Load a replica for `client_id` from a snapshot
    pub fn from_snapshot(
        client_id: impl Into<String>,
        snapshot: &Snapshot,
        options: MergeTreeOptions,
    ) -> Result<Self> {
        let id = client_id.into();
        let window =
            CollaborationWindow::resume(ClientIdx(0), snapshot.min_seq, snapshot.current_seq)?;

        let mut clients = ClientTable::new();
        clients.get_or_insert(&id)?;
        let mapping = snapshot
            .clients
            .iter()
            .map(|name| clients.get_or_insert(name))
            .collect::<Result<Vec<ClientIdx>>>()?;
        let resolve = |index: u32| {
            mapping.get(index as usize).copied().ok_or_else(|| {
                MergeError::Serialization(format!("unknown client index {} in snapshot", index))
            })
        };

        let mut tree = MergeTree::new(options)?;
        tree.set_min_seq(window.min_seq);
        for stored in &snapshot.segments {
            if stored.payload.is_empty() {
                return Err(MergeError::Serialization("empty segment in snapshot".into()));
            }
            if stored.seq > window.current_seq
                || stored.removed_seq.is_some_and(|seq| seq > window.current_seq)
            {
                return Err(MergeError::Serialization(format!(
                    "segment stamped after current seq {}",
                    window.current_seq
                )));
            }

            let insert = InsertStamp::sequenced(stored.seq, resolve(stored.client)?);
            let removal = match stored.removed_seq {
                None => None,
                Some(seq) => {
                    let (&first, rest) = stored.removed_clients.split_first().ok_or_else(|| {
                        MergeError::Serialization("removed segment without removers".into())
                    })?;
                    let mut removal = RemoveStamp::sequenced(seq, resolve(first)?);
                    for &client in rest {
                        removal.overlap(seq, resolve(client)?);
                    }
                    Some(removal)
                }
            };
            tree.push_loaded(
                SegmentSpec {
                    payload: stored.payload.clone(),
                    props: stored.props.clone(),
                },
                insert,
                removal,
            );
        }

        debug!(
            client = %id,
            segments = snapshot.segments.len(),
            current_seq = window.current_seq,
            "loaded snapshot"
        );
        MergeClient::from_parts(
            id,
            clients,
            tree,
            Some((window.min_seq, window.current_seq)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mergetree::ops::SequencedOp;
    use serde_json::json;

    fn client(id: &str) -> MergeClient {
        MergeClient::new(id, MergeTreeOptions::default()).unwrap()
    }

    fn sequence(from: &mut MergeClient, seq: SeqNum, min_seq: SeqNum) -> SequencedOp {
        let id = from.id().to_string();
        from.take_outbound().remove(0).sequence(seq, id, min_seq)
    }

    #[test]
    fn test_snapshot_excludes_pending_state() {
        let mut alice = client("alice");
        alice.insert_text(0, "abc").unwrap();
        let op = sequence(&mut alice, 1, 0);
        alice.apply_remote(&op).unwrap();

        alice.insert_text(3, "def").unwrap();
        alice.remove(0, 1).unwrap();
        let mut bold = PropertySet::new();
        bold.insert("bold".into(), json!(true));
        alice.annotate(0, 2, bold).unwrap();

        let snapshot = alice.snapshot();
        let loaded = MergeClient::from_snapshot("carol", &snapshot, MergeTreeOptions::default()).unwrap();

        assert_eq!(loaded.text(), "abc");
        assert!(loaded.properties_at(1).unwrap().is_empty());
        assert_eq!(loaded.window().current_seq, 1);
        assert!(!loaded.has_pending());
    }

    #[test]
    fn test_json_round_trip_and_universal_seq() {
        let mut alice = client("alice");
        alice.insert_text(0, "hello").unwrap();
        let first = sequence(&mut alice, 1, 0);
        alice.apply_remote(&first).unwrap();
        alice.insert_text(5, "!").unwrap();
        let second = sequence(&mut alice, 2, 1);
        alice.apply_remote(&second).unwrap();

        let json = alice.snapshot().to_json().unwrap();
        let snapshot = Snapshot::from_json(&json).unwrap();

        assert_eq!(snapshot.min_seq, 1);
        assert_eq!(snapshot.segments.len(), 2);
        assert_eq!(snapshot.segments[0].seq, UNIVERSAL_SEQ);
        assert_eq!(snapshot.segments[1].seq, 2);
        assert_eq!(snapshot.clients, vec!["alice".to_string()]);
    }

    #[test]
    fn test_loaded_replica_keeps_window_tombstones() {
        let mut alice = client("alice");
        let mut bob = client("bob");

        alice.insert_text(0, "abcdef").unwrap();
        let insert = sequence(&mut alice, 1, 0);
        alice.apply_remote(&insert).unwrap();
        bob.apply_remote(&insert).unwrap();

        alice.remove(2, 4).unwrap();
        let remove = sequence(&mut alice, 2, 1);
        alice.apply_remote(&remove).unwrap();
        bob.apply_remote(&remove).unwrap();

        let mut carol =
            MergeClient::from_snapshot("carol", &bob.snapshot(), MergeTreeOptions::default()).unwrap();
        assert_eq!(carol.text(), "abef");

        // Bob inserts inside the removed range without having seen the remove
        let op = crate::mergetree::ops::OutboundOp {
            reference_sequence_number: 1,
            contents: crate::mergetree::ops::MergeTreeOp::Insert {
                pos: 3,
                seg: SegmentSpec::text("X"),
            },
        }
        .sequence(3, "dave", 1);
        bob.apply_remote(&op).unwrap();
        carol.apply_remote(&op).unwrap();

        assert_eq!(carol.text(), bob.text());
        assert_eq!(carol.text(), "abXef");
    }

    #[test]
    fn test_rejects_inconsistent_snapshot() {
        let snapshot = Snapshot {
            min_seq: 0,
            current_seq: 1,
            clients: vec!["alice".into()],
            segments: vec![SnapshotSegment {
                payload: Payload::Text("abc".into()),
                props: PropertySet::new(),
                seq: 1,
                client: 4,
                removed_seq: None,
                removed_clients: Vec::new(),
            }],
        };

        assert!(matches!(
            MergeClient::from_snapshot("bob", &snapshot, MergeTreeOptions::default()),
            Err(MergeError::Serialization(_))
        ));
    }
}
