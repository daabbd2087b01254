use proptest::prelude::*;
use serde_json::json;

use story_loom::graph_utils::graph::{GraphModel, Position, StoryNode};
use story_loom::persistence::codec::{self, SerializedDocument};
use std::sync::Arc;

use story_loom::persistence::crypto::{CryptoBox, KeyDerivation};
use story_loom::persistence::error::StoryError;
use story_loom::persistence::persist::{ByteSink, ByteSource, FileStore, PersistenceService};

fn new_service() -> PersistenceService {
    PersistenceService::new().expect("crypto available under tokio")
}

fn two_node_graph() -> (GraphModel, String, String) {
    let mut g = GraphModel::new();
    let a = g.add_node(Position::new(0.0, 0.0));
    let b = g.add_node(Position::new(150.0, 80.0));
    g.set_text(&a, "A".into());
    g.set_text(&b, "B".into());
    assert!(g.connect(&a, &b));
    (g, a, b)
}

#[test]
fn graph_add_connect_and_cascade_delete() {
    let (mut g, a, b) = two_node_graph();
    assert_eq!(g.node_count(), 2);
    assert_eq!(g.get_node(&a).unwrap().connections, vec![b.clone()]);
    assert!(g.remove_node(&a));
    assert_eq!(g.connection_count(), 0);
    assert!(g.get_node(&b).is_some());
}

#[test]
fn graph_content_edits_report_unknown_ids() {
    let mut g = GraphModel::new();
    let n = g.add_node(Position::default());
    assert!(g.add_media(&n, json!({"type": "audio", "src": "rain.ogg"})));
    assert!(g.add_choice(&n, json!({"label": "Run"})));
    assert!(g.move_node(&n, Position::new(5.0, 6.0)));
    assert!(!g.set_text("nope", "x".into()));
    assert!(!g.add_media("nope", json!(null)));
    let node = g.get_node(&n).unwrap();
    assert_eq!(node.content.media.len(), 1);
    assert_eq!(node.content.choices.len(), 1);
    assert_eq!(node.position, Position::new(5.0, 6.0));
}

#[test]
fn snapshot_is_detached_from_the_model() {
    let (mut g, a, _) = two_node_graph();
    let before = g.snapshot();
    g.set_text(&a, "changed".into());
    assert_eq!(before.nodes[0].content.text, "A");
    assert_ne!(g.snapshot(), before);
}

#[test]
fn clear_empties_nodes_and_connections() {
    let (mut g, _, _) = two_node_graph();
    g.clear();
    assert!(g.is_empty());
    assert_eq!(g.snapshot(), SerializedDocument::empty());
}

#[tokio::test]
async fn empty_graph_encrypted_with_abc_round_trips() {
    let service = new_service();
    let bytes = service.save(&GraphModel::new(), Some("abc")).await.unwrap();
    assert!(codec::looks_encrypted(&bytes));

    let mut loaded = GraphModel::new();
    loaded.add_node(Position::default());
    service.load(&mut loaded, &bytes, Some("abc")).await.unwrap();
    assert_eq!(loaded.snapshot(), SerializedDocument { nodes: vec![], connections: vec![] });
}

#[tokio::test]
async fn two_connected_nodes_survive_plain_save_and_load() {
    let service = new_service();
    let (g, a, b) = two_node_graph();
    let bytes = service.save(&g, None).await.unwrap();
    // plain files are indented
    assert!(String::from_utf8(bytes.clone()).unwrap().contains("\n  \"nodes\""));

    let mut loaded = GraphModel::new();
    let report = service.load(&mut loaded, &bytes, None).await.unwrap();
    assert_eq!(report.node_count, 2);
    assert!(report.dangling.is_empty());
    let ids: Vec<&String> = loaded.node_ids().collect();
    assert_eq!(ids, vec![&a, &b]);
    assert_eq!(loaded.connection_count(), 1);
    assert_eq!(loaded.connections()[0], json!({"from": &a, "to": &b}));
    assert_eq!(loaded.get_node(&a).unwrap().connections, vec![b.clone()]);
    assert_eq!(loaded, g);
}

#[tokio::test]
async fn plain_file_with_passphrase_is_a_format_error() {
    let service = new_service();
    let (g, _, _) = two_node_graph();
    let bytes = service.save(&g, None).await.unwrap();
    let mut target = GraphModel::new();
    let err = service.load(&mut target, &bytes, Some("abc")).await.unwrap_err();
    assert!(matches!(err, StoryError::Format(_)), "got {err:?}");
    assert!(target.is_empty());
}

#[tokio::test]
async fn empty_passphrase_means_plain() {
    let service = new_service();
    let (g, _, _) = two_node_graph();
    let bytes = service.save(&g, Some("")).await.unwrap();
    assert!(!codec::looks_encrypted(&bytes));
    let mut loaded = GraphModel::new();
    service.load(&mut loaded, &bytes, Some("")).await.unwrap();
    assert_eq!(loaded, g);
}

#[tokio::test]
async fn failed_loads_leave_the_model_untouched() {
    let service = new_service();
    let (mut g, _, _) = two_node_graph();
    let before = g.snapshot();

    let mut corrupt = codec::decode_envelope(&service.save(&g, Some("pw")).await.unwrap()).unwrap();
    let last = corrupt.encrypted.len() - 1;
    corrupt.encrypted[last] ^= 0xff;
    let corrupt = codec::encode_envelope(&corrupt).unwrap();

    let err = service.load(&mut g, &corrupt, Some("pw")).await.unwrap_err();
    assert!(matches!(err, StoryError::Decryption(_)));
    assert_eq!(g.snapshot(), before);

    let good = service.save(&g, Some("pw")).await.unwrap();
    let err = service.load(&mut g, &good, Some("not pw")).await.unwrap_err();
    assert!(matches!(err, StoryError::Decryption(_)));
    assert_eq!(g.snapshot(), before);

    assert!(service.load(&mut g, b"{\"nodes\": 3}", None).await.is_err());
    assert!(service.load(&mut g, b"", None).await.is_err());
    assert_eq!(g.snapshot(), before);
}

#[tokio::test]
async fn encrypted_payload_decrypts_to_compact_document() {
    let service = new_service();
    let (g, _, _) = two_node_graph();
    let envelope = codec::decode_envelope(&service.save(&g, Some("k")).await.unwrap()).unwrap();
    let plaintext = CryptoBox::new().unwrap().decrypt(&envelope, "k").await.unwrap();
    assert_eq!(plaintext, codec::encode(&g.snapshot()).unwrap());
}

#[tokio::test]
async fn disagreeing_connection_lists_are_preserved() {
    let service = new_service();
    let mut a = StoryNode::new("a", Position::new(1.0, 1.0));
    a.connections.push("b".into());
    a.connections.push("ghost".into());
    let doc = SerializedDocument {
        nodes: vec![a, StoryNode::new("b", Position::default())],
        connections: vec![json!({"from": "b", "to": "a", "label": "back"}), json!("legacy")],
    };
    let bytes = codec::encode_pretty(&doc).unwrap();

    let mut g = GraphModel::new();
    let report = service.load(&mut g, &bytes, None).await.unwrap();
    assert_eq!(report.dangling, vec![("a".to_string(), "ghost".to_string())]);
    assert_eq!(g.snapshot(), doc);

    let resaved = service.save(&g, None).await.unwrap();
    assert_eq!(resaved, bytes);
}

#[tokio::test]
async fn file_store_sink_and_source_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = FileStore::new(dir.path());
    let service = new_service();
    let (g, _, _) = two_node_graph();

    let path = service.save_to(&g, &store, "story.json", Some("pw")).await.unwrap();
    assert!(path.exists());
    assert!(codec::looks_encrypted(&store.read_named("story.json").unwrap()));

    let mut loaded = GraphModel::new();
    service.load_from(&mut loaded, &store, "story.json", Some("pw")).await.unwrap();
    assert_eq!(loaded, g);

    store.write_named("broken.json", b"{").unwrap();
    assert!(service.load_from(&mut loaded, &store, "broken.json", None).await.is_err());
    assert_eq!(loaded, g);
}

#[tokio::test]
async fn convert_switches_between_plain_and_encrypted() {
    let service = new_service();
    let (g, _, _) = two_node_graph();
    let plain = service.save(&g, None).await.unwrap();
    let sealed = service.convert(&plain, None, Some("pw")).await.unwrap();
    assert!(codec::looks_encrypted(&sealed));
    let opened = service.convert(&sealed, Some("pw"), None).await.unwrap();
    assert_eq!(opened, plain);
}

#[tokio::test]
async fn non_finite_position_fails_save_and_writes_nothing() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = FileStore::new(dir.path());
    let service = new_service();
    let mut g = GraphModel::new();
    g.add_node(Position::new(f64::INFINITY, 1.0));

    assert!(matches!(service.save(&g, None).await, Err(StoryError::Format(_))));
    assert!(matches!(service.save(&g, Some("pw")).await, Err(StoryError::Format(_))));
    let err = service.save_to(&g, &store, "story.json", None).await.unwrap_err();
    assert!(matches!(err, StoryError::Format(_)));
    assert!(!dir.path().join("story.json").exists());
}

struct FixedKey;

impl KeyDerivation for FixedKey {
    fn derive_key(&self, _passphrase: &str) -> [u8; 32] {
        [7; 32]
    }
}

#[tokio::test]
async fn service_uses_the_supplied_key_derivation() {
    let custom = PersistenceService::with_crypto(CryptoBox::with_key_derivation(Arc::new(FixedKey)).unwrap());
    let (g, _, _) = two_node_graph();
    let bytes = custom.save(&g, Some("anything")).await.unwrap();

    // every passphrase maps to the same key
    let mut loaded = GraphModel::new();
    custom.load(&mut loaded, &bytes, Some("something else")).await.unwrap();
    assert_eq!(loaded, g);

    let err = new_service().load(&mut GraphModel::new(), &bytes, Some("anything")).await.unwrap_err();
    assert!(matches!(err, StoryError::Decryption(_)));
}

fn arb_node() -> impl Strategy<Value = StoryNode> {
    (
        "[a-z0-9]{1,8}",
        -1.0e6f64..1.0e6,
        -1.0e6f64..1.0e6,
        ".{0,24}",
        proptest::collection::vec("[a-z]{1,6}", 0..3),
        proptest::collection::vec("[a-z0-9]{1,8}", 0..4),
    )
        .prop_map(|(id, x, y, text, media, connections)| {
            let mut node = StoryNode::new(id, Position::new(x, y));
            node.content.text = text;
            node.content.media = media.into_iter().map(|m| json!({ "src": m })).collect();
            node.content.choices = vec![json!({ "label": "next" })];
            node.connections = connections;
            node
        })
}

proptest! {
    #[test]
    fn prop_model_snapshot_round_trips_through_codec(
        nodes in proptest::collection::vec(arb_node(), 0..12),
        records in proptest::collection::vec(("[a-z0-9]{1,8}", "[a-z0-9]{1,8}"), 0..6),
    ) {
        let mut g = GraphModel::new();
        g.replace(SerializedDocument {
            nodes,
            connections: records.into_iter().map(|(f, t)| json!({ "from": f, "to": t })).collect(),
        });
        let snap = g.snapshot();
        let encoded = codec::encode(&snap).unwrap();
        prop_assert_eq!(&encoded, &codec::encode(&snap).unwrap());
        prop_assert_eq!(codec::decode(&encoded).unwrap(), snap.clone());
        prop_assert_eq!(codec::decode(&codec::encode_pretty(&snap).unwrap()).unwrap(), snap);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn prop_encryption_round_trips_and_rejects_other_keys(
        plaintext in proptest::collection::vec(any::<u8>(), 0..256),
        k1 in ".{0,16}",
        k2 in ".{0,16}",
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let cb = CryptoBox::new().unwrap();
            let env = cb.encrypt(&plaintext, &k1).await.unwrap();
            assert_eq!(cb.decrypt(&env, &k1).await.unwrap(), plaintext);
            if k1 != k2 {
                assert!(matches!(cb.decrypt(&env, &k2).await, Err(StoryError::Decryption(_))));
            }
        });
    }
}
