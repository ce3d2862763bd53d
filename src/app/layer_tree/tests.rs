use super::*;
use crate::app::loader::{LayerSource, MemoryLoader};
use crate::core::{FeatureShape, GeometryRecord};
use std::sync::Mutex;
use std::time::Duration;

fn options() -> EditorOptions {
    EditorOptions::default()
}

fn point_record(x: f32) -> FeatureRecord {
    FeatureRecord::new(GeometryRecord::Point {
        position: Vec3::new(x, 0.0, 0.0),
    })
}

fn memory_leaf(name: &str, records: Vec<FeatureRecord>) -> LayerSpec {
    LayerSpec::leaf(
        LayerMetadata::named(name),
        Arc::new(MemoryLoader::with_features(FeatureShape::Point, records)),
    )
}

/// Loader, dessen `init` nie fertig wird und der seinen Abbruch meldet.
struct HangingLoader {
    dropped: Arc<Mutex<bool>>,
}

struct DropFlag(Arc<Mutex<bool>>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        if let Ok(mut flag) = self.0.lock() {
            *flag = true;
        }
    }
}

impl LayerLoader for HangingLoader {
    fn feature_shape(&self) -> FeatureShape {
        FeatureShape::Point
    }

    fn init(&self, _source: LayerSource) -> BoxFuture<'static, LoadResult> {
        let flag = DropFlag(Arc::clone(&self.dropped));
        Box::pin(async move {
            let _flag = flag;
            future::pending::<()>().await;
            Ok(Vec::new())
        })
    }

    fn draw(
        &self,
        _source: LayerSource,
        _features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(future::ready(Ok(())))
    }

    fn save(
        &self,
        _source: LayerSource,
        _features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(future::ready(Ok(())))
    }
}

/// Loader, dessen `draw` nach einer Verzögerung einen Eintrag protokolliert.
struct RecordingLoader {
    name: &'static str,
    delay_ms: u64,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl LayerLoader for RecordingLoader {
    fn feature_shape(&self) -> FeatureShape {
        FeatureShape::Point
    }

    fn init(&self, _source: LayerSource) -> BoxFuture<'static, LoadResult> {
        Box::pin(future::ready(Ok(Vec::new())))
    }

    fn draw(
        &self,
        _source: LayerSource,
        _features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        let name = self.name;
        let delay = Duration::from_millis(self.delay_ms);
        let log = Arc::clone(&self.log);
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut entries) = log.lock() {
                entries.push(name);
            }
            Ok(())
        })
    }

    fn save(
        &self,
        _source: LayerSource,
        _features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(future::ready(Ok(())))
    }
}

/// Loader, dessen `init` immer fehlschlägt.
struct BrokenLoader;

impl LayerLoader for BrokenLoader {
    fn feature_shape(&self) -> FeatureShape {
        FeatureShape::Point
    }

    fn init(&self, source: LayerSource) -> BoxFuture<'static, LoadResult> {
        Box::pin(future::ready(Err(anyhow::anyhow!(
            "Quelle von {} fehlt",
            source.layer
        ))))
    }

    fn draw(
        &self,
        _source: LayerSource,
        _features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(future::ready(Ok(())))
    }

    fn save(
        &self,
        _source: LayerSource,
        _features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(future::ready(Err(anyhow::anyhow!("schreibgeschützt"))))
    }
}

fn three_level_tree() -> (LayerTree, LayerId, LayerId, LayerId) {
    let mut tree = LayerTree::new(&options());
    let root = tree
        .add_layer(None, LayerSpec::container(LayerMetadata::named("Projekt")))
        .expect("Wurzel");
    let group = tree
        .add_layer(
            Some(root),
            LayerSpec::container(LayerMetadata::named("Gruppe")),
        )
        .expect("Gruppe");
    let leaf = tree
        .add_layer(Some(group), memory_leaf("Punkte", Vec::new()))
        .expect("Blatt");
    (tree, root, group, leaf)
}

#[test]
fn test_add_layer_rejects_non_container_parent() {
    let (mut tree, _, _, leaf) = three_level_tree();
    let result = tree.add_layer(Some(leaf), memory_leaf("x", Vec::new()));

    assert!(matches!(result, Err(EditError::InvalidTopology(_))));
}

#[test]
fn test_add_layer_with_duplicate_id_fails() {
    let mut tree = LayerTree::new(&options());
    tree.add_layer(
        None,
        LayerSpec::container(LayerMetadata::named("a")).with_id(LayerId(7)),
    )
    .expect("erste ID");

    let result = tree.add_layer(
        None,
        LayerSpec::container(LayerMetadata::named("b")).with_id(LayerId(7)),
    );
    assert!(result.is_err());

    let next = tree
        .add_layer(None, LayerSpec::container(LayerMetadata::named("c")))
        .expect("automatische ID");
    assert_eq!(next, LayerId(8));
}

#[test]
fn test_post_order_visits_children_first() {
    let (tree, root, group, leaf) = three_level_tree();

    assert_eq!(
        tree.post_order(root).expect("Teilbaum"),
        vec![leaf, group, root]
    );
    assert_eq!(
        tree.pre_order(root).expect("Teilbaum"),
        vec![root, group, leaf]
    );
    assert_eq!(tree.ancestors(leaf).expect("Vorfahren"), vec![group, root]);
}

#[test]
fn test_changed_bubbles_to_every_ancestor() {
    let (mut tree, root, group, leaf) = three_level_tree();

    tree.set_changed(leaf, true).expect("setzen");

    for id in [leaf, group, root] {
        assert!(tree.layer(id).expect("Layer").is_changed());
    }
}

#[test]
fn test_changed_does_not_bubble_down() {
    let (mut tree, root, group, leaf) = three_level_tree();

    tree.set_changed(group, true).expect("setzen");

    assert!(tree.layer(root).expect("Layer").is_changed());
    assert!(!tree.layer(leaf).expect("Layer").is_changed());
}

#[test]
fn test_changed_bubble_publishes_one_event_per_layer() {
    let (mut tree, _, _, leaf) = three_level_tree();
    let mut rx = tree.subscribe();

    tree.set_changed(leaf, true).expect("setzen");
    tree.set_changed(leaf, true).expect("erneut setzen");

    let mut changed_events = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, ReplicationEvent::Changed { .. }) {
            changed_events += 1;
        }
    }
    assert_eq!(changed_events, 3);
}

#[tokio::test]
async fn test_load_populates_features_and_marks_changed() {
    let mut tree = LayerTree::new(&options());
    let leaf = tree
        .add_layer(
            None,
            memory_leaf("Punkte", vec![point_record(1.0), point_record(2.0)]),
        )
        .expect("Blatt");

    tree.load(leaf).await.expect("laden");

    let node = tree.layer(leaf).expect("Layer");
    assert_eq!(node.features().len(), 2);
    assert!(node.is_changed());
    assert!(node.history().checkpoint().is_some());
}

#[tokio::test]
async fn test_failed_load_leaves_layer_empty_and_siblings_intact() {
    let mut tree = LayerTree::new(&options());
    let root = tree
        .add_layer(None, LayerSpec::container(LayerMetadata::named("root")))
        .expect("Wurzel");
    let broken = tree
        .add_layer(
            Some(root),
            LayerSpec::leaf(LayerMetadata::named("kaputt"), Arc::new(BrokenLoader)),
        )
        .expect("Blatt");
    let healthy = tree
        .add_layer(Some(root), memory_leaf("ok", vec![point_record(0.0)]))
        .expect("Blatt");

    tree.load(root).await.expect("Laden scheitert nie am Baum");

    assert!(tree.layer(broken).expect("Layer").features().is_empty());
    assert_eq!(tree.layer(healthy).expect("Layer").features().len(), 1);
}

#[tokio::test]
async fn test_draw_twice_is_idempotent() {
    let mut tree = LayerTree::new(&options());
    let leaf = tree
        .add_layer(None, memory_leaf("Punkte", vec![point_record(1.0)]))
        .expect("Blatt");
    tree.load(leaf).await.expect("laden");

    tree.draw(leaf).await.expect("erster Draw");
    let first: Vec<FeatureId> = tree.layer(leaf).expect("Layer").materialized().to_vec();
    let generation = tree.layer(leaf).expect("Layer").draw_generation();

    tree.draw(leaf).await.expect("zweiter Draw");
    let node = tree.layer(leaf).expect("Layer");

    assert!(!node.is_changed());
    assert_eq!(node.materialized(), first.as_slice());
    assert_eq!(node.draw_generation(), generation);
}

#[tokio::test]
async fn test_container_draws_after_all_children() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let loader = |name: &'static str, delay_ms: u64| -> Arc<dyn LayerLoader> {
        Arc::new(RecordingLoader {
            name,
            delay_ms,
            log: Arc::clone(&log),
        })
    };

    let mut tree = LayerTree::new(&options());
    let container = tree
        .add_layer(
            None,
            LayerSpec {
                id: None,
                metadata: LayerMetadata::named("Container"),
                container: true,
                writeable: true,
                loader: Some(loader("container", 0)),
            },
        )
        .expect("Container");
    let slow = tree
        .add_layer(
            Some(container),
            LayerSpec::leaf(LayerMetadata::named("L1"), loader("L1", 30)),
        )
        .expect("L1");
    let fast = tree
        .add_layer(
            Some(container),
            LayerSpec::leaf(LayerMetadata::named("L2"), loader("L2", 1)),
        )
        .expect("L2");
    tree.set_changed(slow, true).expect("L1 geändert");
    tree.set_changed(fast, true).expect("L2 geändert");

    tree.draw(container).await.expect("Draw");

    let entries = log.lock().expect("Log").clone();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries.last(), Some(&"container"));
    assert!(!tree.layer(container).expect("Container").is_changed());
}

#[tokio::test]
async fn test_destroy_cancels_pending_load() {
    let dropped = Arc::new(Mutex::new(false));
    let mut tree = LayerTree::new(&options());
    let root = tree
        .add_layer(None, LayerSpec::container(LayerMetadata::named("root")))
        .expect("Wurzel");
    let leaf = tree
        .add_layer(
            Some(root),
            LayerSpec::leaf(
                LayerMetadata::named("hängt"),
                Arc::new(HangingLoader {
                    dropped: Arc::clone(&dropped),
                }),
            ),
        )
        .expect("Blatt");
    let mut rx = tree.subscribe();

    tree.begin_load(leaf).expect("Load starten");
    assert!(tree.is_loading(leaf));
    tokio::task::yield_now().await;

    tree.destroy(root).await.expect("zerstören");

    assert!(*dropped.lock().expect("Flag"));
    assert!(tree.is_empty());
    assert!(tree.roots().is_empty());

    let mut despawned = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ReplicationEvent::LayerDespawned { layer } = event {
            despawned.push(layer);
        }
    }
    assert_eq!(despawned, vec![leaf, root]);
}

#[tokio::test]
async fn test_save_failure_is_surfaced_and_keeps_changed() {
    let mut tree = LayerTree::new(&options());
    let leaf = tree
        .add_layer(
            None,
            LayerSpec::leaf(LayerMetadata::named("kaputt"), Arc::new(BrokenLoader)),
        )
        .expect("Blatt");
    tree.insert_feature(leaf, &point_record(3.0))
        .expect("Feature");

    let result = tree.save(leaf).await;

    assert!(matches!(result, Err(EditError::SaveFailure { layer, .. }) if layer == leaf));
    let node = tree.layer(leaf).expect("Layer");
    assert!(node.is_changed());
    assert!(node.last_save_error().is_some());
}

#[tokio::test]
async fn test_restore_checkpoint_discards_edits() {
    let mut tree = LayerTree::new(&options());
    let leaf = tree
        .add_layer(None, memory_leaf("Punkte", vec![point_record(1.0)]))
        .expect("Blatt");
    tree.load(leaf).await.expect("laden");
    tree.draw(leaf).await.expect("draw");

    tree.insert_feature(leaf, &point_record(9.0))
        .expect("Feature");
    assert_eq!(tree.layer(leaf).expect("Layer").features().len(), 2);

    assert!(tree.restore_checkpoint(leaf).expect("Rollback"));
    tree.draw(leaf).await.expect("Redraw");

    let node = tree.layer(leaf).expect("Layer");
    assert_eq!(node.features().len(), 1);
    assert!(!node.is_changed());
}

#[test]
fn test_undo_and_redo_feature_insert() {
    let mut tree = LayerTree::new(&options());
    let leaf = tree
        .add_layer(None, memory_leaf("Punkte", Vec::new()))
        .expect("Blatt");
    tree.insert_feature(leaf, &point_record(1.0))
        .expect("Feature");

    assert!(tree.undo(leaf).expect("undo"));
    assert!(tree.layer(leaf).expect("Layer").features().is_empty());

    assert!(tree.redo(leaf).expect("redo"));
    assert_eq!(tree.layer(leaf).expect("Layer").features().len(), 1);
    assert!(!tree.redo(leaf).expect("kein weiteres redo"));
}

#[test]
fn test_get_closest_searches_all_descendants() {
    let mut tree = LayerTree::new(&options());
    let root = tree
        .add_layer(None, LayerSpec::container(LayerMetadata::named("root")))
        .expect("Wurzel");
    let a = tree
        .add_layer(Some(root), memory_leaf("a", Vec::new()))
        .expect("a");
    let b = tree
        .add_layer(Some(root), memory_leaf("b", Vec::new()))
        .expect("b");
    let far = tree.insert_feature(a, &point_record(0.0)).expect("a0");
    let near = tree.insert_feature(b, &point_record(10.0)).expect("b10");

    let (layer, hit) = tree
        .get_closest(root, Vec3::new(9.0, 0.0, 0.0), &HashSet::new())
        .expect("Suche")
        .expect("Treffer");
    assert_eq!((layer, hit.feature_id), (b, near));

    let exclude: HashSet<FeatureId> = [near].into_iter().collect();
    let (layer, hit) = tree
        .get_closest(root, Vec3::new(9.0, 0.0, 0.0), &exclude)
        .expect("Suche")
        .expect("Treffer");
    assert_eq!((layer, hit.feature_id), (a, far));
}

#[test]
fn test_container_rejects_features() {
    let (mut tree, root, _, _) = three_level_tree();
    assert!(matches!(
        tree.insert_feature(root, &point_record(0.0)),
        Err(EditError::InvalidTopology(_))
    ));
}

#[tokio::test]
async fn test_persisted_feature_ids_stay_unique_across_layers() {
    let mut tree = LayerTree::new(&options());
    let root = tree
        .add_layer(None, LayerSpec::container(LayerMetadata::named("root")))
        .expect("Wurzel");
    let mut record = point_record(0.0);
    record.id = Some(FeatureId(1));
    let a = tree
        .add_layer(Some(root), memory_leaf("a", vec![record.clone()]))
        .expect("a");
    let b = tree
        .add_layer(Some(root), memory_leaf("b", vec![record]))
        .expect("b");

    tree.load(root).await.expect("laden");

    let ids_a: Vec<FeatureId> = tree.layer(a).expect("a").features().keys().copied().collect();
    let ids_b: Vec<FeatureId> = tree.layer(b).expect("b").features().keys().copied().collect();
    assert_eq!(ids_a.len(), 1);
    assert_eq!(ids_b.len(), 1);
    assert_ne!(ids_a[0], ids_b[0]);

    // Ein erneutes Laden behält die eigene ID
    tree.load(a).await.expect("neu laden");
    let reloaded: Vec<FeatureId> = tree.layer(a).expect("a").features().keys().copied().collect();
    assert_eq!(reloaded, ids_a);
}

/// Loader, der mitzählt, wie oft der Layer einen Checkpoint meldet.
struct CheckpointCounter {
    calls: Arc<Mutex<usize>>,
}

impl LayerLoader for CheckpointCounter {
    fn feature_shape(&self) -> FeatureShape {
        FeatureShape::Point
    }

    fn init(&self, _source: LayerSource) -> BoxFuture<'static, LoadResult> {
        Box::pin(future::ready(Ok(vec![point_record(1.0)])))
    }

    fn draw(
        &self,
        _source: LayerSource,
        _features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(future::ready(Ok(())))
    }

    fn save(
        &self,
        _source: LayerSource,
        _features: Vec<FeatureRecord>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(future::ready(Ok(())))
    }

    fn checkpoint(&self, _source: &LayerSource) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
    }
}

#[tokio::test]
async fn test_loader_is_told_about_checkpoints() {
    let calls = Arc::new(Mutex::new(0));
    let mut tree = LayerTree::new(&options());
    let leaf = tree
        .add_layer(
            None,
            LayerSpec::leaf(
                LayerMetadata::named("Punkte"),
                Arc::new(CheckpointCounter {
                    calls: Arc::clone(&calls),
                }),
            ),
        )
        .expect("Blatt");

    tree.load(leaf).await.expect("laden");
    assert_eq!(*calls.lock().expect("Zähler"), 1);

    tree.insert_feature(leaf, &point_record(2.0)).expect("Feature");
    tree.save(leaf).await.expect("speichern");
    assert_eq!(*calls.lock().expect("Zähler"), 2);
}
