use approx::assert_relative_eq;
use gis_layer_editor::{
    spawn_authority, EditorOptions, EditorState, FeatureShape, GeometryRecord, LayerId,
    ProjectDescription, Replica,
};
use glam::Vec3;
use std::path::PathBuf;

const FEATURES: &str = r#"{
    "features": [
        {
            "geometry": {
                "type": "polygon",
                "ring": [[0,0,0], [4,0,0], [4,3,0], [0,3,0], [0,0,0]],
                "holes": [[[1,1,0], [2,1,0], [2,2,0], [1,1,0]]]
            },
            "properties": {"nutzung": "Park"}
        },
        {
            "geometry": {"type": "polygon", "ring": [[10,0,0], [12,0,0], [11,2,0]]},
            "style": 0
        }
    ]
}"#;

const PROJECT: &str = r#"{
    "name": "Grünflächen",
    "layers": [
        {
            "id": 1,
            "display_name": "Flächen",
            "shape": "polygon",
            "source": "daten/flaechen.json",
            "symbology": [{"name": "Wiese", "color": [0.2, 0.8, 0.2, 1.0]}]
        }
    ]
}"#;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "gis_layer_editor_{}_{}",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(dir.join("daten")).expect("Testverzeichnis anlegen");
    dir
}

fn ring_of(geometry: &GeometryRecord) -> (&[Vec3], usize) {
    match geometry {
        GeometryRecord::Polygon { ring, holes } => (ring.as_slice(), holes.len()),
        other => panic!("Unerwartete Geometrie: {other:?}"),
    }
}

#[tokio::test]
async fn test_edit_save_and_reload_reproduces_geometry() {
    let dir = scratch_dir("roundtrip");
    std::fs::write(dir.join("daten/flaechen.json"), FEATURES).expect("Features schreiben");
    let project = ProjectDescription::from_json(PROJECT).expect("Projekt");
    let layer = LayerId(1);

    // Erste Sitzung: laden, Vertex einfügen, einchecken (= speichern)
    let options = EditorOptions::default();
    let tree = project.build_tree(&dir, &options).expect("Baum");
    let (handle, authority) = spawn_authority(EditorState::with_tree(tree, options.clone()));
    let mut x = Replica::connect(handle.clone()).await.expect("Replika");

    x.load(layer).await.expect("Load");
    x.sync().await.expect("Sync");
    let mirrored = x.mirror().layer(layer).expect("Flächen");
    assert_eq!(mirrored.shape, FeatureShape::Polygon);
    assert_eq!(mirrored.features.len(), 2);
    let (&park, park_record) = mirrored.features.first().expect("Park");
    // Duplikat-Startpunkt wurde beim Schliessen verworfen
    assert_eq!(ring_of(&park_record.geometry).0.len(), 5);

    x.start_session().await.expect("Session");
    x.checkout(layer).await.expect("Checkout");
    x.add_vertex(layer, park, Vec3::new(2.0, -0.5, 0.0))
        .await
        .expect("Vertex");
    x.stop_and_save().await.expect("Speichern");
    x.sync().await.expect("Sync");
    let before = x.mirror().layer(layer).expect("Flächen").features.clone();
    assert!(!x.mirror().layer(layer).expect("Flächen").changed);

    handle.shutdown().await.expect("Shutdown");
    authority.await.expect("Authority");

    // Zweite Sitzung: frischer Baum aus derselben Datei
    let tree = project.build_tree(&dir, &options).expect("Baum");
    let (handle, _authority) = spawn_authority(EditorState::with_tree(tree, options));
    let mut y = Replica::connect(handle.clone()).await.expect("Replika");
    y.load(layer).await.expect("Load");
    y.sync().await.expect("Sync");
    let after = &y.mirror().layer(layer).expect("Flächen").features;

    assert_eq!(after.len(), before.len());
    for ((id_before, a), (id_after, b)) in before.iter().zip(after.iter()) {
        assert_eq!(id_before, id_after, "Feature-IDs bleiben stabil");
        assert_eq!(a.style, b.style);
        assert_eq!(a.properties, b.properties);

        let (ring_a, holes_a) = ring_of(&a.geometry);
        let (ring_b, holes_b) = ring_of(&b.geometry);
        assert_eq!(holes_a, holes_b);
        assert_eq!(ring_a.len(), ring_b.len());
        for (pa, pb) in ring_a.iter().zip(ring_b) {
            assert_relative_eq!(pa.x, pb.x, epsilon = 1e-5);
            assert_relative_eq!(pa.y, pb.y, epsilon = 1e-5);
            assert_relative_eq!(pa.z, pb.z, epsilon = 1e-5);
        }
    }
    let (park_ring, _) = ring_of(&after[&park].geometry);
    // 4 Ring-Vertices + eingefügter Vertex + geschlossener Startpunkt
    assert_eq!(park_ring.len(), 6);

    handle.shutdown().await.expect("Shutdown");
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_missing_feature_file_leaves_layer_empty() {
    let dir = scratch_dir("missing");
    let project = ProjectDescription::from_json(PROJECT).expect("Projekt");
    let options = EditorOptions::default();
    let tree = project.build_tree(&dir, &options).expect("Baum");
    let (handle, authority) = spawn_authority(EditorState::with_tree(tree, options));
    let mut x = Replica::connect(handle.clone()).await.expect("Replika");

    x.load(LayerId(1)).await.expect("Load ist fail-quiet");
    x.draw(LayerId(1)).await.expect("Draw");
    x.sync().await.expect("Sync");

    let layer = x.mirror().layer(LayerId(1)).expect("Flächen");
    assert!(layer.features.is_empty());
    assert!(!layer.changed);

    handle.shutdown().await.expect("Shutdown");
    let state = authority.await.expect("Authority");
    assert_eq!(state.request_log.rejected(), 0);
    let _ = std::fs::remove_dir_all(&dir);
}
