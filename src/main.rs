//! GIS Layer Host.
//!
//! Headless Authority: lädt eine Projektbeschreibung, startet den
//! Authority-Actor, lädt und zeichnet alle Layer und fährt wieder herunter.

use std::path::{Path, PathBuf};

use anyhow::Context;
use gis_layer_editor::{
    spawn_authority, EditorOptions, EditorState, LayerId, ProjectDescription, Replica,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    HostRunner::run().await
}

struct HostRunner;

impl HostRunner {
    async fn run() -> anyhow::Result<()> {
        // Logger initialisieren
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();

        log::info!("GIS Layer Host v{} startet...", env!("CARGO_PKG_VERSION"));

        let project_path = std::env::args_os()
            .nth(1)
            .map(PathBuf::from)
            .context("Aufruf: gis-layer-host <projekt.json>")?;

        // Optionen aus TOML laden (oder Standardwerte)
        let options = EditorOptions::load_from_file(&EditorOptions::config_path());

        let project = ProjectDescription::read(&project_path).await?;
        let base_dir = project_path.parent().unwrap_or_else(|| Path::new("."));
        let tree = project.build_tree(base_dir, &options)?;

        let (handle, authority) = spawn_authority(EditorState::with_tree(tree, options));
        let mut host = Replica::connect(handle.clone()).await?;

        let roots = host.mirror().roots().to_vec();
        for &root in &roots {
            host.load(root).await?;
        }
        for &root in &roots {
            host.draw(root).await?;
        }

        host.sync().await?;
        for &root in &roots {
            Self::log_layer(&host, root, 0);
        }

        handle.shutdown().await?;
        let state = authority.await.context("Authority-Task abgebrochen")?;
        log::info!(
            "Projekt '{}' beendet: {} Requests, davon {} abgelehnt",
            project.name,
            state.request_log.len(),
            state.request_log.rejected()
        );
        Ok(())
    }

    fn log_layer(host: &Replica, id: LayerId, depth: usize) {
        let Some(layer) = host.mirror().layer(id) else {
            return;
        };
        log::info!(
            "{:indent$}{} {} ({} Features{})",
            "",
            layer.id,
            layer.metadata.display_name,
            layer.features.len(),
            if layer.changed { ", geändert" } else { "" },
            indent = depth * 2
        );
        for &child in &layer.children {
            Self::log_layer(host, child, depth + 1);
        }
    }
}
