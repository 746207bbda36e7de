extern crate log;
pub mod config;
pub mod editor;
pub mod error;
pub mod gateway;
pub mod geofile;
pub mod store;
pub mod style;
pub mod sync;
use crate::config::PortalConfig;
use crate::editor::{AttributeEditor, StyleEditor};
use crate::gateway::{HttpGateway, RemoteGateway};
use crate::geofile::feature::{FeatureId, LayerDescriptor, LayerId};
use crate::store::FeatureStore;
use crate::style::presets::{dash_label, is_color_preset};
use crate::style::{resolve, LineStyle, PolygonStyle, StyleRecord};
use crate::sync::{CheckedLayerSet, ClickTarget, LayerEvent, LayerSyncEngine, RecordingSurface};
use anyhow::anyhow;
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Load, inspect and restyle the layers of a GIS portal.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input config file.
    #[arg(short, long)]
    config_filepath: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the layer catalog, grouped by division.
    Layers,
    /// Load the layers checked in the config plus the ones given here.
    Load {
        #[arg(short, long)]
        layer: Vec<String>,
    },
    /// Show the attributes and style of one feature.
    Inspect {
        #[arg(short, long)]
        layer: String,
        #[arg(short, long)]
        feature: i64,
    },
    /// Change the style of one feature, e.g. `--set fillColor=#ff0000`.
    Restyle {
        #[arg(short, long)]
        layer: String,
        #[arg(short, long)]
        feature: i64,
        #[arg(short, long = "set", value_parser = parse_assignment)]
        assignments: Vec<(String, String)>,
    },
    /// Change attribute values of one feature, e.g. `--set col1=market`.
    Edit {
        #[arg(short, long)]
        layer: String,
        #[arg(short, long)]
        feature: i64,
        #[arg(short, long = "set", value_parser = parse_assignment)]
        assignments: Vec<(String, String)>,
    },
}

fn parse_assignment(text: &str) -> Result<(String, String), String> {
    match text.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got '{}'", text)),
    }
}

type Engine = LayerSyncEngine<HttpGateway, RecordingSurface>;

fn find_layer<'a>(catalog: &'a [LayerDescriptor], layer_id: &LayerId) -> anyhow::Result<&'a LayerDescriptor> {
    catalog
        .iter()
        .find(|layer| &layer.id == layer_id)
        .ok_or_else(|| anyhow!("Layer {} is not in the catalog", layer_id))
}

/// Check `layer_ids` and wait until every load has completed.
async fn mount_layers(
    engine: &mut Engine,
    catalog: &[LayerDescriptor],
    layer_ids: &[LayerId],
) -> anyhow::Result<()> {
    let mut checked = CheckedLayerSet::new();
    for layer_id in layer_ids {
        let layer = find_layer(catalog, layer_id)?;
        checked.check(layer.id.clone(), layer.geometry_kind);
    }
    let report = engine.set_checked(checked);
    log::info!("Loading {} layers", report.started.len());
    let bar = ProgressBar::new(report.started.len() as u64);
    while let Some(event) = engine.next_event().await {
        match &event {
            LayerEvent::Failed { layer_id, .. } => {
                log::warn!("Continuing without layer {}", layer_id)
            }
            // Still loading.
            LayerEvent::Reloading { .. } => continue,
            _ => {}
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    Ok(())
}

fn export_layers(engine: &Engine, export_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(export_dir)?;
    for layer_id in engine.rendered_layers() {
        let (Some(kind), Some(features)) =
            (engine.layer_kind(&layer_id), engine.store().cached(&layer_id))
        else {
            continue;
        };
        let output_filepath = export_dir.join(format!("{}.geojson", layer_id));
        log::info!(
            "Writing {} features of layer {} to {:?}",
            features.len(),
            layer_id,
            &output_filepath
        );
        geofile::geojson::write_features_to_geojson(kind, &features, &output_filepath)?;
    }
    Ok(())
}

fn print_catalog(catalog: &[LayerDescriptor]) {
    let mut divisions: BTreeMap<&str, Vec<&LayerDescriptor>> = BTreeMap::new();
    for layer in catalog {
        divisions
            .entry(layer.division.as_deref().unwrap_or("-"))
            .or_default()
            .push(layer);
    }
    for (division, layers) in divisions {
        println!("{}", division);
        for layer in layers {
            println!(
                "  {:<24} {:<8} {}",
                layer.id, layer.geometry_kind, layer.display_name
            );
        }
    }
}

async fn try_main() -> anyhow::Result<()> {
    let args = Args::try_parse()?;
    let config = PortalConfig::from_file(&args.config_filepath)?;

    let gateway = Arc::new(HttpGateway::new(&config.gateway)?);
    let store = Arc::new(FeatureStore::new(Arc::clone(&gateway)));
    let mut engine: Engine = LayerSyncEngine::new(store, RecordingSurface::new());
    let catalog = gateway.list_layers().await?;
    log::info!("Read {} layers from the catalog", catalog.len());

    match args.command {
        Command::Layers => print_catalog(&catalog),
        Command::Load { layer } => {
            let mut layer_ids = config.checked_layers.clone();
            layer_ids.extend(layer.into_iter().map(LayerId));
            mount_layers(&mut engine, &catalog, &layer_ids).await?;
            for layer_id in engine.rendered_layers() {
                let num_features = engine
                    .surface()
                    .layer(&layer_id)
                    .map_or(0, |layer| layer.features.len());
                println!("{}: {} features", layer_id, num_features);
            }
            for notice in engine.notices() {
                eprintln!("{}", notice.message);
            }
            if let Some(export_dir) = &config.export_dir {
                export_layers(&engine, export_dir)?;
            }
            log::info!("{:?}", engine.store().stats());
        }
        Command::Inspect { layer, feature } => {
            let layer = find_layer(&catalog, &LayerId(layer))?;
            let record = engine
                .resolve_click(&ClickTarget {
                    layer_id: layer.id.clone(),
                    feature_id: FeatureId(feature),
                })
                .await?;
            let mut attributes: Vec<_> = record.attributes.iter().collect();
            attributes.sort_by(|a, b| a.0.cmp(b.0));
            for (name, value) in attributes {
                println!("{}: {}", name, value);
            }
            let style = resolve(layer.geometry_kind, record.style.as_ref());
            println!("style: {}", serde_json::to_string_pretty(&style.to_json())?);
            match &style {
                StyleRecord::Point(point) if !is_color_preset(&point.icon_color) => {
                    println!("icon color {} is not in the palette", point.icon_color)
                }
                StyleRecord::Line(LineStyle { dash_pattern, .. })
                | StyleRecord::Polygon(PolygonStyle { dash_pattern, .. }) => {
                    if let Some(label) = dash_label(dash_pattern) {
                        println!("dash: {}", label);
                    }
                }
                StyleRecord::Point(_) => {}
            }
        }
        Command::Restyle {
            layer,
            feature,
            assignments,
        } => {
            let layer_id = LayerId(layer);
            mount_layers(&mut engine, &catalog, &[layer_id.clone()]).await?;
            let mut editor = StyleEditor::for_feature(&engine, &layer_id, FeatureId(feature))
                .ok_or_else(|| anyhow!("Feature {} of layer {} is not drawn", feature, layer_id))?;
            for (field, value) in &assignments {
                editor.set_text(field, value)?;
            }
            editor.commit(&mut engine).await?;
            println!(
                "style: {}",
                serde_json::to_string_pretty(&editor.draft().to_json())?
            );
        }
        Command::Edit {
            layer,
            feature,
            assignments,
        } => {
            let layer = find_layer(&catalog, &LayerId(layer))?;
            let record = engine
                .resolve_click(&ClickTarget {
                    layer_id: layer.id.clone(),
                    feature_id: FeatureId(feature),
                })
                .await?;
            let mut editor = AttributeEditor::edit(&record);
            for (name, value) in assignments {
                editor.set(&name, value);
            }
            editor.commit(&mut engine).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    env_logger::init();
    if let Err(e) = try_main().await {
        eprintln!("Error: {:?}", e);
        std::process::exit(1)
    }
}
