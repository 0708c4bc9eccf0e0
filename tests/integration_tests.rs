//! Integration tests for fbcompose
//!
//! These exercise the public API without an X display: configuration files, plugin
//! lookup, texture partitioning and the pure parts of the effects.

use std::fs;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use anyhow::Result;
use tempfile::tempdir;

use fbcompose::config::{CompositorConfig, CompositorMode};
use fbcompose::damage::{Rect, ScreenDamage};
use fbcompose::effects::fade::{FadeTracker, FADE_TICK};
use fbcompose::effects::preview::{preview_geometry, PreviewSettings};
use fbcompose::opengl::partition::{partition_space, Borders};
use fbcompose::opengl::resources::{ndc_to_rect, rect_to_ndc};
use fbcompose::plugin::{PluginSearchPaths, PluginSpec, PluginType};
use fbcompose::tick_tracker::TickTracker;

/// A config file names plugins and a user plugin directory; both reach the search path.
#[test]
fn test_config_file_drives_plugin_lookup() -> Result<()> {
    let dir = tempdir()?;
    let plugin_dir = dir.path().join("plugins");
    let config_path = dir.path().join("fbcompose.toml");
    fs::write(
        &config_path,
        format!(
            "[general]\nmode = \"xrender\"\nplugins = [\"fade\", \"mirror 2\"]\n\n\
             [plugin_paths]\nuser_dir = \"{}\"\n",
            plugin_dir.display()
        ),
    )?;

    let config = CompositorConfig::load(&config_path)?;
    assert_eq!(config.general.mode, CompositorMode::XRender);

    let specs = config.plugin_specs()?;
    assert_eq!(specs[1], "mirror 2".parse::<PluginSpec>()?);

    let candidates = config
        .search_paths()?
        .candidates("mirror", PluginType::XRender);
    assert!(candidates.contains(&plugin_dir.join("xrender").join("libmirror.so")));
    assert_eq!(candidates.last(), Some(&"libmirror.so".into()));
    Ok(())
}

#[test]
fn test_search_paths_without_directories_fall_back_to_loader() {
    let paths = PluginSearchPaths {
        build_dir: None,
        user_dir: None,
        prefix_dir: None,
    };
    assert_eq!(
        paths.candidates("fade", PluginType::OpenGl),
        vec![std::path::PathBuf::from("libfade.so")]
    );
}

/// 1920x1080 with a 1024 limit gives four tiles with the expected sizes and borders.
#[test]
fn test_full_hd_partition() {
    let partition = partition_space(1920, 1080, NonZeroU32::new(1024).unwrap());
    let sizes: Vec<_> = partition
        .tiles
        .iter()
        .map(|t| (t.rect.width, t.rect.height))
        .collect();
    assert_eq!(sizes, vec![(1024, 1024), (896, 1024), (1024, 56), (896, 56)]);

    let top_left = partition.tile(0, 0).unwrap();
    assert_eq!(top_left.borders, Borders::NORTH | Borders::WEST);
    let bottom_right = partition.tile(1, 1).unwrap();
    assert_eq!(bottom_right.borders, Borders::SOUTH | Borders::EAST);
}

#[test]
fn test_window_rect_survives_ndc() {
    let rect = Rect::new(100, 50, 640, 480);
    let ndc = rect_to_ndc(rect, 1920, 1080);
    assert_eq!(ndc_to_rect(&ndc, 1920, 1080), rect);
}

#[test]
fn test_damage_accumulates_until_cleared() {
    let mut damage = ScreenDamage::new();
    damage.add(Rect::new(0, 0, 10, 10));
    damage.add(Rect::new(100, 100, 10, 10));
    assert_eq!(damage.rects().len(), 2);
    assert_eq!(damage.bounds(), Some(Rect::new(0, 0, 110, 110)));

    damage.clear();
    assert!(damage.is_empty());
}

/// Fade ticks and render ticks come from the same tracker type; a full fade takes about
/// a quarter second no matter how often it is polled.
#[test]
fn test_fade_in_runs_for_a_quarter_second() {
    let start = Instant::now();
    let mut ticks = TickTracker::new(FADE_TICK);
    ticks.start_at(start);
    assert_eq!(ticks.new_elapsed_ticks_at(start + Duration::from_millis(250)), 255);

    let mut fades: FadeTracker<()> = FadeTracker::new();
    let rect = Rect::new(10, 10, 100, 100);
    fades.window_mapped_at(0x42, rect, start);
    assert!(fades.is_active());

    let finished = fades.step_at(start + Duration::from_millis(300));
    assert_eq!(finished, vec![rect]);
    assert!(!fades.is_active());
}

/// Unmapping before the first fade step starts the fade-out fully opaque.
#[test]
fn test_unmap_before_first_fade_step() {
    let start = Instant::now();
    let rect = Rect::new(0, 0, 50, 50);
    let mut fades = FadeTracker::new();
    fades.window_mapped_at(0x42, rect, start);
    fades.window_unmapped_at(0x42, rect, "content", start);

    assert_eq!(fades.fade_in_alpha(0x42), None);
    assert_eq!(fades.fade_outs().len(), 1);
    assert_eq!(fades.fade_outs()[0].alpha, 255);
}

#[test]
fn test_preview_on_second_head() {
    let head = Rect::new(1920, 0, 1280, 1024);
    let settings = PreviewSettings::default();
    let geometry = preview_geometry(800, 600, (3190, 5), head, &settings);

    assert_eq!((geometry.width, geometry.height), (150, 113));
    assert!(head.contains_rect(&geometry));
}
