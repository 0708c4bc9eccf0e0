//! Unit tests for configuration loading and validation

use super::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = CompositorConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.general.mode, CompositorMode::OpenGl);
    assert_eq!(config.general.refresh_rate, 60);
    assert!(config.opengl.prefer_double_buffer);
    assert_eq!(config.xrender.preview_filter, "fast");
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("fbcompose.toml");
    fs::write(
        &path,
        r#"
[general]
mode = "xrender"
refresh_rate = 75
display = ":1"
plugins = ["fade", "preview 300 200"]

[x11]
ignore_errors = true

[opengl]
max_texture_size = 2048

[xrender]
preview_filter = "best"

[plugin_paths]
user_dir = "/opt/plugins"
"#,
    )?;

    let config = CompositorConfig::load(&path)?;
    assert_eq!(config.general.mode, CompositorMode::XRender);
    assert_eq!(config.general.refresh_rate, 75);
    assert_eq!(config.general.display.as_deref(), Some(":1"));
    assert!(config.x11.ignore_errors);
    assert!(!config.x11.synchronize);
    assert_eq!(config.opengl.max_texture_size, Some(2048));
    assert!(config.opengl.prefer_double_buffer);
    assert_eq!(config.xrender.preview_filter, "best");

    let specs = config.plugin_specs()?;
    assert_eq!(specs[0], PluginSpec::new("fade"));
    assert_eq!(specs[1].args, vec!["300", "200"]);

    let paths = config.search_paths()?;
    assert_eq!(paths.user_dir, Some(PathBuf::from("/opt/plugins")));
    Ok(())
}

#[test]
fn test_repeated_plugin_is_created_once() -> Result<()> {
    let mut config = CompositorConfig::default();
    config.general.plugins = vec![
        "fade".to_string(),
        "preview 300 200".to_string(),
        "fade".to_string(),
        "preview 100 100".to_string(),
    ];

    let specs = config.plugin_specs()?;
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0], PluginSpec::new("fade"));
    assert_eq!(specs[1].args, vec!["300", "200"]);
    Ok(())
}

#[test]
fn test_missing_sections_take_defaults() -> Result<()> {
    let config: CompositorConfig = toml::from_str("[general]\nmode = \"serverauto\"\n")?;
    assert_eq!(config.general.mode, CompositorMode::ServerAuto);
    assert_eq!(config.general.refresh_rate, 60);
    assert_eq!(config.xrender, XRenderConfig::default());
    Ok(())
}

#[test]
fn test_invalid_values_are_rejected() {
    let mut config = CompositorConfig::default();
    config.general.refresh_rate = 0;
    assert!(config.validate().is_err());

    let mut config = CompositorConfig::default();
    config.general.refresh_rate = 1001;
    assert!(config.validate().is_err());

    let mut config = CompositorConfig::default();
    config.opengl.max_texture_size = Some(32);
    assert!(config.validate().is_err());

    let mut config = CompositorConfig::default();
    config.xrender.preview_filter = "blurry".to_string();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("blurry"));

    let mut config = CompositorConfig::default();
    config.general.plugins = vec!["   ".to_string()];
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_file_reports_path() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[general]\nrefresh_rate = 5000\n")?;

    let err = CompositorConfig::load(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("broken.toml"));

    fs::write(&path, "[general\n")?;
    assert!(CompositorConfig::load(&path).is_err());
    Ok(())
}

#[test]
fn test_missing_file_is_an_error() {
    assert!(CompositorConfig::load("/nonexistent/fbcompose.toml").is_err());
}

#[test]
fn test_save_then_load() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("saved.toml");
    let mut config = CompositorConfig::default();
    config.general.plugins = vec!["fade".to_string()];
    config.opengl.max_texture_size = Some(4096);

    config.save(&path)?;
    assert_eq!(CompositorConfig::load(&path)?, config);
    Ok(())
}

#[test]
fn test_tilde_expansion() -> Result<()> {
    let home = std::env::var("HOME")?;
    assert_eq!(
        expand_tilde(Path::new("~/.fluxbox/fbcompose.toml"))?,
        Path::new(&home).join(".fluxbox/fbcompose.toml")
    );
    assert_eq!(expand_tilde(Path::new("/etc/x.toml"))?, PathBuf::from("/etc/x.toml"));
    Ok(())
}
