use std::{fs, path::Path};

use diffusion_pool_common::{normalize_path, FileLoader, TokenSource, WeightSource};

#[test]
fn normalizes_lexically() {
    assert_eq!(
        normalize_path(Path::new("./weights/a/../b/./c")),
        Path::new("weights/b/c")
    );
    assert_eq!(normalize_path(Path::new("/x/../../y")), Path::new("/y"));
    assert_eq!(normalize_path(Path::new("../up")), Path::new("../up"));
    assert_eq!(normalize_path(Path::new("a/..")), Path::new("."));
}

#[test]
fn existing_relative_local_path_is_used() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    fs::create_dir_all(root.path().join("sd-v1-5"))?;

    let source = WeightSource::resolve(root.path(), "org/sd", Some("./sd-v1-5"));
    assert_eq!(source, WeightSource::Local(root.path().join("sd-v1-5")));
    assert!(source.is_local());
    Ok(())
}

#[test]
fn existing_absolute_local_path_ignores_root() -> anyhow::Result<()> {
    let weights = tempfile::tempdir()?;
    let source = WeightSource::resolve(
        "/definitely/not/here",
        "org/sd",
        weights.path().to_str(),
    );
    assert_eq!(source, WeightSource::Local(normalize_path(weights.path())));
    Ok(())
}

#[test]
fn missing_local_path_falls_back_to_remote() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let source = WeightSource::resolve(root.path(), "org/sd", Some("missing"));
    assert_eq!(source, WeightSource::Remote("org/sd".to_string()));

    let source = WeightSource::resolve(root.path(), "org/sd", None);
    assert_eq!(source, WeightSource::Remote("org/sd".to_string()));
    Ok(())
}

#[test]
fn local_loader_reads_files() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    fs::create_dir_all(root.path().join("scheduler"))?;
    fs::write(root.path().join("model_index.json"), "{}")?;
    fs::write(
        root.path().join("scheduler/scheduler_config.json"),
        r#"{"_class_name": "DDIMScheduler"}"#,
    )?;

    let loader = FileLoader::from_weight_source(
        &WeightSource::Local(root.path().to_path_buf()),
        true,
        &TokenSource::None,
        None,
    )?;
    assert_eq!(
        loader.read_file("model_index.json")?,
        root.path().join("model_index.json")
    );
    assert!(loader
        .read_to_string("scheduler/scheduler_config.json")?
        .contains("DDIMScheduler"));
    assert!(loader.read_file("unet/config.json").is_err());
    Ok(())
}
