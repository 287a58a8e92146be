#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::{ImageFormat, Rgba, RgbaImage};
use kidivis_api::DesignKind;
use kidivis_render_api::{RenderError, RenderRequest, Renderer};
use kidivis_renderers::{CommandRenderer, CommandSettings};
use tempfile::TempDir;

/// Settings that run `sh <script> {input} {output}` for both kinds.
fn script_settings(script: &Path, timeout_secs: u64) -> CommandSettings {
    let args = vec![
        script.to_string_lossy().into_owned(),
        "{input}".to_owned(),
        "{output}".to_owned(),
    ];
    CommandSettings {
        program: "sh".into(),
        pcb_args: args.clone(),
        schematic_args: args,
        version_args: vec!["-c".into(), "echo 'renderer 4.2.0'".into()],
        timeout_secs,
        ..CommandSettings::default()
    }
}

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("render.sh");
    fs::write(&path, body).expect("write script");
    path
}

/// The "design file" handed to the copy script is itself a PNG.
fn write_fixture_png(path: &Path) -> RgbaImage {
    let mut image = RgbaImage::from_pixel(6, 4, Rgba([255, 255, 255, 255]));
    image.put_pixel(2, 1, Rgba([0, 0, 0, 255]));
    image
        .save_with_format(path, ImageFormat::Png)
        .expect("save fixture png");
    image
}

fn request(temp: &TempDir, input: &Path, kind: DesignKind) -> RenderRequest {
    let output_dir = temp.path().join("out");
    fs::create_dir_all(&output_dir).expect("create output dir");
    RenderRequest::new(input, output_dir, kind)
}

#[test]
fn renders_image_written_by_program() {
    let temp = TempDir::new().expect("tempdir");
    let script = write_script(temp.path(), "cp \"$1\" \"$2\"\n");
    let input = temp.path().join("board.kicad_pcb");
    let expected = write_fixture_png(&input);

    let renderer = CommandRenderer::new(script_settings(&script, 10));
    assert!(renderer.version().starts_with("renderer 4.2.0+"));

    let raster = renderer
        .render(&request(&temp, &input, DesignKind::Pcb))
        .expect("render succeeds");
    assert_eq!(raster.image, expected);
    assert_eq!((raster.origin_x, raster.origin_y), (0, 0));
}

#[test]
fn origin_sidecar_positions_raster() {
    let temp = TempDir::new().expect("tempdir");
    let script = write_script(
        temp.path(),
        "cp \"$1\" \"$2\"\necho '{\"x\": -4, \"y\": 9}' > \"$2.origin.json\"\n",
    );
    let input = temp.path().join("power.kicad_sch");
    write_fixture_png(&input);

    let renderer = CommandRenderer::with_version(script_settings(&script, 10), "test");
    let raster = renderer
        .render(&request(&temp, &input, DesignKind::Schematic))
        .expect("render succeeds");
    assert_eq!((raster.origin_x, raster.origin_y), (-4, 9));
}

#[test]
fn non_zero_exit_captures_stderr() {
    let temp = TempDir::new().expect("tempdir");
    let script = write_script(temp.path(), "echo 'layer F.Fab unknown' >&2\nexit 3\n");
    let input = temp.path().join("board.kicad_pcb");
    fs::write(&input, "(kicad_pcb)").expect("write input");

    let renderer = CommandRenderer::with_version(script_settings(&script, 10), "test");
    let err = renderer
        .render(&request(&temp, &input, DesignKind::Pcb))
        .expect_err("render fails");
    match err {
        RenderError::Exit { code, stderr, .. } => {
            assert_eq!(code, "3");
            assert!(stderr.contains("layer F.Fab unknown"));
        }
        other => panic!("expected Exit, got {other:?}"),
    }
}

#[test]
fn slow_renderer_is_killed_after_timeout() {
    let temp = TempDir::new().expect("tempdir");
    let script = write_script(temp.path(), "exec sleep 30\n");
    let input = temp.path().join("board.kicad_pcb");
    fs::write(&input, "(kicad_pcb)").expect("write input");

    let renderer = CommandRenderer::with_version(script_settings(&script, 1), "test");
    let started = Instant::now();
    let err = renderer
        .render(&request(&temp, &input, DesignKind::Pcb))
        .expect_err("render times out");

    assert!(matches!(err, RenderError::TimedOut { .. }));
    assert!(started.elapsed().as_secs() < 10);
}

#[test]
fn missing_output_is_reported() {
    let temp = TempDir::new().expect("tempdir");
    let script = write_script(temp.path(), "exit 0\n");
    let input = temp.path().join("board.kicad_pcb");
    fs::write(&input, "(kicad_pcb)").expect("write input");

    let renderer = CommandRenderer::with_version(script_settings(&script, 10), "test");
    let err = renderer
        .render(&request(&temp, &input, DesignKind::Pcb))
        .expect_err("no output");
    assert!(matches!(err, RenderError::Output { .. }));
}

#[test]
fn missing_program_fails_to_spawn() {
    let temp = TempDir::new().expect("tempdir");
    let input = temp.path().join("board.kicad_pcb");
    fs::write(&input, "(kicad_pcb)").expect("write input");

    let settings = CommandSettings {
        program: "/nonexistent/kidivis-render".into(),
        ..CommandSettings::default()
    };
    let renderer = CommandRenderer::new(settings);
    assert!(renderer.version().starts_with("unknown+"));

    let err = renderer
        .render(&request(&temp, &input, DesignKind::Pcb))
        .expect_err("spawn fails");
    assert!(matches!(err, RenderError::Spawn { .. }));
}

#[test]
fn background_children_do_not_hold_the_render() {
    let temp = TempDir::new().expect("tempdir");
    // The straggler inherits stdout and stderr.
    let script = write_script(temp.path(), "(sleep 30) &\ncp \"$1\" \"$2\"\n");
    let input = temp.path().join("board.kicad_pcb");
    let expected = write_fixture_png(&input);

    let renderer = CommandRenderer::with_version(script_settings(&script, 20), "test");
    let started = Instant::now();
    let raster = renderer
        .render(&request(&temp, &input, DesignKind::Pcb))
        .expect("render succeeds");

    assert_eq!(raster.image, expected);
    assert!(started.elapsed().as_secs() < 10);
}

#[test]
fn each_layer_is_handed_to_the_program() {
    let temp = TempDir::new().expect("tempdir");
    let script = write_script(
        temp.path(),
        "cp \"$1\" \"$2\"\necho \"$3\" >> \"$(dirname \"$1\")/layers.txt\"\n",
    );
    let input = temp.path().join("board.kicad_pcb");
    write_fixture_png(&input);

    let mut settings = script_settings(&script, 10);
    settings.pcb_args.push("{layer}".into());
    settings.layers = vec!["F.Cu".into(), "B.Cu".into()];
    let renderer = CommandRenderer::with_version(settings, "test");

    for layer in renderer.layers(DesignKind::Pcb) {
        renderer
            .render(&request(&temp, &input, DesignKind::Pcb).with_layer(layer.as_str()))
            .expect("render succeeds");
    }
    let seen = fs::read_to_string(temp.path().join("layers.txt")).expect("layer log");
    assert_eq!(seen, "F.Cu\nB.Cu\n");
}
