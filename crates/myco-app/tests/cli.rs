use std::path::PathBuf;
use std::process::Command;

fn out_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("myco-{}-{name}.png", std::process::id()))
}

fn myco() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_myco-app"));
    cmd.env("RUST_LOG", "off");
    cmd
}

#[test]
fn canvas_render_writes_png() {
    let out = out_path("canvas");
    let status = myco()
        .args([
            "--tier", "canvas", "--algorithm", "dla", "--width", "800", "--height", "600",
            "--frames", "5", "--seed", "11", "--color", "#454545",
        ])
        .arg("--out")
        .arg(&out)
        .status()
        .expect("failed to run myco-app");
    assert!(status.success(), "canvas render failed");

    let image = image::open(&out).expect("png").to_rgba8();
    assert_eq!(image.dimensions(), (416, 320));
    assert_eq!(image.get_pixel(208, 160).0, [0x45, 0x45, 0x45, 255]);
    assert_eq!(image.get_pixel(0, 0).0[3], 0);
    let _ = std::fs::remove_file(out);
}

#[test]
fn slime_render_with_resize() {
    // Desktop viewports get a 0.5 pixel ratio cap and 32-cell alignment.
    let out = out_path("slime");
    let status = myco()
        .args([
            "--tier", "canvas", "--algorithm", "slime", "--width", "800", "--height", "600",
            "--frames", "6", "--resize-to", "1600x1200", "--set", "walkers=64",
        ])
        .arg("--out")
        .arg(&out)
        .status()
        .expect("failed to run myco-app");
    assert!(status.success(), "slime render failed");
    let image = image::open(&out).expect("png").to_rgba8();
    assert_eq!(image.dimensions(), (800, 608));
    let _ = std::fs::remove_file(out);
}

#[test]
fn algorithm_knob_is_not_overridden_by_flag_default() {
    let out = out_path("knob-slime");
    let output = myco()
        .args([
            "--tier", "canvas", "--width", "800", "--height", "600", "--frames", "6",
            "--set", "algorithm=slime", "--set", "walkers=64",
        ])
        .arg("--out")
        .arg(&out)
        .output()
        .expect("failed to run myco-app");
    assert!(output.status.success(), "slime knob render failed");
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("slime on canvas-2d"));

    // Trails map intensity to alpha continuously; a DLA layer is only 0 or 255.
    let image = image::open(&out).expect("png").to_rgba8();
    assert!(image.pixels().any(|p| p.0[3] > 0 && p.0[3] < 255));
    let _ = std::fs::remove_file(out);

    let output = myco()
        .args([
            "--tier", "canvas", "--width", "800", "--height", "600", "--frames", "2",
            "--set", "algorithm=slime", "--algorithm", "dla",
        ])
        .arg("--out")
        .arg(out_path("flag-dla"))
        .output()
        .expect("failed to run myco-app");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("dla on canvas-2d"));
    let _ = std::fs::remove_file(out_path("flag-dla"));
}

#[test]
fn dom_tier_writes_nothing() {
    let out = out_path("dom");
    let output = myco()
        .args(["--tier", "dom", "--frames", "2"])
        .arg("--out")
        .arg(&out)
        .output()
        .expect("failed to run myco-app");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("dom-only"));
    assert!(!out.exists());
}

#[test]
fn bad_settings_fail_fast() {
    let status = myco()
        .args(["--tier", "canvas", "--set", "dla.no_such_knob=1", "--frames", "1"])
        .status()
        .expect("failed to run myco-app");
    assert!(!status.success());

    let status = myco()
        .args(["--tier", "canvas", "--color", "", "--frames", "1"])
        .status()
        .expect("failed to run myco-app");
    assert!(!status.success(), "empty theme colour is rejected");
}
