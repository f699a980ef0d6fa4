use std::fs;
use std::path::PathBuf;

use image::{DynamicImage, GenericImageView, ImageBuffer, ImageFormat, ImageReader, Rgb, RgbImage};
use uuid::Uuid;

use hdr_look_backend::config::PipelineConfig;
use hdr_look_backend::pipeline::runtime::{
    CommandOutput, CommandSpec, PipelineCommandRunner, PipelineRuntimeError,
    StdPipelineCommandRunner,
};
use hdr_look_backend::pipeline::{HdrPipeline, TransformStatus};
use hdr_look_backend::storage::StorageLayout;

/// Answers the probe and writes a 16-bit PNG rendition of the working input,
/// whatever extension the output path carries.
struct SixteenBitTool;

impl PipelineCommandRunner for SixteenBitTool {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError> {
        if spec.args != [String::from("-version")] {
            let (w, h) = image::open(&spec.args[0])
                .expect("working input should decode")
                .dimensions();
            let out: ImageBuffer<Rgb<u16>, Vec<u16>> =
                ImageBuffer::from_pixel(w, h, Rgb([50_000, 40_000, 30_000]));
            out.save_with_format(spec.args.last().expect("output arg"), ImageFormat::Png)
                .expect("tool output should save");
        }
        Ok(CommandOutput {
            status_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

fn temp_layout() -> StorageLayout {
    let root = std::env::temp_dir().join(format!("hdr_look_pipeline_{}", Uuid::new_v4()));
    let layout = StorageLayout::new(
        root.join("static/uploads"),
        root.join("static/processed"),
        root.join("assets"),
    );
    layout.ensure_dirs().expect("dirs should be created");
    layout
}

fn write_upload(layout: &StorageLayout, name: &str, width: u32, height: u32) -> PathBuf {
    let path = layout.upload_path(name);
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
    .save(&path)
    .expect("fixture should save");
    path
}

fn missing_tool_config() -> PipelineConfig {
    PipelineConfig {
        tool_program: String::from("hdr-look-missing-magick"),
        ..PipelineConfig::default()
    }
}

fn fallback_code(status: &TransformStatus) -> &str {
    match status {
        TransformStatus::Fallback { code, .. } => code.as_str(),
        TransformStatus::Applied => panic!("expected a fallback"),
    }
}

#[test]
fn small_input_without_tool_is_copied_byte_for_byte() {
    let layout = temp_layout();
    let input = write_upload(&layout, "cat.png", 800, 600);
    let pipeline = HdrPipeline::new(layout.clone(), missing_tool_config(), StdPipelineCommandRunner);

    let outcome = pipeline.run("cat.png").expect("fallback should succeed");

    assert!(!outcome.hdr_applied());
    assert!(!outcome.working_input_resized);
    assert_eq!(fallback_code(&outcome.transform), "tool_unavailable");
    assert_eq!(outcome.output_path, layout.processed_path("cat.png"));
    assert_eq!(
        fs::read(&outcome.output_path).expect("output should exist"),
        fs::read(&input).expect("input should exist")
    );
    assert!(!layout.intermediate_path("cat.png").exists());
    assert!(!layout.working_path("cat.png").exists());
}

#[test]
fn rerunning_the_same_upload_is_idempotent() {
    let layout = temp_layout();
    write_upload(&layout, "cat.png", 64, 48);
    let pipeline = HdrPipeline::new(layout.clone(), missing_tool_config(), StdPipelineCommandRunner);

    let first = pipeline.run("cat.png").expect("first run should succeed");
    let first_bytes = fs::read(&first.output_path).expect("first output");
    let second = pipeline.run("cat.png").expect("second run should succeed");

    assert_eq!(first.output_path, second.output_path);
    assert_eq!(
        fs::read(&second.output_path).expect("second output"),
        first_bytes
    );
}

#[test]
fn oversized_input_is_bounded_and_transformed() {
    let layout = temp_layout();
    write_upload(&layout, "big.jpg", 1600, 1200);
    let pipeline = HdrPipeline::new(layout.clone(), PipelineConfig::default(), SixteenBitTool);

    let outcome = pipeline.run("big.jpg").expect("pipeline should succeed");

    assert!(outcome.hdr_applied());
    assert!(outcome.working_input_resized);
    assert_eq!(outcome.output_filename, "processed_HDR_big.jpg");
    let output = ImageReader::open(&outcome.output_path)
        .expect("output should open")
        .with_guessed_format()
        .expect("format should be sniffed")
        .decode()
        .expect("output should decode");
    assert_eq!(output.dimensions(), (1024, 768));
    assert!(matches!(output, DynamicImage::ImageRgb16(_)));
    assert!(!layout.intermediate_path("big.jpg").exists());
    assert!(!layout.working_path("big.jpg").exists());
    assert!(layout.upload_path("big.jpg").exists());
}

#[test]
fn stale_intermediate_never_leaks_into_output() {
    let layout = temp_layout();
    let input = write_upload(&layout, "cat.png", 32, 24);
    fs::write(layout.intermediate_path("cat.png"), b"stale").expect("stale file should write");
    let pipeline = HdrPipeline::new(layout.clone(), missing_tool_config(), StdPipelineCommandRunner);

    let outcome = pipeline.run("cat.png").expect("pipeline should succeed");

    assert_eq!(
        fs::read(&outcome.output_path).expect("output"),
        fs::read(&input).expect("input")
    );
    assert!(!layout.intermediate_path("cat.png").exists());
}

#[cfg(unix)]
mod scripted_tool {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};

    /// Writes an executable shell script that answers `-version` and runs
    /// `body` for the transform call.
    fn install_tool(layout: &StorageLayout, body: &str) -> String {
        let dir = layout
            .processed_dir()
            .parent()
            .expect("processed dir has a parent")
            .join("bin");
        fs::create_dir_all(&dir).expect("bin dir should exist");
        let path = dir.join("fake-magick");
        fs::write(
            &path,
            format!("#!/bin/sh\nif [ \"$1\" = \"-version\" ]; then exit 0; fi\n{body}\n"),
        )
        .expect("script should write");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("script should be executable");
        path.display().to_string()
    }

    fn config_for(program: String, timeout_ms: u64) -> PipelineConfig {
        PipelineConfig {
            tool_program: program,
            transform_timeout_ms: timeout_ms,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn non_zero_exit_falls_back_to_input() {
        let layout = temp_layout();
        let input = write_upload(&layout, "cat.png", 16, 12);
        let tool = install_tool(&layout, "echo boom >&2\nexit 4");
        let pipeline =
            HdrPipeline::new(layout.clone(), config_for(tool, 10_000), StdPipelineCommandRunner);

        let outcome = pipeline.run("cat.png").expect("pipeline should succeed");

        assert_eq!(fallback_code(&outcome.transform), "command_failed");
        assert_eq!(
            fs::read(&outcome.output_path).expect("output"),
            fs::read(&input).expect("input")
        );
    }

    #[test]
    fn hung_tool_is_killed_and_falls_back() {
        let layout = temp_layout();
        let input = write_upload(&layout, "cat.png", 16, 12);
        let tool = install_tool(&layout, "exec sleep 30");
        let pipeline =
            HdrPipeline::new(layout.clone(), config_for(tool, 200), StdPipelineCommandRunner);

        let started = Instant::now();
        let outcome = pipeline.run("cat.png").expect("pipeline should succeed");

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(fallback_code(&outcome.transform), "timed_out");
        assert_eq!(
            fs::read(&outcome.output_path).expect("output"),
            fs::read(&input).expect("input")
        );
    }

    #[test]
    fn tool_that_writes_output_is_applied() {
        let layout = temp_layout();
        write_upload(&layout, "cat.png", 16, 12);
        let tool = install_tool(&layout, "for last; do :; done\ncp \"$1\" \"$last\"");
        let pipeline =
            HdrPipeline::new(layout.clone(), config_for(tool, 10_000), StdPipelineCommandRunner);

        let outcome = pipeline.run("cat.png").expect("pipeline should succeed");

        assert!(outcome.hdr_applied());
        assert!(!outcome.profile_applied);
        assert!(layout.processed_path("cat.png").is_file());
        assert!(!layout.intermediate_path("cat.png").exists());
    }
}
