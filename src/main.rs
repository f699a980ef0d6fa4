use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use hdr_look_backend::api::server::serve;
use hdr_look_backend::config::{config_path_from_env, load_app_config, resolve_app_root};
use hdr_look_backend::pipeline::{
    default_hdr_pipeline, ProcessImageInput, ProcessImageService, SharedImagePipeline,
};
use hdr_look_backend::storage::StorageLayout;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    if matches!(cli_args.first().map(String::as_str), Some("process")) {
        let args = parse_process_cli_args(&cli_args[1..])?;
        let Some(args) = args else {
            print_process_usage();
            return Ok(());
        };
        run_process_cli(args)?;
        return Ok(());
    }

    let bind =
        std::env::var("HDR_BACKEND_BIND").unwrap_or_else(|_| String::from("127.0.0.1:5000"));
    let addr: SocketAddr = bind.parse()?;
    let config = load_app_config(resolve_app_root().as_path(), config_path_from_env().as_deref())?;

    serve(addr, config).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProcessCliArgs {
    filename: String,
    app_root: PathBuf,
    config_path: Option<String>,
}

/// `Ok(None)` means help was requested.
fn parse_process_cli_args(
    args: &[String],
) -> Result<Option<ProcessCliArgs>, Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        return Ok(None);
    }

    let mut filename = None::<String>;
    let mut app_root = resolve_app_root();
    let mut config_path = config_path_from_env();

    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let needs_value = |idx: usize| -> Result<String, Box<dyn std::error::Error>> {
            let Some(value) = args.get(idx + 1) else {
                return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
            };
            Ok(value.clone())
        };

        match flag {
            "--filename" => {
                filename = Some(needs_value(i)?);
                i += 2;
            }
            "--app-root" => {
                app_root = PathBuf::from(needs_value(i)?);
                i += 2;
            }
            "--config" => {
                config_path = Some(needs_value(i)?);
                i += 2;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    let Some(filename) = filename.filter(|v| !v.trim().is_empty()) else {
        return Err(std::io::Error::other("Missing required --filename").into());
    };

    Ok(Some(ProcessCliArgs {
        filename,
        app_root,
        config_path,
    }))
}

fn run_process_cli(args: ProcessCliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_app_config(args.app_root.as_path(), args.config_path.as_deref())?;
    let layout = StorageLayout::from_config(&config);
    layout.ensure_dirs()?;

    let pipeline: SharedImagePipeline =
        Arc::new(default_hdr_pipeline(layout.clone(), config.pipeline.clone()));
    let service = ProcessImageService::new(pipeline, layout);
    let outcome = service.process(ProcessImageInput {
        filename: Some(args.filename),
    })?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn print_process_usage() {
    println!(
        "Usage: hdr-look-backend process --filename <name> [--config PATH] [--app-root PATH]\n\n\
         Runs the HDR-look pipeline on an upload already stored under the upload directory\n\
         and prints the outcome as JSON."
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn parses_process_flags() {
        let parsed = parse_process_cli_args(&strings(&[
            "--filename",
            "cat.png",
            "--app-root",
            "/srv/hdr",
            "--config",
            "custom.toml",
        ]))
        .expect("args should parse")
        .expect("help was not requested");

        assert_eq!(
            parsed,
            ProcessCliArgs {
                filename: String::from("cat.png"),
                app_root: PathBuf::from("/srv/hdr"),
                config_path: Some(String::from("custom.toml")),
            }
        );
    }

    #[test]
    fn help_short_circuits_parsing() {
        let parsed = parse_process_cli_args(&strings(&["--bogus", "--help"]))
            .expect("help should not error");
        assert_eq!(parsed, None);
    }

    #[test]
    fn rejects_missing_filename_and_dangling_flags() {
        let err = parse_process_cli_args(&strings(&["--app-root", "/srv/hdr"]))
            .expect_err("filename is required");
        assert!(err.to_string().contains("--filename"));

        let err = parse_process_cli_args(&strings(&["--filename"]))
            .expect_err("value is required");
        assert!(err.to_string().contains("Missing value for --filename"));

        let err = parse_process_cli_args(&strings(&["--filename", "a.png", "--force"]))
            .expect_err("unknown flag");
        assert!(err.to_string().contains("Unknown argument: --force"));
    }
}
