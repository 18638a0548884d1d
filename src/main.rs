use std::io::{self, IsTerminal, Read, Write};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use image_translate_overlay::ocr::RenderMode;

#[derive(Parser, Debug)]
#[command(
    name = "image-translate-overlay",
    version,
    about = "Translate text inside the images of an HTML page and overlay the result"
)]
struct Cli {
    /// HTML file to process (reads stdin when omitted)
    input: Option<String>,

    /// URL the page was loaded from; resolves relative image sources
    #[arg(short = 'u', long = "page-url")]
    page_url: Option<String>,

    /// Write the rewritten page here instead of stdout
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Target language (defaults to the site record, else en)
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Source language (ISO 639-1/2/3). Use "auto" to detect.
    #[arg(short = 'L', long = "source-lang")]
    source_lang: Option<String>,

    /// Scan the page even when auto-run is off for this site
    #[arg(short = 's', long = "scan")]
    scan: bool,

    /// Overlay mode: layer (positioned text) or raster (redrawn image)
    #[arg(long = "render")]
    render: Option<RenderMode>,

    /// Number of images processed at once
    #[arg(short = 'c', long = "concurrency")]
    concurrency: Option<usize>,

    /// Drop recognized lines below this confidence (0-100)
    #[arg(long = "min-confidence")]
    min_confidence: Option<f32>,

    /// Endpoint that fetches images on behalf of the page
    #[arg(long = "relay-url")]
    relay_url: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Model name or provider:model (e.g. openai:MODEL_ID)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Tesseract language list (e.g. jpn+jpn_vert)
    #[arg(long = "ocr-engine-langs")]
    ocr_engine_langs: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    image_translate_overlay::logging::init(cli.verbose)?;

    let html = read_input(cli.input.as_deref())?;
    let output = image_translate_overlay::run(
        image_translate_overlay::Config {
            page_url: cli.page_url,
            lang: cli.lang,
            source_lang: cli.source_lang,
            scan: cli.scan,
            render: cli.render,
            concurrency: cli.concurrency,
            min_confidence: cli.min_confidence,
            relay_url: cli.relay_url,
            key: cli.key,
            model: cli.model,
            settings_path: cli.read_settings,
            ocr_engine_langs: cli.ocr_engine_langs,
        },
        &html,
    )
    .await?;

    if let Some(report) = &output.report {
        let mut stderr = io::stderr().lock();
        for task in &report.tasks {
            writeln!(stderr, "{}", task.summary())?;
        }
    }

    match cli.output.as_deref() {
        Some(path) => std::fs::write(path, &output.html)
            .with_context(|| format!("failed to write {}", path))?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(output.html.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn read_input(path: Option<&str>) -> Result<String> {
    if let Some(path) = path {
        return std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path));
    }
    if io::stdin().is_terminal() {
        return Err(anyhow!("no input: pass an HTML file or pipe one on stdin"));
    }
    let mut buffer = Vec::new();
    io::stdin().read_to_end(&mut buffer)?;
    String::from_utf8(buffer).map_err(|_| anyhow!("stdin must be UTF-8 HTML"))
}
