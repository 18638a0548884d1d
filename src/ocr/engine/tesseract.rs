use anyhow::{Context, Result, anyhow};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;
use tracing::warn;

/// Page segmentation "sparse text": balloons and captions scattered over
/// artwork rather than a single column.
pub(super) const SPARSE_TEXT_PSM: u32 = 11;

/// Traineddata names the local `tesseract` install can load.
pub(crate) fn installed_languages() -> Result<Vec<String>> {
    let listing = tesseract(["--list-langs"])?;
    Ok(parse_language_listing(&listing))
}

/// Keeps the requested traineddata names that are installed. Fails when none
/// are, which surfaces as a recognizer initialization error.
pub(super) fn resolve_languages(requested: &str, available: &[String]) -> Result<String> {
    let (chosen, missing): (Vec<&str>, Vec<&str>) = requested
        .split(['+', ',', ' '])
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .partition(|lang| available.iter().any(|value| value == lang));

    if chosen.is_empty() {
        if missing.is_empty() {
            return Err(anyhow!("no recognizer language requested"));
        }
        return Err(anyhow!(
            "traineddata not installed: {} (installed: {})",
            missing.join(", "),
            available.join(", ")
        ));
    }
    if !missing.is_empty() {
        warn!(
            "skipping traineddata that is not installed: {}",
            missing.join(", ")
        );
    }
    Ok(chosen.join("+"))
}

/// Runs recognition on `image` and returns the TSV dump.
pub(super) fn recognize_tsv(image: &Path, languages: &str) -> Result<String> {
    let psm = SPARSE_TEXT_PSM.to_string();
    let args: [&OsStr; 9] = [
        image.as_os_str(),
        OsStr::new("stdout"),
        OsStr::new("-l"),
        OsStr::new(languages),
        OsStr::new("--oem"),
        OsStr::new("1"),
        OsStr::new("--psm"),
        OsStr::new(&psm),
        OsStr::new("tsv"),
    ];
    tesseract(args)
}

fn tesseract<I, S>(args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new("tesseract")
        .args(args)
        .output()
        .with_context(|| "failed to run tesseract (is it installed?)")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("tesseract exited with {}: {}", output.status, stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// The first line of `--list-langs` is a header naming the data directory.
fn parse_language_listing(listing: &str) -> Vec<String> {
    listing
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
