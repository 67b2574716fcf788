//! External raster converters
//!
//! HEIC, HEIF, AVIF and JPEG XL are decoded by command line tools into a
//! temporary PNG. Each type has an ordered list of candidate programs; the
//! first one found on `PATH` does the work.

use crate::error::DecodeError;
use crate::preview::RasterConverter;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::process::{Command, Stdio};

/// One program invocation, run as `program [args..] <input> <output>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertCommand {
    program: String,
    args: Vec<String>,
}

impl ConvertCommand {
    /// Invoke `program` with the input and output paths
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the paths
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Program name
    #[inline]
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn run(&self, input: &Path, output: &Path) -> std::io::Result<std::process::Output> {
        Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .output()
    }
}

/// [`RasterConverter`] that shells out to decoder programs
#[derive(Debug, Clone, Default)]
pub struct CommandConverter {
    commands: BTreeMap<String, Vec<ConvertCommand>>,
}

impl CommandConverter {
    /// Converter with no programs registered
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// libheif, libavif and libjxl decoders, with ImageMagick as fallback
    #[must_use]
    pub fn system() -> Self {
        let magick = ConvertCommand::new("magick");
        Self::empty()
            .with_command("image/heic", ConvertCommand::new("heif-dec"))
            .with_command("image/heic", ConvertCommand::new("heif-convert"))
            .with_command("image/heic", magick.clone())
            .with_command("image/heif", ConvertCommand::new("heif-dec"))
            .with_command("image/heif", ConvertCommand::new("heif-convert"))
            .with_command("image/heif", magick.clone())
            .with_command("image/avif", ConvertCommand::new("avifdec"))
            .with_command("image/avif", magick.clone())
            .with_command("image/jxl", ConvertCommand::new("djxl"))
            .with_command("image/jxl", magick)
    }

    /// Append a candidate program for `mime`
    #[must_use]
    pub fn with_command(mut self, mime: impl Into<String>, command: ConvertCommand) -> Self {
        self.commands
            .entry(mime.into().to_ascii_lowercase())
            .or_default()
            .push(command);
        self
    }

    /// Candidate programs for `mime`, in the order they are tried
    #[must_use]
    pub fn commands(&self, mime: &str) -> &[ConvertCommand] {
        self.commands
            .get(&mime.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn suffix_for(mime: &str) -> String {
    match mime.rsplit_once('/') {
        Some((_, subtype)) if !subtype.is_empty() => format!(".{subtype}"),
        _ => String::new(),
    }
}

impl RasterConverter for CommandConverter {
    fn convert(&self, mime: &str, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let candidates = self.commands(mime);
        if candidates.is_empty() {
            return Err(DecodeError::ConverterUnavailable(mime.to_string()));
        }

        let io_err = |e: std::io::Error| DecodeError::Conversion(e.to_string());
        let mut input = tempfile::Builder::new()
            .prefix("imgto-")
            .suffix(&suffix_for(mime))
            .tempfile()
            .map_err(io_err)?;
        input.write_all(bytes).map_err(io_err)?;
        input.flush().map_err(io_err)?;
        let output = tempfile::Builder::new()
            .prefix("imgto-")
            .suffix(".png")
            .tempfile()
            .map_err(io_err)?;

        for command in candidates {
            match command.run(input.path(), output.path()) {
                Ok(out) if out.status.success() => {
                    tracing::debug!(mime, program = command.program(), "converted");
                    return std::fs::read(output.path()).map_err(io_err);
                }
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    return Err(DecodeError::Conversion(format!(
                        "{} exited with {}: {}",
                        command.program(),
                        out.status,
                        stderr.trim()
                    )));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    tracing::debug!(mime, program = command.program(), "converter not installed");
                }
                Err(e) => {
                    return Err(DecodeError::Conversion(format!("{}: {e}", command.program())));
                }
            }
        }
        Err(DecodeError::ConverterUnavailable(mime.to_string()))
    }
}
