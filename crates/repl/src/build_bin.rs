//! `cljw build`: the single-binary trailer.
//!
//! A built executable is the unmodified interpreter binary followed by
//! the bundled program (dependency sources then the entry file, or a
//! precompiled bytecode module), a little-endian u64 payload length, and
//! the four magic bytes. Startup reads the last 12 bytes of its own
//! image; a magic match means "run the embedded program" before any CLI
//! parsing happens.

use crate::deps::DepsConfig;
use cljw_core::error::{CljError, ErrorKind, EvalResult, Failure};
use cljw_core::value::Value;
use cljw_runtime::bootstrap::{run_module, write_module, MODULE_MAGIC};
use cljw_runtime::Interp;
use std::path::{Path, PathBuf};

pub const TRAILER_MAGIC: &[u8; 4] = b"CLJW";
const TRAILER_LEN: usize = 12;

/// The embedded flag line a `build --nrepl` binary carries ahead of its
/// source payload.
pub const NREPL_HEADER: &str = ";; cljw --nrepl\n";

/// Read the current executable's trailer, if it carries one.
pub fn embedded_payload() -> Option<Vec<u8>> {
    let exe = std::env::current_exe().ok()?;
    let bytes = std::fs::read(exe).ok()?;
    payload_of(&bytes)
}

fn payload_of(image: &[u8]) -> Option<Vec<u8>> {
    if image.len() < TRAILER_LEN {
        return None;
    }
    let magic_at = image.len() - 4;
    if &image[magic_at..] != TRAILER_MAGIC {
        return None;
    }
    let len_at = image.len() - TRAILER_LEN;
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&image[len_at..len_at + 8]);
    let payload_len = u64::from_le_bytes(len_bytes) as usize;
    if payload_len > len_at {
        return None;
    }
    Some(image[len_at - payload_len..len_at].to_vec())
}

fn io_failure(msg: String) -> Failure {
    Failure::Error(CljError::new(ErrorKind::Io, msg))
}

/// Every `.clj` file under a directory, depth first, sorted for a
/// reproducible bundle.
fn collect_clj_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), Failure> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| io_failure(format!("could not list {}: {}", dir.display(), e)))?;
    let mut entries: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            collect_clj_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "clj") {
            out.push(path);
        }
    }
    Ok(())
}

/// Produce a standalone executable embedding `entry` and its dependency
/// sources.
pub fn build(
    interp: &Interp,
    config: &DepsConfig,
    load_paths: &[PathBuf],
    entry: &Path,
    output: Option<PathBuf>,
    nrepl: bool,
    precompile: bool,
) -> Result<PathBuf, Failure> {
    let entry_src = std::fs::read_to_string(entry)
        .map_err(|e| io_failure(format!("could not read {}: {}", entry.display(), e)))?;
    let _ = config;

    let payload: Vec<u8> = if precompile {
        write_module(interp, &entry_src, &entry.to_string_lossy())?
    } else {
        let mut bundle = String::new();
        if nrepl {
            bundle.push_str(NREPL_HEADER);
        }
        let mut dep_files = Vec::new();
        for base in load_paths {
            if base.is_dir() {
                collect_clj_files(base, &mut dep_files)?;
            }
        }
        for file in dep_files {
            if file.canonicalize().ok() == entry.canonicalize().ok() {
                continue;
            }
            let src = std::fs::read_to_string(&file)
                .map_err(|e| io_failure(format!("could not read {}: {}", file.display(), e)))?;
            bundle.push_str(&src);
            bundle.push('\n');
        }
        bundle.push_str(&entry_src);
        bundle.into_bytes()
    };

    let exe = std::env::current_exe()
        .map_err(|e| io_failure(format!("could not locate the interpreter binary: {}", e)))?;
    let mut image = std::fs::read(&exe)
        .map_err(|e| io_failure(format!("could not read {}: {}", exe.display(), e)))?;
    // strip an existing trailer so building from a built binary nests
    // nothing
    if let Some(existing) = payload_of(&image) {
        image.truncate(image.len() - TRAILER_LEN - existing.len());
    }
    image.extend_from_slice(&payload);
    image.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    image.extend_from_slice(TRAILER_MAGIC);

    let output = output.unwrap_or_else(|| {
        PathBuf::from(entry.file_stem().unwrap_or_else(|| std::ffi::OsStr::new("a.out")))
    });
    std::fs::write(&output, image)
        .map_err(|e| io_failure(format!("could not write {}: {}", output.display(), e)))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&output, std::fs::Permissions::from_mode(0o755));
    }
    Ok(output)
}

/// Run an embedded payload. Returns true when the payload asks for an
/// nREPL server after evaluation.
pub fn run_embedded(interp: &Interp, payload: &[u8], argv: &[String]) -> Result<bool, Failure> {
    let args = Value::list(
        argv.iter()
            .map(|a| Value::string(a.as_str()))
            .collect::<Vec<_>>(),
    );
    if let Some(var) = interp.env.core_ns().mapping("*command-line-args*") {
        var.set_root(if argv.is_empty() { Value::Nil } else { args });
    }
    if payload.starts_with(MODULE_MAGIC) {
        run_module(interp, payload)?;
        return Ok(false);
    }
    let src = std::str::from_utf8(payload)
        .map_err(|_| io_failure("embedded payload is neither a module nor UTF-8 source".into()))?;
    let wants_nrepl = src.starts_with(NREPL_HEADER);
    run_source(interp, src)?;
    Ok(wants_nrepl)
}

fn run_source(interp: &Interp, src: &str) -> EvalResult {
    interp.eval_str(src, Some("embedded"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailer_round_trip() {
        let mut image = b"fake interpreter binary".to_vec();
        let payload = b"(println :hi)".to_vec();
        image.extend_from_slice(&payload);
        image.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        image.extend_from_slice(TRAILER_MAGIC);
        assert_eq!(payload_of(&image), Some(payload));
    }

    #[test]
    fn test_plain_binary_has_no_payload() {
        assert_eq!(payload_of(b"just a binary"), None);
        assert_eq!(payload_of(b""), None);
    }

    #[test]
    fn test_corrupt_length_rejected() {
        let mut image = b"short".to_vec();
        image.extend_from_slice(&(9999u64).to_le_bytes());
        image.extend_from_slice(TRAILER_MAGIC);
        assert_eq!(payload_of(&image), None);
    }
}
