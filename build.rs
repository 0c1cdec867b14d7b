use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "LOCSYNC_";

fn rust_sources(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Every `LOCSYNC_*` identifier mentioned in `source`. Bare prefixes and
/// names ending in `_` are format fragments, not variables.
fn env_keys(source: &str) -> impl Iterator<Item = &str> {
    source.match_indices(ENV_PREFIX).filter_map(|(start, _)| {
        let rest = &source[start + ENV_PREFIX.len()..];
        let len = rest
            .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
            .unwrap_or(rest.len());
        let key = &source[start..start + ENV_PREFIX.len() + len];
        (len > 0 && !key.ends_with('_')).then_some(key)
    })
}

fn write_allowlist(out_file: &Path, keys: &BTreeSet<String>) -> io::Result<()> {
    let mut f = fs::File::create(out_file)?;
    writeln!(f, "pub const GENERATED_ENV_ALLOWLIST: &[&str] = &[")?;
    for key in keys {
        writeln!(f, "    {key:?},")?;
    }
    writeln!(f, "];")
}

fn main() -> io::Result<()> {
    let mut keys = BTreeSet::new();
    for file in rust_sources(Path::new("src"))? {
        let source = fs::read_to_string(&file)?;
        keys.extend(env_keys(&source).map(str::to_owned));
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::other("OUT_DIR is not set"))?;
    write_allowlist(&out_dir.join("locsync_env_allowlist.rs"), &keys)?;

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    Ok(())
}
