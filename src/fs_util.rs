use std::fs;

use camino::Utf8Path;

use crate::error::KiraError;

pub fn ensure_dir(path: &Utf8Path) -> Result<(), KiraError> {
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("create {path}: {err}")))
}

pub fn move_file(source: &Utf8Path, dest: &Utf8Path) -> Result<(), KiraError> {
    if !source.as_std_path().is_file() {
        return Err(KiraError::Filesystem(format!("{source} does not exist")));
    }
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    if fs::rename(source.as_std_path(), dest.as_std_path()).is_ok() {
        return Ok(());
    }
    fs::copy(source.as_std_path(), dest.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("copy {source} -> {dest}: {err}")))?;
    fs::remove_file(source.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("remove {source}: {err}")))?;
    Ok(())
}
