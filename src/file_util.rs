//! Small filesystem helpers shared by the packer and unpacker.

use anyhow::{Context, Result};
use byte_unit::{Byte, UnitType};
use camino::Utf8Path;
use nix::sys::stat::lutimes;
use nix::sys::time::TimeVal;

/// Prints a byte count the way a human wants to read it.
pub fn nice_size(bytes: u64) -> String {
    let adjusted = Byte::from_u64(bytes).get_appropriate_unit(UnitType::Binary);
    format!("{adjusted}")
}

/// Sets a path's mtime (and atime) in whole seconds, without following
/// symlinks - the format doesn't store sub-second precision.
pub fn set_mtime(path: &Utf8Path, mtime: i64) -> Result<()> {
    let tv = TimeVal::new(mtime, 0);
    lutimes(path.as_std_path(), &tv, &tv)
        .with_context(|| format!("Failed to set mtime of '{path}' to {mtime}"))
}
