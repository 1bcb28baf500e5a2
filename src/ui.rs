//! One module per subcommand.

pub mod dump_manifest;
pub mod dump_pack;
pub mod pack;
pub mod unpack;
