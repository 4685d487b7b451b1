// src/constants.rs

/// Name of the plumb directory inside the system config directory.
pub const APP_DIR_NAME: &str = "plumb";

/// File holding user-defined shell descriptors.
pub const SHELLS_CONFIG_FILENAME: &str = "shells.toml";

/// Prefix of temporary script files written for shells that need a file.
pub const SCRIPT_FILE_PREFIX: &str = "plumb_scripts";

/// Size of the buffer used when streaming process output.
pub const READ_CHUNK_SIZE: usize = 8 * 1024;
