//env
pub const CONFIG_PATH_UNREADABLE: &str = "Config file could not be read";
pub const CONFIG_PARSE_FAILED: &str = "Failed to parse config file";

//store
pub const STORE_CONNECTION_FAILED: &str = "Failed to connect to store";
pub const STORE_READ_FAILED: &str = "Failed to read from store";
pub const STORE_WRITE_FAILED: &str = "Failed to write to store";

//http
pub const HTTP_CLIENT_BUILD_FAILED: &str = "Failed to build HTTP client";
